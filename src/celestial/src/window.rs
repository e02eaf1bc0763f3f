//! Window lifecycle, z-order and geometry (§3 "Window compositor", §4.G).

use std::collections::HashMap;

pub type WindowId = u32;

/// A compositor layer with its own z-ordered window list (§GLOSSARY "Z-array").
/// Background is drawn first, Default on top of it, Overlay on top of everything —
/// mouse hit-testing and redraw both walk background-then-default per §4.G's "Region
/// update helper" (overlay windows, e.g. cursors/tooltips, never own a pointer region).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ZLayer {
    Background,
    Default,
    Overlay,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InteractionState {
    Normal,
    Dragging { offset_x: i32, offset_y: i32 },
    Resizing,
    Closing,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    #[must_use]
    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.w as i32 && y < self.y + self.h as i32
    }

    #[must_use]
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.w as i32).min(other.x + other.w as i32);
        let y1 = (self.y + self.h as i32).min(other.y + other.h as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    /// The smallest rectangle covering both `self` and `other`, used to build the
    /// "union of old and new rectangles" a drag pushes to the damage queue (§4.G).
    #[must_use]
    pub fn union(&self, other: &Rect) -> Rect {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = (self.x + self.w as i32).max(other.x + other.w as i32);
        let y1 = (self.y + self.h as i32).max(other.y + other.h as i32);
        Rect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32)
    }
}

pub struct Window {
    pub id: WindowId,
    pub client_fd: i32,
    pub rect: Rect,
    pub layer: ZLayer,
    /// Bitmask of [`crate::protocol::EVT_*`] the client has subscribed to.
    pub subscribed: u32,
    pub state: InteractionState,
    pub shm_key: u32,
}

impl Window {
    #[must_use]
    pub fn wants(&self, bit: u32) -> bool {
        self.subscribed & bit != 0
    }
}

/// 32-bit-indexed id allocator (§4.G "allocate an id from a bitmap (32-bit-indexed)").
#[derive(Default)]
pub struct IdBitmap {
    used: u32,
}

impl IdBitmap {
    #[must_use]
    pub fn alloc(&mut self) -> Option<WindowId> {
        let free = !self.used;
        if free == 0 {
            return None;
        }
        let id = free.trailing_zeros();
        self.used |= 1 << id;
        Some(id)
    }

    pub fn free(&mut self, id: WindowId) {
        self.used &= !(1 << id);
    }
}

/// The global window list (§3): insertion order within each [`ZLayer`] is the z-order
/// source of truth, topmost last. Stored as one ordered `Vec<WindowId>` per layer plus a
/// lookup map, so z-order changes (new window, promote-to-focus, destroy) are `Vec`
/// splices rather than a full re-sort.
#[derive(Default)]
pub struct WindowList {
    windows: HashMap<WindowId, Window>,
    background: Vec<WindowId>,
    default_layer: Vec<WindowId>,
    overlay: Vec<WindowId>,
    ids: IdBitmap,
    pub focused: Option<WindowId>,
}

impl WindowList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn layer_vec(&mut self, layer: ZLayer) -> &mut Vec<WindowId> {
        match layer {
            ZLayer::Background => &mut self.background,
            ZLayer::Default => &mut self.default_layer,
            ZLayer::Overlay => &mut self.overlay,
        }
    }

    /// Allocates an id and inserts the window at the head of its layer's z-array
    /// (§4.G: "inserted at the head of its z-array list... promotion to focus happens
    /// only on pointer interaction").
    pub fn create(&mut self, client_fd: i32, layer: ZLayer, rect: Rect, shm_key: u32) -> Option<WindowId> {
        let id = self.ids.alloc()?;
        self.layer_vec(layer).insert(0, id);
        self.windows.insert(
            id,
            Window { id, client_fd, rect, layer, subscribed: 0, state: InteractionState::Normal, shm_key },
        );
        Some(id)
    }

    #[must_use]
    pub fn get(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut Window> {
        self.windows.get_mut(&id)
    }

    /// Unlinks `id` from its z-array and the lookup map, freeing its bitmap bit.
    pub fn destroy(&mut self, id: WindowId) -> Option<Window> {
        let window = self.windows.remove(&id)?;
        self.layer_vec(window.layer).retain(|&w| w != id);
        self.ids.free(id);
        if self.focused == Some(id) {
            self.focused = None;
        }
        Some(window)
    }

    /// Moves `id` to the tail of its z-array (topmost) and makes it the focused window,
    /// per §4.G: "makes that window focused... and moves it to the tail of its z-list".
    /// Only meaningful for default-layer windows.
    #[must_use]
    pub fn focus(&mut self, id: WindowId) -> Option<WindowId> {
        let layer = self.windows.get(&id)?.layer;
        if layer != ZLayer::Default {
            return None;
        }
        let previous = self.focused;
        self.default_layer.retain(|&w| w != id);
        self.default_layer.push(id);
        self.focused = Some(id);
        previous
    }

    /// The topmost window (last in z-order, checking overlay then default then
    /// background) whose rectangle contains `(x, y)` — the pointer's "owning" window
    /// per §3's invariant.
    #[must_use]
    pub fn topmost_at(&self, x: i32, y: i32) -> Option<WindowId> {
        for layer in [&self.overlay, &self.default_layer, &self.background] {
            for &id in layer.iter().rev() {
                if let Some(w) = self.windows.get(&id) {
                    if w.rect.contains_point(x, y) {
                        return Some(id);
                    }
                }
            }
        }
        None
    }

    /// Windows on background-then-default layers whose bounds intersect `rect`, in the
    /// order §4.G's region-update helper walks them (background first, topmost-last
    /// within each layer so later windows paint over earlier ones).
    pub fn layers_for_update(&self) -> impl Iterator<Item = &WindowId> {
        self.background.iter().chain(self.default_layer.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_union_covers_both_rects() {
        let a = Rect::new(100, 100, 200, 200);
        let b = Rect::new(250, 250, 200, 200);
        let u = a.union(&b);
        assert_eq!(u, Rect::new(100, 100, 350, 350));
    }

    #[test]
    fn topmost_prefers_later_insertion_in_same_layer() {
        let mut list = WindowList::new();
        let a = list.create(1, ZLayer::Default, Rect::new(0, 0, 100, 100), 1).unwrap();
        let b = list.create(2, ZLayer::Default, Rect::new(0, 0, 100, 100), 2).unwrap();
        // b sits at the head until focused; focus is what sends a window to the tail.
        list.focus(b);
        assert_eq!(list.topmost_at(10, 10), Some(b));
        let _ = a;
    }

    #[test]
    fn destroy_unlinks_and_frees_the_id() {
        let mut list = WindowList::new();
        let a = list.create(1, ZLayer::Background, Rect::new(0, 0, 10, 10), 1).unwrap();
        list.destroy(a);
        assert!(list.get(a).is_none());
        let b = list.create(1, ZLayer::Background, Rect::new(0, 0, 10, 10), 1).unwrap();
        assert_eq!(a, b, "freed id must be reusable");
    }

    #[test]
    fn focus_moves_window_to_tail_and_reports_previous() {
        let mut list = WindowList::new();
        let a = list.create(1, ZLayer::Default, Rect::new(0, 0, 10, 10), 1).unwrap();
        let b = list.create(2, ZLayer::Default, Rect::new(20, 20, 10, 10), 2).unwrap();
        assert_eq!(list.focus(a), None);
        assert_eq!(list.focus(b), Some(a));
        assert_eq!(list.focused, Some(b));
    }
}
