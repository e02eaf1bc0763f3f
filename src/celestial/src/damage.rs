//! Damage accumulation (§4.G step 5, and the "Region update helper").
//!
//! A single entry is `(window, rect_in_window_coords)`; the present step blends each
//! entry's slice of the window's shared pixel buffer into the framebuffer under a clip
//! equal to that rect translated to screen coordinates, so no region is touched twice
//! in one frame.

use crate::window::{Rect, WindowId, WindowList};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DamageEntry {
    pub window: WindowId,
    pub rect: Rect,
}

#[derive(Default)]
pub struct DamageQueue {
    entries: Vec<DamageEntry>,
}

impl DamageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn push(&mut self, window: WindowId, rect: Rect) {
        self.entries.push(DamageEntry { window, rect });
    }

    #[must_use]
    pub fn drain(&mut self) -> Vec<DamageEntry> {
        std::mem::take(&mut self.entries)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Given a screen-space rectangle, finds every window whose bounds intersect it
/// (background layer first, then default) and pushes the intersected sub-rectangle, in
/// window-local coordinates, onto `queue`. This is the helper §4.G describes for
/// building a damage region from an arbitrary screen-space rect (e.g. a window's old
/// and new drag position).
pub fn push_screen_rect(queue: &mut DamageQueue, windows: &WindowList, screen_rect: Rect, exclude: Option<WindowId>) {
    for &id in windows.layers_for_update() {
        if Some(id) == exclude {
            continue;
        }
        let Some(window) = windows.get(id) else { continue };
        let Some(hit) = window.rect.intersection(&screen_rect) else { continue };
        let local = Rect::new(hit.x - window.rect.x, hit.y - window.rect.y, hit.w, hit.h);
        queue.push(id, local);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::ZLayer;

    #[test]
    fn push_screen_rect_translates_to_window_local_coords() {
        let mut windows = WindowList::new();
        let id = windows.create(1, ZLayer::Default, Rect::new(100, 100, 200, 200), 1).unwrap();
        let mut queue = DamageQueue::new();
        push_screen_rect(&mut queue, &windows, Rect::new(150, 150, 50, 50), None);
        let entries = queue.drain();
        assert_eq!(entries, vec![DamageEntry { window: id, rect: Rect::new(50, 50, 50, 50) }]);
    }

    #[test]
    fn excluded_window_is_skipped() {
        let mut windows = WindowList::new();
        let id = windows.create(1, ZLayer::Default, Rect::new(0, 0, 100, 100), 1).unwrap();
        let mut queue = DamageQueue::new();
        push_screen_rect(&mut queue, &windows, Rect::new(0, 0, 100, 100), Some(id));
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn drag_damage_covers_union_of_old_and_new_rects() {
        let mut windows = WindowList::new();
        let id = windows.create(1, ZLayer::Default, Rect::new(250, 250, 200, 200), 1).unwrap();
        let old_rect = Rect::new(100, 100, 200, 200);
        let new_rect = windows.get(id).unwrap().rect;
        let union = old_rect.union(&new_rect);

        let mut queue = DamageQueue::new();
        push_screen_rect(&mut queue, &windows, union, None);
        assert!(!queue.is_empty());
    }
}
