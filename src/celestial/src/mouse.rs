//! Mouse -> event routing (§4.G "Mouse -> event routing" and "Drag").

use hexaio::drivers::ps2::mouse::{MouseEvent, BUTTON_LEFT};

use crate::window::{Rect, WindowId, WindowList, ZLayer};

/// Pointer deltas are amplified by this sensitivity constant before being applied
/// (§4.G: "increments the pointer by 3x the reported delta").
const SENSITIVITY: i32 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RoutedEvent {
    Enter(WindowId),
    Exit(WindowId),
    Motion(WindowId, i32, i32),
    Drag(WindowId, i32, i32),
    ButtonDown(WindowId, u8),
    ButtonUp(WindowId, u8),
    Scroll(WindowId, i32),
    Focused(WindowId),
    Unfocused(WindowId),
}

/// What a drag (or the initial/final frame of one) did to a window's on-screen rect,
/// so the caller can push the right damage: the union of the old and new rects, with
/// the window itself excluded from the old region's redraw (§4.G "Drag").
#[derive(Clone, Copy, Debug)]
pub struct DragRepaint {
    pub window: WindowId,
    pub old_rect: Rect,
    pub new_rect: Rect,
}

#[derive(Default)]
pub struct RouteOutcome {
    pub events: Vec<RoutedEvent>,
    pub drag_repaint: Option<DragRepaint>,
}

pub struct MouseRouter {
    pub x: i32,
    pub y: i32,
    buttons: u8,
    hover: Option<WindowId>,
    dragging: Option<WindowId>,
    screen_w: i32,
    screen_h: i32,
    cursor_w: u32,
    cursor_h: u32,
}

impl MouseRouter {
    #[must_use]
    pub fn new(screen_w: i32, screen_h: i32, cursor_w: u32, cursor_h: u32) -> Self {
        Self {
            x: screen_w / 2,
            y: screen_h / 2,
            buttons: 0,
            hover: None,
            dragging: None,
            screen_w,
            screen_h,
            cursor_w,
            cursor_h,
        }
    }

    /// Current sprite dimensions, for the compositor's per-frame cursor overdraw
    /// (§4.G step 6).
    #[must_use]
    pub fn cursor_size(&self) -> (u32, u32) {
        (self.cursor_w, self.cursor_h)
    }

    fn clamp(&mut self) {
        let max_x = (self.screen_w - self.cursor_w as i32).max(0);
        let max_y = (self.screen_h - self.cursor_h as i32).max(0);
        self.x = self.x.clamp(0, max_x);
        self.y = self.y.clamp(0, max_y);
    }

    /// Applies one decoded mouse update against the window list, producing the routed
    /// events to dispatch (subject to each window's subscription mask) and, if a drag
    /// is in progress, the repaint region it caused.
    pub fn route(&mut self, windows: &mut WindowList, delta: MouseEvent) -> RouteOutcome {
        let mut out = RouteOutcome::default();

        self.x += i32::from(delta.dx) * SENSITIVITY;
        self.y -= i32::from(delta.dy) * SENSITIVITY; // PS/2 Y is inverted relative to screen-down coordinates.
        self.clamp();

        let previous_buttons = self.buttons;
        let added = delta.buttons & !previous_buttons;
        let removed = previous_buttons & !delta.buttons;
        self.buttons = delta.buttons;

        let left_pressed_now = added.count_ones() == 1 && added & BUTTON_LEFT != 0;
        let left_released_now = removed.count_ones() == 1 && removed & BUTTON_LEFT != 0;

        if let Some(dragged) = self.dragging {
            if let Some(window) = windows.get(dragged) {
                let old_rect = window.rect;
                if left_released_now {
                    self.dragging = None;
                    if let Some(w) = windows.get_mut(dragged) {
                        w.state = crate::window::InteractionState::Normal;
                    }
                } else if let crate::window::InteractionState::Dragging { offset_x, offset_y } = window.state {
                    let max_x = (self.screen_w - old_rect.w as i32).max(0);
                    let max_y = (self.screen_h - old_rect.h as i32).max(0);
                    let new_rect = Rect::new(
                        (self.x + offset_x).clamp(0, max_x),
                        (self.y + offset_y).clamp(0, max_y),
                        old_rect.w,
                        old_rect.h,
                    );
                    if let Some(w) = windows.get_mut(dragged) {
                        w.rect = new_rect;
                    }
                    out.events.push(RoutedEvent::Drag(dragged, self.x - new_rect.x, self.y - new_rect.y));
                    out.drag_repaint = Some(DragRepaint { window: dragged, old_rect, new_rect });
                }
            }
        }

        let hovered = windows.topmost_at(self.x, self.y);
        if hovered != self.hover {
            if let Some(prev) = self.hover {
                out.events.push(RoutedEvent::Exit(prev));
            }
            if let Some(next) = hovered {
                out.events.push(RoutedEvent::Enter(next));
            }
            self.hover = hovered;
        }

        if added.count_ones() > 1 || removed.count_ones() > 1 {
            // "two changes in one frame are rejected with a warning" (§4.G).
            hexaio::warn!("celestial/mouse", "ambiguous button transition {:#x} -> {:#x} dropped", previous_buttons, delta.buttons);
        } else {
            if added != 0 {
                if let Some(target) = hovered {
                    out.events.push(RoutedEvent::ButtonDown(target, added));
                }
            }
            if removed != 0 {
                if let Some(target) = self.dragging.or(hovered) {
                    out.events.push(RoutedEvent::ButtonUp(target, removed));
                }
            }
        }

        if left_pressed_now && self.dragging.is_none() {
            if let Some(target) = hovered {
                if windows.get(target).map(|w| w.layer) == Some(ZLayer::Default) {
                    let previous_focus = windows.focus(target);
                    if previous_focus != Some(target) {
                        if let Some(prev) = previous_focus {
                            out.events.push(RoutedEvent::Unfocused(prev));
                        }
                        out.events.push(RoutedEvent::Focused(target));
                    }
                    if let Some(w) = windows.get_mut(target) {
                        w.state = crate::window::InteractionState::Dragging {
                            offset_x: w.rect.x - self.x,
                            offset_y: w.rect.y - self.y,
                        };
                    }
                    self.dragging = Some(target);
                }
            }
        }

        if delta.dx != 0 || delta.dy != 0 {
            if let Some(target) = hovered {
                if self.buttons & BUTTON_LEFT == 0 {
                    out.events.push(RoutedEvent::Motion(target, self.x, self.y));
                }
            }
        }

        if delta.scroll != 0 {
            if let Some(target) = hovered {
                out.events.push(RoutedEvent::Scroll(target, i32::from(delta.scroll)));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexaio::drivers::ps2::mouse::BUTTON_LEFT;

    fn event(dx: i16, dy: i16, buttons: u8) -> MouseEvent {
        MouseEvent { dx, dy, buttons, scroll: 0 }
    }

    #[test]
    fn drag_moves_window_by_pointer_offset() {
        let mut windows = WindowList::new();
        let id = windows.create(1, ZLayer::Default, Rect::new(100, 100, 200, 200), 1).unwrap();
        let mut router = MouseRouter::new(1024, 768, 16, 16);
        router.x = 150;
        router.y = 150;

        router.route(&mut windows, event(0, 0, BUTTON_LEFT));
        assert_eq!(windows.focused, Some(id));

        // Move the pointer to (300, 300); the window should now sit at (250, 250),
        // matching the stored (window - pointer) offset of (-50, -50) from press time.
        let dx = (300 - 150) / SENSITIVITY;
        let dy = -((300 - 150) / SENSITIVITY);
        router.route(&mut windows, event(dx as i16, dy as i16, BUTTON_LEFT));

        let rect = windows.get(id).unwrap().rect;
        assert_eq!((rect.x, rect.y), (250, 250));
    }

    #[test]
    fn release_clears_drag_state() {
        let mut windows = WindowList::new();
        windows.create(1, ZLayer::Default, Rect::new(100, 100, 200, 200), 1).unwrap();
        let mut router = MouseRouter::new(1024, 768, 16, 16);
        router.x = 150;
        router.y = 150;
        router.route(&mut windows, event(0, 0, BUTTON_LEFT));
        router.route(&mut windows, event(0, 0, 0));
        assert!(router.dragging.is_none());
    }
}
