//! The compositor's per-frame loop (§4.G): the "World" owns every piece of state a
//! frame touches and exposes a single [`World::run_frame`] so `main.rs` only has to
//! supply the concrete input source, socket listener and framebuffer.

use std::collections::HashMap;
use std::os::unix::io::RawFd;

use hexaio::drivers::ps2::kbd::{KeyCode, KeyPacket, KeyState};
use hexaio::drivers::ps2::mouse::MouseEvent;

use crate::damage::{push_screen_rect, DamageQueue};
use crate::mouse::{MouseRouter, RoutedEvent};
use crate::protocol::{self, EventType, Request};
use crate::shm::SharedBuffer;
use crate::socket::{Connection, Listener};
use crate::window::{InteractionState, Rect, WindowId, WindowList, ZLayer};

/// Presents composited pixels; `main.rs` backs this with the real framebuffer device,
/// tests back it with a no-op.
pub trait Framebuffer {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Blends `src` (window-local, `src_stride` bytes per row, 32bpp) into the
    /// framebuffer at `dst_rect` (screen coordinates).
    fn blit(&mut self, dst_rect: Rect, src: &[u8], src_stride: usize);
}

struct Client {
    conn: Connection,
    window: Option<WindowId>,
}

pub struct World {
    listener: Listener,
    clients: HashMap<RawFd, Client>,
    windows: WindowList,
    damage: DamageQueue,
    router: MouseRouter,
    buffers: HashMap<WindowId, SharedBuffer>,
    recv_buf: [u8; 4096],
    cursor_sprite: Vec<u8>,
}

impl World {
    pub fn new(listener: Listener, screen_w: i32, screen_h: i32) -> Self {
        let (cursor_w, cursor_h) = (16, 16);
        Self {
            listener,
            clients: HashMap::new(),
            windows: WindowList::new(),
            damage: DamageQueue::new(),
            router: MouseRouter::new(screen_w, screen_h, cursor_w, cursor_h),
            buffers: HashMap::new(),
            recv_buf: [0; 4096],
            cursor_sprite: arrow_sprite(cursor_w, cursor_h),
        }
    }

    #[must_use]
    pub fn windows(&self) -> &WindowList {
        &self.windows
    }

    /// Runs one iteration of the frame loop: accept new clients, drain their requests,
    /// route buffered mouse/keyboard input, then blend every damaged region into `fb`.
    pub fn run_frame(&mut self, input: &hexaio::input::InputAggregator, fb: &mut dyn Framebuffer) {
        self.damage.reset();

        while let Ok(Some(conn)) = self.listener.accept() {
            self.clients.insert(conn_fd(&conn), Client { conn, window: None });
        }

        self.drain_client_requests();

        // "Read at most one mouse update packet (non-blocking)" (§4.G step 3) — unlike
        // the keyboard drain below, this is deliberately not a loop.
        if let Some(event) = input.poll_mouse() {
            let outcome = self.router.route(&mut self.windows, event);
            self.apply_mouse_outcome(outcome);
        }

        while let Some(key) = input.poll_key() {
            self.deliver_key_to_focused(key);
        }

        self.present(fb);
    }

    fn drain_client_requests(&mut self) {
        let fds: Vec<RawFd> = self.clients.keys().copied().collect();
        for fd in fds {
            loop {
                let received = {
                    let Some(client) = self.clients.get(&fd) else { break };
                    client.conn.recv(&mut self.recv_buf)
                };
                match received {
                    Ok(Some(0)) => {
                        self.drop_client(fd);
                        break;
                    }
                    Ok(Some(n)) => self.handle_request(fd, n),
                    Ok(None) => break,
                    Err(_) => {
                        self.drop_client(fd);
                        break;
                    }
                }
            }
        }
    }

    fn drop_client(&mut self, fd: RawFd) {
        if let Some(client) = self.clients.remove(&fd) {
            if let Some(wid) = client.window {
                self.buffers.remove(&wid);
                self.windows.destroy(wid);
            }
        }
    }

    fn handle_request(&mut self, fd: RawFd, len: usize) {
        let bytes = self.recv_buf[..len].to_vec();
        let response = match protocol::parse_request(&bytes) {
            Ok(req) => self.dispatch_request(fd, req),
            Err(errno) => protocol::encode_error(errno),
        };
        if let Some(client) = self.clients.get(&fd) {
            let _ = client.conn.send(&response);
        }
    }

    fn dispatch_request(&mut self, fd: RawFd, req: Request) -> Vec<u8> {
        match req {
            Request::CreateWindow(r) => self.create_window(fd, r.width, r.height),
            Request::GetWindowInfo(r) => self.window_info(r.wid),
            Request::Subscribe(r) => self.subscribe(r.wid, r.events),
            Request::DragStart(r) => self.drag_start(r.wid),
            Request::DragStop(r) => self.drag_stop(r.wid),
            Request::Destroy(r) => self.destroy_window(fd, r.wid),
        }
    }

    fn create_window(&mut self, fd: RawFd, width: u32, height: u32) -> Vec<u8> {
        let buffer = match SharedBuffer::create(width, height) {
            Ok(b) => b,
            Err(e) => return protocol::encode_error(e.errno()),
        };
        let shm_key = buffer.key();
        let rect = Rect::new(0, 0, width, height);
        let Some(wid) = self.windows.create(fd, ZLayer::Default, rect, shm_key) else {
            return protocol::encode_error(hexaio::error::DevError::NoSpace.errno());
        };
        self.buffers.insert(wid, buffer);
        if let Some(client) = self.clients.get_mut(&fd) {
            client.window = Some(wid);
        }
        protocol::encode_window_id(wid)
    }

    fn window_info(&self, wid: WindowId) -> Vec<u8> {
        match self.windows.get(wid) {
            Some(w) => protocol::encode_window_info(w.rect.x, w.rect.y, w.rect.w, w.rect.h, w.shm_key),
            None => protocol::encode_error(hexaio::error::DevError::NotFound.errno()),
        }
    }

    fn subscribe(&mut self, wid: WindowId, events: u32) -> Vec<u8> {
        match self.windows.get_mut(wid) {
            Some(w) => {
                w.subscribed = events;
                protocol::encode_ok()
            }
            None => protocol::encode_error(hexaio::error::DevError::NotFound.errno()),
        }
    }

    fn drag_start(&mut self, wid: WindowId) -> Vec<u8> {
        match self.windows.get_mut(wid) {
            Some(w) => {
                w.state = InteractionState::Dragging { offset_x: 0, offset_y: 0 };
                protocol::encode_ok()
            }
            None => protocol::encode_error(hexaio::error::DevError::NotFound.errno()),
        }
    }

    fn drag_stop(&mut self, wid: WindowId) -> Vec<u8> {
        match self.windows.get_mut(wid) {
            Some(w) => {
                w.state = InteractionState::Normal;
                protocol::encode_ok()
            }
            None => protocol::encode_error(hexaio::error::DevError::NotFound.errno()),
        }
    }

    fn destroy_window(&mut self, fd: RawFd, wid: WindowId) -> Vec<u8> {
        if self.windows.destroy(wid).is_none() {
            return protocol::encode_error(hexaio::error::DevError::NotFound.errno());
        }
        self.buffers.remove(&wid);
        if let Some(client) = self.clients.get_mut(&fd) {
            if client.window == Some(wid) {
                client.window = None;
            }
        }
        protocol::encode_ok()
    }

    fn apply_mouse_outcome(&mut self, outcome: crate::mouse::RouteOutcome) {
        if let Some(repaint) = outcome.drag_repaint {
            let union = repaint.old_rect.union(&repaint.new_rect);
            push_screen_rect(&mut self.damage, &self.windows, union, None);
        }
        for event in outcome.events {
            self.deliver_routed_event(event);
        }
    }

    fn deliver_routed_event(&mut self, event: RoutedEvent) {
        let (wid, kind, a, b, c) = match event {
            RoutedEvent::Enter(w) => (w, EventType::MouseEnter, 0, 0, 0),
            RoutedEvent::Exit(w) => (w, EventType::MouseExit, 0, 0, 0),
            RoutedEvent::Motion(w, x, y) => (w, EventType::MouseMotion, x, y, 0),
            RoutedEvent::Drag(w, x, y) => (w, EventType::MouseDrag, x, y, 0),
            RoutedEvent::ButtonDown(w, mask) => (w, EventType::MouseButtonDown, i32::from(mask), 0, 0),
            RoutedEvent::ButtonUp(w, mask) => (w, EventType::MouseButtonUp, i32::from(mask), 0, 0),
            RoutedEvent::Scroll(w, delta) => (w, EventType::MouseScroll, delta, 0, 0),
            RoutedEvent::Focused(w) => (w, EventType::Focused, 0, 0, 0),
            RoutedEvent::Unfocused(w) => (w, EventType::Unfocused, 0, 0, 0),
        };
        self.send_event_if_subscribed(wid, kind, a, b, c);
    }

    fn deliver_key_to_focused(&mut self, key: KeyPacket) {
        let Some(wid) = self.windows.focused else { return };
        let code_point = key.code_point.map_or(0, |c| c as u32);
        let pressed = i32::from(key.new_state == KeyState::Down);
        self.send_event_if_subscribed(wid, EventType::KeyEvent, code_as_i32(key.code), pressed, code_point);
    }

    fn send_event_if_subscribed(&mut self, wid: WindowId, kind: EventType, a: i32, b: i32, c: u32) {
        let Some(window) = self.windows.get(wid) else { return };
        if !window.wants(kind.mask_bit()) {
            return;
        }
        let fd = window.client_fd;
        let Some(client) = self.clients.get(&fd) else { return };
        let packet = protocol::encode_event(kind, wid, a, b, c);
        let _ = client.conn.send(&packet);
    }

    fn present(&mut self, fb: &mut dyn Framebuffer) {
        for entry in self.damage.drain() {
            let Some(window) = self.windows.get(entry.window) else { continue };
            let Some(buffer) = self.buffers.get(&entry.window) else { continue };
            let stride = 4 * window.rect.w as usize;
            let row_start = entry.rect.y as usize * stride + entry.rect.x as usize * 4;
            let row_bytes = entry.rect.w as usize * 4;
            let span = (entry.rect.h as usize).saturating_sub(1) * stride + row_bytes;
            let pixels = &buffer.as_slice()[row_start..];
            let dst = Rect::new(window.rect.x + entry.rect.x, window.rect.y + entry.rect.y, entry.rect.w, entry.rect.h);
            fb.blit(dst, &pixels[..span.min(pixels.len())], stride);
        }

        // "Overdraw the mouse sprite at its current position" (§4.G step 6), the last
        // thing drawn each frame so it always sits above window content.
        let (cursor_w, cursor_h) = self.router.cursor_size();
        let cursor_rect = Rect::new(self.router.x, self.router.y, cursor_w, cursor_h);
        fb.blit(cursor_rect, &self.cursor_sprite, 4 * cursor_w as usize);
    }
}

/// A simple filled-arrow cursor sprite (32bpp, `w*h*4` bytes): a solid white triangle
/// outlined in black, matching the compositor's own 32-bpp shared-buffer pixel format.
fn arrow_sprite(w: u32, h: u32) -> Vec<u8> {
    let mut pixels = vec![0u8; (w * h * 4) as usize];
    for y in 0..h {
        // Widens by one column per row, giving a triangular arrow silhouette.
        let row_width = (y + 1).min(w);
        for x in 0..row_width {
            let edge = x == row_width - 1 || y == h - 1;
            let color: u32 = if edge { 0xFF00_0000 } else { 0xFFFF_FFFF };
            let offset = ((y * w + x) * 4) as usize;
            pixels[offset..offset + 4].copy_from_slice(&color.to_le_bytes());
        }
    }
    pixels
}

fn conn_fd(conn: &Connection) -> RawFd {
    conn.fd
}

fn code_as_i32(code: KeyCode) -> i32 {
    code as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFramebuffer {
        blits: Vec<Rect>,
    }

    impl Framebuffer for NullFramebuffer {
        fn width(&self) -> u32 {
            1024
        }
        fn height(&self) -> u32 {
            768
        }
        fn blit(&mut self, dst_rect: Rect, _src: &[u8], _src_stride: usize) {
            self.blits.push(dst_rect);
        }
    }

    #[test]
    fn world_constructs_with_empty_window_list() {
        let path = format!("/tmp/celestial-world-test-{}.sock", std::process::id());
        let listener = Listener::bind(&path, 4).expect("bind succeeds");
        let world = World::new(listener, 1024, 768);
        assert!(world.windows().get(0).is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn present_always_overdraws_the_cursor_last() {
        let path = format!("/tmp/celestial-world-test-cursor-{}.sock", std::process::id());
        let listener = Listener::bind(&path, 4).expect("bind succeeds");
        let mut world = World::new(listener, 1024, 768);
        let mut fb = NullFramebuffer { blits: Vec::new() };

        // No damage queued, so present()'s only blit is the cursor sprite itself.
        world.present(&mut fb);

        assert_eq!(fb.blits.len(), 1);
        let cursor_rect = fb.blits[0];
        assert_eq!((cursor_rect.x, cursor_rect.y), (world.router.x, world.router.y));
        assert_eq!((cursor_rect.w, cursor_rect.h), world.router.cursor_size());
        let _ = std::fs::remove_file(&path);
    }
}
