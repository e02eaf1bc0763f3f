//! Input Aggregator (component F): owns the PS/2 controller and both decoders, and
//! publishes decoded keyboard/mouse events onto one pipe per event type.
//!
//! Nothing above this module talks to [`PS2Controller`] directly. IRQ handlers (run
//! with interrupts masked, per §5) feed raw bytes in through [`Self::on_port1_byte`] /
//! [`Self::on_port2_byte`]; the compositor's per-frame drain (§4.G steps 3-4: "read at
//! most one mouse update packet (non-blocking)... read keyboard packets
//! (non-blocking)") pulls decoded events back out through [`Self::poll_mouse`] /
//! [`Self::poll_key`]. Routing which physical port feeds which decoder assumes the
//! conventional wiring (port 1 = keyboard, port 2 = mouse), detected once at bring-up
//! from the identify bytes the controller already captured.

use alloc::collections::VecDeque;
use spin::Mutex;

use crate::drivers::ps2::kbd::{KeyPacket, KeyboardDecoder};
use crate::drivers::ps2::mouse::{MouseDecoder, MouseEvent, MouseKind};
use crate::drivers::ps2::PS2Controller;

/// A bounded FIFO of decoded events, one per event type, matching the "per-event-type
/// pipe" in the component table (§2). Capacity is generous but finite: a consumer that
/// never drains falls behind rather than growing the allocation unboundedly.
struct Pipe<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> Pipe<T> {
    fn new(capacity: usize) -> Self {
        Self { queue: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    fn push(&self, value: T) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(value);
    }

    fn pop(&self) -> Option<T> {
        self.queue.lock().pop_front()
    }
}

/// Which physical PS/2 port feeds the mouse decoder; the other feeds the keyboard.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MousePort {
    First,
    Second,
    /// Neither port identified as a mouse (single-port keyboard-only controller, or
    /// bring-up failed); mouse bytes are never routed anywhere.
    None,
}

const PIPE_CAPACITY: usize = 64;

pub struct InputAggregator {
    controller: PS2Controller,
    mouse_port: MousePort,
    keyboard: Mutex<KeyboardDecoder>,
    mouse: Mutex<MouseDecoder>,
    key_pipe: Pipe<KeyPacket>,
    mouse_pipe: Pipe<MouseEvent>,
}

impl InputAggregator {
    /// Runs the PS/2 bring-up handshake, identifies which port (if any) holds a mouse,
    /// and attempts the scroll-wheel magic sequence on it. Returns `None` if the
    /// controller itself failed self-test (§4.F step 1).
    #[must_use]
    pub fn init() -> Option<Self> {
        let controller = PS2Controller::init()?;

        let is_mouse = |id: Option<[u8; 2]>| matches!(id.map(|b| b[0]), Some(0x00 | 0x03 | 0x04));

        let mouse_port = if is_mouse(controller.cached_second_identify()) {
            MousePort::Second
        } else if is_mouse(controller.cached_first_identify()) {
            MousePort::First
        } else {
            MousePort::None
        };

        let mouse_kind = match mouse_port {
            MousePort::Second => controller.enable_second_port_mouse_extensions(),
            MousePort::First => controller.enable_first_port_mouse_extensions(),
            MousePort::None => MouseKind::Standard,
        };

        Some(Self {
            controller,
            mouse_port,
            keyboard: Mutex::new(KeyboardDecoder::new()),
            mouse: Mutex::new(MouseDecoder::new(mouse_kind)),
            key_pipe: Pipe::new(PIPE_CAPACITY),
            mouse_pipe: Pipe::new(PIPE_CAPACITY),
        })
    }

    #[must_use]
    pub fn controller(&self) -> &PS2Controller {
        &self.controller
    }

    /// Feeds one byte that arrived on the first PS/2 port (IRQ1 in the conventional
    /// wiring). Runs in IRQ context: non-blocking, no locks shared with a suspending
    /// waiter (§5).
    pub fn on_port1_byte(&self, byte: u8) {
        if self.mouse_port == MousePort::First {
            if let Some(event) = self.mouse.lock().decode_byte(byte) {
                self.mouse_pipe.push(event);
            }
        } else if let Some(packet) = self.keyboard.lock().decode_byte(byte) {
            self.key_pipe.push(packet);
        }
    }

    /// Feeds one byte that arrived on the second PS/2 port (IRQ12 in the conventional
    /// wiring).
    pub fn on_port2_byte(&self, byte: u8) {
        if self.mouse_port == MousePort::Second {
            if let Some(event) = self.mouse.lock().decode_byte(byte) {
                self.mouse_pipe.push(event);
            }
        } else if let Some(packet) = self.keyboard.lock().decode_byte(byte) {
            self.key_pipe.push(packet);
        }
    }

    /// Pops the oldest buffered mouse update, if any. Non-blocking, per the
    /// compositor's per-frame drain contract (§4.G).
    pub fn poll_mouse(&self) -> Option<MouseEvent> {
        self.mouse_pipe.pop()
    }

    /// Pops the oldest buffered key transition, if any.
    pub fn poll_key(&self) -> Option<KeyPacket> {
        self.key_pipe.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_drops_oldest_entry_once_full() {
        let pipe: Pipe<u8> = Pipe::new(2);
        pipe.push(1);
        pipe.push(2);
        pipe.push(3);
        assert_eq!(pipe.pop(), Some(2));
        assert_eq!(pipe.pop(), Some(3));
        assert_eq!(pipe.pop(), None);
    }
}
