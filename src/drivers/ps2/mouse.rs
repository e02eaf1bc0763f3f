//! PS/2 mouse packet assembler (§4.F).
//!
//! A mouse speaks 3 bytes per update (`0x00` device id from `first_device_identify`),
//! or 4 once the "magic" 200/100/80 sample-rate sequence has unlocked scroll-wheel
//! reporting (`0x03`) or the 5-button extension (`0x04`). Byte 0's bit 3 is the only
//! framing the protocol offers — if it's clear, whatever we're looking at isn't the
//! start of a packet, so the assembler resyncs by dropping bytes until it sees one.

use bytemuck::{Pod, Zeroable};

/// Which variant of the protocol a device identified as, set by
/// [`super::PS2Controller`]'s reset/identify handshake and fed to
/// [`MouseDecoder::new`] to pick the packet size.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MouseKind {
    /// 3-byte packets, no scroll wheel.
    Standard,
    /// 4-byte packets with a scroll delta in byte 3 (IntelliMouse, id `0x03`).
    Scroll,
    /// 4-byte packets with a scroll delta and two extra buttons (id `0x04`).
    FiveButton,
}

impl MouseKind {
    #[must_use]
    pub const fn packet_len(self) -> usize {
        match self {
            MouseKind::Standard => 3,
            MouseKind::Scroll | MouseKind::FiveButton => 4,
        }
    }
}

pub const BUTTON_LEFT: u8 = 0x01;
pub const BUTTON_RIGHT: u8 = 0x02;
pub const BUTTON_MIDDLE: u8 = 0x04;

/// One decoded mouse update, published onto the input aggregator's mouse pipe.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Pod, Zeroable)]
pub struct MouseEvent {
    pub dx: i16,
    pub dy: i16,
    /// Low 3 bits: left/right/middle, per [`BUTTON_LEFT`]/[`BUTTON_RIGHT`]/[`BUTTON_MIDDLE`].
    pub buttons: u8,
    /// Signed scroll delta (byte 3 of a 4-byte packet): sign bit set means scroll up,
    /// positive means scroll down, per §4.F. Always 0 for [`MouseKind::Standard`].
    pub scroll: i8,
}

/// Assembles raw PS/2 mouse bytes into [`MouseEvent`]s and suppresses repeats: "identical
/// successive events (no motion, no scroll, no button change) are suppressed" (§4.F).
pub struct MouseDecoder {
    kind: MouseKind,
    buf: [u8; 4],
    len: usize,
    last_buttons: Option<u8>,
}

impl MouseDecoder {
    #[must_use]
    pub fn new(kind: MouseKind) -> Self {
        Self { kind, buf: [0; 4], len: 0, last_buttons: None }
    }

    /// Feeds one raw byte. Returns `Some` once a full packet has been assembled into a
    /// non-suppressed, non-overflowed event.
    pub fn decode_byte(&mut self, byte: u8) -> Option<MouseEvent> {
        if self.len == 0 && byte & 0x08 == 0 {
            // Not a valid first byte: resync by dropping it rather than building a
            // packet out of phase with the device.
            return None;
        }
        self.buf[self.len] = byte;
        self.len += 1;
        if self.len < self.kind.packet_len() {
            return None;
        }
        self.len = 0;

        let b0 = self.buf[0];
        if b0 & 0xC0 != 0 {
            // X or Y overflow bit set: the delta isn't meaningful, drop the packet.
            return None;
        }

        let mut dx = i16::from(self.buf[1]);
        if b0 & 0x10 != 0 {
            dx -= 256;
        }
        let mut dy = i16::from(self.buf[2]);
        if b0 & 0x20 != 0 {
            dy -= 256;
        }
        let buttons = b0 & 0x07;
        let scroll = if self.kind.packet_len() == 4 { self.buf[3] as i8 } else { 0 };

        let unchanged = dx == 0 && dy == 0 && scroll == 0 && self.last_buttons == Some(buttons);
        self.last_buttons = Some(buttons);
        if unchanged {
            return None;
        }

        Some(MouseEvent { dx, dy, buttons, scroll })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_three_byte_packet_with_negative_deltas() {
        let mut decoder = MouseDecoder::new(MouseKind::Standard);
        assert!(decoder.decode_byte(0x18).is_none());
        assert!(decoder.decode_byte(0x05).is_none());
        let event = decoder.decode_byte(0xFE).expect("third byte completes the packet");
        assert_eq!(event.dx, 5);
        assert_eq!(event.dy, -2);
        assert_eq!(event.buttons, 0);
    }

    #[test]
    fn repeated_zero_motion_is_suppressed() {
        let mut decoder = MouseDecoder::new(MouseKind::Standard);
        let first = [decoder.decode_byte(0x08), decoder.decode_byte(0x00), decoder.decode_byte(0x00)];
        assert!(first[2].is_some());

        let second = [decoder.decode_byte(0x08), decoder.decode_byte(0x00), decoder.decode_byte(0x00)];
        assert!(second[2].is_none(), "identical successive zero-motion event must be suppressed");
    }

    #[test]
    fn overflow_bit_drops_packet() {
        let mut decoder = MouseDecoder::new(MouseKind::Standard);
        decoder.decode_byte(0x48); // bit 6 (X overflow) set alongside the framing bit
        decoder.decode_byte(0x05);
        assert!(decoder.decode_byte(0x00).is_none());
    }

    #[test]
    fn four_byte_scroll_packet_reports_wheel_delta() {
        let mut decoder = MouseDecoder::new(MouseKind::Scroll);
        decoder.decode_byte(0x08);
        decoder.decode_byte(0x00);
        decoder.decode_byte(0x00);
        let event = decoder.decode_byte(0xFF).expect("fourth byte completes a scroll packet");
        assert_eq!(event.scroll, -1);
    }
}
