//! Scancode-set-1 keyboard decoder (§4.F): raw data-port bytes in, decoded key
//! transitions out.
//!
//! The scancode-set-1 translation tables (and the shift/caps-lock modifier tracking
//! `§4.F` describes as "a sticky modifier state tracking the 0x2A/0x36 make and
//! 0xAA/0xB6 break") are exactly what `pc_keyboard`'s `ScancodeSet1` + `Us104Key` layout
//! already implement, so this decoder is a thin adapter rather than a hand-rolled table
//! — the core's own unshifted/shifted byte arrays would just be a worse copy of it.

pub mod packet;

pub use packet::KeyPacket;

use pc_keyboard::{layouts::Us104Key, DecodedKey, HandleControl, Keyboard, ScancodeSet1};

/// Feeds single bytes from the PS/2 data port and assembles them into [`KeyPacket`]s.
/// Most bytes (continuations of a multi-byte scancode) return `None`; a packet is
/// produced once a full make/break code has been recognized.
pub struct KeyboardDecoder {
    inner: Keyboard<Us104Key, ScancodeSet1>,
}

impl KeyboardDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Keyboard::new(ScancodeSet1::new(), Us104Key, HandleControl::Ignore),
        }
    }

    /// Decodes one raw byte. Returns `Some` exactly when this byte completed a
    /// scancode, carrying both the raw key/state transition and (if the key produces
    /// one in the current modifier state) its printable character.
    pub fn decode_byte(&mut self, byte: u8) -> Option<KeyPacket> {
        let event = self.inner.add_byte(byte).ok().flatten()?;
        let code = event.code;
        let new_state = event.state;
        let code_point = self.inner.process_keyevent(event).and_then(|decoded| match decoded {
            DecodedKey::Unicode(c) => Some(c),
            DecodedKey::RawKey(_) => None,
        });
        Some(KeyPacket { code, code_point, new_state })
    }
}

impl Default for KeyboardDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pc_keyboard::KeyState;

    #[test]
    fn make_then_break_round_trips_through_decoder() {
        let mut decoder = KeyboardDecoder::new();
        // scancode set 1: 'A' make = 0x1E, break = 0x9E
        let down = decoder.decode_byte(0x1E).expect("make code decodes");
        assert_eq!(down.new_state, KeyState::Down);
        assert_eq!(down.code_point, Some('a'));

        let up = decoder.decode_byte(0x9E).expect("break code decodes");
        assert_eq!(up.new_state, KeyState::Up);
    }
}
