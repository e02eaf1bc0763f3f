//! Decoded keyboard event record (§4.F).
//!
//! Scancode-set-1 translation itself is delegated to `pc_keyboard` (see
//! [`super::KeyboardDecoder`]), so this module only re-exports its `KeyCode`/`KeyState`
//! and wraps them into the single structured record the input aggregator publishes.

pub use pc_keyboard::{KeyCode, KeyState};

/// One decoded key transition: which key, whether it went down or up, and (for a
/// printable key in the current modifier state) the resulting character.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeyPacket {
    pub code: KeyCode,
    pub code_point: Option<char>,
    pub new_state: KeyState,
}
