//! Celestial IPC wire format (§6): a length-prefixed, magic-tagged record over a
//! UNIX-domain `SOCK_SEQPACKET` socket at `/comm/wndsrv`.
//!
//! Every packet begins with `u32 magic; u16 type; u32 size;` followed by `size` bytes
//! of payload. A malformed packet — wrong magic, or fewer bytes than its own header
//! claims — gets `Response::Error(EINVAL)` rather than being partially interpreted.

pub const HEADER_LEN: usize = 4 + 2 + 4;

pub const MAGIC_REQ: u32 = 0x4344_4142;
pub const MAGIC_EVENT: u32 = 0x4556_4E54;
pub const MAGIC_ERROR: u32 = 0x4552_5252;
pub const MAGIC_OK: u32 = 0x4F4B_4B4F;

pub const EINVAL: i32 = 22;

/// Request message types (client -> server).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum RequestType {
    CreateWindow = 1,
    GetWindowInfo = 2,
    Subscribe = 3,
    DragStart = 4,
    DragStop = 5,
    Destroy = 6,
}

impl RequestType {
    fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => Self::CreateWindow,
            2 => Self::GetWindowInfo,
            3 => Self::Subscribe,
            4 => Self::DragStart,
            5 => Self::DragStop,
            6 => Self::Destroy,
            _ => return None,
        })
    }
}

/// Event message types (server -> client), the subscription bits a client passes to
/// `SUBSCRIBE{wid, u32 events}`.
pub const EVT_MOUSE_ENTER: u32 = 1 << 0;
pub const EVT_MOUSE_MOTION: u32 = 1 << 1;
pub const EVT_MOUSE_BUTTON_DOWN: u32 = 1 << 2;
pub const EVT_MOUSE_BUTTON_UP: u32 = 1 << 3;
pub const EVT_MOUSE_DRAG: u32 = 1 << 4;
pub const EVT_MOUSE_EXIT: u32 = 1 << 5;
pub const EVT_MOUSE_SCROLL: u32 = 1 << 6;
pub const EVT_FOCUSED: u32 = 1 << 7;
pub const EVT_UNFOCUSED: u32 = 1 << 8;
pub const EVT_KEY_EVENT: u32 = 1 << 9;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum EventType {
    MouseEnter = 1,
    MouseMotion = 2,
    MouseButtonDown = 3,
    MouseButtonUp = 4,
    MouseDrag = 5,
    MouseExit = 6,
    MouseScroll = 7,
    Focused = 8,
    Unfocused = 9,
    KeyEvent = 10,
}

impl EventType {
    /// The subscription bit a client must set in its `SUBSCRIBE` mask to receive this
    /// event kind; delivery is silently dropped otherwise (§4.G "Event delivery").
    #[must_use]
    pub fn mask_bit(self) -> u32 {
        match self {
            EventType::MouseEnter => EVT_MOUSE_ENTER,
            EventType::MouseMotion => EVT_MOUSE_MOTION,
            EventType::MouseButtonDown => EVT_MOUSE_BUTTON_DOWN,
            EventType::MouseButtonUp => EVT_MOUSE_BUTTON_UP,
            EventType::MouseDrag => EVT_MOUSE_DRAG,
            EventType::MouseExit => EVT_MOUSE_EXIT,
            EventType::MouseScroll => EVT_MOUSE_SCROLL,
            EventType::Focused => EVT_FOCUSED,
            EventType::Unfocused => EVT_UNFOCUSED,
            EventType::KeyEvent => EVT_KEY_EVENT,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CreateWindowRequest {
    pub flags: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WidRequest {
    pub wid: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubscribeRequest {
    pub wid: u32,
    pub events: u32,
}

/// A parsed request, with its payload already decoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Request {
    CreateWindow(CreateWindowRequest),
    GetWindowInfo(WidRequest),
    Subscribe(SubscribeRequest),
    DragStart(WidRequest),
    DragStop(WidRequest),
    Destroy(WidRequest),
}

/// Parses one packet's raw bytes into a [`Request`]. `Err(EINVAL)` on a bad magic, a
/// truncated header/payload, an unrecognized type, or a payload shorter than the
/// request it claims to carry.
pub fn parse_request(bytes: &[u8]) -> Result<Request, i32> {
    if bytes.len() < HEADER_LEN {
        return Err(EINVAL);
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let ty = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    let size = u32::from_le_bytes(bytes[6..10].try_into().unwrap()) as usize;
    if magic != MAGIC_REQ {
        return Err(EINVAL);
    }
    let payload = &bytes[HEADER_LEN..];
    if payload.len() < size {
        return Err(EINVAL);
    }
    let req_type = RequestType::from_u16(ty).ok_or(EINVAL)?;

    let read_u32 = |off: usize| -> Result<u32, i32> {
        payload.get(off..off + 4).map(|s| u32::from_le_bytes(s.try_into().unwrap())).ok_or(EINVAL)
    };

    Ok(match req_type {
        RequestType::CreateWindow => Request::CreateWindow(CreateWindowRequest {
            flags: read_u32(0)?,
            width: read_u32(4)?,
            height: read_u32(8)?,
        }),
        RequestType::GetWindowInfo => Request::GetWindowInfo(WidRequest { wid: read_u32(0)? }),
        RequestType::Subscribe => {
            Request::Subscribe(SubscribeRequest { wid: read_u32(0)?, events: read_u32(4)? })
        }
        RequestType::DragStart => Request::DragStart(WidRequest { wid: read_u32(0)? }),
        RequestType::DragStop => Request::DragStop(WidRequest { wid: read_u32(0)? }),
        RequestType::Destroy => Request::Destroy(WidRequest { wid: read_u32(0)? }),
    })
}

fn header(magic: u32, ty: u16, size: u32, out: &mut Vec<u8>) {
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&ty.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
}

/// Serializes a bare `OK` response (no payload).
#[must_use]
pub fn encode_ok() -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    header(MAGIC_OK, 0, 0, &mut out);
    out
}

/// Serializes an `ERROR` response carrying an errno.
#[must_use]
pub fn encode_error(errno: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 4);
    header(MAGIC_ERROR, 0, 4, &mut out);
    out.extend_from_slice(&errno.to_le_bytes());
    out
}

/// Serializes the `CREATE_WINDOW` response payload: the new window's id.
#[must_use]
pub fn encode_window_id(wid: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 4);
    header(MAGIC_OK, RequestType::CreateWindow as u16, 4, &mut out);
    out.extend_from_slice(&wid.to_le_bytes());
    out
}

/// Serializes the `GET_WINDOW_INFO` response payload: geometry plus the shared-memory
/// key backing the window's pixel buffer.
#[must_use]
pub fn encode_window_info(x: i32, y: i32, w: u32, h: u32, shm_key: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 20);
    header(MAGIC_OK, RequestType::GetWindowInfo as u16, 20, &mut out);
    out.extend_from_slice(&x.to_le_bytes());
    out.extend_from_slice(&y.to_le_bytes());
    out.extend_from_slice(&w.to_le_bytes());
    out.extend_from_slice(&h.to_le_bytes());
    out.extend_from_slice(&shm_key.to_le_bytes());
    out
}

/// Serializes a mouse/key event packet for delivery to a subscribed client.
#[must_use]
pub fn encode_event(kind: EventType, wid: u32, a: i32, b: i32, c: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 16);
    header(MAGIC_EVENT, kind as u16, 16, &mut out);
    out.extend_from_slice(&wid.to_le_bytes());
    out.extend_from_slice(&a.to_le_bytes());
    out.extend_from_slice(&b.to_le_bytes());
    out.extend_from_slice(&c.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_window_packet(width: u32, height: u32) -> std::vec::Vec<u8> {
        let mut bytes = std::vec::Vec::new();
        bytes.extend_from_slice(&MAGIC_REQ.to_le_bytes());
        bytes.extend_from_slice(&(RequestType::CreateWindow as u16).to_le_bytes());
        bytes.extend_from_slice(&12u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // flags
        bytes.extend_from_slice(&width.to_le_bytes());
        bytes.extend_from_slice(&height.to_le_bytes());
        bytes
    }

    #[test]
    fn parses_create_window_request() {
        let packet = create_window_packet(640, 480);
        let req = parse_request(&packet).expect("well-formed packet parses");
        match req {
            Request::CreateWindow(r) => {
                assert_eq!(r.width, 640);
                assert_eq!(r.height, 480);
            }
            _ => panic!("expected CreateWindow"),
        }
    }

    #[test]
    fn wrong_magic_is_einval() {
        let mut packet = create_window_packet(1, 1);
        packet[0] ^= 0xFF;
        assert_eq!(parse_request(&packet), Err(EINVAL));
    }

    #[test]
    fn truncated_payload_is_einval() {
        let mut packet = create_window_packet(1, 1);
        packet.truncate(HEADER_LEN + 4);
        assert_eq!(parse_request(&packet), Err(EINVAL));
    }

    #[test]
    fn short_header_is_einval() {
        assert_eq!(parse_request(&[1, 2, 3]), Err(EINVAL));
    }
}
