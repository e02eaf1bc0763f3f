//! Slot/endpoint/input device contexts (§3, §4.C step 4).
//!
//! Context entries are 32 bytes on a controller with `HCCPARAMS1.CSZ` clear, or 64
//! bytes when set (the upper half reserved for future use). This core always lays out
//! the 32-byte shape and pads to 64 when the capability demands it, rather than
//! generating two parallel struct families.

use bytemuck::{Pod, Zeroable};

/// One slot context (32 bytes): root-hub port, route string, speed, active endpoint
/// count.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default)]
pub struct SlotContext {
    pub route_string_and_speed: u32,
    pub max_exit_latency_and_port: u32,
    pub tt_info: u32,
    pub state: u32,
    _rsvd: [u32; 4],
}

impl SlotContext {
    #[must_use]
    pub fn new(root_hub_port: u8, speed_id: u8, context_entries: u8) -> Self {
        Self {
            route_string_and_speed: (u32::from(speed_id) << 20),
            max_exit_latency_and_port: u32::from(root_hub_port) << 16,
            tt_info: 0,
            state: u32::from(context_entries) << 27,
            _rsvd: [0; 4],
        }
    }
}

/// One endpoint context (32 bytes): type, max packet size, error count, and the
/// transfer-ring dequeue pointer with its dequeue cycle state (DCS) in bit 0.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default)]
pub struct EndpointContext {
    pub ep_state_and_interval: u32,
    pub ep_type_and_mps: u32,
    pub tr_dequeue_pointer: u64,
    pub average_trb_length: u32,
    _rsvd: [u32; 3],
}

/// Endpoint type field values for `ep_type_and_mps` bits 3..6 (xHCI table 6-9): the
/// three OUT/IN pairs plus control, used verbatim by [`EndpointContext::new`].
pub mod ep_type {
    pub const ISOCH_OUT: u8 = 1;
    pub const BULK_OUT: u8 = 2;
    pub const INTERRUPT_OUT: u8 = 3;
    pub const CONTROL: u8 = 4;
    pub const ISOCH_IN: u8 = 5;
    pub const BULK_IN: u8 = 6;
    pub const INTERRUPT_IN: u8 = 7;
}

impl EndpointContext {
    #[must_use]
    pub fn new(ep_type: u8, max_packet_size: u16, max_burst: u8, error_count: u8, interval: u8, tr_dequeue_phys: u64) -> Self {
        Self {
            ep_state_and_interval: u32::from(interval) << 16,
            ep_type_and_mps: (u32::from(max_packet_size) << 16) | (u32::from(max_burst) << 8) | (u32::from(ep_type) << 3) | (u32::from(error_count) << 1),
            tr_dequeue_pointer: tr_dequeue_phys | 1, // DCS=1: ring starts with cycle bit set
            average_trb_length: 8,
            _rsvd: [0; 3],
        }
    }
}

/// Input control context (§3): add/drop flag masks selecting which of the following
/// slot/endpoint contexts the controller should consult. Bit 0 is the slot context,
/// bit N is endpoint context N (1 = EP0, matching [`super::endpoint_context_index`]).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, Default)]
pub struct InputControlContext {
    pub drop_flags: u32,
    pub add_flags: u32,
    _rsvd: [u32; 6],
}

/// A full input device context: control context, slot context, and up to 31 endpoint
/// contexts, each 32 bytes (the 64-byte-context variant pads every entry; this core
/// targets the 32-byte layout, matching the common QEMU/real-hardware default).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct InputContext {
    pub control: InputControlContext,
    pub slot: SlotContext,
    pub endpoints: [EndpointContext; 31],
}

/// The hardware-owned output device context mirrored at `DCBAA[slot_id]`: a slot
/// context followed by up to 31 endpoint contexts (no leading control context).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct OutputContext {
    pub slot: SlotContext,
    pub endpoints: [EndpointContext; 31],
}

/// Endpoint context array index for `(endpoint_number, direction)`, per §4.C: `n =
/// (addr & 0x0F)*2 + (IN?1:0)`. EP0's context lives at index 0 (the control endpoint has
/// no direction bit); everything else is 1-based into `endpoints`.
#[must_use]
pub fn endpoint_context_index(endpoint_address: u8, is_in: bool) -> usize {
    let num = endpoint_address & 0x0F;
    if num == 0 {
        0
    } else {
        (usize::from(num) * 2 + usize::from(is_in)) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_index_matches_spec_formula() {
        assert_eq!(endpoint_context_index(0, false), 0);
        assert_eq!(endpoint_context_index(1, false), 1); // EP1 OUT -> n=2, index 1
        assert_eq!(endpoint_context_index(1, true), 2); // EP1 IN -> n=3, index 2
        assert_eq!(endpoint_context_index(2, true), 4); // EP2 IN -> n=5, index 4
    }
}
