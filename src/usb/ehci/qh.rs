//! Queue heads and qTDs (§3): the asynchronous list is a circular intrusive list of
//! [`QueueHead`]s rooted at a head QH with its H-bit set; qTDs chain from a QH's Next
//! qTD pointer. Link pointers are raw physical addresses with a 2-bit type tag and a
//! terminate bit, exactly as hardware reads them — never a linked list of heap nodes
//! (§9 design notes).

use bytemuck::{Pod, Zeroable};

use crate::bus::DmaBuffer;

pub const TERMINATE: u32 = 1 << 0;
pub const TYP_QH: u32 = 0b01 << 1;
pub const TYP_ITD: u32 = 0b00 << 1;

/// PID codes used by `token`'s bits 8-9.
pub mod pid {
    pub const OUT: u32 = 0;
    pub const IN: u32 = 1;
    pub const SETUP: u32 = 2;
}

pub mod token {
    pub const STATUS_ACTIVE: u32 = 1 << 7;
    pub const STATUS_HALTED: u32 = 1 << 6;
    pub const STATUS_DATA_BUFFER_ERROR: u32 = 1 << 5;
    pub const STATUS_BABBLE: u32 = 1 << 4;
    pub const STATUS_TRANSACTION_ERROR: u32 = 1 << 3;
    pub const STATUS_MISSED_MICROFRAME: u32 = 1 << 2;
    pub const ERROR_BITS: u32 = STATUS_HALTED | STATUS_DATA_BUFFER_ERROR | STATUS_BABBLE | STATUS_TRANSACTION_ERROR | STATUS_MISSED_MICROFRAME;

    #[must_use]
    pub fn build(pid: u32, total_bytes: u16, toggle: bool, ioc: bool) -> u32 {
        super::token::STATUS_ACTIVE
            | (pid << 8)
            | (0b11 << 10) // CERR = 3: max error retry count before halting
            | (u32::from(ioc) << 15)
            | (u32::from(total_bytes) << 16)
            | (u32::from(toggle) << 31)
    }

    #[must_use]
    pub fn active(token: u32) -> bool {
        token & STATUS_ACTIVE != 0
    }

    #[must_use]
    pub fn error(token: u32) -> bool {
        token & ERROR_BITS != 0
    }
}

/// A 32-byte qTD: one stage of a control/bulk transfer.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct Qtd {
    pub next_qtd: u32,
    pub alt_next_qtd: u32,
    pub token: u32,
    pub buffer_pages: [u32; 5],
}

impl Qtd {
    #[must_use]
    pub fn new(pid: u32, buffer_phys: u64, len: u16, toggle: bool, ioc: bool) -> Self {
        let mut buffer_pages = [0u32; 5];
        if len > 0 {
            buffer_pages[0] = buffer_phys as u32;
            // Pages 1..4 would hold the physical addresses of subsequent 4KB pages for
            // buffers spanning more than one page; transfers in this core stay within a
            // single page (control/interrupt transfers are small).
        }
        Self {
            next_qtd: TERMINATE,
            alt_next_qtd: TERMINATE,
            token: token::build(pid, len, toggle, ioc),
            buffer_pages,
        }
    }
}

/// A 48-byte queue head plus its inline overlay area (the controller copies the head
/// qTD's token/buffer fields into DW6-11 once it starts executing — see EHCI spec
/// §3.6 — so this struct reserves that space even though software never writes it
/// directly after the QH is linked).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct QueueHead {
    pub horizontal_link: u32,
    pub endpoint_characteristics: u32,
    pub endpoint_capabilities: u32,
    pub current_qtd: u32,
    pub next_qtd: u32,
    pub alt_next_qtd: u32,
    pub token: u32,
    pub buffer_pages: [u32; 5],
}

pub mod endpoint_characteristics {
    #[must_use]
    pub fn build(device_address: u8, endpoint: u8, speed: u8, max_packet_size: u16, head_of_list: bool, control_endpoint: bool) -> u32 {
        u32::from(device_address)
            | (u32::from(endpoint) << 8)
            | (u32::from(speed) << 12)
            | (1 << 14) // data toggle control: taken from the qTD, not this QH
            | (u32::from(head_of_list) << 15)
            | (u32::from(max_packet_size) << 16)
            | (u32::from(control_endpoint && speed != SPEED_HIGH) << 27)
    }

    pub const SPEED_FULL: u8 = 0;
    pub const SPEED_LOW: u8 = 1;
    pub const SPEED_HIGH: u8 = 2;
}

pub mod endpoint_capabilities {
    #[must_use]
    pub fn build(hub_addr: u8, port_number: u8, is_periodic: bool) -> u32 {
        let smask = if is_periodic { 0xFF } else { 0 };
        (smask) | (u32::from(hub_addr) << 16) | (u32::from(port_number) << 23)
    }
}

impl QueueHead {
    #[must_use]
    pub fn new(device_address: u8, endpoint: u8, speed: u8, max_packet_size: u16, hub_addr: u8, port_number: u8, control_endpoint: bool) -> Self {
        Self {
            horizontal_link: TERMINATE,
            endpoint_characteristics: endpoint_characteristics::build(device_address, endpoint, speed, max_packet_size, false, control_endpoint),
            endpoint_capabilities: endpoint_capabilities::build(hub_addr, port_number, false),
            current_qtd: TERMINATE,
            next_qtd: TERMINATE,
            alt_next_qtd: TERMINATE,
            token: 0,
            buffer_pages: [0; 5],
        }
    }

    /// The static async-list head QH: H-bit set, linked to itself.
    #[must_use]
    pub fn new_async_head(self_phys: u64) -> Self {
        Self {
            horizontal_link: (self_phys as u32 & !0x1F) | TYP_QH,
            endpoint_characteristics: 1 << 15, // H bit only; no real endpoint behind it
            endpoint_capabilities: 0,
            current_qtd: TERMINATE,
            next_qtd: TERMINATE,
            alt_next_qtd: TERMINATE,
            token: 0,
            buffer_pages: [0; 5],
        }
    }
}

/// Reads the live token (overlay DW6) straight out of the QH's DMA memory, since the
/// controller updates it in place as it executes qTDs.
#[must_use]
pub fn live_token(qh: &DmaBuffer) -> u32 {
    unsafe { core::ptr::read_volatile(qh.as_ptr().cast::<QueueHead>().byte_add(24).cast::<u32>()) }
}
