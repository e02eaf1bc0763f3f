//! xHCI capability/operational/runtime/doorbell register layouts (xHCI spec §5).

use crate::io::mmio::Mmio;

/// The fixed-offset capability register block at BAR0 offset 0. `CAPLENGTH` (byte 0)
/// gives the offset to the operational register block; everything past `hccparams1`
/// here is read for sizing decisions only.
#[repr(C)]
pub struct CapabilityRegs {
    pub cap_length_and_version: Mmio<u32>,
    pub hcsparams1: Mmio<u32>,
    pub hcsparams2: Mmio<u32>,
    pub hcsparams3: Mmio<u32>,
    pub hccparams1: Mmio<u32>,
    pub dboff: Mmio<u32>,
    pub rtsoff: Mmio<u32>,
    pub hccparams2: Mmio<u32>,
}

pub mod cap_length {
    #[must_use]
    pub fn offset(cap_length_and_version: u32) -> u32 {
        cap_length_and_version & 0xFF
    }
}

pub mod hcsparams1 {
    #[must_use]
    pub fn max_slots(v: u32) -> u8 {
        (v & 0xFF) as u8
    }

    #[must_use]
    pub fn max_ports(v: u32) -> u8 {
        ((v >> 24) & 0xFF) as u8
    }
}

pub mod hccparams1 {
    pub const CONTEXT_SIZE_64: u32 = 1 << 2;
}

pub mod hcsparams2 {
    #[must_use]
    pub fn max_scratchpad_buffers(v: u32) -> u32 {
        let hi = (v >> 21) & 0x1F;
        let lo = (v >> 27) & 0x1F;
        (hi << 5) | lo
    }
}

/// Operational registers, mapped at `BAR0 + CAPLENGTH`.
#[repr(C)]
pub struct OperationalRegs {
    pub usbcmd: Mmio<u32>,
    pub usbsts: Mmio<u32>,
    pub pagesize: Mmio<u32>,
    _rsvd1: [Mmio<u32>; 2],
    pub dnctrl: Mmio<u32>,
    pub crcr: Mmio<u64>,
    _rsvd2: [Mmio<u32>; 4],
    pub dcbaap: Mmio<u64>,
    pub config: Mmio<u32>,
}

pub mod usbcmd {
    pub const RUN: u32 = 1 << 0;
    pub const HCRESET: u32 = 1 << 1;
    pub const INTE: u32 = 1 << 2;
    pub const HSEE: u32 = 1 << 3;
}

pub mod usbsts {
    pub const HCHALTED: u32 = 1 << 0;
    pub const CNR: u32 = 1 << 11;
    pub const EINT: u32 = 1 << 3;
}

pub mod crcr {
    pub const RCS: u64 = 1 << 0;
}

/// One PORTSC/PORTPMSC/PORTLI/PORTHLPMC register quartet, 16 bytes per port, starting
/// at operational-register offset 0x400.
#[repr(C)]
pub struct PortRegs {
    pub portsc: Mmio<u32>,
    pub portpmsc: Mmio<u32>,
    pub portli: Mmio<u32>,
    pub porthlpmc: Mmio<u32>,
}

pub mod portsc {
    pub const CCS: u32 = 1 << 0;
    pub const PED: u32 = 1 << 1;
    pub const PR: u32 = 1 << 4;
    pub const PLS_SHIFT: u32 = 5;
    pub const PP: u32 = 1 << 9;
    pub const SPEED_SHIFT: u32 = 10;
    pub const SPEED_MASK: u32 = 0xF << SPEED_SHIFT;
    pub const WPR: u32 = 1 << 31;
    pub const CSC: u32 = 1 << 17;
    pub const PRC: u32 = 1 << 21;
    pub const WRC: u32 = 1 << 19;

    /// Port speed ID -> [`crate::usb::UsbSpeed`], per xHCI spec table 5-22 (the common
    /// four-speed subset this core drives).
    #[must_use]
    pub fn speed(portsc: u32) -> Option<crate::usb::UsbSpeed> {
        match (portsc & SPEED_MASK) >> SPEED_SHIFT {
            2 => Some(crate::usb::UsbSpeed::Low),
            1 => Some(crate::usb::UsbSpeed::Full),
            3 => Some(crate::usb::UsbSpeed::High),
            4 => Some(crate::usb::UsbSpeed::Super),
            _ => None,
        }
    }
}

/// Interrupter register set (32 bytes). Interrupter 0 sits at `BAR0 + RTSOFF + 0x20`
/// (the preceding 0x20 bytes are `MFINDEX` plus reserved space, which this core never
/// touches, so the struct starts directly at IR0 instead of modeling the gap).
#[repr(C)]
pub struct InterrupterRegs {
    pub iman: Mmio<u32>,
    pub imod: Mmio<u32>,
    pub erstsz: Mmio<u32>,
    _rsvd2: Mmio<u32>,
    pub erstba: Mmio<u64>,
    pub erdp: Mmio<u64>,
}

pub const INTERRUPTER0_OFFSET: u32 = 0x20;

pub mod iman {
    pub const IP: u32 = 1 << 0;
    pub const IE: u32 = 1 << 1;
}

/// One Event Ring Segment Table entry (this core uses exactly one segment, per §4.C).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ErstEntry {
    pub ring_segment_base: u64,
    pub ring_segment_size: u32,
    _rsvd: u32,
}
