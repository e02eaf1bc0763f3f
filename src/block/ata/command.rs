//! ATA command opcodes used by the PIO engine.
//!
//! Trimmed to the subset the PIO engine actually issues (§4.B): identify, PIO
//! read/write in both 28-bit and 48-bit addressing, cache flush, and the ATAPI packet
//! command. The full ATA-8 opcode table also defines DMA/NCQ/security/
//! trusted-computing commands; this PIO-only engine never sends them.

use modular_bitfield::BitfieldSpecifier;

#[derive(Clone, Copy, Debug, Eq, PartialEq, BitfieldSpecifier)]
#[bits = 8]
#[repr(u8)]
pub enum AtaCommand {
    IdentifyDevice = 0xEC,
    IdentifyPacket = 0xA1,
    Packet = 0xA0,
    ReadSectors = 0x20,
    ReadSectorsExt = 0x24,
    WriteSectors = 0x30,
    WriteSectorsExt = 0x34,
    FlushCache = 0xE7,
    FlushCacheExt = 0xEA,
}

impl AtaCommand {
    #[must_use]
    pub fn opcode(self) -> u8 {
        self as u8
    }
}
