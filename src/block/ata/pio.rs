//! Two-channel ATA PIO engine.
//!
//! The fixed primary/secondary, master/slave layout §4.B describes, driven by
//! synchronous PIO polling under a channel mutex rather than an IRQ-completed request
//! queue — this engine has no IRQ handler to speak of ("IRQ handler is a no-op (PIO
//! polling only)").

use modular_bitfield::bitfield;
use spin::{Mutex, Once};

use super::command::AtaCommand;
use super::identify::{Addressing, AtaIdentify};
use crate::block::{BlockDevice, BlockIdentity};
use crate::clock::{poll_until, Deadline};
use crate::error::DevError;
use crate::io::{inb, inw, outb, outw, IOPort, Convertible};

const PRIMARY_IO: IOPort = IOPort::new(0x1F0);
const PRIMARY_CTRL: IOPort = IOPort::new(0x3F6);
const SECONDARY_IO: IOPort = IOPort::new(0x170);
const SECONDARY_CTRL: IOPort = IOPort::new(0x376);

const REG_DATA: u16 = 0;
const REG_FEATURES: u16 = 1;
const REG_SECTOR_COUNT: u16 = 2;
const REG_LBA_LOW: u16 = 3;
const REG_LBA_MID: u16 = 4;
const REG_LBA_HIGH: u16 = 5;
const REG_DRIVE_HEAD: u16 = 6;
const REG_COMMAND_STATUS: u16 = 7;

const BUSY_TIMEOUT_US: u64 = 2_000_000;

#[bitfield]
#[repr(u8)]
#[derive(Clone, Copy)]
struct StatusRegister {
    err: bool,
    idx: bool,
    corr: bool,
    drq: bool,
    srv: bool,
    drive_fault: bool,
    rdy: bool,
    bsy: bool,
}

fn read_status(io_base: IOPort) -> StatusRegister {
    StatusRegister::from_bytes([inb(io_base + REG_COMMAND_STATUS)])
}

fn wait_not_busy(io_base: IOPort) -> Result<StatusRegister, DevError> {
    poll_until(Deadline::after_micros(BUSY_TIMEOUT_US), || {
        let status = read_status(io_base);
        (!status.bsy()).then_some(status)
    })
    .ok_or(DevError::TimedOut)
}

fn wait_drq_or_error(io_base: IOPort) -> Result<StatusRegister, DevError> {
    poll_until(Deadline::after_micros(BUSY_TIMEOUT_US), || {
        let status = read_status(io_base);
        (!status.bsy() && (status.drq() || status.err())).then_some(status)
    })
    .ok_or(DevError::TimedOut)
}

fn select_device(io_base: IOPort, is_slave: bool, lba_top_nibble: u8) -> Result<(), DevError> {
    wait_not_busy(io_base)?;
    outb(
        io_base + REG_DRIVE_HEAD,
        0xA0 | (u8::from(is_slave) << 4) | 0x40 | (lba_top_nibble & 0x0F),
    );
    Ok(())
}

/// What kind of device responded to IDENTIFY, per the signature-byte table in §4.B.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DriveKind {
    Ata,
    Atapi,
}

fn detect_signature(lba_mid: u8, lba_high: u8) -> Option<DriveKind> {
    match (lba_mid, lba_high) {
        (0x00, 0x00) | (0x3C, 0xC3) => Some(DriveKind::Ata),
        (0x14, 0xEB) | (0x69, 0x96) => Some(DriveKind::Atapi),
        (0xFF, 0xFF) => None,
        _ => None,
    }
}

/// One of the two ATA channels (primary or secondary), each with up to two drives.
pub struct AtaChannel {
    io_base: IOPort,
    ctrl_base: IOPort,
    lock: Mutex<()>,
}

impl AtaChannel {
    #[must_use]
    pub const fn primary() -> Self {
        Self {
            io_base: PRIMARY_IO,
            ctrl_base: PRIMARY_CTRL,
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn secondary() -> Self {
        Self {
            io_base: SECONDARY_IO,
            ctrl_base: SECONDARY_CTRL,
            lock: Mutex::new(()),
        }
    }

    /// Probes both drive slots on this channel. Interrupts are disabled on the channel
    /// once here (nIEN=1 on the device control register) since this engine is PIO-polled
    /// end to end and never expects the channel to raise an interrupt.
    pub fn detect(&self) -> [Option<AtaDrive<'_>>; 2] {
        outb(self.ctrl_base, 0x02); // nIEN
        [self.detect_slot(false), self.detect_slot(true)]
    }

    fn detect_slot(&self, is_slave: bool) -> Option<AtaDrive<'_>> {
        let _guard = self.lock.lock();
        if select_device(self.io_base, is_slave, 0).is_err() {
            return None;
        }
        let status = read_status(self.io_base);
        if status.bsy() || status.into_bytes()[0] == 0 {
            return None;
        }

        let opcode = AtaCommand::IdentifyDevice.opcode();
        outb(self.io_base + REG_COMMAND_STATUS, opcode);
        if read_status(self.io_base).into_bytes()[0] == 0 {
            return None;
        }

        let status = wait_drq_or_error(self.io_base).ok()?;
        let lba_mid = inb(self.io_base + REG_LBA_MID);
        let lba_high = inb(self.io_base + REG_LBA_HIGH);

        let kind = if status.err() {
            detect_signature(lba_mid, lba_high)?
        } else {
            DriveKind::Ata
        };

        if kind == DriveKind::Atapi {
            // Re-issue as IDENTIFY PACKET DEVICE; the ATA IDENTIFY above aborted with ERR.
            select_device(self.io_base, is_slave, 0).ok()?;
            outb(self.io_base + REG_COMMAND_STATUS, AtaCommand::IdentifyPacket.opcode());
            wait_drq_or_error(self.io_base).ok()?;
        }

        let identify = read_identify_data(self.io_base);
        let identity = BlockIdentity {
            model: identify.model_number(),
            serial: identify.serial_number(),
            firmware: identify.firmware_revision(),
        };
        Some(AtaDrive {
            channel: self,
            is_slave,
            kind,
            identify,
            identity,
            atapi_capacity: Once::new(),
        })
    }
}

fn read_identify_data(io_base: IOPort) -> AtaIdentify {
    let mut words = [0u16; 256];
    for word in &mut words {
        *word = inw(io_base + REG_DATA);
    }
    AtaIdentify::from_words(words)
}

/// A single ATA or ATAPI drive, addressed through its channel's master/slave slot.
pub struct AtaDrive<'a> {
    channel: &'a AtaChannel,
    is_slave: bool,
    kind: DriveKind,
    identify: AtaIdentify,
    identity: BlockIdentity,
    /// `(last_lba, block_size)` from SCSI READ CAPACITY, fetched once and cached —
    /// ATAPI devices don't report usable capacity through IDENTIFY PACKET's ATA fields.
    atapi_capacity: Once<(u32, u32)>,
}

impl<'a> AtaDrive<'a> {
    #[must_use]
    pub fn is_atapi(&self) -> bool {
        self.kind == DriveKind::Atapi
    }

    fn program_lba_and_count(&self, lba: u64, count: u16, addressing: Addressing) {
        let io_base = self.channel.io_base;
        match addressing {
            Addressing::Lba28 => {
                outb(io_base + REG_SECTOR_COUNT, count.low_bits());
                outb(io_base + REG_LBA_LOW, lba.low_bits());
                outb(io_base + REG_LBA_MID, (lba >> 8).low_bits());
                outb(io_base + REG_LBA_HIGH, (lba >> 16).low_bits());
            }
            Addressing::Lba48 => {
                outb(io_base + REG_SECTOR_COUNT, count.high_bits());
                outb(io_base + REG_LBA_LOW, (lba >> 24).low_bits());
                outb(io_base + REG_LBA_MID, (lba >> 32).low_bits());
                outb(io_base + REG_LBA_HIGH, (lba >> 40).low_bits());
                outb(io_base + REG_SECTOR_COUNT, count.low_bits());
                outb(io_base + REG_LBA_LOW, lba.low_bits());
                outb(io_base + REG_LBA_MID, (lba >> 8).low_bits());
                outb(io_base + REG_LBA_HIGH, (lba >> 16).low_bits());
            }
        }
    }

    /// Selects the drive, programs LBA/count, and issues `command`. Returns the
    /// addressing mode chosen, so the caller knows whether a trailing `FLUSH_CACHE` must
    /// use the EXT variant.
    fn begin_transfer(&self, lba: u64, count: u16, command_for: impl Fn(Addressing) -> AtaCommand) -> Result<Addressing, DevError> {
        let addressing = self.identify.choose_addressing(lba);
        let lba_top = if addressing == Addressing::Lba28 {
            ((lba >> 24) & 0x0F) as u8
        } else {
            0
        };
        select_device(self.channel.io_base, self.is_slave, lba_top)?;
        self.program_lba_and_count(lba, count, addressing);
        outb(self.channel.io_base + REG_COMMAND_STATUS, command_for(addressing).opcode());
        Ok(addressing)
    }

    fn check_bounds(&self, count: u16, buf_len: usize) -> Result<(), DevError> {
        if buf_len < count as usize * self.logical_sector_size() as usize {
            return Err(DevError::InvalidArgument);
        }
        Ok(())
    }

    /// Issues one ATA PACKET command (opcode `0xA0`) carrying the 12-byte SCSI `cdb`,
    /// then drains however many PIO data blocks the device returns into `out_buf`.
    /// Returns the number of bytes copied into `out_buf`, capped at its length. Caller
    /// holds the channel lock (§4.B's ATAPI transfer path).
    fn send_packet(&self, cdb: &[u8; 12], out_buf: &mut [u8]) -> Result<usize, DevError> {
        let io_base = self.channel.io_base;
        select_device(io_base, self.is_slave, 0)?;
        outb(io_base + REG_FEATURES, 0); // PIO, no overlapped/DMA
        outb(io_base + REG_LBA_MID, (out_buf.len() as u16).low_bits());
        outb(io_base + REG_LBA_HIGH, (out_buf.len() as u16).high_bits());
        outb(io_base + REG_COMMAND_STATUS, AtaCommand::Packet.opcode());

        let status = wait_drq_or_error(io_base)?;
        if status.err() {
            return Err(DevError::Io);
        }

        for chunk in cdb.chunks_exact(2) {
            outw(io_base + REG_DATA, u16::from_le_bytes([chunk[0], chunk[1]]));
        }

        let mut received = 0usize;
        loop {
            let status = wait_drq_or_error(io_base)?;
            if status.err() {
                return Err(DevError::Io);
            }
            if !status.drq() {
                break;
            }
            // The byte count register is reused as the per-block transfer length
            // during the PACKET data phase (§4.B: "reply sizes are computed from
            // LBA1/LBA2").
            let byte_count = u16::from(inb(io_base + REG_LBA_MID)) | (u16::from(inb(io_base + REG_LBA_HIGH)) << 8);
            let word_count = (byte_count as usize).div_ceil(2);
            for word_idx in 0..word_count {
                let bytes = inw(io_base + REG_DATA).to_le_bytes();
                let offset = received + word_idx * 2;
                if offset < out_buf.len() {
                    out_buf[offset] = bytes[0];
                }
                if offset + 1 < out_buf.len() {
                    out_buf[offset + 1] = bytes[1];
                }
            }
            received += byte_count as usize;
        }
        Ok(received.min(out_buf.len()))
    }

    /// SCSI READ CAPACITY (10), zero-padded into the 12-byte ATAPI packet; the
    /// big-endian `(last_LBA, block_size)` pair yields device capacity
    /// `(last_LBA+1)*block_size` (§4.B).
    fn read_capacity(&self) -> Result<(u32, u32), DevError> {
        let mut cdb = [0u8; 12];
        cdb[0] = 0x25; // READ CAPACITY (10)

        let _guard = self.channel.lock.lock();
        let mut reply = [0u8; 8];
        let n = self.send_packet(&cdb, &mut reply)?;
        if n < reply.len() {
            return Err(DevError::Io);
        }
        let last_lba = u32::from_be_bytes([reply[0], reply[1], reply[2], reply[3]]);
        let block_size = u32::from_be_bytes([reply[4], reply[5], reply[6], reply[7]]);
        Ok((last_lba, block_size))
    }

    /// Fetches and caches `(last_lba, block_size)`; a no-op after the first call.
    fn atapi_capacity(&self) -> Result<(u32, u32), DevError> {
        if let Some(&cap) = self.atapi_capacity.get() {
            return Ok(cap);
        }
        let cap = self.read_capacity()?;
        Ok(*self.atapi_capacity.call_once(|| cap))
    }

    /// SCSI READ(12) via `ATA_CMD_PACKET`, reading `count` logical blocks starting at
    /// `lba` into `buf` (§4.B).
    fn packet_read(&self, lba: u32, count: u32, buf: &mut [u8]) -> Result<(), DevError> {
        let mut cdb = [0u8; 12];
        cdb[0] = 0xA8; // READ(12)
        cdb[2..6].copy_from_slice(&lba.to_be_bytes());
        cdb[6..10].copy_from_slice(&count.to_be_bytes());

        let _guard = self.channel.lock.lock();
        let n = self.send_packet(&cdb, buf)?;
        if n < buf.len() {
            return Err(DevError::Io);
        }
        Ok(())
    }

    fn atapi_read_sectors(&self, lba: u64, count: u16, buf: &mut [u8]) -> Result<u16, DevError> {
        self.check_bounds(count, buf.len())?;
        let lba: u32 = u32::try_from(lba).map_err(|_| DevError::InvalidArgument)?;
        let needed = count as usize * self.logical_sector_size() as usize;
        self.packet_read(lba, u32::from(count), &mut buf[..needed])?;
        Ok(count)
    }
}

impl<'a> BlockDevice for AtaDrive<'a> {
    fn read_sectors(&self, lba: u64, count: u16, buf: &mut [u8]) -> Result<u16, DevError> {
        if self.is_atapi() {
            return self.atapi_read_sectors(lba, count, buf);
        }
        self.check_bounds(count, buf.len())?;

        let _guard = self.channel.lock.lock();
        self.begin_transfer(lba, count, |addressing| match addressing {
            Addressing::Lba28 => AtaCommand::ReadSectors,
            Addressing::Lba48 => AtaCommand::ReadSectorsExt,
        })?;

        let sector_words = self.logical_sector_size() as usize / 2;
        for sector in 0..count as usize {
            let status = wait_drq_or_error(self.channel.io_base)?;
            if status.err() {
                return Err(DevError::Io);
            }
            let chunk = &mut buf[sector * sector_words * 2..(sector + 1) * sector_words * 2];
            for word_idx in 0..sector_words {
                let bytes = inw(self.channel.io_base + REG_DATA).to_le_bytes();
                chunk[word_idx * 2] = bytes[0];
                chunk[word_idx * 2 + 1] = bytes[1];
            }
        }
        Ok(count)
    }

    fn write_sectors(&self, lba: u64, count: u16, buf: &[u8]) -> Result<u16, DevError> {
        if self.is_atapi() {
            // §4.B only describes READ CAPACITY/READ(12) for ATAPI; writing to optical
            // media is out of scope.
            return Err(DevError::NotSupported);
        }
        self.check_bounds(count, buf.len())?;

        let _guard = self.channel.lock.lock();
        let addressing = self.begin_transfer(lba, count, |addressing| match addressing {
            Addressing::Lba28 => AtaCommand::WriteSectors,
            Addressing::Lba48 => AtaCommand::WriteSectorsExt,
        })?;

        let sector_words = self.logical_sector_size() as usize / 2;
        for sector in 0..count as usize {
            let status = wait_drq_or_error(self.channel.io_base)?;
            if status.err() {
                return Err(DevError::Io);
            }
            let chunk = &buf[sector * sector_words * 2..(sector + 1) * sector_words * 2];
            for word_idx in 0..sector_words {
                let word = u16::from_le_bytes([chunk[word_idx * 2], chunk[word_idx * 2 + 1]]);
                outw(self.channel.io_base + REG_DATA, word);
            }
        }

        let flush = match addressing {
            Addressing::Lba28 => AtaCommand::FlushCache,
            Addressing::Lba48 => AtaCommand::FlushCacheExt,
        };
        outb(self.channel.io_base + REG_COMMAND_STATUS, flush.opcode());
        wait_not_busy(self.channel.io_base)?;

        Ok(count)
    }

    fn identity(&self) -> &BlockIdentity {
        &self.identity
    }

    fn max_sector(&self) -> u64 {
        if self.is_atapi() {
            return self.atapi_capacity().map_or(0, |(last_lba, _)| u64::from(last_lba));
        }
        self.identify.max_sector()
    }

    fn logical_sector_size(&self) -> u32 {
        if self.is_atapi() {
            return self.atapi_capacity().map_or(0x800, |(_, block_size)| block_size);
        }
        self.identify.logical_sector_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_table_matches_spec() {
        assert_eq!(detect_signature(0x00, 0x00), Some(DriveKind::Ata));
        assert_eq!(detect_signature(0x3C, 0xC3), Some(DriveKind::Ata));
        assert_eq!(detect_signature(0x14, 0xEB), Some(DriveKind::Atapi));
        assert_eq!(detect_signature(0x69, 0x96), Some(DriveKind::Atapi));
        assert_eq!(detect_signature(0xFF, 0xFF), None);
    }
}
