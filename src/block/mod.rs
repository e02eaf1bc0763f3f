//! Block Transport (component B): a uniform sector-addressed contract over the ATA PIO
//! and NVMe engines, plus MBR partition parsing.
//!
//! A single `read_sectors`/`write_sectors`/`identifier`/`partitions` contract that
//! either physical technology (ATA PIO or NVMe) implements, so callers above this layer
//! never branch on which one backs a given device. Transfers are synchronous: they
//! block the caller until the device completes or the bounded wait times out, since
//! every suspension point in this crate already goes through [`crate::clock::poll_until`].

pub mod ata;
pub mod nvme;
pub mod partition;

use alloc::string::String;

use crate::error::DevError;

pub use partition::{MbrPartition, PartitionKind, PartitionView};

/// A block device's identity, independent of the physical technology behind it.
#[derive(Clone, Debug)]
pub struct BlockIdentity {
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

/// The uniform contract every block device in this crate exposes, whether backed by ATA
/// PIO or NVMe. `read_sectors`/`write_sectors` always move whole sectors; partial-sector
/// access is the filesystem layer's problem (see §4.D read/write path descriptions).
pub trait BlockDevice: Sync {
    /// Reads `count` sectors starting at `lba` into `buf`. `buf` must be at least
    /// `count * logical_sector_size()` bytes.
    fn read_sectors(&self, lba: u64, count: u16, buf: &mut [u8]) -> Result<u16, DevError>;

    /// Writes `count` sectors starting at `lba` from `buf`.
    fn write_sectors(&self, lba: u64, count: u16, buf: &[u8]) -> Result<u16, DevError>;

    fn identity(&self) -> &BlockIdentity;

    /// Maximum LBA in user-accessible space.
    fn max_sector(&self) -> u64;

    fn logical_sector_size(&self) -> u32;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;
    use spin::Mutex;

    /// An in-memory [`BlockDevice`] backing filesystem and partition tests: a flat byte
    /// vector addressed in fixed-size sectors, with no concurrency or timeout behavior
    /// to model.
    pub struct MemoryBlockDevice {
        sectors: Mutex<Vec<u8>>,
        sector_size: u32,
        identity: BlockIdentity,
    }

    impl MemoryBlockDevice {
        pub fn new(sector_count: u64, sector_size: u32) -> Self {
            Self {
                sectors: Mutex::new(vec![0u8; (sector_count * u64::from(sector_size)) as usize]),
                sector_size,
                identity: BlockIdentity {
                    model: "MEMDISK".into(),
                    serial: "0".into(),
                    firmware: "1.0".into(),
                },
            }
        }

        pub fn with_image(image: Vec<u8>, sector_size: u32) -> Self {
            Self {
                sectors: Mutex::new(image),
                sector_size,
                identity: BlockIdentity {
                    model: "MEMDISK".into(),
                    serial: "0".into(),
                    firmware: "1.0".into(),
                },
            }
        }
    }

    impl BlockDevice for MemoryBlockDevice {
        fn read_sectors(&self, lba: u64, count: u16, buf: &mut [u8]) -> Result<u16, DevError> {
            let start = (lba * u64::from(self.sector_size)) as usize;
            let len = count as usize * self.sector_size as usize;
            let sectors = self.sectors.lock();
            let end = start.checked_add(len).ok_or(DevError::InvalidArgument)?;
            if end > sectors.len() || buf.len() < len {
                return Err(DevError::InvalidArgument);
            }
            buf[..len].copy_from_slice(&sectors[start..end]);
            Ok(count)
        }

        fn write_sectors(&self, lba: u64, count: u16, buf: &[u8]) -> Result<u16, DevError> {
            let start = (lba * u64::from(self.sector_size)) as usize;
            let len = count as usize * self.sector_size as usize;
            let mut sectors = self.sectors.lock();
            let end = start.checked_add(len).ok_or(DevError::InvalidArgument)?;
            if end > sectors.len() || buf.len() < len {
                return Err(DevError::InvalidArgument);
            }
            sectors[start..end].copy_from_slice(&buf[..len]);
            Ok(count)
        }

        fn identity(&self) -> &BlockIdentity {
            &self.identity
        }

        fn max_sector(&self) -> u64 {
            self.sectors.lock().len() as u64 / u64::from(self.sector_size)
        }

        fn logical_sector_size(&self) -> u32 {
            self.sector_size
        }
    }
}
