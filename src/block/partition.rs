//! MBR partition table parsing.
//!
//! The standard four-entry, 0x1BE-offset layout, read through [`bytemuck`], trimmed to
//! the filesystem types this crate mounts (ext2, FAT12/16/32). GPT is out of scope; a
//! GPT-protective-MBR entry (`PartitionKind::Gpt`) is still recognized so a caller can
//! report "not supported" instead of silently misreading the partition as empty.

use bytemuck::{Pod, Zeroable};

use crate::block::{BlockDevice, BlockIdentity};
use crate::error::DevError;

const MBR_PARTITION_OFFSET: usize = 0x1BE;
const MBR_SIGNATURE_OFFSET: usize = 0x1FE;
const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawMbrEntry {
    attributes: u8,
    chs_start: [u8; 3],
    part_type: u8,
    chs_last: [u8; 3],
    lba_start: u32,
    sectors_count: u32,
}

/// Filesystem kind an MBR partition type byte maps to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PartitionKind {
    Empty,
    Fat12,
    Fat16,
    Fat32,
    Ext2,
    Gpt,
    Unknown(u8),
}

impl From<u8> for PartitionKind {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Empty,
            0x01 => Self::Fat12,
            0x04 | 0x06 | 0x0E => Self::Fat16,
            0x0B | 0x0C => Self::Fat32,
            0x83 => Self::Ext2,
            0xEE => Self::Gpt,
            other => Self::Unknown(other),
        }
    }
}

/// One of the (at most four) primary partitions described by an MBR.
#[derive(Clone, Copy, Debug)]
pub struct MbrPartition {
    pub kind: PartitionKind,
    pub start_lba: u32,
    pub sectors_count: u32,
    pub bootable: bool,
}

/// Reads and parses the partition table from a device's first sector. Returns an empty
/// list (not an error) if the boot-signature is absent — an unpartitioned disk is a
/// valid, if unusual, state.
pub fn read_partition_table(device: &dyn BlockDevice) -> Result<heapless_partitions::List, DevError> {
    let sector_size = device.logical_sector_size() as usize;
    if sector_size < MBR_SIGNATURE_OFFSET + 2 {
        return Err(DevError::InvalidArgument);
    }
    let mut sector = alloc::vec![0u8; sector_size];
    device.read_sectors(0, 1, &mut sector)?;

    if sector[MBR_SIGNATURE_OFFSET..MBR_SIGNATURE_OFFSET + 2] != MBR_SIGNATURE {
        return Ok(heapless_partitions::List::default());
    }

    let mut partitions = heapless_partitions::List::default();
    for i in 0..4usize {
        let offset = MBR_PARTITION_OFFSET + i * core::mem::size_of::<RawMbrEntry>();
        let raw: RawMbrEntry = *bytemuck::from_bytes(
            &sector[offset..offset + core::mem::size_of::<RawMbrEntry>()],
        );
        if raw.part_type == 0 {
            continue;
        }
        partitions.push(MbrPartition {
            kind: PartitionKind::from(raw.part_type),
            start_lba: raw.lba_start,
            sectors_count: raw.sectors_count,
            bootable: (0x80..=0x8F).contains(&raw.attributes),
        });
    }
    Ok(partitions)
}

/// A read/write view over one partition's sectors, translating LBA 0 to
/// `start_lba` on the underlying device. Filesystem mounts (§4.D) address sectors
/// through this rather than the whole-disk device directly.
pub struct PartitionView<'a> {
    device: &'a dyn BlockDevice,
    start_lba: u64,
    sector_count: u64,
}

impl<'a> PartitionView<'a> {
    #[must_use]
    pub fn new(device: &'a dyn BlockDevice, partition: MbrPartition) -> Self {
        Self {
            device,
            start_lba: u64::from(partition.start_lba),
            sector_count: u64::from(partition.sectors_count),
        }
    }

    /// A view over the whole device, for filesystems mounted without a partition table
    /// (e.g. a floppy image).
    #[must_use]
    pub fn whole_device(device: &'a dyn BlockDevice) -> Self {
        let sector_count = device.max_sector();
        Self {
            device,
            start_lba: 0,
            sector_count,
        }
    }
}

impl<'a> BlockDevice for PartitionView<'a> {
    fn read_sectors(&self, lba: u64, count: u16, buf: &mut [u8]) -> Result<u16, DevError> {
        let end = lba.checked_add(u64::from(count)).ok_or(DevError::InvalidArgument)?;
        if end > self.sector_count {
            return Err(DevError::InvalidArgument);
        }
        self.device.read_sectors(self.start_lba + lba, count, buf)
    }

    fn write_sectors(&self, lba: u64, count: u16, buf: &[u8]) -> Result<u16, DevError> {
        let end = lba.checked_add(u64::from(count)).ok_or(DevError::InvalidArgument)?;
        if end > self.sector_count {
            return Err(DevError::InvalidArgument);
        }
        self.device.write_sectors(self.start_lba + lba, count, buf)
    }

    fn identity(&self) -> &BlockIdentity {
        self.device.identity()
    }

    fn max_sector(&self) -> u64 {
        self.sector_count
    }

    fn logical_sector_size(&self) -> u32 {
        self.device.logical_sector_size()
    }
}

/// A tiny fixed-capacity list, since an MBR never holds more than four primary
/// partitions and this crate has no heap-allocating `Vec` requirement here worth
/// dragging `alloc::vec::Vec` in for at the call sites that just want to iterate.
pub mod heapless_partitions {
    use super::MbrPartition;

    #[derive(Clone, Copy, Default)]
    pub struct List {
        entries: [Option<MbrPartition>; 4],
        len: usize,
    }

    impl List {
        pub(super) fn push(&mut self, partition: MbrPartition) {
            if self.len < self.entries.len() {
                self.entries[self.len] = Some(partition);
                self.len += 1;
            }
        }

        #[must_use]
        pub fn as_slice(&self) -> &[Option<MbrPartition>] {
            &self.entries[..self.len]
        }

        pub fn iter(&self) -> impl Iterator<Item = &MbrPartition> {
            self.as_slice().iter().filter_map(|p| p.as_ref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::test_support::MemoryBlockDevice;

    fn disk_with_one_ext2_partition() -> MemoryBlockDevice {
        let mut image = alloc::vec![0u8; 512];
        image[MBR_PARTITION_OFFSET] = 0x80; // bootable
        image[MBR_PARTITION_OFFSET + 4] = 0x83; // ext2
        image[MBR_PARTITION_OFFSET + 8..MBR_PARTITION_OFFSET + 12]
            .copy_from_slice(&2048u32.to_le_bytes());
        image[MBR_PARTITION_OFFSET + 12..MBR_PARTITION_OFFSET + 16]
            .copy_from_slice(&1_000_000u32.to_le_bytes());
        image[MBR_SIGNATURE_OFFSET] = 0x55;
        image[MBR_SIGNATURE_OFFSET + 1] = 0xAA;
        MemoryBlockDevice::with_image(image, 512)
    }

    #[test]
    fn parses_single_ext2_partition() {
        let disk = disk_with_one_ext2_partition();
        let table = read_partition_table(&disk).expect("valid MBR");
        let partitions: alloc::vec::Vec<_> = table.iter().collect();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].kind, PartitionKind::Ext2);
        assert_eq!(partitions[0].start_lba, 2048);
        assert!(partitions[0].bootable);
    }

    #[test]
    fn missing_signature_yields_no_partitions() {
        let disk = MemoryBlockDevice::new(4096, 512);
        let table = read_partition_table(&disk).expect("read should succeed");
        assert_eq!(table.iter().count(), 0);
    }
}
