//! ext2 superblock and block-group descriptor layout (§3, §6).

use bytemuck::{Pod, Zeroable};

use crate::block::BlockDevice;
use crate::error::DevError;

pub const SUPERBLOCK_OFFSET: u64 = 1024;
pub const EXT2_SIGNATURE: u16 = 0xEF53;

/// The fixed 84-byte portion of the superblock every ext2 revision carries; the
/// extended fields (revision >= 1) are read separately by [`Superblock::load`].
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawSuperblock {
    inodes_count: u32,
    blocks_count: u32,
    r_blocks_count: u32,
    free_blocks_count: u32,
    free_inodes_count: u32,
    first_data_block: u32,
    log_block_size: u32,
    log_frag_size: u32,
    blocks_per_group: u32,
    frags_per_group: u32,
    inodes_per_group: u32,
    mtime: u32,
    wtime: u32,
    mnt_count: u16,
    max_mnt_count: u16,
    magic: u16,
    state: u16,
    errors: u16,
    minor_rev_level: u16,
    lastcheck: u32,
    checkinterval: u32,
    creator_os: u32,
    rev_level: u32,
    def_resuid: u16,
    def_resgid: u16,
}

/// The revision >= 1 extension (offset 84): only `first_ino` and `inode_size` matter
/// to this core (§4.D mount: "If version_major >= 1, read inode_size from the
/// extended superblock; else 128").
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawSuperblockExtended {
    first_ino: u32,
    inode_size: u16,
    block_group_nr: u16,
    feature_compat: u32,
    feature_incompat: u32,
    feature_ro_compat: u32,
}

/// A mounted ext2 filesystem's superblock, with the derived quantities (§3, §4.D
/// mount) every other module in this filesystem reads from.
#[derive(Clone, Copy, Debug)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub inode_size: u16,
    pub block_group_count: u32,
}

impl Superblock {
    /// Reads and validates the superblock at byte offset 1024, deriving block size,
    /// block-group count, and inode size per §4.D's mount procedure.
    pub fn load(device: &dyn BlockDevice) -> Result<Self, DevError> {
        let sector_size = u64::from(device.logical_sector_size());
        let lba = SUPERBLOCK_OFFSET / sector_size;
        let sectors_needed = (1024 + sector_size - 1) / sector_size;
        let mut buf = alloc::vec![0u8; (sectors_needed * sector_size) as usize];
        device.read_sectors(lba, sectors_needed as u16, &mut buf)?;

        let within_sector = (SUPERBLOCK_OFFSET % sector_size) as usize;
        let raw: RawSuperblock = *bytemuck::from_bytes(&buf[within_sector..within_sector + core::mem::size_of::<RawSuperblock>()]);
        if raw.magic != EXT2_SIGNATURE {
            return Err(DevError::InvalidArgument);
        }

        let block_size = 1024u32 << raw.log_block_size;
        let blocks_count = raw.blocks_count;
        let block_group_count = blocks_count.div_ceil(raw.blocks_per_group.max(1));
        let inodes_per_group = if block_group_count == 0 { raw.inodes_count } else { raw.inodes_count / block_group_count };

        let inode_size = if raw.rev_level >= 1 {
            let ext_offset = within_sector + core::mem::size_of::<RawSuperblock>();
            if ext_offset + core::mem::size_of::<RawSuperblockExtended>() <= buf.len() {
                let ext: RawSuperblockExtended =
                    *bytemuck::from_bytes(&buf[ext_offset..ext_offset + core::mem::size_of::<RawSuperblockExtended>()]);
                ext.inode_size
            } else {
                128
            }
        } else {
            128
        };

        Ok(Self {
            inodes_count: raw.inodes_count,
            blocks_count,
            free_blocks_count: raw.free_blocks_count,
            free_inodes_count: raw.free_inodes_count,
            first_data_block: raw.first_data_block,
            block_size,
            blocks_per_group: raw.blocks_per_group,
            inodes_per_group,
            inode_size,
            block_group_count,
        })
    }

    /// Block group descriptor table's starting block (§4.D: "block `2` if
    /// block_size==1024 else block `1`").
    #[must_use]
    pub fn bgd_table_block(&self) -> u32 {
        if self.block_size == 1024 {
            2
        } else {
            1
        }
    }

    /// Serializes the mutable counters (free blocks/inodes) back into the on-disk
    /// superblock. Called after block/inode allocation (§4.D write/allocation paths).
    pub fn flush(&self, device: &dyn BlockDevice) -> Result<(), DevError> {
        let sector_size = u64::from(device.logical_sector_size());
        let lba = SUPERBLOCK_OFFSET / sector_size;
        let sectors_needed = (1024 + sector_size - 1) / sector_size;
        let mut buf = alloc::vec![0u8; (sectors_needed * sector_size) as usize];
        device.read_sectors(lba, sectors_needed as u16, &mut buf)?;

        let within_sector = (SUPERBLOCK_OFFSET % sector_size) as usize;
        buf[within_sector + 12..within_sector + 16].copy_from_slice(&self.free_blocks_count.to_le_bytes());
        buf[within_sector + 16..within_sector + 20].copy_from_slice(&self.free_inodes_count.to_le_bytes());
        device.write_sectors(lba, sectors_needed as u16, &buf)?;
        Ok(())
    }
}

/// One block-group descriptor (32 bytes): bitmap locations, inode table start, and the
/// unallocated counters allocation scans the bitmaps under (§4.D).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct BlockGroupDescriptor {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
    pub pad: u16,
    _reserved: [u32; 3],
}

impl BlockGroupDescriptor {
    const SIZE: usize = 32;

    /// Loads the whole block-group descriptor table.
    pub fn load_all(device: &dyn BlockDevice, sb: &Superblock) -> Result<alloc::vec::Vec<Self>, DevError> {
        let bytes_needed = sb.block_group_count as usize * Self::SIZE;
        let blocks_needed = (bytes_needed as u32).div_ceil(sb.block_size).max(1);
        let mut buf = alloc::vec![0u8; (blocks_needed * sb.block_size) as usize];
        read_blocks(device, sb, sb.bgd_table_block(), blocks_needed, &mut buf)?;

        let mut descriptors = alloc::vec::Vec::with_capacity(sb.block_group_count as usize);
        for i in 0..sb.block_group_count as usize {
            descriptors.push(*bytemuck::from_bytes(&buf[i * Self::SIZE..(i + 1) * Self::SIZE]));
        }
        Ok(descriptors)
    }

    /// Writes one descriptor back in place, leaving its siblings in the table alone.
    pub fn flush_one(device: &dyn BlockDevice, sb: &Superblock, index: usize, descriptor: &Self) -> Result<(), DevError> {
        let table_byte_offset = index * Self::SIZE;
        let block_offset = table_byte_offset as u32 / sb.block_size;
        let within_block = table_byte_offset as u32 % sb.block_size;

        let mut block_buf = alloc::vec![0u8; sb.block_size as usize];
        read_blocks(device, sb, sb.bgd_table_block() + block_offset, 1, &mut block_buf)?;
        block_buf[within_block as usize..within_block as usize + Self::SIZE].copy_from_slice(bytemuck::bytes_of(descriptor));
        write_blocks(device, sb, sb.bgd_table_block() + block_offset, 1, &block_buf)
    }
}

pub(super) fn read_blocks(device: &dyn BlockDevice, sb: &Superblock, start_block: u32, count: u32, buf: &mut [u8]) -> Result<(), DevError> {
    let sector_size = device.logical_sector_size();
    let sectors_per_block = sb.block_size / sector_size;
    let lba = u64::from(start_block) * u64::from(sectors_per_block);
    device.read_sectors(lba, (count * sectors_per_block) as u16, buf)?;
    Ok(())
}

pub(super) fn write_blocks(device: &dyn BlockDevice, sb: &Superblock, start_block: u32, count: u32, buf: &[u8]) -> Result<(), DevError> {
    let sector_size = device.logical_sector_size();
    let sectors_per_block = sb.block_size / sector_size;
    let lba = u64::from(start_block) * u64::from(sectors_per_block);
    device.write_sectors(lba, (count * sectors_per_block) as u16, buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::test_support::MemoryBlockDevice;

    fn synthetic_image() -> MemoryBlockDevice {
        let block_size = 1024u32;
        let blocks_count = 256u32;
        let device = MemoryBlockDevice::new(u64::from(blocks_count) * u64::from(block_size) / 512, 512);

        let mut sb = alloc::vec![0u8; 1024];
        sb[0..4].copy_from_slice(&64u32.to_le_bytes()); // inodes_count
        sb[4..8].copy_from_slice(&blocks_count.to_le_bytes());
        sb[20..24].copy_from_slice(&0u32.to_le_bytes()); // log_block_size => 1024 << 0
        sb[32..36].copy_from_slice(&blocks_count.to_le_bytes()); // blocks_per_group: single group
        sb[40..44].copy_from_slice(&64u32.to_le_bytes()); // inodes_per_group
        sb[56..58].copy_from_slice(&EXT2_SIGNATURE.to_le_bytes());

        device.write_sectors(1024 / 512, 2, &sb).unwrap();
        device
    }

    #[test]
    fn loads_signature_and_derives_block_size() {
        let device = synthetic_image();
        let sb = Superblock::load(&device).expect("valid signature should mount");
        assert_eq!(sb.block_size, 1024);
        assert_eq!(sb.block_group_count, 1);
        assert_eq!(sb.inode_size, 128);
    }

    #[test]
    fn rejects_bad_signature() {
        let device = MemoryBlockDevice::new(256, 512);
        assert_eq!(Superblock::load(&device).unwrap_err(), DevError::InvalidArgument);
    }
}
