//! ext2 inode layout and block-pointer mapping (§3, §4.D).
//!
//! Resolves the full block-pointer mapping: direct (0-11), single-indirect (12),
//! double-indirect (13), and triple-indirect (14), via one recursive walk
//! ([`read_indirect_level`]) parameterized on indirection depth rather than three
//! separate hand-unrolled loops.

use alloc::vec::Vec;

use crate::error::DevError;

use super::superblock::{read_blocks, write_blocks, Superblock};
use crate::block::BlockDevice;

use bytemuck::{Pod, Zeroable};

pub const S_IFMT: u16 = 0xF000;
pub const S_IFDIR: u16 = 0x4000;
pub const S_IFREG: u16 = 0x8000;
pub const S_IFLNK: u16 = 0xA000;

pub const DIRECT_POINTERS: usize = 12;

/// The 128-byte (revision 0) on-disk inode. Revision >= 1 inodes may be larger
/// (`Superblock::inode_size`); the extra bytes beyond this struct are simply left
/// unread.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct RawInode {
    pub mode: u16,
    pub uid: u16,
    pub size_lo: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    pub blocks: u32,
    pub flags: u32,
    pub osd1: u32,
    pub block: [u32; 15],
    pub generation: u32,
    pub file_acl: u32,
    pub size_hi: u32,
    pub faddr: u32,
    pub osd2: [u8; 12],
}

impl RawInode {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        (u64::from(self.size_hi) << 32) | u64::from(self.size_lo)
    }
}

/// Resolves the (block_group, index_in_group, byte_offset_in_table) triple for an
/// inode number. Inode numbers are 1-based (§3).
fn locate(sb: &Superblock, inode_number: u32) -> Result<(u32, u32), DevError> {
    if inode_number == 0 {
        return Err(DevError::InvalidArgument);
    }
    let index = inode_number - 1;
    let group = index / sb.inodes_per_group.max(1);
    let index_in_group = index % sb.inodes_per_group.max(1);
    Ok((group, index_in_group))
}

/// Reads one inode from its block group's inode table.
pub fn read_inode(
    device: &dyn BlockDevice,
    sb: &Superblock,
    bgd_table: &[super::superblock::BlockGroupDescriptor],
    inode_number: u32,
) -> Result<RawInode, DevError> {
    let (group, index_in_group) = locate(sb, inode_number)?;
    let descriptor = bgd_table.get(group as usize).ok_or(DevError::NotFound)?;

    let byte_offset = u64::from(index_in_group) * u64::from(sb.inode_size);
    let block_offset = (byte_offset / u64::from(sb.block_size)) as u32;
    let within_block = (byte_offset % u64::from(sb.block_size)) as usize;

    let mut buf = alloc::vec![0u8; sb.block_size as usize];
    read_blocks(device, sb, descriptor.inode_table + block_offset, 1, &mut buf)?;

    let raw_size = core::mem::size_of::<RawInode>();
    if within_block + raw_size > buf.len() {
        return Err(DevError::Io);
    }
    Ok(*bytemuck::from_bytes(&buf[within_block..within_block + raw_size]))
}

/// Writes one inode back to its block group's inode table, preserving the other
/// inodes sharing that table block.
pub fn write_inode(
    device: &dyn BlockDevice,
    sb: &Superblock,
    bgd_table: &[super::superblock::BlockGroupDescriptor],
    inode_number: u32,
    inode: &RawInode,
) -> Result<(), DevError> {
    let (group, index_in_group) = locate(sb, inode_number)?;
    let descriptor = bgd_table.get(group as usize).ok_or(DevError::NotFound)?;

    let byte_offset = u64::from(index_in_group) * u64::from(sb.inode_size);
    let block_offset = (byte_offset / u64::from(sb.block_size)) as u32;
    let within_block = (byte_offset % u64::from(sb.block_size)) as usize;

    let mut buf = alloc::vec![0u8; sb.block_size as usize];
    read_blocks(device, sb, descriptor.inode_table + block_offset, 1, &mut buf)?;

    let raw_size = core::mem::size_of::<RawInode>();
    buf[within_block..within_block + raw_size].copy_from_slice(bytemuck::bytes_of(inode));
    write_blocks(device, sb, descriptor.inode_table + block_offset, 1, &buf)
}

/// Returns the list of data block numbers an inode references, in file order,
/// walking direct, single-, double- and triple-indirect pointers. Zero entries
/// (sparse holes) are preserved as `0` so callers can distinguish a hole from a
/// short file.
pub fn resolve_blocks(device: &dyn BlockDevice, sb: &Superblock, inode: &RawInode) -> Result<Vec<u32>, DevError> {
    let pointers_per_block = sb.block_size as usize / core::mem::size_of::<u32>();
    let total_blocks = inode.size().div_ceil(u64::from(sb.block_size)) as usize;
    let mut blocks = Vec::with_capacity(total_blocks);

    for &direct in inode.block.iter().take(DIRECT_POINTERS) {
        if blocks.len() >= total_blocks {
            return Ok(blocks);
        }
        blocks.push(direct);
    }

    for (depth, &root) in [inode.block[12], inode.block[13], inode.block[14]].iter().enumerate() {
        if blocks.len() >= total_blocks {
            break;
        }
        let depth = depth as u32 + 1;
        if root == 0 {
            pad_zero(&mut blocks, total_blocks.min(blocks.len() + pointers_per_block.pow(depth)));
            continue;
        }
        read_indirect_level(device, sb, root, depth, pointers_per_block, total_blocks, &mut blocks)?;
    }

    Ok(blocks)
}

/// Walks one indirect block `depth` levels deep: `depth == 1` means its entries are
/// data block numbers directly; `depth > 1` means each entry is itself the root of a
/// `depth - 1` indirect block, recursed into in turn. Single-, double- and
/// triple-indirect pointers are this function called with `depth` 1, 2 and 3.
fn read_indirect_level(
    device: &dyn BlockDevice,
    sb: &Superblock,
    block_num: u32,
    depth: u32,
    pointers_per_block: usize,
    total_blocks: usize,
    blocks: &mut Vec<u32>,
) -> Result<(), DevError> {
    let mut buf = alloc::vec![0u8; sb.block_size as usize];
    read_blocks(device, sb, block_num, 1, &mut buf)?;

    for chunk in buf.chunks_exact(4).take(pointers_per_block) {
        if blocks.len() >= total_blocks {
            break;
        }
        let entry = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if depth == 1 {
            blocks.push(entry);
        } else if entry == 0 {
            pad_zero(&mut blocks, total_blocks.min(blocks.len() + pointers_per_block.pow(depth - 1)));
        } else {
            read_indirect_level(device, sb, entry, depth - 1, pointers_per_block, total_blocks, blocks)?;
        }
    }
    Ok(())
}

fn pad_zero(blocks: &mut Vec<u32>, upto: usize) {
    while blocks.len() < upto {
        blocks.push(0);
    }
}

/// Reads the file's full contents by walking [`resolve_blocks`] and concatenating
/// each referenced block, trimmed to the inode's declared byte size.
pub fn read_file(device: &dyn BlockDevice, sb: &Superblock, inode: &RawInode) -> Result<Vec<u8>, DevError> {
    let blocks = resolve_blocks(device, sb, inode)?;
    let mut data = Vec::with_capacity(inode.size() as usize);
    let mut zero_block = Vec::new();
    zero_block.resize(sb.block_size as usize, 0u8);

    for block in blocks {
        if block == 0 {
            data.extend_from_slice(&zero_block);
            continue;
        }
        let mut buf = alloc::vec![0u8; sb.block_size as usize];
        read_blocks(device, sb, block, 1, &mut buf)?;
        data.extend_from_slice(&buf);
    }
    data.truncate(inode.size() as usize);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_inode() -> RawInode {
        RawInode {
            mode: S_IFREG,
            uid: 0,
            size_lo: 0,
            atime: 0,
            ctime: 0,
            mtime: 0,
            dtime: 0,
            gid: 0,
            links_count: 1,
            blocks: 0,
            flags: 0,
            osd1: 0,
            block: [0; 15],
            generation: 0,
            file_acl: 0,
            size_hi: 0,
            faddr: 0,
            osd2: [0; 12],
        }
    }

    #[test]
    fn classifies_file_type() {
        let mut inode = blank_inode();
        assert!(inode.is_regular());
        inode.mode = S_IFDIR;
        assert!(inode.is_dir());
    }

    #[test]
    fn size_combines_hi_and_lo() {
        let mut inode = blank_inode();
        inode.size_lo = 0xFFFF_FFFF;
        inode.size_hi = 1;
        assert_eq!(inode.size(), (1u64 << 32) | 0xFFFF_FFFF);
    }

    fn test_superblock() -> Superblock {
        Superblock {
            inodes_count: 16,
            blocks_count: 4096,
            free_blocks_count: 0,
            free_inodes_count: 0,
            first_data_block: 1,
            block_size: 1024,
            blocks_per_group: 4096,
            inodes_per_group: 16,
            inode_size: 128,
            block_group_count: 1,
        }
    }

    fn write_pointer_block(device: &crate::block::test_support::MemoryBlockDevice, sb: &Superblock, block_num: u32, first_entry: u32) {
        let mut buf = alloc::vec![0u8; sb.block_size as usize];
        buf[0..4].copy_from_slice(&first_entry.to_le_bytes());
        write_blocks(device, sb, block_num, 1, &buf).expect("write succeeds");
    }

    #[test]
    fn double_indirect_resolves_through_two_levels() {
        use crate::block::test_support::MemoryBlockDevice;
        let device = MemoryBlockDevice::new(4096, 512);
        let sb = test_superblock();
        let pointers_per_block = sb.block_size as usize / 4; // 256

        // block 20 is the double-indirect root, whose first entry points at block 21,
        // a single-indirect block whose first entry is the actual data block, 42.
        write_pointer_block(&device, &sb, 20, 21);
        write_pointer_block(&device, &sb, 21, 42);

        let mut inode = blank_inode();
        let total_blocks = DIRECT_POINTERS + pointers_per_block + 1;
        inode.size_lo = (total_blocks * sb.block_size as usize) as u32;
        inode.block[13] = 20;

        let blocks = resolve_blocks(&device, &sb, &inode).expect("double-indirect resolves");
        assert_eq!(blocks.len(), total_blocks);
        assert_eq!(blocks[total_blocks - 1], 42);
    }

    #[test]
    fn triple_indirect_resolves_through_three_levels() {
        use crate::block::test_support::MemoryBlockDevice;
        let device = MemoryBlockDevice::new(4096, 512);
        let sb = test_superblock();
        let pointers_per_block = sb.block_size as usize / 4; // 256

        // block 30 (triple root) -> block 31 (double) -> block 32 (single) -> data block 77.
        write_pointer_block(&device, &sb, 30, 31);
        write_pointer_block(&device, &sb, 31, 32);
        write_pointer_block(&device, &sb, 32, 77);

        // Single- and double-indirect pointers are both null, so the whole range they'd
        // cover (pointers_per_block + pointers_per_block^2 blocks) pads as sparse holes
        // before the walk ever reaches the triple-indirect pointer.
        let mut inode = blank_inode();
        let total_blocks = DIRECT_POINTERS + pointers_per_block + pointers_per_block * pointers_per_block + 1;
        inode.size_lo = (total_blocks * sb.block_size as usize) as u32;
        inode.block[14] = 30;

        let blocks = resolve_blocks(&device, &sb, &inode).expect("triple-indirect resolves");
        assert_eq!(blocks.len(), total_blocks);
        assert_eq!(blocks[total_blocks - 1], 77);
    }
}
