//! ext2 filesystem engine (§3, §4.D): mount, block/inode allocation, the sparse write
//! path, directory insertion, and the [`crate::fs::vfs::Node`] adapter the VFS gateway
//! dispatches through.
//!
//! Split into one submodule per on-disk structure (superblock / inode / directory /
//! block-group), each owning its own layout. This mounts ext2 proper, not ext3/4: no
//! extents, no journal. Inode block mapping resolves direct, single-, double- and
//! triple-indirect pointers (see `inode::resolve_blocks`).

pub mod directory;
pub mod inode;
pub mod superblock;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::block::BlockDevice;
use crate::error::DevError;
use crate::fs::vfs::{DirEntry as VfsDirEntry, FsDriver, Node, NodeAttr, NodeKind};

use directory::{append_entry, list, lookup, serialize, DirEntry as RawDirEntry, FT_DIR, FT_REG_FILE};
use inode::{read_file, read_inode, write_inode, RawInode, DIRECT_POINTERS, S_IFDIR, S_IFREG};
use superblock::{read_blocks, write_blocks, BlockGroupDescriptor, Superblock};

/// First allocatable bit in each bitmap: ext2 reserves the low inodes (1-10, e.g.
/// root/bad-blocks/ACL) and the first few blocks (boot block, superblock, BGD table)
/// the same way across every layout this core mounts (§4.D inode/block allocation:
/// "the first eleven are reserved").
const FIRST_ALLOCATABLE_BIT: u32 = 11;
const ROOT_INODE: u32 = 2;

/// A mounted ext2 volume: the superblock, block-group descriptor table, and the device
/// they describe. Every [`Ext2Node`] shares one of these behind an `Arc` so allocation
/// updates (counters, bitmaps) are visible across open nodes without re-reading the
/// superblock per call.
pub struct Ext2Fs {
    device: Arc<dyn BlockDevice>,
    state: Mutex<FsState>,
}

struct FsState {
    sb: Superblock,
    bgds: Vec<BlockGroupDescriptor>,
}

impl Ext2Fs {
    /// Mounts the ext2 filesystem on `device` (§4.D mount procedure).
    pub fn mount(device: Arc<dyn BlockDevice>) -> Result<Arc<Self>, DevError> {
        let sb = Superblock::load(device.as_ref())?;
        let bgds = BlockGroupDescriptor::load_all(device.as_ref(), &sb)?;
        Ok(Arc::new(Self {
            device,
            state: Mutex::new(FsState { sb, bgds }),
        }))
    }

    /// Returns the root directory node (inode 2, fixed by the ext2 on-disk format).
    pub fn root(self: &Arc<Self>) -> Result<Ext2Node, DevError> {
        Ok(Ext2Node {
            fs: self.clone(),
            inode_number: ROOT_INODE,
        })
    }

    fn read_inode(&self, inode_number: u32) -> Result<RawInode, DevError> {
        let state = self.state.lock();
        read_inode(self.device.as_ref(), &state.sb, &state.bgds, inode_number)
    }

    fn write_inode(&self, inode_number: u32, inode: &RawInode) -> Result<(), DevError> {
        let state = self.state.lock();
        write_inode(self.device.as_ref(), &state.sb, &state.bgds, inode_number, inode)
    }

    /// Allocates one free data block (§4.D write path: "first BGD with unallocated
    /// blocks > 0, first clear bit in block-usage bitmap that is >= 11"), flips its bit,
    /// and decrements both the BGD's and the superblock's free-block counters.
    fn alloc_block(&self) -> Result<u32, DevError> {
        let mut state = self.state.lock();
        let block_size = state.sb.block_size;
        let blocks_per_group = state.sb.blocks_per_group;

        for group in 0..state.bgds.len() {
            if state.bgds[group].free_blocks_count == 0 {
                continue;
            }
            let bitmap_block = state.bgds[group].block_bitmap;
            let mut bitmap = alloc::vec![0u8; block_size as usize];
            read_blocks(self.device.as_ref(), &state.sb, bitmap_block, 1, &mut bitmap)?;

            if let Some(bit) = first_clear_bit(&bitmap, FIRST_ALLOCATABLE_BIT, blocks_per_group) {
                set_bit(&mut bitmap, bit);
                write_blocks(self.device.as_ref(), &state.sb, bitmap_block, 1, &bitmap)?;

                state.bgds[group].free_blocks_count -= 1;
                let descriptor = state.bgds[group];
                BlockGroupDescriptor::flush_one(self.device.as_ref(), &state.sb, group, &descriptor)?;

                state.sb.free_blocks_count -= 1;
                state.sb.flush(self.device.as_ref())?;

                let block_number = state.sb.first_data_block + group as u32 * blocks_per_group + bit;
                return Ok(block_number);
            }
        }
        Err(DevError::NoSpace)
    }

    /// Allocates one free inode (§4.D inode allocation), mirroring [`Self::alloc_block`]
    /// but against the inode bitmap/counters and returning a 1-based global inode number.
    fn alloc_inode(&self) -> Result<u32, DevError> {
        let mut state = self.state.lock();
        let block_size = state.sb.block_size;
        let inodes_per_group = state.sb.inodes_per_group;

        for group in 0..state.bgds.len() {
            if state.bgds[group].free_inodes_count == 0 {
                continue;
            }
            let bitmap_block = state.bgds[group].inode_bitmap;
            let mut bitmap = alloc::vec![0u8; block_size as usize];
            read_blocks(self.device.as_ref(), &state.sb, bitmap_block, 1, &mut bitmap)?;

            if let Some(bit) = first_clear_bit(&bitmap, FIRST_ALLOCATABLE_BIT, inodes_per_group) {
                set_bit(&mut bitmap, bit);
                write_blocks(self.device.as_ref(), &state.sb, bitmap_block, 1, &bitmap)?;

                state.bgds[group].free_inodes_count -= 1;
                let descriptor = state.bgds[group];
                BlockGroupDescriptor::flush_one(self.device.as_ref(), &state.sb, group, &descriptor)?;

                state.sb.free_inodes_count -= 1;
                state.sb.flush(self.device.as_ref())?;

                let inode_number = group as u32 * inodes_per_group + bit + 1;
                return Ok(inode_number);
            }
        }
        Err(DevError::NoSpace)
    }

    /// Extends `inode` with freshly allocated blocks until it can hold `target_blocks`
    /// data blocks, installing each new block number via the same direct/single-indirect
    /// slots [`inode::resolve_blocks`] reads back (§4.D write path: "decrement the
    /// counter... install the block via `set_inode_block`"). Double-indirect growth is
    /// rejected up front — this core only ever *extends* within what `resolve_blocks`
    /// already reads, so a write path needing triple-indirect growth is unsupported
    /// rather than silently truncated.
    fn extend_blocks(&self, inode: &mut RawInode, target_blocks: usize, block_size: u32) -> Result<(), DevError> {
        let pointers_per_block = block_size as usize / 4;
        let max_double_indirect = DIRECT_POINTERS + pointers_per_block + pointers_per_block * pointers_per_block;
        if target_blocks > max_double_indirect {
            return Err(DevError::NotSupported);
        }

        let mut have = inode.size().div_ceil(u64::from(block_size)) as usize;
        while have < target_blocks {
            let new_block = self.alloc_block()?;
            self.install_block(inode, have, new_block, block_size)?;
            have += 1;
        }
        Ok(())
    }

    /// Installs `block_number` at file-relative block index `index`, allocating any
    /// indirect block needed to reach it.
    fn install_block(&self, inode: &mut RawInode, index: usize, block_number: u32, block_size: u32) -> Result<(), DevError> {
        let pointers_per_block = block_size as usize / 4;
        if index < DIRECT_POINTERS {
            inode.block[index] = block_number;
            return Ok(());
        }
        let index = index - DIRECT_POINTERS;
        if index < pointers_per_block {
            if inode.block[12] == 0 {
                inode.block[12] = self.alloc_block()?;
                self.zero_block(inode.block[12], block_size)?;
            }
            self.write_indirect_entry(inode.block[12], index, block_number, block_size)?;
            return Ok(());
        }
        let index = index - pointers_per_block;
        let level1_index = index / pointers_per_block;
        let level2_index = index % pointers_per_block;
        if level1_index >= pointers_per_block {
            return Err(DevError::NotSupported);
        }
        if inode.block[13] == 0 {
            inode.block[13] = self.alloc_block()?;
            self.zero_block(inode.block[13], block_size)?;
        }
        let mut level1 = alloc::vec![0u8; block_size as usize];
        {
            let state = self.state.lock();
            read_blocks(self.device.as_ref(), &state.sb, inode.block[13], 1, &mut level1)?;
        }
        let offset = level1_index * 4;
        let mut level1_entry = u32::from_le_bytes([level1[offset], level1[offset + 1], level1[offset + 2], level1[offset + 3]]);
        if level1_entry == 0 {
            level1_entry = self.alloc_block()?;
            self.zero_block(level1_entry, block_size)?;
            level1[offset..offset + 4].copy_from_slice(&level1_entry.to_le_bytes());
            let state = self.state.lock();
            write_blocks(self.device.as_ref(), &state.sb, inode.block[13], 1, &level1)?;
        }
        self.write_indirect_entry(level1_entry, level2_index, block_number, block_size)
    }

    fn write_indirect_entry(&self, indirect_block: u32, index: usize, value: u32, block_size: u32) -> Result<(), DevError> {
        let state = self.state.lock();
        let mut buf = alloc::vec![0u8; block_size as usize];
        read_blocks(self.device.as_ref(), &state.sb, indirect_block, 1, &mut buf)?;
        let offset = index * 4;
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        write_blocks(self.device.as_ref(), &state.sb, indirect_block, 1, &buf)
    }

    fn zero_block(&self, block_number: u32, block_size: u32) -> Result<(), DevError> {
        let state = self.state.lock();
        let zero = alloc::vec![0u8; block_size as usize];
        write_blocks(self.device.as_ref(), &state.sb, block_number, 1, &zero)
    }

    fn block_size(&self) -> u32 {
        self.state.lock().sb.block_size
    }
}

/// Scans `bitmap` for the first clear bit in `[from, from + limit)`.
fn first_clear_bit(bitmap: &[u8], from: u32, limit: u32) -> Option<u32> {
    (from..limit).find(|&bit| bitmap[(bit / 8) as usize] & (1 << (bit % 8)) == 0)
}

fn set_bit(bitmap: &mut [u8], bit: u32) {
    bitmap[(bit / 8) as usize] |= 1 << (bit % 8);
}

/// One open ext2 node (file or directory), identified by its inode number against a
/// shared [`Ext2Fs`] mount.
pub struct Ext2Node {
    fs: Arc<Ext2Fs>,
    inode_number: u32,
}

impl Node for Ext2Node {
    fn attr(&self) -> Result<NodeAttr, DevError> {
        let inode = self.fs.read_inode(self.inode_number)?;
        Ok(NodeAttr {
            name: String::new(),
            kind: if inode.is_dir() { NodeKind::Directory } else { NodeKind::File },
            mode: inode.mode,
            uid: inode.uid,
            gid: inode.gid,
            length: inode.size(),
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        })
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DevError> {
        let state = self.fs.state.lock();
        let inode = read_inode(self.fs.device.as_ref(), &state.sb, &state.bgds, self.inode_number)?;
        drop(state);
        if inode.is_dir() {
            return Err(DevError::InvalidArgument);
        }
        let data = read_file(self.fs.device.as_ref(), &self.fs.state.lock().sb, &inode)?;
        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<usize, DevError> {
        let mut inode = self.fs.read_inode(self.inode_number)?;
        if inode.is_dir() {
            return Err(DevError::InvalidArgument);
        }
        let block_size = self.fs.block_size();
        let new_len = (offset + buf.len() as u64).max(inode.size());
        let target_blocks = new_len.div_ceil(u64::from(block_size)) as usize;
        self.fs.extend_blocks(&mut inode, target_blocks, block_size)?;

        let mut data = read_file(self.fs.device.as_ref(), &self.fs.state.lock().sb, &inode)?;
        data.resize(new_len as usize, 0);
        let start = offset as usize;
        data[start..start + buf.len()].copy_from_slice(buf);

        let blocks = inode::resolve_blocks(self.fs.device.as_ref(), &self.fs.state.lock().sb, &inode)?;
        for (i, block) in blocks.iter().enumerate() {
            if *block == 0 {
                continue;
            }
            let chunk_start = i * block_size as usize;
            let chunk_end = (chunk_start + block_size as usize).min(data.len());
            let mut chunk = alloc::vec![0u8; block_size as usize];
            chunk[..chunk_end - chunk_start].copy_from_slice(&data[chunk_start..chunk_end]);
            let state = self.fs.state.lock();
            write_blocks(self.fs.device.as_ref(), &state.sb, *block, 1, &chunk)?;
        }

        inode.size_lo = new_len as u32;
        inode.size_hi = (new_len >> 32) as u32;
        self.fs.write_inode(self.inode_number, &inode)?;
        Ok(buf.len())
    }

    fn readdir(&self) -> Result<Vec<VfsDirEntry>, DevError> {
        let inode = self.fs.read_inode(self.inode_number)?;
        let entries = list(self.fs.device.as_ref(), &self.fs.state.lock().sb, &inode)?;
        Ok(entries
            .into_iter()
            .map(|e| VfsDirEntry {
                name: e.name,
                kind: if e.file_type == FT_DIR { NodeKind::Directory } else { NodeKind::File },
            })
            .collect())
    }

    fn lookup(&self, name: &str) -> Result<Box<dyn Node>, DevError> {
        let inode = self.fs.read_inode(self.inode_number)?;
        let target = lookup(self.fs.device.as_ref(), &self.fs.state.lock().sb, &inode, name)?.ok_or(DevError::NotFound)?;
        Ok(Box::new(Ext2Node {
            fs: self.fs.clone(),
            inode_number: target,
        }))
    }

    fn create(&self, name: &str, mode: u16) -> Result<Box<dyn Node>, DevError> {
        let child_inode_number = self.make_child(name, mode, S_IFREG, FT_REG_FILE)?;
        Ok(Box::new(Ext2Node {
            fs: self.fs.clone(),
            inode_number: child_inode_number,
        }))
    }

    fn mkdir(&self, name: &str, mode: u16) -> Result<Box<dyn Node>, DevError> {
        let child_inode_number = self.make_child(name, mode, S_IFDIR, FT_DIR)?;

        let mut dot_entries = Vec::new();
        append_entry(&mut dot_entries, child_inode_number, ".", FT_DIR)?;
        append_entry(&mut dot_entries, self.inode_number, "..", FT_DIR)?;

        let block_size = self.fs.block_size();
        let mut child_inode = self.fs.read_inode(child_inode_number)?;
        self.fs.extend_blocks(&mut child_inode, 1, block_size)?;
        let blocks = inode::resolve_blocks(self.fs.device.as_ref(), &self.fs.state.lock().sb, &child_inode)?;
        let first_block = *blocks.first().ok_or(DevError::Io)?;

        let encoded = serialize(&dot_entries, block_size);
        let state = self.fs.state.lock();
        write_blocks(self.fs.device.as_ref(), &state.sb, first_block, 1, &encoded)?;
        drop(state);

        child_inode.size_lo = block_size;
        child_inode.links_count = 2;
        self.fs.write_inode(child_inode_number, &child_inode)?;

        let mut parent_inode = self.fs.read_inode(self.inode_number)?;
        parent_inode.links_count += 1;
        self.fs.write_inode(self.inode_number, &parent_inode)?;

        Ok(Box::new(Ext2Node {
            fs: self.fs.clone(),
            inode_number: child_inode_number,
        }))
    }
}

impl Ext2Node {
    /// Shared plumbing for `create`/`mkdir`: allocate an inode, insert a directory
    /// entry for it in `self` (§4.D directory insertion), and return the new inode's
    /// number.
    fn make_child(&self, name: &str, mode: u16, type_bits: u16, file_type: u8) -> Result<u32, DevError> {
        if name.is_empty() || name.len() > 255 {
            return Err(DevError::InvalidArgument);
        }
        let parent_inode = self.fs.read_inode(self.inode_number)?;
        if !parent_inode.is_dir() {
            return Err(DevError::InvalidArgument);
        }
        if lookup(self.fs.device.as_ref(), &self.fs.state.lock().sb, &parent_inode, name)?.is_some() {
            return Err(DevError::InvalidArgument);
        }

        let new_inode_number = self.fs.alloc_inode()?;
        let new_inode = RawInode {
            mode: type_bits | mode,
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
        };
        self.fs.write_inode(new_inode_number, &new_inode)?;

        let block_size = self.fs.block_size();
        let mut entries = list_raw(self.fs.device.as_ref(), &self.fs.state.lock().sb, &parent_inode)?;
        append_entry(&mut entries, new_inode_number, name, file_type)?;
        let encoded = serialize(&entries, block_size);

        let mut parent_inode = parent_inode;
        let target_blocks = (encoded.len() as u64).div_ceil(u64::from(block_size)) as usize;
        self.fs.extend_blocks(&mut parent_inode, target_blocks, block_size)?;
        let blocks = inode::resolve_blocks(self.fs.device.as_ref(), &self.fs.state.lock().sb, &parent_inode)?;
        for (i, block) in blocks.iter().enumerate() {
            if *block == 0 {
                continue;
            }
            let chunk_start = i * block_size as usize;
            if chunk_start >= encoded.len() {
                break;
            }
            let chunk_end = (chunk_start + block_size as usize).min(encoded.len());
            let mut chunk = alloc::vec![0u8; block_size as usize];
            chunk[..chunk_end - chunk_start].copy_from_slice(&encoded[chunk_start..chunk_end]);
            let state = self.fs.state.lock();
            write_blocks(self.fs.device.as_ref(), &state.sb, *block, 1, &chunk)?;
        }
        parent_inode.size_lo = encoded.len() as u32;
        self.fs.write_inode(self.inode_number, &parent_inode)?;

        Ok(new_inode_number)
    }
}

fn list_raw(device: &dyn BlockDevice, sb: &Superblock, dir_inode: &RawInode) -> Result<Vec<RawDirEntry>, DevError> {
    if dir_inode.size() == 0 {
        return Ok(Vec::new());
    }
    // `directory::list` already filters deleted slots and is exactly what a fresh
    // re-encode needs: a compact entry list with no stale padding carried forward.
    directory::list(device, sb, dir_inode)
}

/// The mount-registry-facing driver (§6: filesystems register by name).
pub struct Ext2Driver;

impl FsDriver for Ext2Driver {
    fn name(&self) -> &'static str {
        "ext2"
    }

    fn mount(&self, device: Arc<dyn BlockDevice>) -> Result<Box<dyn Node>, DevError> {
        let fs = Ext2Fs::mount(device)?;
        Ok(Box::new(fs.root()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::test_support::MemoryBlockDevice;

    /// Builds a minimal single-block-group ext2 image with just a root directory
    /// (inode 2) containing "." and "..", enough to exercise mount + mkdir + write.
    fn fresh_image() -> Arc<dyn BlockDevice> {
        let block_size = 1024u32;
        let blocks_count = 512u32;
        let inodes_count = 64u32;
        let device = MemoryBlockDevice::new(u64::from(blocks_count) * u64::from(block_size) / 512, 512);

        // Superblock at byte 1024.
        let mut sb = alloc::vec![0u8; 1024];
        sb[0..4].copy_from_slice(&inodes_count.to_le_bytes());
        sb[4..8].copy_from_slice(&blocks_count.to_le_bytes());
        sb[20..24].copy_from_slice(&0u32.to_le_bytes()); // log_block_size
        sb[32..36].copy_from_slice(&blocks_count.to_le_bytes()); // blocks_per_group
        sb[40..44].copy_from_slice(&inodes_count.to_le_bytes()); // inodes_per_group
        sb[56..58].copy_from_slice(&superblock::EXT2_SIGNATURE.to_le_bytes());
        device.write_sectors(1024 / 512, 2, &sb).unwrap();

        // BGD table at block 2 (1024-byte blocks): block_bitmap=3, inode_bitmap=4,
        // inode_table=5.. . Inode table needs inodes_count*128/block_size blocks = 8.
        let mut bgd = alloc::vec![0u8; 32];
        bgd[0..4].copy_from_slice(&3u32.to_le_bytes());
        bgd[4..8].copy_from_slice(&4u32.to_le_bytes());
        bgd[8..12].copy_from_slice(&5u32.to_le_bytes());
        bgd[12..14].copy_from_slice(&(blocks_count - 13 - 1).to_le_bytes());
        bgd[14..16].copy_from_slice(&(inodes_count - 1).to_le_bytes());
        let sector_per_block = block_size / 512;
        device.write_sectors(u64::from(2 * sector_per_block), sector_per_block as u16, &bgd).unwrap();

        // Block bitmap: mark blocks 0..13 used (reserved + bitmaps + inode table).
        let mut block_bitmap = alloc::vec![0u8; block_size as usize];
        for bit in 0..13u32 {
            block_bitmap[(bit / 8) as usize] |= 1 << (bit % 8);
        }
        device.write_sectors(u64::from(3 * sector_per_block), sector_per_block as u16, &block_bitmap).unwrap();

        // Inode bitmap: mark inode 1 (bit 0) and inode 2/root (bit 1) used.
        let mut inode_bitmap = alloc::vec![0u8; block_size as usize];
        inode_bitmap[0] = 0b11;
        device.write_sectors(u64::from(4 * sector_per_block), sector_per_block as u16, &inode_bitmap).unwrap();

        // Root inode (number 2) at inode table block 5, pointing at data block 13.
        let mut inode_table = alloc::vec![0u8; 8 * block_size as usize];
        let root_offset = 1 * 128; // index 1 (inode 2 - 1)
        inode_table[root_offset..root_offset + 2].copy_from_slice(&S_IFDIR.to_le_bytes());
        inode_table[root_offset + 4..root_offset + 8].copy_from_slice(&block_size.to_le_bytes()); // size_lo
        inode_table[root_offset + 28..root_offset + 30].copy_from_slice(&2u16.to_le_bytes()); // links_count
        inode_table[root_offset + 40..root_offset + 44].copy_from_slice(&13u32.to_le_bytes()); // block[0]
        device.write_sectors(u64::from(5 * sector_per_block), 8 * sector_per_block as u16, &inode_table).unwrap();

        // Root directory data block 13: "." and ".." both pointing at inode 2.
        let mut entries = Vec::new();
        append_entry(&mut entries, ROOT_INODE, ".", FT_DIR).unwrap();
        append_entry(&mut entries, ROOT_INODE, "..", FT_DIR).unwrap();
        let encoded = serialize(&entries, block_size);
        device.write_sectors(u64::from(13 * sector_per_block), sector_per_block as u16, &encoded).unwrap();

        Arc::new(device)
    }

    #[test]
    fn mounts_and_lists_root() {
        let fs = Ext2Fs::mount(fresh_image()).unwrap();
        let root = fs.root().unwrap();
        let names: Vec<_> = root.readdir().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, [".", ".."]);
    }

    #[test]
    fn mkdir_adds_dot_and_dotdot_and_bumps_parent_links() {
        let fs = Ext2Fs::mount(fresh_image()).unwrap();
        let root = fs.root().unwrap();
        let sub = root.mkdir("sub", 0o755).unwrap();

        let names: Vec<_> = sub.readdir().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, [".", ".."]);

        let root_names: Vec<_> = root.readdir().unwrap().into_iter().map(|e| e.name).collect();
        assert!(root_names.contains(&String::from("sub")));

        let parent_attr = root.attr().unwrap();
        assert_eq!(parent_attr.mode & S_IFDIR, S_IFDIR);
    }

    #[test]
    fn write_then_read_round_trips() {
        let fs = Ext2Fs::mount(fresh_image()).unwrap();
        let root = fs.root().unwrap();
        let file = root.create("hello.txt", 0o644).unwrap();

        let payload = b"hello ext2 world";
        assert_eq!(file.write(0, payload).unwrap(), payload.len());

        let mut buf = alloc::vec![0u8; payload.len()];
        let n = file.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], payload);
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let fs = Ext2Fs::mount(fresh_image()).unwrap();
        let root = fs.root().unwrap();
        root.create("dup.txt", 0o644).unwrap();
        assert_eq!(root.create("dup.txt", 0o644).unwrap_err(), DevError::InvalidArgument);
    }
}
