//! FAT12/16/32 filesystem engine (§3, §4.D) and its [`crate::fs::vfs::Node`] adapter.
//!
//! Write support is a declared non-goal (§1: "no ... long write paths for FAT"), so
//! this mount is read-only: `write`/`create`/`mkdir` all return
//! [`DevError::NotSupported`], matching the failure-kind contract in §7.

pub mod bpb;
pub mod dir;
pub mod table;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::block::BlockDevice;
use crate::error::DevError;
use crate::fs::vfs::{DirEntry as VfsDirEntry, FsDriver, Node, NodeAttr, NodeKind};

use bpb::{Bpb, FatType};
use dir::{file_attr, DirEntry as RawDirEntry};

pub struct FatFs {
    device: Arc<dyn BlockDevice>,
    bpb: Bpb,
}

impl FatFs {
    pub fn mount(device: Arc<dyn BlockDevice>) -> Result<Arc<Self>, DevError> {
        let bpb = Bpb::load(device.as_ref())?;
        Ok(Arc::new(Self { device, bpb }))
    }

    #[must_use]
    pub fn root(self: &Arc<Self>) -> FatNode {
        let location = match self.bpb.fat_type {
            FatType::Fat32 => Location::Chain(self.bpb.root_cluster),
            FatType::Fat12 | FatType::Fat16 => Location::FixedRoot,
        };
        FatNode {
            fs: self.clone(),
            entry: RootOrEntry::Root,
            location,
        }
    }

    /// Reads a directory's raw byte contents, whether it's the fixed-size FAT12/16 root
    /// region or an ordinary cluster chain.
    fn read_directory_bytes(&self, location: &Location) -> Result<Vec<u8>, DevError> {
        match location {
            Location::FixedRoot => {
                let sector_size = u32::from(self.bpb.bytes_per_sector);
                let sectors = self.bpb.root_dir_sectors();
                let mut buf = alloc::vec![0u8; (sectors * sector_size) as usize];
                self.device
                    .read_sectors(u64::from(self.bpb.root_dir_start_sector()), sectors as u16, &mut buf)?;
                Ok(buf)
            }
            Location::Chain(start_cluster) => self.read_cluster_chain(*start_cluster),
        }
    }

    fn read_cluster_chain(&self, start_cluster: u32) -> Result<Vec<u8>, DevError> {
        let clusters = table::walk_chain(self.device.as_ref(), &self.bpb, start_cluster)?;
        let cluster_bytes = self.bpb.bytes_per_cluster();
        let mut data = Vec::with_capacity(clusters.len() * cluster_bytes as usize);
        for cluster in clusters {
            let lba = u64::from(self.bpb.cluster_to_sector(cluster));
            let mut buf = alloc::vec![0u8; cluster_bytes as usize];
            self.device.read_sectors(lba, u16::from(self.bpb.sectors_per_cluster), &mut buf)?;
            data.extend_from_slice(&buf);
        }
        Ok(data)
    }

    fn read_file_bytes(&self, first_cluster: u32, file_size: u32) -> Result<Vec<u8>, DevError> {
        if file_size == 0 {
            return Ok(Vec::new());
        }
        let mut data = self.read_cluster_chain(first_cluster)?;
        data.truncate(file_size as usize);
        Ok(data)
    }
}

/// Where a directory's entries live: the FAT12/16 fixed root region, or an ordinary
/// cluster chain (every subdirectory, and the FAT32 root).
#[derive(Clone, Copy, Debug)]
enum Location {
    FixedRoot,
    Chain(u32),
}

#[derive(Clone, Debug)]
enum RootOrEntry {
    Root,
    Entry(RawDirEntry),
}

/// One open FAT node. Files and directories both carry their backing [`Location`];
/// files additionally carry their declared size (directories derive their size from
/// their own entry list).
pub struct FatNode {
    fs: Arc<FatFs>,
    entry: RootOrEntry,
    location: Location,
}

impl FatNode {
    fn is_dir(&self) -> bool {
        match &self.entry {
            RootOrEntry::Root => true,
            RootOrEntry::Entry(e) => e.is_directory(),
        }
    }
}

impl Node for FatNode {
    fn attr(&self) -> Result<NodeAttr, DevError> {
        let (name, length, attr_bits) = match &self.entry {
            RootOrEntry::Root => (String::new(), 0, file_attr::ATTR_DIRECTORY),
            RootOrEntry::Entry(e) => (e.name.clone(), u64::from(e.file_size), e.attr),
        };
        Ok(NodeAttr {
            name,
            kind: if attr_bits & file_attr::ATTR_DIRECTORY != 0 { NodeKind::Directory } else { NodeKind::File },
            mode: 0o444,
            uid: 0,
            gid: 0,
            length,
            atime: 0,
            mtime: 0,
            ctime: 0,
        })
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DevError> {
        let RootOrEntry::Entry(entry) = &self.entry else {
            return Err(DevError::InvalidArgument);
        };
        if entry.is_directory() {
            return Err(DevError::InvalidArgument);
        }
        let data = self.fs.read_file_bytes(entry.first_cluster, entry.file_size)?;
        if offset >= data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write(&self, _offset: u64, _buf: &[u8]) -> Result<usize, DevError> {
        Err(DevError::NotSupported)
    }

    fn readdir(&self) -> Result<Vec<VfsDirEntry>, DevError> {
        if !self.is_dir() {
            return Err(DevError::InvalidArgument);
        }
        let data = self.fs.read_directory_bytes(&self.location)?;
        let entries = dir::parse_entries(&data);
        Ok(entries
            .into_iter()
            .map(|e| VfsDirEntry {
                kind: if e.is_directory() { NodeKind::Directory } else { NodeKind::File },
                name: e.name,
            })
            .collect())
    }

    fn lookup(&self, name: &str) -> Result<Box<dyn Node>, DevError> {
        if !self.is_dir() {
            return Err(DevError::InvalidArgument);
        }
        let data = self.fs.read_directory_bytes(&self.location)?;
        let entries = dir::parse_entries(&data);
        let found = dir::lookup(&entries, name).ok_or(DevError::NotFound)?.clone();

        let location = Location::Chain(found.first_cluster);
        Ok(Box::new(FatNode {
            fs: self.fs.clone(),
            entry: RootOrEntry::Entry(found),
            location,
        }))
    }

    fn create(&self, _name: &str, _mode: u16) -> Result<Box<dyn Node>, DevError> {
        Err(DevError::NotSupported)
    }

    fn mkdir(&self, _name: &str, _mode: u16) -> Result<Box<dyn Node>, DevError> {
        Err(DevError::NotSupported)
    }
}

pub struct FatDriver;

impl FsDriver for FatDriver {
    fn name(&self) -> &'static str {
        "vfat"
    }

    fn mount(&self, device: Arc<dyn BlockDevice>) -> Result<Box<dyn Node>, DevError> {
        let fs = FatFs::mount(device)?;
        Ok(Box::new(fs.root()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::test_support::MemoryBlockDevice;

    /// Builds a synthetic FAT12 image with one root-directory file "HELLOW~1.TXT"
    /// (long name "HelloWorld.txt") spanning two clusters (§8 S5).
    fn fat12_image_with_file(contents: &[u8]) -> Arc<dyn BlockDevice> {
        let sector_size = 512u32;
        let sectors_per_cluster = 1u8;
        let reserved = 1u16;
        let num_fats = 1u8;
        let root_entry_count = 16u16;
        let fat_size_sectors = 1u32;
        let total_sectors = 64u32;

        let device = MemoryBlockDevice::new(u64::from(total_sectors), sector_size);

        let mut boot = alloc::vec![0u8; 512];
        boot[0] = 0xEB;
        boot[2] = 0x90;
        boot[11..13].copy_from_slice(&(sector_size as u16).to_le_bytes());
        boot[13] = sectors_per_cluster;
        boot[14..16].copy_from_slice(&reserved.to_le_bytes());
        boot[16] = num_fats;
        boot[17..19].copy_from_slice(&root_entry_count.to_le_bytes());
        boot[19..21].copy_from_slice(&(total_sectors as u16).to_le_bytes());
        boot[22..24].copy_from_slice(&(fat_size_sectors as u16).to_le_bytes());
        boot[510] = 0x55;
        boot[511] = 0xAA;
        device.write_sectors(0, 1, &boot).unwrap();

        // FAT table at sector `reserved`: chain 2 -> 3 -> END.
        let mut fat = alloc::vec![0u8; 512];
        set_fat12(&mut fat, 2, 3);
        set_fat12(&mut fat, 3, 0xFFF);
        device.write_sectors(u64::from(reserved), 1, &fat).unwrap();

        // Root directory at sector `reserved + num_fats*fat_size_sectors`: one LFN
        // fragment plus its 8.3 entry.
        let root_start = u64::from(reserved) + u64::from(num_fats) * u64::from(fat_size_sectors);
        let mut root = alloc::vec![0u8; 512];
        write_lfn_and_short(&mut root, "HelloWorld.txt", "HELLOW~1", "TXT", contents.len() as u32, 2);
        device.write_sectors(root_start, 1, &root).unwrap();

        // Data region starts right after root dir; cluster 2 = first data sector.
        let root_dir_sectors = (u32::from(root_entry_count) * 32).div_ceil(sector_size);
        let data_start = root_start + u64::from(root_dir_sectors);
        let mut cluster2 = alloc::vec![0u8; sector_size as usize];
        let first_chunk = contents.len().min(sector_size as usize);
        cluster2[..first_chunk].copy_from_slice(&contents[..first_chunk]);
        device.write_sectors(data_start, 1, &cluster2).unwrap();

        if contents.len() > sector_size as usize {
            let mut cluster3 = alloc::vec![0u8; sector_size as usize];
            let rest = &contents[sector_size as usize..];
            cluster3[..rest.len()].copy_from_slice(rest);
            device.write_sectors(data_start + 1, 1, &cluster3).unwrap();
        }

        Arc::new(device)
    }

    fn set_fat12(fat: &mut [u8], cluster: u32, value: u16) {
        let byte_offset = (cluster + cluster / 2) as usize;
        let existing = u16::from_le_bytes([fat[byte_offset], fat[byte_offset + 1]]);
        let merged = if cluster % 2 == 1 { (existing & 0x000F) | (value << 4) } else { (existing & 0xF000) | (value & 0x0FFF) };
        fat[byte_offset..byte_offset + 2].copy_from_slice(&merged.to_le_bytes());
    }

    fn write_lfn_and_short(buf: &mut [u8], long_name: &str, short_base: &str, short_ext: &str, size: u32, cluster: u32) {
        let units: alloc::vec::Vec<u16> = long_name.encode_utf16().collect();
        let mut name_units = [0xFFFFu16; 13];
        for (i, &u) in units.iter().enumerate() {
            name_units[i] = u;
        }
        if units.len() < 13 {
            name_units[units.len()] = 0x0000;
        }

        buf[0] = 1 | 0x40; // single LFN fragment, order 1, last
        for (i, &u) in name_units[0..5].iter().enumerate() {
            buf[1 + i * 2..3 + i * 2].copy_from_slice(&u.to_le_bytes());
        }
        buf[11] = file_attr::ATTR_LFN;
        for (i, &u) in name_units[5..11].iter().enumerate() {
            buf[14 + i * 2..16 + i * 2].copy_from_slice(&u.to_le_bytes());
        }
        for (i, &u) in name_units[11..13].iter().enumerate() {
            buf[28 + i * 2..30 + i * 2].copy_from_slice(&u.to_le_bytes());
        }

        let short = &mut buf[32..64];
        short[0..8].copy_from_slice(b"        ");
        short[0..short_base.len()].copy_from_slice(short_base.as_bytes());
        short[8..11].copy_from_slice(b"   ");
        short[8..8 + short_ext.len()].copy_from_slice(short_ext.as_bytes());
        short[11] = file_attr::ATTR_ARCHIVE;
        short[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        short[28..32].copy_from_slice(&size.to_le_bytes());
    }

    #[test]
    fn finddir_and_read_agree_on_long_name_file() {
        let contents = b"hello fat world, long enough to span a cluster boundary if needed";
        let device = fat12_image_with_file(contents);
        let fs = FatFs::mount(device).unwrap();
        let root = fs.root();

        let names: Vec<_> = root.readdir().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["HelloWorld.txt"]);

        let file = root.lookup("HelloWorld.txt").unwrap();
        let mut buf = alloc::vec![0u8; contents.len()];
        let n = file.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], contents);
    }

    #[test]
    fn write_is_not_supported() {
        let contents = b"x";
        let device = fat12_image_with_file(contents);
        let fs = FatFs::mount(device).unwrap();
        let file = fs.root().lookup("HelloWorld.txt").unwrap();
        assert_eq!(file.write(0, b"y").unwrap_err(), DevError::NotSupported);
    }
}
