//! ext2 directory entry iteration and insertion (§3, §4.D).
//!
//! Directory entries are variable-length records packed into a directory
//! inode's data blocks, terminated implicitly by `rec_len` reaching the block
//! boundary. This implementation rounds `8 + name_len` up to a 4-byte boundary
//! when sizing a new entry, the same alignment ext2 itself requires for `rec_len`.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::DevError;

use super::inode::{read_file, RawInode};
use super::superblock::Superblock;
use crate::block::BlockDevice;

pub const FT_UNKNOWN: u8 = 0;
pub const FT_REG_FILE: u8 = 1;
pub const FT_DIR: u8 = 2;

/// One decoded directory entry: `inode == 0` marks a deleted/unused slot that
/// still occupies space in the block (a valid on-disk state, not an error).
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub inode: u32,
    pub rec_len: u16,
    pub file_type: u8,
    pub name: String,
}

const HEADER_LEN: usize = 8;

fn min_rec_len(name_len: usize) -> u16 {
    ((HEADER_LEN + name_len + 3) & !3) as u16
}

/// Decodes every directory entry (including unused slots) in a directory
/// inode's raw byte contents.
fn parse_entries(data: &[u8]) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset + HEADER_LEN <= data.len() {
        let inode = u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]);
        let rec_len = u16::from_le_bytes([data[offset + 4], data[offset + 5]]);
        if rec_len < HEADER_LEN as u16 {
            break;
        }
        let name_len = data[offset + 6] as usize;
        let file_type = data[offset + 7];
        let name_start = offset + HEADER_LEN;
        let name_end = (name_start + name_len).min(data.len());
        let name = String::from_utf8_lossy(&data[name_start..name_end]).into_owned();

        entries.push(DirEntry { inode, rec_len, file_type, name });

        offset += rec_len as usize;
    }
    entries
}

/// Lists the non-deleted entries of a directory inode.
pub fn list(device: &dyn BlockDevice, sb: &Superblock, dir_inode: &RawInode) -> Result<Vec<DirEntry>, DevError> {
    if !dir_inode.is_dir() {
        return Err(DevError::InvalidArgument);
    }
    let data = read_file(device, sb, dir_inode)?;
    Ok(parse_entries(&data).into_iter().filter(|e| e.inode != 0).collect())
}

/// Looks up a single name in a directory, linear scan (ext2 has no on-disk
/// directory index in this core's scope — htree indexing is out of scope, same
/// as the original).
pub fn lookup(device: &dyn BlockDevice, sb: &Superblock, dir_inode: &RawInode, name: &str) -> Result<Option<u32>, DevError> {
    let entries = list(device, sb, dir_inode)?;
    Ok(entries.into_iter().find(|e| e.name == name).map(|e| e.inode))
}

/// Re-encodes a directory's entries into raw blocks, splitting entries across
/// block boundaries (each block's last entry absorbs the remaining slack via its
/// `rec_len`, per ext2's packing rule).
fn encode_entries(entries: &[DirEntry], block_size: u32) -> Vec<u8> {
    let mut out = Vec::new();
    let mut in_block_offset = 0u32;

    let mut index = 0usize;
    while index < entries.len() {
        let entry = &entries[index];
        let needed = min_rec_len(entry.name.len());
        if in_block_offset + u32::from(needed) > block_size {
            while (out.len() as u32) % block_size != 0 {
                out.push(0);
            }
            in_block_offset = 0;
        }

        let next_needed = entries.get(index + 1).map(|next| u32::from(min_rec_len(next.name.len())));
        let is_last_in_block = match next_needed {
            Some(next) => in_block_offset + u32::from(needed) + next > block_size,
            None => true,
        };

        let rec_len = if is_last_in_block { (block_size - in_block_offset) as u16 } else { needed };

        out.extend_from_slice(&entry.inode.to_le_bytes());
        out.extend_from_slice(&rec_len.to_le_bytes());
        out.push(entry.name.len() as u8);
        out.push(entry.file_type);
        out.extend_from_slice(entry.name.as_bytes());
        let padding = rec_len as usize - HEADER_LEN - entry.name.len();
        out.extend(core::iter::repeat(0u8).take(padding));

        in_block_offset += u32::from(rec_len);
        index += 1;
    }

    while (out.len() as u32) % block_size != 0 {
        out.push(0);
    }
    out
}

/// Appends a new directory entry, allocating no new blocks — the caller is
/// expected to have sized the directory inode's blocks already (§4.D's
/// directory-insertion path always appends into existing slack or the
/// directory's final block, matching the original's single-block-at-a-time
/// growth policy rather than pre-allocating).
pub fn append_entry(entries: &mut Vec<DirEntry>, inode: u32, name: &str, file_type: u8) -> Result<(), DevError> {
    if name.is_empty() || name.len() > 255 {
        return Err(DevError::InvalidArgument);
    }
    entries.push(DirEntry {
        inode,
        rec_len: min_rec_len(name.len()),
        file_type,
        name: name.into(),
    });
    Ok(())
}

/// Serializes a directory's in-memory entry list back to block-sized bytes,
/// ready to be written across the inode's data blocks.
#[must_use]
pub fn serialize(entries: &[DirEntry], block_size: u32) -> Vec<u8> {
    encode_entries(entries, block_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_round_tripped_entries() {
        let mut entries = Vec::new();
        append_entry(&mut entries, 2, ".", FT_DIR).unwrap();
        append_entry(&mut entries, 2, "..", FT_DIR).unwrap();
        append_entry(&mut entries, 12, "hello.txt", FT_REG_FILE).unwrap();

        let bytes = serialize(&entries, 1024);
        let parsed = parse_entries(&bytes);
        let names: Vec<_> = parsed.iter().filter(|e| e.inode != 0).map(|e| e.name.as_str()).collect();
        assert_eq!(names, [".", "..", "hello.txt"]);
    }

    #[test]
    fn rejects_empty_name() {
        let mut entries = Vec::new();
        assert_eq!(append_entry(&mut entries, 5, "", FT_REG_FILE).unwrap_err(), DevError::InvalidArgument);
    }
}
