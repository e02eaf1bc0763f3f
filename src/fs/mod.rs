//! Filesystem engines (§4.D) and the VFS gateway that dispatches to them (§4.E).
//!
//! This core mounts two on-disk formats, ext2 and FAT (12/16/32), each implementing
//! the [`vfs::Node`]/[`vfs::FsDriver`] capability traits. Nothing above the gateway
//! imports `ext2` or `fat` directly — callers go through [`vfs::MountRegistry`].

pub mod ext2;
pub mod fat;
pub mod vfs;
