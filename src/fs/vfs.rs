//! VFS Gateway (component E): the thin node contract filesystem engines populate.
//!
//! A filesystem implementation ties into the rest of the kernel through `Node`/
//! `FsDriver` trait objects rather than a bag of function pointers: §4.E treats the
//! gateway as a thin contract only, so this module narrows that contract to the
//! operation set ext2 and FAT actually implement: `read`, `write`, `readdir`, `lookup`,
//! `create`, `mkdir`. A mount registers itself here by name; the rest of the kernel
//! never imports `fs::ext2` or `fs::fat` directly.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::DevError;

/// What kind of thing a [`NodeAttr`] describes, mirroring the VFS's own node-kind enum
/// (§4.E). Block/char devices, pipes and sockets pass through this gateway even though
/// no engine in this core implements their data path — a filesystem's directory entries
/// can still name them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    File,
    Directory,
    BlockDevice,
    CharDevice,
    Symlink,
    Pipe,
    Socket,
}

/// Attributes every node exposes, independent of which filesystem engine backs it.
#[derive(Clone, Debug)]
pub struct NodeAttr {
    pub name: String,
    pub kind: NodeKind,
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    pub length: u64,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
}

/// One entry produced by [`Node::readdir`]: a name paired with the kind the caller needs
/// to decide whether to recurse, without opening the child node.
#[derive(Clone, Debug)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

/// The capability trait every mounted filesystem engine implements, replacing a
/// duck-typed `FsFile`/`FsDirectory` callback bag with a single polymorphic contract
/// (§9 design notes: "duck-typed VFS node ops... map cleanly to a capability trait").
/// Not every node supports every operation — `create`/`mkdir` on a file node,
/// or `write` on a read-only FAT mount, return [`DevError::NotSupported`] rather than
/// being absent from the trait, so callers can match on a single type.
pub trait Node: Send + Sync {
    fn attr(&self) -> Result<NodeAttr, DevError>;

    /// Reads up to `buf.len()` bytes starting at `offset`, returning the number
    /// actually read (0 at or past EOF).
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DevError>;

    /// Writes `buf` at `offset`, extending the node if `offset + buf.len()` exceeds its
    /// current length. Returns [`DevError::NotSupported`] on a read-only mount.
    fn write(&self, offset: u64, buf: &[u8]) -> Result<usize, DevError>;

    /// Lists a directory node's children. [`DevError::InvalidArgument`] on a non-directory.
    fn readdir(&self) -> Result<Vec<DirEntry>, DevError>;

    /// Resolves one child name within a directory node.
    fn lookup(&self, name: &str) -> Result<Box<dyn Node>, DevError>;

    /// Creates a regular file named `name` in this directory node.
    fn create(&self, name: &str, mode: u16) -> Result<Box<dyn Node>, DevError>;

    /// Creates a subdirectory named `name` in this directory node.
    fn mkdir(&self, name: &str, mode: u16) -> Result<Box<dyn Node>, DevError>;
}

/// A filesystem driver factory, registered by name (`"ext2"`, `"vfat"`) per §6's mount
/// API: `(source-path, target-path) -> root-node | errno`. The device is handed in
/// already opened (block device lookup by serial/model is the caller's job, not this
/// trait's), so it only deals with on-disk format, not device discovery.
pub trait FsDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mounts the filesystem found on `device`, returning its root directory node.
    fn mount(&self, device: alloc::sync::Arc<dyn crate::block::BlockDevice>) -> Result<Box<dyn Node>, DevError>;
}

/// The mount registry: maps a filesystem name to the driver that implements it. A real
/// kernel build registers `"ext2"` and `"vfat"` once at boot; tests register a
/// single in-memory driver and mount straight off it.
pub struct MountRegistry {
    drivers: alloc::collections::BTreeMap<&'static str, Box<dyn FsDriver>>,
}

impl MountRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            drivers: alloc::collections::BTreeMap::new(),
        }
    }

    /// Registers a filesystem driver by name. Re-registering the same name replaces the
    /// prior driver (useful in tests swapping a fixture in).
    pub fn register(&mut self, driver: Box<dyn FsDriver>) {
        self.drivers.insert(driver.name(), driver);
    }

    /// Mounts `device` using the named driver, per §6's `(source-path, target-path) ->
    /// root-node | errno` contract (the source/target path resolution itself is a VFS
    /// dispatcher concern external to this crate; callers pass the already-opened device).
    pub fn mount(&self, fs_name: &str, device: alloc::sync::Arc<dyn crate::block::BlockDevice>) -> Result<Box<dyn Node>, DevError> {
        self.drivers.get(fs_name).ok_or(DevError::NotFound)?.mount(device)
    }
}

impl Default for MountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;

    struct StubNode;
    impl Node for StubNode {
        fn attr(&self) -> Result<NodeAttr, DevError> {
            Ok(NodeAttr {
                name: "root".into(),
                kind: NodeKind::Directory,
                mode: 0o755,
                uid: 0,
                gid: 0,
                length: 0,
                atime: 0,
                mtime: 0,
                ctime: 0,
            })
        }
        fn read(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize, DevError> {
            Err(DevError::NotSupported)
        }
        fn write(&self, _offset: u64, _buf: &[u8]) -> Result<usize, DevError> {
            Err(DevError::NotSupported)
        }
        fn readdir(&self) -> Result<Vec<DirEntry>, DevError> {
            Ok(Vec::new())
        }
        fn lookup(&self, _name: &str) -> Result<Box<dyn Node>, DevError> {
            Err(DevError::NotFound)
        }
        fn create(&self, _name: &str, _mode: u16) -> Result<Box<dyn Node>, DevError> {
            Err(DevError::NotSupported)
        }
        fn mkdir(&self, _name: &str, _mode: u16) -> Result<Box<dyn Node>, DevError> {
            Err(DevError::NotSupported)
        }
    }

    struct StubDriver;
    impl FsDriver for StubDriver {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn mount(&self, _device: Arc<dyn crate::block::BlockDevice>) -> Result<Box<dyn Node>, DevError> {
            Ok(Box::new(StubNode))
        }
    }

    #[test]
    fn unknown_fs_name_is_not_found() {
        let registry = MountRegistry::new();
        let device = Arc::new(crate::block::test_support::MemoryBlockDevice::new(1, 512));
        assert_eq!(registry.mount("ext2", device).unwrap_err(), DevError::NotFound);
    }

    #[test]
    fn registered_driver_mounts() {
        let mut registry = MountRegistry::new();
        registry.register(Box::new(StubDriver));
        let device = Arc::new(crate::block::test_support::MemoryBlockDevice::new(1, 512));
        let root = registry.mount("stub", device).unwrap();
        assert_eq!(root.attr().unwrap().kind, NodeKind::Directory);
    }
}
