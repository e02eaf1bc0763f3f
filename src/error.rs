//! Error kinds shared across the device I/O core.
//!
//! Every driver family in this crate (block, USB, filesystem, input, compositor)
//! reports failures through [`DevError`] rather than inventing its own error enum.
//! This mirrors the errno-style contract the rest of the kernel expects at the
//! VFS/syscall boundary: callers match on a small, stable set of kinds instead of
//! driver-specific types.

use core::fmt;

/// `CanFail` is a return type for functions that are allowed to fail, and don't need to
/// return anything beyond success/failure.
pub type CanFail<E> = Result<(), E>;

/// Standard error kinds surfaced by the device I/O core, per the propagation policy:
/// drivers never retry silently and never panic on a recoverable condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DevError {
    /// Hardware did not respond within the bounded wait; the in-flight slot is leaked,
    /// not retried, by the driver itself.
    TimedOut,

    /// Device/protocol failure (bad completion status, controller error bit, malformed
    /// reply). The affected operation is discarded but the channel/queue stays usable.
    Io,

    /// The operation would exceed available space (block/inode allocation failure).
    NoSpace,

    /// The operation would exceed available memory (DMA/MMIO allocation failure).
    NoMemory,

    /// Synchronous rejection before any device interaction: bad alignment, a zero
    /// inode number, an out-of-range LBA, a malformed wire packet, ...
    InvalidArgument,

    /// Feature intentionally not implemented (exFAT, FAT write path, growth beyond
    /// ext2 double-indirect reach, PRP lists, ...). Callers are expected to surface
    /// this upward rather than work around it.
    NotSupported,

    /// No such device, drive slot, mount, window or node.
    NotFound,
}

impl fmt::Display for DevError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DevError::TimedOut => "operation timed out",
            DevError::Io => "device I/O error",
            DevError::NoSpace => "no space left on device",
            DevError::NoMemory => "out of memory",
            DevError::InvalidArgument => "invalid argument",
            DevError::NotSupported => "operation not supported",
            DevError::NotFound => "no such device or entry",
        };
        f.write_str(msg)
    }
}

impl DevError {
    /// Maps this error to the POSIX-style errno the VFS gateway expects at its
    /// node operation boundary.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            DevError::TimedOut => 110,     // ETIMEDOUT
            DevError::Io => 5,             // EIO
            DevError::NoSpace => 28,       // ENOSPC
            DevError::NoMemory => 12,      // ENOMEM
            DevError::InvalidArgument => 22, // EINVAL
            DevError::NotSupported => 95,  // ENOTSUP
            DevError::NotFound => 2,       // ENOENT
        }
    }
}

/// A common trait implemented by every error type defined in this crate, mirroring the
/// kernel-wide `BaseError` contract so driver errors can be boxed into a `dyn BaseError`
/// at the VFS boundary without every call site having to know the concrete type.
pub trait BaseError: fmt::Debug {}

impl BaseError for DevError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_is_stable() {
        assert_eq!(DevError::Io.errno(), 5);
        assert_eq!(DevError::TimedOut.errno(), 110);
        assert_eq!(DevError::NoSpace.errno(), 28);
        assert_eq!(DevError::InvalidArgument.errno(), 22);
        assert_eq!(DevError::NotSupported.errno(), 95);
    }
}
