//! POSIX shared-memory pixel buffers, one per client window (§4.G): each window's
//! contents live in a `shm_open` segment sized `4 * width * height` (32bpp), mapped
//! into both the client and the compositor so a present only needs a blend, not a copy
//! across a socket.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};

use hexaio::error::DevError;

static NEXT_KEY: AtomicU32 = AtomicU32::new(1);

/// Allocates the next shared-memory key; keys are process-unique, not reused, so a
/// client can never be handed a stale segment left over from a destroyed window.
pub fn next_key() -> u32 {
    NEXT_KEY.fetch_add(1, Ordering::Relaxed)
}

fn name_for(key: u32) -> String {
    format!("/celestial-wnd-{key}")
}

/// A `shm_open` segment mapped `PROT_READ | PROT_WRITE` into this process.
pub struct SharedBuffer {
    fd: RawFd,
    ptr: *mut u8,
    len: usize,
    key: u32,
    owner: bool,
}

unsafe impl Send for SharedBuffer {}

impl SharedBuffer {
    /// Creates and sizes a new segment for a `width x height` 32bpp window.
    pub fn create(width: u32, height: u32) -> Result<Self, DevError> {
        let key = next_key();
        let len = 4 * width as usize * height as usize;
        let name = CString::new(name_for(key)).map_err(|_| DevError::InvalidArgument)?;

        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_CREAT | libc::O_RDWR | libc::O_EXCL, 0o600) };
        if fd < 0 {
            return Err(DevError::Io);
        }
        if unsafe { libc::ftruncate(fd, len as libc::off_t) } < 0 {
            unsafe { libc::close(fd) };
            let _ = unsafe { libc::shm_unlink(name.as_ptr()) };
            return Err(DevError::NoSpace);
        }
        let ptr = map(fd, len)?;
        Ok(Self { fd, ptr, len, key, owner: true })
    }

    /// Opens an existing segment by key (the compositor's side of a window a client
    /// already created).
    pub fn open(key: u32, width: u32, height: u32) -> Result<Self, DevError> {
        let len = 4 * width as usize * height as usize;
        let name = CString::new(name_for(key)).map_err(|_| DevError::InvalidArgument)?;
        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(DevError::NotFound);
        }
        let ptr = map(fd, len)?;
        Ok(Self { fd, ptr, len, key, owner: false })
    }

    #[must_use]
    pub fn key(&self) -> u32 {
        self.key
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

fn map(fd: RawFd, len: usize) -> Result<*mut u8, DevError> {
    let ptr = unsafe {
        libc::mmap(std::ptr::null_mut(), len, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0)
    };
    if ptr == libc::MAP_FAILED {
        return Err(DevError::NoMemory);
    }
    Ok(ptr.cast::<u8>())
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.len);
            libc::close(self.fd);
        }
        if self.owner {
            if let Ok(name) = CString::new(name_for(self.key)) {
                unsafe { libc::shm_unlink(name.as_ptr()) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_see_the_same_bytes() {
        let mut owner = SharedBuffer::create(4, 4).expect("create succeeds");
        owner.as_mut_slice()[0] = 0xAB;
        let viewer = SharedBuffer::open(owner.key(), 4, 4).expect("open succeeds");
        assert_eq!(viewer.as_slice()[0], 0xAB);
    }

    #[test]
    fn buffer_len_matches_32bpp_geometry() {
        let buf = SharedBuffer::create(10, 5).expect("create succeeds");
        assert_eq!(buf.as_slice().len(), 4 * 10 * 5);
    }
}
