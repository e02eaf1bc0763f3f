//! UNIX-domain `SOCK_SEQPACKET` listener at `/comm/wndsrv` (§6).
//!
//! `std::os::unix::net` only exposes stream and datagram sockets, so the listener,
//! the accepted client connections and their sends/receives all go through raw `libc`
//! calls here, mirroring the thin unsafe wrappers [`hexaio::io`] uses for port I/O.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use hexaio::error::DevError;

/// A bound, listening `SOCK_SEQPACKET` socket.
pub struct Listener {
    fd: RawFd,
}

/// One accepted client connection.
pub struct Connection {
    pub fd: RawFd,
}

fn last_error() -> DevError {
    match io::Error::last_os_error().raw_os_error() {
        Some(libc::ENOMEM) => DevError::NoMemory,
        Some(libc::ENOSPC) => DevError::NoSpace,
        Some(libc::EINVAL) => DevError::InvalidArgument,
        _ => DevError::Io,
    }
}

fn make_sockaddr(path: &str) -> Result<(libc::sockaddr_un, libc::socklen_t), DevError> {
    let cpath = CString::new(path).map_err(|_| DevError::InvalidArgument)?;
    let bytes = cpath.as_bytes_with_nul();
    if bytes.len() > mem::size_of::<libc::sockaddr_un>() - mem::size_of::<libc::sa_family_t>() {
        return Err(DevError::InvalidArgument);
    }
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, &src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
        *dst = src as libc::c_char;
    }
    let len = mem::size_of::<libc::sa_family_t>() + bytes.len();
    Ok((addr, len as libc::socklen_t))
}

impl Listener {
    /// Creates, binds and starts listening on a `SOCK_SEQPACKET` socket at `path`,
    /// removing any stale socket file left behind by a previous run first.
    pub fn bind(path: &str, backlog: i32) -> Result<Self, DevError> {
        let _ = std::fs::remove_file(path);
        let (addr, len) = make_sockaddr(path)?;

        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_SEQPACKET, 0) };
        if fd < 0 {
            return Err(last_error());
        }
        let rc = unsafe {
            libc::bind(fd, (&addr as *const libc::sockaddr_un).cast::<libc::sockaddr>(), len)
        };
        if rc < 0 {
            unsafe { libc::close(fd) };
            return Err(last_error());
        }
        let rc = unsafe { libc::listen(fd, backlog) };
        if rc < 0 {
            unsafe { libc::close(fd) };
            return Err(last_error());
        }
        set_nonblocking(fd)?;
        Ok(Self { fd })
    }

    /// Accepts one pending connection, or `None` if none is waiting (the listener is
    /// non-blocking so the compositor's frame loop can poll it alongside input).
    pub fn accept(&self) -> Result<Option<Connection>, DevError> {
        let fd = unsafe { libc::accept(self.fd, std::ptr::null_mut(), std::ptr::null_mut()) };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(last_error());
        }
        set_nonblocking(fd)?;
        Ok(Some(Connection { fd }))
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

fn set_nonblocking(fd: RawFd) -> Result<(), DevError> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(last_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(last_error());
    }
    Ok(())
}

impl Connection {
    /// Sends one complete packet. `SOCK_SEQPACKET` preserves message boundaries, so the
    /// peer's matching `recv` always sees exactly these bytes as one datagram.
    pub fn send(&self, bytes: &[u8]) -> Result<(), DevError> {
        let rc = unsafe {
            libc::send(self.fd, bytes.as_ptr().cast::<libc::c_void>(), bytes.len(), libc::MSG_NOSIGNAL)
        };
        if rc < 0 {
            return Err(last_error());
        }
        Ok(())
    }

    /// Receives one pending packet into `buf`, returning its length. `Ok(None)` if
    /// nothing is pending; `Ok(Some(0))` if the peer has closed the connection.
    pub fn recv(&self, buf: &mut [u8]) -> Result<Option<usize>, DevError> {
        let rc = unsafe { libc::recv(self.fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len(), 0) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(last_error());
        }
        Ok(Some(rc as usize))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_rejects_path_longer_than_sun_path() {
        let path = format!("/tmp/{}", "x".repeat(200));
        assert_eq!(Listener::bind(&path, 1).err(), Some(DevError::InvalidArgument));
    }

    #[test]
    fn accept_on_idle_listener_returns_none() {
        let path = format!("/tmp/celestial-test-{}.sock", std::process::id());
        let listener = Listener::bind(&path, 4).expect("bind succeeds");
        assert!(listener.accept().expect("accept does not error").is_none());
        let _ = std::fs::remove_file(&path);
    }
}
