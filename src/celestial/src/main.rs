//! Celestial: the compositing window server for Hexahedron/Ethereal (§3, §4.G).
//!
//! Wires the library pieces to their concrete backends: the PS/2 [`InputAggregator`]
//! for mouse/keyboard, a `SOCK_SEQPACKET` [`Listener`] at `/comm/wndsrv` for clients,
//! and the kernel's linear framebuffer device, then runs the frame loop forever.

mod compositor;
mod damage;
mod mouse;
mod protocol;
mod shm;
mod socket;
mod window;

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::thread;
use std::time::Duration;

use hexaio::input::InputAggregator;

use compositor::{Framebuffer, World};
use socket::Listener;
use window::Rect;

const SOCKET_PATH: &str = "/comm/wndsrv";
const FRAMEBUFFER_PATH: &str = "/device/fb0";
const FRAME_INTERVAL: Duration = Duration::from_micros(16_666); // ~60 Hz

/// The kernel's linear framebuffer, memory-mapped once at startup; `blit` walks the
/// damaged region row by row using the caller-supplied source stride.
struct DeviceFramebuffer {
    fd: RawFd,
    ptr: *mut u8,
    width: u32,
    height: u32,
    stride: usize,
}

unsafe impl Send for DeviceFramebuffer {}

impl DeviceFramebuffer {
    fn open(path: &str, width: u32, height: u32) -> Option<Self> {
        let stride = 4 * width as usize;
        let len = stride * height as usize;
        let cpath = CString::new(path).ok()?;
        let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return None;
        }
        let ptr = unsafe {
            libc::mmap(std::ptr::null_mut(), len, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0)
        };
        if ptr == libc::MAP_FAILED {
            unsafe { libc::close(fd) };
            return None;
        }
        Some(Self { fd, ptr: ptr.cast::<u8>(), width, height, stride })
    }
}

impl Drop for DeviceFramebuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.stride * self.height as usize);
            libc::close(self.fd);
        }
    }
}

impl Framebuffer for DeviceFramebuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn blit(&mut self, dst_rect: Rect, src: &[u8], src_stride: usize) {
        if dst_rect.x < 0 || dst_rect.y < 0 {
            return;
        }
        let row_bytes = (4 * dst_rect.w as usize).min(src_stride);
        for row in 0..dst_rect.h as usize {
            let src_off = row * src_stride;
            if src_off + row_bytes > src.len() {
                break;
            }
            let dst_off = (dst_rect.y as usize + row) * self.stride + dst_rect.x as usize * 4;
            if dst_off + row_bytes > self.stride * self.height as usize {
                continue;
            }
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src[src_off..].as_ptr(),
                    self.ptr.add(dst_off),
                    row_bytes,
                );
            }
        }
    }
}

fn main() {
    hexaio::info!("celestial", "starting window server");

    let input = InputAggregator::init().expect("PS/2 controller bring-up failed");
    let listener = Listener::bind(SOCKET_PATH, 16).expect("failed to bind compositor socket");

    // A conservative default until the real mode-setting handshake is wired in; matches
    // the resolution the bootloader hands off on the reference hardware.
    let (screen_w, screen_h) = (1024, 768);
    let mut fb = DeviceFramebuffer::open(FRAMEBUFFER_PATH, screen_w as u32, screen_h as u32)
        .expect("failed to map framebuffer device");

    let mut world = World::new(listener, screen_w, screen_h);

    loop {
        world.run_frame(&input, &mut fb);
        thread::sleep(FRAME_INTERVAL);
    }
}
