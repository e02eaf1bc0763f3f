//! Device I/O core for the Hexahedron/Ethereal kernel.
//!
//! Seven components, leaves first: [`bus`] (A) underlies everything; [`block`] (B) and
//! [`usb`] (C) sit on top of it; [`fs`] (D, plus the [`fs::vfs`] gateway, E) sits on
//! [`block`]; [`input`] (F) decodes PS/2 bytes into structured events. The window
//! compositor (G, "Celestial") is a separate userspace binary crate (`src/celestial`)
//! that consumes this library's decoded input events and VFS nodes rather than living
//! inside it — see that crate's own module docs.
#![allow(dead_code)]
#![no_std]

pub mod block;
pub mod bus;
pub mod clock;
pub mod drivers;
pub mod error;
#[cfg(feature = "alloc")]
pub mod fs;
#[cfg(feature = "alloc")]
pub mod input;
pub mod io;
pub mod log;
pub mod usb;

#[cfg(feature = "alloc")]
extern crate alloc;

extern crate rlibc;
