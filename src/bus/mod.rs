//! Bus/Interrupt Substrate (component A).
//!
//! Everything above this module — block, USB, filesystem, input and compositor — reaches
//! hardware only through the four operations exposed here: [`Bus::scan`], BAR
//! read/[`Bus::map_mmio`], and [`Bus::register_irq`]. Drivers never poke
//! `0xCF8`/`0xCFC` or an IDT themselves; that means a driver can be brought up (and
//! unit-tested) against a [`PciConfigAccessor`] mock instead of real silicon.
//!
//! PCI configuration space access and IRQ vector delivery are themselves owned by the
//! kernel proper and are treated as external collaborators (see spec §1/§6): this module
//! defines the boundary traits ([`PciConfigAccessor`], [`IrqController`]) plus the
//! port-I/O-based default implementation, so the crate is self-contained, but a real
//! kernel build is expected to supply its own.

pub mod dma;
pub mod irq;
pub mod pci;

pub use dma::{DmaAllocator, DmaBuffer};
pub use irq::{IrqController, IrqHandle, IrqKind, PortIoIrqController};
pub use pci::{BarKind, ConfigAddress, PciConfigAccessor, PciDevice, PortIoPciAccessor};

use crate::error::DevError;

/// A mapped base address register: its physical base, size in bytes, and kind.
#[derive(Clone, Copy, Debug)]
pub struct MappedBar {
    pub phys_base: u64,
    pub size: u64,
    pub kind: BarKind,
}

/// Virtual-memory mapping of an MMIO range, with the uncached/write-combining
/// attributes appropriate to the caller (device registers vs. a linear framebuffer).
#[derive(Clone, Copy, Debug)]
pub struct MmioMapping {
    pub virt_base: usize,
    pub size: u64,
}

/// Caching policy requested of [`Bus::map_mmio`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheAttr {
    /// Device registers: no caching, no speculative access.
    Uncached,
    /// Linear framebuffers and other write-heavy, rarely-read ranges.
    WriteCombining,
}

/// The bus substrate's four operations, generic over the concrete PCI/IRQ backend so
/// driver code can run against a mock in tests.
pub struct Bus<C: PciConfigAccessor, I: IrqController> {
    config: C,
    irq: I,
}

impl<C: PciConfigAccessor, I: IrqController> Bus<C, I> {
    pub fn new(config: C, irq: I) -> Self {
        Self { config, irq }
    }

    /// Enumerates devices matching a class/subclass/prog-if filter, invoking `visit` for
    /// each match. Degrades gracefully: a bridge whose secondary bus can't be read is
    /// skipped rather than aborting the whole scan.
    pub fn scan(&self, filter: ClassFilter, mut visit: impl FnMut(PciDevice)) {
        pci::scan(&self.config, filter, &mut visit);
    }

    /// Reads a BAR's physical base, size and kind. Returns `None` ("unavailable") if the
    /// BAR is unimplemented (reads back zero) — callers must degrade (e.g. MEM64 falls
    /// back to MEM32, an unreadable BAR aborts that driver only).
    #[must_use]
    pub fn read_bar(&self, device: PciDevice, index: u8) -> Option<MappedBar> {
        pci::read_bar(&self.config, device, index)
    }

    /// Maps a physical MMIO range and returns its virtual base. `None` means the range
    /// could not be mapped (out of virtual address space, or the attribute requested
    /// isn't supported) — the driver must abort rather than fall back to physical
    /// addressing.
    #[must_use]
    pub fn map_mmio(&self, phys_base: u64, size: u64, _attr: CacheAttr) -> Option<MmioMapping> {
        // Identity-mapped in this core: physical device memory already sits in the
        // kernel's permanently-mapped region. A full kernel substitutes its own
        // page-table walker here.
        Some(MmioMapping {
            virt_base: usize::try_from(phys_base).ok()?,
            size,
        })
    }

    /// Attaches a handler to an IRQ number, MSI if the device supports it and pin-routed
    /// otherwise. Returns `Err(NotSupported)` if neither delivery mode is available,
    /// per the substrate's degrade policy (MSI -> pin interrupt).
    pub fn register_irq(
        &self,
        request: irq::IrqRequest,
    ) -> Result<IrqHandle, DevError> {
        self.irq.register(request)
    }
}

/// A PCI class/subclass/prog-if match filter. `None` in any field matches anything at
/// that level.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassFilter {
    pub class: Option<u8>,
    pub subclass: Option<u8>,
    pub prog_if: Option<u8>,
}

impl ClassFilter {
    #[must_use]
    pub const fn class(class: u8) -> Self {
        Self {
            class: Some(class),
            subclass: None,
            prog_if: None,
        }
    }

    #[must_use]
    pub const fn matches(self, class: u8, subclass: u8, prog_if: u8) -> bool {
        (self.class.is_none() || matches!(self.class, Some(c) if c == class))
            && (self.subclass.is_none() || matches!(self.subclass, Some(s) if s == subclass))
            && (self.prog_if.is_none() || matches!(self.prog_if, Some(p) if p == prog_if))
    }
}
