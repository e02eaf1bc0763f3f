//! TRB rings (§3, §9): command/transfer rings share cycle-bit/LINK-TRB semantics; the
//! event ring is dequeued by software against a controller-advanced enqueue pointer.
//!
//! Per the design notes, a ring is modeled as a fixed-size array of POD records plus an
//! owned index and an explicit cycle byte — never a linked list of heap nodes, since the
//! controller walks physical memory, not Rust references.

use bytemuck::{Pod, Zeroable};

use crate::bus::{DmaAllocator, DmaBuffer};
use crate::error::DevError;
use crate::io::mmio::{vread, vwrite};

pub const TRB_SIZE: usize = 16;

/// Control-field TRB type codes used by the command/transfer/event paths this core
/// exercises (xHCI spec table 6.5).
pub mod trb_type {
    pub const NORMAL: u8 = 1;
    pub const SETUP_STAGE: u8 = 2;
    pub const DATA_STAGE: u8 = 3;
    pub const STATUS_STAGE: u8 = 4;
    pub const LINK: u8 = 6;
    pub const ENABLE_SLOT: u8 = 9;
    pub const ADDRESS_DEVICE: u8 = 11;
    pub const CONFIGURE_ENDPOINT: u8 = 12;
    pub const EVALUATE_CONTEXT: u8 = 13;
    pub const TRANSFER_EVENT: u8 = 32;
    pub const COMMAND_COMPLETION_EVENT: u8 = 33;
    pub const PORT_STATUS_CHANGE_EVENT: u8 = 34;
}

const CYCLE_BIT: u32 = 1 << 0;
const TOGGLE_CYCLE_BIT: u32 = 1 << 1;
const IOC_BIT: u32 = 1 << 5;
const IDT_BIT: u32 = 1 << 6;

/// A 16-byte TRB: one command, transfer descriptor fragment, or event.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct Trb {
    pub parameter: u64,
    pub status: u32,
    pub control: u32,
}

impl Trb {
    #[must_use]
    pub fn new(trb_type: u8, parameter: u64, status: u32) -> Self {
        Self {
            parameter,
            status,
            control: (u32::from(trb_type)) << 10,
        }
    }

    #[must_use]
    pub fn cycle(self) -> bool {
        self.control & CYCLE_BIT != 0
    }

    fn with_cycle(mut self, cycle: bool) -> Self {
        self.control = (self.control & !CYCLE_BIT) | u32::from(cycle);
        self
    }

    #[must_use]
    pub fn trb_type(self) -> u8 {
        ((self.control >> 10) & 0x3F) as u8
    }

    #[must_use]
    pub fn with_ioc(mut self) -> Self {
        self.control |= IOC_BIT;
        self
    }

    #[must_use]
    pub fn with_idt(mut self) -> Self {
        self.control |= IDT_BIT;
        self
    }

    #[must_use]
    pub fn with_trt(mut self, trt: u8) -> Self {
        self.control |= u32::from(trt) << 16;
        self
    }

    #[must_use]
    pub fn completion_code(self) -> u8 {
        (self.status >> 24) as u8
    }

    #[must_use]
    pub fn slot_id(self) -> u8 {
        (self.control >> 24) as u8
    }

    #[must_use]
    pub fn endpoint_id(self) -> u8 {
        ((self.control >> 16) & 0x1F) as u8
    }

    fn link(target_phys: u64) -> Self {
        let mut trb = Trb::new(trb_type::LINK, target_phys, 0);
        trb.control |= TOGGLE_CYCLE_BIT;
        trb
    }
}

/// Completion status code 1 ("Success") per the xHCI spec's TRB Completion Code table.
pub const COMPLETION_SUCCESS: u8 = 1;

/// A host-produced ring (command ring or a transfer ring): software owns the enqueue
/// pointer and cycle bit; the last slot is a LINK TRB that wraps the index and flips the
/// cycle (§3).
pub struct ProducerRing {
    buf: DmaBuffer,
    capacity: usize,
    enqueue: usize,
    cycle: bool,
}

impl ProducerRing {
    /// Allocates a ring of `capacity` TRB slots, the last reserved for the LINK TRB that
    /// points back at slot 0 with the toggle-cycle bit set.
    pub fn new(capacity: usize, allocator: &dyn DmaAllocator) -> Result<Self, DevError> {
        if capacity < 2 {
            return Err(DevError::InvalidArgument);
        }
        let buf = allocator.alloc(capacity * TRB_SIZE)?;
        let mut ring = Self {
            buf,
            capacity,
            enqueue: 0,
            cycle: true,
        };
        let base = ring.buf.phys_addr();
        unsafe { vwrite(ring.slot_ptr(capacity - 1), Trb::link(base)) };
        Ok(ring)
    }

    #[must_use]
    pub fn phys_addr(&self) -> u64 {
        self.buf.phys_addr()
    }

    #[must_use]
    pub fn cycle(&self) -> bool {
        self.cycle
    }

    fn slot_ptr(&self, index: usize) -> *mut Trb {
        unsafe { self.buf.as_ptr().cast::<Trb>().add(index).cast_mut() }
    }

    fn slot_phys(&self, index: usize) -> u64 {
        self.buf.phys_addr_at(index * TRB_SIZE)
    }

    /// Writes `trb` into the tail slot stamped with the ring's current cycle bit,
    /// advances the enqueue index, and — on reaching the LINK TRB — stamps it with the
    /// current cycle and flips the ring's cycle before wrapping to slot 0. Returns the
    /// physical address the TRB was written at, used to correlate a command completion
    /// event back to its submitter.
    pub fn enqueue(&mut self, trb: Trb) -> u64 {
        let phys = self.slot_phys(self.enqueue);
        unsafe { vwrite(self.slot_ptr(self.enqueue), trb.with_cycle(self.cycle)) };
        self.enqueue += 1;

        if self.enqueue == self.capacity - 1 {
            let link = unsafe { vread(self.slot_ptr(self.capacity - 1)) }.with_cycle(self.cycle);
            unsafe { vwrite(self.slot_ptr(self.capacity - 1), link) };
            self.enqueue = 0;
            self.cycle = !self.cycle;
        }
        phys
    }
}

/// A controller-produced ring (the primary event ring): software owns only the dequeue
/// pointer and cycle bit; the controller advances its own enqueue pointer. Ownership of
/// a slot is decided by matching cycle bits, not a LINK TRB (§3).
pub struct EventRing {
    buf: DmaBuffer,
    capacity: usize,
    dequeue: usize,
    cycle: bool,
}

impl EventRing {
    pub fn new(capacity: usize, allocator: &dyn DmaAllocator) -> Result<Self, DevError> {
        let buf = allocator.alloc(capacity * TRB_SIZE)?;
        Ok(Self {
            buf,
            capacity,
            dequeue: 0,
            cycle: true,
        })
    }

    #[must_use]
    pub fn phys_addr(&self) -> u64 {
        self.buf.phys_addr()
    }

    fn slot_ptr(&self, index: usize) -> *const Trb {
        unsafe { self.buf.as_ptr().cast::<Trb>().add(index) }
    }

    /// Returns the next unclaimed TRB (cycle bit matches the local cycle) and advances
    /// the dequeue pointer, flipping the local cycle on wrap. `None` means the ring is
    /// caught up with the controller.
    pub fn poll(&mut self) -> Option<Trb> {
        let trb: Trb = unsafe { vread(self.slot_ptr(self.dequeue)) };
        if trb.cycle() != self.cycle {
            return None;
        }
        self.dequeue += 1;
        if self.dequeue == self.capacity {
            self.dequeue = 0;
            self.cycle = !self.cycle;
        }
        Some(trb)
    }

    /// Physical address of the current dequeue slot, written back to ERDP after a
    /// batch of polls (§4.C: "one MMIO write").
    #[must_use]
    pub fn dequeue_phys(&self) -> u64 {
        self.buf.phys_addr_at(self.dequeue * TRB_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::dma::test_support::test_allocator;

    #[test]
    fn link_trb_toggles_cycle_and_wraps_enqueue() {
        let allocator = test_allocator();
        let mut ring = ProducerRing::new(4, &allocator).unwrap();
        assert!(ring.cycle());

        ring.enqueue(Trb::new(trb_type::NORMAL, 0, 0));
        ring.enqueue(Trb::new(trb_type::NORMAL, 0, 0));
        assert!(ring.cycle());

        // Third enqueue lands in the last usable slot (index 2 of 4), which triggers
        // the LINK-TRB wrap and flips the producer cycle bit (§8 property 6).
        ring.enqueue(Trb::new(trb_type::NORMAL, 0, 0));
        assert!(!ring.cycle());
        assert_eq!(ring.enqueue, 0);

        let link = unsafe { vread(ring.slot_ptr(3)) };
        assert_eq!(link.trb_type(), trb_type::LINK);
        assert!(!link.cycle());
    }

    #[test]
    fn event_ring_only_yields_matching_cycle() {
        let allocator = test_allocator();
        let mut events = EventRing::new(2, &allocator).unwrap();
        assert!(events.poll().is_none());

        let trb = Trb::new(trb_type::TRANSFER_EVENT, 0, 0).with_cycle_for_test(true);
        unsafe { vwrite(events.slot_ptr(0).cast_mut(), trb) };
        let polled = events.poll().expect("cycle matches, TRB should be visible");
        assert_eq!(polled.trb_type(), trb_type::TRANSFER_EVENT);
        assert!(events.poll().is_none());
    }

    impl Trb {
        fn with_cycle_for_test(self, cycle: bool) -> Self {
            self.with_cycle(cycle)
        }
    }
}
