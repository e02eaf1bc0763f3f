//! Submission/completion queue pairs and the submit-and-wait algorithm (§4.B).
//!
//! An `Arc`-shared inner cell with an atomic "has-completed" flag the IRQ-side drain
//! flips, and the caller spin-waits on it under a bounded deadline instead of
//! suspending. A queue pair never has more than one caller blocked on it at a time, so
//! this carries exactly one waiter slot rather than a per-command-id table.

use alloc::sync::Arc;
use bytemuck::{Pod, Zeroable};
use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use spin::Mutex;

use crate::bus::{DmaAllocator, DmaBuffer};
use crate::clock::{poll_until, Deadline};
use crate::error::DevError;
use crate::io::mmio::{vread, vwrite};

pub const SQ_ENTRY_SIZE: usize = 64;
pub const CQ_ENTRY_SIZE: usize = 16;

/// A 64-byte NVMe submission queue entry. Only PRP1 is populated; PRP2/PRP lists are
/// out of scope (§4.B: "PRP1 only").
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct SqEntry {
    pub cdw0: u32,
    pub nsid: u32,
    _rsvd: u64,
    pub mptr: u64,
    pub prp1: u64,
    pub prp2: u64,
    pub cdw10: u32,
    pub cdw11: u32,
    pub cdw12: u32,
    pub cdw13: u32,
    pub cdw14: u32,
    pub cdw15: u32,
}

impl SqEntry {
    #[must_use]
    pub fn new(opcode: u8, command_id: u16, nsid: u32) -> Self {
        Self {
            cdw0: u32::from(opcode) | (u32::from(command_id) << 16),
            nsid,
            ..Self::zeroed()
        }
    }
}

/// A 16-byte NVMe completion queue entry.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct CqEntry {
    pub dw0: u32,
    _rsvd: u32,
    pub sq_head: u16,
    pub sq_id: u16,
    pub command_id: u16,
    pub status: u16,
}

impl CqEntry {
    #[must_use]
    pub fn phase(self) -> bool {
        self.status & 1 != 0
    }

    #[must_use]
    pub fn status_code(self) -> u16 {
        (self.status >> 1) & 0x7FFF
    }
}

#[must_use]
pub fn doorbell_offset(qid: u16, is_completion: bool, dstrd: u8) -> usize {
    super::regs::DOORBELL_BASE
        + (2 * usize::from(qid) + usize::from(is_completion)) * (4 << dstrd)
}

struct WaiterInner {
    done: AtomicBool,
    completion: Mutex<Option<CqEntry>>,
}

/// A queue pair: one submission ring, one completion ring, sharing a doorbell stride.
pub struct QueuePair {
    id: u16,
    depth: u16,
    dstrd: u8,
    sq: DmaBuffer,
    cq: DmaBuffer,
    sq_tail: AtomicU16,
    cq_head: Mutex<u16>,
    cq_phase: AtomicBool,
    submit_lock: Mutex<()>,
    next_command_id: AtomicU16,
    waiter: Mutex<Option<Arc<WaiterInner>>>,
}

impl QueuePair {
    /// Allocates a queue pair of `depth` entries each. `id` is 0 for the admin queue.
    pub fn new(id: u16, depth: u16, dstrd: u8, allocator: &dyn DmaAllocator) -> Result<Self, DevError> {
        let sq = allocator.alloc(usize::from(depth) * SQ_ENTRY_SIZE)?;
        let cq = allocator.alloc(usize::from(depth) * CQ_ENTRY_SIZE)?;
        Ok(Self {
            id,
            depth,
            dstrd,
            sq,
            cq,
            sq_tail: AtomicU16::new(0),
            cq_head: Mutex::new(0),
            cq_phase: AtomicBool::new(true),
            submit_lock: Mutex::new(()),
            next_command_id: AtomicU16::new(0),
            waiter: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn submission_phys_addr(&self) -> u64 {
        self.sq.phys_addr()
    }

    #[must_use]
    pub fn completion_phys_addr(&self) -> u64 {
        self.cq.phys_addr()
    }

    #[must_use]
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Copies `entry` into the tail SQ slot, advances the tail, rings the doorbell, and
    /// blocks (bounded by `deadline`) until the IRQ-side drain reports a matching
    /// completion. Returns `Err(TimedOut)` on deadline expiry — the caller must not
    /// reuse the command id afterward (§4.B: "the caller is responsible for not reusing
    /// the slot").
    pub fn submit_and_wait(
        &self,
        mut entry: SqEntry,
        doorbell_sq: *mut u32,
        doorbell_cq: *mut u32,
        deadline: Deadline,
    ) -> Result<CqEntry, DevError> {
        let _guard = self.submit_lock.lock();
        let command_id = self.next_command_id.fetch_add(1, Ordering::Relaxed);
        entry.cdw0 = (entry.cdw0 & 0xFFFF) | (u32::from(command_id) << 16);

        let waiter = Arc::new(WaiterInner {
            done: AtomicBool::new(false),
            completion: Mutex::new(None),
        });
        *self.waiter.lock() = Some(waiter.clone());

        let tail = self.sq_tail.load(Ordering::Relaxed);
        unsafe {
            let slot = self
                .sq
                .as_ptr()
                .cast::<SqEntry>()
                .add(usize::from(tail))
                .cast_mut();
            vwrite(slot, entry);
        }
        let next_tail = (tail + 1) % self.depth;
        self.sq_tail.store(next_tail, Ordering::Relaxed);
        unsafe {
            vwrite(doorbell_sq, u32::from(next_tail));
        }

        let result = poll_until(deadline, || {
            self.drain_completions(doorbell_cq);
            waiter
                .done
                .load(Ordering::Acquire)
                .then(|| waiter.completion.lock().take())
                .flatten()
        });

        *self.waiter.lock() = None;
        result.ok_or(DevError::TimedOut)
    }

    /// Drains completion entries matching the current phase, handing the first one to
    /// the registered waiter (the single-outstanding invariant means there is at most
    /// one to hand off). Rings the CQ head doorbell once at the end, per §4.B.
    pub fn drain_completions(&self, doorbell_cq: *mut u32) {
        let mut head = self.cq_head.lock();
        let mut phase = self.cq_phase.load(Ordering::Relaxed);
        let mut advanced = false;

        loop {
            let entry: CqEntry = unsafe { vread(self.cq.as_ptr().cast::<CqEntry>().add(usize::from(*head))) };
            if entry.phase() != phase {
                break;
            }
            advanced = true;
            if let Some(waiter) = self.waiter.lock().as_ref() {
                *waiter.completion.lock() = Some(entry);
                waiter.done.store(true, Ordering::Release);
            }

            *head = (*head + 1) % self.depth;
            if *head == 0 {
                phase = !phase;
            }
        }

        if advanced {
            self.cq_phase.store(phase, Ordering::Relaxed);
            unsafe {
                vwrite(doorbell_cq, u32::from(*head));
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doorbell_offsets_follow_stride() {
        assert_eq!(doorbell_offset(0, false, 0), 0x1000);
        assert_eq!(doorbell_offset(0, true, 0), 0x1004);
        assert_eq!(doorbell_offset(1, false, 0), 0x1008);
        assert_eq!(doorbell_offset(1, false, 1), 0x1010);
    }

    #[test]
    fn completion_phase_bit_is_lowest_status_bit() {
        let entry = CqEntry {
            dw0: 0,
            _rsvd: 0,
            sq_head: 0,
            sq_id: 0,
            command_id: 0,
            status: 0b11,
        };
        assert!(entry.phase());
        assert_eq!(entry.status_code(), 1);
    }
}
