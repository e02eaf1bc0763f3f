//! NVMe engine (§4.B): controller bring-up, one I/O queue pair, and the uniform
//! [`crate::block::BlockDevice`] contract over the enumerated namespaces.

pub mod identify;
pub mod queue;
pub mod regs;

use alloc::sync::Arc;
use alloc::vec::Vec;

use self::identify::{parse_active_namespace_list, parse_controller_identity, parse_namespace_geometry, IDENTIFY_DATA_SIZE};
use self::queue::{doorbell_offset, CqEntry, QueuePair, SqEntry};
use self::regs::NvmeRegs;
use crate::block::{BlockDevice, BlockIdentity};
use crate::bus::{DmaAllocator, DmaBuffer};
use crate::clock::Deadline;
use crate::error::DevError;
use crate::io::mmio::MmioRegion;

const ADMIN_QUEUE_DEPTH: u16 = 32;
const IO_QUEUE_DEPTH: u16 = 64;
const PAGE_SIZE: usize = 4096;
const RESET_TIMEOUT_US: u64 = 5_000_000;
const COMMAND_TIMEOUT_US: u64 = 2_000_000;

mod admin_opcode {
    pub const CREATE_CQ: u8 = 0x05;
    pub const CREATE_SQ: u8 = 0x01;
    pub const IDENTIFY: u8 = 0x06;
}

mod nvm_opcode {
    pub const WRITE: u8 = 0x01;
    pub const READ: u8 = 0x02;
}

mod cns {
    pub const NAMESPACE: u32 = 0x00;
    pub const CONTROLLER: u32 = 0x01;
    pub const ACTIVE_NAMESPACE_LIST: u32 = 0x02;
}

/// Geometry and identity for one enumerated namespace, discovered during bring-up.
#[derive(Clone)]
struct NamespaceInfo {
    nsid: u32,
    sector_size: u32,
    sectors: u64,
}

/// A bring-up NVMe controller: admin queue plus one I/O queue pair, and the namespace
/// table discovered during §4.B step 6.
pub struct NvmeController<'a> {
    mmio: MmioRegion<NvmeRegs>,
    dstrd: u8,
    allocator: &'a dyn DmaAllocator,
    admin_q: QueuePair,
    io_q: QueuePair,
    identity: BlockIdentity,
    namespaces: Vec<NamespaceInfo>,
}

// SAFETY: all mutable state behind `mmio`/`admin_q`/`io_q` is either single-register
// volatile access or internally synchronized (`QueuePair` carries its own locks).
unsafe impl<'a> Send for NvmeController<'a> {}
unsafe impl<'a> Sync for NvmeController<'a> {}

impl<'a> NvmeController<'a> {
    /// Runs the full bring-up sequence from §4.B: reset, admin queue creation,
    /// controller enable, identify, one I/O queue pair, namespace enumeration. Returns
    /// the controller behind an `Arc` so [`NvmeController::open_namespace`] can hand out
    /// namespaces that outlive any one stack frame without a self-referential pointer.
    pub fn bring_up(mut mmio: MmioRegion<NvmeRegs>, allocator: &'a dyn DmaAllocator) -> Result<Arc<Self>, DevError> {
        reset_controller(&mut mmio)?;

        let cap = mmio.regs().cap.read();
        let dstrd = regs::cap::doorbell_stride(cap);

        let admin_q = QueuePair::new(0, ADMIN_QUEUE_DEPTH, dstrd, allocator)?;
        mmio.regs_mut().aqa.write(regs::aqa_value(ADMIN_QUEUE_DEPTH, ADMIN_QUEUE_DEPTH));
        mmio.regs_mut().asq.write(admin_q.submission_phys_addr());
        mmio.regs_mut().acq.write(admin_q.completion_phys_addr());

        mmio.regs_mut().cc.write(regs::cc::build(0, 6, 4));
        wait_ready(&mut mmio, true)?;

        let admin_sq_doorbell = unsafe { mmio.at_offset::<u32>(doorbell_offset(0, false, dstrd)) };
        let admin_cq_doorbell = unsafe { mmio.at_offset::<u32>(doorbell_offset(0, true, dstrd)) };

        let controller_identity_buf = allocator.alloc(IDENTIFY_DATA_SIZE)?;
        identify(&admin_q, admin_sq_doorbell, admin_cq_doorbell, cns::CONTROLLER, 0, &controller_identity_buf)?;
        let controller_identity = parse_controller_identity(&read_identity_bytes(&controller_identity_buf));
        allocator.free(controller_identity_buf);

        let io_q = QueuePair::new(1, IO_QUEUE_DEPTH, dstrd, allocator)?;
        create_io_completion_queue(&admin_q, admin_sq_doorbell, admin_cq_doorbell, &io_q)?;
        create_io_submission_queue(&admin_q, admin_sq_doorbell, admin_cq_doorbell, &io_q)?;

        let namespace_list_buf = allocator.alloc(IDENTIFY_DATA_SIZE)?;
        identify(&admin_q, admin_sq_doorbell, admin_cq_doorbell, cns::ACTIVE_NAMESPACE_LIST, 0, &namespace_list_buf)?;
        let nsids = parse_active_namespace_list(&read_identity_bytes(&namespace_list_buf));
        allocator.free(namespace_list_buf);

        let mut namespaces = Vec::with_capacity(nsids.len());
        for nsid in nsids {
            let ns_buf = allocator.alloc(IDENTIFY_DATA_SIZE)?;
            identify(&admin_q, admin_sq_doorbell, admin_cq_doorbell, cns::NAMESPACE, nsid, &ns_buf)?;
            let geometry = parse_namespace_geometry(&read_identity_bytes(&ns_buf));
            allocator.free(ns_buf);
            namespaces.push(NamespaceInfo {
                nsid,
                sector_size: geometry.sector_size,
                sectors: geometry.sectors,
            });
        }

        Ok(Arc::new(Self {
            mmio,
            dstrd,
            allocator,
            admin_q,
            io_q,
            identity: BlockIdentity {
                model: controller_identity.model_number,
                serial: controller_identity.serial_number,
                firmware: controller_identity.firmware_revision,
            },
            namespaces,
        }))
    }

    /// Namespace IDs discovered during bring-up, in enumeration order.
    #[must_use]
    pub fn namespace_ids(&self) -> Vec<u32> {
        self.namespaces.iter().map(|n| n.nsid).collect()
    }

    /// Opens a namespace for block I/O. `self` must be the `Arc` returned by
    /// [`NvmeController::bring_up`] — the namespace holds a clone, so it can outlive the
    /// call site that discovered it.
    #[must_use]
    pub fn open_namespace(self: &Arc<Self>, nsid: u32) -> Option<NvmeNamespace> {
        let info = self.namespaces.iter().find(|n| n.nsid == nsid)?.clone();
        Some(NvmeNamespace {
            controller: self.clone(),
            nsid: info.nsid,
            sector_size: info.sector_size,
            sectors: info.sectors,
        })
    }
}

fn reset_controller(mmio: &mut MmioRegion<NvmeRegs>) -> Result<(), DevError> {
    let cc = mmio.regs().cc.read();
    if cc & regs::cc::EN != 0 {
        wait_ready(mmio, true)?;
        mmio.regs_mut().cc.write(cc & !regs::cc::EN);
        wait_ready(mmio, false)?;
    }
    Ok(())
}

fn wait_ready(mmio: &mut MmioRegion<NvmeRegs>, want_ready: bool) -> Result<(), DevError> {
    let deadline = Deadline::after_micros(RESET_TIMEOUT_US);
    crate::clock::poll_until(deadline, || {
        let ready = mmio.regs().csts.read() & regs::csts::RDY != 0;
        (ready == want_ready).then_some(())
    })
    .ok_or(DevError::TimedOut)
}

fn identify(
    admin_q: &QueuePair,
    sq_doorbell: *mut u32,
    cq_doorbell: *mut u32,
    cns: u32,
    nsid: u32,
    buffer: &DmaBuffer,
) -> Result<(), DevError> {
    let mut entry = SqEntry::new(admin_opcode::IDENTIFY, 0, nsid);
    entry.prp1 = buffer.phys_addr();
    entry.cdw10 = cns;
    complete_admin_command(admin_q, entry, sq_doorbell, cq_doorbell)
}

fn create_io_completion_queue(
    admin_q: &QueuePair,
    sq_doorbell: *mut u32,
    cq_doorbell: *mut u32,
    io_q: &QueuePair,
) -> Result<(), DevError> {
    let mut entry = SqEntry::new(admin_opcode::CREATE_CQ, 0, 0);
    entry.prp1 = io_q.completion_phys_addr();
    entry.cdw10 = u32::from(io_q.id()) | (u32::from(io_q.depth() - 1) << 16);
    entry.cdw11 = 1; // physically contiguous, interrupts enabled on vector 0
    complete_admin_command(admin_q, entry, sq_doorbell, cq_doorbell)
}

fn create_io_submission_queue(
    admin_q: &QueuePair,
    sq_doorbell: *mut u32,
    cq_doorbell: *mut u32,
    io_q: &QueuePair,
) -> Result<(), DevError> {
    let mut entry = SqEntry::new(admin_opcode::CREATE_SQ, 0, 0);
    entry.prp1 = io_q.submission_phys_addr();
    entry.cdw10 = u32::from(io_q.id()) | (u32::from(io_q.depth() - 1) << 16);
    entry.cdw11 = (u32::from(io_q.id()) << 16) | 1; // bound to matching CQ, contiguous
    complete_admin_command(admin_q, entry, sq_doorbell, cq_doorbell)
}

fn complete_admin_command(
    admin_q: &QueuePair,
    entry: SqEntry,
    sq_doorbell: *mut u32,
    cq_doorbell: *mut u32,
) -> Result<(), DevError> {
    let completion = admin_q.submit_and_wait(entry, sq_doorbell, cq_doorbell, Deadline::after_micros(COMMAND_TIMEOUT_US))?;
    check_completion(completion)
}

fn check_completion(completion: CqEntry) -> Result<(), DevError> {
    if completion.status_code() == 0 {
        Ok(())
    } else {
        Err(DevError::Io)
    }
}

fn read_identity_bytes(buffer: &DmaBuffer) -> [u8; IDENTIFY_DATA_SIZE] {
    let mut out = [0u8; IDENTIFY_DATA_SIZE];
    out.copy_from_slice(buffer.as_slice());
    out
}

/// An enumerated namespace, ready for block I/O. Holds a clone of the controller's
/// `Arc`, so it can be handed to a mount or device registry independent of the
/// controller's own owner.
pub struct NvmeNamespace<'a> {
    controller: Arc<NvmeController<'a>>,
    nsid: u32,
    sector_size: u32,
    sectors: u64,
}

/// A borrowed caller buffer, read or written a sub-request at a time.
enum TransferBuf<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl<'a> TransferBuf<'a> {
    fn slice(&self, offset: usize, len: usize) -> &[u8] {
        match self {
            TransferBuf::Read(b) => &b[offset..offset + len],
            TransferBuf::Write(b) => &b[offset..offset + len],
        }
    }

    fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        match self {
            TransferBuf::Read(b) => &mut b[offset..offset + len],
            TransferBuf::Write(_) => unreachable!("write-side transfers never write back into the caller buffer"),
        }
    }
}

impl<'a> NvmeNamespace<'a> {
    /// Splits the request into at-most-one-page sub-transfers (§4.B: "PRP1 only;
    /// PRP2/PRP lists are out of scope"), bouncing each sub-transfer through a single
    /// allocator-backed `DmaBuffer` — PRP1 must name a true physical address, and this
    /// crate never treats a caller's plain `&[u8]`/`&mut [u8]` pointer as one (see
    /// [`crate::bus::DmaBuffer`]'s own contract).
    fn transfer(&self, lba: u64, count: u16, write: bool, mut buf: TransferBuf<'_>) -> Result<u16, DevError> {
        let per_sub_request = (PAGE_SIZE / self.sector_size as usize).max(1) as u16;
        let mut remaining = count;
        let mut current_lba = lba;
        let mut byte_offset = 0usize;

        let sq_doorbell = unsafe {
            self.controller
                .mmio
                .at_offset::<u32>(doorbell_offset(self.controller.io_q.id(), false, self.controller.dstrd))
        };
        let cq_doorbell = unsafe {
            self.controller
                .mmio
                .at_offset::<u32>(doorbell_offset(self.controller.io_q.id(), true, self.controller.dstrd))
        };

        while remaining > 0 {
            let chunk = remaining.min(per_sub_request);
            let chunk_bytes = usize::from(chunk) * self.sector_size as usize;

            let mut bounce = self.controller.allocator.alloc(chunk_bytes)?;
            if write {
                bounce.as_mut_slice().copy_from_slice(buf.slice(byte_offset, chunk_bytes));
            }

            let mut entry = SqEntry::new(
                if write { nvm_opcode::WRITE } else { nvm_opcode::READ },
                0,
                self.nsid,
            );
            entry.prp1 = bounce.phys_addr();
            entry.cdw10 = current_lba as u32;
            entry.cdw11 = (current_lba >> 32) as u32;
            entry.cdw12 = u32::from(chunk - 1);

            let completion = self.controller.io_q.submit_and_wait(
                entry,
                sq_doorbell,
                cq_doorbell,
                Deadline::after_micros(COMMAND_TIMEOUT_US),
            );

            let result = completion.and_then(check_completion);
            if result.is_ok() && !write {
                buf.slice_mut(byte_offset, chunk_bytes).copy_from_slice(bounce.as_slice());
            }
            self.controller.allocator.free(bounce);
            result?;

            remaining -= chunk;
            current_lba += u64::from(chunk);
            byte_offset += chunk_bytes;
        }

        Ok(count)
    }
}

impl<'a> BlockDevice for NvmeNamespace<'a> {
    fn read_sectors(&self, lba: u64, count: u16, buf: &mut [u8]) -> Result<u16, DevError> {
        let needed = count as usize * self.sector_size as usize;
        if buf.len() < needed {
            return Err(DevError::InvalidArgument);
        }
        self.transfer(lba, count, false, TransferBuf::Read(buf))
    }

    fn write_sectors(&self, lba: u64, count: u16, buf: &[u8]) -> Result<u16, DevError> {
        let needed = count as usize * self.sector_size as usize;
        if buf.len() < needed {
            return Err(DevError::InvalidArgument);
        }
        self.transfer(lba, count, true, TransferBuf::Write(buf))
    }

    fn identity(&self) -> &BlockIdentity {
        &self.controller.identity
    }

    fn max_sector(&self) -> u64 {
        self.sectors
    }

    fn logical_sector_size(&self) -> u32 {
        self.sector_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_completion_maps_nonzero_status_to_io_error() {
        let ok = CqEntry {
            dw0: 0,
            _rsvd: 0,
            sq_head: 0,
            sq_id: 0,
            command_id: 0,
            status: 0,
        };
        assert!(check_completion(ok).is_ok());

        let failed = CqEntry { status: 1 << 1, ..ok };
        assert_eq!(check_completion(failed).unwrap_err(), DevError::Io);
    }
}
