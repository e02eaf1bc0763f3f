//! xHCI host controller (§4.C): reset/bring-up, port enumeration, six-step device
//! bring-up, control transfers, and the event-ring poller.

pub mod context;
pub mod regs;
pub mod ring;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use self::context::{endpoint_context_index, EndpointContext, InputContext, OutputContext, SlotContext};
use self::ring::{trb_type, EventRing, ProducerRing, Trb, COMPLETION_SUCCESS};
use crate::bus::{DmaAllocator, DmaBuffer};
use crate::clock::{poll_until, Deadline};
use crate::error::DevError;
use crate::io::mmio::MmioRegion;
use crate::usb::{DeviceDescriptor, Direction, EndpointType, SetupPacket, UsbSpeed};

const COMMAND_RING_TRBS: usize = 64;
const TRANSFER_RING_TRBS: usize = 64;
const EVENT_RING_TRBS: usize = 64;
const RESET_TIMEOUT_US: u64 = 1_000_000;
const COMMAND_TIMEOUT_US: u64 = 2_000_000;
const PORT_RESET_TIMEOUT_US: u64 = 200_000;

/// Identifies who is waiting for a given event-ring TRB: a command submitter (keyed by
/// the physical address its command TRB was enqueued at) or a transfer submitter
/// (keyed by slot+endpoint, per §4.C's poller classification rules).
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
enum WaitKey {
    Command(u64),
    Transfer(u8, u8),
}

struct Waiter {
    done: AtomicBool,
    completion: Mutex<Option<Trb>>,
}

/// Per-slot state: the output device context, its transfer rings (one per active
/// endpoint, EP0 included), and the slot's doorbell target mapping.
struct SlotState {
    transfer_rings: BTreeMap<u8, ProducerRing>,
}

/// A bring-up xHCI controller.
pub struct XhciController<'a> {
    cap: MmioRegion<regs::CapabilityRegs>,
    op: *mut regs::OperationalRegs,
    doorbells: *mut u32,
    interrupter0: *mut regs::InterrupterRegs,
    port_base: *mut regs::PortRegs,
    allocator: &'a dyn DmaAllocator,
    max_slots: u8,
    max_ports: u8,
    dcbaa: DmaBuffer,
    _scratchpad_array: Option<DmaBuffer>,
    _scratchpad_buffers: Vec<DmaBuffer>,
    command_ring: Mutex<ProducerRing>,
    event_ring: Mutex<EventRing>,
    _erst: DmaBuffer,
    waiters: Mutex<BTreeMap<WaitKey, Arc<Waiter>>>,
    slots: Mutex<BTreeMap<u8, SlotState>>,
}

// SAFETY: register access is volatile and single-word; rings/waiters/slots carry their
// own locks.
unsafe impl<'a> Send for XhciController<'a> {}
unsafe impl<'a> Sync for XhciController<'a> {}

impl<'a> XhciController<'a> {
    /// Runs the bring-up sequence from §4.C steps 1-6: reset, slot/DCBAA sizing,
    /// scratchpad buffers, command ring, primary event ring, then run.
    pub fn bring_up(cap: MmioRegion<regs::CapabilityRegs>, allocator: &'a dyn DmaAllocator) -> Result<Self, DevError> {
        let cap_length = regs::cap_length::offset(cap.regs().cap_length_and_version.read());
        let op: *mut regs::OperationalRegs = unsafe { cap.at_offset(cap_length as usize) };
        let dboff = cap.regs().dboff.read();
        let doorbells: *mut u32 = unsafe { cap.at_offset((dboff & !0x3) as usize) };
        let rtsoff = cap.regs().rtsoff.read();
        let interrupter0: *mut regs::InterrupterRegs =
            unsafe { cap.at_offset(((rtsoff & !0x1F) + regs::INTERRUPTER0_OFFSET) as usize) };
        let port_base: *mut regs::PortRegs = unsafe { cap.at_offset(cap_length as usize + 0x400) };

        reset(op)?;

        let hcsparams1 = cap.regs().hcsparams1.read();
        let max_slots = regs::hcsparams1::max_slots(hcsparams1);
        let max_ports = regs::hcsparams1::max_ports(hcsparams1);
        unsafe {
            (*op).dnctrl.write(0xFFFF);
            let config = (*op).config.read();
            (*op).config.write((config & !0xFF) | u32::from(max_slots));
        }

        let dcbaa = allocator.alloc((usize::from(max_slots) + 1) * 8)?;
        let (scratchpad_array, scratchpad_buffers) = setup_scratchpads(&cap, allocator, &dcbaa)?;

        let command_ring = ProducerRing::new(COMMAND_RING_TRBS, allocator)?;
        unsafe {
            (*op).crcr.write(command_ring.phys_addr() | regs::crcr::RCS);
        }

        let event_ring = EventRing::new(EVENT_RING_TRBS, allocator)?;
        let erst = allocator.alloc(core::mem::size_of::<regs::ErstEntry>())?;
        let entry = regs::ErstEntry {
            ring_segment_base: event_ring.phys_addr(),
            ring_segment_size: EVENT_RING_TRBS as u32,
            _rsvd: 0,
        };
        unsafe {
            core::ptr::write_unaligned(erst.as_ptr().cast::<regs::ErstEntry>().cast_mut(), entry);
            (*interrupter0).erstsz.write(1);
            (*interrupter0).erdp.write(event_ring.dequeue_phys());
            (*interrupter0).erstba.write(erst.phys_addr());
            (*interrupter0).iman.write(regs::iman::IE);

            (*op).usbcmd.write(regs::usbcmd::RUN | regs::usbcmd::INTE | regs::usbcmd::HSEE);
        }
        wait_running(op)?;

        Ok(Self {
            cap,
            op,
            doorbells,
            interrupter0,
            port_base,
            allocator,
            max_slots,
            max_ports,
            dcbaa,
            _scratchpad_array: scratchpad_array,
            _scratchpad_buffers: scratchpad_buffers,
            command_ring: Mutex::new(command_ring),
            event_ring: Mutex::new(event_ring),
            _erst: erst,
            waiters: Mutex::new(BTreeMap::new()),
            slots: Mutex::new(BTreeMap::new()),
        })
    }

    /// The controller's interrupt handler: acknowledges the interrupt pending and
    /// event-interrupt bits only; it does not drain the ring itself (§5: "set IMAN.IP,
    /// clear USBSTS.EINT; optionally signal a poller thread").
    pub fn acknowledge_interrupt(&self) {
        unsafe {
            (*self.interrupter0).iman.write((*self.interrupter0).iman.read() | regs::iman::IP);
            (*self.op).usbsts.write(regs::usbsts::EINT);
        }
    }

    /// The single logical event-ring consumer (§4.C). Classifies and dispatches every
    /// unclaimed TRB, then writes ERDP once.
    pub fn poll_events(&self) {
        let mut event_ring = self.event_ring.lock();
        let mut drained_any = false;
        while let Some(trb) = event_ring.poll() {
            drained_any = true;
            match trb.trb_type() {
                trb_type::TRANSFER_EVENT => {
                    self.complete_waiter(WaitKey::Transfer(trb.slot_id(), trb.endpoint_id()), trb);
                }
                trb_type::COMMAND_COMPLETION_EVENT => {
                    self.complete_waiter(WaitKey::Command(trb.parameter), trb);
                }
                trb_type::PORT_STATUS_CHANGE_EVENT => {
                    // Re-enumeration is driven by the caller polling `enumerate_ports`;
                    // this core has no background task to kick on its own.
                }
                _ => {}
            }
        }
        if drained_any {
            unsafe { (*self.interrupter0).erdp.write(event_ring.dequeue_phys()) };
        }
    }

    fn complete_waiter(&self, key: WaitKey, trb: Trb) {
        if let Some(waiter) = self.waiters.lock().get(&key) {
            *waiter.completion.lock() = Some(trb);
            waiter.done.store(true, Ordering::Release);
        }
    }

    /// Submits one command TRB and blocks (polling `poll_events`, since this core has
    /// no separate poller thread in tests) until its completion event arrives or the
    /// deadline expires.
    fn submit_command(&self, trb: Trb) -> Result<Trb, DevError> {
        let waiter = Arc::new(Waiter {
            done: AtomicBool::new(false),
            completion: Mutex::new(None),
        });

        let phys = {
            let mut ring = self.command_ring.lock();
            let phys = ring.enqueue(trb);
            self.waiters.lock().insert(WaitKey::Command(phys), waiter.clone());
            phys
        };
        self.ring_doorbell(0, 0);

        let deadline = Deadline::after_micros(COMMAND_TIMEOUT_US);
        let result = poll_until(deadline, || {
            self.poll_events();
            waiter.done.load(Ordering::Acquire).then(|| waiter.completion.lock().take()).flatten()
        });
        self.waiters.lock().remove(&WaitKey::Command(phys));

        let completion = result.ok_or(DevError::TimedOut)?;
        if completion.completion_code() != COMPLETION_SUCCESS {
            return Err(DevError::Io);
        }
        Ok(completion)
    }

    fn ring_doorbell(&self, slot: u8, target: u8) {
        unsafe {
            self.doorbells.add(usize::from(slot)).write_volatile(u32::from(target));
        }
    }

    /// Iterates PORTSC registers, resetting and re-enumerating any port that reports a
    /// fresh connect-status change (§4.C port enumeration).
    pub fn enumerate_ports(&self) -> Vec<EnumeratedDevice> {
        let mut devices = Vec::new();
        for port_index in 0..self.max_ports {
            let port = unsafe { &*self.port_base.add(usize::from(port_index)) };
            let portsc = port.portsc.read();
            if portsc & regs::portsc::CCS == 0 || portsc & regs::portsc::CSC == 0 {
                continue;
            }
            port.portsc.write(portsc | regs::portsc::CSC);

            let reset_bit = if portsc & regs::portsc::SPEED_MASK == (4 << regs::portsc::SPEED_SHIFT) {
                regs::portsc::WPR
            } else {
                regs::portsc::PR
            };
            port.portsc.write((port.portsc.read() & !regs::portsc::PED) | reset_bit);

            let change_bit = if reset_bit == regs::portsc::WPR { regs::portsc::WRC } else { regs::portsc::PRC };
            let reset_ok = poll_until(Deadline::after_micros(PORT_RESET_TIMEOUT_US), || {
                (port.portsc.read() & change_bit != 0).then_some(())
            })
            .is_some();
            if !reset_ok {
                continue;
            }
            port.portsc.write(port.portsc.read() | change_bit);

            let portsc_after = port.portsc.read();
            if portsc_after & regs::portsc::PED == 0 {
                continue;
            }
            let Some(speed) = regs::portsc::speed(portsc_after) else { continue };

            if let Ok(device) = self.bring_up_device(port_index + 1, speed) {
                devices.push(device);
            }
        }
        devices
    }

    /// The six-step device bring-up sequence from §4.C.
    fn bring_up_device(&self, root_hub_port: u8, speed: UsbSpeed) -> Result<EnumeratedDevice, DevError> {
        // Step 1: Enable Slot.
        let completion = self.submit_command(Trb::new(trb_type::ENABLE_SLOT, 0, 0))?;
        let slot_id = completion.slot_id();

        // Step 2: allocate device contexts, install the output context at DCBAA[slot_id].
        let output = self.allocator.alloc(core::mem::size_of::<OutputContext>())?;
        unsafe {
            self.dcbaa
                .as_ptr()
                .cast::<u64>()
                .cast_mut()
                .add(usize::from(slot_id))
                .write_volatile(output.phys_addr());
        }

        // Step 3: EP0 transfer ring.
        let ep0_ring = ProducerRing::new(TRANSFER_RING_TRBS, self.allocator)?;
        let ep0_ring_phys = ep0_ring.phys_addr();

        // Step 4: program the input context (slot + EP0).
        let input = self.allocator.alloc(core::mem::size_of::<InputContext>())?;
        let mps = speed.default_control_mps();
        unsafe {
            let ctx = input.as_ptr().cast::<InputContext>().cast_mut();
            (*ctx).control.add_flags = 0b11; // slot (bit 0) + EP0 (bit 1)
            (*ctx).slot = SlotContext::new(root_hub_port, speed_id(speed), 1);
            (*ctx).endpoints[0] = EndpointContext::new(context::ep_type::CONTROL, mps, 0, 3, 0, ep0_ring_phys);
        }

        // Step 5: address device — BSR=1 then BSR=0.
        let bsr1 = Trb::new(trb_type::ADDRESS_DEVICE, input.phys_addr(), 0);
        let mut bsr1 = bsr1;
        bsr1.control |= (1 << 9) | (u32::from(slot_id) << 24); // BSR bit
        self.submit_command(bsr1)?;

        let mut bsr0 = Trb::new(trb_type::ADDRESS_DEVICE, input.phys_addr(), 0);
        bsr0.control |= u32::from(slot_id) << 24;
        self.submit_command(bsr0)?;

        self.slots.lock().insert(slot_id, SlotState {
            transfer_rings: BTreeMap::from([(0u8, ep0_ring)]),
        });

        // Step 6: read the first 8 bytes of the device descriptor, fix up EP0's mps if
        // the default guess was wrong.
        let mut descriptor_bytes = [0u8; 8];
        self.control_transfer(slot_id, 0, SetupPacket::get_device_descriptor(8), Some(&mut descriptor_bytes))?;
        let true_mps = descriptor_bytes[7];
        if true_mps != 0 && u16::from(true_mps) != mps {
            unsafe {
                let ctx = input.as_ptr().cast::<InputContext>().cast_mut();
                (*ctx).control.add_flags = 0x1;
                (*ctx).control.drop_flags = 0;
                (*ctx).endpoints[0].ep_type_and_mps =
                    ((*ctx).endpoints[0].ep_type_and_mps & !(0xFFFF << 16)) | (u32::from(true_mps) << 16);
            }
            let mut eval = Trb::new(trb_type::EVALUATE_CONTEXT, input.phys_addr(), 0);
            eval.control |= u32::from(slot_id) << 24;
            self.submit_command(eval)?;
        }

        let mut full_descriptor = [0u8; 18];
        self.control_transfer(slot_id, 0, SetupPacket::get_device_descriptor(18), Some(&mut full_descriptor))?;

        Ok(EnumeratedDevice {
            slot_id,
            root_hub_port,
            speed,
            descriptor: bytemuck::pod_read_unaligned(&full_descriptor),
        })
    }

    /// Executes one control transfer on `slot_id`'s endpoint 0: SETUP, optional DATA,
    /// STATUS stages (§4.C control transfer).
    pub fn control_transfer(&self, slot_id: u8, endpoint_id: u8, setup: SetupPacket, mut data: Option<&mut [u8]>) -> Result<(), DevError> {
        let data_len = data.as_ref().map_or(0, |d| d.len());
        let direction = setup.direction();

        let data_buf = if data_len > 0 {
            Some(self.allocator.alloc(data_len)?)
        } else {
            None
        };
        if let (Some(buf), Some(d)) = (&data_buf, data.as_deref()) {
            if direction == Direction::Out {
                // SAFETY: buf was just allocated with len >= data_len.
                unsafe { core::ptr::copy_nonoverlapping(d.as_ptr(), buf.as_ptr().cast_mut(), data_len) };
            }
        }

        let trt = if data_len == 0 {
            0
        } else if direction == Direction::In {
            3
        } else {
            2
        };
        let setup_trb = Trb::new(
            trb_type::SETUP_STAGE,
            u64::from_le_bytes([
                setup.bm_request_type,
                setup.b_request,
                setup.w_value.to_le_bytes()[0],
                setup.w_value.to_le_bytes()[1],
                setup.w_index.to_le_bytes()[0],
                setup.w_index.to_le_bytes()[1],
                setup.w_length.to_le_bytes()[0],
                setup.w_length.to_le_bytes()[1],
            ]),
            u32::from(setup.w_length),
        )
        .with_idt()
        .with_trt(trt);

        let waiter = self.wait_on_transfer(slot_id, endpoint_id);
        {
            let mut slots = self.slots.lock();
            let ring = slots.get_mut(&slot_id).and_then(|s| s.transfer_rings.get_mut(&endpoint_id)).ok_or(DevError::NotFound)?;
            ring.enqueue(setup_trb);
            if let Some(buf) = &data_buf {
                let mut data_trb = Trb::new(trb_type::DATA_STAGE, buf.phys_addr(), data_len as u32);
                if direction == Direction::In {
                    data_trb.control |= 1 << 16; // DIR bit: 1 = IN
                }
                ring.enqueue(data_trb);
            }
            let mut status_trb = Trb::new(trb_type::STATUS_STAGE, 0, 0).with_ioc();
            if data_len == 0 || direction == Direction::Out {
                status_trb.control |= 1 << 16; // STATUS stage direction opposite of DATA (IN if no data)
            }
            ring.enqueue(status_trb);
        }
        self.ring_doorbell(slot_id, endpoint_id_to_doorbell_target(endpoint_id));

        let completion = self.block_on_transfer(waiter)?;
        if completion.completion_code() != COMPLETION_SUCCESS {
            return Err(DevError::Io);
        }

        if let (Some(buf), Some(d)) = (&data_buf, data.as_deref_mut()) {
            if direction == Direction::In {
                unsafe { core::ptr::copy_nonoverlapping(buf.as_ptr(), d.as_mut_ptr(), data_len) };
            }
        }
        Ok(())
    }

    fn wait_on_transfer(&self, slot_id: u8, endpoint_id: u8) -> Arc<Waiter> {
        let waiter = Arc::new(Waiter {
            done: AtomicBool::new(false),
            completion: Mutex::new(None),
        });
        self.waiters.lock().insert(WaitKey::Transfer(slot_id, endpoint_id), waiter.clone());
        waiter
    }

    fn block_on_transfer(&self, waiter: Arc<Waiter>) -> Result<Trb, DevError> {
        let deadline = Deadline::after_micros(COMMAND_TIMEOUT_US);
        let result = poll_until(deadline, || {
            self.poll_events();
            waiter.done.load(Ordering::Acquire).then(|| waiter.completion.lock().take()).flatten()
        });
        result.ok_or(DevError::TimedOut)
    }

    /// Configures an endpoint beyond EP0 (§4.C "Endpoint configuration"): allocates a
    /// transfer ring, fills the endpoint context, and issues CONFIGURE_ENDPOINT.
    pub fn configure_endpoint(
        &self,
        slot_id: u8,
        endpoint_address: u8,
        ep_type: EndpointType,
        max_packet_size: u16,
        interval: u8,
    ) -> Result<(), DevError> {
        let is_in = endpoint_address & 0x80 != 0;
        let endpoint_id = endpoint_context_index(endpoint_address, is_in) as u8 + 1;
        let ring = ProducerRing::new(TRANSFER_RING_TRBS, self.allocator)?;
        let ring_phys = ring.phys_addr();

        let hw_type = match (ep_type, is_in) {
            (EndpointType::Control, _) => context::ep_type::CONTROL,
            (EndpointType::Isochronous, false) => context::ep_type::ISOCH_OUT,
            (EndpointType::Isochronous, true) => context::ep_type::ISOCH_IN,
            (EndpointType::Bulk, false) => context::ep_type::BULK_OUT,
            (EndpointType::Bulk, true) => context::ep_type::BULK_IN,
            (EndpointType::Interrupt, false) => context::ep_type::INTERRUPT_OUT,
            (EndpointType::Interrupt, true) => context::ep_type::INTERRUPT_IN,
        };

        let input = self.allocator.alloc(core::mem::size_of::<InputContext>())?;
        unsafe {
            let ctx = input.as_ptr().cast::<InputContext>().cast_mut();
            (*ctx).control.add_flags = 1 | (1 << (endpoint_id + 1));
            (*ctx).slot.state = u32::from(endpoint_id + 1) << 27;
            (*ctx).endpoints[usize::from(endpoint_id) - 1] = EndpointContext::new(hw_type, max_packet_size, 0, 3, interval, ring_phys);
        }

        let mut trb = Trb::new(trb_type::CONFIGURE_ENDPOINT, input.phys_addr(), 0);
        trb.control |= u32::from(slot_id) << 24;
        self.submit_command(trb)?;

        self.slots
            .lock()
            .get_mut(&slot_id)
            .ok_or(DevError::NotFound)?
            .transfer_rings
            .insert(endpoint_id, ring);
        Ok(())
    }
}

fn endpoint_id_to_doorbell_target(endpoint_id: u8) -> u8 {
    endpoint_id + 1
}

fn speed_id(speed: UsbSpeed) -> u8 {
    match speed {
        UsbSpeed::Full => 1,
        UsbSpeed::Low => 2,
        UsbSpeed::High => 3,
        UsbSpeed::Super => 4,
    }
}

fn reset(op: *mut regs::OperationalRegs) -> Result<(), DevError> {
    unsafe {
        let cmd = (*op).usbcmd.read();
        (*op).usbcmd.write(cmd & !regs::usbcmd::RUN);
    }
    poll_until(Deadline::after_micros(RESET_TIMEOUT_US), || unsafe {
        ((*op).usbsts.read() & regs::usbsts::HCHALTED != 0).then_some(())
    })
    .ok_or(DevError::TimedOut)?;

    unsafe { (*op).usbcmd.write((*op).usbcmd.read() | regs::usbcmd::HCRESET) };
    poll_until(Deadline::after_micros(RESET_TIMEOUT_US), || unsafe {
        ((*op).usbcmd.read() & regs::usbcmd::HCRESET == 0).then_some(())
    })
    .ok_or(DevError::TimedOut)
}

fn wait_running(op: *mut regs::OperationalRegs) -> Result<(), DevError> {
    poll_until(Deadline::after_micros(RESET_TIMEOUT_US), || unsafe {
        let sts = (*op).usbsts.read();
        (sts & regs::usbsts::HCHALTED == 0 && sts & regs::usbsts::CNR == 0).then_some(())
    })
    .ok_or(DevError::TimedOut)
}

fn setup_scratchpads(
    cap: &MmioRegion<regs::CapabilityRegs>,
    allocator: &dyn DmaAllocator,
    dcbaa: &DmaBuffer,
) -> Result<(Option<DmaBuffer>, Vec<DmaBuffer>), DevError> {
    let count = regs::hcsparams2::max_scratchpad_buffers(cap.regs().hcsparams2.read());
    if count == 0 {
        return Ok((None, Vec::new()));
    }
    let mut array = allocator.alloc(count as usize * 8)?;
    let mut buffers = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let buf = allocator.alloc(4096)?;
        unsafe {
            array.as_mut_ptr().cast::<u64>().add(i).write_volatile(buf.phys_addr());
        }
        buffers.push(buf);
    }
    unsafe {
        dcbaa.as_ptr().cast::<u64>().cast_mut().write_volatile(array.phys_addr());
    }
    Ok((Some(array), buffers))
}

/// A device successfully addressed through the six-step bring-up sequence, ready for
/// endpoint configuration and class-specific enumeration by the caller.
pub struct EnumeratedDevice {
    pub slot_id: u8,
    pub root_hub_port: u8,
    pub speed: UsbSpeed,
    pub descriptor: DeviceDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_id_to_doorbell_target_offsets_by_one() {
        assert_eq!(endpoint_id_to_doorbell_target(0), 1);
        assert_eq!(endpoint_id_to_doorbell_target(3), 4);
    }

    #[test]
    fn speed_id_matches_table_5_22() {
        assert_eq!(speed_id(UsbSpeed::Full), 1);
        assert_eq!(speed_id(UsbSpeed::Low), 2);
        assert_eq!(speed_id(UsbSpeed::High), 3);
        assert_eq!(speed_id(UsbSpeed::Super), 4);
    }
}
