//! EHCI host controller (§4.C): BIOS handoff, reset, periodic/async schedule bring-up,
//! port enumeration (including companion-controller handoff), and control transfers.

pub mod regs;
pub mod qh;

use alloc::vec::Vec;
use spin::Mutex;

use self::qh::{pid, token, QueueHead, Qtd};
use crate::bus::pci::{ConfigAddress, PciConfigAccessor};
use crate::bus::{DmaAllocator, DmaBuffer};
use crate::clock::{poll_until, Deadline};
use crate::error::DevError;
use crate::io::mmio::MmioRegion;
use crate::usb::{Direction, SetupPacket, UsbSpeed};

const PERIODIC_LIST_ENTRIES: usize = 1024;
const BIOS_HANDOFF_TIMEOUT_US: u64 = 1_000_000;
const RESET_TIMEOUT_US: u64 = 1_000_000;
const PORT_RESET_DELAY_US: u64 = 50_000;
const PORT_ENABLE_TIMEOUT_US: u64 = 200_000;
const TRANSFER_TIMEOUT_US: u64 = 2_000_000;

/// Whether a full-speed/low-speed port was handed to the companion (UHCI/OHCI)
/// controller rather than initialized as a high-speed EHCI device (§4.C port
/// enumeration).
pub enum PortOutcome {
    HighSpeedDevice,
    HandedToCompanion,
    NotConnected,
}

pub struct EhciController<'a> {
    op: *mut regs::OperationalRegs,
    port_base: *mut u32,
    n_ports: u8,
    allocator: &'a dyn DmaAllocator,
    _periodic_list: DmaBuffer,
    _interrupt_qh_skeleton: DmaBuffer,
    async_head: DmaBuffer,
    async_lock: Mutex<()>,
}

unsafe impl<'a> Send for EhciController<'a> {}
unsafe impl<'a> Sync for EhciController<'a> {}

impl<'a> EhciController<'a> {
    /// Runs §4.C steps 1-5: BIOS handoff, HCRESET, periodic + async list bring-up,
    /// register programming, run.
    pub fn bring_up(
        cap: MmioRegion<regs::CapabilityRegs>,
        pci_config: &dyn PciConfigAccessor,
        pci_addr: ConfigAddress,
        allocator: &'a dyn DmaAllocator,
    ) -> Result<Self, DevError> {
        handoff_from_bios(pci_config, pci_addr, regs::hccparams::eecp(cap.regs().hccparams.read()));

        let cap_length = regs::cap_length::offset(cap.regs().cap_length_and_version.read());
        let op: *mut regs::OperationalRegs = unsafe { cap.at_offset(cap_length as usize) };
        let n_ports = regs::hcsparams::n_ports(cap.regs().hcsparams.read());
        let port_base: *mut u32 = unsafe { cap.at_offset(cap_length as usize + 0x44) };

        reset(op)?;

        // Periodic frame list: 1024 entries, all pointing at one interrupt-QH
        // skeleton, slot 1023 terminated (§4.C step 3).
        let mut periodic_list = allocator.alloc(PERIODIC_LIST_ENTRIES * 4)?;
        let interrupt_qh_skeleton = allocator.alloc(core::mem::size_of::<QueueHead>())?;
        unsafe {
            core::ptr::write_volatile(
                interrupt_qh_skeleton.as_ptr().cast::<QueueHead>().cast_mut(),
                QueueHead::new(0, 0, qh::endpoint_characteristics::SPEED_HIGH, 0, 0, 0, false),
            );
        }
        let skeleton_entry = (interrupt_qh_skeleton.phys_addr() as u32 & !0x1F) | qh::TYP_QH;
        for i in 0..PERIODIC_LIST_ENTRIES - 1 {
            unsafe {
                periodic_list.as_mut_ptr().cast::<u32>().add(i).write_volatile(skeleton_entry);
            }
        }
        unsafe {
            periodic_list
                .as_mut_ptr()
                .cast::<u32>()
                .add(PERIODIC_LIST_ENTRIES - 1)
                .write_volatile(qh::TERMINATE);
        }

        // Asynchronous list: a single head QH, H-bit set, linked to itself (§4.C step
        // 4).
        let async_head = allocator.alloc(core::mem::size_of::<QueueHead>())?;
        unsafe {
            core::ptr::write_volatile(
                async_head.as_ptr().cast::<QueueHead>().cast_mut(),
                QueueHead::new_async_head(async_head.phys_addr()),
            );
        }

        unsafe {
            (*op).ctrldssegment.write(0);
            (*op).periodiclistbase.write(periodic_list.phys_addr() as u32);
            (*op).asynclistaddr.write(async_head.phys_addr() as u32);
            (*op).frindex.write(0);
            (*op).usbintr.write(regs::usbintr::USB_ERROR | regs::usbintr::HOST_SYSTEM_ERROR | regs::usbintr::USB_INT);
            (*op).usbcmd.write(regs::usbcmd::RUN | regs::usbcmd::PERIODIC_ENABLE | regs::usbcmd::ASYNC_ENABLE);
        }
        poll_until(Deadline::after_micros(RESET_TIMEOUT_US), || unsafe {
            ((*op).usbsts.read() & regs::usbsts::HCHALTED == 0).then_some(())
        })
        .ok_or(DevError::TimedOut)?;
        unsafe { (*op).configflag.write(1) };

        Ok(Self {
            op,
            port_base,
            n_ports,
            allocator,
            _periodic_list: periodic_list,
            _interrupt_qh_skeleton: interrupt_qh_skeleton,
            async_head,
            async_lock: Mutex::new(()),
        })
    }

    /// Acknowledges pending USBSTS bits; this core logs rather than acting further,
    /// since PIO/async completion is observed by polling the live QH token (§5).
    pub fn acknowledge_interrupt(&self) {
        unsafe {
            let sts = (*self.op).usbsts.read();
            (*self.op).usbsts.write(sts & (regs::usbsts::USBINT | regs::usbsts::USBERRINT | regs::usbsts::HSE));
        }
    }

    fn port_reg(&self, index: u8) -> *mut u32 {
        unsafe { self.port_base.add(usize::from(index)) }
    }

    /// Resets and enables each port, handing low-speed/unresponsive full-speed ports to
    /// the companion controller (§4.C port enumeration).
    pub fn enumerate_ports(&self) -> Vec<(u8, PortOutcome)> {
        let mut results = Vec::with_capacity(usize::from(self.n_ports));
        for index in 0..self.n_ports {
            results.push((index, self.enumerate_port(index)));
        }
        results
    }

    fn enumerate_port(&self, index: u8) -> PortOutcome {
        let reg = self.port_reg(index);
        let portsc = unsafe { reg.read_volatile() };
        if portsc & regs::portsc::CONNECT_STATUS == 0 {
            return PortOutcome::NotConnected;
        }
        if regs::portsc::is_low_speed(portsc) {
            unsafe { reg.write_volatile(portsc | regs::portsc::PORT_OWNER) };
            return PortOutcome::HandedToCompanion;
        }

        unsafe { reg.write_volatile((portsc | regs::portsc::PORT_RESET) & !regs::portsc::PORT_ENABLE) };
        crate::clock::poll_until(Deadline::after_micros(PORT_RESET_DELAY_US), || None::<()>);
        unsafe { reg.write_volatile(reg.read_volatile() & !regs::portsc::PORT_RESET) };

        let enabled = poll_until(Deadline::after_micros(PORT_ENABLE_TIMEOUT_US), || {
            (unsafe { reg.read_volatile() } & regs::portsc::PORT_ENABLE != 0).then_some(())
        })
        .is_some();

        if enabled {
            PortOutcome::HighSpeedDevice
        } else {
            let current = unsafe { reg.read_volatile() };
            if current & regs::portsc::CONNECT_STATUS != 0 {
                unsafe { reg.write_volatile(current | regs::portsc::PORT_OWNER) };
                PortOutcome::HandedToCompanion
            } else {
                PortOutcome::NotConnected
            }
        }
    }

    /// Builds a per-transfer QH (SETUP/DATA*/STATUS qTD chain), splices it into the
    /// async list, polls to completion, then unlinks and frees it (§4.C control
    /// transfer).
    pub fn control_transfer(
        &self,
        device_address: u8,
        speed: UsbSpeed,
        max_packet_size: u16,
        setup: SetupPacket,
        data: Option<&mut [u8]>,
    ) -> Result<(), DevError> {
        let ehci_speed = match speed {
            UsbSpeed::Low => qh::endpoint_characteristics::SPEED_LOW,
            UsbSpeed::Full => qh::endpoint_characteristics::SPEED_FULL,
            _ => qh::endpoint_characteristics::SPEED_HIGH,
        };

        let qh_buf = self.allocator.alloc(core::mem::size_of::<QueueHead>())?;
        // The SETUP qTD's allocation carries 8 extra trailing bytes used as the
        // packet's own data buffer, so the qTD and its payload share one DMA mapping.
        let setup_qtd = self.allocator.alloc(Qtd::HEADER_BYTES + 8)?;

        let data_len = data.as_ref().map_or(0, |d| d.len());
        let direction = setup.direction();
        let data_buf = if data_len > 0 { Some(self.allocator.alloc(data_len)?) } else { None };
        if let (Some(buf), Some(d)) = (&data_buf, data.as_deref()) {
            if direction == Direction::Out {
                unsafe { core::ptr::copy_nonoverlapping(d.as_ptr(), buf.as_ptr().cast_mut(), data_len) };
            }
        }
        let data_qtd = if data_buf.is_some() { Some(self.allocator.alloc(core::mem::size_of::<Qtd>())?) } else { None };
        let status_qtd = self.allocator.alloc(core::mem::size_of::<Qtd>())?;

        let setup_bytes = setup_packet_bytes(setup);

        let data_pid = if direction == Direction::In { pid::IN } else { pid::OUT };
        let status_pid = if data_len == 0 || direction == Direction::Out { pid::IN } else { pid::OUT };

        unsafe {
            // SETUP stage: PID=SETUP, length 8, toggle 0.
            let mut setup_td = Qtd::new(pid::SETUP, setup_qtd.phys_addr() + Qtd::HEADER_BYTES as u64, 8, false, false);
            // The SETUP payload rides in the qTD's own buffer-page-0 slot only when a
            // dedicated setup buffer is used; here we reuse a small inline scratch
            // region right after the qTD header within the same allocation.
            core::ptr::copy_nonoverlapping(
                setup_bytes.as_ptr(),
                setup_qtd.as_ptr().cast_mut().byte_add(Qtd::HEADER_BYTES),
                8,
            );
            setup_td.buffer_pages[0] = (setup_qtd.phys_addr() + Qtd::HEADER_BYTES as u64) as u32;

            if let Some(data_qtd) = &data_qtd {
                setup_td.next_qtd = (data_qtd.phys_addr() as u32) & !0x1F;
            } else {
                setup_td.next_qtd = (status_qtd.phys_addr() as u32) & !0x1F;
            }
            core::ptr::write_volatile(setup_qtd.as_ptr().cast::<Qtd>().cast_mut(), setup_td);

            if let (Some(data_qtd), Some(data_buf)) = (&data_qtd, &data_buf) {
                let mut data_td = Qtd::new(data_pid, data_buf.phys_addr(), data_len as u16, true, false);
                data_td.next_qtd = (status_qtd.phys_addr() as u32) & !0x1F;
                core::ptr::write_volatile(data_qtd.as_ptr().cast::<Qtd>().cast_mut(), data_td);
            }

            let status_td = Qtd::new(status_pid, 0, 0, true, true);
            core::ptr::write_volatile(status_qtd.as_ptr().cast::<Qtd>().cast_mut(), status_td);

            let mut qh = QueueHead::new(device_address, 0, ehci_speed, max_packet_size, 0, 0, true);
            qh.next_qtd = (setup_qtd.phys_addr() as u32) & !0x1F;
            core::ptr::write_volatile(qh_buf.as_ptr().cast::<QueueHead>().cast_mut(), qh);
        }

        self.splice_into_async_list(&qh_buf);

        let result = poll_until(Deadline::after_micros(TRANSFER_TIMEOUT_US), || {
            let live = qh::live_token(&qh_buf);
            if token::error(live) {
                Some(Err(DevError::Io))
            } else if !token::active(live) && live != 0 {
                Some(Ok(()))
            } else {
                None
            }
        })
        .unwrap_or(Err(DevError::TimedOut));

        self.unlink_from_async_list(&qh_buf);

        if result.is_ok() {
            if let (Some(buf), Some(d)) = (&data_buf, data) {
                if direction == Direction::In {
                    unsafe { core::ptr::copy_nonoverlapping(buf.as_ptr(), d.as_mut_ptr(), data_len) };
                }
            }
        }

        self.allocator.free(qh_buf);
        self.allocator.free(setup_qtd);
        if let Some(buf) = data_qtd {
            self.allocator.free(buf);
        }
        if let Some(buf) = data_buf {
            self.allocator.free(buf);
        }
        self.allocator.free(status_qtd);

        result
    }

    fn splice_into_async_list(&self, qh_buf: &DmaBuffer) {
        let _guard = self.async_lock.lock();
        unsafe {
            let head_ptr = self.async_head.as_ptr().cast::<QueueHead>().cast_mut();
            let old_next = core::ptr::read_volatile(core::ptr::addr_of!((*head_ptr).horizontal_link));
            core::ptr::write_volatile(qh_buf.as_ptr().cast::<u32>().cast_mut(), old_next);
            core::ptr::write_volatile(
                core::ptr::addr_of_mut!((*head_ptr).horizontal_link),
                (qh_buf.phys_addr() as u32 & !0x1F) | qh::TYP_QH,
            );
        }
    }

    fn unlink_from_async_list(&self, qh_buf: &DmaBuffer) {
        let _guard = self.async_lock.lock();
        unsafe {
            let head_ptr = self.async_head.as_ptr().cast::<QueueHead>().cast_mut();
            let our_next = core::ptr::read_volatile(qh_buf.as_ptr().cast::<QueueHead>().cast::<u32>());
            core::ptr::write_volatile(core::ptr::addr_of_mut!((*head_ptr).horizontal_link), our_next);
        }
    }
}

impl Qtd {
    const HEADER_BYTES: usize = core::mem::size_of::<Qtd>();
}

fn setup_packet_bytes(setup: SetupPacket) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    bytes[0] = setup.bm_request_type;
    bytes[1] = setup.b_request;
    bytes[2..4].copy_from_slice(&setup.w_value.to_le_bytes());
    bytes[4..6].copy_from_slice(&setup.w_index.to_le_bytes());
    bytes[6..8].copy_from_slice(&setup.w_length.to_le_bytes());
    bytes
}

/// Takes ownership from firmware via the USBLEGSUP handshake (§4.C step 1): set
/// `HC_OS`, wait for `HC_BIOS` to clear, bounded timeout. On expiry, continue anyway
/// and let the caller's log sink record it — firmware that never releases ownership
/// does not stop this core from attempting bring-up.
fn handoff_from_bios(pci_config: &dyn PciConfigAccessor, pci_addr: ConfigAddress, eecp: u8) {
    if eecp < 0x40 {
        return; // no extended capability list; nothing to hand off
    }
    let cap_id = pci_config.read_byte(pci_addr, eecp);
    if cap_id != regs::usblegsup::CAPABILITY_ID {
        return;
    }
    let legsup_offset = eecp;
    let value = pci_config.read_dword(pci_addr, legsup_offset);
    pci_config.write_dword(pci_addr, legsup_offset, value | regs::usblegsup::HC_OS_OWNED);

    poll_until(Deadline::after_micros(BIOS_HANDOFF_TIMEOUT_US), || {
        (pci_config.read_dword(pci_addr, legsup_offset) & regs::usblegsup::HC_BIOS_OWNED == 0).then_some(())
    });
}

fn reset(op: *mut regs::OperationalRegs) -> Result<(), DevError> {
    unsafe { (*op).usbcmd.write((*op).usbcmd.read() | regs::usbcmd::HCRESET) };
    poll_until(Deadline::after_micros(RESET_TIMEOUT_US), || unsafe {
        ((*op).usbcmd.read() & regs::usbcmd::HCRESET == 0).then_some(())
    })
    .ok_or(DevError::TimedOut)
}
