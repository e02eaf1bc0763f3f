//! PCI configuration space access and bus enumeration.
//!
//! Grounded in the classic `0xCF8`/`0xCFC` configuration mechanism: a 32-bit
//! `CONFIG_ADDRESS` write selects bus/device/function/register, then `CONFIG_DATA`
//! reads or writes the selected dword.

use crate::bus::{BarKind, ClassFilter, MappedBar};
use crate::io::{inl, outl, IOPort};

const CONFIG_ADDRESS: IOPort = IOPort::new(0xCF8);
const CONFIG_DATA: IOPort = IOPort::new(0xCFC);

/// A bus/device/function address in PCI configuration space.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ConfigAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl ConfigAddress {
    fn encode(self, offset: u8) -> u32 {
        0x8000_0000
            | (u32::from(self.bus) << 16)
            | (u32::from(self.device) << 11)
            | (u32::from(self.function) << 8)
            | (u32::from(offset) & 0xFC)
    }
}

/// The boundary the bus substrate reads/writes PCI configuration space through. The
/// kernel's own PCI configuration accessor (serialized by a bus-wide lock, per §5)
/// implements this; [`PortIoPciAccessor`] is the self-contained default used when this
/// crate is the only thing driving the bus.
pub trait PciConfigAccessor {
    fn read_dword(&self, addr: ConfigAddress, offset: u8) -> u32;
    fn write_dword(&self, addr: ConfigAddress, offset: u8, value: u32);

    fn read_word(&self, addr: ConfigAddress, offset: u8) -> u16 {
        let shift = (offset & 2) * 8;
        ((self.read_dword(addr, offset & !0x3) >> shift) & 0xFFFF) as u16
    }

    fn read_byte(&self, addr: ConfigAddress, offset: u8) -> u8 {
        let shift = (offset & 3) * 8;
        ((self.read_dword(addr, offset & !0x3) >> shift) & 0xFF) as u8
    }
}

/// Default [`PciConfigAccessor`] using the legacy I/O-port configuration mechanism.
/// Access is serialized by `lock` per §5 ("PCI configuration space is serialized by a
/// bus-wide lock").
pub struct PortIoPciAccessor {
    lock: spin::Mutex<()>,
}

impl Default for PortIoPciAccessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PortIoPciAccessor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lock: spin::Mutex::new(()),
        }
    }
}

impl PciConfigAccessor for PortIoPciAccessor {
    fn read_dword(&self, addr: ConfigAddress, offset: u8) -> u32 {
        let _guard = self.lock.lock();
        outl(CONFIG_ADDRESS, addr.encode(offset));
        inl(CONFIG_DATA)
    }

    fn write_dword(&self, addr: ConfigAddress, offset: u8, value: u32) {
        let _guard = self.lock.lock();
        outl(CONFIG_ADDRESS, addr.encode(offset));
        outl(CONFIG_DATA, value);
    }
}

/// The kind of address space a base address register maps into.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BarKind {
    Io,
    Mem32,
    Mem64,
}

/// A discovered PCI device, as handed to a [`crate::bus::Bus::scan`] callback.
#[derive(Clone, Copy, Debug)]
pub struct PciDevice {
    pub addr: ConfigAddress,
    pub vendor_id: u16,
    pub device_id: u16,
    pub class: u8,
    pub subclass: u8,
    pub prog_if: u8,
    pub header_type: u8,
}

const OFFSET_VENDOR_ID: u8 = 0x00;
const OFFSET_DEVICE_ID: u8 = 0x02;
const OFFSET_CLASS_REV: u8 = 0x08;
const OFFSET_HEADER_TYPE: u8 = 0x0E;
const OFFSET_SECONDARY_BUS: u8 = 0x19;
const OFFSET_BAR0: u8 = 0x10;

fn header_present(config: &impl PciConfigAccessor, addr: ConfigAddress) -> bool {
    config.read_word(addr, OFFSET_VENDOR_ID) != 0xFFFF
}

fn load_device(config: &impl PciConfigAccessor, addr: ConfigAddress) -> PciDevice {
    let class_rev = config.read_dword(addr, OFFSET_CLASS_REV);
    PciDevice {
        addr,
        vendor_id: config.read_word(addr, OFFSET_VENDOR_ID),
        device_id: config.read_word(addr, OFFSET_DEVICE_ID),
        class: (class_rev >> 24) as u8,
        subclass: (class_rev >> 16) as u8,
        prog_if: (class_rev >> 8) as u8,
        header_type: config.read_byte(addr, OFFSET_HEADER_TYPE),
    }
}

fn is_multifunction(header_type: u8) -> bool {
    header_type & 0x80 != 0
}

fn is_pci_bridge(device: PciDevice) -> bool {
    device.class == 0x06 && device.subclass == 0x04
}

fn scan_bus(config: &impl PciConfigAccessor, bus: u8, visit: &mut impl FnMut(PciDevice)) {
    for device_slot in 0..32u8 {
        let base = ConfigAddress {
            bus,
            device: device_slot,
            function: 0,
        };
        if !header_present(config, base) {
            continue;
        }
        scan_function(config, base, visit);

        let header_type = config.read_byte(base, OFFSET_HEADER_TYPE);
        if is_multifunction(header_type) {
            for function in 1..8u8 {
                let addr = ConfigAddress {
                    bus,
                    device: device_slot,
                    function,
                };
                if header_present(config, addr) {
                    scan_function(config, addr, visit);
                }
            }
        }
    }
}

fn scan_function(config: &impl PciConfigAccessor, addr: ConfigAddress, visit: &mut impl FnMut(PciDevice)) {
    let device = load_device(config, addr);
    if is_pci_bridge(device) {
        let secondary_bus = config.read_byte(addr, OFFSET_SECONDARY_BUS);
        scan_bus(config, secondary_bus, visit);
    }
    visit(device);
}

/// Full PCI bus enumeration, invoking `visit` for every present function whose
/// class/subclass/prog-if passes `filter`. Bridges are traversed transparently; the
/// callback only ever sees leaf (non-bridge) devices.
pub fn scan(config: &impl PciConfigAccessor, filter: ClassFilter, visit: &mut impl FnMut(PciDevice)) {
    let mut matched = |device: PciDevice| {
        if filter.matches(device.class, device.subclass, device.prog_if) {
            visit(device);
        }
    };
    let host = ConfigAddress {
        bus: 0,
        device: 0,
        function: 0,
    };
    if !is_multifunction(config.read_byte(host, OFFSET_HEADER_TYPE)) {
        scan_bus(config, 0, &mut matched);
    } else {
        for function in 0..8u8 {
            let addr = ConfigAddress {
                bus: 0,
                device: 0,
                function,
            };
            if !header_present(config, addr) {
                break;
            }
            scan_bus(config, function, &mut matched);
        }
    }
}

/// Reads BAR `index` (0..=5) and sizes it using the standard write-all-ones probe.
/// Returns `None` if the BAR is unimplemented.
#[must_use]
pub fn read_bar(config: &impl PciConfigAccessor, device: PciDevice, index: u8) -> Option<MappedBar> {
    let offset = OFFSET_BAR0 + index * 4;
    let original = config.read_dword(device.addr, offset);
    if original == 0 {
        return None;
    }

    let is_io = original & 0x1 != 0;
    if is_io {
        config.write_dword(device.addr, offset, 0xFFFF_FFFF);
        let probed = config.read_dword(device.addr, offset);
        config.write_dword(device.addr, offset, original);
        let size = u64::from(!(probed & !0x3) + 1);
        return Some(MappedBar {
            phys_base: u64::from(original & !0x3),
            size,
            kind: BarKind::Io,
        });
    }

    let mem_type = (original >> 1) & 0x3;
    if mem_type == 0x2 {
        let hi_offset = offset + 4;
        let original_hi = config.read_dword(device.addr, hi_offset);
        config.write_dword(device.addr, offset, 0xFFFF_FFFF);
        config.write_dword(device.addr, hi_offset, 0xFFFF_FFFF);
        let probed_lo = config.read_dword(device.addr, offset);
        let probed_hi = config.read_dword(device.addr, hi_offset);
        config.write_dword(device.addr, offset, original);
        config.write_dword(device.addr, hi_offset, original_hi);

        let probed = (u64::from(probed_hi) << 32) | u64::from(probed_lo & !0xF);
        let size = !probed + 1;
        let phys_base = (u64::from(original_hi) << 32) | u64::from(original & !0xF);
        Some(MappedBar {
            phys_base,
            size,
            kind: BarKind::Mem64,
        })
    } else {
        config.write_dword(device.addr, offset, 0xFFFF_FFFF);
        let probed = config.read_dword(device.addr, offset);
        config.write_dword(device.addr, offset, original);
        let size = u64::from(!(probed & !0xF) + 1);
        Some(MappedBar {
            phys_base: u64::from(original & !0xF),
            size,
            kind: BarKind::Mem32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeMap;
    use spin::Mutex;

    /// An in-memory PCI configuration space, for exercising enumeration and BAR sizing
    /// without real hardware.
    #[derive(Default)]
    struct MockConfig {
        space: Mutex<BTreeMap<(u8, u8, u8, u8), u32>>,
    }

    impl MockConfig {
        fn set_dword(&self, addr: ConfigAddress, offset: u8, value: u32) {
            self.space
                .lock()
                .insert((addr.bus, addr.device, addr.function, offset), value);
        }
    }

    impl PciConfigAccessor for MockConfig {
        fn read_dword(&self, addr: ConfigAddress, offset: u8) -> u32 {
            *self
                .space
                .lock()
                .get(&(addr.bus, addr.device, addr.function, offset & !0x3))
                .unwrap_or(&0xFFFF_FFFF)
        }

        fn write_dword(&self, addr: ConfigAddress, offset: u8, value: u32) {
            self.space
                .lock()
                .insert((addr.bus, addr.device, addr.function, offset & !0x3), value);
        }
    }

    fn install_nvme_device(config: &MockConfig, addr: ConfigAddress) {
        config.set_dword(addr, OFFSET_VENDOR_ID, 0x1234_8086);
        // class=0x01 (mass storage), subclass=0x08 (NVM), prog_if=0x02 (NVMe I/O ctrl)
        config.set_dword(addr, OFFSET_CLASS_REV, 0x0108_0210);
        config.set_dword(addr, OFFSET_HEADER_TYPE, 0x0000_0000);
        config.set_dword(addr, OFFSET_BAR0, 0xFEBF_0004); // MEM32, not prefetchable
    }

    #[test]
    fn scan_finds_single_function_device() {
        let config = MockConfig::default();
        let host = ConfigAddress {
            bus: 0,
            device: 0,
            function: 0,
        };
        install_nvme_device(&config, host);

        let mut found = alloc::vec::Vec::new();
        scan(&config, ClassFilter::class(0x01), &mut |dev| found.push(dev));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].subclass, 0x08);
    }

    #[test]
    fn class_filter_excludes_non_matching_devices() {
        let config = MockConfig::default();
        let host = ConfigAddress {
            bus: 0,
            device: 0,
            function: 0,
        };
        install_nvme_device(&config, host);

        let mut found = alloc::vec::Vec::new();
        scan(&config, ClassFilter::class(0x02), &mut |dev| found.push(dev));
        assert!(found.is_empty());
    }

    #[test]
    fn bar_sizing_reports_mem32_size() {
        let config = MockConfig::default();
        let addr = ConfigAddress {
            bus: 0,
            device: 0,
            function: 0,
        };
        install_nvme_device(&config, addr);
        let device = load_device(&config, addr);

        let bar = read_bar(&config, device, 0).expect("BAR0 should be implemented");
        assert_eq!(bar.kind, BarKind::Mem32);
        assert_eq!(bar.phys_base, 0xFEBF_0000);
    }
}
