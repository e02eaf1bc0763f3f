//! USB Host Controller Core (component C): EHCI and xHCI bring-up, port enumeration,
//! and control transfers, culminating in device enumeration per §4.C.
//!
//! Both controllers drive the same logical device model once a device is addressed —
//! [`UsbSpeed`], [`DeviceDescriptor`], [`SetupPacket`] — so the enumeration glue that
//! reads the first 8 bytes of the device descriptor and requests a max-packet-size
//! fix-up (xHCI step 6) lives here rather than duplicated per controller.

pub mod ehci;
pub mod xhci;

use bytemuck::{Pod, Zeroable};

/// Device signaling rate, as negotiated during port reset/enable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UsbSpeed {
    Low,
    Full,
    High,
    Super,
}

impl UsbSpeed {
    /// Default control-endpoint max packet size before the real value is read from the
    /// device descriptor (§4.C step 6: "the USB core reads the first 8 bytes... and
    /// requests a... fix-up").
    #[must_use]
    pub const fn default_control_mps(self) -> u16 {
        match self {
            UsbSpeed::Low => 8,
            UsbSpeed::Full => 8,
            UsbSpeed::High => 64,
            UsbSpeed::Super => 512,
        }
    }
}

/// Standard USB direction, as encoded in bit 7 of `bEndpointAddress`/`bmRequestType`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Out,
    In,
}

/// Endpoint transfer type, from `bmAttributes` bits 0-1.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndpointType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl EndpointType {
    #[must_use]
    pub fn from_attributes(bm_attributes: u8) -> Self {
        match bm_attributes & 0x03 {
            1 => EndpointType::Isochronous,
            2 => EndpointType::Bulk,
            3 => EndpointType::Interrupt,
            _ => EndpointType::Control,
        }
    }
}

/// An 8-byte USB control transfer SETUP packet.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct SetupPacket {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

impl SetupPacket {
    pub const GET_DESCRIPTOR: u8 = 0x06;
    pub const SET_ADDRESS: u8 = 0x05;
    pub const DEVICE_DESCRIPTOR: u16 = 0x0100;

    #[must_use]
    pub fn get_device_descriptor(length: u16) -> Self {
        Self {
            bm_request_type: 0x80, // device-to-host, standard, device
            b_request: Self::GET_DESCRIPTOR,
            w_value: Self::DEVICE_DESCRIPTOR,
            w_index: 0,
            w_length: length,
        }
    }

    #[must_use]
    pub fn direction(self) -> Direction {
        if self.bm_request_type & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// The (partial or full) 18-byte USB device descriptor. Only the fields the
/// enumeration glue needs are named; the rest ride along as raw bytes.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DeviceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub bcd_usb: u16,
    pub b_device_class: u8,
    pub b_device_sub_class: u8,
    pub b_device_protocol: u8,
    pub b_max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial_number: u8,
    pub b_num_configurations: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_type_decodes_bm_attributes() {
        assert_eq!(EndpointType::from_attributes(0b01), EndpointType::Isochronous);
        assert_eq!(EndpointType::from_attributes(0b10), EndpointType::Bulk);
        assert_eq!(EndpointType::from_attributes(0b11), EndpointType::Interrupt);
        assert_eq!(EndpointType::from_attributes(0b00), EndpointType::Control);
    }

    #[test]
    fn default_mps_matches_speed_table() {
        assert_eq!(UsbSpeed::Low.default_control_mps(), 8);
        assert_eq!(UsbSpeed::High.default_control_mps(), 64);
        assert_eq!(UsbSpeed::Super.default_control_mps(), 512);
    }
}
