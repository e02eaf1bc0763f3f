//! PS/2 controller handshake and device bring-up (§4.F Input Aggregator).
//!
//! The handshake itself — disable ports, self-test, dual-channel probe, enable ports,
//! device reset/identify — is unchanged from how this was always driven; only the
//! port-I/O calls move onto [`crate::io::IOPort`] and the bounded retry loop is now a
//! local macro instead of a kernel-wide one.

pub mod kbd;
pub mod mouse;

use crate::io::{inb, outb, IOPort};
use modular_bitfield::prelude::*;

const PS2_STATUS_PORT: IOPort = IOPort::new(0x64);
const PS2_DATA_PORT: IOPort = IOPort::new(0x60);
const PS2_CMD_REG: IOPort = IOPort::new(0x64);

/// Loops while `$cond` is false, bailing into `$or` after `$max` attempts — the bounded
/// polling shape every PS/2 command in this module relies on (no interrupt-driven
/// handshake exists on this controller).
macro_rules! wait_for_or {
    ($cond:expr, $max:expr, $or:expr) => {{
        let mut attempts = 0u32;
        while !($cond) {
            attempts += 1;
            if attempts >= $max {
                $or;
            }
        }
    }};
}

#[derive(Debug)]
pub struct PS2Controller {
    port_status: PS2ControllerPortStatus,
    first_identify: Option<[u8; 2]>,
    second_identify: Option<[u8; 2]>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PS2ControllerPortStatus {
    DualPort,
    SinglePort,
    SecondPortOnly,
    Failure,
}

#[bitfield]
#[derive(Debug)]
pub struct PS2StatusRegister {
    output_buffer_status: bool,
    input_buffer_status: bool,
    system_flag: bool,
    cmd_flag: bool,
    #[skip]
    reserved1: bool,
    #[skip]
    reserved2: bool,
    timeout_err: bool,
    parity_err: bool,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct PS2ConfigurationByte {
    first_port_int: bool,
    second_port_int: bool,
    system_flag: bool,
    #[skip]
    reserved1: bool,
    first_port_clock_disabled: bool,
    second_port_clock_disabled: bool,
    first_port_translation: bool,
    #[skip]
    reserved2: bool,
}

impl PS2Controller {
    /// Runs the full bring-up handshake (§4.F): disable both ports, self-test the
    /// controller (expect 0x55), probe for dual-channel support, enable whatever ports
    /// passed, and reset+identify the attached device(s).
    pub fn init() -> Option<Self> {
        let mut controller = PS2Controller {
            port_status: PS2ControllerPortStatus::Failure,
            first_identify: None,
            second_identify: None,
        };

        controller.send_command_polling(PS2ControllerCommand::DisableFirstPort);
        controller.send_command_polling(PS2ControllerCommand::DisableSecondPort);
        while controller.read_status().output_buffer_status() {
            inb(PS2_DATA_PORT);
        }

        let mut conf = controller.read_configuration();
        conf.set_first_port_translation(false);
        conf.set_first_port_int(false);
        conf.set_second_port_int(false);
        conf.set_first_port_clock_disabled(false);
        conf.set_second_port_clock_disabled(false);
        controller.write_configuration(conf);

        if !controller.self_test() {
            return None;
        }

        controller.port_status = match (
            controller.first_port_self_test(),
            controller.second_port_self_test(),
        ) {
            (true, true) => {
                controller.send_command_polling(PS2ControllerCommand::EnableFirstPort);
                controller.send_command_polling(PS2ControllerCommand::EnableSecondPort);
                let mut conf = controller.read_configuration();

                conf.set_first_port_int(true);
                conf.set_second_port_int(true);

                controller.write_configuration(conf);
                controller.first_device_reset();
                controller.second_device_reset();

                PS2ControllerPortStatus::DualPort
            }
            (true, false) => {
                controller.send_command_polling(PS2ControllerCommand::EnableFirstPort);
                let mut conf = controller.read_configuration();

                conf.set_first_port_int(true);
                controller.write_configuration(conf);
                controller.first_device_reset();
                controller.send_command_polling(PS2ControllerCommand::DisableSecondPort);

                PS2ControllerPortStatus::SinglePort
            }
            (false, true) => {
                controller.send_command_polling(PS2ControllerCommand::EnableSecondPort);
                let mut conf = controller.read_configuration();

                conf.set_second_port_int(true);
                controller.write_configuration(conf);
                controller.second_device_reset();

                PS2ControllerPortStatus::SecondPortOnly
            }
            (false, false) => PS2ControllerPortStatus::Failure,
        };

        controller.first_identify = controller.first_device_identify();
        controller.second_identify = controller.second_device_identify();

        Some(controller)
    }

    #[must_use]
    pub fn port_status(&self) -> PS2ControllerPortStatus {
        self.port_status
    }

    /// The identify bytes captured for the first port during [`Self::init`], without
    /// re-running the identify command against live hardware.
    #[must_use]
    pub fn cached_first_identify(&self) -> Option<[u8; 2]> {
        self.first_identify
    }

    /// The identify bytes captured for the second port during [`Self::init`].
    #[must_use]
    pub fn cached_second_identify(&self) -> Option<[u8; 2]> {
        self.second_identify
    }

    /// Runs the 200/100/80 sample-rate "magic sequence" on the second port that
    /// unlocks scroll-wheel (and, repeated, 5-button) reporting, then re-identifies the
    /// device to read back its new id byte (§4.F: "magic sample-rate sequence 200, 100,
    /// 80"). Only meaningful when the second port holds a mouse.
    #[must_use]
    pub fn enable_second_port_mouse_extensions(&self) -> crate::drivers::ps2::mouse::MouseKind {
        use crate::drivers::ps2::mouse::MouseKind;

        let set_sample_rate = |rate: u8| {
            self.send_second_port_polling(0xF3);
            let _ = self.read_polling();
            self.send_second_port_polling(rate);
            let _ = self.read_polling();
        };

        set_sample_rate(200);
        set_sample_rate(100);
        set_sample_rate(80);

        self.send_second_port_polling(0xF2);
        let _ = self.read_polling();
        match self.read_polling() {
            0x03 => MouseKind::Scroll,
            0x04 => MouseKind::FiveButton,
            _ => MouseKind::Standard,
        }
    }

    /// Identical to [`Self::enable_second_port_mouse_extensions`] but for a mouse wired
    /// to the first port (single-port controllers where the sole device is a mouse).
    #[must_use]
    pub fn enable_first_port_mouse_extensions(&self) -> crate::drivers::ps2::mouse::MouseKind {
        use crate::drivers::ps2::mouse::MouseKind;

        let set_sample_rate = |rate: u8| {
            self.send_first_port_polling(0xF3);
            let _ = self.read_polling();
            self.send_first_port_polling(rate);
            let _ = self.read_polling();
        };

        set_sample_rate(200);
        set_sample_rate(100);
        set_sample_rate(80);

        self.send_first_port_polling(0xF2);
        let _ = self.read_polling();
        match self.read_polling() {
            0x03 => MouseKind::Scroll,
            0x04 => MouseKind::FiveButton,
            _ => MouseKind::Standard,
        }
    }

    /// The identify bytes read back during bring-up for the first port, if any device
    /// was detected there. Two bytes for a keyboard (`0xAB, 0x83/0x41/...`), one byte
    /// (padded) for a mouse (`0x00`/`0x03`/`0x04`), `None` if nothing answered.
    #[must_use]
    pub fn first_device_identify(&self) -> Option<[u8; 2]> {
        match self.port_status {
            PS2ControllerPortStatus::SinglePort | PS2ControllerPortStatus::DualPort => {
                self.send_first_port_polling(0xF5);
                if !matches!(PS2DeviceResponse::from(self.read_polling()), PS2DeviceResponse::Ack) {
                    return None;
                }
                self.send_first_port_polling(0xF2);
                if !matches!(PS2DeviceResponse::from(self.read_polling()), PS2DeviceResponse::Ack) {
                    return None;
                }
                Some([self.read_polling(), self.read_polling()])
            }
            _ => None,
        }
    }

    /// The identify bytes read back during bring-up for the second port. See
    /// [`Self::first_device_identify`].
    #[must_use]
    pub fn second_device_identify(&self) -> Option<[u8; 2]> {
        match self.port_status {
            PS2ControllerPortStatus::SecondPortOnly | PS2ControllerPortStatus::DualPort => {
                self.send_second_port_polling(0xF5);
                if !matches!(PS2DeviceResponse::from(self.read_polling()), PS2DeviceResponse::Ack) {
                    return None;
                }
                self.send_second_port_polling(0xF2);
                if !matches!(PS2DeviceResponse::from(self.read_polling()), PS2DeviceResponse::Ack) {
                    return None;
                }
                Some([self.read_polling(), self.read_polling()])
            }
            _ => None,
        }
    }

    fn first_device_reset(&self) -> bool {
        self.send_first_port_polling(0xFF);
        matches!(PS2DeviceResponse::from(self.read_polling()), PS2DeviceResponse::SelfTestPassed)
    }

    fn second_device_reset(&self) -> bool {
        self.send_second_port_polling(0xFF);
        matches!(PS2DeviceResponse::from(self.read_polling()), PS2DeviceResponse::SelfTestPassed)
    }

    fn first_port_self_test(&self) -> bool {
        self.send_command_polling(PS2ControllerCommand::TestFirstPort);
        self.read_polling() == 0
    }

    fn second_port_self_test(&self) -> bool {
        self.send_command_polling(PS2ControllerCommand::TestSecondPort);
        self.read_polling() == 0
    }

    fn self_test(&self) -> bool {
        self.send_command_polling(PS2ControllerCommand::TestController);
        self.read_polling() == 0x55
    }

    fn send_first_port_polling(&self, data: u8) {
        wait_for_or!(!self.read_status().input_buffer_status(), 50, return);
        outb(PS2_DATA_PORT, data);
    }

    fn send_second_port_polling(&self, data: u8) {
        self.send_command_polling(PS2ControllerCommand::WriteSecondPortInput);
        wait_for_or!(!self.read_status().input_buffer_status(), 50, return);
        outb(PS2_DATA_PORT, data);
    }

    fn send_command_polling(&self, cmd: PS2ControllerCommand) {
        wait_for_or!(!self.read_status().input_buffer_status(), 50, return);
        outb(PS2_CMD_REG, cmd.into());
    }

    fn send_byte_polling(&self, data: u8) {
        wait_for_or!(!self.read_status().input_buffer_status(), 50, return);
        outb(PS2_CMD_REG, data);
    }

    fn read_polling(&self) -> u8 {
        wait_for_or!(self.read_status().output_buffer_status(), 50, return 0xff);
        inb(PS2_DATA_PORT)
    }

    #[must_use]
    pub fn read_status(&self) -> PS2StatusRegister {
        let status_byte = inb(PS2_STATUS_PORT);
        PS2StatusRegister::from_bytes([status_byte])
    }

    pub fn write_configuration(&self, conf: PS2ConfigurationByte) {
        self.send_command_polling(PS2ControllerCommand::WriteControllerConfiguration);
        self.send_byte_polling(conf.into_bytes()[0]);
    }

    #[must_use]
    pub fn read_configuration(&self) -> PS2ConfigurationByte {
        self.send_command_polling(PS2ControllerCommand::ReadControllerConfiguration);
        let conf_bytes = self.read_polling();
        PS2ConfigurationByte::from_bytes([conf_bytes])
    }

    /// Reads one raw byte from the data port if the output buffer is non-empty,
    /// otherwise returns `None` without blocking. The non-blocking counterpart to
    /// [`Self::read_polling`], used by the input aggregator's per-frame drain (§4.G
    /// step 3/4: "Read at most one mouse/keyboard packet (non-blocking)").
    #[must_use]
    pub fn try_read_data(&self) -> Option<u8> {
        if self.read_status().output_buffer_status() {
            Some(inb(PS2_DATA_PORT))
        } else {
            None
        }
    }
}

#[macro_export]
macro_rules! define_ps2_enum {
    ($enum: tt, $(($variant: tt, $cmd_code: literal)), *) => {
        #[derive(Debug, Clone, Copy, Eq, PartialEq)]
        pub enum $enum {
            $(
                $variant,
            )*
            Unknown
        }

        impl From<$enum> for u8 {
            fn from(value: $enum) -> Self {
                match value {
                    $(
                    $enum::$variant => $cmd_code,
                    )*
                    $enum::Unknown => 0xFF,
                }
            }
        }

        impl From<u8> for $enum {
            fn from(value: u8) -> Self {
                match value {
                    $(
                    $cmd_code => Self::$variant,
                        )*
                    _ => Self::Unknown
                }
            }
        }
    };
}

define_ps2_enum!(
    PS2ControllerCommand,
    (ReadControllerConfiguration, 0x20),
    (WriteControllerConfiguration, 0x60),
    (DisableSecondPort, 0xA7),
    (EnableSecondPort, 0xA8),
    (TestSecondPort, 0xA9),
    (TestController, 0xAA),
    (TestFirstPort, 0xAB),
    (DiagnosticDump, 0xAC),
    (DisableFirstPort, 0xAD),
    (EnableFirstPort, 0xAE),
    (ReadInputPort, 0xC0),
    (ReadOutputPort, 0xD0),
    (WriteOutputPort, 0xD1),
    (WriteFirstPortOutput, 0xD2),
    (WriteSecondPortOutput, 0xD3),
    (WriteSecondPortInput, 0xD4)
);

define_ps2_enum!(
    PS2DeviceResponse,
    (InternalError, 0x00),
    (SelfTestPassed, 0xAA),
    (EchoResponse, 0xEE),
    (Ack, 0xFA),
    (SelfTestFailed, 0xFC),
    (Resend, 0xFE),
    (AltInternalError, 0xFF)
);
