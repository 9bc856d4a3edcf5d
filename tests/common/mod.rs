//! Shared test utilities
//!
//! Recording device and host controller drivers, a class driver that logs
//! its callbacks, and the descriptors of a two-function device:
//!
//! - interface 0: vendor specific, bulk endpoints 0x81 and 0x01
//! - interfaces 1 and 2: a CDC-like pair behind an interface association,
//!   interrupt endpoint 0x82, bulk endpoints 0x83 and 0x03

#![allow(dead_code)]

pub mod mock_hardware;
pub mod mock_host;
pub mod test_class;

#[allow(unused_imports)]
pub use mock_hardware::{HwCall, MockHardware};
#[allow(unused_imports)]
pub use mock_host::{HostCall, MockHost, Outcome, Outcomes, Recorder};
#[allow(unused_imports)]
pub use test_class::{ClassCall, Log, TestClass, ANSWER};

use usb_device::endpoint::EndpointAddress;
use usbd_ctrl::{
    config::Config,
    descriptor::Descriptors,
    device::UsbDevice,
    event::{EventQueue, TransferResult},
    request::SetupPacket,
};

pub const DEVICE: [u8; 18] = [
    0x12, // bLength
    0x01, // bDescriptorType (DEVICE)
    0x00, 0x02, // bcdUSB (2.0)
    0xEF, // bDeviceClass (miscellaneous)
    0x02, // bDeviceSubClass
    0x01, // bDeviceProtocol (IAD)
    0x08, // bMaxPacketSize0
    0x09, 0x12, // idVendor
    0x01, 0x00, // idProduct
    0x00, 0x01, // bcdDevice (1.0)
    0x01, // iManufacturer
    0x00, // iProduct
    0x00, // iSerialNumber
    0x01, // bNumConfigurations
];

pub const CONFIG: [u8; 84] = [
    // Configuration 1: bus powered, remote wakeup
    9, 2, 84, 0, 3, 1, 0, 0xA0, 50,
    // Interface 0, vendor specific
    9, 4, 0, 0, 2, 0xFF, 0, 0, 0,
    7, 5, 0x81, 2, 64, 0, 0,
    7, 5, 0x01, 2, 64, 0, 0,
    // Association of interfaces 1 and 2
    8, 11, 1, 2, 2, 2, 0, 0,
    // Interface 1, communications
    9, 4, 1, 0, 1, 2, 2, 0, 0,
    5, 0x24, 0, 0x10, 0x01,
    7, 5, 0x82, 3, 8, 0, 16,
    // Interface 2, data
    9, 4, 2, 0, 2, 0x0A, 0, 0, 0,
    7, 5, 0x83, 2, 64, 0, 0,
    7, 5, 0x03, 2, 64, 0, 0,
];

/// A configuration that nobody accepts
pub const ORPHAN_CONFIG: [u8; 18] = [
    9, 2, 18, 0, 1, 2, 0, 0x80, 50,
    9, 4, 0, 0, 0, 0x08, 0, 0, 0,
];

pub const LANGUAGES: [u8; 4] = [4, 3, 0x09, 0x04];
pub const MANUFACTURER: [u8; 8] = [8, 3, b'u', 0, b's', 0, b'b', 0];

pub struct TestDescriptors;

impl Descriptors for TestDescriptors {
    fn device(&self) -> &'static [u8] {
        &DEVICE
    }

    fn configuration(&self, index: u8) -> Option<&'static [u8]> {
        match index {
            0 => Some(&CONFIG),
            1 => Some(&ORPHAN_CONFIG),
            _ => None,
        }
    }

    fn string(&self, index: u8, language_id: u16) -> Option<&'static [u8]> {
        match (index, language_id) {
            (0, _) => Some(&LANGUAGES),
            (1, 0x0409) => Some(&MANUFACTURER),
            _ => None,
        }
    }
}

pub type Device<'a> = UsbDevice<'a, MockHardware>;

/// A device with a control endpoint of `max_packet_size_0` bytes
///
/// Register drivers, then call `init()`.
pub fn device(events: &EventQueue, max_packet_size_0: u8) -> Device<'_> {
    UsbDevice::new(
        MockHardware::default(),
        events,
        &TestDescriptors,
        Config::new().max_packet_size_0(max_packet_size_0),
    )
}

pub fn setup(events: &EventQueue, packet: SetupPacket) {
    assert!(events.setup_received(packet.to_bytes(), true));
}

pub fn complete(events: &EventQueue, ep: u8, len: usize) {
    assert!(events.transfer_complete(
        EndpointAddress::from(ep),
        len,
        TransferResult::Success,
        true
    ));
}

pub fn fail(events: &EventQueue, ep: u8) {
    assert!(events.transfer_complete(
        EndpointAddress::from(ep),
        0,
        TransferResult::Failed,
        true
    ));
}

/// Run a request without a data stage through to its status stage
pub fn no_data(device: &mut Device<'_>, events: &EventQueue, packet: SetupPacket) {
    setup(events, packet);
    device.task();
    complete(events, 0x80, 0);
    device.task();
}

/// Select configuration 1
pub fn configure(device: &mut Device<'_>, events: &EventQueue) {
    no_data(device, events, SetupPacket::set_configuration(1));
    assert!(device.is_configured());
}
