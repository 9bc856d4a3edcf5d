//! The hardware driver contract
//!
//! A [`Hardware`] implementation owns the register-level endpoint and FIFO
//! management for one USB controller. The core calls into it from the task
//! context. The implementation reports completions by posting to an
//! [`EventQueue`](crate::event::EventQueue), usually from its interrupt
//! handler.
//!
//! Transfers are asynchronous. `submit_transfer()` only starts the transfer;
//! the completion arrives later as an
//! [`Event::TransferComplete`](crate::event::Event::TransferComplete). The
//! core never submits a second transfer on an endpoint before the first one
//! completes.

use usb_device::endpoint::{
    EndpointAddress, EndpointType, IsochronousSynchronizationType, IsochronousUsageType,
};

use crate::config::Speed;

/// Runtime description of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Endpoint number and direction
    pub address: EndpointAddress,
    /// Transfer type
    pub ep_type: EndpointType,
    /// Maximum packet size
    pub max_packet_size: u16,
    /// Polling interval, for interrupt and isochronous endpoints
    pub interval: u8,
}

impl EndpointInfo {
    /// Describe a control endpoint
    pub const fn control(address: EndpointAddress, max_packet_size: u16) -> Self {
        EndpointInfo {
            address,
            ep_type: EndpointType::Control,
            max_packet_size,
            interval: 0,
        }
    }

    /// Parse a 7 byte endpoint descriptor
    ///
    /// Returns `None` if `desc` isn't an endpoint descriptor.
    pub fn from_descriptor(desc: &[u8]) -> Option<Self> {
        if desc.len() < 7 || (desc[0] as usize) < 7 || desc[1] != crate::descriptor::ENDPOINT {
            return None;
        }
        let attributes = desc[3];
        let ep_type = match attributes & 0b11 {
            0 => EndpointType::Control,
            1 => EndpointType::Isochronous {
                synchronization: match (attributes >> 2) & 0b11 {
                    0 => IsochronousSynchronizationType::NoSynchronization,
                    1 => IsochronousSynchronizationType::Asynchronous,
                    2 => IsochronousSynchronizationType::Adaptive,
                    _ => IsochronousSynchronizationType::Synchronous,
                },
                usage: match (attributes >> 4) & 0b11 {
                    1 => IsochronousUsageType::Feedback,
                    2 => IsochronousUsageType::ImplicitFeedbackData,
                    _ => IsochronousUsageType::Data,
                },
            },
            2 => EndpointType::Bulk,
            _ => EndpointType::Interrupt,
        };
        Some(EndpointInfo {
            address: EndpointAddress::from(desc[2]),
            ep_type,
            max_packet_size: u16::from_le_bytes([desc[4], desc[5]]) & 0x7FF,
            interval: desc[6],
        })
    }

    /// Check the max packet size against the USB limits for `speed`
    pub fn is_valid_for(&self, speed: Speed) -> bool {
        let mps = self.max_packet_size;
        if mps == 0 {
            return false;
        }
        match (self.ep_type, speed) {
            (EndpointType::Control, Speed::Low) => mps == 8,
            (EndpointType::Control, Speed::Full) => matches!(mps, 8 | 16 | 32 | 64),
            (EndpointType::Control, Speed::High) => mps == 64,
            (EndpointType::Bulk, Speed::Low) => false,
            (EndpointType::Bulk, Speed::Full) => matches!(mps, 8 | 16 | 32 | 64),
            (EndpointType::Bulk, Speed::High) => mps == 512,
            (EndpointType::Interrupt, Speed::Low) => mps <= 8,
            (EndpointType::Interrupt, Speed::Full) => mps <= 64,
            (EndpointType::Interrupt, Speed::High) => mps <= 1024,
            (EndpointType::Isochronous { .. }, Speed::Low) => false,
            (EndpointType::Isochronous { .. }, Speed::Full) => mps <= 1023,
            (EndpointType::Isochronous { .. }, Speed::High) => mps <= 1024,
        }
    }
}

/// One transfer handed to the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer<'a> {
    /// Send these bytes to the host
    ///
    /// The driver copies the bytes into endpoint memory before returning.
    In(&'a [u8]),
    /// Receive up to this many bytes from the host
    ///
    /// Fetch the received bytes with [`Hardware::read_transfer`] after the
    /// completion event.
    Out(usize),
}

impl Transfer<'_> {
    /// Returns the number of bytes this transfer moves, at most
    pub fn len(&self) -> usize {
        match self {
            Transfer::In(data) => data.len(),
            Transfer::Out(len) => *len,
        }
    }

    /// Indicates if this is a zero-length transfer
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Operations the core needs from a USB controller driver
///
/// The control endpoint (EP0 OUT and EP0 IN) is always available; drivers
/// configure it on bus reset without an `open_endpoint()` call. A stalled
/// control endpoint must be un-stalled by the driver when the next setup
/// packet arrives.
pub trait Hardware {
    /// Configure and enable a non-control endpoint
    ///
    /// Returns `false` if the hardware can't support the endpoint.
    fn open_endpoint(&mut self, info: &EndpointInfo) -> bool;

    /// Disable an endpoint, abandoning any transfer in flight
    fn close_endpoint(&mut self, address: EndpointAddress);

    /// Start a transfer on `address`
    ///
    /// Returns `false` if the transfer couldn't be started. The completion is
    /// reported through the event queue.
    fn submit_transfer(&mut self, address: EndpointAddress, transfer: Transfer<'_>) -> bool;

    /// Copy the bytes received by the last completed OUT transfer on
    /// `address` into `buffer`
    ///
    /// Returns the number of bytes copied.
    fn read_transfer(&mut self, address: EndpointAddress, buffer: &mut [u8]) -> usize;

    /// Stall an endpoint
    fn stall_endpoint(&mut self, address: EndpointAddress);

    /// Clear an endpoint stall, and reset its data toggle
    fn clear_stall(&mut self, address: EndpointAddress);

    /// Apply the device address
    ///
    /// Only called after the SET_ADDRESS status stage completes.
    fn set_device_address(&mut self, address: u8);

    /// Attach to the bus (enable the pull-up)
    fn connect(&mut self);

    /// Detach from the bus
    fn disconnect(&mut self);

    /// Signal remote wakeup to the host
    fn remote_wakeup(&mut self) {}
}
