//! Control transfers in the host role
//!
//! A [`UsbHost`] runs control transfers against attached devices, one at a
//! time. It shares the device role's [`EventQueue`] and
//! [`EndpointRegistry`]: the host controller driver posts a
//! [`TransferComplete`](Event::TransferComplete) for every stage, and the
//! registry keeps a second transaction off a pipe that's still busy.
//!
//! A control transfer moves through three stages:
//!
//! 1. The 8 setup bytes go out on EP0 OUT. The controller reports their
//!    completion on EP0 OUT, with a length of 8.
//! 2. For wLength > 0, data moves in the request direction, in transactions
//!    of at most the device's EP0 max packet size. A short packet ends the
//!    stage early.
//! 3. A zero-length status transaction moves in the opposite direction.
//!    Requests without a data stage finish with an IN status.
//!
//! Once the status stage completes, the [`HostHandler`] learns the result.
//! A failed or stalled stage ends the transfer there, and the handler sees
//! that result instead.
//!
//! ```
//! use usbd_ctrl::{
//!     event::{EventQueue, TransferResult},
//!     host::{ControlResult, HostHandler, HostHardware, UsbHost},
//!     request::SetupPacket,
//! };
//! use usb_device::endpoint::EndpointAddress;
//!
//! struct Controller;
//! impl HostHardware for Controller {
//!     // Program the host controller's pipes...
//! #   fn send_setup(&mut self, _: u8, _: &[u8; 8]) -> bool { true }
//! #   fn submit_out(&mut self, _: u8, _: EndpointAddress, _: &[u8]) -> bool { true }
//! #   fn submit_in(&mut self, _: u8, _: EndpointAddress, _: usize) -> bool { true }
//! #   fn read_transfer(&mut self, _: u8, _: EndpointAddress, _: &mut [u8]) -> usize { 0 }
//! #   fn abort_transfer(&mut self, _: u8, _: EndpointAddress) {}
//! }
//!
//! #[derive(Default)]
//! struct Enumeration {
//!     done: bool,
//! }
//! impl HostHandler for Enumeration {
//!     fn control_complete(&mut self, result: &ControlResult<'_>) {
//!         self.done = result.result == TransferResult::Success;
//!     }
//! }
//!
//! static EVENTS: EventQueue = EventQueue::new();
//! let mut enumeration = Enumeration::default();
//! let mut host = UsbHost::new(Controller, &EVENTS, &mut enumeration);
//!
//! host.control_transfer(0, 8, SetupPacket::set_address(1), &[]).unwrap();
//! EVENTS.transfer_complete(EndpointAddress::from(0x00), 8, TransferResult::Success, true);
//! host.task();
//! EVENTS.transfer_complete(EndpointAddress::from(0x80), 0, TransferResult::Success, true);
//! host.task();
//! assert!(host.is_idle());
//! ```

use usb_device::{endpoint::EndpointAddress, UsbDirection};

use crate::{
    config::CONTROL_BUFFER_LEN,
    control::Stage,
    error::{Error, Result},
    event::{BusSignal, Event, EventQueue, EventRecord, TransferResult, DEFAULT_QUEUE_DEPTH},
    registry::{ctrl_ep0_in, ctrl_ep0_out, EndpointRegistry},
    request::{self, SetupPacket},
};

/// The host controller driver contract
///
/// Like [`Hardware`](crate::hardware::Hardware), every call only starts
/// the work. Completions arrive later through the [`EventQueue`], named by
/// the endpoint address on the device side.
pub trait HostHardware {
    /// Send 8 setup bytes to EP0 of `device`
    ///
    /// Returns `false` if the controller can't start the transaction.
    fn send_setup(&mut self, device: u8, setup: &[u8; 8]) -> bool;
    /// Send `data` to the OUT endpoint `address` of `device`
    fn submit_out(&mut self, device: u8, address: EndpointAddress, data: &[u8]) -> bool;
    /// Receive up to `len` bytes from the IN endpoint `address` of `device`
    fn submit_in(&mut self, device: u8, address: EndpointAddress, len: usize) -> bool;
    /// Copy out what the last IN transaction on `address` received
    ///
    /// Returns the number of bytes copied.
    fn read_transfer(&mut self, device: u8, address: EndpointAddress, buffer: &mut [u8]) -> usize;
    /// Cancel the transaction in flight on `address`
    fn abort_transfer(&mut self, device: u8, address: EndpointAddress);
}

/// How a control transfer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlResult<'b> {
    /// Device address
    pub device: u8,
    /// The request, as sent
    pub setup: SetupPacket,
    /// `Success` once the status stage completed
    pub result: TransferResult,
    /// Data stage bytes moved before the transfer ended
    ///
    /// For an IN request, what the device sent.
    pub data: &'b [u8],
}

/// Receives the outcome of host transfers
pub trait HostHandler {
    /// A control transfer ended
    fn control_complete(&mut self, result: &ControlResult<'_>);

    /// A transfer on a non-control endpoint ended
    fn transfer_complete(&mut self, _address: EndpointAddress, _len: usize, _result: TransferResult) {}
}

/// Diagnostic counters of the host role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct HostStats {
    /// Control transfers ended by a failed stage
    pub failed_transfers: u32,
    /// Control transfers ended by a STALL handshake
    pub stalls: u32,
    /// Completions that didn't belong to the transfer in flight
    pub stray_completions: u32,
    /// Control transfers dropped without a completion
    pub aborted_transfers: u32,
    /// Events lost to a full event queue
    pub dropped_events: u32,
}

#[derive(Debug, Clone, Copy)]
struct HostTransfer {
    device: u8,
    setup: SetupPacket,
    direction: UsbDirection,
    max_packet_size: usize,
    total: usize,
    transferred: usize,
    in_flight: usize,
}

impl HostTransfer {
    fn data_endpoint(&self) -> EndpointAddress {
        match self.direction {
            UsbDirection::In => ctrl_ep0_in(),
            UsbDirection::Out => ctrl_ep0_out(),
        }
    }

    fn status_endpoint(&self) -> EndpointAddress {
        match (self.total, self.direction) {
            (0, _) | (_, UsbDirection::Out) => ctrl_ep0_in(),
            (_, UsbDirection::In) => ctrl_ep0_out(),
        }
    }
}

/// The host side of a USB stack
pub struct UsbHost<'a, H, const Q: usize = DEFAULT_QUEUE_DEPTH> {
    hw: H,
    events: &'a EventQueue<Q>,
    handler: &'a mut dyn HostHandler,
    registry: EndpointRegistry,
    stage: Stage,
    transfer: Option<HostTransfer>,
    buffer: [u8; CONTROL_BUFFER_LEN],
    stats: HostStats,
}

impl<'a, H: HostHardware, const Q: usize> UsbHost<'a, H, Q> {
    /// Create a host
    ///
    /// `events` is the queue that the host controller driver posts to.
    /// `handler` learns how each transfer ended.
    pub fn new(hw: H, events: &'a EventQueue<Q>, handler: &'a mut dyn HostHandler) -> Self {
        let mut registry = EndpointRegistry::new();
        registry.open_control(64);
        UsbHost {
            hw,
            events,
            handler,
            registry,
            stage: Stage::Idle,
            transfer: None,
            buffer: [0; CONTROL_BUFFER_LEN],
            stats: HostStats::default(),
        }
    }

    /// Start a control transfer with `device`
    ///
    /// `max_packet_size` is the EP0 max packet size of `device`; use 8
    /// until its device descriptor says otherwise. For an OUT request,
    /// `data` holds the wLength bytes of the data stage. For an IN request,
    /// `data` must be empty.
    ///
    /// Fails with [`Error::InvalidState`] while another control transfer is
    /// in flight, and with [`Error::HardwareRejected`] if the controller
    /// refused the setup packet. Either way, nothing changes.
    pub fn control_transfer(
        &mut self,
        device: u8,
        max_packet_size: u16,
        setup: SetupPacket,
        data: &[u8],
    ) -> Result<()> {
        if self.stage != Stage::Idle {
            return Err(Error::InvalidState);
        }

        let length = setup.length as usize;
        let bytes = setup.to_bytes();
        let direction = request::parse(&bytes).direction;
        let data_matches = match direction {
            UsbDirection::In => data.is_empty(),
            UsbDirection::Out => data.len() == length,
        };
        if !matches!(max_packet_size, 8 | 16 | 32 | 64)
            || length > CONTROL_BUFFER_LEN
            || !data_matches
        {
            return Err(Error::InvalidConfig);
        }

        self.registry.mark_busy(ctrl_ep0_out())?;
        if !self.hw.send_setup(device, &bytes) {
            warn!("HOST setup to device {} rejected", device);
            self.registry.clear_busy(ctrl_ep0_out());
            return Err(Error::HardwareRejected);
        }

        self.buffer[..data.len()].copy_from_slice(data);
        self.transfer = Some(HostTransfer {
            device,
            setup,
            direction,
            max_packet_size: max_packet_size as usize,
            total: length,
            transferred: 0,
            in_flight: 0,
        });
        self.stage = Stage::Setup;
        trace!("HOST SETUP device {} request {}", device, setup.request);
        Ok(())
    }

    /// Cancel the control transfer in flight, without a completion
    ///
    /// Returns `true` if there was one.
    pub fn abort(&mut self) -> bool {
        let pending = match (self.stage, self.transfer.as_ref()) {
            (Stage::Setup, Some(transfer)) => Some((transfer.device, ctrl_ep0_out())),
            (Stage::Data, Some(transfer)) => Some((transfer.device, transfer.data_endpoint())),
            (Stage::Status, Some(transfer)) => Some((transfer.device, transfer.status_endpoint())),
            _ => None,
        };
        if let Some((device, address)) = pending {
            self.hw.abort_transfer(device, address);
        }
        self.drop_transfer()
    }

    /// Handle every queued event
    ///
    /// Returns the number of events handled.
    pub fn task(&mut self) -> usize {
        let dropped = self.events.take_dropped();
        if dropped != 0 {
            warn!("{} events dropped", dropped);
            self.stats.dropped_events = self.stats.dropped_events.saturating_add(dropped);
        }

        let mut handled = 0;
        while let Some(record) = self.events.pop() {
            self.handle(record);
            handled += 1;
        }
        handled
    }

    /// Returns the control transfer stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Indicates if a new control transfer can start
    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    /// Returns the diagnostic counters
    pub fn stats(&self) -> HostStats {
        self.stats
    }

    /// Returns the endpoint registry
    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    /// Returns the host controller driver
    pub fn hardware(&self) -> &H {
        &self.hw
    }

    /// Returns the host controller driver
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    fn handle(&mut self, record: EventRecord) {
        match record.event {
            Event::TransferComplete {
                address,
                len,
                result,
            } if address.index() == 0 => self.control_complete(address, len, result),
            Event::TransferComplete {
                address,
                len,
                result,
            } => self.handler.transfer_complete(address, len, result),
            Event::Bus(BusSignal::Reset { .. } | BusSignal::Unplugged) => {
                // The controller already dropped whatever was in flight
                if self.drop_transfer() {
                    debug!("HOST control transfer lost to the bus");
                }
            }
            Event::Bus(BusSignal::Suspend | BusSignal::Resume) => {}
            Event::SetupReceived(_) => {
                debug!("HOST ignores a received setup packet");
                self.stats.stray_completions = self.stats.stray_completions.saturating_add(1);
            }
            Event::Deferred { func, arg } => func(arg),
        }
    }

    fn drop_transfer(&mut self) -> bool {
        self.registry.reset_control();
        self.stage = Stage::Idle;
        if self.transfer.take().is_some() {
            self.stats.aborted_transfers = self.stats.aborted_transfers.saturating_add(1);
            true
        } else {
            false
        }
    }

    fn control_complete(&mut self, address: EndpointAddress, len: usize, result: TransferResult) {
        let expected = match (self.stage, self.transfer.as_ref()) {
            (Stage::Setup, Some(_)) => ctrl_ep0_out(),
            (Stage::Data, Some(transfer)) => transfer.data_endpoint(),
            (Stage::Status, Some(transfer)) => transfer.status_endpoint(),
            _ => ctrl_ep0_in(),
        };
        let Some(transfer) = self.transfer.filter(|_| address == expected) else {
            debug!("HOST stray completion on EP {}", u8::from(address));
            self.stats.stray_completions = self.stats.stray_completions.saturating_add(1);
            return;
        };
        self.registry.clear_busy(address);

        if result != TransferResult::Success {
            debug!("HOST stage {} ended with {}", self.stage as u8, result as u8);
            return self.finish(result);
        }

        match self.stage {
            Stage::Setup if transfer.total == 0 => self.start_status_stage(),
            Stage::Setup => {
                self.stage = Stage::Data;
                self.start_data_transaction();
            }
            Stage::Data => self.data_transaction_complete(len),
            _ => self.finish(TransferResult::Success),
        }
    }

    fn start_data_transaction(&mut self) {
        let Some(transfer) = self.transfer.as_mut() else {
            return;
        };
        let offset = transfer.transferred;
        let size = (transfer.total - offset).min(transfer.max_packet_size);
        transfer.in_flight = size;
        let (device, address) = (transfer.device, transfer.data_endpoint());

        if self.submit(device, address, offset, size) {
            trace!("HOST DATA {} at {}", size, offset);
        } else {
            self.finish(TransferResult::Failed);
        }
    }

    fn data_transaction_complete(&mut self, len: usize) {
        let Some(mut transfer) = self.transfer else {
            return;
        };
        if len > transfer.in_flight {
            warn!("HOST device moved {} bytes, expected {}", len, transfer.in_flight);
            return self.finish(TransferResult::Failed);
        }
        if transfer.direction == UsbDirection::In && len > 0 {
            let offset = transfer.transferred;
            let read = self.hw.read_transfer(
                transfer.device,
                ctrl_ep0_in(),
                &mut self.buffer[offset..offset + len],
            );
            if read != len {
                warn!("HOST read {} of {} received bytes", read, len);
                return self.finish(TransferResult::Failed);
            }
        }
        transfer.transferred += len;
        self.transfer = Some(transfer);

        let short = len < transfer.max_packet_size;
        if transfer.transferred < transfer.total && !short {
            self.start_data_transaction();
        } else {
            self.start_status_stage();
        }
    }

    fn start_status_stage(&mut self) {
        let Some(transfer) = self.transfer.as_ref() else {
            return;
        };
        let (device, address) = (transfer.device, transfer.status_endpoint());
        self.stage = Stage::Status;
        if self.submit(device, address, 0, 0) {
            trace!("HOST STATUS");
        } else {
            self.finish(TransferResult::Failed);
        }
    }

    /// Start a transaction of `len` buffer bytes from `offset`
    fn submit(&mut self, device: u8, address: EndpointAddress, offset: usize, len: usize) -> bool {
        if let Err(err) = self.registry.mark_busy(address) {
            debug_assert!(err != Error::RegistryConflict, "EP0 pipe busy");
            return false;
        }
        let accepted = match address.direction() {
            UsbDirection::Out => self
                .hw
                .submit_out(device, address, &self.buffer[offset..offset + len]),
            UsbDirection::In => self.hw.submit_in(device, address, len),
        };
        if !accepted {
            warn!("HOST EP {} transaction rejected", u8::from(address));
            self.registry.clear_busy(address);
        }
        accepted
    }

    /// End the transfer in flight, and tell the handler
    fn finish(&mut self, result: TransferResult) {
        self.stage = Stage::Idle;
        self.registry.reset_control();
        let Some(transfer) = self.transfer.take() else {
            return;
        };
        match result {
            TransferResult::Success => {}
            TransferResult::Stalled => {
                self.stats.stalls = self.stats.stalls.saturating_add(1);
            }
            TransferResult::Failed => {
                self.stats.failed_transfers = self.stats.failed_transfers.saturating_add(1);
            }
        }
        self.handler.control_complete(&ControlResult {
            device: transfer.device,
            setup: transfer.setup,
            result,
            data: &self.buffer[..transfer.transferred],
        });
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::vec::Vec;

    use super::{ControlResult, HostHandler, HostHardware, HostTransfer};
    use crate::{
        control::Stage,
        event::{EventQueue, TransferResult},
        request::SetupPacket,
    };
    use usb_device::{endpoint::EndpointAddress, UsbDirection};

    fn transfer(direction: UsbDirection, total: usize) -> HostTransfer {
        HostTransfer {
            device: 1,
            setup: SetupPacket::get_configuration(),
            direction,
            max_packet_size: 8,
            total,
            transferred: 0,
            in_flight: 0,
        }
    }

    #[test]
    fn status_runs_opposite_to_data() {
        let addr = |ep: u8| EndpointAddress::from(ep);
        assert_eq!(transfer(UsbDirection::In, 18).status_endpoint(), addr(0x00));
        assert_eq!(transfer(UsbDirection::Out, 7).status_endpoint(), addr(0x80));
        assert_eq!(transfer(UsbDirection::Out, 0).status_endpoint(), addr(0x80));
        assert_eq!(transfer(UsbDirection::In, 0).status_endpoint(), addr(0x80));
    }

    #[derive(Default)]
    struct Silent {
        setups: usize,
    }

    impl HostHardware for Silent {
        fn send_setup(&mut self, _: u8, _: &[u8; 8]) -> bool {
            self.setups += 1;
            true
        }
        fn submit_out(&mut self, _: u8, _: EndpointAddress, _: &[u8]) -> bool {
            true
        }
        fn submit_in(&mut self, _: u8, _: EndpointAddress, _: usize) -> bool {
            true
        }
        fn read_transfer(&mut self, _: u8, _: EndpointAddress, _: &mut [u8]) -> usize {
            0
        }
        fn abort_transfer(&mut self, _: u8, _: EndpointAddress) {}
    }

    #[derive(Default)]
    struct Results(Vec<TransferResult>);

    impl HostHandler for Results {
        fn control_complete(&mut self, result: &ControlResult<'_>) {
            self.0.push(result.result);
        }
    }

    #[test]
    fn bad_arguments_change_nothing() {
        let events: EventQueue = EventQueue::new();
        let mut results = Results::default();
        let mut host = super::UsbHost::new(Silent::default(), &events, &mut results);

        let get_configuration = SetupPacket::get_configuration();
        assert!(host.control_transfer(1, 12, get_configuration, &[]).is_err());
        assert!(host.control_transfer(1, 8, get_configuration, &[0]).is_err());
        let line_coding = SetupPacket::new(0x21, 0x20, 0, 0, 7);
        assert!(host.control_transfer(1, 8, line_coding, &[0; 6]).is_err());
        let oversized = SetupPacket::get_descriptor(2, 0, 0, 1024);
        assert!(host.control_transfer(1, 64, oversized, &[]).is_err());

        assert_eq!(host.hardware().setups, 0);
        assert_eq!(host.stage(), Stage::Idle);
    }
}
