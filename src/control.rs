//! Control transfer engine
//!
//! The engine moves one control transfer at a time through its stages. The
//! dispatcher decides what to answer; the engine splits the answer into
//! transactions no larger than the control endpoint's max packet size, runs
//! the status stage, and reports when the host acknowledged it.
//!
//! A new setup packet always wins. Whatever the engine was doing is dropped
//! without a completion, and the new request starts from scratch.

use usb_device::{control::Request, endpoint::EndpointAddress, UsbDirection};

use crate::{
    class::{DriverId, Response},
    config::CONTROL_BUFFER_LEN,
    error::Error,
    event::TransferResult,
    hardware::{Hardware, Transfer},
    registry::{ctrl_ep0_in, ctrl_ep0_out, EndpointRegistry},
};

/// Control transfer stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Stage {
    /// No transfer in progress
    Idle,
    /// A setup packet arrived, and it's being dispatched
    Setup,
    /// Moving data
    Data,
    /// Waiting for the zero-length status transaction
    Status,
}

/// What to do once the host acknowledges the status stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    None,
    /// Apply the device address
    SetAddress(u8),
    /// Tell this driver that its transfer finished
    Driver(DriverId),
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Static(&'static [u8]),
    Buffer,
}

#[derive(Debug, Clone, Copy)]
struct ControlTransfer {
    request: Request,
    source: Source,
    /// Bytes to move in the data stage, never more than wLength
    total: usize,
    transferred: usize,
    /// Size of the transaction in flight
    in_flight: usize,
    completion: Completion,
}

impl ControlTransfer {
    fn data_endpoint(&self) -> EndpointAddress {
        match self.request.direction {
            UsbDirection::In => ctrl_ep0_in(),
            UsbDirection::Out => ctrl_ep0_out(),
        }
    }

    fn status_endpoint(&self) -> EndpointAddress {
        match self.request.direction {
            UsbDirection::In => ctrl_ep0_out(),
            UsbDirection::Out => ctrl_ep0_in(),
        }
    }
}

/// Result of feeding the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    /// Waiting for the next transaction
    Pending,
    /// The host acknowledged the status stage
    Complete {
        request: Request,
        completion: Completion,
    },
    /// The hardware reported a failure. The transfer is dropped.
    Aborted(TransferResult),
    /// The engine stalled the control endpoint
    Stalled,
    /// The completion didn't belong to the current transfer
    Stray,
}

/// State of the control endpoint
pub struct ControlEngine {
    stage: Stage,
    transfer: Option<ControlTransfer>,
    buffer: [u8; CONTROL_BUFFER_LEN],
    max_packet_size: usize,
}

impl ControlEngine {
    pub(crate) const fn new(max_packet_size: usize) -> Self {
        ControlEngine {
            stage: Stage::Idle,
            transfer: None,
            buffer: [0; CONTROL_BUFFER_LEN],
            max_packet_size,
        }
    }

    /// Returns the current stage
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns the request being handled, or the last one handled
    pub fn request(&self) -> Option<&Request> {
        self.transfer.as_ref().map(|transfer| &transfer.request)
    }

    /// Drop all transfer state
    pub(crate) fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.transfer = None;
    }

    /// A setup packet arrived
    ///
    /// Returns `true` if this aborted a transfer in progress.
    pub(crate) fn setup(&mut self) -> bool {
        let aborted = !matches!(self.stage, Stage::Idle);
        if aborted {
            debug!("CTRL abort in stage {}", self.stage as u8);
        }
        self.transfer = None;
        self.stage = Stage::Setup;
        aborted
    }

    /// The control buffer, for the dispatcher to fill
    pub(crate) fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// The bytes moved by the most recent data stage
    pub(crate) fn data(&self) -> &[u8] {
        match self.transfer {
            Some(ControlTransfer {
                source: Source::Static(bytes),
                transferred,
                ..
            }) => &bytes[..transferred],
            Some(ControlTransfer {
                source: Source::Buffer,
                transferred,
                ..
            }) => &self.buffer[..transferred],
            None => &[],
        }
    }

    /// Start the transfer the dispatcher decided on
    pub(crate) fn begin(
        &mut self,
        request: Request,
        response: Response,
        completion: Completion,
        hw: &mut dyn Hardware,
        registry: &mut EndpointRegistry,
    ) -> Progress {
        let (source, len, direction) = match response {
            Response::Stall => return self.stall(hw, registry),
            Response::In(bytes) => (Source::Static(bytes), bytes.len(), UsbDirection::In),
            Response::InBuffer(len) => (Source::Buffer, len, UsbDirection::In),
            Response::Out(len) => (Source::Buffer, len, UsbDirection::Out),
            Response::Status => (Source::Static(&[]), 0, request.direction),
        };

        if direction != request.direction {
            error!("CTRL answer direction doesn't match request {}", request.request);
            return self.stall(hw, registry);
        }
        if matches!(source, Source::Buffer) && len > CONTROL_BUFFER_LEN {
            error!("CTRL answer length {} exceeds the control buffer", len);
            return self.stall(hw, registry);
        }

        let transfer = ControlTransfer {
            request,
            source,
            total: len.min(request.length as usize),
            transferred: 0,
            in_flight: 0,
            completion,
        };
        self.transfer = Some(transfer);

        // A zero-length answer to an IN request with wLength > 0 still
        // gets its zero-length data transaction.
        let skip_data = request.length == 0
            || (transfer.total == 0 && request.direction == UsbDirection::Out);
        if skip_data {
            self.start_status_stage(hw, registry)
        } else {
            self.stage = Stage::Data;
            self.start_data_transaction(hw, registry)
        }
    }

    fn start_data_transaction(
        &mut self,
        hw: &mut dyn Hardware,
        registry: &mut EndpointRegistry,
    ) -> Progress {
        let Some(transfer) = self.transfer.as_mut() else {
            return Progress::Stray;
        };
        let offset = transfer.transferred;
        let size = (transfer.total - offset).min(self.max_packet_size);
        transfer.in_flight = size;

        let submitted = match transfer.request.direction {
            UsbDirection::In => {
                let bytes = match transfer.source {
                    Source::Static(bytes) => &bytes[offset..offset + size],
                    Source::Buffer => &self.buffer[offset..offset + size],
                };
                registry.submit(ctrl_ep0_in(), Transfer::In(bytes), hw)
            }
            UsbDirection::Out => registry.submit(ctrl_ep0_out(), Transfer::Out(size), hw),
        };

        match submitted {
            Ok(()) => {
                trace!("CTRL DATA {} of {}", size, transfer.total);
                Progress::Pending
            }
            Err(err) => {
                debug_assert!(err != Error::RegistryConflict, "EP0 data stage while busy");
                self.stall(hw, registry)
            }
        }
    }

    fn start_status_stage(
        &mut self,
        hw: &mut dyn Hardware,
        registry: &mut EndpointRegistry,
    ) -> Progress {
        let Some(transfer) = self.transfer.as_ref() else {
            return Progress::Stray;
        };
        self.stage = Stage::Status;
        let status = transfer.status_endpoint();
        let submitted = match status.direction() {
            UsbDirection::In => registry.submit(status, Transfer::In(&[]), hw),
            UsbDirection::Out => registry.submit(status, Transfer::Out(0), hw),
        };
        match submitted {
            Ok(()) => {
                trace!("CTRL STATUS");
                Progress::Pending
            }
            Err(err) => {
                debug_assert!(err != Error::RegistryConflict, "EP0 status stage while busy");
                self.stall(hw, registry)
            }
        }
    }

    /// A transaction completed on one of the control endpoints
    pub(crate) fn transaction_complete(
        &mut self,
        address: EndpointAddress,
        len: usize,
        result: TransferResult,
        hw: &mut dyn Hardware,
        registry: &mut EndpointRegistry,
    ) -> Progress {
        let expected = match (self.stage, self.transfer.as_ref()) {
            (Stage::Data, Some(transfer)) => transfer.data_endpoint(),
            (Stage::Status, Some(transfer)) => transfer.status_endpoint(),
            _ => return Progress::Stray,
        };
        if address != expected {
            return Progress::Stray;
        }
        registry.clear_busy(address);

        if result != TransferResult::Success {
            debug!("CTRL transaction failed in stage {}", self.stage as u8);
            self.reset();
            return Progress::Aborted(result);
        }

        match self.stage {
            Stage::Data => self.data_transaction_complete(len, hw, registry),
            _ => {
                self.stage = Stage::Idle;
                match self.transfer.as_ref() {
                    Some(transfer) => Progress::Complete {
                        request: transfer.request,
                        completion: transfer.completion,
                    },
                    None => Progress::Stray,
                }
            }
        }
    }

    fn data_transaction_complete(
        &mut self,
        len: usize,
        hw: &mut dyn Hardware,
        registry: &mut EndpointRegistry,
    ) -> Progress {
        let max_packet_size = self.max_packet_size;
        let Some(transfer) = self.transfer.as_mut() else {
            return Progress::Stray;
        };
        if len > transfer.in_flight {
            debug!("CTRL host moved {} bytes, expected {}", len, transfer.in_flight);
            return self.stall(hw, registry);
        }

        if transfer.request.direction == UsbDirection::Out && len > 0 {
            let offset = transfer.transferred;
            let read = hw.read_transfer(ctrl_ep0_out(), &mut self.buffer[offset..offset + len]);
            if read != len {
                warn!("CTRL read {} of {} received bytes", read, len);
                return self.stall(hw, registry);
            }
        }
        transfer.transferred += len;

        let short = len < max_packet_size;
        if transfer.transferred < transfer.total && !short {
            return self.start_data_transaction(hw, registry);
        }

        // A full last packet doesn't tell the host that the data ended
        // early. Follow it with a zero-length packet.
        let needs_zlp = transfer.request.direction == UsbDirection::In
            && !short
            && transfer.total < transfer.request.length as usize;
        if needs_zlp {
            self.start_data_transaction(hw, registry)
        } else {
            self.start_status_stage(hw, registry)
        }
    }

    /// Stall both control endpoint directions
    ///
    /// The hardware clears the stall when the next setup packet arrives.
    pub(crate) fn stall(&mut self, hw: &mut dyn Hardware, registry: &mut EndpointRegistry) -> Progress {
        debug!("CTRL STALL");
        hw.stall_endpoint(ctrl_ep0_out());
        hw.stall_endpoint(ctrl_ep0_in());
        registry.mark_control_stalled();
        self.reset();
        Progress::Stalled
    }
}
