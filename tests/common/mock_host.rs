//! A host controller driver that records every call, and a handler that
//! records every outcome

use std::{cell::RefCell, collections::VecDeque};

use usb_device::endpoint::EndpointAddress;
use usbd_ctrl::{
    event::TransferResult,
    host::{ControlResult, HostHandler, HostHardware},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Setup { device: u8, bytes: [u8; 8] },
    Out { device: u8, ep: u8, len: usize },
    In { device: u8, ep: u8, len: usize },
    Abort { device: u8, ep: u8 },
}

#[derive(Debug, Default)]
pub struct MockHost {
    pub calls: Vec<HostCall>,
    /// Bytes of every OUT data transaction, in order
    pub sent: Vec<u8>,
    /// Bytes that the device "sent" to IN transactions
    pub rx: VecDeque<u8>,
    pub reject_setup: bool,
    pub reject_submit: bool,
}

impl MockHost {
    /// Returns the `(endpoint, length)` of every data and status transaction
    pub fn transactions(&self) -> Vec<(u8, usize)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HostCall::Out { ep, len, .. } | HostCall::In { ep, len, .. } => Some((*ep, *len)),
                _ => None,
            })
            .collect()
    }

    pub fn setups(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, HostCall::Setup { .. }))
            .count()
    }
}

impl HostHardware for MockHost {
    fn send_setup(&mut self, device: u8, setup: &[u8; 8]) -> bool {
        self.calls.push(HostCall::Setup {
            device,
            bytes: *setup,
        });
        !self.reject_setup
    }

    fn submit_out(&mut self, device: u8, address: EndpointAddress, data: &[u8]) -> bool {
        self.calls.push(HostCall::Out {
            device,
            ep: address.into(),
            len: data.len(),
        });
        if self.reject_submit {
            return false;
        }
        self.sent.extend_from_slice(data);
        true
    }

    fn submit_in(&mut self, device: u8, address: EndpointAddress, len: usize) -> bool {
        self.calls.push(HostCall::In {
            device,
            ep: address.into(),
            len,
        });
        !self.reject_submit
    }

    fn read_transfer(&mut self, _: u8, _: EndpointAddress, buffer: &mut [u8]) -> usize {
        let len = buffer.len().min(self.rx.len());
        for (dst, src) in buffer.iter_mut().zip(self.rx.drain(..len)) {
            *dst = src;
        }
        len
    }

    fn abort_transfer(&mut self, device: u8, address: EndpointAddress) {
        self.calls.push(HostCall::Abort {
            device,
            ep: address.into(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A control transfer ended: device, bRequest, result, data stage bytes
    Control(u8, u8, TransferResult, Vec<u8>),
    /// A non-control transfer ended
    Transfer(u8, usize, TransferResult),
}

pub type Outcomes = RefCell<Vec<Outcome>>;

pub struct Recorder<'l> {
    outcomes: &'l Outcomes,
}

impl<'l> Recorder<'l> {
    pub fn new(outcomes: &'l Outcomes) -> Self {
        Recorder { outcomes }
    }
}

impl HostHandler for Recorder<'_> {
    fn control_complete(&mut self, result: &ControlResult<'_>) {
        self.outcomes.borrow_mut().push(Outcome::Control(
            result.device,
            result.setup.request,
            result.result,
            result.data.to_vec(),
        ));
    }

    fn transfer_complete(&mut self, address: EndpointAddress, len: usize, result: TransferResult) {
        self.outcomes
            .borrow_mut()
            .push(Outcome::Transfer(address.into(), len, result));
    }
}
