//! A hardware driver that records every call
//!
//! Nothing completes on its own. Tests post completions to the event queue,
//! the way an interrupt handler would.

use std::collections::VecDeque;

use usb_device::endpoint::EndpointAddress;
use usbd_ctrl::hardware::{EndpointInfo, Hardware, Transfer};

/// One call into the hardware driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwCall {
    Open(u8),
    Close(u8),
    Submit { ep: u8, len: usize },
    Stall(u8),
    ClearStall(u8),
    SetAddress(u8),
    Connect,
    Disconnect,
    RemoteWakeup,
}

#[derive(Debug, Default)]
pub struct MockHardware {
    pub calls: Vec<HwCall>,
    /// Bytes handed to IN transfers, in order
    pub sent: Vec<u8>,
    /// Bytes that the host "sent" to OUT transfers
    pub rx: VecDeque<u8>,
    pub reject_open: bool,
    pub reject_submit: bool,
}

impl MockHardware {
    /// Returns the `(endpoint, length)` of every submitted transfer
    pub fn submits(&self) -> Vec<(u8, usize)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HwCall::Submit { ep, len } => Some((*ep, *len)),
                _ => None,
            })
            .collect()
    }

    /// Returns the endpoints stalled so far
    pub fn stalls(&self) -> Vec<u8> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HwCall::Stall(ep) => Some(*ep),
                _ => None,
            })
            .collect()
    }

    pub fn opened(&self) -> Vec<u8> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HwCall::Open(ep) => Some(*ep),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> Vec<u8> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                HwCall::Close(ep) => Some(*ep),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
        self.sent.clear();
    }
}

impl Hardware for MockHardware {
    fn open_endpoint(&mut self, info: &EndpointInfo) -> bool {
        self.calls.push(HwCall::Open(info.address.into()));
        !self.reject_open
    }

    fn close_endpoint(&mut self, address: EndpointAddress) {
        self.calls.push(HwCall::Close(address.into()));
    }

    fn submit_transfer(&mut self, address: EndpointAddress, transfer: Transfer<'_>) -> bool {
        if self.reject_submit {
            return false;
        }
        self.calls.push(HwCall::Submit {
            ep: address.into(),
            len: transfer.len(),
        });
        if let Transfer::In(bytes) = transfer {
            self.sent.extend_from_slice(bytes);
        }
        true
    }

    fn read_transfer(&mut self, _: EndpointAddress, buffer: &mut [u8]) -> usize {
        let len = buffer.len().min(self.rx.len());
        for byte in buffer[..len].iter_mut() {
            *byte = self.rx.pop_front().unwrap();
        }
        len
    }

    fn stall_endpoint(&mut self, address: EndpointAddress) {
        self.calls.push(HwCall::Stall(address.into()));
    }

    fn clear_stall(&mut self, address: EndpointAddress) {
        self.calls.push(HwCall::ClearStall(address.into()));
    }

    fn set_device_address(&mut self, address: u8) {
        self.calls.push(HwCall::SetAddress(address));
    }

    fn connect(&mut self) {
        self.calls.push(HwCall::Connect);
    }

    fn disconnect(&mut self) {
        self.calls.push(HwCall::Disconnect);
    }

    fn remote_wakeup(&mut self) {
        self.calls.push(HwCall::RemoteWakeup);
    }
}
