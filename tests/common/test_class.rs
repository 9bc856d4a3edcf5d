//! A class driver that logs every callback

use std::cell::RefCell;

use usb_device::{control::Request, endpoint::EndpointAddress, UsbDirection};
use usbd_ctrl::{
    class::{ClassDriver, Endpoints, Response},
    descriptor::{self, DescriptorIter},
    event::TransferResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassCall {
    Reset,
    /// Accepted this interface number
    Open(u8),
    /// Saw this bRequest
    Request(u8),
    /// A transfer it accepted completed, with these data stage bytes
    Complete(u8, Vec<u8>),
    Transfer(u8, usize, TransferResult),
}

/// Shared by all drivers in a test, so that the order between drivers shows
pub type Log = RefCell<Vec<(&'static str, ClassCall)>>;

/// Bytes answered for IN requests
pub const ANSWER: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

pub struct TestClass<'l> {
    name: &'static str,
    /// bInterfaceClass of the first interface this driver accepts
    class: u8,
    /// Number of interfaces in one function
    interfaces: usize,
    /// bRequest that this driver answers
    answers: Option<u8>,
    log: &'l Log,
}

impl<'l> TestClass<'l> {
    pub fn new(name: &'static str, class: u8, interfaces: usize, log: &'l Log) -> Self {
        TestClass {
            name,
            class,
            interfaces,
            answers: None,
            log,
        }
    }

    pub fn answers(mut self, request: u8) -> Self {
        self.answers = Some(request);
        self
    }

    fn push(&self, call: ClassCall) {
        self.log.borrow_mut().push((self.name, call));
    }
}

impl ClassDriver for TestClass<'_> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn reset(&mut self) {
        self.push(ClassCall::Reset);
    }

    fn open(&mut self, endpoints: &mut Endpoints<'_>, descriptors: &[u8]) -> Option<usize> {
        if descriptors.get(5) != Some(&self.class) {
            return None;
        }
        let mut consumed = 0;
        let mut seen = 0;
        for desc in DescriptorIter::new(descriptors) {
            match desc[1] {
                descriptor::INTERFACE => {
                    if seen == self.interfaces {
                        break;
                    }
                    seen += 1;
                    self.push(ClassCall::Open(desc[2]));
                }
                descriptor::INTERFACE_ASSOCIATION => break,
                descriptor::ENDPOINT => {
                    endpoints.open_descriptor(desc).ok()?;
                }
                _ => {}
            }
            consumed += desc.len();
        }
        Some(consumed)
    }

    fn control_request(
        &mut self,
        _: &mut Endpoints<'_>,
        request: &Request,
        buffer: &mut [u8],
    ) -> Response {
        self.push(ClassCall::Request(request.request));
        if self.answers != Some(request.request) {
            return Response::Stall;
        }
        match request.direction {
            UsbDirection::In => {
                buffer[..ANSWER.len()].copy_from_slice(&ANSWER);
                Response::InBuffer(ANSWER.len())
            }
            UsbDirection::Out if request.length > 0 => Response::Out(request.length as usize),
            UsbDirection::Out => Response::Status,
        }
    }

    fn control_complete(&mut self, request: &Request, data: &[u8]) {
        self.push(ClassCall::Complete(request.request, data.to_vec()));
    }

    fn transfer_complete(
        &mut self,
        _: &mut Endpoints<'_>,
        address: EndpointAddress,
        len: usize,
        result: TransferResult,
    ) {
        self.push(ClassCall::Transfer(address.into(), len, result));
    }
}
