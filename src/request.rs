//! Setup packet parsing
//!
//! The core speaks the `usb-device` [`Request`] vocabulary. [`parse`] turns
//! the eight raw setup bytes into a `Request`. [`SetupPacket`] goes the other
//! way; it's handy when a hardware driver or a test needs to synthesize a
//! setup packet.

use usb_device::{
    control::{Recipient, Request, RequestType},
    endpoint::EndpointAddress,
    UsbDirection,
};

/// Parse the eight setup bytes
///
/// Every bit pattern produces a request. Reserved request types and
/// recipients map to `RequestType::Reserved` and `Recipient::Reserved`, and
/// the dispatcher stalls them.
pub fn parse(setup: &[u8; 8]) -> Request {
    let bm_request_type = setup[0];
    Request {
        direction: if bm_request_type & 0x80 != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        },
        request_type: match (bm_request_type >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        },
        recipient: match bm_request_type & 0b1_1111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        },
        request: setup[1],
        value: u16::from_le_bytes([setup[2], setup[3]]),
        index: u16::from_le_bytes([setup[4], setup[5]]),
        length: u16::from_le_bytes([setup[6], setup[7]]),
    }
}

/// Returns the interface number targeted by an interface request
pub fn interface_number(request: &Request) -> u8 {
    (request.index & 0xFF) as u8
}

/// Returns the endpoint targeted by an endpoint request
pub fn endpoint_address(request: &Request) -> EndpointAddress {
    EndpointAddress::from((request.index & 0xFF) as u8)
}

/// Returns the `(descriptor type, descriptor index)` of a GET_DESCRIPTOR
/// request
pub fn descriptor_type_index(request: &Request) -> (u8, u8) {
    ((request.value >> 8) as u8, (request.value & 0xFF) as u8)
}

/// A raw setup packet
///
/// ```
/// use usbd_ctrl::request::{self, SetupPacket};
/// use usb_device::control::Request;
///
/// let setup = SetupPacket::get_descriptor(1, 0, 0, 18).to_bytes();
/// let request = request::parse(&setup);
/// assert_eq!(request.request, Request::GET_DESCRIPTOR);
/// assert_eq!(request.length, 18);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    /// Request type, recipient and direction
    pub request_type: u8,
    /// Specific request
    pub request: u8,
    /// Request-specific value
    pub value: u16,
    /// Request-specific index
    pub index: u16,
    /// Data stage length
    pub length: u16,
}

impl SetupPacket {
    /// Any request
    pub const fn new(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type,
            request,
            value,
            index,
            length,
        }
    }

    /// Standard GET_DESCRIPTOR request
    pub const fn get_descriptor(desc_type: u8, desc_index: u8, language_id: u16, length: u16) -> Self {
        Self::new(
            0x80,
            Request::GET_DESCRIPTOR,
            ((desc_type as u16) << 8) | (desc_index as u16),
            language_id,
            length,
        )
    }

    /// Standard SET_ADDRESS request
    pub const fn set_address(address: u8) -> Self {
        Self::new(0x00, Request::SET_ADDRESS, address as u16, 0, 0)
    }

    /// Standard SET_CONFIGURATION request
    pub const fn set_configuration(value: u8) -> Self {
        Self::new(0x00, Request::SET_CONFIGURATION, value as u16, 0, 0)
    }

    /// Standard GET_CONFIGURATION request
    pub const fn get_configuration() -> Self {
        Self::new(0x80, Request::GET_CONFIGURATION, 0, 0, 1)
    }

    /// Standard GET_STATUS request to `recipient`
    pub const fn get_status(recipient: Recipient, index: u16) -> Self {
        Self::new(0x80 | recipient as u8, Request::GET_STATUS, 0, index, 2)
    }

    /// Standard SET_FEATURE request
    pub const fn set_feature(recipient: Recipient, feature: u16, index: u16) -> Self {
        Self::new(recipient as u8, Request::SET_FEATURE, feature, index, 0)
    }

    /// Standard CLEAR_FEATURE request
    pub const fn clear_feature(recipient: Recipient, feature: u16, index: u16) -> Self {
        Self::new(recipient as u8, Request::CLEAR_FEATURE, feature, index, 0)
    }

    /// The eight bytes on the wire
    pub const fn to_bytes(&self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::{endpoint_address, interface_number, parse, SetupPacket};
    use usb_device::{
        control::{Recipient, Request, RequestType},
        endpoint::EndpointAddress,
        UsbDirection,
    };

    #[test]
    fn parse_get_descriptor() {
        let request = parse(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
        assert_eq!(request.direction, UsbDirection::In);
        assert_eq!(request.request_type, RequestType::Standard);
        assert_eq!(request.recipient, Recipient::Device);
        assert_eq!(request.request, Request::GET_DESCRIPTOR);
        assert_eq!(request.value, 0x0100);
        assert_eq!(request.length, 18);
        assert_eq!(super::descriptor_type_index(&request), (1, 0));
    }

    #[test]
    fn parse_class_interface_out() {
        // CDC SET_LINE_CODING to interface 2
        let request = parse(&[0x21, 0x20, 0x00, 0x00, 0x02, 0x00, 0x07, 0x00]);
        assert_eq!(request.direction, UsbDirection::Out);
        assert_eq!(request.request_type, RequestType::Class);
        assert_eq!(request.recipient, Recipient::Interface);
        assert_eq!(interface_number(&request), 2);
        assert_eq!(request.length, 7);
    }

    #[test]
    fn parse_reserved_bits() {
        let request = parse(&[0x7F, 0x00, 0, 0, 0, 0, 0, 0]);
        assert_eq!(request.request_type, RequestType::Reserved);
        assert_eq!(request.recipient, Recipient::Reserved);
    }

    #[test]
    fn endpoint_request() {
        let setup = SetupPacket::clear_feature(
            Recipient::Endpoint,
            Request::FEATURE_ENDPOINT_HALT,
            0x81,
        );
        let request = parse(&setup.to_bytes());
        assert_eq!(request.recipient, Recipient::Endpoint);
        assert_eq!(
            endpoint_address(&request),
            EndpointAddress::from_parts(1, UsbDirection::In)
        );
    }

    #[test]
    fn setup_bytes() {
        assert_eq!(
            SetupPacket::set_address(5).to_bytes(),
            [0x00, 0x05, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            SetupPacket::get_status(Recipient::Endpoint, 0x81).to_bytes(),
            [0x82, 0x00, 0x00, 0x00, 0x81, 0x00, 0x02, 0x00]
        );
    }
}
