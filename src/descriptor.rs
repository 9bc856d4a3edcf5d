//! Application descriptors, and a walker for configuration descriptors
//!
//! The core doesn't build descriptors. The application supplies them through
//! [`Descriptors`], and the core answers GET_DESCRIPTOR requests with the
//! bytes it's given. SET_CONFIGURATION walks the selected configuration with
//! [`DescriptorIter`] to hand interfaces to class drivers.

/// Device descriptor type
pub const DEVICE: u8 = 1;
/// Configuration descriptor type
pub const CONFIGURATION: u8 = 2;
/// String descriptor type
pub const STRING: u8 = 3;
/// Interface descriptor type
pub const INTERFACE: u8 = 4;
/// Endpoint descriptor type
pub const ENDPOINT: u8 = 5;
/// Device qualifier descriptor type
pub const DEVICE_QUALIFIER: u8 = 6;
/// Other speed configuration descriptor type
pub const OTHER_SPEED_CONFIGURATION: u8 = 7;
/// Interface association descriptor type
pub const INTERFACE_ASSOCIATION: u8 = 11;
/// Binary device object store descriptor type
pub const BOS: u8 = 15;

/// Configuration attribute: the device is self powered
pub const ATTRIBUTE_SELF_POWERED: u8 = 1 << 6;
/// Configuration attribute: the device supports remote wakeup
pub const ATTRIBUTE_REMOTE_WAKEUP: u8 = 1 << 5;

/// Descriptors provided by the application
///
/// Every method returns the complete descriptor. The core clamps the answer
/// to the length the host asked for. Returning `None` stalls the request.
pub trait Descriptors {
    /// The 18 byte device descriptor
    fn device(&self) -> &'static [u8];

    /// The configuration descriptor at `index`, including all of its
    /// interface, endpoint and class-specific descriptors
    ///
    /// The configuration selected by SET_CONFIGURATION(`n`) is found at
    /// index `n - 1`.
    fn configuration(&self, index: u8) -> Option<&'static [u8]>;

    /// String descriptor `index` in language `language_id`
    fn string(&self, index: u8, language_id: u16) -> Option<&'static [u8]>;

    /// The device qualifier, for high speed capable devices
    fn device_qualifier(&self) -> Option<&'static [u8]> {
        None
    }

    /// The configuration at `index`, as it would be at the other speed
    fn other_speed_configuration(&self, index: u8) -> Option<&'static [u8]> {
        let _ = index;
        None
    }

    /// The binary device object store
    fn bos(&self) -> Option<&'static [u8]> {
        None
    }
}

/// Returns the `wTotalLength` of a configuration or BOS descriptor,
/// clamped to the bytes available
pub fn total_length(desc: &[u8]) -> usize {
    match desc {
        [_, _, lo, hi, ..] => (u16::from_le_bytes([*lo, *hi]) as usize).min(desc.len()),
        _ => desc.len(),
    }
}

/// Iterates the descriptors packed in a byte slice
///
/// Each item is one complete descriptor, starting with its `bLength` and
/// `bDescriptorType`. Iteration stops at the end of the slice, or at the
/// first malformed descriptor; check [`is_malformed`](DescriptorIter::is_malformed)
/// to tell the two apart.
///
/// ```
/// use usbd_ctrl::descriptor::{DescriptorIter, INTERFACE, ENDPOINT};
///
/// let bytes = [9, INTERFACE, 0, 0, 1, 0xFF, 0, 0, 0, 7, ENDPOINT, 0x81, 2, 64, 0, 0];
/// let mut iter = DescriptorIter::new(&bytes);
/// assert_eq!(iter.next().map(|d| d[1]), Some(INTERFACE));
/// assert_eq!(iter.next().map(|d| d[1]), Some(ENDPOINT));
/// assert!(iter.next().is_none());
/// assert!(!iter.is_malformed());
/// ```
#[derive(Debug, Clone)]
pub struct DescriptorIter<'d> {
    bytes: &'d [u8],
    malformed: bool,
}

impl<'d> DescriptorIter<'d> {
    /// Walk `bytes`
    pub fn new(bytes: &'d [u8]) -> Self {
        Self {
            bytes,
            malformed: false,
        }
    }

    /// Indicates that iteration stopped on a malformed descriptor
    pub fn is_malformed(&self) -> bool {
        self.malformed
    }

    /// Returns the bytes not yet visited
    pub fn remaining(&self) -> &'d [u8] {
        self.bytes
    }
}

impl<'d> Iterator for DescriptorIter<'d> {
    type Item = &'d [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.is_empty() {
            return None;
        }
        let len = self.bytes[0] as usize;
        if len < 2 || len > self.bytes.len() {
            self.malformed = true;
            self.bytes = &[];
            return None;
        }
        let (desc, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Some(desc)
    }
}
