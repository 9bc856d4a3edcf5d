//! Error types

use core::fmt;

/// Result type used throughout the crate
pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced by the USB core
///
/// A protocol stall is a normal USB answer, and the control engine recovers
/// from it internally. It only appears here so that a class driver can report
/// why it refused a request. Registry conflicts are programming errors in the
/// caller, and they're never masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Error {
    /// The request is malformed, unsupported, or the host violated the
    /// expected data length or direction
    ProtocolStall,
    /// The hardware reported a failure in the middle of a transaction
    TransferFailed,
    /// Submission on a busy endpoint, or opening an endpoint that's
    /// already open
    RegistryConflict,
    /// The event queue was full, and the event was dropped
    QueueOverflow,
    /// The endpoint address is out of range, or the endpoint isn't open
    InvalidEndpoint,
    /// The hardware driver refused the operation
    HardwareRejected,
    /// No room to register another class driver
    TooManyDrivers,
    /// The device is already initialized
    AlreadyInitialized,
    /// The configuration is invalid
    InvalidConfig,
    /// The operation isn't valid in the current device state
    InvalidState,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProtocolStall => write!(f, "protocol stall"),
            Self::TransferFailed => write!(f, "transfer failed"),
            Self::RegistryConflict => write!(f, "endpoint registry conflict"),
            Self::QueueOverflow => write!(f, "event queue overflow"),
            Self::InvalidEndpoint => write!(f, "invalid endpoint"),
            Self::HardwareRejected => write!(f, "hardware rejected the operation"),
            Self::TooManyDrivers => write!(f, "too many class drivers"),
            Self::AlreadyInitialized => write!(f, "already initialized"),
            Self::InvalidConfig => write!(f, "invalid configuration"),
            Self::InvalidState => write!(f, "invalid state"),
        }
    }
}
