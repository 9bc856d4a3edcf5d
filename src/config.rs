//! Device configuration

use crate::error::{Error, Result};

/// USB bus speed
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Speed {
    /// Low speed (1.5 Mbit/s)
    Low,
    /// Full speed (12 Mbit/s)
    #[default]
    Full,
    /// High speed (480 Mbit/s)
    High,
}

/// Maximum number of endpoints, counting each direction separately
///
/// Sixteen endpoint numbers, two directions.
pub const MAX_ENDPOINTS: usize = 16 * 2;

/// Maximum number of interfaces in one configuration
pub const MAX_INTERFACES: usize = 16;

/// Maximum number of registered class drivers
pub const MAX_DRIVERS: usize = 8;

/// Size of the control buffer that class drivers and the standard
/// request handlers fill for IN data, or that receives OUT data
pub const CONTROL_BUFFER_LEN: usize = 256;

/// Static configuration for a USB device instance
///
/// ```
/// use usbd_ctrl::config::{Config, Speed};
///
/// const CONFIG: Config = Config::new()
///     .max_packet_size_0(64)
///     .speed(Speed::High);
///
/// assert_eq!(CONFIG.control_max_packet_size(), 64);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Config {
    max_packet_size_0: u8,
    speed: Speed,
    self_powered: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// A full-speed configuration with a 64 byte control endpoint
    pub const fn new() -> Self {
        Config {
            max_packet_size_0: 64,
            speed: Speed::Full,
            self_powered: false,
        }
    }

    /// Set the control endpoint max packet size
    ///
    /// Must be 8, 16, 32 or 64. See [`validate()`](Config::validate).
    pub const fn max_packet_size_0(mut self, max_packet_size_0: u8) -> Self {
        self.max_packet_size_0 = max_packet_size_0;
        self
    }

    /// Set the fastest speed this device supports
    ///
    /// The speed negotiated on bus reset replaces this value at runtime.
    pub const fn speed(mut self, speed: Speed) -> Self {
        self.speed = speed;
        self
    }

    /// Report the device as self powered before the host selects a
    /// configuration
    ///
    /// Once configured, the configuration descriptor's attributes decide.
    pub const fn self_powered(mut self, self_powered: bool) -> Self {
        self.self_powered = self_powered;
        self
    }

    /// Returns the control endpoint max packet size
    pub const fn control_max_packet_size(&self) -> usize {
        self.max_packet_size_0 as usize
    }

    /// Returns the configured speed
    pub const fn configured_speed(&self) -> Speed {
        self.speed
    }

    /// Indicates if the device reports itself as self powered while
    /// unconfigured
    pub const fn is_self_powered(&self) -> bool {
        self.self_powered
    }

    /// Check the configuration
    ///
    /// Low speed devices may only use an 8 byte control endpoint. High speed
    /// devices must use 64 bytes.
    pub fn validate(&self) -> Result<()> {
        let valid = match self.speed {
            Speed::Low => self.max_packet_size_0 == 8,
            Speed::Full => matches!(self.max_packet_size_0, 8 | 16 | 32 | 64),
            Speed::High => self.max_packet_size_0 == 64,
        };
        valid.then_some(()).ok_or(Error::InvalidConfig)
    }
}
