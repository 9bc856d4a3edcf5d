//! Class driver interface
//!
//! A class driver implements one USB device class: serial, storage, HID,
//! or something vendor specific. Register drivers with
//! [`UsbDevice::register`](crate::device::UsbDevice::register) before
//! initializing the device. Drivers see requests in registration order.
//!
//! Drivers never touch the hardware directly. Each callback receives an
//! [`Endpoints`] handle that opens, submits on, and stalls only that driver's
//! endpoints, keeping the registry's busy tracking in the loop.

use usb_device::{control::Request, endpoint::EndpointAddress};

use crate::{
    config::Speed,
    error::{Error, Result},
    event::TransferResult,
    hardware::{EndpointInfo, Hardware, Transfer},
    registry::EndpointRegistry,
};

/// Identifies a registered class driver
///
/// The ID is the driver's registration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct DriverId(u8);

impl DriverId {
    pub(crate) const fn new(index: u8) -> Self {
        DriverId(index)
    }

    /// Returns the registration index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A class driver's answer to a control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Send these bytes in the data stage
    In(&'static [u8]),
    /// Send the first `n` bytes of the control buffer in the data stage
    InBuffer(usize),
    /// Receive up to `n` bytes into the control buffer
    ///
    /// The bytes arrive in [`ClassDriver::control_complete`].
    Out(usize),
    /// Accept the request without a data stage
    Status,
    /// Refuse the request
    Stall,
}

impl Response {
    /// Indicates if this is a refusal
    pub fn is_stall(&self) -> bool {
        matches!(self, Response::Stall)
    }
}

/// A USB device class implementation
pub trait ClassDriver {
    /// A short name for logging
    fn name(&self) -> &'static str {
        "class"
    }

    /// The bus reset, or the device left its configuration
    ///
    /// The driver's endpoints are already closed.
    fn reset(&mut self);

    /// Offer an interface during SET_CONFIGURATION
    ///
    /// `descriptors` starts at an interface descriptor and runs to the end of
    /// the configuration. To accept, open the endpoints that the interface
    /// describes, and return the number of bytes that belong to this driver.
    /// That span must cover at least the interface descriptor. Return `None`
    /// to let the next driver try.
    fn open(&mut self, endpoints: &mut Endpoints<'_>, descriptors: &[u8]) -> Option<usize>;

    /// Handle a control request
    ///
    /// The core offers class and vendor requests directed at the device to
    /// every driver in turn until one doesn't stall. Interface and endpoint
    /// requests go only to the driver that owns the target. `buffer` is the
    /// control buffer; fill it for [`Response::InBuffer`].
    fn control_request(
        &mut self,
        endpoints: &mut Endpoints<'_>,
        request: &Request,
        buffer: &mut [u8],
    ) -> Response;

    /// The control transfer that this driver accepted finished its status
    /// stage
    ///
    /// `data` holds the bytes moved in the data stage. An aborted or
    /// failed transfer never reaches this callback.
    fn control_complete(&mut self, request: &Request, data: &[u8]) {
        let _ = (request, data);
    }

    /// A transfer completed on one of this driver's endpoints
    ///
    /// The endpoint is no longer busy. For OUT endpoints, fetch the received
    /// bytes with [`Endpoints::read`].
    fn transfer_complete(
        &mut self,
        endpoints: &mut Endpoints<'_>,
        address: EndpointAddress,
        len: usize,
        result: TransferResult,
    );
}

/// A class driver's view of its endpoints
pub struct Endpoints<'r> {
    hw: &'r mut dyn Hardware,
    registry: &'r mut EndpointRegistry,
    driver: DriverId,
    speed: Speed,
}

impl<'r> Endpoints<'r> {
    pub(crate) fn new(
        hw: &'r mut dyn Hardware,
        registry: &'r mut EndpointRegistry,
        driver: DriverId,
        speed: Speed,
    ) -> Self {
        Endpoints {
            hw,
            registry,
            driver,
            speed,
        }
    }

    /// Returns this driver's ID
    pub fn driver(&self) -> DriverId {
        self.driver
    }

    /// Returns the current bus speed
    pub fn speed(&self) -> Speed {
        self.speed
    }

    fn owned(&self, address: EndpointAddress) -> Result<()> {
        if self.registry.owner(address) == Some(self.driver) {
            Ok(())
        } else {
            Err(Error::InvalidEndpoint)
        }
    }

    /// Open an endpoint, and take ownership of it
    ///
    /// Fails with [`Error::InvalidConfig`] if the max packet size isn't
    /// allowed for the endpoint type at the current speed.
    pub fn open(&mut self, info: EndpointInfo) -> Result<()> {
        if !info.is_valid_for(self.speed) {
            warn!(
                "EP {} MPS {} invalid for the bus speed",
                u8::from(info.address),
                info.max_packet_size
            );
            return Err(Error::InvalidConfig);
        }
        self.registry.open(info, self.hw)?;
        self.registry.set_owner(info.address, self.driver)
    }

    /// Parse an endpoint descriptor, and open the endpoint it describes
    pub fn open_descriptor(&mut self, desc: &[u8]) -> Result<EndpointAddress> {
        let info = EndpointInfo::from_descriptor(desc).ok_or(Error::InvalidConfig)?;
        self.open(info)?;
        Ok(info.address)
    }

    /// Close one of this driver's endpoints
    ///
    /// Closing an endpoint that isn't open does nothing.
    pub fn close(&mut self, address: EndpointAddress) {
        if self.owned(address).is_ok() {
            self.registry.close(address, self.hw);
        }
    }

    /// Start a transfer
    ///
    /// Fails with [`Error::RegistryConflict`] if a transfer is already in
    /// flight on the endpoint.
    pub fn submit(&mut self, address: EndpointAddress, transfer: Transfer<'_>) -> Result<()> {
        self.owned(address)?;
        self.registry.submit(address, transfer, self.hw)
    }

    /// Copy the bytes received by the last OUT transfer into `buffer`
    pub fn read(&mut self, address: EndpointAddress, buffer: &mut [u8]) -> Result<usize> {
        self.owned(address)?;
        Ok(self.hw.read_transfer(address, buffer))
    }

    /// Indicates if a transfer is in flight
    pub fn is_busy(&self, address: EndpointAddress) -> bool {
        self.registry.is_busy(address)
    }

    /// Indicates if the endpoint is stalled
    pub fn is_stalled(&self, address: EndpointAddress) -> bool {
        self.registry.is_stalled(address)
    }

    /// Stall an endpoint
    pub fn stall(&mut self, address: EndpointAddress) -> Result<()> {
        self.owned(address)?;
        self.registry.stall(address, self.hw)
    }

    /// Clear an endpoint stall
    pub fn clear_stall(&mut self, address: EndpointAddress) -> Result<()> {
        self.owned(address)?;
        self.registry.clear_stall(address, self.hw)
    }

    /// Claim an endpoint before deciding to submit on it
    ///
    /// Returns `false` if the endpoint is busy, or already claimed. The claim
    /// ends with [`release`](Endpoints::release) or when the next transfer
    /// completes.
    pub fn claim(&mut self, address: EndpointAddress) -> bool {
        self.owned(address).is_ok() && self.registry.claim(address)
    }

    /// Release a claim
    pub fn release(&mut self, address: EndpointAddress) -> bool {
        self.owned(address).is_ok() && self.registry.release(address)
    }
}
