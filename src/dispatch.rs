//! Request dispatcher
//!
//! Standard requests are answered by built-in handlers. Requests for an
//! interface or endpoint go to the class driver that owns it. Class and
//! vendor requests for the device are offered to each driver, in
//! registration order, until one doesn't stall.

use heapless::Vec;
use usb_device::{
    control::{Recipient, Request, RequestType},
    endpoint::EndpointAddress,
    UsbDirection,
};

use crate::{
    class::{ClassDriver, DriverId, Endpoints, Response},
    config::{MAX_DRIVERS, MAX_INTERFACES},
    control::Completion,
    descriptor::{self, DescriptorIter, Descriptors},
    device::{DeviceState, DeviceStatus},
    error::{Error, Result},
    event::TransferResult,
    hardware::Hardware,
    registry::EndpointRegistry,
    request,
};

/// Everything the task runner owns, except the control engine
pub(crate) struct Dispatcher<'a> {
    pub(crate) descriptors: &'a dyn Descriptors,
    pub(crate) drivers: Vec<&'a mut dyn ClassDriver, MAX_DRIVERS>,
    /// Interface number to owning driver
    pub(crate) interfaces: [Option<DriverId>; MAX_INTERFACES],
    pub(crate) registry: EndpointRegistry,
    pub(crate) state: DeviceState,
}

const STALL: (Response, Completion) = (Response::Stall, Completion::None);

/// Only the whole of a configuration or BOS descriptor is sent
fn whole(desc: &'static [u8]) -> &'static [u8] {
    &desc[..descriptor::total_length(desc)]
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(descriptors: &'a dyn Descriptors, state: DeviceState) -> Self {
        Dispatcher {
            descriptors,
            drivers: Vec::new(),
            interfaces: [None; MAX_INTERFACES],
            registry: EndpointRegistry::new(),
            state,
        }
    }

    /// Forget the configuration after a bus reset
    ///
    /// The hardware already disabled its endpoints, so nothing is closed
    /// through the hardware.
    pub(crate) fn reset(&mut self, state: DeviceState, max_packet_size_0: u16) {
        self.registry.reset();
        self.registry.open_control(max_packet_size_0);
        self.interfaces = [None; MAX_INTERFACES];
        for driver in self.drivers.iter_mut() {
            driver.reset();
        }
        self.state = state;
    }

    /// Decide how to answer `request`
    pub(crate) fn dispatch(
        &mut self,
        hw: &mut dyn Hardware,
        request: &Request,
        buffer: &mut [u8],
    ) -> (Response, Completion) {
        match (request.recipient, request.request_type) {
            (_, RequestType::Reserved) | (Recipient::Reserved, _) => STALL,
            (Recipient::Device, RequestType::Standard) => self.standard_device(hw, request, buffer),
            (Recipient::Interface, _) => self.interface(hw, request, buffer),
            (Recipient::Endpoint, _) => self.endpoint(hw, request, buffer),
            (Recipient::Device | Recipient::Other, _) => self.offer(hw, request, buffer),
        }
    }

    fn call(
        &mut self,
        hw: &mut dyn Hardware,
        id: DriverId,
        request: &Request,
        buffer: &mut [u8],
    ) -> Response {
        let speed = self.state.speed();
        match self.drivers.get_mut(id.index()) {
            Some(driver) => {
                let mut endpoints = Endpoints::new(hw, &mut self.registry, id, speed);
                driver.control_request(&mut endpoints, request, buffer)
            }
            None => Response::Stall,
        }
    }

    /// Offer the request to every driver, in registration order
    fn offer(
        &mut self,
        hw: &mut dyn Hardware,
        request: &Request,
        buffer: &mut [u8],
    ) -> (Response, Completion) {
        for idx in 0..self.drivers.len() {
            let id = DriverId::new(idx as u8);
            let response = self.call(&mut *hw, id, request, buffer);
            if !response.is_stall() {
                return (response, Completion::Driver(id));
            }
        }
        STALL
    }

    fn standard_device(
        &mut self,
        hw: &mut dyn Hardware,
        request: &Request,
        buffer: &mut [u8],
    ) -> (Response, Completion) {
        match (request.direction, request.request) {
            (UsbDirection::Out, Request::SET_ADDRESS) => {
                if request.value > 127 || request.length != 0 {
                    return STALL;
                }
                (Response::Status, Completion::SetAddress(request.value as u8))
            }
            (UsbDirection::In, Request::GET_CONFIGURATION) => {
                buffer[0] = self.state.configuration();
                (Response::InBuffer(1), Completion::None)
            }
            (UsbDirection::Out, Request::SET_CONFIGURATION) => {
                match self.set_configuration(hw, request.value as u8) {
                    Ok(()) => (Response::Status, Completion::None),
                    Err(_) => STALL,
                }
            }
            (UsbDirection::In, Request::GET_DESCRIPTOR) => {
                (self.get_descriptor(request), Completion::None)
            }
            (UsbDirection::Out, Request::SET_FEATURE | Request::CLEAR_FEATURE)
                if request.value == Request::FEATURE_DEVICE_REMOTE_WAKEUP =>
            {
                self.state.status.set(
                    DeviceStatus::REMOTE_WAKEUP_ENABLED,
                    request.request == Request::SET_FEATURE,
                );
                (Response::Status, Completion::None)
            }
            (UsbDirection::In, Request::GET_STATUS) => {
                let status = self.state.status;
                buffer[0] = status.contains(DeviceStatus::SELF_POWERED) as u8
                    | (status.contains(DeviceStatus::REMOTE_WAKEUP_ENABLED) as u8) << 1;
                buffer[1] = 0;
                (Response::InBuffer(2), Completion::None)
            }
            _ => STALL,
        }
    }

    fn get_descriptor(&self, request: &Request) -> Response {
        let (kind, index) = request::descriptor_type_index(request);
        let desc = match kind {
            descriptor::DEVICE => Some(self.descriptors.device()),
            descriptor::CONFIGURATION => self.descriptors.configuration(index).map(whole),
            descriptor::OTHER_SPEED_CONFIGURATION => self
                .descriptors
                .other_speed_configuration(index)
                .map(whole),
            descriptor::STRING => self.descriptors.string(index, request.index),
            descriptor::DEVICE_QUALIFIER => self.descriptors.device_qualifier(),
            descriptor::BOS => self.descriptors.bos().map(whole),
            _ => None,
        };
        match desc {
            Some(desc) => Response::In(desc),
            None => {
                debug!("GET_DESCRIPTOR {} {} unavailable", kind, index);
                Response::Stall
            }
        }
    }

    /// Leave the current configuration
    fn unconfigure(&mut self, hw: &mut dyn Hardware) {
        self.registry.close_all(hw);
        for driver in self.drivers.iter_mut() {
            driver.reset();
        }
        self.interfaces = [None; MAX_INTERFACES];
        self.state.configuration = 0;
    }

    fn set_configuration(&mut self, hw: &mut dyn Hardware, value: u8) -> Result<()> {
        if value == self.state.configuration {
            return Ok(());
        }
        if self.state.configuration != 0 {
            self.unconfigure(&mut *hw);
        }
        if value != 0 {
            if let Err(err) = self.open_configuration(&mut *hw, value) {
                warn!("SET_CONFIGURATION {} failed", value);
                self.unconfigure(hw);
                return Err(err);
            }
            self.state.configuration = value;
        }
        debug!("CONFIGURATION {}", value);
        Ok(())
    }

    /// Walk the configuration descriptor, handing each interface (or
    /// interface association) to the first driver that accepts it
    fn open_configuration(&mut self, hw: &mut dyn Hardware, value: u8) -> Result<()> {
        let desc = self
            .descriptors
            .configuration(value - 1)
            .ok_or(Error::InvalidConfig)?;
        if desc.len() < 9 || desc[1] != descriptor::CONFIGURATION {
            return Err(Error::InvalidConfig);
        }

        let attributes = desc[7];
        self.state.status.set(
            DeviceStatus::SELF_POWERED,
            attributes & descriptor::ATTRIBUTE_SELF_POWERED != 0,
        );
        self.state.status.set(
            DeviceStatus::REMOTE_WAKEUP_SUPPORTED,
            attributes & descriptor::ATTRIBUTE_REMOTE_WAKEUP != 0,
        );

        let end = descriptor::total_length(desc);
        let mut offset = desc[0] as usize;
        while offset < end {
            let rest = &desc[offset..end];
            let first = DescriptorIter::new(rest)
                .next()
                .ok_or(Error::InvalidConfig)?;

            let mut association = None;
            let mut skip = 0;
            if first[1] == descriptor::INTERFACE_ASSOCIATION {
                if first.len() < 4 {
                    return Err(Error::InvalidConfig);
                }
                association = Some((first[2], first[3]));
                skip = first.len();
            }

            let interface = &rest[skip..];
            if interface.len() < 9 || interface[0] < 9 || interface[1] != descriptor::INTERFACE {
                return Err(Error::InvalidConfig);
            }
            let (id, len) = self.offer_interface(&mut *hw, interface)?;
            self.bind_interfaces(id, &interface[..len], association)?;
            offset += skip + len;
        }
        Ok(())
    }

    fn offer_interface(
        &mut self,
        hw: &mut dyn Hardware,
        interface: &[u8],
    ) -> Result<(DriverId, usize)> {
        let speed = self.state.speed();
        for (idx, driver) in self.drivers.iter_mut().enumerate() {
            let id = DriverId::new(idx as u8);
            let mut endpoints = Endpoints::new(&mut *hw, &mut self.registry, id, speed);
            if let Some(len) = driver.open(&mut endpoints, interface) {
                if len < interface[0] as usize || len > interface.len() {
                    warn!("{} consumed {} bytes of {}", driver.name(), len, interface.len());
                    return Err(Error::InvalidConfig);
                }
                debug!("INTERFACE {} opened by {}", interface[2], driver.name());
                return Ok((id, len));
            }
        }
        warn!("No driver for interface {}", interface[2]);
        Err(Error::InvalidConfig)
    }

    fn bind_interfaces(
        &mut self,
        id: DriverId,
        span: &[u8],
        association: Option<(u8, u8)>,
    ) -> Result<()> {
        let mut bind = |number: u8| -> Result<()> {
            let slot = self
                .interfaces
                .get_mut(number as usize)
                .ok_or(Error::InvalidConfig)?;
            *slot = Some(id);
            Ok(())
        };
        for desc in DescriptorIter::new(span) {
            if desc[1] == descriptor::INTERFACE && desc.len() >= 3 {
                bind(desc[2])?;
            }
        }
        if let Some((first, count)) = association {
            for number in first..first.saturating_add(count) {
                bind(number)?;
            }
        }
        Ok(())
    }

    fn interface(
        &mut self,
        hw: &mut dyn Hardware,
        request: &Request,
        buffer: &mut [u8],
    ) -> (Response, Completion) {
        let number = request::interface_number(request);
        let Some(id) = self.interfaces.get(number as usize).copied().flatten() else {
            debug!("Interface {} has no driver", number);
            return STALL;
        };
        let response = self.call(hw, id, request, buffer);
        if !response.is_stall() {
            return (response, Completion::Driver(id));
        }

        // Drivers without alternate settings needn't handle these.
        if request.request_type == RequestType::Standard {
            match (request.direction, request.request) {
                (UsbDirection::In, Request::GET_INTERFACE) => {
                    buffer[0] = 0;
                    return (Response::InBuffer(1), Completion::None);
                }
                (UsbDirection::Out, Request::SET_INTERFACE) => {
                    return (Response::Status, Completion::None);
                }
                _ => {}
            }
        }
        STALL
    }

    fn endpoint(
        &mut self,
        hw: &mut dyn Hardware,
        request: &Request,
        buffer: &mut [u8],
    ) -> (Response, Completion) {
        let address = request::endpoint_address(request);
        if !self.registry.is_open(address) {
            debug!("Endpoint {} isn't open", u8::from(address));
            return STALL;
        }
        let owner = self.registry.owner(address);

        if request.request_type == RequestType::Standard {
            match (request.direction, request.request) {
                (UsbDirection::In, Request::GET_STATUS) => {
                    buffer[0] = self.registry.is_stalled(address) as u8;
                    buffer[1] = 0;
                    return (Response::InBuffer(2), Completion::None);
                }
                (UsbDirection::Out, Request::SET_FEATURE | Request::CLEAR_FEATURE) => {
                    if request.value != Request::FEATURE_ENDPOINT_HALT {
                        return STALL;
                    }
                    if address.index() != 0
                        && self.halt(hw, address, owner, request, buffer).is_err()
                    {
                        return STALL;
                    }
                    return (Response::Status, Completion::None);
                }
                _ => {}
            }
        }

        match owner {
            Some(id) => match self.call(hw, id, request, buffer) {
                Response::Stall => STALL,
                response => (response, Completion::Driver(id)),
            },
            None => STALL,
        }
    }

    /// SET_FEATURE or CLEAR_FEATURE(ENDPOINT_HALT) on a non-control endpoint
    ///
    /// The owner hears about it, but doesn't get a say.
    fn halt(
        &mut self,
        hw: &mut dyn Hardware,
        address: EndpointAddress,
        owner: Option<DriverId>,
        request: &Request,
        buffer: &mut [u8],
    ) -> Result<()> {
        if request.request == Request::SET_FEATURE {
            self.registry.stall(address, &mut *hw)?;
        } else {
            self.registry.clear_stall(address, &mut *hw)?;
        }
        if let Some(id) = owner {
            self.call(hw, id, request, buffer);
        }
        Ok(())
    }

    /// The host acknowledged a control transfer
    pub(crate) fn finish(
        &mut self,
        hw: &mut dyn Hardware,
        request: &Request,
        completion: Completion,
        data: &[u8],
    ) {
        match completion {
            Completion::None => {}
            Completion::SetAddress(address) => {
                hw.set_device_address(address);
                self.state.address = address;
                self.state.status.set(DeviceStatus::ADDRESSED, address != 0);
                debug!("ADDRESS {}", address);
            }
            Completion::Driver(id) => {
                if let Some(driver) = self.drivers.get_mut(id.index()) {
                    driver.control_complete(request, data);
                }
            }
        }
    }

    /// Route a completion on a non-control endpoint to its owner
    ///
    /// Returns `false` if no driver owns the endpoint.
    pub(crate) fn transfer_complete(
        &mut self,
        hw: &mut dyn Hardware,
        address: EndpointAddress,
        len: usize,
        result: TransferResult,
    ) -> bool {
        self.registry.clear_busy(address);
        let speed = self.state.speed();
        let driver = self
            .registry
            .owner(address)
            .and_then(|id| Some((id, self.drivers.get_mut(id.index())?)));
        match driver {
            Some((id, driver)) => {
                let mut endpoints = Endpoints::new(hw, &mut self.registry, id, speed);
                driver.transfer_complete(&mut endpoints, address, len, result);
                true
            }
            None => {
                warn!("EP {} completion has no owner", u8::from(address));
                false
            }
        }
    }
}
