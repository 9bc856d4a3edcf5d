//! Endpoint and transfer registry
//!
//! The registry tracks every open endpoint: its configuration, the class
//! driver that owns it, and whether a transfer is in flight. It enforces the
//! contract with the hardware driver: at most one transfer per endpoint
//! address. A second submission fails fast with
//! [`Error::RegistryConflict`] before it reaches the hardware.

use bitflags::bitflags;
use usb_device::{endpoint::EndpointAddress, UsbDirection};

use crate::{
    class::DriverId,
    config::MAX_ENDPOINTS,
    error::{Error, Result},
    hardware::{EndpointInfo, Hardware, Transfer},
};

bitflags! {
    /// Runtime endpoint state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EndpointFlags : u8 {
        /// The endpoint is open
        const OPEN = 1 << 0;
        /// A transfer is in flight
        const BUSY = 1 << 1;
        /// The endpoint is stalled
        const STALLED = 1 << 2;
        /// A submitter claimed the endpoint
        const CLAIMED = 1 << 3;
    }
}

/// Direct index to the OUT control endpoint
pub(crate) fn ctrl_ep0_out() -> EndpointAddress {
    EndpointAddress::from_parts(0, UsbDirection::Out)
}

/// Direct index to the IN control endpoint
pub(crate) fn ctrl_ep0_in() -> EndpointAddress {
    EndpointAddress::from_parts(0, UsbDirection::In)
}

/// Produces an index into the endpoint slots
///
/// Returns `None` if the endpoint number is out of range.
fn index(addr: EndpointAddress) -> Option<usize> {
    let idx = (addr.index() * 2) + (UsbDirection::In == addr.direction()) as usize;
    (idx < MAX_ENDPOINTS).then_some(idx)
}

#[derive(Clone, Copy)]
struct Slot {
    info: Option<EndpointInfo>,
    flags: EndpointFlags,
    owner: Option<DriverId>,
}

impl Slot {
    const EMPTY: Self = Slot {
        info: None,
        flags: EndpointFlags::empty(),
        owner: None,
    };
}

/// State for all endpoints of one USB controller
pub struct EndpointRegistry {
    slots: [Slot; MAX_ENDPOINTS],
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRegistry {
    /// Create a registry with no open endpoints
    pub const fn new() -> Self {
        EndpointRegistry {
            slots: [Slot::EMPTY; MAX_ENDPOINTS],
        }
    }

    fn slot(&self, addr: EndpointAddress) -> Option<&Slot> {
        self.slots.get(index(addr)?)
    }

    fn slot_mut(&mut self, addr: EndpointAddress) -> Option<&mut Slot> {
        self.slots.get_mut(index(addr)?)
    }

    fn open_slot_mut(&mut self, addr: EndpointAddress) -> Result<&mut Slot> {
        self.slot_mut(addr)
            .filter(|slot| slot.flags.contains(EndpointFlags::OPEN))
            .ok_or(Error::InvalidEndpoint)
    }

    /// Record both directions of the control endpoint
    ///
    /// The hardware driver manages the control endpoint itself, so this
    /// doesn't call into the hardware. Any previous control endpoint state
    /// is discarded.
    pub fn open_control(&mut self, max_packet_size: u16) {
        for addr in [ctrl_ep0_out(), ctrl_ep0_in()] {
            if let Some(slot) = self.slot_mut(addr) {
                *slot = Slot {
                    info: Some(EndpointInfo::control(addr, max_packet_size)),
                    flags: EndpointFlags::OPEN,
                    owner: None,
                };
            }
        }
    }

    /// Open a non-control endpoint
    ///
    /// Fails with [`Error::RegistryConflict`] if the endpoint is already open,
    /// or [`Error::HardwareRejected`] if the hardware can't support it.
    pub fn open(&mut self, info: EndpointInfo, hw: &mut dyn Hardware) -> Result<()> {
        let slot = self.slot_mut(info.address).ok_or(Error::InvalidEndpoint)?;
        if info.address.index() == 0 {
            return Err(Error::InvalidEndpoint);
        }
        if slot.flags.contains(EndpointFlags::OPEN) {
            warn!("EP {} already open", u8::from(info.address));
            return Err(Error::RegistryConflict);
        }
        if !hw.open_endpoint(&info) {
            warn!("EP {} rejected by hardware", u8::from(info.address));
            return Err(Error::HardwareRejected);
        }
        *slot = Slot {
            info: Some(info),
            flags: EndpointFlags::OPEN,
            owner: None,
        };
        debug!("OPEN EP {} MPS {}", u8::from(info.address), info.max_packet_size);
        Ok(())
    }

    /// Close an endpoint
    ///
    /// Closing an endpoint that isn't open does nothing. The control endpoint
    /// can't be closed.
    pub fn close(&mut self, addr: EndpointAddress, hw: &mut dyn Hardware) {
        if addr.index() == 0 {
            return;
        }
        if let Some(slot) = self.slot_mut(addr) {
            if slot.flags.contains(EndpointFlags::OPEN) {
                hw.close_endpoint(addr);
                *slot = Slot::EMPTY;
                debug!("CLOSE EP {}", u8::from(addr));
            }
        }
    }

    /// Close every non-control endpoint
    pub fn close_all(&mut self, hw: &mut dyn Hardware) {
        for idx in 2..MAX_ENDPOINTS {
            let addr = EndpointAddress::from_parts(
                idx / 2,
                if idx % 2 == 1 {
                    UsbDirection::In
                } else {
                    UsbDirection::Out
                },
            );
            self.close(addr, hw);
        }
    }

    /// Forget every endpoint without calling into the hardware
    ///
    /// Use after a bus reset, when the hardware already disabled its
    /// endpoints.
    pub fn reset(&mut self) {
        self.slots = [Slot::EMPTY; MAX_ENDPOINTS];
    }

    /// Returns the endpoint configuration, if it's open
    pub fn info(&self, addr: EndpointAddress) -> Option<&EndpointInfo> {
        self.slot(addr)?.info.as_ref()
    }

    /// Returns the endpoint flags
    ///
    /// Returns empty flags for out-of-range endpoints.
    pub fn flags(&self, addr: EndpointAddress) -> EndpointFlags {
        self.slot(addr)
            .map(|slot| slot.flags)
            .unwrap_or(EndpointFlags::empty())
    }

    /// Indicates if the endpoint is open
    pub fn is_open(&self, addr: EndpointAddress) -> bool {
        self.flags(addr).contains(EndpointFlags::OPEN)
    }

    /// Indicates if a transfer is in flight on the endpoint
    pub fn is_busy(&self, addr: EndpointAddress) -> bool {
        self.flags(addr).contains(EndpointFlags::BUSY)
    }

    /// Indicates if the endpoint is stalled
    pub fn is_stalled(&self, addr: EndpointAddress) -> bool {
        self.flags(addr).contains(EndpointFlags::STALLED)
    }

    /// Returns the max packet size of an open endpoint
    pub fn max_packet_size(&self, addr: EndpointAddress) -> Option<usize> {
        self.info(addr).map(|info| info.max_packet_size as usize)
    }

    /// Mark the endpoint busy
    ///
    /// Fails with [`Error::RegistryConflict`] if it's already busy. That's a
    /// double submission by the caller.
    pub fn mark_busy(&mut self, addr: EndpointAddress) -> Result<()> {
        let slot = self.open_slot_mut(addr)?;
        if slot.flags.contains(EndpointFlags::BUSY) {
            error!("EP {} is busy", u8::from(addr));
            return Err(Error::RegistryConflict);
        }
        slot.flags.insert(EndpointFlags::BUSY);
        Ok(())
    }

    /// Clear the busy flag, and release any claim
    pub fn clear_busy(&mut self, addr: EndpointAddress) {
        if let Some(slot) = self.slot_mut(addr) {
            slot.flags.remove(EndpointFlags::BUSY | EndpointFlags::CLAIMED);
        }
    }

    /// Claim the endpoint for one submitter
    ///
    /// Returns `false` if it's already claimed, or busy.
    pub fn claim(&mut self, addr: EndpointAddress) -> bool {
        match self.open_slot_mut(addr) {
            Ok(slot) if !slot.flags.intersects(EndpointFlags::BUSY | EndpointFlags::CLAIMED) => {
                slot.flags.insert(EndpointFlags::CLAIMED);
                true
            }
            _ => false,
        }
    }

    /// Release a claim
    ///
    /// Returns `false` if the endpoint wasn't claimed.
    pub fn release(&mut self, addr: EndpointAddress) -> bool {
        match self.open_slot_mut(addr) {
            Ok(slot) if slot.flags.contains(EndpointFlags::CLAIMED) => {
                slot.flags.remove(EndpointFlags::CLAIMED);
                true
            }
            _ => false,
        }
    }

    /// Start a transfer
    ///
    /// The endpoint is marked busy before the hardware sees the transfer,
    /// since the completion can arrive before `submit_transfer()` returns.
    /// If the hardware refuses the transfer, the endpoint is free again.
    pub fn submit(
        &mut self,
        addr: EndpointAddress,
        transfer: Transfer<'_>,
        hw: &mut dyn Hardware,
    ) -> Result<()> {
        self.mark_busy(addr)?;
        trace!("SUBMIT EP {} LEN {}", u8::from(addr), transfer.len());
        if hw.submit_transfer(addr, transfer) {
            Ok(())
        } else {
            warn!("EP {} submit rejected", u8::from(addr));
            self.clear_busy(addr);
            Err(Error::HardwareRejected)
        }
    }

    /// Stall the endpoint
    ///
    /// A stalled endpoint stays busy until the stall is cleared. Stalling an
    /// already stalled endpoint does nothing.
    pub fn stall(&mut self, addr: EndpointAddress, hw: &mut dyn Hardware) -> Result<()> {
        let slot = self.open_slot_mut(addr)?;
        if !slot.flags.contains(EndpointFlags::STALLED) {
            hw.stall_endpoint(addr);
            slot.flags.insert(EndpointFlags::STALLED | EndpointFlags::BUSY);
            debug!("STALL EP {}", u8::from(addr));
        }
        Ok(())
    }

    /// Clear an endpoint stall
    ///
    /// Clearing an endpoint that isn't stalled does nothing.
    pub fn clear_stall(&mut self, addr: EndpointAddress, hw: &mut dyn Hardware) -> Result<()> {
        let slot = self.open_slot_mut(addr)?;
        if slot.flags.contains(EndpointFlags::STALLED) {
            hw.clear_stall(addr);
            slot.flags.remove(EndpointFlags::STALLED | EndpointFlags::BUSY);
            debug!("CLEAR STALL EP {}", u8::from(addr));
        }
        Ok(())
    }

    /// Note a control endpoint stall requested by the control engine
    pub(crate) fn mark_control_stalled(&mut self) {
        for addr in [ctrl_ep0_out(), ctrl_ep0_in()] {
            if let Some(slot) = self.slot_mut(addr) {
                slot.flags.insert(EndpointFlags::STALLED);
            }
        }
    }

    /// Free both control endpoint directions
    ///
    /// Called when a setup packet arrives. The hardware has already cleared
    /// any control stall, and abandoned transfers never complete.
    pub(crate) fn reset_control(&mut self) {
        for addr in [ctrl_ep0_out(), ctrl_ep0_in()] {
            if let Some(slot) = self.slot_mut(addr) {
                slot.flags = EndpointFlags::OPEN;
            }
        }
    }

    /// Returns the driver that owns the endpoint
    pub fn owner(&self, addr: EndpointAddress) -> Option<DriverId> {
        self.slot(addr)?.owner
    }

    /// Bind an open endpoint to a driver
    pub fn set_owner(&mut self, addr: EndpointAddress, owner: DriverId) -> Result<()> {
        self.open_slot_mut(addr)?.owner = Some(owner);
        Ok(())
    }
}
