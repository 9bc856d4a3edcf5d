//! The USB device, and its task runner
//!
//! A [`UsbDevice`] owns everything for one USB controller: the hardware
//! driver, the control engine, the endpoint registry, and the registered
//! class drivers. Its lifecycle is
//!
//! 1. [`new`](UsbDevice::new), then [`register`](UsbDevice::register) each
//!    class driver.
//! 2. [`init`](UsbDevice::init), then [`connect`](UsbDevice::connect).
//! 3. Call [`task`](UsbDevice::task) whenever the event queue has events,
//!    or hand control to [`run`](UsbDevice::run).
//! 4. Optionally, [`deinit`](UsbDevice::deinit).
//!
//! The task runner is the only code that touches the control engine and the
//! registry. Interrupt handlers only post to the [`EventQueue`].

use bitflags::bitflags;
use usb_device::endpoint::EndpointAddress;

use crate::{
    class::{ClassDriver, DriverId, Endpoints},
    config::{Config, Speed},
    control::{ControlEngine, Progress, Stage},
    descriptor::Descriptors,
    dispatch::Dispatcher,
    error::{Error, Result},
    event::{BusSignal, Event, EventQueue, EventRecord, TransferResult, DEFAULT_QUEUE_DEPTH},
    hardware::Hardware,
    registry::EndpointRegistry,
    request,
};

bitflags! {
    /// Device status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceStatus : u8 {
        /// The host sent at least one setup packet since the last reset
        const CONNECTED = 1 << 0;
        /// The host assigned a non-zero address
        const ADDRESSED = 1 << 1;
        /// The bus is suspended
        const SUSPENDED = 1 << 2;
        /// The device is self powered
        const SELF_POWERED = 1 << 3;
        /// The active configuration supports remote wakeup
        const REMOTE_WAKEUP_SUPPORTED = 1 << 4;
        /// The host enabled remote wakeup
        const REMOTE_WAKEUP_ENABLED = 1 << 5;
    }
}

/// Snapshot of the device state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub(crate) status: DeviceStatus,
    pub(crate) address: u8,
    pub(crate) configuration: u8,
    pub(crate) speed: Speed,
}

impl DeviceState {
    pub(crate) fn new(speed: Speed, self_powered: bool) -> Self {
        let mut status = DeviceStatus::empty();
        status.set(DeviceStatus::SELF_POWERED, self_powered);
        DeviceState {
            status,
            address: 0,
            configuration: 0,
            speed,
        }
    }

    /// Returns the status flags
    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    /// Returns the device address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Returns the active configuration value, or zero if unconfigured
    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    /// Indicates if the host selected a configuration
    pub fn is_configured(&self) -> bool {
        self.configuration != 0
    }

    /// Returns the bus speed
    pub fn speed(&self) -> Speed {
        self.speed
    }
}

/// Diagnostic counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Stats {
    /// Transfers that the hardware reported as failed or stalled
    pub failed_transfers: u32,
    /// Control requests answered with a stall
    pub stalls: u32,
    /// Completions that didn't belong to any transfer
    pub stray_completions: u32,
    /// Control transfers abandoned for a new setup packet
    pub aborted_transfers: u32,
    /// Events lost to a full event queue
    pub dropped_events: u32,
    /// Bus resets
    pub bus_resets: u32,
}

/// Waits for the next event
///
/// [`UsbDevice::run`] calls `wait()` after draining the event queue.
/// Implementations return once `pending()` is true, or once an interrupt
/// might have made it true.
pub trait Notify {
    /// Block until `pending()` might be true
    fn wait(&mut self, pending: &dyn Fn() -> bool);
}

/// Sleep with `wfi` until the next interrupt
///
/// The check happens with interrupts disabled, so an event posted just
/// before `wfi` still wakes the core.
#[derive(Debug, Default, Clone, Copy)]
pub struct Wfi;

impl Notify for Wfi {
    fn wait(&mut self, pending: &dyn Fn() -> bool) {
        cortex_m::interrupt::free(|_| {
            if !pending() {
                cortex_m::asm::wfi();
            }
        });
    }
}

/// One USB device stack instance
pub struct UsbDevice<'a, H, const Q: usize = DEFAULT_QUEUE_DEPTH> {
    hw: H,
    events: &'a EventQueue<Q>,
    config: Config,
    control: ControlEngine,
    dispatcher: Dispatcher<'a>,
    stats: Stats,
    initialized: bool,
}

impl<'a, H: Hardware, const Q: usize> UsbDevice<'a, H, Q> {
    /// Create a device
    ///
    /// `events` is the queue that the hardware driver posts to.
    pub fn new(
        hw: H,
        events: &'a EventQueue<Q>,
        descriptors: &'a dyn Descriptors,
        config: Config,
    ) -> Self {
        UsbDevice {
            hw,
            events,
            config,
            control: ControlEngine::new(config.control_max_packet_size()),
            dispatcher: Dispatcher::new(
                descriptors,
                DeviceState::new(config.configured_speed(), config.is_self_powered()),
            ),
            stats: Stats::default(),
            initialized: false,
        }
    }

    /// Register a class driver
    ///
    /// Drivers see interfaces and requests in registration order. Register
    /// every driver before [`init()`](UsbDevice::init).
    pub fn register(&mut self, driver: &'a mut dyn ClassDriver) -> Result<DriverId> {
        if self.initialized {
            return Err(Error::AlreadyInitialized);
        }
        let id = DriverId::new(self.dispatcher.drivers.len() as u8);
        self.dispatcher
            .drivers
            .push(driver)
            .map_err(|_| Error::TooManyDrivers)?;
        Ok(id)
    }

    /// Prepare the device for the bus
    ///
    /// Fails if the configuration is invalid, or if the device is already
    /// initialized.
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Err(Error::AlreadyInitialized);
        }
        self.config.validate()?;
        self.reset(self.config.configured_speed());
        self.initialized = true;
        debug!("INIT MPS0 {}", self.config.control_max_packet_size());
        Ok(())
    }

    /// Detach, close every endpoint, and drop all pending events
    ///
    /// Call [`init()`](UsbDevice::init) to use the device again.
    pub fn deinit(&mut self) {
        self.hw.disconnect();
        self.dispatcher.registry.close_all(&mut self.hw);
        self.reset(self.config.configured_speed());
        self.events.clear();
        self.initialized = false;
        debug!("DEINIT");
    }

    /// Attach to the bus
    pub fn connect(&mut self) {
        self.hw.connect();
    }

    /// Detach from the bus
    pub fn disconnect(&mut self) {
        self.hw.disconnect();
    }

    /// Wake the host
    ///
    /// Only signals when the bus is suspended, and the host enabled remote
    /// wakeup for a configuration that supports it. Returns `true` if the
    /// device signaled.
    pub fn remote_wakeup(&mut self) -> bool {
        let needed = DeviceStatus::SUSPENDED
            | DeviceStatus::REMOTE_WAKEUP_SUPPORTED
            | DeviceStatus::REMOTE_WAKEUP_ENABLED;
        if self.dispatcher.state.status.contains(needed) {
            self.hw.remote_wakeup();
            true
        } else {
            false
        }
    }

    /// Handle every queued event
    ///
    /// Returns the number of events handled. Does nothing until the device
    /// is initialized.
    pub fn task(&mut self) -> usize {
        if !self.initialized {
            return 0;
        }

        let dropped = self.events.take_dropped();
        if dropped != 0 {
            warn!("{} events dropped", dropped);
            self.stats.dropped_events = self.stats.dropped_events.saturating_add(dropped);
        }

        let mut handled = 0;
        while let Some(record) = self.events.pop() {
            self.handle(record);
            handled += 1;
        }
        handled
    }

    /// Handle events forever, waiting on `notify` when there are none
    pub fn run<N: Notify>(&mut self, notify: &mut N) -> ! {
        loop {
            self.task();
            let events = self.events;
            notify.wait(&|| !events.is_empty());
        }
    }

    /// Returns the device state
    pub fn state(&self) -> &DeviceState {
        &self.dispatcher.state
    }

    /// Indicates if the host selected a configuration
    pub fn is_configured(&self) -> bool {
        self.dispatcher.state.is_configured()
    }

    /// Returns the control transfer stage
    pub fn stage(&self) -> Stage {
        self.control.stage()
    }

    /// Returns the diagnostic counters
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Returns the endpoint registry
    pub fn registry(&self) -> &EndpointRegistry {
        &self.dispatcher.registry
    }

    /// Act on a driver's endpoints from the application
    ///
    /// Use this to start transfers outside of a driver callback.
    pub fn endpoints(&mut self, driver: DriverId) -> Endpoints<'_> {
        let speed = self.dispatcher.state.speed();
        Endpoints::new(&mut self.hw, &mut self.dispatcher.registry, driver, speed)
    }

    /// Returns the hardware driver
    pub fn hardware(&self) -> &H {
        &self.hw
    }

    /// Returns the hardware driver
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    fn reset(&mut self, speed: Speed) {
        self.control.reset();
        self.dispatcher.reset(
            DeviceState::new(speed, self.config.is_self_powered()),
            self.config.control_max_packet_size() as u16,
        );
    }

    fn handle(&mut self, record: EventRecord) {
        match record.event {
            Event::Bus(signal) => self.bus_signal(signal),
            Event::SetupReceived(setup) => self.setup(setup),
            Event::TransferComplete {
                address,
                len,
                result,
            } => self.transfer_complete(address, len, result),
            Event::Deferred { func, arg } => {
                trace!("DEFERRED {}", arg);
                func(arg)
            }
        }
    }

    fn bus_signal(&mut self, signal: BusSignal) {
        let connected = self
            .dispatcher
            .state
            .status
            .contains(DeviceStatus::CONNECTED);
        match signal {
            BusSignal::Reset { speed } => {
                debug!("BUS RESET");
                self.stats.bus_resets = self.stats.bus_resets.saturating_add(1);
                self.reset(speed);
            }
            BusSignal::Unplugged => {
                debug!("UNPLUGGED");
                self.reset(self.dispatcher.state.speed());
            }
            // Plugging and unplugging produce spurious suspend and resume
            // signals.
            BusSignal::Suspend if connected => {
                debug!("SUSPEND");
                self.dispatcher.state.status.insert(DeviceStatus::SUSPENDED);
            }
            BusSignal::Resume if connected => {
                debug!("RESUME");
                self.dispatcher.state.status.remove(DeviceStatus::SUSPENDED);
            }
            BusSignal::Suspend | BusSignal::Resume => {
                trace!("Bus signal ignored while disconnected");
            }
        }
    }

    fn setup(&mut self, setup: [u8; 8]) {
        self.dispatcher.state.status.insert(DeviceStatus::CONNECTED);
        self.dispatcher.registry.reset_control();
        if self.control.setup() {
            self.stats.aborted_transfers = self.stats.aborted_transfers.saturating_add(1);
        }

        let request = request::parse(&setup);
        trace!(
            "SETUP {} {} {} {}",
            setup[0],
            request.request,
            request.value,
            request.length
        );
        let (response, completion) =
            self.dispatcher
                .dispatch(&mut self.hw, &request, self.control.buffer_mut());
        let progress = self.control.begin(
            request,
            response,
            completion,
            &mut self.hw,
            &mut self.dispatcher.registry,
        );
        self.progress(progress);
    }

    fn transfer_complete(&mut self, address: EndpointAddress, len: usize, result: TransferResult) {
        trace!("COMPLETE EP {} LEN {}", u8::from(address), len);
        if address.index() == 0 {
            let progress = self.control.transaction_complete(
                address,
                len,
                result,
                &mut self.hw,
                &mut self.dispatcher.registry,
            );
            self.progress(progress);
            return;
        }

        if result != TransferResult::Success {
            self.stats.failed_transfers = self.stats.failed_transfers.saturating_add(1);
        }
        if !self
            .dispatcher
            .transfer_complete(&mut self.hw, address, len, result)
        {
            self.stats.stray_completions = self.stats.stray_completions.saturating_add(1);
        }
    }

    fn progress(&mut self, progress: Progress) {
        match progress {
            Progress::Pending => {}
            Progress::Complete {
                request,
                completion,
            } => {
                self.dispatcher
                    .finish(&mut self.hw, &request, completion, self.control.data());
            }
            Progress::Aborted(_) => {
                self.stats.failed_transfers = self.stats.failed_transfers.saturating_add(1);
            }
            Progress::Stalled => {
                self.stats.stalls = self.stats.stalls.saturating_add(1);
            }
            Progress::Stray => {
                debug!("Stray control completion");
                self.stats.stray_completions = self.stats.stray_completions.saturating_add(1);
            }
        }
    }
}
