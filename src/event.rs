//! Events posted by the hardware driver, and the queue that carries them
//! to the task runner
//!
//! Interrupt handlers, and synchronous hardware driver calls, only ever
//! append to an [`EventQueue`]. They never touch the control engine or the
//! endpoint registry. The task runner is the only consumer.
//!
//! Allocate a `static` queue and share it between your interrupt handler and
//! the USB device:
//!
//! ```
//! use usbd_ctrl::event::{EventQueue, TransferResult};
//! use usb_device::{endpoint::EndpointAddress, UsbDirection};
//!
//! static EVENTS: EventQueue = EventQueue::new();
//!
//! // In the USB interrupt handler...
//! let ep0_in = EndpointAddress::from_parts(0, UsbDirection::In);
//! EVENTS.transfer_complete(ep0_in, 8, TransferResult::Success, true);
//! assert_eq!(EVENTS.len(), 1);
//! ```
//!
//! # Overflow policy
//!
//! When the queue is full, the *incoming* event is dropped and counted.
//! Queued events are never replaced or merged. A non-zero drop count means
//! that the task runner isn't running often enough; see
//! [`dropped()`](EventQueue::dropped).

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;
use usb_device::endpoint::EndpointAddress;

use crate::config::Speed;

/// Default event queue depth
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Outcome of a hardware transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum TransferResult {
    /// The transaction completed
    Success,
    /// The hardware reported an error
    Failed,
    /// The endpoint answered with, or received, a STALL handshake
    Stalled,
}

/// A bus-level signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum BusSignal {
    /// The host reset the bus. The device negotiated `speed`.
    Reset {
        /// Negotiated bus speed
        speed: Speed,
    },
    /// VBUS went away
    Unplugged,
    /// The bus has been idle long enough to suspend
    Suspend,
    /// Bus activity resumed after a suspend
    Resume,
}

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Origin {
    /// Posted from an interrupt handler
    Isr,
    /// Posted from a synchronous call, outside of interrupt context
    Task,
}

impl Origin {
    fn new(from_isr: bool) -> Self {
        if from_isr {
            Origin::Isr
        } else {
            Origin::Task
        }
    }
}

/// An event for the task runner
///
/// Two deferred calls are equal when they name the same function address
/// and argument.
#[derive(Debug, Clone, Copy)]
pub enum Event {
    /// A bus-level signal
    Bus(BusSignal),
    /// The control endpoint received the 8 setup bytes
    SetupReceived([u8; 8]),
    /// A transfer completed on `address`
    TransferComplete {
        /// The endpoint that completed the transfer
        address: EndpointAddress,
        /// Number of bytes moved
        len: usize,
        /// Transfer outcome
        result: TransferResult,
    },
    /// Run `func(arg)` in task context
    Deferred {
        /// Function to call
        func: fn(usize),
        /// Argument for `func`
        arg: usize,
    },
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Event::Bus(lhs), Event::Bus(rhs)) => lhs == rhs,
            (Event::SetupReceived(lhs), Event::SetupReceived(rhs)) => lhs == rhs,
            (
                Event::TransferComplete {
                    address,
                    len,
                    result,
                },
                Event::TransferComplete {
                    address: other_address,
                    len: other_len,
                    result: other_result,
                },
            ) => address == other_address && len == other_len && result == other_result,
            (
                Event::Deferred { func, arg },
                Event::Deferred {
                    func: other_func,
                    arg: other_arg,
                },
            ) => *func as usize == *other_func as usize && arg == other_arg,
            _ => false,
        }
    }
}

impl Eq for Event {}

/// An event, and the context that posted it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    /// The event
    pub event: Event,
    /// Who posted the event
    pub origin: Origin,
}

struct Inner<const N: usize> {
    events: Deque<EventRecord, N>,
    dropped: u32,
}

/// A fixed-capacity FIFO of events
///
/// Any context may [`push`](EventQueue::push). Exactly one task context may
/// [`pop`](EventQueue::pop). Each operation holds a short critical section
/// while it touches the ring indices. Nothing allocates.
pub struct EventQueue<const N: usize = DEFAULT_QUEUE_DEPTH> {
    inner: Mutex<RefCell<Inner<N>>>,
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EventQueue<N> {
    /// Create an empty queue that holds up to `N` events
    pub const fn new() -> Self {
        EventQueue {
            inner: Mutex::new(RefCell::new(Inner {
                events: Deque::new(),
                dropped: 0,
            })),
        }
    }

    /// Append an event
    ///
    /// Never blocks. Returns `false` if the queue is full; the event is then
    /// dropped and counted.
    pub fn push(&self, event: Event, origin: Origin) -> bool {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            match inner.events.push_back(EventRecord { event, origin }) {
                Ok(()) => true,
                Err(_) => {
                    inner.dropped = inner.dropped.saturating_add(1);
                    false
                }
            }
        })
    }

    /// Remove the oldest event
    ///
    /// Only the task runner should call this.
    pub fn pop(&self) -> Option<EventRecord> {
        critical_section::with(|cs| self.inner.borrow(cs).borrow_mut().events.pop_front())
    }

    /// Signal that the control endpoint received a setup packet
    pub fn setup_received(&self, setup: [u8; 8], from_isr: bool) -> bool {
        self.push(Event::SetupReceived(setup), Origin::new(from_isr))
    }

    /// Signal that a transfer completed
    pub fn transfer_complete(
        &self,
        address: EndpointAddress,
        len: usize,
        result: TransferResult,
        from_isr: bool,
    ) -> bool {
        self.push(
            Event::TransferComplete {
                address,
                len,
                result,
            },
            Origin::new(from_isr),
        )
    }

    /// Signal a bus event
    pub fn bus_signal(&self, signal: BusSignal, from_isr: bool) -> bool {
        self.push(Event::Bus(signal), Origin::new(from_isr))
    }

    /// Defer `func(arg)` to the task context
    pub fn defer(&self, func: fn(usize), arg: usize, from_isr: bool) -> bool {
        self.push(Event::Deferred { func, arg }, Origin::new(from_isr))
    }

    /// Indicates if there are no events waiting
    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().events.is_empty())
    }

    /// Returns the number of waiting events
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().events.len())
    }

    /// Returns the maximum number of waiting events
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Returns the number of events dropped since the last
    /// [`take_dropped()`](EventQueue::take_dropped)
    pub fn dropped(&self) -> u32 {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().dropped)
    }

    /// Returns, and resets, the dropped event counter
    pub fn take_dropped(&self) -> u32 {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            core::mem::take(&mut inner.dropped)
        })
    }

    /// Discard all waiting events
    ///
    /// The dropped counter is unchanged.
    pub fn clear(&self) {
        critical_section::with(|cs| self.inner.borrow(cs).borrow_mut().events.clear())
    }
}

#[cfg(test)]
mod tests {
    use super::{BusSignal, Event, EventQueue, Origin, TransferResult};
    use crate::config::Speed;
    use usb_device::{endpoint::EndpointAddress, UsbDirection};

    fn ep0_in() -> EndpointAddress {
        EndpointAddress::from_parts(0, UsbDirection::In)
    }

    #[test]
    fn fifo_order() {
        let queue: EventQueue<4> = EventQueue::new();
        assert!(queue.setup_received([1; 8], true));
        assert!(queue.transfer_complete(ep0_in(), 8, TransferResult::Success, true));
        assert!(queue.bus_signal(BusSignal::Suspend, false));

        let first = queue.pop().unwrap();
        assert_eq!(first.event, Event::SetupReceived([1; 8]));
        assert_eq!(first.origin, Origin::Isr);

        let second = queue.pop().unwrap();
        assert_eq!(
            second.event,
            Event::TransferComplete {
                address: ep0_in(),
                len: 8,
                result: TransferResult::Success
            }
        );

        let third = queue.pop().unwrap();
        assert_eq!(third.event, Event::Bus(BusSignal::Suspend));
        assert_eq!(third.origin, Origin::Task);

        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_drops_newest_and_counts() {
        let queue: EventQueue<2> = EventQueue::new();
        assert!(queue.bus_signal(BusSignal::Reset { speed: Speed::Full }, true));
        assert!(queue.bus_signal(BusSignal::Suspend, true));
        assert!(!queue.bus_signal(BusSignal::Resume, true));
        assert!(!queue.setup_received([0; 8], true));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 2);

        // Queued events are untouched by the overflow.
        assert_eq!(
            queue.pop().unwrap().event,
            Event::Bus(BusSignal::Reset { speed: Speed::Full })
        );
        assert_eq!(queue.pop().unwrap().event, Event::Bus(BusSignal::Suspend));
        assert!(queue.pop().is_none());

        assert_eq!(queue.take_dropped(), 2);
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn space_is_reusable_after_pop() {
        let queue: EventQueue<1> = EventQueue::new();
        for idx in 0..10 {
            assert!(queue.defer(|_| {}, idx, false));
            assert!(!queue.defer(|_| {}, idx, false));
            match queue.pop().unwrap().event {
                Event::Deferred { arg, .. } => assert_eq!(arg, idx),
                _ => panic!("Unexpected event"),
            }
        }
        assert_eq!(queue.dropped(), 10);
    }

    #[test]
    fn static_queue() {
        static EVENTS: EventQueue = EventQueue::new();
        assert_eq!(EVENTS.capacity(), super::DEFAULT_QUEUE_DEPTH);
        assert!(EVENTS.bus_signal(BusSignal::Unplugged, true));
        EVENTS.clear();
        assert!(EVENTS.is_empty());
    }

    fn noop(_: usize) {}

    #[test]
    fn deferred_events_compare_function_and_argument() {
        let call = Event::Deferred { func: noop, arg: 3 };
        assert_eq!(call, Event::Deferred { func: noop, arg: 3 });
        assert_ne!(call, Event::Deferred { func: noop, arg: 4 });
        assert_ne!(call, Event::Bus(BusSignal::Suspend));
    }
}
