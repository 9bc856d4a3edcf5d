//! Control transfers and event dispatch for embedded USB devices
//!
//! `usbd-ctrl` is the middle of a USB device stack. Below it sits a
//! [`Hardware`](hardware::Hardware) driver for one USB controller. Above it
//! sit [`ClassDriver`](class::ClassDriver)s that implement device classes.
//! In between, this crate
//!
//! - queues hardware events from interrupt handlers ([`event`]),
//! - tracks open endpoints and in-flight transfers ([`registry`]),
//! - runs control transfers through their setup, data and status stages
//!   ([`control`]),
//! - answers standard requests, and routes the rest to class drivers.
//!
//! The same event queue and registry also carry the host role. A
//! [`UsbHost`](host::UsbHost) runs control transfers against attached
//! devices through a [`HostHardware`](host::HostHardware) driver.
//!
//! All protocol state lives in one [`UsbDevice`](device::UsbDevice), and
//! only the task runner touches it. Interrupt handlers post to an
//! [`EventQueue`](event::EventQueue) and return.
//!
//! # Example
//!
//! ```
//! use usbd_ctrl::{
//!     config::Config,
//!     descriptor::Descriptors,
//!     device::UsbDevice,
//!     event::EventQueue,
//!     hardware::{EndpointInfo, Hardware, Transfer},
//!     request::SetupPacket,
//! };
//! use usb_device::endpoint::EndpointAddress;
//!
//! struct Controller;
//! impl Hardware for Controller {
//!     // Program the controller's registers...
//! #   fn open_endpoint(&mut self, _: &EndpointInfo) -> bool { true }
//! #   fn close_endpoint(&mut self, _: EndpointAddress) {}
//! #   fn submit_transfer(&mut self, _: EndpointAddress, _: Transfer<'_>) -> bool { true }
//! #   fn read_transfer(&mut self, _: EndpointAddress, _: &mut [u8]) -> usize { 0 }
//! #   fn stall_endpoint(&mut self, _: EndpointAddress) {}
//! #   fn clear_stall(&mut self, _: EndpointAddress) {}
//! #   fn set_device_address(&mut self, _: u8) {}
//! #   fn connect(&mut self) {}
//! #   fn disconnect(&mut self) {}
//! }
//!
//! struct MyDescriptors;
//! impl Descriptors for MyDescriptors {
//!     fn device(&self) -> &'static [u8] {
//!         &[18, 1, 0x00, 0x02, 0, 0, 0, 64, 0x09, 0x12, 0x01, 0x00, 0, 1, 0, 0, 0, 1]
//!     }
//!     fn configuration(&self, _: u8) -> Option<&'static [u8]> { None }
//!     fn string(&self, _: u8, _: u16) -> Option<&'static [u8]> { None }
//! }
//!
//! static EVENTS: EventQueue = EventQueue::new();
//!
//! let mut device = UsbDevice::new(Controller, &EVENTS, &MyDescriptors, Config::new());
//! device.init().unwrap();
//! device.connect();
//!
//! // The USB interrupt handler posts what the controller saw...
//! EVENTS.setup_received(SetupPacket::get_descriptor(1, 0, 0, 18).to_bytes(), true);
//!
//! // ...and the task runner acts on it.
//! assert_eq!(device.task(), 1);
//! ```
//!
//! # Logging
//!
//! Enable the `defmt-03` feature to log with `defmt`. Only enable logging
//! when debugging, and when you're certain that your logger isn't using USB!
//!
//! # Critical sections
//!
//! The event queue uses [`critical-section`](https://crates.io/crates/critical-section).
//! On a single core Cortex-M system, enable the `cortex-m-single-core`
//! feature, or provide another implementation.

#![no_std]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;

mod dispatch;

pub mod class;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod event;
pub mod hardware;
pub mod host;
pub mod registry;
pub mod request;

pub use error::{Error, Result};
