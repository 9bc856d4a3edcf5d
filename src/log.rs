//! Logging interface, contingent on the `defmt-03` feature or the hidden
//! `__log` feature
//!
//! Only enable a backend when debugging, and when you're certain that your
//! logger isn't using USB! The control engine logs from the task context,
//! never from an interrupt handler.

macro_rules! trace {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::trace!($($args)*);
        #[cfg(feature = "__log")]
        ::__log::trace!($($args)*)
    };
}

macro_rules! debug {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::debug!($($args)*);
        #[cfg(feature = "__log")]
        ::__log::debug!($($args)*)
    };
}

macro_rules! warn {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::warn!($($args)*);
        #[cfg(feature = "__log")]
        ::__log::warn!($($args)*)
    };
}

macro_rules! error {
    ($($args:tt)*) => {
        #[cfg(feature = "defmt-03")]
        ::defmt::error!($($args)*);
        #[cfg(feature = "__log")]
        ::__log::error!($($args)*)
    };
}
