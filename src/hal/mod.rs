//! Hardware Abstraction Layer
//!
//! Helpers shared by transports and control operations that have to wait on
//! hardware without a completion interrupt.
//!
//! # Modules
//!
//! - [`poll`]: bounded polling driven by a delay provider
//!
//! # Delay Integration
//!
//! All types that require delays use `embedded_hal::delay::DelayNs` directly.
//! On a host, [`StdDelay`] sleeps the calling thread.

pub mod poll;

pub use poll::{Poller, StdDelay};
