//! Streaming driver
//!
//! # Modules
//!
//! - [`config`]: channel, pool geometry, start request and open types
//! - [`ops`]: the [`DeviceOps`](ops::DeviceOps) transport facade and its
//!   typed values
//! - [`rx`], [`tx`]: per-channel streaming state machines
//! - [`control`]: board controls resolved per hardware revision
//! - [`backend`]: backend registry and ABI negotiation
//! - [`device`]: the [`Device`](device::Device) handle
//! - [`proxy`]: logging decorator for any transport

pub mod backend;
pub mod config;
pub mod control;
pub mod device;
pub mod ops;
pub mod proxy;
pub mod rx;
pub mod tx;
