//! Timestamp-Synchronized DMA Streaming Core
//!
//! A hardware-abstraction core for software-defined-radio front-ends. It
//! moves IQ sample buffers between a radio application and pluggable
//! transports (USB, PCIe, network) with sample-accurate timing based on a
//! wrapping hardware timestamp counter.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! 1. **Device** ([`Device`]): the handle applications hold. Owns the RX and
//!    TX channels and routes control calls.
//! 2. **Streaming** ([`driver::rx`], [`driver::tx`]): per-channel state
//!    machines over a fixed buffer pool. Delivery is strictly chronological;
//!    gaps are reported, never spliced; late transmissions are reported,
//!    never silently dropped.
//! 3. **Facade** ([`DeviceOps`], [`ControlOps`]): what a transport backend
//!    implements. Control operations are resolved per hardware revision at
//!    open time.
//! 4. **Timestamps** ([`timestamp`]): modular 32-bit arithmetic and wrap
//!    extension to 64 bits.
//!
//! A simulated transport ([`sim`]) is built in for tests and host tools.
//!
//! # Error Model
//!
//! Every operation returns [`Result`]. [`Error::is_backpressure`] marks the
//! conditions a caller is expected to retry (no buffer yet, pool exhausted,
//! wait timed out). Discontinuities and lateness are status fields on the
//! returned blocks, not errors.
//!
//! # Features
//!
//! - `defmt`: derive `defmt::Format` for public plain-data types
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sdrll::sim::{SimConfig, SimDevice};
//! use sdrll::{Channel, Device, FrontEnd, StartRequest, StreamMode, WaitMode, WtsLong};
//!
//! let sim = Arc::new(SimDevice::new(SimConfig::default()));
//! let device = Device::from_ops(sim.clone());
//! let ch = Channel(0);
//!
//! device.rx_init(ch, 0)?;
//! device.dma_start(
//!     ch,
//!     StartRequest::new().with_rx(FrontEnd::I16, StreamMode::new(), WtsLong::new(1000)),
//! )?;
//!
//! sim.produce_rx(ch, 2)?;
//! let first = device.rx_get_next(ch, WaitMode::Block)?;
//! assert_eq!(first.wts(), WtsLong::new(1000));
//! assert!(!first.status().discontinuity);
//! device.rx_release(first)?;
//! # Ok::<(), sdrll::Error>(())
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]
// Clippy lint levels live here; thresholds and config are in Cargo.toml.
#![deny(clippy::correctness)]
#![warn(
    clippy::suspicious,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::cloned_instead_of_copied,
    clippy::explicit_iter_loop,
    clippy::implicit_clone,
    clippy::inconsistent_struct_constructor,
    clippy::manual_assert,
    clippy::manual_let_else,
    clippy::match_same_arms,
    clippy::needless_pass_by_value,
    clippy::semicolon_if_nothing_returned,
    clippy::uninlined_format_args,
    clippy::unnested_or_patterns
)]
#![allow(
    clippy::mod_module_files,
    clippy::self_named_module_files,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::struct_excessive_bools,
    clippy::fn_params_excessive_bools,
    clippy::type_complexity,
    clippy::must_use_candidate,
    clippy::assertions_on_constants,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    clippy::panic_in_result_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::items_after_statements
)]

// =============================================================================
// Modules
// =============================================================================

pub mod constants;
pub mod driver;
pub mod error;
pub mod hal;
pub mod sim;
pub mod timestamp;

// Internal implementation details (pub(crate) only)
mod internal;
mod sync;

// Test utilities (only available during testing)
#[cfg(test)]
pub(crate) mod test_utils;

// =============================================================================
// Re-exports
// =============================================================================

pub use driver::backend::{Backend, BackendEntry, BackendRegistry, abi_compatible};
pub use driver::config::{
    Channel, DeviceInfo, FrontEnd, OpenFlags, PoolGeometry, StartRequest, StreamMode,
    WaitMode,
};
pub use driver::control::{ControlOps, PllStatus, RegisterControl, resolve_control_ops};
pub use driver::device::Device;
pub use driver::ops::{CfgParam, CommandRoute, DeviceKind, DeviceOps, Param, Sensor, origin};
pub use driver::proxy::LoggingOps;
pub use driver::rx::{Completion, RxBlock, RxPort, RxState, RxStats, RxStatus};
pub use driver::tx::{TxBlock, TxPending, TxPort, TxState, TxStats};
pub use error::{
    ConfigError, ConfigResult, DmaError, DmaResult, Error, IoError, Result, UsageError,
    UsageResult,
};
pub use hal::{Poller, StdDelay};
pub use internal::dma::{BufferId, BufferState, PoolCounts};
pub use timestamp::{Wts32, WtsExtender, WtsLong};
