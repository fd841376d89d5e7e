//! In-process simulated transport
//!
//! [`SimDevice`] implements [`DeviceOps`](crate::DeviceOps) over a register
//! file and a software sample clock. Tests and host tools drive the hardware
//! side explicitly: [`SimDevice::produce_rx`] fills and completes RX
//! buffers, [`SimDevice::drop_rx`] loses samples, [`SimDevice::drain_tx`]
//! transmits posted TX buffers.
//!
//! The simulator is registered as protocol [`PROTO_ID`] in
//! [`BackendRegistry::builtin`](crate::BackendRegistry::builtin).

mod backend;
mod device;

pub use backend::{OPEN_REV5, PROTO_ID, SimBackend, backend_entry};
pub use device::SimDevice;

use crate::driver::config::PoolGeometry;
use crate::driver::ops::DeviceKind;

/// Shape of a simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Reported hardware revision
    pub kind: DeviceKind,
    /// Streaming channels per direction
    pub channels: u8,
    /// RX pool geometry offered at init
    pub rx_geometry: PoolGeometry,
    /// TX pool geometry offered at init
    pub tx_geometry: PoolGeometry,
    /// Reference clock reported by the `RefClockHz` sensor
    pub ref_clock_hz: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            kind: DeviceKind::Rev4,
            channels: 1,
            rx_geometry: PoolGeometry::new(8, 4096),
            tx_geometry: PoolGeometry::new(8, 4096).with_late_slack(64),
            ref_clock_hz: 26_000_000,
        }
    }
}

impl SimConfig {
    /// Set the reported revision
    #[must_use]
    pub fn with_kind(mut self, kind: DeviceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the channel count
    #[must_use]
    pub fn with_channels(mut self, channels: u8) -> Self {
        self.channels = channels;
        self
    }

    /// RX pool shape; the buffer size is the default when the caller's hint
    /// is 0
    #[must_use]
    pub fn with_rx_geometry(mut self, geometry: PoolGeometry) -> Self {
        self.rx_geometry = geometry;
        self
    }

    /// TX pool shape, including the late slack
    #[must_use]
    pub fn with_tx_geometry(mut self, geometry: PoolGeometry) -> Self {
        self.tx_geometry = geometry;
        self
    }

    /// Set the reference clock sensor value
    #[must_use]
    pub fn with_ref_clock_hz(mut self, hz: u32) -> Self {
        self.ref_clock_hz = hz;
        self
    }
}
