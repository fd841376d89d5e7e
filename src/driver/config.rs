//! Configuration types for channels, streaming and device open

use core::time::Duration;

use crate::constants::{DEFAULT_BUFFER_SIZE, DEFAULT_POOL_BUFFERS, MAX_BUFFER_SIZE, MAX_POOL_BUFFERS};
use crate::error::{ConfigError, ConfigResult};
use crate::timestamp::WtsLong;

/// Independent RX or TX stream index within a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Channel(pub u8);

impl Channel {
    /// Channel index as usize
    #[inline(always)]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

// =============================================================================
// Pool Geometry
// =============================================================================

/// Buffer pool shape negotiated by the transport at channel init
///
/// The core treats these values as opaque configuration: the transport
/// chooses them (possibly rounding up the caller's hint) and the core only
/// validates that they are usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PoolGeometry {
    /// Number of buffers in the pool
    pub buffers: usize,
    /// Bytes per buffer
    pub buffer_size: usize,
    /// TX only: how many samples behind the output position a submission may
    /// start before it is reported as late
    pub late_slack: u32,
}

impl Default for PoolGeometry {
    fn default() -> Self {
        Self {
            buffers: DEFAULT_POOL_BUFFERS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            late_slack: 0,
        }
    }
}

impl PoolGeometry {
    /// Create a geometry with zero late slack
    #[must_use]
    pub const fn new(buffers: usize, buffer_size: usize) -> Self {
        Self {
            buffers,
            buffer_size,
            late_slack: 0,
        }
    }

    /// Set the TX late slack in samples
    #[must_use]
    pub const fn with_late_slack(mut self, samples: u32) -> Self {
        self.late_slack = samples;
        self
    }

    /// Check that the geometry is within the supported limits
    pub fn validate(&self) -> ConfigResult<()> {
        let buffers_ok = (1..=MAX_POOL_BUFFERS).contains(&self.buffers);
        let size_ok = (1..=MAX_BUFFER_SIZE).contains(&self.buffer_size);
        if buffers_ok && size_ok {
            Ok(())
        } else {
            Err(ConfigError::InvalidGeometry)
        }
    }

    /// Total memory held by the pool in bytes
    #[must_use]
    pub const fn memory_usage(&self) -> usize {
        self.buffers * self.buffer_size
    }
}

// =============================================================================
// Waiting
// =============================================================================

/// How a call that may block behaves when no buffer is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Suspend until a buffer is available or the channel closes
    #[default]
    Block,
    /// Return `DmaError::NotReady` immediately
    Poll,
    /// Suspend for at most the given duration, then `DmaError::Timeout`
    Timeout(Duration),
}

// =============================================================================
// Stream Start
// =============================================================================

/// Sample format on the wire, or a start/stop instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrontEnd {
    /// Leave this direction as it is
    #[default]
    DontTouch,
    /// Stop this direction
    Stop,
    /// 8-bit I and Q
    I8,
    /// 12-bit packed I and Q
    I12,
    /// 16-bit I and Q
    I16,
}

impl FrontEnd {
    /// Bytes occupied by one IQ sample pair, `None` for control values
    #[must_use]
    pub const fn iq_bytes(self) -> Option<usize> {
        match self {
            FrontEnd::I8 => Some(2),
            FrontEnd::I12 => Some(3),
            FrontEnd::I16 => Some(4),
            FrontEnd::DontTouch | FrontEnd::Stop => None,
        }
    }

    /// `true` if the value starts streaming in a sample format
    #[must_use]
    pub const fn is_format(self) -> bool {
        self.iq_bytes().is_some()
    }
}

/// Streaming mode flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamMode {
    /// Single antenna path instead of both
    pub siso: bool,
    /// Route TX back into RX inside the device
    pub loopback: bool,
    /// Swap I and Q on the wire
    pub swap_iq: bool,
}

impl StreamMode {
    /// Both paths, no loopback
    #[must_use]
    pub const fn new() -> Self {
        Self {
            siso: false,
            loopback: false,
            swap_iq: false,
        }
    }

    /// Select single-path operation
    #[must_use]
    pub const fn with_siso(mut self, siso: bool) -> Self {
        self.siso = siso;
        self
    }

    /// Enable internal TX to RX loopback
    #[must_use]
    pub const fn with_loopback(mut self, loopback: bool) -> Self {
        self.loopback = loopback;
        self
    }

    /// Swap I and Q
    #[must_use]
    pub const fn with_swap_iq(mut self, swap_iq: bool) -> Self {
        self.swap_iq = swap_iq;
        self
    }
}

/// One atomic start command covering both directions of a channel
///
/// RX and TX are started by the same transport command so both halves begin
/// on the same hardware cycle.
///
/// ```
/// use sdrll::{FrontEnd, StartRequest, StreamMode, WtsLong};
///
/// let req = StartRequest::new()
///     .with_rx(FrontEnd::I16, StreamMode::new(), WtsLong::new(4096))
///     .with_tx(FrontEnd::I16, StreamMode::new());
/// assert!(req.starts_rx() && req.starts_tx());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartRequest {
    /// RX sample format or start/stop instruction
    pub rx_format: FrontEnd,
    /// RX mode flags
    pub rx_mode: StreamMode,
    /// First RX sample to capture
    pub rx_start: WtsLong,
    /// TX sample format or start/stop instruction
    pub tx_format: FrontEnd,
    /// TX mode flags
    pub tx_mode: StreamMode,
}

impl StartRequest {
    /// Request that touches neither direction
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rx_format: FrontEnd::DontTouch,
            rx_mode: StreamMode::new(),
            rx_start: WtsLong::ZERO,
            tx_format: FrontEnd::DontTouch,
            tx_mode: StreamMode::new(),
        }
    }

    /// Configure the RX half
    #[must_use]
    pub const fn with_rx(mut self, format: FrontEnd, mode: StreamMode, start: WtsLong) -> Self {
        self.rx_format = format;
        self.rx_mode = mode;
        self.rx_start = start;
        self
    }

    /// Configure the TX half
    #[must_use]
    pub const fn with_tx(mut self, format: FrontEnd, mode: StreamMode) -> Self {
        self.tx_format = format;
        self.tx_mode = mode;
        self
    }

    /// RX begins streaming
    #[must_use]
    pub const fn starts_rx(&self) -> bool {
        self.rx_format.is_format()
    }

    /// TX begins streaming
    #[must_use]
    pub const fn starts_tx(&self) -> bool {
        self.tx_format.is_format()
    }
}

// =============================================================================
// Open and Discovery
// =============================================================================

/// Transport-specific open flags, passed through unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// No flags
    pub const NONE: OpenFlags = OpenFlags(0);

    /// `true` if every bit of `other` is set
    #[must_use]
    pub const fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Descriptor of a device found by discovery
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    /// Stable name usable with `open`
    pub unique_name: String,
    /// Protocol id of the backend that found it
    pub proto: String,
    /// Transport address (bus path, IP, ...)
    pub address: String,
    /// Product string
    pub product: String,
    /// Link speed reported by the transport, in Mbit/s
    pub bus_speed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_is_valid() {
        let geometry = PoolGeometry::default();
        assert_eq!(geometry.buffers, DEFAULT_POOL_BUFFERS);
        assert_eq!(geometry.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(geometry.validate().is_ok());
    }

    #[test]
    fn empty_geometry_is_invalid() {
        assert_eq!(PoolGeometry::new(0, 1024).validate(), Err(ConfigError::InvalidGeometry));
        assert_eq!(PoolGeometry::new(4, 0).validate(), Err(ConfigError::InvalidGeometry));
    }

    #[test]
    fn oversized_geometry_is_invalid() {
        let geometry = PoolGeometry::new(MAX_POOL_BUFFERS + 1, 1024);
        assert_eq!(geometry.validate(), Err(ConfigError::InvalidGeometry));
        let geometry = PoolGeometry::new(4, MAX_BUFFER_SIZE + 1);
        assert_eq!(geometry.validate(), Err(ConfigError::InvalidGeometry));
    }

    #[test]
    fn geometry_memory_usage() {
        assert_eq!(PoolGeometry::new(4, 256).memory_usage(), 1024);
        assert_eq!(PoolGeometry::default().memory_usage(), 1024 * 1024);
    }

    #[test]
    fn geometry_builder_sets_slack() {
        assert_eq!(PoolGeometry::new(2, 64).with_late_slack(10).late_slack, 10);
    }

    #[test]
    fn wait_mode_defaults_to_block() {
        assert_eq!(WaitMode::default(), WaitMode::Block);
    }

    #[test]
    fn front_end_sample_sizes() {
        assert_eq!(FrontEnd::I8.iq_bytes(), Some(2));
        assert_eq!(FrontEnd::I12.iq_bytes(), Some(3));
        assert_eq!(FrontEnd::I16.iq_bytes(), Some(4));
        assert_eq!(FrontEnd::Stop.iq_bytes(), None);
        assert!(!FrontEnd::DontTouch.is_format());
    }

    #[test]
    fn stream_mode_builder() {
        let mode = StreamMode::new().with_siso(true).with_loopback(true);
        assert!(mode.siso);
        assert!(mode.loopback);
        assert!(!mode.swap_iq);
    }

    #[test]
    fn start_request_default_touches_nothing() {
        let req = StartRequest::new();
        assert!(!req.starts_rx());
        assert!(!req.starts_tx());
        assert_eq!(req, StartRequest::default());
    }

    #[test]
    fn start_request_rx_only() {
        let req = StartRequest::new().with_rx(FrontEnd::I12, StreamMode::new(), WtsLong::new(10));
        assert!(req.starts_rx());
        assert!(!req.starts_tx());
        assert_eq!(req.rx_start, WtsLong::new(10));
    }

    #[test]
    fn open_flags_contains() {
        let flags = OpenFlags(0b1010);
        assert!(flags.contains(OpenFlags(0b0010)));
        assert!(!flags.contains(OpenFlags(0b0100)));
        assert!(flags.contains(OpenFlags::NONE));
    }

    #[test]
    fn channel_display() {
        assert_eq!(format!("{}", Channel(1)), "ch1");
        assert_eq!(Channel(3).index(), 3);
    }
}
