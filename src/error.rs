//! Error types for the streaming core
//!
//! Errors are organized by domain for better diagnostics:
//! - [`ConfigError`]: Backend resolution and channel setup failures
//! - [`DmaError`]: Buffer flow conditions (backpressure, closing, ordering)
//! - [`UsageError`]: Programming errors against the buffer lifecycle contract
//! - [`IoError`]: Transport/hardware failures, propagated unchanged
//!
//! The unified [`Error`] enum wraps all domain errors and is returned
//! by every facade and streaming operation.
//!
//! Stream discontinuities and TX lateness are *not* errors. They are carried
//! as status on the returned blocks (see [`crate::RxStatus`] and
//! [`crate::TxBlock::lateness`]).

// =============================================================================
// Configuration Errors
// =============================================================================

/// Configuration and setup errors
///
/// These errors occur while resolving a backend, opening a device, or
/// initializing a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Transport returned a pool geometry the core cannot use
    InvalidGeometry,
    /// Channel direction already initialized
    AlreadyInitialized,
    /// No backend registered under the requested protocol id
    UnknownBackend,
    /// Backend refused the requested ABI version
    IncompatibleAbi,
    /// A backend with the same protocol id is already registered
    DuplicateBackend,
    /// Device kind has no control operations table
    NoControlOps,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConfigError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConfigError::InvalidGeometry => "invalid buffer pool geometry",
            ConfigError::AlreadyInitialized => "channel already initialized",
            ConfigError::UnknownBackend => "unknown backend protocol",
            ConfigError::IncompatibleAbi => "backend does not support this ABI version",
            ConfigError::DuplicateBackend => "backend protocol already registered",
            ConfigError::NoControlOps => "no control operations for device kind",
        }
    }
}

// =============================================================================
// DMA Errors
// =============================================================================

/// Buffer flow conditions
///
/// `NotReady`, `PoolExhausted` and `Timeout` are backpressure: the caller is
/// expected to retry after a wait or poll. `ChannelClosing` is returned to
/// threads woken by a concurrent deinit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaError {
    /// No completed (RX) or free (TX) buffer is available right now
    NotReady,
    /// Every buffer in the pool is in flight or held by the application
    PoolExhausted,
    /// Wait deadline elapsed before a buffer became available
    Timeout,
    /// Channel is being torn down
    ChannelClosing,
    /// Hardware completed a buffer whose start is not after the previous one
    OutOfOrder,
    /// Slot is not currently owned by hardware
    NotInFlight,
}

impl core::fmt::Display for DmaError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DmaError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DmaError::NotReady => "no buffer ready",
            DmaError::PoolExhausted => "buffer pool exhausted",
            DmaError::Timeout => "timed out waiting for buffer",
            DmaError::ChannelClosing => "channel closing",
            DmaError::OutOfOrder => "out-of-order buffer completion",
            DmaError::NotInFlight => "buffer not in flight",
        }
    }

    /// Whether the condition is backpressure that the caller should retry
    #[must_use]
    pub const fn is_backpressure(&self) -> bool {
        matches!(
            self,
            DmaError::NotReady | DmaError::PoolExhausted | DmaError::Timeout
        )
    }
}

// =============================================================================
// Usage Errors
// =============================================================================

/// Buffer lifecycle contract violations
///
/// These indicate a programming error in the caller and are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsageError {
    /// Channel direction is not initialized
    NotInitialized,
    /// Buffer is not owned by the application (double or stale release)
    NotOwned,
    /// Buffer belongs to a different pool or channel
    ForeignBuffer,
    /// Posted buffer carries no samples
    ZeroSamples,
    /// Sample count exceeds the buffer capacity for the active format
    PayloadTooLarge,
    /// Sensor number outside the known set
    UnknownSensor,
    /// Parameter number outside the known set
    UnknownParam,
    /// Device kind number outside the known set
    UnknownDeviceKind,
    /// Channel index beyond what the device exposes
    ChannelOutOfRange,
}

impl core::fmt::Display for UsageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UsageError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            UsageError::NotInitialized => "channel not initialized",
            UsageError::NotOwned => "buffer not owned by application",
            UsageError::ForeignBuffer => "buffer belongs to another pool",
            UsageError::ZeroSamples => "zero sample count",
            UsageError::PayloadTooLarge => "payload exceeds buffer capacity",
            UsageError::UnknownSensor => "unknown sensor",
            UsageError::UnknownParam => "unknown parameter",
            UsageError::UnknownDeviceKind => "unknown device kind",
            UsageError::ChannelOutOfRange => "channel out of range",
        }
    }
}

// =============================================================================
// I/O Errors
// =============================================================================

/// Transport and hardware failures
///
/// Returned by backends and propagated unchanged. The affected channel
/// should be torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoError {
    /// Generic transport I/O failure
    Transport,
    /// Device was unplugged or the link went down
    Disconnected,
    /// Transport transaction timed out
    Timeout,
    /// Operation not supported by this backend
    Unsupported,
    /// Device answered with malformed data
    BadResponse,
}

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IoError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            IoError::Transport => "transport I/O error",
            IoError::Disconnected => "device disconnected",
            IoError::Timeout => "transport timeout",
            IoError::Unsupported => "operation not supported",
            IoError::BadResponse => "malformed device response",
        }
    }
}

// =============================================================================
// Unified Error Type
// =============================================================================

/// This enum wraps all domain-specific errors for unified error handling.
///
/// Match on the inner domain error for specific handling:
/// ```ignore
/// match device.rx_get_next(chan, WaitMode::Poll) {
///     Ok(block) => { /* ... */ }
///     Err(Error::Dma(DmaError::NotReady)) => { /* poll again later */ }
///     Err(Error::Dma(DmaError::ChannelClosing)) => { /* shut down */ }
///     Err(e) => return Err(e),
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Configuration error
    Config(ConfigError),
    /// Buffer flow condition
    Dma(DmaError),
    /// Contract violation
    Usage(UsageError),
    /// Transport failure
    Io(IoError),
}

impl Error {
    /// Whether the error is retryable backpressure
    #[must_use]
    pub const fn is_backpressure(&self) -> bool {
        match self {
            Error::Dma(e) => e.is_backpressure(),
            _ => false,
        }
    }

    /// Whether the error is a caller contract violation
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self, Error::Usage(_))
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "config: {}", e.as_str()),
            Error::Dma(e) => write!(f, "dma: {}", e.as_str()),
            Error::Usage(e) => write!(f, "usage: {}", e.as_str()),
            Error::Io(e) => write!(f, "io: {}", e.as_str()),
        }
    }
}

impl std::error::Error for Error {}

// From impls for automatic conversion
impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<DmaError> for Error {
    fn from(e: DmaError) -> Self {
        Error::Dma(e)
    }
}

impl From<UsageError> for Error {
    fn from(e: UsageError) -> Self {
        Error::Usage(e)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

/// Result type alias for streaming and facade operations
pub type Result<T> = core::result::Result<T, Error>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = core::result::Result<T, ConfigError>;

/// Result type alias for buffer flow operations
pub type DmaResult<T> = core::result::Result<T, DmaError>;

/// Result type alias for contract checks
pub type UsageResult<T> = core::result::Result<T, UsageError>;

// =============================================================================
// Unit Tests
// =============================================================================
