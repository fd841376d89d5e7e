//! Device operations facade
//!
//! [`DeviceOps`] is the capability table a transport backend (USB, PCIe,
//! network, simulation) implements once. The streaming state machines only
//! ever talk to hardware through it.
//!
//! Sensor, parameter, configuration and device-kind numbers are closed
//! enums. Raw integers coming from outside are converted with `TryFrom<u32>`
//! at the facade boundary, so unknown values are rejected instead of being
//! forwarded to the transport.

use crate::driver::config::{Channel, FrontEnd, PoolGeometry, StartRequest, StreamMode};
use crate::driver::rx::RxPort;
use crate::driver::tx::TxPort;
use crate::error::{IoError, Result, UsageError};
use crate::timestamp::WtsLong;

// =============================================================================
// Typed Facade Values
// =============================================================================

/// Generates a `#[repr(u32)]` enum with `raw()`, `ALL` and a validating
/// `TryFrom<u32>`.
macro_rules! closed_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $unknown:expr,
        { $( $(#[$vmeta:meta])* $variant:ident = $value:expr ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        #[repr(u32)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl $name {
            /// Every known value, in numeric order
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )+ ];

            /// Numeric value used on the wire
            #[inline(always)]
            #[must_use]
            pub const fn raw(self) -> u32 {
                self as u32
            }
        }

        impl TryFrom<u32> for $name {
            type Error = UsageError;

            fn try_from(raw: u32) -> core::result::Result<Self, Self::Error> {
                match raw {
                    $( v if v == $value => Ok($name::$variant), )+
                    _ => Err($unknown),
                }
            }
        }
    };
}

closed_enum! {
    /// Sensors readable through the facade
    Sensor, UsageError::UnknownSensor, {
        /// Board temperature in 1/256 degree Celsius
        BoardTemperature = 0,
        /// Measured reference clock in Hz
        RefClockHz = 1,
        /// 1 if the sample clock PLL is locked
        PllLocked = 2,
        /// RX overruns counted by hardware
        RxOverruns = 3,
        /// TX buffers that started after their timestamp
        TxLateBuffers = 4,
        /// 1PPS edges seen since open
        OnePpsCount = 5,
    }
}

closed_enum! {
    /// Writable device parameters
    Param, UsageError::UnknownParam, {
        /// Transport DMA completion timeout in milliseconds
        DmaTimeoutMs = 0,
        /// TX late slack in samples
        TxLateSlack = 1,
        /// Nominal reference clock in Hz
        RefClockHz = 2,
        /// 1 to enable digital TX to RX loopback
        Loopback = 3,
        /// 1 to gate clocks of idle blocks
        PowerSaving = 4,
    }
}

closed_enum! {
    /// Read-only configuration words
    CfgParam, UsageError::UnknownParam, {
        /// Board hardware revision
        HardwareRevision = 0,
        /// Gateware version
        FirmwareVersion = 1,
        /// Number of streaming channels
        ChannelCount = 2,
        /// Board serial number
        SerialNumber = 3,
    }
}

closed_enum! {
    /// Hardware revision reported by a backend; selects the control table
    DeviceKind, UsageError::UnknownDeviceKind, {
        /// Revision 4 boards
        Rev4 = 4,
        /// Revision 5 boards
        Rev5 = 5,
    }
}

closed_enum! {
    /// Destination of a timed command
    CommandRoute, UsageError::UnknownParam, {
        /// RX front-end switch register
        RxFrontEnd = 0,
        /// TX front-end switch register
        TxFrontEnd = 1,
        /// General purpose outputs
        Gpio = 2,
    }
}

// =============================================================================
// Device Operations
// =============================================================================

/// Capability table implemented once per transport backend.
///
/// # Threading
///
/// Implementations are shared between application threads and must be
/// `Send + Sync`. Register and SPI calls are serialized by the
/// implementation. The core never calls into the transport while holding a
/// channel lock, so an implementation may call back into an [`RxPort`] or
/// [`TxPort`] from inside any method.
///
/// # Decoration
///
/// A wrapper (logging, fault injection, ...) implements `DeviceOps` by
/// delegating to the value it owns and returns it from [`DeviceOps::inner`].
/// [`origin`] follows that chain to the root implementation.
pub trait DeviceOps: Send + Sync {
    /// Identifier of the opened device
    fn id(&self) -> &str;

    /// Protocol id of the backend that opened it
    fn proto_id(&self) -> &'static str;

    /// Hardware revision, selects the control operations table
    fn device_kind(&self) -> DeviceKind;

    /// Number of streaming channels per direction
    fn channel_count(&self) -> u8;

    /// Wrapped implementation when `self` is a decorator
    fn inner(&self) -> Option<&dyn DeviceOps> {
        None
    }

    /// Release transport resources; called once by `Device::close`
    fn close(&self) -> Result<()> {
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Register and bus access
    // -------------------------------------------------------------------------

    /// Write one register
    fn reg_out(&self, reg: u32, value: u32) -> Result<()>;

    /// Read one register
    fn reg_in(&self, reg: u32) -> Result<u32>;

    /// Write `values.len()` consecutive registers in one transaction
    fn reg_out_n(&self, start: u32, values: &[u32]) -> Result<()>;

    /// Read `values.len()` consecutive registers in one transaction
    fn reg_in_n(&self, start: u32, values: &mut [u32]) -> Result<()>;

    /// Full-duplex SPI transfer to the RF chip `bus`
    fn spi_bulk(&self, bus: u32, out: &[u32], input: &mut [u32]) -> Result<()>;

    // -------------------------------------------------------------------------
    // RX DMA
    // -------------------------------------------------------------------------

    /// Prepare RX DMA; returns the pool geometry, possibly rounded up from
    /// `size_hint`
    fn rx_dma_init(&self, chan: Channel, size_hint: usize) -> Result<PoolGeometry>;

    /// Hand the completion port to the transport
    fn rx_dma_attach(&self, chan: Channel, port: RxPort) -> Result<()>;

    /// Abandon all RX buffers and stop the channel
    fn rx_dma_deinit(&self, chan: Channel) -> Result<()>;

    /// Drop stale data and resume filling at or after `next`
    fn rx_dma_resume_at(&self, chan: Channel, next: WtsLong) -> Result<()>;

    /// A buffer was released; the transport may re-arm
    fn rx_poll_demand(&self, _chan: Channel) {}

    // -------------------------------------------------------------------------
    // TX DMA
    // -------------------------------------------------------------------------

    /// Prepare TX DMA; returns the pool geometry and late slack
    fn tx_dma_init(&self, chan: Channel, buffer_size: usize) -> Result<PoolGeometry>;

    /// Hand the submission port to the transport
    fn tx_dma_attach(&self, chan: Channel, port: TxPort) -> Result<()>;

    /// Abort all TX buffers and stop the channel
    fn tx_dma_deinit(&self, chan: Channel) -> Result<()>;

    /// Current hardware output position of the TX channel
    fn tx_position(&self, chan: Channel) -> Result<WtsLong>;

    /// A buffer was posted; the transport should pick it up
    fn tx_poll_demand(&self, _chan: Channel) {}

    // -------------------------------------------------------------------------
    // Streaming control
    // -------------------------------------------------------------------------

    /// Start/stop both directions of `chan` with one hardware command
    fn dma_start(&self, chan: Channel, request: &StartRequest) -> Result<()>;

    /// Load a buffer the hardware transmits repeatedly
    fn repeat_tx_buf(
        &self,
        _chan: Channel,
        _format: FrontEnd,
        _data: &[u8],
        _mode: StreamMode,
    ) -> Result<()> {
        Err(IoError::Unsupported.into())
    }

    /// Start or stop repeat transmission
    fn repeat_tx_start(&self, _chan: Channel, _start: bool) -> Result<()> {
        Err(IoError::Unsupported.into())
    }

    // -------------------------------------------------------------------------
    // Sensors and parameters
    // -------------------------------------------------------------------------

    /// Read a sensor, waiting for a fresh value if the transport needs to
    fn get_sensor(&self, sensor: Sensor) -> Result<i32>;

    /// Set a device parameter
    fn set_param(&self, param: Param, value: u32) -> Result<()>;
}

/// Follow the decoration chain of `ops` to the root implementation.
///
/// Each decorator owns the value it wraps, so the chain is finite and this
/// always terminates.
pub fn origin(ops: &dyn DeviceOps) -> &dyn DeviceOps {
    let mut current = ops;
    while let Some(inner) = current.inner() {
        current = inner;
    }
    current
}
