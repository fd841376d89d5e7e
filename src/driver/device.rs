//! Device handle
//!
//! [`Device`] binds one [`DeviceOps`] transport (possibly decorated) and the
//! [`ControlOps`] table for its hardware revision, and owns the RX and TX
//! channel state machines. Every public operation of the crate is reachable
//! from here.
//!
//! # Locking
//!
//! Channel maps are locked only long enough to look up, insert or remove a
//! channel. Blocking waits happen on the channel's own cell, and transport
//! calls are made with no channel lock held. Channel init and deinit are
//! serialized by a separate lifecycle lock.
//!
//! # Example
//!
//! ```
//! use sdrll::{Channel, Device, FrontEnd, OpenFlags, StartRequest, StreamMode, WaitMode, WtsLong};
//!
//! let device = Device::open("sim", "", OpenFlags::NONE)?;
//! let ch = Channel(0);
//! device.rx_init(ch, 0)?;
//! device.dma_start(
//!     ch,
//!     StartRequest::new().with_rx(FrontEnd::I16, StreamMode::new(), WtsLong::ZERO),
//! )?;
//! match device.rx_get_next(ch, WaitMode::Poll) {
//!     Ok(block) => device.rx_release(block)?,
//!     Err(e) if e.is_backpressure() => {}
//!     Err(e) => return Err(e),
//! }
//! device.close()?;
//! # Ok::<(), sdrll::Error>(())
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embedded_hal::delay::DelayNs;
use log::{debug, warn};

use crate::driver::backend::BackendRegistry;
use crate::driver::config::{
    Channel, FrontEnd, OpenFlags, StartRequest, StreamMode, WaitMode,
};
use crate::driver::control::{ControlOps, PllStatus, resolve_control_ops};
use crate::driver::ops::{CfgParam, CommandRoute, DeviceKind, DeviceOps, Param, Sensor};
use crate::driver::rx::{RxBlock, RxChannel, RxState, RxStats};
use crate::driver::tx::{TxBlock, TxChannel, TxState, TxStats};
use crate::error::{ConfigError, DmaError, Error, Result, UsageError};
use crate::hal::poll::Poller;
use crate::timestamp::{Wts32, WtsLong};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An opened device
pub struct Device {
    ops: Arc<dyn DeviceOps>,
    control: Option<&'static dyn ControlOps>,
    rx: Mutex<BTreeMap<Channel, RxChannel>>,
    tx: Mutex<BTreeMap<Channel, TxChannel>>,
    lifecycle: Mutex<()>,
    closed: AtomicBool,
}

impl Device {
    // =========================================================================
    // Open and Close
    // =========================================================================

    /// Open `device` through the built-in backend registered as `proto`
    pub fn open(proto: &str, device: &str, flags: OpenFlags) -> Result<Self> {
        Self::open_with(&BackendRegistry::builtin(), proto, device, flags)
    }

    /// Open `device` through `registry`.
    ///
    /// Fails with `ConfigError::UnknownBackend` if nothing is registered
    /// under `proto` and `ConfigError::IncompatibleAbi` if the backend
    /// refuses this crate's ABI version.
    pub fn open_with(
        registry: &BackendRegistry,
        proto: &str,
        device: &str,
        flags: OpenFlags,
    ) -> Result<Self> {
        let backend = registry.require(proto)?;
        let ops = backend.open(device, flags)?;
        Ok(Self::from_ops(ops))
    }

    /// Wrap an already opened transport
    pub fn from_ops(ops: Arc<dyn DeviceOps>) -> Self {
        let control = resolve_control_ops(ops.device_kind());
        debug!(
            "{}: opened via '{}', {:?}, {} channels",
            ops.id(),
            ops.proto_id(),
            ops.device_kind(),
            ops.channel_count()
        );
        Self {
            ops,
            control,
            rx: Mutex::new(BTreeMap::new()),
            tx: Mutex::new(BTreeMap::new()),
            lifecycle: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Deinitialize every channel and release the transport
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let rx: Vec<Channel> = lock(&self.rx).keys().copied().collect();
        let tx: Vec<Channel> = lock(&self.tx).keys().copied().collect();

        let mut first_error = None;
        for chan in rx {
            if let Err(e) = self.rx_deinit(chan) {
                first_error.get_or_insert(e);
            }
        }
        for chan in tx {
            if let Err(e) = self.tx_deinit(chan) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.ops.close() {
            first_error.get_or_insert(e);
        }
        debug!("{}: closed", self.ops.id());
        first_error.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// The bound transport, possibly a decorator
    pub fn ops(&self) -> &dyn DeviceOps {
        &*self.ops
    }

    /// Identifier reported by the transport
    pub fn id(&self) -> &str {
        self.ops.id()
    }

    /// Hardware revision
    pub fn device_kind(&self) -> DeviceKind {
        self.ops.device_kind()
    }

    /// Streaming channels per direction
    pub fn channel_count(&self) -> u8 {
        self.ops.channel_count()
    }

    fn check_chan(&self, chan: Channel) -> Result<()> {
        if chan.0 < self.ops.channel_count() {
            Ok(())
        } else {
            Err(UsageError::ChannelOutOfRange.into())
        }
    }

    fn rx_channel(&self, chan: Channel) -> Result<RxChannel> {
        lock(&self.rx)
            .get(&chan)
            .cloned()
            .ok_or_else(|| UsageError::NotInitialized.into())
    }

    fn tx_channel(&self, chan: Channel) -> Result<TxChannel> {
        lock(&self.tx)
            .get(&chan)
            .cloned()
            .ok_or_else(|| UsageError::NotInitialized.into())
    }

    // =========================================================================
    // RX Streaming
    // =========================================================================

    /// Prepare RX on `chan`; returns the negotiated buffer size in bytes
    pub fn rx_init(&self, chan: Channel, size_hint: usize) -> Result<usize> {
        self.check_chan(chan)?;
        let _lifecycle = lock(&self.lifecycle);
        if lock(&self.rx).contains_key(&chan) {
            return Err(ConfigError::AlreadyInitialized.into());
        }

        let geometry = self.ops.rx_dma_init(chan, size_hint)?;
        if let Err(e) = geometry.validate() {
            warn!("{chan}: transport offered unusable rx geometry {geometry:?}");
            let _ = self.ops.rx_dma_deinit(chan);
            return Err(e.into());
        }

        let channel = RxChannel::new(chan, geometry);
        if let Err(e) = self.ops.rx_dma_attach(chan, channel.port()) {
            channel.close();
            let _ = self.ops.rx_dma_deinit(chan);
            return Err(e);
        }
        lock(&self.rx).insert(chan, channel);
        Ok(geometry.buffer_size)
    }

    /// Tear down RX on `chan`; blocked consumers get
    /// `DmaError::ChannelClosing`. Deinit of an idle channel is a no-op.
    pub fn rx_deinit(&self, chan: Channel) -> Result<()> {
        let _lifecycle = lock(&self.lifecycle);
        let Some(channel) = lock(&self.rx).remove(&chan) else {
            return Ok(());
        };
        channel.close();
        self.ops.rx_dma_deinit(chan)
    }

    /// Oldest completed RX buffer
    pub fn rx_get_next(&self, chan: Channel, wait: WaitMode) -> Result<RxBlock> {
        self.rx_channel(chan)?.get_next(wait)
    }

    /// Poll for the next RX buffer with `poller`'s interval and timeout.
    ///
    /// For callers that must not park the thread on a condition variable.
    /// Gives up with `DmaError::Timeout`.
    pub fn rx_get_next_polled<D: DelayNs>(
        &self,
        chan: Channel,
        poller: &mut Poller<D>,
    ) -> Result<RxBlock> {
        let channel = self.rx_channel(chan)?;
        poller
            .try_poll(|| match channel.get_next(WaitMode::Poll) {
                Ok(block) => Ok(Some(block)),
                Err(Error::Dma(DmaError::NotReady)) => Ok(None),
                Err(e) => Err(e),
            })?
            .ok_or_else(|| DmaError::Timeout.into())
    }

    /// Hand a delivered buffer back for refilling
    pub fn rx_release(&self, block: RxBlock) -> Result<()> {
        let chan = block.channel();
        self.rx_channel(chan)?.release(block)?;
        self.ops.rx_poll_demand(chan);
        Ok(())
    }

    /// Discard stale data and resume at or after `target`
    pub fn rx_resume_at(&self, chan: Channel, target: WtsLong) -> Result<()> {
        self.rx_channel(chan)?.prepare_resume(target)?;
        self.ops.rx_dma_resume_at(chan, target)
    }

    /// RX counters and pool snapshot
    pub fn rx_stats(&self, chan: Channel) -> Result<RxStats> {
        Ok(self.rx_channel(chan)?.stats())
    }

    /// `Uninitialized` for channels that were never set up
    pub fn rx_state(&self, chan: Channel) -> RxState {
        self.rx_channel(chan)
            .map_or(RxState::Uninitialized, |channel| channel.state())
    }

    // =========================================================================
    // TX Streaming
    // =========================================================================

    /// Prepare TX on `chan`; returns the negotiated buffer size in bytes
    pub fn tx_init(&self, chan: Channel, buffer_size: usize) -> Result<usize> {
        self.check_chan(chan)?;
        let _lifecycle = lock(&self.lifecycle);
        if lock(&self.tx).contains_key(&chan) {
            return Err(ConfigError::AlreadyInitialized.into());
        }

        let geometry = self.ops.tx_dma_init(chan, buffer_size)?;
        if let Err(e) = geometry.validate() {
            warn!("{chan}: transport offered unusable tx geometry {geometry:?}");
            let _ = self.ops.tx_dma_deinit(chan);
            return Err(e.into());
        }

        let channel = TxChannel::new(chan, geometry);
        if let Err(e) = self.ops.tx_dma_attach(chan, channel.port()) {
            channel.close();
            let _ = self.ops.tx_dma_deinit(chan);
            return Err(e);
        }
        lock(&self.tx).insert(chan, channel);
        Ok(geometry.buffer_size)
    }

    /// Tear down TX on `chan`, aborting queued buffers
    pub fn tx_deinit(&self, chan: Channel) -> Result<()> {
        let _lifecycle = lock(&self.lifecycle);
        let Some(channel) = lock(&self.tx).remove(&chan) else {
            return Ok(());
        };
        channel.close();
        self.ops.tx_dma_deinit(chan)
    }

    /// Free TX buffer; its `lateness()` describes the previous post
    pub fn tx_get_free(&self, chan: Channel, wait: WaitMode) -> Result<TxBlock> {
        self.tx_channel(chan)?.get_free(wait)
    }

    /// Queue `block` for transmission of `samples` samples at `target`.
    ///
    /// Late posts are still submitted; see [`TxBlock::lateness`].
    pub fn tx_post(&self, block: TxBlock, target: WtsLong, samples: u32) -> Result<()> {
        let chan = block.channel();
        let channel = self.tx_channel(chan)?;
        let now = match self.ops.tx_position(chan) {
            Ok(now) => now,
            Err(e) => {
                channel.discard(block)?;
                return Err(e);
            }
        };
        channel.post(block, target, samples, now)?;
        self.ops.tx_poll_demand(chan);
        Ok(())
    }

    /// TX counters and pool snapshot
    pub fn tx_stats(&self, chan: Channel) -> Result<TxStats> {
        Ok(self.tx_channel(chan)?.stats())
    }

    /// `Uninitialized` for channels that were never set up
    pub fn tx_state(&self, chan: Channel) -> TxState {
        self.tx_channel(chan)
            .map_or(TxState::Uninitialized, |channel| channel.state())
    }

    // =========================================================================
    // Streaming Control
    // =========================================================================

    /// Start or stop both directions of `chan` with one transport command
    pub fn dma_start(&self, chan: Channel, request: StartRequest) -> Result<()> {
        self.check_chan(chan)?;
        let touches = |format: FrontEnd| format != FrontEnd::DontTouch;
        let rx = if touches(request.rx_format) {
            Some(self.rx_channel(chan)?)
        } else {
            None
        };
        let tx = if touches(request.tx_format) {
            Some(self.tx_channel(chan)?)
        } else {
            None
        };

        // Floor goes in before the hardware can complete anything
        if let Some(rx) = rx.as_ref().filter(|_| request.starts_rx()) {
            rx.on_start(request.rx_start)?;
        }

        if let Err(e) = self.ops.dma_start(chan, &request) {
            if let Some(rx) = rx.as_ref().filter(|_| request.starts_rx()) {
                rx.on_stop();
            }
            return Err(e);
        }

        if let Some(rx) = rx.filter(|_| request.rx_format == FrontEnd::Stop) {
            rx.on_stop();
        }
        if let Some(tx) = tx {
            if request.starts_tx() {
                tx.on_start(request.tx_format)?;
            } else {
                tx.on_stop();
            }
        }
        Ok(())
    }

    /// Load a buffer the hardware transmits in a loop
    pub fn repeat_tx_buf(
        &self,
        chan: Channel,
        format: FrontEnd,
        data: &[u8],
        mode: StreamMode,
    ) -> Result<()> {
        self.check_chan(chan)?;
        if data.is_empty() {
            return Err(UsageError::ZeroSamples.into());
        }
        self.ops.repeat_tx_buf(chan, format, data, mode)
    }

    /// Start or stop repeat transmission
    pub fn repeat_tx_start(&self, chan: Channel, start: bool) -> Result<()> {
        self.check_chan(chan)?;
        self.ops.repeat_tx_start(chan, start)
    }

    // =========================================================================
    // Registers, Bus, Sensors, Parameters
    // =========================================================================

    /// Write one register
    pub fn reg_out(&self, reg: u32, value: u32) -> Result<()> {
        self.ops.reg_out(reg, value)
    }

    /// Read one register
    pub fn reg_in(&self, reg: u32) -> Result<u32> {
        self.ops.reg_in(reg)
    }

    /// Write consecutive registers in one transaction
    pub fn reg_out_n(&self, start: u32, values: &[u32]) -> Result<()> {
        self.ops.reg_out_n(start, values)
    }

    /// Read consecutive registers in one transaction
    pub fn reg_in_n(&self, start: u32, values: &mut [u32]) -> Result<()> {
        self.ops.reg_in_n(start, values)
    }

    /// Full-duplex SPI transfer on `bus`
    pub fn spi_bulk(&self, bus: u32, out: &[u32], input: &mut [u32]) -> Result<()> {
        self.ops.spi_bulk(bus, out, input)
    }

    /// Read a sensor through the transport
    pub fn get_sensor(&self, sensor: Sensor) -> Result<i32> {
        self.ops.get_sensor(sensor)
    }

    /// Read a sensor by number; unknown numbers never reach the transport
    pub fn get_sensor_raw(&self, sensor: u32) -> Result<i32> {
        self.get_sensor(Sensor::try_from(sensor)?)
    }

    /// Set a device parameter through the transport
    pub fn set_param(&self, param: Param, value: u32) -> Result<()> {
        self.ops.set_param(param, value)
    }

    /// Set a parameter by number; unknown numbers never reach the transport
    pub fn set_param_raw(&self, param: u32, value: u32) -> Result<()> {
        self.set_param(Param::try_from(param)?, value)
    }

    // =========================================================================
    // Board Controls
    // =========================================================================

    /// Control table for this device's revision
    pub fn control(&self) -> Result<&'static dyn ControlOps> {
        self.control
            .ok_or_else(|| ConfigError::NoControlOps.into())
    }

    /// Read a configuration word
    pub fn get_cfg(&self, param: CfgParam) -> Result<u32> {
        self.control()?.get_cfg(self.ops(), param)
    }

    /// Trim the reference oscillator
    pub fn set_osc_dac(&self, value: u32) -> Result<()> {
        self.control()?.set_osc_dac(self.ops(), value)
    }

    /// Measured reference frequency in Hz
    pub fn get_osc_freq(&self) -> Result<u32> {
        self.control()?.get_osc_freq(self.ops())
    }

    /// Write a TX PLL register
    pub fn set_tx_pll(&self, reg: u16, value: u16) -> Result<()> {
        self.control()?.set_tx_pll(self.ops(), reg, value)
    }

    /// TX PLL lock and readback
    pub fn tx_pll_status(&self) -> Result<PllStatus> {
        self.control()?.tx_pll_status(self.ops())
    }

    /// Enable front-end supplies
    pub fn set_frontend_power(&self, chip: u16, mask: u16) -> Result<()> {
        self.control()?.set_frontend_power(self.ops(), chip, mask)
    }

    /// Sensor value read directly from the sensor registers
    pub fn read_sensor_register(&self, sensor: Sensor) -> Result<i32> {
        self.control()?.get_sensor(self.ops(), sensor)
    }

    /// Route the antenna switches
    pub fn select_antenna(&self, rx: u8, tx: u8) -> Result<()> {
        self.control()?.select_antenna(self.ops(), rx, tx)
    }

    /// Schedule a register write at sample time `at`
    pub fn issue_timed_command(&self, at: Wts32, route: CommandRoute, data: u32) -> Result<()> {
        self.control()?.issue_timed_command(self.ops(), at, route, data)
    }

    /// Drain bytes from a board UART
    pub fn read_uart(&self, uart: u32, out: &mut [u8]) -> Result<usize> {
        self.control()?.read_uart(self.ops(), uart, out)
    }

    /// Read device RAM
    pub fn mem_read32(&self, addr: u32, out: &mut [u32]) -> Result<()> {
        self.control()?.mem_read32(self.ops(), addr, out)
    }

    /// Write device RAM
    pub fn mem_write32(&self, addr: u32, data: &[u32]) -> Result<()> {
        self.control()?.mem_write32(self.ops(), addr, data)
    }

    /// Write a parameter through its register rather than the transport
    pub fn set_param_register(&self, param: Param, value: u32) -> Result<()> {
        self.control()?.set_param(self.ops(), param, value)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("{}: error while closing: {e}", self.ops.id());
        }
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.ops.id())
            .field("proto", &self.ops.proto_id())
            .field("kind", &self.ops.device_kind())
            .field("rx", &lock(&self.rx).keys().collect::<Vec<_>>())
            .field("tx", &lock(&self.tx).keys().collect::<Vec<_>>())
            .finish()
    }
}
