//! Logging decorator for [`DeviceOps`]
//!
//! [`LoggingOps`] forwards every call to the implementation it wraps and
//! traces the call and its outcome. It is the reference for writing other
//! decorators: own the inner value, delegate, and return it from
//! [`DeviceOps::inner`].

use std::sync::Arc;

use log::{trace, warn};

use crate::driver::config::{Channel, FrontEnd, PoolGeometry, StartRequest, StreamMode};
use crate::driver::ops::{DeviceKind, DeviceOps, Param, Sensor};
use crate::driver::rx::RxPort;
use crate::driver::tx::TxPort;
use crate::error::Result;
use crate::timestamp::WtsLong;

/// Traces every facade call of the wrapped device
pub struct LoggingOps {
    inner: Arc<dyn DeviceOps>,
}

impl LoggingOps {
    /// Wrap `inner`
    pub fn new(inner: Arc<dyn DeviceOps>) -> Self {
        Self { inner }
    }

    /// Log a failed call; the result passes through unchanged
    fn traced<T>(&self, call: &str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => trace!("{}: {call} ok", self.inner.id()),
            Err(e) => warn!("{}: {call} failed: {e}", self.inner.id()),
        }
        result
    }
}

impl DeviceOps for LoggingOps {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn proto_id(&self) -> &'static str {
        self.inner.proto_id()
    }

    fn device_kind(&self) -> DeviceKind {
        self.inner.device_kind()
    }

    fn channel_count(&self) -> u8 {
        self.inner.channel_count()
    }

    fn inner(&self) -> Option<&dyn DeviceOps> {
        Some(&*self.inner)
    }

    fn close(&self) -> Result<()> {
        self.traced("close", self.inner.close())
    }

    fn reg_out(&self, reg: u32, value: u32) -> Result<()> {
        trace!("reg_out {reg:#06x} <- {value:#010x}");
        self.traced("reg_out", self.inner.reg_out(reg, value))
    }

    fn reg_in(&self, reg: u32) -> Result<u32> {
        let result = self.traced("reg_in", self.inner.reg_in(reg));
        if let Ok(value) = &result {
            trace!("reg_in {reg:#06x} -> {value:#010x}");
        }
        result
    }

    fn reg_out_n(&self, start: u32, values: &[u32]) -> Result<()> {
        trace!("reg_out_n {start:#06x} x{}", values.len());
        self.traced("reg_out_n", self.inner.reg_out_n(start, values))
    }

    fn reg_in_n(&self, start: u32, values: &mut [u32]) -> Result<()> {
        trace!("reg_in_n {start:#06x} x{}", values.len());
        self.traced("reg_in_n", self.inner.reg_in_n(start, values))
    }

    fn spi_bulk(&self, bus: u32, out: &[u32], input: &mut [u32]) -> Result<()> {
        trace!("spi_bulk bus {bus} out {} in {}", out.len(), input.len());
        self.traced("spi_bulk", self.inner.spi_bulk(bus, out, input))
    }

    fn rx_dma_init(&self, chan: Channel, size_hint: usize) -> Result<PoolGeometry> {
        trace!("rx_dma_init {chan} hint {size_hint}");
        self.traced("rx_dma_init", self.inner.rx_dma_init(chan, size_hint))
    }

    fn rx_dma_attach(&self, chan: Channel, port: RxPort) -> Result<()> {
        self.traced("rx_dma_attach", self.inner.rx_dma_attach(chan, port))
    }

    fn rx_dma_deinit(&self, chan: Channel) -> Result<()> {
        trace!("rx_dma_deinit {chan}");
        self.traced("rx_dma_deinit", self.inner.rx_dma_deinit(chan))
    }

    fn rx_dma_resume_at(&self, chan: Channel, next: WtsLong) -> Result<()> {
        trace!("rx_dma_resume_at {chan} {next}");
        self.traced("rx_dma_resume_at", self.inner.rx_dma_resume_at(chan, next))
    }

    fn rx_poll_demand(&self, chan: Channel) {
        self.inner.rx_poll_demand(chan);
    }

    fn tx_dma_init(&self, chan: Channel, buffer_size: usize) -> Result<PoolGeometry> {
        trace!("tx_dma_init {chan} size {buffer_size}");
        self.traced("tx_dma_init", self.inner.tx_dma_init(chan, buffer_size))
    }

    fn tx_dma_attach(&self, chan: Channel, port: TxPort) -> Result<()> {
        self.traced("tx_dma_attach", self.inner.tx_dma_attach(chan, port))
    }

    fn tx_dma_deinit(&self, chan: Channel) -> Result<()> {
        trace!("tx_dma_deinit {chan}");
        self.traced("tx_dma_deinit", self.inner.tx_dma_deinit(chan))
    }

    fn tx_position(&self, chan: Channel) -> Result<WtsLong> {
        self.traced("tx_position", self.inner.tx_position(chan))
    }

    fn tx_poll_demand(&self, chan: Channel) {
        self.inner.tx_poll_demand(chan);
    }

    fn dma_start(&self, chan: Channel, request: &StartRequest) -> Result<()> {
        trace!("dma_start {chan} {request:?}");
        self.traced("dma_start", self.inner.dma_start(chan, request))
    }

    fn repeat_tx_buf(
        &self,
        chan: Channel,
        format: FrontEnd,
        data: &[u8],
        mode: StreamMode,
    ) -> Result<()> {
        trace!("repeat_tx_buf {chan} {format:?} {} bytes", data.len());
        self.traced(
            "repeat_tx_buf",
            self.inner.repeat_tx_buf(chan, format, data, mode),
        )
    }

    fn repeat_tx_start(&self, chan: Channel, start: bool) -> Result<()> {
        trace!("repeat_tx_start {chan} {start}");
        self.traced("repeat_tx_start", self.inner.repeat_tx_start(chan, start))
    }

    fn get_sensor(&self, sensor: Sensor) -> Result<i32> {
        trace!("get_sensor {sensor:?}");
        self.traced("get_sensor", self.inner.get_sensor(sensor))
    }

    fn set_param(&self, param: Param, value: u32) -> Result<()> {
        trace!("set_param {param:?} = {value}");
        self.traced("set_param", self.inner.set_param(param, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ops::origin;
    use crate::sim::{SimConfig, SimDevice};

    #[test]
    fn delegates_and_exposes_inner() {
        let sim: Arc<dyn DeviceOps> = Arc::new(SimDevice::with_id("bench", SimConfig::default()));
        let proxy = LoggingOps::new(Arc::clone(&sim));

        proxy.reg_out(0x10, 42).unwrap();
        assert_eq!(sim.reg_in(0x10).unwrap(), 42);
        assert_eq!(proxy.id(), "bench");
        assert!(proxy.inner().is_some());
    }

    #[test]
    fn origin_walks_nested_proxies() {
        let sim: Arc<dyn DeviceOps> = Arc::new(SimDevice::with_id("root", SimConfig::default()));
        let once: Arc<dyn DeviceOps> = Arc::new(LoggingOps::new(sim));
        let twice = LoggingOps::new(once);

        let root = origin(&twice);
        assert!(root.inner().is_none());
        assert_eq!(root.id(), "root");
    }
}
