//! Simulated device

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use super::SimConfig;
use super::backend::PROTO_ID;
use crate::driver::config::{Channel, FrontEnd, PoolGeometry, StartRequest, StreamMode};
use crate::driver::ops::{DeviceKind, DeviceOps, Param, Sensor};
use crate::driver::rx::{Completion, RxPort};
use crate::driver::tx::{TxPending, TxPort};
use crate::error::{ConfigError, IoError, Result, UsageError};
use crate::internal::control_regs::{
    ControlRegs, MEM_WINDOW_WORDS, REV4_REGS, REV5_REGS, UART_RX_VALID,
};
use crate::timestamp::{Wts32, WtsLong};

/// Buffer sizes requested by the caller are rounded up to this
const SIM_BUFFER_ALIGN: usize = 512;

/// IQ pair size until a start request selects a format
const SIM_DEFAULT_IQ_BYTES: usize = 4;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SimRx {
    port: Option<RxPort>,
    /// Timestamp of the next sample the simulated ADC produces
    next_wts: WtsLong,
    buffer_size: usize,
    iq_bytes: usize,
}

impl SimRx {
    fn samples_per_buffer(&self) -> u32 {
        (self.buffer_size / self.iq_bytes) as u32
    }
}

struct SimRepeat {
    data: Vec<u8>,
    running: bool,
}

/// Software model of a board behind a transport
pub struct SimDevice {
    id: String,
    config: SimConfig,
    disconnected: AtomicBool,
    transactions: AtomicU64,
    /// Hardware sample clock, also the TX output position
    clock: AtomicU64,
    tx_slack: AtomicU32,
    regs: Mutex<BTreeMap<u32, u32>>,
    /// Register map of the simulated revision, for the RAM window
    map: ControlRegs,
    /// Device RAM behind the window, by byte address
    ram: Mutex<BTreeMap<u32, u32>>,
    uart: Mutex<BTreeMap<u32, VecDeque<u8>>>,
    sensors: Mutex<Vec<i32>>,
    params: Mutex<BTreeMap<u32, u32>>,
    rx: Mutex<BTreeMap<Channel, SimRx>>,
    tx: Mutex<BTreeMap<Channel, TxPort>>,
    repeat: Mutex<BTreeMap<Channel, SimRepeat>>,
    last_start: Mutex<Option<(Channel, StartRequest)>>,
}

impl SimDevice {
    /// Simulated device named `sim0`
    pub fn new(config: SimConfig) -> Self {
        Self::with_id("sim0", config)
    }

    /// Simulated device with an explicit name
    pub fn with_id(id: &str, config: SimConfig) -> Self {
        let mut sensors = vec![0; Sensor::ALL.len()];
        sensors[Sensor::RefClockHz.raw() as usize] = config.ref_clock_hz as i32;
        sensors[Sensor::PllLocked.raw() as usize] = 1;
        sensors[Sensor::BoardTemperature.raw() as usize] = 35 * 256;
        let map = match config.kind {
            DeviceKind::Rev4 => REV4_REGS,
            DeviceKind::Rev5 => REV5_REGS,
        };

        Self {
            id: id.to_owned(),
            tx_slack: AtomicU32::new(config.tx_geometry.late_slack),
            config,
            disconnected: AtomicBool::new(false),
            transactions: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            regs: Mutex::new(BTreeMap::new()),
            map,
            ram: Mutex::new(BTreeMap::new()),
            uart: Mutex::new(BTreeMap::new()),
            sensors: Mutex::new(sensors),
            params: Mutex::new(BTreeMap::new()),
            rx: Mutex::new(BTreeMap::new()),
            tx: Mutex::new(BTreeMap::new()),
            repeat: Mutex::new(BTreeMap::new()),
            last_start: Mutex::new(None),
        }
    }

    fn check_link(&self) -> Result<()> {
        if self.disconnected.load(Ordering::Acquire) {
            Err(IoError::Disconnected.into())
        } else {
            Ok(())
        }
    }

    fn check_chan(&self, chan: Channel) -> Result<()> {
        self.check_link()?;
        if chan.0 < self.config.channels {
            Ok(())
        } else {
            Err(UsageError::ChannelOutOfRange.into())
        }
    }

    fn transaction(&self) -> Result<()> {
        self.check_link()?;
        self.transactions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rx_port(&self, chan: Channel) -> Result<RxPort> {
        lock(&self.rx)
            .get(&chan)
            .and_then(|rx| rx.port.clone())
            .ok_or_else(|| UsageError::NotInitialized.into())
    }

    /// RAM byte address behind `reg` if it is inside the window
    fn ram_addr(&self, regs: &BTreeMap<u32, u32>, reg: u32) -> Option<u32> {
        let offset = reg.checked_sub(self.map.mem_window)?;
        if offset as usize >= MEM_WINDOW_WORDS {
            return None;
        }
        let latch = regs.get(&self.map.mem_addr).copied().unwrap_or(0);
        Some(latch.wrapping_add(offset * 4))
    }

    fn read_reg(&self, regs: &BTreeMap<u32, u32>, reg: u32) -> u32 {
        if let Some(addr) = self.ram_addr(regs, reg) {
            return lock(&self.ram).get(&addr).copied().unwrap_or(0);
        }
        if let Some(fifo) = lock(&self.uart).get_mut(&reg) {
            return fifo.pop_front().map_or(0, |b| UART_RX_VALID | u32::from(b));
        }
        regs.get(&reg).copied().unwrap_or(0)
    }

    fn write_reg(&self, regs: &mut BTreeMap<u32, u32>, reg: u32, value: u32) {
        match self.ram_addr(regs, reg) {
            Some(addr) => {
                lock(&self.ram).insert(addr, value);
            }
            None => {
                regs.insert(reg, value);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Hardware model controls
    // -------------------------------------------------------------------------

    /// Register transactions performed so far; a burst counts once
    pub fn transactions(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    /// Register value without counting a transaction
    pub fn peek_reg(&self, reg: u32) -> u32 {
        lock(&self.regs).get(&reg).copied().unwrap_or(0)
    }

    /// Set a register without counting a transaction
    pub fn poke_reg(&self, reg: u32, value: u32) {
        lock(&self.regs).insert(reg, value);
    }

    /// Queue bytes on the UART FIFO read through `reg`
    pub fn push_uart(&self, reg: u32, bytes: &[u8]) {
        lock(&self.uart).entry(reg).or_default().extend(bytes);
    }

    /// Set the value returned for `sensor`
    pub fn set_sensor(&self, sensor: Sensor, value: i32) {
        lock(&self.sensors)[sensor.raw() as usize] = value;
    }

    /// Last value written to `param`
    pub fn param(&self, param: Param) -> Option<u32> {
        lock(&self.params).get(&param.raw()).copied()
    }

    /// Current hardware sample clock
    pub fn clock(&self) -> WtsLong {
        WtsLong(self.clock.load(Ordering::Acquire))
    }

    /// Move the hardware sample clock to `at`
    pub fn set_clock(&self, at: WtsLong) {
        self.clock.store(at.raw(), Ordering::Release);
    }

    /// The most recent start request and its channel
    pub fn last_start(&self) -> Option<(Channel, StartRequest)> {
        *lock(&self.last_start)
    }

    /// Loaded repeat buffer length and whether it is transmitting
    pub fn repeat_state(&self, chan: Channel) -> Option<(usize, bool)> {
        lock(&self.repeat).get(&chan).map(|r| (r.data.len(), r.running))
    }

    /// Make every following transport call fail with
    /// `IoError::Disconnected`
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::Release);
    }

    /// Capture `buffers` consecutive RX buffers.
    ///
    /// Each buffer is filled with a byte ramp seeded by its start timestamp.
    /// When the pool has no free buffer the samples are lost, as on real
    /// hardware; the channel records the overrun. Returns how many buffers
    /// were completed.
    pub fn produce_rx(&self, chan: Channel, buffers: usize) -> Result<usize> {
        let port = self.rx_port(chan)?;
        let mut produced = 0;
        for _ in 0..buffers {
            let (wts, samples, bytes) = {
                let mut rx = lock(&self.rx);
                let entry = rx.get_mut(&chan).ok_or(UsageError::NotInitialized)?;
                let samples = entry.samples_per_buffer();
                let wts = entry.next_wts;
                entry.next_wts = wts.wrapping_add(u64::from(samples));
                (wts, samples, samples as usize * entry.iq_bytes)
            };
            let end = wts.wrapping_add(u64::from(samples));
            self.clock.fetch_max(end.raw(), Ordering::AcqRel);

            match port.acquire() {
                Ok(index) => {
                    port.fill(index, |buf| {
                        for (i, byte) in buf.iter_mut().enumerate() {
                            *byte = wts.raw().wrapping_add(i as u64) as u8;
                        }
                    })?;
                    port.complete(index, Completion::new(wts, samples).with_bytes(bytes))?;
                    produced += 1;
                }
                Err(e) if e.is_backpressure() => {
                    trace!("sim {chan}: {samples} samples at {wts} lost, no buffer");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(produced)
    }

    /// Lose `buffers` buffers' worth of samples without completing anything
    pub fn drop_rx(&self, chan: Channel, buffers: usize) -> Result<()> {
        let mut rx = lock(&self.rx);
        let entry = rx.get_mut(&chan).ok_or(UsageError::NotInitialized)?;
        let lost = u64::from(entry.samples_per_buffer()) * buffers as u64;
        entry.next_wts = entry.next_wts.wrapping_add(lost);
        debug!("sim {chan}: dropped {lost} samples");
        Ok(())
    }

    /// Complete one RX buffer with an explicit start stamp
    pub fn complete_rx_at(&self, chan: Channel, wts: WtsLong, samples: u32) -> Result<()> {
        let port = self.rx_port(chan)?;
        let index = port.acquire()?;
        port.complete(index, Completion::new(wts, samples))
    }

    /// Complete one RX buffer with a raw 32-bit hardware stamp
    pub fn complete_rx_raw(&self, chan: Channel, wts: Wts32, samples: u32) -> Result<()> {
        let port = self.rx_port(chan)?;
        let index = port.acquire()?;
        port.complete_raw(index, wts, samples, false)
    }

    /// Transmit every posted TX buffer; returns them in transmit order
    pub fn drain_tx(&self, chan: Channel) -> Result<Vec<(TxPending, Vec<u8>)>> {
        let port = lock(&self.tx)
            .get(&chan)
            .cloned()
            .ok_or(UsageError::NotInitialized)?;
        let mut sent = Vec::new();
        port.drain(|pending, data| {
            self.clock.fetch_max(
                pending.wts.wrapping_add(u64::from(pending.samples)).raw(),
                Ordering::AcqRel,
            );
            sent.push((*pending, data.to_vec()));
        })?;
        Ok(sent)
    }
}

impl DeviceOps for SimDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn proto_id(&self) -> &'static str {
        PROTO_ID
    }

    fn device_kind(&self) -> DeviceKind {
        self.config.kind
    }

    fn channel_count(&self) -> u8 {
        self.config.channels
    }

    fn close(&self) -> Result<()> {
        debug!("sim '{}': closed", self.id);
        Ok(())
    }

    fn reg_out(&self, reg: u32, value: u32) -> Result<()> {
        self.transaction()?;
        let mut regs = lock(&self.regs);
        self.write_reg(&mut regs, reg, value);
        Ok(())
    }

    fn reg_in(&self, reg: u32) -> Result<u32> {
        self.transaction()?;
        let regs = lock(&self.regs);
        Ok(self.read_reg(&regs, reg))
    }

    fn reg_out_n(&self, start: u32, values: &[u32]) -> Result<()> {
        self.transaction()?;
        let mut regs = lock(&self.regs);
        for (reg, &value) in (start..).zip(values) {
            self.write_reg(&mut regs, reg, value);
        }
        Ok(())
    }

    fn reg_in_n(&self, start: u32, values: &mut [u32]) -> Result<()> {
        self.transaction()?;
        let regs = lock(&self.regs);
        for (reg, value) in (start..).zip(values.iter_mut()) {
            *value = self.read_reg(&regs, reg);
        }
        Ok(())
    }

    fn spi_bulk(&self, bus: u32, out: &[u32], input: &mut [u32]) -> Result<()> {
        self.transaction()?;
        trace!("sim spi{bus}: {} words", out.len());
        // Loopback: the simulated chip echoes what it receives
        let n = out.len().min(input.len());
        input[..n].copy_from_slice(&out[..n]);
        Ok(())
    }

    fn rx_dma_init(&self, chan: Channel, size_hint: usize) -> Result<PoolGeometry> {
        self.check_chan(chan)?;
        let mut geometry = self.config.rx_geometry;
        if size_hint > 0 {
            geometry.buffer_size = aligned_size(size_hint)?;
        }
        lock(&self.rx).insert(
            chan,
            SimRx {
                port: None,
                next_wts: WtsLong::ZERO,
                buffer_size: geometry.buffer_size,
                iq_bytes: SIM_DEFAULT_IQ_BYTES,
            },
        );
        Ok(geometry)
    }

    fn rx_dma_attach(&self, chan: Channel, port: RxPort) -> Result<()> {
        let mut rx = lock(&self.rx);
        let entry = rx.get_mut(&chan).ok_or(UsageError::NotInitialized)?;
        entry.port = Some(port);
        Ok(())
    }

    fn rx_dma_deinit(&self, chan: Channel) -> Result<()> {
        self.check_chan(chan)?;
        lock(&self.rx).remove(&chan);
        Ok(())
    }

    fn rx_dma_resume_at(&self, chan: Channel, next: WtsLong) -> Result<()> {
        self.check_link()?;
        let mut rx = lock(&self.rx);
        let entry = rx.get_mut(&chan).ok_or(UsageError::NotInitialized)?;
        // Capture cannot move back in time
        if next.is_after(entry.next_wts) {
            entry.next_wts = next;
        }
        Ok(())
    }

    fn tx_dma_init(&self, chan: Channel, buffer_size: usize) -> Result<PoolGeometry> {
        self.check_chan(chan)?;
        let mut geometry = self
            .config
            .tx_geometry
            .with_late_slack(self.tx_slack.load(Ordering::Relaxed));
        if buffer_size > 0 {
            geometry.buffer_size = aligned_size(buffer_size)?;
        }
        Ok(geometry)
    }

    fn tx_dma_attach(&self, chan: Channel, port: TxPort) -> Result<()> {
        self.check_chan(chan)?;
        lock(&self.tx).insert(chan, port);
        Ok(())
    }

    fn tx_dma_deinit(&self, chan: Channel) -> Result<()> {
        self.check_chan(chan)?;
        lock(&self.tx).remove(&chan);
        Ok(())
    }

    fn tx_position(&self, chan: Channel) -> Result<WtsLong> {
        self.check_chan(chan)?;
        Ok(self.clock())
    }

    fn dma_start(&self, chan: Channel, request: &StartRequest) -> Result<()> {
        self.check_chan(chan)?;
        if let Some(iq_bytes) = request.rx_format.iq_bytes() {
            let mut rx = lock(&self.rx);
            let entry = rx.get_mut(&chan).ok_or(UsageError::NotInitialized)?;
            entry.next_wts = request.rx_start;
            entry.iq_bytes = iq_bytes;
        }
        *lock(&self.last_start) = Some((chan, *request));
        Ok(())
    }

    fn repeat_tx_buf(
        &self,
        chan: Channel,
        format: FrontEnd,
        data: &[u8],
        _mode: StreamMode,
    ) -> Result<()> {
        self.check_chan(chan)?;
        if !format.is_format() {
            return Err(UsageError::UnknownParam.into());
        }
        lock(&self.repeat).insert(
            chan,
            SimRepeat {
                data: data.to_vec(),
                running: false,
            },
        );
        Ok(())
    }

    fn repeat_tx_start(&self, chan: Channel, start: bool) -> Result<()> {
        self.check_chan(chan)?;
        let mut repeat = lock(&self.repeat);
        match repeat.get_mut(&chan) {
            Some(entry) => {
                entry.running = start;
                Ok(())
            }
            None if !start => Ok(()),
            None => Err(UsageError::NotInitialized.into()),
        }
    }

    fn get_sensor(&self, sensor: Sensor) -> Result<i32> {
        self.check_link()?;
        Ok(lock(&self.sensors)[sensor.raw() as usize])
    }

    fn set_param(&self, param: Param, value: u32) -> Result<()> {
        self.check_link()?;
        if param == Param::TxLateSlack {
            self.tx_slack.store(value, Ordering::Relaxed);
        }
        lock(&self.params).insert(param.raw(), value);
        Ok(())
    }
}

fn aligned_size(requested: usize) -> Result<usize> {
    requested
        .checked_next_multiple_of(SIM_BUFFER_ALIGN)
        .ok_or_else(|| ConfigError::InvalidGeometry.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn burst_counts_as_one_transaction() {
        let sim = SimDevice::new(SimConfig::default());
        sim.reg_out_n(0x10, &[1, 2, 3]).unwrap();
        assert_eq!(sim.transactions(), 1);
        let mut back = [0u32; 3];
        sim.reg_in_n(0x10, &mut back).unwrap();
        assert_eq!(back, [1, 2, 3]);
        assert_eq!(sim.transactions(), 2);
    }

    #[test]
    fn uart_fifo_pops_with_valid_bit() {
        let sim = SimDevice::new(SimConfig::default());
        sim.push_uart(0x40, b"a");
        assert_eq!(sim.reg_in(0x40).unwrap(), UART_RX_VALID | u32::from(b'a'));
        assert_eq!(sim.reg_in(0x40).unwrap(), 0);
    }

    #[test]
    fn ram_window_follows_address_latch() {
        let sim = SimDevice::new(SimConfig::default().with_kind(DeviceKind::Rev4));
        sim.reg_out(REV4_REGS.mem_addr, 0x2000).unwrap();
        sim.reg_out_n(REV4_REGS.mem_window, &[7, 8]).unwrap();
        sim.reg_out(REV4_REGS.mem_addr, 0x2004).unwrap();
        assert_eq!(sim.reg_in(REV4_REGS.mem_window).unwrap(), 8);
        assert_eq!(sim.peek_reg(REV4_REGS.mem_window), 0);
    }

    #[test]
    fn init_rounds_buffer_size_up() {
        let sim = SimDevice::new(SimConfig::default());
        let geometry = sim.rx_dma_init(Channel(0), 1000).unwrap();
        assert_eq!(geometry.buffer_size, 1024);
        assert_eq!(sim.rx_dma_init(Channel(0), 0).unwrap().buffer_size, 4096);
    }

    #[test]
    fn out_of_range_channel() {
        let sim = SimDevice::new(SimConfig::default());
        assert_eq!(
            sim.rx_dma_init(Channel(1), 0).unwrap_err(),
            Error::Usage(UsageError::ChannelOutOfRange)
        );
    }

    #[test]
    fn spi_loops_back() {
        let sim = SimDevice::new(SimConfig::default());
        let mut input = [0u32; 2];
        sim.spi_bulk(0, &[7, 8], &mut input).unwrap();
        assert_eq!(input, [7, 8]);
    }

    #[test]
    fn disconnect_fails_every_call() {
        let sim = SimDevice::new(SimConfig::default());
        sim.disconnect();
        assert_eq!(sim.reg_in(0).unwrap_err(), Error::Io(IoError::Disconnected));
        assert_eq!(
            sim.get_sensor(Sensor::PllLocked).unwrap_err(),
            Error::Io(IoError::Disconnected)
        );
    }

    #[test]
    fn late_slack_param_applies_to_next_tx_init() {
        let sim = SimDevice::new(SimConfig::default());
        sim.set_param(Param::TxLateSlack, 5).unwrap();
        assert_eq!(sim.tx_dma_init(Channel(0), 0).unwrap().late_slack, 5);
        assert_eq!(sim.param(Param::TxLateSlack), Some(5));
    }

    #[test]
    fn repeat_requires_loaded_buffer() {
        let sim = SimDevice::new(SimConfig::default());
        assert!(sim.repeat_tx_start(Channel(0), true).is_err());
        sim.repeat_tx_buf(Channel(0), FrontEnd::I16, &[0; 16], StreamMode::new())
            .unwrap();
        sim.repeat_tx_start(Channel(0), true).unwrap();
        assert_eq!(sim.repeat_state(Channel(0)), Some((16, true)));
    }
}
