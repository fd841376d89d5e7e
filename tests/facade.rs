//! Backend registry, device facade and board controls
//!
//! | Test ID | Name | Description |
//! |---------|------|-------------|
//! | IT-2-001 | Open by protocol | Built-in registry opens the simulator |
//! | IT-2-002 | Discovery | Every compatible backend is enumerated |
//! | IT-2-003 | Unknown protocol | Open fails with `UnknownBackend` |
//! | IT-2-004 | ABI refusal | Refused ABI fails with `IncompatibleAbi` |
//! | IT-2-005 | ABI rule | Same major, requested minor not newer |
//! | IT-2-006 | Unknown numbers | Raw sensor/param numbers are validated |
//! | IT-2-007 | Timed command | Time, route and data in one transaction |
//! | IT-2-008 | RAM window | Multi-window RAM transfer round trip |
//! | IT-2-009 | Decorator | Streaming through `LoggingOps`, origin lookup |
//! | IT-2-010 | Transport failure | I/O errors propagate, TX buffer is returned |
//! | IT-2-011 | Repeat TX | Repeat buffer load and start |
//! | IT-2-012 | Late slack | `TxLateSlack` parameter moves the late threshold |

use std::sync::Arc;

use sdrll::constants::ABI_VERSION;
use sdrll::sim::{OPEN_REV5, SimConfig, SimDevice};
use sdrll::{
    Backend, BackendRegistry, Channel, CommandRoute, ConfigError, Device, DeviceKind, DeviceOps,
    Error, FrontEnd, IoError, LoggingOps, OpenFlags, Param, Sensor, StartRequest, StreamMode,
    UsageError, WaitMode, Wts32, WtsLong, abi_compatible, origin,
};

const CH: Channel = Channel(0);

fn refuses_everything(_abi_version: u32) -> Option<&'static dyn Backend> {
    None
}

// =============================================================================
// Backends
// =============================================================================

/// IT-2-001
#[test]
fn open_by_protocol() {
    let device = Device::open("sim", "", OpenFlags::NONE).unwrap();
    assert_eq!(device.id(), "sim0");
    assert_eq!(device.device_kind(), DeviceKind::Rev4);

    let rev5 = Device::open("sim", "bench", OPEN_REV5).unwrap();
    assert_eq!(rev5.id(), "bench");
    assert_eq!(rev5.device_kind(), DeviceKind::Rev5);
    rev5.close().unwrap();
}

/// IT-2-002
#[test]
fn discovery_lists_simulator() {
    let found = BackendRegistry::builtin().discover_all();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].unique_name, "sim0");
    assert_eq!(found[0].proto, "sim");
}

/// IT-2-003
#[test]
fn unknown_protocol_is_config_error() {
    assert_eq!(
        Device::open("usb", "", OpenFlags::NONE).unwrap_err(),
        Error::Config(ConfigError::UnknownBackend)
    );
}

/// IT-2-004
#[test]
fn refused_abi_is_config_error() {
    let mut registry = BackendRegistry::builtin();
    registry.register("legacy", refuses_everything).unwrap();
    assert_eq!(
        registry.register("legacy", refuses_everything).unwrap_err(),
        ConfigError::DuplicateBackend
    );
    assert_eq!(
        Device::open_with(&registry, "legacy", "", OpenFlags::NONE).unwrap_err(),
        Error::Config(ConfigError::IncompatibleAbi)
    );

    // Refusing backends are skipped by discovery
    assert_eq!(registry.discover_all().len(), 1);
    assert_eq!(registry.protocols().collect::<Vec<_>>(), ["legacy", "sim"]);
}

/// IT-2-005
#[test]
fn abi_major_must_match_and_minor_not_newer() {
    assert!(abi_compatible(ABI_VERSION, ABI_VERSION));
    assert!(abi_compatible(ABI_VERSION + 1, ABI_VERSION));
    assert!(!abi_compatible(ABI_VERSION, ABI_VERSION + 1));
    assert!(!abi_compatible(ABI_VERSION + 0x0100_0000, ABI_VERSION));

    let registry = BackendRegistry::builtin();
    assert!(registry.resolve_with_abi("sim", ABI_VERSION).is_some());
    assert!(registry.resolve_with_abi("sim", ABI_VERSION + 1).is_none());
    assert!(registry.resolve_with_abi("sim", 0x0200_0000).is_none());
}

// =============================================================================
// Facade Values
// =============================================================================

/// IT-2-006
#[test]
fn unknown_sensor_and_param_numbers_are_rejected() {
    let sim = Arc::new(SimDevice::new(SimConfig::default()));
    let device = Device::from_ops(sim.clone());

    assert_eq!(
        device.get_sensor_raw(99).unwrap_err(),
        Error::Usage(UsageError::UnknownSensor)
    );
    assert_eq!(
        device.set_param_raw(99, 1).unwrap_err(),
        Error::Usage(UsageError::UnknownParam)
    );

    assert_eq!(
        device.get_sensor_raw(Sensor::RefClockHz.raw()).unwrap(),
        26_000_000
    );
    device.set_param_raw(Param::Loopback.raw(), 1).unwrap();
    assert_eq!(sim.param(Param::Loopback), Some(1));
}

#[test]
fn channel_checks() {
    let device = Device::open("sim", "", OpenFlags::NONE).unwrap();
    assert_eq!(
        device.rx_init(Channel(3), 0).unwrap_err(),
        Error::Usage(UsageError::ChannelOutOfRange)
    );
    assert_eq!(
        device.rx_get_next(CH, WaitMode::Poll).unwrap_err(),
        Error::Usage(UsageError::NotInitialized)
    );

    device.rx_init(CH, 0).unwrap();
    assert_eq!(
        device.rx_init(CH, 0).unwrap_err(),
        Error::Config(ConfigError::AlreadyInitialized)
    );
}

#[test]
fn oversized_hint_is_invalid_geometry() {
    let device = Device::open("sim", "", OpenFlags::NONE).unwrap();
    assert_eq!(
        device.rx_init(CH, usize::MAX).unwrap_err(),
        Error::Config(ConfigError::InvalidGeometry)
    );
    assert_eq!(
        device.tx_init(CH, usize::MAX).unwrap_err(),
        Error::Config(ConfigError::InvalidGeometry)
    );

    // Nothing was left half-initialized
    device.rx_init(CH, 0).unwrap();
    device.tx_init(CH, 0).unwrap();
}

// =============================================================================
// Board Controls
// =============================================================================

/// IT-2-007
#[test]
fn timed_command_is_one_transaction() {
    let sim = Arc::new(SimDevice::new(SimConfig::default()));
    let device = Device::from_ops(sim.clone());

    let before = sim.transactions();
    device
        .issue_timed_command(Wts32(123_456), CommandRoute::RxFrontEnd, 0x55)
        .unwrap();
    assert_eq!(sim.transactions(), before + 1);
}

/// IT-2-008
#[test]
fn ram_round_trip_across_windows() {
    for kind in [DeviceKind::Rev4, DeviceKind::Rev5] {
        let sim = Arc::new(SimDevice::new(SimConfig::default().with_kind(kind)));
        let device = Device::from_ops(sim);

        let words: Vec<u32> = (0..200u32).map(|i| i.wrapping_mul(0x9E37_79B9)).collect();
        device.mem_write32(0x8000, &words).unwrap();
        let mut back = vec![0u32; words.len()];
        device.mem_read32(0x8000, &mut back).unwrap();
        assert_eq!(back, words, "{kind:?}");
    }
}

#[test]
fn antenna_power_and_osc_controls() {
    let sim = Arc::new(SimDevice::new(SimConfig::default()));
    let device = Device::from_ops(sim.clone());

    device.select_antenna(1, 2).unwrap();
    device.set_frontend_power(0, 0x3).unwrap();
    device.set_osc_dac(2048).unwrap();
    device.set_param_register(Param::PowerSaving, 1).unwrap();
    assert_eq!(sim.transactions(), 4);

    assert_eq!(device.get_osc_freq().unwrap(), 0);
    assert!(!device.tx_pll_status().unwrap().locked);
}

#[test]
fn pll_write_times_out_when_never_ready() {
    let device = Device::open("sim", "", OpenFlags::NONE).unwrap();
    assert_eq!(
        device.set_tx_pll(0x10, 0x1).unwrap_err(),
        Error::Io(IoError::Timeout)
    );
}

#[test]
fn uart_index_is_bounded_per_revision() {
    let rev4 = Device::open("sim", "", OpenFlags::NONE).unwrap();
    let rev5 = Device::open("sim", "", OPEN_REV5).unwrap();
    let mut buf = [0u8; 4];

    assert_eq!(
        rev4.read_uart(1, &mut buf).unwrap_err(),
        Error::Usage(UsageError::UnknownParam)
    );
    assert_eq!(rev5.read_uart(1, &mut buf).unwrap(), 0);
}

// =============================================================================
// Decorators and Failures
// =============================================================================

/// IT-2-009
#[test]
fn streaming_through_logging_decorator() {
    let sim = Arc::new(SimDevice::with_id("inner", SimConfig::default()));
    let inner: Arc<dyn DeviceOps> = sim.clone();
    let device = Device::from_ops(Arc::new(LoggingOps::new(inner)));

    assert!(device.ops().inner().is_some());
    assert_eq!(origin(device.ops()).id(), "inner");

    device.rx_init(CH, 0).unwrap();
    device
        .dma_start(
            CH,
            StartRequest::new().with_rx(FrontEnd::I16, StreamMode::new(), WtsLong::new(64)),
        )
        .unwrap();
    sim.produce_rx(CH, 1).unwrap();
    let block = device.rx_get_next(CH, WaitMode::Poll).unwrap();
    assert_eq!(block.wts(), WtsLong::new(64));
    device.rx_release(block).unwrap();

    let (chan, request) = sim.last_start().unwrap();
    assert_eq!(chan, CH);
    assert!(request.starts_rx());
}

/// IT-2-010
#[test]
fn transport_failure_propagates_and_returns_buffer() {
    let sim = Arc::new(SimDevice::new(SimConfig::default()));
    let device = Device::from_ops(sim.clone());
    device.tx_init(CH, 0).unwrap();
    let block = device.tx_get_free(CH, WaitMode::Poll).unwrap();

    sim.disconnect();
    assert_eq!(
        device.tx_post(block, WtsLong::new(100), 16).unwrap_err(),
        Error::Io(IoError::Disconnected)
    );
    assert_eq!(device.tx_stats(CH).unwrap().pool.ready, 0);
    assert_eq!(device.reg_in(0).unwrap_err(), Error::Io(IoError::Disconnected));
}

/// IT-2-011
#[test]
fn repeat_buffer_load_and_start() {
    let sim = Arc::new(SimDevice::new(SimConfig::default()));
    let device = Device::from_ops(sim.clone());

    assert_eq!(
        device
            .repeat_tx_buf(CH, FrontEnd::I16, &[], StreamMode::new())
            .unwrap_err(),
        Error::Usage(UsageError::ZeroSamples)
    );

    device
        .repeat_tx_buf(CH, FrontEnd::I16, &[0u8; 256], StreamMode::new().with_siso(true))
        .unwrap();
    assert_eq!(sim.repeat_state(CH), Some((256, false)));
    device.repeat_tx_start(CH, true).unwrap();
    assert_eq!(sim.repeat_state(CH), Some((256, true)));
}

/// IT-2-012
#[test]
fn late_slack_parameter_moves_threshold() {
    let sim = Arc::new(SimDevice::new(SimConfig::default()));
    let device = Device::from_ops(sim.clone());
    device.set_param(Param::TxLateSlack, 5000).unwrap();
    device.tx_init(CH, 0).unwrap();

    sim.set_clock(WtsLong::new(3000));
    let block = device.tx_get_free(CH, WaitMode::Poll).unwrap();
    device.tx_post(block, WtsLong::new(1000), 16).unwrap();

    let next = device.tx_get_free(CH, WaitMode::Poll).unwrap();
    assert_eq!(next.lateness(), 0);
    assert_eq!(device.tx_stats(CH).unwrap().late_posts, 0);
}
