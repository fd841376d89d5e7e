//! Backend entry for the simulator

use std::sync::Arc;

use log::debug;

use super::{SimConfig, SimDevice};
use crate::constants::ABI_VERSION;
use crate::driver::backend::{Backend, abi_compatible};
use crate::driver::config::{DeviceInfo, OpenFlags};
use crate::driver::ops::{DeviceKind, DeviceOps};
use crate::error::Result;

/// Protocol id of the simulator
pub const PROTO_ID: &str = "sim";

/// Open flag: simulate a revision 5 board
pub const OPEN_REV5: OpenFlags = OpenFlags(1 << 0);

/// Name reported by discovery
const DEVICE_NAME: &str = "sim0";

/// Simulator backend; stateless, every open creates a fresh device
#[derive(Debug, Default)]
pub struct SimBackend;

static SIM_BACKEND: SimBackend = SimBackend;

/// [`BackendEntry`](crate::BackendEntry) of the simulator
pub fn backend_entry(abi_version: u32) -> Option<&'static dyn Backend> {
    abi_compatible(ABI_VERSION, abi_version).then_some(&SIM_BACKEND as &'static dyn Backend)
}

impl Backend for SimBackend {
    fn proto_id(&self) -> &'static str {
        PROTO_ID
    }

    fn discovery(&self, out: &mut [DeviceInfo]) -> usize {
        let Some(slot) = out.first_mut() else {
            return 0;
        };
        *slot = DeviceInfo {
            unique_name: DEVICE_NAME.to_owned(),
            proto: PROTO_ID.to_owned(),
            address: "mem:0".to_owned(),
            product: "sdrll simulator".to_owned(),
            bus_speed: 0,
        };
        1
    }

    fn open(&self, device: &str, flags: OpenFlags) -> Result<Arc<dyn DeviceOps>> {
        let kind = if flags.contains(OPEN_REV5) {
            DeviceKind::Rev5
        } else {
            DeviceKind::Rev4
        };
        let name = if device.is_empty() { DEVICE_NAME } else { device };
        debug!("sim: opening '{name}' as {kind:?}");
        Ok(Arc::new(SimDevice::with_id(
            name,
            SimConfig::default().with_kind(kind),
        )))
    }
}
