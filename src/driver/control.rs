//! Control operations
//!
//! Board-level controls (oscillator trim, TX PLL, front-end power, antenna
//! switch, timed commands, UART, device RAM) differ between hardware
//! revisions only in where their registers live. [`ControlOps`] is resolved
//! at open time from the [`DeviceKind`] the backend reports, so one binary
//! drives every revision without compile-time branching.
//!
//! Every operation is a thin mapping onto [`DeviceOps`] register I/O; there
//! is no state here.

use log::debug;

use crate::driver::ops::{CfgParam, CommandRoute, DeviceKind, DeviceOps, Param, Sensor};
use crate::error::{Result, UsageError};
use crate::hal::poll::{Poller, StdDelay};
use crate::internal::control_regs::{
    ANTENNA_TX_SHIFT, ControlRegs, FE_POWER_CHIP_SHIFT, FE_POWER_MASK, MEM_WINDOW_WORDS, REV4_REGS,
    REV5_REGS, TX_PLL_LOCKED, TX_PLL_READY, TX_PLL_REG_SHIFT, TX_PLL_VALUE_MASK, UART_DATA_MASK,
    UART_RX_VALID,
};
use crate::timestamp::Wts32;

/// TX PLL readback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllStatus {
    /// Value of the last addressed PLL register
    pub value: u16,
    /// PLL is locked
    pub locked: bool,
    /// Reconfiguration port accepts a new write
    pub ready: bool,
}

impl PllStatus {
    fn from_raw(raw: u32) -> Self {
        Self {
            value: (raw & TX_PLL_VALUE_MASK) as u16,
            locked: raw & TX_PLL_LOCKED != 0,
            ready: raw & TX_PLL_READY != 0,
        }
    }
}

/// Revision-specific board controls
///
/// Implementations carry no per-device state; the device's transport is
/// passed to every call.
pub trait ControlOps: Send + Sync {
    /// Read a configuration word
    fn get_cfg(&self, ops: &dyn DeviceOps, param: CfgParam) -> Result<u32>;

    /// Set the reference oscillator DAC
    fn set_osc_dac(&self, ops: &dyn DeviceOps, value: u32) -> Result<()>;

    /// Measured reference oscillator frequency in Hz
    fn get_osc_freq(&self, ops: &dyn DeviceOps) -> Result<u32>;

    /// Write one TX PLL register once the reconfiguration port is ready
    fn set_tx_pll(&self, ops: &dyn DeviceOps, reg: u16, value: u16) -> Result<()>;

    /// TX PLL lock and readback
    fn tx_pll_status(&self, ops: &dyn DeviceOps) -> Result<PllStatus>;

    /// Enable the supplies in `mask` on front-end chip `chip`
    fn set_frontend_power(&self, ops: &dyn DeviceOps, chip: u16, mask: u16) -> Result<()>;

    /// Raw sensor register
    fn get_sensor(&self, ops: &dyn DeviceOps, sensor: Sensor) -> Result<i32>;

    /// Route RX and TX antenna switches
    fn select_antenna(&self, ops: &dyn DeviceOps, rx: u8, tx: u8) -> Result<()>;

    /// Schedule a register write at sample time `at`
    fn issue_timed_command(
        &self,
        ops: &dyn DeviceOps,
        at: Wts32,
        route: CommandRoute,
        data: u32,
    ) -> Result<()>;

    /// Drain up to `out.len()` bytes from UART `uart`; returns bytes read
    fn read_uart(&self, ops: &dyn DeviceOps, uart: u32, out: &mut [u8]) -> Result<usize>;

    /// Read 32-bit words of device RAM starting at `addr`
    fn mem_read32(&self, ops: &dyn DeviceOps, addr: u32, out: &mut [u32]) -> Result<()>;

    /// Write 32-bit words of device RAM starting at `addr`
    fn mem_write32(&self, ops: &dyn DeviceOps, addr: u32, data: &[u32]) -> Result<()>;

    /// Write a device parameter register
    fn set_param(&self, ops: &dyn DeviceOps, param: Param, value: u32) -> Result<()>;
}

// =============================================================================
// Register-Mapped Implementation
// =============================================================================

/// [`ControlOps`] over a revision's register map
#[derive(Debug, Clone, Copy)]
pub struct RegisterControl {
    regs: ControlRegs,
}

/// Controls for revision 4 boards
pub static REV4_CONTROL: RegisterControl = RegisterControl { regs: REV4_REGS };

/// Controls for revision 5 boards
pub static REV5_CONTROL: RegisterControl = RegisterControl { regs: REV5_REGS };

/// Control operations for `kind`, `None` if the revision has none
pub fn resolve_control_ops(kind: DeviceKind) -> Option<&'static dyn ControlOps> {
    match kind {
        DeviceKind::Rev4 => Some(&REV4_CONTROL),
        DeviceKind::Rev5 => Some(&REV5_CONTROL),
    }
}

impl RegisterControl {
    fn pll_poller() -> Poller<StdDelay> {
        Poller::new(StdDelay)
    }
}

impl ControlOps for RegisterControl {
    fn get_cfg(&self, ops: &dyn DeviceOps, param: CfgParam) -> Result<u32> {
        ops.reg_in(self.regs.cfg_base + param.raw())
    }

    fn set_osc_dac(&self, ops: &dyn DeviceOps, value: u32) -> Result<()> {
        ops.reg_out(self.regs.osc_dac, value)
    }

    fn get_osc_freq(&self, ops: &dyn DeviceOps) -> Result<u32> {
        ops.reg_in(self.regs.osc_freq)
    }

    fn set_tx_pll(&self, ops: &dyn DeviceOps, reg: u16, value: u16) -> Result<()> {
        let status = self.regs.tx_pll_status;
        Self::pll_poller().poll_until(|| Ok(ops.reg_in(status)? & TX_PLL_READY != 0))?;
        debug!("tx pll reg {reg:#06x} <- {value:#06x}");
        ops.reg_out(
            self.regs.tx_pll_cfg,
            (u32::from(reg) << TX_PLL_REG_SHIFT) | u32::from(value),
        )
    }

    fn tx_pll_status(&self, ops: &dyn DeviceOps) -> Result<PllStatus> {
        Ok(PllStatus::from_raw(ops.reg_in(self.regs.tx_pll_status)?))
    }

    fn set_frontend_power(&self, ops: &dyn DeviceOps, chip: u16, mask: u16) -> Result<()> {
        let word = (u32::from(chip) << FE_POWER_CHIP_SHIFT) | (u32::from(mask) & FE_POWER_MASK);
        ops.reg_out(self.regs.fe_power, word)
    }

    fn get_sensor(&self, ops: &dyn DeviceOps, sensor: Sensor) -> Result<i32> {
        Ok(ops.reg_in(self.regs.sensor_base + sensor.raw())? as i32)
    }

    fn select_antenna(&self, ops: &dyn DeviceOps, rx: u8, tx: u8) -> Result<()> {
        ops.reg_out(
            self.regs.antenna,
            (u32::from(tx) << ANTENNA_TX_SHIFT) | u32::from(rx),
        )
    }

    fn issue_timed_command(
        &self,
        ops: &dyn DeviceOps,
        at: Wts32,
        route: CommandRoute,
        data: u32,
    ) -> Result<()> {
        // Time, route and data must land in one transaction or the command
        // could fire with a stale route
        ops.reg_out_n(self.regs.timed_cmd, &[at.raw(), route.raw(), data])
    }

    fn read_uart(&self, ops: &dyn DeviceOps, uart: u32, out: &mut [u8]) -> Result<usize> {
        if uart >= self.regs.uart_count {
            return Err(UsageError::UnknownParam.into());
        }
        let reg = self.regs.uart_rx_base + uart;
        let mut read = 0;
        for byte in out.iter_mut() {
            let word = ops.reg_in(reg)?;
            if word & UART_RX_VALID == 0 {
                break;
            }
            *byte = (word & UART_DATA_MASK) as u8;
            read += 1;
        }
        Ok(read)
    }

    fn mem_read32(&self, ops: &dyn DeviceOps, addr: u32, out: &mut [u32]) -> Result<()> {
        let mut addr = addr;
        for chunk in out.chunks_mut(MEM_WINDOW_WORDS) {
            ops.reg_out(self.regs.mem_addr, addr)?;
            ops.reg_in_n(self.regs.mem_window, chunk)?;
            addr = addr.wrapping_add((chunk.len() * 4) as u32);
        }
        Ok(())
    }

    fn mem_write32(&self, ops: &dyn DeviceOps, addr: u32, data: &[u32]) -> Result<()> {
        let mut addr = addr;
        for chunk in data.chunks(MEM_WINDOW_WORDS) {
            ops.reg_out(self.regs.mem_addr, addr)?;
            ops.reg_out_n(self.regs.mem_window, chunk)?;
            addr = addr.wrapping_add((chunk.len() * 4) as u32);
        }
        Ok(())
    }

    fn set_param(&self, ops: &dyn DeviceOps, param: Param, value: u32) -> Result<()> {
        ops.reg_out(self.regs.param_base + param.raw(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::sim::{SimConfig, SimDevice};

    fn rev4() -> SimDevice {
        SimDevice::new(SimConfig::default().with_kind(DeviceKind::Rev4))
    }

    #[test]
    fn resolves_a_table_per_revision() {
        assert!(resolve_control_ops(DeviceKind::Rev4).is_some());
        assert!(resolve_control_ops(DeviceKind::Rev5).is_some());
    }

    #[test]
    fn timed_command_is_one_burst() {
        let sim = rev4();
        let before = sim.transactions();
        REV4_CONTROL
            .issue_timed_command(&sim, Wts32(5000), CommandRoute::TxFrontEnd, 0xAB)
            .unwrap();
        assert_eq!(sim.transactions(), before + 1);
        assert_eq!(sim.peek_reg(REV4_REGS.timed_cmd), 5000);
        assert_eq!(sim.peek_reg(REV4_REGS.timed_cmd + 1), 1);
        assert_eq!(sim.peek_reg(REV4_REGS.timed_cmd + 2), 0xAB);
    }

    #[test]
    fn antenna_and_power_words() {
        let sim = rev4();
        REV4_CONTROL.select_antenna(&sim, 2, 3).unwrap();
        assert_eq!(sim.peek_reg(REV4_REGS.antenna), 0x0302);
        REV4_CONTROL.set_frontend_power(&sim, 1, 0x00F0).unwrap();
        assert_eq!(sim.peek_reg(REV4_REGS.fe_power), 0x0001_00F0);
    }

    #[test]
    fn pll_write_waits_for_ready() {
        let sim = rev4();
        sim.poke_reg(REV4_REGS.tx_pll_status, TX_PLL_READY | TX_PLL_LOCKED | 0x12);
        REV4_CONTROL.set_tx_pll(&sim, 0x0004, 0x0100).unwrap();
        assert_eq!(sim.peek_reg(REV4_REGS.tx_pll_cfg), 0x0004_0100);

        let status = REV4_CONTROL.tx_pll_status(&sim).unwrap();
        assert_eq!(
            status,
            PllStatus {
                value: 0x12,
                locked: true,
                ready: true
            }
        );
    }

    #[test]
    fn uart_read_stops_at_empty_fifo() {
        let sim = rev4();
        sim.push_uart(REV4_REGS.uart_rx_base, b"ok");
        let mut buf = [0u8; 8];
        let n = REV4_CONTROL.read_uart(&sim, 0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok");
        assert_eq!(
            REV4_CONTROL.read_uart(&sim, 1, &mut buf).unwrap_err(),
            Error::Usage(UsageError::UnknownParam)
        );
    }

    #[test]
    fn rev5_has_second_uart() {
        let sim = SimDevice::new(SimConfig::default().with_kind(DeviceKind::Rev5));
        sim.push_uart(REV5_REGS.uart_rx_base + 1, b"x");
        let mut buf = [0u8; 4];
        assert_eq!(REV5_CONTROL.read_uart(&sim, 1, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'x');
    }

    #[test]
    fn ram_round_trip_through_window() {
        let sim = rev4();
        let words = [1u32, 2, 3, 0xDEAD_BEEF];
        REV4_CONTROL.mem_write32(&sim, 0x1000, &words).unwrap();
        assert_eq!(sim.peek_reg(REV4_REGS.mem_addr), 0x1000);

        let mut back = [0u32; 4];
        REV4_CONTROL.mem_read32(&sim, 0x1000, &mut back).unwrap();
        assert_eq!(back, words);
    }

    #[test]
    fn ram_transfer_spans_windows() {
        let sim = rev4();
        let words: Vec<u32> = (0..150).collect();
        REV4_CONTROL.mem_write32(&sim, 0x4000, &words).unwrap();

        let mut back = vec![0u32; words.len()];
        REV4_CONTROL.mem_read32(&sim, 0x4000, &mut back).unwrap();
        assert_eq!(back, words);

        let mut tail = [0u32; 2];
        REV4_CONTROL.mem_read32(&sim, 0x4000 + 4 * 148, &mut tail).unwrap();
        assert_eq!(tail, [148, 149]);
    }

    #[test]
    fn cfg_sensor_and_param_offsets() {
        let sim = rev4();
        sim.poke_reg(REV4_REGS.cfg_base + CfgParam::SerialNumber.raw(), 77);
        assert_eq!(REV4_CONTROL.get_cfg(&sim, CfgParam::SerialNumber).unwrap(), 77);

        sim.poke_reg(REV4_REGS.sensor_base + Sensor::BoardTemperature.raw(), (-5i32) as u32);
        assert_eq!(
            REV4_CONTROL.get_sensor(&sim, Sensor::BoardTemperature).unwrap(),
            -5
        );

        REV4_CONTROL.set_param(&sim, Param::TxLateSlack, 64).unwrap();
        assert_eq!(sim.peek_reg(REV4_REGS.param_base + Param::TxLateSlack.raw()), 64);
    }
}
