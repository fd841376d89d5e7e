//! Control register maps per hardware revision.
//!
//! Revisions share the register semantics but not the addresses: rev5 moved
//! the UART and RAM windows when the second UART was added. The control
//! layer picks a map by [`crate::DeviceKind`] at open time.

/// Register addresses used by the control operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ControlRegs {
    /// First of the read-only configuration words, indexed by `CfgParam`
    pub cfg_base: u32,
    /// Reference oscillator DAC
    pub osc_dac: u32,
    /// Measured reference frequency
    pub osc_freq: u32,
    /// TX PLL reconfiguration port (write `reg << 16 | value`)
    pub tx_pll_cfg: u32,
    /// TX PLL readback and lock status
    pub tx_pll_status: u32,
    /// Front-end power control
    pub fe_power: u32,
    /// Antenna switch
    pub antenna: u32,
    /// First sensor word, indexed by `Sensor`
    pub sensor_base: u32,
    /// Timed command block: time, route, data (burst of three)
    pub timed_cmd: u32,
    /// First UART RX FIFO register
    pub uart_rx_base: u32,
    /// Number of UARTs exposed
    pub uart_count: u32,
    /// RAM window address latch
    pub mem_addr: u32,
    /// First register of the RAM window, `MEM_WINDOW_WORDS` long
    pub mem_window: u32,
    /// First parameter word, indexed by `Param`
    pub param_base: u32,
}

/// Revision 4 register map
pub(crate) const REV4_REGS: ControlRegs = ControlRegs {
    cfg_base: 0x0000,
    osc_dac: 0x0010,
    osc_freq: 0x0011,
    tx_pll_cfg: 0x0014,
    tx_pll_status: 0x0015,
    fe_power: 0x0018,
    antenna: 0x0019,
    sensor_base: 0x0020,
    timed_cmd: 0x0030,
    uart_rx_base: 0x0040,
    uart_count: 1,
    mem_addr: 0x0050,
    mem_window: 0x0100,
    param_base: 0x0060,
};

/// Revision 5 register map
pub(crate) const REV5_REGS: ControlRegs = ControlRegs {
    uart_rx_base: 0x0044,
    uart_count: 2,
    mem_addr: 0x0058,
    mem_window: 0x0200,
    ..REV4_REGS
};

// =============================================================================
// Field Layouts
// =============================================================================

/// Words visible through the RAM window at once
pub(crate) const MEM_WINDOW_WORDS: usize = 64;

/// UART RX FIFO word: bit 31 set when `UART_DATA_MASK` holds a byte
pub(crate) const UART_RX_VALID: u32 = 1 << 31;

/// UART RX FIFO data byte
pub(crate) const UART_DATA_MASK: u32 = 0xFF;

/// TX PLL status: current register value
pub(crate) const TX_PLL_VALUE_MASK: u32 = 0xFFFF;

/// TX PLL status: PLL locked
pub(crate) const TX_PLL_LOCKED: u32 = 1 << 16;

/// TX PLL status: reconfiguration port ready
pub(crate) const TX_PLL_READY: u32 = 1 << 17;

/// TX PLL config word register field shift
pub(crate) const TX_PLL_REG_SHIFT: u32 = 16;

/// Antenna word: TX selection field shift
pub(crate) const ANTENNA_TX_SHIFT: u32 = 8;

/// Front-end power word: chip index field shift
pub(crate) const FE_POWER_CHIP_SHIFT: u32 = 16;

/// Front-end power word: enable mask field
pub(crate) const FE_POWER_MASK: u32 = 0xFFFF;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rev5_moves_uart_and_ram_windows_only() {
        assert_ne!(REV4_REGS.uart_rx_base, REV5_REGS.uart_rx_base);
        assert_ne!(REV4_REGS.mem_addr, REV5_REGS.mem_addr);
        assert_eq!(REV4_REGS.timed_cmd, REV5_REGS.timed_cmd);
        assert_eq!(REV4_REGS.osc_dac, REV5_REGS.osc_dac);
    }

    #[test]
    fn timed_command_block_does_not_overlap_uart() {
        for regs in [REV4_REGS, REV5_REGS] {
            assert!(regs.timed_cmd + 3 <= regs.uart_rx_base);
        }
    }

    #[test]
    fn ram_window_clears_other_registers() {
        for regs in [REV4_REGS, REV5_REGS] {
            assert!(regs.mem_window > regs.param_base + 0x10);
            assert!(regs.mem_window > regs.mem_addr);
        }
    }

    #[test]
    fn pll_status_fields_are_disjoint() {
        assert_eq!(TX_PLL_VALUE_MASK & TX_PLL_LOCKED, 0);
        assert_eq!(TX_PLL_VALUE_MASK & TX_PLL_READY, 0);
        assert_ne!(TX_PLL_LOCKED, TX_PLL_READY);
    }
}
