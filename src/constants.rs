//! Centralized Constants
//!
//! This module provides a single source of truth for the magic numbers and
//! default configuration values used throughout the streaming core.
//!
//! # Organization
//!
//! Constants are grouped by category:
//! - **ABI**: Backend entry negotiation
//! - **Buffer pools**: Default geometry and limits
//! - **Timestamps**: Wrapping counter width
//! - **Timing**: Polling intervals and timeouts
//!
//! # Note
//!
//! Control register addresses live in `internal::control_regs` since they
//! are specific to a hardware revision.

// =============================================================================
// ABI
// =============================================================================

/// ABI version passed to backend entry functions
pub const ABI_VERSION: u32 = 0x0100_0001;

/// Major part of the ABI version; a backend must match it exactly
pub const ABI_MAJOR_MASK: u32 = 0xFF00_0000;

// =============================================================================
// Buffer Pools
// =============================================================================

/// Default number of buffers per direction per channel
pub const DEFAULT_POOL_BUFFERS: usize = 32;

/// Default size of one DMA buffer in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Largest pool a transport may negotiate
pub const MAX_POOL_BUFFERS: usize = 1024;

/// Largest single buffer a transport may negotiate
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

// =============================================================================
// Timestamps
// =============================================================================

/// Width of the hardware sample counter in bits
pub const WTS_BITS: u32 = 32;

/// Modulus of the hardware sample counter
pub const WTS_MODULUS: u64 = 1 << WTS_BITS;

// =============================================================================
// Timing
// =============================================================================

/// Default poll interval for delay-driven waits, in microseconds
pub const DEFAULT_POLL_INTERVAL_US: u32 = 100;

/// Default poll timeout for delay-driven waits, in microseconds
pub const DEFAULT_POLL_TIMEOUT_US: u32 = 100_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_matches_reference_geometry() {
        assert_eq!(DEFAULT_POOL_BUFFERS, 32);
        assert_eq!(DEFAULT_BUFFER_SIZE, 32768);
        assert_eq!(DEFAULT_POOL_BUFFERS * DEFAULT_BUFFER_SIZE, 1024 * 1024);
    }

    #[test]
    fn wts_modulus_is_two_to_the_width() {
        assert_eq!(WTS_MODULUS, u64::from(u32::MAX) + 1);
    }

    #[test]
    fn poll_timeout_covers_multiple_intervals() {
        assert!(DEFAULT_POLL_TIMEOUT_US > DEFAULT_POLL_INTERVAL_US);
    }
}
