//! Wrapping sample timestamps
//!
//! The hardware counts samples in a 32-bit register that wraps modulo 2^32.
//! [`Wts32`] is that raw value. [`WtsLong`] extends it with a wrap epoch in
//! the upper 32 bits so a whole session has a monotonic timeline.
//!
//! Ordering between two timestamps is always decided by the signed modular
//! distance, never by comparing the raw integers:
//!
//! ```
//! use sdrll::Wts32;
//!
//! let before_wrap = Wts32::MAX;
//! let after_wrap = Wts32::new(0);
//! assert_eq!(after_wrap.distance(before_wrap), 1);
//! assert!(after_wrap.is_after(before_wrap));
//! ```

use crate::constants::WTS_BITS;

// =============================================================================
// 32-bit Wrapping Timestamp
// =============================================================================

/// Raw 32-bit wrapping sample counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Wts32(pub u32);

impl Wts32 {
    /// Largest raw counter value; the next sample wraps to zero
    pub const MAX: Wts32 = Wts32(u32::MAX);

    /// Wrap a raw counter value
    #[inline(always)]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw counter value
    #[inline(always)]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Signed distance `self - other` along the shortest path around the wrap
    ///
    /// The result lies in `[-2^31, 2^31)`.
    #[inline(always)]
    #[must_use]
    pub const fn distance(self, other: Wts32) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    /// `true` if `self` occurs strictly after `other`
    #[inline(always)]
    #[must_use]
    pub const fn is_after(self, other: Wts32) -> bool {
        self.distance(other) > 0
    }

    /// `true` if `self` occurs strictly before `other`
    #[inline(always)]
    #[must_use]
    pub const fn is_before(self, other: Wts32) -> bool {
        self.distance(other) < 0
    }

    /// Advance by `samples`, wrapping
    #[inline(always)]
    #[must_use]
    pub const fn wrapping_add(self, samples: u32) -> Self {
        Self(self.0.wrapping_add(samples))
    }
}

impl From<u32> for Wts32 {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl core::fmt::Display for Wts32 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Epoch-extended Timestamp
// =============================================================================

/// Session-monotonic timestamp: wrap epoch in the upper half, [`Wts32`] below
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WtsLong(pub u64);

impl WtsLong {
    /// Session origin
    pub const ZERO: WtsLong = WtsLong(0);

    /// Wrap a raw long value
    #[inline(always)]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Build from a wrap epoch and the low 32-bit counter
    #[inline(always)]
    #[must_use]
    pub const fn from_parts(epoch: u32, low: Wts32) -> Self {
        Self(((epoch as u64) << WTS_BITS) | low.0 as u64)
    }

    /// Raw long value
    #[inline(always)]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Number of counter wraps since session start
    #[inline(always)]
    #[must_use]
    pub const fn epoch(self) -> u32 {
        (self.0 >> WTS_BITS) as u32
    }

    /// The value the hardware counter holds at this instant
    #[inline(always)]
    #[must_use]
    pub const fn low(self) -> Wts32 {
        Wts32(self.0 as u32)
    }

    /// Signed distance `self - other`, modular over 64 bits
    #[inline(always)]
    #[must_use]
    pub const fn distance(self, other: WtsLong) -> i64 {
        self.0.wrapping_sub(other.0) as i64
    }

    /// `true` if `self` occurs strictly after `other`
    #[inline(always)]
    #[must_use]
    pub const fn is_after(self, other: WtsLong) -> bool {
        self.distance(other) > 0
    }

    /// `true` if `self` occurs strictly before `other`
    #[inline(always)]
    #[must_use]
    pub const fn is_before(self, other: WtsLong) -> bool {
        self.distance(other) < 0
    }

    /// Advance by `samples`, wrapping
    #[inline(always)]
    #[must_use]
    pub const fn wrapping_add(self, samples: u64) -> Self {
        Self(self.0.wrapping_add(samples))
    }
}

impl From<u64> for WtsLong {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl core::fmt::Display for WtsLong {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.epoch(), self.low().0)
    }
}

// =============================================================================
// Wrap Tracking
// =============================================================================

/// Extends observed [`Wts32`] values into a monotonic [`WtsLong`] timeline
///
/// Each observation is placed at the shortest signed distance from the
/// previous one, so a forward step across the wrap bumps the epoch while a
/// small backward step (jitter, a re-reported stamp) does not. Steps larger
/// than half the counter range are ambiguous and resolve to the shorter
/// direction. A backward step before the session origin wraps the 64-bit
/// value, so it still orders before the previous observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WtsExtender {
    last: Option<WtsLong>,
}

impl WtsExtender {
    /// Create a tracker that has not seen any sample yet
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Most recent extended value, `None` until the first observation
    #[inline(always)]
    #[must_use]
    pub const fn current(&self) -> Option<WtsLong> {
        self.last
    }

    /// Forget all history; the next observation starts epoch 0 again
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Seed the tracker with a known long timestamp
    pub fn seed(&mut self, at: WtsLong) {
        self.last = Some(at);
    }

    /// Extend `raw` against the previous observation and remember it
    pub fn observe(&mut self, raw: Wts32) -> WtsLong {
        let extended = match self.last {
            None => WtsLong::from_parts(0, raw),
            Some(last) => {
                let step = i64::from(raw.distance(last.low()));
                WtsLong(last.0.wrapping_add_signed(step))
            }
        };
        self.last = Some(extended);
        extended
    }
}

// =============================================================================
// Tests
// =============================================================================
