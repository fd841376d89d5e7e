//! Bounded polling
//!
//! Some transports (network, slow USB control endpoints) expose status only
//! by register reads. [`Poller`] repeats a check with a fixed interval until
//! it succeeds or the timeout elapses, using any `DelayNs` implementation
//! for the waits.

use core::time::Duration;

use embedded_hal::delay::DelayNs;

use crate::constants::{DEFAULT_POLL_INTERVAL_US, DEFAULT_POLL_TIMEOUT_US};
use crate::error::{IoError, Result};

/// Delay provider backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// Repeats a check until it succeeds or a timeout elapses
#[derive(Debug)]
pub struct Poller<D: DelayNs> {
    delay: D,
    interval_us: u32,
    timeout_us: u32,
}

impl<D: DelayNs> Poller<D> {
    /// Create a poller with the default interval and timeout
    pub fn new(delay: D) -> Self {
        Self {
            delay,
            interval_us: DEFAULT_POLL_INTERVAL_US,
            timeout_us: DEFAULT_POLL_TIMEOUT_US,
        }
    }

    /// Set the wait between attempts (minimum 1 us)
    #[must_use]
    pub fn with_interval_us(mut self, interval_us: u32) -> Self {
        self.interval_us = interval_us.max(1);
        self
    }

    /// Set the overall timeout
    #[must_use]
    pub fn with_timeout_us(mut self, timeout_us: u32) -> Self {
        self.timeout_us = timeout_us;
        self
    }

    /// Number of attempts made before giving up
    pub fn max_attempts(&self) -> u32 {
        (self.timeout_us / self.interval_us).saturating_add(1)
    }

    /// Run `attempt` until it yields a value.
    ///
    /// Returns `Ok(None)` when every attempt came back empty. Errors from
    /// `attempt` stop the polling immediately.
    pub fn try_poll<T>(&mut self, mut attempt: impl FnMut() -> Result<Option<T>>) -> Result<Option<T>> {
        let attempts = self.max_attempts();
        for n in 0..attempts {
            if let Some(value) = attempt()? {
                return Ok(Some(value));
            }
            if n + 1 < attempts {
                self.delay.delay_us(self.interval_us);
            }
        }
        Ok(None)
    }

    /// Like [`Poller::try_poll`], failing with `IoError::Timeout`
    pub fn poll_for<T>(&mut self, attempt: impl FnMut() -> Result<Option<T>>) -> Result<T> {
        self.try_poll(attempt)?.ok_or_else(|| IoError::Timeout.into())
    }

    /// Wait until `ready` reports `true`
    pub fn poll_until(&mut self, mut ready: impl FnMut() -> Result<bool>) -> Result<()> {
        self.poll_for(|| Ok(ready()?.then_some(())))
    }

    /// Give back the delay provider
    pub fn into_inner(self) -> D {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DmaError, Error};
    use crate::test_utils::MockDelay;

    #[test]
    fn immediate_success_does_not_delay() {
        let mut poller = Poller::new(MockDelay::new());
        poller.poll_until(|| Ok(true)).unwrap();
        assert_eq!(poller.into_inner().total_ns(), 0);
    }

    #[test]
    fn waits_interval_between_attempts() {
        let mut poller = Poller::new(MockDelay::new()).with_interval_us(10);
        let mut calls = 0;
        let got = poller
            .poll_for(|| {
                calls += 1;
                Ok((calls == 3).then_some(calls))
            })
            .unwrap();
        assert_eq!(got, 3);
        assert_eq!(poller.into_inner().total_ns(), 20_000);
    }

    #[test]
    fn timeout_is_io_error() {
        let mut poller = Poller::new(MockDelay::new())
            .with_interval_us(100)
            .with_timeout_us(1_000);
        assert_eq!(poller.max_attempts(), 11);
        let err = poller.poll_until(|| Ok(false)).unwrap_err();
        assert_eq!(err, Error::Io(IoError::Timeout));
        assert_eq!(poller.into_inner().total_ns(), 1_000_000);
    }

    #[test]
    fn max_attempts_saturates() {
        let poller = Poller::new(MockDelay::new())
            .with_interval_us(1)
            .with_timeout_us(u32::MAX);
        assert_eq!(poller.max_attempts(), u32::MAX);
    }

    #[test]
    fn attempt_error_stops_polling() {
        let mut poller = Poller::new(MockDelay::new());
        let mut calls = 0;
        let err = poller
            .try_poll::<()>(|| {
                calls += 1;
                Err(DmaError::ChannelClosing.into())
            })
            .unwrap_err();
        assert_eq!(err, Error::Dma(DmaError::ChannelClosing));
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_interval_is_clamped() {
        let poller = Poller::new(MockDelay::new())
            .with_interval_us(0)
            .with_timeout_us(5);
        assert_eq!(poller.max_attempts(), 6);
    }
}
