//! Mutex-protected state with a condition variable for blocking waits.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::driver::config::WaitMode;
use crate::error::{DmaError, Result};

/// Cell providing interior mutability plus wait/notify.
///
/// All access goes through [`Waitable::with`] or [`Waitable::wait_until`].
/// A panic while the lock is held does not wedge the channel: the poisoned
/// state is taken over as-is.
pub struct Waitable<T> {
    state: Mutex<T>,
    changed: Condvar,
}

impl<T> Waitable<T> {
    /// Create a new cell
    pub const fn new(value: T) -> Self {
        Self {
            state: Mutex::new(value),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute a closure with exclusive mutable access.
    #[inline]
    pub fn with<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        f(&mut self.lock())
    }

    /// Wake every waiter
    #[inline]
    pub fn notify_all(&self) {
        self.changed.notify_all();
    }

    /// Run `attempt` until it produces a result, waiting between tries.
    ///
    /// `attempt` returns `None` when the caller has to wait for a state
    /// change. Depending on `mode` the call then sleeps on the condition
    /// variable, fails with `DmaError::NotReady`, or fails with
    /// `DmaError::Timeout` once the deadline passes.
    pub fn wait_until<R, F>(&self, mode: WaitMode, mut attempt: F) -> Result<R>
    where
        F: FnMut(&mut T) -> Option<Result<R>>,
    {
        let deadline = match mode {
            WaitMode::Timeout(limit) => Some(Instant::now() + limit),
            WaitMode::Block | WaitMode::Poll => None,
        };

        let mut guard = self.lock();
        loop {
            if let Some(result) = attempt(&mut guard) {
                return result;
            }

            guard = match (mode, deadline) {
                (WaitMode::Poll, _) => return Err(DmaError::NotReady.into()),
                (_, Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(DmaError::Timeout.into());
                    }
                    self.changed
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                (_, None) => self
                    .changed
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

impl<T: Default> Default for Waitable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn with_gives_mutable_access() {
        let cell = Waitable::new(1u32);
        cell.with(|v| *v += 1);
        assert_eq!(cell.with(|v| *v), 2);
    }

    #[test]
    fn poll_mode_reports_not_ready() {
        let cell = Waitable::new(false);
        let result: Result<()> = cell.wait_until(WaitMode::Poll, |ready| ready.then_some(Ok(())));
        assert_eq!(result, Err(Error::Dma(DmaError::NotReady)));
    }

    #[test]
    fn immediate_success_never_waits() {
        let cell = Waitable::new(5u32);
        let got = cell.wait_until(WaitMode::Block, |v| Some(Ok(*v))).unwrap();
        assert_eq!(got, 5);
    }

    #[test]
    fn timeout_mode_expires() {
        let cell = Waitable::new(false);
        let start = Instant::now();
        let result: Result<()> = cell.wait_until(
            WaitMode::Timeout(Duration::from_millis(20)),
            |ready| ready.then_some(Ok(())),
        );
        assert_eq!(result, Err(Error::Dma(DmaError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn block_mode_wakes_on_notify() {
        let cell = Arc::new(Waitable::new(false));
        let waiter = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.wait_until(WaitMode::Block, |ready| ready.then_some(Ok(()))))
        };

        thread::sleep(Duration::from_millis(10));
        cell.with(|ready| *ready = true);
        cell.notify_all();

        assert_eq!(waiter.join().unwrap(), Ok(()));
    }
}
