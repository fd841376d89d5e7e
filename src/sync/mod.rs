//! Synchronization Support
//!
//! Channel state shared between the application threads and the transport
//! completion context lives in a [`Waitable`]: a `Mutex` plus `Condvar`
//! with closure-based access, so the lock is never held across a call into
//! the transport.
//!
//! # Example
//!
//! ```ignore
//! let cell = Waitable::new(VecDeque::new());
//!
//! // Completion context
//! cell.with(|queue| queue.push_back(slot));
//! cell.notify_all();
//!
//! // Application thread
//! let slot = cell.wait_until(WaitMode::Block, |queue| queue.pop_front().map(Ok))?;
//! ```

mod waitable;

pub use waitable::Waitable;
