//! DMA buffer management
//!
//! # Architecture
//!
//! - [`SlotRing`](ring::SlotRing): fixed ring of slots with a round-robin cursor
//! - [`Slot`](slot::Slot): one buffer and its ownership state
//! - [`BufferPool`]: the ownership transitions used by the RX and TX state
//!   machines
//!
//! Buffers are allocated once per channel init and recycled; nothing here
//! allocates on the streaming path.

mod pool;
mod ring;
mod slot;

pub(crate) use pool::BufferPool;
pub use pool::{BufferId, PoolCounts};
pub use slot::BufferState;
