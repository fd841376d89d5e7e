//! Fixed-size pool of DMA buffers with explicit ownership handoff.
//!
//! Every slot is in exactly one [`BufferState`]. The transitions are:
//!
//! ```text
//!            acquire_for_hardware            deliver
//!   Free ───────────────────────▶ InFlight ─────────▶ Ready     (RX)
//!    ▲  ◀─────────────────────────┘  ▲                 │
//!    │          reclaim              │     submit      │
//!    │                               └─────────────────┤        (TX)
//!    │        release_to_hardware                      │
//!    └─────────────────────────────────────────────────┘
//!   Free ──acquire_for_app──▶ Ready                             (TX)
//! ```
//!
//! The pool never allocates after construction.

use core::sync::atomic::{AtomicU64, Ordering};

use log::warn;

use super::ring::SlotRing;
use super::slot::{BufferState, Slot};
use crate::error::{DmaError, Result, UsageError};

/// Source of unique pool ids, so a handle from a torn-down pool is never
/// mistaken for one from its replacement.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Handles and Counters
// =============================================================================

/// Identity of one application lease on one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferId {
    pool: u64,
    index: u32,
    lease: u32,
}

impl BufferId {
    /// Slot index inside the channel's pool
    #[inline(always)]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    /// Lease number; changes every time the slot is handed out
    #[inline(always)]
    #[must_use]
    pub const fn lease(&self) -> u32 {
        self.lease
    }
}

/// Snapshot of how many buffers sit in each ownership state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PoolCounts {
    /// Buffers available for acquisition
    pub free: usize,
    /// Buffers owned by hardware
    pub in_flight: usize,
    /// Buffers owned by the application
    pub ready: usize,
}

impl PoolCounts {
    /// Sum of all states; always equals the pool size
    #[must_use]
    pub const fn total(&self) -> usize {
        self.free + self.in_flight + self.ready
    }
}

// =============================================================================
// Buffer Pool
// =============================================================================

/// Fixed set of reusable buffers for one channel direction
pub(crate) struct BufferPool {
    ring: SlotRing<Slot>,
    buffer_size: usize,
    id: u64,
}

impl BufferPool {
    /// Allocate `buffers` slots of `buffer_size` bytes each, all free
    pub fn new(buffers: usize, buffer_size: usize) -> Self {
        Self {
            ring: SlotRing::from_fn(buffers, |_| Slot::new(buffer_size)),
            buffer_size,
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Number of buffers in the pool
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Capacity of each buffer in bytes
    #[inline(always)]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Current distribution of ownership states
    pub fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts::default();
        for slot in self.ring.iter() {
            match slot.state() {
                BufferState::Free => counts.free += 1,
                BufferState::InFlight => counts.in_flight += 1,
                BufferState::Ready => counts.ready += 1,
            }
        }
        counts
    }

    /// State of the slot at `index`
    pub fn state(&self, index: usize) -> Option<BufferState> {
        (index < self.len()).then(|| self.ring.get(index).state())
    }

    fn next_free(&self) -> Option<usize> {
        self.ring.find_from_cursor(|slot| slot.is(BufferState::Free))
    }

    /// Hand the next free slot (round-robin) to hardware
    pub fn acquire_for_hardware(&mut self) -> Result<usize> {
        let index = self.next_free().ok_or(DmaError::PoolExhausted)?;
        self.ring.get_mut(index).mark_in_flight();
        self.ring.advance_past(index);
        Ok(index)
    }

    /// Hand the next free slot (round-robin) to the application
    pub fn acquire_for_app(&mut self) -> Result<(BufferId, Box<[u8]>)> {
        let index = self.next_free().ok_or(DmaError::PoolExhausted)?;
        self.ring.advance_past(index);
        self.lend(index)
    }

    /// Move a slot that hardware finished with to the application
    pub fn deliver(&mut self, index: usize) -> Result<(BufferId, Box<[u8]>)> {
        self.expect_in_flight(index)?;
        self.lend(index)
    }

    /// Return an application-held buffer to the free list
    pub fn release_to_hardware(&mut self, id: BufferId, data: Box<[u8]>) -> Result<usize> {
        let index = self.check_lease(id, &data)?;
        let slot = self.ring.get_mut(index);
        slot.restore(data);
        slot.mark_free();
        Ok(index)
    }

    /// Hand an application-filled buffer to hardware
    pub fn submit(&mut self, id: BufferId, data: Box<[u8]>) -> Result<usize> {
        let index = self.check_lease(id, &data)?;
        let slot = self.ring.get_mut(index);
        slot.restore(data);
        slot.mark_in_flight();
        Ok(index)
    }

    /// Hardware gives a slot back without delivering it
    pub fn reclaim(&mut self, index: usize) -> Result<()> {
        self.expect_in_flight(index)?;
        self.ring.get_mut(index).mark_free();
        Ok(())
    }

    /// Force every in-flight slot back to free; returns how many moved
    pub fn abandon_in_flight(&mut self) -> usize {
        let mut abandoned = 0;
        for slot in self.ring.iter_mut() {
            if slot.is(BufferState::InFlight) {
                slot.mark_free();
                abandoned += 1;
            }
        }
        abandoned
    }

    /// Read access to an in-flight slot's payload
    pub fn with_data<R>(&self, index: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.expect_in_flight(index)?;
        let data = self.ring.get(index).data().ok_or(DmaError::NotInFlight)?;
        Ok(f(data))
    }

    /// Write access to an in-flight slot's payload
    pub fn with_data_mut<R>(&mut self, index: usize, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.expect_in_flight(index)?;
        let data = self.ring.get_mut(index).data_mut().ok_or(DmaError::NotInFlight)?;
        Ok(f(data))
    }

    fn expect_in_flight(&self, index: usize) -> Result<()> {
        if index < self.len() && self.ring.get(index).is(BufferState::InFlight) {
            Ok(())
        } else {
            Err(DmaError::NotInFlight.into())
        }
    }

    fn lend(&mut self, index: usize) -> Result<(BufferId, Box<[u8]>)> {
        let slot = self.ring.get_mut(index);
        let data = slot.lend().ok_or(DmaError::NotInFlight)?;
        let id = BufferId {
            pool: self.id,
            index: index as u32,
            lease: slot.lease(),
        };
        Ok((id, data))
    }

    fn check_lease(&self, id: BufferId, data: &[u8]) -> Result<usize> {
        let index = id.index();
        if id.pool != self.id || index >= self.len() || data.len() != self.buffer_size {
            warn!("buffer {index} does not belong to pool {}", self.id);
            return Err(UsageError::ForeignBuffer.into());
        }

        let slot = self.ring.get(index);
        if !slot.is(BufferState::Ready) || slot.lease() != id.lease {
            warn!(
                "buffer {index} lease {} not held by application (state {:?}, lease {})",
                id.lease,
                slot.state(),
                slot.lease()
            );
            return Err(UsageError::NotOwned.into());
        }
        Ok(index)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn spare(size: usize) -> Box<[u8]> {
        vec![0u8; size].into_boxed_slice()
    }

    #[test]
    fn new_pool_is_all_free() {
        let pool = BufferPool::new(4, 128);
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.buffer_size(), 128);
        assert_eq!(pool.counts(), PoolCounts { free: 4, in_flight: 0, ready: 0 });
    }

    #[test]
    fn acquire_for_hardware_is_round_robin() {
        let mut pool = BufferPool::new(4, 16);
        let order: Vec<usize> = (0..4).map(|_| pool.acquire_for_hardware().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn acquire_for_hardware_exhausted_is_backpressure() {
        let mut pool = BufferPool::new(2, 16);
        pool.acquire_for_hardware().unwrap();
        pool.acquire_for_hardware().unwrap();
        let err = pool.acquire_for_hardware().unwrap_err();
        assert_eq!(err, Error::Dma(DmaError::PoolExhausted));
        assert!(err.is_backpressure());
    }

    #[test]
    fn round_robin_skips_busy_slots() {
        let mut pool = BufferPool::new(4, 16);
        for _ in 0..4 {
            pool.acquire_for_hardware().unwrap();
        }
        // Slot 1 comes back first, then slot 3
        pool.reclaim(1).unwrap();
        pool.reclaim(3).unwrap();
        // Cursor sits at 0 after wrapping; the first free slot from there is 1
        assert_eq!(pool.acquire_for_hardware().unwrap(), 1);
        assert_eq!(pool.acquire_for_hardware().unwrap(), 3);
    }

    #[test]
    fn deliver_then_release_returns_to_free() {
        let mut pool = BufferPool::new(2, 32);
        let idx = pool.acquire_for_hardware().unwrap();
        let (id, data) = pool.deliver(idx).unwrap();
        assert_eq!(id.index(), idx);
        assert_eq!(pool.state(idx), Some(BufferState::Ready));

        pool.release_to_hardware(id, data).unwrap();
        assert_eq!(pool.state(idx), Some(BufferState::Free));
    }

    #[test]
    fn deliver_requires_in_flight() {
        let mut pool = BufferPool::new(2, 32);
        assert_eq!(pool.deliver(0).unwrap_err(), Error::Dma(DmaError::NotInFlight));
    }

    #[test]
    fn double_release_is_usage_error() {
        let mut pool = BufferPool::new(2, 32);
        let idx = pool.acquire_for_hardware().unwrap();
        let (id, data) = pool.deliver(idx).unwrap();
        pool.release_to_hardware(id, data).unwrap();

        let err = pool.release_to_hardware(id, spare(32)).unwrap_err();
        assert_eq!(err, Error::Usage(UsageError::NotOwned));
        assert_eq!(pool.counts().total(), 2);
    }

    #[test]
    fn stale_lease_is_rejected_after_reacquire() {
        let mut pool = BufferPool::new(1, 8);
        let idx = pool.acquire_for_hardware().unwrap();
        let (old, data) = pool.deliver(idx).unwrap();
        pool.release_to_hardware(old, data).unwrap();

        let idx = pool.acquire_for_hardware().unwrap();
        let (fresh, data) = pool.deliver(idx).unwrap();
        assert_ne!(old.lease(), fresh.lease());

        let err = pool.release_to_hardware(old, spare(8)).unwrap_err();
        assert_eq!(err, Error::Usage(UsageError::NotOwned));
        pool.release_to_hardware(fresh, data).unwrap();
    }

    #[test]
    fn foreign_pool_handle_is_rejected() {
        let mut a = BufferPool::new(1, 8);
        let mut b = BufferPool::new(1, 8);
        let idx = a.acquire_for_hardware().unwrap();
        let (id, data) = a.deliver(idx).unwrap();
        b.acquire_for_hardware().unwrap();

        let err = b.release_to_hardware(id, data).unwrap_err();
        assert_eq!(err, Error::Usage(UsageError::ForeignBuffer));
    }

    #[test]
    fn tx_path_acquire_submit_reclaim() {
        let mut pool = BufferPool::new(2, 16);
        let (id, mut data) = pool.acquire_for_app().unwrap();
        data[0] = 7;
        let idx = pool.submit(id, data).unwrap();
        assert_eq!(pool.state(idx), Some(BufferState::InFlight));
        assert_eq!(pool.with_data(idx, |d| d[0]).unwrap(), 7);

        pool.reclaim(idx).unwrap();
        assert_eq!(pool.counts().free, 2);
    }

    #[test]
    fn acquire_for_app_exhausts() {
        let mut pool = BufferPool::new(1, 16);
        let _held = pool.acquire_for_app().unwrap();
        assert_eq!(
            pool.acquire_for_app().unwrap_err(),
            Error::Dma(DmaError::PoolExhausted)
        );
    }

    #[test]
    fn abandon_in_flight_frees_only_hardware_slots() {
        let mut pool = BufferPool::new(4, 16);
        pool.acquire_for_hardware().unwrap();
        pool.acquire_for_hardware().unwrap();
        let idx = pool.acquire_for_hardware().unwrap();
        let _held = pool.deliver(idx).unwrap();

        assert_eq!(pool.abandon_in_flight(), 2);
        assert_eq!(pool.counts(), PoolCounts { free: 3, in_flight: 0, ready: 1 });
    }

    #[test]
    fn with_data_mut_requires_in_flight() {
        let mut pool = BufferPool::new(1, 4);
        assert!(pool.with_data_mut(0, |d| d[0] = 1).is_err());
        let idx = pool.acquire_for_hardware().unwrap();
        pool.with_data_mut(idx, |d| d[0] = 1).unwrap();
        let (_id, data) = pool.deliver(idx).unwrap();
        assert_eq!(data[0], 1);
    }

    #[test]
    fn counts_are_conserved_through_every_transition() {
        let mut pool = BufferPool::new(3, 8);
        let check = |pool: &BufferPool| assert_eq!(pool.counts().total(), 3);

        let a = pool.acquire_for_hardware().unwrap();
        check(&pool);
        let (id_a, data_a) = pool.deliver(a).unwrap();
        check(&pool);
        let (id_b, data_b) = pool.acquire_for_app().unwrap();
        check(&pool);
        let b = pool.submit(id_b, data_b).unwrap();
        check(&pool);
        pool.reclaim(b).unwrap();
        check(&pool);
        pool.release_to_hardware(id_a, data_a).unwrap();
        check(&pool);
        pool.acquire_for_hardware().unwrap();
        pool.abandon_in_flight();
        check(&pool);
    }
}
