//! RX streaming state machine
//!
//! One [`RxChannel`] per initialized RX channel. The transport fills buffers
//! through the [`RxPort`] it received at init; the application drains them in
//! completion order with `get_next` and hands them back with `release`.
//!
//! ```text
//!   Uninitialized ──init──▶ Initialized ──start──▶ Streaming ◀──resume_at──┐
//!         ▲                      ▲                  │      │               │
//!         │                      └──────stop────────┘      └──overrun──▶ Paused
//!         └──────────────────────────deinit (from any state)
//! ```
//!
//! Buffers queued for the application stay `InFlight` in the pool until
//! `get_next` lends them out, so a deinit or a resume can take them back
//! without involving the consumer.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};

use crate::driver::config::{Channel, PoolGeometry, WaitMode};
use crate::error::{DmaError, Result, UsageError};
use crate::internal::dma::{BufferId, BufferPool, BufferState, PoolCounts};
use crate::sync::Waitable;
use crate::timestamp::{Wts32, WtsExtender, WtsLong};

// =============================================================================
// Public Types
// =============================================================================

/// Lifecycle state of an RX channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxState {
    /// No pool, transport not prepared
    Uninitialized,
    /// Pool allocated, hardware not capturing
    Initialized,
    /// Hardware capturing into the pool
    Streaming,
    /// Hardware ran out of free buffers; waiting for `resume_at`
    Paused,
}

/// What the transport reports when it finishes filling a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Completion {
    /// Timestamp of the first sample in the buffer
    pub wts: WtsLong,
    /// Number of samples in the buffer
    pub samples: u32,
    /// Valid payload bytes, `None` for the whole buffer
    pub bytes: Option<usize>,
    /// Hardware dropped samples before this buffer
    pub overrun: bool,
}

impl Completion {
    /// Completion covering the whole buffer, no overrun
    #[must_use]
    pub const fn new(wts: WtsLong, samples: u32) -> Self {
        Self {
            wts,
            samples,
            bytes: None,
            overrun: false,
        }
    }

    /// Mark that hardware lost samples before this buffer
    #[must_use]
    pub const fn with_overrun(mut self, overrun: bool) -> Self {
        self.overrun = overrun;
        self
    }

    /// Limit the payload to `bytes`
    #[must_use]
    pub const fn with_bytes(mut self, bytes: usize) -> Self {
        self.bytes = Some(bytes);
        self
    }
}

/// Timeline status of a delivered buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxStatus {
    /// Samples are missing between the previous buffer and this one
    pub discontinuity: bool,
    /// Number of missing samples, 0 if unknown (overrun without gap)
    pub gap_samples: u64,
}

/// A filled buffer owned by the application until released
#[derive(Debug)]
pub struct RxBlock {
    id: BufferId,
    chan: Channel,
    data: Box<[u8]>,
    len: usize,
    wts: WtsLong,
    samples: u32,
    status: RxStatus,
}

impl RxBlock {
    /// Valid payload bytes
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Timestamp of the first sample
    #[inline(always)]
    pub fn wts(&self) -> WtsLong {
        self.wts
    }

    /// Number of samples
    #[inline(always)]
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Timestamp one past the last sample
    pub fn end(&self) -> WtsLong {
        self.wts.wrapping_add(u64::from(self.samples))
    }

    /// Discontinuity information
    #[inline(always)]
    pub fn status(&self) -> RxStatus {
        self.status
    }

    /// Channel the buffer came from
    #[inline(always)]
    pub fn channel(&self) -> Channel {
        self.chan
    }

    /// Pool handle of the buffer
    #[inline(always)]
    pub fn id(&self) -> BufferId {
        self.id
    }
}

/// Counters for one RX channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxStats {
    /// Times hardware found no free buffer
    pub overruns: u64,
    /// Buffers delivered with the discontinuity flag
    pub gaps: u64,
    /// Buffers recycled by `resume_at` or the start floor
    pub stale_drops: u64,
    /// Completions refused because they were not after the previous one
    pub rejected: u64,
    /// Buffers handed to the application
    pub delivered: u64,
    /// Pool ownership snapshot
    pub pool: PoolCounts,
}

// =============================================================================
// Shared Channel State
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Queued {
    index: usize,
    wts: WtsLong,
    samples: u32,
    bytes: usize,
    overrun: bool,
}

struct RxInner {
    state: RxState,
    closing: bool,
    pool: BufferPool,
    queue: VecDeque<Queued>,
    extender: WtsExtender,
    /// Start of the newest queued completion
    last_queued: Option<WtsLong>,
    /// Where the next delivered buffer should start for a gapless timeline
    expected: Option<WtsLong>,
    /// Completions starting before this are recycled
    floor: Option<WtsLong>,
    overrun_pending: bool,
    stats: RxStats,
}

impl RxInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closing {
            Err(DmaError::ChannelClosing.into())
        } else {
            Ok(())
        }
    }

    /// Recycle queued buffers that start before `target`; returns the count
    fn discard_before(&mut self, target: WtsLong) -> u64 {
        let mut dropped = 0;
        let pool = &mut self.pool;
        self.queue.retain(|q| {
            if q.wts.is_before(target) {
                // Queued slots are in flight by construction
                let _ = pool.reclaim(q.index);
                dropped += 1;
                false
            } else {
                true
            }
        });
        self.last_queued = self.queue.back().map(|q| q.wts);
        self.stats.stale_drops += dropped;
        dropped
    }

    fn accept(&mut self, chan: Channel, index: usize, done: Completion) -> Result<()> {
        self.ensure_open()?;
        if self.pool.state(index) != Some(BufferState::InFlight) {
            return Err(DmaError::NotInFlight.into());
        }

        if done.samples == 0 {
            self.pool.reclaim(index)?;
            return Err(UsageError::ZeroSamples.into());
        }

        if let Some(floor) = self.floor {
            if done.wts.is_before(floor) {
                debug!("{chan}: recycling stale buffer at {} (floor {floor})", done.wts);
                self.pool.reclaim(index)?;
                self.stats.stale_drops += 1;
                return Ok(());
            }
            self.floor = None;
        }

        if let Some(last) = self.last_queued
            && !done.wts.is_after(last)
        {
            warn!("{chan}: completion at {} not after {last}, recycled", done.wts);
            self.pool.reclaim(index)?;
            self.stats.rejected += 1;
            return Err(DmaError::OutOfOrder.into());
        }

        let capacity = self.pool.buffer_size();
        self.queue.push_back(Queued {
            index,
            wts: done.wts,
            samples: done.samples,
            bytes: done.bytes.map_or(capacity, |b| b.min(capacity)),
            overrun: done.overrun || core::mem::take(&mut self.overrun_pending),
        });
        self.last_queued = Some(done.wts);
        if self.extender.current().is_none_or(|seen| done.wts.is_after(seen)) {
            self.extender.seed(done.wts);
        }
        Ok(())
    }

    fn take_next(&mut self, chan: Channel) -> Option<Result<RxBlock>> {
        let queued = self.queue.pop_front()?;
        let (id, data) = match self.pool.deliver(queued.index) {
            Ok(lent) => lent,
            Err(e) => return Some(Err(e)),
        };

        let gap = self
            .expected
            .map_or(0, |expected| queued.wts.distance(expected).max(0).unsigned_abs());
        let status = RxStatus {
            discontinuity: gap > 0 || queued.overrun,
            gap_samples: gap,
        };
        if status.discontinuity {
            self.stats.gaps += 1;
            warn!(
                "{chan}: discontinuity before {} ({} samples missing, overrun {})",
                queued.wts, gap, queued.overrun
            );
        }

        self.expected = Some(queued.wts.wrapping_add(u64::from(queued.samples)));
        self.stats.delivered += 1;

        Some(Ok(RxBlock {
            id,
            chan,
            data,
            len: queued.bytes,
            wts: queued.wts,
            samples: queued.samples,
            status,
        }))
    }
}

struct RxShared {
    chan: Channel,
    cell: Waitable<RxInner>,
}

// =============================================================================
// Hardware Side
// =============================================================================

/// Completion port handed to the transport at init
///
/// Cloning is cheap; every clone refers to the same channel. After the
/// channel is deinitialized every call fails with `DmaError::ChannelClosing`.
#[derive(Clone)]
pub struct RxPort {
    shared: Arc<RxShared>,
}

impl RxPort {
    /// Channel this port feeds
    pub fn channel(&self) -> Channel {
        self.shared.chan
    }

    /// `true` once the channel is being torn down
    pub fn is_closing(&self) -> bool {
        self.shared.cell.with(|inner| inner.closing)
    }

    /// Take the next free buffer to fill.
    ///
    /// Exhaustion while streaming is an overrun: the channel moves to
    /// `Paused`, and the next completed buffer is flagged as discontinuous.
    pub fn acquire(&self) -> Result<usize> {
        let chan = self.shared.chan;
        self.shared.cell.with(|inner| {
            inner.ensure_open()?;
            match inner.pool.acquire_for_hardware() {
                Ok(index) => Ok(index),
                Err(e) => {
                    if inner.state == RxState::Streaming {
                        warn!("{chan}: overrun, no free buffer");
                        inner.state = RxState::Paused;
                        inner.stats.overruns += 1;
                        inner.overrun_pending = true;
                    }
                    Err(e)
                }
            }
        })
    }

    /// Write into a buffer the transport holds
    pub fn fill<R>(&self, index: usize, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.shared.cell.with(|inner| {
            inner.ensure_open()?;
            inner.pool.with_data_mut(index, f)
        })
    }

    /// Queue a filled buffer for the application.
    ///
    /// A completion starting before the resume floor is recycled silently. A
    /// completion that does not start after the previous one is recycled and
    /// reported as `DmaError::OutOfOrder`.
    pub fn complete(&self, index: usize, done: Completion) -> Result<()> {
        let chan = self.shared.chan;
        self.shared.cell.with(|inner| inner.accept(chan, index, done))?;
        self.shared.cell.notify_all();
        Ok(())
    }

    /// Like [`RxPort::complete`] with a raw 32-bit hardware stamp, extended
    /// against the channel's timeline
    pub fn complete_raw(&self, index: usize, wts: Wts32, samples: u32, overrun: bool) -> Result<()> {
        let chan = self.shared.chan;
        self.shared.cell.with(|inner| {
            let mut extender = inner.extender;
            let done = Completion::new(extender.observe(wts), samples).with_overrun(overrun);
            inner.accept(chan, index, done)
        })?;
        self.shared.cell.notify_all();
        Ok(())
    }

    /// Give a buffer back without delivering it (transfer error)
    pub fn abandon(&self, index: usize) -> Result<()> {
        self.shared.cell.with(|inner| inner.pool.reclaim(index))?;
        self.shared.cell.notify_all();
        Ok(())
    }
}

// =============================================================================
// Application Side
// =============================================================================

/// Application handle of one RX channel
#[derive(Clone)]
pub(crate) struct RxChannel {
    shared: Arc<RxShared>,
}

impl RxChannel {
    /// Allocate the pool; the channel starts `Initialized`
    pub fn new(chan: Channel, geometry: PoolGeometry) -> Self {
        let inner = RxInner {
            state: RxState::Initialized,
            closing: false,
            pool: BufferPool::new(geometry.buffers, geometry.buffer_size),
            queue: VecDeque::with_capacity(geometry.buffers),
            extender: WtsExtender::new(),
            last_queued: None,
            expected: None,
            floor: None,
            overrun_pending: false,
            stats: RxStats::default(),
        };
        debug!(
            "{chan}: rx pool {} x {} bytes",
            geometry.buffers, geometry.buffer_size
        );
        Self {
            shared: Arc::new(RxShared {
                chan,
                cell: Waitable::new(inner),
            }),
        }
    }

    /// Port for the transport
    pub fn port(&self) -> RxPort {
        RxPort {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> RxState {
        self.shared.cell.with(|inner| inner.state)
    }

    /// Oldest completed buffer, waiting per `wait`
    pub fn get_next(&self, wait: WaitMode) -> Result<RxBlock> {
        let chan = self.shared.chan;
        self.shared.cell.wait_until(wait, |inner| {
            if let Err(e) = inner.ensure_open() {
                return Some(Err(e));
            }
            inner.take_next(chan)
        })
    }

    /// Return a delivered buffer to the free list
    pub fn release(&self, block: RxBlock) -> Result<()> {
        self.shared
            .cell
            .with(|inner| inner.pool.release_to_hardware(block.id, block.data))?;
        self.shared.cell.notify_all();
        Ok(())
    }

    /// Drop stale queued data and install the floor at `target`.
    ///
    /// The caller tells the transport afterwards; completions racing with
    /// that call are filtered by the floor.
    pub fn prepare_resume(&self, target: WtsLong) -> Result<()> {
        let chan = self.shared.chan;
        self.shared.cell.with(|inner| {
            inner.ensure_open()?;
            let dropped = inner.discard_before(target);
            inner.floor = Some(target);
            inner.expected = Some(target);
            inner.overrun_pending = false;
            if inner.state == RxState::Paused {
                inner.state = RxState::Streaming;
            }
            debug!("{chan}: resume at {target}, {dropped} stale buffers dropped");
            Ok(())
        })
    }

    /// Hardware was told to start capturing at `start`
    pub fn on_start(&self, start: WtsLong) -> Result<()> {
        let chan = self.shared.chan;
        self.shared.cell.with(|inner| {
            inner.ensure_open()?;
            inner.discard_before(start);
            inner.floor = Some(start);
            inner.expected = Some(start);
            inner.overrun_pending = false;
            inner.extender.seed(start);
            inner.state = RxState::Streaming;
            debug!("{chan}: rx streaming from {start}");
            Ok(())
        })
    }

    /// Hardware was told to stop capturing; queued data stays deliverable
    pub fn on_stop(&self) {
        self.shared.cell.with(|inner| {
            if !inner.closing {
                inner.state = RxState::Initialized;
            }
        });
    }

    /// Abandon in-flight buffers and wake every waiter with
    /// `DmaError::ChannelClosing`; returns how many buffers were abandoned
    pub fn close(&self) -> usize {
        let chan = self.shared.chan;
        let abandoned = self.shared.cell.with(|inner| {
            if inner.closing {
                return 0;
            }
            inner.closing = true;
            inner.state = RxState::Uninitialized;
            inner.queue.clear();
            inner.pool.abandon_in_flight()
        });
        self.shared.cell.notify_all();
        debug!("{chan}: rx closed, {abandoned} buffers abandoned");
        abandoned
    }

    pub fn stats(&self) -> RxStats {
        self.shared.cell.with(|inner| RxStats {
            pool: inner.pool.counts(),
            ..inner.stats
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
