//! TX streaming state machine
//!
//! The application takes a free buffer with `get_free`, fills it, and posts
//! it with the timestamp its first sample should leave the antenna. Posted
//! buffers queue FIFO for the transport, which picks them up through its
//! [`TxPort`] and completes them once transmitted.
//!
//! A post whose timestamp is already behind the hardware output position by
//! more than the transport's slack is still submitted. The lag is recorded
//! and shows up as [`TxBlock::lateness`] on the next `get_free`, so the
//! producer can re-pace or resynchronize.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};

use crate::driver::config::{Channel, FrontEnd, PoolGeometry, WaitMode};
use crate::error::{DmaError, Result, UsageError};
use crate::internal::dma::{BufferId, BufferPool, PoolCounts};
use crate::sync::Waitable;
use crate::timestamp::WtsLong;

/// IQ pair size assumed until a start request selects a format
const DEFAULT_IQ_BYTES: usize = 4;

/// Lifecycle state of a TX channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxState {
    /// No pool, transport not prepared
    Uninitialized,
    /// Pool allocated; posts queue but nothing is transmitted
    Initialized,
    /// Hardware transmitting queued buffers at their timestamps
    Streaming,
}

/// A free buffer owned by the application until posted
#[derive(Debug)]
pub struct TxBlock {
    id: BufferId,
    chan: Channel,
    data: Box<[u8]>,
    lateness: u32,
}

impl TxBlock {
    /// Whole buffer, for filling
    #[inline(always)]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Whole buffer
    #[inline(always)]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Samples the previous post was behind the output position, 0 if it
    /// was within the late slack. Past the slack the full lag is reported,
    /// not just the excess.
    #[inline(always)]
    pub fn lateness(&self) -> u32 {
        self.lateness
    }

    /// Channel the buffer belongs to
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

/// A posted buffer as seen by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxPending {
    /// Pool slot holding the payload
    pub index: usize,
    /// Transmit time of the first sample
    pub wts: WtsLong,
    /// Number of samples
    pub samples: u32,
    /// Payload bytes
    pub bytes: usize,
}

/// Counters for one TX channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxStats {
    /// Buffers accepted by `post`
    pub posted: u64,
    /// Posts that were behind the output position beyond the slack
    pub late_posts: u64,
    /// Lateness of the most recent post
    pub last_lateness: u32,
    /// Worst lateness seen
    pub max_lateness: u32,
    /// Buffers the transport reported transmitted
    pub completed: u64,
    /// Pool ownership snapshot
    pub pool: PoolCounts,
}

// =============================================================================
// Shared Channel State
// =============================================================================

struct TxInner {
    state: TxState,
    closing: bool,
    pool: BufferPool,
    pending: VecDeque<TxPending>,
    late_slack: u32,
    iq_bytes: usize,
    stats: TxStats,
}

impl TxInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closing {
            Err(DmaError::ChannelClosing.into())
        } else {
            Ok(())
        }
    }

    /// Full lag of `target` behind `now` once it exceeds the slack, else 0
    fn lateness(&self, target: WtsLong, now: WtsLong) -> u32 {
        let lag = now.distance(target);
        if lag > i64::from(self.late_slack) {
            u32::try_from(lag).unwrap_or(u32::MAX)
        } else {
            0
        }
    }
}

struct TxShared {
    chan: Channel,
    cell: Waitable<TxInner>,
}

// =============================================================================
// Hardware Side
// =============================================================================

/// Submission port handed to the transport at init
#[derive(Clone)]
pub struct TxPort {
    shared: Arc<TxShared>,
}

impl TxPort {
    /// Channel this port drains
    pub fn channel(&self) -> Channel {
        self.shared.chan
    }

    /// `true` once the channel is being torn down
    pub fn is_closing(&self) -> bool {
        self.shared.cell.with(|inner| inner.closing)
    }

    /// Oldest posted buffer not yet taken by the transport
    pub fn pop_pending(&self) -> Option<TxPending> {
        self.shared.cell.with(|inner| {
            if inner.closing {
                None
            } else {
                inner.pending.pop_front()
            }
        })
    }

    /// Read a taken buffer's payload
    pub fn with_data<R>(&self, index: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.shared.cell.with(|inner| {
            inner.ensure_open()?;
            inner.pool.with_data(index, f)
        })
    }

    /// The buffer was transmitted; it becomes free again
    pub fn complete(&self, index: usize) -> Result<()> {
        self.shared.cell.with(|inner| {
            inner.ensure_open()?;
            inner.pool.reclaim(index)?;
            inner.stats.completed += 1;
            Ok::<_, crate::error::Error>(())
        })?;
        self.shared.cell.notify_all();
        Ok(())
    }

    /// Take every pending buffer, hand its payload to `sink` and complete
    /// it; returns how many were drained
    pub fn drain(&self, mut sink: impl FnMut(&TxPending, &[u8])) -> Result<usize> {
        let mut drained = 0;
        while let Some(pending) = self.pop_pending() {
            self.with_data(pending.index, |data| sink(&pending, &data[..pending.bytes]))?;
            self.complete(pending.index)?;
            drained += 1;
        }
        Ok(drained)
    }
}

// =============================================================================
// Application Side
// =============================================================================

/// Application handle of one TX channel
#[derive(Clone)]
pub(crate) struct TxChannel {
    shared: Arc<TxShared>,
}

impl TxChannel {
    pub fn new(chan: Channel, geometry: PoolGeometry) -> Self {
        let inner = TxInner {
            state: TxState::Initialized,
            closing: false,
            pool: BufferPool::new(geometry.buffers, geometry.buffer_size),
            pending: VecDeque::with_capacity(geometry.buffers),
            late_slack: geometry.late_slack,
            iq_bytes: DEFAULT_IQ_BYTES,
            stats: TxStats::default(),
        };
        debug!(
            "{chan}: tx pool {} x {} bytes, slack {}",
            geometry.buffers, geometry.buffer_size, geometry.late_slack
        );
        Self {
            shared: Arc::new(TxShared {
                chan,
                cell: Waitable::new(inner),
            }),
        }
    }

    pub fn port(&self) -> TxPort {
        TxPort {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> TxState {
        self.shared.cell.with(|inner| inner.state)
    }

    /// Free buffer for the application, waiting per `wait`
    pub fn get_free(&self, wait: WaitMode) -> Result<TxBlock> {
        let chan = self.shared.chan;
        self.shared.cell.wait_until(wait, |inner| {
            if let Err(e) = inner.ensure_open() {
                return Some(Err(e));
            }
            match inner.pool.acquire_for_app() {
                Ok((id, data)) => Some(Ok(TxBlock {
                    id,
                    chan,
                    data,
                    lateness: inner.stats.last_lateness,
                })),
                Err(e) if e.is_backpressure() => None,
                Err(e) => Some(Err(e)),
            }
        })
    }

    /// Queue `block` for transmission at `target`.
    ///
    /// `now` is the hardware output position sampled by the caller just
    /// before posting. On a validation error the buffer goes back to the
    /// free list.
    pub fn post(&self, block: TxBlock, target: WtsLong, samples: u32, now: WtsLong) -> Result<()> {
        let chan = self.shared.chan;
        let posted: Result<()> = self.shared.cell.with(|inner| {
            inner.ensure_open()?;

            let bytes = samples as usize * inner.iq_bytes;
            let invalid = if samples == 0 {
                Some(UsageError::ZeroSamples)
            } else if bytes > block.data.len() {
                Some(UsageError::PayloadTooLarge)
            } else {
                None
            };
            if let Some(e) = invalid {
                inner.pool.release_to_hardware(block.id, block.data)?;
                return Err(e.into());
            }

            let lateness = inner.lateness(target, now);
            let index = inner.pool.submit(block.id, block.data)?;
            inner.pending.push_back(TxPending {
                index,
                wts: target,
                samples,
                bytes,
            });

            inner.stats.posted += 1;
            inner.stats.last_lateness = lateness;
            if lateness > 0 {
                inner.stats.late_posts += 1;
                inner.stats.max_lateness = inner.stats.max_lateness.max(lateness);
                warn!("{chan}: post at {target} is {lateness} samples late (now {now})");
            }
            Ok(())
        });
        if posted.is_err() {
            // A refused buffer went back to the free list
            self.shared.cell.notify_all();
        }
        posted
    }

    /// Return an unposted block to the free list
    pub fn discard(&self, block: TxBlock) -> Result<()> {
        self.shared
            .cell
            .with(|inner| inner.pool.release_to_hardware(block.id, block.data))?;
        self.shared.cell.notify_all();
        Ok(())
    }

    /// Hardware starts transmitting in `format`
    pub fn on_start(&self, format: FrontEnd) -> Result<()> {
        let chan = self.shared.chan;
        self.shared.cell.with(|inner| {
            inner.ensure_open()?;
            if let Some(iq_bytes) = format.iq_bytes() {
                inner.iq_bytes = iq_bytes;
            }
            inner.state = TxState::Streaming;
            debug!("{chan}: tx streaming, {} bytes per sample", inner.iq_bytes);
            Ok(())
        })
    }

    pub fn on_stop(&self) {
        self.shared.cell.with(|inner| {
            if !inner.closing {
                inner.state = TxState::Initialized;
            }
        });
    }

    /// Abort queued and in-flight buffers and wake every waiter
    pub fn close(&self) -> usize {
        let chan = self.shared.chan;
        let aborted = self.shared.cell.with(|inner| {
            if inner.closing {
                return 0;
            }
            inner.closing = true;
            inner.state = TxState::Uninitialized;
            inner.pending.clear();
            inner.pool.abandon_in_flight()
        });
        self.shared.cell.notify_all();
        debug!("{chan}: tx closed, {aborted} buffers aborted");
        aborted
    }

    pub fn stats(&self) -> TxStats {
        self.shared.cell.with(|inner| TxStats {
            pool: inner.pool.counts(),
            ..inner.stats
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
