//! Buffer slot: one DMA buffer plus its ownership state.

/// Who owns a buffer right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferState {
    /// Unused, eligible for the next acquisition
    Free,
    /// Owned by hardware (being filled for RX, drained for TX)
    InFlight,
    /// Owned by the application
    Ready,
}

/// One pool entry
///
/// The payload is present while the slot is `Free` or `InFlight` and lent
/// out (`None`) while `Ready`.
pub(crate) struct Slot {
    state: BufferState,
    data: Option<Box<[u8]>>,
    /// Bumped every time the slot is handed to the application
    lease: u32,
}

impl Slot {
    /// Allocate a free slot with a zeroed buffer of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            state: BufferState::Free,
            data: Some(vec![0u8; size].into_boxed_slice()),
            lease: 0,
        }
    }

    #[inline(always)]
    pub fn state(&self) -> BufferState {
        self.state
    }

    #[inline(always)]
    pub fn is(&self, state: BufferState) -> bool {
        self.state == state
    }

    #[inline(always)]
    pub fn lease(&self) -> u32 {
        self.lease
    }

    /// Hardware takes the slot
    pub fn mark_in_flight(&mut self) {
        self.state = BufferState::InFlight;
    }

    /// Slot returns to the free list
    pub fn mark_free(&mut self) {
        self.state = BufferState::Free;
    }

    /// Lend the payload to the application and open a new lease
    pub fn lend(&mut self) -> Option<Box<[u8]>> {
        let data = self.data.take()?;
        self.state = BufferState::Ready;
        self.lease = self.lease.wrapping_add(1);
        Some(data)
    }

    /// Take the payload back from the application
    pub fn restore(&mut self, data: Box<[u8]>) {
        self.data = Some(data);
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        self.data.as_deref_mut()
    }
}
