//! Circular ring of buffer slots with a wrapping cursor.

/// Fixed-length slot ring. The length is set once at construction.
pub(crate) struct SlotRing<D> {
    /// Slots, never resized after construction
    pub(super) slots: Box<[D]>,
    /// Round-robin cursor
    pub(super) current: usize,
}

impl<D> SlotRing<D> {
    /// Create a ring of `len` slots built by `make`
    pub fn from_fn(len: usize, make: impl FnMut(usize) -> D) -> Self {
        Self {
            slots: (0..len).map(make).collect(),
            current: 0,
        }
    }

    /// Number of slots in the ring
    #[inline(always)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Current cursor position
    #[cfg(test)]
    #[inline(always)]
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Move the cursor just past `index`
    #[inline(always)]
    pub fn advance_past(&mut self, index: usize) {
        self.current = (index + 1) % self.len();
    }

    /// Slot at `index`, wrapping
    #[inline(always)]
    pub fn get(&self, index: usize) -> &D {
        &self.slots[index % self.len()]
    }

    /// Mutable slot at `index`, wrapping
    #[inline(always)]
    pub fn get_mut(&mut self, index: usize) -> &mut D {
        let len = self.len();
        &mut self.slots[index % len]
    }

    /// Index of the slot `offset` positions after the cursor
    #[inline(always)]
    pub fn index_at_offset(&self, offset: usize) -> usize {
        (self.current + offset) % self.len()
    }

    /// First index at or after the cursor whose slot satisfies `pred`
    pub fn find_from_cursor(&self, mut pred: impl FnMut(&D) -> bool) -> Option<usize> {
        (0..self.len())
            .map(|offset| self.index_at_offset(offset))
            .find(|&idx| pred(&self.slots[idx]))
    }

    /// Iterate over all slots
    pub fn iter(&self) -> impl Iterator<Item = &D> {
        self.slots.iter()
    }

    /// Iterate mutably over all slots
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut D> {
        self.slots.iter_mut()
    }
}

// =============================================================================
// Tests
// =============================================================================
