//! Internal Implementation Details
//!
//! Types in this module are not part of the public API, apart from the few
//! DMA handle types re-exported at the crate root.
//!
//! # Contents
//!
//! - [`dma`]: buffer slots, slot ring and the buffer pool
//! - [`control_regs`]: per-revision control register maps

pub(crate) mod control_regs;
pub(crate) mod dma;
