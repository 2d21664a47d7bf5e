//! Two-tier user-space memory allocator over a caller-supplied byte region.
//!
//! The region is carved into fixed-size pages tracked by an in-region
//! [`Bitmap`]; variable-sized requests are served by a segregated-fits
//! object allocator layered on top of the page pool. See [`mm`] for the
//! public allocation surface.
//!
//! [`Bitmap`]: crate::util::bitmap::Bitmap
//! [`mm`]: crate::mm

#[macro_use]
mod macros;

pub mod mm;
pub mod util;

pub use mm::{Heap, Pool, PoolError, PAGE_ORDER, PAGE_SIZE};
