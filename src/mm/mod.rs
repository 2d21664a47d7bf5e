//! Memory management over a caller-supplied region.
//!
//! Two allocation tiers are composed. The *page pool* ([`page`]) carves the
//! region into [`PAGE_SIZE`] pages, tracks their occupancy with an in-region
//! bitmap and hands out runs of contiguous pages. The *object allocator*
//! ([`slab`]) sits on top and serves byte-sized requests from per-size-class
//! arenas, falling back to whole page runs for oversize requests.
//!
//! The allocator state is an explicit single-owner [`Heap`] handle. For hosts
//! that want process-wide entry points, this module keeps one `Heap` in a
//! private static and mirrors the handle methods as free functions:
//!
//! | Entry point | Description |
//! | ----------- | ----------- |
//! | [`init`] | Adopt the region `[start_addr, end_addr)` as the process pool |
//! | [`declare_size_class`] | Register an exact-match size class |
//! | [`allocate`] | Obtain a block of at least `n` bytes |
//! | [`free`] | Return a block obtained from [`allocate`] |
//! | [`reserve_pages`] | Obtain a run of contiguous raw pages |
//! | [`release_pages`] | Return a page run obtained from [`reserve_pages`] |
//!
//! # Safety
//!
//! Nothing here is synchronized. The pool is single-threaded by contract: no
//! two operations may run concurrently on the same pool, which for the global
//! entry points means one thread only. Callers that need sharing must wrap
//! the entry points in a mutex of their own; every operation is short and
//! non-blocking, so a coarse lock suffices.

pub mod page;
pub mod slab;

// Re-export
pub use page::Pool;
pub use slab::Heap;

use core::ptr::{addr_of_mut, null_mut};

use crate::util::align::{align_down, get_order};

/// Order of page-size.
pub const PAGE_ORDER: usize = 12;
/// Page size.
pub const PAGE_SIZE: usize = 1 << PAGE_ORDER;

sa::const_assert!(PAGE_SIZE.is_power_of_two());

/// Byte offset of `addr` within its page.
#[inline(always)]
pub const fn pg_ofs(addr: usize) -> usize {
    addr & (PAGE_SIZE - 1)
}

/// Page number of `addr`.
#[inline(always)]
pub const fn pg_no(addr: usize) -> usize {
    addr >> PAGE_ORDER
}

/// Round `addr` down to the nearest page boundary.
#[inline(always)]
pub const fn pg_round_down(addr: usize) -> usize {
    align_down(addr, get_order(PAGE_SIZE))
}

/// Errors reported by pool construction and size-class registration.
///
/// Out-of-memory is deliberately not in this list: allocation failure is an
/// expected outcome and is reported as a null pointer, not an error value.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("region start {start:#x} is not below region end {end:#x}")]
    BadRegion { start: usize, end: usize },

    #[error("region of {page_cnt} pages cannot hold its own bitmap ({bitmap_pages} pages)")]
    RegionTooSmall {
        page_cnt: usize,
        bitmap_pages: usize,
    },

    #[error("size class {size} out of range (expected {min} <= size < {limit})")]
    SizeClassOutOfRange {
        size: usize,
        min: usize,
        limit: usize,
    },

    #[error("size class {0} is already present")]
    DuplicateSizeClass(usize),

    #[error("size class table is full ({cap} entries)")]
    SizeClassTableFull { cap: usize },
}

/// The process-wide pool behind the module-level entry points.
static mut MEM_HEAP: Option<Heap> = None;

#[inline(always)]
unsafe fn heap_mut() -> &'static mut Option<Heap> {
    &mut *addr_of_mut!(MEM_HEAP)
}

/// Initialize the process-wide pool over `[start_addr, end_addr)`.
///
/// Both addresses must be page-aligned and `start_addr < end_addr`. On
/// failure a diagnostic is logged and any previously initialized pool is left
/// untouched.
///
/// # Safety
///
/// The region must be valid for reads and writes for the life of the process
/// and not accessed except through the allocator afterwards. Single-threaded
/// contract: see the module docs.
pub unsafe fn init(start_addr: usize, end_addr: usize) {
    if let Ok(heap) = Heap::new(start_addr, end_addr) {
        *heap_mut() = Some(heap);
    }
}

/// Register a supplementary exact-match size class on the process-wide pool.
///
/// # Safety
///
/// Single-threaded contract: see the module docs.
pub unsafe fn declare_size_class(size: usize) {
    match heap_mut() {
        Some(heap) => {
            let _ = heap.declare_size_class(size);
        }
        None => log::error!("declare_size_class({size}) before init"),
    }
}

/// Obtain a block of at least `n` bytes from the process-wide pool. Returns
/// null if the pool is uninitialized, `n` is zero, or memory is exhausted.
///
/// # Safety
///
/// Single-threaded contract: see the module docs.
pub unsafe fn allocate(n: usize) -> *mut u8 {
    match heap_mut() {
        Some(heap) => heap.allocate(n),
        None => {
            log::error!("allocate({n}) before init");
            null_mut()
        }
    }
}

/// Return a block to the process-wide pool.
///
/// # Safety
///
/// `p` must be null or a live pointer previously returned by [`allocate`].
/// Single-threaded contract: see the module docs.
pub unsafe fn free(p: *mut u8) {
    match heap_mut() {
        Some(heap) => heap.free(p),
        None => log::error!("free({p:p}) before init"),
    }
}

/// Obtain `page_cnt` contiguous raw pages from the process-wide pool. Returns
/// null if the pool is uninitialized, `page_cnt` is zero, or no run fits.
///
/// # Safety
///
/// Single-threaded contract: see the module docs.
pub unsafe fn reserve_pages(page_cnt: usize) -> *mut u8 {
    match heap_mut() {
        Some(heap) => heap.reserve_pages(page_cnt),
        None => {
            log::error!("reserve_pages({page_cnt}) before init");
            null_mut()
        }
    }
}

/// Return a page run to the process-wide pool.
///
/// # Safety
///
/// `pages` must be a run of `page_cnt` pages previously returned by
/// [`reserve_pages`] (or by the big-block path) and still reserved.
/// Single-threaded contract: see the module docs.
pub unsafe fn release_pages(pages: *mut u8, page_cnt: usize) {
    match heap_mut() {
        Some(heap) => heap.release_pages(pages, page_cnt),
        None => log::error!("release_pages({pages:p}, {page_cnt}) before init"),
    }
}
