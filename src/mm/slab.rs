//! Sub-page allocation: malloc-like size classes layered over the page pool.
//!
//! Each supported block size owns a [`SizeClass`] descriptor with an
//! intrusive free list of equal-sized blocks. Blocks are carved out of
//! *arenas*, single pages formatted with an [`Arena`] header at the top:
//!
//! ```text
//! +--------------+--------+--------+--------+-----
//! | Arena header | block0 | block1 | block2 | ...
//! +--------------+--------+--------+--------+-----
//! ```
//!
//! A free block's first two words are its list element; an allocated block
//! belongs entirely to the client. Requests too big for any class get a
//! *big block*: a dedicated run of pages whose payload starts right after
//! the arena header and whose `free_cnt` records the run length.
//!
//! Request routing in [`Heap::allocate`]:
//!
//! 1. User-declared classes, exact size match only, in declaration order.
//! 2. The smallest primary class with `block_size >= n`.
//! 3. Otherwise the big-block path.
//!
//! An arena whose blocks are all free again is dissolved immediately: its
//! blocks are unthreaded from the free list and its page goes back to the
//! pool, so at most one partially-used arena's worth of slack exists per
//! active class at quiesce.

use core::mem::size_of;
use core::ptr::{addr_of_mut, null_mut};

use crate::container_of_mut;
use crate::mm::{pg_ofs, pg_round_down, Pool, PoolError, PAGE_SIZE};
use crate::util::align::div_round_up;
use crate::util::list::{self, List, ListElem};

/// Magic number for detecting arena corruption.
const ARENA_MAGIC: u32 = 0x9a54_8eed;

/// Block size of the smallest primary class.
const MIN_BLOCK_SIZE: usize = 16;

/// Capacity of the primary class table. Doubling block sizes from
/// [`MIN_BLOCK_SIZE`] up to half a page can never produce more entries than
/// this for any sane page order.
const MAX_CLASSES: usize = 16;

/// Capacity of the user-declared class table.
const MAX_USER_CLASSES: usize = 16;

/// A size class: the block size it serves, how many blocks fit in one arena,
/// and the free list threading every currently free block of this class.
#[repr(C)]
#[derive(Debug)]
struct SizeClass {
    block_size: usize,
    blocks_per_arena: usize,
    free_list: List,
}

/// Header at the top of every page the object allocator formats.
#[repr(C)]
struct Arena {
    /// Always set to [`ARENA_MAGIC`].
    magic: u32,
    /// Owning size class; null for a big block.
    desc: *mut SizeClass,
    /// Free blocks in a normal arena; page count in a big block.
    free_cnt: usize,
}

/// A free block. The list element overlays the first bytes of the slot;
/// once allocated, the whole slot is client memory.
#[repr(C)]
struct Block {
    free_elem: ListElem,
}

// A free block must be able to hold its list element, and the header must
// leave the first block on a word boundary.
sa::const_assert!(size_of::<Block>() <= MIN_BLOCK_SIZE);
sa::const_assert_eq!(size_of::<Arena>() % size_of::<usize>(), 0);
sa::const_assert!(size_of::<Arena>() <= PAGE_SIZE / 2);

/// Both class tables. Boxed by the [`Heap`] so the embedded list sentinels
/// keep their addresses even when the handle itself moves.
#[derive(Debug)]
struct ClassTable {
    primary: [SizeClass; MAX_CLASSES],
    primary_cnt: usize,
    declared: [SizeClass; MAX_USER_CLASSES],
    declared_cnt: usize,
}

/// Populate one descriptor and give it an empty free list.
///
/// Every block of the class must be able to hold a free-list element, or
/// threading the list in `refill` would spill into the next block.
unsafe fn init_class(d: &mut SizeClass, block_size: usize) {
    assert!(block_size >= size_of::<Block>());

    d.block_size = block_size;
    d.blocks_per_arena = (PAGE_SIZE - size_of::<Arena>()) / block_size;
    list::init(addr_of_mut!(d.free_list));
}

/// Returns the arena that block `b` is inside, verifying the header.
///
/// The magic cookie is the allocator's only corruption detector: a pointer
/// whose enclosing page was never formatted as an arena fails here, as does
/// a pointer that does not sit on a block boundary of its arena.
unsafe fn block_to_arena(b: *mut Block) -> *mut Arena {
    let a = pg_round_down(b as usize) as *mut Arena;

    assert!(!a.is_null());
    assert_eq!((*a).magic, ARENA_MAGIC);

    let desc = (*a).desc;
    assert!(desc.is_null() || pg_ofs(b as usize) >= size_of::<Arena>());
    assert!(
        desc.is_null() || (pg_ofs(b as usize) - size_of::<Arena>()) % (*desc).block_size == 0
    );
    assert!(!desc.is_null() || pg_ofs(b as usize) == size_of::<Arena>());

    a
}

/// Returns the `idx`'th block within arena `a`.
unsafe fn arena_to_block(a: *mut Arena, idx: usize) -> *mut Block {
    debug_assert!(!a.is_null());
    debug_assert_eq!((*a).magic, ARENA_MAGIC);
    debug_assert!(idx < (*(*a).desc).blocks_per_arena);

    (a as *mut u8).add(size_of::<Arena>() + idx * (*(*a).desc).block_size) as *mut Block
}

/// The allocator handle: the page pool plus the size-class tables.
///
/// `Heap` is a single-owner handle with no interior sharing; it is neither
/// `Send` nor `Sync` and no operation may run concurrently with another on
/// the same heap.
#[derive(Debug)]
pub struct Heap {
    pool: Pool,
    classes: Box<ClassTable>,
}

impl Heap {
    /// Build a heap over the byte region `[start_addr, end_addr)`.
    ///
    /// Both addresses must be page-aligned; `start_addr < end_addr` is
    /// checked and reported as [`PoolError::BadRegion`]. The region must be
    /// big enough to hold its own page bitmap.
    ///
    /// # Safety
    ///
    /// The region must be valid for reads and writes for the life of the
    /// heap and must not be touched except through pointers this heap
    /// returns.
    pub unsafe fn new(start_addr: usize, end_addr: usize) -> Result<Heap, PoolError> {
        if start_addr >= end_addr {
            log::error!("heap: region start {start_addr:#x} is not below end {end_addr:#x}");
            return Err(PoolError::BadRegion {
                start: start_addr,
                end: end_addr,
            });
        }
        assert_eq!(pg_ofs(start_addr), 0);
        assert_eq!(pg_ofs(end_addr), 0);

        let page_cnt = (end_addr - start_addr) / PAGE_SIZE;
        let pool = Pool::init(start_addr, page_cnt)?;

        // A zeroed descriptor is inert until its free list is initialized in
        // place below, once the table has its final address.
        let mut classes: Box<ClassTable> = Box::new(core::mem::zeroed());

        let mut block_size = MIN_BLOCK_SIZE;
        while block_size < PAGE_SIZE / 2 {
            let idx = classes.primary_cnt;
            assert!(idx < MAX_CLASSES);
            init_class(&mut classes.primary[idx], block_size);
            classes.primary_cnt = idx + 1;
            block_size *= 2;
        }

        Ok(Heap { pool, classes })
    }

    /// Register a supplementary size class served by exact match only.
    ///
    /// `size` must be at least the minimum block size (a free block has to
    /// hold its list element), below half a page, and not already present in
    /// either table. Rejections log a diagnostic and change nothing.
    pub fn declare_size_class(&mut self, size: usize) -> Result<(), PoolError> {
        let limit = PAGE_SIZE / 2;
        if size < MIN_BLOCK_SIZE || size >= limit {
            log::error!(
                "heap: size class {size} out of range (expected {MIN_BLOCK_SIZE} <= size < {limit})"
            );
            return Err(PoolError::SizeClassOutOfRange {
                size,
                min: MIN_BLOCK_SIZE,
                limit,
            });
        }

        let t = &mut *self.classes;
        if t.primary[..t.primary_cnt]
            .iter()
            .chain(t.declared[..t.declared_cnt].iter())
            .any(|d| d.block_size == size)
        {
            log::error!("heap: size class {size} is already present");
            return Err(PoolError::DuplicateSizeClass(size));
        }
        if t.declared_cnt == MAX_USER_CLASSES {
            log::error!("heap: size class table is full ({MAX_USER_CLASSES} entries)");
            return Err(PoolError::SizeClassTableFull {
                cap: MAX_USER_CLASSES,
            });
        }

        let idx = t.declared_cnt;
        unsafe { init_class(&mut t.declared[idx], size) };
        t.declared_cnt = idx + 1;
        log::debug!("heap: declared size class {size}");
        Ok(())
    }

    /// Obtain a block of at least `n` bytes. Returns null when `n` is zero
    /// or memory is exhausted.
    pub fn allocate(&mut self, n: usize) -> *mut u8 {
        if n == 0 {
            return null_mut();
        }

        let d = self.select_class(n);
        if d.is_null() {
            // Too big for any class: hand out whole pages.
            return self.allocate_big(n);
        }

        unsafe {
            let free_list = addr_of_mut!((*d).free_list);
            if list::is_empty(free_list) && !self.refill(d) {
                return null_mut();
            }

            let b = container_of_mut!(list::pop_front(free_list), Block, free_elem);
            let a = block_to_arena(b);
            (*a).free_cnt -= 1;
            b as *mut u8
        }
    }

    /// Return block `p` to the heap.
    ///
    /// A null `p` is reported and ignored. The enclosing page must carry a
    /// valid arena header; anything else is treated as corruption and trips
    /// an assertion.
    ///
    /// # Safety
    ///
    /// `p` must be null or a pointer previously returned by
    /// [`Heap::allocate`] that has not been freed since.
    pub unsafe fn free(&mut self, p: *mut u8) {
        if p.is_null() {
            log::error!("heap: free of null pointer");
            return;
        }

        let b = p as *mut Block;
        let a = block_to_arena(b);
        let d = (*a).desc;

        if !d.is_null() {
            // Normal block: back onto its class's free list.
            list::push_front(addr_of_mut!((*d).free_list), addr_of_mut!((*b).free_elem));
            (*a).free_cnt += 1;

            // If the arena is now entirely unused, dissolve it.
            if (*a).free_cnt == (*d).blocks_per_arena {
                for i in 0..(*d).blocks_per_arena {
                    let b = arena_to_block(a, i);
                    list::remove(addr_of_mut!((*b).free_elem));
                }
                log::debug!("heap: arena at {a:p} idle, page released");
                self.pool.release(a as *mut u8, 1);
            }
        } else {
            // Big block: the whole page run goes back at once.
            self.pool.release(a as *mut u8, (*a).free_cnt);
        }
    }

    /// Obtain a run of `page_cnt` contiguous raw pages. Returns null when
    /// `page_cnt` is zero or no run fits.
    pub fn reserve_pages(&mut self, page_cnt: usize) -> *mut u8 {
        self.pool.reserve(page_cnt)
    }

    /// Return a page run obtained from [`Heap::reserve_pages`].
    ///
    /// # Safety
    ///
    /// `pages` must be null or the start of a still-reserved run of
    /// `page_cnt` pages in this heap's pool.
    pub unsafe fn release_pages(&mut self, pages: *mut u8, page_cnt: usize) {
        self.pool.release(pages, page_cnt)
    }

    /// Total number of manageable pages.
    pub fn page_count(&self) -> usize {
        self.pool.page_count()
    }

    /// Number of pages not currently reserved.
    pub fn free_page_count(&self) -> usize {
        self.pool.free_page_count()
    }

    /// Route a request to its descriptor: declared classes by exact match
    /// first, then the smallest primary class that fits. Null when only the
    /// big-block path can serve `n`.
    fn select_class(&mut self, n: usize) -> *mut SizeClass {
        let t = &mut *self.classes;

        for d in t.declared[..t.declared_cnt].iter_mut() {
            if d.block_size == n {
                return d;
            }
        }
        for d in t.primary[..t.primary_cnt].iter_mut() {
            if d.block_size >= n {
                return d;
            }
        }
        null_mut()
    }

    /// Mint a fresh arena for class `d` and thread its blocks onto the free
    /// list in address order. Returns false when no page is available.
    unsafe fn refill(&mut self, d: *mut SizeClass) -> bool {
        let a = self.pool.reserve(1) as *mut Arena;
        if a.is_null() {
            return false;
        }

        (*a).magic = ARENA_MAGIC;
        (*a).desc = d;
        (*a).free_cnt = (*d).blocks_per_arena;
        for i in 0..(*d).blocks_per_arena {
            let b = arena_to_block(a, i);
            list::push_back(addr_of_mut!((*d).free_list), addr_of_mut!((*b).free_elem));
        }
        log::debug!("heap: new arena at {a:p} for size class {}", (*d).block_size);
        true
    }

    /// Fresh pages needed to satisfy an oversize request: the payload plus
    /// one arena header.
    fn allocate_big(&mut self, n: usize) -> *mut u8 {
        let page_cnt = div_round_up(n + size_of::<Arena>(), PAGE_SIZE);
        let a = self.pool.reserve(page_cnt) as *mut Arena;
        if a.is_null() {
            return null_mut();
        }

        unsafe {
            (*a).magic = ARENA_MAGIC;
            (*a).desc = null_mut();
            (*a).free_cnt = page_cnt;
            a.add(1) as *mut u8
        }
    }
}
