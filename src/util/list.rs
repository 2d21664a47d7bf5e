//! Intrusive doubly linked list implementation.
//!
//! A [`List`] owns two sentinel elements: the `head` just before the first
//! interior element and the `tail` just after the last one.
//!
//! ```text
//!     +------+     +-------+     +-------+     +------+
//! <---| head |<--->|   1   |<--->|   2   |<--->| tail |--->
//!     +------+     +-------+     +-------+     +------+
//! ```
//!
//! `head.prev` and `tail.next` are always null, so an interior element always
//! has two non-null neighbors and removal needs no conditionals. The list
//! stores no values: a [`ListElem`] is embedded in the entry struct and the
//! containing entry is recovered with [`container_of_mut!`].
//!
//! The list never owns the entries. All functions take raw pointers because
//! elements live inside memory the list knows nothing about; callers must
//! keep every linked element alive and in place while it is on a list.
//!
//! [`container_of_mut!`]: crate::container_of_mut

use core::ptr::{addr_of_mut, null_mut};

/// Double linked list element. Embedded in the actual entry struct to give the
/// entry struct the linked list capability.
#[repr(C)]
#[derive(Debug)]
pub struct ListElem {
    pub prev: *mut ListElem,
    pub next: *mut ListElem,
}

impl ListElem {
    /// An unlinked element. Both links are null until the element is inserted.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            prev: null_mut(),
            next: null_mut(),
        }
    }
}

/// Double linked list: the two sentinel elements bracketing the interior.
#[repr(C)]
#[derive(Debug)]
pub struct List {
    head: ListElem,
    tail: ListElem,
}

/// Returns `true` if `elem` is an interior element.
#[inline(always)]
unsafe fn is_interior(elem: *mut ListElem) -> bool {
    !elem.is_null() && !(*elem).prev.is_null() && !(*elem).next.is_null()
}

/// Returns `true` if `elem` is a tail sentinel.
#[inline(always)]
unsafe fn is_tail(elem: *mut ListElem) -> bool {
    !elem.is_null() && !(*elem).prev.is_null() && (*elem).next.is_null()
}

/// Initialize `list` in place as an empty list.
///
/// Must be called before any other list operation, and again only when the
/// list is no longer linked to anything. The sentinels are self-referential,
/// so a [`List`] **must not move** while any element is linked on it.
pub unsafe fn init(list: *mut List) {
    let head = addr_of_mut!((*list).head);
    let tail = addr_of_mut!((*list).tail);
    (*head).prev = null_mut();
    (*head).next = tail;
    (*tail).prev = head;
    (*tail).next = null_mut();
}

/// First interior element, or the tail sentinel if the list is empty.
#[inline(always)]
pub unsafe fn begin(list: *mut List) -> *mut ListElem {
    (*list).head.next
}

/// The tail sentinel. Used as the one-past-the-end position when iterating.
#[inline(always)]
pub unsafe fn end(list: *mut List) -> *mut ListElem {
    addr_of_mut!((*list).tail)
}

/// Returns `true` if `list` has no interior elements.
#[inline(always)]
pub unsafe fn is_empty(list: *mut List) -> bool {
    begin(list) == end(list)
}

/// Insert `elem` just before `before`, which must be either an interior
/// element or the tail sentinel.
pub unsafe fn insert(before: *mut ListElem, elem: *mut ListElem) {
    debug_assert!(is_interior(before) || is_tail(before));
    debug_assert!(!elem.is_null());

    (*elem).prev = (*before).prev;
    (*elem).next = before;
    (*(*before).prev).next = elem;
    (*before).prev = elem;
}

/// Insert `elem` at the beginning of `list`.
#[inline(always)]
pub unsafe fn push_front(list: *mut List, elem: *mut ListElem) {
    insert(begin(list), elem);
}

/// Insert `elem` at the end of `list`.
#[inline(always)]
pub unsafe fn push_back(list: *mut List, elem: *mut ListElem) {
    insert(end(list), elem);
}

/// Unlink `elem` from its list and return the element that followed it.
///
/// `elem` must be interior. The returned successor makes iterate-and-remove
/// loops possible: `e = remove(e)` steps past the removed element.
pub unsafe fn remove(elem: *mut ListElem) -> *mut ListElem {
    debug_assert!(is_interior(elem));
    (*(*elem).prev).next = (*elem).next;
    (*(*elem).next).prev = (*elem).prev;
    (*elem).next
}

/// First interior element of `list`, which must not be empty.
#[inline(always)]
pub unsafe fn front(list: *mut List) -> *mut ListElem {
    debug_assert!(!is_empty(list));
    (*list).head.next
}

/// Remove the front element from `list` and return it. `list` must not be
/// empty.
pub unsafe fn pop_front(list: *mut List) -> *mut ListElem {
    let f = front(list);
    remove(f);
    f
}

/// Number of interior elements in `list`. Linear time; used for reporting and
/// sanity checks only.
pub unsafe fn count(list: *mut List) -> usize {
    let mut n = 0usize;
    let mut e = begin(list);
    while e != end(list) {
        n += 1;
        e = (*e).next;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container_of_mut;

    #[repr(C)]
    struct Item {
        value: u32,
        elem: ListElem,
    }

    impl Item {
        fn new(value: u32) -> Self {
            Self {
                value,
                elem: ListElem::new(),
            }
        }
    }

    unsafe fn collect(list: *mut List) -> Vec<u32> {
        let mut out = Vec::new();
        let mut e = begin(list);
        while e != end(list) {
            let item = container_of_mut!(e, Item, elem);
            out.push((*item).value);
            e = (*e).next;
        }
        out
    }

    #[test]
    fn empty_after_init() {
        let mut list = core::mem::MaybeUninit::<List>::uninit();
        unsafe {
            init(list.as_mut_ptr());
            assert!(is_empty(list.as_mut_ptr()));
            assert_eq!(count(list.as_mut_ptr()), 0);
            assert_eq!(begin(list.as_mut_ptr()), end(list.as_mut_ptr()));
        }
    }

    #[test]
    fn push_order() {
        let mut list = core::mem::MaybeUninit::<List>::uninit();
        let mut a = Item::new(1);
        let mut b = Item::new(2);
        let mut c = Item::new(3);
        unsafe {
            let l = list.as_mut_ptr();
            init(l);
            push_back(l, addr_of_mut!(a.elem));
            push_back(l, addr_of_mut!(b.elem));
            push_front(l, addr_of_mut!(c.elem));
            assert_eq!(collect(l), vec![3, 1, 2]);
            assert_eq!(count(l), 3);
        }
    }

    #[test]
    fn pop_front_returns_first() {
        let mut list = core::mem::MaybeUninit::<List>::uninit();
        let mut a = Item::new(10);
        let mut b = Item::new(20);
        unsafe {
            let l = list.as_mut_ptr();
            init(l);
            push_back(l, addr_of_mut!(a.elem));
            push_back(l, addr_of_mut!(b.elem));

            let e = pop_front(l);
            let item = container_of_mut!(e, Item, elem);
            assert_eq!((*item).value, 10);
            assert_eq!(collect(l), vec![20]);
        }
    }

    #[test]
    fn remove_returns_successor() {
        let mut list = core::mem::MaybeUninit::<List>::uninit();
        let mut items = [Item::new(0), Item::new(1), Item::new(2)];
        unsafe {
            let l = list.as_mut_ptr();
            init(l);
            for item in items.iter_mut() {
                push_back(l, addr_of_mut!(item.elem));
            }

            // Drop the middle element; the successor must be element 2.
            let succ = remove(addr_of_mut!(items[1].elem));
            let item = container_of_mut!(succ, Item, elem);
            assert_eq!((*item).value, 2);
            assert_eq!(collect(l), vec![0, 2]);
        }
    }

    #[test]
    fn iterate_and_remove_drains_list() {
        let mut list = core::mem::MaybeUninit::<List>::uninit();
        let mut items = [Item::new(0), Item::new(1), Item::new(2), Item::new(3)];
        unsafe {
            let l = list.as_mut_ptr();
            init(l);
            for item in items.iter_mut() {
                push_back(l, addr_of_mut!(item.elem));
            }

            let mut e = begin(l);
            while e != end(l) {
                e = remove(e);
            }
            assert!(is_empty(l));
        }
    }
}
