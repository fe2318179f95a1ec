//! A heap: one per CPU plus the global heap at index 0 (§3 "Heap", §4.4).
//! Holds `F × K` bucket list heads, a lock, and a live-superblock count.

use crate::consts::{round_up, CACHELINE_SIZE, F};
use crate::superblock::{Superblock, NO_BUCKET};
use std::mem;
use std::ptr;

/// Heap header size, rounded up to 8 bytes; the bucket array (`F * K`
/// pointers) is carved immediately after it.
pub const HEADER_SIZE: usize = round_up(mem::size_of::<Heap>(), 8);

/// Total bytes a heap's metadata (header + bucket array) occupies for a
/// size-class table of `k` entries, padded to a cacheline so adjacent heaps
/// never share one (§4.8).
pub fn metadata_size(k: usize) -> usize {
    round_up(HEADER_SIZE + F * k * mem::size_of::<usize>(), CACHELINE_SIZE)
}

#[repr(C)]
pub struct Heap {
    pub lock: crate::lock::RawSpinLock,
    index: usize,
    buckets: *mut *mut Superblock,
    k: usize,
    num_superblocks: usize,
}

unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    /// Writes a fresh, empty heap header at `addr` with its bucket array at
    /// `addr + HEADER_SIZE`, all `F * k` slots nulled. `index` is 0 for the
    /// global heap, `cpu + 1` for a per-CPU heap.
    pub unsafe fn init(addr: usize, index: usize, k: usize) -> *mut Heap {
        let buckets = (addr + HEADER_SIZE) as *mut *mut Superblock;
        for i in 0..F * k {
            buckets.add(i).write(ptr::null_mut());
        }
        let header = Heap {
            lock: crate::lock::RawSpinLock::new(),
            index,
            buckets,
            k,
            num_superblocks: 0,
        };
        let ptr = addr as *mut Heap;
        ptr::write(ptr, header);
        ptr
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn num_superblocks(&self) -> usize {
        self.num_superblocks
    }

    #[inline]
    fn slot(&self, b: usize, c: usize) -> *mut *mut Superblock {
        debug_assert!(b < F && c < self.k);
        unsafe { self.buckets.add(b * self.k + c) }
    }

    /// First non-empty bin for class `c`, scanning most-full to least-full
    /// (§4.6 step 4: "scan bins 0 → F−1, take first non-nil head").
    ///
    /// Caller must hold `self.lock`.
    pub fn search_free(&self, c: usize) -> Option<(*mut Superblock, usize)> {
        for b in 0..F {
            let head = unsafe { *self.slot(b, c) };
            if !head.is_null() {
                return Some((head, b));
            }
        }
        None
    }

    /// Prepends `sb` to bucket `(b, c)` and stamps `sb.bucketnum`.
    ///
    /// Caller must hold `self.lock` and own exclusive access to `sb`
    /// (typically also holding `sb.lock`, though insertion only touches the
    /// sibling links, not the freelist).
    pub unsafe fn insert(&mut self, b: usize, c: usize, sb: *mut Superblock) {
        let slot = self.slot(b, c);
        let head = *slot;
        (*sb).set_prev(ptr::null_mut());
        (*sb).set_next(head);
        if !head.is_null() {
            (*head).set_prev(sb);
        }
        *slot = sb;
        (*sb).set_bucketnum(b as isize);
        self.num_superblocks += 1;
        log::debug!(
            "heap {}: superblock {:#x} linked into bucket (bin {}, class {}), now {} superblocks",
            self.index,
            sb as usize,
            b,
            c,
            self.num_superblocks
        );
    }

    /// Detaches `sb` from bucket `(b, c)`. `sb` must currently be linked
    /// there. Leaves `sb.bucketnum = -1`.
    ///
    /// Caller must hold `self.lock`.
    pub unsafe fn remove(&mut self, b: usize, c: usize, sb: *mut Superblock) {
        let slot = self.slot(b, c);
        let prev = (*sb).prev();
        let next = (*sb).next();
        if prev.is_null() {
            *slot = next;
        } else {
            (*prev).set_next(next);
        }
        if !next.is_null() {
            (*next).set_prev(prev);
        }
        (*sb).set_prev(ptr::null_mut());
        (*sb).set_next(ptr::null_mut());
        (*sb).set_bucketnum(NO_BUCKET);
        self.num_superblocks -= 1;
        log::debug!(
            "heap {}: superblock {:#x} unlinked from bucket (bin {}, class {}), now {} superblocks",
            self.index,
            sb as usize,
            b,
            c,
            self.num_superblocks
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SB;

    fn make_heap(k: usize) -> (Vec<u8>, *mut Heap) {
        let total = metadata_size(k) + 8;
        let mut buf = vec![0u8; total];
        let addr = round_up(buf.as_mut_ptr() as usize, 8);
        let h = unsafe { Heap::init(addr, 0, k) };
        (buf, h)
    }

    fn make_sb(units: usize, class_size: usize) -> (Vec<u8>, *mut Superblock) {
        let mut buf = vec![0u8; units * SB + 8];
        let addr = round_up(buf.as_mut_ptr() as usize, 8);
        let sb = unsafe { Superblock::init(addr, 0, 0, class_size, units) };
        (buf, sb)
    }

    #[test]
    fn fresh_heap_has_no_superblocks() {
        let (_buf, h) = make_heap(4);
        let h = unsafe { &*h };
        assert_eq!(h.num_superblocks(), 0);
        assert_eq!(h.search_free(0), None);
    }

    #[test]
    fn insert_then_search_finds_it() {
        let (_buf, h) = make_heap(4);
        let (_sbuf, sb) = make_sb(1, 64);
        let h = unsafe { &mut *h };
        unsafe { h.insert(1, 2, sb) };
        assert_eq!(h.num_superblocks(), 1);
        assert_eq!(h.search_free(2), Some((sb, 1)));
        unsafe { assert_eq!((*sb).bucketnum(), 1) };
    }

    #[test]
    fn search_prefers_most_full_bin() {
        let (_buf, h) = make_heap(4);
        let (_b1, sb_empty) = make_sb(1, 64);
        let (_b2, sb_full) = make_sb(1, 64);
        let h = unsafe { &mut *h };
        unsafe {
            h.insert(2, 0, sb_empty);
            h.insert(0, 0, sb_full);
        }
        assert_eq!(h.search_free(0), Some((sb_full, 0)));
    }

    #[test]
    fn remove_unlinks_and_updates_count() {
        let (_buf, h) = make_heap(4);
        let (_b1, sb) = make_sb(1, 64);
        let h = unsafe { &mut *h };
        unsafe {
            h.insert(1, 0, sb);
            h.remove(1, 0, sb);
        }
        assert_eq!(h.num_superblocks(), 0);
        assert_eq!(h.search_free(0), None);
        unsafe { assert_eq!((*sb).bucketnum(), NO_BUCKET) };
    }

    #[test]
    fn multiple_superblocks_in_one_bucket_keep_list_intact() {
        let (_buf, h) = make_heap(4);
        let (_b1, sb1) = make_sb(1, 64);
        let (_b2, sb2) = make_sb(1, 64);
        let (_b3, sb3) = make_sb(1, 64);
        let h = unsafe { &mut *h };
        unsafe {
            h.insert(1, 0, sb1);
            h.insert(1, 0, sb2);
            h.insert(1, 0, sb3);
        }
        assert_eq!(h.num_superblocks(), 3);
        // most recently inserted is the head
        assert_eq!(h.search_free(0), Some((sb3, 1)));
        unsafe { h.remove(1, 0, sb2) };
        assert_eq!(h.num_superblocks(), 2);
        unsafe {
            assert_eq!((*sb3).prev(), std::ptr::null_mut());
            assert_eq!((*sb3).next(), sb1);
            assert_eq!((*sb1).prev(), sb3);
            assert_eq!((*sb1).next(), std::ptr::null_mut());
        }
    }

    #[test]
    fn buckets_are_independent_per_class() {
        let (_buf, h) = make_heap(4);
        let (_b1, sb) = make_sb(1, 64);
        let h = unsafe { &mut *h };
        unsafe { h.insert(1, 3, sb) };
        assert_eq!(h.search_free(0), None);
        assert_eq!(h.search_free(3), Some((sb, 1)));
    }
}
