//! The allocate/free state machines (§4.6, §4.7): search, ownership
//! transfer, fullness reclassification, and growth from the raw provider.

use crate::bootstrap::{self, Bootstrap};
use crate::consts::{ALLOC_THRESHOLD, DEFAULT_DSEG_MAX, SB, SB_RESERVE};
use crate::error::Result;
use crate::fullness;
use crate::heap::Heap;
use crate::platform;
use crate::raw::RawHeap;
use crate::size_class::SizeClassTable;
use crate::superblock::{self, Superblock, NO_BUCKET};
use std::ptr;

pub struct Allocator {
    raw: RawHeap,
    classes: SizeClassTable,
    heaps: *mut *mut Heap,
    num_heaps: usize,
    superblock_start: usize,
}

unsafe impl Send for Allocator {}
unsafe impl Sync for Allocator {}

impl Allocator {
    /// `mm_init`, with the default raw-region capacity.
    pub fn new() -> Result<Self> {
        Self::with_capacity(DEFAULT_DSEG_MAX)
    }

    /// `mm_init`, sizing the raw region explicitly (used by tests so each
    /// case gets a private, small region instead of sharing process state).
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let raw = RawHeap::with_capacity(capacity)?;
        let Bootstrap {
            raw,
            classes,
            heaps,
            num_heaps,
            superblock_start,
        } = bootstrap::bootstrap(raw)?;
        Ok(Self {
            raw,
            classes,
            heaps,
            num_heaps,
            superblock_start,
        })
    }

    #[inline]
    fn heap_ptr(&self, index: usize) -> *mut Heap {
        debug_assert!(index < self.num_heaps);
        unsafe { *self.heaps.add(index) }
    }

    /// Resolves a live pointer to the base of its superblock (§3, fixed
    /// `SB`-aligned floor division relative to `SUPERBLOCK_START`).
    #[inline]
    fn superblock_of(&self, addr: usize) -> *mut Superblock {
        let start = self.superblock_start;
        debug_assert!(addr >= start);
        (start + ((addr - start) / SB) * SB) as *mut Superblock
    }

    /// `mm_malloc(size)` (§4.6).
    pub fn malloc(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return ptr::null_mut();
        }
        let c = match self.classes.class_of(size) {
            Some(c) => c,
            None => {
                log::debug!("mm_malloc: {} bytes exceeds the largest size class", size);
                return ptr::null_mut();
            }
        };
        let cpu = platform::caller_cpu();
        let h_index = cpu + 1;
        let hh = unsafe { &mut *self.heap_ptr(h_index) };

        hh.lock.lock();

        if let Some((sb, b)) = hh.search_free(c) {
            let sbh = unsafe { &mut *sb };
            sbh.lock.lock();
            debug_assert!(!sbh.is_full(), "a bucket head always has a free block");
            let p = unsafe { sbh.allocate_block().unwrap_unchecked() };
            self.post_allocate_update(hh, sbh, b, c);
            sbh.lock.unlock();
            hh.lock.unlock();
            log::trace!("mm_malloc: served {} bytes on cpu {} from class {}", size, cpu, c);
            return p as *mut u8;
        }

        let gh = unsafe { &mut *self.heap_ptr(0) };
        gh.lock.lock();
        if let Some((sb, b)) = gh.search_free(c) {
            unsafe {
                gh.remove(b, c, sb);
                hh.insert(b, c, sb);
            }
            let sbh = unsafe { &mut *sb };
            sbh.set_owner(h_index);
            sbh.lock.lock();
            gh.lock.unlock();
            debug_assert!(!sbh.is_full(), "a bucket head always has a free block");
            let p = unsafe { sbh.allocate_block().unwrap_unchecked() };
            self.post_allocate_update(hh, sbh, b, c);
            sbh.lock.unlock();
            hh.lock.unlock();
            log::info!(
                "mm_malloc: adopted a class {} superblock from the global heap onto cpu {}",
                c,
                cpu
            );
            return p as *mut u8;
        }
        gh.lock.unlock();

        let class_size = self.classes.get(c);
        let units = superblock::units_for(class_size);
        let base = match self.raw.sbrk(units * SB) {
            Some(base) => base,
            None => {
                hh.lock.unlock();
                log::warn!("mm_malloc: out of memory growing for class {}", c);
                return ptr::null_mut();
            }
        };
        let sb = unsafe { Superblock::init(base, h_index, c, class_size, units) };
        let sbh = unsafe { &mut *sb };
        debug_assert!(!sbh.is_full(), "a freshly initialized superblock always has capacity");
        let p = unsafe { sbh.allocate_block().unwrap_unchecked() };
        if !sbh.is_full() {
            unsafe { hh.insert(crate::consts::F - 1, c, sb) };
            self.post_allocate_update(hh, sbh, crate::consts::F - 1, c);
        }
        hh.lock.unlock();
        log::info!(
            "mm_malloc: grew a new {}-unit superblock for class {} on cpu {}",
            units,
            c,
            cpu
        );
        p as *mut u8
    }

    /// `mm_free(p)` (§4.7).
    pub fn free(&self, p: *mut u8) {
        if p.is_null() {
            return;
        }
        let addr = p as usize;
        let sb = self.superblock_of(addr);
        let sbh = unsafe { &mut *sb };

        sbh.lock.lock();
        sbh.free_block(addr);
        let owner = sbh.owner();
        sbh.lock.unlock();
        log::trace!("mm_free: released block at {:#x}, owner heap {}", addr, owner);

        if owner == 0 {
            return;
        }

        let hh = unsafe { &mut *self.heap_ptr(owner) };
        hh.lock.lock();
        sbh.lock.lock();
        if sbh.owner() != owner {
            // Adopted by another CPU between steps 2 and here; nothing to do.
            sbh.lock.unlock();
            hh.lock.unlock();
            return;
        }

        let old_b = sbh.bucketnum();
        let c = sbh.size_class;
        self.post_free_update(hh, sbh, old_b, c);

        if hh.num_superblocks() > SB_RESERVE && sbh.allocated_bytes() < ALLOC_THRESHOLD {
            let gh = unsafe { &mut *self.heap_ptr(0) };
            gh.lock.lock();
            let b = sbh.bucketnum();
            if b >= 0 {
                unsafe { hh.remove(b as usize, c, sbh as *mut Superblock) };
            }
            unsafe { gh.insert(crate::consts::F - 1, c, sbh as *mut Superblock) };
            sbh.set_owner(0);
            gh.lock.unlock();
            log::info!(
                "mm_free: migrated a class {} superblock from cpu heap {} to the global heap",
                c,
                owner
            );
        }

        sbh.lock.unlock();
        hh.lock.unlock();
    }

    /// `mm_calloc(nmemb, size)` (§6, ambient convenience).
    pub fn calloc(&self, nmemb: usize, size: usize) -> *mut u8 {
        let total = match nmemb.checked_mul(size) {
            Some(t) => t,
            None => return ptr::null_mut(),
        };
        let p = self.malloc(total);
        if !p.is_null() {
            unsafe { ptr::write_bytes(p, 0, total) };
        }
        p
    }

    /// `mm_realloc(p, size)` (§6, ambient convenience): copy-and-free, since
    /// blocks are never split or coalesced in place.
    pub fn realloc(&self, p: *mut u8, size: usize) -> *mut u8 {
        if p.is_null() {
            return self.malloc(size);
        }
        if size == 0 {
            self.free(p);
            return ptr::null_mut();
        }
        let old_size = unsafe { (*self.superblock_of(p as usize)).class_size() };
        let new_p = self.malloc(size);
        if new_p.is_null() {
            return ptr::null_mut();
        }
        let copy_len = old_size.min(size);
        unsafe { ptr::copy_nonoverlapping(p, new_p, copy_len) };
        self.free(p);
        new_p
    }

    pub fn pagesize(&self) -> usize {
        self.raw.pagesize()
    }

    pub fn superblock_start(&self) -> usize {
        self.superblock_start
    }

    pub fn num_heaps(&self) -> usize {
        self.num_heaps
    }

    /// The heap index currently owning the superblock backing `p` (0 =
    /// global, `cpu + 1` otherwise). Diagnostic/test helper, not part of
    /// the historical API surface.
    pub fn owner_of(&self, p: *mut u8) -> usize {
        let sb = self.superblock_of(p as usize);
        unsafe { (*sb).owner() }
    }

    /// Number of superblocks currently linked into heap `index`'s buckets.
    /// Diagnostic/test helper.
    pub fn num_superblocks_in(&self, index: usize) -> usize {
        unsafe { (*self.heap_ptr(index)).num_superblocks() }
    }

    /// §4.5, applied after a successful allocate from bucket `old_b`.
    fn post_allocate_update(&self, hh: &mut Heap, sbh: &mut Superblock, old_b: usize, c: usize) {
        if sbh.is_full() {
            log::debug!(
                "fullness: superblock {:#x} (class {}) became completely full, leaving bin {}",
                sbh.base(),
                c,
                old_b
            );
            unsafe { hh.remove(old_b, c, sbh as *mut Superblock) };
            return;
        }
        let new_b = fullness::target_bin(sbh.allocated_bytes(), sbh.capacity_bytes());
        if new_b != old_b {
            log::debug!(
                "fullness: superblock {:#x} (class {}) moved bin {} -> {} ({}/{} bytes allocated)",
                sbh.base(),
                c,
                old_b,
                new_b,
                sbh.allocated_bytes(),
                sbh.capacity_bytes()
            );
            unsafe {
                hh.remove(old_b, c, sbh as *mut Superblock);
                hh.insert(new_b, c, sbh as *mut Superblock);
            }
        }
    }

    /// §4.5, applied after a free. `old_b` is `-1` if the superblock was
    /// completely full (unlinked) beforehand.
    fn post_free_update(&self, hh: &mut Heap, sbh: &mut Superblock, old_b: isize, c: usize) {
        let new_b = fullness::target_bin(sbh.allocated_bytes(), sbh.capacity_bytes());
        if old_b == NO_BUCKET {
            log::debug!(
                "fullness: superblock {:#x} (class {}) re-entered bin {} after being completely full",
                sbh.base(),
                c,
                new_b
            );
            unsafe { hh.insert(new_b, c, sbh as *mut Superblock) };
        } else if new_b != old_b as usize {
            log::debug!(
                "fullness: superblock {:#x} (class {}) moved bin {} -> {} ({}/{} bytes allocated)",
                sbh.base(),
                c,
                old_b,
                new_b,
                sbh.allocated_bytes(),
                sbh.capacity_bytes()
            );
            unsafe {
                hh.remove(old_b as usize, c, sbh as *mut Superblock);
                hh.insert(new_b, c, sbh as *mut Superblock);
            }
        }
    }
}
