//! The raw heap provider: a `sbrk`-style bump allocator over a single,
//! fixed-capacity anonymous mapping obtained once from the host.
//!
//! This is the out-of-scope collaborator named by §6's "Raw provider
//! contract" — the spec only describes its interface, but a runnable crate
//! needs a body behind it. `mem_sbrk` never shrinks and the mapping is
//! never returned to the OS while the allocator is alive, matching the
//! historical `memlib.h` contract this is grounded on.

use crate::consts::DEFAULT_DSEG_MAX;
use crate::error::{InitError, Result};
use crate::lock::RawSpinLock;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct RawHeap {
    base: usize,
    capacity: usize,
    cursor: AtomicUsize,
    sbrk_lock: RawSpinLock,
    page_size: usize,
}

impl RawHeap {
    /// `mem_init`. Maps `capacity` bytes of zeroed, anonymous memory.
    /// Returns `InitError::RawProviderFailed` if the mapping cannot be
    /// created, which is the only failure this crate's bootstrap can hit.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = errno::errno();
            log::error!("mem_init: mmap of {} bytes failed: [{}] {}", capacity, err.0, err);
            return Err(InitError::RawProviderFailed);
        }
        log::info!("mem_init: mapped {} bytes at {:p}", capacity, ptr);
        Ok(Self {
            base: ptr as usize,
            capacity,
            cursor: AtomicUsize::new(0),
            sbrk_lock: RawSpinLock::new(),
            page_size,
        })
    }

    /// `mem_init` with the default capacity (§10).
    pub fn new() -> Result<Self> {
        Self::with_capacity(default_capacity())
    }

    /// `mem_sbrk(n)`. Bumps the cursor by `n` bytes and returns the prior
    /// cursor position as an address, or `None` if that would exceed
    /// `dseg_hi`. Serialized by `mem_sbrk_lock`; held for exactly this call.
    pub fn sbrk(&self, n: usize) -> Option<usize> {
        let _guard = crate::lock::SpinGuard::new(&self.sbrk_lock);
        let old = self.cursor.load(Ordering::Relaxed);
        let new = match old.checked_add(n) {
            Some(new) if new <= self.capacity => new,
            _ => {
                log::warn!(
                    "mem_sbrk: out of memory requesting {} bytes ({} of {} used)",
                    n,
                    old,
                    self.capacity
                );
                return None;
            }
        };
        self.cursor.store(new, Ordering::Relaxed);
        Some(self.base + old)
    }

    /// `mem_pagesize()`.
    pub fn pagesize(&self) -> usize {
        self.page_size
    }

    /// `dseg_lo`.
    pub fn dseg_lo(&self) -> usize {
        self.base
    }

    /// `dseg_hi` (exclusive).
    pub fn dseg_hi(&self) -> usize {
        self.base + self.capacity
    }

    /// `dseg_size`.
    pub fn dseg_size(&self) -> usize {
        self.capacity
    }

    /// `mem_usage()`: bytes bumped so far (diagnostic, not in the distilled
    /// spec's contract but harmless and useful for tests).
    pub fn usage(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Current top of the bumped region, i.e. `dseg_lo + usage()`. Used by
    /// bootstrap to find where padding should begin (§4.8).
    pub fn current_top(&self) -> usize {
        self.base + self.cursor.load(Ordering::Relaxed)
    }
}

impl Drop for RawHeap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.capacity);
        }
    }
}

unsafe impl Send for RawHeap {}
unsafe impl Sync for RawHeap {}

/// Default raw-region capacity: the historical 40 MiB `DSEG_MAX` ceiling,
/// scaled gently with detected system memory (one part in 256) and capped
/// so a default `mm_init()` stays fast in tests and the demo binary even on
/// a large machine.
pub fn default_capacity() -> usize {
    match sys_info::mem_info() {
        Ok(info) => {
            let total_bytes = (info.total as usize).saturating_mul(1024);
            (total_bytes / 256).clamp(DEFAULT_DSEG_MAX, DEFAULT_DSEG_MAX * 4)
        }
        Err(e) => {
            log::warn!("mem_init: could not query system memory ({}), using default capacity", e);
            DEFAULT_DSEG_MAX
        }
    }
}
