//! A cacheline-padded test-and-test-and-set spinlock.
//!
//! Heap and superblock critical sections are a handful of pointer writes, so
//! a spinlock with exponential backoff avoids a syscall round trip for the
//! common case. Unlike `std::sync::Mutex`, this type has no drop glue and no
//! allocation of its own, so it can be embedded directly inside a header
//! placed in the raw mmap'd region right next to the data it protects.
//!
//! Protected fields are ordinary fields on the surrounding struct, not boxed
//! inside the lock, because a single header sometimes has fields protected
//! by two different locks (e.g. a superblock's `prev`/`next` bucket links
//! are protected by the owning heap's lock, while `head`/`allocated` are
//! protected by the superblock's own lock). Callers are responsible for
//! holding the right lock before touching the right fields; this mirrors
//! the original C superblock/heap structs, where a `pthread_mutex_t` sits
//! beside the fields it guards rather than wrapping them.

use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};

#[repr(align(64))]
pub struct RawSpinLock {
    locked: AtomicBool,
}

impl RawSpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Spin until the lock is acquired.
    pub fn lock(&self) {
        let backoff = Backoff::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    /// Attempt to acquire the lock without blocking.
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for `RawSpinLock`, for the common case where a critical
/// section is exactly one scope. The allocate/free protocols that need to
/// hold a lock across several calls (§4.6/§4.7) use `lock`/`unlock`
/// directly instead, since the hold spans more than one lexical scope.
pub struct SpinGuard<'a> {
    lock: &'a RawSpinLock,
}

impl<'a> SpinGuard<'a> {
    pub fn new(lock: &'a RawSpinLock) -> Self {
        lock.lock();
        Self { lock }
    }
}

impl<'a> Drop for SpinGuard<'a> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
