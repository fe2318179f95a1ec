//! Public surface (§6): the `extern "C"` entry points, `mm_calloc`/
//! `mm_realloc` convenience wrappers, identity metadata, and an optional
//! `GlobalAlloc` adapter for the demo binary.

use crate::allocator::Allocator;
use core::alloc::{GlobalAlloc, Layout};
use std::os::raw::{c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

static INSTANCE: AtomicPtr<Allocator> = AtomicPtr::new(ptr::null_mut());

/// Identity metadata, mirroring the historical "team name to be displayed
/// on webpage" convention.
pub struct TeamInfo {
    pub name: &'static str,
    pub members: &'static [&'static str],
}

pub static TEAM: TeamInfo = TeamInfo {
    name: "bibop",
    members: &[],
};

fn instance() -> &'static Allocator {
    let p = INSTANCE.load(Ordering::Acquire);
    assert!(!p.is_null(), "mm_init must be called before any other mm_* function");
    unsafe { &*p }
}

/// `mm_init()`. Idempotent: a second call is a no-op that returns success,
/// matching `mem_init`'s contract (§4.9). Returns `0` on success, nonzero on
/// bootstrap failure (raw provider could not serve a bookkeeping region).
#[no_mangle]
pub extern "C" fn mm_init() -> c_int {
    if !INSTANCE.load(Ordering::Acquire).is_null() {
        return 0;
    }
    match Allocator::new() {
        Ok(a) => {
            let boxed = Box::into_raw(Box::new(a));
            match INSTANCE.compare_exchange(
                ptr::null_mut(),
                boxed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => 0,
                Err(_) => {
                    // Lost the race to a concurrent mm_init; drop ours.
                    unsafe { drop(Box::from_raw(boxed)) };
                    0
                }
            }
        }
        Err(e) => {
            log::error!("mm_init: {}", e);
            1
        }
    }
}

/// `mm_malloc(size)`.
#[no_mangle]
pub extern "C" fn mm_malloc(size: usize) -> *mut c_void {
    instance().malloc(size) as *mut c_void
}

/// `mm_free(p)`. `p` must have been returned by `mm_malloc`/`mm_calloc`/
/// `mm_realloc` and not already freed.
#[no_mangle]
pub extern "C" fn mm_free(p: *mut c_void) {
    instance().free(p as *mut u8)
}

/// `mm_calloc(nmemb, size)`.
#[no_mangle]
pub extern "C" fn mm_calloc(nmemb: usize, size: usize) -> *mut c_void {
    instance().calloc(nmemb, size) as *mut c_void
}

/// `mm_realloc(p, size)`.
#[no_mangle]
pub extern "C" fn mm_realloc(p: *mut c_void, size: usize) -> *mut c_void {
    instance().realloc(p as *mut u8, size) as *mut c_void
}

/// `core::alloc::GlobalAlloc` adapter over `mm_malloc`/`mm_free`, for use by
/// the demo binary and benchmarks. Never installed as this library's own
/// `#[global_allocator]` — doing so would route the allocator's own
/// bookkeeping allocations (which it has none of, but any future one) back
/// through itself before `mm_init` has run.
pub struct BibopGlobalAlloc;

unsafe impl GlobalAlloc for BibopGlobalAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // Blocks are only 8-byte aligned (§1 Non-goals); pad for anything
        // stricter by over-requesting and only ever using the returned
        // pointer directly, matching the allocator's "no splitting" model.
        debug_assert!(layout.align() <= 8, "bibop only guarantees 8-byte alignment");
        instance().malloc(layout.size())
    }

    unsafe fn dealloc(&self, p: *mut u8, _layout: Layout) {
        instance().free(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mm_init_is_idempotent() {
        assert_eq!(mm_init(), 0);
        assert_eq!(mm_init(), 0);
    }

    #[test]
    fn malloc_free_round_trip_through_the_c_abi() {
        mm_init();
        let p = mm_malloc(16);
        assert!(!p.is_null());
        mm_free(p);
    }

    #[test]
    fn team_info_has_a_name() {
        assert!(!TEAM.name.is_empty());
    }

    #[test]
    fn global_alloc_adapter_round_trips() {
        mm_init();
        let layout = Layout::from_size_align(32, 8).unwrap();
        let alloc = BibopGlobalAlloc;
        unsafe {
            let p = alloc.alloc(layout);
            assert!(!p.is_null());
            assert_eq!((p as usize) % 8, 0);
            ptr::write_bytes(p, 0xcd, 32);
            alloc.dealloc(p, layout);
        }
    }
}
