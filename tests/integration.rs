//! Integration coverage for the six allocator scenarios.

use bibop::platform;
use bibop::superblock::HEADER_SIZE;
use bibop::Allocator;
use std::sync::Arc;
use std::thread;

const MB: usize = 1024 * 1024;

#[test]
fn boot_and_small_alloc() {
    let a = Allocator::with_capacity(4 * MB).unwrap();
    let p = a.malloc(2);
    assert!(!p.is_null());
    assert_eq!((p as usize) % 8, 0);
    let start = a.superblock_start();
    assert!((p as usize) >= start + HEADER_SIZE, "must land after the superblock header");
    assert!((p as usize) < start + 4096);
}

#[test]
fn doubling_sweep() {
    let a = Allocator::with_capacity(4 * MB).unwrap();
    let mut size = 2usize;
    let mut saw_success = false;
    let mut saw_nil = false;
    for _ in 0..28 {
        let p = a.malloc(size);
        if p.is_null() {
            saw_nil = true;
        } else {
            saw_success = true;
        }
        size = size.saturating_mul(2);
    }
    assert!(saw_success);
    assert!(saw_nil, "a 4 MiB region should eventually refuse a doubling request");
    assert!(!a.malloc(16).is_null(), "allocator stays usable for small classes after a failed large one");
}

#[test]
fn free_restores_class() {
    let a = Allocator::with_capacity(4 * MB).unwrap();
    let p1 = a.malloc(8);
    assert!(!p1.is_null());
    a.free(p1);
    let p2 = a.malloc(8);
    assert_eq!(p1, p2, "the last-pushed freelist node is reused as the new head");
}

#[test]
fn large_class_spans_units() {
    let a = Allocator::with_capacity(16 * MB).unwrap();
    let p1 = a.malloc(4096 - 1);
    assert!(!p1.is_null());
    assert_eq!((p1 as usize) % 8, 0);

    let p2 = a.malloc(2 * 4096);
    assert!(!p2.is_null());
    assert_eq!((p2 as usize) % 8, 0);
}

#[test]
fn cross_cpu_migration() {
    let nproc = platform::num_processors();
    if nproc < 2 {
        // Needs two distinct per-CPU heaps to observe a migration target.
        return;
    }
    let a = Arc::new(Allocator::with_capacity(8 * MB).unwrap());

    // CPU A (heap index 1) links five superblocks across five distinct
    // classes into its buckets, pushing num_superblocks past SB_RESERVE.
    let class0_ptr = {
        let a = a.clone();
        thread::spawn(move || {
            platform::override_caller_cpu_for_test(0);
            let sizes = [2usize, 9, 17, 33, 65];
            let mut first = std::ptr::null_mut();
            for (i, s) in sizes.iter().enumerate() {
                let p = a.malloc(*s);
                assert!(!p.is_null());
                if i == 0 {
                    first = p;
                }
            }
            first as usize
        })
        .join()
        .unwrap()
    };

    assert!(a.num_superblocks_in(1) > bibop::consts::SB_RESERVE);

    // Freeing the lightly-loaded class-0 superblock crosses ALLOC_THRESHOLD
    // and migrates it to the global heap.
    {
        let a = a.clone();
        thread::spawn(move || {
            platform::override_caller_cpu_for_test(0);
            a.free(class0_ptr as *mut u8);
        })
        .join()
        .unwrap();
    }
    assert_eq!(a.owner_of(class0_ptr as *mut u8), 0);

    // CPU B (heap index 2) allocating the same class adopts it from the
    // global heap.
    let adopted_owner = {
        let a = a.clone();
        thread::spawn(move || {
            platform::override_caller_cpu_for_test(1);
            let p = a.malloc(2);
            assert!(!p.is_null());
            a.owner_of(p)
        })
        .join()
        .unwrap()
    };
    assert_eq!(adopted_owner, 2);
}

#[test]
fn ownership_race_does_not_corrupt_bookkeeping() {
    let nproc = platform::num_processors();
    if nproc < 2 {
        return;
    }
    let a = Arc::new(Allocator::with_capacity(8 * MB).unwrap());
    for round in 0..64 {
        let a1 = a.clone();
        let a2 = a.clone();
        let t1 = thread::spawn(move || {
            platform::override_caller_cpu_for_test(0);
            let p = a1.malloc(8 + (round % 4));
            if !p.is_null() {
                a1.free(p);
            }
        });
        let t2 = thread::spawn(move || {
            platform::override_caller_cpu_for_test(1);
            let p = a2.malloc(8 + (round % 4));
            if !p.is_null() {
                a2.free(p);
            }
        });
        t1.join().unwrap();
        t2.join().unwrap();
    }
    // No assertion beyond "did not panic / deadlock": the race's outcome is
    // nondeterministic by design (§8 scenario 6), the invariant under test
    // is that the free-path owner recheck keeps bucket bookkeeping sane
    // under concurrent ownership transfer.
    let p = a.malloc(8);
    assert!(!p.is_null());
}

#[test]
fn no_two_live_pointers_overlap_under_concurrency() {
    let a = Arc::new(Allocator::with_capacity(8 * MB).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let a = a.clone();
            thread::spawn(move || {
                platform::override_caller_cpu_for_test(t);
                let mut ptrs = Vec::new();
                for i in 0..200 {
                    let p = a.malloc(16 + (i % 5) * 8);
                    if !p.is_null() {
                        ptrs.push(p as usize);
                    }
                }
                ptrs.sort_unstable();
                for w in ptrs.windows(2) {
                    assert!(w[1] - w[0] >= 16, "overlapping live allocations");
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
