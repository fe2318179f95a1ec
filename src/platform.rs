//! CPU-id and thread-id discovery. Out of scope for the engine itself (§1),
//! but the allocate path needs a real answer to "which per-CPU heap does
//! this caller use", so this module provides one.

use lazy_static::lazy_static;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

lazy_static! {
    static ref NUM_PROCESSORS: usize = num_cpus::get().max(1);
}

thread_local! {
    // Fallback round-robin assignment for platforms without a cheap way to
    // ask "which CPU am I running on right now" (anything but Linux).
    static FALLBACK_CPU: Cell<Option<usize>> = Cell::new(None);
    // Test-only override, checked before any real CPU discovery. Lets tests
    // pin a thread to a synthetic CPU id without depending on OS scheduling.
    static OVERRIDE_CPU: Cell<Option<usize>> = Cell::new(None);
}

static NEXT_FALLBACK_CPU: AtomicUsize = AtomicUsize::new(0);

/// Number of per-CPU heaps to create. Fixed for the process lifetime.
pub fn num_processors() -> usize {
    *NUM_PROCESSORS
}

/// Pins the calling thread to a synthetic CPU id for the rest of its
/// lifetime, overriding both the Linux `sched_getcpu` path and the
/// round-robin fallback. Intended for tests that need deterministic
/// cross-CPU scenarios regardless of real OS scheduling.
pub fn override_caller_cpu_for_test(cpu: usize) {
    OVERRIDE_CPU.with(|cell| cell.set(Some(cpu % num_processors())));
}

/// The calling thread's current CPU index, always in `[0, num_processors())`.
///
/// On Linux this tracks the real CPU the scheduler last ran the thread on
/// (via `sched_getcpu`), which is what lets contention stay low: threads
/// that stay on one core keep hitting the same per-CPU heap. Elsewhere a
/// thread is assigned a fixed pseudo-CPU index the first time it calls in,
/// round-robin over the processor count.
pub fn caller_cpu() -> usize {
    if let Some(cpu) = OVERRIDE_CPU.with(|cell| cell.get()) {
        return cpu;
    }
    real_caller_cpu()
}

#[cfg(target_os = "linux")]
fn real_caller_cpu() -> usize {
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        fallback_cpu()
    } else {
        (cpu as usize) % num_processors()
    }
}

#[cfg(not(target_os = "linux"))]
fn real_caller_cpu() -> usize {
    fallback_cpu()
}

fn fallback_cpu() -> usize {
    FALLBACK_CPU.with(|cell| {
        if let Some(cpu) = cell.get() {
            return cpu;
        }
        let cpu = NEXT_FALLBACK_CPU.fetch_add(1, Ordering::Relaxed) % num_processors();
        cell.set(Some(cpu));
        cpu
    })
}

/// Diagnostic-only identifier for the calling thread, used in log lines.
pub fn caller_thread_id() -> usize {
    unsafe { libc::pthread_self() as usize }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_cpu_is_in_range() {
        let cpu = caller_cpu();
        assert!(cpu < num_processors());
    }

    #[test]
    fn override_pins_caller_cpu() {
        std::thread::spawn(|| {
            override_caller_cpu_for_test(0);
            assert_eq!(caller_cpu(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn num_processors_is_at_least_one() {
        assert!(num_processors() >= 1);
    }
}
