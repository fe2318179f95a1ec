//! Smoke-test binary: `mm_init`, then a handful of threads each run a
//! doubling-size allocate/free sweep. The spiritual successor to the
//! historical `main()` smoke test, spread across threads to exercise the
//! per-CPU heaps instead of a single serial sweep.

use std::thread;

fn main() {
    env_logger::init();

    let rc = bibop::mm_init();
    if rc != 0 {
        eprintln!("mm_init failed: {}", rc);
        std::process::exit(1);
    }
    println!("{} allocator ready", bibop::TEAM.name);

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            thread::spawn(move || {
                let mut size: usize = 2;
                let mut allocated = 0usize;
                let mut refused = 0usize;
                for _ in 0..20 {
                    let p = bibop::mm_malloc(size);
                    if p.is_null() {
                        refused += 1;
                    } else {
                        allocated += 1;
                        bibop::mm_free(p);
                    }
                    size = size.saturating_mul(2);
                }
                println!(
                    "worker {}: {} allocated, {} refused",
                    worker, allocated, refused
                );
            })
        })
        .collect();

    for h in handles {
        h.join().expect("worker thread panicked");
    }
}
