//! `mm_init` (§4.8): carves the size-class table, the heap pointer array,
//! and every heap's metadata block out of the raw region, in that order, so
//! `SUPERBLOCK_START` sits strictly after every other structure.

use crate::consts::round_up;
use crate::error::{InitError, Result};
use crate::heap::{self, Heap};
use crate::platform;
use crate::raw::RawHeap;
use crate::size_class::SizeClassTable;
use std::mem;

pub struct Bootstrap {
    pub raw: RawHeap,
    pub classes: SizeClassTable,
    pub heaps: *mut *mut Heap,
    pub num_heaps: usize,
    pub superblock_start: usize,
}

unsafe impl Send for Bootstrap {}
unsafe impl Sync for Bootstrap {}

pub fn bootstrap(raw: RawHeap) -> Result<Bootstrap> {
    let classes = SizeClassTable::build(&raw)?;
    let k = classes.len();
    let num_heaps = platform::num_processors() + 1;

    let ptr_table_bytes = round_up(num_heaps * mem::size_of::<usize>(), 8);
    let ptr_table_addr = raw.sbrk(ptr_table_bytes).ok_or(InitError::RawProviderFailed)?;
    let heaps = ptr_table_addr as *mut *mut Heap;

    let heap_meta_bytes = heap::metadata_size(k);
    for i in 0..num_heaps {
        let meta_addr = raw.sbrk(heap_meta_bytes).ok_or(InitError::RawProviderFailed)?;
        let h = unsafe { Heap::init(meta_addr, i, k) };
        unsafe { heaps.add(i).write(h) };
    }

    let page = raw.pagesize();
    let top = raw.current_top();
    let padded = round_up(top, page);
    if padded > top {
        raw.sbrk(padded - top).ok_or(InitError::RawProviderFailed)?;
    }
    let superblock_start = raw.current_top();
    debug_assert_eq!(superblock_start, padded);
    debug_assert_eq!(superblock_start % page, 0);

    log::info!(
        "mm_init: {} size classes, {} heaps, SUPERBLOCK_START = {:#x}",
        k,
        num_heaps,
        superblock_start
    );

    Ok(Bootstrap {
        raw,
        classes,
        heaps,
        num_heaps,
        superblock_start,
    })
}
