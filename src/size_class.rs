//! Size-class table construction and resolution (§3 "Size-class table",
//! §4.1 `class_of`).

use crate::consts::{round_up, CACHELINE_SIZE, MAX_NUM_SIZE_CLASSES, MIN_SIZE_CLASS, SIZE_CLASS_BASE};
use crate::error::{InitError, Result};
use crate::raw::RawHeap;
use std::mem;

/// An immutable table of byte sizes `S[0] < S[1] < …`, carved once from the
/// raw provider during bootstrap and never mutated after.
pub struct SizeClassTable {
    ptr: *mut usize,
    len: usize,
}

impl SizeClassTable {
    /// Builds the geometric sequence `S[0] = MIN_SIZE_CLASS`,
    /// `S[i+1] = ceil(S[i] * SIZE_CLASS_BASE)`, stopping at
    /// `MAX_NUM_SIZE_CLASSES` entries or once a class would exceed the raw
    /// heap's total capacity (a class no request could ever be satisfied at
    /// is not worth keeping). Storage is carved for the full
    /// `MAX_NUM_SIZE_CLASSES` capacity regardless of how many classes are
    /// actually populated, mirroring `init_size_classes`'s
    /// `MAX_NUM_SIZE_CLASS`-sized reservation in the original source.
    pub fn build(raw: &RawHeap) -> Result<Self> {
        let mut sizes = Vec::with_capacity(MAX_NUM_SIZE_CLASSES);
        let mut size = MIN_SIZE_CLASS as f64;
        while sizes.len() < MAX_NUM_SIZE_CLASSES {
            let s = size.ceil() as usize;
            if s > raw.dseg_size() {
                break;
            }
            sizes.push(s);
            size *= SIZE_CLASS_BASE as f64;
        }
        debug_assert!(!sizes.is_empty(), "raw heap too small for even one size class");

        let request = round_up(MAX_NUM_SIZE_CLASSES * mem::size_of::<usize>(), CACHELINE_SIZE);
        let base = raw.sbrk(request).ok_or(InitError::RawProviderFailed)?;
        let ptr = base as *mut usize;
        for (i, s) in sizes.iter().enumerate() {
            unsafe { ptr.add(i).write(*s) };
        }
        log::debug!("size classes: {:?}", sizes);
        Ok(Self {
            ptr,
            len: sizes.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `S[c]`. Panics if `c` is out of range — callers only ever index with
    /// a class already validated by `class_of`.
    #[inline]
    pub fn get(&self, c: usize) -> usize {
        debug_assert!(c < self.len);
        unsafe { *self.ptr.add(c) }
    }

    pub fn max_size(&self) -> usize {
        self.get(self.len - 1)
    }

    /// `class_of(size)` (§4.1). Returns the smallest class `c` with
    /// `S[c] >= size`, or `None` if no class is big enough.
    pub fn class_of(&self, size: usize) -> Option<usize> {
        if size == 0 {
            return None;
        }
        let ratio = (size + MIN_SIZE_CLASS - 1) / MIN_SIZE_CLASS;
        let mut c = ceil_log2(ratio) as usize;
        if c > 0 && self.get(c - 1) >= size {
            c -= 1;
        }
        if c >= self.len {
            None
        } else {
            Some(c)
        }
    }
}

unsafe impl Send for SizeClassTable {}
unsafe impl Sync for SizeClassTable {}

/// Smallest `n` such that `2^n >= x`, for `x >= 1`.
#[inline]
fn ceil_log2(x: usize) -> u32 {
    if x <= 1 {
        0
    } else {
        (usize::BITS) - (x - 1).leading_zeros()
    }
}
