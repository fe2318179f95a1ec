//! Compile-time configuration, grouped the way the original C sources kept
//! their `#define` block at the top of `malloc.c`.

/// Superblock unit size. Also the page granularity the raw provider is
/// assumed to hand out.
pub const SB: usize = 4096;

/// Number of fullness bins per size class, per heap. Bin 0 is most full,
/// `F - 1` is least full.
pub const F: usize = 3;

/// Smallest size class, in bytes. Must be >= 8 so every free block has room
/// for a freelist node.
pub const MIN_SIZE_CLASS: usize = 8;

/// Growth factor between consecutive size classes.
pub const SIZE_CLASS_BASE: usize = 2;

/// Upper bound on the number of size classes, regardless of how far the
/// geometric sequence would otherwise run.
pub const MAX_NUM_SIZE_CLASSES: usize = 64;

/// Cacheline size used to pad heap metadata and the size-class table so two
/// heaps (or a heap and anything else) never share a cacheline.
pub const CACHELINE_SIZE: usize = 64;

/// A per-CPU heap keeps at least this many live superblocks before any of
/// them becomes eligible to migrate to the global heap.
pub const SB_RESERVE: usize = 4;

/// A superblock with fewer than this many bytes allocated is considered
/// "nearly empty" for the purposes of ownership transfer.
pub const ALLOC_THRESHOLD: usize = SB / 8;

/// Default capacity of the raw heap region, mirroring the historical
/// `DSEG_MAX` ceiling (40 MiB). Tests may request a smaller region directly
/// through `raw::RawHeap::with_capacity`.
pub const DEFAULT_DSEG_MAX: usize = 40 * 1024 * 1024;

/// Round `len` up to the next multiple of `align`. `align` must be a power
/// of two.
#[inline]
pub const fn round_up(len: usize, align: usize) -> usize {
    (len + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_is_identity_on_aligned_input() {
        assert_eq!(round_up(64, 64), 64);
        assert_eq!(round_up(128, 64), 128);
    }

    #[test]
    fn round_up_rounds() {
        assert_eq!(round_up(1, 64), 64);
        assert_eq!(round_up(65, 64), 128);
        assert_eq!(round_up(0, 8), 0);
    }
}
