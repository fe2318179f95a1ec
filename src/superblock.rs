//! Superblock layout, initialization, and the intra-block freelist
//! operations (§3 "Superblock", §4.2, §4.3).

use crate::consts::{round_up, SB};
use crate::freelist::{self, FreelistNode};
use crate::lock::RawSpinLock;
use std::mem;

/// Superblock header size, rounded up to an 8-byte multiple so the first
/// block starts 8-byte aligned.
pub const HEADER_SIZE: usize = round_up(mem::size_of::<Superblock>(), 8);

/// Bytes available for blocks in a superblock's first unit.
pub const SB_AVAILABLE: usize = SB - HEADER_SIZE;

/// Sentinel bucket index meaning "not linked into any bucket list" — either
/// completely full, or just minted and not yet placed.
pub const NO_BUCKET: isize = -1;

#[repr(C)]
pub struct Superblock {
    pub lock: RawSpinLock,
    head: u32,
    allocated: usize,
    owner: usize,
    pub size_class: usize,
    class_size: usize,
    bucketnum: isize,
    pub units: usize,
    capacity_blocks: usize,
    prev: *mut Superblock,
    next: *mut Superblock,
}

unsafe impl Send for Superblock {}
unsafe impl Sync for Superblock {}

/// How many superblock units a class of size `class_size` needs, per §4.6
/// step 6: `U = 1 + max(0, ceil((S[c] - SB_available) / SB))`.
pub fn units_for(class_size: usize) -> usize {
    if class_size <= SB_AVAILABLE {
        1
    } else {
        1 + ceil_div(class_size - SB_AVAILABLE, SB)
    }
}

/// Block capacity `C` of a superblock spanning `units` units for a class of
/// size `class_size` (§3): `C = ((U - 1)*SB + SB_available) / S[c]`.
pub fn capacity_for(units: usize, class_size: usize) -> usize {
    ((units - 1) * SB + SB_AVAILABLE) / class_size
}

fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

impl Superblock {
    /// `init_superblock` (§4.2). `addr` must be the base of a fresh,
    /// `units`-unit region obtained from the raw provider, never before
    /// used. Writes the header and a single bulk freelist node covering
    /// every block. Returns the initialized header.
    pub unsafe fn init(
        addr: usize,
        owner: usize,
        size_class: usize,
        class_size: usize,
        units: usize,
    ) -> *mut Superblock {
        let capacity = capacity_for(units, class_size);
        debug_assert!(capacity > 0, "size class does not fit even one block");
        let header = Superblock {
            lock: RawSpinLock::new(),
            head: freelist::NONE,
            allocated: 0,
            owner,
            size_class,
            class_size,
            bucketnum: NO_BUCKET,
            units,
            capacity_blocks: capacity,
            prev: std::ptr::null_mut(),
            next: std::ptr::null_mut(),
        };
        let ptr = addr as *mut Superblock;
        std::ptr::write(ptr, header);

        let node_addr = addr + HEADER_SIZE;
        FreelistNode::new(freelist::NONE, capacity as u32).write(node_addr);
        (*ptr).head = freelist::offset_of(addr, node_addr);
        ptr
    }

    #[inline]
    pub fn base(&self) -> usize {
        self as *const Self as usize
    }

    #[inline]
    pub fn class_size(&self) -> usize {
        self.class_size
    }

    #[inline]
    pub fn capacity_blocks(&self) -> usize {
        self.capacity_blocks
    }

    #[inline]
    pub fn capacity_bytes(&self) -> usize {
        self.capacity_blocks * self.class_size
    }

    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.head == freelist::NONE
    }

    #[inline]
    pub fn owner(&self) -> usize {
        self.owner
    }

    #[inline]
    pub fn set_owner(&mut self, owner: usize) {
        self.owner = owner;
    }

    #[inline]
    pub fn bucketnum(&self) -> isize {
        self.bucketnum
    }

    #[inline]
    pub fn set_bucketnum(&mut self, b: isize) {
        self.bucketnum = b;
    }

    #[inline]
    pub fn prev(&self) -> *mut Superblock {
        self.prev
    }

    #[inline]
    pub fn set_prev(&mut self, p: *mut Superblock) {
        self.prev = p;
    }

    #[inline]
    pub fn next(&self) -> *mut Superblock {
        self.next
    }

    #[inline]
    pub fn set_next(&mut self, n: *mut Superblock) {
        self.next = n;
    }

    /// Pop one block from the freelist (§4.3 "Pop one block"). Caller must
    /// hold `self.lock`. Returns `None` only if the superblock is already
    /// completely full, which callers are expected not to hit (a full
    /// superblock is never left linked into a bucket a search would find).
    pub fn allocate_block(&mut self) -> Option<usize> {
        if self.head == freelist::NONE {
            return None;
        }
        let base = self.base();
        let node_addr = base + self.head as usize;
        let mut node = unsafe { FreelistNode::read(node_addr) };
        let result_addr = if node.n > 1 {
            let addr = node_addr + (node.n as usize - 1) * self.class_size;
            node.n -= 1;
            unsafe { node.write(node_addr) };
            addr
        } else {
            self.head = node.next;
            node_addr
        };
        self.allocated += self.class_size;
        log::trace!(
            "superblock {:#x}: allocated block at {:#x} (class {}, allocated now {})",
            self.base(),
            result_addr,
            self.size_class,
            self.allocated
        );
        Some(result_addr)
    }

    /// Push one block back onto the freelist (§4.3 "Push one block").
    /// Caller must hold `self.lock` and must pass an address this
    /// superblock itself handed out.
    pub fn free_block(&mut self, addr: usize) {
        let base = self.base();
        debug_assert!(addr >= base + HEADER_SIZE);
        debug_assert_eq!((addr - base - HEADER_SIZE) % self.class_size, 0);
        let node = FreelistNode::new(self.head, 1);
        unsafe { node.write(addr) };
        self.head = freelist::offset_of(base, addr);
        self.allocated -= self.class_size;
        log::trace!(
            "superblock {:#x}: freed block at {:#x} (class {}, allocated now {})",
            base,
            addr,
            self.size_class,
            self.allocated
        );
    }
}
