//! Whole-page physical allocator: 4 KiB frames and 2 MiB super-frames.
//!
//! Each size class gets its own free list and its own lock, so allocating a
//! frame never contends with allocating a super-frame. Both lists thread an
//! intrusive singly-linked list through the free blocks themselves: a free
//! block's first word holds the address of the next free block, so the
//! free lists carry no out-of-band storage.

use core::ptr::NonNull;

use log::info;

use crate::error::FrameCorruption;
use crate::memory::{PhysAddr, FRAME_SIZE, N_SUPERFRAMES, SUPERFRAME_SIZE, align_up};
use crate::sync::{Once, SpinLock};

/// Byte pattern written into a block when it is freed.
const FREE_POISON: u8 = 0x11;
/// Byte pattern written into a block when it is handed out, to surface
/// callers that read before initializing.
const ALLOC_POISON: u8 = 0x55;

#[derive(Debug, Clone, Copy)]
struct Bounds {
    managed_start: PhysAddr,
    managed_end: PhysAddr,
    super_start: PhysAddr,
    super_end: PhysAddr,
}

/// A node in an intrusive free list. Lives at the start of a free block;
/// the rest of the block is unused while it sits on the list.
#[repr(C)]
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

struct FreeList {
    head: Option<NonNull<FreeNode>>,
    free_count: usize,
}

// The list only ever holds addresses handed to us through `push`, which
// requires the caller to already have exclusive access to that memory.
unsafe impl Send for FreeList {}

impl FreeList {
    const fn new() -> Self {
        Self {
            head: None,
            free_count: 0,
        }
    }

    /// Pushes `addr` onto the list.
    ///
    /// # Safety
    /// `addr` must point to a block of at least `size_of::<FreeNode>()`
    /// bytes that the caller owns exclusively and isn't already on a free
    /// list.
    unsafe fn push(&mut self, addr: PhysAddr) {
        let node = addr as *mut FreeNode;
        unsafe {
            node.write(FreeNode { next: self.head });
        }
        self.head = NonNull::new(node);
        self.free_count += 1;
    }

    fn pop(&mut self) -> Option<PhysAddr> {
        let node = self.head?;
        self.head = unsafe { (*node.as_ptr()).next };
        self.free_count -= 1;
        Some(node.as_ptr() as PhysAddr)
    }
}

/// Frame and super-frame counts, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct FrameStats {
    /// Free 4 KiB frames.
    pub frames_free: usize,
    /// Free 2 MiB super-frames.
    pub superframes_free: usize,
}

/// The physical frame allocator.
///
/// There is exactly one of these per address space, exposed through the
/// [`FRAME_ALLOCATOR`] singleton and the free functions in this module.
/// Constructing additional instances makes no sense (there is only one
/// physical memory), so the type is not `pub` outside this crate; clients
/// use [`init`], [`alloc_frame`], [`free_frame`], [`alloc_super`] and
/// [`free_super`].
pub struct FrameAllocator {
    frames: SpinLock<FreeList>,
    superframes: SpinLock<FreeList>,
    bounds: Once<Bounds>,
}

// `Bounds` is Copy data written once before concurrent access begins.
unsafe impl Sync for FrameAllocator {}

impl FrameAllocator {
    const fn new() -> Self {
        Self {
            frames: SpinLock::new(FreeList::new()),
            superframes: SpinLock::new(FreeList::new()),
            bounds: Once::new(),
        }
    }

    /// Initializes the allocator over the physical range `[managed_start,
    /// managed_end)`.
    ///
    /// Reserves [`N_SUPERFRAMES`] super-frames at the first 2 MiB-aligned
    /// address at or above `managed_start`, then threads every remaining
    /// 4 KiB frame above that reservation onto the frame free list.
    ///
    /// A second call is ignored (the first caller's region wins), which
    /// keeps this safe to call from more than one independent subsystem
    /// during boot without coordination; beyond that, repeated calls are
    /// not a scenario this allocator needs to support well.
    pub fn init(&self, managed_start: PhysAddr, managed_end: PhysAddr) {
        if self.bounds.get().is_some() {
            return;
        }

        let super_start = align_up(managed_start, SUPERFRAME_SIZE);
        let super_end = super_start + N_SUPERFRAMES * SUPERFRAME_SIZE;
        assert!(
            super_end <= managed_end,
            "not enough physical memory to reserve {} super-frames",
            N_SUPERFRAMES
        );

        self.bounds.call_once(|| Bounds {
            managed_start,
            managed_end,
            super_start,
            super_end,
        });
        if self.bounds.get().map(|b| b.managed_start) != Some(managed_start) {
            // Lost a race against another caller of `init`; its region won.
            return;
        }

        {
            let mut list = self.superframes.lock();
            let mut addr = super_start;
            for _ in 0..N_SUPERFRAMES {
                unsafe {
                    list.push(addr);
                }
                addr += SUPERFRAME_SIZE;
            }
        }

        let frame_start = align_up(super_end, FRAME_SIZE);
        {
            let mut list = self.frames.lock();
            let mut addr = frame_start;
            while addr + FRAME_SIZE <= managed_end {
                unsafe {
                    list.push(addr);
                }
                addr += FRAME_SIZE;
            }
            info!(
                "frame allocator initialized: {} frames, {} super-frames",
                list.free_count, N_SUPERFRAMES
            );
        }
    }

    fn bounds(&self) -> &Bounds {
        self.bounds
            .get()
            .expect("frame allocator used before init()")
    }

    /// Allocates one 4 KiB frame, or returns `None` if none are free.
    pub fn alloc_frame(&self) -> Option<PhysAddr> {
        let addr = self.frames.lock().pop()?;
        unsafe {
            core::ptr::write_bytes(addr as *mut u8, ALLOC_POISON, FRAME_SIZE);
        }
        Some(addr)
    }

    /// Validates a frame address without mutating any state.
    fn validate_frame(&self, addr: PhysAddr) -> Result<(), FrameCorruption> {
        let b = self.bounds();
        if addr % FRAME_SIZE != 0 {
            return Err(FrameCorruption::Misaligned(addr));
        }
        if addr < b.managed_start || addr >= b.managed_end {
            return Err(FrameCorruption::OutOfRange(addr));
        }
        if addr >= b.super_start && addr < b.super_end {
            return Err(FrameCorruption::InSuperRegion(addr));
        }
        Ok(())
    }

    /// Returns a 4 KiB frame to the free list.
    ///
    /// # Panics
    /// Panics if `addr` is not frame-aligned, falls outside the managed
    /// range, or falls inside the reserved super-frame region. These are
    /// all programmer errors (double free, freeing an unowned address,
    /// corrupted bookkeeping) that this allocator cannot recover from.
    pub fn free_frame(&self, addr: PhysAddr) {
        if let Err(e) = self.validate_frame(addr) {
            panic!("{e}");
        }
        unsafe {
            core::ptr::write_bytes(addr as *mut u8, FREE_POISON, FRAME_SIZE);
            self.frames.lock().push(addr);
        }
    }

    /// Allocates one 2 MiB super-frame, or returns `None` if none are free.
    ///
    /// Unlike [`alloc_frame`](Self::alloc_frame), the returned super-frame is
    /// zero-filled rather than poisoned: callers map super-frames in as page
    /// tables, which must start out all-zero (a zero page-table entry reads
    /// as "not present").
    pub fn alloc_super(&self) -> Option<PhysAddr> {
        let addr = self.superframes.lock().pop()?;
        unsafe {
            core::ptr::write_bytes(addr as *mut u8, 0, SUPERFRAME_SIZE);
        }
        Some(addr)
    }

    fn validate_super(&self, addr: PhysAddr) -> Result<(), FrameCorruption> {
        let b = self.bounds();
        if addr % SUPERFRAME_SIZE != 0 {
            return Err(FrameCorruption::SuperMisaligned(addr));
        }
        if addr < b.super_start || addr >= b.super_end {
            return Err(FrameCorruption::SuperOutOfRange(addr));
        }
        Ok(())
    }

    /// Returns a 2 MiB super-frame to the free list.
    ///
    /// # Panics
    /// Panics if `addr` is not super-frame-aligned or falls outside the
    /// reserved super-frame region.
    pub fn free_super(&self, addr: PhysAddr) {
        if let Err(e) = self.validate_super(addr) {
            panic!("{e}");
        }
        unsafe {
            core::ptr::write_bytes(addr as *mut u8, FREE_POISON, SUPERFRAME_SIZE);
            self.superframes.lock().push(addr);
        }
    }

    /// Snapshot of free-list lengths. Each list is sampled under its own
    /// lock; the two counts are not taken atomically with respect to each
    /// other.
    pub fn stats(&self) -> FrameStats {
        FrameStats {
            frames_free: self.frames.lock().free_count,
            superframes_free: self.superframes.lock().free_count,
        }
    }
}

/// The process-wide frame allocator. There is exactly one physical address
/// space, so this is a singleton rather than a value clients construct.
pub static FRAME_ALLOCATOR: FrameAllocator = FrameAllocator::new();

/// Initializes the global frame allocator over `[managed_start, managed_end)`.
/// See [`FrameAllocator::init`].
pub fn init(managed_start: PhysAddr, managed_end: PhysAddr) {
    FRAME_ALLOCATOR.init(managed_start, managed_end);
}

/// Allocates a 4 KiB frame. See [`FrameAllocator::alloc_frame`].
pub fn alloc_frame() -> Option<PhysAddr> {
    FRAME_ALLOCATOR.alloc_frame()
}

/// Frees a 4 KiB frame. See [`FrameAllocator::free_frame`].
pub fn free_frame(addr: PhysAddr) {
    FRAME_ALLOCATOR.free_frame(addr);
}

/// Allocates a 2 MiB super-frame. See [`FrameAllocator::alloc_super`].
pub fn alloc_super() -> Option<PhysAddr> {
    FRAME_ALLOCATOR.alloc_super()
}

/// Frees a 2 MiB super-frame. See [`FrameAllocator::free_super`].
pub fn free_super(addr: PhysAddr) {
    FRAME_ALLOCATOR.free_super(addr);
}

/// Reads global allocator stats. See [`FrameAllocator::stats`].
pub fn stats() -> FrameStats {
    FRAME_ALLOCATOR.stats()
}
