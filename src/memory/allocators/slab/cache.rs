//! Named, typed object caches built on top of the frame allocator.

use core::ptr::NonNull;

use intrusive_collections::LinkedList;

use crate::error::CacheCorruption;
use crate::memory::allocators::frame;
use crate::memory::{align_up, CACHE_NAME_MAX, FRAME_SIZE};
use crate::sync::SpinLock;

use super::slab::{SlabAdapter, SlabHeader, SlabState};

/// Constructor called on an object the first time it's handed out by a
/// freshly created slab... actually on every allocation, mirroring the
/// reference implementation: cheap to call unconditionally, and it runs
/// after the cache's lock has been released.
pub type Ctor = fn(NonNull<u8>);
/// Destructor, called before an object is returned to its slab, with the
/// cache's lock not yet held.
pub type Dtor = fn(NonNull<u8>);

struct CacheLists {
    empty: LinkedList<SlabAdapter>,
    partial: LinkedList<SlabAdapter>,
    full: LinkedList<SlabAdapter>,
}

impl CacheLists {
    fn new() -> Self {
        Self {
            empty: LinkedList::new(SlabAdapter::new()),
            partial: LinkedList::new(SlabAdapter::new()),
            full: LinkedList::new(SlabAdapter::new()),
        }
    }
}

/// A cache of same-sized, same-typed objects.
///
/// A cache's descriptor lives inside a frame borrowed from the frame
/// allocator (there is no general-purpose heap underneath this crate), so
/// instances are only ever reached through `&'static Cache` returned by
/// [`Cache::create`]. Everything mutable lives behind one lock guarding
/// the three classification lists; `objsize`/`align`/`ctor`/`dtor` are
/// fixed for the cache's lifetime and need no synchronization to read.
pub struct Cache {
    name_buf: [u8; CACHE_NAME_MAX],
    name_len: u8,
    objsize: u32,
    align: u32,
    header_align: usize,
    ctor: Option<Ctor>,
    dtor: Option<Dtor>,
    lists: SpinLock<CacheLists>,
}

unsafe impl Sync for Cache {}

impl Cache {
    /// The cache's name, truncated to [`CACHE_NAME_MAX`] bytes at creation.
    pub fn name(&self) -> &str {
        core::str::from_utf8(&self.name_buf[..self.name_len as usize]).unwrap_or("")
    }

    /// Size of each object handed out by this cache, after alignment
    /// rounding and the pointer-size floor.
    pub fn object_size(&self) -> u32 {
        self.objsize
    }

    /// Creates a cache named `name` for objects of (at least) `size` bytes.
    ///
    /// `align` is rounded up to if non-zero; `align == 0` means the caller
    /// doesn't care, and `size` is used as-is (beyond the pointer-size
    /// floor every object needs to hold a free-list link). `ctor`, if
    /// given, runs on every object just before it's returned from
    /// [`alloc`](Self::alloc); `dtor` runs on every object just before
    /// [`free`](Self::free) returns it to its slab.
    ///
    /// Returns `None` if `name` is empty, `size` is zero, or the object
    /// (after alignment) plus its slab header wouldn't fit in a single
    /// frame, or the frame allocator is exhausted.
    pub fn create(
        name: &str,
        size: u32,
        align: u32,
        ctor: Option<Ctor>,
        dtor: Option<Dtor>,
    ) -> Option<&'static Cache> {
        if name.is_empty() || size == 0 {
            return None;
        }

        let mut objsize = if align == 0 {
            size
        } else {
            align_up(size as usize, align as usize) as u32
        };
        let ptr_size = core::mem::size_of::<usize>() as u32;
        if objsize < ptr_size {
            objsize = ptr_size;
        }

        let header_align = if align == 0 {
            core::mem::align_of::<SlabHeader>()
        } else {
            align as usize
        };
        let header_slot = align_up(core::mem::size_of::<SlabHeader>(), header_align);
        if header_slot + objsize as usize > FRAME_SIZE {
            return None;
        }

        let frame_addr = frame::alloc_frame()?;
        let cache_ptr = frame_addr as *mut Cache;

        let mut name_buf = [0u8; CACHE_NAME_MAX];
        let n = core::cmp::min(name.len(), CACHE_NAME_MAX);
        name_buf[..n].copy_from_slice(&name.as_bytes()[..n]);

        unsafe {
            cache_ptr.write(Cache {
                name_buf,
                name_len: n as u8,
                objsize,
                align,
                header_align,
                ctor,
                dtor,
                lists: SpinLock::new(CacheLists::new()),
            });
            Some(&*cache_ptr)
        }
    }

    /// Destroys `cache`, returning every slab's frame and the cache's own
    /// descriptor frame to the frame allocator.
    ///
    /// # Safety
    /// The caller must guarantee no other thread is concurrently calling
    /// any method on `cache`, and that `cache` is never used again after
    /// this call (including through other `&'static Cache` copies obtained
    /// before this call). Destroying a cache with live (unfreed) objects
    /// is undefined: any outstanding pointer into one of its slabs becomes
    /// dangling the moment that slab's frame is returned to the allocator.
    pub unsafe fn destroy(cache: &'static Cache) {
        let self_addr = cache as *const Cache as usize;
        {
            let mut lists = cache.lists.lock();
            for list in [&mut lists.partial, &mut lists.full, &mut lists.empty] {
                while let Some(slab) = list.pop_front() {
                    let slab_ptr = intrusive_collections::UnsafeRef::into_raw(slab);
                    frame::free_frame(slab_ptr as usize);
                }
            }
        }
        frame::free_frame(self_addr);
    }

    /// Allocates one object, creating a new slab if no partial or empty
    /// slab is available.
    ///
    /// Returns `None` only if a new slab was needed and the frame
    /// allocator was exhausted; an existing partial or empty slab is
    /// always preferred and never fails.
    pub fn alloc(&self) -> Option<NonNull<u8>> {
        let mut lists = self.lists.lock();

        let slab_ptr: *mut SlabHeader = if let Some(slab) = lists.partial.pop_front() {
            intrusive_collections::UnsafeRef::into_raw(slab).cast_mut()
        } else if let Some(slab) = lists.empty.pop_front() {
            intrusive_collections::UnsafeRef::into_raw(slab).cast_mut()
        } else {
            let frame_addr = frame::alloc_frame()?;
            let cache_nn = NonNull::from(self);
            unsafe {
                SlabHeader::init(
                    NonNull::new_unchecked(frame_addr as *mut u8),
                    cache_nn,
                    self.objsize,
                    self.header_align,
                )
                .as_ptr()
            }
        };

        let obj = unsafe { (*slab_ptr).alloc_object() }
            .expect("a newly chosen slab must have at least one free object");

        unsafe {
            match (*slab_ptr).state() {
                SlabState::Full => lists
                    .full
                    .push_front(intrusive_collections::UnsafeRef::from_raw(slab_ptr)),
                _ => lists
                    .partial
                    .push_front(intrusive_collections::UnsafeRef::from_raw(slab_ptr)),
            }
        }

        drop(lists);

        if let Some(ctor) = self.ctor {
            ctor(obj);
        }

        Some(obj)
    }

    /// Finds the slab owning `obj` among the three lists and unlinks it,
    /// returning the raw pointer. Scans partial, then full, then empty,
    /// matching the historical priority order of the lists themselves.
    fn find_and_unlink(lists: &mut CacheLists, obj: NonNull<u8>, objsize: u32) -> Option<*mut SlabHeader> {
        for list in [&mut lists.partial, &mut lists.full, &mut lists.empty] {
            let mut cursor = list.front_mut();
            loop {
                match cursor.get() {
                    Some(slab) if slab.contains(obj, objsize) => break,
                    Some(_) => cursor.move_next(),
                    None => break,
                }
            }
            if cursor.get().is_some() {
                let removed = cursor.remove().expect("cursor was positioned on a live element");
                return Some(intrusive_collections::UnsafeRef::into_raw(removed).cast_mut());
            }
        }
        None
    }

    /// Returns `obj` to the cache it was allocated from.
    ///
    /// A `None` object is a silent no-op, matching the historical
    /// "freeing null is fine" convention. Any other object that doesn't
    /// belong to one of this cache's slabs is corruption: the bug is
    /// already in the caller by the time we'd notice, so this panics with
    /// a diagnostic rather than silently ignoring it.
    ///
    /// # Panics
    /// Panics if `obj` does not fall within any slab owned by this cache,
    /// or falls within one but not on an object boundary.
    pub fn free(&self, obj: Option<NonNull<u8>>) {
        let Some(obj) = obj else {
            return;
        };

        if let Some(dtor) = self.dtor {
            dtor(obj);
        }

        let mut lists = self.lists.lock();

        let slab_ptr = match Self::find_and_unlink(&mut lists, obj, self.objsize) {
            Some(ptr) => ptr,
            None => panic!("{}", CacheCorruption::ForeignObject { addr: obj.as_ptr() as usize }),
        };

        unsafe {
            let slab = &mut *slab_ptr;
            let offset = obj.as_ptr() as usize - slab.mem_base();
            if offset % self.objsize as usize != 0 {
                panic!(
                    "{}",
                    CacheCorruption::Misaligned {
                        addr: obj.as_ptr() as usize,
                        objsize: self.objsize,
                    }
                );
            }

            slab.free_object(obj);

            match slab.state() {
                SlabState::Empty => lists
                    .empty
                    .push_front(intrusive_collections::UnsafeRef::from_raw(slab_ptr)),
                _ => lists
                    .partial
                    .push_front(intrusive_collections::UnsafeRef::from_raw(slab_ptr)),
            }
        }
    }
}
