//! A fixed-size table mapping small integer handles to live caches.
//!
//! Mirrors the boundary a hosting kernel draws between this crate and its
//! syscall layer: user-facing code deals in non-negative integer handles,
//! never in raw cache pointers. Marshalling arguments out of a trap frame,
//! validating a user-supplied constructor/destructor function pointer
//! before it's ever called, and everything else a syscall entry point does
//! belong to the hosting kernel, not here — this module only owns the
//! id-to-cache mapping.

use core::ptr::NonNull;

use crate::memory::allocators::slab::{Cache, Ctor, Dtor};
use crate::sync::SpinLock;

/// Upper bound on live caches reachable through the table at once.
pub const MAX_CACHES: usize = 64;

/// A fixed-size cache registry.
pub struct CacheTable {
    slots: SpinLock<[Option<NonNull<Cache>>; MAX_CACHES]>,
}

unsafe impl Sync for CacheTable {}

impl CacheTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self {
            slots: SpinLock::new([None; MAX_CACHES]),
        }
    }

    /// Creates a cache and assigns it the first free handle.
    ///
    /// Returns `None` if cache creation itself fails (see
    /// [`Cache::create`]) or if the table is full; in the latter case the
    /// cache that was just created is destroyed immediately rather than
    /// leaked.
    pub fn create(
        &self,
        name: &str,
        size: u32,
        align: u32,
        ctor: Option<Ctor>,
        dtor: Option<Dtor>,
    ) -> Option<usize> {
        let cache = Cache::create(name, size, align, ctor, dtor)?;

        let mut slots = self.slots.lock();
        match slots.iter().position(Option::is_none) {
            Some(id) => {
                slots[id] = Some(NonNull::from(cache));
                Some(id)
            }
            None => {
                drop(slots);
                // SAFETY: `cache` was just created, is unreferenced by
                // anyone else, and we're about to discard its only handle.
                unsafe {
                    Cache::destroy(cache);
                }
                None
            }
        }
    }

    fn get(&self, id: usize) -> Option<NonNull<Cache>> {
        self.slots.lock().get(id).copied().flatten()
    }

    /// Allocates an object from the cache named by `id`.
    ///
    /// Returns `None` if `id` is out of range, unassigned, or the cache is
    /// exhausted — the same null-on-failure convention the underlying
    /// engine API uses.
    pub fn alloc(&self, id: usize) -> Option<NonNull<u8>> {
        let cache = self.get(id)?;
        unsafe { cache.as_ref() }.alloc()
    }

    /// Frees `obj` back to the cache named by `id`.
    ///
    /// A no-op if `id` doesn't name a live cache, or if `obj` is `None`.
    pub fn free(&self, id: usize, obj: Option<NonNull<u8>>) {
        let Some(cache) = self.get(id) else {
            return;
        };
        unsafe { cache.as_ref() }.free(obj);
    }

    /// Destroys the cache named by `id` and frees its handle.
    ///
    /// A no-op (returning `false`) if `id` doesn't name a live cache.
    ///
    /// # Safety
    /// Same obligations as [`Cache::destroy`]: no concurrent call through
    /// this handle may be in flight, and the handle must not be reused
    /// without a new [`create`](Self::create) assigning it.
    pub unsafe fn destroy(&self, id: usize) -> bool {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(id) else {
            return false;
        };
        let Some(cache) = slot.take() else {
            return false;
        };
        drop(slots);
        unsafe {
            Cache::destroy(cache.as_ref());
        }
        true
    }
}

impl Default for CacheTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide cache registry.
pub static CACHE_TABLE: CacheTable = CacheTable::new();
