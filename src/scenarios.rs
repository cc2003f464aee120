//! End-to-end scenarios exercising the frame allocator and slab engine
//! together, as opposed to the per-module unit tests that sit next to each
//! piece of the implementation. Each test here corresponds to one scenario
//! worked out on paper before writing any code; the names below are chosen
//! to be self-explanatory rather than to match that numbering.
//!
//! All of these share the process-wide [`frame::FRAME_ALLOCATOR`] static, so
//! a single [`std::sync::Once`]-guarded region backs every test in this
//! module, sized generously enough for all of them combined. Tests that need
//! exact frame-count bookkeeping take `ACCOUNTING` so they don't race with
//! each other under the default parallel test runner; tests that only care
//! about object-level behavior don't need it.

use std::sync::{Mutex, Once};
use std::vec::Vec;

use crate::handle::CacheTable;
use crate::memory::allocators::frame;
use crate::memory::allocators::slab::slab::SlabHeader;
use crate::memory::{align_up, FRAME_SIZE, N_SUPERFRAMES, SUPERFRAME_SIZE};
use crate::slab::Cache;

fn init_region_once() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let len = N_SUPERFRAMES * SUPERFRAME_SIZE + 8192 * FRAME_SIZE;
        let layout = core::alloc::Layout::from_size_align(len, SUPERFRAME_SIZE).unwrap();
        let ptr = unsafe { std::alloc::alloc(layout) };
        assert!(!ptr.is_null(), "failed to reserve fake physical region");
        let start = ptr as usize;
        frame::init(start, start + len);
    });
}

/// Held by any scenario that reads `frame::stats()` before and after a
/// sequence of operations and needs nothing else in this binary to touch
/// the frame allocator in between.
static ACCOUNTING: Mutex<()> = Mutex::new(());

fn header_slot(align: u32) -> usize {
    let header_align = if align == 0 {
        core::mem::align_of::<SlabHeader>()
    } else {
        align as usize
    };
    align_up(core::mem::size_of::<SlabHeader>(), header_align)
}

#[test]
fn simple_churn_reuses_one_slab() {
    init_region_once();
    let cache = Cache::create("churn", 1024, 0, None, None).unwrap();

    for _ in 0..1024 {
        let obj = cache.alloc().expect("exhaustion not expected for this region size");
        cache.free(Some(obj));
    }
}

#[test]
fn batch_of_sixteen_consumes_expected_frames() {
    init_region_once();
    let _guard = ACCOUNTING.lock().unwrap();

    let objsize: u32 = 64;
    let nr_objs_per_slab = (FRAME_SIZE - header_slot(0)) / objsize as usize;
    // Each batch fully frees itself before the next starts, so once enough
    // slabs exist to hold one batch of 16, every later batch is served from
    // the same, already-empty slabs — frame consumption plateaus after the
    // first iteration instead of growing with the iteration count.
    let expected_slabs = 16usize.div_ceil(nr_objs_per_slab);

    let before = frame::stats().frames_free;
    let cache = Cache::create("batch16", objsize, 0, None, None).unwrap();

    let mut live: Vec<core::ptr::NonNull<u8>> = Vec::new();
    for _ in 0..64 {
        for _ in 0..16 {
            live.push(cache.alloc().unwrap());
        }
        for obj in live.drain(..) {
            cache.free(Some(obj));
        }
    }

    // One extra frame for the cache descriptor itself.
    let consumed = before - frame::stats().frames_free;
    assert_eq!(consumed, expected_slabs + 1);

    unsafe {
        Cache::destroy(cache);
    }
}

#[test]
fn non_dividing_object_size_packs_as_expected() {
    init_region_once();

    let cache = Cache::create("odd80", 80, 0, None, None).unwrap();
    assert_eq!(cache.object_size(), 80);

    let expected_nr_objs = (FRAME_SIZE - header_slot(0)) / 80;
    assert!(expected_nr_objs >= 16);

    let mut objs = Vec::new();
    for _ in 0..16 {
        let obj = cache.alloc().unwrap();
        assert_eq!(obj.as_ptr() as usize % core::mem::align_of::<usize>(), 0);
        objs.push(obj);
    }
    for obj in objs {
        cache.free(Some(obj));
    }
}

#[test]
fn out_of_order_free_converges_on_empty() {
    init_region_once();

    let cache = Cache::create("outoforder", 48, 0, None, None).unwrap();
    let mut objs = Vec::new();
    for _ in 0..64 {
        objs.push(cache.alloc().unwrap());
    }

    // Reverse order first.
    let reversed: Vec<_> = objs.drain(..32).rev().collect();
    for obj in reversed {
        cache.free(Some(obj));
    }
    // Then whatever's left, even indices then odd.
    let rest = objs;
    let (evens, odds): (Vec<_>, Vec<_>) = rest.into_iter().enumerate().partition(|(i, _)| i % 2 == 0);
    for (_, obj) in evens {
        cache.free(Some(obj));
    }
    for (_, obj) in odds {
        cache.free(Some(obj));
    }

    // Nothing left outstanding; a fresh alloc must come back non-null,
    // proving the single slab is reachable again (it's either still
    // partial/empty, not leaked as permanently full).
    let obj = cache.alloc().unwrap();
    cache.free(Some(obj));
}

#[test]
fn destroying_cache_returns_all_frames() {
    init_region_once();
    let _guard = ACCOUNTING.lock().unwrap();

    let before = frame::stats().frames_free;
    let cache = Cache::create("destroyme", 200, 0, None, None).unwrap();

    let mut objs = Vec::new();
    for _ in 0..64 {
        objs.push(cache.alloc().unwrap());
    }
    for obj in objs.drain(..32) {
        cache.free(Some(obj));
    }

    unsafe {
        Cache::destroy(cache);
    }

    assert_eq!(frame::stats().frames_free, before);
}

#[test]
#[should_panic(expected = "does not belong to any slab")]
fn freeing_into_a_different_cache_panics() {
    init_region_once();

    let a = Cache::create("foreign-a", 64, 0, None, None).unwrap();
    let _b = Cache::create("foreign-b", 64, 0, None, None).unwrap();

    let obj = a.alloc().unwrap();
    _b.free(Some(obj));
}

/// Sentinel a destructor leaves behind; a constructor must overwrite this
/// before any caller can observe it, even across a thread handoff.
const HANDOFF_DTOR_SENTINEL: u8 = 0xEE;
/// Sentinel a constructor leaves behind, distinct from the destructor's so
/// the test can tell which one last touched an object.
const HANDOFF_CTOR_SENTINEL: u8 = 0xCD;

static HANDOFF_CTOR_CALLS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
static HANDOFF_DTOR_CALLS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn handoff_ctor(obj: core::ptr::NonNull<u8>) {
    unsafe {
        obj.as_ptr().write(HANDOFF_CTOR_SENTINEL);
    }
    HANDOFF_CTOR_CALLS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
}

fn handoff_dtor(obj: core::ptr::NonNull<u8>) {
    unsafe {
        obj.as_ptr().write(HANDOFF_DTOR_SENTINEL);
    }
    HANDOFF_DTOR_CALLS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
}

#[test]
fn cross_thread_handoff_round_trips() {
    init_region_once();

    // `CacheTable` holds raw pointers internally and so is `Sync` but not
    // `Send`; a shared `&'static` reference is what crosses the thread
    // boundary here, the same way the rest of the kernel would only ever
    // see `&'static CACHE_TABLE`, never an owned table moved between units.
    let table: &'static CacheTable = &crate::handle::CACHE_TABLE;
    let id = table
        .create("handoff", 96, 0, Some(handoff_ctor), Some(handoff_dtor))
        .unwrap();

    let ctor_before = HANDOFF_CTOR_CALLS.load(std::sync::atomic::Ordering::SeqCst);
    let dtor_before = HANDOFF_DTOR_CALLS.load(std::sync::atomic::Ordering::SeqCst);

    let allocated: Vec<_> = (0..100).map(|_| table.alloc(id).unwrap()).collect();
    for obj in &allocated {
        assert_eq!(unsafe { *obj.as_ptr() }, HANDOFF_CTOR_SENTINEL);
    }

    let addrs: Vec<usize> = allocated.iter().map(|p| p.as_ptr() as usize).collect();
    let freer = std::thread::spawn(move || {
        for addr in addrs {
            let ptr = core::ptr::NonNull::new(addr as *mut u8).unwrap();
            table.free(id, Some(ptr));
        }
    });
    freer.join().unwrap();
    assert_eq!(
        HANDOFF_DTOR_CALLS.load(std::sync::atomic::Ordering::SeqCst) - dtor_before,
        100,
        "every free on the other unit must run the destructor exactly once"
    );

    let reallocated: Vec<_> = (0..100).map(|_| table.alloc(id).unwrap()).collect();
    assert_eq!(reallocated.len(), 100);

    // None of these may still show the destructor's sentinel: the
    // constructor must have overwritten it before `alloc` returned, even
    // though the object was freed by a different unit.
    let mut seen = std::collections::HashSet::new();
    for obj in &reallocated {
        assert_eq!(unsafe { *obj.as_ptr() }, HANDOFF_CTOR_SENTINEL);
        assert!(seen.insert(obj.as_ptr() as usize), "duplicate address handed out");
    }

    assert_eq!(
        HANDOFF_CTOR_CALLS.load(std::sync::atomic::Ordering::SeqCst) - ctor_before,
        200,
        "#ctor_calls must equal #alloc_calls_returning_non_null across both rounds"
    );

    for obj in reallocated {
        table.free(id, Some(obj));
    }
    assert_eq!(
        HANDOFF_DTOR_CALLS.load(std::sync::atomic::Ordering::SeqCst) - dtor_before,
        200,
        "#dtor_calls must equal #free_calls_with_non_null_obj across both rounds"
    );
    unsafe {
        table.destroy(id);
    }
}

#[test]
fn superframe_pool_exhausts_and_recovers() {
    init_region_once();
    let _guard = ACCOUNTING.lock().unwrap();

    let mut taken = Vec::new();
    for _ in 0..N_SUPERFRAMES {
        taken.push(frame::alloc_super().expect("reserved superframes should not be exhausted yet"));
    }
    assert!(frame::alloc_super().is_none(), "N_SUPERFRAMES + 1 call must return null");

    let returned = taken.pop().unwrap();
    frame::free_super(returned);
    let reacquired = frame::alloc_super().expect("freeing one superframe must unblock the next call");
    taken.push(reacquired);

    for addr in taken {
        frame::free_super(addr);
    }
}

#[test]
fn randomized_alloc_free_interleaving() {
    use rand::{Rng, thread_rng};

    init_region_once();

    // Biased towards allocating (65%) to build up pressure across several
    // slabs before frees start catching up, the same alloc-heavy/free-light
    // split a stress test of a pooled allocator typically uses.
    let cache = Cache::create("randomized", 96, 0, None, None).unwrap();
    let mut rng = thread_rng();

    // (address, pattern byte written into the object) for everything
    // currently live, so a free can check the object wasn't corrupted by a
    // neighboring object's free-list link before it was handed out again.
    let mut live: Vec<(core::ptr::NonNull<u8>, u8)> = Vec::new();

    for _ in 0..5000 {
        if live.is_empty() || rng.gen_bool(0.65) {
            let obj = cache
                .alloc()
                .expect("region is sized generously enough for this workload to never exhaust");
            let pattern: u8 = rng.gen();
            unsafe {
                core::ptr::write_bytes(obj.as_ptr(), pattern, 96);
            }
            assert!(
                !live.iter().any(|&(p, _)| p == obj),
                "address {:#x} handed out while still live",
                obj.as_ptr() as usize
            );
            live.push((obj, pattern));
        } else {
            let idx = rng.gen_range(0..live.len());
            let (obj, pattern) = live.swap_remove(idx);
            let bytes = unsafe { core::slice::from_raw_parts(obj.as_ptr(), 96) };
            assert!(
                bytes.iter().all(|&b| b == pattern),
                "object corrupted before being freed"
            );
            cache.free(Some(obj));
        }
    }

    for (obj, _) in live {
        cache.free(Some(obj));
    }
}
