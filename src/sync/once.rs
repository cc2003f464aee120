use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, Ordering};

/// A cell that can be written exactly once and read many times after that.
///
/// Used for the frame allocator's boot-time bounds: [`init`](super::super::memory::allocators::frame::init)
/// runs once, single-threaded, before any other call touches the
/// allocator, so a lock-free guard is enough.
pub struct Once<T> {
    filled: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send> Sync for Once<T> {}

impl<T> Once<T> {
    /// Creates an empty cell.
    pub const fn new() -> Self {
        Self {
            filled: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Writes `f()` into the cell if it is still empty.
    ///
    /// A second call is ignored: this crate's only user calls it once at
    /// boot, so there's no policy question about which write should win.
    pub fn call_once(&self, f: impl FnOnce() -> T) {
        if self
            .filled
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            unsafe {
                (*self.value.get()).write(f());
            }
        }
    }

    /// Returns the stored value, or `None` if [`call_once`](Self::call_once) hasn't run yet.
    pub fn get(&self) -> Option<&T> {
        if self.filled.load(Ordering::Acquire) {
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }
}

impl<T> Default for Once<T> {
    fn default() -> Self {
        Self::new()
    }
}
