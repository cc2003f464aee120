//! Minimal kernel synchronization primitives.
//!
//! This crate needs exactly two: a spinning mutex for the allocators' hot
//! paths, and a write-once cell for the frame allocator's boot-time bounds.
//! Anything richer (sleeping locks, IRQ masking, async wakers) is the
//! hosting kernel's responsibility, not this crate's.

pub mod once;
pub mod spinlock;

pub use once::Once;
pub use spinlock::SpinLock;
