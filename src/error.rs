//! Diagnostic error types for conditions that are fatal to the allocator.
//!
//! Nothing in the public API returns these: exhaustion and bad-but-survivable
//! input are surfaced as `None`/silent no-ops, per this crate's contract.
//! They exist so that memory corruption, once detected, panics with a
//! structured, consistent message instead of a bare string.

use thiserror::Error;

use crate::memory::PhysAddr;

/// Corruption detected by the frame allocator on a free path.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FrameCorruption {
    /// `free_frame` received an address that isn't frame-aligned.
    #[error("free_frame: address {0:#x} is not frame-aligned")]
    Misaligned(PhysAddr),
    /// `free_frame` received an address outside the managed physical range.
    #[error("free_frame: address {0:#x} is outside the managed physical range")]
    OutOfRange(PhysAddr),
    /// `free_frame` received an address that belongs to the super-frame region.
    #[error("free_frame: address {0:#x} lies in the reserved super-frame region")]
    InSuperRegion(PhysAddr),
    /// `free_super` received an address that isn't super-frame-aligned.
    #[error("free_super: address {0:#x} is not super-frame-aligned")]
    SuperMisaligned(PhysAddr),
    /// `free_super` received an address outside the reserved super-frame region.
    #[error("free_super: address {0:#x} is outside the reserved super-frame region")]
    SuperOutOfRange(PhysAddr),
}

/// Corruption detected by the slab cache engine on a free path.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CacheCorruption {
    /// The freed pointer doesn't fall inside any slab owned by this cache.
    #[error("object at {addr:#x} does not belong to any slab of this cache")]
    ForeignObject {
        /// The address the caller tried to free.
        addr: usize,
    },
    /// The freed pointer falls inside a slab's object area but isn't aligned
    /// to an object boundary.
    #[error("object at {addr:#x} is misaligned within its slab (object size {objsize})")]
    Misaligned {
        /// The address the caller tried to free.
        addr: usize,
        /// The cache's object size, for the message.
        objsize: u32,
    },
}
