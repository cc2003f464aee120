//! Architecture-independent physical memory core for a hobby kernel.
//!
//! Two layers live here:
//!
//! - [`memory::allocators::frame`]: a whole-page physical allocator handing
//!   out 4 KiB frames and 2 MiB super-frames, each behind its own lock.
//! - [`memory::allocators::slab`]: a type-specialized slab cache engine
//!   built on top of the frame allocator, after the Bonwick slab design.
//!
//! This crate does not know about virtual memory, scheduling, or any other
//! part of a kernel. Physical addresses are passed around as plain `usize`
//! values on the assumption that the host kernel can dereference them
//! directly (e.g. via an identity mapping over the managed range).

#![no_std]

#[cfg(test)]
extern crate std;

pub mod error;
pub mod handle;
pub mod memory;
pub mod sync;

pub use memory::allocators::{frame, slab};

#[cfg(test)]
mod scenarios;
