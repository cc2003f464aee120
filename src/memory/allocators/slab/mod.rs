//! Type-specialized slab cache engine.
//!
//! A [`Cache`] carves 4 KiB frames obtained from
//! [`frame`](super::frame) into fixed-size objects, threading an intrusive
//! free list through the unused slots of each slab. Slabs are classified
//! into three explicit lists — empty, partial, full — and a cache's own
//! descriptor lives in a frame borrowed from the same allocator, so the
//! engine never depends on a general-purpose heap.

#[allow(clippy::module_inception)]
pub(crate) mod slab;

pub mod cache;

pub use cache::{Cache, Ctor, Dtor};
