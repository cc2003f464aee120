//! Physical frame allocation and the slab cache engine built on top of it.

pub mod frame;
pub mod slab;
