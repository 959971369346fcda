//! Bitmap cache storage.

pub mod memory;

pub use memory::MemoryCache;
