//! Bounded bitmap cache and background decode pipeline.
//!
//! Requests for an image key are answered from an LRU cache measured in bytes, or by a
//! pool of decode workers that probe the native size, pick a power-of-two sample factor
//! for the requested bounds, and decode at that factor. Concurrent requests for a key that
//! is already decoding share the one in-flight decode.

#![deny(missing_debug_implementations)]

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod log;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod types;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

pub use cache::MemoryCache;
pub use codec::{DecodedBitmap, Decoder, RasterDecoder};
pub use config::PipelineConfig;
pub use error::{DecodeError, PipelineError};
pub use pipeline::{BitmapConsumer, Delivery, DeliverySlot, LoadCoordinator, RequestOutcome};
pub use source::{ArchiveSource, ByteSource, FolderSource, InMemorySource};
pub use types::{
    CacheBudget, ConsumerId, ImageDimensions, ImageKey, NativeDimensions, RequestedBounds,
};

/// Returns the version of the core crate for telemetry and debugging.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
