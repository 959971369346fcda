//! Decoded bitmap payloads and the decoder boundary.

pub mod image;

pub use self::image::{RasterDecoder, SourceInfo};

use crate::error::DecodeError;
use crate::types::{ImageDimensions, ImageKey, NativeDimensions};

/// Immutable RGBA8888 bitmap produced by a [`Decoder`].
///
/// Fields are private so a bitmap cannot be mutated once shared between the cache and
/// consumers; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBitmap {
    dimensions: ImageDimensions,
    sample_factor: u32,
    pixels: Vec<u8>,
}

impl DecodedBitmap {
    pub fn new(dimensions: ImageDimensions, sample_factor: u32, pixels: Vec<u8>) -> Self {
        Self { dimensions, sample_factor: sample_factor.max(1), pixels }
    }

    pub fn dimensions(&self) -> ImageDimensions {
        self.dimensions
    }

    pub fn width(&self) -> u32 {
        self.dimensions.width
    }

    pub fn height(&self) -> u32 {
        self.dimensions.height
    }

    /// Downsampling factor the bitmap was decoded at.
    pub fn sample_factor(&self) -> u32 {
        self.sample_factor
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Memory accounting unit for the cache, in bytes.
    pub fn byte_cost(&self) -> usize {
        self.pixels.len()
    }
}

/// Black-box image codec consumed by the load coordinator.
///
/// `probe_dimensions` must not allocate pixel storage; the coordinator calls it first and
/// then `decode` with the factor chosen from the probed size.
pub trait Decoder: Send + Sync {
    fn probe_dimensions(&self, key: &ImageKey) -> Result<NativeDimensions, DecodeError>;

    fn decode(&self, key: &ImageKey, sample_factor: u32) -> Result<DecodedBitmap, DecodeError>;
}
