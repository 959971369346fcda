//! Shared data structures exchanged between the cache, the decode pipeline, and callers.

use std::fmt;

use crate::error::PipelineError;

/// Opaque identity of a source image, used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageKey {
    pub cache_key: String,
}

impl ImageKey {
    pub fn new(cache_key: impl Into<String>) -> Self {
        Self { cache_key: cache_key.into() }
    }

    /// Content-addressed key: the blake3 digest of the encoded bytes.
    pub fn for_content(bytes: &[u8]) -> Self {
        let hash = blake3::hash(bytes);
        Self { cache_key: format!("blake3:{}", hash.to_hex()) }
    }

    /// Derive a child key by appending a suffix separated with `::`.
    pub fn derive(&self, suffix: impl AsRef<str>) -> Self {
        let mut derived = self.cache_key.clone();
        derived.push_str("::");
        derived.push_str(suffix.as_ref());
        Self { cache_key: derived }
    }

    pub fn as_str(&self) -> &str {
        &self.cache_key
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key)
    }
}

impl From<&str> for ImageKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Pixel size of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either side is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Bytes needed to hold an RGBA8888 buffer of this size.
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// True pixel size of a source, obtained from a bounds-only probe.
pub type NativeDimensions = ImageDimensions;

/// Display bounds supplied by the caller. Both sides must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestedBounds {
    pub req_width: u32,
    pub req_height: u32,
}

impl RequestedBounds {
    pub fn new(req_width: u32, req_height: u32) -> Self {
        Self { req_width, req_height }
    }

    /// Reject zero-sized bounds before any work is scheduled.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.req_width == 0 || self.req_height == 0 {
            return Err(PipelineError::InvalidBounds {
                width: self.req_width,
                height: self.req_height,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheBudget {
    pub bytes_max: usize,
}

impl CacheBudget {
    /// Budget of exactly `bytes_max`; zero is a misconfiguration.
    pub fn new(bytes_max: usize) -> Result<Self, PipelineError> {
        if bytes_max == 0 {
            return Err(PipelineError::InvalidBudget { bytes: bytes_max });
        }
        Ok(Self { bytes_max })
    }

    /// Budget of `total_bytes / divisor`, e.g. one eighth of what the process may use.
    pub fn fraction_of(total_bytes: usize, divisor: usize) -> Result<Self, PipelineError> {
        Self::new(total_bytes.checked_div(divisor).unwrap_or(0))
    }
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self { bytes_max: 64 * 1024 * 1024 }
    }
}

/// Stable identifier handed out for every consumer attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

impl ConsumerId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}
