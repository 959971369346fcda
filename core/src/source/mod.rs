//! Where encoded image bytes come from: folders, zip archives, or memory.

pub mod archive;
pub mod folder;
pub mod memory;
mod util;

pub use archive::ArchiveSource;
pub use folder::FolderSource;
pub use memory::InMemorySource;
pub use util::{is_hidden, is_supported_image, sanitize_relative_path};

use crate::error::DecodeError;
use crate::types::ImageKey;

/// Supplies the encoded bytes behind an [`ImageKey`].
pub trait ByteSource: Send + Sync {
    fn read(&self, key: &ImageKey) -> Result<Vec<u8>, DecodeError>;
}

impl<S: ByteSource + ?Sized> ByteSource for std::sync::Arc<S> {
    fn read(&self, key: &ImageKey) -> Result<Vec<u8>, DecodeError> {
        (**self).read(key)
    }
}
