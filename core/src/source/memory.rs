//! Byte source over blobs registered at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::DecodeError;
use crate::types::ImageKey;

use super::ByteSource;

#[derive(Debug, Default)]
pub struct InMemorySource {
    blobs: RwLock<HashMap<ImageKey, Arc<[u8]>>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `bytes` under `key`, replacing any previous blob.
    pub fn insert(&self, key: ImageKey, bytes: impl Into<Arc<[u8]>>) {
        self.blobs.write().insert(key, bytes.into());
    }

    /// Register `bytes` under their content hash and return the key.
    pub fn insert_content(&self, bytes: impl Into<Arc<[u8]>>) -> ImageKey {
        let bytes = bytes.into();
        let key = ImageKey::for_content(&bytes);
        self.blobs.write().insert(key.clone(), bytes);
        key
    }

    pub fn remove(&self, key: &ImageKey) -> bool {
        self.blobs.write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl ByteSource for InMemorySource {
    fn read(&self, key: &ImageKey) -> Result<Vec<u8>, DecodeError> {
        self.blobs
            .read()
            .get(key)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| DecodeError::NotFound { key: key.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_removes_blobs() {
        let source = InMemorySource::new();
        source.insert(ImageKey::new("a"), vec![1u8, 2, 3]);
        let hashed = source.insert_content(vec![9u8; 4]);

        assert_eq!(source.len(), 2);
        assert_eq!(source.read(&ImageKey::new("a")).unwrap(), vec![1, 2, 3]);
        assert_eq!(source.read(&hashed).unwrap(), vec![9; 4]);

        assert!(source.remove(&ImageKey::new("a")));
        assert!(matches!(source.read(&ImageKey::new("a")), Err(DecodeError::NotFound { .. })));
    }
}
