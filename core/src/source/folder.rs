//! Directory-backed byte source; keys are paths relative to the root.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};

use crate::error::DecodeError;
use crate::types::ImageKey;

use super::{ByteSource, util};

#[derive(Debug, Clone)]
pub struct FolderSource {
    root: PathBuf,
}

impl FolderSource {
    pub fn new(root: impl Into<PathBuf>) -> crate::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(anyhow!("folder {:?} is not a directory", root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys for the visible image files directly under the root, sorted by name.
    pub fn keys(&self) -> crate::Result<Vec<ImageKey>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("listing {}", self.root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let path = entry.path();
            if util::is_hidden(&path) || !util::is_supported_image(&path) {
                continue;
            }

            let rel = path.strip_prefix(&self.root).unwrap_or(path.as_path());
            keys.push(ImageKey::new(rel.to_string_lossy().replace('\\', "/")));
        }

        keys.sort();
        Ok(keys)
    }

    fn resolve(&self, key: &ImageKey) -> Option<PathBuf> {
        util::sanitize_relative_path(Path::new(key.as_str())).map(|rel| self.root.join(rel))
    }
}

impl ByteSource for FolderSource {
    fn read(&self, key: &ImageKey) -> Result<Vec<u8>, DecodeError> {
        let Some(path) = self.resolve(key) else {
            return Err(DecodeError::NotFound { key: key.to_string() });
        };
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(DecodeError::NotFound { key: key.to_string() })
            }
            Err(err) => Err(DecodeError::Io { key: key.to_string(), message: err.to_string() }),
        }
    }
}
