//! ZIP/CBZ archive byte source; keys are entry names inside the archive.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use zip::read::ZipArchive;
use zip::result::ZipError;

use crate::error::DecodeError;
use crate::types::ImageKey;

use super::{ByteSource, util};

/// Largest uncompressed entry a read will accept.
pub const DEFAULT_ENTRY_LIMIT: u64 = 256 * 1024 * 1024;
const PREALLOC_LIMIT: u64 = 16 * 1024 * 1024;

/// Image entries of a zip archive. The archive is reopened per read so concurrent decodes
/// do not contend on a shared reader.
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    path: PathBuf,
    entries: BTreeSet<String>,
    entry_limit: u64,
}

impl ArchiveSource {
    pub fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let file = File::open(&path).with_context(|| format!("opening archive {:?}", path))?;
        let mut archive = ZipArchive::new(file).map_err(|err| anyhow!("{}", err))?;

        let mut entries = BTreeSet::new();
        for idx in 0..archive.len() {
            let file = archive.by_index(idx).map_err(|err| anyhow!("{}", err))?;
            if file.is_dir() {
                continue;
            }

            let Some(enclosed) = file.enclosed_name() else {
                continue;
            };
            let Some(sanitized) = util::sanitize_relative_path(enclosed) else {
                continue;
            };
            if util::is_hidden(&sanitized) || !util::is_supported_image(&sanitized) {
                continue;
            }

            entries.insert(file.name().to_string());
        }

        Ok(Self { path, entries, entry_limit: DEFAULT_ENTRY_LIMIT })
    }

    /// Reject entries whose uncompressed bytes exceed `bytes`.
    pub fn with_entry_limit(mut self, bytes: u64) -> Self {
        self.entry_limit = bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keys for every image entry, in name order.
    pub fn keys(&self) -> Vec<ImageKey> {
        self.entries.iter().map(ImageKey::new).collect()
    }
}

impl ByteSource for ArchiveSource {
    fn read(&self, key: &ImageKey) -> Result<Vec<u8>, DecodeError> {
        if !self.entries.contains(key.as_str()) {
            return Err(DecodeError::NotFound { key: key.to_string() });
        }

        let io_error = |message: String| DecodeError::Io { key: key.to_string(), message };

        let file = File::open(&self.path).map_err(|err| io_error(err.to_string()))?;
        let mut archive = ZipArchive::new(file).map_err(|err| io_error(err.to_string()))?;
        let mut entry = match archive.by_name(key.as_str()) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                return Err(DecodeError::NotFound { key: key.to_string() });
            }
            Err(err) => return Err(io_error(err.to_string())),
        };

        // The declared size comes from the archive header and is not trusted.
        let capacity = entry.size().min(self.entry_limit).min(PREALLOC_LIMIT);
        let mut bytes = Vec::with_capacity(capacity as usize);
        (&mut entry)
            .take(self.entry_limit.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|err| io_error(err.to_string()))?;

        if bytes.len() as u64 > self.entry_limit {
            return Err(DecodeError::Malformed {
                key: key.to_string(),
                message: format!("entry exceeds {} bytes", self.entry_limit),
            });
        }
        Ok(bytes)
    }
}
