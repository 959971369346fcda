//! Pipeline configuration: cache budget policy and decode concurrency.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::types::CacheBudget;

const DEFAULT_MEMORY_LIMIT: usize = 512 * 1024 * 1024;
const DEFAULT_CACHE_FRACTION: usize = 8;
const MAX_DEFAULT_WORKERS: usize = 4;

/// Tunables for a [`LoadCoordinator`](crate::pipeline::LoadCoordinator).
///
/// Every field has a default, so a JSON file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Explicit cache budget in bytes. Takes precedence over the fraction policy.
    pub cache_bytes: Option<usize>,
    /// Memory the host grants this process, used with `cache_fraction`.
    pub memory_limit_bytes: usize,
    /// Cache gets `memory_limit_bytes / cache_fraction` when no explicit budget is set.
    pub cache_fraction: usize,
    /// Upper bound on decodes running at the same time.
    pub decode_workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let decode_workers = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1)
            .min(MAX_DEFAULT_WORKERS);

        Self {
            cache_bytes: None,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT,
            cache_fraction: DEFAULT_CACHE_FRACTION,
            decode_workers,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(input: &str) -> crate::Result<Self> {
        serde_json::from_str(input).context("parsing pipeline config")
    }

    pub fn from_path(path: &Path) -> crate::Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("reading pipeline config {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing pipeline config {}", path.display()))
    }

    /// Convenience helper for a fixed byte budget.
    pub fn with_cache_bytes(mut self, bytes: usize) -> Self {
        self.cache_bytes = Some(bytes);
        self
    }

    pub fn with_decode_workers(mut self, workers: usize) -> Self {
        self.decode_workers = workers;
        self
    }

    /// Resolve the cache budget, rejecting a zero result.
    pub fn budget(&self) -> Result<CacheBudget, PipelineError> {
        match self.cache_bytes {
            Some(bytes) => CacheBudget::new(bytes),
            None => CacheBudget::fraction_of(self.memory_limit_bytes, self.cache_fraction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget_is_an_eighth_of_the_memory_limit() {
        let config = PipelineConfig::default();
        assert_eq!(config.budget().unwrap().bytes_max, DEFAULT_MEMORY_LIMIT / 8);
        assert!(config.decode_workers >= 1 && config.decode_workers <= MAX_DEFAULT_WORKERS);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            PipelineConfig::from_json_str(r#"{ "memory_limit_bytes": 1600, "decode_workers": 2 }"#)
                .expect("parse");
        assert_eq!(config.budget().unwrap().bytes_max, 200);
        assert_eq!(config.decode_workers, 2);
        assert_eq!(config.cache_fraction, DEFAULT_CACHE_FRACTION);
    }

    #[test]
    fn explicit_budget_wins_and_zero_is_rejected() {
        let config = PipelineConfig::default().with_cache_bytes(4096);
        assert_eq!(config.budget().unwrap().bytes_max, 4096);

        let zero = PipelineConfig::default().with_cache_bytes(0);
        assert!(matches!(zero.budget(), Err(PipelineError::InvalidBudget { bytes: 0 })));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pipeline.json");
        fs::write(&path, r#"{ "cache_bytes": 1024 }"#).unwrap();
        let config = PipelineConfig::from_path(&path).expect("load");
        assert_eq!(config.cache_bytes, Some(1024));

        assert!(PipelineConfig::from_path(&dir.path().join("missing.json")).is_err());
    }
}
