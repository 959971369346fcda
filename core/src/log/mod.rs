//! Tracing setup for hosts of the pipeline.
//!
//! Every event this crate emits uses one of [`TARGETS`]. The default filter enables those
//! at the requested level and keeps everything else, including codec crates bridged in
//! through `log`, at `warn`. Output goes to stderr and, when a directory is configured, to
//! a daily rolling file written off the decode threads.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, filter::LevelFilter, util::SubscriberInitExt};

pub use tracing_subscriber::filter::LevelFilter as LogLevel;

/// Tracing targets used by the cache, decoder, and pipeline.
pub const TARGETS: [&str; 6] = [
    "cache::memory",
    "codec::image",
    "pipeline::consumer",
    "pipeline::coordinator",
    "pipeline::worker",
    "stats",
];

const FILTER_ENV_VARS: [&str; 2] = ["BITMAP_PIPELINE_LOG", "RUST_LOG"];
const FILE_NAME: &str = "bitmap-pipeline.log";

static LOG_HANDLE: OnceLock<LogHandle> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level applied to the crate's own targets.
    pub level: LevelFilter,
    /// Rolling file output. `None` logs to stderr only.
    pub directory: Option<PathBuf>,
    /// Full filter directive; overrides both the environment and `level`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        let level = if cfg!(debug_assertions) { LevelFilter::DEBUG } else { LevelFilter::INFO };
        Self { level, directory: None, filter: None }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn with_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.directory = Some(path.into());
        self
    }

    /// Log into the platform data directory, e.g. `~/.local/share/bitmap-pipeline/logs`.
    pub fn with_default_directory(self) -> Self {
        self.with_directory(default_log_directory())
    }
}

/// Keeps the background file writer alive for the life of the process.
#[derive(Debug)]
pub struct LogHandle {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
    directory: Option<PathBuf>,
    directive: String,
}

impl LogHandle {
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Filter directive the subscriber was installed with.
    pub fn directive(&self) -> &str {
        &self.directive
    }
}

/// Install the global subscriber; the first successful call wins.
pub fn init(config: LogConfig) -> Result<&'static LogHandle> {
    if let Some(handle) = LOG_HANDLE.get() {
        return Ok(handle);
    }

    let handle = setup(config)?;
    let _ = LOG_HANDLE.set(handle);
    Ok(LOG_HANDLE.get().expect("log handle initialised"))
}

/// `warn` for everything, `level` for this crate's targets.
pub fn default_directive(level: LevelFilter) -> String {
    let mut directive = String::from("warn");
    for target in TARGETS {
        directive.push_str(&format!(",{target}={level}"));
    }
    directive
}

fn resolve_directive(config: &LogConfig, from_env: Option<String>) -> String {
    config
        .filter
        .clone()
        .or(from_env.filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| default_directive(config.level))
}

fn setup(config: LogConfig) -> Result<LogHandle> {
    // A host that already bridges `log` keeps its own bridge.
    let _ = tracing_log::LogTracer::init();

    let from_env = FILTER_ENV_VARS.iter().find_map(|var| std::env::var(var).ok());
    let directive = resolve_directive(&config, from_env);
    let env_filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("parsing log filter {directive:?}"))?;

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory)
                .with_context(|| format!("creating log directory at {}", directory.display()))?;
            let appender = tracing_appender::rolling::daily(directory, FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_thread_names(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))?;

    Ok(LogHandle { _guard: guard, directory: config.directory, directive })
}

fn default_log_directory() -> PathBuf {
    match directories::ProjectDirs::from("org", "BitmapPipeline", "bitmap-pipeline") {
        Some(dirs) => dirs.data_dir().join("logs"),
        None => std::env::temp_dir().join("bitmap-pipeline-logs"),
    }
}
