use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of checkpoint runner threads.
pub const DEFAULT_CHECKPOINT_THREADS: usize = 4;

/// Default time runners get to finish in-flight writes on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(120);

/// Configuration for a [`super::Checkpointer`].
///
/// Can be built in code or loaded from TOML:
///
/// ```toml
/// threads = 8
/// instance_name = "node-1"
/// max_chunk_pages = 4096
/// queue_capacity = 1024
/// shutdown_grace_ms = 30000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointerOptions {
    /// Number of runner threads writing pages.
    pub threads: usize,
    /// Name of the owning instance, used in runner thread names.
    pub instance_name: String,
    /// Upper bound on pages per write chunk. When unset, pages are spread
    /// evenly over the runner threads.
    pub max_chunk_pages: Option<usize>,
    /// Bound on queued runner tasks. When unset the queue is unbounded; when
    /// full, tasks run on the submitting thread.
    pub queue_capacity: Option<usize>,
    /// Grace period for in-flight tasks on shutdown, in milliseconds.
    pub shutdown_grace_ms: u64,
}

impl Default for CheckpointerOptions {
    fn default() -> Self {
        Self {
            threads: DEFAULT_CHECKPOINT_THREADS,
            instance_name: String::new(),
            max_chunk_pages: None,
            queue_capacity: None,
            shutdown_grace_ms: duration_millis(DEFAULT_SHUTDOWN_GRACE),
        }
    }
}

impl CheckpointerOptions {
    /// Sets the number of runner threads.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the instance name used for runner thread names.
    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    /// Caps the number of pages per write chunk.
    pub fn max_chunk_pages(mut self, pages: usize) -> Self {
        self.max_chunk_pages = Some(pages);
        self
    }

    /// Bounds the runner queue.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Sets the shutdown grace period. Durations past `u64::MAX`
    /// milliseconds saturate.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = duration_millis(grace);
        self
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace_duration(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Clamps zero counts up to one.
    pub fn normalize(mut self) -> Self {
        if self.threads == 0 {
            self.threads = 1;
        }
        if let Some(max) = self.max_chunk_pages.as_mut() {
            *max = (*max).max(1);
        }
        if let Some(cap) = self.queue_capacity.as_mut() {
            *cap = (*cap).max(1);
        }
        self
    }

    /// Parses options from a TOML document; missing keys take defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let options: Self =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { source })?;
        Ok(options.normalize())
    }

    /// Reads options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let options: Self = toml::from_str(&contents).map_err(|source| ConfigError::ParseFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(options.normalize())
    }

    /// Serializes options to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Errors raised while loading [`CheckpointerOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read checkpointer config {path}: {source}")]
    Read {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The config file is not valid TOML for these options.
    #[error("failed to parse checkpointer config {path}: {source}")]
    ParseFile {
        /// Path that failed.
        path: PathBuf,
        /// Underlying parse error.
        source: toml::de::Error,
    },
    /// An inline TOML document is not valid for these options.
    #[error("failed to parse checkpointer config: {source}")]
    Parse {
        /// Underlying parse error.
        source: toml::de::Error,
    },
    /// Options could not be rendered as TOML.
    #[error("failed to serialize checkpointer config: {source}")]
    Serialize {
        /// Underlying serialization error.
        source: toml::ser::Error,
    },
}
