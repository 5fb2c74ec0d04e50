//! Core configuration (`spec.md` §6 "Configuration constants (compile-time)"
//! made loadable). Grounded in the teacher's `ConfigManager`/`Config::load`
//! shape: parse TOML with `serde`, validate, return a typed `ConfigError`.
//!
//! Unlike the teacher's config layer there is no hot-reload watcher: the
//! queue and worker pool are sized once at [`crate::core::Core::init`] and
//! cannot be safely resized under a running system (see `DESIGN.md`), so a
//! file watcher reloading this struct after init would have nothing to do.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors loading or validating a [`CoreConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error while reading `{path}`: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Tunable parameters of the dispatch core (`spec.md` §6).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoreConfig {
    /// Event queue capacity, in bytes (`spec.md` §4.1 `Q`). The number of
    /// whole [`crate::types::EventRecord`]s this allows is computed from
    /// `event_record_size()` at `Core::init` time.
    pub queue_capacity_bytes: usize,

    /// Number of dispatch workers (`spec.md` §4.4 `W`).
    pub worker_count: usize,

    /// Max events drained per worker iteration (`spec.md` §4.4 `B`).
    pub batch_size: usize,

    /// Max total dispatch attempts per event (`spec.md` §4.4 step 6).
    pub retry_limit: u32,

    /// Delay between retry attempts, in milliseconds.
    pub retry_delay_ms: u64,

    /// Guest execution environment stack size, in bytes (`spec.md` §2
    /// `S_guest`).
    pub guest_stack_bytes: usize,

    /// Dispatch worker thread stack size, in bytes (`spec.md` §5
    /// `S_worker`).
    pub worker_stack_bytes: usize,

    /// Requested OS thread priority for dispatch workers. Advisory: not
    /// every platform honors thread priority, so embedders running on such a
    /// platform may ignore this field.
    pub worker_priority: i32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            queue_capacity_bytes: 1024,
            worker_count: 2,
            batch_size: 16,
            retry_limit: 3,
            retry_delay_ms: 1,
            guest_stack_bytes: 16 * 1024,
            worker_stack_bytes: 2 * 1024,
            worker_priority: 5,
        }
    }
}

impl CoreConfig {
    /// Loads and validates a `CoreConfig` from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io { path: path.to_path_buf(), source: e })?;
        Self::from_str(&text)
    }

    /// Parses and validates a `CoreConfig` from a TOML string. Any field not
    /// present in `toml` falls back to [`CoreConfig::default`]
    /// (`#[serde(default)]`), so embedders can override just the fields they
    /// care about.
    pub fn from_str(toml: &str) -> Result<Self, ConfigError> {
        let cfg: CoreConfig = toml::from_str(toml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks that the constants are internally consistent (non-zero worker
    /// count/batch size/retry limit, a queue big enough to hold at least one
    /// record). Called by [`CoreConfig::from_str`]/[`CoreConfig::load`];
    /// exposed so embedders that build a `CoreConfig` by some other path
    /// (e.g. flattening it into their own config struct, as `ocre-agent`
    /// does) can still run the same check before handing it to `Core::init`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Validation("worker_count must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation("batch_size must be > 0".into()));
        }
        if self.retry_limit == 0 {
            return Err(ConfigError::Validation("retry_limit must be > 0".into()));
        }
        if self.queue_capacity_bytes < crate::queue_record_size() {
            return Err(ConfigError::Validation(
                "queue_capacity_bytes must hold at least one event record".into(),
            ));
        }
        Ok(())
    }

    /// Queue capacity expressed in whole event records (`spec.md`'s
    /// `⌊Q/R⌋`).
    pub fn queue_capacity_records(&self) -> usize {
        self.queue_capacity_bytes / crate::queue_record_size()
    }
}
