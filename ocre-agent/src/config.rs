//! Embedder-level configuration, layered on top of [`ocre_core::config::CoreConfig`].
//! Loading shape mirrors the teacher's `Config`/`ConfigManager::load`.

use std::path::{Path, PathBuf};

use ocre_core::config::{ConfigError, CoreConfig};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub log_level: String,
    pub producer_interval_ms: u64,
    #[serde(flatten)]
    pub core: CoreConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            log_level: "info".to_string(),
            producer_interval_ms: 500,
            core: CoreConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io { path: path.to_path_buf(), source: e })?;
        Self::from_str(&text)
    }

    /// `#[serde(flatten)]` bypasses `CoreConfig::from_str`'s own validation,
    /// so it has to be run explicitly here — an agent TOML with e.g.
    /// `worker_count = 0` would otherwise reach `Core::init` unvalidated.
    fn from_str(toml: &str) -> Result<Self, ConfigError> {
        let cfg: AgentConfig = toml::from_str(toml)?;
        cfg.core.validate()?;
        Ok(cfg)
    }
}


/// Looks for `ocre-agent.toml` next to the current executable, then in the
/// current working directory, matching the teacher's `find_config_file`
/// search order.
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("ocre-agent.toml");
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    let cwd_candidate = PathBuf::from("ocre-agent.toml");
    cwd_candidate.exists().then_some(cwd_candidate)
}
