//! Run configuration loaded from `.redline.yaml`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file names searched when no explicit path is given.
pub const DEFAULT_CONFIG_NAMES: &[&str] = &[".redline.yaml", "redline.yaml"];

/// Configuration problems are fatal: a run must never start from input the
/// operator did not intend.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),
    #[error("cannot read config {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Invalid {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{0}")]
    Validation(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Provider and model as "provider/model".
    pub model: String,
    /// Rule packs to compose, in precedence order.
    pub packs: Vec<String>,
    /// Language code for issue messages.
    pub language: String,
    pub disabled_rules: Vec<String>,
    pub max_calls_per_run: u32,
    pub max_calls_per_file: u32,
    /// Worker pool size; the only parallel-execution boundary.
    pub concurrency: usize,
    pub call_timeout_secs: u64,
    pub cache_ttl_hours: u64,
    /// Lines of context around a changed range that stay reportable in
    /// changed-only runs.
    pub diff_context_margin: u32,
    pub score_threshold: i32,
    /// Cache location; defaults to .redline/cache next to the config.
    pub cache_dir: Option<PathBuf>,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4".to_string(),
            packs: vec!["general".to_string()],
            language: "en".to_string(),
            disabled_rules: Vec::new(),
            max_calls_per_run: 24,
            max_calls_per_file: 2,
            concurrency: 4,
            call_timeout_secs: 60,
            cache_ttl_hours: 168,
            diff_context_margin: 2,
            score_threshold: 70,
            cache_dir: None,
        }
    }
}

impl ReviewConfig {
    /// Load from an explicit path. The file must exist: the operator named
    /// it, so silently falling back to defaults would hide a typo.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        let config: ReviewConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Invalid {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Search the working directory for a config file; defaults when none
    /// exists.
    pub fn discover() -> Result<Self, ConfigError> {
        for name in DEFAULT_CONFIG_NAMES {
            let path = PathBuf::from(name);
            if path.exists() {
                return Self::load(&path);
            }
        }
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packs.is_empty() {
            return Err(ConfigError::Validation(
                "no rule packs configured".to_string(),
            ));
        }
        if !self.model.contains('/') {
            return Err(ConfigError::Validation(format!(
                "model must be \"provider/model\", got {:?}",
                self.model
            )));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Validation(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "call_timeout_secs must be at least 1".to_string(),
            ));
        }
        if !(0..=100).contains(&self.score_threshold) {
            return Err(ConfigError::Validation(format!(
                "score_threshold must be in 0..=100, got {}",
                self.score_threshold
            )));
        }
        Ok(())
    }

    /// The provider part of the model string.
    pub fn provider_name(&self) -> &str {
        self.model.split('/').next().unwrap_or(&self.model)
    }

    pub fn disabled_set(&self) -> HashSet<String> {
        self.disabled_rules.iter().cloned().collect()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 3600)
    }

    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".redline").join("cache"))
    }
}
