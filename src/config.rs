//! Engine configuration
//!
//! Loaded from YAML. Every field has a default, so an empty file (or no file)
//! is a valid configuration.
//!
//! Resolution for [`EngineConfig::from_env`]:
//! 1. `JUMPCODE_CONFIG` names a YAML file to load (otherwise defaults)
//! 2. `JUMPCODE_HISTORY_CAPACITY` and `JUMPCODE_MAX_WORKERS` override single fields

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::history::DEFAULT_HISTORY_CAPACITY;

pub const CONFIG_ENV: &str = "JUMPCODE_CONFIG";
pub const HISTORY_CAPACITY_ENV: &str = "JUMPCODE_HISTORY_CAPACITY";
pub const MAX_WORKERS_ENV: &str = "JUMPCODE_MAX_WORKERS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempt history ring buffer size
    pub history_capacity: usize,
    /// Sequence record ring buffer size
    pub sequence_history_capacity: usize,
    /// Concurrent tasks in a parallel batch
    pub max_workers: usize,
    /// Parallel batch deadline when the caller gives none
    pub default_timeout_ms: u64,
    /// How deep macro execution may re-enter itself
    pub max_nesting_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            sequence_history_capacity: DEFAULT_HISTORY_CAPACITY,
            max_workers: 10,
            default_timeout_ms: 300_000,
            max_nesting_depth: 4,
        }
    }
}

impl EngineConfig {
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_sequence_history_capacity(mut self, capacity: usize) -> Self {
        self.sequence_history_capacity = capacity;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Load and validate a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: EngineConfig = if content.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?
        };
        config.validate()?;
        info!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    /// Config file from `JUMPCODE_CONFIG` (or defaults) plus env overrides
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => {
                debug!("{} not set, using default engine config", CONFIG_ENV);
                Self::default()
            }
        };

        if let Some(capacity) = env_usize(HISTORY_CAPACITY_ENV)? {
            config.history_capacity = capacity;
        }
        if let Some(workers) = env_usize(MAX_WORKERS_ENV)? {
            config.max_workers = workers;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject sizes that would make the engine unusable
    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            return Err(anyhow!("history_capacity must be at least 1"));
        }
        if self.sequence_history_capacity == 0 {
            return Err(anyhow!("sequence_history_capacity must be at least 1"));
        }
        if self.max_workers == 0 {
            return Err(anyhow!("max_workers must be at least 1"));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .with_context(|| format!("{} must be a non-negative integer, got {:?}", key, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.sequence_history_capacity, 100);
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.default_timeout_ms, 300_000);
        assert_eq!(config.max_nesting_depth, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "max_workers: 3\ndefault_timeout_ms: 500\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(
            config,
            EngineConfig::default()
                .with_max_workers(3)
                .with_default_timeout_ms(500)
        );
    }

    #[test]
    fn test_empty_file_is_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "").unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "max_workers: 0\n").unwrap();

        let err = EngineConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(EngineConfig::load(Path::new("/definitely/not/here.yaml")).is_err());
    }
}
