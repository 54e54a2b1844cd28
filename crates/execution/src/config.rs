//! Kernel configuration.

use crate::scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use taskloom_decompose::DecomposerConfig;
use taskloom_dispatch::DispatchConfig;
use taskloom_recovery::RecoveryConfig;
use taskloom_repair::RepairConfig;
use taskloom_safety::SafetyPolicy;

/// Config loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Could not read the file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid config JSON
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings for every layer of the kernel. Missing sections fall back to
/// their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Admission control
    pub scheduler: SchedulerConfig,
    /// Isolation keywords and container defaults
    pub decomposer: DecomposerConfig,
    /// Repair loop
    pub repair: RepairConfig,
    /// Recovery bounds
    pub recovery: RecoveryConfig,
    /// Dispatcher
    pub dispatch: DispatchConfig,
    /// Code payload policy
    pub safety: SafetyPolicy,
}

impl KernelConfig {
    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use taskloom_recovery::RecoveryStrategy;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"scheduler": {{"max_concurrent": 2}}, "recovery": {{"max_retries": 5, "on_exhausted": "abort"}}}}"#
        )
        .unwrap();

        let config = KernelConfig::load(file.path()).unwrap();
        assert_eq!(config.scheduler.max_concurrent.get(), 2);
        assert_eq!(config.recovery.max_retries, 5);
        assert_eq!(config.recovery.on_exhausted, RecoveryStrategy::Abort);
        assert_eq!(config.recovery.max_replans, RecoveryConfig::default().max_replans);
        assert_eq!(config.repair.max_attempts, 3);
        assert_eq!(config.dispatch.max_iterations, 10);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.json");

        let mut config = KernelConfig::default();
        config.dispatch.max_iterations = 3;
        config.save(&path).unwrap();

        let loaded = KernelConfig::load(&path).unwrap();
        assert_eq!(loaded.dispatch.max_iterations, 3);
        assert_eq!(loaded.scheduler.max_concurrent, config.scheduler.max_concurrent);
    }

    #[test]
    fn test_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            KernelConfig::load(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(KernelConfig::load(&bad), Err(ConfigError::Parse(_))));

        let zero = dir.path().join("zero.json");
        std::fs::write(&zero, r#"{"scheduler": {"max_concurrent": 0}}"#).unwrap();
        assert!(matches!(KernelConfig::load(&zero), Err(ConfigError::Parse(_))));
    }
}
