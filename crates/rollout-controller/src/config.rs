//! rollout.toml configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    pub timeouts: TimeoutsConfig,
    pub limits: LimitsConfig,
}

/// Pacing handed to the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub wait_between_rollout_seconds: u64,
    pub wait_between_sync_results_queries_seconds: u64,
    /// Lifetime of a rollout; sets `expires_at` at creation.
    pub rollout_expiration_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            wait_between_rollout_seconds: 3600,
            wait_between_sync_results_queries_seconds: 600,
            rollout_expiration_seconds: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Final target for rollouts created without one.
    pub default_final_target_rollout_pct: u32,
    /// Re-runs of a command step after a stale write, before it reaches a collaborator.
    pub max_conflict_retries: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_final_target_rollout_pct: 100,
            max_conflict_retries: 3,
        }
    }
}

impl RolloutConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: RolloutConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let pct = self.limits.default_final_target_rollout_pct;
        if !(1..=100).contains(&pct) {
            anyhow::bail!("limits.default_final_target_rollout_pct must be in 1..=100, got {pct}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = RolloutConfig::from_toml_str("").unwrap();
        assert_eq!(config, RolloutConfig::default());
        assert_eq!(config.timeouts.rollout_expiration_seconds, 604_800);
        assert_eq!(config.limits.max_conflict_retries, 3);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let toml = r#"
[timeouts]
wait_between_rollout_seconds = 60

[limits]
default_final_target_rollout_pct = 50
"#;
        let config = RolloutConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.timeouts.wait_between_rollout_seconds, 60);
        assert_eq!(config.timeouts.wait_between_sync_results_queries_seconds, 600);
        assert_eq!(config.limits.default_final_target_rollout_pct, 50);
        assert_eq!(config.limits.max_conflict_retries, 3);
    }

    #[test]
    fn out_of_range_default_target_is_rejected() {
        let err = RolloutConfig::from_toml_str("[limits]\ndefault_final_target_rollout_pct = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("default_final_target_rollout_pct"));
    }

    #[test]
    fn toml_roundtrip() {
        let config = RolloutConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(RolloutConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.toml");
        std::fs::write(&path, "[limits]\nmax_conflict_retries = 7\n").unwrap();
        let config = RolloutConfig::from_file(&path).unwrap();
        assert_eq!(config.limits.max_conflict_retries, 7);
    }
}
