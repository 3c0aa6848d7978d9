//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;

use rollout_controller::{LoggingWorkflowTrigger, RolloutConfig, RolloutService};
use rollout_state::StateStore;

use crate::OutputFormat;

pub mod catalog;
pub mod query;
pub mod rollout;

const DB_FILE: &str = "rollouts.redb";

/// Everything a subcommand needs.
pub struct Context {
    pub store: StateStore,
    pub service: RolloutService,
    pub format: OutputFormat,
}

impl Context {
    pub fn open(data_dir: &Path, config: Option<&Path>, format: OutputFormat) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        let db_path = data_dir.join(DB_FILE);
        let store = StateStore::open(&db_path)
            .with_context(|| format!("opening state store {}", db_path.display()))?;
        let config = match config {
            Some(path) => RolloutConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => RolloutConfig::default(),
        };
        tracing::debug!(path = ?db_path, ?config, "rolloutctl context ready");
        let service =
            RolloutService::with_store(store.clone(), Arc::new(LoggingWorkflowTrigger), config);
        Ok(Self {
            store,
            service,
            format,
        })
    }

    /// Print `value` as pretty JSON or as the text `render` produces.
    pub fn emit<T: Serialize>(&self, value: &T, render: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => println!("{}", render(value)),
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_context(dir: &Path) -> Context {
    Context::open(dir, None, OutputFormat::Json).unwrap()
}
