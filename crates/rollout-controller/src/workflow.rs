//! Workflow engine interface payloads.
//!
//! The engine pacing a rollout (waiting between steps, polling sync results)
//! lives outside this crate. The controller only tells it when to start and
//! forwards operator commands as signals.

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use rollout_state::{ActorDefinitionId, RolloutId, RolloutStrategy, TerminalState};

use crate::ports::WorkflowTrigger;

/// Everything the engine needs to run a rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInput {
    pub rollout_id: RolloutId,
    pub actor_definition_id: ActorDefinitionId,
    pub docker_repository: String,
    pub docker_image_tag: String,
    /// Tag of the version actors fall back to on rollback.
    pub initial_docker_image_tag: String,
    pub strategy: RolloutStrategy,
    pub tag: Option<String>,
    pub migrate_pins: bool,
    pub wait_between_rollout_seconds: u64,
    pub wait_between_sync_results_queries_seconds: u64,
    pub rollout_expiration_seconds: u64,
}

/// An operator command forwarded to a running workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum WorkflowSignal {
    Advance { target_pct: u32 },
    Pause { reason: String },
    Finalize { state: TerminalState, retain_pins: bool },
}

impl WorkflowSignal {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowSignal::Advance { .. } => "advance",
            WorkflowSignal::Pause { .. } => "pause",
            WorkflowSignal::Finalize { .. } => "finalize",
        }
    }
}

/// Trigger used when no workflow engine is attached. Logs and hands out run ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingWorkflowTrigger;

impl WorkflowTrigger for LoggingWorkflowTrigger {
    fn start(&self, input: &WorkflowInput) -> Result<String, String> {
        let run_id = Uuid::new_v4().to_string();
        info!(
            rollout = %input.rollout_id,
            run_id = %run_id,
            image = %format!("{}:{}", input.docker_repository, input.docker_image_tag),
            strategy = %input.strategy,
            migrate_pins = input.migrate_pins,
            "workflow started"
        );
        Ok(run_id)
    }

    fn signal(&self, run_id: &str, signal: &WorkflowSignal) -> Result<(), String> {
        info!(run_id, signal = signal.name(), ?signal, "workflow signalled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_serialize_with_a_tag() {
        let json = serde_json::to_value(WorkflowSignal::Finalize {
            state: TerminalState::Canceled,
            retain_pins: true,
        })
        .unwrap();
        assert_eq!(json["signal"], "finalize");
        assert_eq!(json["state"], "CANCELED");
        assert_eq!(json["retain_pins"], true);
    }

    #[test]
    fn logging_trigger_hands_out_distinct_run_ids() {
        let input = WorkflowInput {
            rollout_id: Uuid::new_v4(),
            actor_definition_id: Uuid::new_v4(),
            docker_repository: "airbyte/source-faker".into(),
            docker_image_tag: "1.1.0".into(),
            initial_docker_image_tag: "1.0.0".into(),
            strategy: RolloutStrategy::Manual,
            tag: None,
            migrate_pins: false,
            wait_between_rollout_seconds: 0,
            wait_between_sync_results_queries_seconds: 0,
            rollout_expiration_seconds: 0,
        };
        let a = LoggingWorkflowTrigger.start(&input).unwrap();
        let b = LoggingWorkflowTrigger.start(&input).unwrap();
        assert_ne!(a, b);
        assert!(
            LoggingWorkflowTrigger
                .signal(&a, &WorkflowSignal::Advance { target_pct: 10 })
                .is_ok()
        );
    }
}
