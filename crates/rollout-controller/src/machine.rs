//! Rollout state machine.
//!
//! Legality is a single table from (current state, command) to the next
//! state, built once on first use:
//!
//! ```text
//! INITIALIZED ─start─▶ WORKFLOW_STARTED ─advance─▶ IN_PROGRESS ⇄ PAUSED
//!                                                        │
//!                                              begin-finalizing
//!                                                        ▼
//!           any non-terminal ─finalize(t)─▶ t ∈ {SUCCEEDED, FAILED_ROLLED_BACK,
//!                                                CANCELED, CANCELED_ROLLED_BACK}
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use tracing::{info, warn};

use rollout_state::{Rollout, RolloutState, TerminalState};

use crate::error::{RolloutError, RolloutResult};

/// A command issued against a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Command {
    Start,
    Advance,
    Pause,
    BeginFinalizing,
    Finalize(TerminalState),
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Start,
        Command::Advance,
        Command::Pause,
        Command::BeginFinalizing,
        Command::Finalize(TerminalState::Succeeded),
        Command::Finalize(TerminalState::FailedRolledBack),
        Command::Finalize(TerminalState::Canceled),
        Command::Finalize(TerminalState::CanceledRolledBack),
    ];
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => f.write_str("start"),
            Command::Advance => f.write_str("advance"),
            Command::Pause => f.write_str("pause"),
            Command::BeginFinalizing => f.write_str("begin finalizing"),
            Command::Finalize(state) => write!(f, "finalize to {state}"),
        }
    }
}

const ACTIVE: [RolloutState; 3] = [
    RolloutState::WorkflowStarted,
    RolloutState::InProgress,
    RolloutState::Paused,
];

static TRANSITIONS: LazyLock<HashMap<(RolloutState, Command), RolloutState>> =
    LazyLock::new(|| {
        let mut table = HashMap::new();
        table.insert(
            (RolloutState::Initialized, Command::Start),
            RolloutState::WorkflowStarted,
        );
        for state in ACTIVE {
            table.insert((state, Command::Advance), RolloutState::InProgress);
            table.insert((state, Command::Pause), RolloutState::Paused);
            table.insert((state, Command::BeginFinalizing), RolloutState::Finalizing);
        }
        table.insert(
            (RolloutState::Finalizing, Command::BeginFinalizing),
            RolloutState::Finalizing,
        );
        for state in RolloutState::ALL.into_iter().filter(|s| !s.is_terminal()) {
            for terminal in TerminalState::ALL {
                table.insert((state, Command::Finalize(terminal)), terminal.into());
            }
        }
        table
    });

/// The state `command` leads to from `state`, or `None` if it is illegal.
pub fn next_state(state: RolloutState, command: Command) -> Option<RolloutState> {
    TRANSITIONS.get(&(state, command)).copied()
}

/// A validated transition that has not been applied yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub command: Command,
    pub from: RolloutState,
    pub to: RolloutState,
}

/// Decide whether `command` is legal for `rollout`. Never mutates.
pub fn decide(rollout: &Rollout, command: Command) -> RolloutResult<Transition> {
    match next_state(rollout.state, command) {
        Some(to) => Ok(Transition {
            command,
            from: rollout.state,
            to,
        }),
        None => {
            warn!(
                rollout = %rollout.id,
                state = %rollout.state,
                %command,
                "rejected rollout command"
            );
            Err(RolloutError::InvalidTransition {
                rollout_id: rollout.id,
                command,
                state: rollout.state,
            })
        }
    }
}

/// Apply a decided transition. `updated_at` never moves backwards.
pub fn apply(rollout: &mut Rollout, transition: Transition, now: u64) {
    rollout.state = transition.to;
    rollout.updated_at = rollout.updated_at.max(now);
    if transition.from != transition.to {
        info!(
            rollout = %rollout.id,
            from = %transition.from,
            to = %transition.to,
            command = %transition.command,
            "rollout transitioned"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_state::RolloutStrategy;
    use uuid::Uuid;

    use rollout_state::RolloutState::*;

    fn rollout_in(state: RolloutState) -> Rollout {
        Rollout {
            id: Uuid::new_v4(),
            actor_definition_id: Uuid::new_v4(),
            release_candidate_version_id: Uuid::new_v4(),
            initial_version_id: Uuid::new_v4(),
            state,
            rollout_strategy: RolloutStrategy::Manual,
            initial_rollout_pct: None,
            current_rollout_pct: 0,
            final_target_rollout_pct: None,
            filters: vec![],
            tag: None,
            has_breaking_changes: false,
            max_step_wait_time_mins: None,
            workflow_run_id: None,
            updated_by: None,
            created_at: 100,
            updated_at: 100,
            expires_at: None,
            completed_at: None,
            paused_reason: None,
            error_msg: None,
            failed_reason: None,
            revision: 0,
        }
    }

    /// The full expected table, written out independently of the builder.
    fn expected(state: RolloutState, command: Command) -> Option<RolloutState> {
        match command {
            Command::Start => (state == Initialized).then_some(WorkflowStarted),
            Command::Advance => {
                matches!(state, WorkflowStarted | InProgress | Paused).then_some(InProgress)
            }
            Command::Pause => matches!(state, WorkflowStarted | InProgress | Paused).then_some(Paused),
            Command::BeginFinalizing => {
                matches!(state, WorkflowStarted | InProgress | Paused | Finalizing)
                    .then_some(Finalizing)
            }
            Command::Finalize(t) => (!state.is_terminal()).then_some(t.into()),
        }
    }

    #[test]
    fn table_matches_expectations_exhaustively() {
        for state in RolloutState::ALL {
            for command in Command::ALL {
                assert_eq!(
                    next_state(state, command),
                    expected(state, command),
                    "{state} / {command}"
                );
            }
        }
    }

    #[test]
    fn start_only_from_initialized() {
        for state in RolloutState::ALL {
            let result = decide(&rollout_in(state), Command::Start);
            assert_eq!(result.is_ok(), state == Initialized, "{state}");
        }
    }

    #[test]
    fn finalize_rejected_from_every_terminal_state() {
        for state in RolloutState::ALL.into_iter().filter(|s| s.is_terminal()) {
            for t in TerminalState::ALL {
                let err = decide(&rollout_in(state), Command::Finalize(t)).unwrap_err();
                assert!(matches!(err, RolloutError::InvalidTransition { .. }));
            }
        }
    }

    #[test]
    fn finalize_accepted_from_every_non_terminal_state() {
        for state in RolloutState::ALL.into_iter().filter(|s| !s.is_terminal()) {
            let t = decide(&rollout_in(state), Command::Finalize(TerminalState::Canceled)).unwrap();
            assert_eq!(t.to, Canceled);
        }
    }

    #[test]
    fn advance_clears_pause() {
        let t = decide(&rollout_in(Paused), Command::Advance).unwrap();
        assert_eq!(t.to, InProgress);
        let t = decide(&rollout_in(WorkflowStarted), Command::Advance).unwrap();
        assert_eq!(t.to, InProgress);
    }

    #[test]
    fn rejection_names_command_and_state() {
        let rollout = rollout_in(Succeeded);
        let err = decide(&rollout, Command::Advance).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("advance"), "{msg}");
        assert!(msg.contains("SUCCEEDED"), "{msg}");
    }

    #[test]
    fn decide_does_not_mutate() {
        let rollout = rollout_in(Initialized);
        let before = rollout.clone();
        let _ = decide(&rollout, Command::Pause);
        let _ = decide(&rollout, Command::Start);
        assert_eq!(rollout, before);
    }

    #[test]
    fn apply_keeps_updated_at_monotonic() {
        let mut rollout = rollout_in(InProgress);
        let t = decide(&rollout, Command::Pause).unwrap();
        apply(&mut rollout, t, 50);
        assert_eq!(rollout.state, Paused);
        assert_eq!(rollout.updated_at, 100);

        let t = decide(&rollout, Command::Advance).unwrap();
        apply(&mut rollout, t, 200);
        assert_eq!(rollout.updated_at, 200);
    }
}
