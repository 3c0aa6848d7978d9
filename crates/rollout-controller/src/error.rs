//! Rollout controller error types.

use thiserror::Error;

use rollout_state::{RolloutId, RolloutState, StateError};

use crate::machine::Command;

/// Errors surfaced by rollout commands.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// The command is not legal from the rollout's current state. Nothing was mutated.
    #[error("invalid request: cannot {command} rollout {rollout_id} in state {state}")]
    InvalidTransition {
        rollout_id: RolloutId,
        command: Command,
        state: RolloutState,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Another writer updated the rollout between read and write.
    #[error("conflicting write for rollout {0}")]
    Conflict(RolloutId),

    #[error("{service} call failed: {message}")]
    Dependency {
        service: &'static str,
        message: String,
    },
}

impl RolloutError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn dependency(service: &'static str, message: impl Into<String>) -> Self {
        Self::Dependency {
            service,
            message: message.into(),
        }
    }

    /// Whether re-running the whole command may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Dependency { .. })
    }
}

impl From<StateError> for RolloutError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::StaleWrite { id, .. } => match id.parse() {
                Ok(id) => Self::Conflict(id),
                Err(_) => Self::dependency("state store", format!("stale write for {id}")),
            },
            StateError::NotFound(what) => Self::NotFound(what),
            StateError::Duplicate(what) => Self::Validation(what),
            StateError::Immutable(what) => Self::Validation(what),
            other => Self::dependency("state store", other.to_string()),
        }
    }
}

pub type RolloutResult<T> = Result<T, RolloutError>;
