//! Connector rollout controller.
//!
//! Moves a release-candidate connector version through a progressive
//! rollout over the actors of one actor definition: it decides which
//! actors are pinned to the release candidate at each percentage, enforces
//! the legal state transitions and settles pins when the rollout ends.
//! Real-world pacing belongs to an external workflow engine, which this
//! crate only starts and signals.
//!
//! # Components
//!
//! - **`filter`**: tier filters to eligibility predicate and tag
//! - **`selector`**: deterministic, monotonic actor targeting
//! - **`machine`**: the (state, command) transition table
//! - **`pins`**: pin side effects of advance and finalize
//! - **`validator`**: request checks and filter normalization
//! - **`service`**: `RolloutService`, the command facade
//! - **`ports`** / **`backend`**: collaborator traits and their redb implementations

use std::time::{SystemTime, UNIX_EPOCH};

pub mod backend;
pub mod config;
pub mod error;
pub mod filter;
pub mod machine;
pub mod pins;
pub mod ports;
pub mod selector;
pub mod service;
pub mod validator;
pub mod workflow;

pub use config::RolloutConfig;
pub use error::{RolloutError, RolloutResult};
pub use filter::{FilterEvaluator, compute_tag};
pub use machine::Command;
pub use pins::{PinLifecycleCoordinator, PinSettlement};
pub use ports::{ActorDirectory, PinService, RolloutRepository, WorkflowTrigger};
pub use selector::ActorSelection;
pub use service::{
    AdvanceOutcome, AdvanceRolloutRequest, AdvanceTarget, CreateRolloutRequest,
    FinalizeOutcome, FinalizeRolloutRequest, PauseRolloutRequest, RolloutService,
    StartRolloutRequest,
};
pub use validator::{RolloutRequestValidator, TierFilterRequest};
pub use workflow::{LoggingWorkflowTrigger, WorkflowInput, WorkflowSignal};

/// Seconds since the Unix epoch.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
