//! Domain types for the rollout state store.
//!
//! These types represent the persisted state of connector rollouts, the
//! actor definition versions they move between, the actors attached to an
//! actor definition and the pins that bind actors to specific versions.
//! All types are serializable to/from JSON for storage in redb tables.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a rollout.
pub type RolloutId = Uuid;

/// Unique identifier for an actor definition (a connector type).
pub type ActorDefinitionId = Uuid;

/// Unique identifier for an actor definition version.
pub type VersionId = Uuid;

/// Unique identifier for an actor (a configured connector instance).
pub type ActorId = Uuid;

/// Unique identifier for the user driving a rollout.
pub type UserId = Uuid;

// ── Rollout ───────────────────────────────────────────────────────

/// State of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutState {
    Initialized,
    WorkflowStarted,
    InProgress,
    Paused,
    Finalizing,
    Succeeded,
    FailedRolledBack,
    Canceled,
    CanceledRolledBack,
}

impl RolloutState {
    pub const ALL: [RolloutState; 9] = [
        RolloutState::Initialized,
        RolloutState::WorkflowStarted,
        RolloutState::InProgress,
        RolloutState::Paused,
        RolloutState::Finalizing,
        RolloutState::Succeeded,
        RolloutState::FailedRolledBack,
        RolloutState::Canceled,
        RolloutState::CanceledRolledBack,
    ];

    /// Whether no further mutation is allowed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RolloutState::Succeeded
                | RolloutState::FailedRolledBack
                | RolloutState::Canceled
                | RolloutState::CanceledRolledBack
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RolloutState::Initialized => "INITIALIZED",
            RolloutState::WorkflowStarted => "WORKFLOW_STARTED",
            RolloutState::InProgress => "IN_PROGRESS",
            RolloutState::Paused => "PAUSED",
            RolloutState::Finalizing => "FINALIZING",
            RolloutState::Succeeded => "SUCCEEDED",
            RolloutState::FailedRolledBack => "FAILED_ROLLED_BACK",
            RolloutState::Canceled => "CANCELED",
            RolloutState::CanceledRolledBack => "CANCELED_ROLLED_BACK",
        }
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal outcomes a caller may finalize a rollout to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    Succeeded,
    FailedRolledBack,
    Canceled,
    CanceledRolledBack,
}

impl TerminalState {
    pub const ALL: [TerminalState; 4] = [
        TerminalState::Succeeded,
        TerminalState::FailedRolledBack,
        TerminalState::Canceled,
        TerminalState::CanceledRolledBack,
    ];
}

impl From<TerminalState> for RolloutState {
    fn from(state: TerminalState) -> Self {
        match state {
            TerminalState::Succeeded => RolloutState::Succeeded,
            TerminalState::FailedRolledBack => RolloutState::FailedRolledBack,
            TerminalState::Canceled => RolloutState::Canceled,
            TerminalState::CanceledRolledBack => RolloutState::CanceledRolledBack,
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        RolloutState::from(*self).fmt(f)
    }
}

/// How a rollout is being driven. Informational, not an eligibility rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutStrategy {
    #[default]
    Manual,
    Automated,
    /// An operator took over a rollout that was started automatically.
    Overridden,
}

impl fmt::Display for RolloutStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RolloutStrategy::Manual => "MANUAL",
            RolloutStrategy::Automated => "AUTOMATED",
            RolloutStrategy::Overridden => "OVERRIDDEN",
        })
    }
}

/// Customer segmentation attribute gating early rollout exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CustomerTier {
    #[serde(rename = "TIER_0")]
    Tier0,
    #[serde(rename = "TIER_1")]
    Tier1,
    #[serde(rename = "TIER_2")]
    Tier2,
}

impl CustomerTier {
    pub fn as_str(self) -> &'static str {
        match self {
            CustomerTier::Tier0 => "TIER_0",
            CustomerTier::Tier1 => "TIER_1",
            CustomerTier::Tier2 => "TIER_2",
        }
    }

    /// Parse a tier identifier such as `TIER_1`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TIER_0" => Some(CustomerTier::Tier0),
            "TIER_1" => Some(CustomerTier::Tier1),
            "TIER_2" => Some(CustomerTier::Tier2),
            _ => None,
        }
    }
}

impl fmt::Display for CustomerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter operator. Only set membership is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    #[default]
    In,
}

/// Canonical tier filter: an actor is eligible if its tier is in `tiers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFilter {
    pub operator: FilterOperator,
    pub tiers: Vec<CustomerTier>,
}

impl TierFilter {
    pub fn any_of(tiers: impl IntoIterator<Item = CustomerTier>) -> Self {
        Self {
            operator: FilterOperator::In,
            tiers: tiers.into_iter().collect(),
        }
    }
}

/// Progressive release of a release candidate to the actors of one
/// actor definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rollout {
    pub id: RolloutId,
    pub actor_definition_id: ActorDefinitionId,
    pub release_candidate_version_id: VersionId,
    /// Default version before the rollout began; never changes.
    pub initial_version_id: VersionId,
    pub state: RolloutState,
    pub rollout_strategy: RolloutStrategy,
    pub initial_rollout_pct: Option<u32>,
    /// Percentage the rollout has been advanced to (0 before the first advance).
    pub current_rollout_pct: u32,
    pub final_target_rollout_pct: Option<u32>,
    pub filters: Vec<TierFilter>,
    /// Label derived from `filters`; `None` means every tier is eligible.
    pub tag: Option<String>,
    pub has_breaking_changes: bool,
    pub max_step_wait_time_mins: Option<u32>,
    pub workflow_run_id: Option<String>,
    pub updated_by: Option<UserId>,
    /// Unix timestamp (seconds) when this rollout was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last mutation; never decreases.
    pub updated_at: u64,
    pub expires_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub paused_reason: Option<String>,
    pub error_msg: Option<String>,
    pub failed_reason: Option<String>,
    /// Optimistic concurrency revision, bumped by every stored update.
    pub revision: u64,
}

// ── Catalog ───────────────────────────────────────────────────────

/// A published version of an actor definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorDefinitionVersion {
    pub version_id: VersionId,
    pub actor_definition_id: ActorDefinitionId,
    pub docker_repository: String,
    pub docker_image_tag: String,
}

/// A configured connector instance attached to an actor definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorRecord {
    pub actor_id: ActorId,
    pub actor_definition_id: ActorDefinitionId,
    /// Tier of the owning organization, if known.
    pub tier: Option<CustomerTier>,
}

// ── Pins ──────────────────────────────────────────────────────────

/// Who created a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinOrigin {
    ConnectorRollout,
    User,
    BreakingChange,
}

/// Override binding an actor to a specific version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorPin {
    pub actor_id: ActorId,
    pub actor_definition_id: ActorDefinitionId,
    pub version_id: VersionId,
    pub origin: PinOrigin,
    /// Rollout that created the pin, for `ConnectorRollout` pins.
    pub rollout_id: Option<RolloutId>,
    /// How the rollout was driven when it created the pin.
    #[serde(default)]
    pub rollout_strategy: Option<RolloutStrategy>,
    pub created_at: u64,
}

impl ActorPin {
    pub fn is_rollout_pin(&self) -> bool {
        self.origin == PinOrigin::ConnectorRollout
    }
}

impl Rollout {
    /// Build the key for the rollouts table.
    pub fn table_key(&self) -> String {
        self.id.to_string()
    }
}

impl ActorRecord {
    /// Build the composite key for the actors table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.actor_definition_id, self.actor_id)
    }
}

impl ActorPin {
    /// Build the composite key for the pins table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.actor_definition_id, self.actor_id)
    }
}
