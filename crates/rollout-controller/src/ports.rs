//! Collaborators the controller drives.
//!
//! Persistence-backed collaborators return [`StateResult`] so stale writes
//! stay distinguishable; external services report failures as plain
//! strings and are wrapped into `RolloutError::Dependency` by the caller.

use rollout_state::{
    ActorDefinitionId, ActorDefinitionVersion, ActorId, ActorPin, ActorRecord, Rollout,
    RolloutId, RolloutStrategy, StateResult, VersionId,
};

use crate::workflow::{WorkflowInput, WorkflowSignal};

/// Durable storage of rollout records.
pub trait RolloutRepository: Send + Sync {
    fn get(&self, id: &RolloutId) -> StateResult<Option<Rollout>>;
    /// Rollouts of an actor definition, optionally for one release candidate.
    fn list(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: Option<&VersionId>,
    ) -> StateResult<Vec<Rollout>>;
    /// Insert a rollout; rejects a second non-terminal rollout for the same version.
    fn create(&self, rollout: &Rollout) -> StateResult<()>;
    /// Store a mutation; rejects writes whose revision is stale.
    fn update(&self, rollout: &Rollout) -> StateResult<Rollout>;
}

/// Catalog of actor definition versions and the actors using them.
pub trait ActorDirectory: Send + Sync {
    fn version(&self, version_id: &VersionId) -> StateResult<Option<ActorDefinitionVersion>>;
    fn version_by_tag(
        &self,
        actor_definition_id: &ActorDefinitionId,
        docker_image_tag: &str,
    ) -> StateResult<Option<ActorDefinitionVersion>>;
    fn default_version(
        &self,
        actor_definition_id: &ActorDefinitionId,
    ) -> StateResult<Option<ActorDefinitionVersion>>;
    fn set_default_version(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
    ) -> StateResult<()>;
    fn actors(&self, actor_definition_id: &ActorDefinitionId) -> StateResult<Vec<ActorRecord>>;
}

/// Version pin management.
pub trait PinService: Send + Sync {
    fn list_pins(&self, actor_definition_id: &ActorDefinitionId) -> Result<Vec<ActorPin>, String>;

    /// Pin actors to a release candidate. Already pinned actors are skipped.
    /// Returns the number of pins created.
    fn create_pins_for_actors(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
        actor_ids: &[ActorId],
        rollout_id: &RolloutId,
        strategy: RolloutStrategy,
    ) -> Result<u32, String>;

    /// Remove every rollout pin to `version_id`. Returns the number removed.
    fn remove_pins_for_version(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
    ) -> Result<u32, String>;

    /// Move rollout pins left by earlier rollouts onto `version_id`.
    fn migrate_pins(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
        rollout_id: &RolloutId,
    ) -> Result<u32, String>;
}

/// Fire-and-forget interface to the workflow engine pacing a rollout.
pub trait WorkflowTrigger: Send + Sync {
    /// Start the workflow for a rollout. Returns the workflow run id.
    fn start(&self, input: &WorkflowInput) -> Result<String, String>;
    /// Tell a running workflow about an operator command.
    fn signal(&self, run_id: &str, signal: &WorkflowSignal) -> Result<(), String>;
}
