//! Collaborator implementations backed by the embedded state store.

use rollout_state::{
    ActorDefinitionId, ActorDefinitionVersion, ActorId, ActorPin, ActorRecord, Rollout,
    RolloutId, RolloutStrategy, StateResult, StateStore, VersionId,
};

use crate::epoch_secs;
use crate::ports::{ActorDirectory, PinService, RolloutRepository};

impl RolloutRepository for StateStore {
    fn get(&self, id: &RolloutId) -> StateResult<Option<Rollout>> {
        self.get_rollout(id)
    }

    fn list(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: Option<&VersionId>,
    ) -> StateResult<Vec<Rollout>> {
        self.list_rollouts_for_definition(actor_definition_id, version_id)
    }

    fn create(&self, rollout: &Rollout) -> StateResult<()> {
        self.create_rollout(rollout)
    }

    fn update(&self, rollout: &Rollout) -> StateResult<Rollout> {
        self.update_rollout(rollout)
    }
}

impl ActorDirectory for StateStore {
    fn version(&self, version_id: &VersionId) -> StateResult<Option<ActorDefinitionVersion>> {
        self.get_version(version_id)
    }

    fn version_by_tag(
        &self,
        actor_definition_id: &ActorDefinitionId,
        docker_image_tag: &str,
    ) -> StateResult<Option<ActorDefinitionVersion>> {
        self.find_version(actor_definition_id, docker_image_tag)
    }

    fn default_version(
        &self,
        actor_definition_id: &ActorDefinitionId,
    ) -> StateResult<Option<ActorDefinitionVersion>> {
        self.get_default_version(actor_definition_id)
    }

    fn set_default_version(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
    ) -> StateResult<()> {
        StateStore::set_default_version(self, actor_definition_id, version_id)
    }

    fn actors(&self, actor_definition_id: &ActorDefinitionId) -> StateResult<Vec<ActorRecord>> {
        self.list_actors(actor_definition_id)
    }
}

impl PinService for StateStore {
    fn list_pins(&self, actor_definition_id: &ActorDefinitionId) -> Result<Vec<ActorPin>, String> {
        StateStore::list_pins(self, actor_definition_id).map_err(|e| e.to_string())
    }

    fn create_pins_for_actors(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
        actor_ids: &[ActorId],
        rollout_id: &RolloutId,
        strategy: RolloutStrategy,
    ) -> Result<u32, String> {
        self.create_rollout_pins(
            actor_definition_id,
            version_id,
            actor_ids,
            rollout_id,
            strategy,
            epoch_secs(),
        )
        .map_err(|e| e.to_string())
    }

    fn remove_pins_for_version(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
    ) -> Result<u32, String> {
        self.remove_rollout_pins_for_version(actor_definition_id, version_id)
            .map_err(|e| e.to_string())
    }

    fn migrate_pins(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
        rollout_id: &RolloutId,
    ) -> Result<u32, String> {
        self.migrate_rollout_pins(actor_definition_id, version_id, rollout_id)
            .map_err(|e| e.to_string())
    }
}
