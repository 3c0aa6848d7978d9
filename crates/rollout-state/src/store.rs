//! StateStore: redb-backed state persistence for connector rollouts.
//!
//! Provides typed CRUD operations over rollouts, actor definition versions,
//! default versions, actors and pins. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        txn.open_table(DEFAULT_VERSIONS).map_err(map_err!(Table))?;
        txn.open_table(ACTORS).map_err(map_err!(Table))?;
        txn.open_table(PINS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn put_value<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Decode every value whose key starts with `prefix` (all values for an empty prefix).
    fn scan<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    // ── Rollouts ───────────────────────────────────────────────────

    /// Insert a new rollout.
    ///
    /// Fails with `Duplicate` if the id is taken or if another non-terminal
    /// rollout exists for the same actor definition and release candidate.
    pub fn create_rollout(&self, rollout: &Rollout) -> StateResult<()> {
        let key = rollout.table_key();
        let value = encode(rollout)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Duplicate(format!("rollout {key}")));
            }
            if !rollout.state.is_terminal() {
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (_, existing) = entry.map_err(map_err!(Read))?;
                    let existing: Rollout = decode(existing.value())?;
                    if existing.actor_definition_id == rollout.actor_definition_id
                        && existing.release_candidate_version_id
                            == rollout.release_candidate_version_id
                        && !existing.state.is_terminal()
                    {
                        return Err(StateError::Duplicate(format!(
                            "non-terminal rollout {} already exists for actor definition {} version {}",
                            existing.id,
                            rollout.actor_definition_id,
                            rollout.release_candidate_version_id
                        )));
                    }
                }
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, state = %rollout.state, "rollout created");
        Ok(())
    }

    /// Get a rollout by id.
    pub fn get_rollout(&self, id: &RolloutId) -> StateResult<Option<Rollout>> {
        self.get_value(ROLLOUTS, &id.to_string())
    }

    /// List all rollouts, oldest first.
    pub fn list_rollouts(&self) -> StateResult<Vec<Rollout>> {
        let mut rollouts: Vec<Rollout> = self.scan(ROLLOUTS, "")?;
        rollouts.sort_by_key(|r| (r.created_at, r.id));
        Ok(rollouts)
    }

    /// List rollouts for an actor definition, optionally restricted to one
    /// release candidate, oldest first.
    pub fn list_rollouts_for_definition(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: Option<&VersionId>,
    ) -> StateResult<Vec<Rollout>> {
        Ok(self
            .list_rollouts()?
            .into_iter()
            .filter(|r| r.actor_definition_id == *actor_definition_id)
            .filter(|r| version_id.is_none_or(|v| r.release_candidate_version_id == *v))
            .collect())
    }

    /// Store an updated rollout, checking its revision against the stored copy.
    ///
    /// Returns the stored rollout with its revision bumped. Terminal rollouts
    /// are immutable.
    pub fn update_rollout(&self, rollout: &Rollout) -> StateResult<Rollout> {
        let key = rollout.table_key();
        let mut next = rollout.clone();
        next.revision = rollout.revision + 1;
        let value = encode(&next)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            let existing = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| StateError::NotFound(format!("rollout {key}")))?;
            let existing: Rollout = decode(&existing)?;
            if existing.revision != rollout.revision {
                return Err(StateError::StaleWrite {
                    id: key,
                    expected: rollout.revision,
                    found: existing.revision,
                });
            }
            if existing.state.is_terminal() {
                return Err(StateError::Immutable(format!(
                    "rollout {key} is {}",
                    existing.state
                )));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, state = %next.state, revision = next.revision, "rollout updated");
        Ok(next)
    }

    // ── Versions ───────────────────────────────────────────────────

    /// Insert or update an actor definition version.
    pub fn put_version(&self, version: &ActorDefinitionVersion) -> StateResult<()> {
        self.put_value(VERSIONS, &version.version_id.to_string(), version)?;
        debug!(
            version = %version.version_id,
            tag = %version.docker_image_tag,
            "version stored"
        );
        Ok(())
    }

    /// Get a version by id.
    pub fn get_version(&self, version_id: &VersionId) -> StateResult<Option<ActorDefinitionVersion>> {
        self.get_value(VERSIONS, &version_id.to_string())
    }

    /// List all versions of an actor definition.
    pub fn list_versions(
        &self,
        actor_definition_id: &ActorDefinitionId,
    ) -> StateResult<Vec<ActorDefinitionVersion>> {
        let versions: Vec<ActorDefinitionVersion> = self.scan(VERSIONS, "")?;
        Ok(versions
            .into_iter()
            .filter(|v| v.actor_definition_id == *actor_definition_id)
            .collect())
    }

    /// Find a version of an actor definition by docker image tag.
    pub fn find_version(
        &self,
        actor_definition_id: &ActorDefinitionId,
        docker_image_tag: &str,
    ) -> StateResult<Option<ActorDefinitionVersion>> {
        Ok(self
            .list_versions(actor_definition_id)?
            .into_iter()
            .find(|v| v.docker_image_tag == docker_image_tag))
    }

    /// Make `version_id` the default version of its actor definition.
    pub fn set_default_version(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
    ) -> StateResult<()> {
        match self.get_version(version_id)? {
            Some(v) if v.actor_definition_id == *actor_definition_id => {}
            _ => {
                return Err(StateError::NotFound(format!(
                    "version {version_id} of actor definition {actor_definition_id}"
                )));
            }
        }
        self.put_value(DEFAULT_VERSIONS, &actor_definition_id.to_string(), version_id)?;
        debug!(definition = %actor_definition_id, version = %version_id, "default version set");
        Ok(())
    }

    /// Get the default version of an actor definition.
    pub fn get_default_version(
        &self,
        actor_definition_id: &ActorDefinitionId,
    ) -> StateResult<Option<ActorDefinitionVersion>> {
        let version_id: Option<VersionId> =
            self.get_value(DEFAULT_VERSIONS, &actor_definition_id.to_string())?;
        match version_id {
            Some(id) => self.get_version(&id),
            None => Ok(None),
        }
    }

    // ── Actors ─────────────────────────────────────────────────────

    /// Insert or update an actor.
    pub fn put_actor(&self, actor: &ActorRecord) -> StateResult<()> {
        self.put_value(ACTORS, &actor.table_key(), actor)
    }

    /// List all actors attached to an actor definition.
    pub fn list_actors(&self, actor_definition_id: &ActorDefinitionId) -> StateResult<Vec<ActorRecord>> {
        self.scan(ACTORS, &format!("{actor_definition_id}:"))
    }

    // ── Pins ───────────────────────────────────────────────────────

    /// Insert or replace the pin of one actor.
    pub fn put_pin(&self, pin: &ActorPin) -> StateResult<()> {
        self.put_value(PINS, &pin.table_key(), pin)
    }

    /// List all pins on an actor definition.
    pub fn list_pins(&self, actor_definition_id: &ActorDefinitionId) -> StateResult<Vec<ActorPin>> {
        self.scan(PINS, &format!("{actor_definition_id}:"))
    }

    /// Pin actors to `version_id` on behalf of a rollout.
    ///
    /// Actors that already carry any pin are left untouched. Returns the
    /// number of pins created.
    pub fn create_rollout_pins(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
        actor_ids: &[ActorId],
        rollout_id: &RolloutId,
        strategy: RolloutStrategy,
        now: u64,
    ) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut created = 0u32;
        {
            let mut table = txn.open_table(PINS).map_err(map_err!(Table))?;
            for actor_id in actor_ids {
                let pin = ActorPin {
                    actor_id: *actor_id,
                    actor_definition_id: *actor_definition_id,
                    version_id: *version_id,
                    origin: PinOrigin::ConnectorRollout,
                    rollout_id: Some(*rollout_id),
                    rollout_strategy: Some(strategy),
                    created_at: now,
                };
                let key = pin.table_key();
                if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                    continue;
                }
                let value = encode(&pin)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                created += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(definition = %actor_definition_id, version = %version_id, created, "rollout pins created");
        Ok(created)
    }

    /// Remove every rollout-origin pin to `version_id`. Returns the number removed.
    pub fn remove_rollout_pins_for_version(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
    ) -> StateResult<u32> {
        let keys: Vec<String> = self
            .list_pins(actor_definition_id)?
            .into_iter()
            .filter(|pin| pin.is_rollout_pin() && pin.version_id == *version_id)
            .map(|pin| pin.table_key())
            .collect();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(PINS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(definition = %actor_definition_id, version = %version_id, count, "rollout pins removed");
        Ok(count)
    }

    /// Re-point every rollout-origin pin on the actor definition to
    /// `version_id` and `rollout_id`. Returns the number of pins changed.
    pub fn migrate_rollout_pins(
        &self,
        actor_definition_id: &ActorDefinitionId,
        version_id: &VersionId,
        rollout_id: &RolloutId,
    ) -> StateResult<u32> {
        let moved: Vec<ActorPin> = self
            .list_pins(actor_definition_id)?
            .into_iter()
            .filter(|pin| pin.is_rollout_pin())
            .filter(|pin| pin.version_id != *version_id || pin.rollout_id != Some(*rollout_id))
            .map(|pin| ActorPin {
                version_id: *version_id,
                rollout_id: Some(*rollout_id),
                ..pin
            })
            .collect();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PINS).map_err(map_err!(Table))?;
            for pin in &moved {
                let value = encode(pin)?;
                table
                    .insert(pin.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        let count = moved.len() as u32;
        debug!(definition = %actor_definition_id, version = %version_id, count, "rollout pins migrated");
        Ok(count)
    }
}
