//! redb table definitions for the rollout state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Per-definition records use `{actor_definition_id}:{child_id}` keys.

use redb::TableDefinition;

/// Rollouts keyed by `{rollout_id}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Actor definition versions keyed by `{version_id}`.
pub const VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("versions");

/// Default version id keyed by `{actor_definition_id}`.
pub const DEFAULT_VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("default_versions");

/// Actors keyed by `{actor_definition_id}:{actor_id}`.
pub const ACTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("actors");

/// Version pins keyed by `{actor_definition_id}:{actor_id}`.
pub const PINS: TableDefinition<&str, &[u8]> = TableDefinition::new("pins");

/// Shape shared by every table in the store.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;
