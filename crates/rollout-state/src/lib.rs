//! rollout-state: embedded state store for connector rollouts.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for rollouts, actor definition versions, default versions,
//! actors and the version pins that override an actor's default version.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{actor_definition_id}:{actor_id}`) enable prefix scans
//! over everything attached to one actor definition.
//!
//! Rollout writes are guarded twice: `update_rollout` rejects stale
//! revisions, and `create_rollout` enforces that at most one non-terminal
//! rollout exists per actor definition and release candidate.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
