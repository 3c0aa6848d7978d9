//! Pin lifecycle: what happens to version pins as a rollout moves.
//!
//! Every pin mutation for a command runs before the rollout record is
//! persisted, so a failure here leaves the stored rollout in its
//! pre-command state and the command can simply be retried. All mutations
//! are idempotent: creating pins skips actors that already carry one and
//! removal of an already removed set removes nothing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use rollout_state::{ActorId, ActorPin, ActorRecord, Rollout, TerminalState};

use crate::error::{RolloutError, RolloutResult};
use crate::ports::{ActorDirectory, PinService};
use crate::selector::{ActorSelection, pinned_pct};

/// What finalization did to the release-candidate pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "action", content = "count", rename_all = "snake_case")]
pub enum PinSettlement {
    /// Pins were removed; actors fall back to the default version.
    Removed(u32),
    /// Pins were left in place on a cancellation that asked to keep them.
    Retained,
    /// The release candidate became the default and its pins were removed.
    PromotedAndRemoved(u32),
}

/// Pins an explicit actor list would add.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitPinPlan {
    pub to_pin: Vec<ActorId>,
    /// Actors holding the release-candidate pin once the plan is applied.
    pub pinned_after: usize,
    pub population: usize,
}

impl ExplicitPinPlan {
    pub fn pinned_pct(&self) -> u32 {
        pinned_pct(self.pinned_after, self.population)
    }
}

/// Check an explicit actor list against the current pins.
///
/// `population` is the eligible-or-pinned count the percentage is measured
/// against. Unknown actors and actors pinned elsewhere are rejected; actors
/// already on the release candidate are skipped.
pub fn plan_explicit(
    rollout: &Rollout,
    actors: &[ActorRecord],
    pins: &[ActorPin],
    requested: &[ActorId],
    population: usize,
    final_target_pct: u32,
) -> RolloutResult<ExplicitPinPlan> {
    let known: HashSet<ActorId> = actors.iter().map(|a| a.actor_id).collect();
    let by_actor: HashMap<ActorId, &ActorPin> = pins.iter().map(|p| (p.actor_id, p)).collect();
    let rc = rollout.release_candidate_version_id;
    let on_rc = |pin: &ActorPin| pin.is_rollout_pin() && pin.version_id == rc;

    let mut to_pin = Vec::new();
    let mut seen = HashSet::new();
    for actor_id in requested {
        if !seen.insert(*actor_id) {
            continue;
        }
        if !known.contains(actor_id) {
            return Err(RolloutError::validation(format!(
                "actor {actor_id} does not belong to actor definition {}",
                rollout.actor_definition_id
            )));
        }
        match by_actor.get(actor_id).copied() {
            Some(pin) if on_rc(pin) => {}
            Some(pin) => {
                return Err(RolloutError::validation(format!(
                    "actor {actor_id} is already pinned to version {}",
                    pin.version_id
                )));
            }
            None => to_pin.push(*actor_id),
        }
    }

    let already = pins.iter().filter(|&p| on_rc(p)).count();
    let pinned_after = already + to_pin.len();
    let plan = ExplicitPinPlan {
        to_pin,
        pinned_after,
        population: population.max(pinned_after),
    };
    if plan.pinned_pct() > final_target_pct {
        return Err(RolloutError::validation(format!(
            "pinning {} actors would reach {}%, above the final target of {final_target_pct}%",
            plan.to_pin.len(),
            plan.pinned_pct()
        )));
    }
    Ok(plan)
}

/// Drives the pin service and the default-version switch for a rollout.
#[derive(Clone)]
pub struct PinLifecycleCoordinator {
    pins: Arc<dyn PinService>,
    directory: Arc<dyn ActorDirectory>,
}

impl PinLifecycleCoordinator {
    pub fn new(pins: Arc<dyn PinService>, directory: Arc<dyn ActorDirectory>) -> Self {
        Self { pins, directory }
    }

    pub fn current_pins(&self, rollout: &Rollout) -> RolloutResult<Vec<ActorPin>> {
        self.pins
            .list_pins(&rollout.actor_definition_id)
            .map_err(|e| pin_failure(rollout, e))
    }

    /// Create pins for the newly selected actors of an advance. Never unpins.
    pub fn apply_delta(&self, rollout: &Rollout, selection: &ActorSelection) -> RolloutResult<u32> {
        self.pin_actors(rollout, &selection.newly_selected)
    }

    pub fn pin_actors(&self, rollout: &Rollout, actor_ids: &[ActorId]) -> RolloutResult<u32> {
        if actor_ids.is_empty() {
            return Ok(0);
        }
        let created = self
            .pins
            .create_pins_for_actors(
                &rollout.actor_definition_id,
                &rollout.release_candidate_version_id,
                actor_ids,
                &rollout.id,
                rollout.rollout_strategy,
            )
            .map_err(|e| pin_failure(rollout, e))?;
        info!(rollout = %rollout.id, requested = actor_ids.len(), created, "release candidate pinned");
        Ok(created)
    }

    /// Re-point rollout pins left by earlier rollouts to this release candidate.
    pub fn migrate(&self, rollout: &Rollout) -> RolloutResult<u32> {
        let moved = self
            .pins
            .migrate_pins(
                &rollout.actor_definition_id,
                &rollout.release_candidate_version_id,
                &rollout.id,
            )
            .map_err(|e| pin_failure(rollout, e))?;
        info!(rollout = %rollout.id, moved, "rollout pins migrated");
        Ok(moved)
    }

    /// Settle the release-candidate pins for a terminal outcome.
    pub fn settle(
        &self,
        rollout: &Rollout,
        outcome: TerminalState,
        retain_pins_on_cancellation: bool,
    ) -> RolloutResult<PinSettlement> {
        let settlement = match outcome {
            TerminalState::Succeeded => {
                self.directory
                    .set_default_version(
                        &rollout.actor_definition_id,
                        &rollout.release_candidate_version_id,
                    )
                    .map_err(|e| {
                        warn!(rollout = %rollout.id, error = %e, "default version promotion failed");
                        RolloutError::dependency("actor directory", e.to_string())
                    })?;
                PinSettlement::PromotedAndRemoved(self.remove(rollout)?)
            }
            TerminalState::Canceled if retain_pins_on_cancellation => PinSettlement::Retained,
            TerminalState::Canceled
            | TerminalState::FailedRolledBack
            | TerminalState::CanceledRolledBack => PinSettlement::Removed(self.remove(rollout)?),
        };
        info!(rollout = %rollout.id, %outcome, ?settlement, "rollout pins settled");
        Ok(settlement)
    }

    fn remove(&self, rollout: &Rollout) -> RolloutResult<u32> {
        self.pins
            .remove_pins_for_version(
                &rollout.actor_definition_id,
                &rollout.release_candidate_version_id,
            )
            .map_err(|e| pin_failure(rollout, e))
    }
}

fn pin_failure(rollout: &Rollout, message: String) -> RolloutError {
    warn!(rollout = %rollout.id, error = %message, "pin service call failed");
    RolloutError::dependency("pin service", message)
}
