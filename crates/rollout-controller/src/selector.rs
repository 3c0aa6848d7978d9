//! Actor targeting: which actors hold the release candidate at a percentage.
//!
//! Candidates are ranked by `sha256(rollout_id ‖ actor_id)`, so the order is
//! fixed for the lifetime of a rollout and independent of the order the
//! directory returns actors in. The actors targeted at `p` are the already
//! pinned actors plus a prefix of the ranked candidates, which makes the
//! selection monotonic in `p` and stable across retries.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use tracing::debug;

use rollout_state::{ActorId, ActorPin, ActorRecord, Rollout, RolloutId};

use crate::filter::FilterEvaluator;

/// Result of selecting targets for a rollout percentage.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ActorSelection {
    /// Every actor that should hold the release-candidate pin, in rank order.
    pub targeted: Vec<ActorId>,
    /// Actors that need a new pin to reach the percentage, in rank order.
    pub newly_selected: Vec<ActorId>,
    /// Actors attached to the actor definition.
    pub total_actors: usize,
    /// Eligible unpinned actors plus actors already pinned to the release candidate.
    pub eligible_or_pinned: usize,
    /// Actors already pinned to the release candidate by a rollout.
    pub previously_pinned: usize,
}

impl ActorSelection {
    /// Share of `eligible_or_pinned` that holds the pin once the delta is applied.
    pub fn pinned_pct(&self) -> u32 {
        pinned_pct(self.targeted.len(), self.eligible_or_pinned)
    }
}

/// `ceil(100 * pinned / population)`; 0 for an empty population.
pub fn pinned_pct(pinned: usize, population: usize) -> u32 {
    if population == 0 {
        return 0;
    }
    (pinned * 100).div_ceil(population).min(100) as u32
}

/// `ceil(pct / 100 * population)`, bounded by the population.
pub fn target_total(population: usize, pct: u32) -> usize {
    let pct = pct.min(100) as usize;
    (population * pct).div_ceil(100)
}

/// Stable rank of an actor within one rollout.
pub fn rank(rollout_id: &RolloutId, actor_id: &ActorId) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(rollout_id.as_bytes());
    hasher.update(actor_id.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Select the actors that should hold the release-candidate pin at `pct`.
///
/// Actors pinned to any other version, or pinned to the release candidate
/// outside of a rollout, are never eligible.
pub fn select_targets(
    rollout: &Rollout,
    actors: &[ActorRecord],
    filter: &FilterEvaluator,
    pins: &[ActorPin],
    pct: u32,
) -> ActorSelection {
    let mut rc_pinned = HashSet::new();
    let mut foreign_pinned = HashSet::new();
    for pin in pins {
        if pin.is_rollout_pin() && pin.version_id == rollout.release_candidate_version_id {
            rc_pinned.insert(pin.actor_id);
        } else {
            foreign_pinned.insert(pin.actor_id);
        }
    }

    let mut seen = HashSet::new();
    let mut previously = Vec::new();
    let mut candidates = Vec::new();
    for actor in actors {
        if !seen.insert(actor.actor_id) {
            continue;
        }
        if rc_pinned.contains(&actor.actor_id) {
            previously.push(actor.actor_id);
        } else if !foreign_pinned.contains(&actor.actor_id) && filter.is_eligible(actor) {
            candidates.push(actor.actor_id);
        }
    }
    candidates.sort_by_cached_key(|id| rank(&rollout.id, id));

    let eligible_or_pinned = previously.len() + candidates.len();
    let wanted = target_total(eligible_or_pinned, pct)
        .saturating_sub(previously.len())
        .min(candidates.len());
    let newly_selected: Vec<ActorId> = candidates[..wanted].to_vec();

    let mut targeted: Vec<ActorId> = previously.iter().chain(&newly_selected).copied().collect();
    targeted.sort_by_cached_key(|id| rank(&rollout.id, id));

    debug!(
        rollout = %rollout.id,
        pct,
        total = seen.len(),
        eligible_or_pinned,
        previously_pinned = previously.len(),
        new = newly_selected.len(),
        "selected rollout targets"
    );

    ActorSelection {
        targeted,
        newly_selected,
        total_actors: seen.len(),
        eligible_or_pinned,
        previously_pinned: previously.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_state::{CustomerTier, PinOrigin, RolloutState, RolloutStrategy, TierFilter};
    use uuid::Uuid;

    fn rollout() -> Rollout {
        Rollout {
            id: Uuid::new_v4(),
            actor_definition_id: Uuid::new_v4(),
            release_candidate_version_id: Uuid::new_v4(),
            initial_version_id: Uuid::new_v4(),
            state: RolloutState::InProgress,
            rollout_strategy: RolloutStrategy::Manual,
            initial_rollout_pct: Some(10),
            current_rollout_pct: 0,
            final_target_rollout_pct: Some(100),
            filters: vec![],
            tag: None,
            has_breaking_changes: false,
            max_step_wait_time_mins: None,
            workflow_run_id: None,
            updated_by: None,
            created_at: 0,
            updated_at: 0,
            expires_at: None,
            completed_at: None,
            paused_reason: None,
            error_msg: None,
            failed_reason: None,
            revision: 0,
        }
    }

    fn actors(r: &Rollout, n: usize, tier: Option<CustomerTier>) -> Vec<ActorRecord> {
        (0..n)
            .map(|_| ActorRecord {
                actor_id: Uuid::new_v4(),
                actor_definition_id: r.actor_definition_id,
                tier,
            })
            .collect()
    }

    fn rc_pins(r: &Rollout, ids: &[ActorId]) -> Vec<ActorPin> {
        ids.iter()
            .map(|id| ActorPin {
                actor_id: *id,
                actor_definition_id: r.actor_definition_id,
                version_id: r.release_candidate_version_id,
                origin: PinOrigin::ConnectorRollout,
                rollout_id: Some(r.id),
                rollout_strategy: Some(RolloutStrategy::Manual),
                created_at: 0,
            })
            .collect()
    }

    fn is_subset(a: &[ActorId], b: &[ActorId]) -> bool {
        let b: HashSet<_> = b.iter().collect();
        a.iter().all(|id| b.contains(id))
    }

    #[test]
    fn target_total_rounds_up() {
        assert_eq!(target_total(20, 10), 2);
        assert_eq!(target_total(20, 50), 10);
        assert_eq!(target_total(3, 10), 1);
        assert_eq!(target_total(3, 100), 3);
        assert_eq!(target_total(0, 50), 0);
        assert_eq!(target_total(10, 0), 0);
        assert_eq!(target_total(10, 250), 10);
    }

    #[test]
    fn pinned_pct_rounds_up() {
        assert_eq!(pinned_pct(0, 0), 0);
        assert_eq!(pinned_pct(1, 3), 34);
        assert_eq!(pinned_pct(2, 20), 10);
        assert_eq!(pinned_pct(20, 20), 100);
    }

    #[test]
    fn ten_then_fifty_percent_of_twenty() {
        let r = rollout();
        let fleet = actors(&r, 20, None);
        let filter = FilterEvaluator::new(&[]);

        let first = select_targets(&r, &fleet, &filter, &[], 10);
        assert_eq!(first.newly_selected.len(), 2);
        assert_eq!(first.targeted.len(), 2);

        let pins = rc_pins(&r, &first.newly_selected);
        let second = select_targets(&r, &fleet, &filter, &pins, 50);
        assert_eq!(second.previously_pinned, 2);
        assert_eq!(second.newly_selected.len(), 8);
        assert_eq!(second.targeted.len(), 10);
        assert!(is_subset(&first.targeted, &second.targeted));
        assert_eq!(second.pinned_pct(), 50);
    }

    #[test]
    fn selection_is_monotonic_in_percentage() {
        let r = rollout();
        let fleet = actors(&r, 37, None);
        let filter = FilterEvaluator::new(&[]);

        let mut previous: Vec<ActorId> = Vec::new();
        for pct in 0..=100 {
            let selection = select_targets(&r, &fleet, &filter, &[], pct);
            assert!(is_subset(&previous, &selection.targeted), "shrank at {pct}%");
            previous = selection.targeted;
        }
        assert_eq!(previous.len(), 37);
    }

    #[test]
    fn selection_after_pinning_matches_fresh_selection() {
        let r = rollout();
        let fleet = actors(&r, 25, None);
        let filter = FilterEvaluator::new(&[]);

        let step = select_targets(&r, &fleet, &filter, &[], 20);
        let pins = rc_pins(&r, &step.newly_selected);
        let resumed = select_targets(&r, &fleet, &filter, &pins, 60);
        let fresh = select_targets(&r, &fleet, &filter, &[], 60);
        assert_eq!(resumed.targeted, fresh.targeted);
    }

    #[test]
    fn selection_is_deterministic_and_order_independent() {
        let r = rollout();
        let fleet = actors(&r, 30, None);
        let filter = FilterEvaluator::new(&[]);

        let a = select_targets(&r, &fleet, &filter, &[], 40);
        let b = select_targets(&r, &fleet, &filter, &[], 40);
        assert_eq!(a, b);

        let mut reversed = fleet.clone();
        reversed.reverse();
        let c = select_targets(&r, &reversed, &filter, &[], 40);
        assert_eq!(a.targeted, c.targeted);
    }

    #[test]
    fn already_pinned_actors_are_not_reselected() {
        let r = rollout();
        let fleet = actors(&r, 10, None);
        let filter = FilterEvaluator::new(&[]);
        let pins = rc_pins(&r, &[fleet[0].actor_id, fleet[1].actor_id, fleet[2].actor_id]);

        let selection = select_targets(&r, &fleet, &filter, &pins, 20);
        assert_eq!(selection.previously_pinned, 3);
        assert!(selection.newly_selected.is_empty());
        assert_eq!(selection.targeted.len(), 3);
    }

    #[test]
    fn foreign_pins_are_excluded() {
        let r = rollout();
        let fleet = actors(&r, 10, None);
        let filter = FilterEvaluator::new(&[]);
        let user_pin = ActorPin {
            actor_id: fleet[0].actor_id,
            actor_definition_id: r.actor_definition_id,
            version_id: Uuid::new_v4(),
            origin: PinOrigin::User,
            rollout_id: None,
            rollout_strategy: None,
            created_at: 0,
        };

        let selection = select_targets(&r, &fleet, &filter, &[user_pin], 100);
        assert_eq!(selection.eligible_or_pinned, 9);
        assert!(!selection.targeted.contains(&fleet[0].actor_id));
    }

    #[test]
    fn tier_filter_restricts_candidates() {
        let r = rollout();
        let mut fleet = actors(&r, 6, Some(CustomerTier::Tier2));
        fleet.extend(actors(&r, 4, Some(CustomerTier::Tier0)));
        fleet.extend(actors(&r, 2, None));
        let filter = FilterEvaluator::new(&[TierFilter::any_of([CustomerTier::Tier2])]);

        let selection = select_targets(&r, &fleet, &filter, &[], 100);
        assert_eq!(selection.total_actors, 12);
        assert_eq!(selection.eligible_or_pinned, 6);
        assert_eq!(selection.targeted.len(), 6);
    }

    #[test]
    fn zero_percent_selects_nothing() {
        let r = rollout();
        let fleet = actors(&r, 5, None);
        let selection = select_targets(&r, &fleet, &FilterEvaluator::new(&[]), &[], 0);
        assert!(selection.targeted.is_empty());
        assert_eq!(selection.eligible_or_pinned, 5);
    }
}
