//! Tier filter evaluation.
//!
//! Turns the canonical tier filters of a rollout into an eligibility
//! predicate over actors and the rollout's tag. An empty tier union is the
//! "no restriction" case: every actor is eligible and the tag is `None`.

use std::collections::BTreeSet;

use rollout_state::{ActorRecord, CustomerTier, FilterOperator, TierFilter};

/// Eligibility predicate derived from a set of tier filters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterEvaluator {
    tiers: BTreeSet<CustomerTier>,
}

impl FilterEvaluator {
    pub fn new(filters: &[TierFilter]) -> Self {
        let tiers = filters
            .iter()
            .filter(|f| f.operator == FilterOperator::In)
            .flat_map(|f| f.tiers.iter().copied())
            .collect();
        Self { tiers }
    }

    /// Whether every actor is eligible.
    pub fn is_unrestricted(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn is_eligible(&self, actor: &ActorRecord) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        actor.tier.is_some_and(|tier| self.tiers.contains(&tier))
    }

    /// Sorted, deduplicated, hyphen-joined tier list, or `None` when unrestricted.
    pub fn tag(&self) -> Option<String> {
        if self.is_unrestricted() {
            return None;
        }
        let mut names: Vec<&str> = self.tiers.iter().map(|t| t.as_str()).collect();
        names.sort_unstable();
        Some(names.join("-"))
    }
}

/// Compute the tag for a set of filters.
pub fn compute_tag(filters: &[TierFilter]) -> Option<String> {
    FilterEvaluator::new(filters).tag()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn actor(tier: Option<CustomerTier>) -> ActorRecord {
        ActorRecord {
            actor_id: Uuid::new_v4(),
            actor_definition_id: Uuid::new_v4(),
            tier,
        }
    }

    #[test]
    fn tag_is_sorted_and_joined() {
        let filters = [TierFilter::any_of([CustomerTier::Tier2, CustomerTier::Tier0])];
        assert_eq!(compute_tag(&filters).as_deref(), Some("TIER_0-TIER_2"));
    }

    #[test]
    fn single_tier_tag() {
        let filters = [TierFilter::any_of([CustomerTier::Tier1])];
        assert_eq!(compute_tag(&filters).as_deref(), Some("TIER_1"));
    }

    #[test]
    fn empty_filters_have_no_tag() {
        assert_eq!(compute_tag(&[]), None);
        assert_eq!(compute_tag(&[TierFilter::any_of([])]), None);
    }

    #[test]
    fn tag_deduplicates_across_filters() {
        let filters = [
            TierFilter::any_of([CustomerTier::Tier1, CustomerTier::Tier2]),
            TierFilter::any_of([CustomerTier::Tier2, CustomerTier::Tier1]),
        ];
        assert_eq!(compute_tag(&filters).as_deref(), Some("TIER_1-TIER_2"));
    }

    #[test]
    fn unrestricted_admits_everyone() {
        let eval = FilterEvaluator::new(&[]);
        assert!(eval.is_eligible(&actor(None)));
        assert!(eval.is_eligible(&actor(Some(CustomerTier::Tier0))));
    }

    #[test]
    fn restricted_admits_only_listed_tiers() {
        let eval = FilterEvaluator::new(&[TierFilter::any_of([CustomerTier::Tier2])]);
        assert!(eval.is_eligible(&actor(Some(CustomerTier::Tier2))));
        assert!(!eval.is_eligible(&actor(Some(CustomerTier::Tier0))));
        // Unknown tier never passes a restriction.
        assert!(!eval.is_eligible(&actor(None)));
    }
}
