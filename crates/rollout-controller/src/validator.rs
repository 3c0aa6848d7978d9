//! Request validation and filter normalization.
//!
//! Runs before the state machine sees a command. Filters arrive in the loose
//! shape callers send (attribute name, operator string, values that may
//! include an `ALL` sentinel) and leave as canonical [`TierFilter`]s.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use rollout_state::{
    ActorDefinitionId, ActorDefinitionVersion, CustomerTier, Rollout, RolloutStrategy, TierFilter,
};

use crate::error::{RolloutError, RolloutResult};
use crate::ports::ActorDirectory;

pub const TIER_ATTRIBUTE: &str = "TIER";
const ALL_TIERS: &str = "ALL";

/// Filter as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFilterRequest {
    pub name: String,
    pub operator: String,
    pub values: Vec<String>,
}

impl TierFilterRequest {
    pub fn tiers(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: TIER_ATTRIBUTE.to_string(),
            operator: "IN".to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Normalize caller filters. Any `ALL` value lifts every restriction.
pub fn normalize_filters(requests: &[TierFilterRequest]) -> RolloutResult<Vec<TierFilter>> {
    let mut filters = Vec::with_capacity(requests.len());
    for request in requests {
        if !request.name.eq_ignore_ascii_case(TIER_ATTRIBUTE) {
            return Err(RolloutError::validation(format!(
                "unsupported filter attribute {:?}",
                request.name
            )));
        }
        if !request.operator.eq_ignore_ascii_case("IN") {
            return Err(RolloutError::validation(format!(
                "unsupported filter operator {:?}",
                request.operator
            )));
        }
        let mut tiers = Vec::with_capacity(request.values.len());
        for value in &request.values {
            let value = value.trim().to_ascii_uppercase();
            if value == ALL_TIERS {
                return Ok(Vec::new());
            }
            match CustomerTier::parse(&value) {
                Some(tier) => tiers.push(tier),
                None => {
                    return Err(RolloutError::validation(format!("unknown tier {value:?}")));
                }
            }
        }
        if !tiers.is_empty() {
            filters.push(TierFilter::any_of(tiers));
        }
    }
    Ok(filters)
}

/// Initial percentage check. Automated rollouts need a value in `1..=100`.
pub fn check_initial_pct(
    strategy: RolloutStrategy,
    initial_rollout_pct: Option<i64>,
) -> RolloutResult<Option<u32>> {
    match (strategy, initial_rollout_pct) {
        (RolloutStrategy::Automated, None) => Err(RolloutError::validation(
            "automated rollouts require an initial rollout percentage",
        )),
        (RolloutStrategy::Automated, Some(pct)) => bounded(pct, 1, "initial rollout percentage").map(Some),
        (_, None) => Ok(None),
        (_, Some(pct)) => bounded(pct, 0, "initial rollout percentage").map(Some),
    }
}

/// Final percentage check. Must be in `1..=100` and not below the initial percentage.
pub fn check_final_pct(
    initial_rollout_pct: Option<u32>,
    final_target_rollout_pct: Option<i64>,
) -> RolloutResult<Option<u32>> {
    let Some(pct) = final_target_rollout_pct else {
        return Ok(None);
    };
    let pct = bounded(pct, 1, "final target rollout percentage")?;
    match initial_rollout_pct {
        Some(initial) if pct < initial => Err(RolloutError::validation(format!(
            "final target rollout percentage {pct} is below the initial percentage {initial}"
        ))),
        _ => Ok(Some(pct)),
    }
}

/// Advance target check.
pub fn check_target_pct(target: i64) -> RolloutResult<u32> {
    bounded(target, 1, "target rollout percentage")
}

fn bounded(pct: i64, min: i64, what: &str) -> RolloutResult<u32> {
    if !(min..=100).contains(&pct) {
        return Err(RolloutError::validation(format!(
            "{what} must be between {min} and 100, got {pct}"
        )));
    }
    Ok(pct as u32)
}

/// Lookups that need the actor directory.
#[derive(Clone)]
pub struct RolloutRequestValidator {
    directory: Arc<dyn ActorDirectory>,
}

impl RolloutRequestValidator {
    pub fn new(directory: Arc<dyn ActorDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve the release candidate by tag and verify the repository.
    pub fn resolve_release_candidate(
        &self,
        actor_definition_id: &ActorDefinitionId,
        docker_repository: &str,
        docker_image_tag: &str,
    ) -> RolloutResult<ActorDefinitionVersion> {
        let version = self
            .directory
            .version_by_tag(actor_definition_id, docker_image_tag)?
            .ok_or_else(|| {
                RolloutError::validation(format!(
                    "actor definition {actor_definition_id} has no version tagged {docker_image_tag:?}"
                ))
            })?;
        check_repository(&version, docker_repository)?;
        Ok(version)
    }

    /// The version actors fall back to when the rollout rolls back.
    pub fn resolve_default_version(
        &self,
        actor_definition_id: &ActorDefinitionId,
    ) -> RolloutResult<ActorDefinitionVersion> {
        self.directory
            .default_version(actor_definition_id)?
            .ok_or_else(|| {
                RolloutError::validation(format!(
                    "actor definition {actor_definition_id} has no default version"
                ))
            })
    }

    /// Verify a command targets the repository of the rollout's release candidate.
    pub fn check_rollout_repository(
        &self,
        rollout: &Rollout,
        docker_repository: &str,
    ) -> RolloutResult<ActorDefinitionVersion> {
        let version = self.release_candidate(rollout)?;
        check_repository(&version, docker_repository)?;
        Ok(version)
    }

    pub fn release_candidate(&self, rollout: &Rollout) -> RolloutResult<ActorDefinitionVersion> {
        self.directory
            .version(&rollout.release_candidate_version_id)?
            .ok_or_else(|| {
                RolloutError::NotFound(format!(
                    "release candidate {} of rollout {}",
                    rollout.release_candidate_version_id, rollout.id
                ))
            })
    }

    pub fn initial_version(&self, rollout: &Rollout) -> RolloutResult<ActorDefinitionVersion> {
        self.directory
            .version(&rollout.initial_version_id)?
            .ok_or_else(|| {
                RolloutError::NotFound(format!(
                    "initial version {} of rollout {}",
                    rollout.initial_version_id, rollout.id
                ))
            })
    }
}

/// Mismatching repositories are a hard error.
pub fn check_repository(
    version: &ActorDefinitionVersion,
    docker_repository: &str,
) -> RolloutResult<()> {
    if version.docker_repository != docker_repository {
        return Err(RolloutError::validation(format!(
            "docker repository {docker_repository:?} does not match {:?} of version {}",
            version.docker_repository, version.version_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollout_state::StateStore;
    use uuid::Uuid;

    #[test]
    fn automated_initial_pct_bounds() {
        for bad in [Some(0), Some(-1), Some(101), None] {
            let err = check_initial_pct(RolloutStrategy::Automated, bad).unwrap_err();
            assert!(matches!(err, RolloutError::Validation(_)), "{bad:?}");
        }
        for good in [1, 50, 100] {
            assert_eq!(
                check_initial_pct(RolloutStrategy::Automated, Some(good)).unwrap(),
                Some(good as u32)
            );
        }
    }

    #[test]
    fn manual_initial_pct_is_optional() {
        assert_eq!(check_initial_pct(RolloutStrategy::Manual, None).unwrap(), None);
        assert_eq!(check_initial_pct(RolloutStrategy::Manual, Some(0)).unwrap(), Some(0));
        assert!(check_initial_pct(RolloutStrategy::Manual, Some(101)).is_err());
    }

    #[test]
    fn final_pct_must_cover_initial() {
        assert_eq!(check_final_pct(Some(10), None).unwrap(), None);
        assert_eq!(check_final_pct(Some(10), Some(80)).unwrap(), Some(80));
        assert!(check_final_pct(Some(50), Some(20)).is_err());
        assert!(check_final_pct(None, Some(0)).is_err());
        assert!(check_final_pct(None, Some(101)).is_err());
    }

    #[test]
    fn target_pct_bounds() {
        assert_eq!(check_target_pct(100).unwrap(), 100);
        assert!(check_target_pct(0).is_err());
        assert!(check_target_pct(150).is_err());
    }

    #[test]
    fn all_sentinel_clears_filters() {
        let filters = normalize_filters(&[
            TierFilterRequest::tiers(["TIER_0"]),
            TierFilterRequest::tiers(["TIER_1", "ALL"]),
        ])
        .unwrap();
        assert!(filters.is_empty());
    }

    #[test]
    fn filters_normalize_to_canonical_tiers() {
        let filters = normalize_filters(&[TierFilterRequest::tiers(["tier_2", "TIER_0"])]).unwrap();
        assert_eq!(
            filters,
            vec![TierFilter::any_of([CustomerTier::Tier2, CustomerTier::Tier0])]
        );
    }

    #[test]
    fn unsupported_filters_are_rejected() {
        let mut op = TierFilterRequest::tiers(["TIER_0"]);
        op.operator = "NOT_IN".into();
        assert!(normalize_filters(&[op]).is_err());

        let mut attr = TierFilterRequest::tiers(["TIER_0"]);
        attr.name = "REGION".into();
        assert!(normalize_filters(&[attr]).is_err());

        assert!(normalize_filters(&[TierFilterRequest::tiers(["TIER_9"])]).is_err());
    }

    fn version(def: ActorDefinitionId, repo: &str, tag: &str) -> ActorDefinitionVersion {
        ActorDefinitionVersion {
            version_id: Uuid::new_v4(),
            actor_definition_id: def,
            docker_repository: repo.into(),
            docker_image_tag: tag.into(),
        }
    }

    #[test]
    fn release_candidate_requires_matching_repository() {
        let store = StateStore::open_in_memory().unwrap();
        let def = Uuid::new_v4();
        store.put_version(&version(def, "airbyte/source-faker", "1.1.0")).unwrap();
        let validator = RolloutRequestValidator::new(Arc::new(store));

        assert!(
            validator
                .resolve_release_candidate(&def, "airbyte/source-faker", "1.1.0")
                .is_ok()
        );
        let err = validator
            .resolve_release_candidate(&def, "airbyte/source-other", "1.1.0")
            .unwrap_err();
        assert!(matches!(err, RolloutError::Validation(_)));
        let err = validator
            .resolve_release_candidate(&def, "airbyte/source-faker", "9.9.9")
            .unwrap_err();
        assert!(matches!(err, RolloutError::Validation(_)));
    }

    #[test]
    fn default_version_is_required() {
        let store = StateStore::open_in_memory().unwrap();
        let def = Uuid::new_v4();
        let v = version(def, "airbyte/source-faker", "1.0.0");
        store.put_version(&v).unwrap();
        let validator = RolloutRequestValidator::new(Arc::new(store.clone()));

        assert!(validator.resolve_default_version(&def).is_err());
        store.set_default_version(&def, &v.version_id).unwrap();
        assert_eq!(validator.resolve_default_version(&def).unwrap(), v);
    }
}
