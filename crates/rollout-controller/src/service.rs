//! RolloutService, the command facade over a rollout's lifecycle.
//!
//! Every mutating command runs the same sequence under a per-rollout lock:
//!
//! 1. load the stored rollout
//! 2. validate the request against it
//! 3. decide the transition from the state table
//! 4. apply pin side effects
//! 5. signal the workflow, if one is running
//! 6. persist with an optimistic revision check
//!
//! A failure before step 6 leaves the stored rollout untouched. A stale
//! write re-runs the sequence from step 1, up to `max_conflict_retries`
//! times, unless steps 4 or 5 already reached a collaborator: those are
//! never repeated inside one call and the command fails with `Conflict`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use rollout_state::{
    ActorDefinitionId, ActorId, Rollout, RolloutId, RolloutState, RolloutStrategy, StateError,
    StateStore, TerminalState, UserId,
};

use crate::config::RolloutConfig;
use crate::epoch_secs;
use crate::error::{RolloutError, RolloutResult};
use crate::filter::{FilterEvaluator, compute_tag};
use crate::machine::{self, Command};
use crate::pins::{PinLifecycleCoordinator, PinSettlement, plan_explicit};
use crate::ports::{ActorDirectory, PinService, RolloutRepository, WorkflowTrigger};
use crate::selector::{self, ActorSelection};
use crate::validator::{
    RolloutRequestValidator, TierFilterRequest, check_final_pct, check_initial_pct,
    check_target_pct, normalize_filters,
};
use crate::workflow::{WorkflowInput, WorkflowSignal};

// ── Requests ──────────────────────────────────────────────────────

/// Get-or-create an INITIALIZED rollout for a release candidate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRolloutRequest {
    pub actor_definition_id: ActorDefinitionId,
    pub docker_repository: String,
    pub docker_image_tag: String,
    pub updated_by: Option<UserId>,
    pub rollout_strategy: Option<RolloutStrategy>,
    pub initial_rollout_pct: Option<i64>,
    pub final_target_rollout_pct: Option<i64>,
    pub filters: Vec<TierFilterRequest>,
    pub has_breaking_changes: bool,
    pub max_step_wait_time_mins: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRolloutRequest {
    pub rollout_id: RolloutId,
    pub docker_repository: String,
    pub updated_by: Option<UserId>,
    pub rollout_strategy: Option<RolloutStrategy>,
    /// Overrides the percentage recorded at creation.
    pub initial_rollout_pct: Option<i64>,
    pub final_target_rollout_pct: Option<i64>,
    /// Re-point rollout pins left by earlier rollouts to this release candidate.
    pub migrate_pins: bool,
}

/// What an advance pins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceTarget {
    Percentage(i64),
    Actors(Vec<ActorId>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceRolloutRequest {
    pub rollout_id: RolloutId,
    pub docker_repository: String,
    pub target: AdvanceTarget,
    pub rollout_strategy: Option<RolloutStrategy>,
    pub updated_by: Option<UserId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PauseRolloutRequest {
    pub rollout_id: RolloutId,
    pub docker_repository: String,
    pub reason: String,
    pub rollout_strategy: Option<RolloutStrategy>,
    pub updated_by: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRolloutRequest {
    pub rollout_id: RolloutId,
    pub docker_repository: String,
    pub state: TerminalState,
    pub error_msg: Option<String>,
    pub failed_reason: Option<String>,
    /// Only consulted for `CANCELED`.
    pub retain_pins_on_cancellation: bool,
    pub rollout_strategy: Option<RolloutStrategy>,
    pub updated_by: Option<UserId>,
}

// ── Outcomes ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct AdvanceOutcome {
    pub rollout: Rollout,
    /// Actors pinned by this advance, in rank order.
    pub newly_pinned: Vec<ActorId>,
    pub pins_created: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeOutcome {
    pub rollout: Rollout,
    pub settlement: PinSettlement,
}

// ── Service ───────────────────────────────────────────────────────

pub struct RolloutService {
    repository: Arc<dyn RolloutRepository>,
    directory: Arc<dyn ActorDirectory>,
    pins: PinLifecycleCoordinator,
    workflow: Arc<dyn WorkflowTrigger>,
    validator: RolloutRequestValidator,
    config: RolloutConfig,
    /// One mutex per rollout id; commands on different rollouts never contend.
    locks: Mutex<HashMap<RolloutId, Arc<Mutex<()>>>>,
}

impl RolloutService {
    pub fn new(
        repository: Arc<dyn RolloutRepository>,
        directory: Arc<dyn ActorDirectory>,
        pin_service: Arc<dyn PinService>,
        workflow: Arc<dyn WorkflowTrigger>,
        config: RolloutConfig,
    ) -> Self {
        Self {
            repository,
            pins: PinLifecycleCoordinator::new(pin_service, directory.clone()),
            validator: RolloutRequestValidator::new(directory.clone()),
            directory,
            workflow,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Service whose repository, directory and pin service are all `store`.
    pub fn with_store(
        store: StateStore,
        workflow: Arc<dyn WorkflowTrigger>,
        config: RolloutConfig,
    ) -> Self {
        let store = Arc::new(store);
        Self::new(store.clone(), store.clone(), store, workflow, config)
    }

    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    // ── Commands ──────────────────────────────────────────────────

    /// Create an INITIALIZED rollout, or reuse the INITIALIZED one for the
    /// same release candidate.
    pub async fn create_rollout(&self, req: CreateRolloutRequest) -> RolloutResult<Rollout> {
        let rc = self.validator.resolve_release_candidate(
            &req.actor_definition_id,
            &req.docker_repository,
            &req.docker_image_tag,
        )?;
        let initial = self
            .validator
            .resolve_default_version(&req.actor_definition_id)?;
        let strategy = start_strategy(req.rollout_strategy);
        let initial_pct = check_initial_pct(strategy, req.initial_rollout_pct)?;
        let final_pct = check_final_pct(initial_pct, req.final_target_rollout_pct)?;
        let filters = normalize_filters(&req.filters)?;
        let tag = compute_tag(&filters);

        let existing = self
            .repository
            .list(&req.actor_definition_id, Some(&rc.version_id))?;
        if let Some(active) = existing
            .iter()
            .find(|r| !r.state.is_terminal() && r.state != RolloutState::Initialized)
        {
            return Err(RolloutError::validation(format!(
                "rollout {} for version {} is already {}",
                active.id, rc.docker_image_tag, active.state
            )));
        }
        if let Some(done) = existing.iter().find(|r| {
            r.state.is_terminal() && r.state != RolloutState::Canceled && r.tag == tag
        }) {
            return Err(RolloutError::validation(format!(
                "rollout {} for version {} with tag {} already finished as {}",
                done.id,
                rc.docker_image_tag,
                tag.as_deref().unwrap_or("<none>"),
                done.state
            )));
        }

        let initialized: Vec<&Rollout> = existing
            .iter()
            .filter(|r| r.state == RolloutState::Initialized)
            .collect();
        match initialized.as_slice() {
            [] => {
                let now = epoch_secs();
                let rollout = Rollout {
                    id: Uuid::new_v4(),
                    actor_definition_id: req.actor_definition_id,
                    release_candidate_version_id: rc.version_id,
                    initial_version_id: initial.version_id,
                    state: RolloutState::Initialized,
                    rollout_strategy: strategy,
                    initial_rollout_pct: initial_pct,
                    current_rollout_pct: 0,
                    final_target_rollout_pct: final_pct,
                    filters,
                    tag,
                    has_breaking_changes: req.has_breaking_changes,
                    max_step_wait_time_mins: req.max_step_wait_time_mins,
                    workflow_run_id: None,
                    updated_by: req.updated_by,
                    created_at: now,
                    updated_at: now,
                    expires_at: Some(now + self.config.timeouts.rollout_expiration_seconds),
                    completed_at: None,
                    paused_reason: None,
                    error_msg: None,
                    failed_reason: None,
                    revision: 0,
                };
                self.repository.create(&rollout)?;
                info!(
                    rollout = %rollout.id,
                    definition = %rollout.actor_definition_id,
                    version = %rc.docker_image_tag,
                    tag = ?rollout.tag,
                    "rollout created"
                );
                Ok(rollout)
            }
            [reused] => {
                let (rollout, ()) = self
                    .mutate(reused.id, |mut rollout, now, _| {
                        if rollout.state != RolloutState::Initialized {
                            return Err(RolloutError::validation(format!(
                                "rollout {} is already {}",
                                rollout.id, rollout.state
                            )));
                        }
                        rollout.rollout_strategy = strategy;
                        rollout.initial_rollout_pct = initial_pct;
                        rollout.final_target_rollout_pct = final_pct;
                        rollout.filters = filters.clone();
                        rollout.tag = tag.clone();
                        rollout.has_breaking_changes = req.has_breaking_changes;
                        rollout.max_step_wait_time_mins = req.max_step_wait_time_mins;
                        rollout.updated_by = req.updated_by.or(rollout.updated_by);
                        rollout.updated_at = rollout.updated_at.max(now);
                        Ok((rollout, ()))
                    })
                    .await?;
                info!(rollout = %rollout.id, "initialized rollout reused");
                Ok(rollout)
            }
            many => Err(RolloutError::validation(format!(
                "{} initialized rollouts exist for version {}",
                many.len(),
                rc.docker_image_tag
            ))),
        }
    }

    /// Start the workflow for an INITIALIZED rollout.
    pub async fn start_rollout(&self, req: StartRolloutRequest) -> RolloutResult<Rollout> {
        let strategy = start_strategy(req.rollout_strategy);
        let (rollout, ()) = self
            .mutate(req.rollout_id, |mut rollout, now, fx| {
                let rc = self
                    .validator
                    .check_rollout_repository(&rollout, &req.docker_repository)?;
                let transition = machine::decide(&rollout, Command::Start)?;
                let initial_version = self.validator.initial_version(&rollout)?;
                let initial_pct = check_initial_pct(
                    strategy,
                    req.initial_rollout_pct
                        .or(rollout.initial_rollout_pct.map(i64::from)),
                )?;
                let final_pct = check_final_pct(
                    initial_pct,
                    req.final_target_rollout_pct
                        .or(rollout.final_target_rollout_pct.map(i64::from)),
                )?;

                if req.migrate_pins {
                    fx.issue();
                    self.pins.migrate(&rollout)?;
                }
                // Pins already on the release candidate count from the start.
                let actors = self.directory.actors(&rollout.actor_definition_id)?;
                let pins = self.pins.current_pins(&rollout)?;
                let pinned_pct = selector::select_targets(
                    &rollout,
                    &actors,
                    &FilterEvaluator::new(&rollout.filters),
                    &pins,
                    0,
                )
                .pinned_pct();
                let input = WorkflowInput {
                    rollout_id: rollout.id,
                    actor_definition_id: rollout.actor_definition_id,
                    docker_repository: rc.docker_repository,
                    docker_image_tag: rc.docker_image_tag,
                    initial_docker_image_tag: initial_version.docker_image_tag,
                    strategy,
                    tag: rollout.tag.clone(),
                    migrate_pins: req.migrate_pins,
                    wait_between_rollout_seconds: self.config.timeouts.wait_between_rollout_seconds,
                    wait_between_sync_results_queries_seconds: self
                        .config
                        .timeouts
                        .wait_between_sync_results_queries_seconds,
                    rollout_expiration_seconds: self.config.timeouts.rollout_expiration_seconds,
                };
                fx.issue();
                let run_id = self.workflow.start(&input).map_err(|e| {
                    warn!(rollout = %rollout.id, error = %e, "workflow start failed");
                    RolloutError::dependency("workflow", e)
                })?;

                rollout.rollout_strategy = strategy;
                rollout.initial_rollout_pct = initial_pct;
                rollout.final_target_rollout_pct = final_pct;
                rollout.workflow_run_id = Some(run_id);
                rollout.current_rollout_pct = pinned_pct;
                rollout.updated_by = req.updated_by.or(rollout.updated_by);
                machine::apply(&mut rollout, transition, now);
                Ok((rollout, ()))
            })
            .await?;
        Ok(rollout)
    }

    /// Pin more actors, either up to a percentage or by explicit id.
    pub async fn advance_rollout(&self, req: AdvanceRolloutRequest) -> RolloutResult<AdvanceOutcome> {
        let (rollout, (newly_pinned, pins_created)) = self
            .mutate(req.rollout_id, |mut rollout, now, fx| {
                self.validator
                    .check_rollout_repository(&rollout, &req.docker_repository)?;
                let transition = machine::decide(&rollout, Command::Advance)?;

                let actors = self.directory.actors(&rollout.actor_definition_id)?;
                let pins = self.pins.current_pins(&rollout)?;
                let filter = FilterEvaluator::new(&rollout.filters);
                let final_pct = self.final_target(&rollout);

                let (to_pin, target_pct) = match &req.target {
                    AdvanceTarget::Percentage(requested) => {
                        let effective = self.effective_target(&rollout, check_target_pct(*requested)?);
                        if effective <= rollout.current_rollout_pct {
                            return Err(RolloutError::validation(format!(
                                "maximum rollout percentage reached: rollout {} is at {}% (target {effective}%)",
                                rollout.id, rollout.current_rollout_pct
                            )));
                        }
                        let selection =
                            selector::select_targets(&rollout, &actors, &filter, &pins, effective);
                        if selection.eligible_or_pinned == 0 {
                            return Err(RolloutError::validation(format!(
                                "no actors are eligible for rollout {}",
                                rollout.id
                            )));
                        }
                        (selection.newly_selected, effective)
                    }
                    AdvanceTarget::Actors(ids) => {
                        if ids.is_empty() {
                            return Err(RolloutError::validation("no actors to pin"));
                        }
                        let population =
                            selector::select_targets(&rollout, &actors, &filter, &pins, 0)
                                .eligible_or_pinned;
                        let plan = plan_explicit(&rollout, &actors, &pins, ids, population, final_pct)?;
                        let pct = plan.pinned_pct().max(rollout.current_rollout_pct);
                        (plan.to_pin, pct)
                    }
                };

                rollout.rollout_strategy =
                    command_strategy(rollout.rollout_strategy, req.rollout_strategy);
                if !to_pin.is_empty() {
                    fx.issue();
                }
                let created = self.pins.pin_actors(&rollout, &to_pin)?;
                self.signal(&rollout, WorkflowSignal::Advance { target_pct }, fx)?;

                rollout.current_rollout_pct = target_pct;
                rollout.paused_reason = None;
                rollout.updated_by = req.updated_by.or(rollout.updated_by);
                machine::apply(&mut rollout, transition, now);
                Ok((rollout, (to_pin, created)))
            })
            .await?;
        info!(
            rollout = %rollout.id,
            pct = rollout.current_rollout_pct,
            pinned = pins_created,
            "rollout advanced"
        );
        Ok(AdvanceOutcome {
            rollout,
            newly_pinned,
            pins_created,
        })
    }

    /// Pause a started rollout. The percentage is left as is.
    pub async fn pause_rollout(&self, req: PauseRolloutRequest) -> RolloutResult<Rollout> {
        let reason = req.reason.trim();
        if reason.is_empty() {
            return Err(RolloutError::validation("pausing a rollout requires a reason"));
        }
        let (rollout, ()) = self
            .mutate(req.rollout_id, |mut rollout, now, fx| {
                self.validator
                    .check_rollout_repository(&rollout, &req.docker_repository)?;
                let transition = machine::decide(&rollout, Command::Pause)?;
                self.signal(
                    &rollout,
                    WorkflowSignal::Pause {
                        reason: reason.to_string(),
                    },
                    fx,
                )?;
                rollout.rollout_strategy =
                    command_strategy(rollout.rollout_strategy, req.rollout_strategy);
                rollout.paused_reason = Some(reason.to_string());
                rollout.updated_by = req.updated_by.or(rollout.updated_by);
                machine::apply(&mut rollout, transition, now);
                Ok((rollout, ()))
            })
            .await?;
        Ok(rollout)
    }

    /// Mark that the workflow entered its finalize step.
    pub async fn begin_finalizing(
        &self,
        rollout_id: RolloutId,
        docker_repository: &str,
    ) -> RolloutResult<Rollout> {
        let (rollout, ()) = self
            .mutate(rollout_id, |mut rollout, now, _| {
                self.validator
                    .check_rollout_repository(&rollout, docker_repository)?;
                let transition = machine::decide(&rollout, Command::BeginFinalizing)?;
                machine::apply(&mut rollout, transition, now);
                Ok((rollout, ()))
            })
            .await?;
        Ok(rollout)
    }

    /// Move a rollout to a terminal state, settling its pins first.
    pub async fn finalize_rollout(
        &self,
        req: FinalizeRolloutRequest,
    ) -> RolloutResult<FinalizeOutcome> {
        let (rollout, settlement) = self
            .mutate(req.rollout_id, |mut rollout, now, fx| {
                self.validator
                    .check_rollout_repository(&rollout, &req.docker_repository)?;
                let transition = machine::decide(&rollout, Command::Finalize(req.state))?;
                fx.issue();
                let settlement =
                    self.pins
                        .settle(&rollout, req.state, req.retain_pins_on_cancellation)?;
                self.signal(
                    &rollout,
                    WorkflowSignal::Finalize {
                        state: req.state,
                        retain_pins: req.retain_pins_on_cancellation,
                    },
                    fx,
                )?;

                rollout.rollout_strategy =
                    command_strategy(rollout.rollout_strategy, req.rollout_strategy);
                rollout.error_msg = req.error_msg.clone();
                rollout.failed_reason = req.failed_reason.clone();
                rollout.updated_by = req.updated_by.or(rollout.updated_by);
                machine::apply(&mut rollout, transition, now);
                rollout.completed_at = Some(rollout.updated_at);
                Ok((rollout, settlement))
            })
            .await?;
        info!(rollout = %rollout.id, state = %rollout.state, ?settlement, "rollout finalized");
        Ok(FinalizeOutcome {
            rollout,
            settlement,
        })
    }

    /// Record the run id of a restarted workflow. The state does not change.
    pub async fn rebind_workflow(
        &self,
        rollout_id: RolloutId,
        run_id: &str,
    ) -> RolloutResult<Rollout> {
        if run_id.trim().is_empty() {
            return Err(RolloutError::validation("workflow run id must not be empty"));
        }
        let (rollout, ()) = self
            .mutate(rollout_id, |mut rollout, now, _| {
                if rollout.state == RolloutState::Initialized {
                    return Err(RolloutError::validation(format!(
                        "rollout {} has not been started",
                        rollout.id
                    )));
                }
                if rollout.state.is_terminal() {
                    return Err(RolloutError::validation(format!(
                        "rollout {} is already {}",
                        rollout.id, rollout.state
                    )));
                }
                rollout.workflow_run_id = Some(run_id.to_string());
                rollout.updated_at = rollout.updated_at.max(now);
                Ok((rollout, ()))
            })
            .await?;
        info!(rollout = %rollout.id, run_id, "workflow rebound");
        Ok(rollout)
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn get_rollout(&self, rollout_id: &RolloutId) -> RolloutResult<Rollout> {
        self.load(rollout_id)
    }

    /// Rollouts of an actor definition, optionally for one image tag.
    /// An unknown tag yields an empty list.
    pub fn list_rollouts(
        &self,
        actor_definition_id: &ActorDefinitionId,
        docker_image_tag: Option<&str>,
    ) -> RolloutResult<Vec<Rollout>> {
        match docker_image_tag {
            None => Ok(self.repository.list(actor_definition_id, None)?),
            Some(tag) => match self.directory.version_by_tag(actor_definition_id, tag)? {
                Some(version) => Ok(self
                    .repository
                    .list(actor_definition_id, Some(&version.version_id))?),
                None => Ok(Vec::new()),
            },
        }
    }

    /// The single non-terminal rollout of a release candidate.
    pub fn find_active_rollout(
        &self,
        actor_definition_id: &ActorDefinitionId,
        docker_image_tag: &str,
    ) -> RolloutResult<Rollout> {
        let version = self
            .directory
            .version_by_tag(actor_definition_id, docker_image_tag)?
            .ok_or_else(|| {
                RolloutError::NotFound(format!(
                    "version {docker_image_tag:?} of actor definition {actor_definition_id}"
                ))
            })?;
        let mut active: Vec<Rollout> = self
            .repository
            .list(actor_definition_id, Some(&version.version_id))?
            .into_iter()
            .filter(|r| !r.state.is_terminal())
            .collect();
        match active.len() {
            0 => Err(RolloutError::NotFound(format!(
                "active rollout for version {docker_image_tag:?}"
            ))),
            1 => Ok(active.remove(0)),
            n => Err(RolloutError::validation(format!(
                "{n} active rollouts exist for version {docker_image_tag:?}"
            ))),
        }
    }

    /// Tag a set of caller filters would produce.
    pub fn compute_tag(&self, filters: &[TierFilterRequest]) -> RolloutResult<Option<String>> {
        Ok(compute_tag(&normalize_filters(filters)?))
    }

    /// Actors the rollout would target at `pct`. Nothing is pinned.
    pub fn select_targets(&self, rollout_id: &RolloutId, pct: i64) -> RolloutResult<ActorSelection> {
        if !(0..=100).contains(&pct) {
            return Err(RolloutError::validation(format!(
                "percentage must be between 0 and 100, got {pct}"
            )));
        }
        let rollout = self.load(rollout_id)?;
        let actors = self.directory.actors(&rollout.actor_definition_id)?;
        let pins = self.pins.current_pins(&rollout)?;
        let filter = FilterEvaluator::new(&rollout.filters);
        Ok(selector::select_targets(
            &rollout,
            &actors,
            &filter,
            &pins,
            pct as u32,
        ))
    }

    // ── Internals ─────────────────────────────────────────────────

    fn load(&self, rollout_id: &RolloutId) -> RolloutResult<Rollout> {
        self.repository
            .get(rollout_id)?
            .ok_or_else(|| RolloutError::NotFound(format!("rollout {rollout_id}")))
    }

    fn final_target(&self, rollout: &Rollout) -> u32 {
        rollout
            .final_target_rollout_pct
            .unwrap_or(self.config.limits.default_final_target_rollout_pct)
            .min(100)
    }

    /// Requested percentage raised to the initial and capped at the final target.
    fn effective_target(&self, rollout: &Rollout, requested: u32) -> u32 {
        requested
            .max(rollout.initial_rollout_pct.unwrap_or(0))
            .min(self.final_target(rollout))
    }

    fn signal(&self, rollout: &Rollout, signal: WorkflowSignal, fx: &mut Effects) -> RolloutResult<()> {
        let Some(run_id) = rollout.workflow_run_id.as_deref() else {
            return Ok(());
        };
        fx.issue();
        self.workflow.signal(run_id, &signal).map_err(|e| {
            warn!(rollout = %rollout.id, run_id, signal = signal.name(), error = %e, "workflow signal failed");
            RolloutError::dependency("workflow", e)
        })
    }

    async fn lock(&self, rollout_id: RolloutId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(rollout_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Release a rollout's lock and drop its table entry once nobody else holds it.
    async fn unlock(&self, rollout_id: RolloutId, guard: OwnedMutexGuard<()>) {
        let mut locks = self.locks.lock().await;
        drop(guard);
        if locks
            .get(&rollout_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&rollout_id);
        }
    }

    /// Run a read-decide-write step under the rollout's lock.
    async fn mutate<T>(
        &self,
        rollout_id: RolloutId,
        mut step: impl FnMut(Rollout, u64, &mut Effects) -> RolloutResult<(Rollout, T)>,
    ) -> RolloutResult<(Rollout, T)> {
        let guard = self.lock(rollout_id).await;
        let result = self.read_decide_write(rollout_id, &mut step);
        self.unlock(rollout_id, guard).await;
        result
    }

    fn read_decide_write<T>(
        &self,
        rollout_id: RolloutId,
        step: &mut impl FnMut(Rollout, u64, &mut Effects) -> RolloutResult<(Rollout, T)>,
    ) -> RolloutResult<(Rollout, T)> {
        let mut attempt = 0;
        loop {
            let current = self.load(&rollout_id)?;
            let mut fx = Effects::default();
            let (next, out) = step(current, epoch_secs(), &mut fx)?;
            match self.repository.update(&next) {
                Ok(stored) => return Ok((stored, out)),
                Err(StateError::StaleWrite { expected, found, .. })
                    if !fx.issued && attempt < self.config.limits.max_conflict_retries =>
                {
                    attempt += 1;
                    warn!(rollout = %rollout_id, attempt, expected, found, "stale rollout write, retrying");
                }
                Err(e) => {
                    if fx.issued {
                        warn!(rollout = %rollout_id, error = %e, "rollout write failed after side effects");
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

/// Whether a command step reached the pin service or the workflow engine.
#[derive(Debug, Default)]
struct Effects {
    issued: bool,
}

impl Effects {
    fn issue(&mut self) {
        self.issued = true;
    }
}

/// Strategy recorded by start and create: MANUAL unless automation asked.
fn start_strategy(requested: Option<RolloutStrategy>) -> RolloutStrategy {
    match requested {
        Some(RolloutStrategy::Automated) => RolloutStrategy::Automated,
        Some(RolloutStrategy::Overridden) => RolloutStrategy::Automated,
        None | Some(RolloutStrategy::Manual) => RolloutStrategy::Manual,
    }
}

/// Strategy recorded by a later command. A manual command on an automated
/// rollout marks it OVERRIDDEN.
fn command_strategy(current: RolloutStrategy, requested: Option<RolloutStrategy>) -> RolloutStrategy {
    match requested {
        Some(RolloutStrategy::Automated) => RolloutStrategy::Automated,
        _ if current == RolloutStrategy::Manual => RolloutStrategy::Manual,
        _ => RolloutStrategy::Overridden,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::LoggingWorkflowTrigger;

    fn service() -> RolloutService {
        RolloutService::with_store(
            StateStore::open_in_memory().unwrap(),
            Arc::new(LoggingWorkflowTrigger),
            RolloutConfig::default(),
        )
    }

    fn rollout(initial: Option<u32>, final_pct: Option<u32>) -> Rollout {
        Rollout {
            id: Uuid::new_v4(),
            actor_definition_id: Uuid::new_v4(),
            release_candidate_version_id: Uuid::new_v4(),
            initial_version_id: Uuid::new_v4(),
            state: RolloutState::InProgress,
            rollout_strategy: RolloutStrategy::Manual,
            initial_rollout_pct: initial,
            current_rollout_pct: 0,
            final_target_rollout_pct: final_pct,
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

    #[test]
    fn start_strategy_defaults_to_manual() {
        assert_eq!(start_strategy(None), RolloutStrategy::Manual);
        assert_eq!(start_strategy(Some(RolloutStrategy::Manual)), RolloutStrategy::Manual);
        assert_eq!(start_strategy(Some(RolloutStrategy::Automated)), RolloutStrategy::Automated);
    }

    #[test]
    fn manual_command_overrides_automation() {
        use RolloutStrategy::*;
        assert_eq!(command_strategy(Automated, Some(Manual)), Overridden);
        assert_eq!(command_strategy(Automated, None), Overridden);
        assert_eq!(command_strategy(Overridden, Some(Manual)), Overridden);
        assert_eq!(command_strategy(Manual, Some(Manual)), Manual);
        assert_eq!(command_strategy(Manual, Some(Automated)), Automated);
        assert_eq!(command_strategy(Overridden, Some(Automated)), Automated);
    }

    #[test]
    fn target_is_capped_and_raised() {
        let svc = service();
        assert_eq!(svc.effective_target(&rollout(Some(10), Some(50)), 80), 50);
        assert_eq!(svc.effective_target(&rollout(Some(10), Some(50)), 5), 10);
        assert_eq!(svc.effective_target(&rollout(None, None), 70), 70);
        assert_eq!(svc.effective_target(&rollout(None, None), 100), 100);
    }

    #[tokio::test]
    async fn queries_on_missing_rollouts_are_not_found() {
        let svc = service();
        let id = Uuid::new_v4();
        assert!(matches!(svc.get_rollout(&id), Err(RolloutError::NotFound(_))));
        assert!(matches!(svc.select_targets(&id, 10), Err(RolloutError::NotFound(_))));
        let err = svc.rebind_workflow(id, "run-1").await.unwrap_err();
        assert!(matches!(err, RolloutError::NotFound(_)));
        assert!(svc.list_rollouts(&Uuid::new_v4(), Some("1.0.0")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_entries_are_dropped_once_released() {
        let store = StateStore::open_in_memory().unwrap();
        let svc = RolloutService::with_store(
            store.clone(),
            Arc::new(LoggingWorkflowTrigger),
            RolloutConfig::default(),
        );
        let r = rollout(Some(10), None);
        store.create_rollout(&r).unwrap();

        let (a, b) = tokio::join!(
            svc.rebind_workflow(r.id, "run-1"),
            svc.rebind_workflow(r.id, "run-2"),
        );
        a.unwrap();
        b.unwrap();
        assert!(svc.locks.lock().await.is_empty());

        let err = svc.rebind_workflow(Uuid::new_v4(), "run-3").await.unwrap_err();
        assert!(matches!(err, RolloutError::NotFound(_)));
        assert!(svc.locks.lock().await.is_empty());
    }

    #[test]
    fn compute_tag_normalizes_requests() {
        let svc = service();
        let tag = svc
            .compute_tag(&[TierFilterRequest::tiers(["TIER_2", "TIER_0"])])
            .unwrap();
        assert_eq!(tag.as_deref(), Some("TIER_0-TIER_2"));
        assert_eq!(
            svc.compute_tag(&[TierFilterRequest::tiers(["ALL"])]).unwrap(),
            None
        );
    }
}
