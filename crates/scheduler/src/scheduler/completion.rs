use std::sync::Arc;
use std::time::{Duration, Instant};

use tiercomp_core::{
    downgrade, Artifact, ArtifactOrigin, CompileFailure, CompileMode, CompileResult, Disposition,
    EntryPoint, ErrorCode, Exhausted, OptLevel, OptimizationPlan, Priority, RequestKind, UnitRef,
    UnitShape,
};
use tracing::{debug, error, info, warn};

use super::dispatch::Attempt;
use super::state::SchedState;
use crate::descriptor::{Descriptor, Handle, Location, Rendezvous};
use crate::host::Collaborators;

/// How one attempt ended, as seen by the worker.
#[derive(Debug)]
pub enum AttemptOutcome {
    Installed {
        artifact: Artifact,
        /// Hotter level worth an upgrade after an artifact load.
        upgrade_hint: Option<OptLevel>,
        /// Written back to the artifact store.
        stored: bool,
        elapsed: Duration,
    },
    /// Stale recompilation, already compiled, or owner gone.
    NotNeeded,
    Failed {
        failure: CompileFailure,
        elapsed: Duration,
    },
}

impl SchedState {
    /// Fold the outcome of an attempt back into the scheduler.
    pub(crate) fn complete_attempt(
        &mut self,
        worker: usize,
        attempt: &Attempt,
        outcome: AttemptOutcome,
        collab: &Collaborators,
        shutting_down: bool,
    ) {
        let slot = &mut self.workers[worker];
        slot.in_flight = None;
        slot.expensive = false;
        slot.serviced += 1;
        if let AttemptOutcome::Installed { elapsed, .. } | AttemptOutcome::Failed { elapsed, .. } =
            &outcome
        {
            slot.last_compile = *elapsed;
        }

        let handle = attempt.handle;
        let Some(desc) = self.pool.get(handle) else {
            error!(unit = %attempt.unit, "in-flight descriptor vanished");
            return;
        };
        if desc.unloaded {
            debug!(unit = %attempt.unit, "unit unloaded while compiling");
            self.retire(handle, CompileResult::failed(ErrorCode::NotNeeded), collab);
            return;
        }

        match outcome {
            AttemptOutcome::NotNeeded => {
                self.retire(handle, CompileResult::failed(ErrorCode::NotNeeded), collab);
            }
            AttemptOutcome::Installed {
                artifact,
                upgrade_hint,
                stored,
                elapsed,
            } => self.install(
                handle,
                attempt,
                artifact,
                upgrade_hint,
                stored,
                elapsed,
                collab,
                shutting_down,
            ),
            AttemptOutcome::Failed { failure, .. } => {
                self.fail(handle, attempt, failure, collab, shutting_down);
            }
        }
        self.refresh_gauges();
        self.debug_check_weights();
    }

    #[allow(clippy::too_many_arguments)]
    fn install(
        &mut self,
        handle: Handle,
        attempt: &Attempt,
        artifact: Artifact,
        upgrade_hint: Option<OptLevel>,
        stored: bool,
        elapsed: Duration,
        collab: &Collaborators,
        shutting_down: bool,
    ) {
        let Some(desc) = self.pool.get(handle) else {
            return;
        };
        let merged_level = desc.plan.level;
        collab.host.install(&artifact, desc.source_pc);

        self.metrics.record_compile(artifact.level, elapsed);
        if artifact.origin == ArtifactOrigin::Loaded {
            self.metrics.artifact_loads += 1;
        }
        if stored {
            self.metrics.artifact_stores += 1;
        }

        // Backlog downgrade, a hotter duplicate merged in while compiling,
        // or a hot history behind a loaded artifact.
        let upgrade = attempt
            .plan
            .upgrade()
            .map(|p| p.level)
            .or_else(|| (merged_level > attempt.plan.level).then_some(merged_level))
            .or(upgrade_hint)
            .filter(|level| *level > artifact.level);

        info!(
            unit = %attempt.unit,
            level = %artifact.level,
            origin = ?artifact.origin,
            elapsed_ms = elapsed.as_millis() as u64,
            "compile installed"
        );
        let entry = artifact.entry;
        self.retire(handle, CompileResult::ok(artifact), collab);

        if let Some(level) = upgrade {
            if !shutting_down {
                self.enqueue_upgrade(attempt.unit, attempt.kind, attempt.shape, entry, level);
            }
        }
    }

    fn fail(
        &mut self,
        handle: Handle,
        attempt: &Attempt,
        failure: CompileFailure,
        collab: &Collaborators,
        shutting_down: bool,
    ) {
        let unit = attempt.unit;

        if let CompileFailure::ArtifactLoad(err) = &failure {
            warn!(unit = %unit, error = %err, "artifact load failed, falling back to compile");
            self.metrics.artifact_load_failures += 1;
            self.history_mut(unit).artifact_rejected = true;
            if shutting_down {
                self.retire(handle, CompileResult::failed(ErrorCode::Suspended), collab);
                return;
            }
            let Some(desc) = self.pool.get_mut(handle) else {
                return;
            };
            desc.artifact_eligible = false;
            // no attempt consumed: the generator has not run yet
            let (plan, priority) = (desc.plan, desc.priority);
            self.requeue(handle, plan, priority, collab);
            return;
        }

        if failure == CompileFailure::Allocation(Exhausted::Scratch)
            && attempt.plan.level == OptLevel::NoOpt
        {
            error!(unit = %unit, "out of memory at the lowest level, disabling compilation");
            self.retire(handle, CompileResult::failed(failure.error_code()), collab);
            self.degrade(collab);
            return;
        }

        match failure.disposition() {
            Disposition::Terminal => {
                match &failure {
                    CompileFailure::ResourceLimit => {
                        let history = self.history_mut(unit);
                        if attempt.plan.level > OptLevel::NoOpt {
                            history.level_cap = Some(attempt.plan.level.lowered(1));
                        } else {
                            history.failed = Some(ErrorCode::ExcessiveComplexity);
                        }
                    }
                    CompileFailure::PolicyExclusion(_) => {
                        self.history_mut(unit).failed = Some(ErrorCode::Excluded);
                    }
                    _ => {}
                }
                warn!(unit = %unit, level = %attempt.plan.level, failure = %failure, "terminal compile failure");
                self.retire(handle, CompileResult::failed(failure.error_code()), collab);
            }
            Disposition::Retryable => {
                let Some(desc) = self.pool.get_mut(handle) else {
                    return;
                };
                desc.attempts_left = desc.attempts_left.saturating_sub(1);
                let attempts_left = desc.attempts_left;
                let priority = desc.priority.for_retry();
                let merged = desc.plan;

                if attempts_left > 0 && !shutting_down && !self.flags.compilation_disabled {
                    let mut plan = downgrade(&attempt.plan, &failure);
                    // a hotter request merged in while compiling is compiled
                    // once the retry succeeds
                    if merged.level > attempt.plan.level {
                        plan = plan.with_upgrade_to(merged.level);
                    }
                    if let Some(cap) = self.history(&unit).level_cap {
                        plan = plan.capped(cap);
                    }
                    info!(
                        unit = %unit,
                        failure = %failure,
                        from = %attempt.plan.level,
                        to = %plan.level,
                        attempts_left,
                        "retrying compile"
                    );
                    self.metrics.retries += 1;
                    self.requeue(handle, plan, priority, collab);
                    return;
                }

                if !shutting_down {
                    self.history_mut(unit).failed = Some(failure.error_code());
                }
                if failure.exhausts_caches() && !self.flags.first_time_disabled {
                    error!(failure = %failure, "cache exhausted, disabling first-time compilation");
                    self.flags.first_time_disabled = true;
                }
                warn!(unit = %unit, failure = %failure, "compile retries exhausted");
                self.retire(handle, CompileResult::failed(failure.error_code()), collab);
            }
        }
    }

    /// Put an in-flight descriptor back into the main queue with a new plan.
    /// While every worker is parked by `suspend_all`, a request somebody
    /// waits on finishes with `Suspended` instead.
    fn requeue(
        &mut self,
        handle: Handle,
        plan: OptimizationPlan,
        priority: Priority,
        collab: &Collaborators,
    ) {
        let suspended_all = self.flags.suspended_all;
        let Some(desc) = self.pool.get_mut(handle) else {
            return;
        };
        if suspended_all && desc.waiters > 0 {
            debug!(unit = %desc.unit, "workers suspended, releasing waiters instead of retrying");
            self.retire(handle, CompileResult::failed(ErrorCode::Suspended), collab);
            return;
        }
        let old_weight = u64::from(desc.weight);
        desc.plan = plan;
        desc.priority = priority;
        desc.retry_requested = true;
        desc.location = Location::MainQueue;
        let new_weight = self.reweigh(handle);
        self.total_weight = self.total_weight - old_weight + new_weight;
        self.queue.insert(handle, priority);
    }

    /// Finish a request: drop its weight, wake any waiters and recycle it
    /// unless someone still waits on it.
    pub(crate) fn retire(&mut self, handle: Handle, result: CompileResult, collab: &Collaborators) {
        let Some(desc) = self.pool.get_mut(handle) else {
            return;
        };
        let weight = u64::from(desc.weight);
        let location = desc.location;
        match location {
            Location::MainQueue => {
                self.queue.remove(handle);
                self.total_weight -= weight;
            }
            Location::LowPriority => {
                self.lpq.remove(handle);
                self.lpq_weight -= weight;
            }
            Location::InFlight(_) => self.total_weight -= weight,
            Location::Retired => return,
        }
        let Some(desc) = self.pool.get_mut(handle) else {
            return;
        };
        desc.location = Location::Retired;
        desc.error_code = result.code;
        let unit = desc.unit;
        let waiters = desc.waiters;
        if waiters > 0 {
            desc.rendezvous.publish(result.clone());
            self.metrics.rendezvous_notifications += 1;
        }

        if result.is_ok() {
            self.metrics.completed += 1;
        } else {
            self.metrics.record_failure(result.code);
            collab.host.compilation_failed(&unit, result.code);
        }

        if waiters == 0 {
            if let Err(err) = self.pool.release(handle) {
                warn!(error = %err, "descriptor release failed");
            }
        }
    }

    /// Queue a low-priority recompile of `unit` at `level`.
    pub(crate) fn enqueue_upgrade(
        &mut self,
        unit: UnitRef,
        kind: RequestKind,
        shape: UnitShape,
        entry: EntryPoint,
        level: OptLevel,
    ) {
        if self.flags.compilation_disabled || self.find_live(&unit).is_some() {
            return;
        }
        let history = self.history(&unit);
        if history.failed.is_some() {
            return;
        }
        let mut plan = OptimizationPlan::new(level).with_force_jit(true);
        if let Some(cap) = history.level_cap {
            plan = plan.capped(cap);
        }
        let mut descriptor = Descriptor {
            unit,
            kind,
            source_pc: Some(entry),
            priority: Priority::LowAsync,
            mode: CompileMode::Async,
            plan,
            shape,
            weight: 0,
            artifact_eligible: false,
            attempts_left: self.config.max_attempts,
            error_code: ErrorCode::InProgress,
            retry_requested: false,
            unloaded: false,
            upgrade: true,
            location: Location::LowPriority,
            waiters: 0,
            rendezvous: Arc::new(Rendezvous::default()),
            submitted_at: Instant::now(),
        };
        descriptor.weight = self.weight_for(&descriptor);
        let weight = u64::from(descriptor.weight);
        match self.pool.alloc(descriptor) {
            Ok(handle) => {
                self.lpq.push(handle);
                self.lpq_weight += weight;
                self.metrics.upgrades_queued += 1;
                debug!(unit = %unit, level = %plan.level, weight, "upgrade queued");
            }
            Err(err) => debug!(unit = %unit, error = %err, "no descriptor for upgrade"),
        }
    }

    /// Retire everything queued with `code`. Returns how many were drained.
    pub(crate) fn drain_queues(&mut self, code: ErrorCode, collab: &Collaborators) -> usize {
        let handles: Vec<Handle> = self.queue.handles().chain(self.lpq.handles()).collect();
        for &handle in &handles {
            self.retire(handle, CompileResult::failed(code), collab);
        }
        self.refresh_gauges();
        self.debug_check_weights();
        handles.len()
    }

    /// Fatal condition: stop compiling for good.
    pub(crate) fn degrade(&mut self, collab: &Collaborators) {
        self.flags.degraded = true;
        self.flags.compilation_disabled = true;
        let drained = self.drain_queues(ErrorCode::Suspended, collab);
        error!(drained, "compilation disabled after fatal resource exhaustion");
    }
}
