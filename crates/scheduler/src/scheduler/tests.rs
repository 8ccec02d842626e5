#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tiercomp_core::{
        Artifact, ArtifactLoadError, ArtifactOrigin, CompileFailure, CompileRequest, EntryPoint,
        ErrorCode, Exhausted, GeneratorError, OptLevel, OptimizationPlan, Priority, RejectReason,
        RequestKind, SchedulerConfig, UnitRef,
    };

    use crate::descriptor::{Handle, Location};
    use crate::entitlement::EntitlementSnapshot;
    use crate::host::{CodeGenerator, Collaborators, HostCallbacks, StaticTelemetry};
    use crate::scheduler::admission::Admission;
    use crate::scheduler::completion::AttemptOutcome;
    use crate::scheduler::dispatch::{DispatchDecision, Source};
    use crate::scheduler::state::SchedState;
    use crate::worker::WorkerState;

    /// Never called: these tests drive attempts by hand.
    struct NoGenerator;

    impl CodeGenerator for NoGenerator {
        fn generate(
            &self,
            _unit: &UnitRef,
            _kind: &RequestKind,
            _plan: &OptimizationPlan,
        ) -> Result<Artifact, GeneratorError> {
            Err(GeneratorError::Unsupported("test".into()))
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        installed: Mutex<Vec<(UnitRef, OptLevel, Option<EntryPoint>)>>,
        failed: Mutex<Vec<(UnitRef, ErrorCode)>>,
    }

    impl HostCallbacks for RecordingHost {
        fn is_compiled(&self, _unit: &UnitRef) -> bool {
            false
        }

        fn current_entry(&self, _unit: &UnitRef) -> Option<EntryPoint> {
            None
        }

        fn install(&self, artifact: &Artifact, replaced: Option<EntryPoint>) {
            self.installed
                .lock()
                .unwrap()
                .push((artifact.unit, artifact.level, replaced));
        }

        fn compilation_failed(&self, unit: &UnitRef, code: ErrorCode) {
            self.failed.lock().unwrap().push((*unit, code));
        }
    }

    struct Harness {
        state: SchedState,
        host: Arc<RecordingHost>,
        collab: Collaborators,
        has_store: bool,
    }

    impl Harness {
        fn new(config: SchedulerConfig, workers: usize) -> Self {
            let host = Arc::new(RecordingHost::default());
            let collab = Collaborators::new(
                Arc::new(NoGenerator),
                host.clone(),
                Arc::new(StaticTelemetry::idle(8)),
            );
            let mut state = SchedState::new(Arc::new(config), workers);
            state.workers[0].state = WorkerState::Active;
            state.num_active = 1;
            for slot in state.workers.iter_mut().skip(1) {
                slot.state = WorkerState::Suspended;
            }
            state.started = true;
            Self {
                state,
                host,
                collab,
                has_store: false,
            }
        }

        fn admit(&mut self, request: CompileRequest) -> Admission {
            self.state.admit(&request, self.has_store, false)
        }

        fn queued(&mut self, request: CompileRequest) -> Handle {
            match self.admit(request) {
                Admission::Queued(handle) => handle,
                other => panic!("expected queued, got {other:?}"),
            }
        }

        /// Take the main-queue head onto `worker` and finish it with `outcome`.
        fn run_head(&mut self, worker: usize, outcome: impl FnOnce(OptLevel) -> AttemptOutcome) {
            let attempt = self
                .state
                .begin_attempt(worker, Source::Main(0))
                .expect("queue head");
            let outcome = outcome(attempt.plan.level);
            self.state
                .complete_attempt(worker, &attempt, outcome, &self.collab, false);
            self.state.check_invariants().unwrap();
        }

        fn pending_level(&self, handle: Handle) -> OptLevel {
            self.state.pool.get(handle).unwrap().plan.level
        }
    }

    fn unit(n: u64) -> UnitRef {
        UnitRef::new(n, 1)
    }

    fn async_at(n: u64, level: OptLevel) -> CompileRequest {
        CompileRequest::new(unit(n), OptimizationPlan::new(level))
    }

    fn installed(n: u64) -> impl FnOnce(OptLevel) -> AttemptOutcome {
        move |level| AttemptOutcome::Installed {
            artifact: Artifact {
                unit: unit(n),
                level,
                entry: EntryPoint(0x1000 + n),
                code_size: 64,
                profiling: false,
                origin: ArtifactOrigin::Generated,
            },
            upgrade_hint: None,
            stored: false,
            elapsed: Duration::from_millis(3),
        }
    }

    fn failed(failure: CompileFailure) -> impl FnOnce(OptLevel) -> AttemptOutcome {
        move |_| AttemptOutcome::Failed {
            failure,
            elapsed: Duration::from_millis(1),
        }
    }

    fn validation() -> CompileFailure {
        CompileFailure::Validation("guard".into())
    }

    // ── Admission ──────────────────────────────────────────────────

    #[test]
    fn queue_orders_by_priority_then_fifo() {
        let mut h = Harness::new(SchedulerConfig::default(), 2);
        let a = h.queued(async_at(1, OptLevel::Cold));
        let b = h.queued(async_at(2, OptLevel::Cold));
        let c = h.queued(async_at(3, OptLevel::Cold).priority(Priority::HighAsync));
        let d = h.queued(async_at(4, OptLevel::Cold).priority(Priority::LowAsync));

        let order: Vec<Handle> = h.state.queue.handles().collect();
        assert_eq!(order, vec![c, a, b, d]);
        // first-time tiny cold compiles weigh 1
        assert_eq!(h.state.total_weight, 4);
        h.state.check_invariants().unwrap();
    }

    #[test]
    fn duplicate_coalesces_and_sync_jumps_ahead() {
        let mut h = Harness::new(SchedulerConfig::default(), 2);
        h.queued(async_at(1, OptLevel::Cold));
        let target = h.queued(async_at(2, OptLevel::Cold));

        let again = h.admit(async_at(2, OptLevel::Hot).sync());
        assert_eq!(again, Admission::Coalesced(target));
        assert_eq!(h.state.queue.head().map(|(handle, _)| handle), Some(target));

        let desc = h.state.pool.get(target).unwrap();
        assert_eq!(desc.priority, Priority::NormalSync);
        assert!(desc.mode.is_sync());
        assert_eq!(desc.plan.level, OptLevel::Hot);
        assert_eq!(h.state.pool.len(), 2);
        assert_eq!(h.state.metrics.coalesced, 1);
        h.state.check_invariants().unwrap();
    }

    #[test]
    fn sync_rejected_without_running_workers() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        h.state.workers[0].state = WorkerState::Uninitialized;
        h.state.num_active = 0;
        assert_eq!(
            h.admit(async_at(1, OptLevel::Cold).sync()),
            Admission::Rejected(RejectReason::Suspended)
        );
        // async work may still queue up before start
        assert!(matches!(h.admit(async_at(1, OptLevel::Cold)), Admission::Queued(_)));
    }

    #[test]
    fn refused_sync_duplicate_leaves_queued_request_untouched() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        let handle = h.queued(async_at(1, OptLevel::Cold));
        h.state.flags.suspended_all = true;

        assert_eq!(
            h.admit(async_at(1, OptLevel::Hot).sync()),
            Admission::Rejected(RejectReason::Suspended)
        );
        let desc = h.state.pool.get(handle).unwrap();
        assert!(!desc.mode.is_sync());
        assert_eq!(desc.priority, Priority::NormalAsync);
        assert_eq!(desc.plan.level, OptLevel::Cold);
        assert_eq!(h.state.metrics.coalesced, 0);

        // asynchronous duplicates still merge
        assert_eq!(h.admit(async_at(1, OptLevel::Warm)), Admission::Coalesced(handle));
        h.state.check_invariants().unwrap();
    }

    #[test]
    fn pool_exhaustion_rejects() {
        let config = SchedulerConfig {
            descriptor_capacity: 1,
            ..Default::default()
        };
        let mut h = Harness::new(config, 1);
        h.queued(async_at(1, OptLevel::Cold));
        assert_eq!(
            h.admit(async_at(2, OptLevel::Cold)),
            Admission::Rejected(RejectReason::OutOfMemory)
        );
    }

    // ── Completion ─────────────────────────────────────────────────

    #[test]
    fn success_releases_weight_and_descriptor() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        h.queued(async_at(1, OptLevel::Hot));
        assert_eq!(h.state.total_weight, 30);

        h.run_head(0, installed(1));
        assert_eq!(h.state.total_weight, 0);
        assert!(h.state.pool.is_empty());
        assert_eq!(h.state.metrics.completed, 1);
        assert_eq!(h.host.installed.lock().unwrap().len(), 1);
        assert!(h.state.workers[0].in_flight.is_none());
    }

    #[test]
    fn scorching_retries_down_to_warm() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        let handle = h.queued(async_at(1, OptLevel::Scorching));

        h.run_head(0, failed(validation()));
        assert_eq!(h.pending_level(handle), OptLevel::VeryHot);
        assert_eq!(h.state.pool.get(handle).unwrap().attempts_left, 2);
        assert!(h.state.pool.get(handle).unwrap().retry_requested);

        h.run_head(0, failed(validation()));
        assert_eq!(h.pending_level(handle), OptLevel::Warm);

        h.run_head(0, installed(1));
        let installs = h.host.installed.lock().unwrap();
        assert_eq!(installs.as_slice(), &[(unit(1), OptLevel::Warm, None)]);
        assert_eq!(h.state.metrics.retries, 2);
        assert_eq!(h.state.metrics.completed, 1);
    }

    #[test]
    fn retries_are_bounded_then_unit_is_rejected() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        h.queued(async_at(1, OptLevel::Hot));
        for _ in 0..3 {
            h.run_head(0, failed(validation()));
        }
        assert!(h.state.queue.is_empty());
        assert_eq!(h.state.history(&unit(1)).failed, Some(ErrorCode::AssumptionFailure));
        assert_eq!(
            h.host.failed.lock().unwrap().as_slice(),
            &[(unit(1), ErrorCode::AssumptionFailure)]
        );
        assert_eq!(
            h.admit(async_at(1, OptLevel::Cold)),
            Admission::Rejected(RejectReason::PreviouslyFailed(ErrorCode::AssumptionFailure))
        );
    }

    #[test]
    fn retry_raises_async_priority() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        let handle = h.queued(async_at(1, OptLevel::Warm).priority(Priority::LowAsync));
        h.run_head(0, failed(validation()));
        assert_eq!(h.state.pool.get(handle).unwrap().priority, Priority::NormalAsync);
    }

    #[test]
    fn cache_exhaustion_disables_first_time_compiles() {
        let config = SchedulerConfig {
            max_attempts: 1,
            ..Default::default()
        };
        let mut h = Harness::new(config, 1);
        h.queued(async_at(1, OptLevel::Warm));
        h.run_head(0, failed(CompileFailure::Allocation(Exhausted::CodeCache)));

        assert!(h.state.flags.first_time_disabled);
        assert_eq!(
            h.admit(async_at(2, OptLevel::Cold)),
            Admission::Rejected(RejectReason::CachesExhausted)
        );
        let recompile = async_at(3, OptLevel::Hot).recompile(EntryPoint(0x40));
        assert!(matches!(h.admit(recompile), Admission::Queued(_)));
    }

    #[test]
    fn resource_limit_caps_later_requests() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        h.queued(async_at(1, OptLevel::Hot));
        h.run_head(0, failed(CompileFailure::ResourceLimit));

        assert_eq!(h.state.history(&unit(1)).level_cap, Some(OptLevel::Warm));
        let handle = h.queued(async_at(1, OptLevel::VeryHot));
        assert_eq!(h.pending_level(handle), OptLevel::Warm);
    }

    #[test]
    fn lowest_level_out_of_memory_degrades() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        h.queued(async_at(1, OptLevel::NoOpt));
        h.queued(async_at(2, OptLevel::Cold));
        h.run_head(0, failed(CompileFailure::Allocation(Exhausted::Scratch)));

        assert!(h.state.flags.degraded);
        assert!(h.state.queue.is_empty());
        assert_eq!(h.state.metrics.failures(ErrorCode::Suspended), 1);
        assert_eq!(
            h.admit(async_at(3, OptLevel::Cold)),
            Admission::Rejected(RejectReason::CompilationDisabled)
        );
    }

    #[test]
    fn unloaded_in_flight_wakes_waiter_with_not_needed() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        let handle = h.queued(async_at(1, OptLevel::Warm).sync());
        let rendezvous = h.state.join_rendezvous(handle).unwrap();

        let attempt = h.state.begin_attempt(0, Source::Main(0)).unwrap();
        h.state.pool.get_mut(handle).unwrap().unloaded = true;
        h.state
            .complete_attempt(0, &attempt, installed(1)(OptLevel::Warm), &h.collab, false);

        assert!(h.host.installed.lock().unwrap().is_empty());
        assert_eq!(rendezvous.wait().code, ErrorCode::NotNeeded);
        assert_eq!(rendezvous.notifications(), 1);
        // kept for the waiter, recycled once it leaves
        assert_eq!(h.state.pool.len(), 1);
        h.state.check_invariants().unwrap();
        h.state.leave_rendezvous(handle);
        assert!(h.state.pool.is_empty());
    }

    // ── Artifact loads ─────────────────────────────────────────────

    #[test]
    fn failed_artifact_load_falls_back_without_spending_an_attempt() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        h.has_store = true;
        let handle = h.queued(async_at(1, OptLevel::Hot));
        assert_eq!(h.state.total_weight, 1);

        let attempt = h.state.begin_attempt(0, Source::Main(0)).unwrap();
        assert!(attempt.artifact_eligible);
        let outcome = AttemptOutcome::Failed {
            failure: CompileFailure::ArtifactLoad(ArtifactLoadError::Corrupted),
            elapsed: Duration::ZERO,
        };
        h.state.complete_attempt(0, &attempt, outcome, &h.collab, false);

        let desc = h.state.pool.get(handle).unwrap();
        assert_eq!(desc.location, Location::MainQueue);
        assert_eq!(desc.attempts_left, 3);
        assert!(!desc.artifact_eligible);
        assert_eq!(desc.plan.level, OptLevel::Hot);
        assert_eq!(h.state.total_weight, 30);
        assert!(h.state.history(&unit(1)).artifact_rejected);
        assert_eq!(h.state.metrics.artifact_load_failures, 1);
        h.state.check_invariants().unwrap();

        let retry = h.state.begin_attempt(0, Source::Main(0)).unwrap();
        assert!(!retry.artifact_eligible);
    }

    #[test]
    fn hot_history_behind_loaded_artifact_queues_upgrade() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        h.has_store = true;
        h.queued(async_at(1, OptLevel::Cold));
        h.run_head(0, |_| AttemptOutcome::Installed {
            artifact: Artifact {
                unit: unit(1),
                level: OptLevel::Cold,
                entry: EntryPoint(0x77),
                code_size: 16,
                profiling: false,
                origin: ArtifactOrigin::Loaded,
            },
            upgrade_hint: Some(OptLevel::VeryHot),
            stored: false,
            elapsed: Duration::ZERO,
        });

        assert_eq!(h.state.metrics.artifact_loads, 1);
        assert_eq!(h.state.lpq.len(), 1);
        let upgrade = h.state.lpq.handles().next().unwrap();
        let desc = h.state.pool.get(upgrade).unwrap();
        assert_eq!(desc.plan.level, OptLevel::VeryHot);
        assert!(desc.plan.force_jit);
        assert_eq!(desc.source_pc, Some(EntryPoint(0x77)));
        assert_eq!(h.state.lpq_weight, 6);
    }

    // ── Backlog and the low-priority queue ─────────────────────────

    #[test]
    fn backlog_downgrade_then_upgrade_through_low_priority_queue() {
        let config = SchedulerConfig {
            downgrade_queue_size: 2,
            ..Default::default()
        };
        let mut h = Harness::new(config, 1);
        let hot = h.queued(async_at(1, OptLevel::Hot).priority(Priority::HighAsync));
        h.queued(async_at(2, OptLevel::Cold));
        h.queued(async_at(3, OptLevel::Cold));
        assert_eq!(h.pending_level(hot), OptLevel::Hot);

        let late = h.queued(async_at(4, OptLevel::Hot).priority(Priority::HighAsync));
        assert_eq!(h.pending_level(late), OptLevel::Warm);
        assert!(h.state.pool.get(late).unwrap().plan.downgraded);
        assert_eq!(h.state.metrics.backlog_downgrades, 1);

        h.run_head(0, installed(1));
        h.run_head(0, installed(4));
        assert_eq!(h.state.lpq.len(), 1);
        assert_eq!(h.state.metrics.upgrades_queued, 1);

        // a fresh submission pulls the upgrade into the main queue
        let upgrade = h.state.lpq.handles().next().unwrap();
        let merged = h.admit(async_at(4, OptLevel::Cold).recompile(EntryPoint(0x1004)));
        assert_eq!(merged, Admission::Coalesced(upgrade));
        assert!(h.state.lpq.is_empty());
        assert_eq!(h.state.lpq_weight, 0);
        let desc = h.state.pool.get(upgrade).unwrap();
        assert_eq!(desc.location, Location::MainQueue);
        assert!(!desc.upgrade);
        assert_eq!(desc.plan.level, OptLevel::Hot);
        h.state.check_invariants().unwrap();
    }

    #[test]
    fn plan_raised_while_in_flight_is_compiled_afterwards() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        let handle = h.queued(async_at(1, OptLevel::Cold));
        let attempt = h.state.begin_attempt(0, Source::Main(0)).unwrap();
        assert_eq!(h.admit(async_at(1, OptLevel::VeryHot)), Admission::Coalesced(handle));

        h.state
            .complete_attempt(0, &attempt, installed(1)(OptLevel::Cold), &h.collab, false);
        let upgrade = h.state.lpq.handles().next().expect("upgrade queued");
        assert_eq!(h.state.pool.get(upgrade).unwrap().plan.level, OptLevel::VeryHot);
        h.state.check_invariants().unwrap();
    }

    #[test]
    fn hotter_request_merged_in_flight_survives_a_retry() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        let handle = h.queued(async_at(1, OptLevel::Cold));
        let attempt = h.state.begin_attempt(0, Source::Main(0)).unwrap();
        assert_eq!(h.admit(async_at(1, OptLevel::VeryHot)), Admission::Coalesced(handle));

        h.state
            .complete_attempt(0, &attempt, failed(validation())(OptLevel::Cold), &h.collab, false);
        let desc = h.state.pool.get(handle).unwrap();
        assert_eq!(desc.location, Location::MainQueue);
        assert_eq!(desc.plan.level, OptLevel::NoOpt);
        assert_eq!(desc.plan.upgrade().map(|p| p.level), Some(OptLevel::VeryHot));
        h.state.check_invariants().unwrap();

        h.run_head(0, installed(1));
        let upgrade = h.state.lpq.handles().next().expect("upgrade queued");
        assert_eq!(h.state.pool.get(upgrade).unwrap().plan.level, OptLevel::VeryHot);
        assert_eq!(h.state.metrics.upgrades_queued, 1);
    }

    #[test]
    fn retry_while_suspended_releases_the_waiter() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        let waited = h.queued(async_at(1, OptLevel::Warm).sync());
        let rendezvous = h.state.join_rendezvous(waited).unwrap();
        let attempt = h.state.begin_attempt(0, Source::Main(0)).unwrap();

        h.state.flags.suspended_all = true;
        h.state.suspend_worker(0);
        h.state
            .complete_attempt(0, &attempt, failed(validation())(OptLevel::Warm), &h.collab, false);

        assert!(h.state.queue.is_empty());
        assert_eq!(h.state.total_weight, 0);
        assert_eq!(rendezvous.wait().code, ErrorCode::Suspended);
        assert_eq!(h.state.metrics.failures(ErrorCode::Suspended), 1);
        h.state.check_invariants().unwrap();
        h.state.leave_rendezvous(waited);
        assert!(h.state.pool.is_empty());
    }

    #[test]
    fn retry_while_suspended_keeps_async_work() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        let handle = h.queued(async_at(1, OptLevel::Warm));
        let attempt = h.state.begin_attempt(0, Source::Main(0)).unwrap();

        h.state.flags.suspended_all = true;
        h.state.suspend_worker(0);
        h.state
            .complete_attempt(0, &attempt, failed(validation())(OptLevel::Warm), &h.collab, false);

        assert_eq!(h.state.pool.get(handle).unwrap().location, Location::MainQueue);
        assert_eq!(h.pending_level(handle), OptLevel::Cold);
        h.state.check_invariants().unwrap();
    }

    // ── Dispatch ───────────────────────────────────────────────────

    #[test]
    fn one_expensive_compile_at_a_time() {
        let mut h = Harness::new(SchedulerConfig::default(), 2);
        h.state.workers[1].state = WorkerState::Active;
        h.state.num_active = 2;
        h.queued(async_at(1, OptLevel::Hot));
        h.queued(async_at(2, OptLevel::VeryHot));
        h.queued(async_at(3, OptLevel::Cold));

        let ent = EntitlementSnapshot::unconstrained();
        assert_eq!(h.state.decide(0, &ent), DispatchDecision::Process(Source::Main(0)));
        h.state.begin_attempt(0, Source::Main(0)).unwrap();

        assert_eq!(h.state.decide(1, &ent), DispatchDecision::Process(Source::Main(1)));
        h.state.begin_attempt(1, Source::Main(1)).unwrap();
        assert_eq!(
            h.state.decide(1, &ent),
            DispatchDecision::GoToSleepConcurrentExpensive
        );
        h.state.check_invariants().unwrap();
    }

    #[test]
    fn over_entitlement_throttles_or_suspends() {
        let mut h = Harness::new(SchedulerConfig::default(), 2);
        h.queued(async_at(1, OptLevel::Warm));
        let ent = EntitlementSnapshot {
            exceeds: true,
            ..EntitlementSnapshot::unconstrained()
        };
        assert_eq!(h.state.decide(0, &ent), DispatchDecision::ThrottleCpuExceeded);

        h.state.workers[1].state = WorkerState::Active;
        h.state.num_active = 2;
        assert_eq!(h.state.decide(0, &ent), DispatchDecision::SuspendCpuExceeded);

        // blocked callers are never throttled
        h.queued(async_at(2, OptLevel::Warm).sync());
        assert_eq!(h.state.decide(0, &ent), DispatchDecision::Process(Source::Main(0)));
    }

    #[test]
    fn empty_main_queue_falls_back_to_low_priority() {
        let mut h = Harness::new(SchedulerConfig::default(), 1);
        let ent = EntitlementSnapshot::unconstrained();
        assert_eq!(h.state.decide(0, &ent), DispatchDecision::GoToSleepEmpty);

        h.state.enqueue_upgrade(
            unit(1),
            RequestKind::Ordinary,
            Default::default(),
            EntryPoint(1),
            OptLevel::Hot,
        );
        assert_eq!(h.state.decide(0, &ent), DispatchDecision::Process(Source::LowPriority));

        let busy = EntitlementSnapshot {
            exceeds: true,
            ..ent
        };
        assert_eq!(h.state.decide(0, &busy), DispatchDecision::GoToSleepEmpty);

        let attempt = h.state.begin_attempt(0, Source::LowPriority).unwrap();
        assert_eq!(h.state.lpq_weight, 0);
        assert_eq!(h.state.total_weight, u64::from(attempt.weight));
        h.state.check_invariants().unwrap();
    }

    #[test]
    fn idle_extra_worker_suspends() {
        let mut h = Harness::new(SchedulerConfig::default(), 2);
        h.state.workers[1].state = WorkerState::Active;
        h.state.num_active = 2;
        let ent = EntitlementSnapshot::unconstrained();
        assert_eq!(h.state.decide(1, &ent), DispatchDecision::SuspendEmpty);

        h.state.suspend_worker(1);
        assert_eq!(h.state.num_active, 1);
        assert_eq!(h.state.first_parked_worker(), Some(1));
        assert!(h.state.resume_worker(1));
        assert_eq!(h.state.workers[1].state, WorkerState::Active);
        assert_eq!(h.state.num_active, 2);
        h.state.check_invariants().unwrap();
    }
}
