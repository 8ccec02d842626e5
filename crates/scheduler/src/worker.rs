//! Compilation worker threads.
//!
//! A worker loops under the compilation monitor: it asks the dispatch
//! policy what to do, parks or sleeps accordingly, and services requests
//! with the monitor released for the duration of the compile itself.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::MutexGuard;
use serde::Serialize;
use tiercomp_core::{CompileFailure, Exhausted, RequestKind};
use tracing::{debug, info, trace};

use crate::artifact_bridge::{self, LoadOutcome};
use crate::descriptor::Handle;
use crate::scheduler::{should_suspend, Attempt, AttemptOutcome, DispatchDecision, SchedState, Shared};

/// Lifecycle of one worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    /// Slot exists, thread not started.
    Uninitialized,
    /// Running the dispatch loop or compiling.
    Active,
    /// Idle, blocked on the queue condition with a timeout.
    Waiting,
    /// Resumed by the scheduler, not yet running.
    SignalWait,
    /// Told to suspend, not yet parked.
    SignalSuspend,
    /// Parked until resumed.
    Suspended,
    SignalTerminate,
    Stopping,
    Stopped,
    /// The thread could not be started.
    Abort,
}

impl WorkerState {
    /// States counted in the scheduler's active-worker number.
    pub fn counts_as_active(self) -> bool {
        matches!(
            self,
            WorkerState::Active | WorkerState::Waiting | WorkerState::SignalWait
        )
    }

    /// Thread exists and has not been told to stop.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            WorkerState::Active
                | WorkerState::Waiting
                | WorkerState::SignalWait
                | WorkerState::SignalSuspend
                | WorkerState::Suspended
        )
    }
}

#[derive(Debug)]
pub(crate) struct WorkerSlot {
    pub(crate) id: usize,
    pub(crate) state: WorkerState,
    pub(crate) in_flight: Option<Handle>,
    /// The in-flight request is at or above the expensive weight.
    pub(crate) expensive: bool,
    /// Wall-clock duration of the last compile, input to throttling.
    pub(crate) last_compile: Duration,
    pub(crate) serviced: u64,
}

impl WorkerSlot {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            state: WorkerState::Uninitialized,
            in_flight: None,
            expensive: false,
            last_compile: Duration::ZERO,
            serviced: 0,
        }
    }
}

/// Thread body of worker `id`.
pub(crate) fn run(shared: Arc<Shared>, id: usize) {
    info!(worker = id, "compilation worker started");
    let config = Arc::clone(&shared.config);
    let mut guard = shared.monitor.lock();

    loop {
        match guard.workers[id].state {
            WorkerState::SignalTerminate
            | WorkerState::Stopping
            | WorkerState::Stopped
            | WorkerState::Abort => break,
            WorkerState::SignalSuspend => {
                guard.workers[id].state = WorkerState::Suspended;
                debug!(worker = id, "worker suspended");
                // parked peers may need to pick up what is left
                shared.queue_cv.notify_all();
                continue;
            }
            WorkerState::Suspended => {
                shared.worker_cvs[id].wait(&mut guard);
                continue;
            }
            WorkerState::SignalWait | WorkerState::Waiting => {
                guard.workers[id].state = WorkerState::Active;
            }
            WorkerState::Active | WorkerState::Uninitialized => {}
        }
        if shared.is_shutting_down() {
            break;
        }

        let entitlement = shared.entitlement.snapshot();
        match guard.decide(id, &entitlement) {
            DispatchDecision::Process(source) => {
                let Some(attempt) = guard.begin_attempt(id, source) else {
                    continue;
                };
                trace!(worker = id, unit = %attempt.unit, level = %attempt.plan.level, "servicing");
                let outcome = MutexGuard::unlocked(&mut guard, || execute(&shared, &attempt));
                let was_expensive = attempt.weight >= config.expensive_weight;
                guard.complete_attempt(id, &attempt, outcome, &shared.collab, shared.is_shutting_down());
                if was_expensive {
                    shared.queue_cv.notify_all();
                }
                after_request(&shared, &mut guard, id);
            }
            DispatchDecision::GoToSleepEmpty | DispatchDecision::GoToSleepConcurrentExpensive => {
                guard.workers[id].state = WorkerState::Waiting;
                shared.queue_cv.wait_for(&mut guard, config.idle_wait());
            }
            DispatchDecision::SuspendEmpty | DispatchDecision::SuspendCpuExceeded => {
                guard.suspend_worker(id);
                guard.metrics.suspensions += 1;
            }
            DispatchDecision::ThrottleCpuExceeded => {
                let pause = config.throttle_sleep(guard.workers[id].last_compile);
                guard.metrics.throttles += 1;
                debug!(worker = id, pause_ms = pause.as_millis() as u64, "throttling");
                shared.worker_cvs[id].wait_for(&mut guard, pause);
            }
        }
    }

    if guard.workers[id].state.counts_as_active() {
        guard.num_active -= 1;
    }
    guard.workers[id].state = WorkerState::Stopping;
    debug!(worker = id, "worker stopping");
    guard.workers[id].state = WorkerState::Stopped;
    info!(worker = id, serviced = guard.workers[id].serviced, "compilation worker stopped");
}

/// Post-request bookkeeping: self-suspension and wake-ups for new work.
fn after_request(shared: &Shared, state: &mut MutexGuard<'_, SchedState>, id: usize) {
    if state.workers[id].state == WorkerState::Active
        && should_suspend(state.num_active, state.total_weight, &shared.config)
    {
        debug!(
            worker = id,
            active = state.num_active,
            weight = state.total_weight,
            "queue weight under suspension threshold"
        );
        state.suspend_worker(id);
        state.metrics.suspensions += 1;
    }
    // retries and upgrades land back in the queues
    shared.maybe_activate(state);
    if !state.queue.is_empty() || !state.lpq.is_empty() {
        shared.queue_cv.notify_one();
    }
}

/// Run one attempt with the monitor released.
fn execute(shared: &Shared, attempt: &Attempt) -> AttemptOutcome {
    let host = &shared.collab.host;
    if !host.pin(&attempt.unit) {
        debug!(unit = %attempt.unit, "owning class gone before compile");
        return AttemptOutcome::NotNeeded;
    }
    let outcome = execute_pinned(shared, attempt);
    host.unpin(&attempt.unit);
    outcome
}

fn execute_pinned(shared: &Shared, attempt: &Attempt) -> AttemptOutcome {
    let host = &shared.collab.host;
    let started = Instant::now();

    match attempt.source_pc {
        Some(pc) if host.current_entry(&attempt.unit) != Some(pc) => {
            debug!(unit = %attempt.unit, "body already replaced, recompilation not needed");
            return AttemptOutcome::NotNeeded;
        }
        None if attempt.kind == RequestKind::Ordinary && host.is_compiled(&attempt.unit) => {
            debug!(unit = %attempt.unit, "unit already compiled");
            return AttemptOutcome::NotNeeded;
        }
        _ => {}
    }

    if !shared.exclusions.is_empty() {
        let name = host.unit_name(&attempt.unit);
        if shared.exclusions.is_match(&name) {
            return AttemptOutcome::Failed {
                failure: CompileFailure::PolicyExclusion(name),
                elapsed: started.elapsed(),
            };
        }
    }

    if attempt.artifact_eligible {
        if let Some(store) = &shared.collab.store {
            match artifact_bridge::try_load(store.as_ref(), &attempt.unit) {
                LoadOutcome::Installed {
                    artifact,
                    upgrade_hint,
                } => {
                    return AttemptOutcome::Installed {
                        artifact,
                        upgrade_hint,
                        stored: false,
                        elapsed: started.elapsed(),
                    };
                }
                LoadOutcome::Failed(err) => {
                    return AttemptOutcome::Failed {
                        failure: CompileFailure::ArtifactLoad(err),
                        elapsed: started.elapsed(),
                    };
                }
                LoadOutcome::Missing => {}
            }
        }
    }

    if shared.entitlement.is_low_on_memory(&shared.config) {
        return AttemptOutcome::Failed {
            failure: CompileFailure::Allocation(Exhausted::PhysicalMemory),
            elapsed: started.elapsed(),
        };
    }

    match shared
        .collab
        .generator
        .generate(&attempt.unit, &attempt.kind, &attempt.plan)
    {
        Ok(artifact) => {
            let stored = match &shared.collab.store {
                Some(store) if attempt.first_time && shared.config.store_artifacts => {
                    artifact_bridge::write_back(store.as_ref(), &artifact, &shared.stores_disabled)
                }
                _ => false,
            };
            AttemptOutcome::Installed {
                artifact,
                upgrade_hint: None,
                stored,
                elapsed: started.elapsed(),
            }
        }
        Err(err) => AttemptOutcome::Failed {
            failure: CompileFailure::from_generator(err, shared.shutting_down.load(Ordering::Acquire)),
            elapsed: started.elapsed(),
        },
    }
}
