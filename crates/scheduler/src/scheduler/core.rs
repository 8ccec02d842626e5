use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tiercomp_core::{CompileRequest, SchedulerConfig, Submission};
use tracing::{debug, error, info, warn};

use super::admission::Admission;
use super::sampler::run_sampler;
use super::state::{SchedState, Shared};
use crate::entitlement::{EntitlementSnapshot, ResourceEntitlement, SampleContext};
use crate::error::SchedulerError;
use crate::host::Collaborators;
use crate::metrics::SchedulerMetrics;
use crate::worker::{self, WorkerState};

/// Logical CPUs assumed when neither telemetry nor the OS can tell.
const FALLBACK_CPUS: usize = 4;

/// Multi-threaded compilation scheduler.
///
/// Application threads call [`Scheduler::submit`]; worker threads started
/// by [`Scheduler::start`] pull requests by priority and hand them to the
/// code generator. Dropping the scheduler shuts it down.
pub struct Scheduler {
    pub(super) shared: Arc<Shared>,
    pub(super) threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Validate `config` and size the worker pool. No threads run until
    /// [`start`](Self::start).
    pub fn new(config: SchedulerConfig, collab: Collaborators) -> Result<Self, SchedulerError> {
        config.validate()?;
        let exclusions = config.exclusion_set()?;

        let first_sample = collab.telemetry.sample();
        let logical_cpus = match &first_sample {
            Ok(sample) if sample.logical_cpus > 0 => sample.logical_cpus,
            _ => thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(FALLBACK_CPUS),
        };
        let usable = config.resolved_worker_threads(logical_cpus);
        config.log_summary(usable);

        let config = Arc::new(config);
        let entitlement = ResourceEntitlement::new(logical_cpus);
        entitlement.apply(
            first_sample.as_ref(),
            SampleContext {
                queue_nonempty: false,
                num_active: 0,
            },
            &config,
        );

        let shared = Shared {
            monitor: Mutex::new(SchedState::new(Arc::clone(&config), usable)),
            config,
            exclusions,
            usable_workers: usable,
            queue_cv: Condvar::new(),
            worker_cvs: (0..usable).map(|_| Condvar::new()).collect(),
            sampler_cv: Condvar::new(),
            collab,
            entitlement,
            shutting_down: AtomicBool::new(false),
            stores_disabled: AtomicBool::new(false),
        };
        info!(logical_cpus, usable_workers = usable, "scheduler created");
        Ok(Self {
            shared: Arc::new(shared),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the worker threads and the telemetry sampler.
    ///
    /// The first worker that starts is active, the rest start suspended.
    /// A worker that fails to spawn is marked `Abort`; at least one must
    /// come up.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.shared.is_shutting_down() {
            return Err(SchedulerError::ShutDown);
        }
        let mut threads = self.threads.lock();
        let mut state = self.shared.monitor.lock();
        if state.started {
            return Err(SchedulerError::AlreadyStarted);
        }

        let mut spawned = 0;
        let mut last_err = None;
        for id in 0..state.workers.len() {
            let initial = if state.num_active == 0 {
                WorkerState::Active
            } else {
                WorkerState::Suspended
            };
            state.workers[id].state = initial;
            if initial.counts_as_active() {
                state.num_active += 1;
            }

            let name = format!("tiercomp-worker-{id}");
            let shared = Arc::clone(&self.shared);
            match thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker::run(shared, id))
            {
                Ok(handle) => {
                    threads.push(handle);
                    spawned += 1;
                }
                Err(source) => {
                    warn!(worker = id, error = %source, "failed to spawn compilation worker");
                    if initial.counts_as_active() {
                        state.num_active -= 1;
                    }
                    state.workers[id].state = WorkerState::Abort;
                    last_err = Some(SchedulerError::Spawn { name, source });
                }
            }
        }
        if spawned == 0 {
            return Err(last_err.unwrap_or(SchedulerError::NoWorkers));
        }
        state.started = true;
        state.refresh_gauges();
        drop(state);

        let shared = Arc::clone(&self.shared);
        match thread::Builder::new()
            .name("tiercomp-sampler".into())
            .spawn(move || run_sampler(shared))
        {
            Ok(handle) => threads.push(handle),
            // workers still run on the first telemetry reading
            Err(err) => error!(error = %err, "failed to spawn telemetry sampler"),
        }
        info!(workers = spawned, "scheduler started");
        Ok(())
    }

    /// Submit a compile request.
    ///
    /// Asynchronous requests return as soon as they are queued or merged.
    /// Synchronous ones release VM access and block until the request
    /// finishes, then return its result.
    pub fn submit(&self, request: CompileRequest) -> Submission {
        let shared = &self.shared;
        let mut state = shared.monitor.lock();
        let admission = state.admit(
            &request,
            shared.collab.store.is_some(),
            shared.is_shutting_down(),
        );
        let (handle, coalesced) = match admission {
            Admission::Rejected(reason) => return Submission::Rejected(reason),
            Admission::Queued(handle) => (handle, false),
            Admission::Coalesced(handle) => (handle, true),
        };
        shared.maybe_activate(&mut state);
        shared.queue_cv.notify_one();

        if !request.mode.is_sync() {
            return if coalesced {
                Submission::Coalesced
            } else {
                Submission::Accepted
            };
        }
        let Some(rendezvous) = state.join_rendezvous(handle) else {
            warn!(unit = %request.unit, "descriptor gone before the waiter joined");
            return Submission::Coalesced;
        };
        drop(state);

        debug!(unit = %request.unit, "waiting for synchronous compile");
        let host = &shared.collab.host;
        host.release_vm_access();
        let result = rendezvous.wait();
        host.acquire_vm_access();

        shared.monitor.lock().leave_rendezvous(handle);
        Submission::Completed(result)
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let mut state = self.shared.monitor.lock();
        state.refresh_gauges();
        state.metrics.clone()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared
            .monitor
            .lock()
            .workers
            .iter()
            .map(|w| w.state)
            .collect()
    }

    pub fn active_workers(&self) -> usize {
        self.shared.monitor.lock().num_active
    }

    pub fn usable_workers(&self) -> usize {
        self.shared.usable_workers
    }

    pub fn queue_len(&self) -> usize {
        self.shared.monitor.lock().queue.len()
    }

    pub fn low_priority_len(&self) -> usize {
        self.shared.monitor.lock().lpq.len()
    }

    /// Weight of queued plus in-flight work.
    pub fn queue_weight(&self) -> u64 {
        self.shared.monitor.lock().total_weight
    }

    pub fn entitlement(&self) -> EntitlementSnapshot {
        self.shared.entitlement.snapshot()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Nothing queued in either queue and nothing in flight.
    pub fn is_idle(&self) -> bool {
        let state = self.shared.monitor.lock();
        state.queue.is_empty()
            && state.lpq.is_empty()
            && state.workers.iter().all(|w| w.in_flight.is_none())
    }

    /// Poll until [`is_idle`](Self::is_idle) holds or `timeout` passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
