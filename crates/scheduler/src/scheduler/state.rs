use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use globset::GlobSet;
use parking_lot::{Condvar, Mutex};
use tiercomp_core::{ErrorCode, OptLevel, SchedulerConfig, UnitRef};

use crate::descriptor::{Descriptor, DescriptorPool, Handle, Location};
use crate::entitlement::ResourceEntitlement;
use crate::host::Collaborators;
use crate::metrics::SchedulerMetrics;
use crate::queue::{CompileQueue, LowPriorityQueue};
use crate::weight::{weight_of, WeightInputs};
use crate::worker::{WorkerSlot, WorkerState};

/// What the scheduler remembers about a unit across requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct UnitHistory {
    /// Final code once retries ran out or the unit was excluded; later
    /// submissions are rejected with it.
    pub(crate) failed: Option<ErrorCode>,
    /// Highest level still worth trying after a resource-limit failure.
    pub(crate) level_cap: Option<OptLevel>,
    /// A stored artifact failed to install; never try the store again.
    pub(crate) artifact_rejected: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GlobalFlags {
    pub(crate) compilation_disabled: bool,
    /// Set after a terminal code/data cache exhaustion.
    pub(crate) first_time_disabled: bool,
    pub(crate) suspended_all: bool,
    /// Fatal out-of-memory seen; implies `compilation_disabled`.
    pub(crate) degraded: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HostSignals {
    pub(crate) startup_since: Option<Instant>,
    pub(crate) cached_artifacts_available: bool,
}

/// Everything guarded by the compilation monitor.
#[derive(Debug)]
pub(crate) struct SchedState {
    pub(crate) config: Arc<SchedulerConfig>,
    pub(crate) pool: DescriptorPool,
    pub(crate) queue: CompileQueue,
    pub(crate) lpq: LowPriorityQueue,
    pub(crate) workers: Vec<WorkerSlot>,
    /// Weight of everything in the main queue plus everything in flight.
    pub(crate) total_weight: u64,
    /// Weight of everything in the low-priority queue.
    pub(crate) lpq_weight: u64,
    /// Workers in `Active`, `Waiting` or `SignalWait`.
    pub(crate) num_active: usize,
    pub(crate) history: HashMap<UnitRef, UnitHistory>,
    pub(crate) flags: GlobalFlags,
    pub(crate) signals: HostSignals,
    pub(crate) metrics: SchedulerMetrics,
    pub(crate) started: bool,
}

impl SchedState {
    pub(crate) fn new(config: Arc<SchedulerConfig>, workers: usize) -> Self {
        Self {
            pool: DescriptorPool::new(config.descriptor_capacity),
            queue: CompileQueue::new(),
            lpq: LowPriorityQueue::new(),
            workers: (0..workers).map(WorkerSlot::new).collect(),
            total_weight: 0,
            lpq_weight: 0,
            num_active: 0,
            history: HashMap::new(),
            flags: GlobalFlags::default(),
            signals: HostSignals::default(),
            metrics: SchedulerMetrics::default(),
            started: false,
            config,
        }
    }

    pub(crate) fn history(&self, unit: &UnitRef) -> UnitHistory {
        self.history.get(unit).copied().unwrap_or_default()
    }

    pub(crate) fn history_mut(&mut self, unit: UnitRef) -> &mut UnitHistory {
        self.history.entry(unit).or_default()
    }

    /// Handles of everything queued or in flight, main queue first.
    pub(crate) fn tracked_handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.queue
            .handles()
            .chain(self.lpq.handles())
            .chain(self.workers.iter().filter_map(|w| w.in_flight))
    }

    /// The live descriptor for `unit`, if any: queued, in the low-priority
    /// queue, or on a worker, and not unloaded.
    pub(crate) fn find_live(&self, unit: &UnitRef) -> Option<Handle> {
        self.tracked_handles().find(|&h| {
            self.pool
                .get(h)
                .is_some_and(|d| d.is_live() && d.unit == *unit)
        })
    }

    pub(crate) fn weight_for(&self, desc: &Descriptor) -> u8 {
        let w = weight_of(
            &WeightInputs {
                level: desc.plan.level,
                shape: desc.shape,
                first_time: desc.is_first_time(),
                artifact_eligible: desc.artifact_eligible,
                thunk: matches!(desc.kind, tiercomp_core::RequestKind::Thunk { .. }),
            },
            &self.config,
        );
        if desc.upgrade {
            w.min(self.config.upgrade_weight_cap)
        } else {
            w
        }
    }

    /// Recount both weight totals from the descriptors themselves.
    pub(crate) fn rescan_weights(&self) -> (u64, u64) {
        let weight = |h: Handle| self.pool.get(h).map_or(0, |d| u64::from(d.weight));
        let main = self.queue.handles().map(weight).sum::<u64>()
            + self
                .workers
                .iter()
                .filter_map(|w| w.in_flight)
                .map(weight)
                .sum::<u64>();
        let lpq = self.lpq.handles().map(weight).sum();
        (main, lpq)
    }

    pub(crate) fn debug_check_weights(&self) {
        debug_assert_eq!(
            self.rescan_weights(),
            (self.total_weight, self.lpq_weight),
            "queue weight drifted from rescan"
        );
    }

    /// Worker threads that exist and have not been told to stop.
    pub(crate) fn running_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.state.is_running()).count()
    }

    pub(crate) fn other_expensive_in_flight(&self, worker: usize) -> bool {
        self.workers
            .iter()
            .any(|w| w.id != worker && w.in_flight.is_some() && w.expensive)
    }

    pub(crate) fn in_grace(&self) -> bool {
        !self.signals.cached_artifacts_available
            && self
                .signals
                .startup_since
                .is_some_and(|t| t.elapsed() < self.config.class_loading_grace())
    }

    /// Move a worker out of the active set; it parks at the top of its loop.
    pub(crate) fn suspend_worker(&mut self, id: usize) {
        let slot = &mut self.workers[id];
        if slot.state.counts_as_active() {
            self.num_active -= 1;
        }
        slot.state = WorkerState::SignalSuspend;
    }

    /// Bring a parked (or about to park) worker back into the active set.
    pub(crate) fn resume_worker(&mut self, id: usize) -> bool {
        let slot = &mut self.workers[id];
        let next = match slot.state {
            WorkerState::Suspended => WorkerState::SignalWait,
            WorkerState::SignalSuspend => WorkerState::Active,
            _ => return false,
        };
        slot.state = next;
        self.num_active += 1;
        true
    }

    pub(crate) fn first_parked_worker(&self) -> Option<usize> {
        self.workers
            .iter()
            .find(|w| matches!(w.state, WorkerState::Suspended | WorkerState::SignalSuspend))
            .map(|w| w.id)
    }

    pub(crate) fn refresh_gauges(&mut self) {
        self.metrics.observe_queue(self.queue.len());
        self.metrics.low_priority_queue_size = self.lpq.len();
        self.metrics.queue_weight = self.total_weight;
        self.metrics.active_workers = self.num_active;
    }
}

/// State shared between the façade, the workers and the sampler.
pub(crate) struct Shared {
    pub(crate) config: Arc<SchedulerConfig>,
    /// Compiled `exclude` patterns.
    pub(crate) exclusions: GlobSet,
    pub(crate) usable_workers: usize,
    pub(crate) monitor: Mutex<SchedState>,
    /// Idle workers wait here for new work.
    pub(crate) queue_cv: Condvar,
    /// One per worker: suspended and throttled workers wait here.
    pub(crate) worker_cvs: Vec<Condvar>,
    pub(crate) sampler_cv: Condvar,
    pub(crate) collab: Collaborators,
    pub(crate) entitlement: ResourceEntitlement,
    pub(crate) shutting_down: AtomicBool,
    /// The artifact store reported `Full`.
    pub(crate) stores_disabled: AtomicBool,
}

impl Shared {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}
