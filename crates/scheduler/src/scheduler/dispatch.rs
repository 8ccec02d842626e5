use tiercomp_core::{EntryPoint, OptimizationPlan, RequestKind, UnitRef, UnitShape};

use super::state::SchedState;
use crate::descriptor::{Descriptor, Handle, Location};
use crate::entitlement::EntitlementSnapshot;

/// Which queue a request is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Position in the main queue.
    Main(usize),
    LowPriority,
}

/// What a worker should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    Process(Source),
    /// Nothing eligible; wait on the queue with a timeout.
    GoToSleepEmpty,
    /// Only expensive work left while another expensive compile runs.
    GoToSleepConcurrentExpensive,
    /// Queue empty and other workers remain active.
    SuspendEmpty,
    /// Over CPU entitlement and other workers remain active.
    SuspendCpuExceeded,
    /// Over CPU entitlement as the last active worker: sleep, then retry.
    ThrottleCpuExceeded,
}

/// Snapshot of one attempt, handed to the worker while the monitor is released.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub handle: Handle,
    pub unit: UnitRef,
    pub kind: RequestKind,
    pub source_pc: Option<EntryPoint>,
    pub plan: OptimizationPlan,
    pub shape: UnitShape,
    pub weight: u8,
    pub first_time: bool,
    /// Try the artifact store before the generator.
    pub artifact_eligible: bool,
}

/// Synchronous and artifact-load requests skip throttling.
fn bypasses_throttling(desc: &Descriptor) -> bool {
    desc.mode.is_sync() || desc.artifact_eligible
}

impl SchedState {
    pub(crate) fn decide(&self, worker: usize, entitlement: &EntitlementSnapshot) -> DispatchDecision {
        let Some((head, _)) = self.queue.head() else {
            if !self.lpq.is_empty() && !entitlement.exceeds {
                return DispatchDecision::Process(Source::LowPriority);
            }
            return if self.num_active > 1 {
                DispatchDecision::SuspendEmpty
            } else {
                DispatchDecision::GoToSleepEmpty
            };
        };
        let Some(head_desc) = self.pool.get(head) else {
            return DispatchDecision::Process(Source::Main(0));
        };
        if bypasses_throttling(head_desc) {
            return DispatchDecision::Process(Source::Main(0));
        }
        if entitlement.exceeds {
            return if self.num_active > 1 {
                DispatchDecision::SuspendCpuExceeded
            } else {
                DispatchDecision::ThrottleCpuExceeded
            };
        }
        let expensive = self.config.expensive_weight;
        if head_desc.weight >= expensive && self.other_expensive_in_flight(worker) {
            let cheap = self.queue.handles().position(|h| {
                self.pool
                    .get(h)
                    .is_some_and(|d| d.weight < expensive || bypasses_throttling(d))
            });
            return match cheap {
                Some(at) => DispatchDecision::Process(Source::Main(at)),
                None => DispatchDecision::GoToSleepConcurrentExpensive,
            };
        }
        DispatchDecision::Process(Source::Main(0))
    }

    /// Remove the chosen request from its queue and hand it to `worker`.
    pub(crate) fn begin_attempt(&mut self, worker: usize, source: Source) -> Option<Attempt> {
        let handle = match source {
            Source::Main(at) => self.queue.remove_at(at)?,
            Source::LowPriority => self.lpq.pop()?,
        };
        let artifact_rejected = self
            .pool
            .get(handle)
            .is_some_and(|d| self.history(&d.unit).artifact_rejected);
        let expensive_weight = self.config.expensive_weight;
        let desc = self.pool.get_mut(handle)?;
        if source == Source::LowPriority {
            self.lpq_weight -= u64::from(desc.weight);
            self.total_weight += u64::from(desc.weight);
        }
        desc.location = Location::InFlight(worker);
        desc.retry_requested = false;
        let attempt = Attempt {
            handle,
            unit: desc.unit,
            kind: desc.kind,
            source_pc: desc.source_pc,
            plan: desc.plan,
            shape: desc.shape,
            weight: desc.weight,
            first_time: desc.is_first_time(),
            artifact_eligible: desc.artifact_eligible && !desc.plan.force_jit && !artifact_rejected,
        };
        let slot = &mut self.workers[worker];
        slot.in_flight = Some(handle);
        slot.expensive = attempt.weight >= expensive_weight;
        self.debug_check_weights();
        Some(attempt)
    }
}
