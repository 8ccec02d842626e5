use std::sync::Arc;
use std::time::Instant;

use tiercomp_core::{
    ArtifactHint, CompileMode, CompileRequest, ErrorCode, OptLevel, Priority, RejectReason,
    RequestKind,
};
use tracing::{debug, warn};

use super::state::SchedState;
use crate::descriptor::{Descriptor, Handle, Location, Rendezvous};

/// Result of admitting a request under the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Queued(Handle),
    Coalesced(Handle),
    Rejected(RejectReason),
}

impl SchedState {
    pub(crate) fn admit(
        &mut self,
        request: &CompileRequest,
        has_store: bool,
        shutting_down: bool,
    ) -> Admission {
        let priority = request.effective_priority();

        if let Some(handle) = self.find_live(&request.unit) {
            // refused before the merge touches the descriptor
            if request.mode.is_sync() && self.sync_blocked() {
                self.metrics.rejected += 1;
                return Admission::Rejected(RejectReason::Suspended);
            }
            self.coalesce(handle, request, priority);
            self.metrics.coalesced += 1;
            return Admission::Coalesced(handle);
        }

        if let Some(reason) = self.rejection(request, shutting_down) {
            self.metrics.rejected += 1;
            debug!(unit = %request.unit, reason = %reason, "request rejected");
            return Admission::Rejected(reason);
        }

        let history = self.history(&request.unit);
        let mut plan = request.plan;
        if let Some(cap) = history.level_cap {
            plan = plan.capped(cap);
        }
        let first_time = request.is_first_time();
        if first_time
            && request.mode == CompileMode::Async
            && plan.level >= OptLevel::Warm
            && self.queue.len() > self.config.downgrade_queue_size
        {
            if let Some(lowered) = plan.for_backlog() {
                debug!(
                    unit = %request.unit,
                    from = %plan.level,
                    to = %lowered.level,
                    queued = self.queue.len(),
                    "backlog downgrade"
                );
                plan = lowered;
                self.metrics.backlog_downgrades += 1;
            }
        }

        let artifact_eligible = has_store
            && first_time
            && request.kind == RequestKind::Ordinary
            && request.artifact_hint != ArtifactHint::No
            && !plan.force_jit
            && !history.artifact_rejected;

        let mut descriptor = Descriptor {
            unit: request.unit,
            kind: request.kind,
            source_pc: request.source_pc,
            priority,
            mode: request.mode,
            plan,
            shape: request.shape,
            weight: 0,
            artifact_eligible,
            attempts_left: self.config.max_attempts,
            error_code: ErrorCode::InProgress,
            retry_requested: false,
            unloaded: false,
            upgrade: false,
            location: Location::MainQueue,
            waiters: 0,
            rendezvous: Arc::new(Rendezvous::default()),
            submitted_at: Instant::now(),
        };
        descriptor.weight = self.weight_for(&descriptor);
        let weight = descriptor.weight;

        let handle = match self.pool.alloc(descriptor) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(unit = %request.unit, error = %err, "cannot allocate descriptor");
                self.metrics.rejected += 1;
                return Admission::Rejected(RejectReason::OutOfMemory);
            }
        };
        self.queue.insert(handle, priority);
        self.total_weight += u64::from(weight);
        if first_time {
            self.metrics.submitted_first_time += 1;
        } else {
            self.metrics.submitted_recompile += 1;
        }
        self.refresh_gauges();
        self.debug_check_weights();
        debug!(
            unit = %request.unit,
            priority = ?priority,
            level = %plan.level,
            weight,
            queue_weight = self.total_weight,
            "request queued"
        );
        Admission::Queued(handle)
    }

    fn rejection(&self, request: &CompileRequest, shutting_down: bool) -> Option<RejectReason> {
        if shutting_down {
            return Some(RejectReason::ShuttingDown);
        }
        if self.flags.compilation_disabled {
            return Some(RejectReason::CompilationDisabled);
        }
        if request.is_first_time() && self.flags.first_time_disabled {
            return Some(RejectReason::CachesExhausted);
        }
        if let Some(code) = self.history(&request.unit).failed {
            return Some(RejectReason::PreviouslyFailed(code));
        }
        if request.mode.is_sync() && self.sync_blocked() {
            return Some(RejectReason::Suspended);
        }
        None
    }

    /// No worker could pick up a synchronous request right now.
    fn sync_blocked(&self) -> bool {
        self.flags.suspended_all || self.running_workers() == 0
    }

    /// Merge a duplicate request into the live descriptor for its unit.
    fn coalesce(&mut self, handle: Handle, request: &CompileRequest, priority: Priority) {
        let cap = self.history(&request.unit).level_cap;
        let Some(desc) = self.pool.get_mut(handle) else {
            return;
        };
        let mut plan = desc.plan.merge(&request.plan);
        if let Some(cap) = cap {
            plan = plan.capped(cap);
        }
        desc.plan = plan;
        if request.mode.is_sync() {
            desc.mode = CompileMode::Sync;
        }
        let raised = priority > desc.priority;
        desc.priority = desc.priority.max(priority);
        let new_priority = desc.priority;
        let location = desc.location;
        let old_weight = u64::from(desc.weight);

        match location {
            Location::MainQueue => {
                let new_weight = self.reweigh(handle);
                self.total_weight = self.total_weight - old_weight + new_weight;
                if raised {
                    self.queue.promote(handle, new_priority);
                }
            }
            Location::LowPriority => {
                self.lpq.remove(handle);
                self.lpq_weight -= old_weight;
                if let Some(desc) = self.pool.get_mut(handle) {
                    desc.upgrade = false;
                    desc.location = Location::MainQueue;
                }
                let new_weight = self.reweigh(handle);
                self.total_weight += new_weight;
                self.queue.insert(handle, new_priority);
            }
            // The running attempt keeps its plan; the merged one applies
            // to any retry and to the upgrade check on success.
            Location::InFlight(_) | Location::Retired => {}
        }
        self.debug_check_weights();
        debug!(unit = %request.unit, priority = ?new_priority, level = %plan.level, "request coalesced");
    }

    /// Recompute a descriptor's weight from its current fields.
    pub(crate) fn reweigh(&mut self, handle: Handle) -> u64 {
        let Some(weight) = self.pool.get(handle).map(|d| self.weight_for(d)) else {
            return 0;
        };
        if let Some(desc) = self.pool.get_mut(handle) {
            desc.weight = weight;
        }
        u64::from(weight)
    }

    /// Register a synchronous waiter; the returned rendezvous is published
    /// exactly once when the request finishes.
    pub(crate) fn join_rendezvous(&mut self, handle: Handle) -> Option<Arc<Rendezvous>> {
        let desc = self.pool.get_mut(handle)?;
        desc.waiters += 1;
        Some(Arc::clone(&desc.rendezvous))
    }

    /// Drop a synchronous waiter and recycle the descriptor once it is
    /// finished and nobody else waits on it.
    pub(crate) fn leave_rendezvous(&mut self, handle: Handle) {
        let Some(desc) = self.pool.get_mut(handle) else {
            warn!(?handle, "waiter left a descriptor that no longer exists");
            return;
        };
        if desc.waiters == 0 {
            warn!(unit = %desc.unit, "waiter count underflow");
            return;
        }
        desc.waiters -= 1;
        if desc.waiters == 0 && desc.is_finished() {
            if let Err(err) = self.pool.release(handle) {
                warn!(error = %err, "descriptor release failed");
            }
        }
    }
}
