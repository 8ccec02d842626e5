use std::collections::HashSet;

use super::core::Scheduler;
use super::state::SchedState;
use crate::descriptor::Location;
use crate::error::SchedulerError;

impl SchedState {
    /// Rescan every structure and compare it with the cached counters.
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        let (main, lpq) = self.rescan_weights();
        if (main, lpq) != (self.total_weight, self.lpq_weight) {
            return Err(format!(
                "weight totals {}/{} but rescan gives {main}/{lpq}",
                self.total_weight, self.lpq_weight
            ));
        }

        if !self.queue.is_ordered() {
            return Err("main queue out of priority order".into());
        }
        for (handle, priority) in self.queue.iter() {
            let desc = self
                .pool
                .get(handle)
                .ok_or_else(|| format!("queued handle {handle:?} is stale"))?;
            if desc.priority != priority {
                return Err(format!("{} queued at {priority:?} but has {:?}", desc.unit, desc.priority));
            }
            if desc.location != Location::MainQueue {
                return Err(format!("{} in main queue but marked {:?}", desc.unit, desc.location));
            }
        }
        for handle in self.lpq.handles() {
            let desc = self
                .pool
                .get(handle)
                .ok_or_else(|| format!("low-priority handle {handle:?} is stale"))?;
            if desc.location != Location::LowPriority {
                return Err(format!("{} in low-priority queue but marked {:?}", desc.unit, desc.location));
            }
        }
        for slot in &self.workers {
            let Some(handle) = slot.in_flight else {
                continue;
            };
            let desc = self
                .pool
                .get(handle)
                .ok_or_else(|| format!("worker {} runs stale handle {handle:?}", slot.id))?;
            if desc.location != Location::InFlight(slot.id) {
                return Err(format!("{} on worker {} but marked {:?}", desc.unit, slot.id, desc.location));
            }
        }

        let mut live = HashSet::new();
        let mut tracked = 0;
        for handle in self.tracked_handles() {
            tracked += 1;
            let Some(desc) = self.pool.get(handle) else {
                continue;
            };
            if desc.is_live() && !live.insert(desc.unit) {
                return Err(format!("more than one live request for {}", desc.unit));
            }
        }

        let mut retired = 0;
        for (_, desc) in self.pool.iter() {
            if desc.location == Location::Retired {
                if desc.waiters == 0 {
                    return Err(format!("{} retired with no waiters but not recycled", desc.unit));
                }
                retired += 1;
            }
        }
        if self.pool.len() != tracked + retired {
            return Err(format!(
                "pool holds {} descriptors, {tracked} tracked and {retired} awaiting waiters",
                self.pool.len()
            ));
        }

        let active = self
            .workers
            .iter()
            .filter(|w| w.state.counts_as_active())
            .count();
        if active != self.num_active {
            return Err(format!("num_active is {} but {active} workers are active", self.num_active));
        }
        Ok(())
    }
}

impl Scheduler {
    /// Check the scheduler's internal bookkeeping under the monitor.
    pub fn verify(&self) -> Result<(), SchedulerError> {
        self.shared
            .monitor
            .lock()
            .check_invariants()
            .map_err(SchedulerError::InvariantViolation)
    }
}
