use tiercomp_core::SchedulerConfig;
use tracing::debug;

use super::state::{SchedState, Shared};

/// Inputs of the worker activation decision.
#[derive(Debug, Clone, Copy)]
pub struct ActivationInput {
    pub num_active: usize,
    pub usable: usize,
    /// Worker cap derived from the CPU entitlement.
    pub max_workers_allowed: usize,
    pub queue_weight: u64,
    pub has_work: bool,
    pub starvation: bool,
    pub suspended_all: bool,
    pub shutting_down: bool,
    /// Inside the class-loading grace window without cached artifacts.
    pub in_grace: bool,
}

/// Whether one more worker should be woken.
///
/// With nobody active any work is enough. Otherwise backlog alone can
/// grow the pool to `usable - 1`; the last worker needs starvation to
/// have been detected and the higher starved threshold to be crossed.
pub fn should_activate(input: &ActivationInput, config: &SchedulerConfig) -> bool {
    if input.suspended_all || input.shutting_down || !input.has_work {
        return false;
    }
    if input.num_active == 0 {
        return true;
    }
    if input.num_active >= input.usable || input.num_active >= input.max_workers_allowed {
        return false;
    }
    if input.in_grace {
        return false;
    }
    let weight = i64::try_from(input.queue_weight).unwrap_or(i64::MAX);
    if input.num_active + 1 < input.usable {
        weight > config.activation_threshold(input.num_active)
    } else {
        input.starvation && weight > config.starved_activation_threshold(input.num_active)
    }
}

/// Whether a worker that just finished a request should park itself.
/// The last active worker never does.
pub fn should_suspend(num_active: usize, queue_weight: u64, config: &SchedulerConfig) -> bool {
    let weight = i64::try_from(queue_weight).unwrap_or(i64::MAX);
    num_active > 1
        && config
            .suspension_threshold(num_active)
            .is_some_and(|threshold| weight < threshold)
}

impl Shared {
    pub(crate) fn activation_input(&self, state: &SchedState) -> ActivationInput {
        let entitlement = self.entitlement.snapshot();
        ActivationInput {
            num_active: state.num_active,
            usable: self.usable_workers,
            max_workers_allowed: entitlement.max_workers_allowed,
            queue_weight: state.total_weight,
            has_work: !state.queue.is_empty() || !state.lpq.is_empty(),
            starvation: entitlement.starvation,
            suspended_all: state.flags.suspended_all,
            shutting_down: self.is_shutting_down(),
            in_grace: state.in_grace(),
        }
    }

    /// Wake at most one parked worker if the policy asks for it.
    pub(crate) fn maybe_activate(&self, state: &mut SchedState) -> bool {
        if !state.started {
            return false;
        }
        let input = self.activation_input(state);
        if !should_activate(&input, &self.config) {
            return false;
        }
        let Some(id) = state.first_parked_worker() else {
            return false;
        };
        if !state.resume_worker(id) {
            return false;
        }
        state.metrics.activations += 1;
        debug!(
            worker = id,
            active = state.num_active,
            weight = input.queue_weight,
            starvation = input.starvation,
            "activating worker"
        );
        self.worker_cvs[id].notify_one();
        true
    }
}
