use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::{debug, info};

use super::state::Shared;
use crate::entitlement::SampleContext;

/// Thread body of the telemetry sampler.
///
/// Reads telemetry every sampling interval with the monitor released,
/// folds it into the entitlement state, and wakes workers when the new
/// reading allows more compilation.
pub(crate) fn run_sampler(shared: Arc<Shared>) {
    info!(interval_ms = shared.config.sampling_interval_ms, "sampler started");
    let interval = shared.config.sampling_interval();
    let mut guard = shared.monitor.lock();
    let mut was_starving = false;

    loop {
        shared.sampler_cv.wait_for(&mut guard, interval);
        if shared.is_shutting_down() {
            break;
        }
        let ctx = SampleContext {
            queue_nonempty: !guard.queue.is_empty(),
            num_active: guard.num_active,
        };

        let reading = MutexGuard::unlocked(&mut guard, || shared.collab.telemetry.sample());
        let snapshot = shared
            .entitlement
            .apply(reading.as_ref(), ctx, &shared.config);

        if snapshot.starvation && !was_starving {
            guard.metrics.starvation_events += 1;
            debug!(
                active = ctx.num_active,
                compilation_cpu = snapshot.compilation_cpu_percent,
                "workers starved of CPU"
            );
        }
        was_starving = snapshot.starvation;

        shared.maybe_activate(&mut guard);
        let has_work = !guard.queue.is_empty() || !guard.lpq.is_empty();
        if has_work && !snapshot.exceeds {
            shared.queue_cv.notify_all();
            // throttled workers sleep on their own condition
            for cv in &shared.worker_cvs {
                cv.notify_one();
            }
        }
    }
    info!("sampler stopped");
}
