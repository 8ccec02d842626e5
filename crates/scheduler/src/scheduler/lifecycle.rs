use std::sync::atomic::Ordering;
use std::time::Instant;

use tiercomp_core::{ClassRef, CompileResult, ErrorCode, UnitRef};
use tracing::{error, info, warn};

use super::core::Scheduler;
use crate::descriptor::{Descriptor, Handle};
use crate::worker::WorkerState;

impl Scheduler {
    /// Park every worker (host idle mode).
    ///
    /// Queued asynchronous work stays queued. Queued synchronous requests
    /// are finished with `Suspended` so their callers can fall back.
    pub fn suspend_all(&self) {
        let shared = &self.shared;
        let mut state = shared.monitor.lock();
        if state.flags.suspended_all {
            return;
        }
        state.flags.suspended_all = true;

        let waiting: Vec<Handle> = state
            .queue
            .handles()
            .filter(|&h| {
                state
                    .pool
                    .get(h)
                    .is_some_and(|d| d.mode.is_sync() && d.waiters > 0)
            })
            .collect();
        for &handle in &waiting {
            state.retire(handle, CompileResult::failed(ErrorCode::Suspended), &shared.collab);
        }
        for id in 0..state.workers.len() {
            if state.workers[id].state.counts_as_active() {
                state.suspend_worker(id);
            }
        }
        state.refresh_gauges();
        info!(released_waiters = waiting.len(), "all compilation workers suspended");

        shared.queue_cv.notify_all();
        for cv in &shared.worker_cvs {
            cv.notify_all();
        }
    }

    /// Leave host idle mode; workers come back as the activation policy allows.
    pub fn resume_all(&self) {
        let shared = &self.shared;
        let mut state = shared.monitor.lock();
        if !state.flags.suspended_all {
            return;
        }
        state.flags.suspended_all = false;
        let mut woken = 0;
        while shared.maybe_activate(&mut state) {
            woken += 1;
        }
        info!(woken, "compilation workers resumed");
        shared.queue_cv.notify_all();
    }

    /// Stop compiling for the rest of the process lifetime. Queued work
    /// finishes with `Suspended`; in-flight compiles run to completion.
    pub fn disable_compilation(&self) {
        let shared = &self.shared;
        let mut state = shared.monitor.lock();
        if state.flags.compilation_disabled {
            return;
        }
        state.flags.compilation_disabled = true;
        let drained = state.drain_queues(ErrorCode::Suspended, &shared.collab);
        warn!(drained, "compilation disabled");
    }

    /// Drain both queues, stop every thread and wait for them. Idempotent.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if !shared.shutting_down.swap(true, Ordering::AcqRel) {
            let mut state = shared.monitor.lock();
            let drained = state.drain_queues(ErrorCode::Suspended, &shared.collab);
            for id in 0..state.workers.len() {
                let current = state.workers[id].state;
                if !current.is_running() {
                    continue;
                }
                if current.counts_as_active() {
                    state.num_active -= 1;
                }
                state.workers[id].state = WorkerState::SignalTerminate;
            }
            state.refresh_gauges();
            info!(drained, "scheduler shutting down");
            drop(state);

            shared.queue_cv.notify_all();
            for cv in &shared.worker_cvs {
                cv.notify_all();
            }
            shared.sampler_cv.notify_all();
        }

        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "compilation thread panicked");
            }
        }
    }

    /// Cancel every request for `unit`'s method, whatever its epoch.
    /// Returns the number of requests affected.
    pub fn invalidate_unit(&self, unit: UnitRef) -> usize {
        self.invalidate_where(|d| d.unit.method == unit.method)
    }

    /// Cancel every request owned by `class`, thunks included.
    pub fn invalidate_class(&self, class: ClassRef) -> usize {
        self.invalidate_where(|d| d.kind.belongs_to(&d.unit, class))
    }

    /// Queued matches finish with `NotNeeded` right away. In-flight ones
    /// are marked unloaded and finish the same way when their attempt ends.
    fn invalidate_where(&self, matches: impl Fn(&Descriptor) -> bool) -> usize {
        let shared = &self.shared;
        let mut state = shared.monitor.lock();

        let queued: Vec<Handle> = state
            .queue
            .handles()
            .chain(state.lpq.handles())
            .filter(|&h| state.pool.get(h).is_some_and(|d| matches(d)))
            .collect();
        for &handle in &queued {
            state.retire(handle, CompileResult::failed(ErrorCode::NotNeeded), &shared.collab);
        }

        let running: Vec<Handle> = state.workers.iter().filter_map(|w| w.in_flight).collect();
        let mut in_flight = 0;
        for handle in running {
            if let Some(desc) = state.pool.get_mut(handle) {
                if !desc.unloaded && matches(desc) {
                    desc.unloaded = true;
                    in_flight += 1;
                }
            }
        }
        state.refresh_gauges();
        state.debug_check_weights();
        if !queued.is_empty() || in_flight > 0 {
            info!(queued = queued.len(), in_flight, "compile requests invalidated");
        }
        queued.len() + in_flight
    }

    /// Host startup (class loading) phase. While on, and until cached
    /// artifacts are reported available, extra workers stay parked for
    /// the class-loading grace window.
    pub fn set_startup_phase(&self, starting: bool) {
        let mut state = self.shared.monitor.lock();
        state.signals.startup_since = match (starting, state.signals.startup_since) {
            (true, Some(since)) => Some(since),
            (true, None) => Some(Instant::now()),
            (false, _) => None,
        };
    }

    pub fn set_cached_artifacts_available(&self, available: bool) {
        let shared = &self.shared;
        let mut state = shared.monitor.lock();
        state.signals.cached_artifacts_available = available;
        if available {
            shared.maybe_activate(&mut state);
        }
    }
}
