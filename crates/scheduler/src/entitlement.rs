//! CPU and memory budget derived from periodic telemetry samples.
//!
//! The sampler thread is the only writer. Workers and admission read the
//! atomics with relaxed ordering: a stale value only shifts a heuristic
//! by one sampling interval.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use tiercomp_core::SchedulerConfig;
use tracing::debug;

use crate::host::{TelemetryError, TelemetrySample};

/// Scheduler-side facts the sampler needs alongside a reading.
#[derive(Debug, Clone, Copy)]
pub struct SampleContext {
    pub queue_nonempty: bool,
    pub num_active: usize,
}

/// Point-in-time copy of the entitlement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitlementSnapshot {
    /// Compilation CPU in percent of machine capacity.
    pub compilation_cpu_percent: u32,
    pub exceeds: bool,
    pub starvation: bool,
    pub max_workers_allowed: usize,
    pub free_memory_bytes: u64,
}

impl EntitlementSnapshot {
    /// Entitlement met, no starvation, memory unknown.
    pub fn unconstrained() -> Self {
        Self {
            compilation_cpu_percent: 0,
            exceeds: false,
            starvation: false,
            max_workers_allowed: usize::MAX,
            free_memory_bytes: u64::MAX,
        }
    }
}

#[derive(Debug)]
pub struct ResourceEntitlement {
    compilation_cpu_percent: AtomicU32,
    exceeds: AtomicBool,
    starvation: AtomicBool,
    max_workers_allowed: AtomicUsize,
    free_memory_bytes: AtomicU64,
    logical_cpus: AtomicUsize,
    hypervisor: AtomicBool,
    samples: AtomicU64,
    failed_samples: AtomicU64,
}

impl ResourceEntitlement {
    pub fn new(logical_cpus: usize) -> Self {
        Self {
            compilation_cpu_percent: AtomicU32::new(0),
            exceeds: AtomicBool::new(false),
            starvation: AtomicBool::new(false),
            max_workers_allowed: AtomicUsize::new(usize::MAX),
            free_memory_bytes: AtomicU64::new(u64::MAX),
            logical_cpus: AtomicUsize::new(logical_cpus.max(1)),
            hypervisor: AtomicBool::new(false),
            samples: AtomicU64::new(0),
            failed_samples: AtomicU64::new(0),
        }
    }

    /// Fold one telemetry result into the entitlement state.
    ///
    /// A failed read resets to "entitlement met": no throttling, no
    /// starvation, no worker cap, memory unknown.
    pub fn apply(
        &self,
        reading: Result<&TelemetrySample, &TelemetryError>,
        ctx: SampleContext,
        config: &SchedulerConfig,
    ) -> EntitlementSnapshot {
        let snapshot = match reading {
            Ok(sample) => evaluate(sample, ctx, config),
            Err(err) => {
                debug!(error = %err, "telemetry unavailable, assuming entitlement met");
                self.failed_samples.fetch_add(1, Ordering::Relaxed);
                EntitlementSnapshot::unconstrained()
            }
        };
        if let Ok(sample) = reading {
            self.logical_cpus
                .store(sample.logical_cpus.max(1), Ordering::Relaxed);
            self.hypervisor.store(sample.hypervisor, Ordering::Relaxed);
        }
        self.compilation_cpu_percent
            .store(snapshot.compilation_cpu_percent, Ordering::Relaxed);
        self.exceeds.store(snapshot.exceeds, Ordering::Relaxed);
        self.starvation.store(snapshot.starvation, Ordering::Relaxed);
        self.max_workers_allowed
            .store(snapshot.max_workers_allowed, Ordering::Relaxed);
        self.free_memory_bytes
            .store(snapshot.free_memory_bytes, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
        snapshot
    }

    pub fn snapshot(&self) -> EntitlementSnapshot {
        EntitlementSnapshot {
            compilation_cpu_percent: self.compilation_cpu_percent.load(Ordering::Relaxed),
            exceeds: self.exceeds.load(Ordering::Relaxed),
            starvation: self.starvation.load(Ordering::Relaxed),
            max_workers_allowed: self.max_workers_allowed.load(Ordering::Relaxed),
            free_memory_bytes: self.free_memory_bytes.load(Ordering::Relaxed),
        }
    }

    pub fn is_low_on_memory(&self, config: &SchedulerConfig) -> bool {
        self.free_memory_bytes.load(Ordering::Relaxed) < config.low_memory_threshold_bytes()
    }

    pub fn logical_cpus(&self) -> usize {
        self.logical_cpus.load(Ordering::Relaxed)
    }

    pub fn hypervisor(&self) -> bool {
        self.hypervisor.load(Ordering::Relaxed)
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn failed_samples(&self) -> u64 {
        self.failed_samples.load(Ordering::Relaxed)
    }
}

fn evaluate(
    sample: &TelemetrySample,
    ctx: SampleContext,
    config: &SchedulerConfig,
) -> EntitlementSnapshot {
    let cpus = sample.logical_cpus.max(1) as u64;
    let worker_total: u64 = sample.worker_cpu_percent.iter().map(|&p| u64::from(p)).sum();
    let compilation_cpu_percent = u32::try_from(worker_total / cpus).unwrap_or(u32::MAX);
    let entitlement = config.cpu_entitlement_percent;

    // Workers allowed to run at full speed within the entitlement.
    let max_workers_allowed =
        ((u64::from(entitlement) * cpus).div_ceil(100)).max(1) as usize;

    let starvation = ctx.queue_nonempty
        && ctx.num_active > 0
        && !sample.worker_cpu_percent.is_empty()
        && worker_total / (ctx.num_active as u64) < u64::from(config.starvation_cpu_threshold);

    EntitlementSnapshot {
        compilation_cpu_percent,
        exceeds: compilation_cpu_percent > entitlement,
        starvation,
        max_workers_allowed,
        free_memory_bytes: sample.free_physical_memory_bytes,
    }
}
