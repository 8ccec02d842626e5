//! compile-sim: drive the scheduler with a synthetic workload.
//!
//! A rayon pool stands in for application threads: it submits first-time
//! compiles for `--units` units (a share of them synchronous), then a
//! second wave of recompilations at hotter levels for the units that got
//! compiled. The generator sleeps in proportion to the requested level and
//! fails a configurable share of attempts; a share of units already has a
//! stored artifact. When the queues drain the metrics are printed as JSON.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{info, warn};

use tiercomp_core::{
    load_dotenv, Artifact, ArtifactLoadError, ArtifactOrigin, ArtifactRecord, CompileRequest,
    EntryPoint, GeneratorError, OptLevel, OptimizationPlan, Priority, RequestKind,
    SchedulerConfig, StoreOutcome, UnitRef,
};
use tiercomp_scheduler::{
    ArtifactStore, CodeGenerator, Collaborators, HostCallbacks, Scheduler, StaticTelemetry,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Synthetic workload for the tiercomp compilation scheduler.
#[derive(Parser, Debug)]
#[command(name = "compile-sim", version, about)]
struct Cli {
    /// Path to a scheduler TOML config. Defaults plus env overrides when absent.
    #[arg(long, env = "TIERCOMP_CONFIG")]
    config: Option<String>,

    /// Number of distinct units to compile.
    #[arg(long, env = "SIM_UNITS", default_value_t = 500)]
    units: u64,

    /// Application threads submitting requests.
    #[arg(long, env = "SIM_SUBMITTERS", default_value_t = 4)]
    submitters: usize,

    /// Percent of first-time requests submitted synchronously.
    #[arg(long, default_value_t = 10)]
    sync_percent: u64,

    /// Percent of generator calls that fail with an assumption failure.
    #[arg(long, default_value_t = 5)]
    failure_percent: u64,

    /// Percent of units with a stored artifact from an earlier run.
    #[arg(long, default_value_t = 20)]
    artifact_percent: u64,

    /// Generator cost of a no-opt compile in microseconds; each level
    /// above doubles it.
    #[arg(long, default_value_t = 200)]
    compile_us: u64,

    /// Logical CPUs reported by the synthetic telemetry.
    #[arg(long)]
    cpus: Option<usize>,

    /// Seed of the workload mix.
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Give up waiting for the queues to drain after this many seconds.
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

/// Workload choices for one unit, reproducible from `--seed`.
struct UnitProfile {
    first_level: OptLevel,
    sync: bool,
    has_artifact: bool,
    recompile: bool,
    bytecode_size: u32,
}

impl UnitProfile {
    fn draw(cli: &Cli, n: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(cli.seed ^ n.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let first_level = match rng.gen_range(0..10) {
            0..=3 => OptLevel::Cold,
            4..=7 => OptLevel::Warm,
            8 => OptLevel::Hot,
            _ => OptLevel::NoOpt,
        };
        Self {
            first_level,
            sync: rng.gen_ratio(percent(cli.sync_percent), 100),
            has_artifact: rng.gen_ratio(percent(cli.artifact_percent), 100),
            recompile: rng.gen_ratio(1, 4),
            bytecode_size: rng.gen_range(1..4096),
        }
    }
}

fn percent(p: u64) -> u32 {
    p.min(100) as u32
}

fn level_index(level: OptLevel) -> u32 {
    OptLevel::ALL.iter().position(|l| *l == level).unwrap_or(0) as u32
}

// ── Synthetic collaborators ─────────────────────────────────────────

struct SimGenerator {
    base_cost: Duration,
    failure_percent: u32,
    rng: Mutex<StdRng>,
    calls: AtomicU64,
    next_entry: AtomicU64,
}

impl CodeGenerator for SimGenerator {
    fn generate(
        &self,
        unit: &UnitRef,
        _kind: &RequestKind,
        plan: &OptimizationPlan,
    ) -> Result<Artifact, GeneratorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        std::thread::sleep(self.base_cost * (1 << level_index(plan.level)));
        if self.rng.lock().gen_ratio(self.failure_percent, 100) {
            return Err(GeneratorError::AssumptionFailure("simulated guard failure".into()));
        }
        Ok(Artifact {
            unit: *unit,
            level: plan.level,
            entry: EntryPoint(self.next_entry.fetch_add(1, Ordering::Relaxed)),
            code_size: 64 << level_index(plan.level),
            profiling: plan.insert_profiling,
            origin: ArtifactOrigin::Generated,
        })
    }
}

#[derive(Default)]
struct SimHost {
    entries: Mutex<HashMap<UnitRef, EntryPoint>>,
}

impl HostCallbacks for SimHost {
    fn is_compiled(&self, unit: &UnitRef) -> bool {
        self.entries.lock().contains_key(unit)
    }

    fn current_entry(&self, unit: &UnitRef) -> Option<EntryPoint> {
        self.entries.lock().get(unit).copied()
    }

    fn install(&self, artifact: &Artifact, _replaced: Option<EntryPoint>) {
        self.entries.lock().insert(artifact.unit, artifact.entry);
    }
}

#[derive(Default)]
struct SimStore {
    records: Mutex<HashMap<UnitRef, ArtifactRecord>>,
}

impl ArtifactStore for SimStore {
    fn lookup(&self, unit: &UnitRef) -> Option<ArtifactRecord> {
        self.records.lock().get(unit).cloned()
    }

    fn install(&self, record: &ArtifactRecord) -> Result<Artifact, ArtifactLoadError> {
        Ok(Artifact {
            unit: record.unit,
            level: record.level,
            entry: EntryPoint(0x8000_0000 | record.unit.method.0),
            code_size: record.code_size,
            profiling: false,
            origin: ArtifactOrigin::Loaded,
        })
    }

    fn store(&self, unit: &UnitRef, artifact: &Artifact) -> StoreOutcome {
        self.records
            .lock()
            .insert(*unit, ArtifactRecord::from_artifact(artifact));
        StoreOutcome::Stored
    }
}

// ── Workload ────────────────────────────────────────────────────────

fn tally(counts: &Mutex<BTreeMap<&'static str, u64>>, code: &'static str) {
    *counts.lock().entry(code).or_insert(0) += 1;
}

fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("loading scheduler config from {path}"))?,
        None => SchedulerConfig::from_env().context("scheduler config from environment")?,
    };

    let cpus = cli.cpus.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });
    let host = Arc::new(SimHost::default());
    let store = Arc::new(SimStore::default());
    let profiles: Vec<UnitProfile> = (0..cli.units).map(|n| UnitProfile::draw(&cli, n)).collect();
    for (n, profile) in (0u64..).zip(&profiles) {
        if profile.has_artifact {
            let unit = UnitRef::new(n, n / 16);
            store.records.lock().insert(
                unit,
                ArtifactRecord {
                    unit,
                    level: OptLevel::Cold,
                    code_size: 128,
                    hotness_hint: (n % 5 == 0).then_some(OptLevel::Hot),
                    stored_at: Utc::now(),
                },
            );
        }
    }
    let generator = Arc::new(SimGenerator {
        base_cost: Duration::from_micros(cli.compile_us),
        failure_percent: percent(cli.failure_percent),
        rng: Mutex::new(StdRng::seed_from_u64(cli.seed)),
        calls: AtomicU64::new(0),
        next_entry: AtomicU64::new(0x1000),
    });
    let collab = Collaborators::new(
        generator.clone(),
        host.clone(),
        Arc::new(StaticTelemetry::idle(cpus)),
    )
    .with_store(store);

    let scheduler = Scheduler::new(config, collab)?;
    scheduler.start()?;

    let submitters = rayon::ThreadPoolBuilder::new()
        .num_threads(cli.submitters.max(1))
        .thread_name(|i| format!("sim-app-{i}"))
        .build()
        .context("building submitter pool")?;

    let started = Instant::now();
    let first_wave = Mutex::new(BTreeMap::new());
    submitters.install(|| {
        (0..cli.units).into_par_iter().for_each(|n| {
            let profile = &profiles[n as usize];
            let unit = UnitRef::new(n, n / 16);
            let mut request = CompileRequest::new(unit, OptimizationPlan::new(profile.first_level))
                .shape(profile.bytecode_size, n % 3 == 0);
            if profile.sync {
                request = request.sync();
            }
            tally(&first_wave, scheduler.submit(request).code().as_str());
        });
    });
    info!(units = cli.units, elapsed_ms = started.elapsed().as_millis() as u64, "first wave submitted");

    let timeout = Duration::from_secs(cli.timeout_secs);
    if !scheduler.wait_idle(timeout) {
        warn!("first wave did not drain in time");
    }

    // hot units come back for an optimizing recompile
    let second_wave = Mutex::new(BTreeMap::new());
    submitters.install(|| {
        (0..cli.units).into_par_iter().for_each(|n| {
            if !profiles[n as usize].recompile {
                return;
            }
            let unit = UnitRef::new(n, n / 16);
            let Some(entry) = host.current_entry(&unit) else {
                return;
            };
            let level = if n % 8 == 0 { OptLevel::VeryHot } else { OptLevel::Hot };
            let request = CompileRequest::new(unit, OptimizationPlan::new(level))
                .recompile(entry)
                .priority(Priority::HighAsync);
            tally(&second_wave, scheduler.submit(request).code().as_str());
        });
    });

    let drained = scheduler.wait_idle(timeout);
    if let Err(err) = scheduler.verify() {
        bail!("scheduler bookkeeping broken: {err}");
    }
    let metrics = scheduler.metrics();
    let workers = scheduler.worker_states();
    scheduler.shutdown();

    let report = serde_json::json!({
        "drained": drained,
        "elapsed_ms": started.elapsed().as_millis() as u64,
        "usable_workers": workers.len(),
        "generator_calls": generator.calls.load(Ordering::Relaxed),
        "first_wave": first_wave.into_inner(),
        "second_wave": second_wave.into_inner(),
        "worker_states": workers,
        "metrics": metrics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
