//! Fake collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tiercomp_core::{
    Artifact, ArtifactLoadError, ArtifactOrigin, ArtifactRecord, EntryPoint, ErrorCode,
    GeneratorError, OptLevel, OptimizationPlan, RequestKind, SchedulerConfig, StoreOutcome,
    UnitRef,
};
use tiercomp_scheduler::{
    ArtifactStore, CodeGenerator, Collaborators, HostCallbacks, Scheduler, StaticTelemetry,
};

/// Blocks generator calls until opened.
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
    entered: AtomicUsize,
}

impl Gate {
    pub fn new(open: bool) -> Self {
        Self {
            open: Mutex::new(open),
            cv: Condvar::new(),
            entered: AtomicUsize::new(0),
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

/// Generator that follows a per-unit script of failures, then succeeds.
pub struct ScriptedGenerator {
    pub gate: Gate,
    script: Mutex<HashMap<UnitRef, VecDeque<GeneratorError>>>,
    pub calls: Mutex<Vec<(UnitRef, OptLevel)>>,
    next_entry: AtomicU64,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::gated(true)
    }

    pub fn gated(open: bool) -> Self {
        Self {
            gate: Gate::new(open),
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            next_entry: AtomicU64::new(0x1000),
        }
    }

    pub fn fail_with(&self, unit: UnitRef, errors: Vec<GeneratorError>) {
        self.script.lock().unwrap().insert(unit, errors.into());
    }

    pub fn levels_for(&self, unit: UnitRef) -> Vec<OptLevel> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == unit)
            .map(|(_, level)| *level)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl CodeGenerator for ScriptedGenerator {
    fn generate(
        &self,
        unit: &UnitRef,
        _kind: &RequestKind,
        plan: &OptimizationPlan,
    ) -> Result<Artifact, GeneratorError> {
        self.gate.pass();
        self.calls.lock().unwrap().push((*unit, plan.level));
        if let Some(err) = self
            .script
            .lock()
            .unwrap()
            .get_mut(unit)
            .and_then(|errors| errors.pop_front())
        {
            return Err(err);
        }
        Ok(Artifact {
            unit: *unit,
            level: plan.level,
            entry: EntryPoint(self.next_entry.fetch_add(1, Ordering::SeqCst)),
            code_size: 64,
            profiling: plan.insert_profiling,
            origin: ArtifactOrigin::Generated,
        })
    }
}

/// Host that remembers installed entry points.
#[derive(Default)]
pub struct RecordingHost {
    pub entries: Mutex<HashMap<UnitRef, EntryPoint>>,
    pub installs: Mutex<Vec<Artifact>>,
    pub failures: Mutex<Vec<(UnitRef, ErrorCode)>>,
}

impl HostCallbacks for RecordingHost {
    fn is_compiled(&self, unit: &UnitRef) -> bool {
        self.entries.lock().unwrap().contains_key(unit)
    }

    fn current_entry(&self, unit: &UnitRef) -> Option<EntryPoint> {
        self.entries.lock().unwrap().get(unit).copied()
    }

    fn install(&self, artifact: &Artifact, _replaced: Option<EntryPoint>) {
        self.entries
            .lock()
            .unwrap()
            .insert(artifact.unit, artifact.entry);
        self.installs.lock().unwrap().push(artifact.clone());
    }

    fn compilation_failed(&self, unit: &UnitRef, code: ErrorCode) {
        self.failures.lock().unwrap().push((*unit, code));
    }
}

/// In-memory artifact store; units in `broken` fail to install.
#[derive(Default)]
pub struct MemoryStore {
    pub records: Mutex<HashMap<UnitRef, ArtifactRecord>>,
    pub broken: Mutex<HashSet<UnitRef>>,
    pub stored: Mutex<Vec<UnitRef>>,
}

impl MemoryStore {
    pub fn seed(&self, unit: UnitRef, level: OptLevel, hint: Option<OptLevel>) {
        self.records.lock().unwrap().insert(
            unit,
            ArtifactRecord {
                unit,
                level,
                code_size: 32,
                hotness_hint: hint,
                stored_at: Utc::now(),
            },
        );
    }
}

impl ArtifactStore for MemoryStore {
    fn lookup(&self, unit: &UnitRef) -> Option<ArtifactRecord> {
        self.records.lock().unwrap().get(unit).cloned()
    }

    fn install(&self, record: &ArtifactRecord) -> Result<Artifact, ArtifactLoadError> {
        if self.broken.lock().unwrap().contains(&record.unit) {
            return Err(ArtifactLoadError::Relocation("unresolved symbol".into()));
        }
        Ok(Artifact {
            unit: record.unit,
            level: record.level,
            entry: EntryPoint(0xa000 + record.unit.method.0),
            code_size: record.code_size,
            profiling: false,
            origin: ArtifactOrigin::Generated,
        })
    }

    fn store(&self, unit: &UnitRef, _artifact: &Artifact) -> StoreOutcome {
        self.stored.lock().unwrap().push(*unit);
        StoreOutcome::Stored
    }
}

pub struct Rig {
    pub scheduler: Arc<Scheduler>,
    pub generator: Arc<ScriptedGenerator>,
    pub host: Arc<RecordingHost>,
    pub store: Arc<MemoryStore>,
}

/// A started scheduler on a four-CPU idle machine.
pub fn rig(config: SchedulerConfig, generator: ScriptedGenerator, with_store: bool) -> Rig {
    let generator = Arc::new(generator);
    let host = Arc::new(RecordingHost::default());
    let store = Arc::new(MemoryStore::default());
    let mut collab = Collaborators::new(
        generator.clone(),
        host.clone(),
        Arc::new(StaticTelemetry::idle(4)),
    );
    if with_store {
        collab = collab.with_store(store.clone());
    }
    let scheduler = Scheduler::new(config, collab).unwrap();
    scheduler.start().unwrap();
    Rig {
        scheduler: Arc::new(scheduler),
        generator,
        host,
        store,
    }
}

pub fn wait_until(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

pub const LONG: Duration = Duration::from_secs(10);
