use std::sync::Arc;

use tiercomp_core::{
    Artifact, ArtifactLoadError, ArtifactRecord, EntryPoint, ErrorCode, GeneratorError,
    OptimizationPlan, RequestKind, StoreOutcome, UnitRef,
};

/// The opaque code generator.
///
/// Called without any scheduler lock held, from worker threads only.
pub trait CodeGenerator: Send + Sync {
    /// Compile `unit` according to `plan`.
    fn generate(
        &self,
        unit: &UnitRef,
        kind: &RequestKind,
        plan: &OptimizationPlan,
    ) -> Result<Artifact, GeneratorError>;
}

/// Persisted artifacts from earlier runs.
pub trait ArtifactStore: Send + Sync {
    fn lookup(&self, unit: &UnitRef) -> Option<ArtifactRecord>;

    /// Relocate and validate a record into an installable artifact.
    fn install(&self, record: &ArtifactRecord) -> Result<Artifact, ArtifactLoadError>;

    fn store(&self, unit: &UnitRef, artifact: &Artifact) -> StoreOutcome;
}

/// Hooks into the host runtime's object model.
pub trait HostCallbacks: Send + Sync {
    /// Keep the unit's owning class alive for the duration of a compile.
    /// Returns `false` when the class is already gone.
    fn pin(&self, _unit: &UnitRef) -> bool {
        true
    }

    fn unpin(&self, _unit: &UnitRef) {}

    fn is_compiled(&self, unit: &UnitRef) -> bool;

    /// Entry point the host currently dispatches calls for `unit` to.
    fn current_entry(&self, unit: &UnitRef) -> Option<EntryPoint>;

    /// Make `artifact` the unit's code. `replaced` is the body it
    /// supersedes, which should forward to the new entry from now on.
    /// Called with the scheduler monitor held.
    fn install(&self, artifact: &Artifact, replaced: Option<EntryPoint>);

    /// A request ended without an installed artifact.
    fn compilation_failed(&self, _unit: &UnitRef, _code: ErrorCode) {}

    /// Name matched against the exclusion patterns.
    fn unit_name(&self, unit: &UnitRef) -> String {
        unit.to_string()
    }

    /// Give up VM execution permission before blocking on a compile.
    fn release_vm_access(&self) {}

    fn acquire_vm_access(&self) {}
}

/// One telemetry reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySample {
    /// Process CPU use in percent of total machine capacity.
    pub process_cpu_percent: u32,
    /// CPU use of each worker thread in percent of one CPU, by worker id.
    pub worker_cpu_percent: Vec<u32>,
    pub free_physical_memory_bytes: u64,
    pub logical_cpus: usize,
    pub hypervisor: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TelemetryError {
    #[error("telemetry unavailable: {0}")]
    Unavailable(String),
}

pub trait TelemetrySource: Send + Sync {
    fn sample(&self) -> Result<TelemetrySample, TelemetryError>;
}

/// Telemetry that always reports the same reading.
#[derive(Debug, Clone)]
pub struct StaticTelemetry {
    sample: TelemetrySample,
}

impl StaticTelemetry {
    pub fn new(sample: TelemetrySample) -> Self {
        Self { sample }
    }

    /// An idle machine with `logical_cpus` CPUs and plenty of memory.
    pub fn idle(logical_cpus: usize) -> Self {
        Self::new(TelemetrySample {
            process_cpu_percent: 0,
            worker_cpu_percent: Vec::new(),
            free_physical_memory_bytes: u64::MAX,
            logical_cpus,
            hypervisor: false,
        })
    }
}

impl TelemetrySource for StaticTelemetry {
    fn sample(&self) -> Result<TelemetrySample, TelemetryError> {
        Ok(self.sample.clone())
    }
}

/// Everything the scheduler talks to outside itself.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn CodeGenerator>,
    pub host: Arc<dyn HostCallbacks>,
    pub telemetry: Arc<dyn TelemetrySource>,
    pub store: Option<Arc<dyn ArtifactStore>>,
}

impl Collaborators {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        host: Arc<dyn HostCallbacks>,
        telemetry: Arc<dyn TelemetrySource>,
    ) -> Self {
        Self {
            generator,
            host,
            telemetry,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }
}
