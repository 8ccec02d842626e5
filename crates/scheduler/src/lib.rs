//! Multi-threaded, priority-driven compilation scheduler.
//!
//! Application threads submit [`CompileRequest`]s; a pool of worker
//! threads services them in priority order under a CPU entitlement,
//! retrying failed compiles at less aggressive plans and satisfying
//! first-time requests from a persisted artifact store where possible.

pub mod artifact_bridge;
pub mod descriptor;
pub mod entitlement;
pub mod error;
pub mod host;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod weight;
pub mod worker;

pub use entitlement::EntitlementSnapshot;
pub use error::SchedulerError;
pub use host::{
    ArtifactStore, CodeGenerator, Collaborators, HostCallbacks, StaticTelemetry, TelemetryError,
    TelemetrySample, TelemetrySource,
};
pub use metrics::SchedulerMetrics;
pub use scheduler::Scheduler;
pub use tiercomp_core::{CompileRequest, SchedulerConfig, Submission};
pub use worker::WorkerState;
