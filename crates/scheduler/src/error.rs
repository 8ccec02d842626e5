use thiserror::Error;
use tiercomp_core::ConfigError;

/// Errors raised by the scheduler itself. Compile failures are not among
/// them: those reach submitters as `ErrorCode`s.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no worker thread could be started")]
    NoWorkers,

    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("scheduler is shut down")]
    ShutDown,

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}
