use serde::{Deserialize, Serialize};

/// Request urgency. Higher variants always drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    /// Background work: upgrades and speculative first-time compiles.
    LowAsync,
    /// Ordinary asynchronous request from invocation counting.
    NormalAsync,
    /// Asynchronous request the runtime wants soon (e.g. a hot recompile).
    HighAsync,
    /// A thread is blocked waiting for this compile.
    NormalSync,
    /// A blocked thread that also holds up others.
    HighSync,
}

/// Calling convention of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompileMode {
    /// Return immediately; the compile happens in the background.
    Async,
    /// Block the submitter until the compile is done.
    Sync,
}

impl CompileMode {
    pub fn is_sync(self) -> bool {
        matches!(self, CompileMode::Sync)
    }
}

impl Priority {
    pub fn is_sync(self) -> bool {
        self >= Priority::NormalSync
    }

    /// Clamp a requested priority into the band that matches `mode`.
    pub fn for_mode(self, mode: CompileMode) -> Self {
        match mode {
            CompileMode::Sync => self.max(Priority::NormalSync),
            CompileMode::Async => self.min(Priority::HighAsync),
        }
    }

    /// One step up, never leaving the current band.
    pub fn bumped(self) -> Self {
        match self {
            Priority::LowAsync => Priority::NormalAsync,
            Priority::NormalAsync | Priority::HighAsync => Priority::HighAsync,
            Priority::NormalSync | Priority::HighSync => Priority::HighSync,
        }
    }

    /// Priority for a request that is re-queued after a retryable failure.
    /// Asynchronous retries never drop below `NormalAsync`.
    pub fn for_retry(self) -> Self {
        self.bumped().max(Priority::NormalAsync)
    }
}
