use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::CompileResult;
use crate::error::ErrorCode;
use crate::plan::OptimizationPlan;
use crate::priority::{CompileMode, Priority};
use crate::unit::{EntryPoint, RequestKind, UnitRef, UnitShape};

/// Whether the host expects a stored artifact for the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactHint {
    Yes,
    No,
    Maybe,
}

/// One submission, built by the host before calling `Scheduler::submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub unit: UnitRef,
    pub kind: RequestKind,
    /// Entry point of the body being replaced; `None` for a first compile.
    pub source_pc: Option<EntryPoint>,
    pub priority: Priority,
    pub mode: CompileMode,
    pub plan: OptimizationPlan,
    pub shape: UnitShape,
    pub artifact_hint: ArtifactHint,
}

impl CompileRequest {
    pub fn new(unit: UnitRef, plan: OptimizationPlan) -> Self {
        Self {
            unit,
            kind: RequestKind::Ordinary,
            source_pc: None,
            priority: Priority::NormalAsync,
            mode: CompileMode::Async,
            plan,
            shape: UnitShape::default(),
            artifact_hint: ArtifactHint::Maybe,
        }
    }

    pub fn kind(mut self, kind: RequestKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn recompile(mut self, source_pc: EntryPoint) -> Self {
        self.source_pc = Some(source_pc);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn sync(mut self) -> Self {
        self.mode = CompileMode::Sync;
        self
    }

    pub fn shape(mut self, bytecode_size: u32, has_loops: bool) -> Self {
        self.shape = UnitShape {
            bytecode_size,
            has_loops,
        };
        self
    }

    pub fn artifact_hint(mut self, hint: ArtifactHint) -> Self {
        self.artifact_hint = hint;
        self
    }

    pub fn is_first_time(&self) -> bool {
        self.source_pc.is_none()
    }

    /// Requested priority clamped into the band of the calling mode.
    pub fn effective_priority(&self) -> Priority {
        self.priority.for_mode(self.mode)
    }
}

/// Why a submission was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("compilation is disabled")]
    CompilationDisabled,

    #[error("code or data cache exhausted; first-time compiles disabled")]
    CachesExhausted,

    /// Carries the code the unit last failed with.
    #[error("unit already failed terminally ({})", .0.as_str())]
    PreviouslyFailed(ErrorCode),

    #[error("all workers are suspended")]
    Suspended,

    #[error("descriptor pool exhausted")]
    OutOfMemory,
}

impl RejectReason {
    pub fn error_code(self) -> ErrorCode {
        match self {
            RejectReason::ShuttingDown
            | RejectReason::CompilationDisabled
            | RejectReason::CachesExhausted
            | RejectReason::Suspended => ErrorCode::Suspended,
            RejectReason::PreviouslyFailed(code) => code,
            RejectReason::OutOfMemory => ErrorCode::ScratchMemoryExhausted,
        }
    }
}

/// Outcome of `Scheduler::submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// A new descriptor was queued; the compile runs in the background.
    Accepted,
    /// Merged into a request that was already queued or compiling.
    Coalesced,
    Rejected(RejectReason),
    /// Synchronous submissions return once the compile is finished.
    Completed(CompileResult),
}

impl Submission {
    /// Status code view of the outcome.
    pub fn code(&self) -> ErrorCode {
        match self {
            Submission::Accepted | Submission::Coalesced => ErrorCode::InProgress,
            Submission::Rejected(reason) => reason.error_code(),
            Submission::Completed(result) => result.code,
        }
    }

    pub fn result(&self) -> Option<&CompileResult> {
        match self {
            Submission::Completed(result) => Some(result),
            _ => None,
        }
    }
}
