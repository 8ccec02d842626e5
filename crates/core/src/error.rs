use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resource whose exhaustion made an attempt fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exhausted {
    /// Compiler scratch memory.
    Scratch,
    /// Space for generated code.
    CodeCache,
    /// Space for metadata that accompanies generated code.
    DataCache,
    /// Free physical memory on the machine fell under the configured floor.
    PhysicalMemory,
}

/// Cache named by a generator `OutOfCache` failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKind {
    Code,
    Data,
}

/// Failure raised by the code generator. The scheduler never looks
/// inside the generator; it only maps these onto [`CompileFailure`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("out of {0:?} cache")]
    OutOfCache(CacheKind),

    #[error("out of scratch memory")]
    OutOfMemory,

    #[error("speculative assumption failed: {0}")]
    AssumptionFailure(String),

    #[error("compilation interrupted")]
    InterruptedSignal,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("unit exceeds compile complexity or size budget")]
    TooComplex,
}

/// Why installing a stored artifact failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactLoadError {
    #[error("artifact validation mismatch: {0}")]
    ValidationMismatch(String),

    #[error("artifact record corrupted")]
    Corrupted,

    #[error("relocation failed: {0}")]
    Relocation(String),
}

/// Failure taxonomy used for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileFailure {
    #[error("allocation failure: {0:?} exhausted")]
    Allocation(Exhausted),

    #[error("validation failure: {0}")]
    Validation(String),

    #[error("interrupted (shutdown: {shutdown})")]
    Interrupted { shutdown: bool },

    #[error("resource limit exceeded")]
    ResourceLimit,

    #[error("excluded by policy: {0}")]
    PolicyExclusion(String),

    #[error("artifact load failed: {0}")]
    ArtifactLoad(ArtifactLoadError),
}

/// Whether a failed attempt may be tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retryable,
    Terminal,
}

impl CompileFailure {
    /// Map a generator error. `shutting_down` turns interruptions terminal.
    pub fn from_generator(err: GeneratorError, shutting_down: bool) -> Self {
        match err {
            GeneratorError::OutOfCache(CacheKind::Code) => {
                CompileFailure::Allocation(Exhausted::CodeCache)
            }
            GeneratorError::OutOfCache(CacheKind::Data) => {
                CompileFailure::Allocation(Exhausted::DataCache)
            }
            GeneratorError::OutOfMemory => CompileFailure::Allocation(Exhausted::Scratch),
            GeneratorError::AssumptionFailure(why) => CompileFailure::Validation(why),
            GeneratorError::InterruptedSignal => CompileFailure::Interrupted {
                shutdown: shutting_down,
            },
            GeneratorError::Unsupported(why) => CompileFailure::PolicyExclusion(why),
            GeneratorError::TooComplex => CompileFailure::ResourceLimit,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            CompileFailure::Allocation(_)
            | CompileFailure::Validation(_)
            | CompileFailure::ArtifactLoad(_)
            | CompileFailure::Interrupted { shutdown: false } => Disposition::Retryable,
            CompileFailure::Interrupted { shutdown: true }
            | CompileFailure::ResourceLimit
            | CompileFailure::PolicyExclusion(_) => Disposition::Terminal,
        }
    }

    /// Status code reported when this failure is the final word on a request.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CompileFailure::Allocation(Exhausted::Scratch) => ErrorCode::ScratchMemoryExhausted,
            CompileFailure::Allocation(Exhausted::CodeCache) => ErrorCode::CodeCacheExhausted,
            CompileFailure::Allocation(Exhausted::DataCache) => ErrorCode::DataCacheExhausted,
            CompileFailure::Allocation(Exhausted::PhysicalMemory) => ErrorCode::LowPhysicalMemory,
            CompileFailure::Validation(_) => ErrorCode::AssumptionFailure,
            CompileFailure::Interrupted { .. } => ErrorCode::Interrupted,
            CompileFailure::ResourceLimit => ErrorCode::ExcessiveComplexity,
            CompileFailure::PolicyExclusion(_) => ErrorCode::Excluded,
            CompileFailure::ArtifactLoad(_) => ErrorCode::RelocationFailure,
        }
    }

    /// Whether exhausting retries on this failure should stop all
    /// further first-time compilation.
    pub fn exhausts_caches(&self) -> bool {
        matches!(
            self,
            CompileFailure::Allocation(Exhausted::CodeCache | Exhausted::DataCache)
        )
    }
}

/// Status code a submitter sees. Failures never propagate any other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    Ok,
    /// Accepted and still queued or compiling.
    InProgress,
    /// The unit was unloaded, replaced, or already compiled.
    NotNeeded,
    /// Compilation was stopped for the whole scheduler.
    Suspended,
    Excluded,
    ExcessiveComplexity,
    Interrupted,
    ScratchMemoryExhausted,
    CodeCacheExhausted,
    DataCacheExhausted,
    LowPhysicalMemory,
    AssumptionFailure,
    RelocationFailure,
}

impl ErrorCode {
    pub fn is_ok(self) -> bool {
        matches!(self, ErrorCode::Ok)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Ok => "ok",
            ErrorCode::InProgress => "in_progress",
            ErrorCode::NotNeeded => "not_needed",
            ErrorCode::Suspended => "suspended",
            ErrorCode::Excluded => "excluded",
            ErrorCode::ExcessiveComplexity => "excessive_complexity",
            ErrorCode::Interrupted => "interrupted",
            ErrorCode::ScratchMemoryExhausted => "scratch_memory_exhausted",
            ErrorCode::CodeCacheExhausted => "code_cache_exhausted",
            ErrorCode::DataCacheExhausted => "data_cache_exhausted",
            ErrorCode::LowPhysicalMemory => "low_physical_memory",
            ErrorCode::AssumptionFailure => "assumption_failure",
            ErrorCode::RelocationFailure => "relocation_failure",
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_errors_map_to_taxonomy() {
        assert_eq!(
            CompileFailure::from_generator(GeneratorError::OutOfCache(CacheKind::Code), false),
            CompileFailure::Allocation(Exhausted::CodeCache)
        );
        assert_eq!(
            CompileFailure::from_generator(GeneratorError::TooComplex, false),
            CompileFailure::ResourceLimit
        );
        assert!(matches!(
            CompileFailure::from_generator(GeneratorError::Unsupported("jni".into()), false),
            CompileFailure::PolicyExclusion(_)
        ));
    }

    #[test]
    fn interruption_is_terminal_only_during_shutdown() {
        let benign = CompileFailure::from_generator(GeneratorError::InterruptedSignal, false);
        let shutdown = CompileFailure::from_generator(GeneratorError::InterruptedSignal, true);
        assert_eq!(benign.disposition(), Disposition::Retryable);
        assert_eq!(shutdown.disposition(), Disposition::Terminal);
    }

    #[test]
    fn terminal_failures() {
        assert_eq!(CompileFailure::ResourceLimit.disposition(), Disposition::Terminal);
        assert_eq!(
            CompileFailure::PolicyExclusion("filtered".into()).disposition(),
            Disposition::Terminal
        );
        assert_eq!(
            CompileFailure::Validation("class hierarchy changed".into()).disposition(),
            Disposition::Retryable
        );
    }

    #[test]
    fn only_code_and_data_cache_exhaust_caches() {
        assert!(CompileFailure::Allocation(Exhausted::CodeCache).exhausts_caches());
        assert!(CompileFailure::Allocation(Exhausted::DataCache).exhausts_caches());
        assert!(!CompileFailure::Allocation(Exhausted::Scratch).exhausts_caches());
    }
}
