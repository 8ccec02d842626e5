use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::plan::OptLevel;
use crate::unit::{EntryPoint, UnitRef};

/// Where an installed artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactOrigin {
    /// Produced by the code generator in this process.
    Generated,
    /// Installed from a stored record.
    Loaded,
}

/// Compiled output for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub unit: UnitRef,
    pub level: OptLevel,
    pub entry: EntryPoint,
    pub code_size: u32,
    pub profiling: bool,
    pub origin: ArtifactOrigin,
}

/// A persisted artifact as held by the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub unit: UnitRef,
    pub level: OptLevel,
    pub code_size: u32,
    /// Hottest level this unit reached in earlier runs, if recorded.
    pub hotness_hint: Option<OptLevel>,
    pub stored_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn from_artifact(artifact: &Artifact) -> Self {
        Self {
            unit: artifact.unit,
            level: artifact.level,
            code_size: artifact.code_size,
            hotness_hint: Some(artifact.level),
            stored_at: Utc::now(),
        }
    }

    /// Level worth recompiling at after loading this record, if any.
    pub fn upgrade_hint(&self) -> Option<OptLevel> {
        self.hotness_hint
            .filter(|hint| hint.is_expensive() && *hint > self.level)
    }
}

/// Answer of `ArtifactStore::store`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// The store cannot take any more records.
    Full,
    Error(String),
}

/// What a synchronous submitter gets back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileResult {
    pub artifact: Option<Artifact>,
    pub code: ErrorCode,
}

impl CompileResult {
    pub fn ok(artifact: Artifact) -> Self {
        Self {
            artifact: Some(artifact),
            code: ErrorCode::Ok,
        }
    }

    pub fn failed(code: ErrorCode) -> Self {
        Self {
            artifact: None,
            code,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}
