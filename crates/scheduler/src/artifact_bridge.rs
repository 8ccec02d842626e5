//! Installing stored artifacts instead of compiling, and writing fresh
//! compiles back to the store.

use std::sync::atomic::{AtomicBool, Ordering};

use tiercomp_core::{Artifact, ArtifactLoadError, ArtifactOrigin, OptLevel, StoreOutcome, UnitRef};
use tracing::{debug, warn};

use crate::host::ArtifactStore;

#[derive(Debug)]
pub enum LoadOutcome {
    /// Ready to install. `upgrade_hint` is set when the unit ran hotter in
    /// earlier runs than the stored code was compiled for.
    Installed {
        artifact: Artifact,
        upgrade_hint: Option<OptLevel>,
    },
    /// No record for this unit; compile normally.
    Missing,
    /// A record exists but cannot be used.
    Failed(ArtifactLoadError),
}

pub fn try_load(store: &dyn ArtifactStore, unit: &UnitRef) -> LoadOutcome {
    let Some(record) = store.lookup(unit) else {
        return LoadOutcome::Missing;
    };
    if record.unit != *unit {
        return LoadOutcome::Failed(ArtifactLoadError::ValidationMismatch(format!(
            "record is for {}",
            record.unit
        )));
    }
    match store.install(&record) {
        Ok(mut artifact) => {
            artifact.origin = ArtifactOrigin::Loaded;
            debug!(unit = %unit, level = %artifact.level, "artifact loaded from store");
            LoadOutcome::Installed {
                artifact,
                upgrade_hint: record.upgrade_hint(),
            }
        }
        Err(err) => {
            warn!(unit = %unit, error = %err, "stored artifact rejected");
            LoadOutcome::Failed(err)
        }
    }
}

/// Offer a fresh artifact to the store. Returns whether it was stored.
///
/// A `Full` answer sets `disabled` for good; errors are logged and dropped.
pub fn write_back(store: &dyn ArtifactStore, artifact: &Artifact, disabled: &AtomicBool) -> bool {
    if disabled.load(Ordering::Relaxed) {
        return false;
    }
    match store.store(&artifact.unit, artifact) {
        StoreOutcome::Stored => true,
        StoreOutcome::Full => {
            if !disabled.swap(true, Ordering::Relaxed) {
                warn!("artifact store full, further stores disabled");
            }
            false
        }
        StoreOutcome::Error(msg) => {
            warn!(unit = %artifact.unit, error = %msg, "artifact store write failed");
            false
        }
    }
}
