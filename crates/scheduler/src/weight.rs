//! Cost estimates for queued requests.
//!
//! Weights only feed the backlog heuristics (activation, suspension, the
//! one-expensive-compile rule). Nothing correctness-related reads them.

use tiercomp_core::{OptLevel, SchedulerConfig, UnitShape};

pub const WEIGHT_THUNK: u8 = 1;
pub const WEIGHT_NOOPT: u8 = 1;
pub const WEIGHT_COLD: u8 = 2;
pub const WEIGHT_COLD_TINY: u8 = 1;
pub const WEIGHT_WARM_LOOPLESS: u8 = 6;
pub const WEIGHT_WARM_LOOPY: u8 = 12;
pub const WEIGHT_HOT: u8 = 30;
pub const WEIGHT_VERY_HOT: u8 = 100;

/// Bytecode size at or under which a first-time cold compile is trivial.
pub const TINY_UNIT_BYTES: u32 = 32;
/// Bytecode size above which warm+ compiles cost double.
pub const LARGE_UNIT_BYTES: u32 = 2048;

/// Inputs of the weight table.
#[derive(Debug, Clone, Copy)]
pub struct WeightInputs {
    pub level: OptLevel,
    pub shape: UnitShape,
    pub first_time: bool,
    pub artifact_eligible: bool,
    pub thunk: bool,
}

pub fn weight_of(inputs: &WeightInputs, config: &SchedulerConfig) -> u8 {
    if inputs.first_time && inputs.artifact_eligible {
        return config.artifact_load_weight;
    }
    if inputs.thunk {
        return WEIGHT_THUNK;
    }
    let base = match inputs.level {
        OptLevel::NoOpt => WEIGHT_NOOPT,
        OptLevel::Cold if inputs.first_time && inputs.shape.bytecode_size <= TINY_UNIT_BYTES => {
            WEIGHT_COLD_TINY
        }
        OptLevel::Cold => WEIGHT_COLD,
        OptLevel::Warm if inputs.shape.has_loops => WEIGHT_WARM_LOOPY,
        OptLevel::Warm => WEIGHT_WARM_LOOPLESS,
        OptLevel::Hot => WEIGHT_HOT,
        OptLevel::VeryHot | OptLevel::Scorching => WEIGHT_VERY_HOT,
    };
    if inputs.level >= OptLevel::Warm && inputs.shape.bytecode_size > LARGE_UNIT_BYTES {
        base.saturating_mul(2)
    } else {
        base
    }
}
