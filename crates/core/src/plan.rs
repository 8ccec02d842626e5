use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CompileFailure;

/// Target optimization level, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    NoOpt,
    Cold,
    Warm,
    Hot,
    VeryHot,
    Scorching,
}

impl OptLevel {
    pub const ALL: [OptLevel; 6] = [
        OptLevel::NoOpt,
        OptLevel::Cold,
        OptLevel::Warm,
        OptLevel::Hot,
        OptLevel::VeryHot,
        OptLevel::Scorching,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// `steps` levels cheaper, saturating at `NoOpt`.
    pub fn lowered(self, steps: usize) -> Self {
        Self::ALL[self.index().saturating_sub(steps)]
    }

    /// One level more aggressive, saturating at `Scorching`.
    pub fn raised(self) -> Self {
        Self::ALL[(self.index() + 1).min(Self::ALL.len() - 1)]
    }

    /// Hot and above count as expensive compiles.
    pub fn is_expensive(self) -> bool {
        self >= OptLevel::Hot
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OptLevel::NoOpt => "noopt",
            OptLevel::Cold => "cold",
            OptLevel::Warm => "warm",
            OptLevel::Hot => "hot",
            OptLevel::VeryHot => "very_hot",
            OptLevel::Scorching => "scorching",
        }
    }
}

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to compile a unit as. Plans are values: every adjustment
/// returns a new plan and leaves the old one untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationPlan {
    pub level: OptLevel,
    /// Insert profiling instrumentation into the generated code.
    pub insert_profiling: bool,
    /// Level was lowered at admission because of backlog.
    pub downgraded: bool,
    /// Queue a follow-up compile at `upgrade_target` once this one succeeds.
    pub add_to_upgrade_queue: bool,
    pub upgrade_target: Option<OptLevel>,
    /// Never satisfy this request from the artifact store.
    pub force_jit: bool,
}

impl OptimizationPlan {
    pub fn new(level: OptLevel) -> Self {
        Self {
            level,
            insert_profiling: false,
            downgraded: false,
            add_to_upgrade_queue: false,
            upgrade_target: None,
            force_jit: false,
        }
    }

    pub fn with_profiling(mut self, on: bool) -> Self {
        self.insert_profiling = on;
        self
    }

    pub fn with_force_jit(mut self, on: bool) -> Self {
        self.force_jit = on;
        self
    }

    /// Merge a duplicate request into this one: the more aggressive level
    /// wins, flags asking for more work are kept from either side.
    pub fn merge(&self, other: &OptimizationPlan) -> OptimizationPlan {
        let mut merged = if other.level > self.level { *other } else { *self };
        merged.insert_profiling = self.insert_profiling || other.insert_profiling;
        merged.force_jit = self.force_jit || other.force_jit;
        merged
    }

    /// Clamp the level to at most `max`.
    pub fn capped(&self, max: OptLevel) -> OptimizationPlan {
        if self.level <= max {
            return *self;
        }
        let mut capped = *self;
        capped.level = max;
        capped.add_to_upgrade_queue = false;
        capped.upgrade_target = None;
        capped
    }

    /// Cheaper plan used when the queue is backed up. Returns `None` below
    /// `Warm`, where lowering saves nothing worth an upgrade later.
    pub fn for_backlog(&self) -> Option<OptimizationPlan> {
        if self.level < OptLevel::Warm {
            return None;
        }
        Some(OptimizationPlan {
            level: self.level.lowered(1),
            insert_profiling: self.insert_profiling,
            downgraded: true,
            add_to_upgrade_queue: true,
            upgrade_target: Some(self.level),
            force_jit: self.force_jit,
        })
    }

    /// Ask for a follow-up compile at `target` once this plan succeeds.
    /// No-op unless `target` is above the current level.
    pub fn with_upgrade_to(&self, target: OptLevel) -> OptimizationPlan {
        let mut plan = *self;
        if target > plan.level {
            plan.add_to_upgrade_queue = true;
            plan.upgrade_target = Some(plan.upgrade_target.map_or(target, |t| t.max(target)));
        }
        plan
    }

    /// Plan for the low-priority follow-up compile, if one was asked for.
    pub fn upgrade(&self) -> Option<OptimizationPlan> {
        if !self.add_to_upgrade_queue {
            return None;
        }
        let target = self.upgrade_target.unwrap_or_else(|| self.level.raised());
        (target > self.level).then(|| OptimizationPlan::new(target).with_force_jit(true))
    }
}

/// Plan for the next attempt after `failure`.
///
/// Interruptions and artifact-load failures keep the plan as it was:
/// neither says anything about how hard the unit is to compile. Every
/// other failure lowers the level (two steps from `VeryHot`, one
/// otherwise), turns profiling off, and drops any pending upgrade.
pub fn downgrade(plan: &OptimizationPlan, failure: &CompileFailure) -> OptimizationPlan {
    match failure {
        CompileFailure::Interrupted { .. } | CompileFailure::ArtifactLoad(_) => *plan,
        _ => {
            let steps = if plan.level == OptLevel::VeryHot { 2 } else { 1 };
            OptimizationPlan {
                level: plan.level.lowered(steps),
                insert_profiling: false,
                downgraded: plan.downgraded,
                add_to_upgrade_queue: false,
                upgrade_target: None,
                force_jit: plan.force_jit,
            }
        }
    }
}
