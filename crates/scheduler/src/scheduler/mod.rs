//! The compilation scheduler: admission, dispatch, worker activation and
//! completion handling around one monitor.
//!
//! Split into focused submodules:
//! - `state`: everything the monitor guards, plus the shared handle
//! - `admission`: submission, coalescing, rejection, backlog downgrade
//! - `dispatch`: what a worker does next and taking requests off a queue
//! - `activation`: waking and parking workers by queue weight
//! - `completion`: installing results, retries, upgrades, draining
//! - `sampler`: the telemetry thread
//! - `lifecycle`: global switches, shutdown and invalidation
//! - `verify`: invariant rescans
//! - `core`: the public `Scheduler` handle

mod activation;
mod admission;
mod completion;
mod core;
mod dispatch;
mod lifecycle;
mod sampler;
mod state;
mod verify;
#[cfg(test)]
mod tests;

pub use self::activation::{should_activate, should_suspend, ActivationInput};
pub use self::completion::AttemptOutcome;
pub use self::core::Scheduler;
pub use self::dispatch::{Attempt, DispatchDecision, Source};
pub(crate) use self::state::{SchedState, Shared};
