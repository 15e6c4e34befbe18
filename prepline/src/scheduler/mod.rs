//! Scheduler driving download jobs through their step chain.
//!
//! One [`ChainScheduler`] owns the job and step stores and fires a tick on a
//! fixed interval. Each tick either retries pending step resets, picks up the
//! oldest queued job, or does nothing. A single-flight guard keeps at most one
//! chain or retry batch running at a time; overlapping ticks are skipped.
//!
//! On startup [`ChainScheduler::recover_on_startup`] reclaims work left
//! `running` by an unclean shutdown.

mod recovery;
mod service;

pub use recovery::RecoveryReport;
pub use service::{ChainScheduler, SchedulerConfig, TickOutcome};
