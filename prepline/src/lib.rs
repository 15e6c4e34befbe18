//! prepline library crate.
//!
//! Orchestrates resumable video download jobs: a periodic single-flight
//! [`scheduler`] runs each queued job through a chain of six [`pipeline`]
//! steps and persists every step's status in SQLite ([`database`]) so work
//! resumes after a crash and individual steps can be retried.

pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};
