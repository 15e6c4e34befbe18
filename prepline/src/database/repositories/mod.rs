//! Repository layer for database access.
//!
//! The scheduler only talks to storage through these traits, so tests and
//! alternative backends can substitute their own implementations.

pub mod job;
pub mod step;

pub use job::*;
pub use step::*;
