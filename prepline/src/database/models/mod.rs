//! Database models for prepline.
//!
//! These models map directly to the `video_job` and `task_step` tables.

pub mod job;
pub mod step;

pub use job::*;
pub use step::*;
