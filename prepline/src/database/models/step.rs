//! Task step database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Task step database model.
/// Tracks the status of one named download step for one job.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StepDbModel {
    pub id: String,
    /// External reference of the owning job.
    pub job_ref: String,
    pub step_name: String,
    /// Position of the step in the download chain (1-based).
    pub step_order: i64,
    /// Status: pending, running, completed, failed
    pub status: String,
    pub error_message: Option<String>,
    /// JSON snapshot of the execution context after a successful run
    pub result: Option<String>,
    /// Set when the step was reset for a retry; cleared once it runs again.
    pub retry_requested: bool,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StepDbModel {
    /// Create a fresh pending record. Fresh records are not retry candidates.
    pub fn new(job_ref: impl Into<String>, step: StepName) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_ref: job_ref.into(),
            step_name: step.as_str().to_string(),
            step_order: step.order() as i64,
            status: StepStatus::Pending.as_str().to_string(),
            error_message: None,
            result: None,
            retry_requested: false,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> Option<StepStatus> {
        StepStatus::parse(&self.status)
    }

    pub fn step(&self) -> Option<StepName> {
        StepName::parse(&self.step_name)
    }

    /// Whether the scheduler should pick this record up as a retry.
    pub fn is_retryable(&self) -> bool {
        self.retry_requested && self.status() == Some(StepStatus::Pending)
    }
}

/// Step status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The fixed, ordered set of download steps.
///
/// These literals key every step record. Initialization, recovery, retry
/// dispatch and chain construction all go through this enum so they can
/// never drift apart.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum StepName {
    FetchMedia,
    ExtractAudio,
    TranscribeOrCaption,
    FetchThumbnail,
    TranslateCaptions,
    BuildMetadata,
}

impl StepName {
    /// All steps in chain order.
    pub const ALL: [StepName; 6] = [
        StepName::FetchMedia,
        StepName::ExtractAudio,
        StepName::TranscribeOrCaption,
        StepName::FetchThumbnail,
        StepName::TranslateCaptions,
        StepName::BuildMetadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchMedia => "fetch-media",
            Self::ExtractAudio => "extract-audio",
            Self::TranscribeOrCaption => "transcribe-or-caption",
            Self::FetchThumbnail => "fetch-thumbnail",
            Self::TranslateCaptions => "translate-captions",
            Self::BuildMetadata => "build-metadata",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.as_str() == s)
    }

    /// 1-based position in the chain.
    pub fn order(&self) -> usize {
        match self {
            Self::FetchMedia => 1,
            Self::ExtractAudio => 2,
            Self::TranscribeOrCaption => 3,
            Self::FetchThumbnail => 4,
            Self::TranslateCaptions => 5,
            Self::BuildMetadata => 6,
        }
    }

    /// Step names as string literals, in chain order.
    pub fn names() -> [&'static str; 6] {
        Self::ALL.map(|step| step.as_str())
    }
}
