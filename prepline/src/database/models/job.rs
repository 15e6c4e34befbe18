//! Video job database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{ms_to_datetime, now_ms};

/// Video job database model.
/// Represents one source video to be processed through the download steps.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    /// Internal id (UUID v4).
    pub id: String,
    /// External reference of the source video (e.g. the platform video id).
    pub external_ref: String,
    pub url: String,
    pub title: String,
    /// Status code: 001, 002, 200, 999
    pub status: String,
    /// Unix epoch milliseconds
    pub created_at: i64,
    /// Unix epoch milliseconds
    pub updated_at: i64,
}

impl JobDbModel {
    /// Create a new queued job.
    pub fn new(
        external_ref: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            external_ref: external_ref.into(),
            url: url.into(),
            title: title.into(),
            status: JobStatus::Queued.as_str().to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Parsed status, `None` if the stored code is not one of ours.
    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        ms_to_datetime(self.created_at)
    }
}

/// Job status codes.
///
/// The literal codes are read by downstream stages (the upload scheduler),
/// so they are persisted exactly as listed here.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum JobStatus {
    /// Waiting to be picked up by the scheduler.
    #[strum(serialize = "001")]
    #[serde(rename = "001")]
    Queued,
    /// The download chain is running.
    #[strum(serialize = "002")]
    #[serde(rename = "002")]
    InProgress,
    /// All download steps completed; ready for the upload stage.
    #[strum(serialize = "200")]
    #[serde(rename = "200")]
    ReadyForNextStage,
    /// The download chain failed.
    #[strum(serialize = "999")]
    #[serde(rename = "999")]
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "001",
            Self::InProgress => "002",
            Self::ReadyForNextStage => "200",
            Self::Failed => "999",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "001" => Some(Self::Queued),
            "002" => Some(Self::InProgress),
            "200" => Some(Self::ReadyForNextStage),
            "999" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal status for the download stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ReadyForNextStage | Self::Failed)
    }
}
