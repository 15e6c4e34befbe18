//! Per-job working directory handle.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::Result;
use crate::database::models::JobDbModel;
use crate::utils::fs;

/// Working directory of one job, computed once per chain run.
///
/// Tasks put every artifact of the job (media, audio, captions, thumbnail,
/// metadata) under [`work_dir`](Self::work_dir). The handle itself is never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDirectory {
    job_id: String,
    external_ref: String,
    root: PathBuf,
    created_at: DateTime<Utc>,
}

impl StateDirectory {
    /// Build the handle for `job` under `root`. `root` is made absolute.
    pub fn new(job: &JobDbModel, root: &Path) -> Result<Self> {
        let root = fs::absolute("resolving file root", root)?;
        Ok(Self {
            job_id: job.id.clone(),
            external_ref: job.external_ref.clone(),
            root,
            created_at: job.created_at(),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn external_ref(&self) -> &str {
        &self.external_ref
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `<root>/<YYYYMMDD of job creation>/<external_ref>`
    pub fn work_dir(&self) -> PathBuf {
        self.root
            .join(self.created_at.format("%Y%m%d").to_string())
            .join(sanitize_component(&self.external_ref))
    }

    /// Create the working directory if it does not exist.
    pub async fn ensure(&self) -> Result<PathBuf> {
        let dir = self.work_dir();
        fs::ensure_dir_all_with_op("creating job work dir", &dir).await?;
        Ok(dir)
    }
}

/// Keep a path component from escaping the root or nesting.
fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
