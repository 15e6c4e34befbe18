//! Logging setup with a reloadable filter and rolling log files.
//!
//! - Console and daily-rolling file output, timestamps in local time
//! - Runtime filter changes via `tracing_subscriber::reload`
//! - Background deletion of log files older than 7 days

use chrono::{Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

use crate::utils::fs;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "prepline=info,sqlx=warn";

/// Base name of the rolling log files (`prepline.log.YYYY-MM-DD`).
pub const LOG_FILE_NAME: &str = "prepline.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Formats timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle to the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: PathBuf,
}

impl LoggingConfig {
    fn new(handle: FilterHandle, log_dir: PathBuf) -> Self {
        Self { handle, log_dir }
    }

    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Replace the active filter, e.g. `"prepline=debug,sqlx=warn"`.
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::config(format!("Invalid filter directive: {e}")))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {e}")))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Start the daily log retention cleanup task.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) {
        let log_dir = self.log_dir.clone();

        tokio::spawn(async move {
            let cleanup_interval = Duration::from_secs(24 * 60 * 60);

            loop {
                if let Err(e) = cleanup_old_logs(&log_dir, LOG_RETENTION_DAYS).await {
                    warn!(error = %e, "Failed to cleanup old logs");
                }

                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Log retention cleanup task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(cleanup_interval) => {}
                }
            }
        });
    }
}

/// Delete rolling log files older than `retention_days`. Returns how many
/// files were removed.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();
    let prefix = format!("{LOG_FILE_NAME}.");

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(date_str) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(prefix.as_str()))
        else {
            continue;
        };

        let Ok(file_date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
            continue;
        };

        if file_date < cutoff {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to delete old log file");
            } else {
                deleted_count += 1;
                debug!(path = %path.display(), "Deleted old log file");
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`] as the initial filter. Keep the
/// returned guard alive for the lifetime of the process or buffered file
/// output is lost.
pub fn init_logging(log_dir: &Path) -> crate::Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_path = log_dir.to_path_buf();
    fs::ensure_dir_all_sync_with_op("creating log directory", &log_path)?;

    let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    let config = Arc::new(LoggingConfig::new(filter_handle, log_path));

    Ok((config, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("prepline=info"));
        assert!(DEFAULT_LOG_FILTER.contains("sqlx=warn"));
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_set_filter_updates_current_filter() {
        let (_layer, handle) =
            reload::Layer::<EnvFilter, tracing_subscriber::Registry>::new(EnvFilter::new(
                DEFAULT_LOG_FILTER,
            ));
        let config = LoggingConfig::new(handle, PathBuf::from("logs"));
        assert!(config.get_filter().contains("prepline=info"));

        config.set_filter("prepline=debug").unwrap();
        assert!(config.get_filter().contains("prepline=debug"));

        assert!(config.set_filter("prepline=[").is_err());
        assert!(config.get_filter().contains("prepline=debug"));
    }

    #[tokio::test]
    async fn test_cleanup_old_logs_keeps_recent_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();

        let old = dir.path().join(format!("{LOG_FILE_NAME}.2000-01-01"));
        let recent = dir.path().join(format!("{LOG_FILE_NAME}.{today}"));
        let foreign = dir.path().join("other.log.2000-01-01");
        let undated = dir.path().join(format!("{LOG_FILE_NAME}.backup"));
        for path in [&old, &recent, &foreign, &undated] {
            std::fs::write(path, b"line\n").unwrap();
        }

        let deleted = cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(foreign.exists());
        assert!(undated.exists());
    }
}
