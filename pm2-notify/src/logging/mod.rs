//! Logging setup with a reloadable filter and optional rolling files.
//!
//! This module provides:
//! - Runtime log level changes via `tracing_subscriber::reload` (SIGHUP)
//! - Daily rolling log files when a log directory is configured
//! - Log file retention cleanup
//! - Local timezone timestamps for logs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate, Utc};
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
pub const DEFAULT_LOG_FILTER: &str = "pm2_notify=info,pm2_bus=info";

/// Filter used by `--verbose`.
pub const VERBOSE_LOG_FILTER: &str = "pm2_notify=debug,pm2_bus=debug";

/// Rolling log file prefix; files are named `pm2-notify.log.YYYY-MM-DD`.
const LOG_FILE_PREFIX: &str = "pm2-notify.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

/// Timestamps in the host's local timezone.
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

/// Handle on the installed subscriber.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: Option<PathBuf>,
}

impl LoggingConfig {
    /// Re-resolve the filter from `RUST_LOG` or the configured directive.
    ///
    /// Used when the configuration is reloaded. `RUST_LOG` still wins, so a
    /// reload with it set leaves the filter unchanged.
    pub fn reload(&self, filter: Option<&str>) -> crate::Result<()> {
        let new_filter = resolve_filter(filter)?;
        let directive = new_filter.to_string();

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter reloaded");
        Ok(())
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    /// Start the log retention cleanup task.
    ///
    /// Runs daily and deletes rolled files older than seven days. Does
    /// nothing when logging to the console only.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel_token: CancellationToken) {
        let Some(log_dir) = self.log_dir.clone() else {
            return;
        };

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

fn parse_filter(directive: &str) -> crate::Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| crate::Error::config(format!("Invalid filter directive {directive:?}: {e}")))
}

/// `RUST_LOG` wins over `filter`, which wins over [`DEFAULT_LOG_FILTER`].
fn resolve_filter(filter: Option<&str>) -> crate::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(env_filter) => Ok(env_filter),
        Err(_) => parse_filter(filter.unwrap_or(DEFAULT_LOG_FILTER)),
    }
}

/// Delete rolled log files older than the given number of days.
async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).date_naive();
    let date_prefix = format!("{LOG_FILE_PREFIX}.");

    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let mut deleted_count = 0;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(file_date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|name| name.strip_prefix(&date_prefix))
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
        else {
            continue;
        };

        if file_date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted_count += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted_count > 0 {
        info!(count = deleted_count, "Cleaned up old log files");
    }

    Ok(deleted_count)
}

/// Initialize logging.
///
/// See [`resolve_filter`] for the filter precedence. Console output goes to
/// stderr so stdout stays free. When `log_dir` is set, a daily rolling file
/// is written there as well; keep the returned guard alive for the app
/// lifetime.
pub fn init_logging(
    log_dir: Option<&Path>,
    filter: Option<&str>,
) -> crate::Result<(Arc<LoggingConfig>, Option<WorkerGuard>)> {
    let initial_filter = resolve_filter(filter)?;
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::ensure_dir_all_sync_with_op("creating log directory", dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_timer(LocalTimer),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    let config = Arc::new(LoggingConfig {
        handle: filter_handle,
        log_dir: log_dir.map(Path::to_path_buf),
    });

    Ok((config, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("pm2_notify=info"));
        assert!(parse_filter(DEFAULT_LOG_FILTER).is_ok());
        assert!(parse_filter(VERBOSE_LOG_FILTER).is_ok());
        assert!(parse_filter("pm2_notify=loud").is_err());
    }

    #[test]
    fn test_filter_can_be_changed_at_runtime() {
        let (_layer, handle): (reload::Layer<EnvFilter, tracing_subscriber::Registry>, _) =
            reload::Layer::new(EnvFilter::new(DEFAULT_LOG_FILTER));
        let config = LoggingConfig {
            handle,
            log_dir: None,
        };
        let current = || config.handle.with_current(|f| f.to_string()).unwrap();
        assert!(current().contains("pm2_notify=info"));

        // RUST_LOG takes precedence over the configured directive.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }

        config.reload(Some("pm2_bus=trace")).unwrap();
        assert!(current().contains("pm2_bus=trace"));

        assert!(config.reload(Some("pm2_notify=loud")).is_err());
        assert!(current().contains("pm2_bus=trace"));

        config.reload(None).unwrap();
        assert!(current().contains("pm2_notify=info"));
    }

    #[tokio::test]
    async fn test_cleanup_old_logs() {
        let dir = tempfile::tempdir().unwrap();
        let today = Local::now().format("%Y-%m-%d").to_string();

        let old = dir.path().join("pm2-notify.log.2000-01-01");
        let recent = dir.path().join(format!("pm2-notify.log.{today}"));
        let unrelated = dir.path().join("other.log.2000-01-01");
        for path in [&old, &recent, &unrelated] {
            std::fs::write(path, "x").unwrap();
        }

        let deleted = cleanup_old_logs(dir.path(), LOG_RETENTION_DAYS).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(unrelated.exists());
    }
}
