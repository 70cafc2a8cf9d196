//! Logging configuration for BurrowDB
//!
//! Diagnostics use the `tracing` framework; this module wires up a
//! subscriber with env-filtered levels, optional file rotation, and a
//! [`DbLogger`](burrowdb_core::DbLogger) implementation that forwards
//! engine callbacks into `tracing` events.

use burrowdb_core::{DbLogger, FileId};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Forwards every engine callback to `tracing` events, so embedders that
/// only want logs do not have to implement [`DbLogger`] themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl DbLogger for TracingLogger {
    fn transaction_log_created(&self, file_id: FileId) {
        tracing::info!(file_id, "transaction log file created");
    }

    fn file_marked_for_delete(&self, file_id: FileId) {
        tracing::info!(file_id, "file marked for delete");
    }

    fn key_value_index_created(
        &self,
        file_id: FileId,
        pair_count: u64,
        bytes: u64,
        elapsed: Duration,
    ) {
        tracing::info!(file_id, pair_count, bytes, ?elapsed, "key-value index created");
    }

    fn compaction_start(&self, total_waste: u64) {
        tracing::info!(total_waste, "compaction starting");
    }

    fn compaction_created_pure_value_file(&self, file_id: FileId, size: u64) {
        tracing::info!(file_id, size, "compaction created pure-value file");
    }

    fn report_transaction_leak(&self, description: &str, age: Duration) {
        tracing::warn!(description, ?age, "transaction leaked");
    }

    fn log_warning(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}

/// Log output destination
#[derive(Debug, Clone)]
pub enum LogOutput {
    /// Output to stdout
    Stdout,
    /// Output to a file with rotation
    File(std::path::PathBuf),
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level filter
    pub level: String,
    /// Output destination
    pub output: LogOutput,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
        }
    }
}

impl LogConfig {
    /// Create config with info level and stdout output
    pub fn info() -> Self {
        Self::default()
    }

    /// Create config with debug level
    pub fn debug() -> Self {
        Self {
            level: "debug".to_string(),
            ..Default::default()
        }
    }

    /// Set log output to file with rotation
    pub fn with_file<P: Into<std::path::PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.into());
        self
    }

    /// Set log level filter
    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    /// Initialize global logging with this configuration
    ///
    /// Returns a guard that must be kept alive for file logging to work.
    /// When the guard is dropped, the logging worker thread is shut down.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use burrowdb::logging::LogConfig;
    ///
    /// // Keep the guard alive for the lifetime of your application
    /// let _guard = LogConfig::info().init();
    /// ```
    pub fn init(self) -> Option<WorkerGuard> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .expect("Invalid log level");

        match self.output {
            LogOutput::Stdout => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().compact())
                    .init();
                None
            }
            LogOutput::File(path) => {
                let file_appender = tracing_appender::rolling::daily(
                    path.parent().unwrap_or_else(|| std::path::Path::new(".")),
                    path.file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("burrowdb.log"),
                );
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(non_blocking).compact())
                    .init();

                Some(guard)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_log_config_builders() {
        let config = LogConfig::debug().with_file("/tmp/test.log");
        assert_eq!(config.level, "debug");
        assert!(matches!(config.output, LogOutput::File(_)));
    }

    #[test]
    fn test_tracing_logger_accepts_all_events() {
        let logger = TracingLogger;
        logger.transaction_log_created(1);
        logger.compaction_start(0);
        logger.log_warning("test warning");
    }
}
