//! Logging Module
//!
//! Structured logging built on `tracing`, plus the epoch logger used by the
//! training loop.

use std::time::Instant;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Quiet logging config (errors only)
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Lowercase name, usable as an `EnvFilter` directive
impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl LogConfig {
    /// Filter from `RUST_LOG` when set, otherwise from the configured level
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
    }
}

/// Initialize logging with the given configuration
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .with_thread_ids(config.include_thread_ids)
                .compact(),
        )
        .with(config.env_filter())
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Per-stage epoch logger
pub struct TrainingLogger {
    stage: String,
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    stage_start: Instant,
}

impl TrainingLogger {
    /// Create a logger for a stage with `total_epochs` epochs
    pub fn new(stage: &str, total_epochs: usize) -> Self {
        Self {
            stage: stage.to_string(),
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            stage_start: Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();

        tracing::debug!(
            "[{}] Epoch {}/{} started",
            self.stage,
            epoch + 1,
            self.total_epochs
        );
    }

    /// Seconds spent in the current epoch
    pub fn epoch_seconds(&self) -> f64 {
        self.epoch_start.elapsed().as_secs_f64()
    }

    /// Log end of an epoch with metrics
    pub fn end_epoch(&self, train_loss: f64, train_accuracy: f64, val_loss: f64, val_accuracy: f64) {
        let total_time = self.stage_start.elapsed().as_secs_f64();
        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let avg_epoch_time = total_time / (self.epoch + 1) as f64;
        let eta_secs = epochs_remaining as f64 * avg_epoch_time;

        tracing::info!(
            "[{}] Epoch {}/{} in {:.1}s | loss {:.4} acc {:.2}% | val_loss {:.4} val_acc {:.2}% | ETA {:.0}s",
            self.stage,
            self.epoch + 1,
            self.total_epochs,
            self.epoch_seconds(),
            train_loss,
            train_accuracy * 100.0,
            val_loss,
            val_accuracy * 100.0,
            eta_secs
        );
    }

    /// Log stage completion
    pub fn log_complete(&self, best_accuracy: f64) {
        tracing::info!(
            "[{}] Finished {} epochs in {:.1}s | best val_acc {:.2}%",
            self.stage,
            self.total_epochs,
            self.stage_start.elapsed().as_secs_f64(),
            best_accuracy * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_directive() {
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        // every level is a valid filter directive
        for level in [LogLevel::Trace, LogLevel::Info, LogLevel::Error] {
            assert!(EnvFilter::try_new(level.to_string()).is_ok());
        }
    }

    #[test]
    fn test_log_config_presets() {
        assert_eq!(LogConfig::default().level, LogLevel::Info);
        assert_eq!(LogConfig::verbose().level, LogLevel::Debug);
        assert_eq!(LogConfig::quiet().level, LogLevel::Error);
    }

    #[test]
    fn test_training_logger_tracks_epoch() {
        let mut logger = TrainingLogger::new("frozen", 30);
        logger.start_epoch(4);
        assert_eq!(logger.epoch, 4);
        assert!(logger.epoch_seconds() >= 0.0);
    }
}
