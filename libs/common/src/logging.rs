//! Logging setup shared by gateway services
//!
//! Console output and an optional daily-rolling file both use the
//! `timestamp [LEVEL] message fields` layout. `RUST_LOG` overrides the
//! configured level when set.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging section of a service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `info,acqsrv=debug`
    pub level: String,
    /// Directory for rolling log files; `None` disables file output
    pub dir: Option<PathBuf>,
    /// File name prefix for rolling files
    pub file_prefix: String,
    /// Write to stdout
    pub console: bool,
    /// JSON lines in the log file instead of the bracketed format
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            file_prefix: "acqsrv".to_string(),
            console: true,
            json: false,
        }
    }
}

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `2026-01-02T00:50:44.809123Z [INFO] message`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

static FILE_GUARD: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();

fn build_filter(level: &str) -> Result<(EnvFilter, String), String> {
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| format!("Invalid log level '{}': {}", directive, e))?;
    Ok((filter, directive))
}

/// Install the global subscriber
///
/// Fails if the filter directive is invalid, the log directory cannot be
/// created or a global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (env_filter, directive) = build_filter(&config.level)?;

    let console_layer = config.console.then(|| {
        fmt::layer()
            .with_ansi(true)
            .event_format(BracketedLevelFormat)
            .boxed()
    });

    let file_layer = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", config.file_prefix));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let slot = FILE_GUARD.get_or_init(|| Mutex::new(None));
            if let Ok(mut slot) = slot.lock() {
                *slot = Some(guard);
            }

            let layer = if config.json {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(level = %directive, dir = ?config.dir, "Logging initialized");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_format_level_brackets() {
        assert_eq!(format_level(&Level::WARN), "[WARN]");
        assert_eq!(format_level(&Level::TRACE), "[TRACE]");
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.console);
        assert!(config.dir.is_none());
    }

    #[test]
    fn test_log_config_partial_yaml() {
        let config: LogConfig = serde_yaml::from_str("level: debug\ndir: /tmp/acq\n").unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.dir, Some(PathBuf::from("/tmp/acq")));
        assert_eq!(config.file_prefix, "acqsrv");
    }

    #[test]
    fn test_invalid_filter_rejected() {
        if std::env::var("RUST_LOG").is_err() {
            assert!(build_filter("info,acqsrv=debug").is_ok());
            assert!(build_filter("acqsrv=loud").is_err());
        }
    }
}
