//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format name. Unknown names fall back to `Pretty`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Filter applied to every event.
    pub filter: EnvFilter,
    /// Output format.
    pub format: LogFormat,
    /// Optional file to append to instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from config settings with env overrides.
    ///
    /// The filter comes from `STOWAWAY_LOG`, then `RUST_LOG`, then the
    /// configured level, then `info` (`debug` when `verbose`).
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        Self::from_settings_with(settings, verbose, |key| std::env::var(key).ok())
    }

    /// Like [`Self::from_settings`], reading variables through `env`.
    #[must_use]
    pub fn from_settings_with<F>(settings: Option<&LoggingSettings>, verbose: bool, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let directive = env("STOWAWAY_LOG")
            .or_else(|| env("RUST_LOG"))
            .or_else(|| settings.and_then(|s| s.level.clone()))
            .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string());

        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
            eprintln!("Invalid log filter '{directive}': {e}; using 'info'");
            EnvFilter::new("info")
        });

        let format = env("STOWAWAY_LOG_FORMAT")
            .or_else(|| settings.and_then(|s| s.format.clone()))
            .map_or(LogFormat::Pretty, |f| LogFormat::parse(&f));

        let file = env("STOWAWAY_LOG_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| settings.and_then(|s| s.file.clone()));

        Self {
            filter,
            format,
            file,
        }
    }
}
