//! Observability and telemetry.
//!
//! Also home to the store [`EventBus`], which broadcasts store changes to
//! live subscribers.

mod event_bus;
mod logging;
mod metrics;

pub use event_bus::{EventBus, EventFilter, Subscription};
pub use logging::{LogFormat, LoggingConfig};
pub use metrics::{MetricsConfig, install_prometheus};

use crate::config::ObservabilitySettings;
use crate::{Error, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

/// Full observability configuration.
#[derive(Debug)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
    /// Whether to expose metrics via HTTP listener.
    pub metrics_expose: bool,
}

/// Options for initialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Whether verbose output was requested via CLI.
    pub verbose: bool,
    /// Whether to expose metrics via HTTP listener.
    pub metrics_expose: bool,
}

/// Handle for observability runtime components.
#[derive(Debug)]
pub struct ObservabilityHandle {
    metrics_handle: Option<PrometheusHandle>,
}

impl ObservabilityHandle {
    /// Renders current metrics in Prometheus text format, if enabled.
    #[must_use]
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics_handle.as_ref().map(PrometheusHandle::render)
    }
}

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Initializes observability from config settings with env overrides.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or if any
/// component fails to initialize.
pub fn init_from_config(
    settings: &ObservabilitySettings,
    options: InitOptions,
) -> Result<ObservabilityHandle> {
    init(build_config(settings, options))
}

fn build_config(settings: &ObservabilitySettings, options: InitOptions) -> ObservabilityConfig {
    ObservabilityConfig {
        logging: LoggingConfig::from_settings(settings.logging.as_ref(), options.verbose),
        metrics: MetricsConfig::from_settings(settings.metrics.as_ref()),
        metrics_expose: options.metrics_expose,
    }
}

/// Initializes logging and metrics for the process.
///
/// Logs go to stderr so stdout stays free for command output.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or if any
/// component fails to initialize.
pub fn init(config: ObservabilityConfig) -> Result<ObservabilityHandle> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(already_initialized());
    }

    let metrics_handle = install_prometheus(&config.metrics, config.metrics_expose)?;

    let layer = fmt_layer(&config.logging)?;
    tracing_subscriber::registry()
        .with(layer)
        .with(config.logging.filter)
        .try_init()
        .map_err(init_error)?;

    OBSERVABILITY_INIT.set(()).map_err(|()| already_initialized())?;

    Ok(ObservabilityHandle { metrics_handle })
}

fn already_initialized() -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: "observability already initialized".to_string(),
    }
}

/// Formatting layer for the configured format, writing to the log file
/// if one is set and to stderr otherwise.
fn fmt_layer(logging: &LoggingConfig) -> Result<Box<dyn Layer<Registry> + Send + Sync>> {
    let (writer, ansi) = match &logging.file {
        Some(path) => (BoxMakeWriter::new(Mutex::new(open_log_file(path)?)), false),
        None => (BoxMakeWriter::new(io::stderr), true),
    };
    let layer = match logging.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .boxed(),
    };
    Ok(layer)
}

/// Opens a log file for appending, creating its directory.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_log_dir".to_string(),
            cause: format!("{}: {e}", parent.display()),
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::OperationFailed {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })
}

#[allow(clippy::needless_pass_by_value)]
fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: e.to_string(),
    }
}
