//! Configuration management.
//!
//! Values are layered, later layers winning:
//!
//! 1. built-in defaults
//! 2. a TOML file (explicit path, `STOWAWAY_CONFIG_PATH`, or the platform
//!    config dir)
//! 3. `STOWAWAY_*` environment variables
//!
//! ```toml
//! [chat]
//! flush_interval_ms = 5000
//! batch_size = 100
//!
//! [vector]
//! flush_interval_ms = 10000
//! batch_size = 50
//! default_top_k = 10
//! default_min_score = 0.0
//! mismatch_policy = "fail_fast"
//!
//! [observability.logging]
//! level = "debug"
//! format = "json"
//!
//! [observability.metrics]
//! enabled = true
//! port = 9090
//! ```

use crate::services::MismatchPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "STOWAWAY_CONFIG_PATH";

/// Main configuration for stowaway.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StowawayConfig {
    /// Chat store settings.
    pub chat: ChatSettings,
    /// Vector store settings.
    pub vector: VectorSettings,
    /// Logging and metrics settings.
    pub observability: ObservabilitySettings,
    /// Problems skipped over while loading. Loading runs before logging is
    /// set up, so the caller logs these afterwards.
    #[serde(skip)]
    pub warnings: Vec<String>,
}

/// Flush timing for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushSettings {
    /// Milliseconds between flush cycles.
    #[serde(rename = "flush_interval_ms")]
    pub interval_ms: u64,
    /// Maximum writes handled per cycle.
    pub batch_size: usize,
    /// Whether shutdown drains the queue one last time.
    pub flush_on_shutdown: bool,
}

impl FlushSettings {
    /// Interval between flush cycles, never shorter than one millisecond.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(if self.interval_ms == 0 { 1 } else { self.interval_ms })
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::InvalidInput(format!(
                "[{section}] flush_interval_ms must be greater than 0"
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidInput(format!(
                "[{section}] batch_size must be greater than 0"
            )));
        }
        Ok(())
    }
}

/// Chat store settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChatSettings {
    /// Flush timing.
    #[serde(flatten)]
    pub flush: FlushSettings,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            flush: FlushSettings {
                interval_ms: 5_000,
                batch_size: 100,
                flush_on_shutdown: true,
            },
        }
    }
}

/// Vector store settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VectorSettings {
    /// Flush timing.
    #[serde(flatten)]
    pub flush: FlushSettings,
    /// Results returned when the caller does not say.
    pub default_top_k: usize,
    /// Score threshold used when the caller does not say.
    pub default_min_score: f32,
    /// Handling of stored vectors whose length differs from the query.
    pub mismatch_policy: MismatchPolicy,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            flush: FlushSettings {
                interval_ms: 10_000,
                batch_size: 50,
                flush_on_shutdown: true,
            },
            default_top_k: 10,
            default_min_score: 0.0,
            mismatch_policy: MismatchPolicy::FailFast,
        }
    }
}

/// Observability section. Every field may be overridden by environment
/// variables when observability is initialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Logging settings.
    pub logging: Option<LoggingSettings>,
    /// Metrics settings.
    pub metrics: Option<MetricsSettings>,
}

/// Logging section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `stowaway=debug`.
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Metrics section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Whether the Prometheus recorder is installed.
    pub enabled: Option<bool>,
    /// Port for the HTTP listener.
    pub port: Option<u16>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Chat section.
    pub chat: Option<ConfigFileFlush>,
    /// Vector section.
    pub vector: Option<ConfigFileVector>,
    /// Observability section.
    pub observability: Option<ObservabilitySettings>,
}

/// Flush keys shared by the chat and vector sections.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileFlush {
    /// Milliseconds between flush cycles.
    pub flush_interval_ms: Option<u64>,
    /// Maximum writes per cycle.
    pub batch_size: Option<usize>,
    /// Final flush on shutdown.
    pub flush_on_shutdown: Option<bool>,
}

/// Vector section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileVector {
    /// Flush keys.
    #[serde(flatten)]
    pub flush: ConfigFileFlush,
    /// Default result count.
    pub default_top_k: Option<usize>,
    /// Default score threshold.
    pub default_min_score: Option<f32>,
    /// `fail_fast` or `skip`.
    pub mismatch_policy: Option<MismatchPolicy>,
}

impl StowawayConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the effective configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file cannot be read or
    /// parsed, or if the result fails validation.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// Like [`Self::load`], reading variables through `env`.
    ///
    /// # Errors
    ///
    /// See [`Self::load`].
    pub fn load_with<F>(explicit: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env(CONFIG_PATH_ENV).filter(|v| !v.trim().is_empty()).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::load_default(),
        };
        config.apply_env_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::parse(&contents)
    }

    /// Parses TOML text on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration TOML.
    pub fn parse(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the platform config dir
    /// (`~/.config/stowaway/config.toml` on Linux).
    ///
    /// Returns default configuration if no readable file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load_from_file(&path).unwrap_or_else(|e| Self {
            warnings: vec![format!(
                "ignoring unreadable config file {}: {e}",
                path.display()
            )],
            ..Self::default()
        })
    }

    /// Platform-specific location of the config file.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("stowaway").join("config.toml"))
    }

    /// Converts a `ConfigFile` to `StowawayConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(chat) = file.chat {
            merge_flush(&mut config.chat.flush, &chat);
        }
        if let Some(vector) = file.vector {
            merge_flush(&mut config.vector.flush, &vector.flush);
            if let Some(v) = vector.default_top_k {
                config.vector.default_top_k = v;
            }
            if let Some(v) = vector.default_min_score {
                config.vector.default_min_score = v;
            }
            if let Some(v) = vector.mismatch_policy {
                config.vector.mismatch_policy = v;
            }
        }
        if let Some(observability) = file.observability {
            config.observability = observability;
        }

        config
    }

    /// Applies `STOWAWAY_*` overrides. Unparseable values are skipped and
    /// noted in [`Self::warnings`].
    pub fn apply_env_overrides<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env(&env, "STOWAWAY_CHAT_FLUSH_INTERVAL_MS", &mut self.warnings) {
            self.chat.flush.interval_ms = v;
        }
        if let Some(v) = parse_env(&env, "STOWAWAY_CHAT_BATCH_SIZE", &mut self.warnings) {
            self.chat.flush.batch_size = v;
        }
        if let Some(v) = parse_env(&env, "STOWAWAY_VECTOR_FLUSH_INTERVAL_MS", &mut self.warnings) {
            self.vector.flush.interval_ms = v;
        }
        if let Some(v) = parse_env(&env, "STOWAWAY_VECTOR_BATCH_SIZE", &mut self.warnings) {
            self.vector.flush.batch_size = v;
        }
        if let Some(v) = parse_env(&env, "STOWAWAY_VECTOR_TOP_K", &mut self.warnings) {
            self.vector.default_top_k = v;
        }
        if let Some(v) = parse_env(&env, "STOWAWAY_VECTOR_MIN_SCORE", &mut self.warnings) {
            self.vector.default_min_score = v;
        }
        if let Some(raw) = env("STOWAWAY_VECTOR_MISMATCH_POLICY") {
            match MismatchPolicy::parse(&raw) {
                Some(policy) => self.vector.mismatch_policy = policy,
                None => self.warnings.push(format!(
                    "ignoring unknown STOWAWAY_VECTOR_MISMATCH_POLICY '{raw}'"
                )),
            }
        }
        if let Some(raw) = env("STOWAWAY_FLUSH_ON_SHUTDOWN") {
            let enabled = parse_bool(&raw);
            self.chat.flush.flush_on_shutdown = enabled;
            self.vector.flush.flush_on_shutdown = enabled;
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        self.chat.flush.validate("chat")?;
        self.vector.flush.validate("vector")?;
        if !self.vector.default_min_score.is_finite() {
            return Err(Error::InvalidInput(
                "[vector] default_min_score must be a finite number".to_string(),
            ));
        }
        Ok(())
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::OperationFailed {
            operation: "serialize_config".to_string(),
            cause: e.to_string(),
        })
    }
}

fn merge_flush(target: &mut FlushSettings, file: &ConfigFileFlush) {
    if let Some(v) = file.flush_interval_ms {
        target.interval_ms = v;
    }
    if let Some(v) = file.batch_size {
        target.batch_size = v;
    }
    if let Some(v) = file.flush_on_shutdown {
        target.flush_on_shutdown = v;
    }
}

fn parse_env<F, V>(env: &F, key: &str, warnings: &mut Vec<String>) -> Option<V>
where
    F: Fn(&str) -> Option<String>,
    V: std::str::FromStr,
{
    let raw = env(key)?;
    let parsed = raw.trim().parse().ok();
    if parsed.is_none() {
        warnings.push(format!("ignoring unparseable {key} '{raw}'"));
    }
    parsed
}

pub(crate) fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
