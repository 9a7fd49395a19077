//! Logging configuration and setup.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::error::{TelemetryError, TelemetryResult};

/// Base level filter key.
pub const LOG_LEVEL_KEY: &str = "berth.log.level";

/// Log format key (`pretty`, `compact`, `json`, `full`).
pub const LOG_FORMAT_KEY: &str = "berth.log.format";

/// Comma-separated directive list key.
pub const LOG_DIRECTIVES_KEY: &str = "berth.log.directives";

fn init_err<E: fmt::Display>(e: E) -> TelemetryError {
    TelemetryError::InitError(e.to_string())
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line format with colors (default).
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON, one object per line.
    Json,
    /// The default `tracing-subscriber` format.
    Full,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            "full" => Ok(Self::Full),
            other => Err(TelemetryError::ConfigError(format!(
                "unknown log format '{other}' (expected pretty, compact, json or full)"
            ))),
        }
    }
}

/// Log output target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to stdout.
    Stdout,
    /// Log to stderr.
    #[default]
    Stderr,
    /// Log to daily-rotated files in a directory.
    File(PathBuf),
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Base level filter (e.g. `info`).
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Output target.
    #[serde(default)]
    pub target: LogTarget,
    /// File name prefix when logging to files.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Include timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,
    /// Include file and line.
    #[serde(default)]
    pub file_info: bool,
    /// Include thread names; the container's scanner and shutdown threads are named.
    #[serde(default)]
    pub thread_names: bool,
    /// Use ANSI colors.
    #[serde(default = "default_true")]
    pub ansi: bool,
    /// Per-target directives, e.g. `berth_container=debug`.
    #[serde(default)]
    pub directives: Vec<String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_file_prefix() -> String {
    "berth".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            file_prefix: default_file_prefix(),
            timestamps: true,
            file_info: false,
            thread_names: false,
            ansi: true,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Create a config with the given base level.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// Set the format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the target.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Log to daily-rotated files in `directory`, without colors.
    #[must_use]
    pub fn with_file_logging(
        mut self,
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Self {
        self.target = LogTarget::File(directory.into());
        self.file_prefix = prefix.into();
        self.ansi = false;
        self
    }

    /// Add a directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Disable timestamps.
    #[must_use]
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Include thread names.
    #[must_use]
    pub fn with_thread_names(mut self) -> Self {
        self.thread_names = true;
        self
    }

    /// Disable ANSI colors.
    #[must_use]
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    /// Overlay `berth.log.level`, `berth.log.format` and `berth.log.directives`
    /// (comma-separated) from a container configuration onto the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::ConfigError`] for an unknown format.
    #[cfg(feature = "config")]
    pub fn from_effective(config: &berth_config::EffectiveConfig) -> TelemetryResult<Self> {
        let mut log = Self::default();
        if let Some(level) = config.get(LOG_LEVEL_KEY).map(str::trim).filter(|l| !l.is_empty()) {
            level.clone_into(&mut log.level);
        }
        if let Some(format) = config.get(LOG_FORMAT_KEY).filter(|f| !f.trim().is_empty()) {
            log.format = format.parse()?;
        }
        log.directives.extend(
            config
                .get_or(LOG_DIRECTIVES_KEY, "")
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_owned),
        );
        Ok(log)
    }

    fn build_filter(&self) -> TelemetryResult<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level)
            .map_err(|e| TelemetryError::ConfigError(e.to_string()))?;
        for directive in &self.directives {
            filter = filter.add_directive(directive.parse().map_err(
                |e: tracing_subscriber::filter::ParseError| {
                    TelemetryError::ConfigError(e.to_string())
                },
            )?);
        }
        Ok(filter)
    }

    fn layer<W>(&self, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let base = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(self.ansi)
            .with_file(self.file_info)
            .with_line_number(self.file_info)
            .with_thread_names(self.thread_names)
            .with_span_events(FmtSpan::NONE);

        match (self.format, self.timestamps) {
            (LogFormat::Json, true) => base.json().boxed(),
            (LogFormat::Json, false) => base.json().without_time().boxed(),
            (LogFormat::Pretty, true) => base.pretty().boxed(),
            (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
            (LogFormat::Compact, true) => base.compact().boxed(),
            (LogFormat::Compact, false) => base.compact().without_time().boxed(),
            (LogFormat::Full, true) => base.boxed(),
            (LogFormat::Full, false) => base.without_time().boxed(),
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns an error if the level or a directive is invalid, the log
/// directory cannot be created, or a subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.build_filter()?;
    let layer = match &config.target {
        LogTarget::Stdout => config.layer(std::io::stdout),
        LogTarget::Stderr => config.layer(std::io::stderr),
        LogTarget::File(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                TelemetryError::ConfigError(format!("failed to create log directory: {e}"))
            })?;
            config.layer(RollingFileAppender::new(
                Rotation::DAILY,
                dir,
                &config.file_prefix,
            ))
        },
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(init_err)
}

/// Install the default subscriber (info level, stderr, pretty format).
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.target, LogTarget::Stderr);
        assert!(config.timestamps);
        assert!(config.ansi);
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new("debug")
            .with_format(LogFormat::Json)
            .without_timestamps()
            .with_thread_names()
            .with_directive("berth_container=trace");

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(!config.timestamps);
        assert!(config.thread_names);
        assert_eq!(config.directives, vec!["berth_container=trace"]);
    }

    #[test]
    fn test_file_logging_disables_ansi() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig::default().with_file_logging(dir.path(), "plugins");
        assert_eq!(config.target, LogTarget::File(dir.path().to_path_buf()));
        assert_eq!(config.file_prefix, "plugins");
        assert!(!config.ansi);
    }

    #[test]
    fn test_log_config_serialization() {
        let config = LogConfig::new("warn").with_format(LogFormat::Compact);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"level\":\"warn\""));
        assert!(json.contains("\"format\":\"compact\""));

        let parsed: LogConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.level, "warn");
        assert_eq!(parsed.format, LogFormat::Compact);

        let sparse: LogConfig = serde_json::from_str("{\"level\":\"debug\"}").unwrap();
        assert_eq!(sparse.file_prefix, "berth");
        assert!(sparse.ansi);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" compact ".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_from_effective() {
        let config: berth_config::EffectiveConfig = [
            (LOG_LEVEL_KEY, "debug"),
            (LOG_FORMAT_KEY, "json"),
            (LOG_DIRECTIVES_KEY, "berth_container=trace, notify=warn,"),
        ]
        .into_iter()
        .collect();
        let log = LogConfig::from_effective(&config).unwrap();
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.directives, vec!["berth_container=trace", "notify=warn"]);

        let defaults = LogConfig::from_effective(&berth_config::EffectiveConfig::new()).unwrap();
        assert_eq!(defaults.level, "info");

        let bad: berth_config::EffectiveConfig = [(LOG_FORMAT_KEY, "xml")].into_iter().collect();
        assert!(LogConfig::from_effective(&bad).is_err());
    }

    #[test]
    fn test_build_filter() {
        let config = LogConfig::new("debug").with_directive("berth=trace");
        assert!(config.build_filter().is_ok());

        let config = LogConfig::new("debug").with_directive("berth=loudest");
        assert!(config.build_filter().is_err());
    }
}
