//! Logging configuration and initialization
//!
//! Every medallion binary logs through `tracing`. This module turns a
//! [`LogConfig`] into a global subscriber:
//!
//! - console output, daily-rotated file output, or both
//! - human-readable text or JSON lines
//! - a base level plus extra `EnvFilter` directives (e.g. `sqlx=warn`)
//!
//! Library code never prints; use `info!`, `warn!` and friends with
//! structured fields:
//!
//! ```rust,ignore
//! info!(rows = count, uri = %file_uri, "Partition file written");
//! ```
//!
//! Settings start from what the binary passes in and are then overridden by
//! `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`, `LOG_FILE_PREFIX` and
//! `LOG_FILTER` when those are set.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// Case-insensitive lookup of `input` among the accepted spellings of each
/// variant.
fn parse_choice<T: Copy>(what: &str, input: &str, choices: &[(&[&str], T)]) -> Result<T> {
    let wanted = input.trim().to_ascii_lowercase();
    choices
        .iter()
        .find(|(names, _)| names.contains(&wanted.as_str()))
        .map(|(_, value)| *value)
        .ok_or_else(|| anyhow!("Invalid log {what}: {input}"))
}

/// Minimum level of emitted events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_choice(
            "level",
            s,
            &[
                (&["trace"], LogLevel::Trace),
                (&["debug"], LogLevel::Debug),
                (&["info"], LogLevel::Info),
                (&["warn", "warning"], LogLevel::Warn),
                (&["error"], LogLevel::Error),
            ],
        )
    }
}

/// Where log lines go. Console output is always stderr; stdout carries the
/// run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn to_console(self) -> bool {
        self != LogOutput::File
    }

    fn to_file(self) -> bool {
        self != LogOutput::Console
    }
}

impl FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_choice(
            "output",
            s,
            &[
                (&["console", "stderr"], LogOutput::Console),
                (&["file"], LogOutput::File),
                (&["both"], LogOutput::Both),
            ],
        )
    }
}

/// Line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_choice("format", s, &[(&["text"], LogFormat::Text), (&["json"], LogFormat::Json)])
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,

    /// Directory for rolling log files (file output only)
    pub log_dir: PathBuf,

    /// File name prefix, e.g. "medallion-ingest" -> "medallion-ingest.2024-12-01"
    pub log_file_prefix: String,

    /// Extra filter directives, comma separated (e.g. "sqlx=warn,aws_config=warn")
    pub filter_directives: Option<String>,

    /// Source file and line on every event
    pub with_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            output: LogOutput::default(),
            format: LogFormat::default(),
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "medallion".to_string(),
            filter_directives: None,
            with_location: false,
        }
    }
}

impl LogConfig {
    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder(LogConfig::default())
    }

    /// Apply `LOG_*` environment overrides on top of this configuration
    pub fn merge_env(self) -> Result<Self> {
        self.merge_from(|key| std::env::var(key).ok())
    }

    fn merge_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(level) = lookup("LOG_LEVEL") {
            self.level = level.parse()?;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            self.output = output.parse()?;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.format = format.parse()?;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.log_dir = dir.into();
        }
        if let Some(prefix) = lookup("LOG_FILE_PREFIX") {
            self.log_file_prefix = prefix;
        }
        if let Some(filter) = lookup("LOG_FILTER") {
            self.filter_directives = Some(filter);
        }
        if let Some(flag) = lookup("LOG_INCLUDE_LOCATION") {
            self.with_location = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        Ok(self)
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let base = EnvFilter::builder()
            .with_default_directive(LevelFilter::from(self.level).into())
            .from_env_lossy();

        self.filter_directives
            .iter()
            .flat_map(|directives| directives.split(','))
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .try_fold(base, |filter, directive| {
                let parsed = directive
                    .parse()
                    .with_context(|| format!("Invalid log filter directive: {directive}"))?;
                Ok(filter.add_directive(parsed))
            })
    }

    fn fmt_layer<W>(&self, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_file(self.with_location)
            .with_line_number(self.with_location)
            .with_span_events(FmtSpan::CLOSE);

        match self.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        }
    }
}

/// Builder for [`LogConfig`]
pub struct LogConfigBuilder(LogConfig);

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.0.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.0.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.0.format = format;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.0.log_dir = dir.into();
        self
    }

    pub fn log_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.0.log_file_prefix = prefix.into();
        self
    }

    pub fn filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.0.filter_directives = Some(directives.into());
        self
    }

    pub fn build(self) -> LogConfig {
        self.0
    }
}

/// Keeps the non-blocking file writer alive; drop it last so buffered lines
/// are flushed on exit.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard> {
    let filter = config.env_filter()?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_guard = None;

    if config.output.to_console() {
        layers.push(config.fmt_layer(std::io::stderr, true));
    }

    if config.output.to_file() {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", config.log_dir.display())
        })?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(config.fmt_layer(writer, false));
        file_guard = Some(guard);
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(LoggingGuard { _file: file_guard })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_choices_parse_case_insensitively() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" both ".parse::<LogOutput>().unwrap(), LogOutput::Both);
        assert_eq!("Json".parse::<LogFormat>().unwrap(), LogFormat::Json);
    }

    #[test]
    fn test_unknown_choice_names_the_setting() {
        let err = "loud".parse::<LogLevel>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid log level: loud");
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_output_targets() {
        assert!(LogOutput::Console.to_console() && !LogOutput::Console.to_file());
        assert!(!LogOutput::File.to_console() && LogOutput::File.to_file());
        assert!(LogOutput::Both.to_console() && LogOutput::Both.to_file());
    }

    #[test]
    fn test_env_overrides_only_what_is_set() {
        let base = LogConfig::builder()
            .level(LogLevel::Warn)
            .log_file_prefix("medallion-ingest")
            .build();

        let merged = base
            .merge_from(env(&[("LOG_FORMAT", "json"), ("LOG_FILTER", "sqlx=warn")]))
            .unwrap();

        assert_eq!(merged.level, LogLevel::Warn);
        assert_eq!(merged.format, LogFormat::Json);
        assert_eq!(merged.log_file_prefix, "medallion-ingest");
        assert_eq!(merged.filter_directives.as_deref(), Some("sqlx=warn"));
        assert!(!merged.with_location);
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let result = LogConfig::default().merge_from(env(&[("LOG_OUTPUT", "syslog")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_filter_directives_are_validated() {
        let config = LogConfig::builder()
            .filter_directives("sqlx=warn, aws_config=error")
            .build();
        assert!(config.env_filter().is_ok());

        let config = LogConfig::builder().filter_directives("sqlx=verbose").build();
        assert!(config.env_filter().is_err());
    }
}
