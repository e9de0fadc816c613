//! Pipeline configuration
//!
//! One YAML document describes one pipeline: where rows come from, where the
//! partition files go, and a few run options. It is loaded once per run and
//! never mutated afterwards.
//!
//! ```yaml
//! source:
//!   type: csv
//!   file_path: data/users.csv
//!   date_column: created_at
//! target:
//!   bucket: analytics-raw
//!   path: raw/users
//!   file_format: parquet
//! ```
//!
//! `${VAR}` and `${VAR:-default}` are expanded from the environment inside
//! string values only. Comments are never expanded, and a substituted value
//! is never parsed as YAML. A value that expands to nothing is treated as
//! unset. Numeric and boolean settings accept either a literal or a string,
//! so `port: ${PGPORT:-5432}` works.

use crate::error::{IngestError, Result};
use crate::partition::DEFAULT_PARTITION_COLUMN;
use crate::record::ColumnSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline_config.yaml";

/// Records pulled from the source per encoded batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Seconds to wait for a database connection.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// PostgreSQL schema used when none is configured.
pub const DEFAULT_POSTGRES_SCHEMA: &str = "public";

/// Columns parsed into timestamps when they arrive as text.
pub const DEFAULT_TIMESTAMP_COLUMNS: &[&str] = &["created_at", "updated_at"];

/// S3-compatible endpoint of Google Cloud Storage (HMAC interoperability).
pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Region used for S3 when neither config nor environment names one.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub options: RunOptions,
}

/// Source selection, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Postgres(PostgresSourceConfig),
    Csv(CsvSourceConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Postgres,
    Csv,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Postgres => "postgres",
            SourceKind::Csv => "csv",
        }
    }
}

impl SourceConfig {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceConfig::Postgres(_) => SourceKind::Postgres,
            SourceConfig::Csv(_) => SourceKind::Csv,
        }
    }

    pub fn date_column(&self) -> &str {
        match self {
            SourceConfig::Postgres(c) => &c.date_column,
            SourceConfig::Csv(c) => &c.date_column,
        }
    }

    pub fn timestamp_columns(&self) -> &[String] {
        match self {
            SourceConfig::Postgres(c) => &c.timestamp_columns,
            SourceConfig::Csv(c) => &c.timestamp_columns,
        }
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        match self {
            SourceConfig::Postgres(c) => &c.columns,
            SourceConfig::Csv(c) => &c.columns,
        }
    }

    /// Name of the extracted dataset: the table, or the CSV file stem
    pub fn dataset_name(&self) -> String {
        match self {
            SourceConfig::Postgres(c) => c.table.clone(),
            SourceConfig::Csv(c) => c
                .file_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| c.file_path.display().to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvSourceConfig {
    pub file_path: PathBuf,
    pub date_column: String,

    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Only UTF-8 input is supported
    #[serde(default = "default_encoding")]
    pub encoding: String,

    #[serde(default = "default_timestamp_columns")]
    pub timestamp_columns: Vec<String>,

    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSourceConfig {
    pub table: String,

    #[serde(default = "default_postgres_schema")]
    pub schema: String,

    pub date_column: String,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default = "default_timestamp_columns")]
    pub timestamp_columns: Vec<String>,

    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

/// Database connection settings. Unset fields fall back to `DATABASE_URL`
/// or the libpq `PG*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    #[serde(default, deserialize_with = "scalar::optional")]
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,

    #[serde(default = "default_connect_timeout", deserialize_with = "scalar::required")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            database: None,
            user: None,
            password: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub bucket: String,
    pub path: String,

    #[serde(default = "default_partition_column")]
    pub partition_column: String,

    #[serde(default)]
    pub file_format: FileFormat,

    /// JSON file holding access keys (HMAC keys for GCS)
    pub credentials_path: Option<PathBuf>,

    #[serde(default)]
    pub provider: StorageProvider,

    pub endpoint: Option<String>,
    pub region: Option<String>,
    #[serde(default, deserialize_with = "scalar::optional")]
    pub path_style: Option<bool>,

    /// Filesystem root for the `local` provider
    pub local_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Parquet,
    #[serde(alias = "json")]
    Jsonl,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Parquet => "parquet",
            FileFormat::Jsonl => "jsonl",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            FileFormat::Parquet => "application/vnd.apache.parquet",
            FileFormat::Jsonl => "application/x-ndjson",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Gcs,
    S3,
    Local,
}

impl StorageProvider {
    /// URI scheme of objects written through this provider
    pub fn scheme(&self) -> &'static str {
        match self {
            StorageProvider::Gcs => "gs",
            StorageProvider::S3 => "s3",
            StorageProvider::Local => "file",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default = "default_batch_size", deserialize_with = "scalar::required")]
    pub batch_size: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn default_delimiter() -> char {
    ','
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_timestamp_columns() -> Vec<String> {
    DEFAULT_TIMESTAMP_COLUMNS.iter().map(|c| c.to_string()).collect()
}

fn default_postgres_schema() -> String {
    DEFAULT_POSTGRES_SCHEMA.to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_partition_column() -> String {
    DEFAULT_PARTITION_COLUMN.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl PipelineConfig {
    /// Load, interpolate and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::config(format!("cannot read config file {}: {e}", path.display()))
        })?;

        Self::from_yaml_str(&content, |name| std::env::var(name).ok())
    }

    /// Parse a YAML document, resolving `${VAR}` references through `lookup`
    pub fn from_yaml_str(yaml: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut document: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        expand_references(&mut document, &lookup)?;
        let config: PipelineConfig = serde_yaml::from_value(document)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match &self.source {
            SourceConfig::Csv(csv) => {
                if csv.file_path.as_os_str().is_empty() {
                    return Err(IngestError::config("source.file_path cannot be empty"));
                }
                if csv.date_column.trim().is_empty() {
                    return Err(IngestError::config("source.date_column cannot be empty"));
                }
                if !csv.delimiter.is_ascii() {
                    return Err(IngestError::config(format!(
                        "source.delimiter must be a single ASCII character, got '{}'",
                        csv.delimiter
                    )));
                }
                let encoding = csv.encoding.to_lowercase().replace('_', "-");
                if encoding != "utf-8" && encoding != "utf8" {
                    return Err(IngestError::config(format!(
                        "source.encoding '{}' is not supported; convert the file to UTF-8",
                        csv.encoding
                    )));
                }
            },
            SourceConfig::Postgres(pg) => {
                validate_identifier("source.table", &pg.table)?;
                validate_identifier("source.schema", &pg.schema)?;
                validate_identifier("source.date_column", &pg.date_column)?;
                for column in &pg.columns {
                    validate_identifier("source.columns[].name", &column.name)?;
                }
                if pg.connection.connect_timeout_secs == 0 {
                    return Err(IngestError::config(
                        "source.connection.connect_timeout_secs must be greater than 0",
                    ));
                }
            },
        }

        let target = &self.target;
        if target.bucket.trim().is_empty() {
            return Err(IngestError::config("target.bucket cannot be empty"));
        }
        if target.path.trim_matches('/').trim().is_empty() {
            return Err(IngestError::config("target.path cannot be empty"));
        }
        if target.partition_column.trim().is_empty() || target.partition_column.contains(['/', '=']) {
            return Err(IngestError::config(format!(
                "target.partition_column '{}' is not a valid Hive partition key",
                target.partition_column
            )));
        }
        if let Some(credentials) = &target.credentials_path {
            if !credentials.exists() {
                return Err(IngestError::config(format!(
                    "credentials file not found: {}",
                    credentials.display()
                )));
            }
        }
        if target.provider == StorageProvider::Local && target.local_root.is_none() {
            return Err(IngestError::config(
                "target.local_root is required for the local provider",
            ));
        }

        if self.options.batch_size == 0 {
            return Err(IngestError::config("options.batch_size must be greater than 0"));
        }

        Ok(())
    }
}

/// Plain SQL identifiers only; they are quoted when interpolated into queries
fn validate_identifier(field: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        },
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(IngestError::config(format!(
            "{field} '{value}' is not a valid SQL identifier"
        )))
    }
}

/// Expand references in every string scalar of a parsed document
fn expand_references<L>(value: &mut serde_yaml::Value, lookup: &L) -> Result<()>
where
    L: Fn(&str) -> Option<String>,
{
    use serde_yaml::Value;

    match value {
        Value::String(text) if text.contains("${") => {
            let expanded = interpolate_env(text, lookup)?;
            *value = if expanded.is_empty() {
                Value::Null
            } else {
                Value::String(expanded)
            };
        },
        Value::Sequence(items) => {
            for item in items {
                expand_references(item, lookup)?;
            }
        },
        Value::Mapping(entries) => {
            for item in entries.values_mut() {
                expand_references(item, lookup)?;
            }
        },
        Value::Tagged(tagged) => expand_references(&mut tagged.value, lookup)?,
        _ => {},
    }
    Ok(())
}

/// Numbers and booleans written either natively or as strings
mod scalar {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use std::fmt::Display;
    use std::str::FromStr;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar<T> {
        Native(T),
        Text(String),
    }

    impl<T: FromStr> Scalar<T>
    where
        T::Err: Display,
    {
        fn resolve<E: Error>(self) -> Result<T, E> {
            match self {
                Scalar::Native(value) => Ok(value),
                Scalar::Text(text) => text
                    .trim()
                    .parse()
                    .map_err(|e| E::custom(format!("invalid value '{text}': {e}"))),
            }
        }
    }

    pub fn required<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr,
        T::Err: Display,
    {
        Scalar::<T>::deserialize(deserializer)?.resolve()
    }

    pub fn optional<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr,
        T::Err: Display,
    {
        Option::<Scalar<T>>::deserialize(deserializer)?
            .map(|value| value.resolve())
            .transpose()
    }
}

/// Expand `${VAR}` and `${VAR:-default}` references
pub fn interpolate_env(input: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            IngestError::config("unterminated ${...} reference in configuration")
        })?;
        let reference = &after[..end];

        let (name, default) = match reference.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (reference, None),
        };

        let well_formed = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !name.starts_with(|c: char| c.is_ascii_digit());
        if !well_formed {
            return Err(IngestError::config(format!(
                "invalid environment reference '${{{reference}}}'"
            )));
        }

        match (lookup(name), default) {
            (Some(value), _) => output.push_str(&value),
            (None, Some(default)) => output.push_str(default),
            (None, None) => {
                return Err(IngestError::config(format!(
                    "environment variable {name} is not set"
                )))
            },
        }

        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}
