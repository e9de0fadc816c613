use super::{RecordStream, Source};
use crate::config::CsvSourceConfig;
use crate::error::{IngestError, Result};
use crate::record::{date_prefix, Record, Value};
use async_trait::async_trait;
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Delimited text file with a header row
pub struct CsvSource {
    config: CsvSourceConfig,
}

impl CsvSource {
    pub fn new(config: CsvSourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Source for CsvSource {
    fn describe(&self) -> String {
        format!("csv:{}", self.config.file_path.display())
    }

    async fn extract(&self, execution_date: NaiveDate) -> Result<RecordStream> {
        let path = &self.config.file_path;
        info!(path = %path.display(), %execution_date, "Reading CSV source");

        let mut reader = ReaderBuilder::new()
            .delimiter(self.config.delimiter as u8)
            .has_headers(true)
            .from_path(path)
            .map_err(|e| {
                IngestError::connection(format!("cannot open CSV file {}: {e}", path.display()))
            })?;

        let headers: Arc<[String]> = match reader.headers() {
            Ok(headers) => headers.iter().map(str::to_string).collect(),
            Err(e) if e.is_io_error() => {
                return Err(IngestError::connection(format!(
                    "cannot read CSV file {}: {e}",
                    path.display()
                )))
            },
            Err(e) => {
                return Err(IngestError::schema(format!(
                    "unreadable header in {}: {e}",
                    path.display()
                )))
            },
        };

        let date_index = headers
            .iter()
            .position(|h| *h == self.config.date_column)
            .ok_or_else(|| {
                IngestError::schema(format!(
                    "date column '{}' not found in {} (columns: {})",
                    self.config.date_column,
                    path.display(),
                    headers.join(", ")
                ))
            })?;

        let missing: Vec<&str> = self
            .config
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| !headers.iter().any(|h| h == name))
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::schema(format!(
                "declared columns missing from {}: {}",
                path.display(),
                missing.join(", ")
            )));
        }

        debug!(columns = headers.len(), date_index, "CSV header validated");

        let location = path.display().to_string();
        let rows = reader
            .into_records()
            .enumerate()
            .filter_map(move |(index, row)| {
                // line 1 is the header
                let line = index + 2;
                match row {
                    Ok(row) => {
                        let row_date = row.get(date_index).and_then(date_prefix);
                        let on_date = row_date == Some(execution_date);
                        on_date.then(|| Ok(to_record(&headers, &row)))
                    },
                    Err(e) if e.is_io_error() => Some(Err(IngestError::connection(format!(
                        "read failed in {location} at line {line}: {e}"
                    )))),
                    Err(e) => {
                        warn!(path = %location, line, error = %e, "Skipping malformed CSV row");
                        None
                    },
                }
            });

        Ok(futures::stream::iter(rows).boxed())
    }
}

fn to_record(headers: &[String], row: &StringRecord) -> Record {
    headers
        .iter()
        .zip(row.iter())
        .map(|(name, field)| {
            let value = if field.is_empty() {
                Value::Null
            } else {
                Value::Text(field.to_string())
            };
            (name.as_str(), value)
        })
        .collect()
}
