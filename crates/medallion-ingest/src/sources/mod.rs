//! Source adapters
//!
//! A source turns an execution date into a lazy stream of the rows created
//! on that date. Filtering happens as close to the data as the source
//! allows: in the query for PostgreSQL, while reading for CSV.

pub mod csv;
pub mod postgres;

pub use self::csv::CsvSource;
pub use self::postgres::PostgresSource;

use crate::config::SourceConfig;
use crate::error::Result;
use crate::record::Record;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::BoxStream;

/// Finite, non-restartable sequence of extracted rows
pub type RecordStream = BoxStream<'static, Result<Record>>;

#[async_trait]
pub trait Source: Send + Sync {
    /// Human-readable location, used in logs
    fn describe(&self) -> String;

    /// Rows whose date column falls on `execution_date`.
    ///
    /// Reachability and header/table checks happen before the stream is
    /// returned, so `Connection` and `Schema` errors surface here rather
    /// than mid-stream whenever the source can detect them up front.
    async fn extract(&self, execution_date: NaiveDate) -> Result<RecordStream>;
}

/// Resolve the configured source variant
pub fn from_config(config: &SourceConfig) -> Box<dyn Source> {
    match config {
        SourceConfig::Csv(csv) => Box::new(CsvSource::new(csv.clone())),
        SourceConfig::Postgres(pg) => Box::new(PostgresSource::new(pg.clone())),
    }
}
