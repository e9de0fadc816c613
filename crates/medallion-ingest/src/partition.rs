//! Hive-style partitions
//!
//! A run writes exactly one partition: `<path>/<column>=<YYYY-MM-DD>/`. The
//! object prefix is a pure function of the configured path and the partition,
//! which is what lets the warehouse discover partitions by listing.

use crate::error::{IngestError, Result};
use chrono::NaiveDate;
use std::fmt;

/// Hive partition key used when the configuration names none
pub const DEFAULT_PARTITION_COLUMN: &str = "dt";

const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    column: String,
    value: NaiveDate,
}

impl Partition {
    pub fn new(column: impl Into<String>, value: NaiveDate) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn value(&self) -> NaiveDate {
        self.value
    }

    /// `dt=2024-12-01`
    pub fn segment(&self) -> String {
        format!("{}={}", self.column, self.value.format(PARTITION_DATE_FORMAT))
    }

    /// Object key prefix below the bucket, without trailing slash:
    /// `raw/users/dt=2024-12-01`
    pub fn object_prefix(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if path.is_empty() {
            self.segment()
        } else {
            format!("{}/{}", path, self.segment())
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segment())
    }
}

/// Parse a `YYYY-MM-DD` execution date
pub fn parse_execution_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), PARTITION_DATE_FORMAT).map_err(|_| {
        IngestError::config(format!(
            "Invalid execution date '{text}': expected YYYY-MM-DD"
        ))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn dec_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()
    }

    #[test]
    fn test_segment_is_hive_style() {
        let partition = Partition::new(DEFAULT_PARTITION_COLUMN, dec_first());
        assert_eq!(partition.segment(), "dt=2024-12-01");
        assert_eq!(partition.to_string(), "dt=2024-12-01");
    }

    #[test]
    fn test_object_prefix_normalizes_slashes() {
        let partition = Partition::new("dt", dec_first());
        assert_eq!(partition.object_prefix("raw/users"), "raw/users/dt=2024-12-01");
        assert_eq!(partition.object_prefix("/raw/users/"), "raw/users/dt=2024-12-01");
        assert_eq!(partition.object_prefix(""), "dt=2024-12-01");
    }

    #[test]
    fn test_custom_partition_column() {
        let partition = Partition::new("load_date", dec_first());
        assert_eq!(partition.object_prefix("raw/orders"), "raw/orders/load_date=2024-12-01");
    }

    #[test]
    fn test_parse_execution_date() {
        assert_eq!(parse_execution_date("2024-12-01").unwrap(), dec_first());
        assert!(matches!(
            parse_execution_date("12/01/2024"),
            Err(IngestError::Config(_))
        ));
        assert!(parse_execution_date("2024-02-30").is_err());
    }
}
