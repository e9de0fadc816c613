//! Post-extraction record shaping
//!
//! Sources hand over rows as close to raw as they can; everything that makes
//! rows from different sources look alike happens here, in a fixed order:
//! temporal parsing, declared-schema casts, the partition guard and finally
//! the partition column itself.
//!
//! Rows rejected by any step are counted and dropped. Rejections are data
//! quality decisions, never run failures.

use crate::partition::Partition;
use crate::record::{ColumnSpec, Record, Value};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Why rows were dropped during a run
#[derive(Debug, Default)]
pub struct DropCounters {
    required_null: AtomicU64,
    uncastable: AtomicU64,
    outside_partition: AtomicU64,
}

impl DropCounters {
    pub fn snapshot(&self) -> DroppedRows {
        DroppedRows {
            required_null: self.required_null.load(Ordering::Relaxed),
            uncastable: self.uncastable.load(Ordering::Relaxed),
            outside_partition: self.outside_partition.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DroppedRows {
    pub required_null: u64,
    pub uncastable: u64,
    pub outside_partition: u64,
}

impl DroppedRows {
    pub fn total(&self) -> u64 {
        self.required_null + self.uncastable + self.outside_partition
    }
}

pub struct Normalizer {
    date_column: String,
    temporal_columns: Vec<String>,
    declared: Vec<ColumnSpec>,
    partition: Partition,
    counters: Arc<DropCounters>,
}

impl Normalizer {
    pub fn new(
        date_column: impl Into<String>,
        temporal_columns: &[String],
        declared: &[ColumnSpec],
        partition: Partition,
    ) -> Self {
        let date_column = date_column.into();
        let mut temporal: Vec<String> = vec![date_column.clone()];
        temporal.extend(
            temporal_columns
                .iter()
                .filter(|c| **c != date_column)
                .cloned(),
        );

        Self {
            date_column,
            temporal_columns: temporal,
            declared: declared.to_vec(),
            partition,
            counters: Arc::new(DropCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<DropCounters> {
        Arc::clone(&self.counters)
    }

    /// Shape one record, or `None` when it has to be dropped
    pub fn apply(&self, mut record: Record) -> Option<Record> {
        for column in &self.temporal_columns {
            if let Some(Value::Text(text)) = record.get(column) {
                // The date column keeps its written day so it matches the partition
                let parsed = if *column == self.date_column {
                    Value::parse_temporal_wall_clock(text)
                } else {
                    Value::parse_temporal(text)
                };
                if let Some(parsed) = parsed {
                    record.set(column, parsed);
                }
            }
        }

        for spec in &self.declared {
            let value = record.get(&spec.name).cloned().unwrap_or(Value::Null);
            let Some(cast) = value.cast(spec.column_type) else {
                debug!(column = %spec.name, value = %value, to = %spec.column_type, "Dropping row with uncastable value");
                self.counters.uncastable.fetch_add(1, Ordering::Relaxed);
                return None;
            };
            if spec.required && cast.is_null() {
                debug!(column = %spec.name, "Dropping row with null required column");
                self.counters.required_null.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            record.set(&spec.name, cast);
        }

        let row_date = record.get(&self.date_column).and_then(Value::leading_date);
        if row_date != Some(self.partition.value()) {
            debug!(
                column = %self.date_column,
                row_date = ?row_date,
                partition = %self.partition,
                "Dropping row outside the partition"
            );
            self.counters.outside_partition.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if !record.contains(self.partition.column()) {
            record.push(self.partition.column(), Value::Date(self.partition.value()));
        }

        Some(record)
    }
}
