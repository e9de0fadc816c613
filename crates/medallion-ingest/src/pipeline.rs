//! Pipeline runner
//!
//! One run extracts one execution date from the configured source, shapes
//! the rows and writes them to the partition of that date.
//!
//! ```text
//! Configured -> Extracting -> Writing -> Completed
//!                    |           |
//!                    +--> Failed <--+
//! ```

use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use crate::normalize::{DroppedRows, Normalizer};
use crate::partition::Partition;
use crate::sources::{self, RecordStream, Source};
use crate::targets::{ObjectStoreTarget, Target, WriteResult};
use chrono::NaiveDate;
use futures::{future, stream, StreamExt, TryStreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Configured,
    Extracting,
    Writing,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Configured => "configured",
            RunState::Extracting => "extracting",
            RunState::Writing => "writing",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        !self.is_terminal()
            && matches!(
                (self, next),
                (Configured, Extracting)
                    | (Extracting, Writing)
                    | (Extracting, Completed)
                    | (Extracting, Failed)
                    | (Writing, Completed)
                    | (Writing, Failed)
            )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a finished run, printed as JSON by the binary
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub execution_date: NaiveDate,
    pub source_kind: &'static str,
    pub dataset: String,
    pub source: String,
    pub destination: String,
    pub rows_written: u64,
    pub rows_dropped: DroppedRows,
    pub file: Option<WriteResult>,
    pub state: RunState,
    pub duration_ms: u64,
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    source: Box<dyn Source>,
    target: Box<dyn Target>,
    state: RunState,
}

impl Pipeline {
    /// Resolve the configured adapters
    pub async fn from_config(config: Arc<PipelineConfig>) -> Result<Self> {
        let source = sources::from_config(&config.source);
        let target = ObjectStoreTarget::from_config(&config).await?;
        Ok(Self::new(config, source, Box::new(target)))
    }

    pub fn new(config: Arc<PipelineConfig>, source: Box<dyn Source>, target: Box<dyn Target>) -> Self {
        Self {
            config,
            source,
            target,
            state: RunState::Configured,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(IngestError::State {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        info!(from = %self.state, to = %next, "Run state changed");
        self.state = next;
        Ok(())
    }

    /// Run the pipeline for `execution_date`. A pipeline runs once.
    #[instrument(
        skip(self),
        fields(
            source_kind = self.config.source.kind().as_str(),
            dataset = %self.config.source.dataset_name(),
        )
    )]
    pub async fn run(&mut self, execution_date: NaiveDate) -> Result<RunReport> {
        let started = Instant::now();
        let partition = Partition::new(self.config.target.partition_column.clone(), execution_date);
        let destination = self.target.destination_path(&partition);

        self.transition(RunState::Extracting)?;
        info!(%destination, "Starting extraction");

        match self.execute(&partition).await {
            Ok((file, dropped)) => {
                self.transition(RunState::Completed)?;
                let rows_written = file.as_ref().map_or(0, |f| f.row_count);
                if dropped.total() > 0 {
                    warn!(
                        required_null = dropped.required_null,
                        uncastable = dropped.uncastable,
                        outside_partition = dropped.outside_partition,
                        "Rows dropped during normalization"
                    );
                }
                info!(rows_written, %destination, "Run completed");

                Ok(RunReport {
                    execution_date,
                    source_kind: self.config.source.kind().as_str(),
                    dataset: self.config.source.dataset_name(),
                    source: self.source.describe(),
                    destination,
                    rows_written,
                    rows_dropped: dropped,
                    file,
                    state: self.state,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            },
            Err(e) => {
                let failed_in = self.state;
                self.transition(RunState::Failed)?;
                error!(error = %e, kind = e.kind(), state = %failed_in, "Run failed");
                Err(e)
            },
        }
    }

    async fn execute(&mut self, partition: &Partition) -> Result<(Option<WriteResult>, DroppedRows)> {
        let config = Arc::clone(&self.config);
        let normalizer = Arc::new(Normalizer::new(
            config.source.date_column(),
            config.source.timestamp_columns(),
            config.source.columns(),
            partition.clone(),
        ));
        let counters = normalizer.counters();

        let extracted = self.source.extract(partition.value()).await?;
        let mut shaped: RecordStream = extracted
            .try_filter_map(move |record| future::ready(Ok(normalizer.apply(record))))
            .boxed();

        // Source errors up to the first kept row belong to extraction
        let first = match shaped.next().await {
            None => {
                info!("Source produced no rows for this partition");
                return Ok((None, counters.snapshot()));
            },
            Some(first) => first?,
        };

        self.transition(RunState::Writing)?;
        let records = stream::once(future::ready(Ok(first))).chain(shaped).boxed();
        let file = self.target.write(records, partition).await?;

        Ok((file, counters.snapshot()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::record::{Record, Value};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const CONFIG: &str = r#"
source:
  type: csv
  file_path: unused.csv
  date_column: created_at
target:
  bucket: b
  path: raw/users
"#;

    struct StaticSource(Vec<Result<Record>>);

    impl StaticSource {
        fn boxed(rows: Vec<Result<Record>>) -> Box<dyn Source> {
            Box::new(Self(rows))
        }
    }

    #[async_trait]
    impl Source for StaticSource {
        fn describe(&self) -> String {
            "static".into()
        }

        async fn extract(&self, _execution_date: NaiveDate) -> Result<RecordStream> {
            let rows: Vec<Result<Record>> = self
                .0
                .iter()
                .map(|row| match row {
                    Ok(record) => Ok(record.clone()),
                    Err(e) => Err(IngestError::connection(e.to_string())),
                })
                .collect();
            Ok(stream::iter(rows).boxed())
        }
    }

    struct UnreachableSource;

    #[async_trait]
    impl Source for UnreachableSource {
        fn describe(&self) -> String {
            "unreachable".into()
        }

        async fn extract(&self, _execution_date: NaiveDate) -> Result<RecordStream> {
            Err(IngestError::connection("connection refused"))
        }
    }

    #[derive(Default)]
    struct MemoryTarget {
        written: Arc<Mutex<Vec<Record>>>,
        fail: bool,
    }

    #[async_trait]
    impl Target for MemoryTarget {
        fn destination_path(&self, partition: &Partition) -> String {
            format!("mem://b/raw/users/{}/", partition.segment())
        }

        async fn write(&self, records: RecordStream, partition: &Partition) -> Result<Option<WriteResult>> {
            let records: Vec<Record> = records.try_collect().await?;
            if self.fail {
                return Err(IngestError::write("bucket is read-only"));
            }
            let row_count = records.len() as u64;
            self.written.lock().unwrap().extend(records);
            Ok(Some(WriteResult {
                file_uri: format!("{}part.jsonl", self.destination_path(partition)),
                row_count,
                size_bytes: 0,
                sha256: String::new(),
            }))
        }
    }

    fn config() -> Arc<PipelineConfig> {
        Arc::new(PipelineConfig::from_yaml_str(CONFIG, |_| None).unwrap())
    }

    fn row(id: i64, created_at: &str) -> Result<Record> {
        Ok([
            ("id", Value::Integer(id)),
            ("created_at", Value::Text(created_at.into())),
        ]
        .into_iter()
        .collect())
    }

    fn dec_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 1).unwrap()
    }

    #[test]
    fn test_transitions() {
        use RunState::*;
        assert!(Configured.can_transition_to(Extracting));
        assert!(Extracting.can_transition_to(Failed));
        assert!(Writing.can_transition_to(Failed));
        assert!(!Configured.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Writing));
        assert!(!Failed.can_transition_to(Extracting));
        assert!(!Failed.can_transition_to(Failed));
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_run_writes_rows_of_the_date() {
        let target = MemoryTarget::default();
        let written = Arc::clone(&target.written);
        let source = StaticSource::boxed(vec![
            row(1, "2024-12-01 08:00:00"),
            row(2, "2024-12-02 08:00:00"),
            row(3, "2024-12-01T23:59:59"),
        ]);
        let mut pipeline = Pipeline::new(config(), source, Box::new(target));

        let report = pipeline.run(dec_first()).await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.rows_written, 2);
        assert_eq!(report.rows_dropped.outside_partition, 1);
        assert_eq!(report.destination, "mem://b/raw/users/dt=2024-12-01/");
        assert_eq!(report.source_kind, "csv");
        assert_eq!(report.dataset, "unused");

        let written = written.lock().unwrap();
        assert!(written
            .iter()
            .all(|r| r.get("dt") == Some(&Value::Date(dec_first()))));
    }

    #[tokio::test]
    async fn test_empty_run_completes_without_file() {
        let mut pipeline = Pipeline::new(
            config(),
            StaticSource::boxed(vec![row(1, "2024-11-30")]),
            Box::new(MemoryTarget::default()),
        );

        let report = pipeline.run(dec_first()).await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.rows_written, 0);
        assert!(report.file.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_source_fails_run() {
        let mut pipeline = Pipeline::new(config(), Box::new(UnreachableSource), Box::new(MemoryTarget::default()));

        let err = pipeline.run(dec_first()).await.unwrap_err();

        assert!(matches!(err, IngestError::Connection(_)));
        assert_eq!(pipeline.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn test_write_failure_fails_run() {
        let target = MemoryTarget {
            fail: true,
            ..MemoryTarget::default()
        };
        let mut pipeline = Pipeline::new(
            config(),
            StaticSource::boxed(vec![row(1, "2024-12-01")]),
            Box::new(target),
        );

        let err = pipeline.run(dec_first()).await.unwrap_err();

        assert!(matches!(err, IngestError::Write(_)));
        assert_eq!(pipeline.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn test_pipeline_runs_once() {
        let mut pipeline = Pipeline::new(
            config(),
            StaticSource::boxed(vec![]),
            Box::new(MemoryTarget::default()),
        );
        pipeline.run(dec_first()).await.unwrap();

        let err = pipeline.run(dec_first()).await.unwrap_err();
        assert!(matches!(err, IngestError::State { .. }));
    }
}
