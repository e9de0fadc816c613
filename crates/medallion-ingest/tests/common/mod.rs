//! Shared fixtures for ingestion integration tests
//!
//! Pipelines under test write through the local provider into a temporary
//! lake directory, so partition layout can be checked on disk.

#![allow(dead_code)]

use arrow::record_batch::RecordBatch;
use medallion_ingest::PipelineConfig;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const BUCKET: &str = "b";
pub const TARGET_PATH: &str = "raw/users";

/// 3 rows created on 2024-12-01, 2 on 2024-12-02
pub const USERS_CSV: &str = "\
id,email,score,active,created_at,updated_at
1,ann@example.com,4.5,true,2024-12-01 08:00:00,2024-12-01 08:00:00
2,bob@example.com,3,false,2024-12-01 12:30:15,
3,cid@example.com,5,true,2024-12-01T23:59:59,2024-12-02 00:10:00
4,dan@example.com,2.5,false,2024-12-02 00:00:00,
5,eve@example.com,1,true,2024-12-02 09:45:00,
";

/// Temporary workspace holding the source file and the lake
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn write_csv(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("Failed to write CSV fixture");
        path
    }

    pub fn lake_root(&self) -> PathBuf {
        self.dir.path().join("lake")
    }

    /// Directory of one partition inside the lake
    pub fn partition_dir(&self, segment: &str) -> PathBuf {
        self.lake_root().join(BUCKET).join(TARGET_PATH).join(segment)
    }

    /// Files of a partition, sorted by name
    pub fn partition_files(&self, segment: &str) -> Vec<PathBuf> {
        let dir = self.partition_dir(segment);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .map(|entry| entry.expect("Failed to read dir entry").path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        files
    }

    /// YAML for a CSV pipeline writing into the local lake
    pub fn csv_yaml(&self, csv: &Path, file_format: &str, extra_source: &str) -> String {
        format!(
            "source:\n  type: csv\n  file_path: '{}'\n  date_column: created_at\n{extra_source}\
             target:\n  bucket: {BUCKET}\n  path: {TARGET_PATH}\n  file_format: {file_format}\n  \
             provider: local\n  local_root: '{}'\n",
            csv.display(),
            self.lake_root().display()
        )
    }

    pub fn csv_config(&self, csv: &Path, file_format: &str, extra_source: &str) -> PipelineConfig {
        PipelineConfig::from_yaml_str(&self.csv_yaml(csv, file_format, extra_source), |_| None)
            .expect("Test config should be valid")
    }

    /// Write a config file next to the fixtures and return its path
    pub fn write_config(&self, yaml: &str) -> PathBuf {
        let path = self.dir.path().join("pipeline_config.yaml");
        std::fs::write(&path, yaml).expect("Failed to write config");
        path
    }
}

/// All record batches of a Parquet file
pub fn read_parquet(path: &Path) -> Vec<RecordBatch> {
    let file = File::open(path).expect("Failed to open parquet file");
    ParquetRecordBatchReaderBuilder::try_new(file)
        .expect("Invalid parquet file")
        .build()
        .expect("Failed to build parquet reader")
        .map(|batch| batch.expect("Failed to read batch"))
        .collect()
}

pub fn parquet_row_count(path: &Path) -> usize {
    read_parquet(path).iter().map(RecordBatch::num_rows).sum()
}
