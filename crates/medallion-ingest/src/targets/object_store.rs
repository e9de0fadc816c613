use super::{encoder_for, Target, WriteResult};
use crate::config::{FileFormat, PipelineConfig};
use crate::error::Result;
use crate::partition::Partition;
use crate::record::ColumnSpec;
use crate::sources::RecordStream;
use crate::storage::{self, ObjectStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use medallion_common::sha256_hex;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Writes each run as one new object under `<path>/<column>=<date>/`.
///
/// Object names carry the write time and a random suffix, so reruns for a
/// partition add files next to earlier ones instead of replacing them.
pub struct ObjectStoreTarget {
    store: Arc<dyn ObjectStore>,
    path: String,
    format: FileFormat,
    declared: Vec<ColumnSpec>,
    batch_size: usize,
}

impl ObjectStoreTarget {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        path: impl Into<String>,
        format: FileFormat,
        declared: Vec<ColumnSpec>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            path: path.into(),
            format,
            declared,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn from_config(config: &PipelineConfig) -> Result<Self> {
        let store = storage::from_target_config(&config.target).await?;
        Ok(Self::new(
            store,
            config.target.path.clone(),
            config.target.file_format,
            config.source.columns().to_vec(),
            config.options.batch_size,
        ))
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    fn object_key(&self, partition: &Partition, written_at: DateTime<Utc>) -> String {
        format!(
            "{}/{}",
            partition.object_prefix(&self.path),
            file_name(written_at, self.format)
        )
    }
}

/// `20241201_083000_1a2b3c4d.parquet`
fn file_name(written_at: DateTime<Utc>, format: FileFormat) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}.{}",
        written_at.format("%Y%m%d_%H%M%S"),
        &suffix[..8],
        format.extension()
    )
}

#[async_trait]
impl Target for ObjectStoreTarget {
    fn destination_path(&self, partition: &Partition) -> String {
        format!("{}/", self.store.uri(&partition.object_prefix(&self.path)))
    }

    #[instrument(skip(self, records), fields(partition = %partition, format = ?self.format))]
    async fn write(
        &self,
        mut records: RecordStream,
        partition: &Partition,
    ) -> Result<Option<WriteResult>> {
        let mut encoder = encoder_for(self.format, &self.declared);
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut row_count: u64 = 0;

        while let Some(record) = records.next().await {
            batch.push(record?);
            if batch.len() == self.batch_size {
                encoder.write_batch(&batch)?;
                row_count += batch.len() as u64;
                debug!(rows = row_count, "Encoded batch");
                batch.clear();
            }
        }
        if !batch.is_empty() {
            encoder.write_batch(&batch)?;
            row_count += batch.len() as u64;
        }

        if row_count == 0 {
            info!("No records to write");
            return Ok(None);
        }

        let data = encoder.finish()?;
        let size_bytes = data.len() as u64;
        let sha256 = sha256_hex(&data);
        let key = self.object_key(partition, Utc::now());

        self.store
            .put(&key, data, self.format.content_type())
            .await?;

        let file_uri = self.store.uri(&key);
        info!(uri = %file_uri, rows = row_count, size_bytes, "Partition file written");

        Ok(Some(WriteResult {
            file_uri,
            row_count,
            size_bytes,
            sha256,
        }))
    }
}
