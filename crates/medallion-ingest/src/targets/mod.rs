//! Target adapters
//!
//! A target consumes the normalized record stream of one partition and
//! persists it as a single new object below the partition prefix.

pub mod format;
pub mod object_store;

pub use format::{encoder_for, FileEncoder, JsonlEncoder, ParquetEncoder};
pub use object_store::ObjectStoreTarget;

use crate::partition::Partition;
use crate::error::Result;
use crate::sources::RecordStream;
use async_trait::async_trait;
use serde::Serialize;

/// Outcome of one successful write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    pub file_uri: String,
    pub row_count: u64,
    pub size_bytes: u64,
    pub sha256: String,
}

#[async_trait]
pub trait Target: Send + Sync {
    /// Partition prefix URI, with trailing slash
    fn destination_path(&self, partition: &Partition) -> String;

    /// Encode `records` and write them as one new object.
    ///
    /// Returns `None` when the stream held no records; nothing is written
    /// in that case.
    async fn write(&self, records: RecordStream, partition: &Partition) -> Result<Option<WriteResult>>;
}
