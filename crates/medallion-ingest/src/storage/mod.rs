//! Object storage backends
//!
//! Targets only ever create objects: there is no overwrite, delete or read
//! path. `list` exists so reruns and tests can see what a partition holds.

pub mod local;
pub mod s3;

pub use local::LocalStore;
pub use s3::S3Store;

use crate::config::{StorageProvider, TargetConfig};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fully qualified URI of `key`, e.g. `gs://bucket/raw/users/dt=2024-12-01/x.parquet`
    fn uri(&self, key: &str) -> String;

    /// Create the object `key`. Fails with `Write` on any storage error.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()>;

    /// Keys below `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Build the backend for the configured provider
pub async fn from_target_config(config: &TargetConfig) -> Result<Arc<dyn ObjectStore>> {
    Ok(match config.provider {
        StorageProvider::Local => Arc::new(LocalStore::from_target_config(config)?),
        StorageProvider::Gcs | StorageProvider::S3 => {
            Arc::new(S3Store::from_target_config(config).await?)
        },
    })
}
