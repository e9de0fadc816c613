use super::ObjectStore;
use crate::config::TargetConfig;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Filesystem-backed store. Objects live at `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    bucket: String,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>, bucket: impl Into<String>) -> Result<Self> {
        let root = std::path::absolute(root.as_ref()).map_err(|e| {
            IngestError::config(format!(
                "cannot resolve local root {}: {e}",
                root.as_ref().display()
            ))
        })?;

        Ok(Self {
            root,
            bucket: bucket.into(),
        })
    }

    pub fn from_target_config(config: &TargetConfig) -> Result<Self> {
        let root = config
            .local_root
            .as_ref()
            .ok_or_else(|| IngestError::config("target.local_root is required for the local provider"))?;
        Self::new(root, config.bucket.clone())
    }

    /// Filesystem path of `key`
    pub fn path_of(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.join(&self.bucket), |path, segment| path.join(segment))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn uri(&self, key: &str) -> String {
        format!("file://{}", self.path_of(key).display())
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                IngestError::write(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    IngestError::write(format!("refusing to overwrite {}", path.display()))
                },
                _ => IngestError::write(format!("cannot create {}: {e}", path.display())),
            })?;

        file.write_all(&data)
            .await
            .map_err(|e| IngestError::write(format!("cannot write {}: {e}", path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| IngestError::write(format!("cannot sync {}: {e}", path.display())))?;

        info!(path = %path.display(), "Object written");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.root.join(&self.bucket);
        let mut keys = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(IngestError::write(format!(
                        "cannot list {}: {e}",
                        dir.display()
                    )))
                },
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| IngestError::write(format!("cannot list {}: {e}", dir.display())))?
            {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&base) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        debug!(prefix, count = keys.len(), "Listed local objects");
        Ok(keys)
    }
}
