//! Status store: one task record per reference key.
//!
//! Updates overwrite in place with no compare-and-swap. The single legitimate
//! writer per pipeline step is guaranteed by trigger wiring, not here.

use crate::error::PipelineError;
use crate::pipeline::status::TaskStatus;
use crate::task::{FailureReason, TaskRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, reference_key: &str) -> Result<Option<TaskRecord>, PipelineError>;

    /// Create a record. Fails if the reference key is taken.
    async fn insert(&self, record: TaskRecord) -> Result<(), PipelineError>;

    /// Overwrite the status (and failure reason) of an existing record.
    async fn update_status(
        &self,
        reference_key: &str,
        status: TaskStatus,
        reason: Option<FailureReason>,
    ) -> Result<(), PipelineError>;

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<TaskRecord>, PipelineError>;
}

/// In-process status store.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: RwLock<HashMap<String, TaskRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get(&self, reference_key: &str) -> Result<Option<TaskRecord>, PipelineError> {
        Ok(self.records.read().await.get(reference_key).cloned())
    }

    async fn insert(&self, record: TaskRecord) -> Result<(), PipelineError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.reference_key) {
            return Err(PipelineError::StatusStore(format!(
                "reference key '{}' already exists",
                record.reference_key
            )));
        }
        records.insert(record.reference_key.clone(), record);
        Ok(())
    }

    async fn update_status(
        &self,
        reference_key: &str,
        status: TaskStatus,
        reason: Option<FailureReason>,
    ) -> Result<(), PipelineError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(reference_key)
            .ok_or_else(|| PipelineError::TaskNotFound {
                reference_key: reference_key.to_string(),
            })?;
        record.status = status;
        record.failure_reason = reason;
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<TaskRecord>, PipelineError> {
        let mut found: Vec<TaskRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }
}

/// Status store keeping one JSON document per task in a directory.
///
/// Writes go to a temp file first and are renamed into place, so a reader
/// never sees a half-written record.
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    dir: PathBuf,
}

impl FileStatusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::StatusStore(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    fn record_path(&self, reference_key: &str) -> Result<PathBuf, PipelineError> {
        let valid = !reference_key.is_empty()
            && reference_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PipelineError::StatusStore(format!(
                "invalid reference key '{reference_key}'"
            )));
        }
        Ok(self.dir.join(format!("{reference_key}.json")))
    }

    async fn read(path: &Path) -> Result<Option<TaskRecord>, PipelineError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                PipelineError::StatusStore(format!("corrupt record {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::StatusStore(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn write(path: &Path, record: &TaskRecord) -> Result<(), PipelineError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| PipelineError::StatusStore(format!("serialise record: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| PipelineError::StatusStore(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| PipelineError::StatusStore(format!("rename {}: {e}", path.display())))
    }
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn get(&self, reference_key: &str) -> Result<Option<TaskRecord>, PipelineError> {
        Self::read(&self.record_path(reference_key)?).await
    }

    async fn insert(&self, record: TaskRecord) -> Result<(), PipelineError> {
        let path = self.record_path(&record.reference_key)?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(PipelineError::StatusStore(format!(
                "reference key '{}' already exists",
                record.reference_key
            )));
        }
        Self::write(&path, &record).await?;
        info!("Persisted {} in {}", record.reference_key, self.dir.display());
        Ok(())
    }

    async fn update_status(
        &self,
        reference_key: &str,
        status: TaskStatus,
        reason: Option<FailureReason>,
    ) -> Result<(), PipelineError> {
        let path = self.record_path(reference_key)?;
        let mut record = Self::read(&path)
            .await?
            .ok_or_else(|| PipelineError::TaskNotFound {
                reference_key: reference_key.to_string(),
            })?;
        record.status = status;
        record.failure_reason = reason;
        Self::write(&path, &record).await?;
        debug!("Wrote status {} for {}", status, reference_key);
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<TaskRecord>, PipelineError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| PipelineError::StatusStore(format!("list {}: {e}", self.dir.display())))?;
        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::StatusStore(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = Self::read(&path).await? {
                if record.owner == owner {
                    found.push(record);
                }
            }
        }
        found.sort_by_key(|r| r.created_at);
        Ok(found)
    }
}
