//! Artifact storage: blobs addressed by hierarchical string keys.
//!
//! Stages depend only on the [`ArtifactStore`] trait. The provided
//! implementation, [`ObjectStoreArtifacts`], adapts any
//! [`object_store::ObjectStore`], so the same pipeline runs against memory in
//! tests, a local directory from the CLI, or S3 in production.

use crate::error::PipelineError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use std::sync::Arc;
use tracing::debug;

/// Blob storage used by every stage.
///
/// Prefixes passed to [`ArtifactStore::list`] are directory prefixes such as
/// `images/{ref}/`. Each key is atomic on its own; nothing is transactional
/// across keys.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Read a whole artifact. Missing keys yield [`PipelineError::ArtifactNotFound`].
    async fn get(&self, key: &str) -> Result<Bytes, PipelineError>;

    /// Write (or overwrite) an artifact.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), PipelineError>;

    /// List every key under `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, PipelineError>;

    /// Copy `from` to `to`, overwriting `to`.
    async fn copy(&self, from: &str, to: &str) -> Result<(), PipelineError>;

    /// Delete `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), PipelineError>;

    async fn exists(&self, key: &str) -> Result<bool, PipelineError>;
}

/// [`ArtifactStore`] over an [`object_store::ObjectStore`].
#[derive(Debug, Clone)]
pub struct ObjectStoreArtifacts {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectStoreArtifacts {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Store artifacts as files below `root`, creating it if needed.
    pub fn local(root: &std::path::Path) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(root)
            .map_err(|e| PipelineError::storage(root.display().to_string(), e))?;
        let fs = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| PipelineError::storage(root.display().to_string(), e))?;
        Ok(Self::new(Arc::new(fs)))
    }
}

fn not_found_or(key: &str, err: object_store::Error) -> PipelineError {
    match err {
        object_store::Error::NotFound { .. } => PipelineError::ArtifactNotFound {
            key: key.to_string(),
        },
        other => PipelineError::storage(key, other),
    }
}

#[async_trait]
impl ArtifactStore for ObjectStoreArtifacts {
    async fn get(&self, key: &str) -> Result<Bytes, PipelineError> {
        let result = self
            .inner
            .get(&Path::from(key))
            .await
            .map_err(|e| not_found_or(key, e))?;
        result.bytes().await.map_err(|e| not_found_or(key, e))
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), PipelineError> {
        let path = Path::from(key);
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        match self
            .inner
            .put_opts(&path, PutPayload::from(data.clone()), opts)
            .await
        {
            Ok(_) => Ok(()),
            // Local filesystems cannot carry object attributes.
            Err(object_store::Error::NotImplemented) => {
                debug!("Store does not keep content types; writing '{}' without one", key);
                self.inner
                    .put(&path, PutPayload::from(data))
                    .await
                    .map(|_| ())
                    .map_err(|e| PipelineError::storage(key, e))
            }
            Err(e) => Err(PipelineError::storage(key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, PipelineError> {
        let prefix_path = Path::from(prefix);
        let metas: Vec<_> = self
            .inner
            .list(Some(&prefix_path))
            .try_collect()
            .await
            .map_err(|e| PipelineError::storage(prefix, e))?;
        let mut keys: Vec<String> = metas.into_iter().map(|m| m.location.to_string()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), PipelineError> {
        self.inner
            .copy(&Path::from(from), &Path::from(to))
            .await
            .map_err(|e| not_found_or(from, e))
    }

    async fn delete(&self, key: &str) -> Result<(), PipelineError> {
        match self.inner.delete(&Path::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(PipelineError::storage(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, PipelineError> {
        match self.inner.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(PipelineError::storage(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_list_copy_delete() {
        let store = ObjectStoreArtifacts::in_memory();
        store
            .put("images/r/page_2.png", Bytes::from_static(b"two"), "image/png")
            .await
            .unwrap();
        store
            .put("images/r/page_10.png", Bytes::from_static(b"ten"), "image/png")
            .await
            .unwrap();
        store
            .put("images/other/page_1.png", Bytes::from_static(b"x"), "image/png")
            .await
            .unwrap();

        let keys = store.list("images/r/").await.unwrap();
        assert_eq!(keys, vec!["images/r/page_10.png", "images/r/page_2.png"]);

        store.copy("images/r/page_2.png", "download/r/copy.png").await.unwrap();
        assert_eq!(
            store.get("download/r/copy.png").await.unwrap(),
            Bytes::from_static(b"two")
        );

        store.delete("images/r/page_2.png").await.unwrap();
        assert!(!store.exists("images/r/page_2.png").await.unwrap());
        store.delete("images/r/page_2.png").await.unwrap();
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = ObjectStoreArtifacts::in_memory();
        assert!(matches!(
            store.get("nope").await,
            Err(PipelineError::ArtifactNotFound { .. })
        ));
        assert!(matches!(
            store.copy("nope", "elsewhere").await,
            Err(PipelineError::ArtifactNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn local_directory_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStoreArtifacts::local(dir.path()).unwrap();
        store
            .put("download/r/formatted_output.txt", Bytes::from_static(b"hi"), "text/plain")
            .await
            .unwrap();
        assert_eq!(
            store.list("download/r/").await.unwrap(),
            vec!["download/r/formatted_output.txt"]
        );
        assert!(dir.path().join("download/r/formatted_output.txt").exists());
    }
}
