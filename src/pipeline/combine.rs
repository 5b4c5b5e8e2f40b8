//! Recombination of per-chunk artifacts into one canonical output.
//!
//! One chunk is moved to `Audio.{ext}` as is. Several chunks are described
//! by a manifest listing their keys in chunk-index order; byte-level audio
//! concatenation is left to whoever consumes the manifest, so the chunk
//! artifacts themselves stay in place.

use crate::error::PipelineError;
use crate::layout;
use crate::store::ArtifactStore;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One produced chunk artifact and the index of the text chunk it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkArtifact {
    pub index: usize,
    pub key: String,
}

/// Where the combined result ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combined {
    /// The task's canonical output key.
    pub final_key: String,
    /// Chunk keys in index order.
    pub parts: Vec<String>,
    pub cleanup_warnings: Vec<String>,
}

/// Key an artifact was finalised to, plus a note if removing the source failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    pub key: String,
    pub cleanup_warning: Option<String>,
}

pub struct ArtifactCombiner {
    store: Arc<dyn ArtifactStore>,
    extension: String,
}

impl ArtifactCombiner {
    pub fn new(store: Arc<dyn ArtifactStore>, extension: impl Into<String>) -> Self {
        Self {
            store,
            extension: extension.into(),
        }
    }

    /// Combine `parts` (in any order) into the task's canonical output.
    pub async fn combine(
        &self,
        reference_key: &str,
        mut parts: Vec<ChunkArtifact>,
    ) -> Result<Combined, PipelineError> {
        parts.sort_by_key(|p| p.index);
        let keys: Vec<String> = parts.into_iter().map(|p| p.key).collect();

        let finalized = match keys.as_slice() {
            [] => {
                return Err(PipelineError::Internal(format!(
                    "nothing to combine for '{reference_key}'"
                )))
            }
            [only] => {
                let canonical = layout::final_audio_key(reference_key, &self.extension);
                self.finalize(only, &canonical).await?
            }
            _ => {
                let manifest = layout::manifest_key(reference_key);
                let body = render_manifest(&keys);
                self.store
                    .put(&manifest, Bytes::from(body), "text/plain")
                    .await?;
                debug!("Wrote manifest of {} chunks for {}", keys.len(), reference_key);
                let canonical = layout::final_manifest_key(reference_key);
                self.finalize(&manifest, &canonical).await?
            }
        };

        info!("Combined {} chunk(s) for {} into {}", keys.len(), reference_key, finalized.key);
        Ok(Combined {
            final_key: finalized.key,
            parts: keys,
            cleanup_warnings: finalized.cleanup_warning.into_iter().collect(),
        })
    }

    /// Copy `source` to `canonical`, then remove `source`.
    ///
    /// Re-running after a completed finalize returns the canonical key
    /// unchanged. A failed delete of `source` is reported, not raised.
    pub async fn finalize(&self, source: &str, canonical: &str) -> Result<Finalized, PipelineError> {
        if !self.store.exists(source).await? {
            if self.store.exists(canonical).await? {
                debug!("{} already finalised", canonical);
                return Ok(Finalized {
                    key: canonical.to_string(),
                    cleanup_warning: None,
                });
            }
            return Err(PipelineError::ArtifactNotFound {
                key: source.to_string(),
            });
        }

        self.store.copy(source, canonical).await?;
        let cleanup_warning = match self.store.delete(source).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Could not remove intermediate '{}': {}", source, e);
                Some(format!("delete {source}: {e}"))
            }
        };
        Ok(Finalized {
            key: canonical.to_string(),
            cleanup_warning,
        })
    }
}

/// Newline-separated keys, one per chunk.
pub fn render_manifest(keys: &[String]) -> String {
    let mut body = keys.join("\n");
    body.push('\n');
    body
}

pub fn parse_manifest(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectStoreArtifacts;
    use async_trait::async_trait;

    fn chunk(index: usize) -> ChunkArtifact {
        ChunkArtifact {
            index,
            key: format!("download/r/chunk_{index}_job{index}.mp3"),
        }
    }

    async fn seeded(indices: &[usize]) -> Arc<ObjectStoreArtifacts> {
        let store = Arc::new(ObjectStoreArtifacts::in_memory());
        for &i in indices {
            store
                .put(&chunk(i).key, Bytes::from(format!("audio-{i}")), "audio/mpeg")
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn single_chunk_is_moved_to_canonical_key() {
        let store = seeded(&[0]).await;
        let combiner = ArtifactCombiner::new(store.clone(), "mp3");

        let combined = combiner.combine("r", vec![chunk(0)]).await.unwrap();

        assert_eq!(combined.final_key, "download/r/Audio.mp3");
        assert_eq!(
            store.get("download/r/Audio.mp3").await.unwrap(),
            Bytes::from("audio-0")
        );
        assert!(!store.exists(&chunk(0).key).await.unwrap());
        assert!(combined.cleanup_warnings.is_empty());
    }

    #[tokio::test]
    async fn manifest_follows_chunk_index_not_completion_order() {
        let store = seeded(&[0, 1, 2, 3]).await;
        let combiner = ArtifactCombiner::new(store.clone(), "mp3");

        let completed = vec![chunk(2), chunk(0), chunk(3), chunk(1)];
        let combined = combiner.combine("r", completed).await.unwrap();

        assert_eq!(combined.final_key, "download/r/Audio.manifest");
        let body = store.get(&combined.final_key).await.unwrap();
        let listed = parse_manifest(std::str::from_utf8(&body).unwrap());
        let expected: Vec<String> = (0..4).map(|i| chunk(i).key).collect();
        assert_eq!(listed, expected);
        assert_eq!(combined.parts, expected);

        // The intermediate manifest is gone, the chunks it references are not.
        assert!(!store.exists(&layout::manifest_key("r")).await.unwrap());
        for i in 0..4 {
            assert!(store.exists(&chunk(i).key).await.unwrap());
        }
    }

    #[tokio::test]
    async fn finalize_is_idempotent() {
        let store = seeded(&[0]).await;
        let combiner = ArtifactCombiner::new(store.clone(), "mp3");
        let first = combiner
            .finalize(&chunk(0).key, "download/r/Audio.mp3")
            .await
            .unwrap();
        let second = combiner
            .finalize(&chunk(0).key, "download/r/Audio.mp3")
            .await
            .unwrap();
        assert_eq!(first.key, second.key);
        assert_eq!(
            store.get("download/r/Audio.mp3").await.unwrap(),
            Bytes::from("audio-0")
        );
    }

    #[tokio::test]
    async fn finalize_without_source_or_result_is_not_found() {
        let store = seeded(&[]).await;
        let combiner = ArtifactCombiner::new(store, "mp3");
        assert!(matches!(
            combiner.finalize("download/r/x.mp3", "download/r/Audio.mp3").await,
            Err(PipelineError::ArtifactNotFound { .. })
        ));
    }

    /// Store whose deletes always fail.
    struct StickyStore(ObjectStoreArtifacts);

    #[async_trait]
    impl ArtifactStore for StickyStore {
        async fn get(&self, key: &str) -> Result<Bytes, PipelineError> {
            self.0.get(key).await
        }
        async fn put(&self, key: &str, data: Bytes, ct: &str) -> Result<(), PipelineError> {
            self.0.put(key, data, ct).await
        }
        async fn list(&self, prefix: &str) -> Result<Vec<String>, PipelineError> {
            self.0.list(prefix).await
        }
        async fn copy(&self, from: &str, to: &str) -> Result<(), PipelineError> {
            self.0.copy(from, to).await
        }
        async fn delete(&self, key: &str) -> Result<(), PipelineError> {
            Err(PipelineError::storage(key, "permission denied"))
        }
        async fn exists(&self, key: &str) -> Result<bool, PipelineError> {
            self.0.exists(key).await
        }
    }

    #[tokio::test]
    async fn failed_cleanup_is_a_warning_not_an_error() {
        let inner = ObjectStoreArtifacts::in_memory();
        inner
            .put(&chunk(0).key, Bytes::from_static(b"a"), "audio/mpeg")
            .await
            .unwrap();
        let combiner = ArtifactCombiner::new(Arc::new(StickyStore(inner)), "mp3");
        let combined = combiner.combine("r", vec![chunk(0)]).await.unwrap();
        assert_eq!(combined.final_key, "download/r/Audio.mp3");
        assert_eq!(combined.cleanup_warnings.len(), 1);
    }
}
