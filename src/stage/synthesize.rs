//! Stage 3: narrate the extracted text.
//!
//! The text is split into word-preserving chunks under the configured
//! limit. Each chunk becomes one speech job, supervised under the speech
//! policy; the produced chunk artifacts are then combined in chunk-index
//! order, regardless of which job finished first.

use super::{StageContext, StageFailure, StageRunner};
use crate::error::{ItemError, PipelineError};
use crate::layout;
use crate::output::{HandoffPayload, StageReport};
use crate::pipeline::chunk::split_text;
use crate::pipeline::combine::{ArtifactCombiner, ChunkArtifact};
use crate::pipeline::process::SpeechRequest;
use crate::pipeline::status::Stage;
use crate::pipeline::supervise::{JobEngine, JobOutcome, JobSupervisor};
use crate::pipeline::voice::{voice_for, Voice};
use crate::task::{FailureReason, TaskRecord};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::info;

pub type SpeechEngine = dyn JobEngine<Input = SpeechRequest>;

pub struct SynthesizeRunner {
    ctx: StageContext,
    engine: Arc<SpeechEngine>,
}

impl SynthesizeRunner {
    pub fn new(ctx: StageContext, engine: Arc<SpeechEngine>) -> Self {
        Self { ctx, engine }
    }

    async fn narrate(
        &self,
        supervisor: &JobSupervisor,
        request: SpeechRequest,
    ) -> Result<ChunkArtifact, ItemError> {
        let index = request.index;
        let handle = self
            .engine
            .submit(&request)
            .await
            .map_err(|e| ItemError::JobFailed {
                index,
                reason: e.to_string(),
            })?;
        match supervisor.await_job(self.engine.as_ref(), &handle).await {
            JobOutcome::Succeeded(key) => Ok(ChunkArtifact { index, key }),
            JobOutcome::Failed(reason) => Err(ItemError::JobFailed { index, reason }),
            JobOutcome::TimedOut => Err(ItemError::JobTimedOut {
                index,
                secs: self.ctx.config.speech_deadline.as_secs(),
            }),
        }
    }

    async fn load_text(&self, reference_key: &str) -> Result<String, StageFailure> {
        let key = layout::text_key(reference_key);
        let body = self.ctx.artifacts.get(&key).await.map_err(|e| match e {
            PipelineError::ArtifactNotFound { .. } => {
                StageFailure::new(FailureReason::NoInputs, format!("'{key}' is missing"))
            }
            other => StageFailure::from(other),
        })?;
        String::from_utf8(body.to_vec()).map_err(|e| {
            StageFailure::new(FailureReason::InputFault, format!("'{key}' is not UTF-8: {e}"))
        })
    }
}

#[async_trait]
impl StageRunner for SynthesizeRunner {
    fn stage(&self) -> Stage {
        Stage::Synthesize
    }

    fn context(&self) -> &StageContext {
        &self.ctx
    }

    async fn work(
        &self,
        record: &TaskRecord,
        report: &mut StageReport,
    ) -> Result<HandoffPayload, StageFailure> {
        let reference_key = &record.reference_key;
        let config = &self.ctx.config;
        let voice: Voice = voice_for(&record.language)?;
        let text = self.load_text(reference_key).await?;

        let chunks = split_text(&text, config.chunk_limit);
        if chunks.is_empty() {
            return Err(StageFailure::new(
                FailureReason::NoInputs,
                "extracted text is empty",
            ));
        }
        info!(
            "{}: narrating {} chars in {} chunk(s) with {}",
            reference_key,
            text.chars().count(),
            chunks.len(),
            voice.voice_id
        );

        let supervisor = JobSupervisor::new(config.speech_policy());
        let requests = chunks.into_iter().enumerate().map(|(index, text)| SpeechRequest {
            reference_key: reference_key.clone(),
            index,
            text,
            voice,
        });
        let mut results: Vec<(usize, Result<ChunkArtifact, ItemError>)> = stream::iter(requests)
            .map(|request| {
                let supervisor = &supervisor;
                async move { (request.index, self.narrate(supervisor, request).await) }
            })
            .buffer_unordered(config.synthesis_concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let total = results.len();
        let mut produced = Vec::with_capacity(total);
        for (index, result) in results {
            match result {
                Ok(artifact) => produced.push(artifact),
                Err(e) => super::skip(report, format!("chunk_{index}"), e),
            }
        }

        if produced.is_empty() {
            return Err(StageFailure::new(
                FailureReason::ExternalJob,
                format!("all {total} speech jobs failed"),
            ));
        }
        if produced.len() < total && !config.allow_partial_audio {
            return Err(StageFailure::new(
                FailureReason::ExternalJob,
                format!("{} of {total} speech jobs failed", total - produced.len()),
            ));
        }

        let combiner = ArtifactCombiner::new(self.ctx.artifacts.clone(), config.audio_extension.clone());
        let combined = combiner.combine(reference_key, produced).await?;
        report.processed = combined.parts;
        report.cleanup_warnings.extend(combined.cleanup_warnings);

        Ok(HandoffPayload {
            reference_key: reference_key.clone(),
            storage_location: layout::download_prefix(reference_key),
            artifacts: vec![combined.final_key],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::output::StageOutcome;
    use crate::pipeline::combine::parse_manifest;
    use crate::pipeline::status::TaskStatus;
    use crate::pipeline::supervise::{JobHandle, JobStatus};
    use crate::stage::testing::{harness, record, status_of, Harness};
    use crate::store::{ArtifactStore, StatusStore};
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Finishes chunk `i` after `delays[i]`, writing the chunk text as audio.
    /// Chunks listed in `failing` fail; chunks in `hanging` never finish.
    struct FakeSpeech {
        store: Arc<dyn ArtifactStore>,
        delays: Vec<Duration>,
        failing: Vec<usize>,
        hanging: Vec<usize>,
        jobs: Mutex<HashMap<String, (SpeechRequest, Instant)>>,
    }

    impl FakeSpeech {
        fn new(store: Arc<dyn ArtifactStore>, delays: Vec<Duration>) -> Self {
            Self {
                store,
                delays,
                failing: vec![],
                hanging: vec![],
                jobs: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl JobEngine for FakeSpeech {
        type Input = SpeechRequest;

        async fn submit(&self, request: &SpeechRequest) -> Result<JobHandle, PipelineError> {
            let id = format!("job{}", request.index);
            self.jobs
                .lock()
                .unwrap()
                .insert(id.clone(), (request.clone(), Instant::now()));
            Ok(JobHandle(id))
        }

        async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, PipelineError> {
            let (request, started) = self.jobs.lock().unwrap()[&handle.0].clone();
            let i = request.index;
            if self.hanging.contains(&i) || started.elapsed() < self.delays[i] {
                return Ok(JobStatus::Pending);
            }
            if self.failing.contains(&i) {
                return Ok(JobStatus::Failed {
                    reason: "voice unavailable".into(),
                });
            }
            let key = format!("{}{}.mp3", layout::chunk_prefix("r", i), handle);
            self.store
                .put(&key, Bytes::from(request.text), "audio/mpeg")
                .await?;
            Ok(JobStatus::Succeeded { output: key })
        }
    }

    async fn setup(text: &str, config: PipelineConfig) -> Harness {
        let h = harness(config);
        h.status
            .insert(record("r", TaskStatus::ExtractOk, (1, 1)))
            .await
            .unwrap();
        h.artifacts
            .put(&layout::text_key("r"), Bytes::from(text.to_string()), "text/plain")
            .await
            .unwrap();
        h
    }

    fn small_chunks() -> PipelineConfig {
        PipelineConfig::builder()
            .chunk_limit(11)
            .synthesis_concurrency(4)
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn single_chunk_lands_on_canonical_key() {
        let h = setup("short text", PipelineConfig::default()).await;
        let engine = FakeSpeech::new(h.artifacts.clone(), vec![Duration::from_secs(12)]);
        let runner = SynthesizeRunner::new(h.ctx.clone(), Arc::new(engine));

        let report = runner.run("r").await;
        assert!(report.succeeded(), "{:?}", report.outcome);
        assert_eq!(status_of(&h, "r").await.status, TaskStatus::SynthesizeOk);
        assert_eq!(
            h.artifacts.get("download/r/Audio.mp3").await.unwrap(),
            Bytes::from("short text")
        );
        assert!(!h.artifacts.exists("download/r/chunk_0_job0.mp3").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn manifest_lists_chunks_in_text_order() {
        // Three chunks; the last one finishes first.
        let h = setup("alpha beta gamma delta omega", small_chunks()).await;
        let delays = vec![
            Duration::from_secs(30),
            Duration::from_secs(20),
            Duration::from_secs(5),
        ];
        let runner = SynthesizeRunner::new(
            h.ctx.clone(),
            Arc::new(FakeSpeech::new(h.artifacts.clone(), delays)),
        );

        let report = runner.run("r").await;
        assert!(report.succeeded(), "{:?}", report.outcome);
        let body = h.artifacts.get("download/r/Audio.manifest").await.unwrap();
        let keys = parse_manifest(std::str::from_utf8(&body).unwrap());
        assert_eq!(
            keys,
            vec![
                "download/r/chunk_0_job0.mp3",
                "download/r/chunk_1_job1.mp3",
                "download/r/chunk_2_job2.mp3",
            ]
        );
        assert_eq!(
            h.artifacts.get(&keys[0]).await.unwrap(),
            Bytes::from("alpha beta")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_chunk_times_out_and_rest_is_kept() {
        let h = setup("alpha beta gamma delta omega", small_chunks()).await;
        let mut engine = FakeSpeech::new(h.artifacts.clone(), vec![Duration::ZERO; 3]);
        engine.hanging = vec![1];
        let runner = SynthesizeRunner::new(h.ctx.clone(), Arc::new(engine));

        let report = runner.run("r").await;
        assert!(report.succeeded());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(
            report.skipped[0].error,
            ItemError::JobTimedOut { index: 1, secs: 300 }
        );
        assert_eq!(report.processed.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_audio_can_be_refused() {
        let config = PipelineConfig::builder()
            .chunk_limit(11)
            .allow_partial_audio(false)
            .build()
            .unwrap();
        let h = setup("alpha beta gamma delta", config).await;
        let mut engine = FakeSpeech::new(h.artifacts.clone(), vec![Duration::ZERO; 2]);
        engine.failing = vec![0];
        let runner = SynthesizeRunner::new(h.ctx.clone(), Arc::new(engine));

        let report = runner.run("r").await;
        assert!(matches!(report.outcome, StageOutcome::Failed(_)));
        let rec = status_of(&h, "r").await;
        assert_eq!(rec.status, TaskStatus::SynthesizeFailed);
        assert_eq!(rec.failure_reason, Some(FailureReason::ExternalJob));
    }

    #[tokio::test]
    async fn unsupported_language_is_an_input_fault() {
        let h = harness(PipelineConfig::default());
        let mut rec = record("r", TaskStatus::ExtractOk, (1, 1));
        rec.language = "klingon".into();
        h.status.insert(rec).await.unwrap();
        let runner = SynthesizeRunner::new(
            h.ctx.clone(),
            Arc::new(FakeSpeech::new(h.artifacts.clone(), vec![])),
        );

        runner.run("r").await;
        let rec = status_of(&h, "r").await;
        assert_eq!(rec.status, TaskStatus::SynthesizeFailed);
        assert_eq!(rec.failure_reason, Some(FailureReason::InputFault));
    }

    #[tokio::test]
    async fn empty_text_is_no_inputs() {
        let h = setup("   \n ", PipelineConfig::default()).await;
        let runner = SynthesizeRunner::new(
            h.ctx.clone(),
            Arc::new(FakeSpeech::new(h.artifacts.clone(), vec![])),
        );
        runner.run("r").await;
        assert_eq!(
            status_of(&h, "r").await.failure_reason,
            Some(FailureReason::NoInputs)
        );
    }
}
