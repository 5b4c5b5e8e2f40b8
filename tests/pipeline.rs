//! End-to-end tests of the three stages wired together through their triggers.
//!
//! Rasterizer, extractor and speech engine are fakes; stores and the
//! notification channel are the in-memory implementations.

use async_trait::async_trait;
use bytes::Bytes;
use edgequake_doc2voice::{
    download_location, list_requests, submit_document, ArtifactStore, ChannelSink, FailureReason,
    HandoffPayload, ItemError, JobEngine, JobHandle, JobStatus, MemoryStatusStore,
    ObjectStoreArtifacts, PageRange, PageRasterizer, Pipeline, PipelineConfig, PipelineError,
    SpeechRequest, StageContext, StageOutcome, StatusStore, SubmissionRequest, TaskStatus,
    TextExtractor, TriggerEvent,
};
use edgequake_doc2voice::pipeline::combine::parse_manifest;
use edgequake_doc2voice::pipeline::render::RenderedPage;
use edgequake_doc2voice::store::{Notification, PAGES_READY_TOPIC};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

struct FakeRasterizer {
    total: u32,
}

#[async_trait]
impl PageRasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        _source_key: &str,
        _document: Bytes,
        range: PageRange,
    ) -> Result<Vec<RenderedPage>, PipelineError> {
        let (present, beyond) = range.clip(self.total);
        let mut pages: Vec<RenderedPage> = present
            .map(|page| RenderedPage {
                page,
                png: Ok(vec![page as u8]),
            })
            .collect();
        pages.extend(beyond.map(|range| RenderedPage::beyond_end(range, self.total)));
        Ok(pages)
    }
}

struct FakeExtractor;

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, page: u32, png: &[u8]) -> Result<String, ItemError> {
        assert_eq!(png, [page as u8]);
        Ok(format!("Page {page} says hello."))
    }
}

/// Speech engine whose jobs finish on the first poll, writing the chunk text
/// as the "audio".
struct FakeSpeech {
    store: Arc<dyn ArtifactStore>,
    jobs: Mutex<HashMap<String, SpeechRequest>>,
}

#[async_trait]
impl JobEngine for FakeSpeech {
    type Input = SpeechRequest;

    async fn submit(&self, request: &SpeechRequest) -> Result<JobHandle, PipelineError> {
        let id = format!("tts{}", request.index);
        self.jobs.lock().unwrap().insert(id.clone(), request.clone());
        Ok(JobHandle(id))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, PipelineError> {
        let request = self.jobs.lock().unwrap()[&handle.0].clone();
        let key = format!(
            "download/{}/chunk_{}_{}.mp3",
            request.reference_key, request.index, handle
        );
        self.store
            .put(&key, Bytes::from(request.text), "audio/mpeg")
            .await?;
        Ok(JobStatus::Succeeded { output: key })
    }
}

struct Env {
    pipeline: Pipeline,
    artifacts: Arc<ObjectStoreArtifacts>,
    status: Arc<MemoryStatusStore>,
    config: Arc<PipelineConfig>,
    notifications: UnboundedReceiver<Notification>,
}

fn setup(total_pages: u32, config: PipelineConfig) -> Env {
    let artifacts = Arc::new(ObjectStoreArtifacts::in_memory());
    let status = Arc::new(MemoryStatusStore::new());
    let config = Arc::new(config);
    let (sink, notifications) = ChannelSink::new();
    let ctx = StageContext {
        artifacts: artifacts.clone(),
        status: status.clone(),
        notifier: Arc::new(sink),
        config: config.clone(),
    };
    let speech = FakeSpeech {
        store: artifacts.clone(),
        jobs: Mutex::new(HashMap::new()),
    };
    Env {
        pipeline: Pipeline::new(
            ctx,
            Arc::new(FakeRasterizer { total: total_pages }),
            Arc::new(FakeExtractor),
            Arc::new(speech),
        ),
        artifacts,
        status,
        config,
        notifications,
    }
}

async fn submit(env: &Env, start: u32, end: u32) -> String {
    submit_document(
        env.artifacts.as_ref(),
        env.status.as_ref(),
        &env.config,
        SubmissionRequest {
            file_name: "talk.pdf".into(),
            bytes: Bytes::from_static(b"%PDF-1.7"),
            language: "english".into(),
            start_page: start,
            end_page: end,
            owner: "sam@example.com".into(),
            display_name: "Talk".into(),
        },
    )
    .await
    .unwrap()
}

async fn status_of(env: &Env, reference_key: &str) -> TaskStatus {
    env.status.get(reference_key).await.unwrap().unwrap().status
}

#[tokio::test]
async fn document_becomes_audio() {
    let mut env = setup(3, PipelineConfig::default());
    let key = submit(&env, 1, 3).await;

    let reports = env
        .pipeline
        .run_to_completion(&key, &mut env.notifications)
        .await
        .unwrap();

    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.succeeded()), "{reports:?}");
    assert_eq!(status_of(&env, &key).await, TaskStatus::SynthesizeOk);

    let audio_key = download_location(env.artifacts.as_ref(), &env.config, &key)
        .await
        .unwrap();
    assert_eq!(audio_key, format!("download/{key}/Audio.mp3"));
    let audio = env.artifacts.get(&audio_key).await.unwrap();
    assert_eq!(
        audio,
        Bytes::from("Page 1 says hello. Page 2 says hello. Page 3 says hello.")
    );

    let rows = list_requests(env.status.as_ref(), "sam@example.com").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "Voice-is-Ready");
}

#[tokio::test]
async fn long_text_becomes_an_ordered_manifest() {
    let config = PipelineConfig::builder().chunk_limit(20).build().unwrap();
    let mut env = setup(4, config);
    let key = submit(&env, 1, 4).await;

    let reports = env
        .pipeline
        .run_to_completion(&key, &mut env.notifications)
        .await
        .unwrap();
    assert!(reports.iter().all(|r| r.succeeded()));

    let manifest_key = download_location(env.artifacts.as_ref(), &env.config, &key)
        .await
        .unwrap();
    assert_eq!(manifest_key, format!("download/{key}/Audio.manifest"));
    let body = env.artifacts.get(&manifest_key).await.unwrap();
    let parts = parse_manifest(std::str::from_utf8(&body).unwrap());
    assert_eq!(parts.len(), 4);

    let mut narrated = Vec::new();
    for part in &parts {
        let bytes = env.artifacts.get(part).await.unwrap();
        narrated.push(String::from_utf8(bytes.to_vec()).unwrap());
    }
    assert_eq!(
        narrated,
        vec![
            "Page 1 says hello.",
            "Page 2 says hello.",
            "Page 3 says hello.",
            "Page 4 says hello.",
        ]
    );
}

#[tokio::test]
async fn pages_past_the_end_stop_the_chain() {
    let mut env = setup(2, PipelineConfig::default());
    let key = submit(&env, 5, 8).await;

    let reports = env
        .pipeline
        .run_to_completion(&key, &mut env.notifications)
        .await
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert!(matches!(reports[0].outcome, StageOutcome::Failed(_)));
    let record = env.status.get(&key).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::RasterizeFailed);
    assert_eq!(record.failure_reason, Some(FailureReason::NoInputs));

    let rows = list_requests(env.status.as_ref(), "sam@example.com").await.unwrap();
    assert_eq!(rows[0].status, "Failed");
}

#[tokio::test]
async fn early_notification_is_an_integrity_fault() {
    let env = setup(2, PipelineConfig::default());
    let key = submit(&env, 1, 2).await;

    let event = TriggerEvent::Notification {
        topic: PAGES_READY_TOPIC.into(),
        message: HandoffPayload {
            reference_key: key.clone(),
            storage_location: format!("images/{key}/"),
            artifacts: vec![],
        },
    };
    let report = env.pipeline.dispatch(&event).await.unwrap();

    assert!(matches!(report.outcome, StageOutcome::Rejected(_)));
    assert_eq!(report.status_written, None);
    assert_eq!(status_of(&env, &key).await, TaskStatus::Submitted);
}

#[tokio::test]
async fn redelivered_triggers_write_nothing() {
    let mut env = setup(1, PipelineConfig::default());
    let key = submit(&env, 1, 1).await;
    env.pipeline
        .run_to_completion(&key, &mut env.notifications)
        .await
        .unwrap();

    // The last stage sees its own outcome again.
    let created = TriggerEvent::ObjectCreated {
        key: format!("download/{key}/formatted_output.txt"),
    };
    let report = env.pipeline.dispatch(&created).await.unwrap();
    assert_eq!(report.outcome, StageOutcome::Duplicate);
    assert_eq!(report.status_written, None);

    // The first stage finds the task two stages further on.
    let mut inserted = env.status.get(&key).await.unwrap().unwrap();
    inserted.status = TaskStatus::Submitted;
    let report = env
        .pipeline
        .dispatch(&TriggerEvent::StatusInserted { record: inserted })
        .await
        .unwrap();
    assert!(matches!(report.outcome, StageOutcome::Rejected(_)));
    assert_eq!(report.status_written, None);

    assert_eq!(status_of(&env, &key).await, TaskStatus::SynthesizeOk);
}

#[tokio::test]
async fn unroutable_event_reaches_no_stage() {
    let env = setup(1, PipelineConfig::default());
    let event = TriggerEvent::ObjectCreated {
        key: "download/x/Audio.mp3".into(),
    };
    assert!(matches!(
        env.pipeline.dispatch(&event).await,
        Err(PipelineError::MalformedTrigger { .. })
    ));
}
