//! # edgequake-doc2voice
//!
//! Turn an uploaded document into narrated audio through a chain of
//! independently triggered stages.
//!
//! ## Pipeline Overview
//!
//! ```text
//! submit ──▶ [Submitted]
//!              │  status-inserted event
//!              ├─ 1. Rasterize   pdfium renders the page range to PNGs
//!              │  pages-ready notification
//!              ├─ 2. Extract     a vision LLM reads each page; text joined in page order
//!              │  text object created
//!              └─ 3. Synthesize  text split into chunks, one supervised speech job per
//!                                chunk, results combined in chunk order
//! ```
//!
//! Stages never call each other. Each runner reads the task record, checks
//! that its predecessor succeeded, does its work, writes exactly one of its
//! own statuses and signals the next stage. One bad page or chunk is skipped
//! and recorded; a stage fails only when nothing at all could be produced.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_doc2voice::{
//!     submit_document, ChannelSink, CommandSpeechEngine, MemoryStatusStore,
//!     ObjectStoreArtifacts, PdfiumRasterizer, Pipeline, PipelineConfig,
//!     StageContext, SubmissionRequest, VisionTextExtractor,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(PipelineConfig::default());
//!     let artifacts = Arc::new(ObjectStoreArtifacts::in_memory());
//!     let status = Arc::new(MemoryStatusStore::new());
//!     let (sink, mut notifications) = ChannelSink::new();
//!
//!     let reference_key = submit_document(
//!         artifacts.as_ref(),
//!         status.as_ref(),
//!         &config,
//!         SubmissionRequest {
//!             file_name: "lecture.pdf".into(),
//!             bytes: std::fs::read("lecture.pdf")?.into(),
//!             language: "english".into(),
//!             start_page: 1,
//!             end_page: 10,
//!             owner: "me@example.com".into(),
//!             display_name: String::new(),
//!         },
//!     )
//!     .await?;
//!
//!     let ctx = StageContext {
//!         artifacts: artifacts.clone(),
//!         status,
//!         notifier: Arc::new(sink),
//!         config: config.clone(),
//!     };
//!     let pipeline = Pipeline::new(
//!         ctx,
//!         Arc::new(PdfiumRasterizer::new(&config)),
//!         Arc::new(VisionTextExtractor::from_config(&config)?),
//!         Arc::new(CommandSpeechEngine::new(
//!             "espeak-ng",
//!             vec!["-v".into(), "{language}".into(), "-f".into(), "{input}".into(),
//!                  "-w".into(), "{output}".into()],
//!             "wav",
//!             artifacts,
//!         )),
//!     );
//!     for report in pipeline.run_to_completion(&reference_key, &mut notifications).await? {
//!         eprintln!("{}: {:?}", report.stage, report.outcome);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2voice` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod build;
pub mod config;
pub mod driver;
pub mod error;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod stage;
pub mod store;
pub mod submit;
pub mod task;
pub mod trigger;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use build::{supervise_build, BuildReport};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use driver::Pipeline;
pub use error::{ItemError, PipelineError};
pub use output::{HandoffPayload, RequestSummary, SkippedItem, StageOutcome, StageReport};
pub use pipeline::chunk::split_text;
pub use pipeline::combine::ArtifactCombiner;
pub use pipeline::llm::{TextExtractor, VisionTextExtractor};
pub use pipeline::process::{BuildCommand, CommandBuildEngine, CommandSpeechEngine, SpeechRequest};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use pipeline::retry::{RetryOutcome, RetryingSubmitter};
pub use pipeline::status::{Stage, TaskStatus};
pub use pipeline::supervise::{JobEngine, JobHandle, JobOutcome, JobStatus, JobSupervisor, SupervisionPolicy};
pub use stage::{StageContext, StageRunner};
pub use store::{
    ArtifactStore, ChannelSink, FileStatusStore, LogSink, MemoryStatusStore, NotificationSink,
    ObjectStoreArtifacts, StatusStore,
};
pub use submit::{download_location, list_requests, submit_document, SubmissionRequest};
pub use task::{FailureReason, PageRange, TaskRecord};
pub use trigger::{route, TriggerEvent};
