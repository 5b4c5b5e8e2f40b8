//! Building blocks the stage runners are assembled from.
//!
//! Each submodule does exactly one thing and knows nothing about task
//! records or status writes; the runners in [`crate::stage`] own that.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ postprocess ──▶ chunk ──▶ voice/process ──▶ combine
//! (path/URL) (pdfium)  (base64)   (VLM)   (cleanup)       (split)   (speech jobs)     (manifest)
//! ```
//!
//! Cross-cutting:
//!
//! * [`status`]    the task state machine and its entry rules
//! * [`supervise`] polling external jobs under a deadline
//! * [`retry`]     resubmitting a job that fails or times out

pub mod chunk;
pub mod combine;
pub mod encode;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod process;
pub mod render;
pub mod retry;
pub mod status;
pub mod supervise;
pub mod voice;
