//! Configuration for the document-to-voice pipeline.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Stage runners read only the fields that concern
//! them; the supervision policies for speech and build jobs are derived from
//! the timing fields by [`PipelineConfig::speech_policy`] and
//! [`PipelineConfig::build_policy`].

use crate::error::PipelineError;
use crate::pipeline::chunk::DEFAULT_CHUNK_LIMIT;
use crate::pipeline::supervise::SupervisionPolicy;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration shared by all stages.
///
/// # Example
/// ```rust
/// use edgequake_doc2voice::PipelineConfig;
/// use std::time::Duration;
///
/// let config = PipelineConfig::builder()
///     .chunk_limit(3000)
///     .speech_deadline(Duration::from_secs(120))
///     .extract_concurrency(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.chunk_limit, 3000);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    // ── Synthesis ────────────────────────────────────────────────────────
    /// Maximum characters per synthesis job. Default: 190 000.
    ///
    /// A word longer than the limit still travels whole in its own chunk.
    pub chunk_limit: usize,

    /// Interval between polls of a speech job. Default: 5 s.
    pub speech_poll_interval: Duration,

    /// Budget for one speech job, from submission to terminal state. Default: 300 s.
    pub speech_deadline: Duration,

    /// Speech jobs supervised at once. Default: 1.
    pub synthesis_concurrency: usize,

    /// Finish with the chunks that succeeded when some fail. Default: true.
    ///
    /// When false, any failed chunk fails the whole stage.
    pub allow_partial_audio: bool,

    /// Extension of produced audio files. Default: `mp3`.
    pub audio_extension: String,

    // ── Build supervision ────────────────────────────────────────────────
    /// Wait before the first poll of a build. Default: 10 s.
    pub build_initial_delay: Duration,

    /// Interval between polls of a build. Default: 10 s.
    pub build_poll_interval: Duration,

    /// Per-attempt build deadline. Default: none.
    pub build_deadline: Option<Duration>,

    /// Fresh build submissions before giving up. Default: 3.
    pub build_max_attempts: u32,

    /// Pause between failed build attempts. Default: 30 s.
    pub build_backoff: Duration,

    // ── Extraction ───────────────────────────────────────────────────────
    /// Pages read by the vision model at once. Default: 4.
    pub extract_concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0 (literal transcription).
    pub temperature: f32,

    /// Maximum tokens per page. Default: 1000.
    pub max_tokens: usize,

    /// Retries on a failed model call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom extraction prompt. If None, uses the built-in one.
    pub extraction_prompt: Option<String>,

    // ── Rasterisation ────────────────────────────────────────────────────
    /// Rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Cap on the longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Directory holding the pdfium shared library. If None, the system
    /// library is used.
    pub pdfium_library_path: Option<PathBuf>,

    // ── Submission ───────────────────────────────────────────────────────
    /// Time after submission at which a task may be reaped. Default: 7 days.
    pub retention: Duration,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_limit: DEFAULT_CHUNK_LIMIT,
            speech_poll_interval: Duration::from_secs(5),
            speech_deadline: Duration::from_secs(300),
            synthesis_concurrency: 1,
            allow_partial_audio: true,
            audio_extension: "mp3".to_string(),
            build_initial_delay: Duration::from_secs(10),
            build_poll_interval: Duration::from_secs(10),
            build_deadline: None,
            build_max_attempts: 3,
            build_backoff: Duration::from_secs(30),
            extract_concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 1000,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            extraction_prompt: None,
            dpi: 150,
            max_rendered_pixels: 2000,
            pdfium_library_path: None,
            retention: Duration::from_secs(7 * 24 * 3600),
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("chunk_limit", &self.chunk_limit)
            .field("speech_poll_interval", &self.speech_poll_interval)
            .field("speech_deadline", &self.speech_deadline)
            .field("synthesis_concurrency", &self.synthesis_concurrency)
            .field("allow_partial_audio", &self.allow_partial_audio)
            .field("audio_extension", &self.audio_extension)
            .field("build_max_attempts", &self.build_max_attempts)
            .field("build_backoff", &self.build_backoff)
            .field("extract_concurrency", &self.extract_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_retries", &self.max_retries)
            .field("dpi", &self.dpi)
            .field("retention", &self.retention)
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Polling policy for speech-synthesis jobs.
    pub fn speech_policy(&self) -> SupervisionPolicy {
        SupervisionPolicy {
            initial_delay: Duration::ZERO,
            poll_interval: self.speech_poll_interval,
            deadline: Some(self.speech_deadline),
        }
    }

    /// Polling policy for one build attempt.
    pub fn build_policy(&self) -> SupervisionPolicy {
        SupervisionPolicy {
            initial_delay: self.build_initial_delay,
            poll_interval: self.build_poll_interval,
            deadline: self.build_deadline,
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn chunk_limit(mut self, chars: usize) -> Self {
        self.config.chunk_limit = chars;
        self
    }

    pub fn speech_poll_interval(mut self, d: Duration) -> Self {
        self.config.speech_poll_interval = d;
        self
    }

    pub fn speech_deadline(mut self, d: Duration) -> Self {
        self.config.speech_deadline = d;
        self
    }

    pub fn synthesis_concurrency(mut self, n: usize) -> Self {
        self.config.synthesis_concurrency = n.max(1);
        self
    }

    pub fn allow_partial_audio(mut self, v: bool) -> Self {
        self.config.allow_partial_audio = v;
        self
    }

    pub fn audio_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.audio_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn build_initial_delay(mut self, d: Duration) -> Self {
        self.config.build_initial_delay = d;
        self
    }

    pub fn build_poll_interval(mut self, d: Duration) -> Self {
        self.config.build_poll_interval = d;
        self
    }

    pub fn build_deadline(mut self, d: Option<Duration>) -> Self {
        self.config.build_deadline = d;
        self
    }

    pub fn build_max_attempts(mut self, n: u32) -> Self {
        self.config.build_max_attempts = n;
        self
    }

    pub fn build_backoff(mut self, d: Duration) -> Self {
        self.config.build_backoff = d;
        self
    }

    pub fn extract_concurrency(mut self, n: usize) -> Self {
        self.config.extract_concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.extraction_prompt = Some(prompt.into());
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pdfium_library_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(dir.into());
        self
    }

    pub fn retention(mut self, d: Duration) -> Self {
        self.config.retention = d;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.chunk_limit == 0 {
            return Err(PipelineError::InvalidConfig(
                "chunk_limit must be ≥ 1".into(),
            ));
        }
        if c.speech_poll_interval.is_zero() || c.build_poll_interval.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "poll intervals must be non-zero".into(),
            ));
        }
        if c.speech_deadline.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "speech_deadline must be non-zero".into(),
            ));
        }
        if c.build_max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "build_max_attempts must be ≥ 1".into(),
            ));
        }
        if c.audio_extension.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "audio_extension must not be empty".into(),
            ));
        }
        if c.retention.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "retention must be non-zero".into(),
            ));
        }
        Ok(self.config)
    }
}
