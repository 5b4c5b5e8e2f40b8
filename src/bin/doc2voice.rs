//! CLI binary for edgequake-doc2voice.
//!
//! A thin shim over the library crate. Artifacts and task records live in a
//! local data directory, so the whole pipeline can be driven from a shell.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_doc2voice::pipeline::input::load_input;
use edgequake_doc2voice::{
    download_location, list_requests, submit_document, supervise_build, ArtifactStore,
    BuildCommand, ChannelSink, CommandBuildEngine, CommandSpeechEngine, FileStatusStore, LogSink,
    NotificationSink, ObjectStoreArtifacts, PageRange, PdfiumRasterizer, Pipeline, PipelineConfig,
    StageContext, StageOutcome, StageReport, StatusStore, SubmissionRequest, TriggerEvent,
    VisionTextExtractor,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Submit pages 1-10 of a lecture and narrate it right away
  doc2voice submit lecture.pdf --pages 1-10 --language english --run

  # Submit from a URL, run later
  doc2voice submit https://arxiv.org/pdf/1706.03762 --pages 1-3
  doc2voice run 6f1c2e0a-...

  # Replay a single trigger event
  doc2voice trigger '{"event":"object_created","key":"download/<ref>/formatted_output.txt"}'

  # What is ready?
  doc2voice status --owner me@example.com
  doc2voice download <ref> -o lecture.mp3

  # Supervise a build with retries
  doc2voice build -- cargo build --release

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (text extraction)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory holding libpdfium
  DOC2VOICE_DATA_DIR      Where artifacts and task records are kept
  DOC2VOICE_TTS_COMMAND   Speech command run once per text chunk

SPEECH COMMAND PLACEHOLDERS:
  {input}     file holding the chunk text (omitted: text is piped to stdin)
  {output}    file the command must write the audio to
  {voice}     voice id (Joanna, Zeina)
  {language}  language code (en-US, arb)
"#;

/// Turn documents into narrated audio.
#[derive(Parser, Debug)]
#[command(
    name = "doc2voice",
    version,
    about = "Turn documents into narrated audio: rasterise, read with a vision LLM, synthesise speech",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding artifacts and task records.
    #[arg(long, global = true, env = "DOC2VOICE_DATA_DIR", default_value = ".doc2voice")]
    data_dir: PathBuf,

    /// Print results as JSON.
    #[arg(long, global = true, env = "DOC2VOICE_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOC2VOICE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOC2VOICE_QUIET")]
    quiet: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a document (path or URL) and create its task.
    Submit {
        input: String,

        /// Page range: 5 or 3-15.
        #[arg(long, env = "DOC2VOICE_PAGES", default_value = "1")]
        pages: String,

        /// Narration language: english or arabic.
        #[arg(long, env = "DOC2VOICE_LANGUAGE", default_value = "english")]
        language: String,

        #[arg(long, env = "DOC2VOICE_OWNER", default_value = "local")]
        owner: String,

        /// Name shown in listings. Defaults to the file name.
        #[arg(long)]
        name: Option<String>,

        /// Run every stage right after submitting.
        #[arg(long)]
        run: bool,
    },
    /// Run every stage for a submitted task.
    Run { reference_key: String },
    /// Route one JSON trigger event to its stage.
    Trigger { event: String },
    /// List the tasks of an owner.
    Status {
        #[arg(long, env = "DOC2VOICE_OWNER", default_value = "local")]
        owner: String,
    },
    /// Copy a task's final audio out of the store.
    Download {
        reference_key: String,

        /// Write here instead of printing the artifact key.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a build command, resubmitting it when it fails.
    Build {
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// LLM model ID for text extraction.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, global = true, env = "DOC2VOICE_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Directory holding libpdfium.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Concurrent page extractions.
    #[arg(long, global = true, env = "DOC2VOICE_EXTRACT_CONCURRENCY", default_value_t = 4)]
    extract_concurrency: usize,

    /// Retries per page on LLM failure.
    #[arg(long, global = true, env = "DOC2VOICE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-page LLM call timeout in seconds.
    #[arg(long, global = true, env = "DOC2VOICE_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Speech command, run once per text chunk.
    #[arg(long, global = true, env = "DOC2VOICE_TTS_COMMAND", default_value = "espeak-ng")]
    tts_command: String,

    /// Arguments for the speech command (whitespace separated, with placeholders).
    #[arg(long, global = true, env = "DOC2VOICE_TTS_ARGS",
          default_value = "-v {language} -f {input} -w {output}")]
    tts_args: String,

    /// Extension of the audio the speech command writes.
    #[arg(long, global = true, env = "DOC2VOICE_AUDIO_EXT", default_value = "wav")]
    audio_ext: String,

    /// Maximum characters per speech job.
    #[arg(long, global = true, env = "DOC2VOICE_CHUNK_LIMIT")]
    chunk_limit: Option<usize>,

    /// Concurrent speech jobs.
    #[arg(long, global = true, env = "DOC2VOICE_SYNTHESIS_CONCURRENCY", default_value_t = 1)]
    synthesis_concurrency: usize,

    /// Seconds a speech job may run before it is abandoned.
    #[arg(long, global = true, env = "DOC2VOICE_SPEECH_DEADLINE", default_value_t = 300)]
    speech_deadline: u64,

    /// Fail the synthesis stage when any chunk fails.
    #[arg(long, global = true, env = "DOC2VOICE_STRICT_AUDIO")]
    strict_audio: bool,

    /// Build attempts before giving up.
    #[arg(long, global = true, env = "DOC2VOICE_BUILD_ATTEMPTS", default_value_t = 3)]
    build_attempts: u32,

    /// Seconds between build attempts.
    #[arg(long, global = true, env = "DOC2VOICE_BUILD_BACKOFF", default_value_t = 30)]
    build_backoff: u64,

    /// Seconds between build status checks.
    #[arg(long, global = true, env = "DOC2VOICE_BUILD_POLL", default_value_t = 10)]
    build_poll: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "DOC2VOICE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = Arc::new(build_config(&cli.pipeline)?);
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(
        ObjectStoreArtifacts::local(&cli.data_dir.join("artifacts"))
            .context("Failed to open artifact store")?,
    );
    let status: Arc<dyn StatusStore> = Arc::new(
        FileStatusStore::new(cli.data_dir.join("status")).context("Failed to open status store")?,
    );

    match &cli.command {
        Command::Submit {
            input,
            pages,
            language,
            owner,
            name,
            run,
        } => {
            let range: PageRange = pages.parse().context("Invalid --pages")?;
            let loaded = load_input(input, config.download_timeout_secs)
                .await
                .context("Failed to load input")?;
            let reference_key = submit_document(
                artifacts.as_ref(),
                status.as_ref(),
                &config,
                SubmissionRequest {
                    file_name: loaded.file_name,
                    bytes: loaded.bytes,
                    language: language.clone(),
                    start_page: range.start,
                    end_page: range.end,
                    owner: owner.clone(),
                    display_name: name.clone().unwrap_or_default(),
                },
            )
            .await
            .context("Submission failed")?;
            println!("{reference_key}");

            if *run {
                run_task(&cli, artifacts, status, config, &reference_key).await?;
            }
        }
        Command::Run { reference_key } => {
            run_task(&cli, artifacts, status, config, reference_key).await?;
        }
        Command::Trigger { event } => {
            let event = TriggerEvent::from_json(event).context("Invalid trigger event")?;
            let pipeline = build_pipeline(&cli.pipeline, artifacts, status, config, Arc::new(LogSink))?;
            let report = pipeline.dispatch(&event).await.context("Trigger not routable")?;
            print_reports(&cli, &[report])?;
        }
        Command::Status { owner } => {
            let rows = list_requests(status.as_ref(), owner)
                .await
                .context("Failed to list requests")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for row in rows {
                    let label = match row.status.as_str() {
                        edgequake_doc2voice::submit::READY => green(&row.status),
                        edgequake_doc2voice::submit::FAILED => red(&row.status),
                        _ => cyan(&row.status),
                    };
                    println!("{}  {:<18}  {}", row.reference_key, label, row.display_name);
                }
            }
        }
        Command::Download {
            reference_key,
            output,
        } => {
            let key = download_location(artifacts.as_ref(), &config, reference_key)
                .await
                .context("Audio not available")?;
            match output {
                Some(path) => {
                    let bytes = artifacts.get(&key).await.context("Failed to read audio")?;
                    write_file(path, &bytes).await?;
                    if !cli.quiet {
                        eprintln!("{} {} → {}", green("✔"), key, path.display());
                    }
                }
                None => println!("{key}"),
            }
        }
        Command::Build { command } => {
            let (program, args) = command
                .split_first()
                .context("Missing build command")?;
            let build = BuildCommand {
                program: program.clone(),
                args: args.to_vec(),
            };
            let report = supervise_build(&CommandBuildEngine::new(), &build, &config)
                .await
                .context("Build failed")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if !cli.quiet {
                eprintln!(
                    "{} build {} succeeded on attempt {}  {}",
                    green("✔"),
                    report.job_id,
                    report.attempt,
                    dim(&format!("{}ms", report.duration_ms))
                );
            }
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(args: &PipelineArgs) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(args.dpi)
        .extract_concurrency(args.extract_concurrency)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .audio_extension(args.audio_ext.clone())
        .synthesis_concurrency(args.synthesis_concurrency)
        .speech_deadline(Duration::from_secs(args.speech_deadline))
        .allow_partial_audio(!args.strict_audio)
        .build_max_attempts(args.build_attempts)
        .build_backoff(Duration::from_secs(args.build_backoff))
        .build_poll_interval(Duration::from_secs(args.build_poll))
        .download_timeout_secs(args.download_timeout);

    if let Some(limit) = args.chunk_limit {
        builder = builder.chunk_limit(limit);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref dir) = args.pdfium_lib_path {
        builder = builder.pdfium_library_path(dir.clone());
    }

    builder.build().context("Invalid configuration")
}

fn build_pipeline(
    args: &PipelineArgs,
    artifacts: Arc<dyn ArtifactStore>,
    status: Arc<dyn StatusStore>,
    config: Arc<PipelineConfig>,
    notifier: Arc<dyn NotificationSink>,
) -> Result<Pipeline> {
    let extractor =
        VisionTextExtractor::from_config(&config).context("Failed to set up text extraction")?;
    let speech = CommandSpeechEngine::new(
        args.tts_command.clone(),
        args.tts_args.split_whitespace().map(str::to_string).collect(),
        config.audio_extension.clone(),
        artifacts.clone(),
    )
    .with_idle_limit(config.speech_deadline * 2);
    let ctx = StageContext {
        artifacts,
        status,
        notifier,
        config: config.clone(),
    };
    Ok(Pipeline::new(
        ctx,
        Arc::new(PdfiumRasterizer::new(&config)),
        Arc::new(extractor),
        Arc::new(speech),
    ))
}

async fn run_task(
    cli: &Cli,
    artifacts: Arc<dyn ArtifactStore>,
    status: Arc<dyn StatusStore>,
    config: Arc<PipelineConfig>,
    reference_key: &str,
) -> Result<()> {
    let (sink, mut notifications) = ChannelSink::new();
    let pipeline = build_pipeline(&cli.pipeline, artifacts, status, config, Arc::new(sink))?;
    let reports = pipeline
        .run_to_completion(reference_key, &mut notifications)
        .await
        .context("Pipeline run failed")?;
    print_reports(cli, &reports)?;

    match reports.last() {
        Some(last) if last.succeeded() && reports.len() == 3 => Ok(()),
        Some(last) => anyhow::bail!("{} stage did not succeed: {:?}", last.stage, last.outcome),
        None => anyhow::bail!("no stage ran for '{reference_key}'"),
    }
}

fn print_reports(cli: &Cli, reports: &[StageReport]) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }
    for report in reports {
        let mark = match &report.outcome {
            StageOutcome::Succeeded => green("✔"),
            StageOutcome::Duplicate => dim("="),
            StageOutcome::Failed(_) | StageOutcome::Rejected(_) => red("✘"),
        };
        eprintln!(
            "{} {:<10} {} processed, {} skipped  {}",
            mark,
            report.stage,
            report.processed.len(),
            report.skipped.len(),
            dim(&format!("{}ms", report.duration_ms))
        );
        for skipped in &report.skipped {
            eprintln!("    {} {}", red("✗"), skipped.error);
        }
        for warning in &report.cleanup_warnings {
            eprintln!("    {} {}", cyan("⚠"), warning);
        }
        match &report.outcome {
            StageOutcome::Failed(reason) | StageOutcome::Rejected(reason) => {
                eprintln!("    {}", red(reason));
            }
            _ => {}
        }
        if let Some(handoff) = &report.handoff {
            eprintln!("    {}", dim(&handoff.artifacts.join(", ")));
        }
    }
    Ok(())
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
