//! Job engines backed by local child processes.
//!
//! Both engines keep their children in a [`ChildJobs`] table. `submit`
//! spawns and returns at once; `poll` checks the child with `try_wait`, so
//! supervision never blocks on a process. Each job gets its own temporary
//! working directory, removed once the job settles.
//!
//! A job leaves the table the first time `poll` reports its terminal status.
//! A child nobody has polled for longer than the idle limit is taken to be
//! abandoned by its supervisor (its deadline passed) and is killed the next
//! time the table is touched.
//!
//! Command arguments may contain placeholders that are substituted per job:
//!
//! | Placeholder  | Replaced with                                 |
//! |--------------|-----------------------------------------------|
//! | `{input}`    | path of a file holding the chunk text         |
//! | `{output}`   | path the command must write its audio to      |
//! | `{voice}`    | voice id from the catalog                     |
//! | `{language}` | language code from the catalog                |
//!
//! When no argument mentions `{input}`, the text is fed on stdin instead.

use crate::error::PipelineError;
use crate::layout;
use crate::pipeline::supervise::{JobEngine, JobHandle, JobStatus};
use crate::pipeline::voice::Voice;
use crate::store::ArtifactStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const STDERR_FILE: &str = "stderr.log";
const STDERR_TAIL: usize = 400;

/// Default time a running child may go unpolled before it is killed.
pub const DEFAULT_IDLE_LIMIT: Duration = Duration::from_secs(600);

struct Running<T> {
    child: Child,
    workdir: TempDir,
    tag: T,
    last_polled: Instant,
}

/// A child that has exited and been taken out of the running table.
pub(crate) struct Exited<T> {
    pub status: ExitStatus,
    pub workdir: TempDir,
    pub tag: T,
}

pub(crate) enum Check<T> {
    Running,
    Exited(Exited<T>),
}

/// Table of spawned children that have not yet reported a terminal status.
///
/// `T` is whatever the owning engine needs to remember about a job.
pub struct ChildJobs<T> {
    running: Mutex<HashMap<String, Running<T>>>,
    idle_limit: Duration,
}

impl<T> Default for ChildJobs<T> {
    fn default() -> Self {
        Self {
            running: Mutex::new(HashMap::new()),
            idle_limit: DEFAULT_IDLE_LIMIT,
        }
    }
}

fn poisoned<E>(_: E) -> PipelineError {
    PipelineError::Internal("job table lock poisoned".into())
}

impl<T> ChildJobs<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_limit(idle_limit: Duration) -> Self {
        Self {
            running: Mutex::new(HashMap::new()),
            idle_limit,
        }
    }

    /// Children still in the table.
    pub fn len(&self) -> usize {
        self.running.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kill and drop every child that went unpolled past the idle limit.
    fn reap_abandoned(&self, running: &mut HashMap<String, Running<T>>) {
        let idle_limit = self.idle_limit;
        running.retain(|id, job| {
            let idle = job.last_polled.elapsed();
            if idle <= idle_limit {
                return true;
            }
            warn!("Job {} unpolled for {:?}; killing it", id, idle);
            if let Err(e) = job.child.start_kill() {
                debug!("Job {}: kill failed: {}", id, e);
            }
            false
        });
    }

    pub(crate) fn spawn(
        &self,
        mut cmd: Command,
        workdir: TempDir,
        tag: T,
    ) -> Result<JobHandle, PipelineError> {
        let stderr = std::fs::File::create(workdir.path().join(STDERR_FILE))
            .map_err(|e| PipelineError::Engine(format!("cannot capture stderr: {e}")))?;
        cmd.stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        let child = cmd
            .spawn()
            .map_err(|e| PipelineError::Engine(format!("spawn failed: {e}")))?;

        let id = Uuid::new_v4().simple().to_string();
        debug!("Spawned job {} (pid {:?})", id, child.id());
        let mut running = self.running.lock().map_err(poisoned)?;
        self.reap_abandoned(&mut running);
        running.insert(
            id.clone(),
            Running {
                child,
                workdir,
                tag,
                last_polled: Instant::now(),
            },
        );
        Ok(JobHandle(id))
    }

    /// Check a child, taking it out of the table once it has exited.
    pub(crate) fn check(&self, handle: &JobHandle) -> Result<Check<T>, PipelineError> {
        let mut running = self.running.lock().map_err(poisoned)?;
        if let Some(job) = running.get_mut(&handle.0) {
            job.last_polled = Instant::now();
        }
        self.reap_abandoned(&mut running);

        let job = running
            .get_mut(&handle.0)
            .ok_or_else(|| PipelineError::Engine(format!("unknown job '{handle}'")))?;
        let exited = job
            .child
            .try_wait()
            .map_err(|e| PipelineError::Engine(format!("wait on job '{handle}': {e}")))?;
        match exited {
            None => Ok(Check::Running),
            Some(status) => {
                let job = running
                    .remove(&handle.0)
                    .ok_or_else(|| PipelineError::Engine(format!("unknown job '{handle}'")))?;
                Ok(Check::Exited(Exited {
                    status,
                    workdir: job.workdir,
                    tag: job.tag,
                }))
            }
        }
    }
}

/// Last few hundred characters the child wrote to stderr.
async fn stderr_tail(workdir: &Path) -> String {
    let text = tokio::fs::read_to_string(workdir.join(STDERR_FILE))
        .await
        .unwrap_or_default();
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_TAIL);
    text.chars().skip(skip).collect()
}

fn failure_reason(status: ExitStatus, stderr: &str) -> String {
    if stderr.is_empty() {
        format!("process exited with {status}")
    } else {
        format!("process exited with {status}: {stderr}")
    }
}

fn substitute(arg: &str, vars: &[(&str, &str)]) -> String {
    vars.iter()
        .fold(arg.to_string(), |acc, (name, value)| acc.replace(name, value))
}

// ── Speech ───────────────────────────────────────────────────────────────

/// One text chunk to narrate.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub reference_key: String,
    pub index: usize,
    pub text: String,
    pub voice: Voice,
}

#[derive(Debug, Clone)]
struct SpeechTag {
    reference_key: String,
    index: usize,
}

/// Narrates each chunk by running a text-to-speech command.
///
/// On success the produced audio is uploaded to
/// `download/{ref}/chunk_{index}_{job}.{ext}` and that key is the job output.
pub struct CommandSpeechEngine {
    program: String,
    args: Vec<String>,
    extension: String,
    store: Arc<dyn ArtifactStore>,
    jobs: ChildJobs<SpeechTag>,
}

impl CommandSpeechEngine {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        extension: impl Into<String>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            extension: extension.into(),
            store,
            jobs: ChildJobs::new(),
        }
    }

    /// Kill children left unpolled for longer than `idle_limit`.
    pub fn with_idle_limit(mut self, idle_limit: Duration) -> Self {
        self.jobs = ChildJobs::with_idle_limit(idle_limit);
        self
    }

    async fn collect(&self, handle: &JobHandle, exited: Exited<SpeechTag>) -> JobStatus {
        let dir = exited.workdir.path();
        if !exited.status.success() {
            return JobStatus::Failed {
                reason: failure_reason(exited.status, &stderr_tail(dir).await),
            };
        }
        let audio = match tokio::fs::read(dir.join(self.output_name())).await {
            Ok(audio) if !audio.is_empty() => audio,
            Ok(_) | Err(_) => {
                return JobStatus::Failed {
                    reason: "speech command produced no audio".into(),
                }
            }
        };

        let key = format!(
            "{}{}.{}",
            layout::chunk_prefix(&exited.tag.reference_key, exited.tag.index),
            handle,
            self.extension
        );
        match self
            .store
            .put(&key, Bytes::from(audio), audio_content_type(&self.extension))
            .await
        {
            Ok(()) => JobStatus::Succeeded { output: key },
            Err(e) => JobStatus::Failed {
                reason: format!("upload of chunk {} failed: {e}", exited.tag.index),
            },
        }
    }

    fn output_name(&self) -> String {
        format!("speech.{}", self.extension)
    }
}

#[async_trait]
impl JobEngine for CommandSpeechEngine {
    type Input = SpeechRequest;

    async fn submit(&self, request: &SpeechRequest) -> Result<JobHandle, PipelineError> {
        let workdir = TempDir::new().map_err(|e| PipelineError::Engine(e.to_string()))?;
        let input = workdir.path().join("chunk.txt");
        let output = workdir.path().join(self.output_name());
        tokio::fs::write(&input, request.text.as_bytes())
            .await
            .map_err(|e| PipelineError::Engine(format!("write chunk text: {e}")))?;

        let input_str = input.to_string_lossy().to_string();
        let output_str = output.to_string_lossy().to_string();
        let vars = [
            ("{input}", input_str.as_str()),
            ("{output}", output_str.as_str()),
            ("{voice}", request.voice.voice_id),
            ("{language}", request.voice.language_code),
        ];

        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|a| substitute(a, &vars)))
            .current_dir(workdir.path());
        if self.args.iter().any(|a| a.contains("{input}")) {
            cmd.stdin(Stdio::null());
        } else {
            let file = std::fs::File::open(&input)
                .map_err(|e| PipelineError::Engine(format!("open chunk text: {e}")))?;
            cmd.stdin(Stdio::from(file));
        }

        let handle = self.jobs.spawn(
            cmd,
            workdir,
            SpeechTag {
                reference_key: request.reference_key.clone(),
                index: request.index,
            },
        )?;
        info!(
            "Chunk {} of {}: speech job {} started ({} chars, voice {})",
            request.index,
            request.reference_key,
            handle,
            request.text.chars().count(),
            request.voice.voice_id
        );
        Ok(handle)
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, PipelineError> {
        match self.jobs.check(handle)? {
            Check::Running => Ok(JobStatus::Pending),
            Check::Exited(exited) => Ok(self.collect(handle, exited).await),
        }
    }
}

fn audio_content_type(extension: &str) -> &'static str {
    match extension {
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "pcm" => "audio/pcm",
        _ => "application/octet-stream",
    }
}

// ── Build ────────────────────────────────────────────────────────────────

/// A build to run: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Runs build commands as child processes. The job id is the job output.
#[derive(Default)]
pub struct CommandBuildEngine {
    jobs: ChildJobs<()>,
}

impl CommandBuildEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill children left unpolled for longer than `idle_limit`.
    pub fn with_idle_limit(idle_limit: Duration) -> Self {
        Self {
            jobs: ChildJobs::with_idle_limit(idle_limit),
        }
    }
}

#[async_trait]
impl JobEngine for CommandBuildEngine {
    type Input = BuildCommand;

    async fn submit(&self, build: &BuildCommand) -> Result<JobHandle, PipelineError> {
        let workdir = TempDir::new().map_err(|e| PipelineError::Engine(e.to_string()))?;
        let mut cmd = Command::new(&build.program);
        cmd.args(&build.args).stdin(Stdio::null());
        let handle = self.jobs.spawn(cmd, workdir, ())?;
        info!("Build {} started: {} {:?}", handle, build.program, build.args);
        Ok(handle)
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, PipelineError> {
        match self.jobs.check(handle)? {
            Check::Running => Ok(JobStatus::Pending),
            Check::Exited(exited) => {
                let status = if exited.status.success() {
                    JobStatus::Succeeded {
                        output: handle.to_string(),
                    }
                } else {
                    let tail = stderr_tail(exited.workdir.path()).await;
                    warn!("Build {} failed", handle);
                    JobStatus::Failed {
                        reason: failure_reason(exited.status, &tail),
                    }
                };
                Ok(status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::supervise::{JobOutcome, JobSupervisor, SupervisionPolicy};
    use crate::pipeline::voice::voice_for;
    use crate::store::ObjectStoreArtifacts;

    fn quick() -> JobSupervisor {
        JobSupervisor::new(SupervisionPolicy {
            initial_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            deadline: Some(Duration::from_secs(20)),
        })
    }

    fn sh(script: &str) -> BuildCommand {
        BuildCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    #[tokio::test]
    async fn build_exit_code_decides_outcome() {
        let engine = CommandBuildEngine::new();

        let ok = engine.submit(&sh("exit 0")).await.unwrap();
        assert_eq!(
            quick().await_job(&engine, &ok).await,
            JobOutcome::Succeeded(ok.to_string())
        );

        let bad = engine.submit(&sh("echo broken >&2; exit 3")).await.unwrap();
        match quick().await_job(&engine, &bad).await {
            JobOutcome::Failed(reason) => assert!(reason.contains("broken"), "{reason}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn settled_job_leaves_the_table() {
        let engine = CommandBuildEngine::new();
        let handle = engine.submit(&sh("exit 0")).await.unwrap();
        assert_eq!(engine.jobs.len(), 1);
        assert!(quick().await_job(&engine, &handle).await.is_success());
        assert!(engine.jobs.is_empty());
        assert!(engine.poll(&handle).await.is_err());
    }

    #[tokio::test]
    async fn abandoned_child_is_killed_on_next_use() {
        let engine = CommandBuildEngine::with_idle_limit(Duration::from_millis(100));
        let abandoned = engine.submit(&sh("sleep 30")).await.unwrap();
        let impatient = JobSupervisor::new(SupervisionPolicy {
            initial_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            deadline: Some(Duration::from_millis(30)),
        });
        assert_eq!(impatient.await_job(&engine, &abandoned).await, JobOutcome::TimedOut);
        assert_eq!(engine.jobs.len(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let next = engine.submit(&sh("exit 0")).await.unwrap();
        assert_eq!(engine.jobs.len(), 1);
        assert!(engine.poll(&abandoned).await.is_err());
        assert!(quick().await_job(&engine, &next).await.is_success());
    }

    #[tokio::test]
    async fn polled_child_is_not_reaped() {
        let engine = CommandBuildEngine::with_idle_limit(Duration::from_millis(200));
        let handle = engine.submit(&sh("sleep 0.5")).await.unwrap();
        assert!(quick().await_job(&engine, &handle).await.is_success());
    }

    #[tokio::test]
    async fn unknown_handle_is_an_engine_error() {
        let engine = CommandBuildEngine::new();
        assert!(engine.poll(&JobHandle("nope".into())).await.is_err());
    }

    #[tokio::test]
    async fn speech_output_is_uploaded_under_chunk_prefix() {
        let store = Arc::new(ObjectStoreArtifacts::in_memory());
        let engine = CommandSpeechEngine::new(
            "sh",
            vec!["-c".into(), "cat {input} > {output}".into()],
            "mp3",
            store.clone(),
        );
        let request = SpeechRequest {
            reference_key: "r".into(),
            index: 2,
            text: "hello world".into(),
            voice: voice_for("english").unwrap(),
        };
        let handle = engine.submit(&request).await.unwrap();
        let key = match quick().await_job(&engine, &handle).await {
            JobOutcome::Succeeded(key) => key,
            other => panic!("expected success, got {other:?}"),
        };
        assert!(key.starts_with("download/r/chunk_2_"), "{key}");
        assert!(key.ends_with(".mp3"));
        assert_eq!(store.get(&key).await.unwrap(), Bytes::from("hello world"));
    }

    #[tokio::test]
    async fn speech_text_goes_to_stdin_without_input_placeholder() {
        let store = Arc::new(ObjectStoreArtifacts::in_memory());
        let engine = CommandSpeechEngine::new(
            "sh",
            vec!["-c".into(), "cat > {output}".into()],
            "mp3",
            store.clone(),
        );
        let request = SpeechRequest {
            reference_key: "r".into(),
            index: 0,
            text: "via stdin".into(),
            voice: voice_for("arabic").unwrap(),
        };
        let handle = engine.submit(&request).await.unwrap();
        let JobOutcome::Succeeded(key) = quick().await_job(&engine, &handle).await else {
            panic!("speech job did not succeed");
        };
        assert_eq!(store.get(&key).await.unwrap(), Bytes::from("via stdin"));
    }

    #[tokio::test]
    async fn speech_without_audio_fails() {
        let store = Arc::new(ObjectStoreArtifacts::in_memory());
        let engine =
            CommandSpeechEngine::new("sh", vec!["-c".into(), "true".into()], "mp3", store);
        let request = SpeechRequest {
            reference_key: "r".into(),
            index: 0,
            text: "x".into(),
            voice: voice_for("english").unwrap(),
        };
        let handle = engine.submit(&request).await.unwrap();
        assert!(matches!(
            quick().await_job(&engine, &handle).await,
            JobOutcome::Failed(_)
        ));
    }
}
