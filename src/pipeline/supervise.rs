//! Supervision of long-running external jobs.
//!
//! Speech synthesis and builds both follow the same shape: submit work to an
//! engine, receive an opaque handle, then poll that handle until the engine
//! reports a terminal state. [`JobSupervisor`] owns the polling loop so the
//! timer logic exists once. The deadline is enforced by wrapping the whole
//! loop in a single `tokio::time::timeout`; when it fires the loop future is
//! dropped, so no poll can happen after the deadline.
//!
//! The supervisor only observes a job. It never cancels or mutates it.

use crate::error::PipelineError;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Opaque reference to a job running inside an engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a job as reported by its engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    /// Terminal success with the job's declared output location.
    Succeeded { output: String },
    /// Terminal failure with the engine's description.
    Failed { reason: String },
}

/// An external engine that runs work asynchronously.
#[async_trait]
pub trait JobEngine: Send + Sync {
    /// What a single job is asked to do.
    type Input: Send + Sync;

    /// Start a new job. Each call creates a fresh, independent job.
    async fn submit(&self, input: &Self::Input) -> Result<JobHandle, PipelineError>;

    /// Report the current status of a previously submitted job.
    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, PipelineError>;
}

/// How often to poll and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisionPolicy {
    /// Wait before the first poll. Zero polls immediately.
    pub initial_delay: Duration,
    /// Wait between consecutive polls.
    pub poll_interval: Duration,
    /// Overall budget measured from the start of supervision. `None` waits
    /// for as long as the engine takes.
    pub deadline: Option<Duration>,
}

impl SupervisionPolicy {
    /// Speech synthesis: poll at once, then every 5 s, for at most 5 minutes.
    pub fn speech() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            poll_interval: Duration::from_secs(5),
            deadline: Some(Duration::from_secs(300)),
        }
    }

    /// Builds: first look after 10 s, then every 10 s, no deadline.
    pub fn build() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(10),
            deadline: None,
        }
    }
}

/// Terminal outcome of supervising one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(String),
    Failed(String),
    TimedOut,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }
}

/// Polls jobs to completion under a [`SupervisionPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct JobSupervisor {
    policy: SupervisionPolicy,
}

impl JobSupervisor {
    pub fn new(policy: SupervisionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SupervisionPolicy {
        self.policy
    }

    /// Wait until `handle` reaches a terminal state or the deadline elapses.
    ///
    /// A poll that itself errors (the engine is unreachable or has forgotten
    /// the job) is reported as [`JobOutcome::Failed`].
    pub async fn await_job<E>(&self, engine: &E, handle: &JobHandle) -> JobOutcome
    where
        E: JobEngine + ?Sized,
    {
        let started = Instant::now();
        let outcome = match self.policy.deadline {
            Some(deadline) => match timeout(deadline, self.poll_loop(engine, handle)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Job {}: no terminal state within {:?}", handle, deadline);
                    JobOutcome::TimedOut
                }
            },
            None => self.poll_loop(engine, handle).await,
        };
        debug!("Job {}: {:?} after {:?}", handle, outcome, started.elapsed());
        outcome
    }

    async fn poll_loop<E>(&self, engine: &E, handle: &JobHandle) -> JobOutcome
    where
        E: JobEngine + ?Sized,
    {
        if !self.policy.initial_delay.is_zero() {
            sleep(self.policy.initial_delay).await;
        }

        loop {
            match engine.poll(handle).await {
                Ok(JobStatus::Succeeded { output }) => {
                    info!("Job {} completed: {}", handle, output);
                    return JobOutcome::Succeeded(output);
                }
                Ok(JobStatus::Failed { reason }) => {
                    warn!("Job {} failed: {}", handle, reason);
                    return JobOutcome::Failed(reason);
                }
                Ok(JobStatus::Pending) => {
                    debug!("Job {} still pending", handle);
                }
                Err(e) => {
                    warn!("Job {}: status check failed: {}", handle, e);
                    return JobOutcome::Failed(e.to_string());
                }
            }
            sleep(self.policy.poll_interval).await;
        }
    }
}
