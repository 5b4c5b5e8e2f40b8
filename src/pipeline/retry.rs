//! Whole-job resubmission on failure.
//!
//! External jobs are not resumable: once a build fails or stalls, the only
//! remedy is a brand-new job. [`RetryingSubmitter`] submits, supervises, and
//! on `Failed`/`TimedOut` waits a fixed backoff before submitting a fresh job,
//! up to `max_attempts` submissions in total. A submission that the engine
//! rejects outright counts as a failed attempt.

use crate::pipeline::supervise::{JobEngine, JobOutcome, JobSupervisor};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Overall result of a retried job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded {
        output: String,
        /// 1-based attempt that succeeded.
        attempt: u32,
    },
    Failed {
        attempts: u32,
        last_reason: String,
    },
}

/// Resubmits a job until it succeeds or the attempt budget is spent.
#[derive(Debug, Clone, Copy)]
pub struct RetryingSubmitter {
    supervisor: JobSupervisor,
    max_attempts: u32,
    backoff: Duration,
}

impl RetryingSubmitter {
    /// `max_attempts` is clamped to at least one.
    pub fn new(supervisor: JobSupervisor, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            supervisor,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `input` on `engine` with fresh submissions on failure.
    pub async fn run<E>(&self, engine: &E, input: &E::Input) -> RetryOutcome
    where
        E: JobEngine + ?Sized,
    {
        let mut last_reason = String::new();

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                info!(
                    "Waiting {:?} before attempt {}/{}",
                    self.backoff, attempt, self.max_attempts
                );
                sleep(self.backoff).await;
            }

            info!("Attempt {} of {}", attempt, self.max_attempts);
            let handle = match engine.submit(input).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Attempt {}: submission rejected: {}", attempt, e);
                    last_reason = e.to_string();
                    continue;
                }
            };
            info!("Attempt {}: started job {}", attempt, handle);

            match self.supervisor.await_job(engine, &handle).await {
                JobOutcome::Succeeded(output) => {
                    info!("Job {} succeeded on attempt {}", handle, attempt);
                    return RetryOutcome::Succeeded { output, attempt };
                }
                JobOutcome::Failed(reason) => {
                    warn!("Job {} failed on attempt {}: {}", handle, attempt, reason);
                    last_reason = reason;
                }
                JobOutcome::TimedOut => {
                    warn!("Job {} timed out on attempt {}", handle, attempt);
                    last_reason = format!("job {handle} timed out");
                }
            }
        }

        error!(
            "Failed to complete job successfully after {} attempts",
            self.max_attempts
        );
        RetryOutcome::Failed {
            attempts: self.max_attempts,
            last_reason,
        }
    }
}
