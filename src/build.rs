//! Build supervision: run a build job to completion, resubmitting on failure.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::retry::{RetryOutcome, RetryingSubmitter};
use crate::pipeline::supervise::{JobEngine, JobSupervisor};
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info};

/// A build that finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Output reported by the engine for the successful job.
    pub job_id: String,
    /// 1-based attempt that succeeded.
    pub attempt: u32,
    pub duration_ms: u64,
}

/// Run `input` on `engine` under the configured build policy.
///
/// Each attempt is supervised with no deadline unless one is configured;
/// after `build_max_attempts` failed attempts the build is reported as an
/// [`PipelineError::Engine`] error.
pub async fn supervise_build<E>(
    engine: &E,
    input: &E::Input,
    config: &PipelineConfig,
) -> Result<BuildReport, PipelineError>
where
    E: JobEngine + ?Sized,
{
    let started = Instant::now();
    let submitter = RetryingSubmitter::new(
        JobSupervisor::new(config.build_policy()),
        config.build_max_attempts,
        config.build_backoff,
    );
    info!(
        "Starting build (up to {} attempts, {:?} backoff)",
        submitter.max_attempts(),
        config.build_backoff
    );

    match submitter.run(engine, input).await {
        RetryOutcome::Succeeded { output, attempt } => {
            info!("Build {} succeeded on attempt {}", output, attempt);
            Ok(BuildReport {
                job_id: output,
                attempt,
                duration_ms: started.elapsed().as_millis() as u64,
            })
        }
        RetryOutcome::Failed {
            attempts,
            last_reason,
        } => {
            error!("Build failed after {} attempts: {}", attempts, last_reason);
            Err(PipelineError::Engine(format!(
                "build failed after {attempts} attempts: {last_reason}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::supervise::tests::ScriptedEngine;
    use crate::pipeline::supervise::JobStatus;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> PipelineConfig {
        PipelineConfig::builder()
            .build_max_attempts(3)
            .build_backoff(Duration::from_secs(30))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn reports_the_successful_job() {
        let engine = ScriptedEngine::new(vec![
            JobStatus::Pending,
            JobStatus::Succeeded {
                output: "build-42".into(),
            },
        ]);
        let report = supervise_build(&engine, &(), &config()).await.unwrap();
        assert_eq!(report.job_id, "build-42");
        assert_eq!(report.attempt, 1);
        assert_eq!(engine.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_are_an_engine_error() {
        let engine = ScriptedEngine::new(vec![JobStatus::Failed {
            reason: "tests failed".into(),
        }]);
        let err = supervise_build(&engine, &(), &config()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Engine(_)));
        assert!(err.to_string().contains("3 attempts"));
        assert_eq!(engine.submits.load(Ordering::SeqCst), 3);
    }
}
