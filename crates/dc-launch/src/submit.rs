//! Hands rendered jobs to the floyd CLI.

use std::io::ErrorKind;
use std::process::Stdio;

use dc_types::{DcResult, LaunchError};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::floyd::{FloydJob, FLOYD_PROGRAM};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub rendered: String,
    /// Exit status of the CLI; `None` on a dry run.
    pub status: Option<i32>,
    pub dry_run: bool,
}

pub async fn submit(job: &FloydJob, dry_run: bool) -> DcResult<SubmitOutcome> {
    submit_with_program(FLOYD_PROGRAM, job, dry_run).await
}

/// Runs `program` with the job's arguments, or only renders it when
/// `dry_run` is set.
pub async fn submit_with_program(program: &str, job: &FloydJob, dry_run: bool) -> DcResult<SubmitOutcome> {
    let rendered = job.render();
    if dry_run {
        info!(job = %rendered, "dry run, not submitting");
        return Ok(SubmitOutcome {
            rendered,
            status: None,
            dry_run,
        });
    }

    info!(program, job = %rendered, "submitting job");
    let status = Command::new(program)
        .args(job.to_args())
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => LaunchError::CliNotFound {
                program: program.to_string(),
            },
            _ => LaunchError::SpawnFailed {
                message: e.to_string(),
            },
        })?;

    if !status.success() {
        // killed by a signal when there is no code
        let code = status.code().unwrap_or(-1);
        warn!(program, status = code, "job submission failed");
        return Err(LaunchError::SubmitFailed { status: code }.into());
    }

    Ok(SubmitOutcome {
        rendered,
        status: status.code(),
        dry_run,
    })
}

/// Submits jobs one after another, stopping at the first failure.
pub async fn submit_all(jobs: &[FloydJob], dry_run: bool) -> DcResult<Vec<SubmitOutcome>> {
    let mut outcomes = Vec::with_capacity(jobs.len());
    for job in jobs {
        outcomes.push(submit(job, dry_run).await?);
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ShellCommand;
    use dc_types::DcError;

    fn job() -> FloydJob {
        FloydJob::new(ShellCommand::new(".env", "run_deep_cash")).with_cpu2(true)
    }

    #[tokio::test]
    async fn dry_run_only_renders() {
        let outcome = submit(&job(), true).await.unwrap();
        assert!(outcome.dry_run);
        assert_eq!(outcome.status, None);
        assert_eq!(
            outcome.rendered,
            "floyd run --cpu2 \"source .env && python experiments/run_deep_cash.py\""
        );
    }

    #[tokio::test]
    async fn dry_run_of_a_batch() {
        let outcomes = submit_all(&[job(), job()], true).await.unwrap();
        assert_eq!(outcomes.len(), 2);
    }

    #[tokio::test]
    async fn missing_cli_is_reported() {
        let err = submit_with_program("deep-cash-no-such-floyd-cli", &job(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DcError::Launch(LaunchError::CliNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_is_checked() {
        let outcome = submit_with_program("true", &job(), false).await.unwrap();
        assert_eq!(outcome.status, Some(0));

        let err = submit_with_program("false", &job(), false).await.unwrap_err();
        assert!(matches!(
            err,
            DcError::Launch(LaunchError::SubmitFailed { status: 1 })
        ));
    }
}
