//! Job execution and retry control.
//!
//! Runs a job's rendered command inside the resolved environment,
//! enforces the timeout, and applies the retry policy. Each attempt is
//! a fresh process with the same environment and command; no state
//! carries between attempts, so the suites a job runs must be
//! idempotent by contract.

use crucible_core::env::EnvMap;
use crucible_core::job::{AttemptOutcome, JobDefinition, JobState, JobStatus, Lane};
use crucible_core::Error;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Output line from job execution.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Executor knobs. Retries are immediate by default; the delay exists
/// because the retry cadence is policy, not contract.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::ZERO,
        }
    }
}

/// Terminal report for one job instance.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub label: String,
    pub lane: Lane,
    pub status: JobStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
}

impl JobReport {
    /// Whether this report fails the overall pipeline. Quarantine-lane
    /// and skipped jobs never do.
    pub fn gates_failure(&self) -> bool {
        self.lane == Lane::Gating && self.status == JobStatus::FatallyFailed
    }
}

/// Runs one job to a terminal status.
#[derive(Debug, Clone, Default)]
pub struct JobExecutor {
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Execute a job to completion, streaming output lines to the
    /// provided channel. Configuration errors are contained: the job is
    /// reported fatally failed without any attempt, and siblings are
    /// unaffected.
    pub async fn execute(
        &self,
        job: &JobDefinition,
        env: &EnvMap,
        repo_root: &Path,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> JobReport {
        let start = std::time::Instant::now();

        if let Err(e) = job.validate() {
            warn!(job = %job.label, error = %e, "Job configuration invalid");
            return JobReport {
                label: job.label.clone(),
                lane: job.lane,
                status: JobStatus::FatallyFailed,
                attempts: 0,
                duration_ms: 0,
                skip_reason: None,
                error: Some(e.to_string()),
            };
        }

        let mut state = JobState::new(job.retries);

        if let Some(reason) = &job.skip {
            info!(job = %job.label, reason = %reason, "Job skipped");
            let _ = state.skip();
            return JobReport {
                label: job.label.clone(),
                lane: job.lane,
                status: JobStatus::Skipped,
                attempts: 0,
                duration_ms: 0,
                skip_reason: Some(reason.clone()),
                error: None,
            };
        }

        let platform = job.agent.platform();
        let command = job.invocation.command(repo_root);
        let argv = command.shell_argv(platform);
        let mut last_failure: Option<Error> = None;

        while !state.status().is_terminal() {
            if state.attempts() > 0 {
                info!(
                    job = %job.label,
                    attempt = state.attempts() + 1,
                    remaining = state.retries_remaining(),
                    "Retrying job"
                );
                if !self.config.retry_delay.is_zero() {
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }

            if state.start().is_err() {
                break;
            }

            let outcome = self
                .run_attempt(&argv, &command.cwd, env, job.timeout_seconds, &output_tx)
                .await;
            debug!(job = %job.label, ?outcome, "Attempt finished");

            match outcome {
                AttemptOutcome::Succeeded => {}
                AttemptOutcome::Failed { exit_code } => {
                    last_failure = Some(Error::ProcessFailure { exit_code });
                }
                AttemptOutcome::TimedOut => {
                    last_failure = Some(Error::Timeout {
                        seconds: job.timeout_seconds,
                    });
                }
            }

            if state.observe(outcome).is_err() {
                break;
            }
        }

        let status = state.status();
        let duration_ms = start.elapsed().as_millis() as u64;
        match status {
            JobStatus::Succeeded => {
                info!(job = %job.label, attempts = state.attempts(), duration_ms, "Job succeeded")
            }
            _ => {
                warn!(job = %job.label, attempts = state.attempts(), duration_ms, ?status, "Job failed")
            }
        }

        JobReport {
            label: job.label.clone(),
            lane: job.lane,
            status,
            attempts: state.attempts(),
            duration_ms,
            skip_reason: None,
            error: match status {
                JobStatus::FatallyFailed => last_failure.map(|e| e.to_string()),
                _ => None,
            },
        }
    }

    async fn run_attempt(
        &self,
        argv: &[String],
        cwd: &Path,
        env: &EnvMap,
        timeout_seconds: u64,
        output_tx: &mpsc::Sender<OutputLine>,
    ) -> AttemptOutcome {
        // Inherit the agent's base environment, then overlay the
        // assembled variables; the overlay always wins.
        let mut env_vars: HashMap<String, String> = std::env::vars().collect();
        for (k, v) in env.iter() {
            env_vars.insert(k.to_string(), v.to_string());
        }

        let mut child = match Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(cwd)
            .envs(&env_vars)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %argv[0], error = %e, "Failed to spawn job process");
                return AttemptOutcome::Failed { exit_code: -1 };
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_handle = stdout.map(|out| {
            let tx = output_tx.clone();
            tokio::spawn(stream_lines(out, OutputStream::Stdout, tx))
        });
        let stderr_handle = stderr.map(|err| {
            let tx = output_tx.clone();
            tokio::spawn(stream_lines(err, OutputStream::Stderr, tx))
        });

        let wait_result = match timeout(Duration::from_secs(timeout_seconds), child.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_seconds, "Job attempt timed out, killing process");
                let _ = child.kill().await;
                if let Some(h) = stdout_handle {
                    let _ = h.await;
                }
                if let Some(h) = stderr_handle {
                    let _ = h.await;
                }
                return AttemptOutcome::TimedOut;
            }
        };

        if let Some(h) = stdout_handle {
            let _ = h.await;
        }
        if let Some(h) = stderr_handle {
            let _ = h.await;
        }

        match wait_result {
            Ok(status) if status.success() => AttemptOutcome::Succeeded,
            Ok(status) => AttemptOutcome::Failed {
                exit_code: status.code().unwrap_or(-1),
            },
            Err(e) => {
                warn!(error = %e, "Failed to wait for job process");
                AttemptOutcome::Failed { exit_code: -1 }
            }
        }
    }
}

async fn stream_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let reader = BufReader::new(reader);
    let mut lines = reader.lines();
    let mut line_number = 0u32;

    while let Ok(Some(content)) = lines.next_line().await {
        line_number += 1;
        let line = OutputLine {
            stream,
            content,
            line_number,
            timestamp: chrono::Utc::now(),
        };
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::env::EnvMap;
    use crucible_core::invoke::ComponentInvocation;
    use crucible_core::job::AgentClass;
    use std::path::PathBuf;

    fn job_with_template(label: &str, template: &[&str]) -> JobDefinition {
        let mut invocation = ComponentInvocation::new("sup");
        invocation.template = template.iter().map(|s| s.to_string()).collect();
        JobDefinition {
            label: label.to_string(),
            invocation,
            agent: AgentClass::LinuxContainer {
                image: "crucible/ci-studio:latest".to_string(),
                queue: "default".to_string(),
            },
            timeout_seconds: 60,
            retries: 0,
            skip: None,
            lane: Lane::Gating,
        }
    }

    fn repo_root() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("components/sup")).unwrap();
        let root = dir.path().to_path_buf();
        (dir, root)
    }

    #[tokio::test]
    async fn successful_job_takes_one_attempt() {
        let (_guard, root) = repo_root();
        let executor = JobExecutor::default();
        let (tx, _rx) = mpsc::channel(64);

        let job = job_with_template("ok", &["true"]);
        let report = executor.execute(&job, &EnvMap::default(), &root, tx).await;

        assert_eq!(report.status, JobStatus::Succeeded);
        assert_eq!(report.attempts, 1);
        assert!(!report.gates_failure());
    }

    #[tokio::test]
    async fn failing_job_exhausts_budget_then_fails_fatally() {
        let (_guard, root) = repo_root();
        let executor = JobExecutor::default();
        let (tx, _rx) = mpsc::channel(64);

        let mut job = job_with_template("always-fails", &["false"]);
        job.retries = 2;
        let report = executor.execute(&job, &EnvMap::default(), &root, tx).await;

        assert_eq!(report.status, JobStatus::FatallyFailed);
        assert_eq!(report.attempts, 3);
        assert!(report.gates_failure());
        assert!(report.error.as_deref().unwrap().contains("exit code 1"));
    }

    #[tokio::test]
    async fn quarantine_failure_never_gates() {
        let (_guard, root) = repo_root();
        let executor = JobExecutor::default();
        let (tx, _rx) = mpsc::channel(64);

        let mut job = job_with_template("flaky-quarantine", &["false"]);
        job.lane = Lane::Quarantine;
        let report = executor.execute(&job, &EnvMap::default(), &root, tx).await;

        assert_eq!(report.status, JobStatus::FatallyFailed);
        assert!(!report.gates_failure());
    }

    #[tokio::test]
    async fn timeout_kills_and_counts_as_failed_attempt() {
        let (_guard, root) = repo_root();
        let executor = JobExecutor::default();
        let (tx, _rx) = mpsc::channel(64);

        let mut job = job_with_template("sleeper", &["sleep", "30"]);
        job.timeout_seconds = 1;
        let report = executor.execute(&job, &EnvMap::default(), &root, tx).await;

        assert_eq!(report.status, JobStatus::FatallyFailed);
        assert_eq!(report.attempts, 1);
        assert!(report.duration_ms < 10_000);
        assert!(report.error.as_deref().unwrap().contains("Timed out"));
    }

    #[tokio::test]
    async fn skipped_job_performs_no_work() {
        let (_guard, root) = repo_root();
        let executor = JobExecutor::default();
        let (tx, _rx) = mpsc::channel(64);

        let mut job = job_with_template("skipped", &["false"]);
        job.skip = Some("blocked on flaky launcher socket tests".to_string());
        let report = executor.execute(&job, &EnvMap::default(), &root, tx).await;

        assert_eq!(report.status, JobStatus::Skipped);
        assert_eq!(report.attempts, 0);
        assert_eq!(
            report.skip_reason.as_deref(),
            Some("blocked on flaky launcher socket tests")
        );
        assert!(!report.gates_failure());
    }

    #[tokio::test]
    async fn invalid_configuration_is_contained_to_the_job() {
        let (_guard, root) = repo_root();
        let executor = JobExecutor::default();
        let (tx, _rx) = mpsc::channel(64);

        let mut job = job_with_template("misconfigured", &["true"]);
        job.timeout_seconds = 0;
        let report = executor.execute(&job, &EnvMap::default(), &root, tx).await;

        assert_eq!(report.status, JobStatus::FatallyFailed);
        assert_eq!(report.attempts, 0);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn output_is_streamed_line_by_line() {
        let (_guard, root) = repo_root();
        let executor = JobExecutor::default();
        let (tx, mut rx) = mpsc::channel(64);

        let job = job_with_template("echoes", &["echo", "hello from sup"]);
        let report = executor.execute(&job, &EnvMap::default(), &root, tx).await;
        assert_eq!(report.status, JobStatus::Succeeded);

        let line = rx.recv().await.unwrap();
        assert_eq!(line.stream, OutputStream::Stdout);
        assert_eq!(line.content, "hello from sup");
    }
}
