//! Pipeline job model.
//!
//! A declarative table of jobs, each binding a component invocation to
//! an agent class, a timeout, a retry budget, and a lane. The
//! gating/quarantine split is a first-class attribute: a known-flaky
//! suite runs in a quarantine-lane entry with a wider feature set and a
//! larger retry budget, and its failure never gates the pipeline.

use crate::deps::DependencySpec;
use crate::invoke::ComponentInvocation;
use crate::platform::Platform;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Class of externally-provisioned agent a job runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentClass {
    /// Containerized Linux agent on a named queue.
    LinuxContainer { image: String, queue: String },
    /// Bare Windows agent on a named queue.
    WindowsNative { queue: String },
}

impl AgentClass {
    pub fn platform(&self) -> Platform {
        match self {
            AgentClass::LinuxContainer { .. } => Platform::Linux,
            AgentClass::WindowsNative { .. } => Platform::Windows,
        }
    }

    pub fn queue(&self) -> &str {
        match self {
            AgentClass::LinuxContainer { queue, .. } => queue,
            AgentClass::WindowsNative { queue } => queue,
        }
    }
}

/// Which lane a job reports into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Failure blocks the overall pipeline result.
    #[default]
    Gating,
    /// Informational only; tolerates known flakiness and never blocks
    /// the pipeline.
    Quarantine,
}

fn default_timeout() -> u64 {
    2400
}

/// One entry in the pipeline job table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub label: String,
    #[serde(flatten)]
    pub invocation: ComponentInvocation,
    pub agent: AgentClass,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Retry budget; 0 means a single attempt with no retry.
    #[serde(default)]
    pub retries: u32,
    /// Human-readable skip reason. A skipped job performs no work and
    /// reports a neutral status.
    #[serde(default)]
    pub skip: Option<String>,
    #[serde(default)]
    pub lane: Lane,
}

impl JobDefinition {
    /// Validate this entry in isolation. A failure here is contained to
    /// this job; siblings still run.
    pub fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(Error::InvalidJobConfiguration {
                label: self.label.clone(),
                message: "label must not be empty".to_string(),
            });
        }
        if self.timeout_seconds == 0 {
            return Err(Error::InvalidJobConfiguration {
                label: self.label.clone(),
                message: "timeout must be non-zero".to_string(),
            });
        }
        if let Some(reason) = &self.skip {
            if reason.trim().is_empty() {
                return Err(Error::InvalidJobConfiguration {
                    label: self.label.clone(),
                    message: "skip requires a non-empty reason".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Whether this job's failure counts against the pipeline result.
    pub fn gates(&self) -> bool {
        self.lane == Lane::Gating && self.skip.is_none()
    }
}

/// The external pipeline definition surface: an ordered job table plus
/// the declared dependency set shared by every job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    pub jobs: Vec<JobDefinition>,
}

impl PipelineDefinition {
    /// Validate the table as a whole. Every job depends on the shared
    /// environment, so a malformed table stops the entire run before
    /// any job starts.
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            return Err(Error::InvalidPipeline(
                "pipeline defines no jobs".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.label.as_str()) {
                return Err(Error::InvalidPipeline(format!(
                    "duplicate job label: {}",
                    job.label
                )));
            }
        }
        Ok(())
    }
}

/// Per-instance job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    FatallyFailed,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::FatallyFailed | JobStatus::Skipped
        )
    }
}

/// Observed result of one process attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed { exit_code: i32 },
    TimedOut,
}

/// Tracks one job instance through the state machine:
/// `Pending -> Running -> {Succeeded, Failed, TimedOut}`, with failed
/// or timed-out attempts returning to `Pending` while retries remain
/// and `FatallyFailed` once the budget is exhausted. `Skipped` is
/// reachable only from `Pending` and is terminal.
#[derive(Debug, Clone)]
pub struct JobState {
    status: JobStatus,
    retries_remaining: u32,
    attempts: u32,
}

impl JobState {
    pub fn new(retry_budget: u32) -> Self {
        Self {
            status: JobStatus::Pending,
            retries_remaining: retry_budget,
            attempts: 0,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining
    }

    /// Begin an attempt.
    pub fn start(&mut self) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(Error::Internal(format!(
                "cannot start a job in state {:?}",
                self.status
            )));
        }
        self.status = JobStatus::Running;
        self.attempts += 1;
        Ok(())
    }

    /// Record the outcome of the running attempt.
    pub fn observe(&mut self, outcome: AttemptOutcome) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(Error::Internal(format!(
                "cannot observe an outcome in state {:?}",
                self.status
            )));
        }
        self.status = match outcome {
            AttemptOutcome::Succeeded => JobStatus::Succeeded,
            AttemptOutcome::Failed { .. } => JobStatus::Failed,
            AttemptOutcome::TimedOut => JobStatus::TimedOut,
        };
        if matches!(self.status, JobStatus::Failed | JobStatus::TimedOut) {
            if self.retries_remaining > 0 {
                self.retries_remaining -= 1;
                self.status = JobStatus::Pending;
            } else {
                self.status = JobStatus::FatallyFailed;
            }
        }
        Ok(())
    }

    /// Skip the job before any attempt starts.
    pub fn skip(&mut self) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(Error::Internal(format!(
                "cannot skip a job in state {:?}",
                self.status
            )));
        }
        self.status = JobStatus::Skipped;
        Ok(())
    }
}
