//! Whole-run orchestration.
//!
//! Installs and resolves the dependency set once, assembles the
//! environment once per target platform, then runs every job in the
//! table concurrently. Jobs are independent units: no ordering, no
//! cancellation propagation, no shared mutable state. The pipeline
//! result is the conjunction of the gating-lane job statuses.

use crate::executor::{JobExecutor, JobReport, OutputLine};
use crate::locator::{resolve_all, Installer, RootLocator};
use crucible_core::env::{assemble, EnvMap, RuleSet};
use crucible_core::job::PipelineDefinition;
use crucible_core::platform::Platform;
use crucible_core::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Run-level configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Repository root; component working directories live under
    /// `<repo_root>/components`.
    pub repo_root: PathBuf,
    /// Delay between retry attempts. Immediate by default.
    pub retry_delay: Duration,
    /// Maximum concurrent jobs per agent queue. Queues without an
    /// entry are unlimited; a limit of zero is treated as one, since a
    /// zero-permit queue could never run its jobs.
    pub queue_limits: HashMap<String, usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            retry_delay: Duration::ZERO,
            queue_limits: HashMap::new(),
        }
    }
}

/// Terminal report for a whole pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub name: String,
    pub success: bool,
    pub jobs: Vec<JobReport>,
    pub duration_ms: u64,
}

/// Conjunction of gating-lane statuses. Quarantine failures and skips
/// never change the aggregate result.
pub fn aggregate(reports: &[JobReport]) -> bool {
    !reports.iter().any(JobReport::gates_failure)
}

/// Execute the full job table.
///
/// Configuration-level failures (malformed table, missing dependency,
/// unresolved root) abort before any job starts; job-level failures are
/// contained to their job and reported in the result.
pub async fn run_pipeline(
    definition: &PipelineDefinition,
    locator: &dyn RootLocator,
    installer: Option<&dyn Installer>,
    config: &RunConfig,
) -> Result<PipelineReport> {
    let start = std::time::Instant::now();

    definition.validate()?;

    if let Some(installer) = installer {
        for spec in &definition.dependencies {
            installer.install(&spec.ident).await?;
        }
    }

    let roots = resolve_all(locator, &definition.dependencies).await?;
    let rules = RuleSet::standard(&definition.dependencies);

    // One assembled environment per target platform in the table,
    // shared read-only by every job on that platform.
    let mut environments: HashMap<Platform, Arc<EnvMap>> = HashMap::new();
    for job in &definition.jobs {
        let platform = job.agent.platform();
        if !environments.contains_key(&platform) {
            let env = assemble(&definition.dependencies, &roots, &rules, platform)?;
            environments.insert(platform, Arc::new(env));
        }
    }

    info!(
        pipeline = %definition.name,
        jobs = definition.jobs.len(),
        "Starting pipeline run"
    );

    let semaphores: HashMap<String, Arc<Semaphore>> = config
        .queue_limits
        .iter()
        .map(|(queue, limit)| (queue.clone(), Arc::new(Semaphore::new((*limit).max(1)))))
        .collect();

    let mut join_set = JoinSet::new();
    for job in &definition.jobs {
        let job = job.clone();
        let env = Arc::clone(&environments[&job.agent.platform()]);
        let repo_root = config.repo_root.clone();
        let semaphore = semaphores.get(job.agent.queue()).cloned();
        let executor = JobExecutor::new(crate::executor::ExecutorConfig {
            retry_delay: config.retry_delay,
        });

        join_set.spawn(async move {
            let _permit = match semaphore {
                Some(s) => s.acquire_owned().await.ok(),
                None => None,
            };

            let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
            let label = job.label.clone();
            let drain = tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    debug!(job = %label, line = %line.content, "job output");
                }
            });

            let report = executor.execute(&job, &env, &repo_root, tx).await;
            let _ = drain.await;
            report
        });
    }

    let mut reports = Vec::with_capacity(definition.jobs.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => warn!(error = %e, "Job task panicked"),
        }
    }

    // Report in table order, not completion order.
    reports.sort_by_key(|r| {
        definition
            .jobs
            .iter()
            .position(|j| j.label == r.label)
            .unwrap_or(usize::MAX)
    });

    let success = aggregate(&reports);
    let duration_ms = start.elapsed().as_millis() as u64;
    info!(pipeline = %definition.name, success, duration_ms, "Pipeline run finished");

    Ok(PipelineReport {
        name: definition.name.clone(),
        success,
        jobs: reports,
        duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::PackageStore;
    use crucible_core::deps::{DependencySpec, LinkMode};
    use crucible_core::invoke::ComponentInvocation;
    use crucible_core::job::{AgentClass, JobDefinition, JobStatus, Lane};

    fn job(label: &str, template: &[&str], lane: Lane) -> JobDefinition {
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
            lane,
        }
    }

    fn fixture() -> (tempfile::TempDir, PackageStore, RunConfig) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("repo/components/sup")).unwrap();
        std::fs::create_dir_all(dir.path().join("store/core/openssl/lib")).unwrap();
        let store = PackageStore::new(dir.path().join("store"));
        let config = RunConfig {
            repo_root: dir.path().join("repo"),
            ..RunConfig::default()
        };
        (dir, store, config)
    }

    #[tokio::test]
    async fn quarantine_failure_does_not_fail_the_pipeline() {
        let (_guard, store, config) = fixture();
        let definition = PipelineDefinition {
            name: "components".to_string(),
            dependencies: vec![DependencySpec::new(
                "core/openssl".parse().unwrap(),
                LinkMode::StaticLink,
            )],
            jobs: vec![
                job("sup-linux", &["true"], Lane::Gating),
                job("sup-linux-quarantine", &["false"], Lane::Quarantine),
            ],
        };

        let report = run_pipeline(&definition, &store, None, &config)
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.jobs.len(), 2);
        assert_eq!(report.jobs[1].status, JobStatus::FatallyFailed);
    }

    #[tokio::test]
    async fn gating_failure_fails_the_pipeline() {
        let (_guard, store, config) = fixture();
        let definition = PipelineDefinition {
            name: "components".to_string(),
            dependencies: vec![],
            jobs: vec![
                job("sup-linux", &["false"], Lane::Gating),
                job("launcher-linux", &["true"], Lane::Gating),
            ],
        };

        let report = run_pipeline(&definition, &store, None, &config)
            .await
            .unwrap();
        assert!(!report.success);
        // Sibling jobs are unaffected by the failure.
        assert_eq!(report.jobs[1].status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn missing_dependency_aborts_before_any_job_runs() {
        let (_guard, store, config) = fixture();
        let definition = PipelineDefinition {
            name: "components".to_string(),
            dependencies: vec![DependencySpec::new(
                "core/zeromq".parse().unwrap(),
                LinkMode::DynamicRuntime,
            )],
            jobs: vec![job("sup-linux", &["true"], Lane::Gating)],
        };

        let err = run_pipeline(&definition, &store, None, &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crucible_core::Error::DependencyMissing(ref d) if d == "core/zeromq"
        ));
    }

    #[tokio::test]
    async fn skipped_jobs_are_reported_and_neutral() {
        let (_guard, store, config) = fixture();
        let mut skipped = job("sup-windows", &["true"], Lane::Gating);
        skipped.skip = Some("windows agents unavailable".to_string());
        let definition = PipelineDefinition {
            name: "components".to_string(),
            dependencies: vec![],
            jobs: vec![skipped],
        };

        let report = run_pipeline(&definition, &store, None, &config)
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.jobs[0].status, JobStatus::Skipped);
        assert_eq!(
            report.jobs[0].skip_reason.as_deref(),
            Some("windows agents unavailable")
        );
    }

    struct RecordingInstaller {
        calls: std::sync::Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Installer for RecordingInstaller {
        async fn install(&self, ident: &crucible_core::deps::DepIdent) -> crucible_core::Result<()> {
            self.calls.lock().unwrap().push(ident.to_string());
            if self.fail {
                Err(crucible_core::Error::DependencyMissing(ident.to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn installer_runs_once_per_dependency_before_resolution() {
        let (_guard, store, config) = fixture();
        let definition = PipelineDefinition {
            name: "components".to_string(),
            dependencies: vec![DependencySpec::new(
                "core/openssl".parse().unwrap(),
                LinkMode::StaticLink,
            )],
            jobs: vec![job("sup-linux", &["true"], Lane::Gating)],
        };
        let installer = RecordingInstaller {
            calls: std::sync::Mutex::new(Vec::new()),
            fail: false,
        };

        run_pipeline(&definition, &store, Some(&installer), &config)
            .await
            .unwrap();
        assert_eq!(*installer.calls.lock().unwrap(), vec!["core/openssl"]);
    }

    #[tokio::test]
    async fn installer_failure_is_fatal_to_the_run() {
        let (_guard, store, config) = fixture();
        let definition = PipelineDefinition {
            name: "components".to_string(),
            dependencies: vec![DependencySpec::new(
                "core/openssl".parse().unwrap(),
                LinkMode::StaticLink,
            )],
            jobs: vec![job("sup-linux", &["true"], Lane::Gating)],
        };
        let installer = RecordingInstaller {
            calls: std::sync::Mutex::new(Vec::new()),
            fail: true,
        };

        assert!(run_pipeline(&definition, &store, Some(&installer), &config)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn queue_limit_serializes_jobs_on_the_same_queue() {
        let (_guard, store, mut config) = fixture();
        config.queue_limits.insert("default".to_string(), 1);

        // Each job fails if it observes the other holding the lock, so
        // success requires the queue limit to serialize them.
        let script = "test ! -f lock && touch lock && sleep 0.3 && rm lock";
        let definition = PipelineDefinition {
            name: "components".to_string(),
            dependencies: vec![],
            jobs: vec![
                job("first", &["sh", "-c", script], Lane::Gating),
                job("second", &["sh", "-c", script], Lane::Gating),
            ],
        };

        let report = run_pipeline(&definition, &store, None, &config)
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.jobs.len(), 2);
    }

    #[tokio::test]
    async fn zero_queue_limit_still_runs_jobs() {
        let (_guard, store, mut config) = fixture();
        config.queue_limits.insert("default".to_string(), 0);
        let definition = PipelineDefinition {
            name: "components".to_string(),
            dependencies: vec![],
            jobs: vec![job("sup-linux", &["true"], Lane::Gating)],
        };

        let report = run_pipeline(&definition, &store, None, &config)
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.jobs[0].status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn empty_job_table_is_rejected() {
        let (_guard, store, config) = fixture();
        let definition = PipelineDefinition {
            name: "components".to_string(),
            dependencies: vec![],
            jobs: vec![],
        };
        assert!(run_pipeline(&definition, &store, None, &config)
            .await
            .is_err());
    }
}
