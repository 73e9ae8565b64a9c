//! Command handlers.

use console::style;
use crucible_core::env::{assemble, EnvMap, RuleSet};
use crucible_core::invoke::ComponentInvocation;
use crucible_core::job::{AgentClass, JobDefinition, JobStatus, Lane, PipelineDefinition};
use crucible_core::platform::Platform;
use crucible_runner::{
    resolve_all, run_pipeline, JobExecutor, OutputLine, OutputStream, PackageStore, RunConfig,
};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

type HandlerResult = Result<bool, Box<dyn std::error::Error>>;

/// Find a pipeline file in the standard locations.
pub fn find_pipeline_file(path: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = path {
        let path = PathBuf::from(p);
        return path.exists().then_some(path);
    }

    let candidates = [
        ".crucible/pipeline.yaml",
        ".crucible/pipeline.yml",
        "crucible.yaml",
        "crucible.yml",
    ];

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

/// Load and parse a pipeline file.
pub fn load_pipeline(path: &Path) -> Result<PipelineDefinition, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let definition: PipelineDefinition = serde_yaml::from_str(&content)?;
    Ok(definition)
}

fn host_platform() -> Platform {
    if cfg!(windows) {
        Platform::Windows
    } else {
        Platform::Linux
    }
}

fn host_agent() -> AgentClass {
    // Agent class only selects command rendering here; locally there is
    // no container or queue.
    match host_platform() {
        Platform::Windows => AgentClass::WindowsNative {
            queue: "local".to_string(),
        },
        Platform::Linux => AgentClass::LinuxContainer {
            image: "local".to_string(),
            queue: "local".to_string(),
        },
    }
}

/// Assemble the environment for the host platform from an optional
/// pipeline file's dependency set.
async fn host_environment(
    pipeline: Option<&str>,
    store: &Path,
) -> Result<EnvMap, Box<dyn std::error::Error>> {
    let path = match find_pipeline_file(pipeline) {
        Some(path) => path,
        // An explicitly named file that does not exist is an error; only
        // the no-flag, no-default-file case runs without an environment.
        None if pipeline.is_some() => {
            return Err(format!("Pipeline file not found: {}", pipeline.unwrap_or_default()).into())
        }
        None => return Ok(EnvMap::default()),
    };
    let definition = load_pipeline(&path)?;
    let locator = PackageStore::new(store);
    let roots = resolve_all(&locator, &definition.dependencies).await?;
    let rules = RuleSet::standard(&definition.dependencies);
    let env = assemble(&definition.dependencies, &roots, &rules, host_platform())?;
    Ok(env)
}

/// `crucible test`: run one component's suite on the host.
pub async fn test(
    component: &str,
    features: Option<&str>,
    test_options: Option<&str>,
    repo_root: &Path,
    pipeline: Option<&str>,
    store: &Path,
) -> HandlerResult {
    let env = host_environment(pipeline, store).await?;

    let mut invocation = ComponentInvocation::new(component);
    if let Some(features) = features {
        invocation = invocation.with_features(features);
    }
    if let Some(options) = test_options {
        invocation = invocation.with_test_options(options);
    }

    let job = JobDefinition {
        label: format!("{} test", component),
        invocation,
        agent: host_agent(),
        timeout_seconds: 2400,
        retries: 0,
        skip: None,
        lane: Lane::Gating,
    };

    println!(
        "{} Testing component: {}",
        style("▶").cyan().bold(),
        style(component).bold()
    );

    let executor = JobExecutor::default();
    let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            match line.stream {
                OutputStream::Stdout => println!("  {}", style(&line.content).dim()),
                OutputStream::Stderr => println!("  {}", style(&line.content).red().dim()),
            }
        }
    });

    let report = executor.execute(&job, &env, repo_root, tx).await;
    let _ = printer.await;

    let ok = report.status == JobStatus::Succeeded;
    if ok {
        println!(
            "{} {} passed ({:.2}s)",
            style("✓").green().bold(),
            component,
            report.duration_ms as f64 / 1000.0
        );
    } else {
        println!(
            "{} {} failed after {} attempt(s)",
            style("✗").red().bold(),
            component,
            report.attempts
        );
    }
    Ok(ok)
}

/// `crucible run`: execute the full pipeline job table.
pub async fn run(pipeline: Option<&str>, repo_root: &Path, store: &Path) -> HandlerResult {
    let path = find_pipeline_file(pipeline).ok_or("No pipeline file found")?;
    let definition = load_pipeline(&path)?;

    let locator = PackageStore::new(store);
    let config = RunConfig {
        repo_root: repo_root.to_path_buf(),
        ..RunConfig::default()
    };

    println!(
        "\n{} Running pipeline: {}",
        style("▶").cyan().bold(),
        style(&definition.name).bold()
    );
    println!("  {} jobs\n", definition.jobs.len());

    let report = run_pipeline(&definition, &locator, None, &config).await?;

    for job in &report.jobs {
        let mark = match job.status {
            JobStatus::Succeeded => style("✓").green(),
            JobStatus::Skipped => style("⏭").dim(),
            _ => style("✗").red(),
        };
        let lane = match job.lane {
            Lane::Quarantine => " [quarantine]",
            Lane::Gating => "",
        };
        match &job.skip_reason {
            Some(reason) => println!("  {} {}{} (skipped: {})", mark, job.label, lane, reason),
            None => println!(
                "  {} {}{} ({} attempt(s), {:.2}s)",
                mark,
                job.label,
                lane,
                job.attempts,
                job.duration_ms as f64 / 1000.0
            ),
        }
    }

    println!();
    if report.success {
        println!(
            "{} Pipeline passed in {:.2}s",
            style("✓").green().bold(),
            report.duration_ms as f64 / 1000.0
        );
    } else {
        println!(
            "{} Pipeline failed after {:.2}s",
            style("✗").red().bold(),
            report.duration_ms as f64 / 1000.0
        );
    }
    Ok(report.success)
}

/// `crucible validate`: parse and validate a pipeline file.
pub fn validate(path: Option<&str>) -> HandlerResult {
    let path = find_pipeline_file(path).ok_or("No pipeline file found")?;
    let definition = load_pipeline(&path)?;
    definition.validate()?;
    for job in &definition.jobs {
        job.validate()?;
    }
    println!(
        "{} {} is valid ({} jobs, {} dependencies)",
        style("✓").green().bold(),
        path.display(),
        definition.jobs.len(),
        definition.dependencies.len()
    );
    Ok(true)
}

/// `crucible env`: print the assembled environment.
pub async fn env(pipeline: Option<&str>, store: &Path, platform: &str) -> HandlerResult {
    let platform = match platform {
        "linux" => Platform::Linux,
        "windows" => Platform::Windows,
        other => return Err(format!("Unknown platform: {}", other).into()),
    };

    let path = find_pipeline_file(pipeline).ok_or("No pipeline file found")?;
    let definition = load_pipeline(&path)?;
    let locator = PackageStore::new(store);
    let roots = resolve_all(&locator, &definition.dependencies).await?;
    let rules = RuleSet::standard(&definition.dependencies);
    let env = assemble(&definition.dependencies, &roots, &rules, platform)?;

    for (name, value) in env.iter() {
        println!("{}={}", name, value);
    }
    Ok(true)
}
