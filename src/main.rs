use anyhow::{Context, Result};
use pipeline_orchestrator::cli::commands::{HistoryCommand, PlanCommand, RunCommand, ValidateCommand};
use pipeline_orchestrator::cli::output::*;
use pipeline_orchestrator::cli::{Cli, Command};
use pipeline_orchestrator::core::config::PipelineConfig;
use pipeline_orchestrator::core::{
    ChangeDetector, EnvSecretProvider, ExecutionStatus, GitChangeDetector, MatrixExpander, RunContext,
    StaticChangeDetector, TriggerMetadata,
};
use pipeline_orchestrator::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy, ShellExecutor};
use pipeline_orchestrator::persistence::{PersistenceBackend, RunSummary};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plan(cmd) => plan_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

async fn open_store() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store = pipeline_orchestrator::persistence::SqliteRunStore::with_default_path().await?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        warn!("Built without sqlite; run history is not kept across invocations");
        Ok(Arc::new(pipeline_orchestrator::persistence::InMemoryPersistence::new()))
    }
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    // Load pipeline config
    let config = PipelineConfig::from_file(&cmd.file)
        .with_context(|| format!("Failed to load pipeline config {}", cmd.file))?;
    let mut pipeline = config.to_pipeline().context("Invalid pipeline")?;

    if cmd.pool_size.is_some() {
        pipeline.settings.pool_size = cmd.pool_size;
    }

    if !cmd.json {
        println!("{} Loaded pipeline: {}", INFO, style(&pipeline.name).bold());
    }

    // Trigger and run context
    let mut trigger = TriggerMetadata::new(&cmd.event, &cmd.branch);
    if let (Some(base), Some(head)) = (&cmd.base, &cmd.head) {
        trigger = trigger.with_range(base, head);
    }

    let mut ctx = RunContext::new(trigger).with_secrets(Arc::new(EnvSecretProvider::new(cmd.secret_prefix.clone())));
    for (key, value) in &cmd.env {
        ctx = ctx.with_env(key, value);
        if !cmd.json {
            println!("{} Env override: {} = {}", INFO, style(key).cyan(), style(value).dim());
        }
    }

    // Ctrl-C stops the run at the next step boundary
    let cancelled = ctx.cancellation_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling run");
            cancelled.store(true, Ordering::SeqCst);
        }
    });

    let workdir = match &cmd.workdir {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir().context("Failed to resolve working directory")?,
    };

    let detector: Arc<dyn ChangeDetector> = if cmd.changed.is_empty() {
        Arc::new(GitChangeDetector::new(&workdir))
    } else {
        Arc::new(StaticChangeDetector::new(cmd.changed.iter().cloned()))
    };

    let strategy = SchedulingStrategy::from_pool_size(pipeline.settings.pool_size);
    let mut engine = ExecutionEngine::new(ShellExecutor::new(&workdir), strategy).with_change_detector(detector);

    // Console output: one progress tick per finished instance
    if !cmd.json {
        let counts: HashMap<String, usize> = pipeline
            .graph
            .jobs()
            .map(|job| (job.id.clone(), MatrixExpander::instance_count(job)))
            .collect();
        let progress = create_progress_bar(counts.values().sum());

        engine.add_event_handler(move |event| {
            match event {
                ExecutionEvent::InstanceFinished { .. } => progress.inc(1),
                ExecutionEvent::JobSkipped { job, .. } => {
                    progress.inc(counts.get(job).copied().unwrap_or(1) as u64);
                }
                ExecutionEvent::JobStarted { job, .. } => progress.set_message(job.clone()),
                _ => {}
            }

            if let Some(line) = format_execution_event(event) {
                progress.println(line);
            }

            if let ExecutionEvent::RunCompleted { .. } = event {
                progress.finish_and_clear();
            }
        });
    }

    let run = engine.execute(&pipeline, ctx).await.context("Pipeline execution failed")?;
    let result = &run.result;

    // Save to history
    if !cmd.no_history {
        let store = open_store().await?;
        let summary = RunSummary::from_result(result, pipeline.gated_job());
        store.save_run(&summary).await?;
        if !cmd.json {
            println!(
                "\n{} Run saved to history (ID: {})",
                INFO,
                style(&summary.run_id.to_string()[..8]).dim()
            );
        }
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!();
        for line in format_run_result(result) {
            println!("{}", line);
        }

        let duration = result.duration().to_std().unwrap_or_default();
        if result.is_success() {
            println!(
                "\n{} {} completed {} in {}",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green(),
                format_duration(duration)
            );
        } else {
            println!(
                "\n{} {} {} after {}",
                CROSS,
                style(&pipeline.name).bold(),
                format_status(result.status),
                format_duration(duration)
            );
        }
    }

    match result.status {
        ExecutionStatus::Completed => {}
        ExecutionStatus::Cancelled => {
            warn!("Pipeline {} was cancelled", pipeline.name);
            std::process::exit(130);
        }
        status => {
            error!("Pipeline {} finished with status {}", pipeline.name, status);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    if !cmd.json {
        println!("{} Validating pipeline...", INFO);
    }

    let config = match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(e) => {
            if cmd.json {
                let data = serde_json::json!({ "valid": false, "error": e.to_string() });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{} Validation failed:", CROSS);
                println!("  {}", style(e).red());
            }
            std::process::exit(1);
        }
    };

    if cmd.json {
        let data = serde_json::json!({
            "valid": true,
            "name": config.name,
            "jobs": config.jobs.len(),
            "release": config.release.as_ref().map(|release| release.job.clone()),
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Pipeline configuration is valid!", CHECK);
        println!("  Name: {}", style(&config.name).bold());
        println!("  Jobs: {}", style(config.jobs.len()).cyan());
        if let Some(release) = &config.release {
            println!(
                "  Release: {} on {} to {}",
                style(&release.job).cyan(),
                release.event,
                release.branch
            );
        }
    }

    Ok(())
}

fn plan_pipeline(cmd: &PlanCommand) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file)
        .with_context(|| format!("Failed to load pipeline config {}", cmd.file))?;
    let pipeline = config.to_pipeline()?;
    let order = pipeline.graph.topological_order()?;

    let mut plan = Vec::new();
    for id in &order {
        let Some(job) = pipeline.graph.job(id) else {
            continue;
        };
        let instances: Vec<String> = MatrixExpander::expand(job).into_iter().map(|i| i.name).collect();
        plan.push((job, instances));
    }

    if cmd.json {
        let jobs: Vec<serde_json::Value> = plan
            .iter()
            .map(|(job, instances)| {
                serde_json::json!({
                    "id": job.id,
                    "needs": job.needs,
                    "advisory": job.advisory,
                    "gated": pipeline.gated_job() == Some(job.id.as_str()),
                    "inputs": job.inputs.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "artifacts": job.artifacts.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "instances": instances,
                })
            })
            .collect();
        let data = serde_json::json!({ "pipeline": pipeline.name, "jobs": jobs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Execution plan for {}:", INFO, style(&pipeline.name).bold());
    for (position, (job, instances)) in plan.iter().enumerate() {
        let mut flags = Vec::new();
        if job.advisory {
            flags.push("advisory");
        }
        if pipeline.gated_job() == Some(job.id.as_str()) {
            flags.push("gated");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        let needs = if job.needs.is_empty() {
            String::new()
        } else {
            format!(" <- {}", job.needs.join(", "))
        };

        println!(
            "  {}. {}{}{}",
            position + 1,
            style(&job.id).bold(),
            style(needs).dim(),
            style(flags).yellow()
        );
        if instances.len() > 1 {
            for instance in instances {
                println!("       {}", style(instance).dim());
            }
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store().await?;

    // If a specific run ID is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print_run_details(&summary),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let runs = match &cmd.pipeline {
        Some(pipeline_name) => store.list_runs(pipeline_name).await?,
        None => {
            let mut all_runs = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all_runs.extend(store.list_runs(&pipeline).await?);
            }
            all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_runs
        }
    };
    let runs: Vec<RunSummary> = runs.into_iter().take(cmd.limit).collect();

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    println!("  Completed: {}", style(summary.completed_at.to_rfc3339()).dim());
    if let Ok(duration) = summary.completed_at.signed_duration_since(summary.started_at).to_std() {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }
    println!(
        "  Jobs: {} total, {} succeeded, {} failed, {} skipped",
        summary.total_jobs,
        style(summary.succeeded_jobs).green(),
        style(summary.failed_jobs).red(),
        style(summary.skipped_jobs).dim()
    );
    println!(
        "  Release: {}",
        if summary.release_executed {
            style("executed").green()
        } else {
            style("not executed").dim()
        }
    );
    if summary.status == ExecutionStatus::Failed {
        println!("  {}", style("At least one required job failed").red());
    }
}
