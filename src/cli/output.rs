//! CLI output formatting

use crate::core::{ExecutionStatus, GateDecision, JobState, Outcome, RunResult, StepStatus};
use crate::execution::ExecutionEvent;
use crate::persistence::RunSummary;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "+ ");

/// Create a progress bar counting finished job instances
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a terminal outcome for display
pub fn format_outcome(outcome: Outcome) -> String {
    let label = outcome.to_string();
    match outcome {
        Outcome::Success => style(label).green().to_string(),
        Outcome::Failure => style(label).red().to_string(),
        Outcome::SkippedDependency | Outcome::SkippedGate => style(label).dim().to_string(),
        Outcome::Cancelled => style(label).yellow().to_string(),
    }
}

fn state_icon(state: &JobState) -> Emoji<'static, 'static> {
    match state.outcome() {
        Some(Outcome::Success) => CHECK,
        Some(Outcome::Failure) => CROSS,
        Some(Outcome::Cancelled) => WARN,
        Some(_) => SKIP,
        None => SPINNER,
    }
}

/// Reason carried by a state that did not succeed
fn state_detail(state: &JobState) -> Option<String> {
    match state {
        JobState::Failed { error, .. } => Some(error.clone()),
        JobState::SkippedDependency { upstream } => Some(format!("upstream '{}' did not succeed", upstream)),
        JobState::SkippedGate { reason } | JobState::Cancelled { reason } => Some(reason.clone()),
        _ => None,
    }
}

/// Format a run summary for display
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        _ => INFO,
    };

    let release = if summary.release_executed {
        style("released").green().to_string()
    } else {
        style("not released").dim().to_string()
    };

    format!(
        "{} {} - {} - {} ({}/{} jobs, {} failed, {} skipped) - {}",
        status_icon,
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.succeeded_jobs,
        summary.total_jobs,
        summary.failed_jobs,
        summary.skipped_jobs,
        release
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::RunStarted {
            run_id,
            pipeline_name,
            jobs,
        } => format!(
            "{} Starting pipeline {} ({}, {} jobs)",
            ROCKET,
            style(pipeline_name).bold(),
            style(&run_id.to_string()[..8]).dim(),
            jobs
        ),
        ExecutionEvent::GateEvaluated { job, decision } => match decision {
            GateDecision::Eligible => format!("{} Release gate open for {}", INFO, style(job).cyan()),
            GateDecision::Skipped { unmet } => format!(
                "{} Release gate closed for {}: {}",
                INFO,
                style(job).cyan(),
                style(unmet.join("; ")).dim()
            ),
        },
        ExecutionEvent::JobStarted { job, instances } if *instances > 1 => {
            format!("{} {} ({} instances)", SPINNER, style(job).cyan(), instances)
        }
        ExecutionEvent::JobStarted { job, .. } => format!("{} {}", SPINNER, style(job).cyan()),
        ExecutionEvent::JobSkipped { job, state } => format!(
            "{} {}: {}",
            state_icon(state),
            style(job).dim(),
            style(state_detail(state).unwrap_or_default()).dim()
        ),
        ExecutionEvent::StepSkipped { instance, step, reason } => format!(
            "{} {} / {} skipped: {}",
            WARN,
            style(instance).yellow(),
            step,
            style(reason).dim()
        ),
        ExecutionEvent::StepFailed { instance, step, error } => format!(
            "{} {} / {}: {}",
            CROSS,
            style(instance).red(),
            step,
            style(error).dim()
        ),
        ExecutionEvent::ArtifactPublished { reference } => format!(
            "{} {} published {} v{} ({})",
            PACKAGE,
            style(&reference.instance).dim(),
            style(&reference.name).cyan(),
            reference.version,
            style(&reference.digest[..reference.digest.len().min(12)]).dim()
        ),
        ExecutionEvent::InstanceFinished { instance, state, .. } => {
            format!("{} {}", state_icon(state), style(instance).dim())
        }
        ExecutionEvent::JobFinished { job, state } => match state_detail(state) {
            Some(detail) => format!("{} {}: {}", state_icon(state), style(job).bold(), style(detail).dim()),
            None => format!("{} {}", state_icon(state), style(job).bold()),
        },
        ExecutionEvent::RunCompleted { status, .. } => {
            format!("{} Run finished: {}", INFO, format_status(*status))
        }
        ExecutionEvent::InstanceStarted { .. } | ExecutionEvent::StepStarted { .. } => return None,
    };

    Some(line)
}

/// Format the per-job report of a finished run
pub fn format_run_result(result: &RunResult) -> Vec<String> {
    let mut lines = Vec::new();

    for (id, job) in &result.jobs {
        let outcome = job.state.outcome().map(format_outcome).unwrap_or_default();
        let advisory = if job.advisory {
            style(" (advisory)").dim().to_string()
        } else {
            String::new()
        };
        lines.push(format!("{} {}{} {}", state_icon(&job.state), style(id).bold(), advisory, outcome));

        if job.instances.len() > 1 {
            for instance in &job.instances {
                let outcome = instance.state.outcome().map(format_outcome).unwrap_or_default();
                lines.push(format!("    {} {}", style(&instance.name).dim(), outcome));
            }
        }

        for instance in &job.instances {
            for step in &instance.steps {
                if let StepStatus::Failed { error } = &step.status {
                    lines.push(format!(
                        "    {} {} / {}: {}",
                        CROSS,
                        instance.name,
                        step.name,
                        style(error).red()
                    ));
                }
            }
        }

        for (name, value) in &job.outputs {
            lines.push(format!("    {} = {}", style(name).cyan(), value));
        }
    }

    if let Some(GateDecision::Skipped { unmet }) = &result.release {
        lines.push(format!("{} Release skipped: {}", INFO, style(unmet.join("; ")).dim()));
    }

    lines
}

/// Format a duration as `1h 2m 3s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
