//! CLI command definitions

use clap::Args;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Triggering event type
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Triggering branch
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Base revision of the triggering commit range
    #[arg(long)]
    pub base: Option<String>,

    /// Head revision of the triggering commit range
    #[arg(long)]
    pub head: Option<String>,

    /// Changed paths, instead of asking git (repeatable)
    #[arg(long)]
    pub changed: Vec<String>,

    /// Working directory for steps and git change detection
    #[arg(long)]
    pub workdir: Option<String>,

    /// Read credentials from environment variables with this prefix
    #[arg(long)]
    pub secret_prefix: Option<String>,

    /// Worker pool size (overrides the pipeline settings)
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Environment overrides for every step (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the execution plan of a pipeline
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
