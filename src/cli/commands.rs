//! CLI command definitions for cohort-forge.
//!
//! Jobs can be served over HTTP or run once from the command line. Stored
//! mind-maps can be replayed straight from the SQLite database.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::jobs::{GenerationRequest, JobStatus, PrivacyLevel};
use crate::metrics::init_metrics;
use crate::mindmap::{MindMapStore, NodeId, ReplayCommand, ReplayEngine};
use crate::pipeline::{JobEvent, JobOrchestrator, OrchestratorConfig, PhasePlan};
use crate::storage::{RecordStore, SqliteStore};

/// Default HTTP port for `serve`.
const DEFAULT_PORT: u16 = 8080;

/// Orchestrate multi-agent synthetic cohort generation.
#[derive(Parser)]
#[command(name = "cohort-forge")]
#[command(about = "Orchestrate multi-phase, multi-agent synthetic cohort generation")]
#[command(version)]
#[command(
    long_about = "cohort-forge runs synthetic cohort generation jobs through a fixed sequence of agent phases and records every agent decision in an auditable mind-map.\n\nExample usage:\n  cohort-forge run -n 50 -c CKD+Diabetes --adversarial\n  cohort-forge serve --port 8080 --database sqlite://cohort.db"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Serve the job API over HTTP.
    Serve(ServeArgs),

    /// Run a single job to completion and print its results.
    Run(RunArgs),

    /// List registered agents.
    Agents(AgentsArgs),

    /// Print the phase plan.
    Phases(PhasesArgs),

    /// Replay a stored mind-map subtree.
    Replay(ReplayArgs),
}

/// Options shared by commands that build an orchestrator.
#[derive(Parser, Debug, Clone, Default)]
pub struct OrchestratorArgs {
    /// SQLite URL for durable job and node records (e.g. sqlite://cohort.db).
    #[arg(long, env = "DATABASE_URL")]
    pub database: Option<String>,

    /// YAML phase plan replacing the built-in plan.
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Default per-agent timeout in seconds.
    #[arg(long)]
    pub agent_timeout: Option<u64>,

    /// Maximum number of jobs running at once.
    #[arg(long)]
    pub max_concurrent_jobs: Option<usize>,
}

impl OrchestratorArgs {
    /// Environment configuration with command-line overrides applied.
    pub fn to_config(&self) -> anyhow::Result<OrchestratorConfig> {
        let mut config = OrchestratorConfig::from_env().context("Invalid environment configuration")?;
        if let Some(url) = &self.database {
            config = config.with_database_url(url.clone());
        }
        if let Some(path) = &self.plan {
            config = config.with_phase_plan_path(path.clone());
        }
        if let Some(secs) = self.agent_timeout {
            config = config.with_default_agent_timeout(std::time::Duration::from_secs(secs));
        }
        if let Some(max) = self.max_concurrent_jobs {
            config = config.with_max_concurrent_jobs(max);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Arguments for `cohort-forge serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[command(flatten)]
    pub orchestrator: OrchestratorArgs,
}

/// Arguments for `cohort-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Number of synthetic patients.
    #[arg(short = 'n', long, default_value = "10")]
    pub population: u64,

    /// Target condition (e.g. "CKD+Diabetes").
    #[arg(short, long)]
    pub condition: String,

    /// Run adversarial agents.
    #[arg(long)]
    pub adversarial: bool,

    /// Require the clinical reviewer.
    #[arg(long)]
    pub clinical_review: bool,

    /// Privacy level (low, medium, high).
    #[arg(long, default_value = "medium", value_parser = parse_privacy_level)]
    pub privacy_level: PrivacyLevel,

    /// Extra agent configuration as key=value; values are parsed as JSON when possible.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub settings: Vec<String>,

    #[command(flatten)]
    pub orchestrator: OrchestratorArgs,

    /// Print only the summary instead of the full results.
    #[arg(long)]
    pub summary: bool,
}

/// Arguments for `cohort-forge agents`.
#[derive(Parser, Debug)]
pub struct AgentsArgs {
    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `cohort-forge phases`.
#[derive(Parser, Debug)]
pub struct PhasesArgs {
    /// YAML phase plan to validate and print instead of the built-in plan.
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Output the plan as YAML.
    #[arg(long)]
    pub yaml: bool,
}

/// Arguments for `cohort-forge replay`.
#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// SQLite URL holding the job's records.
    #[arg(long, env = "DATABASE_URL")]
    pub database: String,

    /// Job id.
    #[arg(long)]
    pub job: Uuid,

    /// Start node; the job's root when omitted.
    #[arg(long)]
    pub node: Option<Uuid>,

    /// Return only the frame at this cursor.
    #[arg(long)]
    pub step: Option<usize>,
}

fn parse_privacy_level(value: &str) -> Result<PrivacyLevel, String> {
    match value.to_ascii_lowercase().as_str() {
        "low" => Ok(PrivacyLevel::Low),
        "medium" => Ok(PrivacyLevel::Medium),
        "high" => Ok(PrivacyLevel::High),
        other => Err(format!(
            "unknown privacy level '{}' (expected low, medium or high)",
            other
        )),
    }
}

fn parse_setting(raw: &str) -> anyhow::Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Setting '{}' must look like key=value", raw))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Setting '{}' has an empty key", raw);
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Parse command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args).await,
        Commands::Run(args) => run_job_command(args).await,
        Commands::Agents(args) => run_agents_command(args),
        Commands::Phases(args) => run_phases_command(args),
        Commands::Replay(args) => run_replay_command(args).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    init_metrics().map_err(|e| anyhow::anyhow!("Failed to register metrics: {}", e))?;

    let config = args.orchestrator.to_config()?;
    let orchestrator = JobOrchestrator::from_config(config).await?;
    info!(
        agents = orchestrator.agents().len(),
        phases = orchestrator.plan().total_phases(),
        "Orchestrator ready"
    );

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", args.host, args.port))?;
    crate::server::serve(orchestrator, addr).await?;
    Ok(())
}

async fn run_job_command(args: RunArgs) -> anyhow::Result<()> {
    let mut request = GenerationRequest::new(args.population, args.condition)
        .with_adversarial_testing(args.adversarial)
        .with_clinical_review(args.clinical_review)
        .with_privacy_level(args.privacy_level);
    for raw in &args.settings {
        let (key, value) = parse_setting(raw)?;
        request = request.with_config(key, value);
    }

    let config = args.orchestrator.to_config()?;
    let orchestrator = JobOrchestrator::from_config(config).await?;

    let mut events = orchestrator.subscribe();
    let receipt = orchestrator.submit(request).await?;
    let job_id = receipt.job_id;
    info!(job_id = %job_id, "Job started");

    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.job_id() != job_id {
                continue;
            }
            match event {
                JobEvent::PhaseCompleted {
                    index,
                    name,
                    progress,
                    ..
                } => info!(phase = index, name = %name, progress, "Phase completed"),
                JobEvent::FindingRaised {
                    agent_id, finding, ..
                } => warn!(agent = %agent_id, severity = ?finding.severity, "{}", finding.summary),
                JobEvent::JobFinished { .. } => break,
                _ => {}
            }
        }
    });

    let snapshot = orchestrator.wait(job_id).await?;
    progress.abort();

    let results = orchestrator.partial_results(job_id).await?;
    let output = if args.summary {
        serde_json::to_string_pretty(&results.execution_summary)
    } else {
        serde_json::to_string_pretty(&results)
    }
    .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
    println!("{}", output);

    match snapshot.status {
        JobStatus::Completed => Ok(()),
        status => {
            let reason = snapshot
                .failure
                .map(|f| format!(": {}", f.reason))
                .unwrap_or_default();
            anyhow::bail!("Job {} ended {}{}", job_id, status, reason)
        }
    }
}

fn run_agents_command(args: AgentsArgs) -> anyhow::Result<()> {
    let orchestrator = JobOrchestrator::with_defaults()?;
    let agents = orchestrator.agents();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }

    for agent in agents {
        println!(
            "{:<32} {:<12} {:<12} {}",
            agent.id,
            agent.role.to_string(),
            agent.category.to_string(),
            agent.description
        );
    }
    Ok(())
}

fn run_phases_command(args: PhasesArgs) -> anyhow::Result<()> {
    let mut builder = JobOrchestrator::builder();
    if let Some(path) = &args.plan {
        let plan = PhasePlan::from_file(path)
            .with_context(|| format!("Failed to load phase plan {}", path.display()))?;
        builder = builder.plan(plan);
    }
    let orchestrator = builder.build()?;
    let plan = orchestrator.plan();

    if args.yaml {
        print!("{}", plan.to_yaml()?);
        return Ok(());
    }

    println!("root: {}", plan.root_agent);
    for phase in &plan.phases {
        let agents: Vec<&str> = phase.agents.iter().map(|a| a.agent.as_str()).collect();
        println!("{:>2}. {:<28} {}", phase.index, phase.name, agents.join(", "));
    }
    Ok(())
}

async fn run_replay_command(args: ReplayArgs) -> anyhow::Result<()> {
    let store = SqliteStore::open(&args.database).await?;
    let records = store.load_nodes(args.job).await?;
    if records.is_empty() {
        anyhow::bail!("No mind-map nodes stored for job {}", args.job);
    }

    let mindmap = MindMapStore::from_records(args.job, records)?;
    let start = match args.node {
        Some(id) => NodeId::from(id),
        None => mindmap
            .root(args.job)?
            .ok_or_else(|| anyhow::anyhow!("Job {} has no root node", args.job))?,
    };

    let command = match args.step {
        Some(cursor) => ReplayCommand::Step { cursor },
        None => ReplayCommand::Play,
    };
    let response = ReplayEngine::new(Arc::new(mindmap)).execute(start, command)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let cli = Cli::try_parse_from(["cohort-forge", "run", "-c", "CKD"]).expect("should parse");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.population, 10);
                assert_eq!(args.condition, "CKD");
                assert!(!args.adversarial);
                assert!(!args.clinical_review);
                assert_eq!(args.privacy_level, PrivacyLevel::Medium);
                assert!(args.settings.is_empty());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_command_with_all_options() {
        let cli = Cli::try_parse_from([
            "cohort-forge",
            "run",
            "-n",
            "250",
            "-c",
            "CKD+Diabetes",
            "--adversarial",
            "--clinical-review",
            "--privacy-level",
            "HIGH",
            "--set",
            "seed=42",
            "--set",
            "region=eu",
            "--plan",
            "plan.yaml",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.population, 250);
                assert!(args.adversarial);
                assert!(args.clinical_review);
                assert_eq!(args.privacy_level, PrivacyLevel::High);
                assert_eq!(args.settings, vec!["seed=42", "region=eu"]);
                assert_eq!(args.orchestrator.plan, Some(PathBuf::from("plan.yaml")));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_invalid_privacy_level_is_rejected() {
        let result = Cli::try_parse_from([
            "cohort-forge",
            "run",
            "-c",
            "CKD",
            "--privacy-level",
            "extreme",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_setting() {
        assert_eq!(
            parse_setting("seed=42").unwrap(),
            ("seed".to_string(), serde_json::json!(42))
        );
        assert_eq!(
            parse_setting("region=eu-west").unwrap(),
            ("region".to_string(), serde_json::json!("eu-west"))
        );
        assert!(parse_setting("novalue").is_err());
        assert!(parse_setting("=1").is_err());
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["cohort-forge", "serve"]).expect("should parse");
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.host, "127.0.0.1");
                assert_eq!(args.port, DEFAULT_PORT);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_global_log_level() {
        let cli = Cli::try_parse_from(["cohort-forge", "agents", "--log-level", "debug"])
            .expect("should parse");
        assert_eq!(cli.log_level, "debug");
    }
}
