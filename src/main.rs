use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use keyrotor::config::RunConfig;
use keyrotor::credentials::{parse_keys, Provider};
use keyrotor::history::JsonHistory;
use keyrotor::scheduler::{GenerationMode, Job, JobStatus, RunReport, Scheduler};
use keyrotor::shutdown::install_shutdown_handler;
use keyrotor::worker::SimulatedGenerator;

#[derive(Parser, Debug)]
#[command(name = "keyrotor")]
#[command(version)]
#[command(about = "Batch generation jobs across a rotating pool of API keys")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a batch against a simulated provider
    Simulate(SimulateArgs),

    /// Show the last saved batch for a mode
    History {
        /// Directory holding saved batches
        #[arg(long, default_value = ".keyrotor")]
        dir: PathBuf,

        #[arg(long, default_value = "idea")]
        mode: ModeArg,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

// =============================================================================
// Simulate Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Number of job slots to generate
    #[arg(long, default_value = "20")]
    jobs: usize,

    /// What the batch produces
    #[arg(long, default_value = "idea")]
    mode: ModeArg,

    /// Topic seeded into every slot
    #[arg(long, default_value = "nature")]
    topic: String,

    /// Provider the keys belong to
    #[arg(long, default_value = "custom")]
    provider: ProviderArg,

    /// API keys, comma or newline separated
    #[arg(long, default_value = "")]
    keys: String,

    /// File with one API key per line
    #[arg(long)]
    keys_file: Option<PathBuf>,

    /// Worker count (defaults to one per key, at most 10)
    #[arg(long)]
    workers: Option<usize>,

    /// Simulated call latency in milliseconds
    #[arg(long, default_value = "300")]
    latency_ms: u64,

    /// Random extra latency, up to this many milliseconds
    #[arg(long, default_value = "200")]
    jitter_ms: u64,

    /// Rate-limit every Nth call (0 disables)
    #[arg(long, default_value = "0")]
    rate_limit_every: usize,

    /// Permanently fail every Nth call (0 disables)
    #[arg(long, default_value = "0")]
    fail_every: usize,

    /// Key cooldown after a rate limit, in milliseconds
    #[arg(long, default_value = "45000")]
    cooldown_ms: u64,

    /// Save idea/prompt batches into this directory
    #[arg(long)]
    history_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Metadata,
    Idea,
    Prompt,
}

impl From<ModeArg> for GenerationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Metadata => GenerationMode::Metadata,
            ModeArg::Idea => GenerationMode::Idea,
            ModeArg::Prompt => GenerationMode::Prompt,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Gemini,
    Openai,
    Groq,
    Custom,
}

impl From<ProviderArg> for Provider {
    fn from(provider: ProviderArg) -> Self {
        match provider {
            ProviderArg::Gemini => Provider::Gemini,
            ProviderArg::Openai => Provider::OpenAi,
            ProviderArg::Groq => Provider::Groq,
            ProviderArg::Custom => Provider::Custom,
        }
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    label: String,
    status: String,
    title: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct SimulateOutput {
    report: RunReport,
    jobs: Vec<JobListItem>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn job_list_item(job: &Job) -> JobListItem {
    JobListItem {
        job_id: job.id.to_string(),
        label: job.label.clone(),
        status: job.status.to_string().to_uppercase(),
        title: job.result.as_ref().map(|m| m.en.title.clone()),
        error: job.error.clone(),
    }
}

fn print_job_table(jobs: &[Job]) {
    println!("{:<38} {:<14} {:<11} DETAIL", "JOB ID", "LABEL", "STATUS");
    for job in jobs {
        let detail = match job.status {
            JobStatus::Completed => job
                .result
                .as_ref()
                .map(|m| m.en.title.clone())
                .unwrap_or_default(),
            JobStatus::Failed => job.error.clone().unwrap_or_default(),
            _ => String::new(),
        };
        println!(
            "{:<38} {:<14} {:<11} {}",
            job.id,
            job.label,
            job.status.to_string().to_uppercase(),
            detail
        );
    }
}

async fn load_keys(args: &SimulateArgs) -> Result<String, Box<dyn std::error::Error>> {
    let mut text = args.keys.clone();
    if let Some(path) = &args.keys_file {
        let contents = tokio::fs::read_to_string(path).await?;
        text.push('\n');
        text.push_str(&contents);
    }
    Ok(text)
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_simulate(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let provider = Provider::from(args.provider);
    let parsed = parse_keys(provider, &load_keys(&args).await?);
    if parsed.credentials.is_empty() {
        eprintln!("Error: Please provide at least one API key (--keys or --keys-file).");
        std::process::exit(1);
    }
    if !parsed.unrecognized.is_empty() {
        eprintln!(
            "Warning: {} key(s) do not look like {} keys",
            parsed.unrecognized.len(),
            provider
        );
    }

    let worker_count = args
        .workers
        .unwrap_or_else(|| RunConfig::suggested_worker_count(parsed.credentials.len()));
    let config = RunConfig::new(worker_count).with_cooldown_ms(args.cooldown_ms);

    let generator = SimulatedGenerator::new(Duration::from_millis(args.latency_ms))
        .with_jitter(Duration::from_millis(args.jitter_ms))
        .rate_limit_every(args.rate_limit_every)
        .fail_every(args.fail_every);

    let mut scheduler = Scheduler::new(Arc::new(generator), config);
    if let Some(dir) = &args.history_dir {
        scheduler = scheduler.with_history(Arc::new(JsonHistory::new(dir)));
    }

    let mode = GenerationMode::from(args.mode);
    let prefix = match mode {
        GenerationMode::Metadata => "File",
        GenerationMode::Idea => "Idea",
        GenerationMode::Prompt => "Prompt",
    };
    scheduler
        .add_jobs((1..=args.jobs).map(|i| Job::text(format!("{prefix}_{i}"), &args.topic, "")))
        .await;

    let handle = scheduler.start(mode, parsed.credentials).await?;
    install_shutdown_handler(handle.cancellation_token());
    let report = handle.wait().await?;
    let jobs = scheduler.store().snapshot().await;

    match args.output {
        OutputFormat::Json => {
            let output = SimulateOutput {
                report,
                jobs: jobs.iter().map(job_list_item).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            print_job_table(&jobs);
            println!();
            println!("Run ID:     {}", report.run_id);
            println!("Workers:    {}", report.workers);
            println!("Completed:  {}", report.counts.completed);
            println!("Failed:     {}", report.counts.failed);
            println!("Pending:    {}", report.counts.pending);
            println!("Stopped:    {}", report.cancelled);
            println!("Elapsed:    {} ms", report.elapsed_ms);
        }
    }
    Ok(())
}

async fn run_history(
    dir: PathBuf,
    mode: GenerationMode,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let history = JsonHistory::new(dir);
    let Some(jobs) = history.load(mode).await? else {
        eprintln!("No saved {} batch in {}", mode, history.dir().display());
        std::process::exit(1);
    };

    match output {
        OutputFormat::Json => {
            let items: Vec<JobListItem> = jobs.iter().map(job_list_item).collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Table => print_job_table(&jobs),
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Simulate(simulate_args) => {
            run_simulate(simulate_args).await?;
        }
        Commands::History { dir, mode, output } => {
            run_history(dir, mode.into(), output).await?;
        }
    }

    Ok(())
}
