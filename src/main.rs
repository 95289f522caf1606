//! askbatch CLI - Resumable batch question answering.

use anyhow::{Context, Result};
use askbatch::{
    CheckpointStore, Config, LlmClient, PipelineController, QuestionSource, ResultStore,
    RunStats, StatusReport,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "askbatch")]
#[command(version)]
#[command(about = "Resumable batch question answering against OpenAI-compatible endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults apply if it does not exist)
    #[arg(short, long, global = true, default_value = "askbatch.toml")]
    config: PathBuf,

    /// Question list (overrides input.path)
    #[arg(short, long, global = true)]
    input: Option<PathBuf>,

    /// Result file (overrides output.results)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Checkpoint file (overrides output.checkpoint)
    #[arg(long, global = true)]
    checkpoint: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer every question not yet in the result file
    Run {
        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Show how far the current run got
    Status,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

/// `--verbose` forces debug; otherwise `RUST_LOG` applies, defaulting to info.
fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn print_example_config() {
    let example = r#"# askbatch configuration file

[service]
# API key (can also use the variable named by api_key_env)
# api_key = "${DEEPSEEK_API_KEY}"
api_key_env = "ASKBATCH_API_KEY"
base_url = "https://api.deepseek.com/v1"
model = "deepseek-chat"
timeout_secs = 120
# temperature = 0.3
# system_prompt = "Answer with the final result only."
answer_format = "plain"  # or "json": {"answer": "..."}

[retry]
max_retries = 3
retry_delay_secs = 2.0
linear_backoff = false
rate_limit_cooldown_secs = 10.0
max_total_wait_secs = 60.0

[input]
path = "questions.csv"
format = "csv"  # first column; or "lines"
skip_lines = 1

[output]
results = "results.json"
checkpoint = "process_checkpoint.json"
inter_question_delay_secs = 1.0
show_progress = true
"#;
    println!("{example}");
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_file_or_default(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    if let Some(input) = &cli.input {
        config.input.path = input.clone();
    }
    if let Some(output) = &cli.output {
        config.output.results = output.clone();
    }
    if let Some(checkpoint) = &cli.checkpoint {
        config.output.checkpoint = checkpoint.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_stats(stats: &RunStats, config: &Config) {
    let heading = if stats.cancelled {
        "Run Interrupted"
    } else {
        "Run Complete"
    };
    println!("\n=== {heading} ===");
    println!("Questions:   {}", stats.total_questions);
    println!("Processed:   {}", stats.processed);
    println!("Answered:    {}", stats.succeeded);
    println!("Raw:         {}", stats.raw_responses);
    println!("Failed:      {}", stats.failed);
    println!(
        "Skipped:     {} (checkpoint {}, already answered {})",
        stats.skipped(),
        stats.skipped_by_checkpoint,
        stats.skipped_by_content
    );
    println!("Stored:      {}", stats.store_total);
    println!("Runtime:     {:.1}s", stats.runtime_secs);
    println!("Output:      {:?}", config.output.results);
    if stats.cancelled {
        println!("Checkpoint:  {:?} (run again to resume)", config.output.checkpoint);
    }
}

fn print_status(report: &StatusReport, config: &Config) {
    println!("Questions:   {}", report.total_questions);
    println!("Stored:      {}", report.stored_records);
    println!("Remaining:   {}", report.remaining);
    match report.checkpoint {
        Some(index) => println!("Checkpoint:  next index {index} ({:?})", config.output.checkpoint),
        None => println!("Checkpoint:  none"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match &cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli)?;

            config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            info!("Configuration is valid");
            info!("  Endpoint: {} ({})", config.service.base_url, config.service.model);
            info!(
                "  Retries: {} attempts, wait ceiling {:.0}s",
                config.retry.max_retries, config.retry.max_total_wait_secs
            );
            info!("  Input: {:?}", config.input.path);
            info!("  Output: {:?}", config.output.results);
        }

        Commands::Status => {
            let config = load_config(&cli)?;

            let source = QuestionSource::from_config(&config.input)?;
            let questions = source.load()?;
            let store = ResultStore::open(&config.output.results);
            let checkpoint = CheckpointStore::new(&config.output.checkpoint);

            let report = StatusReport::collect(&questions, &store, &checkpoint);
            print_status(&report, &config);
        }

        Commands::Run { no_progress } => {
            let mut config = load_config(&cli)?;
            if *no_progress {
                config.output.show_progress = false;
            }

            let api_key = config
                .resolve_api_key()
                .context("Failed to resolve API key")?;

            let source = QuestionSource::from_config(&config.input)?;
            let questions = source.load()?;

            let client = LlmClient::new(&config.service, api_key)
                .context("Failed to build completion client")?;

            let mut pipeline = PipelineController::from_config(&config, questions, client);

            let cancel = pipeline.cancel_flag();
            tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if cancel.interrupt() {
                        warn!("Second interrupt, exiting now");
                        std::process::exit(130);
                    }
                    warn!("Interrupt received, stopping after the current question (Ctrl-C again to quit)");
                }
            });

            let stats = pipeline.run().await.context("Run aborted")?;
            print_stats(&stats, &config);
        }
    }

    Ok(())
}
