//! scriptest CLI - programmable test runner for Rhai test scripts.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use scriptest::config::{self, Config};
use scriptest::discover::discover;
use scriptest::pool::Pool;
use scriptest::reporter::{self, ReportContext};

#[derive(Parser)]
#[command(name = "scriptest")]
#[command(about = "Programmable parallel test runner for Rhai test scripts", long_about = None)]
#[command(version)]
struct Cli {
    /// Glob patterns selecting test files (repeatable)
    #[arg(short, long)]
    pattern: Vec<String>,

    /// Glob patterns excluding files (repeatable)
    #[arg(short = 'x', long)]
    exclude: Vec<String>,

    /// Explicit test files (repeatable)
    #[arg(short, long)]
    file: Vec<PathBuf>,

    /// Per-file timeout in milliseconds; 0 means the runner default
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Configuration file path
    #[arg(short, long, default_value = "scriptest.toml")]
    config: PathBuf,

    /// Re-run on change (not implemented)
    #[arg(long)]
    watch: bool,

    /// Directory where file reporters write
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Modules preloaded before each test file (repeatable)
    #[arg(short, long)]
    require: Vec<String>,

    /// Discover and list tests without running them
    #[arg(long)]
    collect_only: bool,

    /// Maximum number of files executing concurrently
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration; a missing file just means defaults.
    let mut config = if cli.config.exists() {
        config::load_config(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    } else {
        info!(
            "No config file at {}, using defaults",
            cli.config.display()
        );
        Config::default()
    };

    // Apply CLI overrides
    if !cli.pattern.is_empty() {
        config.run.pattern = cli.pattern;
    }
    if !cli.exclude.is_empty() {
        config.run.exclude = cli.exclude;
    }
    if !cli.file.is_empty() {
        config.run.files = cli.file;
    }
    if let Some(timeout) = cli.timeout {
        config.run.timeout = timeout;
    }
    if let Some(max_concurrent) = cli.max_concurrent {
        config.run.max_concurrent = max_concurrent.max(1);
    }
    if !cli.require.is_empty() {
        config.run.require = cli.require;
    }
    if let Some(output) = cli.output {
        config.report.output_dir = output;
    }
    if cli.watch {
        config.run.watch = true;
    }
    if cli.collect_only {
        config.run.collect_only = true;
    }

    if config.run.watch {
        warn!("watch mode is not implemented; running once");
    }

    config::load_env_files(&config.run.envs);

    let files = discover(&config.run.pattern, &config.run.exclude, &config.run.files)?;
    if files.is_empty() {
        warn!("No test files matched");
        return Ok(());
    }
    info!("Discovered {} test files", files.len());

    let pool = Pool::new(&config);
    let outcome = pool.run(&files).await;

    let reporters = reporter::from_names(&config.report.reporters, cli.verbose);
    let ctx = ReportContext {
        reports: &outcome.reports,
        output_dir: Some(&config.report.output_dir),
        elapsed: outcome.duration,
    };
    reporter::run_reporters(&reporters, &ctx).await;

    std::process::exit(outcome.exit_code);
}
