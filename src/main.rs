//! Series Groups CLI
//!
//! Runs group commands against an in-memory series universe:
//! - Execute commands given on the command line
//! - Read commands from stdin
//! - Generate a default config file
//!
//! Responses are printed as JSON, one per line.

use anyhow::Context;
use clap::{Parser, Subcommand};
use series_groups::{
    Config, GroupEngine, LoggingConfig, MemoryUniverse, SeriesUniverse, StaticClusterView,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "series-groups")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pattern-defined series groups with set-algebra queries")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Series to seed the universe with (comma-separated or repeated)
    #[arg(short, long, value_delimiter = ',', global = true)]
    pub series: Vec<String>,

    /// File with one series name per line
    #[arg(long, global = true)]
    pub series_file: Option<PathBuf>,

    /// How long to wait for membership to converge after each command (ms)
    #[arg(long, default_value = "5000", global = true)]
    pub settle_ms: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute commands given as arguments
    Exec {
        /// Commands, e.g. "create group `a` for /a.*/"
        commands: Vec<String>,
        /// Print the membership summary when done
        #[arg(long)]
        summary: bool,
    },

    /// Read commands from stdin, one per line
    Shell,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = series_groups::config::generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, content)
                    .with_context(|| format!("writing config to {:?}", path))?;
                eprintln!("Config written to {:?}", path);
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;
    tracing::info!("Series groups v{}", env!("CARGO_PKG_VERSION"));

    let engine = build_engine(&cli, &config)?;
    engine.start();
    let settle = Duration::from_millis(cli.settle_ms);

    let mut failures = 0;
    match cli.command {
        Commands::Exec { commands, summary } => {
            for command in &commands {
                if !run_command(&engine, command, settle).await {
                    failures += 1;
                }
            }
            if summary {
                let summary = engine.membership_summary().await;
                println!("{}", serde_json::to_string(&summary)?);
            }
        }
        Commands::Shell => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if !run_command(&engine, line, settle).await {
                    failures += 1;
                }
            }
        }
        Commands::Config { .. } => {}
    }

    engine.shutdown();
    if failures > 0 {
        anyhow::bail!("{} command(s) failed", failures);
    }
    Ok(())
}

/// Run one command and print its response; false on error
async fn run_command(engine: &GroupEngine, command: &str, settle: Duration) -> bool {
    match engine.execute(command).await {
        Ok(response) => {
            println!("{}", response.to_json());
            if !engine.wait_converged(settle).await {
                tracing::warn!(command, "Membership did not converge within {:?}", settle);
            }
            true
        }
        Err(e) => {
            println!("{}", serde_json::json!({ "error_msg": e.to_string() }));
            false
        }
    }
}

fn build_engine(cli: &Cli, config: &Config) -> anyhow::Result<GroupEngine> {
    let mut names = cli.series.clone();
    if let Some(path) = &cli.series_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading series from {:?}", path))?;
        names.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }

    let store = MemoryUniverse::with_series(names);
    store.set_pool_count(config.cluster.pool_count);
    let universe = if config.cluster.pool_count > 1 {
        store.partition(config.cluster.local_pool)
    } else {
        store
    };
    tracing::info!(
        series = universe.len(),
        pool = config.cluster.local_pool,
        "Series universe loaded"
    );

    let view = StaticClusterView::new(config.cluster.local_pool, config.cluster.pool_count);
    Ok(GroupEngine::new(config, Arc::new(universe), Arc::new(view)))
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("series_groups={}", config.level)));

    // stdout carries responses; logs go to stderr or a file
    let writer = match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .init(),
    }
    Ok(())
}
