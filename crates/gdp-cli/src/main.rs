use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gdp_storage::StateStore;
use gdp_sync::{load_run_stats, Cadence, DiscoveryScheduler, Pipeline, PipelineConfig, RunOutcome, Section, StoreHealth};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gdp")]
#[command(about = "Grant discovery pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one discovery now.
    Discover,
    /// Run discovery on a recurring cadence until interrupted.
    Schedule {
        #[arg(value_enum)]
        cadence: CadenceArg,
    },
    /// Print the composed health view.
    Status,
    /// Check that the grant store answers.
    Health,
    /// Print cumulative run statistics.
    Stats,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CadenceArg {
    /// Every 6 hours.
    Interval,
    /// Daily at 09:00 UTC.
    Daily,
    /// Mondays at 09:00 UTC.
    Weekly,
}

impl From<CadenceArg> for Cadence {
    fn from(arg: CadenceArg) -> Self {
        match arg {
            CadenceArg::Interval => Cadence::interval(),
            CadenceArg::Daily => Cadence::daily(),
            CadenceArg::Weekly => Cadence::weekly(),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("rendering output")?;
    println!("{text}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command {
        Commands::Discover => discover(&config).await,
        Commands::Schedule { cadence } => schedule(&config, cadence.into()).await,
        Commands::Status => status(&config).await,
        Commands::Health => health(&config).await,
        Commands::Stats => {
            let stats = load_run_stats(&StateStore::new(&config.state_dir))
                .await
                .context("reading run stats")?;
            print_json(&stats)
        }
    }
}

/// Installs the interrupt handler right away so a Ctrl-C during the first
/// run is seen. The first interrupt flips `shutdown_tx`; a second one exits.
fn listen_for_interrupt(shutdown_tx: watch::Sender<bool>) -> Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut interrupt = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .context("installing interrupt handler")?;
    #[cfg(windows)]
    let mut interrupt = tokio::signal::windows::ctrl_c().context("installing interrupt handler")?;

    Ok(tokio::spawn(async move {
        if interrupt.recv().await.is_none() {
            return;
        }
        info!("interrupt received, finishing the current run");
        let _ = shutdown_tx.send(true);
        if interrupt.recv().await.is_some() {
            warn!("second interrupt, exiting without waiting");
            std::process::exit(130);
        }
    }))
}

async fn discover(config: &PipelineConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = listen_for_interrupt(shutdown_tx)?;
    let pipeline = Arc::new(Pipeline::from_config(config, shutdown_rx).await?);
    let scheduler = DiscoveryScheduler::new(pipeline, StateStore::new(&config.state_dir)).await;

    let outcome = scheduler.trigger_run().await;
    listener.abort();
    match &outcome {
        RunOutcome::Completed { grants } => println!("discovery complete: grants={grants}"),
        RunOutcome::Failed { error } => println!("discovery failed: {error}"),
        RunOutcome::Skipped => println!("discovery skipped: a run is already in progress"),
    }
    print_json(&scheduler.stats().await)
}

async fn schedule(config: &PipelineConfig, cadence: Cadence) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stop = shutdown_tx.subscribe();
    let listener = listen_for_interrupt(shutdown_tx)?;
    let pipeline = Arc::new(Pipeline::from_config(config, shutdown_rx).await?);
    let scheduler = DiscoveryScheduler::new(pipeline, StateStore::new(&config.state_dir)).await;

    let result = scheduler.run_until_stopped(cadence, stop).await;
    listener.abort();
    result.map(|_| ())
}

async fn health(config: &PipelineConfig) -> Result<()> {
    let integration = Pipeline::integration(config)?;
    let health = integration.store_health().await;
    if let StoreHealth::Unhealthy { error } = &health {
        warn!(%error, "grant store unhealthy");
    }
    print_json(&health)
}

async fn status(config: &PipelineConfig) -> Result<()> {
    let integration = Pipeline::integration(config)?;
    if let Err(err) = integration.initialize().await {
        warn!(error = %err, "integration not initialized");
    }
    let scheduler = match load_run_stats(integration.state()).await {
        Ok(stats) => Section::Ok {
            value: gdp_sync::SchedulerSnapshot {
                stats,
                is_running: false,
                cadence: None,
                next_run: None,
            },
        },
        Err(err) => Section::Error { error: err.to_string() },
    };
    print_json(&integration.status(scheduler).await)
}
