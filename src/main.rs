//! WolfLease - Lease-Based Leader Election
//!
//! Command-line runner that exercises the election coordinator against an
//! in-process lease service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolflease::config::{LoggingConfig, WolfLeaseConfig};
use wolflease::coordinator::{Coordinator, CoordinatorEvent};
use wolflease::error::Result;
use wolflease::lease::MemoryLeaseService;

/// WolfLease - Lease-Based Leader Election
#[derive(Parser)]
#[command(name = "wolflease")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolflease.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run competing coordinators against an in-memory lease service
    Run {
        /// Number of coordinators (defaults to service.nodes)
        #[arg(short, long)]
        nodes: Option<usize>,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(short, long)]
        duration_secs: Option<u64>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolflease.toml")]
        output: PathBuf,

        /// Lease key to compete for
        #[arg(long, default_value = "coordinator:leader")]
        key: String,
    },

    /// Validate configuration file
    Validate,

    /// Show effective configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { nodes, duration_secs, json } => {
            let config = load_or_default(&cli.config)?;
            init_logging(&config.logging, cli.log_level.as_deref());
            run_nodes(config, nodes, duration_secs.map(Duration::from_secs), json).await
        }
        Commands::Init { output, key } => run_init(output, key),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&logging.level);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load the config file, falling back to defaults when it does not exist
fn load_or_default(path: &Path) -> Result<WolfLeaseConfig> {
    if path.exists() {
        WolfLeaseConfig::from_file(path)
    } else {
        eprintln!("No configuration at {}, using defaults", path.display());
        Ok(WolfLeaseConfig::default())
    }
}

/// Run coordinators until Ctrl+C or the optional deadline
async fn run_nodes(
    config: WolfLeaseConfig,
    nodes: Option<usize>,
    duration: Option<Duration>,
    json: bool,
) -> Result<()> {
    let nodes = nodes.unwrap_or(config.service.nodes).max(1);
    let service = MemoryLeaseService::new().with_failure_rate(config.service.failure_rate);

    tracing::info!(
        "Starting {} coordinators on key {} (ttl: {} ms, renew: {} ms, retry: {} ms)",
        nodes,
        config.coordinator.key,
        config.coordinator.ttl_ms,
        config.coordinator.renew_interval_ms,
        config.coordinator.retry_interval_ms
    );

    let mut coordinators = Vec::with_capacity(nodes);
    let mut reporters = Vec::with_capacity(nodes);
    for i in 1..=nodes {
        let node_id = format!("node-{i}");
        let coordinator = Coordinator::new(service.client(), config.coordinator.clone())?;

        let mut events = coordinator.subscribe();
        let reporter_id = node_id.clone();
        reporters.push(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                report(&reporter_id, &event, json);
            }
        }));

        coordinator.start().await?;
        coordinators.push((node_id, coordinator));
    }

    let shutdown = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
            }
        }
    };
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(config.coordinator.renew_interval());
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                let leaders: Vec<&str> = coordinators
                    .iter()
                    .filter(|(_, coordinator)| coordinator.is_leader())
                    .map(|(id, _)| id.as_str())
                    .collect();
                match leaders.as_slice() {
                    [] => tracing::info!("No leader at the moment"),
                    [leader] => tracing::info!("Current leader: {}", leader),
                    many => tracing::warn!("Multiple nodes believe they lead: {:?}", many),
                }
            }
        }
    }

    for (node_id, coordinator) in &coordinators {
        if let Err(e) = coordinator.resign().await {
            tracing::warn!("{} failed to resign: {}", node_id, e);
        }
    }

    // Reporters finish once the coordinators are gone
    drop(coordinators);
    join_reporters(reporters).await;

    tracing::info!("WolfLease shutdown complete");
    Ok(())
}

/// Wait for the event reporters, logging any that panicked. Returns the
/// number of failed reporters.
async fn join_reporters(reporters: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for reporter in reporters {
        if let Err(e) = reporter.await {
            tracing::warn!("Event reporter task failed: {}", e);
            failed += 1;
        }
    }
    failed
}

/// Print one event
fn report(node_id: &str, event: &CoordinatorEvent, json: bool) {
    if json {
        match serde_json::to_value(event) {
            Ok(mut value) => {
                value["node"] = serde_json::Value::from(node_id);
                println!("{value}");
            }
            Err(e) => tracing::error!("Failed to encode event: {}", e),
        }
        return;
    }

    match event {
        CoordinatorEvent::Elected { key, .. } => {
            tracing::info!("{} elected leader for {}", node_id, key)
        }
        CoordinatorEvent::Resigned { key, .. } => {
            tracing::info!("{} resigned leadership of {}", node_id, key)
        }
        CoordinatorEvent::Error { key, cause, .. } => {
            tracing::warn!("{} error on {}: {}", node_id, key, cause)
        }
    }
}

/// Write a default configuration file
fn run_init(output: PathBuf, key: String) -> Result<()> {
    let mut config = WolfLeaseConfig::default();
    config.coordinator.key = key;
    config.validate()?;

    let content = format!(
        "# WolfLease Configuration\n# Generated configuration file\n\n{}",
        config.to_toml()?
    );
    std::fs::write(&output, content)?;

    println!("Configuration file created: {}", output.display());
    println!("Then run with: wolflease --config {} run", output.display());

    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfLeaseConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Lease Key: {}", config.coordinator.key);
            println!("  TTL: {} ms", config.coordinator.ttl_ms);
            println!("  Renew Interval: {} ms", config.coordinator.renew_interval_ms);
            println!("  Retry Interval: {} ms", config.coordinator.retry_interval_ms);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show effective configuration
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = load_or_default(&config_path)?;

    println!("WolfLease Configuration");
    println!("=======================");
    println!();
    println!("Coordinator:");
    println!("  Lease Key:      {}", config.coordinator.key);
    println!("  TTL:            {:?}", config.coordinator.ttl());
    println!("  Renew Every:    {:?}", config.coordinator.renew_interval());
    println!("  Retry Every:    {:?}", config.coordinator.retry_interval());
    println!();
    println!("Logging:");
    println!("  Level:          {}", config.logging.level);
    println!("  Format:         {}", config.logging.format);
    println!();
    println!("Demo Service:");
    println!("  Nodes:          {}", config.service.nodes);
    println!("  Failure Rate:   {}", config.service.failure_rate);

    Ok(())
}
