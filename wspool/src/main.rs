mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wspool::gateway::SimulatedGateway;
use wspool::metrics::{start_metrics_server, MetricsRegistry};
use wspool::naming::RandomNames;
use wspool::workspace::PoolManager;

#[derive(Parser)]
#[command(name = "wspool", about = "Warm pool of remotely provisioned workspaces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the derived pool settings.
    Check {
        /// Path to config file (TOML).
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Keep the pool warm against the simulated gateway until interrupted.
    Serve {
        /// Path to config file (TOML).
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// Port for Prometheus metrics and health endpoints (/metrics, /healthz).
        /// Disabled if not set.
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// Acquire workspaces concurrently and report per-acquire latency.
    Bench {
        /// Path to config file (TOML).
        #[arg(long, short)]
        config: Option<PathBuf>,
        /// Number of concurrent acquisitions (default: 4).
        #[arg(long, short = 'n', default_value = "4")]
        count: usize,
        /// Request a non-default profile, bypassing the pool.
        #[arg(long)]
        custom: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config: config_path } => {
            let config = cli::load_config_unchecked(config_path)?;
            cli::run_check(&config)?;
        }
        Commands::Bench {
            config: config_path,
            count,
            custom,
        } => {
            let config = cli::load_config(config_path)?;
            cli::run_bench(&config, count, custom).await?;
        }
        Commands::Serve {
            config: config_path,
            metrics_port,
        } => {
            let config = cli::load_config(config_path)?;
            tracing::info!("wspool starting with config: {:?}", config);

            let gateway = Arc::new(SimulatedGateway::new(config.simulator.clone()));
            let metrics = MetricsRegistry::new();
            let manager = Arc::new(PoolManager::new(
                &config,
                gateway,
                Arc::new(RandomNames::default()),
                metrics.clone(),
            ));
            manager
                .start()
                .await
                .context("failed to start workspace replenishment")?;

            if let Some(port) = metrics_port {
                let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
                start_metrics_server(addr, metrics, Arc::clone(&manager));
            }

            tracing::info!(capacity = manager.capacity(), "wspool ready");

            // Keep running until a termination signal so the pool is always
            // torn down and its workspaces deleted.
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .context("failed to register SIGTERM handler")?;
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT, initiating shutdown");
                }
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, initiating shutdown");
                }
            }

            let report = manager.shutdown().await;
            tracing::info!(
                scheduler = ?report.scheduler,
                deleted = report.deleted,
                delete_failures = report.delete_failures,
                "wspool shut down"
            );
            if report.delete_failures > 0 {
                anyhow::bail!(
                    "{} workspace(s) could not be deleted during shutdown",
                    report.delete_failures
                );
            }
        }
    }

    Ok(())
}
