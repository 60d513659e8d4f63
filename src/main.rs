use anyhow::Context;
use clap::{Parser, Subcommand};
use price_tracker::api::rest::{create_router, ApiState};
use price_tracker::config::AppConfig;
use price_tracker::observability::metrics::register_metrics;
use price_tracker::observability::tracing::init_tracing;
use price_tracker::types::{EntityId, Price};
use price_tracker::utils::task_supervisor::TaskSupervisor;
use price_tracker::PriceTracker;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "price-tracker", version, about = "Multi-source game price tracking engine")]
struct Cli {
    /// Configuration overlay loaded from config/<env>.toml
    #[arg(long, global = true, default_value = "development")]
    env: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, retention sweeper and HTTP control API until Ctrl-C
    Serve {
        /// Start the scheduler even if `scheduler.autostart` is false
        #[arg(long)]
        schedule: bool,
    },
    /// Run one refresh cycle over stale entities
    RunCycle {
        #[arg(long)]
        max: Option<usize>,
    },
    /// Refresh the given entity ids regardless of staleness
    Refresh {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Track a new entity
    Register {
        id: String,
        name: String,
        #[arg(long)]
        target: Option<Price>,
    },
    /// Show tracking statistics, source and scheduler state
    Status,
    /// List the best current deals
    Deals {
        #[arg(long, default_value_t = 0)]
        min_discount: u8,
        #[arg(long)]
        max_price: Option<Price>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete snapshots older than the given number of days
    Cleanup {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Write a copy of the SQLite store to a new file
    Backup {
        path: PathBuf,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.env).context("loading configuration")?;
    init_tracing(&config.logging);
    register_metrics();

    if let Command::ShowConfig = cli.command {
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let tracker = Arc::new(PriceTracker::from_config(&config).context("building price tracker")?);

    match cli.command {
        Command::Serve { schedule } => serve(tracker, &config, schedule).await?,
        Command::RunCycle { max } => print_json(&tracker.trigger_cycle_now(max).await?)?,
        Command::Refresh { ids } => {
            let ids: Vec<EntityId> = ids.into_iter().map(EntityId::new).collect();
            print_json(&tracker.refresh_entities(&ids).await?)?;
        }
        Command::Register { id, name, target } => {
            let changed = tracker.register_entity(EntityId::new(id.clone()), name, target).await?;
            if changed {
                println!("registered {}", id);
            } else {
                println!("{} already tracked", id);
            }
        }
        Command::Status => {
            print_json(&tracker.statistics().await?)?;
            print_json(&tracker.scheduler_status())?;
        }
        Command::Deals { min_discount, max_price, limit } => {
            print_json(&tracker.get_best_deals(min_discount, max_price, limit).await?)?;
        }
        Command::Cleanup { days } => {
            let days = days.unwrap_or(config.retention.max_age_days);
            let deleted = tracker.cleanup_older_than(days).await?;
            println!("deleted {} snapshots older than {} days", deleted, days);
        }
        Command::Backup { path } => {
            tracker
                .backup_database(&path)
                .await
                .with_context(|| format!("backing up to {}", path.display()))?;
            println!("backup written to {}", path.display());
        }
        Command::ShowConfig => {}
    }
    Ok(())
}

async fn serve(
    tracker: Arc<PriceTracker>,
    config: &AppConfig,
    schedule: bool,
) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut supervisor = TaskSupervisor::new();

    if config.api.enabled {
        let listener = tokio::net::TcpListener::bind(&config.api.bind_addr)
            .await
            .with_context(|| format!("binding {}", config.api.bind_addr))?;
        info!(addr = %config.api.bind_addr, "Control API listening");

        let router = create_router(Arc::new(ApiState {
            tracker: tracker.clone(),
            default_interval: config.scheduler.interval(),
        }));
        let mut api_shutdown = shutdown_rx.clone();
        supervisor.spawn("http_api", async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            });
            if let Err(e) = server.await {
                error!("HTTP server failed: {}", e);
            }
        });
    }

    if config.retention.enabled {
        let sweeper = tracker.retention_manager();
        supervisor.spawn("retention_sweeper", sweeper.run(shutdown_rx.clone()));
    }

    if schedule || config.scheduler.autostart {
        tracker.start_scheduler(config.scheduler.interval())?;
    }

    let mut health = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = health.tick() => {
                if let Err(e) = supervisor.check_health() {
                    error!("Background task failure: {}", e);
                }
            }
        }
    }

    tracker.stop_scheduler().await;
    let _ = shutdown_tx.send(true);
    supervisor.shutdown_all(Duration::from_secs(10)).await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
