//! `labgate`: laboratory analyzer gateway.
//!
//! Opens the laboratory database, loads the device registry and runs one
//! listener per device until Ctrl-C.

mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use labgate_network::{ChannelNotifier, NoopNotifier, Notifier, Supervisor};
use labgate_storage::{Database, LabStore, SqliteLabStore};
use settings::{LoggingSettings, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Laboratory analyzer gateway
#[derive(Parser, Debug)]
#[command(name = "labgate", version, author, long_about = None)]
struct Args {
    /// Path to the JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database file, overrides the settings file
    #[arg(long)]
    database: Option<String>,

    /// Device to start (repeatable); all devices when omitted
    #[arg(short, long = "device")]
    devices: Vec<String>,

    /// Print the device registry and recent samples, then exit
    #[arg(long, default_value_t = false)]
    list: bool,

    /// Enable debug logging, including raw messages
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn init_tracing(logging: &LoggingSettings, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_ansi(logging.ansi)
        .init();
}

fn notifier(settings: &Settings) -> Arc<dyn Notifier> {
    if !settings.alerts.enabled {
        return Arc::new(NoopNotifier);
    }

    let (notifier, mut alerts) = ChannelNotifier::new(settings.alerts.queue_capacity);
    tokio::spawn(async move {
        while let Some(alert) = alerts.recv().await {
            error!(
                machine = %alert.machine_id,
                raised_at = %alert.raised_at,
                "ALERT: {}",
                alert.message
            );
        }
    });
    Arc::new(notifier)
}

async fn list(supervisor: &Supervisor<SqliteLabStore>, store: &SqliteLabStore) -> Result<()> {
    let statuses = supervisor.statuses();
    for config in supervisor.configs() {
        let status = statuses.get(&config.name).copied().unwrap_or_default();
        println!(
            "{:<24} {:<12} {:<8} {:<40} {}",
            config.name, config.protocol, config.protocol_type, config.port_display, status
        );
    }

    let names = supervisor.machine_name_map();
    for (machine_id, samples) in store.recent_samples(5).await? {
        let name = names.get(&machine_id).map_or(machine_id.as_str(), String::as_str);
        let ids: Vec<&str> = samples.iter().map(|s| s.sample_id.as_str()).collect();
        println!("{name}: {}", ids.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(path) = args.database {
        settings.database.path = path;
    }
    init_tracing(&settings.logging, args.verbose);

    let db = Database::new(settings.database.to_config())
        .await
        .with_context(|| format!("Failed to open database {}", settings.database.path))?;
    db.health_check().await.context("Database health check failed")?;

    let store = Arc::new(SqliteLabStore::new(db.pool().clone()));
    let supervisor = Supervisor::new(
        Arc::clone(&store),
        notifier(&settings),
        settings.session.to_settings(),
    );
    let count = supervisor
        .reload()
        .await
        .context("Failed to load devices")?;
    info!(devices = count, "Device registry loaded");

    if args.list {
        list(&supervisor, &store).await?;
        db.close().await;
        return Ok(());
    }

    let names = if args.devices.is_empty() {
        supervisor.configs().into_iter().map(|c| c.name).collect()
    } else {
        args.devices
    };

    for name in &names {
        let outcome = supervisor.start(name).await;
        if outcome.success {
            info!(device = %name, state = %outcome.state, "{}", outcome.message);
        } else {
            warn!(device = %name, state = %outcome.state, "{}", outcome.message);
        }
    }

    info!("Gateway running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    for outcome in supervisor.stop_all().await {
        info!("{}", outcome.message);
    }
    db.close().await;
    Ok(())
}
