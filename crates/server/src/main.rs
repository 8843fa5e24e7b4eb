use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use courier_config::Settings;
use courier_db::{connect, indexes::ensure_indexes};
use courier_services::{NotificationEngine, NotificationIntake};
use prometheus::Registry;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "courier", about = "Notification dispatch engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the retention schedule until Ctrl-C.
    Serve,
    /// Delete expired records and repair per-user quotas once.
    Sweep,
    /// Delete records older than N days.
    Cleanup {
        #[arg(long)]
        older_than_days: u32,
        #[arg(long)]
        keep_read: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Dispatch one intake (JSON object) or a batch (JSON array) from a file.
    Dispatch { path: PathBuf },
    /// Re-enqueue every failed channel of a notification.
    Resend { notification_id: String },
    /// Print the metric families in text exposition format.
    Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (silently ignore if missing)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "courier_server=debug,courier_services=debug,courier_db=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::load()?;
    let grace = Duration::from_secs(settings.notifications.shutdown_grace_secs);

    let db = connect(&settings).await?;
    ensure_indexes(&db).await?;

    let registry = Registry::new();
    let engine = NotificationEngine::from_mongo(&settings, &db, &registry)?;

    match cli.command {
        Command::Serve => {
            let mut scheduler = engine
                .sweeper()
                .start(&settings.notifications.cleanup_schedule)
                .await?;
            info!(app = %settings.app.name, "Courier running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received");
            scheduler.shutdown().await?;
            engine.shutdown(grace).await;
        }
        Command::Sweep => {
            let report = engine.sweeper().sweep().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Cleanup {
            older_than_days,
            keep_read,
            dry_run,
        } => {
            let affected = engine
                .sweeper()
                .cleanup(older_than_days, keep_read, dry_run)
                .await?;
            let verb = if dry_run { "would delete" } else { "deleted" };
            println!("{verb} {affected} notifications");
        }
        Command::Dispatch { path } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            if value.is_array() {
                let intakes: Vec<NotificationIntake> = serde_json::from_value(value)?;
                let result = engine.dispatch_bulk(intakes).await;
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let intake: NotificationIntake = serde_json::from_value(value)?;
                let result = engine.dispatch(intake).await?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            engine.drain(grace).await;
            engine.shutdown(Duration::from_secs(1)).await;
        }
        Command::Resend { notification_id } => {
            let channels = engine.force_resend(&notification_id).await?;
            println!("{}", serde_json::to_string_pretty(&channels)?);
            engine.drain(grace).await;
            engine.shutdown(Duration::from_secs(1)).await;
        }
        Command::Metrics => {
            print!("{}", engine.metrics().gather_text());
        }
    }

    Ok(())
}
