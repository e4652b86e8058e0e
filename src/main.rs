//! # Rowcast CLI
//!
//! Sends the rows of a Google Sheet as WhatsApp messages, right away or
//! at the time written in each row.
//!
//! Usage:
//!   rowcast serve --schedule              # HTTP API + recurring job
//!   rowcast run --mode instant            # One pass, print the result
//!   rowcast run --mode combined --dry-run # Log sends, write nothing
//!   rowcast schedule --every-minutes 5    # Recur until nothing is left
//!   rowcast trigger --mode scheduled -w   # Poll a running server
//!   rowcast config show                   # Show configuration

mod trigger;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rowcast_channels::{ChannelDispatcher, RecordingTransport, WhatsAppBridge};
use rowcast_core::RowcastConfig;
use rowcast_core::traits::{MessageTransport, RecordStore};
use rowcast_core::types::DispatchMode;
use rowcast_scheduler::{DispatchEngine, RecurrenceController, Schedule};
use rowcast_store::{GoogleSheetsStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::trigger::TriggerClient;

const JOB_ID: &str = "scheduled-messages";

#[derive(Parser)]
#[command(
    name = "rowcast",
    version,
    about = "📨 Rowcast — spreadsheet-driven WhatsApp dispatch"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Also run the recurring scheduled job in-process
        #[arg(long)]
        schedule: bool,
    },

    /// Run one dispatch pass
    Run {
        /// instant, scheduled or combined
        #[arg(short, long, default_value = "combined")]
        mode: DispatchMode,

        /// Log every send instead of delivering it; nothing is written back
        #[arg(long)]
        dry_run: bool,
    },

    /// Run scheduled passes until no scheduled rows remain
    Schedule {
        /// Cron expression (defaults to the configured one)
        #[arg(long, conflicts_with = "every_minutes")]
        cron: Option<String>,

        /// Fixed interval instead of cron
        #[arg(long)]
        every_minutes: Option<u64>,
    },

    /// Trigger a pass on a running server
    Trigger {
        #[arg(short, long, default_value = "combined")]
        mode: DispatchMode,

        /// Endpoint (defaults to the configured gateway)
        #[arg(long)]
        url: Option<String>,

        /// Keep triggering until no scheduled rows remain
        #[arg(short, long)]
        watch: bool,

        /// Interval for --watch (defaults to schedule.interval_minutes)
        #[arg(long)]
        every_minutes: Option<u64>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (secrets masked)
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "rowcast=debug,rowcast_core=debug,rowcast_channels=debug,rowcast_store=debug,rowcast_scheduler=debug,rowcast_gateway=debug,tower_http=debug"
    } else {
        "rowcast=info,rowcast_channels=info,rowcast_store=info,rowcast_scheduler=info,rowcast_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    // Load config
    let config = if let Some(path) = &cli.config {
        RowcastConfig::load_from(std::path::Path::new(path))?
    } else {
        RowcastConfig::load()?
    };
    config.validate()?;

    match cli.command {
        Commands::Serve { schedule } => {
            let engine = Arc::new(live_engine(&config)?);
            let state = Arc::new(rowcast_gateway::AppState::new(Arc::clone(&engine), &config)?);

            let controller = RecurrenceController::new();
            if schedule {
                let tz = config.dispatch.tz()?;
                controller.register(
                    JOB_ID,
                    Schedule::cron(&config.schedule.cron, tz)?,
                    engine.scheduled_work(tz, config.dispatch.due_window_minutes),
                    Some(Arc::new(|| {
                        tracing::info!("✅ All scheduled messages sent; recurring job stopped")
                    })),
                )?;
            }

            rowcast_gateway::start_server(state).await?;
            controller.stop_all();
        }

        Commands::Run { mode, dry_run } => {
            let engine = if dry_run {
                dry_run_engine(&config).await?
            } else {
                let engine = live_engine(&config)?;
                let transport = engine.dispatcher().transport();
                if !transport.is_ready().await {
                    anyhow::bail!(
                        "{} session is not ready; log in through the bridge first",
                        transport.name()
                    );
                }
                engine
            };

            let run = engine
                .run(mode, config.dispatch.tz()?, config.dispatch.due_window_minutes)
                .await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }

        Commands::Schedule { cron, every_minutes } => {
            let tz = config.dispatch.tz()?;
            let schedule = match (cron, every_minutes) {
                (_, Some(minutes)) => Schedule::every_minutes(minutes)?,
                (Some(expr), None) => Schedule::cron(&expr, tz)?,
                (None, None) => Schedule::cron(&config.schedule.cron, tz)?,
            };
            let engine = Arc::new(live_engine(&config)?);

            let done = Arc::new(tokio::sync::Notify::new());
            let notify = Arc::clone(&done);
            let controller = RecurrenceController::new();
            controller.register(
                JOB_ID,
                schedule.clone(),
                engine.scheduled_work(tz, config.dispatch.due_window_minutes),
                Some(Arc::new(move || notify.notify_one())),
            )?;
            println!("⏰ Scheduler running ({schedule}). Press Ctrl+C to stop.");

            tokio::select! {
                _ = done.notified() => println!("✅ All scheduled messages have been sent."),
                _ = tokio::signal::ctrl_c() => {
                    controller.stop_all();
                    println!("\n👋 Scheduler stopped.");
                }
            }
        }

        Commands::Trigger { mode, url, watch, every_minutes } => {
            let url = url.unwrap_or_else(|| {
                let host = match config.gateway.host.as_str() {
                    "0.0.0.0" => "localhost",
                    host => host,
                };
                format!("http://{host}:{}/send-now", config.gateway.port)
            });
            let client = TriggerClient::new(url, config.gateway.api_token.clone());

            match (watch, every_minutes) {
                (false, None) => {
                    let body = client.send_now(mode).await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                (_, minutes) => {
                    let minutes = minutes.unwrap_or(config.schedule.interval_minutes);
                    let every = minutes
                        .max(1)
                        .checked_mul(60)
                        .map(Duration::from_secs)
                        .with_context(|| format!("interval of {minutes} minutes is too large"))?;
                    tokio::select! {
                        result = client.poll(mode, every) => result?,
                        _ = tokio::signal::ctrl_c() => println!("\n👋 Trigger stopped."),
                    }
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", RowcastConfig::default_path().display());
                println!("{}", config.to_masked_toml()?);
            }
        },
    }

    Ok(())
}

/// Engine over the configured spreadsheet and WhatsApp bridge.
fn live_engine(config: &RowcastConfig) -> Result<DispatchEngine> {
    let store: Arc<dyn RecordStore> = Arc::new(
        GoogleSheetsStore::from_config(&config.store).context("Google Sheets store is not configured")?,
    );
    let transport: Arc<dyn MessageTransport> = Arc::new(WhatsAppBridge::from_config(&config.transport));
    Ok(DispatchEngine::from_config(store, ChannelDispatcher::new(transport), config))
}

/// Engine over a snapshot of the sheet that logs sends instead of
/// delivering them.
async fn dry_run_engine(config: &RowcastConfig) -> Result<DispatchEngine> {
    let sheets = GoogleSheetsStore::from_config(&config.store)?;
    let records = sheets.list_records(&config.store.sheet_name).await?;
    tracing::info!("[dry-run] {} rows loaded from \"{}\"", records.len(), config.store.sheet_name);

    let snapshot: Arc<dyn RecordStore> =
        Arc::new(MemoryStore::from_records(&config.store.sheet_name, &records));
    let transport: Arc<dyn MessageTransport> = Arc::new(RecordingTransport::new());
    Ok(DispatchEngine::from_config(snapshot, ChannelDispatcher::new(transport), config))
}
