mod commands;
mod config;
mod runtime;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use harvest_google::{GmailClient, GoogleOAuth, SheetsClient};
use harvest_memstore::{DataDirLock, MemoryStore};
use harvest_sync::{Providers, Stores, SyncEngine, SystemClock};
use tracing::{error, info};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("harvest=info")),
        )
        .compact()
        .init();
}

pub struct App {
    pub engine: Arc<SyncEngine>,
    pub store: Arc<MemoryStore>,
    pub snapshot: PathBuf,
}

impl App {
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.store.persist(&self.snapshot)?;
        Ok(())
    }
}

/// Wire the store, the Google clients and the task runtime into an engine.
/// Must run inside the tokio runtime: the worker is spawned here.
fn build_app(data_dir: &Path) -> Result<App, Box<dyn std::error::Error>> {
    let oauth = config::load_oauth_config()?;
    let sync_config = config::load_sync_config()?;

    let snapshot = data_dir.join("store.json");
    let store = Arc::new(MemoryStore::open(&snapshot)?);

    let http = reqwest::Client::new();
    let providers = Providers {
        credentials: Arc::new(GoogleOAuth::new(http.clone(), oauth)),
        mailbox: Arc::new(GmailClient::new(http.clone())),
        sheets: Arc::new(SheetsClient::new(http)),
    };

    let (queue, rx) = runtime::TaskQueue::new();
    let engine = Arc::new(SyncEngine::new(
        Stores::shared(store.clone()),
        providers,
        Arc::new(queue),
        Arc::new(SystemClock),
        sync_config,
    ));
    runtime::spawn_worker(engine.clone(), rx);
    info!(data_dir = %data_dir.display(), "harvest ready");

    Ok(App {
        engine,
        store,
        snapshot,
    })
}

/// Own the data dir for the whole command, so no other process rewrites the
/// snapshot underneath this one.
async fn run(cmd: &str, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = config::load_data_dir()?;
    let mut lock = DataDirLock::open(&data_dir)?;
    let _held = lock.try_hold()?;

    let app = build_app(&data_dir)?;
    commands::run(&app, cmd, args).await?;
    Ok(())
}

fn print_help() {
    eprintln!("Harvest - mailbox sender addresses into a spreadsheet");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  harvest serve                                   Run syncs on schedule until Ctrl-C");
    eprintln!("  harvest add <name> <folder> <sheet> [tab] [schedule]");
    eprintln!("                                                  Create a connection (schedule: manual, 15min, 1hour, 4hours, daily)");
    eprintln!("  harvest list                                    List connections");
    eprintln!("  harvest status <id>                             Show sync progress");
    eprintln!("  harvest sync <id>                               Run one sync cycle to the end");
    eprintln!("  harvest cancel <id>                             Stop a running cycle");
    eprintln!("  harvest reset <id>                              Put a stuck connection back to idle");
    eprintln!("  harvest full-reset <id>                         Forget synced messages so the next cycle rescans");
    eprintln!("  harvest delete <id>                             Delete a connection and its data");
    eprintln!("  harvest export <id>                             Write changed contacts to the sheet");
    eprintln!("  harvest block <id> <domain>...                  Ignore senders from these domains");
    eprintln!("  harvest unblock <domain-id>                     Remove a blocked domain");
    eprintln!("  harvest domains <id>                            List blocked domains");
    eprintln!("  harvest folders <id>                            List mailbox folders");
    eprintln!("  harvest help                                    Show this help");
    eprintln!();
    eprintln!("Environment variables:");
    eprintln!("  GOOGLE_CLIENT_ID          OAuth client id");
    eprintln!("  GOOGLE_CLIENT_SECRET      OAuth client secret");
    eprintln!("  GOOGLE_REFRESH_TOKEN      Refresh token used by `add`");
    eprintln!("  HARVEST_USER              Owner recorded by `add` (default: local)");
    eprintln!("  HARVEST_DATA_DIR          Data directory (default: ~/.harvest)");
    eprintln!("  HARVEST_BATCH_SIZE        Messages per batch (default: 200)");
    eprintln!("  HARVEST_BATCH_DELAY_MS    Pause between batches (default: 500)");
    eprintln!("  HARVEST_SWEEP_MINUTES     Schedule sweep cadence (default: 15)");
    eprintln!("  RUST_LOG                  Log level (default: harvest=info)");
    eprintln!();
    eprintln!("Only one harvest process may use a data directory at a time; stop");
    eprintln!("`harvest serve` before running other commands against the same one.");
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    let rest = args.get(2..).unwrap_or_default();

    if matches!(cmd, "help" | "--help" | "-h") {
        print_help();
        return;
    }
    if !commands::is_known(cmd) {
        eprintln!("Unknown command: {cmd}");
        eprintln!("Run `harvest help` for usage");
        std::process::exit(2);
    }

    if let Err(e) = run(cmd, rest).await {
        error!(%e, "fatal error");
        std::process::exit(1);
    }
}
