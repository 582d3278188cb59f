use std::env;
use std::time::Duration;

use harvest_domain::*;
use harvest_error::SyncError;
use harvest_sync::StartOutcome;
use tracing::info;

use crate::runtime;
use crate::App;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

const COMMANDS: &[&str] = &[
    "serve",
    "add",
    "list",
    "status",
    "sync",
    "cancel",
    "reset",
    "full-reset",
    "delete",
    "export",
    "block",
    "unblock",
    "domains",
    "folders",
];

const POLL: Duration = Duration::from_secs(1);
const SNAPSHOT_EVERY: Duration = Duration::from_secs(30);

pub fn is_known(cmd: &str) -> bool {
    COMMANDS.contains(&cmd)
}

/// Run one command, then save the store whether it succeeded or not.
pub async fn run(app: &App, cmd: &str, args: &[String]) -> CmdResult {
    let snapshots =
        runtime::spawn_snapshots(app.store.clone(), app.snapshot.clone(), SNAPSHOT_EVERY);

    let result = match cmd {
        "serve" => serve(app).await,
        "add" => add(app, args).await,
        "list" => list(app).await,
        "status" => status(app, args).await,
        "sync" => sync(app, args).await,
        "cancel" => cancel(app, args).await,
        "reset" => reset(app, args).await,
        "full-reset" => full_reset(app, args).await,
        "delete" => delete(app, args).await,
        "export" => export(app, args).await,
        "block" => block(app, args).await,
        "unblock" => unblock(app, args).await,
        "domains" => domains(app, args).await,
        "folders" => folders(app, args).await,
        other => Err(format!("unknown command: {other}").into()),
    };

    snapshots.abort();
    app.save()?;
    result
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| format!("missing <{name}>, see `harvest help`"))
}

fn connection_id(args: &[String]) -> Result<ConnectionId, String> {
    arg(args, 0, "id").map(ConnectionId::from)
}

/// Poll the connection until `busy` is false, printing progress as it
/// changes. `None` when the connection is gone.
async fn wait_while(
    app: &App,
    id: &ConnectionId,
    busy: impl Fn(&Connection) -> bool,
) -> Result<Option<Connection>, SyncError> {
    let mut ticker = tokio::time::interval(POLL);
    let mut last_line = String::new();
    loop {
        ticker.tick().await;
        let conn = match app.engine.connection(id).await {
            Ok(conn) => conn,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if !busy(&conn) {
            return Ok(Some(conn));
        }
        let line = app.engine.progress(id).await?.to_string();
        if line != last_line {
            eprintln!("{line}");
            last_line = line;
        }
    }
}

async fn serve(app: &App) -> CmdResult {
    let resumed = app.engine.resume_pending().await?;
    info!(resumed, "resumed pending work");
    let sweep = runtime::spawn_sweep(app.engine.clone());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    sweep.abort();
    Ok(())
}

async fn add(app: &App, args: &[String]) -> CmdResult {
    let name = arg(args, 0, "name")?;
    let folder_id = arg(args, 1, "folder")?;
    let sheet_id = arg(args, 2, "sheet")?;
    let sheet_tab = args.get(3).map_or("Addresses", String::as_str);
    let schedule = SyncSchedule::from(args.get(4).map_or("manual", String::as_str));
    if let SyncSchedule::Other(s) = &schedule {
        return Err(format!("unknown schedule: {s}").into());
    }

    let refresh_token = env::var("GOOGLE_REFRESH_TOKEN")
        .map_err(|_| "GOOGLE_REFRESH_TOKEN env var not set".to_string())?;
    let user_id = env::var("HARVEST_USER").unwrap_or_else(|_| "local".to_string());

    let conn = app
        .engine
        .create_connection(NewConnection {
            user_id,
            name: name.to_string(),
            credential: OAuthCredential {
                access_token: String::new(),
                refresh_token,
                expires_at: 0,
            },
            folder_id: folder_id.to_string(),
            sheet_id: sheet_id.to_string(),
            sheet_tab: sheet_tab.to_string(),
            schedule,
        })
        .await?;
    println!("{conn}");
    Ok(())
}

async fn list(app: &App) -> CmdResult {
    let conns = app.engine.list_connections(None).await?;
    if conns.is_empty() {
        eprintln!("No connections. Create one with `harvest add`.");
    }
    for conn in conns {
        println!("{conn}");
    }
    Ok(())
}

async fn status(app: &App, args: &[String]) -> CmdResult {
    let id = connection_id(args)?;
    let progress = app.engine.progress(&id).await?;
    let contacts = app.engine.list_contacts(&id).await?;
    let pending = contacts.iter().filter(|c| c.needs_export()).count();
    println!("{progress}");
    println!("{} contacts, {pending} waiting for export", contacts.len());
    Ok(())
}

async fn sync(app: &App, args: &[String]) -> CmdResult {
    let id = connection_id(args)?;
    let outcome = app.engine.start_cycle(&id).await?;
    eprintln!("{}", outcome.message());
    if outcome == StartOutcome::AlreadyRunning {
        return Ok(());
    }

    let Some(done) = wait_while(app, &id, Connection::is_syncing).await? else {
        return Err(format!("connection {id} was deleted during sync").into());
    };
    if done.status == SyncStatus::Error {
        let reason = done.last_error.unwrap_or_default();
        return Err(format!("sync failed: {reason}").into());
    }
    println!("{}", app.engine.progress(&id).await?);
    Ok(())
}

async fn cancel(app: &App, args: &[String]) -> CmdResult {
    let id = connection_id(args)?;
    if app.engine.cancel_cycle(&id).await? {
        println!("Sync cancelled");
    } else {
        println!("No sync running for {id}");
    }
    Ok(())
}

async fn reset(app: &App, args: &[String]) -> CmdResult {
    let id = connection_id(args)?;
    app.engine.reset_sync(&id).await?;
    println!("{}", app.engine.progress(&id).await?);
    Ok(())
}

async fn full_reset(app: &App, args: &[String]) -> CmdResult {
    let id = connection_id(args)?;
    app.engine.full_reset(&id).await?;
    wait_while(app, &id, |c| c.status == SyncStatus::Resetting).await?;
    println!("Sync history cleared for {id}");
    Ok(())
}

async fn delete(app: &App, args: &[String]) -> CmdResult {
    let id = connection_id(args)?;
    app.engine.delete_connection(&id).await?;
    if let Some(conn) = wait_while(app, &id, |c| c.status == SyncStatus::Deleting).await? {
        return Err(format!("deletion stopped: {}", conn.last_error.unwrap_or_default()).into());
    }
    println!("Deleted {id}");
    Ok(())
}

async fn export(app: &App, args: &[String]) -> CmdResult {
    let id = connection_id(args)?;
    let summary = app.engine.export_contacts(&id).await?;
    println!(
        "Updated {} rows, appended {} rows",
        summary.updated, summary.appended
    );
    Ok(())
}

async fn block(app: &App, args: &[String]) -> CmdResult {
    let id = connection_id(args)?;
    arg(args, 1, "domain")?;
    let added = app.engine.add_filtered_domains(&id, &args[1..]).await?;
    println!("Blocked {added} new domains");
    Ok(())
}

async fn unblock(app: &App, args: &[String]) -> CmdResult {
    let domain_id = DomainId::from(arg(args, 0, "domain-id")?);
    app.engine.remove_filtered_domain(&domain_id).await?;
    println!("Unblocked {domain_id}");
    Ok(())
}

async fn domains(app: &App, args: &[String]) -> CmdResult {
    let id = connection_id(args)?;
    for d in app.engine.list_filtered_domains(&id).await? {
        println!("{}\t{}", d.id, d.domain);
    }
    Ok(())
}

async fn folders(app: &App, args: &[String]) -> CmdResult {
    let id = connection_id(args)?;
    for folder in app.engine.list_folders(&id).await? {
        println!("{folder}");
    }
    Ok(())
}
