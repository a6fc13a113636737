//! Curricache - command-line access to cached curriculum data.
//!
//! Reads go through the curriculum cache, so a snapshot saved by an earlier
//! run keeps `list`, `show` and `dashboard` working without a connection.

mod format;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use curricache_core::models::{BookKind, OtherKind};
use curricache_core::{
    spawn_cleanup, spawn_sync_listener, ApiClient, CacheError, ChannelSyncAgent, Config,
    ConnectivityMonitor, ConnectivityProbe, CurriculumCache, SnapshotStore, SyncBridge,
    SyncMessage,
};
use format::{column, format_date, format_optional, format_percent, truncate_string};

// ============================================================================
// Constants
// ============================================================================

/// Backend used when neither the config file nor `CURRICACHE_API_URL` names one
const DEFAULT_API_URL: &str = "http://localhost:3000/api";

/// How often the backend is probed to detect connectivity changes
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// File name prefix for the daily rolling log
const LOG_FILE_PREFIX: &str = "curricache.log";

/// Number of upcoming modules shown on the dashboard
const UPCOMING_LIMIT: usize = 10;

const USAGE: &str = "\
Usage: curricache [--offline] [--refresh] [--json] <command>

Commands:
  list [user]          List a user's curricula
  show <id>            Show one curriculum and its modules
  dashboard [user]     Upcoming modules, resources and progress
  status               Cache and connectivity status

Options:
  --offline            Serve cached data without probing the backend
  --refresh            Bypass fresh cache entries
  --json               Print raw JSON instead of tables

The user defaults to CURRICACHE_USER or the last user looked at.";

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    List { user: Option<String> },
    Show { id: String },
    Dashboard { user: Option<String> },
    Status,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    command: Command,
    offline: bool,
    refresh: bool,
    json: bool,
}

fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut offline = false;
    let mut refresh = false;
    let mut json = false;
    let mut positional = Vec::new();

    for arg in args {
        match arg.as_str() {
            "--offline" => offline = true,
            "--refresh" => refresh = true,
            "--json" => json = true,
            "-h" | "--help" => positional.insert(0, "help"),
            other if other.starts_with("--") => return Err(format!("Unknown option: {}", other)),
            other => positional.push(other),
        }
    }

    let arg = |i: usize| positional.get(i).map(|s| s.to_string());
    let command = match positional.first().copied() {
        None | Some("help") => Command::Help,
        Some("list") => Command::List { user: arg(1) },
        Some("dashboard") => Command::Dashboard { user: arg(1) },
        Some("status") => Command::Status,
        Some("show") => match arg(1) {
            Some(id) => Command::Show { id },
            None => return Err("show needs a curriculum id".to_string()),
        },
        Some(other) => return Err(format!("Unknown command: {}", other)),
    };

    Ok(Invocation {
        command,
        offline,
        refresh,
        json,
    })
}

// ============================================================================
// Startup
// ============================================================================

/// Initialize the tracing subscriber for logging.
/// Returns the guard that flushes the log file, when one is written.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse_args(&args) {
        Ok(invocation) => invocation,
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, USAGE);
            std::process::exit(2);
        }
    };
    if invocation.command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    let cache_dir = config.cache_dir()?;
    let snapshots = SnapshotStore::new(cache_dir.clone())?;
    let _log_guard = init_tracing(config.log_to_file.then_some(cache_dir.as_path()));
    info!("Curricache starting");

    let offline = invocation.offline || config.offline_mode;
    let base_url = config
        .api_base_url
        .clone()
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let mut client = ApiClient::with_timeout(base_url, config.request_timeout())?;
    if let Some(ref token) = config.api_token {
        client.set_token(token.clone());
    }

    // In-process sync agent: a reconnect resync comes back to this session
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (agent, outbound) = ChannelSyncAgent::new();
    let bridge = SyncBridge::new(Arc::new(agent.with_resync(inbound_tx)));

    let connectivity = Arc::new(ConnectivityMonitor::new(!offline, bridge.clone()));
    let cache = Arc::new(
        CurriculumCache::new(Arc::new(client.clone()))
            .with_connectivity(connectivity.clone())
            .with_sync_bridge(bridge),
    );

    restore_snapshot(&cache, &snapshots);

    let listener = spawn_sync_listener(cache.clone(), inbound_rx);
    let outbound_log = log_outbound(outbound);
    let cleanup = spawn_cleanup(cache.clone(), config.cleanup_interval());
    let probe = (!offline).then(|| ConnectivityProbe::new(client, PROBE_INTERVAL).spawn(connectivity));

    let result = run(&invocation, &cache, &config, &snapshots).await;
    if let Err(ref e) = result {
        let unreachable = e
            .downcast_ref::<CacheError>()
            .is_some_and(|err| err.api_error().is_connectivity());
        if unreachable {
            eprintln!("Backend unreachable and nothing cached yet - try again when online.");
        }
    }

    if let Some(probe) = probe {
        probe.abort();
    }
    listener.abort();
    outbound_log.abort();
    cleanup.stop();
    if let Err(e) = snapshots.save_snapshot(&cache.snapshot()) {
        warn!(error = %e, "Failed to save cache snapshot");
    }

    info!("Curricache shutting down");
    result
}

/// Restore the last snapshot so offline reads have something to serve.
fn restore_snapshot(cache: &CurriculumCache, snapshots: &SnapshotStore) -> usize {
    match snapshots.load_snapshot() {
        Ok(Some(cached)) => {
            let age = cached.age_display();
            let restored = cache.restore(cached.data);
            info!(restored, age = %age, "Loaded cache snapshot");
            restored
        }
        Ok(None) => 0,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable cache snapshot");
            0
        }
    }
}

/// No other sessions share this process, so outbound messages are only logged.
fn log_outbound(mut outbound: mpsc::UnboundedReceiver<SyncMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            debug!(?message, "Sync message");
        }
    })
}

// ============================================================================
// Commands
// ============================================================================

async fn run(
    invocation: &Invocation,
    cache: &CurriculumCache,
    config: &Config,
    snapshots: &SnapshotStore,
) -> Result<()> {
    let refresh = invocation.refresh;
    match invocation.command {
        Command::List { ref user } => {
            let user = resolve_user(user.as_deref(), config)?;
            list(cache, &user, refresh, invocation.json).await
        }
        Command::Show { ref id } => show(cache, id, refresh, invocation.json).await,
        Command::Dashboard { ref user } => {
            let user = resolve_user(user.as_deref(), config)?;
            dashboard(cache, &user, refresh, invocation.json).await
        }
        Command::Status => {
            status(cache, snapshots);
            Ok(())
        }
        Command::Help => Ok(()),
    }
}

/// Pick the user from the argument or config, remembering an explicit choice.
fn resolve_user(arg: Option<&str>, config: &Config) -> Result<String> {
    if let Some(user) = arg {
        if let Err(e) = Config::remember_user(user) {
            warn!(error = %e, "Failed to remember user");
        }
        return Ok(user.to_string());
    }
    match config.last_user_id {
        Some(ref user) => Ok(user.clone()),
        None => bail!("No user given. Pass one or set CURRICACHE_USER."),
    }
}

fn offline_note(is_offline_data: bool) {
    if is_offline_data {
        println!("\n(backend unreachable - showing cached data)");
    }
}

async fn list(cache: &CurriculumCache, user: &str, refresh: bool, json: bool) -> Result<()> {
    let curricula = cache.user_curricula(user, refresh).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&curricula)?);
        return Ok(());
    }

    if curricula.is_empty() {
        println!("No curricula for {}", user);
        return Ok(());
    }

    println!("{}  {}  {}  ID", column("TITLE", 40), column("TYPE", 5), "MODULES");
    for curriculum in &curricula {
        println!(
            "{}  {}  {:>7}  {}",
            column(&curriculum.title, 40),
            column(curriculum.curriculum_type.as_str(), 5),
            curriculum.module_count(),
            curriculum.id
        );
    }
    offline_note(
        cache
            .user_curricula_entry(user)
            .is_some_and(|e| e.is_offline_data),
    );
    Ok(())
}

async fn show(cache: &CurriculumCache, id: &str, refresh: bool, json: bool) -> Result<()> {
    let Some(curriculum) = cache.curriculum(id, refresh).await? else {
        bail!("No curriculum with id {}", id);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&curriculum)?);
        return Ok(());
    }

    println!("{} ({})", curriculum.title, curriculum.curriculum_type.as_str());
    if let Some(title) = curriculum.primary_title() {
        println!(
            "Primary resource: {} by {}",
            title,
            format_optional(curriculum.primary_resource_author.as_deref(), "unknown author")
        );
    }
    println!();
    for module in curriculum.daily_modules() {
        let date = module.date.as_deref().map(format_date).unwrap_or_default();
        println!(
            "Day {:>3}  {}  {}",
            module.day,
            column(&date, 12),
            module.title
        );
        if curriculum.is_video() {
            if let Some(ref video) = module.video_title {
                println!("         watch: {}", video);
            }
        }
    }
    offline_note(cache.curriculum_entry(id).is_some_and(|e| e.is_offline_data));
    Ok(())
}

async fn dashboard(cache: &CurriculumCache, user: &str, refresh: bool, json: bool) -> Result<()> {
    let data = cache.dashboard(user, refresh).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    let done = data.daily_modules.iter().filter(|m| m.completed).count();
    println!(
        "{} curricula, {}/{} modules complete ({})",
        data.curricula.len(),
        done,
        data.daily_modules.len(),
        format_percent(data.completion_rate())
    );

    println!("\nUpcoming modules");
    for module in data
        .daily_modules
        .iter()
        .filter(|m| !m.completed)
        .take(UPCOMING_LIMIT)
    {
        let date = module.date.as_deref().map(format_date).unwrap_or_default();
        println!(
            "  {}  {}  Day {:>3}  {}",
            column(&date, 12),
            column(&module.curriculum_title, 24),
            module.day,
            truncate_string(&module.title, 40)
        );
    }

    println!("\nBooks");
    for book in &data.book_resources {
        let kind = match book.resource_type {
            BookKind::Primary => "primary",
            BookKind::Supplementary => "supplementary",
        };
        println!(
            "  {}  {}  {}",
            column(&book.title, 40),
            column(&format_optional(book.author.as_deref(), "-"), 24),
            kind
        );
    }

    println!("\nOther resources");
    for other in &data.other_resources {
        let kind = match other.resource_type {
            OtherKind::Paper => "paper",
            OtherKind::Resource => "resource",
        };
        println!(
            "  {}  {}  {}",
            column(&other.title, 40),
            column(&other.journal, 24),
            kind
        );
    }

    offline_note(cache.dashboard_entry(user).is_some_and(|e| e.is_offline_data));
    Ok(())
}

fn status(cache: &CurriculumCache, snapshots: &SnapshotStore) {
    let online = if cache.is_online() { "online" } else { "offline" };
    println!("Connectivity:   {}", online);
    println!(
        "Snapshot:       {}",
        snapshots.snapshot_age().unwrap_or_else(|| "none".to_string())
    );
    println!(
        "Last sync:      {}",
        cache
            .store()
            .last_sync()
            .map(curricache_core::cache::age_display)
            .unwrap_or_else(|| "never".to_string())
    );
    println!("Entries:");
    for (kind, count) in cache.store().entry_counts() {
        println!("  {:<22}{}", kind.as_str(), count);
    }
}
