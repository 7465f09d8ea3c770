mod app;
mod ui;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use fieldsync::cache::ResourceKey;
use fieldsync::config::Config;
use fieldsync::connectivity::{probe_once, spawn_probe, Connectivity};
use fieldsync::queue::Verb;
use fieldsync::registry::Registry;
use fieldsync::remote::{HttpRemote, RemoteService};
use fieldsync::store::{DurableStore, SqliteStore};
use fieldsync::{ClientOptions, FieldClient, ReadOutcome, WriteOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(about = "Offline-first field data client with a durable write queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Browse a resource with live sync indicators
  Tui {
    /// Resource key, e.g. `customer:C1` or `visit`
    key: String,
  },
  /// Print a resource with pending writes overlaid
  Show { key: String },
  /// Send a write, or queue it when offline
  Write {
    /// create, update or action
    verb: Verb,
    /// Resource path, e.g. `/buildings` or `/visits/7/close`
    path: String,
    /// JSON body
    #[arg(long)]
    payload: Option<String>,
  },
  /// Show connectivity and queued writes
  Status,
  /// Drain the write queue now
  Sync,
  /// List writes the server refused
  DeadLetters {
    /// Forget them instead
    #[arg(long)]
    clear: bool,
  },
}

struct Runtime {
  client: Arc<FieldClient>,
  connectivity: Arc<Connectivity>,
  remote: Arc<dyn RemoteService>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  std::fs::create_dir_all(&data_dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", data_dir.display(), e))?;
  let _log_guard = init_logging(&data_dir);

  let runtime = connect(&config, &data_dir).await?;
  let client = runtime.client.clone();

  match args.command {
    Command::Tui { key } => {
      let key: ResourceKey = key.parse()?;
      let _listener = client.start().await?;
      let _probe = spawn_probe(
        runtime.connectivity.clone(),
        runtime.remote.clone(),
        config.probe_interval(),
      );
      let mut app = app::App::new(client, config, key);
      app.run().await?;
    }
    Command::Show { key } => {
      let key: ResourceKey = key.parse()?;
      match client.read(&key).await? {
        ReadOutcome::Available(view) => {
          eprintln!(
            "source={:?} provenance={:?} captured_at={} stale={} incomplete={} pending={}",
            view.source,
            view.provenance,
            view.captured_at.to_rfc3339(),
            view.stale,
            view.incomplete,
            view.pending
          );
          println!("{}", serde_json::to_string_pretty(&view.data)?);
        }
        ReadOutcome::Unavailable { key } => {
          return Err(eyre!("{} is not available offline: nothing cached yet", key));
        }
      }
    }
    Command::Write {
      verb,
      path,
      payload,
    } => {
      let payload = match payload {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| eyre!("Invalid --payload JSON: {}", e))?,
        None => serde_json::json!({}),
      };
      match client.write_or_queue(verb, &path, payload).await? {
        WriteOutcome::Delivered => println!("Delivered {} {}", verb, path),
        WriteOutcome::Queued(id) => println!("Queued {} {} as {}", verb, path, id),
      }
    }
    Command::Status => {
      let reachable = if client.is_reachable() { "online" } else { "offline" };
      let tasks = client.pending_tasks()?;
      println!("{} ({}), {} pending", config.remote.url, reachable, tasks.len());
      for task in tasks {
        println!(
          "  {}  {:<40} attempts={} queued={}",
          task.id.short(),
          task.describe(),
          task.attempt_count,
          task.enqueued_at.format("%Y-%m-%d %H:%M:%S")
        );
      }
      let dead = client.dead_letters()?.len();
      if dead > 0 {
        println!("{} refused write(s), see `fieldsync dead-letters`", dead);
      }
    }
    Command::Sync => {
      let report = client.drain().await?;
      println!("{}", report.summary());
      if report.is_complete() && report.delivered + report.rejected > 0 {
        client.refresh_all().await?;
      }
    }
    Command::DeadLetters { clear } => {
      if clear {
        println!("Dropped {} refused write(s)", client.clear_dead_letters()?);
      } else {
        for letter in client.dead_letters()? {
          println!(
            "{}  {}  {} ({}): {}",
            letter.rejected_at.format("%Y-%m-%d %H:%M:%S"),
            letter.task.id.short(),
            letter.task.describe(),
            letter.status,
            letter.reason
          );
        }
      }
    }
  }

  Ok(())
}

/// Log to a daily file under the data directory; the terminal belongs to the
/// TUI. The guard must live until exit or buffered lines are lost.
fn init_logging(data_dir: &Path) -> WorkerGuard {
  let appender = tracing_appender::rolling::daily(data_dir.join("logs"), "fieldsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fieldsync=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();
  guard
}

async fn connect(config: &Config, data_dir: &Path) -> Result<Runtime> {
  let store: Arc<dyn DurableStore> = Arc::new(SqliteStore::open_in_dir(data_dir)?);
  let remote: Arc<dyn RemoteService> =
    Arc::new(HttpRemote::new(&config.remote, Config::get_api_token())?);

  let connectivity = Arc::new(Connectivity::new(false));
  let reachable = probe_once(&connectivity, remote.as_ref()).await;
  info!(reachable, url = %config.remote.url, "Starting");

  let client = Arc::new(FieldClient::new(
    store,
    remote.clone(),
    connectivity.clone(),
    Registry::field_visits(),
    ClientOptions::from_config(config)?,
  ));

  Ok(Runtime {
    client,
    connectivity,
    remote,
  })
}
