//! Rox CLI - keyed snapshot diffing and live collection sync.
//!
//! `rox diff` prints the change list between two JSON snapshots; `rox watch`
//! keeps a JSON file in sync as a filtered, sorted view and logs every
//! structural change to it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rox_common::Value;
use rox_sync::{
    compare, Change, CollectionChange, MapAccessor, MapRecord, RecordId, RefreshMode, Schema,
    SnapshotSource, SyncConfig, SyncedCollection,
};

/// Refresh interval of `rox watch` when neither flag nor config sets one.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "rox")]
#[command(about = "Rox - keyed snapshot diffing and live collection sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON file with sync configuration; flags take precedence.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the changes that turn one JSON snapshot into another.
    Diff {
        /// Baseline snapshot (a JSON array of objects).
        #[arg(long)]
        old: PathBuf,

        /// New snapshot.
        #[arg(long)]
        new: PathBuf,

        /// Key field(s), comma separated.
        #[arg(short, long, value_delimiter = ',', required = true)]
        key: Vec<String>,
    },

    /// Re-read a JSON snapshot file and keep a filtered, sorted view of it.
    Watch {
        /// Snapshot file (a JSON array of objects).
        #[arg(short, long)]
        source: PathBuf,

        /// Key field(s), comma separated.
        #[arg(short, long, value_delimiter = ',', required = true)]
        key: Vec<String>,

        /// Refresh interval, e.g. "500ms", "5s", "2m".
        #[arg(short, long, value_parser = parse_duration)]
        interval: Option<Duration>,

        /// Keep only records whose field equals the value ("field=value").
        #[arg(short, long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, Value)>,

        /// Sort ascending by field. Applied before --sort-desc keys.
        #[arg(long = "sort")]
        sort: Vec<String>,

        /// Sort descending by field.
        #[arg(long = "sort-desc")]
        sort_desc: Vec<String>,

        /// Refresh once, print the view and exit.
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Diff { old, new, key } => cmd_diff(&old, &new, &key).await,

        Commands::Watch {
            source,
            key,
            interval,
            filters,
            sort,
            sort_desc,
            once,
        } => {
            let view = ViewOptions {
                filters,
                sort,
                sort_desc,
            };
            cmd_watch(&source, &key, interval, view, config, once).await
        }
    }
}

/// Snapshot source reading a JSON array of objects from a file.
struct JsonFileSource {
    path: PathBuf,
    name: String,
}

impl JsonFileSource {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            name: path.display().to_string(),
        }
    }
}

#[async_trait]
impl SnapshotSource<MapRecord> for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> rox_common::Result<Vec<MapRecord>> {
        // The file may be mid-rewrite, so read errors are worth retrying.
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| rox_common::Error::transient(format!("{}: {}", self.name, e)))?;
        serde_json::from_str(&text)
            .map_err(|e| rox_common::Error::fetch(format!("{}: {}", self.name, e)))
    }
}

/// Filters and sort keys for the watched view.
#[derive(Default)]
struct ViewOptions {
    filters: Vec<(String, Value)>,
    sort: Vec<String>,
    sort_desc: Vec<String>,
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    SyncConfig::load(path).with_context(|| format!("Invalid config file {}", path.display()))
}

async fn load_snapshot(path: &Path) -> Result<Vec<MapRecord>> {
    JsonFileSource::new(path)
        .fetch()
        .await
        .with_context(|| format!("Failed to load snapshot {}", path.display()))
}

fn diff_snapshots(old: &[MapRecord], new: &[MapRecord], keys: &[String]) -> Result<Vec<Change>> {
    let accessor = MapAccessor::infer(old.iter().chain(new));
    let schema = Schema::resolve::<MapRecord, _>(&accessor, keys)?;
    Ok(compare(old, new, &schema, &accessor))
}

/// Print the change list between two snapshot files.
async fn cmd_diff(old: &Path, new: &Path, keys: &[String]) -> Result<()> {
    info!("Comparing {} with {}", old.display(), new.display());

    let old = load_snapshot(old).await?;
    let new = load_snapshot(new).await?;
    let changes = diff_snapshots(&old, &new, keys)?;

    println!("{}", serde_json::to_string_pretty(&changes)?);
    info!("{} change(s)", changes.len());
    Ok(())
}

/// Build the synced collection for `rox watch`.
///
/// Only the key fields are declared. Every other field is picked up from
/// the records of each read, so the file may start empty and gain fields
/// over time.
fn build_watch(
    path: &Path,
    keys: &[String],
    view: ViewOptions,
    config: SyncConfig,
) -> Result<SyncedCollection<MapRecord>> {
    let accessor = MapAccessor::new(keys.iter().cloned()).open();

    let mut collection = SyncedCollection::<MapRecord>::builder()
        .accessor(accessor)
        .key_fields(keys.iter().cloned())
        .default_factory()
        .source(JsonFileSource::new(path))
        .config(config)
        .build()
        .context("Invalid watch configuration")?;

    for (field, value) in view.filters {
        collection.add_filter(move |record: &MapRecord| {
            record.get(&field).unwrap_or(&Value::Null) == &value
        });
    }
    for field in view.sort {
        collection.add_sort(move |record: &MapRecord| {
            record.get(&field).cloned().unwrap_or(Value::Null)
        });
    }
    for field in view.sort_desc {
        collection.add_sort_descending(move |record: &MapRecord| {
            record.get(&field).cloned().unwrap_or(Value::Null)
        });
    }

    collection.subscribe_view(Arc::new(|change: &CollectionChange<RecordId>| match change {
        CollectionChange::Added { index, item } => info!("view + {} at {}", item, index),
        CollectionChange::Removed { index, item } => info!("view - {} from {}", item, index),
        CollectionChange::Moved {
            old_index,
            new_index,
            item,
        } => info!("view ~ {} {} -> {}", item, old_index, new_index),
        CollectionChange::Reset => info!("view reset"),
    }));

    Ok(collection)
}

fn render_view(collection: &SyncedCollection<MapRecord>) -> Result<String> {
    let rows: Vec<&MapRecord> = collection.view_records().collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}

/// Watch a snapshot file until interrupted, or refresh once with `once`.
async fn cmd_watch(
    path: &Path,
    keys: &[String],
    interval: Option<Duration>,
    view: ViewOptions,
    mut config: SyncConfig,
    once: bool,
) -> Result<()> {
    config.refresh_mode = match (interval, config.refresh_mode) {
        (Some(interval), _) => RefreshMode::Periodic { interval },
        (None, RefreshMode::Manual) => RefreshMode::Periodic {
            interval: DEFAULT_INTERVAL,
        },
        (None, mode) => mode,
    };
    let mode = config.refresh_mode.clone();

    let mut collection = build_watch(path, keys, view, config)?;

    if once {
        collection.refresh().await.context("Refresh failed")?;
        println!("{}", render_view(&collection)?);
        return Ok(());
    }

    info!("Watching {} ({:?}), press Ctrl-C to stop", path.display(), mode);
    let handle = collection.into_handle();
    let scheduler = handle.spawn_configured_scheduler().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    scheduler.shutdown();

    let status = handle.status().await;
    info!(cycles = status.cycles_completed, "Stopped watching");
    Ok(())
}

/// Parse "500ms", "5s", "2m", "1h" or a bare number of seconds.
fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let n: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{}'", raw))?;
    if n == 0 {
        return Err("duration must be greater than zero".to_string());
    }
    let seconds_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(n)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return Err(format!("unknown duration unit '{}'", unit)),
    };
    n.checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", raw))
}

/// Parse "field=value". The value is read as JSON when it parses, so
/// `age=30` matches a number and `name=Ann` a string.
fn parse_filter(raw: &str) -> std::result::Result<(String, Value), String> {
    let (field, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got '{}'", raw))?;
    if field.is_empty() {
        return Err("filter field is empty".to_string());
    }
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map(Value::from)
        .unwrap_or_else(|_| Value::Text(value.to_string()));
    Ok((field.to_string(), value))
}
