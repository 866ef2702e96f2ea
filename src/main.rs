//! CLI entry point for clipdex.
//!
//! Provides commands for ingesting embeddings, syncing them into the IVF
//! index, and searching it by text. Sync and search run on the blocking
//! pool under a timeout; `watch` repeats sync on an interval until Ctrl-C.
//! A sync that times out or is interrupted is cancelled and awaited, never
//! abandoned mid-write.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use clipdex::display::{create_search_table, create_stats_table, create_sync_table};
use clipdex::io::{ExitCode, read_ingest_lines, stamp_records};
use clipdex::search::{SearchEngine, SearchParams};
use clipdex::snapshot::SnapshotStore;
use clipdex::store::{
    EmbeddingStore, FsObjectStore, JsonlEmbeddingStore, ObjectStore, SignedUrlResolver,
};
use clipdex::sync::{SyncEngine, SyncError, SyncOutcome};
use clipdex::vector::{FastEmbedEncoder, parse_encoder_model};
use clipdex::{ClipdexError, Settings};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Incremental IVF index over CLIP image embeddings
#[derive(Parser)]
#[command(
    name = "clipdex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Text-to-image similarity search over CLIP embeddings",
    long_about = "Fold new image embeddings into an IVF index and search it with natural language.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true, env = "CLIPDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up .clipdex directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings after file and environment overrides")]
    Config,

    /// Fold new embeddings into the index once
    #[command(
        about = "Sync new embeddings into the index",
        after_help = "The first sync trains the index from index.bootstrap_sample.\nRunning sync again with no new embeddings changes nothing."
    )]
    Sync {
        /// Output the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sync periodically until interrupted
    #[command(about = "Run sync on an interval until Ctrl-C")]
    Watch {
        /// Seconds between runs (overrides sync.interval_secs)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Search images by text
    #[command(
        about = "Find the images closest to a text query",
        after_help = "Examples:\n  clipdex search \"a dog on a beach\"\n  clipdex search \"red car\" -k 10 --nprobe 8\n  clipdex search \"sunset\" --json | jq '.image_urls[]'"
    )]
    Search {
        /// Query text
        query: String,

        /// Number of results (overrides search.k)
        #[arg(short)]
        k: Option<usize>,

        /// Clusters to scan (overrides search.nprobe)
        #[arg(long)]
        nprobe: Option<usize>,

        /// Output the wire JSON response
        #[arg(long)]
        json: bool,
    },

    /// Append embeddings to the embedding store
    #[command(
        about = "Append embeddings from a JSON-lines file",
        after_help = "Each line: {\"external_id\": \"cat.jpg\", \"vector\": [0.01, ...]}\nVectors are L2-normalized and stamped with the current time."
    )]
    Ingest {
        /// JSON-lines input file
        file: PathBuf,

        /// Partition to append to (overrides embeddings.partition)
        #[arg(long)]
        partition: Option<String>,
    },

    /// Show snapshot statistics
    #[command(about = "Show index size, cluster balance, watermark and consistency")]
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Entry point with tokio async runtime.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        init_logging(cli.verbose, false);
        std::process::exit(init_workspace(force).into());
    }

    // Load configuration
    let config = match load_settings(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(ExitCode::ConfigError.into());
        }
    };
    init_logging(cli.verbose, config.debug);

    let code = match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            ExitCode::from_error(&e)
        }
    };
    std::process::exit(code.into());
}

fn load_settings(path: Option<&Path>) -> Result<Settings, Box<figment::Error>> {
    match path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
}

/// Logs go to stderr so `--json` output on stdout stays machine-readable.
fn init_logging(verbose: u8, debug: bool) {
    let level = match (verbose, debug) {
        (_, true) | (2.., _) => Level::DEBUG,
        (1, _) => Level::INFO,
        _ => Level::WARN,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn init_workspace(force: bool) -> ExitCode {
    match Settings::init_config_file(".", force) {
        Ok(path) => {
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::ConfigError
        }
    }
}

fn report_error(error: &ClipdexError) {
    eprintln!("Error: {error}");
    let suggestions = error.recovery_suggestions();
    if !suggestions.is_empty() {
        eprintln!();
        for suggestion in suggestions {
            eprintln!("  - {suggestion}");
        }
    }
}

async fn run(command: Commands, config: Settings) -> Result<ExitCode, ClipdexError> {
    match command {
        Commands::Init { .. } => Ok(ExitCode::Success),

        Commands::Config => {
            let toml_str = toml::to_string_pretty(&config)
                .map_err(|e| ClipdexError::Config { reason: e.to_string() })?;
            println!("{toml_str}");
            Ok(ExitCode::Success)
        }

        Commands::Sync { json } => {
            let engine = Arc::new(sync_engine(&config)?);
            let cancel = cancel_on_ctrl_c();
            let outcome = run_sync(engine, config.sync.timeout_secs, &cancel).await?;
            if json {
                print_json(&outcome)?;
            } else {
                println!("{}", create_sync_table(&outcome));
            }
            Ok(ExitCode::Success)
        }

        Commands::Watch { interval } => {
            let engine = Arc::new(sync_engine(&config)?);
            let every = Duration::from_secs(interval.unwrap_or(config.sync.interval_secs).max(1));
            watch(engine, every, config.sync.timeout_secs).await?;
            Ok(ExitCode::Success)
        }

        Commands::Search {
            query,
            k,
            nprobe,
            json,
        } => {
            let mut params = config.search_params();
            if let Some(k) = k {
                params.k = k;
            }
            if let Some(nprobe) = nprobe {
                params.nprobe = nprobe;
            }

            let timeout = config.search.timeout_secs;
            let response = blocking_with_timeout("Search", timeout, move || {
                search_engine(&config)?
                    .search(&query, params)
                    .map_err(ClipdexError::from)
            })
            .await?;

            if json {
                print_json(&response)?;
            } else if response.hits.is_empty() {
                println!("No images indexed yet.");
            } else {
                println!("{}", create_search_table(&response));
            }
            Ok(ExitCode::Success)
        }

        Commands::Ingest { file, partition } => {
            let partition = partition.unwrap_or_else(|| config.embeddings.partition.clone());
            let count = ingest(&config, &file, &partition)?;
            println!(
                "Appended {count} embeddings to partition '{partition}' in {}",
                config.embeddings.path.display()
            );
            Ok(ExitCode::Success)
        }

        Commands::Stats { json } => {
            let snapshots = SnapshotStore::new(object_store(&config)?, config.snapshot_keys());
            let stats = snapshots.stats()?;
            if json {
                print_json(&stats)?;
            } else {
                println!("{}", create_stats_table(&stats));
            }

            Ok(if !stats.is_initialized() {
                ExitCode::NotFound
            } else if stats.is_consistent() {
                ExitCode::Success
            } else {
                ExitCode::BlockingError
            })
        }
    }
}

fn object_store(config: &Settings) -> Result<Arc<dyn ObjectStore>, ClipdexError> {
    Ok(Arc::new(FsObjectStore::open(&config.snapshot.root)?))
}

fn embedding_store(config: &Settings) -> Arc<dyn EmbeddingStore> {
    Arc::new(JsonlEmbeddingStore::new(
        &config.embeddings.path,
        config.embeddings.page_size,
    ))
}

fn sync_engine(config: &Settings) -> Result<SyncEngine, ClipdexError> {
    Ok(SyncEngine::new(
        embedding_store(config),
        object_store(config)?,
        config.sync_config(),
    ))
}

/// Loads the encoder and wires the read path. Blocking: may download the model.
fn search_engine(config: &Settings) -> Result<SearchEngine, ClipdexError> {
    let model = parse_encoder_model(&config.encoder.model)?;
    let encoder = FastEmbedEncoder::new(model, config.models_dir(), config.debug)?;

    if config.links.secret.is_empty() {
        tracing::warn!("links.secret is empty; issued links can be forged");
    }
    let locator = SignedUrlResolver::new(&config.links.base_url, config.links.secret.clone())?;

    Ok(SearchEngine::new(
        Arc::new(encoder),
        object_store(config)?,
        Arc::new(locator),
        config.search_config(),
    ))
}

fn ingest(config: &Settings, file: &Path, partition: &str) -> Result<usize, ClipdexError> {
    let reader = std::fs::File::open(file).map_err(|e| ClipdexError::Input {
        path: file.to_path_buf(),
        line: 0,
        reason: e.to_string(),
    })?;
    let lines = read_ingest_lines(BufReader::new(reader), file)?;
    let records = stamp_records(lines, file)?;

    let store = embedding_store(config);
    for record in &records {
        store.append(partition, record.clone())?;
    }
    tracing::info!("Ingested {} records from {}", records.len(), file.display());
    Ok(records.len())
}

/// Runs one sync on the blocking pool.
///
/// On timeout the run is cancelled and then awaited, so the process never
/// exits between snapshot writes. A run already past its last checkpoint
/// finishes, and its outcome is kept.
async fn run_sync(
    engine: Arc<SyncEngine>,
    timeout_secs: u64,
    cancel: &CancellationToken,
) -> Result<SyncOutcome, ClipdexError> {
    let token = cancel.child_token();
    let worker = token.clone();
    let mut task = tokio::task::spawn_blocking(move || engine.run_cancellable(&worker));

    let joined = match tokio::time::timeout(Duration::from_secs(timeout_secs), &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!("Sync exceeded {timeout_secs}s; cancelling and waiting for it to stop");
            token.cancel();
            match task.await {
                Ok(Err(SyncError::Cancelled)) => {
                    return Err(ClipdexError::Timeout {
                        operation: "Sync",
                        seconds: timeout_secs,
                    });
                }
                joined => joined,
            }
        }
    };

    match joined {
        Ok(result) => result.map_err(ClipdexError::from),
        Err(join_error) => Err(ClipdexError::General(format!(
            "Sync task failed: {join_error}"
        ))),
    }
}

/// Runs `work` on the blocking pool and gives up waiting after `seconds`.
///
/// Only for read-only work: the task is left to finish on its own.
async fn blocking_with_timeout<T, F>(
    operation: &'static str,
    seconds: u64,
    work: F,
) -> Result<T, ClipdexError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ClipdexError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(Duration::from_secs(seconds), task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(ClipdexError::General(format!(
            "{operation} task failed: {join_error}"
        ))),
        Err(_) => Err(ClipdexError::Timeout { operation, seconds }),
    }
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted; stopping at the next safe point");
            trigger.cancel();
        }
    });
    token
}

async fn watch(engine: Arc<SyncEngine>, every: Duration, timeout_secs: u64) -> Result<(), ClipdexError> {
    let cancel = cancel_on_ctrl_c();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!("Syncing every {} seconds, Ctrl-C to stop", every.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_sync(engine.clone(), timeout_secs, &cancel).await {
                    Ok(outcome) if outcome.ingested > 0 => {
                        tracing::info!("Ingested {} embeddings, index holds {}", outcome.ingested, outcome.index_size);
                    }
                    Ok(_) => {}
                    Err(ClipdexError::Sync(SyncError::Cancelled)) => break,
                    // Damaged snapshots need a human; retrying cannot help
                    Err(e) if ExitCode::from_error(&e).is_blocking() => return Err(e),
                    Err(e) => tracing::error!("Sync failed: {e}"),
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!("Stopping watch");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), ClipdexError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ClipdexError::General(format!("Failed to serialize output: {e}")))?;
    println!("{json}");
    Ok(())
}
