//! # finder CLI
//!
//! The `finder` binary runs the index sync and its status server, and offers
//! a few commands for checking a deployment by hand.
//!
//! ## Usage
//!
//! ```bash
//! finder --config ./config/finder.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `finder serve` | Status server, index bootstrap, then sync until the feed ends |
//! | `finder bootstrap` | Run the index bootstrap only |
//! | `finder ping` | Probe the search backend once |
//! | `finder watchers` | List watched collections in processing order |
//! | `finder transform <collection> <file>` | Transform one raw document and print it |
//!
//! ## Exit status
//!
//! `1` for configuration, bootstrap, and change feed failures; `3` when the
//! backend stayed unreachable for every configured attempt.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use finder::backend::{ElasticsearchBackend, SearchBackend};
use finder::bootstrap::{bootstrap, BootstrapOptions, BootstrapReport};
use finder::changes::JsonLinesSource;
use finder::config::{self, Config};
use finder::engine::SyncEngine;
use finder::gate::{connect_with_retry, GateError, RetryPolicy};
use finder::logging;
use finder::mapping::load_mapping;
use finder::models::RawDocument;
use finder::server::{self, AppState};
use finder::transform_log::TransformLog;
use finder::watchers::{list_watchers, WatcherRegistry};

/// finder keeps a search index in step with the compendium and job
/// collections of the primary document store.
#[derive(Parser)]
#[command(name = "finder", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/finder.toml")]
    config: PathBuf,

    /// Debug output for finder's own modules.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the status server, bootstrap the index, and sync changes.
    ///
    /// Reads change events from `changes.feed` after backfilling every
    /// watched collection from `changes.snapshot_dir`. The status server
    /// keeps running after the feed ends.
    Serve,

    /// Delete, create, and map the index as configured, then exit.
    Bootstrap,

    /// Probe the search backend once.
    Ping,

    /// List watched collections in processing order.
    Watchers,

    /// Transform a raw document as its collection's watcher would.
    ///
    /// The document is read from a JSON file and the result printed to
    /// stdout; nothing is written to the index.
    Transform {
        /// Collection name, e.g. `compendia` or `jobs`.
        collection: String,
        /// JSON file holding one raw document.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_subscriber(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(e: &anyhow::Error) -> u8 {
    if e.downcast_ref::<GateError>().is_some() {
        3
    } else {
        1
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(cfg).await,
        Commands::Bootstrap => {
            let backend = ElasticsearchBackend::new(&cfg.elasticsearch.location)?;
            let report = run_bootstrap(&cfg, &backend).await?;
            println!(
                "index '{}': existed={} deleted={} created={} mapping_applied={}",
                cfg.elasticsearch.index,
                report.existed,
                report.deleted,
                report.created,
                report.mapping_applied
            );
            Ok(())
        }
        Commands::Ping => {
            let backend = ElasticsearchBackend::new(&cfg.elasticsearch.location)?;
            let policy = RetryPolicy::from_config(&cfg);
            backend
                .ping(policy.probe_timeout)
                .await
                .with_context(|| format!("{} is not reachable", backend.location()))?;
            println!("{} is reachable", backend.location());
            Ok(())
        }
        Commands::Watchers => {
            let log = Arc::new(TransformLog::new(cfg.sync.log_size));
            let registry = WatcherRegistry::from_config(&cfg, log)?;
            list_watchers(&registry);
            Ok(())
        }
        Commands::Transform { collection, file } => transform_file(&cfg, &collection, &file),
    }
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    let cfg = Arc::new(cfg);
    let log = Arc::new(TransformLog::new(cfg.sync.log_size));
    let backend: Arc<dyn SearchBackend> =
        Arc::new(ElasticsearchBackend::new(&cfg.elasticsearch.location)?);

    let listener = server::bind(&cfg).await?;
    let state = AppState {
        config: cfg.clone(),
        log: log.clone(),
        backend: backend.clone(),
    };
    let status_server = tokio::spawn(server::serve(listener, state));

    run_bootstrap(&cfg, backend.as_ref()).await?;

    let registry = WatcherRegistry::from_config(&cfg, log.clone())?;
    let engine = SyncEngine::new(backend.clone(), registry).with_log(log);
    let engine = &engine;
    let feed = cfg.changes.feed.clone();
    let snapshot_dir = cfg.changes.snapshot_dir.clone();

    let policy = RetryPolicy::from_config(&cfg);
    let stats = connect_with_retry(backend.as_ref(), &policy, move || async move {
        let mut source = JsonLinesSource::open(&feed, snapshot_dir).await?;
        engine.run(&mut source).await
    })
    .await??;

    info!(
        indexed = stats.indexed,
        skipped = stats.skipped,
        deleted = stats.deleted,
        failed = stats.failed,
        "sync finished, status server still running"
    );
    status_server.await??;
    Ok(())
}

async fn run_bootstrap(
    cfg: &Config,
    backend: &dyn SearchBackend,
) -> anyhow::Result<BootstrapReport> {
    let mapping = load_mapping(&cfg.elasticsearch)?;
    let report = bootstrap(
        backend,
        BootstrapOptions {
            index: &cfg.elasticsearch.index,
            mapping: &mapping,
            mapping_type: cfg.elasticsearch.types.compendia.as_deref(),
            delete_existing: cfg.elasticsearch.delete_index_on_startup,
            apply_mapping: cfg.elasticsearch.put_mapping_on_startup,
        },
    )
    .await?;
    Ok(report)
}

fn transform_file(cfg: &Config, collection: &str, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read document: {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse document: {}", file.display()))?;
    let raw = RawDocument::from_value(value)
        .with_context(|| format!("{} does not hold a JSON object", file.display()))?;

    let log = Arc::new(TransformLog::new(cfg.sync.log_size));
    let registry = WatcherRegistry::from_config(cfg, log)?;
    let watcher = registry
        .find(collection)
        .with_context(|| format!("No watcher for collection '{}'", collection))?;

    let doc = watcher.transformer.transform(raw)?;
    println!("{}", serde_json::to_string_pretty(&doc.as_value())?);
    Ok(())
}
