use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metric_keeper::{
    MemoryStore, SnapshotManager, Store,
    config::{Config, StorageConfig, read_config_file},
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: Option<String>,

    /// Seconds between two snapshots
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Snapshot file location
    #[arg(short = 'p', long, env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<PathBuf>,

    /// Restore the snapshot file on startup
    #[arg(short, long, env = "RESTORE", action = clap::ArgAction::Set)]
    restore: Option<bool>,

    /// SQLite DSN; selects the sqlite backend when set
    #[arg(short, long, env = "DATABASE_DSN")]
    dsn: Option<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: LevelFilter,
}

impl Args {
    /// Layer command line and environment values over the file config
    fn apply(&self, mut config: Config) -> anyhow::Result<Config> {
        if let Some(secs) = self.store_interval {
            config.snapshot.interval = Duration::from_secs(secs);
        }
        if let Some(path) = &self.file_storage_path {
            config.snapshot.path = path.clone();
        }
        if let Some(restore) = self.restore {
            config.snapshot.restore = restore;
        }
        if let Some(dsn) = self.dsn.as_ref().filter(|dsn| !dsn.is_empty()) {
            config.storage = StorageConfig::Sqlite { dsn: dsn.clone() };
        }

        config.validate()?;
        Ok(config)
    }
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("metric_keeper", level),
        ("sqlx", LevelFilter::WARN),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };
    let config = args.apply(config).context("invalid configuration")?;
    debug!("effective config: {config:?}");

    let store = open_store(&config.storage).await?;

    let mut manager = SnapshotManager::new(store.clone(), config.snapshot);
    let result = manager.run(shutdown_signal()).await;

    if let Err(e) = store.close().await {
        error!("failed to close store: {e}");
    }

    let stats = manager.stats();
    info!(
        "stopped after {} snapshots ({} failed)",
        stats.saves, stats.total_errors
    );

    result.context("snapshot manager stopped")
}

async fn open_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config {
        StorageConfig::Memory => {
            info!("using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { dsn } => {
            use metric_keeper::retry::{BackoffPolicy, with_backoff};
            use metric_keeper::storage::sqlite::SqliteStore;

            info!("using sqlite store");
            let store = with_backoff(BackoffPolicy::default(), || SqliteStore::connect(dsn))
                .await
                .context("failed to open sqlite store")?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite backend requested but the storage-sqlite feature is disabled")
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("signal received, flushing snapshot");
}
