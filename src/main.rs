use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use coedit::ot::JupiterEngine;
use coedit::server::{serve, Hub};
use coedit::store::{CachedStore, DocumentStore, MemoryStore, RocksStore};

#[derive(Parser, Debug)]
#[command(name = "coedit", version, about = "Real-time collaborative text editing server")]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,

    /// Storage backend.
    #[arg(long, value_enum, default_value_t = StoreKind::Memory)]
    store: StoreKind,

    /// Data directory for the rocks store.
    #[arg(long, default_value = "coedit_data")]
    data_dir: PathBuf,

    /// Write-behind flush interval in seconds for the rocks store.
    #[arg(long, default_value_t = 5)]
    flush_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// Keep everything in memory (lost on exit).
    Memory,
    /// RocksDB with a write-behind cache in front.
    Rocks,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    // Deployment platforms set PORT; it overrides --addr.
    let addr = match std::env::var("PORT") {
        Ok(port) if !port.is_empty() => format!("0.0.0.0:{port}"),
        _ => args.addr.clone(),
    };

    let (store, cache): (Arc<dyn DocumentStore>, Option<Arc<CachedStore>>) = match args.store {
        StoreKind::Memory => {
            log::info!("using in-memory store");
            (Arc::new(MemoryStore::new()), None)
        }
        StoreKind::Rocks => {
            let rocks = Arc::new(RocksStore::open(&args.data_dir)?);
            log::info!(
                "using rocks store at {} with {}s write-behind flush",
                rocks.path().display(),
                args.flush_interval_secs
            );
            let cached = CachedStore::new(rocks, Duration::from_secs(args.flush_interval_secs));
            (cached.clone(), Some(cached))
        }
    };

    let hub = Hub::spawn(store, Arc::new(JupiterEngine));

    tokio::select! {
        result = serve(&addr, hub) => result?,
        _ = tokio::signal::ctrl_c() => log::info!("shutting down"),
    }

    // Final flush of anything the cache still holds.
    if let Some(cache) = cache {
        cache.close().await;
    }
    Ok(())
}
