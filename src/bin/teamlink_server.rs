//! teamlink gRPC server.
//!
//! A standalone server binary running the identity resolver over gRPC,
//! backed by either the in-memory store or a persistent data directory.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use teamlink::engine::runtime::{LinkRuntime, LinkRuntimeConfig};
use teamlink::storage::{open_database, InMemoryLeagueStore, LeagueStore, PersistentConfig, PersistentLeagueStore};
use teamlink::{AmbiguityPolicy, EngineConfig, LinkEngine, LockScope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Volatile tables, lost on exit.
    Memory,
    /// WAL-backed tables in `--data-dir`.
    Persistent,
}

/// Server command line arguments.
#[derive(Parser, Debug)]
#[command(name = "teamlink-server", version)]
#[command(about = "Cross-season team identity resolution over gRPC")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:50051")]
    addr: SocketAddr,

    /// Storage backend
    #[arg(short, long, value_enum, default_value_t = Backend::Persistent)]
    backend: Backend,

    /// Data directory for the persistent backend
    #[arg(short, long, value_name = "DIR", default_value = "./league.teamlink")]
    data_dir: PathBuf,

    /// Lock granularity: namespace | process
    #[arg(long, default_value_t = LockScope::Namespace)]
    lock_scope: LockScope,

    /// Opponent tie-break: smallest-opponent | skip
    #[arg(long, default_value_t = AmbiguityPolicy::SmallestOpponent)]
    ambiguity: AmbiguityPolicy,

    /// Worker threads for lookups
    #[arg(long, default_value_t = 4)]
    read_workers: usize,

    /// Worker threads for register / resolve / erase
    #[arg(long, default_value_t = 2)]
    write_workers: usize,

    /// Maximum queued requests per worker pool
    #[arg(long, default_value_t = 1024)]
    queue_capacity: usize,

    /// WAL size in bytes that triggers compaction
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    max_wal_size: u64,

    /// Skip fsync after each WAL append
    #[arg(long)]
    no_sync: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting teamlink-server");

    // Keep a typed handle on the persistent store so it can be compacted at shutdown.
    let mut persistent: Option<Arc<PersistentLeagueStore>> = None;
    let store: Arc<dyn LeagueStore> = match args.backend {
        Backend::Memory => {
            warn!("using in-memory backend; data is lost on exit");
            Arc::new(InMemoryLeagueStore::new())
        }
        Backend::Persistent => {
            info!(data_dir = %args.data_dir.display(), "opening database");
            let config = PersistentConfig {
                max_wal_size: args.max_wal_size,
                sync_on_write: !args.no_sync,
            };
            // Holds an exclusive lock on the directory for the process lifetime.
            let store = Arc::new(open_database(&args.data_dir, Some(config))?);
            persistent = Some(Arc::clone(&store));
            store
        }
    };

    let engine = LinkEngine::with_config(
        store,
        EngineConfig {
            lock_scope: args.lock_scope,
            ambiguity: args.ambiguity,
        },
    );
    let runtime = Arc::new(LinkRuntime::new(
        engine,
        LinkRuntimeConfig {
            read_workers: args.read_workers,
            write_workers: args.write_workers,
            queue_capacity: args.queue_capacity,
        },
    ));

    let listener = TcpListener::bind(args.addr).await?;
    info!(
        addr = %listener.local_addr()?,
        lock_scope = %args.lock_scope,
        ambiguity = %args.ambiguity,
        "listening; press Ctrl+C to stop"
    );

    teamlink::transport::serve(listener, Arc::clone(&runtime), async {
        let _ = signal::ctrl_c().await;
    })
    .await?;

    // Joins the worker threads.
    drop(runtime);

    if let Some(store) = persistent {
        match store.compact() {
            Ok(result) => info!(entries = result.entries_compacted, "compacted WAL at shutdown"),
            Err(e) => warn!(error = %e, "shutdown compaction failed; WAL will be replayed on next start"),
        }
    }

    info!("shut down");
    Ok(())
}
