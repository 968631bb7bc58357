use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rtcache::api::start_stats_api;
use rtcache::config::CacheConfig;
use rtcache::server::CacheServer;
use rtcache::sink::LogSink;
use rtcache::RealtimeCache;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Unset flags fall back to `RTCACHE_*` environment variables, then defaults.
#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "127.0.0.1:9400")]
    addr: String,

    #[clap(long, default_value = "9401")]
    stats_port: u16,

    #[clap(long)]
    wal_dir: Option<PathBuf>,

    #[clap(long)]
    max_cache_size: Option<usize>,

    #[clap(long)]
    batch_size: Option<usize>,

    #[clap(long)]
    flush_interval_ms: Option<u64>,

    /// Run without a write-ahead log
    #[clap(long)]
    no_wal: bool,

    /// Skip fsync on every append
    #[clap(long)]
    no_sync: bool,
}

impl Args {
    fn config(&self) -> CacheConfig {
        let mut config = CacheConfig::from_env();
        if let Some(dir) = &self.wal_dir {
            config.wal_dir = dir.clone();
        }
        if let Some(size) = self.max_cache_size {
            config.max_cache_size = size;
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size.max(1);
        }
        if let Some(ms) = self.flush_interval_ms {
            config.flush_interval = Duration::from_millis(ms);
        }
        if self.no_wal {
            config.enable_wal = false;
        }
        if self.no_sync {
            config.sync_writes = false;
        }
        config
    }
}

fn main() {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(args)) {
        eprintln!("rtcache exited with error: {}", e);
        std::process::exit(1);
    }
}

async fn async_main(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,rtcache=info");
    }
    tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_target(false)
    .with_level(true)
    .init();

    let cache = Arc::new(RealtimeCache::open(args.config(), Arc::new(LogSink))?);
    let config = cache.config();

    println!("--- [rtcache] ---");
    println!("WAL:            {}", if config.enable_wal { config.wal_dir.display().to_string() } else { "disabled".to_string() });
    println!("Durability:     {}", if config.sync_writes { "Strict (Fsync)" } else { "High Throughput (Async)" });
    println!("Max Cache Size: {}", config.max_cache_size);
    println!("Flush:          every {}ms, batch {}", config.flush_interval.as_millis(), config.batch_size);
    println!("-----------------");

    let recovered = cache.recover_from_wal()?;
    info!(recovered, "WAL replay complete");

    cache.start()?;

    let stats_cache = cache.clone();
    let stats_port = args.stats_port;
    tokio::spawn(async move {
        start_stats_api(stats_cache, stats_port).await;
    });
    info!(port = stats_port, "stats API listening");

    let listener = TcpListener::bind(&args.addr).await?;
    let server = CacheServer::new(cache.clone());
    let server_task = tokio::spawn(async move {
        server.run(listener).await;
    });

    println!("Node is Ready.");

    tokio::signal::ctrl_c().await?;
    println!("Shutting down.");

    server_task.abort();
    if let Err(e) = cache.stop().await {
        error!(error = %e, "shutdown incomplete");
    }
    if let Ok(stats) = cache.get_stats() {
        info!(?stats, "final stats");
    }
    Ok(())
}
