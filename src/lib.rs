pub mod model;
pub mod wal;
pub mod cache;
pub mod vector;
pub mod updater;
pub mod scheduler;
pub mod sink;
pub mod config;
pub mod error;
pub mod server;
pub mod api;
pub mod parser;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, info};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::model::{Entry, UpsertRequest};
use crate::scheduler::FlushScheduler;
use crate::sink::DownstreamSink;
use crate::updater::{CacheStats, IndexUpdater};
use crate::vector::SearchHit;

enum Lifecycle {
    Idle,
    Started(FlushScheduler),
    Stopped,
}

/// Shared handle over one [`IndexUpdater`] plus its flush scheduler.
///
/// Cheap to share behind an `Arc`; every call takes the updater lock for
/// the duration of one synchronous operation.
pub struct RealtimeCache {
    updater: Arc<Mutex<IndexUpdater>>,
    sink: Arc<dyn DownstreamSink>,
    config: CacheConfig,
    lifecycle: Mutex<Lifecycle>,
    /// Serializes `flush_now` with the final drain in `stop()`
    flush_lock: Mutex<()>,
}

impl fmt::Debug for RealtimeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.get_stats().unwrap_or_default();
        f.debug_struct("RealtimeCache")
        .field("cache_size", &stats.cache_size)
        .field("pending_writes", &stats.pending_writes)
        .field("wal_dir", &self.config.wal_dir)
        .finish()
    }
}

impl RealtimeCache {
    pub fn open(config: CacheConfig, sink: Arc<dyn DownstreamSink>) -> CacheResult<Self> {
        let updater = IndexUpdater::open(&config)?;
        info!(
            wal_dir = %config.wal_dir.display(),
            wal = config.enable_wal,
            max_cache_size = config.max_cache_size,
            "cache opened"
        );

        Ok(Self {
            updater: Arc::new(Mutex::new(updater)),
            sink,
            config,
            lifecycle: Mutex::new(Lifecycle::Idle),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, IndexUpdater>> {
        self.updater.lock().map_err(|_| CacheError::Poisoned)
    }

    /// Run `f` against the updater unless the cache has been stopped.
    fn with_updater<T>(&self, f: impl FnOnce(&mut IndexUpdater) -> T) -> CacheResult<T> {
        let mut up = self.lock()?;
        if !up.is_accepting() {
            return Err(CacheError::Stopped);
        }
        Ok(f(&mut up))
    }

    /// Start the periodic flush task. A second call is a no-op.
    pub fn start(&self) -> CacheResult<()> {
        let mut lifecycle = self.lifecycle.lock().map_err(|_| CacheError::Poisoned)?;
        match *lifecycle {
            Lifecycle::Started(_) => Ok(()),
            Lifecycle::Stopped => Err(CacheError::Stopped),
            Lifecycle::Idle => {
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(CacheError::NoRuntime);
                }
                let scheduler = FlushScheduler::spawn(
                    self.updater.clone(),
                    self.sink.clone(),
                    self.config.flush_interval,
                    self.config.batch_size,
                );
                *lifecycle = Lifecycle::Started(scheduler);
                info!("cache started");
                Ok(())
            }
        }
    }

    pub fn upsert(&self, request: UpsertRequest) -> CacheResult<()> {
        self.with_updater(|up| up.upsert(request))
    }

    pub fn get(&self, id: &str) -> CacheResult<Option<Entry>> {
        self.with_updater(|up| up.get(id))
    }

    pub fn delete(&self, id: &str) -> CacheResult<bool> {
        self.with_updater(|up| up.delete(id))
    }

    pub fn search_cache(&self, query: &[f32], top_k: usize) -> CacheResult<Vec<SearchHit>> {
        self.with_updater(|up| up.search_cache(query, top_k))
    }

    pub fn recover_from_wal(&self) -> CacheResult<usize> {
        self.with_updater(|up| up.recover_from_wal())
    }

    /// Stats stay readable after `stop()`.
    pub fn get_stats(&self) -> CacheResult<CacheStats> {
        Ok(self.lock()?.get_stats())
    }

    /// Flush one batch right away instead of waiting for the next tick.
    pub fn flush_now(&self) -> CacheResult<usize> {
        let _flush = self.flush_lock.lock().map_err(|_| CacheError::Poisoned)?;
        match self.with_updater(|up| up.take_batch(self.config.batch_size))? {
            Some(batch) => scheduler::commit_batch(&self.updater, self.sink.as_ref(), batch),
            None => Ok(0),
        }
    }

    /// Stop the scheduler, flush everything still pending, close the WAL.
    ///
    /// Idempotent: only the first call flushes.
    pub async fn stop(&self) -> CacheResult<()> {
        let previous = {
            let mut lifecycle = self.lifecycle.lock().map_err(|_| CacheError::Poisoned)?;
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };

        match previous {
            Lifecycle::Stopped => return Ok(()),
            Lifecycle::Started(scheduler) => scheduler.shutdown().await,
            Lifecycle::Idle => {}
        }

        // Reject new work before the final drain
        self.lock()?.stop_accepting();

        // Wait out a manual flush still committing, so a batch it requeues is drained here
        let _flush = self.flush_lock.lock().map_err(|_| CacheError::Poisoned)?;
        let result = scheduler::flush_all(&self.updater, self.sink.as_ref(), self.config.batch_size);
        let remaining = {
            let mut up = self.lock()?;
            up.close_wal();
            up.pending_len()
        };

        match &result {
            Ok(flushed) => info!(flushed, remaining, "cache stopped"),
            Err(e) => error!(error = %e, remaining, "final flush incomplete; pending writes remain only in the WAL"),
        }
        result.map(|_| ())
    }
}
