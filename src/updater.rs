use std::collections::VecDeque;
use std::io;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::CacheConfig;
use crate::model::{now_millis, Entry, UpsertRequest, WalOp, WalPayload};
use crate::vector::{self, SearchHit};
use crate::wal::WalWriter;

/// Read-only snapshot returned by [`IndexUpdater::get_stats`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub flushes: u64,
    pub cache_size: usize,
    pub pending_writes: usize,
    /// Records appended by the WAL writer since this instance started
    pub wal_entries: u64,
    /// Appends that failed and were absorbed
    pub wal_failures: u64,
    pub wal_files: u64,
}

#[derive(Debug, Default)]
struct Counters {
    inserts: u64,
    updates: u64,
    deletes: u64,
    evictions: u64,
    flushes: u64,
}

/// Owns the cache, the pending-write buffer, the WAL and the counters.
///
/// Every mutating method runs to completion synchronously, so WAL order,
/// cache mutation order and pending-buffer order always agree.
#[derive(Debug)]
pub struct IndexUpdater {
    cache: CacheStore,
    pending: VecDeque<Entry>,
    wal: Option<WalWriter>,
    stats: Counters,
    accepting: bool,
}

impl IndexUpdater {
    pub fn open(config: &CacheConfig) -> io::Result<Self> {
        let wal = if config.enable_wal {
            Some(WalWriter::open(&config.wal_dir, config.max_wal_file_bytes, config.sync_writes)?)
        } else {
            None
        };
        Ok(Self::with_wal(config.max_cache_size, wal))
    }

    pub fn with_wal(max_cache_size: usize, wal: Option<WalWriter>) -> Self {
        Self {
            cache: CacheStore::new(max_cache_size),
            pending: VecDeque::new(),
            wal,
            stats: Counters::default(),
            accepting: true,
        }
    }

    pub fn upsert(&mut self, request: UpsertRequest) {
        let entry = request.into_entry();

        let op = match self.cache.peek(&entry.id).map(|e| e.checksum == entry.checksum) {
            Some(true) => {
                // Unchanged content: recency only
                self.cache.touch(&entry.id);
                debug!(id = %entry.id, "dedup hit, skipping write");
                return;
            }
            Some(false) => {
                self.stats.updates += 1;
                WalOp::Update
            }
            None => {
                self.stats.inserts += 1;
                WalOp::Insert
            }
        };

        if let Some(wal) = self.wal.as_mut() {
            wal.append(op, &entry);
        }

        self.cache.put(entry.id.clone(), entry.clone());
        let evicted = self.cache.evict_if_over_capacity();
        if !evicted.is_empty() {
            self.stats.evictions += evicted.len() as u64;
            debug!(?evicted, "evicted least-recently-used entries");
        }

        debug!(id = %entry.id, ?op, "upserted");
        self.pending.push_back(entry);
    }

    pub fn get(&mut self, id: &str) -> Option<Entry> {
        self.cache.get(id).cloned()
    }

    pub fn delete(&mut self, id: &str) -> bool {
        if self.cache.peek(id).is_none() {
            return false;
        }
        if let Some(wal) = self.wal.as_mut() {
            wal.append_delete(id, now_millis());
        }
        self.cache.remove(id);
        self.stats.deletes += 1;
        debug!(id, "deleted");
        true
    }

    /// Replay the WAL into the cache. Returns the insert/update records applied.
    ///
    /// Capacity is not enforced here: a log with more live ids than
    /// `max_cache_size` leaves the cache over the bound until the next upsert.
    pub fn recover_from_wal(&mut self) -> usize {
        let records = match &self.wal {
            Some(wal) => {
                debug!(dir = %wal.dir().display(), "replaying WAL");
                wal.replay()
            }
            None => return 0,
        };

        let mut applied = 0;
        for record in records {
            match (record.op, record.entry) {
                (WalOp::Insert | WalOp::Update, WalPayload::Entry(entry)) => {
                    self.cache.put(entry.id.clone(), entry);
                    applied += 1;
                }
                (WalOp::Delete, payload) => {
                    self.cache.remove(payload.id());
                }
                (op, WalPayload::Tombstone { id, .. }) => {
                    warn!(?op, id = %id, "WAL write record without entry body, skipping");
                }
            }
        }

        info!(applied, cache_size = self.cache.len(), "recovered from WAL");
        if self.cache.len() > self.cache.max_size() {
            warn!(
                cache_size = self.cache.len(),
                max_cache_size = self.cache.max_size(),
                "cache over capacity after recovery until the next upsert"
            );
        }
        applied
    }

    pub fn search_cache(&self, query: &[f32], top_k: usize) -> Vec<SearchHit> {
        vector::rank(query, self.cache.iter(), top_k)
    }

    pub fn get_stats(&self) -> CacheStats {
        let (wal_entries, wal_failures, wal_files) = self
            .wal
            .as_ref()
            .map(|w| (w.entries_written(), w.failures(), w.files_created()))
            .unwrap_or_default();

        CacheStats {
            inserts: self.stats.inserts,
            updates: self.stats.updates,
            deletes: self.stats.deletes,
            evictions: self.stats.evictions,
            flushes: self.stats.flushes,
            cache_size: self.cache.len(),
            pending_writes: self.pending.len(),
            wal_entries,
            wal_failures,
            wal_files,
        }
    }

    /// Remove up to `batch_size` of the oldest pending writes as one flush.
    pub fn take_batch(&mut self, batch_size: usize) -> Option<Vec<Entry>> {
        if self.pending.is_empty() {
            return None;
        }
        let n = batch_size.max(1).min(self.pending.len());
        let batch: Vec<Entry> = self.pending.drain(..n).collect();
        self.stats.flushes += 1;
        Some(batch)
    }

    /// Put an undelivered batch back at the head of the buffer.
    pub fn requeue_front(&mut self, batch: Vec<Entry>) {
        for entry in batch.into_iter().rev() {
            self.pending.push_front(entry);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the owning handle still takes reads and writes.
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    pub fn close_wal(&mut self) {
        if let Some(wal) = self.wal.as_mut() {
            wal.close();
        }
    }
}
