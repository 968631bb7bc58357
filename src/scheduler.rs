use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::model::Entry;
use crate::sink::DownstreamSink;
use crate::updater::IndexUpdater;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Take one batch and hand it to the sink. Returns the number delivered.
///
/// The updater lock is held only while the batch is taken (and while it is
/// requeued on failure), never during the commit itself.
pub fn flush_once(updater: &Mutex<IndexUpdater>, sink: &dyn DownstreamSink, batch_size: usize) -> CacheResult<usize> {
    let batch = {
        let mut up = updater.lock().map_err(|_| CacheError::Poisoned)?;
        match up.take_batch(batch_size) {
            Some(batch) => batch,
            None => return Ok(0),
        }
    };
    commit_batch(updater, sink, batch)
}

/// Commit an already-taken batch, putting it back at the head of the buffer
/// if the sink refuses it.
pub fn commit_batch(updater: &Mutex<IndexUpdater>, sink: &dyn DownstreamSink, batch: Vec<Entry>) -> CacheResult<usize> {
    match sink.commit(&batch) {
        Ok(ack) => {
            debug!(size = batch.len(), accepted = ack.accepted, "flushed batch");
            Ok(batch.len())
        }
        Err(e) => {
            warn!(size = batch.len(), error = %e, "sink commit failed, batch requeued");
            let mut up = updater.lock().map_err(|_| CacheError::Poisoned)?;
            up.requeue_front(batch);
            Err(e.into())
        }
    }
}

/// Flush until the pending buffer is empty. Stops at the first sink failure,
/// leaving the rest pending.
pub fn flush_all(updater: &Mutex<IndexUpdater>, sink: &dyn DownstreamSink, batch_size: usize) -> CacheResult<usize> {
    let mut delivered = 0;
    loop {
        match flush_once(updater, sink, batch_size)? {
            0 => return Ok(delivered),
            n => delivered += n,
        }
    }
}

/// Background task draining pending writes on a fixed interval.
#[derive(Debug)]
pub struct FlushScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FlushScheduler {
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        updater: Arc<Mutex<IndexUpdater>>,
        sink: Arc<dyn DownstreamSink>,
        interval: Duration,
        batch_size: usize,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval = interval.max(MIN_INTERVAL);

        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, batch_size, "flush scheduler started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let updater = updater.clone();
                        let sink = sink.clone();
                        // Sink commits may block on I/O
                        let res = tokio::task::spawn_blocking(move || {
                            flush_once(&updater, sink.as_ref(), batch_size)
                        }).await;

                        match res {
                            Ok(Ok(_)) | Ok(Err(CacheError::Sink(_))) => {}
                            Ok(Err(e)) => {
                                error!(error = %e, "flush scheduler stopping");
                                break;
                            }
                            Err(e) => error!(error = %e, "flush task panicked"),
                        }
                    }
                    // Also fires if the owning handle is dropped
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("flush scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Signal the task and wait for it to finish its current tick.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "flush scheduler task did not exit cleanly");
        }
    }
}
