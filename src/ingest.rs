//! Single-consumer ingestion queue in front of the synchronizer.
//!
//! Fetch results are pushed from any thread and merged one at a time by
//! [`IngestionQueue::drain`], either called directly or on a schedule by a
//! background drainer. Only one drain runs at a time, so two fetches of
//! overlapping regions never merge concurrently.
//!
//! A failed merge puts the whole drained batch back at the front of the
//! queue, in order, and stops the drain; items merged before the failure are
//! replayed next time, which merging tolerates. Failures go to the error
//! handler rather than to the caller. An item that keeps failing is dropped
//! after `max_ingest_attempts` tries and reported as
//! [`CellStoreError::IngestAbandoned`].

use crate::config::Config;
use crate::error::CellStoreError;
use crate::sync::RecordSynchronizer;
use cellstore_types::record::FreshPoi;
use cellstore_types::region::Region;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

/// One fetch result waiting to be merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchBatch {
    pub pois: Vec<FreshPoi>,
    pub region: Region,
    pub fetched_at: SystemTime,
}

impl FetchBatch {
    pub fn new(pois: Vec<FreshPoi>, region: Region, fetched_at: SystemTime) -> Self {
        Self {
            pois,
            region,
            fetched_at,
        }
    }
}

/// Callback receiving merge failures and abandoned items.
pub type ErrorHandler = Arc<dyn Fn(&CellStoreError, &FetchBatch) + Send + Sync>;

#[derive(Debug)]
struct Pending {
    batch: FetchBatch,
    /// Failed merges so far
    attempts: u32,
}

struct QueueInner {
    synchronizer: RecordSynchronizer,
    pending: Mutex<VecDeque<Pending>>,
    draining: Mutex<()>,
    on_error: RwLock<ErrorHandler>,
    batch_size: usize,
    max_attempts: Option<u32>,
    drain_interval: Duration,
}

/// Thread-safe handle to an ingestion queue. Clones share the same queue.
#[derive(Clone)]
pub struct IngestionQueue {
    inner: Arc<QueueInner>,
}

fn log_error(err: &CellStoreError, batch: &FetchBatch) {
    log::error!(
        "Ingestion of {} POIs fetched at {:?} failed: {}",
        batch.pois.len(),
        batch.fetched_at,
        err
    );
}

impl IngestionQueue {
    /// Create a queue using the store's batch size, retry bound and drain interval.
    pub fn new(synchronizer: RecordSynchronizer) -> Self {
        let config = synchronizer.store().config();
        Self::with_config(synchronizer, &config)
    }

    pub fn with_config(synchronizer: RecordSynchronizer, config: &Config) -> Self {
        let on_error: ErrorHandler = Arc::new(log_error);
        Self {
            inner: Arc::new(QueueInner {
                synchronizer,
                pending: Mutex::new(VecDeque::new()),
                draining: Mutex::new(()),
                on_error: RwLock::new(on_error),
                batch_size: config.ingest_batch_size.max(1),
                max_attempts: config.max_ingest_attempts,
                drain_interval: config.drain_interval(),
            }),
        }
    }

    /// Replace the failure handler. The default logs at `error` level.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&CellStoreError, &FetchBatch) + Send + Sync + 'static,
    {
        *self.inner.on_error.write() = Arc::new(handler);
    }

    pub fn push(&self, batch: FetchBatch) {
        self.inner.pending.lock().push_back(Pending { batch, attempts: 0 });
    }

    /// Period used by [`start_drainer`](Self::start_drainer).
    pub fn drain_interval(&self) -> Duration {
        self.inner.drain_interval
    }

    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pending.lock().is_empty()
    }

    /// Discard every pending item without merging it. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut pending = self.inner.pending.lock();
        let dropped = pending.len();
        pending.clear();
        if dropped > 0 {
            log::info!("Discarded {dropped} pending ingestion items");
        }
        dropped
    }

    /// Merge up to `ingest_batch_size` pending items in order.
    ///
    /// Returns the number of successful merges. A call made while another
    /// drain is running returns 0 immediately.
    pub fn drain(&self) -> usize {
        let Some(_guard) = self.inner.draining.try_lock() else {
            return 0;
        };

        let mut batch: VecDeque<Pending> = {
            let mut pending = self.inner.pending.lock();
            let n = self.inner.batch_size.min(pending.len());
            pending.drain(..n).collect()
        };

        let mut merged = 0;
        for index in 0..batch.len() {
            let item = &mut batch[index];
            let result = self.inner.synchronizer.merge(
                &item.batch.pois,
                &item.batch.region,
                item.batch.fetched_at,
            );
            let err = match result {
                Ok(_) => {
                    merged += 1;
                    continue;
                }
                Err(err) => err,
            };

            item.attempts += 1;
            self.report(&err, &item.batch);
            if self
                .inner
                .max_attempts
                .is_some_and(|max| item.attempts >= max)
                && let Some(abandoned) = batch.remove(index)
            {
                self.report(
                    &CellStoreError::IngestAbandoned {
                        attempts: abandoned.attempts,
                    },
                    &abandoned.batch,
                );
            }
            self.requeue(batch);
            return merged;
        }
        merged
    }

    fn requeue(&self, batch: VecDeque<Pending>) {
        let mut pending = self.inner.pending.lock();
        for item in batch.into_iter().rev() {
            pending.push_front(item);
        }
    }

    fn report(&self, err: &CellStoreError, batch: &FetchBatch) {
        let handler = Arc::clone(&self.inner.on_error.read());
        handler(err, batch);
    }

    /// Drain on a background thread every `drain_interval_ms` from the config.
    pub fn start_drainer(&self) -> std::io::Result<DrainerHandle> {
        self.spawn_drainer(self.inner.drain_interval)
    }

    /// Drain on a background thread every `interval` until the handle is stopped.
    pub fn spawn_drainer(&self, interval: Duration) -> std::io::Result<DrainerHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let queue = self.clone();
        let thread = std::thread::Builder::new()
            .name("cellstore-drainer".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            queue.drain();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("Ingestion drainer shutting down");
            })?;

        Ok(DrainerHandle {
            interval,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl std::fmt::Debug for IngestionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionQueue")
            .field("pending", &self.len())
            .field("batch_size", &self.inner.batch_size)
            .field("max_attempts", &self.inner.max_attempts)
            .field("drain_interval", &self.inner.drain_interval)
            .finish_non_exhaustive()
    }
}

/// Owns a background drainer thread. Dropping the handle stops the thread.
#[derive(Debug)]
pub struct DrainerHandle {
    interval: Duration,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DrainerHandle {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the drainer and wait for an in-progress drain to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("Ingestion drainer panicked");
        }
    }
}

impl Drop for DrainerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
