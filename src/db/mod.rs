//! The transactional record store.
//!
//! `Store` owns the storage backend behind a `parking_lot::RwLock`. Every
//! read and write goes through [`Store::transaction`], which drives a
//! [`Procedure`](transaction::Procedure) against a staged view and commits
//! its write set in one step. A read-write transaction holds the write lock
//! for its whole body; read-only transactions share the read lock.
//!
//! ```rust
//! use cellstore::Store;
//!
//! # fn main() -> cellstore::Result<()> {
//! let store = Store::memory()?;
//! assert!(store.get_poi("missing")?.is_none());
//! assert_eq!(store.stats()?.poi_count, 0);
//! # Ok(())
//! # }
//! ```

pub mod transaction;

use crate::builder::StoreBuilder;
use crate::config::Config;
use crate::error::{CellStoreError, Result};
use crate::storage::{Collection, MemoryBackend, StorageBackend};
#[cfg(feature = "snapshot")]
use crate::storage::{Record, SnapshotFile};
use cellstore_types::record::{CellRecord, PoiRecord};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
#[cfg(feature = "snapshot")]
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use transaction::{AbortSignal, Procedure, Staged, TransactionMode, drive};

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub poi_count: usize,
    pub cell_count: usize,
    pub index_entries: usize,
    /// Transactions that ran to completion
    pub committed_transactions: u64,
    /// Transactions rolled back by an error or an abort signal
    pub aborted_transactions: u64,
}

#[derive(Debug, Default)]
struct TransactionCounters {
    committed: AtomicU64,
    aborted: AtomicU64,
}

/// Thread-safe handle to a cell store. Clones share the same data.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<StoreInner>>,
    counters: Arc<TransactionCounters>,
}

pub(crate) struct StoreInner {
    /// Committed records of both collections
    pub backend: Box<dyn StorageBackend>,
    /// Snapshot file for persistence
    #[cfg(feature = "snapshot")]
    pub snapshot_file: Option<SnapshotFile>,
    pub closed: bool,
    pub config: Config,
}

impl StoreInner {
    pub(crate) fn new(config: &Config) -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
            #[cfg(feature = "snapshot")]
            snapshot_file: None,
            closed: false,
            config: config.clone(),
        }
    }

    #[cfg(feature = "snapshot")]
    pub(crate) fn load_from_snapshot(&mut self, snapshot_file: &SnapshotFile) -> Result<()> {
        let records = snapshot_file.load()?;
        self.backend = Box::new(MemoryBackend::from_records(records));
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(CellStoreError::StoreClosed);
        }
        Ok(())
    }

    #[cfg(feature = "snapshot")]
    fn write_snapshot(&mut self) -> Result<()> {
        let records: Vec<Record> = self.backend.records()?.collect();
        match self.snapshot_file.as_mut() {
            Some(file) => file.save(records.iter()),
            None => Err(CellStoreError::Config(
                "no snapshot path configured".to_string(),
            )),
        }
    }

    #[cfg(feature = "snapshot")]
    fn after_commit(&mut self) {
        let due = match self.snapshot_file.as_mut() {
            Some(file) => {
                file.record_operation();
                file.should_snapshot()
            }
            None => false,
        };
        if due && let Err(e) = self.write_snapshot() {
            log::warn!("Automatic snapshot failed: {e}");
        }
    }
}

impl Store {
    /// Open a store persisted at `path`, loading the snapshot if it exists.
    #[cfg(feature = "snapshot")]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    #[cfg(feature = "snapshot")]
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        StoreBuilder::new()
            .path(path.as_ref())
            .config(config)
            .build()
    }

    /// Create a store that lives only in memory.
    pub fn memory() -> Result<Self> {
        Self::memory_with_config(Config::default())
    }

    pub fn memory_with_config(config: Config) -> Result<Self> {
        StoreBuilder::new().in_memory().config(config).build()
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub(crate) fn from_inner(inner: StoreInner) -> Self {
        Self {
            inner: Arc::new(RwLock::new(inner)),
            counters: Arc::default(),
        }
    }

    pub fn config(&self) -> Config {
        self.inner.read().config.clone()
    }

    /// Run `procedure` as one atomic transaction.
    ///
    /// Instructions are executed strictly in the order the procedure yields
    /// them. On success the staged writes are committed together; on any
    /// error, or if `abort` is raised before commit, nothing is written.
    pub fn transaction<P: Procedure>(
        &self,
        mode: TransactionMode,
        mut procedure: P,
        abort: Option<&AbortSignal>,
    ) -> Result<P::Output> {
        let result = match mode {
            TransactionMode::ReadOnly => self.run_read_only(&mut procedure, abort),
            TransactionMode::ReadWrite => self.run_read_write(&mut procedure, abort),
        };
        match &result {
            Ok(_) => {
                self.counters.committed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.aborted.fetch_add(1, Ordering::Relaxed);
                log::debug!("{mode:?} transaction aborted: {e}");
            }
        }
        result
    }

    fn run_read_only<P: Procedure>(
        &self,
        procedure: &mut P,
        abort: Option<&AbortSignal>,
    ) -> Result<P::Output> {
        let guard = self.inner.read();
        guard.ensure_open()?;
        let mut staged = Staged::new(&*guard.backend, TransactionMode::ReadOnly);
        drive(&mut staged, procedure, abort)
    }

    fn run_read_write<P: Procedure>(
        &self,
        procedure: &mut P,
        abort: Option<&AbortSignal>,
    ) -> Result<P::Output> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.ensure_open()?;

        let mut staged = Staged::new(&*inner.backend, TransactionMode::ReadWrite);
        let output = drive(&mut staged, procedure, abort)?;
        let ops = staged.into_ops();
        if ops.is_empty() {
            return Ok(output);
        }

        inner.backend.apply(&ops)?;
        log::debug!("Transaction committed {} writes", ops.len());

        #[cfg(feature = "snapshot")]
        inner.after_commit();

        Ok(output)
    }

    pub fn get_poi(&self, guid: &str) -> Result<Option<PoiRecord>> {
        let guard = self.inner.read();
        guard.ensure_open()?;
        Ok(guard
            .backend
            .get(Collection::Pois, guid)?
            .and_then(|record| record.into_poi()))
    }

    pub fn get_cell(&self, key: &str) -> Result<Option<CellRecord>> {
        let guard = self.inner.read();
        guard.ensure_open()?;
        Ok(guard
            .backend
            .get(Collection::Cells, key)?
            .and_then(|record| record.into_cell()))
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let guard = self.inner.read();
        let storage = guard.backend.stats()?;
        Ok(StoreStats {
            poi_count: storage.poi_count,
            cell_count: storage.cell_count,
            index_entries: storage.index_entries,
            committed_transactions: self.counters.committed.load(Ordering::Relaxed),
            aborted_transactions: self.counters.aborted.load(Ordering::Relaxed),
        })
    }

    /// Remove every record.
    pub fn clear(&self) -> Result<()> {
        let mut guard = self.inner.write();
        guard.ensure_open()?;
        guard.backend.clear()?;
        log::info!("Store cleared");
        Ok(())
    }

    /// Write a snapshot now, regardless of the automatic schedule.
    #[cfg(feature = "snapshot")]
    pub fn snapshot(&self) -> Result<()> {
        let mut guard = self.inner.write();
        guard.ensure_open()?;
        guard.write_snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// Close the store, writing a final snapshot when persistence is configured.
    ///
    /// Later operations fail with [`CellStoreError::StoreClosed`]. Closing
    /// twice is a no-op. If the final snapshot fails the store stays open,
    /// so the caller can retry.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.write();
        if guard.closed {
            return Ok(());
        }

        #[cfg(feature = "snapshot")]
        if guard.snapshot_file.is_some() {
            guard.write_snapshot()?;
        }
        guard.closed = true;
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.read();
        f.debug_struct("Store")
            .field("closed", &guard.closed)
            .field("config", &guard.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Record;
    use cellstore_types::record::Payload;
    use std::time::SystemTime;
    use transaction::{Instruction, Reply, Request, Yield};

    fn poi(guid: &str) -> PoiRecord {
        let now = SystemTime::now();
        PoiRecord {
            guid: guid.to_string(),
            lat: 1.0,
            lng: 2.0,
            name: String::new(),
            kinds: Vec::new(),
            payload: Payload::default(),
            cell_ids: vec!["0/".to_string()],
            first_fetch_date: now,
            last_fetch_date: now,
        }
    }

    /// Puts each record in its own step, then optionally fails.
    struct PutAll {
        pending: Vec<Record>,
        fail_at_end: bool,
        abort_after_first: Option<AbortSignal>,
    }

    impl Procedure for PutAll {
        type Output = usize;

        fn resume(&mut self, reply: Option<Reply>) -> Result<Yield<'_, usize>> {
            if reply.is_some()
                && let Some(signal) = self.abort_after_first.take()
            {
                signal.abort();
            }
            match self.pending.pop() {
                Some(record) => Ok(Yield::Step(Instruction::Single(Request::Put(record)))),
                None if self.fail_at_end => Err(CellStoreError::invalid("boom")),
                None => Ok(Yield::Complete(0)),
            }
        }
    }

    fn put_all(guids: &[&str]) -> PutAll {
        PutAll {
            pending: guids.iter().map(|g| Record::Poi(poi(g))).collect(),
            fail_at_end: false,
            abort_after_first: None,
        }
    }

    #[test]
    fn test_commit_applies_all_writes() {
        let store = Store::memory().unwrap();
        store
            .transaction(TransactionMode::ReadWrite, put_all(&["a", "b"]), None)
            .unwrap();
        assert!(store.get_poi("a").unwrap().is_some());
        assert!(store.get_poi("b").unwrap().is_some());

        let stats = store.stats().unwrap();
        assert_eq!(stats.poi_count, 2);
        assert_eq!(stats.committed_transactions, 1);
    }

    #[test]
    fn test_failure_discards_staged_writes() {
        let store = Store::memory().unwrap();
        let mut procedure = put_all(&["a", "b"]);
        procedure.fail_at_end = true;
        assert!(
            store
                .transaction(TransactionMode::ReadWrite, procedure, None)
                .is_err()
        );
        assert!(store.get_poi("a").unwrap().is_none());
        assert_eq!(store.stats().unwrap().aborted_transactions, 1);
    }

    #[test]
    fn test_abort_signal_before_commit() {
        let store = Store::memory().unwrap();
        let signal = AbortSignal::new();
        let mut procedure = put_all(&["a", "b", "c"]);
        procedure.abort_after_first = Some(signal.clone());

        let result = store.transaction(TransactionMode::ReadWrite, procedure, Some(&signal));
        assert!(matches!(result, Err(CellStoreError::Aborted)));
        assert_eq!(store.stats().unwrap().poi_count, 0);
    }

    #[test]
    fn test_abort_after_commit_has_no_effect() {
        let store = Store::memory().unwrap();
        let signal = AbortSignal::new();
        store
            .transaction(TransactionMode::ReadWrite, put_all(&["a"]), Some(&signal))
            .unwrap();
        signal.abort();
        assert!(store.get_poi("a").unwrap().is_some());
    }

    #[test]
    fn test_read_only_transaction_rejects_put() {
        let store = Store::memory().unwrap();
        let result = store.transaction(TransactionMode::ReadOnly, put_all(&["a"]), None);
        assert!(matches!(result, Err(CellStoreError::ReadOnlyTransaction)));
        assert!(store.get_poi("a").unwrap().is_none());
    }

    #[test]
    fn test_closed_store_rejects_transactions() {
        let store = Store::memory().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        let result = store.transaction(TransactionMode::ReadWrite, put_all(&["a"]), None);
        assert!(matches!(result, Err(CellStoreError::StoreClosed)));
        assert!(matches!(store.get_poi("a"), Err(CellStoreError::StoreClosed)));
        store.close().unwrap();
    }

    #[test]
    fn test_clear() {
        let store = Store::memory().unwrap();
        store
            .transaction(TransactionMode::ReadWrite, put_all(&["a"]), None)
            .unwrap();
        store.clear().unwrap();
        assert_eq!(store.stats().unwrap().poi_count, 0);
    }

    #[cfg(feature = "snapshot")]
    #[test]
    fn test_snapshot_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.snap");
        {
            let store = Store::open(&path).unwrap();
            store
                .transaction(TransactionMode::ReadWrite, put_all(&["a", "b"]), None)
                .unwrap();
            store.close().unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.stats().unwrap().poi_count, 2);
        assert_eq!(store.get_poi("a").unwrap().unwrap().lat, 1.0);
    }

    #[cfg(feature = "snapshot")]
    #[test]
    fn test_auto_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auto.snap");
        let store =
            Store::open_with_config(&path, Config::default().with_snapshot_auto_ops(1)).unwrap();
        store
            .transaction(TransactionMode::ReadWrite, put_all(&["a"]), None)
            .unwrap();
        assert!(path.exists());

        let reopened = Store::open(&path).unwrap();
        assert!(reopened.get_poi("a").unwrap().is_some());
    }

    #[cfg(feature = "snapshot")]
    #[test]
    fn test_failed_close_keeps_store_open() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        let path = sub.join("cells.snap");
        let store = Store::open(&path).unwrap();
        store
            .transaction(TransactionMode::ReadWrite, put_all(&["a"]), None)
            .unwrap();

        // parent directory is missing, so the final snapshot cannot be written
        assert!(matches!(store.close(), Err(CellStoreError::Io(_))));
        assert!(!store.is_closed());
        assert!(store.get_poi("a").unwrap().is_some());
        assert!(store.snapshot().is_err());

        std::fs::create_dir_all(&sub).unwrap();
        store.close().unwrap();
        assert!(store.is_closed());

        let reopened = Store::open(&path).unwrap();
        assert!(reopened.get_poi("a").unwrap().is_some());
    }

    #[test]
    fn test_memory_store_snapshot_requires_path() {
        let store = Store::memory().unwrap();
        #[cfg(feature = "snapshot")]
        assert!(matches!(store.snapshot(), Err(CellStoreError::Config(_))));
        assert!(store.close().is_ok());
    }
}
