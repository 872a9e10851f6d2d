//! In-memory storage backend using ordered maps.

use crate::error::Result;
use crate::storage::{Collection, Record, StorageBackend, StorageOp, StorageStats};
use std::collections::{BTreeMap, BTreeSet};

/// In-memory storage backend using `BTreeMap` collections and a `BTreeSet`
/// of `(collection, index key, primary key)` entries for the secondary indices.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: BTreeMap<(Collection, String), Record>,
    index: BTreeSet<(Collection, String, String)>,
    operations_count: u64,
}

impl MemoryBackend {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with records, e.g. from a snapshot.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut backend = Self::new();
        for record in records {
            backend.put(record);
        }
        backend.operations_count = 0;
        backend
    }

    fn put(&mut self, record: Record) {
        let collection = record.collection();
        let key = record.primary_key().to_string();
        self.unindex(collection, &key);
        for index_key in record.index_keys() {
            self.index
                .insert((collection, index_key.clone(), key.clone()));
        }
        self.data.insert((collection, key), record);
        self.operations_count += 1;
    }

    fn delete(&mut self, collection: Collection, key: &str) {
        self.unindex(collection, key);
        self.data.remove(&(collection, key.to_string()));
        self.operations_count += 1;
    }

    fn unindex(&mut self, collection: Collection, key: &str) {
        if let Some(old) = self.data.get(&(collection, key.to_string())) {
            for index_key in old.index_keys() {
                self.index
                    .remove(&(collection, index_key.clone(), key.to_string()));
            }
        }
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Record>> {
        Ok(self.data.get(&(collection, key.to_string())).cloned())
    }

    fn index_lookup(&self, collection: Collection, index_key: &str) -> Result<Vec<String>> {
        let start = (collection, index_key.to_string(), String::new());
        Ok(self
            .index
            .range(start..)
            .take_while(|(c, k, _)| *c == collection && k == index_key)
            .map(|(_, _, pk)| pk.clone())
            .collect())
    }

    fn apply(&mut self, ops: &[StorageOp]) -> Result<()> {
        for op in ops {
            match op {
                StorageOp::Put(record) => self.put(record.clone()),
                StorageOp::Delete { collection, key } => self.delete(*collection, key),
            }
        }
        Ok(())
    }

    fn len(&self, collection: Collection) -> Result<usize> {
        Ok(self
            .data
            .keys()
            .filter(|(c, _)| *c == collection)
            .count())
    }

    fn records(&self) -> Result<Box<dyn Iterator<Item = Record> + '_>> {
        Ok(Box::new(self.data.values().cloned()))
    }

    fn clear(&mut self) -> Result<()> {
        self.data.clear();
        self.index.clear();
        Ok(())
    }

    fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            poi_count: self.len(Collection::Pois)?,
            cell_count: self.len(Collection::Cells)?,
            index_entries: self.index.len(),
            operations_count: self.operations_count,
        })
    }
}
