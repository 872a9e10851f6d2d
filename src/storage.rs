//! Storage backend abstraction for cellstore
//!
//! The store persists two identity-keyed collections, POI records and cell
//! records, each carrying one multi-valued secondary index. Backends only
//! need point reads, exact-key index lookups and atomic application of a
//! write set; transactions are layered on top in `db::transaction`.

mod backends;
#[cfg(feature = "snapshot")]
mod snapshot;

pub use backends::MemoryBackend;
#[cfg(feature = "snapshot")]
pub use snapshot::{SnapshotConfig, SnapshotFile};

use crate::error::Result;
use cellstore_types::record::{CellRecord, PoiRecord};
use serde::{Deserialize, Serialize};

/// A named record collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    /// POI records keyed by guid, indexed by `cell_ids`
    Pois,
    /// Cell records keyed by cell key, indexed by `ancestor_ids`
    Cells,
}

/// A stored record of either collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Poi(PoiRecord),
    Cell(CellRecord),
}

impl Record {
    pub fn collection(&self) -> Collection {
        match self {
            Record::Poi(_) => Collection::Pois,
            Record::Cell(_) => Collection::Cells,
        }
    }

    pub fn primary_key(&self) -> &str {
        match self {
            Record::Poi(poi) => &poi.guid,
            Record::Cell(cell) => &cell.key,
        }
    }

    /// Values of the collection's multi-valued index for this record.
    pub fn index_keys(&self) -> &[String] {
        match self {
            Record::Poi(poi) => &poi.cell_ids,
            Record::Cell(cell) => &cell.ancestor_ids,
        }
    }

    pub fn as_poi(&self) -> Option<&PoiRecord> {
        match self {
            Record::Poi(poi) => Some(poi),
            Record::Cell(_) => None,
        }
    }

    pub fn into_poi(self) -> Option<PoiRecord> {
        match self {
            Record::Poi(poi) => Some(poi),
            Record::Cell(_) => None,
        }
    }

    pub fn as_cell(&self) -> Option<&CellRecord> {
        match self {
            Record::Cell(cell) => Some(cell),
            Record::Poi(_) => None,
        }
    }

    pub fn into_cell(self) -> Option<CellRecord> {
        match self {
            Record::Cell(cell) => Some(cell),
            Record::Poi(_) => None,
        }
    }
}

/// Storage operation for batch processing
#[derive(Debug, Clone, PartialEq)]
pub enum StorageOp {
    /// Insert or replace a record
    Put(Record),
    /// Delete a record by primary key
    Delete { collection: Collection, key: String },
}

/// Storage backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub poi_count: usize,
    pub cell_count: usize,
    /// Total secondary index entries across both collections
    pub index_entries: usize,
    /// Number of put/delete operations applied
    pub operations_count: u64,
}

/// Trait for storage backend implementations
pub trait StorageBackend: Send + Sync {
    /// Get a record by primary key
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Record>>;

    /// Primary keys of every record whose index contains `index_key`, in key order
    fn index_lookup(&self, collection: Collection, index_key: &str) -> Result<Vec<String>>;

    /// Apply every operation or none of them
    fn apply(&mut self, ops: &[StorageOp]) -> Result<()>;

    /// Number of records in a collection
    fn len(&self, collection: Collection) -> Result<usize>;

    /// Iterator over all records of both collections
    fn records(&self) -> Result<Box<dyn Iterator<Item = Record> + '_>>;

    /// Remove every record
    fn clear(&mut self) -> Result<()>;

    fn stats(&self) -> Result<StorageStats>;
}
