//! Local, incrementally synchronized store of map points of interest, indexed
//! by hierarchical spherical cells.
//!
//! ```rust
//! use cellstore::prelude::*;
//! use std::time::SystemTime;
//!
//! let store = Store::memory()?;
//! let sync = RecordSynchronizer::new(store.clone());
//! let stats = StatisticsAggregator::new(store);
//!
//! let gym = FreshPoi::new("gym-1", 35.0, 139.0).with_kind(PoiKind::Gym);
//! let region = Region::new(34.99, 138.99, 35.01, 139.01);
//! sync.merge(&[gym], &region, SystemTime::now())?;
//!
//! let result = stats.cell_stats(35.0, 139.0)?.expect("data under the cell");
//! assert_eq!(result.pois_of(PoiKind::Gym).len(), 1);
//! # Ok::<(), cellstore::CellStoreError>(())
//! ```

pub mod builder;
pub mod config;
pub mod covering;
pub mod db;
pub mod error;
#[cfg(feature = "geojson")]
pub mod export;
pub mod geometry;
pub mod ingest;
pub mod stats;
pub mod storage;
pub mod sync;

pub use builder::StoreBuilder;
pub use config::Config;
pub use db::transaction::{AbortSignal, TransactionMode};
pub use db::{Store, StoreStats};
pub use error::{CellStoreError, Result};

pub use cellstore_types::latlng::LatLng;
pub use cellstore_types::record::{CellRecord, FreshPoi, Payload, PoiKind, PoiRecord};
pub use cellstore_types::region::Region;

pub use covering::{covering_cells, is_fully_enclosed};
pub use geometry::Cell;

pub use ingest::{DrainerHandle, FetchBatch, IngestionQueue};
pub use stats::{CellAggregate, CellStats, StatisticsAggregator};
pub use sync::{MergeReport, RecordSynchronizer};

pub use storage::{MemoryBackend, StorageBackend, StorageStats};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{CellStoreError, Config, Result, Store, StoreBuilder};

    pub use crate::{Cell, LatLng, Region};

    pub use crate::{FreshPoi, PoiKind, PoiRecord};

    pub use crate::{IngestionQueue, RecordSynchronizer, StatisticsAggregator};

    pub use std::time::Duration;
}
