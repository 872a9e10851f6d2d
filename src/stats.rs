//! Nested occupancy statistics around a coordinate.
//!
//! Statistics are scoped to the level-14 cell holding the query point. POIs
//! indexed under that cell are grouped by kind, and the countable kinds are
//! additionally tallied per level-16 and level-17 cell. Level-17
//! [`CellRecord`]s contribute their observation time even when no POI sits
//! in them, which separates "observed and empty" from "never observed".
//!
//! Counts are derived from the POI records on every call; nothing is
//! maintained incrementally.

use crate::db::Store;
use crate::db::transaction::{Instruction, Procedure, Reply, ScanControl, TransactionMode, Yield};
use crate::error::{CellStoreError, Result};
use crate::geometry::Cell;
use crate::storage::Collection;
use crate::sync::{COVERING_LEVEL, VISIBLE_CELL_LEVEL};
use cellstore_types::latlng::LatLng;
use cellstore_types::record::{CellRecord, PoiKind, PoiRecord};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Intermediate level tallied between the query cell and the visible cells.
pub const SUMMARY_LEVEL: u8 = 16;

/// Counts and freshness for one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellAggregate {
    pub kind_to_count: BTreeMap<PoiKind, usize>,
    pub last_fetch_date: SystemTime,
}

impl CellAggregate {
    fn new(last_fetch_date: SystemTime) -> Self {
        Self {
            kind_to_count: BTreeMap::new(),
            last_fetch_date,
        }
    }

    fn observe(&mut self, at: SystemTime) {
        self.last_fetch_date = self.last_fetch_date.max(at);
    }

    pub fn count(&self, kind: PoiKind) -> usize {
        self.kind_to_count.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.kind_to_count.values().sum()
    }
}

/// Statistics for the level-14 cell around a query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellStats {
    /// Key of the level-14 cell the statistics cover
    pub cell_key: String,
    /// POIs grouped by kind tag, each list in guid order
    pub kind_to_pois: BTreeMap<PoiKind, Vec<PoiRecord>>,
    /// Countable POIs per level-16 cell
    pub level16: BTreeMap<String, CellAggregate>,
    /// Countable POIs and observations per level-17 cell
    pub level17: BTreeMap<String, CellAggregate>,
}

impl CellStats {
    pub fn pois_of(&self, kind: PoiKind) -> &[PoiRecord] {
        self.kind_to_pois
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Answers occupancy queries with read-only transactions.
#[derive(Debug, Clone)]
pub struct StatisticsAggregator {
    store: Store,
}

impl StatisticsAggregator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Statistics for the level-14 cell containing (`lat`, `lng`), or `None`
    /// when nothing is stored under it.
    pub fn cell_stats(&self, lat: f64, lng: f64) -> Result<Option<CellStats>> {
        let cell = Cell::from_lat_lng(LatLng::new(lat, lng), COVERING_LEVEL)?;
        let procedure = StatsProcedure::new(cell.key());
        self.store
            .transaction(TransactionMode::ReadOnly, procedure, None)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Start,
    ScanPois,
    ScanCells,
}

struct StatsProcedure {
    key: String,
    stage: Stage,
    /// Latest POI per exact coordinate
    pois: FxHashMap<(u64, u64), PoiRecord>,
    cells: Vec<CellRecord>,
}

impl StatsProcedure {
    fn new(key: String) -> Self {
        Self {
            key,
            stage: Stage::Start,
            pois: FxHashMap::default(),
            cells: Vec::new(),
        }
    }

    fn scan_pois(&mut self) -> Instruction<'_> {
        let pois = &mut self.pois;
        Instruction::RangeScan {
            collection: Collection::Pois,
            index_key: self.key.clone(),
            limit: None,
            visitor: Box::new(move |record| {
                if let Some(poi) = record.as_poi() {
                    keep_latest(pois, poi);
                }
                ScanControl::Continue
            }),
        }
    }

    fn scan_cells(&mut self) -> Instruction<'_> {
        let cells = &mut self.cells;
        Instruction::RangeScan {
            collection: Collection::Cells,
            index_key: self.key.clone(),
            limit: None,
            visitor: Box::new(move |record| {
                if let Some(cell) = record.as_cell() {
                    cells.push(cell.clone());
                }
                ScanControl::Continue
            }),
        }
    }

    fn build(&mut self) -> Option<CellStats> {
        if self.pois.is_empty() && self.cells.is_empty() {
            return None;
        }

        let mut pois: Vec<PoiRecord> = std::mem::take(&mut self.pois).into_values().collect();
        pois.sort_by(|a, b| a.guid.cmp(&b.guid));

        let mut stats = CellStats {
            cell_key: self.key.clone(),
            kind_to_pois: BTreeMap::new(),
            level16: BTreeMap::new(),
            level17: BTreeMap::new(),
        };

        for poi in &pois {
            for &kind in &poi.kinds {
                if kind.is_countable() {
                    tally(&mut stats.level16, poi, kind, SUMMARY_LEVEL);
                    tally(&mut stats.level17, poi, kind, VISIBLE_CELL_LEVEL);
                }
            }
        }
        for poi in pois {
            for &kind in &poi.kinds {
                stats.kind_to_pois.entry(kind).or_default().push(poi.clone());
            }
        }

        for cell in &self.cells {
            stats
                .level17
                .entry(cell.key.clone())
                .and_modify(|agg| agg.observe(cell.last_fetch_date))
                .or_insert_with(|| CellAggregate::new(cell.last_fetch_date));
        }

        Some(stats)
    }
}

fn keep_latest(pois: &mut FxHashMap<(u64, u64), PoiRecord>, poi: &PoiRecord) {
    let slot = poi.lat_lng().identity();
    match pois.get(&slot) {
        Some(kept) if kept.last_fetch_date >= poi.last_fetch_date => {}
        _ => {
            pois.insert(slot, poi.clone());
        }
    }
}

fn tally(into: &mut BTreeMap<String, CellAggregate>, poi: &PoiRecord, kind: PoiKind, level: u8) {
    let Some(key) = poi.cell_key(usize::from(level)) else {
        log::warn!("POI {} has a truncated cell chain", poi.guid);
        return;
    };
    let aggregate = into
        .entry(key.to_string())
        .or_insert_with(|| CellAggregate::new(poi.last_fetch_date));
    aggregate.observe(poi.last_fetch_date);
    *aggregate.kind_to_count.entry(kind).or_insert(0) += 1;
}

impl Procedure for StatsProcedure {
    type Output = Option<CellStats>;

    fn resume(&mut self, reply: Option<Reply>) -> Result<Yield<'_, Option<CellStats>>> {
        match (self.stage, reply) {
            (Stage::Start, None) => {
                self.stage = Stage::ScanPois;
                Ok(Yield::Step(self.scan_pois()))
            }
            (Stage::ScanPois, Some(reply)) => {
                reply.into_scanned()?;
                self.stage = Stage::ScanCells;
                Ok(Yield::Step(self.scan_cells()))
            }
            (Stage::ScanCells, Some(reply)) => {
                reply.into_scanned()?;
                Ok(Yield::Complete(self.build()))
            }
            (stage, reply) => Err(CellStoreError::ProcedureState(format!(
                "statistics resumed in stage {stage:?} with {reply:?}"
            ))),
        }
    }
}
