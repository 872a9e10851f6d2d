//! Incremental merge of fetched POIs into the store.
//!
//! A fetch reports every POI inside a rectangular region at one point in
//! time. Merging it runs as a single read-write transaction:
//!
//! 1. cover the region at levels 14 and 17;
//! 2. load every stored POI indexed under a level-14 covering key;
//! 3. delete loaded POIs that the fetch no longer reports, but only when
//!    their stored coordinate lies inside the region;
//! 4. upsert every fetched POI with a freshly computed ancestor chain;
//! 5. upsert a [`CellRecord`] for each level-17 cell the region fully encloses.
//!
//! Replaying the same fetch leaves the stored content unchanged apart from
//! `last_fetch_date`, which never moves backwards.

use crate::covering::{covering_cells, is_fully_enclosed};
use crate::db::Store;
use crate::db::transaction::{
    AbortSignal, Instruction, Procedure, Reply, Request, Response, TransactionMode, Yield,
};
use crate::error::{CellStoreError, Result};
use crate::geometry::{Cell, MAX_LEVEL};
use crate::storage::{Collection, Record};
use cellstore_types::record::{CellRecord, FreshPoi, PoiRecord};
use cellstore_types::region::Region;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Level whose covering selects the stored POIs a fetch may replace.
pub const COVERING_LEVEL: u8 = 14;

/// Level of the cells recorded as fully observed.
pub const VISIBLE_CELL_LEVEL: u8 = 17;

/// Outcome of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// POIs stored for the first time
    pub inserted: usize,
    /// POIs that replaced an existing record
    pub updated: usize,
    /// Stale POIs removed from the region
    pub deleted: usize,
    /// Level-17 cells recorded as fully enclosed
    pub visible_cells: usize,
}

/// Merges fetch results into a [`Store`].
#[derive(Debug, Clone)]
pub struct RecordSynchronizer {
    store: Store,
}

impl RecordSynchronizer {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Merge one fetch of `region` taken at `fetched_at`.
    ///
    /// When a guid appears more than once in `fresh`, its last occurrence wins.
    pub fn merge(
        &self,
        fresh: &[FreshPoi],
        region: &Region,
        fetched_at: SystemTime,
    ) -> Result<MergeReport> {
        self.merge_with_abort(fresh, region, fetched_at, None)
    }

    /// Like [`merge`](Self::merge), cancellable until the transaction commits.
    pub fn merge_with_abort(
        &self,
        fresh: &[FreshPoi],
        region: &Region,
        fetched_at: SystemTime,
        abort: Option<&AbortSignal>,
    ) -> Result<MergeReport> {
        // pure geometry, kept outside the write lock
        let plan = MergePlan::new(fresh, region)?;
        let procedure = MergeProcedure::new(plan, *region, fetched_at);
        let report = self
            .store
            .transaction(TransactionMode::ReadWrite, procedure, abort)?;
        log::debug!(
            "Merged fetch of {} POIs: {} inserted, {} updated, {} deleted, {} visible cells",
            fresh.len(),
            report.inserted,
            report.updated,
            report.deleted,
            report.visible_cells
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Start,
    LoadNearby,
    LoadExisting,
    LoadCells,
    Commit,
}

struct Upsert<'a> {
    poi: &'a FreshPoi,
    cell_ids: Vec<String>,
}

/// Coverings and ancestor chains for one fetch, computed before the
/// transaction starts.
struct MergePlan<'a> {
    nearby: Vec<Cell>,
    enclosed: Vec<Cell>,
    /// One entry per distinct guid, in first-seen order
    upserts: Vec<Upsert<'a>>,
}

impl<'a> MergePlan<'a> {
    fn new(fresh: &'a [FreshPoi], region: &Region) -> Result<Self> {
        let nearby = covering_cells(region, COVERING_LEVEL)?;
        let enclosed = covering_cells(region, VISIBLE_CELL_LEVEL)?
            .into_iter()
            .filter(|cell| is_fully_enclosed(cell, region))
            .collect();

        let mut upserts: Vec<Upsert<'a>> = Vec::with_capacity(fresh.len());
        let mut position: FxHashMap<&'a str, usize> = FxHashMap::default();
        for poi in fresh {
            let leaf = Cell::from_lat_lng(poi.lat_lng(), MAX_LEVEL)?;
            let upsert = Upsert {
                poi,
                cell_ids: leaf.ancestor_keys(MAX_LEVEL)?,
            };
            match position.get(poi.guid.as_str()) {
                Some(&n) => upserts[n] = upsert,
                None => {
                    position.insert(poi.guid.as_str(), upserts.len());
                    upserts.push(upsert);
                }
            }
        }

        Ok(Self {
            nearby,
            enclosed,
            upserts,
        })
    }
}

struct MergeProcedure<'a> {
    region: Region,
    fetched_at: SystemTime,
    stage: Stage,
    nearby: Vec<Cell>,
    upserts: Vec<Upsert<'a>>,
    enclosed: Vec<Cell>,
    writes: Vec<Request>,
    report: MergeReport,
}

impl<'a> MergeProcedure<'a> {
    fn new(plan: MergePlan<'a>, region: Region, fetched_at: SystemTime) -> Self {
        Self {
            region,
            fetched_at,
            stage: Stage::Start,
            nearby: plan.nearby,
            upserts: plan.upserts,
            enclosed: plan.enclosed,
            writes: Vec::new(),
            report: MergeReport::default(),
        }
    }

    /// Load every stored POI indexed under the level-14 covering.
    fn load_nearby(&mut self) -> Vec<Request> {
        self.stage = Stage::LoadNearby;
        self.nearby
            .iter()
            .map(|cell| Request::GetAllByIndex {
                collection: Collection::Pois,
                index_key: cell.key(),
            })
            .collect()
    }

    /// Stage deletion of stale POIs, then load the stored versions of the fresh ones.
    fn stage_deletions(&mut self, responses: Vec<Response>) -> Result<Vec<Request>> {
        let fresh: FxHashSet<&str> = self.upserts.iter().map(|u| u.poi.guid.as_str()).collect();
        let mut loaded: FxHashSet<String> = FxHashSet::default();

        for response in responses {
            for record in response.into_records()? {
                let Some(poi) = record.as_poi() else {
                    continue;
                };
                if !loaded.insert(poi.guid.clone()) {
                    continue;
                }
                if fresh.contains(poi.guid.as_str()) || !self.region.contains(&poi.lat_lng()) {
                    continue;
                }
                self.writes.push(Request::Delete {
                    collection: Collection::Pois,
                    key: poi.guid.clone(),
                });
                self.report.deleted += 1;
            }
        }

        self.stage = Stage::LoadExisting;
        Ok(self
            .upserts
            .iter()
            .map(|u| Request::Get {
                collection: Collection::Pois,
                key: u.poi.guid.clone(),
            })
            .collect())
    }

    /// Stage POI upserts, then load the stored versions of the enclosed cells.
    fn stage_pois(&mut self, responses: Vec<Response>) -> Result<Vec<Request>> {
        expect_len("POI lookups", self.upserts.len(), responses.len())?;

        for (upsert, response) in self.upserts.iter().zip(responses) {
            let existing = response.into_record()?.and_then(Record::into_poi);
            if existing.is_some() {
                self.report.updated += 1;
            } else {
                self.report.inserted += 1;
            }
            let record = merged_poi(existing, upsert, self.fetched_at);
            self.writes.push(Request::Put(Record::Poi(record)));
        }

        self.stage = Stage::LoadCells;
        Ok(self
            .enclosed
            .iter()
            .map(|cell| Request::Get {
                collection: Collection::Cells,
                key: cell.key(),
            })
            .collect())
    }

    /// Stage cell upserts and hand back the whole write set.
    fn stage_cells(&mut self, responses: Vec<Response>) -> Result<Vec<Request>> {
        expect_len("cell lookups", self.enclosed.len(), responses.len())?;

        for (cell, response) in self.enclosed.iter().zip(responses) {
            let existing = response.into_record()?.and_then(Record::into_cell);
            let center = cell.center();
            let record = CellRecord {
                key: cell.key(),
                center_lat: center.lat,
                center_lng: center.lng,
                level: cell.level,
                ancestor_ids: cell.ancestor_keys(cell.level - 1)?,
                first_fetch_date: existing
                    .as_ref()
                    .map_or(self.fetched_at, |c| c.first_fetch_date),
                last_fetch_date: existing
                    .as_ref()
                    .map_or(self.fetched_at, |c| c.last_fetch_date.max(self.fetched_at)),
            };
            self.writes.push(Request::Put(Record::Cell(record)));
            self.report.visible_cells += 1;
        }

        self.stage = Stage::Commit;
        Ok(std::mem::take(&mut self.writes))
    }
}

impl Procedure for MergeProcedure<'_> {
    type Output = MergeReport;

    fn resume(&mut self, reply: Option<Reply>) -> Result<Yield<'_, MergeReport>> {
        let requests = match (self.stage, reply) {
            (Stage::Start, None) => self.load_nearby(),
            (Stage::LoadNearby, Some(reply)) => self.stage_deletions(reply.into_batch()?)?,
            (Stage::LoadExisting, Some(reply)) => self.stage_pois(reply.into_batch()?)?,
            (Stage::LoadCells, Some(reply)) => self.stage_cells(reply.into_batch()?)?,
            (Stage::Commit, Some(reply)) => {
                reply.into_batch()?;
                return Ok(Yield::Complete(self.report));
            }
            (stage, reply) => {
                return Err(CellStoreError::ProcedureState(format!(
                    "merge resumed in stage {stage:?} with {reply:?}"
                )));
            }
        };
        Ok(Yield::Step(Instruction::Batch(requests)))
    }
}

fn expect_len(what: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(CellStoreError::ProcedureState(format!(
            "{what}: expected {expected} responses, got {got}"
        )));
    }
    Ok(())
}

fn merged_poi(existing: Option<PoiRecord>, upsert: &Upsert<'_>, fetched_at: SystemTime) -> PoiRecord {
    let fresh = upsert.poi;
    let (name, first_fetch_date, last_fetch_date) = match existing {
        Some(old) => (
            if fresh.name.is_empty() {
                old.name
            } else {
                fresh.name.clone()
            },
            old.first_fetch_date,
            old.last_fetch_date.max(fetched_at),
        ),
        None => (fresh.name.clone(), fetched_at, fetched_at),
    };
    PoiRecord {
        guid: fresh.guid.clone(),
        lat: fresh.lat,
        lng: fresh.lng,
        name,
        kinds: fresh.kinds.clone(),
        payload: fresh.payload.clone(),
        cell_ids: upsert.cell_ids.clone(),
        first_fetch_date,
        last_fetch_date,
    }
}
