//! Region covering by flood fill over the cell neighbor graph.
//!
//! Starting from the cell that holds the region's center, neighbors are
//! explored breadth-first; the center cell is always accepted, any other
//! cell when the bounding rectangle of its four corners intersects the
//! region, and only accepted cells spread further. The result is every cell at the requested level that is
//! edge-reachable from the center through intersecting cells.

use crate::error::{CellStoreError, Result};
use crate::geometry::Cell;
use cellstore_types::region::Region;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

/// Upper bound on visited cells for a single covering.
pub const MAX_COVERING_CELLS: usize = 1 << 20;

/// Bounding rectangle of a cell's four corners.
pub fn corner_bounds(cell: &Cell) -> Region {
    let corners = cell.corners();
    // four corners, never empty
    Region::bounding(&corners).unwrap_or_else(|| Region::from_corners(corners[0], corners[0]))
}

/// All level-`level` cells covering `region`, sorted by key.
pub fn covering_cells(region: &Region, level: u8) -> Result<Vec<Cell>> {
    if !region.is_finite() {
        log::warn!("Rejecting covering request with non-finite region");
        return Err(CellStoreError::invalid("non-finite region"));
    }
    let start = Cell::from_lat_lng(region.center(), level)?;

    let mut seen: FxHashSet<Cell> = FxHashSet::default();
    let mut pending = VecDeque::from([start]);
    let mut accepted = Vec::new();

    while let Some(cell) = pending.pop_front() {
        if !seen.insert(cell) {
            continue;
        }
        if seen.len() > MAX_COVERING_CELLS {
            return Err(CellStoreError::RegionTooLarge {
                level,
                limit: MAX_COVERING_CELLS,
            });
        }
        // the center cell holds part of the region even when its corner
        // rectangle misses it, as happens for cells wrapping a pole
        if cell != start && !corner_bounds(&cell).intersects(region) {
            continue;
        }
        accepted.push(cell);
        pending.extend(cell.neighbors());
    }

    let mut keyed: Vec<(String, Cell)> = accepted.into_iter().map(|c| (c.key(), c)).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(keyed.into_iter().map(|(_, c)| c).collect())
}

/// True when all four corners of `cell` lie inside `region`.
pub fn is_fully_enclosed(cell: &Cell, region: &Region) -> bool {
    cell.corners().iter().all(|corner| region.contains(corner))
}
