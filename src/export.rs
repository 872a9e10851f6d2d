//! GeoJSON export of cells and statistics for map renderers.
//!
//! Requires the `geojson` feature.

use crate::error::{CellStoreError, Result};
use crate::geometry::Cell;
use crate::stats::{CellAggregate, CellStats};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use std::time::UNIX_EPOCH;

/// Outline of `cell` as a GeoJSON polygon.
pub fn cell_polygon(cell: &Cell) -> Geometry {
    let exterior: Vec<Vec<f64>> = cell
        .polygon()
        .exterior()
        .coords()
        .map(|coord| vec![coord.x, coord.y])
        .collect();
    Geometry::new(Value::Polygon(vec![exterior]))
}

/// Level-16 and level-17 aggregates as polygon features.
///
/// Each feature's id is the cell key; its properties carry `level`,
/// `kind_to_count` and `last_fetch_date` in milliseconds since the epoch.
pub fn stats_feature_collection(stats: &CellStats) -> Result<FeatureCollection> {
    let mut features = Vec::with_capacity(stats.level16.len() + stats.level17.len());
    for (key, aggregate) in stats.level16.iter().chain(&stats.level17) {
        features.push(aggregate_feature(key, aggregate)?);
    }
    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

fn aggregate_feature(key: &str, aggregate: &CellAggregate) -> Result<Feature> {
    let cell = Cell::from_key(key)?;
    let fetched_ms = aggregate
        .last_fetch_date
        .duration_since(UNIX_EPOCH)
        .map_err(|e| CellStoreError::Serialization(e.to_string()))?
        .as_millis();

    let mut properties = JsonObject::new();
    properties.insert("level".to_string(), cell.level.into());
    properties.insert(
        "kind_to_count".to_string(),
        serde_json::to_value(&aggregate.kind_to_count)?,
    );
    properties.insert(
        "last_fetch_date".to_string(),
        serde_json::Value::from(u64::try_from(fetched_ms).unwrap_or(u64::MAX)),
    );

    Ok(Feature {
        bbox: None,
        geometry: Some(cell_polygon(&cell)),
        id: Some(geojson::feature::Id::String(key.to_string())),
        properties: Some(properties),
        foreign_members: None,
    })
}
