//! Inbound and persisted record types.
//!
//! `FreshPoi` is what the ingestion pipeline hands over after validation;
//! `PoiRecord` and `CellRecord` are what the store persists.

use crate::latlng::LatLng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::SystemTime;

/// Number of entries in a POI ancestor chain (levels 0 through 30).
pub const CELL_CHAIN_LEN: usize = 31;

/// Kind tag attached to a point of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoiKind {
    Gym,
    Pokestop,
    PowerSpot,
    Portal,
    Other,
}

impl PoiKind {
    /// Kinds that contribute to per-cell occupancy counts.
    pub const COUNTABLE: [PoiKind; 2] = [PoiKind::Gym, PoiKind::Pokestop];

    pub fn is_countable(self) -> bool {
        Self::COUNTABLE.contains(&self)
    }
}

/// Opaque JSON payload carried alongside a POI.
///
/// Human-readable formats see the JSON value itself; binary formats such as
/// bincode, which cannot drive a self-describing `Value`, store it as JSON text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload(pub serde_json::Value);

impl Payload {
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            self.0.serialize(serializer)
        } else {
            let text = serde_json::to_string(&self.0).map_err(serde::ser::Error::custom)?;
            serializer.serialize_str(&text)
        }
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            serde_json::Value::deserialize(deserializer).map(Payload)
        } else {
            let text = String::deserialize(deserializer)?;
            serde_json::from_str(&text)
                .map(Payload)
                .map_err(serde::de::Error::custom)
        }
    }
}

/// A validated point of interest as delivered by a fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshPoi {
    pub guid: String,
    pub lat: f64,
    pub lng: f64,
    /// Display name; an empty string means "unknown in this fetch".
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kinds: Vec<PoiKind>,
    #[serde(default)]
    pub payload: Payload,
}

impl FreshPoi {
    pub fn new(guid: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            guid: guid.into(),
            lat,
            lng,
            name: String::new(),
            kinds: Vec::new(),
            payload: Payload::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_kind(mut self, kind: PoiKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Payload(payload);
        self
    }

    pub fn lat_lng(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

/// A persisted point of interest.
///
/// `cell_ids` holds the keys of every cell containing the point, from the
/// level-0 face cell down to the level-30 leaf; entry `n` is the parent of
/// entry `n + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiRecord {
    pub guid: String,
    pub lat: f64,
    pub lng: f64,
    pub name: String,
    pub kinds: Vec<PoiKind>,
    pub payload: Payload,
    pub cell_ids: Vec<String>,
    pub first_fetch_date: SystemTime,
    pub last_fetch_date: SystemTime,
}

impl PoiRecord {
    pub fn lat_lng(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn has_kind(&self, kind: PoiKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Key of the containing cell at `level`, if the chain is long enough.
    pub fn cell_key(&self, level: usize) -> Option<&str> {
        self.cell_ids.get(level).map(String::as_str)
    }
}

/// A level-17 cell that a fetch region fully enclosed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub key: String,
    pub center_lat: f64,
    pub center_lng: f64,
    pub level: u8,
    /// Keys of the enclosing cells for levels 0 through `level - 1`.
    pub ancestor_ids: Vec<String>,
    pub first_fetch_date: SystemTime,
    pub last_fetch_date: SystemTime,
}

impl CellRecord {
    pub fn center(&self) -> LatLng {
        LatLng::new(self.center_lat, self.center_lng)
    }
}
