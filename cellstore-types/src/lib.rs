//! # cellstore-types
//!
//! Core coordinate, region and record types for the cellstore POI store.
//!
//! - **Coordinates**: `LatLng`
//! - **Regions**: `Region`, a closed latitude/longitude rectangle
//! - **Records**: `FreshPoi` (inbound), `PoiRecord` and `CellRecord` (persisted)
//!
//! All types are serializable with Serde; `Region` is built on top of the
//! `geo` crate's `Rect`.
//!
//! ## Examples
//!
//! ```rust
//! use cellstore_types::latlng::LatLng;
//! use cellstore_types::region::Region;
//!
//! let tokyo = Region::from_corners(LatLng::new(35.6, 139.6), LatLng::new(35.8, 139.9));
//! assert!(tokyo.contains(&LatLng::new(35.68, 139.76)));
//! ```

pub mod latlng;
pub mod record;
pub mod region;
