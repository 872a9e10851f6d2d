//! Hierarchical sphere cells.
//!
//! The sphere is projected onto the six faces of a cube and every face is
//! subdivided quad-tree style; level 0 is a whole face and level 30 the
//! finest subdivision. A [`Cell`] is identified by `(face, level, i, j)` and
//! has two textual encodings:
//!
//! - **key**: `"<face>/<digits>"` with one Hilbert digit (0-3) per level;
//! - **id**: a packed `u64` with 3 face bits, `2 * level` position bits and a
//!   terminator bit, the same layout as an S2 cell id.
//!
//! ```rust
//! use cellstore::geometry::Cell;
//! use cellstore::LatLng;
//!
//! let cell = Cell::from_lat_lng(LatLng::new(35.0, 139.0), 14)?;
//! assert_eq!(Cell::from_key(&cell.key())?, cell);
//! assert_eq!(Cell::from_id(cell.id())?, cell);
//! # Ok::<(), cellstore::CellStoreError>(())
//! ```

pub mod hilbert;
pub mod projection;

use crate::error::{CellStoreError, Result};
use cellstore_types::latlng::LatLng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use projection::{
    face_uv, ij_from_st, lat_lng_from_xyz, st_from_ij, st_from_uv, to_unit_vector, uv_from_st,
    xyz_from_face_uv,
};

/// Finest subdivision level.
pub const MAX_LEVEL: u8 = 30;

const POS_BITS: u32 = 2 * MAX_LEVEL as u32 + 1;

/// Corner offsets in `(i, j)` order: `(0,0) (0,1) (1,1) (1,0)`.
pub const CORNER_OFFSETS: [(f64, f64); 4] = [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)];

/// Offset of the cell center.
pub const CENTER_OFFSET: (f64, f64) = (0.5, 0.5);

/// One cell of the hierarchical partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub face: u8,
    pub level: u8,
    pub i: u32,
    pub j: u32,
}

fn check_level(level: u8, min: u8) -> Result<()> {
    if level < min || level > MAX_LEVEL {
        return Err(CellStoreError::invalid(format!(
            "level {level} outside {min}..={MAX_LEVEL}"
        )));
    }
    Ok(())
}

impl Cell {
    /// Build a cell from its raw coordinates, checking every range.
    pub fn new(face: u8, level: u8, i: u32, j: u32) -> Result<Self> {
        if face > 5 {
            return Err(CellStoreError::invalid(format!("face {face} outside 0..=5")));
        }
        check_level(level, 0)?;
        let size = 1u64 << level;
        if u64::from(i) >= size || u64::from(j) >= size {
            return Err(CellStoreError::invalid(format!(
                "grid position ({i}, {j}) outside level {level}"
            )));
        }
        Ok(Self { face, level, i, j })
    }

    /// The level-`level` cell containing a coordinate.
    pub fn from_lat_lng(ll: LatLng, level: u8) -> Result<Self> {
        check_level(level, 1)?;
        if !ll.is_finite() {
            log::warn!("Rejecting non-finite coordinate {ll:?}");
            return Err(CellStoreError::invalid(format!(
                "non-finite coordinate ({}, {})",
                ll.lat, ll.lng
            )));
        }
        let (face, u, v) = face_uv(to_unit_vector(ll));
        Ok(Self {
            face,
            level,
            i: ij_from_st(st_from_uv(u), level),
            j: ij_from_st(st_from_uv(v), level),
        })
    }

    /// Coordinate of the point at a fractional `(i, j)` offset inside the cell.
    ///
    /// See [`CORNER_OFFSETS`] and [`CENTER_OFFSET`].
    pub fn lat_lng(&self, offset: (f64, f64)) -> LatLng {
        let s = st_from_ij(i64::from(self.i), offset.0, self.level);
        let t = st_from_ij(i64::from(self.j), offset.1, self.level);
        lat_lng_from_xyz(xyz_from_face_uv(self.face, uv_from_st(s), uv_from_st(t)))
    }

    pub fn center(&self) -> LatLng {
        self.lat_lng(CENTER_OFFSET)
    }

    pub fn corners(&self) -> [LatLng; 4] {
        CORNER_OFFSETS.map(|offset| self.lat_lng(offset))
    }

    /// Cell outline through its four corners (x = longitude, y = latitude).
    pub fn polygon(&self) -> geo::Polygon<f64> {
        let ring: Vec<geo::Coord<f64>> = self
            .corners()
            .iter()
            .map(|corner| geo::coord! { x: corner.lng, y: corner.lat })
            .collect();
        geo::Polygon::new(geo::LineString::from(ring), Vec::new())
    }

    pub fn digits(&self) -> Vec<u8> {
        hilbert::hilbert_digits(self.face, self.i, self.j, self.level)
    }

    /// Textual key `"<face>/<digits>"`.
    pub fn key(&self) -> String {
        let mut key = String::with_capacity(2 + usize::from(self.level));
        key.push(char::from(b'0' + self.face));
        key.push('/');
        key.extend(self.digits().into_iter().map(|d| char::from(b'0' + d)));
        key
    }

    /// Packed identifier: face, position bits, terminator bit, zero padding.
    pub fn id(&self) -> u64 {
        let shift = 2 * u32::from(MAX_LEVEL - self.level);
        let position = hilbert::position_bits(&self.digits());
        (u64::from(self.face) << POS_BITS) | (((position << 1) | 1) << shift)
    }

    /// Decimal rendering of [`Cell::id`].
    pub fn id_string(&self) -> String {
        self.id().to_string()
    }

    pub fn from_key(key: &str) -> Result<Self> {
        let malformed = || CellStoreError::invalid(format!("malformed cell key {key:?}"));
        let (face, digits) = key.split_once('/').ok_or_else(malformed)?;
        let face: u8 = match face.as_bytes() {
            [b @ b'0'..=b'5'] => b - b'0',
            _ => return Err(malformed()),
        };
        if digits.len() > usize::from(MAX_LEVEL) {
            return Err(malformed());
        }
        let digits = digits
            .bytes()
            .map(|b| match b {
                b'0'..=b'3' => Ok(b - b'0'),
                _ => Err(malformed()),
            })
            .collect::<Result<Vec<u8>>>()?;
        let (i, j) = hilbert::grid_from_digits(face, &digits)?;
        // at most MAX_LEVEL digits
        let level = digits.len() as u8;
        Ok(Self { face, level, i, j })
    }

    pub fn from_id(id: u64) -> Result<Self> {
        let malformed = || CellStoreError::invalid(format!("malformed cell id {id}"));
        let face = id >> POS_BITS;
        if id == 0 || face > 5 {
            return Err(malformed());
        }
        let tz = id.trailing_zeros();
        if tz % 2 == 1 || tz > 2 * u32::from(MAX_LEVEL) {
            return Err(malformed());
        }
        // tz <= 60 so the level fits in u8
        let level = (2 * u32::from(MAX_LEVEL) - tz) as u8 / 2;
        let position = (id >> (tz + 1)) & ((1u64 << (2 * u32::from(level))) - 1);
        let digits = hilbert::digits_from_position(position, level);
        // face <= 5
        let face = face as u8;
        let (i, j) = hilbert::grid_from_digits(face, &digits)?;
        Ok(Self { face, level, i, j })
    }

    pub fn from_id_str(id: &str) -> Result<Self> {
        let id: u64 = id
            .parse()
            .map_err(|_| CellStoreError::invalid(format!("malformed cell id {id:?}")))?;
        Self::from_id(id)
    }

    /// Ancestor at a coarser (or equal) level.
    pub fn parent(&self, level: u8) -> Result<Self> {
        if level > self.level {
            return Err(CellStoreError::invalid(format!(
                "parent level {level} finer than cell level {}",
                self.level
            )));
        }
        let shift = self.level - level;
        Ok(Self {
            face: self.face,
            level,
            i: self.i >> shift,
            j: self.j >> shift,
        })
    }

    /// Keys of this cell's ancestors for levels `0..=through_level`.
    ///
    /// Hilbert digits are emitted coarse to fine, so every ancestor key is a
    /// prefix of the cell's own key.
    pub fn ancestor_keys(&self, through_level: u8) -> Result<Vec<String>> {
        if through_level > self.level {
            return Err(CellStoreError::invalid(format!(
                "ancestor level {through_level} finer than cell level {}",
                self.level
            )));
        }
        let key = self.key();
        Ok((0..=usize::from(through_level))
            .map(|n| key[..2 + n].to_string())
            .collect())
    }

    pub fn children(&self) -> Result<[Cell; 4]> {
        if self.level >= MAX_LEVEL {
            return Err(CellStoreError::invalid("leaf cells have no children"));
        }
        let (i, j) = (self.i << 1, self.j << 1);
        let child = |di: u32, dj: u32| Cell {
            face: self.face,
            level: self.level + 1,
            i: i | di,
            j: j | dj,
        };
        Ok([child(0, 0), child(0, 1), child(1, 1), child(1, 0)])
    }

    /// True when `other` is this cell or one of its descendants.
    pub fn contains(&self, other: &Cell) -> bool {
        other.level >= self.level
            && other.face == self.face
            && other.parent(self.level).is_ok_and(|p| p == *self)
    }

    /// The four edge-adjacent cells at the same level, in the order
    /// `(i-1, j) (i, j-1) (i+1, j) (i, j+1)`.
    ///
    /// Offsets that leave the face are reprojected onto the adjacent face.
    pub fn neighbors(&self) -> [Cell; 4] {
        let (i, j) = (i64::from(self.i), i64::from(self.j));
        [(i - 1, j), (i, j - 1), (i + 1, j), (i, j + 1)].map(|(ni, nj)| self.wrap(ni, nj))
    }

    fn wrap(&self, i: i64, j: i64) -> Cell {
        let size = 1i64 << self.level;
        if (0..size).contains(&i) && (0..size).contains(&j) {
            // inside the face grid, so both fit in u32
            return Cell {
                face: self.face,
                level: self.level,
                i: i as u32,
                j: j as u32,
            };
        }
        let u = uv_from_st(st_from_ij(i, CENTER_OFFSET.0, self.level));
        let v = uv_from_st(st_from_ij(j, CENTER_OFFSET.1, self.level));
        let (face, u, v) = face_uv(xyz_from_face_uv(self.face, u, v));
        Cell {
            face,
            level: self.level,
            i: ij_from_st(st_from_uv(u), self.level),
            j: ij_from_st(st_from_uv(v), self.level),
        }
    }

    /// The equivalent `s2` crate cell id (identical bit layout).
    pub fn to_s2(&self) -> s2::cellid::CellID {
        s2::cellid::CellID(self.id())
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_and_id_round_trip_every_level() {
        for face in 0..6u8 {
            for level in 1..=MAX_LEVEL {
                let max = (1u64 << level) - 1;
                let samples = [0, max / 3, max / 2, max];
                for &i in &samples {
                    for &j in &samples {
                        let cell = Cell::new(face, level, i as u32, j as u32).unwrap();
                        assert_eq!(Cell::from_key(&cell.key()).unwrap(), cell);
                        assert_eq!(Cell::from_id(cell.id()).unwrap(), cell);
                        assert_eq!(Cell::from_id_str(&cell.id_string()).unwrap(), cell);
                    }
                }
            }
        }
    }

    #[test]
    fn test_polygon_is_closed_and_holds_center() {
        use geo::Contains;

        let cell = Cell::from_lat_lng(LatLng::new(35.0, 139.0), 17).unwrap();
        let polygon = cell.polygon();
        assert_eq!(polygon.exterior().0.len(), 5);
        assert!(polygon.exterior().is_closed());
        assert!(polygon.contains(&cell.center().to_point()));
    }

    #[test]
    fn test_face_cell_ids() {
        let face_cell = Cell::new(3, 0, 0, 0).unwrap();
        assert_eq!(face_cell.key(), "3/");
        assert_eq!(face_cell.id(), (3u64 << 61) | (1u64 << 60));
        assert_eq!(Cell::from_key("3/").unwrap(), face_cell);
    }

    #[test]
    fn test_leaf_id_has_low_terminator() {
        let leaf = Cell::new(0, 30, 0, 0).unwrap();
        assert_eq!(leaf.id(), 1);
        assert_eq!(Cell::from_id(1).unwrap(), leaf);
    }

    #[test]
    fn test_invalid_arguments() {
        let ll = LatLng::new(10.0, 10.0);
        assert!(Cell::from_lat_lng(ll, 0).is_err());
        assert!(Cell::from_lat_lng(ll, 31).is_err());
        assert!(Cell::from_lat_lng(LatLng::new(f64::NAN, 0.0), 10).is_err());
        assert!(Cell::from_lat_lng(LatLng::new(0.0, f64::INFINITY), 10).is_err());
        assert!(Cell::new(6, 1, 0, 0).is_err());
        assert!(Cell::new(0, 2, 4, 0).is_err());
        assert!(Cell::from_key("6/0").is_err());
        assert!(Cell::from_key("0/014").is_err());
        assert!(Cell::from_key("00").is_err());
        assert!(Cell::from_id(0).is_err());
        assert!(Cell::from_id(6u64 << 61 | 1).is_err());
        // terminator on an odd bit
        assert!(Cell::from_id(2).is_err());
        assert!(Cell::from_id_str("12x").is_err());
    }

    #[test]
    fn test_center_maps_back_to_cell() {
        let cell = Cell::from_lat_lng(LatLng::new(35.0, 139.0), 17).unwrap();
        assert_eq!(Cell::from_lat_lng(cell.center(), 17).unwrap(), cell);
    }

    #[test]
    fn test_parent_is_key_prefix() {
        let cell = Cell::from_lat_lng(LatLng::new(-33.86, 151.2), 30).unwrap();
        let chain = cell.ancestor_keys(30).unwrap();
        assert_eq!(chain.len(), 31);
        for (level, key) in chain.iter().enumerate() {
            assert_eq!(*key, cell.parent(level as u8).unwrap().key());
        }
        assert!(cell.parent(14).unwrap().contains(&cell));
        assert!(!cell.contains(&cell.parent(14).unwrap()));
    }

    #[test]
    fn test_children_cover_parent() {
        let cell = Cell::from_lat_lng(LatLng::new(48.85, 2.35), 12).unwrap();
        for child in cell.children().unwrap() {
            assert_eq!(child.parent(12).unwrap(), cell);
            assert!(child.key().starts_with(&cell.key()));
        }
    }

    #[test]
    fn test_neighbors_are_symmetric_inside_face() {
        let cell = Cell::from_lat_lng(LatLng::new(35.0, 139.0), 14).unwrap();
        for n in cell.neighbors() {
            assert_ne!(n, cell);
            assert!(n.neighbors().contains(&cell), "{n} does not list {cell}");
        }
    }

    #[test]
    fn test_neighbors_cross_face_edge() {
        // right edge of face 0 leads onto face 1
        let level = 5;
        let edge = Cell::new(0, level, (1 << level) - 1, 7).unwrap();
        let across = edge.neighbors()[2];
        assert_eq!(across.face, 1);
        assert_eq!(across.level, level);
        assert!(across.neighbors().contains(&edge));
    }

    #[test]
    fn test_matches_s2_crate() {
        for &(lat, lng) in &[(35.0, 139.0), (40.7128, -74.006), (-33.86, 151.2), (64.1, -21.9)] {
            let leaf = s2::cellid::CellID::from(&s2::latlng::LatLng::from_degrees(lat, lng));
            for level in [1u8, 10, 14, 17, 30] {
                let cell = Cell::from_lat_lng(LatLng::new(lat, lng), level).unwrap();
                assert_eq!(cell.to_s2().0, leaf.parent(u64::from(level)).0);
            }
        }
    }
}
