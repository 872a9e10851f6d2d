use crate::latlng::LatLng;
use geo::Rect;
use serde::{Deserialize, Serialize};

/// A closed latitude/longitude rectangle.
///
/// This is a wrapper around `geo::Rect` (x = longitude, y = latitude).
/// Containment and intersection include the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// The underlying geometric rectangle
    pub rect: Rect,
}

impl Region {
    /// Create a region from two opposite corners given in any order.
    ///
    /// # Examples
    ///
    /// ```
    /// use cellstore_types::latlng::LatLng;
    /// use cellstore_types::region::Region;
    ///
    /// let region = Region::from_corners(LatLng::new(1.0, 2.0), LatLng::new(-1.0, -2.0));
    /// assert_eq!(region.south(), -1.0);
    /// assert_eq!(region.east(), 2.0);
    /// ```
    pub fn from_corners(a: LatLng, b: LatLng) -> Self {
        Self {
            rect: Rect::new(
                geo::coord! { x: a.lng, y: a.lat },
                geo::coord! { x: b.lng, y: b.lat },
            ),
        }
    }

    /// Create a region from its south, west, north and east edges.
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self::from_corners(LatLng::new(south, west), LatLng::new(north, east))
    }

    /// Smallest region containing every given coordinate.
    pub fn bounding<'a>(points: impl IntoIterator<Item = &'a LatLng>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut region = Self::from_corners(first, first);
        for ll in iter {
            region = Self::new(
                region.south().min(ll.lat),
                region.west().min(ll.lng),
                region.north().max(ll.lat),
                region.east().max(ll.lng),
            );
        }
        Some(region)
    }

    pub fn south(&self) -> f64 {
        self.rect.min().y
    }

    pub fn west(&self) -> f64 {
        self.rect.min().x
    }

    pub fn north(&self) -> f64 {
        self.rect.max().y
    }

    pub fn east(&self) -> f64 {
        self.rect.max().x
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south() + self.north()) / 2.0,
            (self.west() + self.east()) / 2.0,
        )
    }

    /// All four edges are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.south().is_finite()
            && self.west().is_finite()
            && self.north().is_finite()
            && self.east().is_finite()
    }

    /// Check whether a coordinate lies inside the region (boundary included).
    pub fn contains(&self, ll: &LatLng) -> bool {
        ll.lat >= self.south()
            && ll.lat <= self.north()
            && ll.lng >= self.west()
            && ll.lng <= self.east()
    }

    /// Check whether two regions overlap (touching edges count).
    pub fn intersects(&self, other: &Region) -> bool {
        !(self.north() < other.south()
            || self.south() > other.north()
            || self.east() < other.west()
            || self.west() > other.east())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corners_are_normalized() {
        let region = Region::from_corners(LatLng::new(10.0, 20.0), LatLng::new(0.0, 5.0));
        assert_eq!(region.south(), 0.0);
        assert_eq!(region.west(), 5.0);
        assert_eq!(region.north(), 10.0);
        assert_eq!(region.east(), 20.0);
        assert_eq!(region.center(), LatLng::new(5.0, 12.5));
    }

    #[test]
    fn test_contains_includes_boundary() {
        let region = Region::new(0.0, 0.0, 1.0, 1.0);
        assert!(region.contains(&LatLng::new(0.0, 0.0)));
        assert!(region.contains(&LatLng::new(1.0, 0.5)));
        assert!(!region.contains(&LatLng::new(1.0001, 0.5)));
    }

    #[test]
    fn test_intersects() {
        let a = Region::new(0.0, 0.0, 1.0, 1.0);
        let touching = Region::new(1.0, 1.0, 2.0, 2.0);
        let apart = Region::new(1.5, 1.5, 2.0, 2.0);
        assert!(a.intersects(&touching));
        assert!(!a.intersects(&apart));
        assert!(apart.intersects(&touching));
    }

    #[test]
    fn test_bounding() {
        let points = [
            LatLng::new(1.0, 3.0),
            LatLng::new(-2.0, 4.0),
            LatLng::new(0.5, -1.0),
        ];
        let region = Region::bounding(&points).unwrap();
        assert_eq!(region, Region::new(-2.0, -1.0, 1.0, 4.0));
        assert!(Region::bounding(&[]).is_none());
    }
}
