use serde::{Deserialize, Serialize};

/// A geographic coordinate in degrees.
///
/// # Examples
///
/// ```
/// use cellstore_types::latlng::LatLng;
///
/// let ll = LatLng::new(35.0, 139.0);
/// assert!(ll.is_finite());
/// assert_eq!(ll.to_point().x(), 139.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both components are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Convert into a `geo::Point` (x = longitude, y = latitude).
    pub fn to_point(self) -> geo::Point<f64> {
        geo::Point::new(self.lng, self.lat)
    }

    /// Bit-exact identity of the coordinate, usable as a map key.
    pub fn identity(&self) -> (u64, u64) {
        (self.lat.to_bits(), self.lng.to_bits())
    }
}

impl From<geo::Point<f64>> for LatLng {
    fn from(point: geo::Point<f64>) -> Self {
        Self::new(point.y(), point.x())
    }
}

impl From<geo::Coord<f64>> for LatLng {
    fn from(coord: geo::Coord<f64>) -> Self {
        Self::new(coord.y, coord.x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_conversion() {
        let ll = LatLng::new(35.0, 139.0);
        let point = ll.to_point();
        assert_eq!(point.y(), 35.0);
        assert_eq!(LatLng::from(point), ll);
    }

    #[test]
    fn test_non_finite() {
        assert!(!LatLng::new(f64::NAN, 0.0).is_finite());
        assert!(!LatLng::new(0.0, f64::INFINITY).is_finite());
    }

    #[test]
    fn test_identity_distinguishes_signed_zero() {
        assert_ne!(
            LatLng::new(0.0, 0.0).identity(),
            LatLng::new(-0.0, 0.0).identity()
        );
    }
}
