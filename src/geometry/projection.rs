//! Sphere-to-cube projection and the coordinate warps between its spaces.
//!
//! The chain is `lat/lng -> xyz (unit sphere) -> (face, u, v) -> (s, t) -> (i, j)`.
//! `u, v` lie in `[-1, 1]` on the face plane, `s, t` in `[0, 1]` after the
//! area-equalizing quadratic warp, and `i, j` are integer grid coordinates
//! at a given level.

use cellstore_types::latlng::LatLng;

pub type Xyz = [f64; 3];

/// Project a coordinate onto the unit sphere.
pub fn to_unit_vector(ll: LatLng) -> Xyz {
    let phi = ll.lat.to_radians();
    let theta = ll.lng.to_radians();
    let cos_phi = phi.cos();
    [theta.cos() * cos_phi, theta.sin() * cos_phi, phi.sin()]
}

/// Inverse of [`to_unit_vector`]; the vector need not be normalized.
pub fn lat_lng_from_xyz(xyz: Xyz) -> LatLng {
    let [x, y, z] = xyz;
    let lat = z.atan2((x * x + y * y).sqrt());
    let lng = y.atan2(x);
    LatLng::new(lat.to_degrees(), lng.to_degrees())
}

fn largest_abs_component(xyz: Xyz) -> usize {
    let abs = xyz.map(f64::abs);
    if abs[0] > abs[1] {
        if abs[0] > abs[2] { 0 } else { 2 }
    } else if abs[1] > abs[2] {
        1
    } else {
        2
    }
}

/// Select the cube face for a vector and project it onto that face.
pub fn face_uv(xyz: Xyz) -> (u8, f64, f64) {
    let mut face = largest_abs_component(xyz);
    if xyz[face] < 0.0 {
        face += 3;
    }
    // face is at most 5
    let face = face as u8;
    let (u, v) = uv_on_face(face, xyz);
    (face, u, v)
}

fn uv_on_face(face: u8, xyz: Xyz) -> (f64, f64) {
    let [x, y, z] = xyz;
    match face {
        0 => (y / x, z / x),
        1 => (-x / y, z / y),
        2 => (-x / z, -y / z),
        3 => (z / x, y / x),
        4 => (z / y, -x / y),
        _ => (-y / z, -x / z),
    }
}

/// Point on the face plane for `(face, u, v)`; exact inverse of [`face_uv`]
/// up to normalization.
pub fn xyz_from_face_uv(face: u8, u: f64, v: f64) -> Xyz {
    match face {
        0 => [1.0, u, v],
        1 => [-u, 1.0, v],
        2 => [-u, -v, 1.0],
        3 => [-1.0, -v, -u],
        4 => [v, -1.0, -u],
        _ => [v, u, -1.0],
    }
}

/// Quadratic warp from face-plane coordinates to cell-space coordinates.
pub fn st_from_uv(uv: f64) -> f64 {
    if uv >= 0.0 {
        0.5 * (1.0 + 3.0 * uv).sqrt()
    } else {
        1.0 - 0.5 * (1.0 - 3.0 * uv).sqrt()
    }
}

/// Exact inverse of [`st_from_uv`]. Values outside `[0, 1]` extrapolate
/// monotonically, which neighbor lookup relies on when leaving a face.
pub fn uv_from_st(st: f64) -> f64 {
    if st >= 0.5 {
        (1.0 / 3.0) * (4.0 * st * st - 1.0)
    } else {
        (1.0 / 3.0) * (1.0 - 4.0 * (1.0 - st) * (1.0 - st))
    }
}

/// Grid coordinate of `st` at `level`, clamped to the face.
pub fn ij_from_st(st: f64, level: u8) -> u32 {
    let size = f64::from(1u32 << level);
    let max = size - 1.0;
    let ij = (st * size).floor();
    if ij.is_nan() {
        return 0;
    }
    // clamped into [0, 2^level - 1] so the cast is lossless
    ij.clamp(0.0, max) as u32
}

/// Cell-space coordinate of grid position `ij` plus a fractional `offset`.
pub fn st_from_ij(ij: i64, offset: f64, level: u8) -> f64 {
    (ij as f64 + offset) / f64::from(1u32 << level)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_axis_vectors_pick_faces() {
        assert_eq!(face_uv([1.0, 0.0, 0.0]).0, 0);
        assert_eq!(face_uv([0.0, 1.0, 0.0]).0, 1);
        assert_eq!(face_uv([0.0, 0.0, 1.0]).0, 2);
        assert_eq!(face_uv([-1.0, 0.0, 0.0]).0, 3);
        assert_eq!(face_uv([0.0, -1.0, 0.0]).0, 4);
        assert_eq!(face_uv([0.0, 0.0, -1.0]).0, 5);
    }

    #[test]
    fn test_face_uv_inverse() {
        for face in 0..6u8 {
            for &(u, v) in &[(0.0, 0.0), (0.3, -0.7), (-0.99, 0.5), (0.8, 0.8)] {
                let xyz = xyz_from_face_uv(face, u, v);
                let (f, u2, v2) = face_uv(xyz);
                assert_eq!(f, face, "face mismatch for ({u}, {v})");
                assert!(approx(u, u2) && approx(v, v2), "uv mismatch on face {face}");
            }
        }
    }

    #[test]
    fn test_st_uv_inverse() {
        for k in -10..=10 {
            let uv = f64::from(k) / 10.0;
            assert!(approx(uv_from_st(st_from_uv(uv)), uv));
        }
        assert!(approx(st_from_uv(0.0), 0.5));
        assert!(approx(st_from_uv(1.0), 1.0));
        assert!(approx(st_from_uv(-1.0), 0.0));
    }

    #[test]
    fn test_ij_from_st_clamps() {
        assert_eq!(ij_from_st(0.0, 3), 0);
        assert_eq!(ij_from_st(0.99, 3), 7);
        assert_eq!(ij_from_st(1.0, 3), 7);
        assert_eq!(ij_from_st(-0.2, 3), 0);
        assert_eq!(ij_from_st(1.7, 3), 7);
        assert_eq!(ij_from_st(0.5, 1), 1);
    }

    #[test]
    fn test_lat_lng_round_trip() {
        let ll = LatLng::new(35.0, 139.0);
        let back = lat_lng_from_xyz(to_unit_vector(ll));
        assert!((back.lat - 35.0).abs() < 1e-9);
        assert!((back.lng - 139.0).abs() < 1e-9);
    }
}
