use nalgebra::{Point3, Unit, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// A plane `n·X + d = 0` in the frame of the camera it was hypothesized for.
///
/// A plane hypothesis always faces its camera: for any viewing ray `r` through the pixel
/// it belongs to, `n·r <= 0`. [`Plane::facing`] enforces that by flipping the sign of both
/// the normal and the offset, which describes the same set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Plane {
    pub normal: Unit<Vector3<f64>>,
    pub offset: f64,
}

impl Plane {
    pub fn new(normal: Unit<Vector3<f64>>, offset: f64) -> Self {
        Self { normal, offset }
    }

    /// A plane through `point` with the given normal.
    pub fn through(normal: Unit<Vector3<f64>>, point: &Point3<f64>) -> Self {
        Self {
            normal,
            offset: -normal.dot(&point.coords),
        }
    }

    /// The plane with normal `normal` crossing the viewing ray `ray` at the given depth.
    ///
    /// The ray is a camera-frame direction with a Z component of `1.0`, so the point on
    /// the plane is `depth * ray`.
    pub fn from_depth(normal: Unit<Vector3<f64>>, ray: &Vector3<f64>, depth: f64) -> Self {
        Self::through(normal, &Point3::from(ray * depth))
    }

    /// A plane parallel to the image plane at the given depth.
    pub fn fronto_parallel(depth: f64) -> Self {
        Self {
            normal: -Vector3::z_axis(),
            offset: depth,
        }
    }

    /// Returns the same plane with its normal pointing against `ray`.
    pub fn facing(self, ray: &Vector3<f64>) -> Self {
        if self.normal.dot(ray) > 0.0 {
            Self {
                normal: -self.normal,
                offset: -self.offset,
            }
        } else {
            self
        }
    }

    pub fn faces(&self, ray: &Vector3<f64>) -> bool {
        self.normal.dot(ray) <= 0.0
    }

    /// Depth at which the viewing ray `ray` (Z component `1.0`) intersects the plane.
    ///
    /// Returns `None` when the ray is parallel to the plane or the result is not finite.
    pub fn depth_along(&self, ray: &Vector3<f64>) -> Option<f64> {
        let denominator = self.normal.dot(ray);
        if denominator.abs() < 1e-12 {
            return None;
        }
        let depth = -self.offset / denominator;
        depth.is_finite().then(|| depth)
    }

    /// Signed distance of a point from the plane.
    pub fn distance(&self, point: &Point3<f64>) -> f64 {
        self.normal.dot(&point.coords) + self.offset
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.normal.x, self.normal.y, self.normal.z, self.offset]
    }

    pub fn to_homogeneous(&self) -> Vector4<f64> {
        self.normal.to_homogeneous() + Vector4::w() * self.offset
    }
}

/// Normals within this distance of unit length are kept bit for bit.
const UNIT_TOLERANCE: f64 = 1e-9;

impl From<[f64; 4]> for Plane {
    fn from([x, y, z, offset]: [f64; 4]) -> Self {
        let normal = Vector3::new(x, y, z);
        let normal = if (normal.norm() - 1.0).abs() <= UNIT_TOLERANCE {
            Unit::new_unchecked(normal)
        } else {
            Unit::new_normalize(normal)
        };
        Self { normal, offset }
    }
}

impl From<Plane> for [f64; 4] {
    fn from(plane: Plane) -> Self {
        plane.to_array()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg64;

    #[test]
    fn facing_keeps_the_plane() {
        let ray = Vector3::new(0.1, -0.2, 1.0);
        let plane = Plane::from_depth(Unit::new_normalize(Vector3::new(0.3, 0.1, 1.0)), &ray, 4.0);
        assert!(!plane.faces(&ray));
        let flipped = plane.facing(&ray);
        assert!(flipped.faces(&ray));
        assert_relative_eq!(
            plane.depth_along(&ray).unwrap(),
            flipped.depth_along(&ray).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn depth_along_parallel_ray() {
        let plane = Plane::new(Vector3::x_axis(), -1.0);
        assert_eq!(plane.depth_along(&Vector3::new(0.0, 0.3, 1.0)), None);
    }

    #[test]
    fn fronto_parallel_depth() {
        let plane = Plane::fronto_parallel(5.0);
        assert_relative_eq!(plane.depth_along(&Vector3::new(0.4, -0.7, 1.0)).unwrap(), 5.0);
    }

    #[test]
    fn serialized_planes_reload_exactly() {
        let mut rng = Pcg64::seed_from_u64(11);
        for _ in 0..1000 {
            let normal = Unit::new_normalize(Vector3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            ));
            let plane = Plane::new(normal, rng.gen_range(-20.0..20.0));
            let bytes = bincode::serialize(&plane).unwrap();
            let loaded: Plane = bincode::deserialize(&bytes).unwrap();
            assert_eq!(loaded, plane);
        }
    }

    #[test]
    fn scaled_normals_are_normalized_on_load() {
        let plane = Plane::from([0.0, 0.0, -2.0, 3.0]);
        assert_eq!(plane.normal, -Vector3::z_axis());
        assert_eq!(plane.offset, 3.0);
    }
}
