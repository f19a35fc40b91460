use crate::intrinsics::PARALLEL_TOLERANCE;
use crate::{Camera, Plane};
use nalgebra::{Matrix3, Point2, Rotation3, Vector3};

/// The pose of a neighbor camera relative to a reference camera.
///
/// A point `X` in the reference frame is `R·X + t` in the neighbor frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoRig {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    reference_inverse_intrinsics: Matrix3<f64>,
    other_intrinsics: Matrix3<f64>,
}

impl StereoRig {
    pub fn new(reference: &Camera, other: &Camera) -> Self {
        let rotation = other.rotation() * reference.rotation().inverse();
        let translation = other.translation() - rotation * reference.translation();
        Self {
            rotation,
            translation,
            reference_inverse_intrinsics: *reference.inverse_intrinsics(),
            other_intrinsics: other.intrinsics().matrix(),
        }
    }

    /// The homography induced by `plane` (in the reference frame) which maps reference
    /// pixels to neighbor pixels: `K_o·(R − t·nᵀ/d)·K_r⁻¹`.
    ///
    /// Returns `None` for planes through the reference optical center, which induce no
    /// homography.
    pub fn homography(&self, plane: &Plane) -> Option<Matrix3<f64>> {
        if plane.offset.abs() < 1e-12 {
            return None;
        }
        let induced =
            self.rotation.matrix() - self.translation * plane.normal.transpose() / plane.offset;
        let homography = self.other_intrinsics * induced * self.reference_inverse_intrinsics;
        homography
            .iter()
            .all(|v| v.is_finite())
            .then(|| homography)
    }

    /// `(K_o·R·K_r⁻¹, K_o·t)`. The homography of a plane `(n, d)` is
    /// `K_o·R·K_r⁻¹ − K_o·t·(nᵀ·K_r⁻¹)/d`, so a device only needs these two terms and
    /// `K_r⁻¹` to build it for any plane.
    pub fn homography_terms(&self) -> (Matrix3<f64>, Vector3<f64>) {
        (
            self.other_intrinsics * self.rotation.matrix() * self.reference_inverse_intrinsics,
            self.other_intrinsics * self.translation,
        )
    }
}

/// Applies a homography to a pixel.
///
/// Returns `None` when the homogeneous coordinate vanishes relative to the others.
#[inline]
pub fn warp(homography: &Matrix3<f64>, pixel: &Point2<f64>) -> Option<Point2<f64>> {
    let mapped = homography * pixel.to_homogeneous();
    if mapped.z.abs() <= PARALLEL_TOLERANCE * mapped.norm() {
        return None;
    }
    let (x, y) = (mapped.x / mapped.z, mapped.y / mapped.z);
    (x.is_finite() && y.is_finite()).then(|| Point2::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CameraIntrinsics;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Unit, Vector2};

    fn camera(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Camera {
        Camera::new(
            CameraIntrinsics::identity()
                .focals(Vector2::new(400.0, 400.0))
                .principal_point(Point2::new(200.0, 150.0)),
            rotation,
            translation,
            400,
            300,
        )
        .unwrap()
    }

    #[test]
    fn relative_pose_maps_reference_frame() {
        let reference = camera(
            Rotation3::from_euler_angles(0.02, 0.1, -0.03),
            Vector3::new(0.1, 0.0, 0.2),
        );
        let other = camera(
            Rotation3::from_euler_angles(-0.05, -0.1, 0.0),
            Vector3::new(-0.4, 0.1, 0.1),
        );
        let rig = StereoRig::new(&reference, &other);
        let world = Point3::new(0.3, -0.2, 4.0);
        let local = reference.to_local(&world);
        assert_relative_eq!(
            rig.rotation * local + rig.translation,
            other.to_local(&world),
            epsilon = 1e-10
        );
    }

    #[test]
    fn homography_terms_rebuild_homography() {
        let reference = camera(Rotation3::from_euler_angles(0.0, 0.05, 0.0), Vector3::zeros());
        let other = camera(Rotation3::identity(), Vector3::new(-0.3, 0.05, 0.0));
        let rig = StereoRig::new(&reference, &other);
        let plane = Plane::new(Unit::new_normalize(Vector3::new(0.1, -0.2, -1.0)), 4.0);
        let (rotation, translation) = rig.homography_terms();
        let row = plane.normal.transpose() * reference.inverse_intrinsics();
        let rebuilt = rotation - translation * row / plane.offset;
        assert_relative_eq!(rebuilt, rig.homography(&plane).unwrap(), max_relative = 1e-9);
    }

    #[test]
    fn degenerate_plane_has_no_homography() {
        let reference = camera(Rotation3::identity(), Vector3::zeros());
        let other = camera(Rotation3::identity(), Vector3::new(-0.3, 0.0, 0.0));
        let rig = StereoRig::new(&reference, &other);
        let plane = Plane::new(Unit::new_normalize(Vector3::new(0.0, 0.0, -1.0)), 0.0);
        assert_eq!(rig.homography(&plane), None);
    }

    #[test]
    fn warp_at_infinity() {
        let h = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, -2.0);
        assert_eq!(warp(&h, &Point2::new(2.0, 5.0)), None);
        assert_eq!(
            warp(&Matrix3::identity(), &Point2::new(2.0, 5.0)),
            Some(Point2::new(2.0, 5.0))
        );
    }

    #[test]
    fn warp_tolerance_scales_with_homography() {
        // Rounding leaves a tiny homogeneous coordinate for a point on the horizon.
        let h = Matrix3::new(3.0, 0.0, 0.0, 0.0, 3.0, 0.0, 1.0, 0.0, -2.0 + 4e-16);
        assert_eq!(warp(&h, &Point2::new(2.0, 5.0)), None);
        // A homography is only defined up to scale.
        let small = Matrix3::new(1.0, 0.2, 3.0, -0.1, 1.0, 2.0, 0.001, 0.0, 1.0);
        let pixel = Point2::new(40.0, 30.0);
        let expected = warp(&small, &pixel).unwrap();
        assert_relative_eq!(warp(&(small * 1e-14), &pixel).unwrap(), expected, epsilon = 1e-9);
    }
}
