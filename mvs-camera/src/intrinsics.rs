use nalgebra::{Matrix3, Point2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// This contains intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// Images are assumed to be undistorted before they reach the stereo solver, so there is no
/// distortion term here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    /// This would imply that the pixel positions have an origin at `0,0`,
    /// the pixel distance unit is the focal length, pixels are square,
    /// and there is no skew.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    /// Extracts the intrinsics from an upper-triangular calibration matrix.
    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Self {
            focals: Vector2::new(k[(0, 0)], k[(1, 1)]),
            principal_point: Point2::new(k[(0, 2)], k[(1, 2)]),
            skew: k[(0, 1)],
        }
    }

    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    /// The intrinsics can only be inverted with strictly positive, finite focal lengths.
    pub fn is_valid(&self) -> bool {
        self.focals.iter().all(|f| f.is_finite() && *f > 0.0)
            && self.principal_point.iter().all(|c| c.is_finite())
            && self.skew.is_finite()
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// Closed form inverse of [`CameraIntrinsics::matrix`].
    #[rustfmt::skip]
    pub fn inverse_matrix(&self) -> Matrix3<f64> {
        let (fx, fy) = (self.focals.x, self.focals.y);
        let (cx, cy) = (self.principal_point.x, self.principal_point.y);
        let s = self.skew;
        Matrix3::new(
            1.0 / fx,   -s / (fx * fy), (s * cy - cx * fy) / (fx * fy),
            0.0,        1.0 / fy,       -cy / fy,
            0.0,        0.0,            1.0,
        )
    }

    /// Takes in a point from an image in pixel coordinates and converts it to a viewing
    /// ray whose Z component is `1.0`.
    ///
    /// ```
    /// use mvs_camera::CameraIntrinsics;
    /// use mvs_camera::nalgebra::{Vector2, Point2};
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let pixel = Point2::new(471.0, 322.0);
    /// let ray = intrinsics.calibrate(&pixel);
    /// let distance = (pixel.to_homogeneous() - intrinsics.matrix() * ray).norm();
    /// assert!(distance < 1e-9);
    /// ```
    pub fn calibrate(&self, pixel: &Point2<f64>) -> Vector3<f64> {
        let centered = pixel - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        Vector3::new(x, y, 1.0)
    }

    /// Converts a ray in the camera frame back into pixel coordinates.
    ///
    /// Returns `None` when the ray is parallel to the image plane, up to a tolerance
    /// relative to the length of the ray.
    ///
    /// ```
    /// use mvs_camera::CameraIntrinsics;
    /// use mvs_camera::nalgebra::{Vector2, Point2};
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let pixel = Point2::new(471.0, 322.0);
    /// let back = intrinsics.uncalibrate(&(intrinsics.calibrate(&pixel) * 3.0)).unwrap();
    /// assert!((pixel - back).norm() < 1e-9);
    /// ```
    pub fn uncalibrate(&self, ray: &Vector3<f64>) -> Option<Point2<f64>> {
        if ray.z.abs() <= PARALLEL_TOLERANCE * ray.norm() {
            return None;
        }
        let (x, y) = (ray.x / ray.z, ray.y / ray.z);
        let pixel = Point2::new(
            x * self.focals.x + self.skew * y + self.principal_point.x,
            y * self.focals.y + self.principal_point.y,
        );
        pixel.iter().all(|c| c.is_finite()).then(|| pixel)
    }

    /// Intrinsics of the image downsampled `scale` times by averaging 2x2 blocks.
    ///
    /// Focal lengths and skew are divided by `2^scale`. The principal point is moved so
    /// that pixel centers keep lining up: the center of pixel `i` at the coarser level is
    /// the center of the block `2i, 2i + 1` at the finer level.
    pub fn scaled(&self, scale: usize) -> Self {
        let factor = (1u64 << scale) as f64;
        Self {
            focals: self.focals / factor,
            principal_point: self.principal_point.map(|c| (c + 0.5) / factor - 0.5),
            skew: self.skew / factor,
        }
    }
}

/// Relative size of a homogeneous coordinate below which it is treated as zero.
pub(crate) const PARALLEL_TOLERANCE: f64 = 1e-12;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::identity()
            .focals(Vector2::new(520.0, 515.0))
            .principal_point(Point2::new(319.5, 239.5))
            .skew(0.3)
    }

    #[test]
    fn inverse_matrix_matches_nalgebra() {
        let k = intrinsics();
        let inverse = k.matrix().try_inverse().unwrap();
        assert_relative_eq!(k.inverse_matrix(), inverse, epsilon = 1e-12);
    }

    #[test]
    fn scaled_principal_point_tracks_pixel_centers() {
        let k = intrinsics().skew(0.0);
        let coarse = k.scaled(1);
        // Pixel centers 2 and 3 average into the coarse pixel 1.
        let fine = k.calibrate(&Point2::new(2.5, 2.5));
        let half = coarse.calibrate(&Point2::new(1.0, 1.0));
        assert_relative_eq!(fine, half, epsilon = 1e-12);
        assert_relative_eq!(coarse.focals, k.focals / 2.0);
    }

    #[test]
    fn rays_along_the_image_plane_do_not_uncalibrate() {
        let k = intrinsics();
        assert_eq!(k.uncalibrate(&Vector3::new(1.0, 1.0, -4.44e-16)), None);
        assert_eq!(k.uncalibrate(&Vector3::zeros()), None);
        // A short ray is still a valid direction.
        let pixel = k.uncalibrate(&(k.calibrate(&Point2::new(10.0, 20.0)) * 1e-14)).unwrap();
        assert_relative_eq!(pixel, Point2::new(10.0, 20.0), epsilon = 1e-6);
    }
}
