use crate::{CameraIntrinsics, CameraRecord, Error, Result};
use nalgebra::{Matrix3, Matrix3x4, Point2, Point3, Rotation3, Unit, Vector3};
use serde::{Deserialize, Serialize};

/// The depth a camera uses when it has not observed any sparse points.
pub const DEFAULT_DEPTH_RANGE: DepthRange = DepthRange {
    min: 0.01,
    max: 1000.0,
};

/// The interval of scene depths a camera searches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthRange {
    pub min: f64,
    pub max: f64,
}

impl DepthRange {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if min.is_finite() && max.is_finite() && min > 0.0 && min <= max {
            Ok(Self { min, max })
        } else {
            Err(Error::InvalidDepthRange { min, max })
        }
    }

    /// Widens the range by `margin` relative to each bound, keeping the minimum positive.
    pub fn expanded(self, margin: f64) -> Self {
        let min = self.min * (1.0 - margin);
        Self {
            min: if min > 0.0 { min } else { self.min },
            max: self.max * (1.0 + margin),
        }
    }

    pub fn contains(&self, depth: f64) -> bool {
        depth >= self.min && depth <= self.max
    }

    pub fn clamp(&self, depth: f64) -> f64 {
        depth.clamp(self.min, self.max)
    }
}

impl Default for DepthRange {
    fn default() -> Self {
        DEFAULT_DEPTH_RANGE
    }
}

/// Distances between the optical center of a camera and those of its neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl BaselineStats {
    pub fn from_distances(distances: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut stats = Self {
            mean: 0.0,
            min: f64::INFINITY,
            max: 0.0,
        };
        for distance in distances {
            count += 1;
            stats.mean += distance;
            stats.min = stats.min.min(distance);
            stats.max = stats.max.max(distance);
        }
        (count != 0).then(|| Self {
            mean: stats.mean / count as f64,
            ..stats
        })
    }
}

/// A calibrated and posed camera together with everything the stereo solver needs to
/// know about it before touching a pixel.
///
/// The projection matrix and the inverse of `K·R` are derived from the intrinsics and the
/// pose every time the pose or intrinsics change, so they never go stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CameraRecord", into = "CameraRecord")]
pub struct Camera {
    intrinsics: CameraIntrinsics,
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
    width: u32,
    height: u32,
    depth_range: DepthRange,
    neighbors: Vec<usize>,
    baseline: BaselineStats,
    image_path: Option<String>,
    observations: Vec<Point3<f64>>,
    inverse_intrinsics: Matrix3<f64>,
    center: Point3<f64>,
    projection: Matrix3x4<f64>,
    inverse_kr: Matrix3<f64>,
}

impl Camera {
    pub fn new(
        intrinsics: CameraIntrinsics,
        rotation: Rotation3<f64>,
        translation: Vector3<f64>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::EmptyImage { width, height });
        }
        let mut camera = Self {
            intrinsics,
            rotation,
            translation,
            width,
            height,
            depth_range: DEFAULT_DEPTH_RANGE,
            neighbors: vec![],
            baseline: BaselineStats::default(),
            image_path: None,
            observations: vec![],
            inverse_intrinsics: Matrix3::identity(),
            center: Point3::origin(),
            projection: Matrix3x4::zeros(),
            inverse_kr: Matrix3::identity(),
        };
        camera.derive()?;
        Ok(camera)
    }

    /// Recomputes `K⁻¹`, `C`, `P` and `(K·R)⁻¹` from the intrinsics and pose.
    fn derive(&mut self) -> Result<()> {
        if !self.intrinsics.is_valid() {
            return Err(Error::SingularIntrinsics);
        }
        let k = self.intrinsics.matrix();
        self.inverse_intrinsics = self.intrinsics.inverse_matrix();
        self.center = Point3::from(-(self.rotation.inverse() * self.translation));
        let mut rt = Matrix3x4::zeros();
        rt.fixed_columns_mut::<3>(0).copy_from(self.rotation.matrix());
        rt.set_column(3, &self.translation);
        self.projection = k * rt;
        self.inverse_kr = self.rotation.inverse().matrix() * self.inverse_intrinsics;
        Ok(())
    }

    pub fn with_depth_range(self, depth_range: DepthRange) -> Self {
        Self {
            depth_range,
            ..self
        }
    }

    pub fn with_image_path(self, image_path: impl Into<String>) -> Self {
        Self {
            image_path: Some(image_path.into()),
            ..self
        }
    }

    pub fn with_observations(self, observations: Vec<Point3<f64>>) -> Self {
        Self {
            observations,
            ..self
        }
    }

    pub fn set_neighbors(&mut self, neighbors: Vec<usize>, baseline: BaselineStats) {
        self.neighbors = neighbors;
        self.baseline = baseline;
    }

    pub fn set_depth_range(&mut self, depth_range: DepthRange) {
        self.depth_range = depth_range;
    }

    pub fn set_pose(&mut self, rotation: Rotation3<f64>, translation: Vector3<f64>) -> Result<()> {
        self.rotation = rotation;
        self.translation = translation;
        self.derive()
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    pub fn rotation(&self) -> &Rotation3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth_range(&self) -> DepthRange {
        self.depth_range
    }

    pub fn neighbors(&self) -> &[usize] {
        &self.neighbors
    }

    pub fn baseline(&self) -> BaselineStats {
        self.baseline
    }

    pub fn image_path(&self) -> Option<&str> {
        self.image_path.as_deref()
    }

    pub fn observations(&self) -> &[Point3<f64>] {
        &self.observations
    }

    pub fn center(&self) -> Point3<f64> {
        self.center
    }

    pub fn projection(&self) -> &Matrix3x4<f64> {
        &self.projection
    }

    pub fn inverse_intrinsics(&self) -> &Matrix3<f64> {
        &self.inverse_intrinsics
    }

    /// `(K·R)⁻¹`, which maps a homogeneous pixel onto a world-frame ray direction.
    pub fn inverse_kr(&self) -> &Matrix3<f64> {
        &self.inverse_kr
    }

    /// Mean of the two focal lengths, the focal length used for disparities.
    pub fn focal_length(&self) -> f64 {
        0.5 * (self.intrinsics.focals.x + self.intrinsics.focals.y)
    }

    /// Converts a world point into the camera frame.
    pub fn to_local(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation * point + self.translation
    }

    /// Converts a camera-frame point into the world frame.
    pub fn to_world(&self, point: &Point3<f64>) -> Point3<f64> {
        self.rotation.inverse() * (point - self.translation)
    }

    /// Signed depth of a world point along the optical axis.
    pub fn depth(&self, point: &Point3<f64>) -> f64 {
        self.to_local(point).z
    }

    /// Projects a world point into pixel coordinates.
    ///
    /// Returns `None` for points on the plane through the optical center parallel to the
    /// image, which have no projection.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        self.project_local(&self.to_local(point))
    }

    pub fn project_local(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        self.intrinsics.uncalibrate(&point.coords)
    }

    /// Camera-frame viewing direction through a pixel, with a Z component of `1.0`.
    pub fn local_ray(&self, pixel: &Point2<f64>) -> Vector3<f64> {
        self.inverse_intrinsics * pixel.to_homogeneous()
    }

    /// World-frame ray through a pixel as its origin (the optical center) and a unit
    /// direction.
    pub fn ray(&self, pixel: &Point2<f64>) -> (Point3<f64>, Unit<Vector3<f64>>) {
        let direction = self.inverse_kr * pixel.to_homogeneous();
        (self.center, Unit::new_normalize(direction))
    }

    /// Direction of the optical axis in the world frame.
    pub fn optical_axis(&self) -> Unit<Vector3<f64>> {
        Unit::new_normalize(self.rotation.inverse() * Vector3::z())
    }

    /// Camera-frame point seen at `pixel` with the given depth.
    pub fn unproject_local(&self, pixel: &Point2<f64>, depth: f64) -> Point3<f64> {
        Point3::from(self.local_ray(pixel) * depth)
    }

    /// World point seen at `pixel` with the given depth.
    pub fn unproject(&self, pixel: &Point2<f64>, depth: f64) -> Point3<f64> {
        self.to_world(&self.unproject_local(pixel, depth))
    }

    /// The camera as seen by the image downsampled `scale` times.
    pub fn scaled(&self, scale: usize) -> Self {
        let mut camera = Self {
            intrinsics: self.intrinsics.scaled(scale),
            width: (self.width >> scale).max(1),
            height: (self.height >> scale).max(1),
            ..self.clone()
        };
        // Scaling never leaves the intrinsics singular when they weren't before.
        if camera.derive().is_err() {
            return self.clone();
        }
        camera
    }

    pub fn record(&self) -> CameraRecord {
        CameraRecord {
            intrinsics: self.intrinsics.matrix(),
            inverse_intrinsics: self.inverse_intrinsics,
            rotation: *self.rotation.matrix(),
            translation: self.translation,
            center: self.center,
            projection: self.projection,
            inverse_kr: self.inverse_kr,
            image_path: self.image_path.clone(),
            width: self.width,
            height: self.height,
            observations: self.observations.clone(),
            min_depth: self.depth_range.min,
            max_depth: self.depth_range.max,
            baseline: self.baseline,
            neighbors: self.neighbors.clone(),
        }
    }
}

impl From<Camera> for CameraRecord {
    fn from(camera: Camera) -> Self {
        camera.record()
    }
}

impl TryFrom<CameraRecord> for Camera {
    type Error = Error;

    fn try_from(record: CameraRecord) -> Result<Self> {
        let camera = Camera::new(
            CameraIntrinsics::from_matrix(&record.intrinsics),
            Rotation3::from_matrix_unchecked(record.rotation),
            record.translation,
            record.width,
            record.height,
        )?;
        let depth_range = DepthRange::new(record.min_depth, record.max_depth)?;
        let mut camera = camera
            .with_depth_range(depth_range)
            .with_observations(record.observations);
        camera.image_path = record.image_path;
        camera.set_neighbors(record.neighbors, record.baseline);
        Ok(camera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    fn camera() -> Camera {
        Camera::new(
            CameraIntrinsics::identity()
                .focals(Vector2::new(600.0, 610.0))
                .principal_point(Point2::new(320.0, 240.0))
                .skew(0.5),
            Rotation3::from_euler_angles(0.1, -0.2, 0.05),
            Vector3::new(0.3, -0.1, 2.0),
            640,
            480,
        )
        .unwrap()
    }

    #[test]
    fn center_maps_to_local_origin() {
        let camera = camera();
        assert_relative_eq!(
            camera.to_local(&camera.center()),
            Point3::origin(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn projection_matrix_agrees_with_project() {
        let camera = camera();
        let point = Point3::new(0.4, 0.2, 3.0);
        let homogeneous = camera.projection() * point.to_homogeneous();
        let pixel = camera.project(&point).unwrap();
        assert_relative_eq!(homogeneous.x / homogeneous.z, pixel.x, epsilon = 1e-9);
        assert_relative_eq!(homogeneous.y / homogeneous.z, pixel.y, epsilon = 1e-9);
    }

    #[test]
    fn ray_passes_through_unprojected_point() {
        let camera = camera();
        let pixel = Point2::new(100.0, 50.0);
        let (origin, direction) = camera.ray(&pixel);
        let point = camera.unproject(&pixel, 7.0);
        let along = (point - origin).normalize();
        assert_relative_eq!(along, direction.into_inner(), epsilon = 1e-9);
    }

    #[test]
    fn point_on_camera_plane_has_no_projection() {
        let camera = camera();
        let point = camera.to_world(&Point3::new(1.0, 1.0, 0.0));
        assert_eq!(camera.project(&point), None);
    }

    #[test]
    fn invalid_depth_range() {
        assert!(DepthRange::new(2.0, 1.0).is_err());
        assert!(DepthRange::new(0.0, 1.0).is_err());
        assert!(DepthRange::new(1.0, f64::INFINITY).is_err());
        assert!(DepthRange::new(1.0, 1.0).is_ok());
    }

    #[test]
    fn expanded_range() {
        let range = DepthRange::new(2.0, 10.0).unwrap().expanded(0.2);
        assert_relative_eq!(range.min, 1.6, epsilon = 1e-12);
        assert_relative_eq!(range.max, 12.0, epsilon = 1e-12);
    }

    #[test]
    fn singular_intrinsics_rejected() {
        let result = Camera::new(
            CameraIntrinsics::identity().focal(0.0),
            Rotation3::identity(),
            Vector3::zeros(),
            10,
            10,
        );
        assert!(matches!(result, Err(Error::SingularIntrinsics)));
    }
}
