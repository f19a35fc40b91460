use mvs_camera::nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector2, Vector3};
use mvs_camera::{Camera, CameraIntrinsics, DepthRange};
use mvs_patchmatch::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One calibrated view of a scene file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneCamera {
    /// Relative paths are resolved against the directory of the scene file.
    pub image: PathBuf,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
    /// World to camera rotation, row by row
    pub rotation: [[f64; 3]; 3],
    pub translation: [f64; 3],
    /// Sparse world points this camera sees, used to bound its depths
    #[serde(default)]
    pub observations: Vec<[f64; 3]>,
    /// Searched depths of a camera without observations
    #[serde(default)]
    pub depth_range: Option<[f64; 2]>,
}

impl SceneCamera {
    pub fn image_path(&self, scene_dir: &Path) -> PathBuf {
        scene_dir.join(&self.image)
    }

    /// Builds the camera for an image of the given size.
    pub fn camera(&self, scene_dir: &Path, width: u32, height: u32) -> Result<Camera> {
        let intrinsics = CameraIntrinsics::identity()
            .focals(Vector2::new(self.fx, self.fy))
            .principal_point(Point2::new(self.cx, self.cy))
            .skew(self.skew);
        let [r0, r1, r2] = self.rotation;
        #[rustfmt::skip]
        let rotation = Matrix3::new(
            r0[0], r0[1], r0[2],
            r1[0], r1[1], r1[2],
            r2[0], r2[1], r2[2],
        );
        let mut camera = Camera::new(
            intrinsics,
            Rotation3::from_matrix(&rotation),
            Vector3::from(self.translation),
            width,
            height,
        )?
        .with_image_path(self.image_path(scene_dir).to_string_lossy())
        .with_observations(self.observations.iter().copied().map(Point3::from).collect());
        if let Some([min, max]) = self.depth_range {
            camera.set_depth_range(DepthRange::new(min, max)?);
        }
        Ok(camera)
    }
}
