use crate::{BaselineStats, Camera, DepthRange, Error, Result, DEFAULT_DEPTH_RANGE};
use float_ord::FloatOrd;
use log::*;
use nalgebra::{Point2, Point3};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Which neighbors a reference camera is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewSelection {
    /// Pairs seeing the central scene point under a smaller angle are near duplicates.
    #[serde(default = "default_min_angle")]
    pub min_angle: f64,
    /// Pairs seeing the central scene point under a larger angle are too oblique to match.
    #[serde(default = "default_max_angle")]
    pub max_angle: f64,
    /// When more views qualify, a random subset of this size is kept.
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,
}

impl Default for ViewSelection {
    fn default() -> Self {
        Self {
            min_angle: default_min_angle(),
            max_angle: default_max_angle(),
            max_neighbors: default_max_neighbors(),
        }
    }
}

fn default_min_angle() -> f64 {
    1.0
}

fn default_max_angle() -> f64 {
    60.0
}

fn default_max_neighbors() -> usize {
    8
}

impl ViewSelection {
    pub fn min_angle(self, min_angle: f64) -> Self {
        Self { min_angle, ..self }
    }

    pub fn max_angle(self, max_angle: f64) -> Self {
        Self { max_angle, ..self }
    }

    pub fn max_neighbors(self, max_neighbors: usize) -> Self {
        Self {
            max_neighbors,
            ..self
        }
    }

    pub fn accepts(&self, angle: f64) -> bool {
        angle >= self.min_angle && angle <= self.max_angle
    }
}

/// Depth of the point at the center of what `camera` sees.
///
/// This is the median depth of the sparse points it observes, or the geometric mean of
/// its depth range when it observes nothing.
pub fn central_depth(camera: &Camera) -> f64 {
    let mut depths = visible_depths(camera).collect::<Vec<f64>>();
    if depths.is_empty() {
        let range = camera.depth_range();
        return (range.min * range.max).sqrt();
    }
    depths.sort_unstable_by_key(|&d| FloatOrd(d));
    depths[depths.len() / 2]
}

/// Angle in degrees between the central viewing ray of `reference` and the ray from
/// `other` towards the same scene point at `depth` along that central ray.
///
/// Two cameras at the same place see every point under an angle of zero.
pub fn viewing_angle(reference: &Camera, other: &Camera, depth: f64) -> f64 {
    let principal_point = reference.intrinsics().principal_point;
    let target = reference.unproject(&principal_point, depth);
    let from_reference = target - reference.center();
    let from_other = target - other.center();
    from_reference.angle(&from_other).to_degrees()
}

fn visible_depths(camera: &Camera) -> impl Iterator<Item = f64> + '_ {
    let (width, height) = (camera.width() as f64, camera.height() as f64);
    camera.observations().iter().filter_map(move |point| {
        let depth = camera.depth(point);
        if !(depth > 0.0) {
            return None;
        }
        let pixel: Point2<f64> = camera.project(point)?;
        let inside = pixel.x >= -0.5
            && pixel.y >= -0.5
            && pixel.x < width - 0.5
            && pixel.y < height - 0.5;
        inside.then(|| depth)
    })
}

/// The depth range spanned by the sparse points `camera` observes, or the wide default
/// range when it observes none with a positive depth.
pub fn depth_bounds(camera: &Camera) -> DepthRange {
    let (min, max) = visible_depths(camera).fold((f64::INFINITY, 0.0f64), |(min, max), d| {
        (min.min(d), max.max(d))
    });
    DepthRange::new(min, max).unwrap_or(DEFAULT_DEPTH_RANGE)
}

/// Selects the neighbors of camera `index` among `cameras`.
///
/// The result is sorted by camera index.
pub fn select_neighbors(
    cameras: &[Camera],
    index: usize,
    selection: &ViewSelection,
    rng: &mut impl Rng,
) -> Vec<usize> {
    let reference = &cameras[index];
    let depth = central_depth(reference);
    let candidates = cameras
        .iter()
        .enumerate()
        .filter(|&(other, camera)| {
            other != index && selection.accepts(viewing_angle(reference, camera, depth))
        })
        .map(|(other, _)| other)
        .collect::<Vec<usize>>();
    if candidates.len() <= selection.max_neighbors {
        return candidates;
    }
    let mut chosen = rand::seq::index::sample(rng, candidates.len(), selection.max_neighbors)
        .into_iter()
        .map(|i| candidates[i])
        .collect::<Vec<usize>>();
    chosen.sort_unstable();
    chosen
}

/// Baseline statistics between camera `index` and the given neighbors.
pub fn baseline_stats(
    cameras: &[Camera],
    index: usize,
    neighbors: &[usize],
) -> Option<BaselineStats> {
    let center: Point3<f64> = cameras[index].center();
    BaselineStats::from_distances(
        neighbors
            .iter()
            .map(|&other| (cameras[other].center() - center).norm()),
    )
}

/// Computes the depth bounds, neighbors and baselines of every camera of a scene.
///
/// This must happen once before any camera is solved.
pub fn configure_views(
    cameras: &mut [Camera],
    selection: &ViewSelection,
    rng: &mut impl Rng,
) -> Result<()> {
    // Cameras without sparse points keep whatever range they were given.
    for camera in cameras.iter_mut().filter(|c| !c.observations().is_empty()) {
        let depth_range = depth_bounds(camera);
        camera.set_depth_range(depth_range);
    }
    for index in 0..cameras.len() {
        let neighbors = select_neighbors(cameras, index, selection, rng);
        let baseline = baseline_stats(cameras, index, &neighbors).unwrap_or_default();
        info!(
            "camera {} depth range [{:.3}, {:.3}] with {} neighbors (mean baseline {:.3})",
            index,
            cameras[index].depth_range().min,
            cameras[index].depth_range().max,
            neighbors.len(),
            baseline.mean
        );
        cameras[index].set_neighbors(neighbors, baseline);
    }
    validate_neighbors(cameras)
}

/// Checks that every neighbor a camera lists exists.
pub fn validate_neighbors(cameras: &[Camera]) -> Result<()> {
    for (camera, view) in cameras.iter().enumerate() {
        if let Some(&neighbor) = view
            .neighbors()
            .iter()
            .find(|&&neighbor| neighbor >= cameras.len() || neighbor == camera)
        {
            return Err(Error::UnknownNeighbor { camera, neighbor });
        }
    }
    Ok(())
}
