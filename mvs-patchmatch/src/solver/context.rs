use super::{CandidatePolicy, Hypothesis, RefineSchedule};
use crate::{Aggregator, CostMetric, Error, PatchMatchSettings, Result, Window};
use mvs_camera::nalgebra::{Point2, Vector3};
use mvs_camera::{Camera, DepthRange, DisparityConversion, Plane, StereoRig};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Everything the phases of one scale of one camera read, and nothing they write.
///
/// Backends receive it by shared reference, so the metric, rigs and ranges are free to
/// be read from any number of threads.
pub struct ScaleContext {
    id: u64,
    pub scale: usize,
    /// The reference camera at this scale.
    pub camera: Camera,
    pub width: usize,
    pub height: usize,
    /// One rig per neighbor, in the metric's neighbor order.
    pub rigs: Vec<StereoRig>,
    pub metric: Box<dyn CostMetric>,
    /// The matching window of the metric.
    pub window: Window,
    pub aggregator: Aggregator,
    pub depth_range: DepthRange,
    pub disparity: DisparityConversion,
    /// `(min, max)` disparity matching `depth_range`.
    pub disparity_range: (f64, f64),
    pub policy: CandidatePolicy,
    /// Half angle in radians of the cone initial normals are drawn from.
    pub init_cone: f64,
    /// Half angle in radians of the first refinement round.
    pub refine_angle: f64,
    /// Refinement stops once the disparity radius falls below this.
    pub refine_threshold: f64,
}

impl ScaleContext {
    /// Binds `metric` to the reference `camera` and its `neighbors`, all at `scale`.
    pub fn new(
        settings: &PatchMatchSettings,
        scale: usize,
        camera: Camera,
        neighbors: &[Camera],
        metric: Box<dyn CostMetric>,
        depth_range: DepthRange,
    ) -> Result<Self> {
        if metric.neighbors() != neighbors.len() {
            return Err(Error::InvalidSettings(format!(
                "metric holds {} neighbor images but {} neighbor cameras were given",
                metric.neighbors(),
                neighbors.len()
            )));
        }
        let disparity = camera.disparity();
        let disparity_range = disparity.disparity_range(&depth_range).ok_or_else(|| {
            Error::InvalidSettings(format!(
                "depth range [{}, {}] has no finite disparity range",
                depth_range.min, depth_range.max
            ))
        })?;
        let rigs = neighbors
            .iter()
            .map(|other| StereoRig::new(&camera, other))
            .collect();
        let aggregator = Aggregator::new(settings.aggregation_count, metric.max_cost());
        Ok(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            scale,
            width: camera.width() as usize,
            height: camera.height() as usize,
            camera,
            rigs,
            metric,
            window: Window::from_settings(settings),
            aggregator,
            depth_range,
            disparity,
            disparity_range,
            policy: CandidatePolicy::new(settings.candidates),
            init_cone: settings.init_normal_cone.to_radians(),
            refine_angle: settings.refine_normal_angle.to_radians(),
            refine_threshold: settings.refine_threshold,
        })
    }

    /// Distinguishes this context from every other one built in the process, so resources
    /// derived from it can be cached.
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn pixels(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn max_cost(&self) -> f64 {
        self.metric.max_cost()
    }

    /// Viewing ray of a pixel in the reference frame with a Z component of `1.0`.
    #[inline]
    pub fn ray(&self, row: usize, col: usize) -> Vector3<f64> {
        self.camera
            .local_ray(&Point2::new(col as f64, row as f64))
    }

    /// Cost of `plane` at `(row, col)` against a single neighbor.
    #[inline]
    pub fn neighbor_cost(&self, neighbor: usize, row: usize, col: usize, plane: &Plane) -> f64 {
        match self.rigs[neighbor].homography(plane) {
            Some(homography) => self.metric.cost(neighbor, row, col, &homography),
            None => self.max_cost(),
        }
    }

    /// Aggregated cost of `plane` at `(row, col)` over every neighbor.
    pub fn evaluate(&self, row: usize, col: usize, plane: &Plane) -> f64 {
        let mut costs = (0..self.rigs.len())
            .map(|neighbor| self.neighbor_cost(neighbor, row, col, plane))
            .collect::<Vec<f64>>();
        self.aggregator.aggregate(&mut costs)
    }

    /// Reads `plane` as a hypothesis for `(row, col)`.
    ///
    /// `None` when the pixel's ray misses the plane or meets it outside the depth range.
    pub fn hypothesis(&self, row: usize, col: usize, plane: &Plane) -> Option<Hypothesis> {
        let ray = self.ray(row, col);
        let depth = plane.depth_along(&ray)?;
        self.depth_range.contains(depth).then(|| Hypothesis {
            depth,
            plane: plane.facing(&ray),
        })
    }

    pub fn schedule(&self) -> RefineSchedule {
        let (min, max) = self.disparity_range;
        RefineSchedule {
            start_radius: (max - min) / 2.0,
            start_angle: self.refine_angle,
            threshold: self.refine_threshold,
        }
    }
}
