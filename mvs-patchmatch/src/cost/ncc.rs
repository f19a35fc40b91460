use super::{for_each_sample, CostMetric, MetricKind, Window};
use crate::ViewImage;
use mvs_camera::nalgebra::Matrix3;
use std::sync::Arc;

/// Below this, a window is considered textureless and cannot be correlated.
pub(crate) const MIN_VARIANCE: f64 = 1e-4;

/// Zero-mean normalized cross correlation, `1 - ncc`.
pub struct NccMetric {
    window: Window,
    reference: Arc<ViewImage>,
    neighbors: Vec<Arc<ViewImage>>,
}

impl NccMetric {
    pub const MAX_COST: f64 = 2.0;

    pub fn new(window: Window, reference: Arc<ViewImage>, neighbors: Vec<Arc<ViewImage>>) -> Self {
        Self {
            window,
            reference,
            neighbors,
        }
    }
}

impl CostMetric for NccMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::Ncc
    }

    fn max_cost(&self) -> f64 {
        Self::MAX_COST
    }

    fn neighbors(&self) -> usize {
        self.neighbors.len()
    }

    fn reference(&self) -> &ViewImage {
        &self.reference
    }

    fn neighbor_image(&self, neighbor: usize) -> &ViewImage {
        &self.neighbors[neighbor]
    }

    fn cost(&self, neighbor: usize, row: usize, col: usize, homography: &Matrix3<f64>) -> f64 {
        let other = &self.neighbors[neighbor];
        let (mut sum_a, mut sum_b, mut sum_aa, mut sum_bb, mut sum_ab) = (0.0, 0.0, 0.0, 0.0, 0.0);
        let mut count = 0usize;
        let inside = for_each_sample(
            &self.window,
            &self.reference,
            other,
            row,
            col,
            homography,
            |_, _, r, c, x, y| {
                let a = f64::from(self.reference.intensity_at(r, c));
                let b = f64::from(other.sample_intensity(x, y));
                sum_a += a;
                sum_b += b;
                sum_aa += a * a;
                sum_bb += b * b;
                sum_ab += a * b;
                count += 1;
            },
        );
        if !inside || count == 0 {
            return Self::MAX_COST;
        }
        let n = count as f64;
        let (mean_a, mean_b) = (sum_a / n, sum_b / n);
        let var_a = sum_aa / n - mean_a * mean_a;
        let var_b = sum_bb / n - mean_b * mean_b;
        let covariance = sum_ab / n - mean_a * mean_b;
        correlation_cost(covariance, var_a, var_b)
    }
}

/// `1 - clamp(ncc)`, or the maximum of 2 when either side is textureless.
#[inline]
pub(crate) fn correlation_cost(covariance: f64, var_a: f64, var_b: f64) -> f64 {
    if !(var_a > MIN_VARIANCE && var_b > MIN_VARIANCE) {
        return NccMetric::MAX_COST;
    }
    let ncc = covariance / (var_a * var_b).sqrt();
    if ncc.is_finite() {
        1.0 - ncc.clamp(-1.0, 1.0)
    } else {
        NccMetric::MAX_COST
    }
}
