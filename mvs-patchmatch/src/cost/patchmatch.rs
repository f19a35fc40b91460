use super::{for_each_sample, CostMetric, MetricKind, Window};
use crate::{PatchMatchSettings, ViewImage};
use mvs_camera::nalgebra::Matrix3;
use std::sync::Arc;

/// Parameters of the truncated intensity and gradient difference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchMatchParams {
    pub alpha: f64,
    pub tau_intensity: f64,
    pub tau_gradient: f64,
    pub gamma: f64,
}

impl PatchMatchParams {
    pub fn from_settings(settings: &PatchMatchSettings) -> Self {
        Self {
            alpha: settings.alpha,
            tau_intensity: settings.tau_intensity,
            tau_gradient: settings.tau_gradient,
            gamma: settings.gamma,
        }
    }
}

/// Adaptive support weighted sum of truncated intensity and gradient differences, as in
/// the original PatchMatch stereo formulation.
///
/// Each sample is weighted by `exp(-|I(p) - I(center)| / gamma)` in the reference.
pub struct PatchMatchMetric {
    window: Window,
    params: PatchMatchParams,
    max_cost: f64,
    /// Support weights indexed by integer intensity difference.
    weights: [f64; 256],
    reference: Arc<ViewImage>,
    neighbors: Vec<Arc<ViewImage>>,
}

impl PatchMatchMetric {
    pub fn new(
        window: Window,
        params: PatchMatchParams,
        reference: Arc<ViewImage>,
        neighbors: Vec<Arc<ViewImage>>,
    ) -> Self {
        let mut weights = [0.0; 256];
        for (difference, weight) in weights.iter_mut().enumerate() {
            *weight = (-(difference as f64) / params.gamma).exp();
        }
        let max_cost = window.samples() as f64
            * ((1.0 - params.alpha) * params.tau_intensity + params.alpha * params.tau_gradient);
        Self {
            window,
            params,
            max_cost,
            weights,
            reference,
            neighbors,
        }
    }
}

impl CostMetric for PatchMatchMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::PatchMatch
    }

    fn max_cost(&self) -> f64 {
        self.max_cost
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
        let reference = &self.reference;
        let center = reference.intensity_at(row, col);
        let PatchMatchParams {
            alpha,
            tau_intensity,
            tau_gradient,
            ..
        } = self.params;
        let mut total = 0.0f64;
        let inside = for_each_sample(
            &self.window,
            reference,
            other,
            row,
            col,
            homography,
            |_, _, r, c, x, y| {
                let a = reference.intensity_at(r, c);
                let weight = self.weights[((a - center).abs().round() as usize).min(255)];
                let intensity = f64::from((a - other.sample_intensity(x, y)).abs());
                let [gax, gay] = reference.sample_gradient(c as f64, r as f64);
                let [gbx, gby] = other.sample_gradient(x, y);
                let gradient = f64::from((gax - gbx).abs() + (gay - gby).abs());
                total += weight
                    * ((1.0 - alpha) * intensity.min(tau_intensity)
                        + alpha * gradient.min(tau_gradient));
            },
        );
        if inside {
            total.min(self.max_cost)
        } else {
            self.max_cost
        }
    }
}
