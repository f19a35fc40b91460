use super::{correlation_cost, for_each_sample, CostMetric, MetricKind, NccMetric, Window};
use crate::ViewImage;
use mvs_camera::nalgebra::Matrix3;
use ndarray::{Array2, Zip};
use std::sync::Arc;

/// Bilateral weight statistics of one reference window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowStats {
    pub weight_sum: f64,
    pub mean: f64,
    pub variance: f64,
}

/// Normalized cross correlation with bilateral support weights.
///
/// The weight of a sample at offset `o` from the center `p` is the product of a spatial
/// term for `o` and a color term for `I(p + o) - I(p)`, both read from tables. The weight
/// sum, weighted mean and weighted variance of every reference window depend only on the
/// reference, so they are computed once up front.
pub struct BilateralNccMetric {
    window: Window,
    spatial: Vec<f64>,
    /// Indexed by the intensity difference plus 255.
    color: Vec<f64>,
    stats: Array2<Option<WindowStats>>,
    reference: Arc<ViewImage>,
    neighbors: Vec<Arc<ViewImage>>,
}

impl BilateralNccMetric {
    pub const MAX_COST: f64 = NccMetric::MAX_COST;

    pub fn new(
        window: Window,
        sigma_spatial: f64,
        sigma_color: f64,
        reference: Arc<ViewImage>,
        neighbors: Vec<Arc<ViewImage>>,
    ) -> Self {
        let spatial = window
            .offsets()
            .map(|(dr, dc)| {
                let distance2 = (dr * dr + dc * dc) as f64;
                (-distance2 / (2.0 * sigma_spatial * sigma_spatial)).exp()
            })
            .collect::<Vec<f64>>();
        let color = (-255i32..=255)
            .map(|delta| {
                let delta = f64::from(delta);
                (-delta * delta / (2.0 * sigma_color * sigma_color)).exp()
            })
            .collect::<Vec<f64>>();
        let mut metric = Self {
            window,
            spatial,
            color,
            stats: Array2::from_elem((reference.height(), reference.width()), None),
            reference,
            neighbors,
        };
        metric.stats = metric.window_stats();
        metric
    }

    /// Precomputes the statistics of every reference window lying in the valid region.
    fn window_stats(&self) -> Array2<Option<WindowStats>> {
        let mut stats = Array2::from_elem(self.stats.dim(), None);
        Zip::indexed(&mut stats).par_for_each(|(row, col), stats| {
            let (mut weight_sum, mut sum, mut sum_squares) = (0.0f64, 0.0f64, 0.0f64);
            for (slot, pixel) in self.sample_pixels(row, col).enumerate() {
                let (r, c) = match pixel {
                    Some(pixel) => pixel,
                    None => return,
                };
                let weight = self.weight(slot, row, col, r, c);
                let value = f64::from(self.reference.intensity_at(r, c));
                weight_sum += weight;
                sum += weight * value;
                sum_squares += weight * value * value;
            }
            if weight_sum > 0.0 {
                let mean = sum / weight_sum;
                *stats = Some(WindowStats {
                    weight_sum,
                    mean,
                    variance: sum_squares / weight_sum - mean * mean,
                });
            }
        });
        stats
    }

    /// Reference pixels of the window around `(row, col)`, `None` outside the valid region.
    fn sample_pixels(
        &self,
        row: usize,
        col: usize,
    ) -> impl Iterator<Item = Option<(usize, usize)>> + '_ {
        self.window.offsets().map(move |(dr, dc)| {
            let (r, c) = (row as isize + dr, col as isize + dc);
            self.reference
                .contains_pixel(r, c)
                .then(|| (r as usize, c as usize))
        })
    }

    #[inline]
    fn weight(&self, slot: usize, row: usize, col: usize, r: usize, c: usize) -> f64 {
        let delta = self.reference.intensity_at(r, c) - self.reference.intensity_at(row, col);
        let index = (delta.round() as i32).clamp(-255, 255) + 255;
        self.spatial[slot] * self.color[index as usize]
    }

    pub fn stats(&self, row: usize, col: usize) -> Option<WindowStats> {
        self.stats[[row, col]]
    }
}

impl CostMetric for BilateralNccMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::BilateralNcc
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
        let stats = match self.stats[[row, col]] {
            Some(stats) => stats,
            None => return Self::MAX_COST,
        };
        let other = &self.neighbors[neighbor];
        let reference = &self.reference;
        let (mut sum_b, mut sum_bb, mut sum_ab) = (0.0f64, 0.0f64, 0.0f64);
        let mut slot = 0;
        let inside = for_each_sample(
            &self.window,
            reference,
            other,
            row,
            col,
            homography,
            |_, _, r, c, x, y| {
                let weight = self.weight(slot, row, col, r, c);
                let a = f64::from(reference.intensity_at(r, c));
                let b = f64::from(other.sample_intensity(x, y));
                sum_b += weight * b;
                sum_bb += weight * b * b;
                sum_ab += weight * a * b;
                slot += 1;
            },
        );
        if !inside {
            return Self::MAX_COST;
        }
        let mean_b = sum_b / stats.weight_sum;
        let var_b = sum_bb / stats.weight_sum - mean_b * mean_b;
        let covariance = sum_ab / stats.weight_sum - stats.mean * mean_b;
        correlation_cost(covariance, stats.variance, var_b)
    }
}
