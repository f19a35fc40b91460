use super::{for_each_sample, CostMetric, MetricKind, Window};
use crate::ViewImage;
use mvs_camera::nalgebra::Matrix3;
use std::sync::Arc;

/// Census Hamming distance combined with absolute intensity difference,
/// `2 - exp(-census / lambda_census) - exp(-ad / lambda_ad)` averaged over the window.
pub struct CensusAdMetric {
    window: Window,
    /// `exp(-hamming / lambda_census)` for every possible Hamming distance.
    census_table: [f64; 65],
    /// `exp(-ad / lambda_ad)` for every integer intensity difference.
    ad_table: [f64; 256],
    reference: Arc<ViewImage>,
    neighbors: Vec<Arc<ViewImage>>,
}

impl CensusAdMetric {
    pub const MAX_COST: f64 = 2.0;

    pub fn new(
        window: Window,
        census_lambda: f64,
        ad_lambda: f64,
        reference: Arc<ViewImage>,
        neighbors: Vec<Arc<ViewImage>>,
    ) -> Self {
        let mut census_table = [0.0; 65];
        for (distance, value) in census_table.iter_mut().enumerate() {
            *value = (-(distance as f64) / census_lambda).exp();
        }
        let mut ad_table = [0.0; 256];
        for (difference, value) in ad_table.iter_mut().enumerate() {
            *value = (-(difference as f64) / ad_lambda).exp();
        }
        Self {
            window,
            census_table,
            ad_table,
            reference,
            neighbors,
        }
    }
}

impl CostMetric for CensusAdMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::CensusAd
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
        let reference = &self.reference;
        let mut total = 0.0f64;
        let mut count = 0usize;
        let inside = for_each_sample(
            &self.window,
            reference,
            other,
            row,
            col,
            homography,
            |_, _, r, c, x, y| {
                let hamming = (reference.census_at(c as f64, r as f64) ^ other.census_at(x, y))
                    .count_ones() as usize;
                let difference = (reference.intensity_at(r, c) - other.sample_intensity(x, y))
                    .abs()
                    .round() as usize;
                total += 2.0 - self.census_table[hamming] - self.ad_table[difference.min(255)];
                count += 1;
            },
        );
        if inside && count != 0 {
            (total / count as f64).clamp(0.0, Self::MAX_COST)
        } else {
            Self::MAX_COST
        }
    }
}
