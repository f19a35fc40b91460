//! Photo-consistency metrics between a reference window and its warp into a neighbor.

mod bilateral;
mod census;
mod descriptor;
mod ncc;
mod patchmatch;

pub use bilateral::*;
pub use census::*;
pub use descriptor::*;
pub use ncc::*;
pub use patchmatch::*;

use crate::{Channels, Error, PatchMatchSettings, Result, ViewImage};
use mvs_camera::nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

/// Selects one of the photo-consistency metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Ncc,
    PatchMatch,
    CensusAd,
    BilateralNcc,
    Descriptor,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Ncc,
        MetricKind::PatchMatch,
        MetricKind::CensusAd,
        MetricKind::BilateralNcc,
        MetricKind::Descriptor,
    ];

    /// The channels an image must carry for this metric besides intensity.
    pub fn required_channels(self) -> Channels {
        match self {
            MetricKind::PatchMatch => Channels::intensity().with_gradient(),
            MetricKind::CensusAd => Channels::intensity().with_census(),
            MetricKind::Ncc | MetricKind::BilateralNcc | MetricKind::Descriptor => {
                Channels::intensity()
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Ncc => "ncc",
            MetricKind::PatchMatch => "patch_match",
            MetricKind::CensusAd => "census_ad",
            MetricKind::BilateralNcc => "bilateral_ncc",
            MetricKind::Descriptor => "descriptor",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnknownMetric(s.to_owned()))
    }
}

/// The sample positions of a square matching window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub radius: usize,
    pub step: usize,
}

impl Window {
    pub fn new(radius: usize, step: usize) -> Self {
        Self {
            radius,
            step: step.max(1),
        }
    }

    pub fn from_settings(settings: &PatchMatchSettings) -> Self {
        Self::new(settings.window_radius, settings.window_step)
    }

    /// Row and column offsets of every sample, row-major.
    pub fn offsets(&self) -> impl Iterator<Item = (isize, isize)> + Clone {
        let radius = self.radius as isize;
        let step = self.step;
        (-radius..=radius)
            .step_by(step)
            .flat_map(move |dr| (-radius..=radius).step_by(step).map(move |dc| (dr, dc)))
    }

    pub fn samples(&self) -> usize {
        let per_side = 2 * self.radius / self.step + 1;
        per_side * per_side
    }
}

/// A photo-consistency metric bound to a reference image and its neighbors.
///
/// Costs lie in `[0, max_cost]`. A window that leaves the valid region of either image,
/// or whose warp is degenerate, costs exactly `max_cost`.
pub trait CostMetric: Send + Sync {
    fn kind(&self) -> MetricKind;

    fn max_cost(&self) -> f64;

    fn neighbors(&self) -> usize;

    /// The image windows are taken from.
    fn reference(&self) -> &ViewImage;

    /// The image of neighbor `neighbor`, in the order of [`CostMetric::cost`].
    fn neighbor_image(&self, neighbor: usize) -> &ViewImage;

    /// Cost of the window centered at `(row, col)` in the reference against neighbor
    /// `neighbor`, with `homography` mapping reference pixels into that neighbor.
    fn cost(&self, neighbor: usize, row: usize, col: usize, homography: &Matrix3<f64>) -> f64;
}

/// Builds the configured metric for one reference image and its neighbor images.
///
/// The descriptor metric memoizes descriptors in `cache`, which outlives the metric.
pub fn build_metric(
    settings: &PatchMatchSettings,
    reference: Arc<ViewImage>,
    neighbors: Vec<Arc<ViewImage>>,
    cache: &Arc<DescriptorCache>,
) -> Result<Box<dyn CostMetric>> {
    let required = settings.metric.required_channels();
    if let Some(missing) = std::iter::once(&reference)
        .chain(neighbors.iter())
        .find(|image| !image.channels().covers(&required))
    {
        return Err(Error::InvalidSettings(format!(
            "image of camera {} at scale {} lacks the channels {} needs",
            missing.id().camera,
            missing.id().scale,
            settings.metric
        )));
    }
    let window = Window::from_settings(settings);
    Ok(match settings.metric {
        MetricKind::Ncc => Box::new(NccMetric::new(window, reference, neighbors)),
        MetricKind::PatchMatch => Box::new(PatchMatchMetric::new(
            window,
            PatchMatchParams::from_settings(settings),
            reference,
            neighbors,
        )),
        MetricKind::CensusAd => Box::new(CensusAdMetric::new(
            window,
            settings.census_lambda,
            settings.ad_lambda,
            reference,
            neighbors,
        )),
        MetricKind::BilateralNcc => Box::new(BilateralNccMetric::new(
            window,
            settings.bilateral_sigma_spatial,
            settings.bilateral_sigma_color,
            reference,
            neighbors,
        )),
        MetricKind::Descriptor => Box::new(DescriptorMetric::new(
            DescriptorParams::new(settings.descriptor_radius),
            reference,
            neighbors,
            cache.clone(),
        )),
    })
}

/// Warps every window sample that lies in the reference's valid region into `neighbor`,
/// calling `visit` with the reference pixel and the neighbor position.
///
/// Returns `false` as soon as a sample falls outside either image or the warp degenerates.
#[inline]
pub(crate) fn for_each_sample(
    window: &Window,
    reference: &ViewImage,
    neighbor: &ViewImage,
    row: usize,
    col: usize,
    homography: &Matrix3<f64>,
    mut visit: impl FnMut(isize, isize, usize, usize, f64, f64),
) -> bool {
    for (dr, dc) in window.offsets() {
        let (r, c) = (row as isize + dr, col as isize + dc);
        if !reference.contains_pixel(r, c) {
            return false;
        }
        let q = match mvs_camera::warp(homography, &Point2::new(c as f64, r as f64)) {
            Some(q) => q,
            None => return false,
        };
        if !neighbor.contains(q.x, q.y) {
            return false;
        }
        visit(dr, dc, r as usize, c as usize, q.x, q.y);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_offsets() {
        let window = Window::new(3, 1);
        assert_eq!(window.offsets().count(), window.samples());
        assert_eq!(window.samples(), 49);
        let window = Window::new(4, 2);
        assert_eq!(window.samples(), 25);
        assert_eq!(
            window.offsets().take(3).collect::<Vec<_>>(),
            vec![(-4, -4), (-4, -2), (-4, 0)]
        );
    }

    #[test]
    fn metric_names_parse() {
        for kind in MetricKind::ALL {
            assert_eq!(kind.name().parse::<MetricKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
    }
}
