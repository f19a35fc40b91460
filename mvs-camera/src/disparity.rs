use crate::{Camera, DepthRange};

/// Converts between depth and the disparity a camera would observe against a neighbor
/// at its mean baseline: `disparity = focal · baseline / depth`.
///
/// Both directions return `None` instead of an infinite or NaN value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisparityConversion {
    /// The product `focal · baseline`.
    pub scale: f64,
}

impl DisparityConversion {
    pub fn new(focal_length: f64, baseline: f64) -> Self {
        Self {
            scale: focal_length * baseline,
        }
    }

    pub fn depth_to_disparity(&self, depth: f64) -> Option<f64> {
        let disparity = self.scale / depth;
        (disparity.is_finite() && depth != 0.0).then(|| disparity)
    }

    pub fn disparity_to_depth(&self, disparity: f64) -> Option<f64> {
        let depth = self.scale / disparity;
        (depth.is_finite() && disparity != 0.0).then(|| depth)
    }

    /// The disparity interval matching a depth interval, `(min, max)` ordered.
    pub fn disparity_range(&self, depth_range: &DepthRange) -> Option<(f64, f64)> {
        let near = self.depth_to_disparity(depth_range.min)?;
        let far = self.depth_to_disparity(depth_range.max)?;
        Some((near.min(far), near.max(far)))
    }
}

impl Camera {
    /// Disparity conversion at this camera's focal length and mean neighbor baseline.
    ///
    /// A camera without neighbors has no baseline. A unit baseline is used then, which
    /// keeps disparity proportional to inverse depth.
    pub fn disparity(&self) -> DisparityConversion {
        let baseline = self.baseline().mean;
        let baseline = if baseline.is_finite() && baseline > 0.0 {
            baseline
        } else {
            1.0
        };
        DisparityConversion::new(self.focal_length(), baseline)
    }
}
