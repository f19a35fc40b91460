use crate::{BackendKind, CandidateKind, Error, MetricKind, Result};
use mvs_camera::ViewSelection;
use serde::{Deserialize, Serialize};

/// The settings for solving depth maps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatchMatchSettings {
    /// The photo-consistency metric
    #[serde(default = "default_metric")]
    pub metric: MetricKind,
    /// Half the side length of the square matching window
    #[serde(default = "default_window_radius")]
    pub window_radius: usize,
    /// Distance in pixels between window samples
    #[serde(default = "default_window_step")]
    pub window_step: usize,
    /// Balance between intensity and gradient differences in the PatchMatch metric
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Truncation of the absolute intensity difference
    #[serde(default = "default_tau_intensity")]
    pub tau_intensity: f64,
    /// Truncation of the L1 gradient difference
    #[serde(default = "default_tau_gradient")]
    pub tau_gradient: f64,
    /// Intensity similarity falloff of the adaptive support weights
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    /// Falloff of the census Hamming distance
    #[serde(default = "default_census_lambda")]
    pub census_lambda: f64,
    /// Falloff of the absolute intensity difference paired with census
    #[serde(default = "default_ad_lambda")]
    pub ad_lambda: f64,
    /// Spatial sigma of the bilateral weights
    #[serde(default = "default_bilateral_sigma_spatial")]
    pub bilateral_sigma_spatial: f64,
    /// Intensity sigma of the bilateral weights
    #[serde(default = "default_bilateral_sigma_color")]
    pub bilateral_sigma_color: f64,
    /// Radius of the outer descriptor ring in pixels
    #[serde(default = "default_descriptor_radius")]
    pub descriptor_radius: f64,
    /// Number of pyramid levels, the finest included
    #[serde(default = "default_scales")]
    pub scales: usize,
    /// Iterations per scale
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Iterations at the coarsest scale
    #[serde(default = "default_coarse_iterations")]
    pub coarse_iterations: usize,
    /// How neighbors are picked for every camera
    #[serde(default)]
    pub view_selection: ViewSelection,
    /// Number of best neighbor costs averaged into a pixel's cost
    #[serde(default = "default_aggregation_count")]
    pub aggregation_count: usize,
    /// Relative widening of the sparse depth bounds before solving
    #[serde(default = "default_depth_range_margin")]
    pub depth_range_margin: f64,
    /// Refinement stops once its disparity radius drops below this
    #[serde(default = "default_refine_threshold")]
    pub refine_threshold: f64,
    /// Opening angle in degrees of the cone initial normals are drawn from
    #[serde(default = "default_init_normal_cone")]
    pub init_normal_cone: f64,
    /// Opening angle in degrees of the first refinement round's normal perturbation
    #[serde(default = "default_refine_normal_angle")]
    pub refine_normal_angle: f64,
    /// Where propagation takes its candidates from
    #[serde(default = "default_candidates")]
    pub candidates: CandidateKind,
    /// Which back-end runs the solver phases
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// Seed of the solver randomness, drawn from entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Margin in pixels around every image treated as invalid content
    #[serde(default = "default_border")]
    pub border: usize,
    /// Threads of a dedicated CPU pool, the global rayon pool is used when absent
    #[serde(default)]
    pub threads: Option<usize>,
}

impl Default for PatchMatchSettings {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            window_radius: default_window_radius(),
            window_step: default_window_step(),
            alpha: default_alpha(),
            tau_intensity: default_tau_intensity(),
            tau_gradient: default_tau_gradient(),
            gamma: default_gamma(),
            census_lambda: default_census_lambda(),
            ad_lambda: default_ad_lambda(),
            bilateral_sigma_spatial: default_bilateral_sigma_spatial(),
            bilateral_sigma_color: default_bilateral_sigma_color(),
            descriptor_radius: default_descriptor_radius(),
            scales: default_scales(),
            iterations: default_iterations(),
            coarse_iterations: default_coarse_iterations(),
            view_selection: ViewSelection::default(),
            aggregation_count: default_aggregation_count(),
            depth_range_margin: default_depth_range_margin(),
            refine_threshold: default_refine_threshold(),
            init_normal_cone: default_init_normal_cone(),
            refine_normal_angle: default_refine_normal_angle(),
            candidates: default_candidates(),
            backend: default_backend(),
            seed: None,
            border: default_border(),
            threads: None,
        }
    }
}

impl PatchMatchSettings {
    pub fn metric(self, metric: MetricKind) -> Self {
        Self { metric, ..self }
    }

    pub fn scales(self, scales: usize) -> Self {
        Self { scales, ..self }
    }

    pub fn iterations(self, iterations: usize, coarse_iterations: usize) -> Self {
        Self {
            iterations,
            coarse_iterations,
            ..self
        }
    }

    pub fn candidates(self, candidates: CandidateKind) -> Self {
        Self { candidates, ..self }
    }

    pub fn backend(self, backend: BackendKind) -> Self {
        Self { backend, ..self }
    }

    pub fn seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }

    pub fn window(self, radius: usize, step: usize) -> Self {
        Self {
            window_radius: radius,
            window_step: step,
            ..self
        }
    }

    pub fn aggregation_count(self, aggregation_count: usize) -> Self {
        Self {
            aggregation_count,
            ..self
        }
    }

    pub fn threads(self, threads: usize) -> Self {
        Self {
            threads: Some(threads),
            ..self
        }
    }

    /// Number of outer iterations at `scale` out of `scales` levels.
    pub fn iterations_at(&self, scale: usize) -> usize {
        if scale + 1 == self.scales {
            self.coarse_iterations
        } else {
            self.iterations
        }
    }

    /// Rejects settings the solver cannot run with, before any camera is touched.
    pub fn validate(&self) -> Result<()> {
        fn check(condition: bool, message: &str) -> Result<()> {
            if condition {
                Ok(())
            } else {
                Err(Error::InvalidSettings(message.to_owned()))
            }
        }
        check(self.window_radius > 0, "window_radius must be positive")?;
        check(
            self.window_step > 0 && self.window_step <= self.window_radius,
            "window_step must be in 1..=window_radius",
        )?;
        check((0.0..=1.0).contains(&self.alpha), "alpha must be in [0, 1]")?;
        check(
            self.tau_intensity > 0.0 && self.tau_gradient > 0.0,
            "truncation thresholds must be positive",
        )?;
        check(
            self.gamma > 0.0 && self.census_lambda > 0.0 && self.ad_lambda > 0.0,
            "falloff parameters must be positive",
        )?;
        check(
            self.bilateral_sigma_spatial > 0.0 && self.bilateral_sigma_color > 0.0,
            "bilateral sigmas must be positive",
        )?;
        check(
            self.descriptor_radius >= 2.0,
            "descriptor_radius must be at least 2 pixels",
        )?;
        check(self.scales > 0, "at least one scale is required")?;
        check(self.aggregation_count > 0, "aggregation_count must be positive")?;
        check(
            (0.0..1.0).contains(&self.depth_range_margin),
            "depth_range_margin must be in [0, 1)",
        )?;
        check(
            self.refine_threshold.is_finite() && self.refine_threshold > 0.0,
            "refine_threshold must be positive",
        )?;
        check(
            self.init_normal_cone > 0.0 && self.init_normal_cone <= 90.0,
            "init_normal_cone must be in (0, 90]",
        )?;
        check(
            self.refine_normal_angle >= 0.0 && self.refine_normal_angle <= 90.0,
            "refine_normal_angle must be in [0, 90]",
        )?;
        check(
            self.view_selection.min_angle <= self.view_selection.max_angle,
            "view_selection.min_angle must not exceed max_angle",
        )?;
        check(self.threads != Some(0), "threads must be positive")?;
        Ok(())
    }
}

fn default_metric() -> MetricKind {
    MetricKind::Ncc
}

fn default_window_radius() -> usize {
    3
}

fn default_window_step() -> usize {
    1
}

fn default_alpha() -> f64 {
    0.9
}

fn default_tau_intensity() -> f64 {
    10.0
}

fn default_tau_gradient() -> f64 {
    2.0
}

fn default_gamma() -> f64 {
    10.0
}

fn default_census_lambda() -> f64 {
    30.0
}

fn default_ad_lambda() -> f64 {
    10.0
}

fn default_bilateral_sigma_spatial() -> f64 {
    3.0
}

fn default_bilateral_sigma_color() -> f64 {
    12.0
}

fn default_descriptor_radius() -> f64 {
    6.0
}

fn default_scales() -> usize {
    3
}

fn default_iterations() -> usize {
    3
}

fn default_coarse_iterations() -> usize {
    5
}

fn default_aggregation_count() -> usize {
    4
}

fn default_depth_range_margin() -> f64 {
    0.2
}

fn default_refine_threshold() -> f64 {
    0.01
}

fn default_init_normal_cone() -> f64 {
    60.0
}

fn default_refine_normal_angle() -> f64 {
    60.0
}

fn default_candidates() -> CandidateKind {
    CandidateKind::Full
}

fn default_backend() -> BackendKind {
    BackendKind::Cpu
}

fn default_border() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let settings: PatchMatchSettings =
            serde_json::from_str(r#"{ "metric": "census_ad", "scales": 2 }"#).unwrap();
        assert_eq!(settings.metric, MetricKind::CensusAd);
        assert_eq!(settings.scales, 2);
        assert_eq!(settings.window_radius, 3);
        assert_eq!(settings.view_selection, ViewSelection::default());
        settings.validate().unwrap();
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let result = serde_json::from_str::<PatchMatchSettings>(r#"{ "metric": "sad" }"#);
        assert!(result.is_err());
        assert!(matches!(
            "sad".parse::<MetricKind>(),
            Err(Error::UnknownMetric(name)) if name == "sad"
        ));
    }

    #[test]
    fn invalid_settings() {
        let settings = PatchMatchSettings::default().window(2, 3);
        assert!(matches!(settings.validate(), Err(Error::InvalidSettings(_))));
        let settings = PatchMatchSettings {
            refine_threshold: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn coarsest_scale_iterations() {
        let settings = PatchMatchSettings::default().iterations(2, 6).scales(3);
        assert_eq!(settings.iterations_at(0), 2);
        assert_eq!(settings.iterations_at(2), 6);
    }
}
