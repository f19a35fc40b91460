//! The PatchMatch state machine and the backends that run its phases.
//!
//! Each camera is solved coarse to fine. At every scale the field is seeded (randomly
//! at the coarsest scale, by upscaling the previous field otherwise), costed, and then
//! improved by a fixed number of iterations of two checkerboard propagation half-steps
//! followed by refinement:
//!
//! ```text
//! INIT ─► COST ─► ┌─► PROPAGATE(red) ─► PROPAGATE(black) ─► REFINE ─┐ ─► persist
//!   ▲             └──────────────────── iterations ─────────────────┘      │
//!   └──────────────── upscale to the next finer scale ◄────────────────────┘
//! ```

mod accelerator;
mod candidates;
mod context;
mod cpu;
mod device;
mod hypothesis;
#[cfg(feature = "wgpu")]
mod wgpu_device;

pub use accelerator::*;
pub use candidates::*;
pub use context::*;
pub use cpu::*;
pub use device::*;
pub use hypothesis::*;
#[cfg(feature = "wgpu")]
pub use wgpu_device::*;

use crate::{
    build_metric, Color, DepthField, DescriptorCache, Error, MetricKind, PatchMatchSettings,
    Result, ViewSource,
};
use log::*;
use mvs_camera::DepthRange;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

/// Selects where the phases run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Cpu,
    Accelerator,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Cpu => "cpu",
            BackendKind::Accelerator => "accelerator",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [BackendKind::Cpu, BackendKind::Accelerator]
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnknownBackend(s.to_owned()))
    }
}

/// Runs the phases of one scale on a field.
///
/// Every phase reads `ctx` only. Phases never fail: degenerate geometry shows up as the
/// metric's maximum cost.
pub trait Backend: Send {
    fn name(&self) -> &'static str;

    /// Whether the phases can be costed with `metric`.
    fn supports(&self, _metric: MetricKind) -> bool {
        true
    }

    /// Called once per scale before any phase runs on `ctx`.
    fn prepare(&mut self, _ctx: &ScaleContext) -> Result<()> {
        Ok(())
    }

    /// Replaces the cost of every pixel by the aggregated cost of its plane.
    fn compute_costs(&mut self, ctx: &ScaleContext, field: &mut DepthField);

    /// One checkerboard half-step: every pixel of `color` adopts the candidate plane
    /// with the lowest cost if it beats its own.
    fn propagate(&mut self, ctx: &ScaleContext, field: &mut DepthField, color: Color);

    /// Random perturbations of depth and normal with a shrinking radius, keeping
    /// improvements.
    fn refine(&mut self, ctx: &ScaleContext, field: &mut DepthField, seed: u64);
}

/// Drives a [`Backend`] through the scales of one camera at a time.
pub struct Solver<'a, S: ViewSource + ?Sized> {
    settings: PatchMatchSettings,
    source: &'a S,
    cache: Arc<DescriptorCache>,
    backend: Box<dyn Backend>,
}

impl<'a, S: ViewSource + ?Sized> Solver<'a, S> {
    /// Validates `settings` and creates the backend they select.
    pub fn new(settings: PatchMatchSettings, source: &'a S) -> Result<Self> {
        settings.validate()?;
        let backend: Box<dyn Backend> = match (settings.backend, settings.threads) {
            (BackendKind::Cpu, Some(threads)) => Box::new(CpuBackend::with_threads(threads)?),
            (BackendKind::Cpu, None) => Box::new(CpuBackend::new()),
            (BackendKind::Accelerator, _) => accelerator(settings.metric),
        };
        if !backend.supports(settings.metric) {
            return Err(Error::InvalidSettings(format!(
                "the {} backend cannot run the {} metric",
                backend.name(),
                settings.metric
            )));
        }
        Ok(Self {
            settings,
            source,
            cache: Arc::new(DescriptorCache::new()),
            backend,
        })
    }

    pub fn with_backend(self, backend: Box<dyn Backend>) -> Self {
        Self { backend, ..self }
    }

    pub fn settings(&self) -> &PatchMatchSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Descriptors memoized during this session.
    pub fn cache(&self) -> &Arc<DescriptorCache> {
        &self.cache
    }

    /// Solves every scale of `camera` and returns its finest field.
    ///
    /// The field of every scale is stored in the source as soon as that scale is done.
    pub fn solve_camera(&mut self, camera: usize, rng: &mut impl Rng) -> Result<DepthField> {
        if !self.backend.supports(self.settings.metric) {
            return Err(Error::InvalidSettings(format!(
                "the {} backend cannot run the {} metric",
                self.backend.name(),
                self.settings.metric
            )));
        }
        let finest = self.source.camera(camera, 0)?;
        if finest.neighbors().is_empty() {
            return Err(Error::NoNeighbors(camera));
        }
        let depth_range = finest
            .depth_range()
            .expanded(self.settings.depth_range_margin);
        info!(
            "Solving camera {} against {:?} with {} on the {} backend",
            camera,
            finest.neighbors(),
            self.settings.metric,
            self.backend.name()
        );

        let mut field: Option<DepthField> = None;
        for scale in (0..self.settings.scales).rev() {
            let ctx = self.scale_context(camera, scale, depth_range)?;
            info!(
                "Camera {} scale {}: {} x {}",
                camera, scale, ctx.width, ctx.height
            );
            let mut current = match field.take() {
                Some(coarser) => {
                    coarser.upscale(ctx.width, ctx.height, &ctx.camera, &ctx.depth_range)
                }
                None => initial_field(&ctx, rng.gen()),
            };
            self.backend.prepare(&ctx)?;
            trace!("Computing initial costs");
            self.backend.compute_costs(&ctx, &mut current);
            for iteration in 0..self.settings.iterations_at(scale) {
                for color in Color::BOTH {
                    self.backend.propagate(&ctx, &mut current, color);
                }
                trace!("Refining");
                self.backend.refine(&ctx, &mut current, rng.gen());
                let max_cost = ctx.max_cost();
                debug!(
                    "Camera {} scale {} iteration {}: {:.1}% valid, mean cost {:?}",
                    camera,
                    scale,
                    iteration,
                    100.0 * current.valid_fraction(max_cost),
                    current.mean_valid_cost(max_cost)
                );
            }
            self.source.store_field(camera, scale, &current)?;
            self.cache.evict_scale(scale);
            field = Some(current);
        }
        field.ok_or_else(|| Error::InvalidSettings("at least one scale is required".to_owned()))
    }

    /// Solves each of `cameras` in turn. A camera that fails is logged and skipped.
    ///
    /// Returns the cameras that failed along with their errors.
    pub fn solve_all(
        &mut self,
        cameras: impl IntoIterator<Item = usize>,
        rng: &mut impl Rng,
    ) -> Vec<(usize, Error)> {
        let mut failures = vec![];
        for camera in cameras {
            if let Err(e) = self.solve_camera(camera, rng) {
                error!("Failed to solve camera {}: {}", camera, e);
                failures.push((camera, e));
            }
        }
        self.cache.clear();
        failures
    }

    fn scale_context(
        &self,
        camera: usize,
        scale: usize,
        depth_range: DepthRange,
    ) -> Result<ScaleContext> {
        let reference = self.source.camera(camera, scale)?;
        if reference.width() == 0 || reference.height() == 0 {
            return Err(Error::InvalidSettings(format!(
                "camera {} has no pixels left at scale {}",
                camera, scale
            )));
        }
        let neighbors = reference
            .neighbors()
            .iter()
            .map(|&neighbor| self.source.camera(neighbor, scale))
            .collect::<Result<Vec<_>>>()?;
        let image = self.source.image(camera, scale)?;
        let expected = (reference.height() as usize, reference.width() as usize);
        let found = (image.height(), image.width());
        if expected != found {
            return Err(Error::DimensionMismatch { expected, found });
        }
        let neighbor_images = reference
            .neighbors()
            .iter()
            .map(|&neighbor| self.source.image(neighbor, scale))
            .collect::<Result<Vec<_>>>()?;
        let metric = build_metric(&self.settings, image, neighbor_images, &self.cache)?;
        ScaleContext::new(
            &self.settings,
            scale,
            reference,
            &neighbors,
            metric,
            depth_range,
        )
    }
}

/// The accelerator backend on the best device available for `metric`.
#[cfg(feature = "wgpu")]
fn accelerator(metric: MetricKind) -> Box<dyn Backend> {
    match WgpuDevice::new() {
        Some(device) if device.supports(metric) => {
            info!("Running the accelerator backend on {}", device.adapter_name());
            Box::new(AcceleratorBackend::with_device(device))
        }
        Some(device) => {
            warn!(
                "{} has no kernel for the {} metric, using the host device",
                device.adapter_name(),
                metric
            );
            Box::new(AcceleratorBackend::new())
        }
        None => {
            warn!("No GPU adapter found, using the host device");
            Box::new(AcceleratorBackend::new())
        }
    }
}

#[cfg(not(feature = "wgpu"))]
fn accelerator(_metric: MetricKind) -> Box<dyn Backend> {
    Box::new(AcceleratorBackend::new())
}
