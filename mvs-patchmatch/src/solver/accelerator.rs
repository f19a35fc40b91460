use super::{Backend, ComputeDevice, HostDevice, RefineRound, ScaleContext, PROPOSALS};
use crate::{Color, DepthField, MetricKind, Result};
use log::*;
use std::mem;

/// Runs every phase as a sequence of kernel dispatches on a [`ComputeDevice`].
///
/// The scene of a scale is loaded once and stays resident until the next scale. Cells
/// are uploaded at the start of a phase and downloaded at its end. Within a phase, costs
/// against each neighbor go to a `[neighbor][job]` buffer which a second kernel sorts and
/// reduces per job. With the [`HostDevice`], results match
/// [`CpuBackend`](super::CpuBackend) for the same seed.
pub struct AcceleratorBackend<D: ComputeDevice = HostDevice> {
    device: D,
    /// The resident scene and the id of the context it was loaded from.
    scene: Option<(u64, D::Scene)>,
}

impl AcceleratorBackend<HostDevice> {
    pub fn new() -> Self {
        Self::with_device(HostDevice)
    }
}

impl Default for AcceleratorBackend<HostDevice> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ComputeDevice> AcceleratorBackend<D> {
    pub fn with_device(device: D) -> Self {
        Self {
            device,
            scene: None,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Loads the scene of `ctx` unless it is already resident.
    fn load(&mut self, ctx: &ScaleContext) -> Result<()> {
        if matches!(&self.scene, Some((id, _)) if *id == ctx.id()) {
            return Ok(());
        }
        self.scene = None;
        debug!(
            "Loading scale {} onto the {} device",
            ctx.scale,
            self.device.name()
        );
        let scene = self.device.load_scene(ctx)?;
        self.scene = Some((ctx.id(), scene));
        Ok(())
    }

    /// The device and the scene of `ctx`, `None` when the scene could not be loaded.
    fn resident(&mut self, ctx: &ScaleContext) -> Option<(&D, &D::Scene)> {
        if let Err(e) = self.load(ctx) {
            error!(
                "Failed to load scale {} onto the {} device: {}",
                ctx.scale,
                self.device.name(),
                e
            );
            return None;
        }
        self.scene.as_ref().map(|(_, scene)| (&self.device, scene))
    }
}

/// Per-neighbor costs of `jobs` followed by their aggregate.
struct CostBuffers<D: ComputeDevice> {
    per_neighbor: D::Costs,
    aggregated: D::Costs,
}

impl<D: ComputeDevice> CostBuffers<D> {
    fn new(device: &D, ctx: &ScaleContext, scene: &D::Scene, jobs: usize) -> Self {
        Self {
            per_neighbor: device.allocate_costs(scene, ctx.rigs.len() * jobs),
            aggregated: device.allocate_costs(scene, jobs),
        }
    }

    fn evaluate(
        &mut self,
        device: &D,
        ctx: &ScaleContext,
        scene: &D::Scene,
        jobs: &D::Jobs,
        stride: usize,
    ) {
        device.neighbor_costs(ctx, scene, jobs, stride, &mut self.per_neighbor);
        device.aggregate(ctx, scene, jobs, &self.per_neighbor, &mut self.aggregated);
    }
}

impl<D: ComputeDevice> Backend for AcceleratorBackend<D> {
    fn name(&self) -> &'static str {
        "accelerator"
    }

    fn supports(&self, metric: MetricKind) -> bool {
        self.device.supports(metric)
    }

    fn prepare(&mut self, ctx: &ScaleContext) -> Result<()> {
        self.load(ctx)
    }

    fn compute_costs(&mut self, ctx: &ScaleContext, field: &mut DepthField) {
        let (device, scene) = match self.resident(ctx) {
            Some(resident) => resident,
            None => return,
        };
        let cells = device.upload_cells(scene, field);
        let mut jobs = device.allocate_jobs(scene, ctx.pixels());
        let mut costs = CostBuffers::new(device, ctx, scene, ctx.pixels());
        device.current_hypotheses(ctx, scene, &cells, &mut jobs);
        costs.evaluate(device, ctx, scene, &jobs, 1);
        let host = device.download_costs(scene, &costs.aggregated);
        for (cell, cost) in field.cells_mut().iter_mut().zip(host) {
            cell.cost = cost;
        }
    }

    fn propagate(&mut self, ctx: &ScaleContext, field: &mut DepthField, color: Color) {
        let (device, scene) = match self.resident(ctx) {
            Some(resident) => resident,
            None => return,
        };
        // Candidates are read from the field as it was before the half-step.
        let snapshot = device.upload_cells(scene, field);
        let mut best = device.upload_cells(scene, field);
        let mut next = device.upload_cells(scene, field);
        let mut jobs = device.allocate_jobs(scene, ctx.pixels());
        let mut costs = CostBuffers::new(device, ctx, scene, ctx.pixels());

        for slot in 0..ctx.policy.slots() {
            device.propagation_candidates(ctx, scene, &snapshot, color, slot, &mut jobs);
            costs.evaluate(device, ctx, scene, &jobs, 1);
            device.select(scene, &best, &jobs, &costs.aggregated, 1, &mut next);
            mem::swap(&mut best, &mut next);
        }
        trace!(
            "Propagation ({:?}) ran {} candidate slots",
            color,
            ctx.policy.slots()
        );
        device.download_cells(scene, &best, field);
    }

    fn refine(&mut self, ctx: &ScaleContext, field: &mut DepthField, seed: u64) {
        let (device, scene) = match self.resident(ctx) {
            Some(resident) => resident,
            None => return,
        };
        let mut best = device.upload_cells(scene, field);
        let mut next = device.upload_cells(scene, field);
        let mut jobs = device.allocate_jobs(scene, ctx.pixels() * PROPOSALS);
        let mut costs = CostBuffers::new(device, ctx, scene, ctx.pixels() * PROPOSALS);

        for (round, (radius, angle)) in ctx.schedule().rounds().enumerate() {
            let round = RefineRound {
                seed,
                round,
                radius,
                angle,
            };
            device.refinement_proposals(ctx, scene, &best, &round, &mut jobs);
            costs.evaluate(device, ctx, scene, &jobs, PROPOSALS);
            device.select(scene, &best, &jobs, &costs.aggregated, PROPOSALS, &mut next);
            mem::swap(&mut best, &mut next);
        }
        device.download_cells(scene, &best, field);
    }
}
