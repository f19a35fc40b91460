//! A [`ComputeDevice`] on a GPU through `wgpu`.
//!
//! The kernels are the entry points of `patchmatch.wgsl` and compute in `f32`. Only the
//! NCC metric has a GPU kernel. Random draws come from a hash of the seed, pixel and
//! round, so fields are reproducible for a seed but not bit-identical to the host's.

use super::{ComputeDevice, RefineRound, ScaleContext, PROPOSALS};
use crate::{Color, DepthField, Error, FieldCell, MetricKind, Result};
use bytemuck::{Pod, Zeroable};
use log::*;
use mvs_camera::nalgebra::{Matrix3, Unit, Vector3};
use mvs_camera::Plane;
use std::mem::size_of;
use std::sync::mpsc;
use wgpu::util::DeviceExt;

const WORKGROUP_SIZE: u64 = 256;
const MAX_WORKGROUPS: u64 = 65535;
/// Length of the sorting array of the aggregation kernel.
pub const MAX_NEIGHBORS: usize = 16;
/// Size of a `Job` in the shader.
const JOB_SIZE: u64 = 32;
const BINDINGS: u32 = 9;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct KernelParams {
    inverse_intrinsics: [[f32; 4]; 3],
    width: u32,
    height: u32,
    count: u32,
    stride: u32,
    neighbors: u32,
    slot: u32,
    parity: u32,
    round: u32,
    seed_lo: u32,
    seed_hi: u32,
    aggregation: u32,
    border: u32,
    window_radius: u32,
    window_step: u32,
    pad: [u32; 2],
    max_cost: f32,
    depth_min: f32,
    depth_max: f32,
    disparity_scale: f32,
    disparity_min: f32,
    disparity_max: f32,
    radius: f32,
    angle: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct GpuRig {
    /// Rows of `K_o·R·K_r⁻¹`.
    homography: [[f32; 4]; 3],
    /// `K_o·t`.
    translation: [f32; 4],
    /// Start of the neighbor's intensity in the image buffer.
    offset: u32,
    width: u32,
    height: u32,
    border: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
struct GpuCell {
    plane: [f32; 4],
    depth: f32,
    cost: f32,
    pad: [f32; 2],
}

impl From<&FieldCell> for GpuCell {
    fn from(cell: &FieldCell) -> Self {
        let [x, y, z, d] = cell.plane.to_array();
        Self {
            plane: [x as f32, y as f32, z as f32, d as f32],
            depth: cell.depth as f32,
            cost: cell.cost as f32,
            pad: [0.0; 2],
        }
    }
}

impl GpuCell {
    fn to_cell(self) -> FieldCell {
        let [x, y, z, d] = self.plane;
        // Normals lose their unit length in f32.
        let normal = Unit::try_new(Vector3::new(x, y, z).cast::<f64>(), 0.0)
            .unwrap_or_else(|| -Vector3::z_axis());
        FieldCell {
            cost: f64::from(self.cost),
            depth: f64::from(self.depth),
            plane: Plane::new(normal, f64::from(d)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kernel {
    CurrentHypotheses,
    PropagationCandidates,
    RefinementProposals,
    NeighborCosts,
    Aggregate,
    Select,
}

impl Kernel {
    const ALL: [Kernel; 6] = [
        Kernel::CurrentHypotheses,
        Kernel::PropagationCandidates,
        Kernel::RefinementProposals,
        Kernel::NeighborCosts,
        Kernel::Aggregate,
        Kernel::Select,
    ];

    fn entry_point(self) -> &'static str {
        match self {
            Kernel::CurrentHypotheses => "current_hypotheses",
            Kernel::PropagationCandidates => "propagation_candidates",
            Kernel::RefinementProposals => "refinement_proposals",
            Kernel::NeighborCosts => "neighbor_costs",
            Kernel::Aggregate => "aggregate_costs",
            Kernel::Select => "select_best",
        }
    }
}

/// A buffer of a [`WgpuDevice`] and the number of elements it holds.
pub struct GpuBuffer {
    buffer: wgpu::Buffer,
    len: usize,
}

impl GpuBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The images, rigs and candidate regions of one scale, resident on the GPU.
pub struct WgpuScene {
    params: KernelParams,
    images: wgpu::Buffer,
    rigs: wgpu::Buffer,
    regions: wgpu::Buffer,
    /// Bound to the cell, job, cost and output slots a kernel leaves unused.
    spare: [wgpu::Buffer; 5],
}

/// The buffers one dispatch reads and writes. Missing ones are bound to spares.
#[derive(Default)]
struct Bound<'a> {
    cells: Option<&'a wgpu::Buffer>,
    jobs: Option<&'a wgpu::Buffer>,
    per_neighbor: Option<&'a wgpu::Buffer>,
    aggregated: Option<&'a wgpu::Buffer>,
    selected: Option<&'a wgpu::Buffer>,
}

/// Runs the kernels as compute shaders on a GPU adapter.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::AdapterInfo,
    layout: wgpu::BindGroupLayout,
    pipelines: Vec<wgpu::ComputePipeline>,
}

impl WgpuDevice {
    /// Opens the preferred adapter, `None` when the system has none.
    pub fn new() -> Option<Self> {
        pollster::block_on(Self::new_async())
    }

    async fn new_async() -> Option<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok()?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("PatchMatch Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::default(),
            })
            .await
            .ok()?;
        Some(Self::from_parts(device, queue, adapter.get_info()))
    }

    fn from_parts(device: wgpu::Device, queue: wgpu::Queue, adapter: wgpu::AdapterInfo) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("PatchMatch Kernels"),
            source: wgpu::ShaderSource::Wgsl(include_str!("patchmatch.wgsl").into()),
        });
        let entries = (0..BINDINGS)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match binding {
                        0 => wgpu::BufferBindingType::Uniform,
                        1..=4 => wgpu::BufferBindingType::Storage { read_only: true },
                        _ => wgpu::BufferBindingType::Storage { read_only: false },
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect::<Vec<_>>();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PatchMatch Bind Group Layout"),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("PatchMatch Pipeline Layout"),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });
        let pipelines = Kernel::ALL
            .iter()
            .map(|kernel| {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(kernel.entry_point()),
                    layout: Some(&pipeline_layout),
                    module: &shader,
                    entry_point: Some(kernel.entry_point()),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
            })
            .collect();
        Self {
            device,
            queue,
            adapter,
            layout,
            pipelines,
        }
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter.name
    }

    /// A storage buffer holding `data`, or one zeroed element when `data` is empty.
    fn storage<T: Pod + Zeroable>(
        &self,
        label: &str,
        data: &[T],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        let zeroed = [T::zeroed()];
        let contents = if data.is_empty() { &zeroed[..] } else { data };
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(contents),
                usage: wgpu::BufferUsages::STORAGE | usage,
            })
    }

    fn zeroed(&self, label: &str, size: u64, usage: wgpu::BufferUsages) -> wgpu::Buffer {
        // wgpu zero-initializes buffers that are not mapped at creation.
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size.max(JOB_SIZE),
            usage: wgpu::BufferUsages::STORAGE | usage,
            mapped_at_creation: false,
        })
    }

    fn dispatch(
        &self,
        scene: &WgpuScene,
        kernel: Kernel,
        params: KernelParams,
        invocations: usize,
        bound: Bound<'_>,
    ) {
        if invocations == 0 {
            return;
        }
        let params_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("PatchMatch Params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let [spare_cells, spare_jobs, spare_per_neighbor, spare_aggregated, spare_selected] =
            &scene.spare;
        let buffers = [
            &params_buffer,
            &scene.images,
            &scene.rigs,
            &scene.regions,
            bound.cells.unwrap_or(spare_cells),
            bound.jobs.unwrap_or(spare_jobs),
            bound.per_neighbor.unwrap_or(spare_per_neighbor),
            bound.aggregated.unwrap_or(spare_aggregated),
            bound.selected.unwrap_or(spare_selected),
        ];
        let entries = buffers
            .iter()
            .zip(0..)
            .map(|(buffer, binding)| wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            })
            .collect::<Vec<_>>();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.entry_point()),
            layout: &self.layout,
            entries: &entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.entry_point()),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.entry_point()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines[kernel as usize]);
            pass.set_bind_group(0, &bind_group, &[]);
            let (x, y) = workgroups(invocations);
            pass.dispatch_workgroups(x, y, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Copies the first `len` elements of `buffer` back to the host.
    fn read<T: Pod>(&self, buffer: &wgpu::Buffer, len: usize) -> Option<Vec<T>> {
        if len == 0 {
            return Some(vec![]);
        }
        let size = (len * size_of::<T>()) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("PatchMatch Readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("PatchMatch Readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        let index = self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |mapped| {
            let _ = sender.send(mapped);
        });
        if let Err(e) = self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(index),
            timeout: None,
        }) {
            error!("Waiting on {} failed: {}", self.adapter.name, e);
            return None;
        }
        match receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Mapping a readback buffer failed: {}", e);
                return None;
            }
            Err(_) => return None,
        }
        let data = slice.get_mapped_range();
        let values = bytemuck::cast_slice::<u8, T>(&data).to_vec();
        drop(data);
        staging.unmap();
        Some(values)
    }

    fn allocate(&self, label: &str, len: usize, element: u64) -> GpuBuffer {
        GpuBuffer {
            buffer: self.zeroed(label, len as u64 * element, wgpu::BufferUsages::COPY_SRC),
            len,
        }
    }
}

/// Workgroups covering `invocations`, spread over a second dimension past the limit of one.
fn workgroups(invocations: usize) -> (u32, u32) {
    let groups = ((invocations as u64 + WORKGROUP_SIZE - 1) / WORKGROUP_SIZE).max(1);
    let x = groups.min(MAX_WORKGROUPS);
    let y = (groups + x - 1) / x;
    (x as u32, y as u32)
}

fn rows(matrix: &Matrix3<f64>) -> [[f32; 4]; 3] {
    let mut rows = [[0.0; 4]; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().take(3).enumerate() {
            *value = matrix[(r, c)] as f32;
        }
    }
    rows
}

fn parity(color: Color) -> u32 {
    match color {
        Color::Red => 0,
        Color::Black => 1,
    }
}

impl ComputeDevice for WgpuDevice {
    type Scene = WgpuScene;
    type Cells = GpuBuffer;
    type Jobs = GpuBuffer;
    type Costs = GpuBuffer;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn supports(&self, metric: MetricKind) -> bool {
        metric == MetricKind::Ncc
    }

    fn load_scene(&self, ctx: &ScaleContext) -> Result<WgpuScene> {
        let kind = ctx.metric.kind();
        if !self.supports(kind) {
            return Err(Error::InvalidSettings(format!(
                "the wgpu device has no kernel for the {:?} metric",
                kind
            )));
        }
        let neighbors = ctx.rigs.len();
        if neighbors > MAX_NEIGHBORS {
            return Err(Error::InvalidSettings(format!(
                "the wgpu device aggregates at most {} neighbors, got {}",
                MAX_NEIGHBORS, neighbors
            )));
        }
        let largest = (ctx.pixels() * PROPOSALS * neighbors.max(1) * size_of::<f32>()) as u64;
        let limit = u64::from(self.device.limits().max_storage_buffer_binding_size);
        if largest > limit {
            return Err(Error::InvalidSettings(format!(
                "scale {} needs a {} byte buffer but {} binds at most {}",
                ctx.scale, largest, self.adapter.name, limit
            )));
        }

        let reference = ctx.metric.reference();
        let mut images = reference.intensity().iter().copied().collect::<Vec<f32>>();
        let mut rigs = Vec::with_capacity(neighbors);
        for (neighbor, rig) in ctx.rigs.iter().enumerate() {
            let image = ctx.metric.neighbor_image(neighbor);
            let (homography, translation) = rig.homography_terms();
            rigs.push(GpuRig {
                homography: rows(&homography),
                translation: [
                    translation.x as f32,
                    translation.y as f32,
                    translation.z as f32,
                    0.0,
                ],
                offset: images.len() as u32,
                width: image.width() as u32,
                height: image.height() as u32,
                border: image.border() as u32,
            });
            images.extend(image.intensity().iter().copied());
        }

        let slots = ctx.policy.regions();
        let mut regions = Vec::with_capacity(slots.len());
        let mut start = slots.len();
        for region in slots {
            regions.push([start as i32, region.len() as i32]);
            start += region.len();
        }
        for region in slots {
            regions.extend(region.iter().map(|&(dr, dc)| [dr as i32, dc as i32]));
        }

        let (disparity_min, disparity_max) = ctx.disparity_range;
        let params = KernelParams {
            inverse_intrinsics: rows(ctx.camera.inverse_intrinsics()),
            width: ctx.width as u32,
            height: ctx.height as u32,
            count: 0,
            stride: 1,
            neighbors: neighbors as u32,
            slot: 0,
            parity: 0,
            round: 0,
            seed_lo: 0,
            seed_hi: 0,
            aggregation: ctx.aggregator.count as u32,
            border: reference.border() as u32,
            window_radius: ctx.window.radius as u32,
            window_step: ctx.window.step as u32,
            pad: [0; 2],
            max_cost: ctx.max_cost() as f32,
            depth_min: ctx.depth_range.min as f32,
            depth_max: ctx.depth_range.max as f32,
            disparity_scale: ctx.disparity.scale as f32,
            disparity_min: disparity_min as f32,
            disparity_max: disparity_max as f32,
            radius: 0.0,
            angle: 0.0,
        };
        debug!(
            "Uploaded {} intensities and {} rigs to {}",
            images.len(),
            rigs.len(),
            self.adapter.name
        );
        let none = wgpu::BufferUsages::empty();
        Ok(WgpuScene {
            params,
            images: self.storage("PatchMatch Images", &images, none),
            rigs: self.storage("PatchMatch Rigs", &rigs, none),
            regions: self.storage("PatchMatch Regions", &regions, none),
            spare: [
                self.zeroed("PatchMatch Spare Cells", 0, none),
                self.zeroed("PatchMatch Spare Jobs", 0, none),
                self.zeroed("PatchMatch Spare Costs", 0, none),
                self.zeroed("PatchMatch Spare Aggregate", 0, none),
                self.zeroed("PatchMatch Spare Output", 0, none),
            ],
        })
    }

    fn upload_cells(&self, _scene: &WgpuScene, field: &DepthField) -> GpuBuffer {
        let cells = field.cells().iter().map(GpuCell::from).collect::<Vec<_>>();
        GpuBuffer {
            buffer: self.storage("PatchMatch Cells", &cells, wgpu::BufferUsages::COPY_SRC),
            len: cells.len(),
        }
    }

    fn download_cells(&self, _scene: &WgpuScene, cells: &GpuBuffer, field: &mut DepthField) {
        let downloaded = match self.read::<GpuCell>(&cells.buffer, cells.len) {
            Some(downloaded) if downloaded.len() == field.cells().len() => downloaded,
            _ => {
                error!("Failed to read cells back from {}", self.adapter.name);
                return;
            }
        };
        for (cell, gpu) in field.cells_mut().iter_mut().zip(downloaded) {
            *cell = gpu.to_cell();
        }
    }

    fn allocate_jobs(&self, _scene: &WgpuScene, len: usize) -> GpuBuffer {
        self.allocate("PatchMatch Jobs", len, JOB_SIZE)
    }

    fn allocate_costs(&self, _scene: &WgpuScene, len: usize) -> GpuBuffer {
        self.allocate("PatchMatch Costs", len, size_of::<f32>() as u64)
    }

    fn download_costs(&self, _scene: &WgpuScene, costs: &GpuBuffer) -> Vec<f64> {
        match self.read::<f32>(&costs.buffer, costs.len) {
            Some(costs) => costs.into_iter().map(f64::from).collect(),
            None => {
                error!("Failed to read costs back from {}", self.adapter.name);
                vec![]
            }
        }
    }

    fn current_hypotheses(
        &self,
        _ctx: &ScaleContext,
        scene: &WgpuScene,
        cells: &GpuBuffer,
        jobs: &mut GpuBuffer,
    ) {
        let params = KernelParams {
            count: jobs.len as u32,
            ..scene.params
        };
        let bound = Bound {
            cells: Some(&cells.buffer),
            jobs: Some(&jobs.buffer),
            ..Bound::default()
        };
        self.dispatch(scene, Kernel::CurrentHypotheses, params, jobs.len, bound);
    }

    fn propagation_candidates(
        &self,
        _ctx: &ScaleContext,
        scene: &WgpuScene,
        cells: &GpuBuffer,
        color: Color,
        slot: usize,
        jobs: &mut GpuBuffer,
    ) {
        let params = KernelParams {
            count: jobs.len as u32,
            slot: slot as u32,
            parity: parity(color),
            ..scene.params
        };
        let bound = Bound {
            cells: Some(&cells.buffer),
            jobs: Some(&jobs.buffer),
            ..Bound::default()
        };
        self.dispatch(scene, Kernel::PropagationCandidates, params, jobs.len, bound);
    }

    fn refinement_proposals(
        &self,
        _ctx: &ScaleContext,
        scene: &WgpuScene,
        cells: &GpuBuffer,
        round: &RefineRound,
        jobs: &mut GpuBuffer,
    ) {
        let params = KernelParams {
            count: cells.len as u32,
            round: round.round as u32 + 1,
            seed_lo: round.seed as u32,
            seed_hi: (round.seed >> 32) as u32,
            radius: round.radius as f32,
            angle: round.angle as f32,
            ..scene.params
        };
        let bound = Bound {
            cells: Some(&cells.buffer),
            jobs: Some(&jobs.buffer),
            ..Bound::default()
        };
        self.dispatch(scene, Kernel::RefinementProposals, params, cells.len, bound);
    }

    fn neighbor_costs(
        &self,
        _ctx: &ScaleContext,
        scene: &WgpuScene,
        jobs: &GpuBuffer,
        stride: usize,
        costs: &mut GpuBuffer,
    ) {
        let params = KernelParams {
            count: jobs.len as u32,
            stride: stride as u32,
            ..scene.params
        };
        let bound = Bound {
            jobs: Some(&jobs.buffer),
            per_neighbor: Some(&costs.buffer),
            ..Bound::default()
        };
        self.dispatch(scene, Kernel::NeighborCosts, params, costs.len, bound);
    }

    fn aggregate(
        &self,
        _ctx: &ScaleContext,
        scene: &WgpuScene,
        jobs: &GpuBuffer,
        neighbor_costs: &GpuBuffer,
        costs: &mut GpuBuffer,
    ) {
        let params = KernelParams {
            count: jobs.len as u32,
            ..scene.params
        };
        let bound = Bound {
            jobs: Some(&jobs.buffer),
            per_neighbor: Some(&neighbor_costs.buffer),
            aggregated: Some(&costs.buffer),
            ..Bound::default()
        };
        self.dispatch(scene, Kernel::Aggregate, params, jobs.len, bound);
    }

    fn select(
        &self,
        scene: &WgpuScene,
        input: &GpuBuffer,
        jobs: &GpuBuffer,
        costs: &GpuBuffer,
        stride: usize,
        output: &mut GpuBuffer,
    ) {
        let params = KernelParams {
            count: output.len as u32,
            stride: stride as u32,
            ..scene.params
        };
        let bound = Bound {
            cells: Some(&input.buffer),
            jobs: Some(&jobs.buffer),
            aggregated: Some(&costs.buffer),
            selected: Some(&output.buffer),
            ..Bound::default()
        };
        self.dispatch(scene, Kernel::Select, params, output.len, bound);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_the_shader() {
        assert_eq!(size_of::<KernelParams>(), 144);
        assert_eq!(size_of::<GpuRig>(), 80);
        assert_eq!(size_of::<GpuCell>(), 32);
    }

    #[test]
    fn large_dispatches_spill_into_a_second_dimension() {
        assert_eq!(workgroups(1), (1, 1));
        assert_eq!(workgroups(256), (1, 1));
        assert_eq!(workgroups(257), (2, 1));
        let (x, y) = workgroups(300 * 65535 * 256);
        assert_eq!(x, 65535);
        assert_eq!(y, 300);
    }

    #[test]
    fn cells_survive_the_trip_through_f32() {
        let normal = Unit::new_normalize(Vector3::new(0.2, -0.3, -1.0));
        let cell = FieldCell {
            cost: 0.25,
            depth: 3.5,
            plane: Plane::new(normal, 3.0),
        };
        let back = GpuCell::from(&cell).to_cell();
        assert_eq!(back.cost, 0.25);
        assert_eq!(back.depth, 3.5);
        assert!((back.plane.normal.into_inner() - normal.into_inner()).norm() < 1e-6);
        assert!((back.plane.normal.norm() - 1.0).abs() < 1e-12);
    }
}
