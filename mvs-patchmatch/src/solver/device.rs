//! The device abstraction the accelerator backend is written against.
//!
//! A device holds four kinds of resources: the scene of one scale (images, relative poses
//! and metric parameters), field cells, the hypotheses a phase tests ("jobs") and their
//! costs. The backend never reaches into device memory. It runs every phase as a sequence
//! of the named kernels of [`ComputeDevice`] and only moves cells between host and device
//! at the start and end of a phase.

use super::{pixel_rng, refine_proposals, Hypothesis, ScaleContext};
use crate::{Color, DepthField, FieldCell, FieldView, MetricKind, Result};
use mvs_camera::nalgebra::{Unit, Vector3};
use mvs_camera::Plane;
use rayon::prelude::*;

/// Number of proposals a refinement round tests per pixel.
pub const PROPOSALS: usize = 3;

/// The parameters of one refinement round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineRound {
    /// Seed of the refinement phase.
    pub seed: u64,
    /// Index of the round, starting at zero.
    pub round: usize,
    /// Disparity radius of the perturbation.
    pub radius: f64,
    /// Half angle in radians of the normal perturbation cone.
    pub angle: f64,
}

/// Buffers and kernels of one compute device.
///
/// Every kernel writes one element per invocation and reads only buffers it does not
/// write, so invocations may run concurrently and in any order. A job buffer holding
/// `stride` jobs per pixel assigns job `j` to pixel `j / stride`.
pub trait ComputeDevice: Send {
    /// Read-only resources of one scale of one camera.
    type Scene: Send;
    /// One cell per pixel.
    type Cells: Send;
    /// Hypotheses under test. Any of them may be absent.
    type Jobs: Send;
    type Costs: Send;

    fn name(&self) -> &'static str;

    /// Whether [`ComputeDevice::neighbor_costs`] implements `metric`.
    fn supports(&self, metric: MetricKind) -> bool;

    /// Moves the images, relative poses and parameters of `ctx` onto the device.
    fn load_scene(&self, ctx: &ScaleContext) -> Result<Self::Scene>;

    fn upload_cells(&self, scene: &Self::Scene, field: &DepthField) -> Self::Cells;

    /// Overwrites `field` with `cells`, which must have its dimensions.
    fn download_cells(&self, scene: &Self::Scene, cells: &Self::Cells, field: &mut DepthField);

    fn allocate_jobs(&self, scene: &Self::Scene, len: usize) -> Self::Jobs;

    fn allocate_costs(&self, scene: &Self::Scene, len: usize) -> Self::Costs;

    fn download_costs(&self, scene: &Self::Scene, costs: &Self::Costs) -> Vec<f64>;

    /// `jobs[pixel]`: the hypothesis stored in `cells[pixel]`.
    fn current_hypotheses(
        &self,
        ctx: &ScaleContext,
        scene: &Self::Scene,
        cells: &Self::Cells,
        jobs: &mut Self::Jobs,
    );

    /// `jobs[pixel]`: the plane of candidate `slot` of every pixel of `color`, read from
    /// `cells` and recomputed on the pixel's ray. Pixels of the other color get none.
    fn propagation_candidates(
        &self,
        ctx: &ScaleContext,
        scene: &Self::Scene,
        cells: &Self::Cells,
        color: Color,
        slot: usize,
        jobs: &mut Self::Jobs,
    );

    /// `jobs[pixel * PROPOSALS + k]`: proposal `k` of `round` around `cells[pixel]`.
    fn refinement_proposals(
        &self,
        ctx: &ScaleContext,
        scene: &Self::Scene,
        cells: &Self::Cells,
        round: &RefineRound,
        jobs: &mut Self::Jobs,
    );

    /// `costs[neighbor * len(jobs) + job]`: the cost of every job against every neighbor.
    /// A missing job costs the maximum.
    fn neighbor_costs(
        &self,
        ctx: &ScaleContext,
        scene: &Self::Scene,
        jobs: &Self::Jobs,
        stride: usize,
        costs: &mut Self::Costs,
    );

    /// `costs[job]`: the per-neighbor costs of the job sorted and reduced by the
    /// aggregator. A missing job costs the maximum.
    fn aggregate(
        &self,
        ctx: &ScaleContext,
        scene: &Self::Scene,
        jobs: &Self::Jobs,
        neighbor_costs: &Self::Costs,
        costs: &mut Self::Costs,
    );

    /// `output[pixel]`: `input[pixel]`, replaced in job order by every job of the pixel
    /// that costs less than the cell kept so far.
    fn select(
        &self,
        scene: &Self::Scene,
        input: &Self::Cells,
        jobs: &Self::Jobs,
        costs: &Self::Costs,
        stride: usize,
        output: &mut Self::Cells,
    );
}

/// A buffer of a [`HostDevice`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceBuffer<T> {
    data: Vec<T>,
}

impl<T: Clone> DeviceBuffer<T> {
    pub fn filled(len: usize, value: T) -> Self {
        Self {
            data: vec![value; len],
        }
    }
}

impl<T> DeviceBuffer<T> {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

/// Executes the kernels on the host, data-parallel over rayon's pool, in `f64`.
///
/// Every kernel reuses the per-pixel steps of the CPU backend, so both backends produce
/// the same field for the same seed.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDevice;

impl ComputeDevice for HostDevice {
    type Scene = ();
    type Cells = DeviceField;
    type Jobs = DeviceBuffer<Option<Hypothesis>>;
    type Costs = DeviceBuffer<f64>;

    fn name(&self) -> &'static str {
        "host"
    }

    fn supports(&self, _metric: MetricKind) -> bool {
        true
    }

    fn load_scene(&self, _ctx: &ScaleContext) -> Result<()> {
        Ok(())
    }

    fn upload_cells(&self, _scene: &(), field: &DepthField) -> DeviceField {
        DeviceField::upload(field)
    }

    fn download_cells(&self, _scene: &(), cells: &DeviceField, field: &mut DepthField) {
        *field = cells.download();
    }

    fn allocate_jobs(&self, _scene: &(), len: usize) -> Self::Jobs {
        DeviceBuffer::filled(len, None)
    }

    fn allocate_costs(&self, _scene: &(), len: usize) -> Self::Costs {
        DeviceBuffer::filled(len, 0.0)
    }

    fn download_costs(&self, _scene: &(), costs: &Self::Costs) -> Vec<f64> {
        costs.data.clone()
    }

    fn current_hypotheses(
        &self,
        _ctx: &ScaleContext,
        _scene: &(),
        cells: &DeviceField,
        jobs: &mut Self::Jobs,
    ) {
        jobs.data.par_iter_mut().enumerate().for_each(|(pixel, job)| {
            let cell = cells.cell(pixel);
            *job = Some(Hypothesis {
                depth: cell.depth,
                plane: cell.plane,
            });
        });
    }

    fn propagation_candidates(
        &self,
        ctx: &ScaleContext,
        _scene: &(),
        cells: &DeviceField,
        color: Color,
        slot: usize,
        jobs: &mut Self::Jobs,
    ) {
        let width = cells.width;
        jobs.data.par_iter_mut().enumerate().for_each(|(pixel, job)| {
            let (row, col) = (pixel / width, pixel % width);
            *job = if Color::of(row, col) == color {
                ctx.policy
                    .candidate(slot, cells, row, col)
                    .and_then(|(r, c)| ctx.hypothesis(row, col, &cells.plane(r, c)))
            } else {
                None
            };
        });
    }

    fn refinement_proposals(
        &self,
        ctx: &ScaleContext,
        _scene: &(),
        cells: &DeviceField,
        round: &RefineRound,
        jobs: &mut Self::Jobs,
    ) {
        let width = cells.width;
        jobs.data
            .par_chunks_mut(PROPOSALS)
            .enumerate()
            .for_each(|(pixel, proposals)| {
                let (row, col) = (pixel / width, pixel % width);
                let mut rng = pixel_rng(round.seed, row, col, round.round + 1);
                let start = cells.cell(pixel);
                let proposed =
                    refine_proposals(ctx, row, col, &start, round.radius, round.angle, &mut rng);
                proposals.copy_from_slice(&proposed);
            });
    }

    fn neighbor_costs(
        &self,
        ctx: &ScaleContext,
        _scene: &(),
        jobs: &Self::Jobs,
        stride: usize,
        costs: &mut Self::Costs,
    ) {
        let (count, width, max_cost) = (jobs.len(), ctx.width, ctx.max_cost());
        costs.data.par_iter_mut().enumerate().for_each(|(index, cost)| {
            let (neighbor, job) = (index / count, index % count);
            *cost = match &jobs.data[job] {
                Some(hypothesis) => {
                    let pixel = job / stride;
                    ctx.neighbor_cost(neighbor, pixel / width, pixel % width, &hypothesis.plane)
                }
                None => max_cost,
            };
        });
    }

    fn aggregate(
        &self,
        ctx: &ScaleContext,
        _scene: &(),
        jobs: &Self::Jobs,
        neighbor_costs: &Self::Costs,
        costs: &mut Self::Costs,
    ) {
        let (count, neighbors, max_cost) = (jobs.len(), ctx.rigs.len(), ctx.max_cost());
        costs.data.par_iter_mut().enumerate().for_each(|(job, cost)| {
            *cost = if jobs.data[job].is_none() {
                max_cost
            } else {
                let mut gathered = (0..neighbors)
                    .map(|neighbor| neighbor_costs.data[neighbor * count + job])
                    .collect::<Vec<f64>>();
                ctx.aggregator.aggregate(&mut gathered)
            };
        });
    }

    fn select(
        &self,
        _scene: &(),
        input: &DeviceField,
        jobs: &Self::Jobs,
        costs: &Self::Costs,
        stride: usize,
        output: &mut DeviceField,
    ) {
        output
            .costs
            .data
            .par_iter_mut()
            .zip(output.depths.data.par_iter_mut())
            .zip(output.planes.data.par_iter_mut())
            .enumerate()
            .for_each(|(pixel, ((cost, depth), plane))| {
                let mut best = input.cell(pixel);
                for job in pixel * stride..(pixel + 1) * stride {
                    if let Some(hypothesis) = &jobs.data[job] {
                        if costs.data[job] < best.cost {
                            best = hypothesis.with_cost(costs.data[job]);
                        }
                    }
                }
                *cost = best.cost;
                *depth = best.depth;
                *plane = best.plane.to_array();
            });
    }
}

/// A depth field split into one buffer per attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceField {
    pub width: usize,
    pub height: usize,
    pub costs: DeviceBuffer<f64>,
    pub depths: DeviceBuffer<f64>,
    /// Normal followed by offset.
    pub planes: DeviceBuffer<[f64; 4]>,
}

impl DeviceField {
    pub fn upload(field: &DepthField) -> Self {
        let cells = field.cells();
        Self {
            width: field.width(),
            height: field.height(),
            costs: DeviceBuffer {
                data: cells.iter().map(|cell| cell.cost).collect(),
            },
            depths: DeviceBuffer {
                data: cells.iter().map(|cell| cell.depth).collect(),
            },
            planes: DeviceBuffer {
                data: cells.iter().map(|cell| cell.plane.to_array()).collect(),
            },
        }
    }

    pub fn download(&self) -> DepthField {
        DepthField::from_fn(self.width, self.height, |row, col| {
            self.cell(row * self.width + col)
        })
    }

    #[inline]
    pub fn cell(&self, index: usize) -> FieldCell {
        FieldCell {
            cost: self.costs.data[index],
            depth: self.depths.data[index],
            plane: plane_from_array(&self.planes.data[index]),
        }
    }
}

/// Stored normals are unit length, so they are taken as they are.
#[inline]
fn plane_from_array(plane: &[f64; 4]) -> Plane {
    Plane::new(
        Unit::new_unchecked(Vector3::new(plane[0], plane[1], plane[2])),
        plane[3],
    )
}

impl FieldView for DeviceField {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn cost(&self, row: usize, col: usize) -> f64 {
        self.costs.data[row * self.width + col]
    }

    #[inline]
    fn plane(&self, row: usize, col: usize) -> Plane {
        plane_from_array(&self.planes.data[row * self.width + col])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> DepthField {
        DepthField::from_fn(5, 3, |row, col| {
            let normal = Unit::new_normalize(Vector3::new(col as f64 * 0.1, -0.2, -1.0));
            FieldCell {
                cost: (row * 5 + col) as f64 * 0.01,
                depth: 2.0 + row as f64,
                plane: Plane::new(normal, 2.0 + col as f64),
            }
        })
    }

    #[test]
    fn field_marshalling_is_lossless() {
        let field = field();
        let uploaded = DeviceField::upload(&field);
        assert_eq!(uploaded.cost(2, 4), field.get(2, 4).cost);
        assert_eq!(uploaded.cell(7), *field.get(1, 2));
        assert_eq!(uploaded.download(), field);
    }

    #[test]
    fn select_keeps_cheaper_jobs_in_order() {
        let device = HostDevice;
        let field = field();
        let input = device.upload_cells(&(), &field);
        let mut output = device.upload_cells(&(), &field);
        let plane = Plane::fronto_parallel(3.0);
        let hypothesis = Some(Hypothesis { depth: 3.0, plane });
        let mut jobs = device.allocate_jobs(&(), 2 * 15);
        let mut costs = device.allocate_costs(&(), 2 * 15);
        // Pixel 0 improves twice, pixel 1 only ties, pixel 2 has no hypothesis.
        jobs.data[0] = hypothesis;
        jobs.data[1] = Some(Hypothesis { depth: 4.0, ..hypothesis.unwrap() });
        costs.data[..2].copy_from_slice(&[-1.0, -2.0]);
        jobs.data[2] = hypothesis;
        costs.data[2] = field.cells()[1].cost;
        costs.data[4] = -5.0;
        device.select(&(), &input, &jobs, &costs, 2, &mut output);

        let mut selected = field.clone();
        device.download_cells(&(), &output, &mut selected);
        assert_eq!(selected.cells()[0].cost, -2.0);
        assert_eq!(selected.cells()[0].depth, 4.0);
        assert_eq!(selected.cells()[1], field.cells()[1]);
        assert_eq!(selected.cells()[2], field.cells()[2]);
        assert_eq!(&selected.cells()[3..], &field.cells()[3..]);
    }
}
