//! Generation of plane hypotheses and the per-pixel steps that test them.
//!
//! Every random draw comes from a PCG stream derived from a phase seed, the pixel and the
//! refinement round. The order in which pixels are visited, or which thread visits them,
//! never changes the outcome.

use super::ScaleContext;
use crate::{DepthField, FieldCell, FieldView};
use mvs_camera::nalgebra::{Unit, Vector3};
use mvs_camera::Plane;
use rand::Rng;
use rand_pcg::Pcg32;
use rayon::prelude::*;
use std::f64::consts::PI;
use std::iter::successors;

/// Hard cap on refinement rounds, reached only with a degenerate threshold.
const MAX_REFINE_ROUNDS: usize = 64;

/// A plane proposed for one pixel together with the depth it implies there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hypothesis {
    pub depth: f64,
    pub plane: Plane,
}

impl Hypothesis {
    pub fn with_cost(self, cost: f64) -> FieldCell {
        FieldCell {
            cost,
            depth: self.depth,
            plane: self.plane,
        }
    }
}

fn splitmix(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// The random stream of one pixel in one round of a phase.
///
/// Round `0` is reserved for initialization.
pub fn pixel_rng(seed: u64, row: usize, col: usize, round: usize) -> Pcg32 {
    let state = splitmix(seed ^ splitmix(round as u64));
    let stream = ((row as u64) << 32) | col as u64;
    Pcg32::new(state, stream)
}

/// A unit vector drawn uniformly from the spherical cap of half angle `angle` around `axis`.
pub fn random_unit_in_cone(
    rng: &mut impl Rng,
    axis: &Unit<Vector3<f64>>,
    angle: f64,
) -> Unit<Vector3<f64>> {
    let cos_max = angle.clamp(0.0, PI).cos();
    let z = cos_max + (1.0 - cos_max) * rng.gen::<f64>();
    let phi = 2.0 * PI * rng.gen::<f64>();
    let radial = (1.0 - z * z).max(0.0).sqrt();
    let helper = if axis.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = axis.cross(&helper).normalize();
    let v = axis.cross(&u);
    Unit::new_normalize(axis.into_inner() * z + (u * phi.cos() + v * phi.sin()) * radial)
}

/// A random hypothesis for `(row, col)`: uniform in disparity, normal within the
/// initialization cone around the reversed viewing ray. Its cost is unknown.
pub fn initial_cell(ctx: &ScaleContext, row: usize, col: usize, rng: &mut impl Rng) -> FieldCell {
    let (min, max) = ctx.disparity_range;
    let disparity = min + (max - min) * rng.gen::<f64>();
    let depth = ctx
        .disparity
        .disparity_to_depth(disparity)
        .map(|depth| ctx.depth_range.clamp(depth))
        .unwrap_or(ctx.depth_range.max);
    let ray = ctx.ray(row, col);
    let axis = Unit::new_normalize(-ray);
    let normal = random_unit_in_cone(rng, &axis, ctx.init_cone);
    FieldCell {
        cost: ctx.max_cost(),
        depth,
        plane: Plane::from_depth(normal, &ray, depth).facing(&ray),
    }
}

/// A random field for the coarsest scale.
pub fn initial_field(ctx: &ScaleContext, seed: u64) -> DepthField {
    let far = ctx.depth_range.max;
    let mut field = DepthField::filled(
        ctx.width,
        ctx.height,
        FieldCell {
            cost: ctx.max_cost(),
            depth: far,
            plane: Plane::fronto_parallel(far),
        },
    );
    let width = ctx.width;
    field
        .cells_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(index, cell)| {
            let (row, col) = (index / width, index % width);
            *cell = initial_cell(ctx, row, col, &mut pixel_rng(seed, row, col, 0));
        });
    field
}

/// Perturbation radii of the refinement rounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineSchedule {
    /// Disparity radius of the first round.
    pub start_radius: f64,
    /// Normal cone half angle of the first round, in radians.
    pub start_angle: f64,
    pub threshold: f64,
}

impl RefineSchedule {
    /// `(radius, angle)` of every round. Both halve each round and the rounds end once
    /// the radius drops below the threshold.
    pub fn rounds(&self) -> impl Iterator<Item = (f64, f64)> {
        let threshold = self.threshold;
        successors(Some((self.start_radius, self.start_angle)), |&(radius, angle)| {
            Some((radius / 2.0, angle / 2.0))
        })
        .take_while(move |&(radius, _)| radius >= threshold)
        .take(MAX_REFINE_ROUNDS)
    }
}

/// The three proposals of one refinement round, all derived from `cell` as it was when
/// the round started: new depth and normal, new depth only, new normal only.
///
/// The random draws happen in a fixed order so every backend sees the same proposals.
pub fn refine_proposals(
    ctx: &ScaleContext,
    row: usize,
    col: usize,
    cell: &FieldCell,
    radius: f64,
    angle: f64,
    rng: &mut impl Rng,
) -> [Option<Hypothesis>; 3] {
    let ray = ctx.ray(row, col);
    let (min, max) = ctx.disparity_range;
    let disparity = ctx.disparity.depth_to_disparity(cell.depth).unwrap_or(min);
    let perturbed = (disparity + radius * (2.0 * rng.gen::<f64>() - 1.0)).clamp(min, max);
    let depth = ctx
        .disparity
        .disparity_to_depth(perturbed)
        .map(|depth| ctx.depth_range.clamp(depth));
    let normal = random_unit_in_cone(rng, &cell.plane.normal, angle);

    let propose = |normal: Unit<Vector3<f64>>, depth: f64| {
        depth.is_finite().then(|| Hypothesis {
            depth,
            plane: Plane::from_depth(normal, &ray, depth).facing(&ray),
        })
    };
    [
        depth.and_then(|depth| propose(normal, depth)),
        depth.and_then(|depth| propose(cell.plane.normal, depth)),
        propose(normal, cell.depth),
    ]
}

/// Runs every refinement round on one pixel, keeping any proposal that lowers its cost.
pub fn refine_pixel(ctx: &ScaleContext, row: usize, col: usize, cell: &mut FieldCell, seed: u64) {
    for (round, (radius, angle)) in ctx.schedule().rounds().enumerate() {
        let mut rng = pixel_rng(seed, row, col, round + 1);
        let start = *cell;
        for proposal in refine_proposals(ctx, row, col, &start, radius, angle, &mut rng)
            .iter()
            .flatten()
        {
            let cost = ctx.evaluate(row, col, &proposal.plane);
            if cost < cell.cost {
                *cell = proposal.with_cost(cost);
            }
        }
    }
}

/// Tries the plane of every propagation candidate of `(row, col)`, with the depth
/// recomputed on this pixel's ray. Returns the improved cell, or `None` if no candidate
/// beat `current`.
pub fn propagate_pixel<V: FieldView + ?Sized>(
    ctx: &ScaleContext,
    view: &V,
    row: usize,
    col: usize,
    current: &FieldCell,
) -> Option<FieldCell> {
    let mut best = *current;
    let mut improved = false;
    for slot in 0..ctx.policy.slots() {
        let hypothesis = ctx
            .policy
            .candidate(slot, view, row, col)
            .and_then(|(r, c)| ctx.hypothesis(row, col, &view.plane(r, c)));
        if let Some(hypothesis) = hypothesis {
            let cost = ctx.evaluate(row, col, &hypothesis.plane);
            if cost < best.cost {
                best = hypothesis.with_cost(cost);
                improved = true;
            }
        }
    }
    improved.then(|| best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_halves_and_terminates() {
        let schedule = RefineSchedule {
            start_radius: 8.0,
            start_angle: 1.0,
            threshold: 0.01,
        };
        let rounds = schedule.rounds().collect::<Vec<_>>();
        // 8 / 2^9 = 0.015625 is the last radius above 0.01.
        assert_eq!(rounds.len(), 10);
        for pair in rounds.windows(2) {
            assert_eq!(pair[1].0, pair[0].0 / 2.0);
            assert_eq!(pair[1].1, pair[0].1 / 2.0);
        }
        assert!(rounds.iter().all(|&(radius, _)| radius >= 0.01));

        let degenerate = RefineSchedule {
            start_radius: 1.0,
            start_angle: 1.0,
            threshold: 0.0,
        };
        assert_eq!(degenerate.rounds().count(), MAX_REFINE_ROUNDS);
        let empty = RefineSchedule {
            start_radius: f64::NAN,
            start_angle: 1.0,
            threshold: 0.01,
        };
        assert_eq!(empty.rounds().count(), 0);
    }

    #[test]
    fn pixel_streams_are_reproducible() {
        let a = pixel_rng(7, 3, 4, 1).gen::<u64>();
        assert_eq!(a, pixel_rng(7, 3, 4, 1).gen::<u64>());
        assert_ne!(a, pixel_rng(7, 4, 3, 1).gen::<u64>());
        assert_ne!(a, pixel_rng(7, 3, 4, 2).gen::<u64>());
        assert_ne!(a, pixel_rng(8, 3, 4, 1).gen::<u64>());
    }

    #[test]
    fn cone_samples_stay_in_cone() {
        let mut rng = pixel_rng(1, 0, 0, 0);
        let axes = [
            Vector3::z_axis(),
            -Vector3::x_axis(),
            Unit::new_normalize(Vector3::new(0.3, -0.2, -1.0)),
        ];
        for axis in axes.iter() {
            for &angle in &[0.0, 0.2, 1.0, PI / 2.0] {
                for _ in 0..200 {
                    let sample = random_unit_in_cone(&mut rng, axis, angle);
                    assert!((sample.norm() - 1.0).abs() < 1e-9);
                    assert!(sample.dot(&axis.into_inner()) >= angle.cos() - 1e-9);
                }
            }
        }
    }
}
