use super::{propagate_pixel, refine_pixel, Backend, ScaleContext};
use crate::{Color, DepthField, Error, FieldCell, Result};
use log::*;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Runs every phase on the CPU, partitioning the grid by row.
///
/// Without a dedicated pool the work goes to rayon's global pool.
#[derive(Default)]
pub struct CpuBackend {
    pool: Option<ThreadPool>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with its own pool of `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("patchmatch-{}", index))
            .build()
            .map_err(|e| Error::InvalidSettings(format!("cannot build thread pool: {}", e)))?;
        info!("Using a pool of {} threads", threads);
        Ok(Self { pool: Some(pool) })
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn compute_costs(&mut self, ctx: &ScaleContext, field: &mut DepthField) {
        let width = field.width();
        self.install(|| {
            field
                .cells_mut()
                .par_chunks_mut(width)
                .enumerate()
                .for_each(|(row, cells)| {
                    for (col, cell) in cells.iter_mut().enumerate() {
                        cell.cost = ctx.evaluate(row, col, &cell.plane);
                    }
                });
        });
    }

    fn propagate(&mut self, ctx: &ScaleContext, field: &mut DepthField, color: Color) {
        let (width, height) = (field.width(), field.height());
        let snapshot: &DepthField = field;
        // Pixels of `color` only read the other color, so every update is computed
        // against the unchanged field and written after the whole half-step.
        let updates = self.install(|| {
            (0..height)
                .into_par_iter()
                .flat_map_iter(|row| {
                    color.columns(row, width).filter_map(move |col| {
                        propagate_pixel(ctx, snapshot, row, col, snapshot.get(row, col))
                            .map(|cell| (row, col, cell))
                    })
                })
                .collect::<Vec<(usize, usize, FieldCell)>>()
        });
        trace!("Propagation ({:?}) improved {} pixels", color, updates.len());
        for (row, col, cell) in updates {
            *field.get_mut(row, col) = cell;
        }
    }

    fn refine(&mut self, ctx: &ScaleContext, field: &mut DepthField, seed: u64) {
        let width = field.width();
        self.install(|| {
            field
                .cells_mut()
                .par_chunks_mut(width)
                .enumerate()
                .for_each(|(row, cells)| {
                    for (col, cell) in cells.iter_mut().enumerate() {
                        refine_pixel(ctx, row, col, cell, seed);
                    }
                });
        });
    }
}
