use mvs_camera::nalgebra::{Point2, Unit, Vector3};
use mvs_camera::{Camera, DepthRange, Plane};
use serde::{Deserialize, Serialize};

/// The hypothesis stored for one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldCell {
    /// Aggregated cost, the metric's maximum while unknown.
    pub cost: f64,
    pub depth: f64,
    pub plane: Plane,
}

/// Read access to a field, regardless of where its cells live.
pub trait FieldView {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    fn cost(&self, row: usize, col: usize) -> f64;

    fn plane(&self, row: usize, col: usize) -> Plane;
}

/// One of the two classes of the checkerboard propagation schedule.
///
/// A pixel is red when `row + col` is even. Every candidate offset used by propagation
/// changes the parity, so a half-step only reads the other color while it writes its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Red,
    Black,
}

impl Color {
    pub const BOTH: [Color; 2] = [Color::Red, Color::Black];

    #[inline]
    pub fn of(row: usize, col: usize) -> Self {
        if (row + col) % 2 == 0 {
            Color::Red
        } else {
            Color::Black
        }
    }

    /// Columns of `row` with this color.
    pub fn columns(self, row: usize, width: usize) -> impl Iterator<Item = usize> {
        let first = match (self, row % 2) {
            (Color::Red, 0) | (Color::Black, 1) => 0,
            _ => 1,
        };
        (first..width).step_by(2)
    }

    /// Every pixel of this color as `(row, col)`, row-major.
    pub fn pixels(self, width: usize, height: usize) -> impl Iterator<Item = (usize, usize)> {
        (0..height).flat_map(move |row| self.columns(row, width).map(move |col| (row, col)))
    }
}

/// Depth, plane and cost of every pixel of one camera at one scale, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthField {
    width: usize,
    height: usize,
    cells: Vec<FieldCell>,
}

impl DepthField {
    pub fn filled(width: usize, height: usize, cell: FieldCell) -> Self {
        Self {
            width,
            height,
            cells: vec![cell; width * height],
        }
    }

    pub fn from_cells(width: usize, height: usize, cells: Vec<FieldCell>) -> Option<Self> {
        (cells.len() == width * height).then(|| Self {
            width,
            height,
            cells,
        })
    }

    /// Builds a field by evaluating `f` at every pixel.
    pub fn from_fn(
        width: usize,
        height: usize,
        mut f: impl FnMut(usize, usize) -> FieldCell,
    ) -> Self {
        let cells = (0..height)
            .flat_map(|row| (0..width).map(move |col| (row, col)))
            .map(|(row, col)| f(row, col))
            .collect();
        Self {
            width,
            height,
            cells,
        }
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> &FieldCell {
        &self.cells[row * self.width + col]
    }

    #[inline]
    pub fn get_mut(&mut self, row: usize, col: usize) -> &mut FieldCell {
        &mut self.cells[row * self.width + col]
    }

    pub fn cells(&self) -> &[FieldCell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [FieldCell] {
        &mut self.cells
    }

    pub fn into_cells(self) -> Vec<FieldCell> {
        self.cells
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Fraction of pixels with a cost below `max_cost`.
    pub fn valid_fraction(&self, max_cost: f64) -> f64 {
        if self.cells.is_empty() {
            return 0.0;
        }
        let valid = self.cells.iter().filter(|c| c.cost < max_cost).count();
        valid as f64 / self.cells.len() as f64
    }

    /// Mean of the costs below `max_cost`, `None` when there are none.
    pub fn mean_valid_cost(&self, max_cost: f64) -> Option<f64> {
        let (sum, count) = self
            .cells
            .iter()
            .filter(|c| c.cost < max_cost)
            .fold((0.0, 0usize), |(sum, count), c| (sum + c.cost, count + 1));
        (count != 0).then(|| sum / count as f64)
    }

    /// Resamples the field to the next finer scale.
    ///
    /// `camera` is the camera at the target scale. Depth and cost are interpolated
    /// bilinearly. Normals are summed with the same weights and renormalized, then each
    /// plane is rebuilt through the interpolated depth on the target pixel's ray so it
    /// faces the camera. Depths are clamped to `depth_range`.
    pub fn upscale(
        &self,
        width: usize,
        height: usize,
        camera: &Camera,
        depth_range: &DepthRange,
    ) -> Self {
        let scale_x = self.width as f64 / width as f64;
        let scale_y = self.height as f64 / height as f64;
        Self::from_fn(width, height, |row, col| {
            let x = ((col as f64 + 0.5) * scale_x - 0.5).clamp(0.0, (self.width - 1) as f64);
            let y = ((row as f64 + 0.5) * scale_y - 0.5).clamp(0.0, (self.height - 1) as f64);
            let (col0, row0) = (x.floor() as usize, y.floor() as usize);
            let (col1, row1) = ((col0 + 1).min(self.width - 1), (row0 + 1).min(self.height - 1));
            let (fx, fy) = (x - col0 as f64, y - row0 as f64);
            let corners = [
                (self.get(row0, col0), (1.0 - fx) * (1.0 - fy)),
                (self.get(row0, col1), fx * (1.0 - fy)),
                (self.get(row1, col0), (1.0 - fx) * fy),
                (self.get(row1, col1), fx * fy),
            ];
            let mut depth = 0.0;
            let mut cost = 0.0;
            let mut normal = Vector3::zeros();
            for (cell, weight) in corners.iter() {
                depth += weight * cell.depth;
                cost += weight * cell.cost;
                normal += cell.plane.normal.into_inner() * *weight;
            }
            let normal = Unit::try_new(normal, 1e-9).unwrap_or(corners[0].0.plane.normal);
            let ray = camera.local_ray(&Point2::new(col as f64, row as f64));
            let depth = depth_range.clamp(depth);
            FieldCell {
                cost,
                depth,
                plane: Plane::from_depth(normal, &ray, depth).facing(&ray),
            }
        })
    }
}

impl FieldView for DepthField {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn cost(&self, row: usize, col: usize) -> f64 {
        self.cells[row * self.width + col].cost
    }

    #[inline]
    fn plane(&self, row: usize, col: usize) -> Plane {
        self.cells[row * self.width + col].plane
    }
}
