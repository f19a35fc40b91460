//! Per camera, per scale image channels.
//!
//! Intensity is always present. Gradient and census signatures are only computed when the
//! active metric asks for them, see [`MetricKind::required_channels`](crate::MetricKind).

use crate::{Error, Result};
use image::{DynamicImage, RgbImage};
use log::*;
use ndarray::{azip, s, Array2, Zip};
use serde::{Deserialize, Serialize};

/// Half width of the census window.
pub const CENSUS_HALF_WIDTH: usize = 4;
/// Half height of the census window.
pub const CENSUS_HALF_HEIGHT: usize = 3;
/// Number of bits of a census signature, a 9x7 window without its center.
pub const CENSUS_BITS: usize = (2 * CENSUS_HALF_WIDTH + 1) * (2 * CENSUS_HALF_HEIGHT + 1) - 1;

/// Identifies one level of one camera's image pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId {
    pub camera: usize,
    pub scale: usize,
}

impl ImageId {
    pub fn new(camera: usize, scale: usize) -> Self {
        Self { camera, scale }
    }
}

/// The optional channels an image carries besides intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Channels {
    pub gradient: bool,
    pub census: bool,
    pub color: bool,
}

impl Channels {
    pub fn intensity() -> Self {
        Self::default()
    }

    pub fn with_gradient(self) -> Self {
        Self {
            gradient: true,
            ..self
        }
    }

    pub fn with_census(self) -> Self {
        Self {
            census: true,
            ..self
        }
    }

    pub fn with_color(self) -> Self {
        Self {
            color: true,
            ..self
        }
    }

    /// Whether every channel of `other` is also present in `self`.
    pub fn covers(&self, other: &Channels) -> bool {
        (self.gradient || !other.gradient)
            && (self.census || !other.census)
            && (self.color || !other.color)
    }
}

/// Gray level image with its derived channels.
///
/// Intensity is in `[0, 255]`. All arrays are indexed `[row, column]`. Content closer than
/// `border` pixels to an edge is treated as invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewImage {
    id: ImageId,
    border: usize,
    intensity: Array2<f32>,
    gradient: Option<Array2<[f32; 2]>>,
    census: Option<Array2<u64>>,
    color: Option<Array2<[u8; 3]>>,
}

impl ViewImage {
    /// Computes the requested channels from an intensity array.
    pub fn from_intensity(
        id: ImageId,
        intensity: Array2<f32>,
        border: usize,
        channels: Channels,
    ) -> Self {
        let gradient = channels.gradient.then(|| gradient(&intensity, border));
        let census = channels.census.then(|| census(&intensity, border));
        Self {
            id,
            border,
            intensity,
            gradient,
            census,
            color: None,
        }
    }

    /// Converts a decoded image into the finest level of a pyramid.
    pub fn from_dynamic(
        id: ImageId,
        image: &DynamicImage,
        border: usize,
        channels: Channels,
    ) -> Self {
        let gray = image.to_luma8();
        let (width, height) = gray.dimensions();
        info!("Loaded a {} x {} image for camera {}", width, height, id.camera);
        let intensity = Array2::from_shape_fn((height as usize, width as usize), |(row, col)| {
            f32::from(gray[(col as u32, row as u32)][0])
        });
        let mut view = Self::from_intensity(id, intensity, border, channels);
        if channels.color {
            view.color = Some(color_array(&image.to_rgb8()));
        }
        view
    }

    /// Assembles an image from stored channels.
    pub fn from_parts(
        id: ImageId,
        border: usize,
        intensity: Array2<f32>,
        gradient: Option<Array2<[f32; 2]>>,
        census: Option<Array2<u64>>,
        color: Option<Array2<[u8; 3]>>,
    ) -> Result<Self> {
        let expected = intensity.dim();
        let mismatch = [
            gradient.as_ref().map(|a| a.dim()),
            census.as_ref().map(|a| a.dim()),
            color.as_ref().map(|a| a.dim()),
        ]
        .into_iter()
        .flatten()
        .find(|&found| found != expected);
        if let Some(found) = mismatch {
            return Err(Error::DimensionMismatch { expected, found });
        }
        Ok(Self {
            id,
            border,
            intensity,
            gradient,
            census,
            color,
        })
    }

    pub fn with_color(self, color: Array2<[u8; 3]>) -> Result<Self> {
        if color.dim() != self.intensity.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.intensity.dim(),
                found: color.dim(),
            });
        }
        Ok(Self {
            color: Some(color),
            ..self
        })
    }

    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn border(&self) -> usize {
        self.border
    }

    pub fn width(&self) -> usize {
        self.intensity.ncols()
    }

    pub fn height(&self) -> usize {
        self.intensity.nrows()
    }

    pub fn channels(&self) -> Channels {
        Channels {
            gradient: self.gradient.is_some(),
            census: self.census.is_some(),
            color: self.color.is_some(),
        }
    }

    pub fn intensity(&self) -> &Array2<f32> {
        &self.intensity
    }

    pub fn gradient(&self) -> Option<&Array2<[f32; 2]>> {
        self.gradient.as_ref()
    }

    pub fn census(&self) -> Option<&Array2<u64>> {
        self.census.as_ref()
    }

    pub fn color(&self) -> Option<&Array2<[u8; 3]>> {
        self.color.as_ref()
    }

    /// Whether the sub-pixel position `(x, y)` lies in the valid content.
    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let border = self.border as f64;
        x >= border
            && y >= border
            && x <= (self.width() as f64 - 1.0 - border)
            && y <= (self.height() as f64 - 1.0 - border)
    }

    #[inline]
    pub fn contains_pixel(&self, row: isize, col: isize) -> bool {
        let border = self.border as isize;
        row >= border
            && col >= border
            && row < self.height() as isize - border
            && col < self.width() as isize - border
    }

    #[inline]
    pub fn intensity_at(&self, row: usize, col: usize) -> f32 {
        self.intensity[[row, col]]
    }

    /// Bilinear intensity at `(x, y)`.
    #[inline]
    pub fn sample_intensity(&self, x: f64, y: f64) -> f32 {
        let (corners, weights) = self.bilinear(x, y);
        corners
            .iter()
            .zip(weights.iter())
            .map(|(&(row, col), &w)| self.intensity[[row, col]] * w)
            .sum()
    }

    /// Bilinear gradient at `(x, y)`, zero when the gradient channel is absent.
    #[inline]
    pub fn sample_gradient(&self, x: f64, y: f64) -> [f32; 2] {
        let gradient = match &self.gradient {
            Some(gradient) => gradient,
            None => return [0.0; 2],
        };
        let (corners, weights) = self.bilinear(x, y);
        let mut sample = [0.0; 2];
        for (&(row, col), &w) in corners.iter().zip(weights.iter()) {
            let [gx, gy] = gradient[[row, col]];
            sample[0] += gx * w;
            sample[1] += gy * w;
        }
        sample
    }

    /// Census signature of the pixel nearest to `(x, y)`, zero when the channel is absent.
    #[inline]
    pub fn census_at(&self, x: f64, y: f64) -> u64 {
        match &self.census {
            Some(census) => {
                let col = (x.round().max(0.0) as usize).min(self.width() - 1);
                let row = (y.round().max(0.0) as usize).min(self.height() - 1);
                census[[row, col]]
            }
            None => 0,
        }
    }

    fn bilinear(&self, x: f64, y: f64) -> ([(usize, usize); 4], [f32; 4]) {
        let max_col = self.width() - 1;
        let max_row = self.height() - 1;
        let x = x.clamp(0.0, max_col as f64);
        let y = y.clamp(0.0, max_row as f64);
        let col0 = x.floor() as usize;
        let row0 = y.floor() as usize;
        let col1 = (col0 + 1).min(max_col);
        let row1 = (row0 + 1).min(max_row);
        let fx = (x - col0 as f64) as f32;
        let fy = (y - row0 as f64) as f32;
        (
            [(row0, col0), (row0, col1), (row1, col0), (row1, col1)],
            [
                (1.0 - fx) * (1.0 - fy),
                fx * (1.0 - fy),
                (1.0 - fx) * fy,
                fx * fy,
            ],
        )
    }

    /// The next pyramid level: every pixel is the mean of a 2x2 block, odd remainders are
    /// dropped. Derived channels are recomputed from the new intensity.
    pub fn half_size(&self) -> Self {
        let id = ImageId::new(self.id.camera, self.id.scale + 1);
        let intensity = half_size(&self.intensity);
        let mut view = Self::from_intensity(id, intensity, self.border, self.channels());
        view.color = self.color.as_ref().map(half_size_color);
        view
    }

    /// This image followed by `levels - 1` successively halved images.
    pub fn pyramid(self, levels: usize) -> Vec<Self> {
        let mut pyramid = Vec::with_capacity(levels);
        pyramid.push(self);
        for _ in 1..levels {
            let next = pyramid[pyramid.len() - 1].half_size();
            debug!(
                "Pyramid level {}: {} x {}",
                next.id.scale,
                next.width(),
                next.height()
            );
            pyramid.push(next);
        }
        pyramid
    }
}

fn color_array(rgb: &RgbImage) -> Array2<[u8; 3]> {
    let (width, height) = rgb.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(row, col)| {
        rgb[(col as u32, row as u32)].0
    })
}

fn half_size(full: &Array2<f32>) -> Array2<f32> {
    let (height, width) = (full.nrows() / 2, full.ncols() / 2);
    let mut half = Array2::zeros((height.max(1), width.max(1)));
    if height == 0 || width == 0 {
        half.fill(full.mean().unwrap_or(0.0));
        return half;
    }
    azip!((
        out in &mut half,
        window in full.slice(s![..height * 2, ..width * 2]).exact_chunks((2, 2)),
    ) {
        *out = window.sum() * 0.25;
    });
    half
}

fn half_size_color(full: &Array2<[u8; 3]>) -> Array2<[u8; 3]> {
    let (height, width) = ((full.nrows() / 2).max(1), (full.ncols() / 2).max(1));
    Array2::from_shape_fn((height, width), |(row, col)| {
        let mut sum = [0u32; 3];
        let mut count = 0;
        for r in 2 * row..(2 * row + 2).min(full.nrows()) {
            for c in 2 * col..(2 * col + 2).min(full.ncols()) {
                for (s, &v) in sum.iter_mut().zip(full[[r, c]].iter()) {
                    *s += u32::from(v);
                }
                count += 1;
            }
        }
        sum.map(|s| ((s + count / 2) / count.max(1)) as u8)
    })
}

/// Central differences inside a margin of `border` pixels, zero on the margin and on
/// the outermost pixels.
pub fn gradient(intensity: &Array2<f32>, border: usize) -> Array2<[f32; 2]> {
    let (height, width) = intensity.dim();
    let mut gradient = Array2::from_elem((height, width), [0.0f32; 2]);
    let margin = border.max(1);
    if height <= 2 * margin || width <= 2 * margin {
        return gradient;
    }
    Zip::indexed(gradient.slice_mut(s![margin..height - margin, margin..width - margin]))
        .par_for_each(|(row, col), g| {
            let (row, col) = (row + margin, col + margin);
            *g = [
                0.5 * (intensity[[row, col + 1]] - intensity[[row, col - 1]]),
                0.5 * (intensity[[row + 1, col]] - intensity[[row - 1, col]]),
            ];
        });
    gradient
}

/// 9x7 census transform. Bit `i` is set when the `i`-th neighbor in row-major window
/// order is darker than the center. Pixels on the `border` margin or whose window does
/// not fit get a zero signature.
pub fn census(intensity: &Array2<f32>, border: usize) -> Array2<u64> {
    let (height, width) = intensity.dim();
    let mut census = Array2::zeros((height, width));
    let (hw, hh) = (CENSUS_HALF_WIDTH, CENSUS_HALF_HEIGHT);
    let (mw, mh) = (border.max(hw), border.max(hh));
    if height <= 2 * mh || width <= 2 * mw {
        return census;
    }
    Zip::indexed(census.slice_mut(s![mh..height - mh, mw..width - mw])).par_for_each(
        |(row, col), signature: &mut u64| {
            let (row, col) = (row + mh, col + mw);
            let center = intensity[[row, col]];
            let mut bit = 0;
            for r in row - hh..=row + hh {
                for c in col - hw..=col + hw {
                    if r == row && c == col {
                        continue;
                    }
                    if intensity[[r, c]] < center {
                        *signature |= 1u64 << bit;
                    }
                    bit += 1;
                }
            }
        },
    );
    census
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(height: usize, width: usize) -> Array2<f32> {
        Array2::from_shape_fn((height, width), |(row, col)| (2 * col + row) as f32)
    }

    #[test]
    fn only_requested_channels() {
        let image =
            ViewImage::from_intensity(ImageId::new(0, 0), ramp(20, 20), 4, Channels::intensity());
        assert!(image.gradient().is_none());
        assert!(image.census().is_none());
        let image = ViewImage::from_intensity(
            ImageId::new(0, 0),
            ramp(20, 20),
            4,
            Channels::intensity().with_census(),
        );
        assert!(image.gradient().is_none());
        assert!(image.census().is_some());
    }

    #[test]
    fn ramp_gradient() {
        let gradient = gradient(&ramp(10, 12), 0);
        assert_eq!(gradient[[5, 5]], [2.0, 1.0]);
        assert_eq!(gradient[[0, 5]], [0.0, 0.0]);
    }

    #[test]
    fn channels_skip_the_border() {
        let image = ViewImage::from_intensity(
            ImageId::new(0, 0),
            ramp(20, 30),
            4,
            Channels::intensity().with_gradient().with_census(),
        );
        let (gradient, census) = (image.gradient().unwrap(), image.census().unwrap());
        for row in 0..20 {
            for col in 0..30 {
                if image.contains_pixel(row as isize, col as isize) {
                    assert_eq!(gradient[[row, col]], [2.0, 1.0]);
                    assert_ne!(census[[row, col]], 0);
                } else {
                    assert_eq!(gradient[[row, col]], [0.0, 0.0]);
                    assert_eq!(census[[row, col]], 0);
                }
            }
        }
    }

    #[test]
    fn census_of_ramp() {
        let census = census(&ramp(12, 14), 0);
        let signature = census[[6, 7]];
        // Left and upper neighbors are darker on a ramp increasing right and down.
        assert!(signature.count_ones() > 0);
        assert!((signature.count_ones() as usize) < CENSUS_BITS);
        assert_eq!(signature >> CENSUS_BITS, 0);
        // The first bit is the top-left neighbor, which is darker.
        assert_eq!(signature & 1, 1);
    }

    #[test]
    fn border_is_invalid() {
        let image =
            ViewImage::from_intensity(ImageId::new(0, 0), ramp(20, 30), 4, Channels::intensity());
        assert!(image.contains(4.0, 4.0));
        assert!(image.contains(25.0, 15.0));
        assert!(!image.contains(25.5, 15.0));
        assert!(!image.contains(3.9, 10.0));
        assert!(image.contains_pixel(15, 25));
        assert!(!image.contains_pixel(16, 25));
    }

    #[test]
    fn bilinear_on_ramp() {
        let image =
            ViewImage::from_intensity(ImageId::new(0, 0), ramp(20, 30), 4, Channels::intensity());
        assert!((image.sample_intensity(10.25, 7.5) - (20.5 + 7.5)).abs() < 1e-4);
    }

    #[test]
    fn pyramid_halves() {
        let image = ViewImage::from_intensity(
            ImageId::new(3, 0),
            ramp(21, 30),
            4,
            Channels::intensity().with_gradient(),
        );
        let pyramid = image.pyramid(3);
        assert_eq!(pyramid.len(), 3);
        assert_eq!((pyramid[1].height(), pyramid[1].width()), (10, 15));
        assert_eq!((pyramid[2].height(), pyramid[2].width()), (5, 7));
        assert_eq!(pyramid[2].id(), ImageId::new(3, 2));
        assert!(pyramid[2].gradient().is_some());
        // Mean of (0,0)=0, (0,1)=2, (1,0)=1, (1,1)=3.
        assert_eq!(pyramid[1].intensity_at(0, 0), 1.5);
    }
}
