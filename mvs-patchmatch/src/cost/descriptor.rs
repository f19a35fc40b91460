use super::{CostMetric, MetricKind};
use crate::{ImageId, ViewImage};
use derive_more::Deref;
use image::{ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;
use log::*;
use mvs_camera::nalgebra::{Matrix3, Point2};
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, PoisonError, RwLock};

/// Number of gradient orientations histograms are made of.
pub const ORIENTATIONS: usize = 8;
/// Number of histograms on each ring.
pub const RING_POINTS: usize = 8;
/// Number of rings around the center histogram.
pub const RINGS: usize = 2;
/// Length of a descriptor.
pub const DESCRIPTOR_LEN: usize = (1 + RINGS * RING_POINTS) * ORIENTATIONS;

/// Layout of the Daisy-like descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorParams {
    /// Radius of the outer ring in pixels.
    pub radius: f64,
}

impl DescriptorParams {
    pub fn new(radius: f64) -> Self {
        Self { radius }
    }

    /// Smoothing of the center histogram followed by that of each ring.
    pub fn sigmas(&self) -> [f32; RINGS + 1] {
        let r = self.radius as f32;
        [r / 4.0, r / 3.0, r / 2.0]
    }

    fn ring_radius(&self, ring: usize) -> f64 {
        self.radius * (ring + 1) as f64 / RINGS as f64
    }
}

/// A descriptor for every pixel of one image, stored contiguously in row-major order.
#[derive(Debug, Clone, PartialEq, Deref)]
pub struct DescriptorField {
    width: usize,
    height: usize,
    #[deref]
    data: Vec<f32>,
}

impl DescriptorField {
    pub fn compute(image: &ViewImage, params: &DescriptorParams) -> Self {
        let (height, width) = (image.height(), image.width());
        // The blurred layers of valid pixels reach into the border.
        let gradient = crate::image::gradient(image.intensity(), 0);
        let layers = params
            .sigmas()
            .iter()
            .map(|&sigma| {
                (0..ORIENTATIONS)
                    .map(|orientation| {
                        let angle = 2.0 * PI * orientation as f64 / ORIENTATIONS as f64;
                        let (sin, cos) = (angle.sin() as f32, angle.cos() as f32);
                        let layer = gradient.map(|&[gx, gy]| (gx * cos + gy * sin).max(0.0));
                        blur(&layer, sigma)
                    })
                    .collect::<Vec<Array2<f32>>>()
            })
            .collect::<Vec<_>>();

        let mut data = vec![0.0f32; width * height * DESCRIPTOR_LEN];
        data.par_chunks_mut(width * DESCRIPTOR_LEN)
            .enumerate()
            .for_each(|(row, descriptors)| {
                for (col, descriptor) in descriptors.chunks_mut(DESCRIPTOR_LEN).enumerate() {
                    let mut histograms = descriptor.chunks_mut(ORIENTATIONS);
                    if let Some(histogram) = histograms.next() {
                        sample_histogram(&layers[0], row as f64, col as f64, histogram);
                    }
                    for ring in 0..RINGS {
                        let radius = params.ring_radius(ring);
                        for point in 0..RING_POINTS {
                            let angle = 2.0 * PI * point as f64 / RING_POINTS as f64;
                            if let Some(histogram) = histograms.next() {
                                sample_histogram(
                                    &layers[ring + 1],
                                    row as f64 + radius * angle.sin(),
                                    col as f64 + radius * angle.cos(),
                                    histogram,
                                );
                            }
                        }
                    }
                }
            });
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn descriptor(&self, row: usize, col: usize) -> &[f32] {
        let start = (row * self.width + col) * DESCRIPTOR_LEN;
        &self.data[start..start + DESCRIPTOR_LEN]
    }
}

fn blur(layer: &Array2<f32>, sigma: f32) -> Array2<f32> {
    let (height, width) = layer.dim();
    let buffer: Option<ImageBuffer<Luma<f32>, Vec<f32>>> =
        ImageBuffer::from_raw(width as u32, height as u32, layer.iter().copied().collect());
    match buffer {
        Some(buffer) => {
            let blurred = gaussian_blur_f32(&buffer, sigma);
            Array2::from_shape_fn((height, width), |(row, col)| {
                blurred[(col as u32, row as u32)][0]
            })
        }
        None => layer.clone(),
    }
}

/// Reads one histogram from the nearest pixel and L2 normalizes it. Every histogram is
/// further scaled so that a whole descriptor has unit length.
fn sample_histogram(layers: &[Array2<f32>], row: f64, col: f64, histogram: &mut [f32]) {
    let (height, width) = layers[0].dim();
    let row = (row.round().max(0.0) as usize).min(height - 1);
    let col = (col.round().max(0.0) as usize).min(width - 1);
    for (bin, layer) in histogram.iter_mut().zip(layers) {
        *bin = layer[[row, col]];
    }
    let norm = histogram.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 1e-6 {
        let scale = 1.0 / (norm * ((1 + RINGS * RING_POINTS) as f32).sqrt());
        histogram.iter_mut().for_each(|v| *v *= scale);
    }
}

/// Descriptors memoized per image for the duration of a solve session.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    fields: RwLock<HashMap<ImageId, Arc<DescriptorField>>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The descriptors of `image`, computed on the first request for its identity.
    pub fn get_or_compute(
        &self,
        image: &ViewImage,
        params: &DescriptorParams,
    ) -> Arc<DescriptorField> {
        let id = image.id();
        if let Some(field) = self
            .fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            return field.clone();
        }
        debug!(
            "Computing descriptors of camera {} at scale {}",
            id.camera, id.scale
        );
        let field = Arc::new(DescriptorField::compute(image, params));
        self.fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_insert(field)
            .clone()
    }

    pub fn contains(&self, id: &ImageId) -> bool {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every descriptor computed at `scale`.
    pub fn evict_scale(&self, scale: usize) {
        self.fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id, _| id.scale != scale);
    }

    pub fn clear(&self) {
        self.fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Distance between the descriptor of a reference pixel and that of the neighbor pixel
/// its center warps to, `2 (1 - exp(-|a - b|²))`.
pub struct DescriptorMetric {
    reference: Arc<ViewImage>,
    neighbors: Vec<Arc<ViewImage>>,
    reference_descriptors: Arc<DescriptorField>,
    neighbor_descriptors: Vec<Arc<DescriptorField>>,
}

impl DescriptorMetric {
    pub const MAX_COST: f64 = 2.0;

    pub fn new(
        params: DescriptorParams,
        reference: Arc<ViewImage>,
        neighbors: Vec<Arc<ViewImage>>,
        cache: Arc<DescriptorCache>,
    ) -> Self {
        let reference_descriptors = cache.get_or_compute(&reference, &params);
        let neighbor_descriptors = neighbors
            .iter()
            .map(|image| cache.get_or_compute(image, &params))
            .collect();
        Self {
            reference,
            neighbors,
            reference_descriptors,
            neighbor_descriptors,
        }
    }
}

impl CostMetric for DescriptorMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::Descriptor
    }

    fn max_cost(&self) -> f64 {
        Self::MAX_COST
    }

    fn neighbors(&self) -> usize {
        self.neighbors.len()
    }

    fn reference(&self) -> &ViewImage {
        &self.reference
    }

    fn neighbor_image(&self, neighbor: usize) -> &ViewImage {
        &self.neighbors[neighbor]
    }

    fn cost(&self, neighbor: usize, row: usize, col: usize, homography: &Matrix3<f64>) -> f64 {
        if !self.reference.contains_pixel(row as isize, col as isize) {
            return Self::MAX_COST;
        }
        let other = &self.neighbors[neighbor];
        let q = match mvs_camera::warp(homography, &Point2::new(col as f64, row as f64)) {
            Some(q) if other.contains(q.x, q.y) => q,
            _ => return Self::MAX_COST,
        };
        let a = self.reference_descriptors.descriptor(row, col);
        let b = self.neighbor_descriptors[neighbor]
            .descriptor(q.y.round() as usize, q.x.round() as usize);
        let distance2: f64 = a
            .iter()
            .zip(b)
            .map(|(&a, &b)| f64::from(a - b).powi(2))
            .sum();
        (2.0 * (1.0 - (-distance2).exp())).clamp(0.0, Self::MAX_COST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Channels;

    fn image(camera: usize, scale: usize) -> ViewImage {
        let intensity = Array2::from_shape_fn((24, 32), |(row, col)| {
            128.0 + 60.0 * ((row as f32 * 0.7).sin() * (col as f32 * 0.45).cos())
        });
        ViewImage::from_intensity(ImageId::new(camera, scale), intensity, 4, Channels::intensity())
    }

    #[test]
    fn descriptors_have_unit_length() {
        let field = DescriptorField::compute(&image(0, 0), &DescriptorParams::new(6.0));
        assert_eq!(field.len(), 24 * 32 * DESCRIPTOR_LEN);
        let norm = field
            .descriptor(12, 16)
            .iter()
            .map(|v| v * v)
            .sum::<f32>()
            .sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm {}", norm);
    }

    #[test]
    fn cache_memoizes_and_evicts() {
        let cache = DescriptorCache::new();
        let params = DescriptorParams::new(4.0);
        let first = cache.get_or_compute(&image(0, 0), &params);
        let again = cache.get_or_compute(&image(0, 0), &params);
        assert!(Arc::ptr_eq(&first, &again));
        cache.get_or_compute(&image(1, 0), &params);
        cache.get_or_compute(&image(1, 1), &params);
        assert_eq!(cache.len(), 3);
        cache.evict_scale(0);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&ImageId::new(1, 1)));
        cache.clear();
        assert!(cache.is_empty());
    }
}
