//! A textured fronto-parallel plane seen by three cameras side by side.
#![allow(dead_code)]

use image::{DynamicImage, GrayImage, Luma};
use mvs_camera::nalgebra::{Point2, Rotation3, Vector2, Vector3};
use mvs_camera::{configure_views, Camera, CameraIntrinsics, DepthRange, ViewSelection};
use mvs_patchmatch::{Channels, ImageId, ViewImage};
use ndarray::Array2;
use rand::SeedableRng;
use rand_pcg::Pcg64;

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;
pub const FOCAL: f64 = 60.0;
/// Depth of the plane `Z = PLANE_DEPTH` in every camera.
pub const PLANE_DEPTH: f64 = 5.0;
pub const BASELINE: f64 = 0.3;
pub const BORDER: usize = 4;

fn lattice(i: i64, j: i64) -> f64 {
    let mut h = (i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ (j as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f);
    h ^= h >> 29;
    h = h.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    h ^= h >> 32;
    (h % 1024) as f64 / 1023.0
}

fn value_noise(x: f64, y: f64, cell: f64) -> f64 {
    let (x, y) = (x / cell, y / cell);
    let (i, j) = (x.floor(), y.floor());
    let (fx, fy) = (x - i, y - j);
    let (i, j) = (i as i64, j as i64);
    let top = lattice(i, j) * (1.0 - fx) + lattice(i + 1, j) * fx;
    let bottom = lattice(i, j + 1) * (1.0 - fx) + lattice(i + 1, j + 1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Intensity of the plane at world coordinates `(x, y)`.
pub fn texture(x: f64, y: f64) -> f32 {
    let value = 0.65 * value_noise(x, y, 0.2) + 0.35 * value_noise(x + 7.3, y - 2.1, 0.11);
    (30.0 + 195.0 * value) as f32
}

/// A camera centered at `(x, 0, 0)` looking down `+Z`.
pub fn camera_at(x: f64) -> Camera {
    Camera::new(
        CameraIntrinsics::identity()
            .focals(Vector2::new(FOCAL, FOCAL))
            .principal_point(Point2::new(31.5, 23.5)),
        Rotation3::identity(),
        Vector3::new(-x, 0.0, 0.0),
        WIDTH,
        HEIGHT,
    )
    .unwrap()
    .with_depth_range(DepthRange::new(3.0, 8.0).unwrap())
}

/// The reference camera at the origin and one neighbor on either side, with their
/// neighbors selected.
pub fn cameras() -> Vec<Camera> {
    let mut cameras = vec![camera_at(0.0), camera_at(-BASELINE), camera_at(BASELINE)];
    configure_views(
        &mut cameras,
        &ViewSelection::default(),
        &mut Pcg64::seed_from_u64(0),
    )
    .unwrap();
    cameras
}

pub fn render(camera: &Camera) -> Array2<f32> {
    Array2::from_shape_fn(
        (camera.height() as usize, camera.width() as usize),
        |(row, col)| {
            let point = camera.unproject(&Point2::new(col as f64, row as f64), PLANE_DEPTH);
            texture(point.x, point.y)
        },
    )
}

pub fn images(cameras: &[Camera], channels: Channels) -> Vec<ViewImage> {
    cameras
        .iter()
        .enumerate()
        .map(|(index, camera)| {
            ViewImage::from_intensity(ImageId::new(index, 0), render(camera), BORDER, channels)
        })
        .collect()
}

pub fn dynamic_images(cameras: &[Camera]) -> Vec<DynamicImage> {
    cameras
        .iter()
        .map(|camera| {
            let intensity = render(camera);
            DynamicImage::ImageLuma8(GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
                Luma([intensity[[y as usize, x as usize]].round() as u8])
            }))
        })
        .collect()
}
