//! Views on a solved field: images for inspection and a colored point cloud.

use crate::{DepthField, ViewImage};
use image::{GrayImage, Luma, Rgb, RgbImage};
use mvs_camera::nalgebra::{Point2, Point3};
use mvs_camera::Camera;
use palette::{FromColor, Hsv, RgbHue, Srgb};
use ply_rs::{
    ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    },
    writer::Writer,
};
use std::io::{self, Write};

/// Color of the camera marker vertices.
const CAMERA_COLOR: [u8; 3] = [255, 0, 255];

/// Depth as a grayscale image, near bright and far dark.
///
/// Depths are stretched over the range of the valid pixels, those with a cost below
/// `max_cost`. Invalid pixels are black.
pub fn depth_image(field: &DepthField, max_cost: f64) -> GrayImage {
    let valid = |cost: f64| cost < max_cost;
    let (near, far) = field
        .cells()
        .iter()
        .filter(|cell| valid(cell.cost))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(near, far), cell| {
            (near.min(cell.depth), far.max(cell.depth))
        });
    let span = (far - near).max(f64::EPSILON);
    GrayImage::from_fn(field.width() as u32, field.height() as u32, |x, y| {
        let cell = field.get(y as usize, x as usize);
        if !valid(cell.cost) {
            return Luma([0]);
        }
        let t = ((far - cell.depth) / span).clamp(0.0, 1.0);
        Luma([1 + (t * 254.0).round() as u8])
    })
}

/// Cost as a heat map from blue (zero) to red (`max_cost` and above).
pub fn cost_heatmap(field: &DepthField, max_cost: f64) -> RgbImage {
    RgbImage::from_fn(field.width() as u32, field.height() as u32, |x, y| {
        let cost = field.get(y as usize, x as usize).cost;
        let t = (cost / max_cost).clamp(0.0, 1.0) as f32;
        let hsv = Hsv::new(RgbHue::from_degrees(240.0 * (1.0 - t)), 1.0, 1.0);
        let rgb = Srgb::from_color(hsv);
        Rgb([
            (rgb.red * 255.0) as u8,
            (rgb.green * 255.0) as u8,
            (rgb.blue * 255.0) as u8,
        ])
    })
}

/// Normals in the camera frame mapped from `[-1, 1]` to `[0, 255]` per axis.
/// Invalid pixels are black.
pub fn normal_image(field: &DepthField, max_cost: f64) -> RgbImage {
    RgbImage::from_fn(field.width() as u32, field.height() as u32, |x, y| {
        let cell = field.get(y as usize, x as usize);
        if cell.cost >= max_cost {
            return Rgb([0, 0, 0]);
        }
        let n = cell.plane.normal;
        let channel = |v: f64| ((v + 1.0) * 0.5 * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgb([channel(n.x), channel(n.y), channel(n.z)])
    })
}

/// Back-projects every pixel with a cost below `max_cost` into the world.
///
/// Colors come from the color channel of `image` when it has one, from its intensity
/// otherwise, and are mid gray without an image.
pub fn point_cloud(
    field: &DepthField,
    camera: &Camera,
    image: Option<&ViewImage>,
    max_cost: f64,
) -> Vec<(Point3<f64>, [u8; 3])> {
    let color_at = |row: usize, col: usize| -> [u8; 3] {
        match image {
            Some(image) if row < image.height() && col < image.width() => match image.color() {
                Some(color) => color[[row, col]],
                None => {
                    let v = image.intensity_at(row, col).round().clamp(0.0, 255.0) as u8;
                    [v, v, v]
                }
            },
            _ => [128, 128, 128],
        }
    };
    let mut points = vec![];
    for row in 0..field.height() {
        for col in 0..field.width() {
            let cell = field.get(row, col);
            if cell.cost < max_cost && cell.depth.is_finite() {
                let point = camera.unproject(&Point2::new(col as f64, row as f64), cell.depth);
                points.push((point, color_at(row, col)));
            }
        }
    }
    points
}

/// Five vertices outlining the camera: its center and the corners of its image plane
/// placed at distance `size` along the optical axis.
pub fn camera_marker(camera: &Camera, size: f64) -> Vec<(Point3<f64>, [u8; 3])> {
    let (width, height) = (camera.width() as f64, camera.height() as f64);
    let corners = [
        (0.0, 0.0),
        (width - 1.0, 0.0),
        (width - 1.0, height - 1.0),
        (0.0, height - 1.0),
    ];
    std::iter::once(camera.center())
        .chain(
            corners
                .iter()
                .map(|&(x, y)| camera.unproject(&Point2::new(x, y), size)),
        )
        .map(|point| (point, CAMERA_COLOR))
        .collect()
}

/// Writes `points` as an ASCII PLY of vertices with `x y z red green blue` properties.
pub fn write_ply(mut writer: impl Write, points: &[(Point3<f64>, [u8; 3])]) -> io::Result<usize> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header
        .comments
        .push("Exported from mvs-patchmatch".to_string());

    let mut point_element = ElementDef::new("vertex".to_string());
    for axis in ["x", "y", "z"] {
        let p = PropertyDef::new(axis.to_string(), PropertyType::Scalar(ScalarType::Double));
        point_element.properties.add(p);
    }
    for channel in ["red", "green", "blue"] {
        let p = PropertyDef::new(channel.to_string(), PropertyType::Scalar(ScalarType::UChar));
        point_element.properties.add(p);
    }
    ply.header.elements.add(point_element);

    let vertices = points
        .iter()
        .map(|&(p, [r, g, b])| {
            let mut point = DefaultElement::new();
            point.insert("x".to_string(), Property::Double(p.x));
            point.insert("y".to_string(), Property::Double(p.y));
            point.insert("z".to_string(), Property::Double(p.z));
            point.insert("red".to_string(), Property::UChar(r));
            point.insert("green".to_string(), Property::UChar(g));
            point.insert("blue".to_string(), Property::UChar(b));
            point
        })
        .collect::<Vec<_>>();
    ply.payload.insert("vertex".to_string(), vertices);

    Writer::new().write_ply(&mut writer, &mut ply)
}
