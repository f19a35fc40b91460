use crate::BaselineStats;
use nalgebra::{Matrix3, Matrix3x4, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// The persisted form of a [`Camera`](crate::Camera).
///
/// Derived matrices are stored for consumers that read the record directly, but they are
/// recomputed from `intrinsics`, `rotation` and `translation` when a camera is rebuilt
/// from a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub intrinsics: Matrix3<f64>,
    pub inverse_intrinsics: Matrix3<f64>,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub center: Point3<f64>,
    pub projection: Matrix3x4<f64>,
    /// `(K·R)⁻¹`
    pub inverse_kr: Matrix3<f64>,
    pub image_path: Option<String>,
    pub width: u32,
    pub height: u32,
    pub observations: Vec<Point3<f64>>,
    pub min_depth: f64,
    pub max_depth: f64,
    pub baseline: BaselineStats,
    pub neighbors: Vec<usize>,
}
