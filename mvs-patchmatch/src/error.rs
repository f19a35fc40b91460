use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode or decode a blob: {0}")]
    Codec(#[from] bincode::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("camera error: {0}")]
    Camera(#[from] mvs_camera::Error),
    #[error("unknown cost metric {0:?}")]
    UnknownMetric(String),
    #[error("unknown candidate policy {0:?}")]
    UnknownPolicy(String),
    #[error("unknown back-end {0:?}")]
    UnknownBackend(String),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("missing blob {}", .0.display())]
    MissingBlob(PathBuf),
    #[error("no camera {camera} at scale {scale}")]
    UnknownView { camera: usize, scale: usize },
    #[error("camera {0} has no neighbors to match against")]
    NoNeighbors(usize),
    #[error("failed to solve {} of {total} cameras: {:?}", .cameras.len(), .cameras)]
    CamerasFailed { cameras: Vec<usize>, total: usize },
    #[error("dimension mismatch: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
