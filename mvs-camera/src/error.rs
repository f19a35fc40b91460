use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid depth range [{min}, {max}], bounds must be finite, positive and ordered")]
    InvalidDepthRange { min: f64, max: f64 },
    #[error("intrinsic matrix is singular or not finite")]
    SingularIntrinsics,
    #[error("image dimensions {width}x{height} are empty")]
    EmptyImage { width: u32, height: u32 },
    #[error("camera {camera} lists neighbor {neighbor} which is not part of the scene")]
    UnknownNeighbor { camera: usize, neighbor: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
