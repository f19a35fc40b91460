//! # MVS Camera
//!
//! Geometric model shared by the multi-view stereo crates in this workspace: pinhole
//! intrinsics, posed cameras with their derived projection matrices, plane hypotheses,
//! the plane-induced homography between two cameras, depth/disparity conversion, and the
//! view selection that picks which neighbors a reference camera is matched against.
//!
//! ## Conventions
//!
//! A [`Camera`] maps a world point `X` into its own frame with `R·X + t`. The camera
//! frame has X pointing right, Y pointing down and Z pointing forwards, the same as the
//! image, whose pixel `(u, v)` is `(column, row)`. Depth is the Z coordinate of a point in
//! the camera frame, not its distance from the optical center.
//!
//! A [`Plane`] is expressed in the frame of the reference camera as `n·X + d = 0`. With the
//! relative pose `(R, t)` of a neighbor stored in a [`StereoRig`], every point on that plane
//! satisfies `R·X + t = (R − t·nᵀ/d)·X`, which is where the homography
//! `K_o·(R − t·nᵀ/d)·K_r⁻¹` comes from:
//!
//! ```text
//!            n·X + d = 0
//!      --------X-------------
//!             / \
//!            /   \
//!   @@@@@@@@p@@   @@@q@@@@@@@
//!          /         \
//!         O_r         O_o
//! ```
//!
//! The pixel `p` in the reference and the pixel `q` in the neighbor see the same point `X`
//! exactly when `q ~ H·p`.

mod camera;
mod disparity;
mod error;
mod intrinsics;
mod plane;
mod record;
mod rig;
mod selection;

pub use camera::*;
pub use disparity::*;
pub use error::*;
pub use intrinsics::*;
pub use nalgebra;
pub use plane::*;
pub use record::*;
pub use rig::*;
pub use selection::*;
