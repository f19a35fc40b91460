//! PatchMatch multi-view stereo.
//!
//! Estimates a depth and a surface normal for every pixel of a reference image by
//! matching it against a handful of neighbor views. Every pixel holds a plane hypothesis
//! that is scored by warping a window through the homography the plane induces in each
//! neighbor. Hypotheses spread to nearby pixels and get randomly perturbed until they
//! stop improving. Solving happens coarse to fine over an image pyramid.
//!
//! The usual flow is to prepare a [`Workspace`] from calibrated cameras and images, run a
//! [`Solver`] over it and turn the resulting [`DepthField`] into images or a point cloud
//! with the functions in [`export`].
//!
//! ```no_run
//! use mvs_patchmatch::{PatchMatchSettings, Solver, Workspace};
//! use rand::SeedableRng;
//! use rand_pcg::Pcg64;
//!
//! let settings = PatchMatchSettings::default();
//! let workspace = Workspace::for_settings("workspace", &settings);
//! let mut solver = Solver::new(settings, &workspace)?;
//! let field = solver.solve_camera(0, &mut Pcg64::seed_from_u64(0))?;
//! println!("{:.1}% of pixels matched", 100.0 * field.valid_fraction(2.0));
//! # Ok::<(), mvs_patchmatch::Error>(())
//! ```

mod aggregate;
mod cost;
mod error;
pub mod export;
mod field;
mod image;
mod settings;
mod solver;
mod workspace;

pub use crate::image::*;
pub use aggregate::*;
pub use cost::*;
pub use error::*;
pub use field::*;
pub use settings::*;
pub use solver::*;
pub use workspace::*;

pub use mvs_camera;
