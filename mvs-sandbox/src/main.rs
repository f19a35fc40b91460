mod scene;

use image::GenericImageView;
use log::*;
use mvs_camera::configure_views;
use mvs_patchmatch::export::{
    camera_marker, cost_heatmap, depth_image, normal_image, point_cloud, write_ply,
};
use mvs_patchmatch::{
    BackendKind, DepthField, Error, MetricKind, PatchMatchSettings, Result, Solver, ViewSource,
    Workspace,
};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use scene::SceneCamera;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use structopt::StructOpt;

/// Overrides the `threads` setting of the CPU back-end.
const THREADS_VAR: &str = "PATCHMATCH_THREADS";

#[derive(StructOpt)]
#[structopt(
    name = "mvs-sandbox",
    about = "A tool for running PatchMatch multi-view stereo"
)]
enum Opt {
    /// Writes the image pyramids and cameras of a scene into a workspace.
    Prepare {
        /// A JSON list of calibrated cameras.
        #[structopt(long, parse(from_os_str))]
        scene: PathBuf,
        #[structopt(short, long, parse(from_os_str))]
        workspace: PathBuf,
        /// The file where settings are specified.
        ///
        /// This is in the format of `mvs_patchmatch::PatchMatchSettings`.
        #[structopt(short, long, default_value = "patchmatch-settings.json")]
        settings: PathBuf,
    },
    /// Solves the depth maps of a prepared workspace.
    Solve {
        #[structopt(short, long, parse(from_os_str))]
        workspace: PathBuf,
        #[structopt(short, long, default_value = "patchmatch-settings.json")]
        settings: PathBuf,
        /// Cameras to solve, every camera when none are given
        #[structopt(short, long)]
        camera: Vec<usize>,
        /// cpu or accelerator
        #[structopt(long)]
        backend: Option<BackendKind>,
        /// ncc, patch_match, census_ad, bilateral_ncc or descriptor
        #[structopt(long)]
        metric: Option<MetricKind>,
        #[structopt(long)]
        seed: Option<u64>,
    },
    /// Writes the depth, cost and normal images and a point cloud of a solved camera.
    Export {
        #[structopt(short, long, parse(from_os_str))]
        workspace: PathBuf,
        #[structopt(short, long)]
        camera: usize,
        /// Directory the images and the PLY file are written to
        #[structopt(short, long, parse(from_os_str))]
        output: PathBuf,
        /// Pixels with a higher cost are left out
        #[structopt(long, default_value = "0.5")]
        max_cost: f64,
        #[structopt(long, default_value = "patchmatch-settings.json")]
        settings: PathBuf,
    },
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();
    let result = match opt {
        Opt::Prepare {
            scene,
            workspace,
            settings,
        } => prepare(&scene, &workspace, load_settings(&settings)),
        Opt::Solve {
            workspace,
            settings,
            camera,
            backend,
            metric,
            seed,
        } => {
            let mut settings = load_settings(&settings);
            if let Some(backend) = backend {
                settings = settings.backend(backend);
            }
            if let Some(metric) = metric {
                settings = settings.metric(metric);
            }
            if let Some(seed) = seed {
                settings = settings.seed(seed);
            }
            solve(&workspace, settings, camera)
        }
        Opt::Export {
            workspace,
            camera,
            output,
            max_cost,
            settings,
        } => export(&workspace, camera, &output, max_cost, load_settings(&settings)),
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn load_settings(path: &Path) -> PatchMatchSettings {
    let settings = File::open(path)
        .ok()
        .and_then(|file| serde_json::from_reader(file).ok());
    if settings.is_some() {
        info!("Loaded settings from {}", path.display());
    } else {
        info!("Used default settings");
    }
    let mut settings: PatchMatchSettings = settings.unwrap_or_default();
    match std::env::var(THREADS_VAR).map(|threads| threads.parse::<usize>()) {
        Ok(Ok(threads)) => settings = settings.threads(threads),
        Ok(Err(e)) => warn!("Ignoring {}: {}", THREADS_VAR, e),
        Err(_) => {}
    }
    settings
}

fn rng(settings: &PatchMatchSettings) -> Pcg64 {
    match settings.seed {
        Some(seed) => Pcg64::seed_from_u64(seed),
        None => Pcg64::from_entropy(),
    }
}

fn prepare(scene: &Path, root: &Path, settings: PatchMatchSettings) -> Result<()> {
    settings.validate()?;
    let scene_dir = scene.parent().unwrap_or_else(|| Path::new("."));
    let views: Vec<SceneCamera> = serde_json::from_reader(File::open(scene)?)?;
    info!("Loading {} images", views.len());
    let mut cameras = vec![];
    let mut images = vec![];
    for view in &views {
        let image = image::open(view.image_path(scene_dir))?;
        cameras.push(view.camera(scene_dir, image.width(), image.height())?);
        images.push(image);
    }
    configure_views(&mut cameras, &settings.view_selection, &mut rng(&settings))?;
    let lonely = cameras.iter().filter(|c| c.neighbors().is_empty()).count();
    if lonely > 0 {
        warn!("{} cameras have no neighbors and will not be solved", lonely);
    }
    Workspace::for_settings(root, &settings).prepare(&cameras, &images, &settings)
}

fn solve(root: &Path, settings: PatchMatchSettings, cameras: Vec<usize>) -> Result<()> {
    let workspace = Workspace::for_settings(root, &settings);
    let cameras = if cameras.is_empty() {
        (0..workspace.camera_count()).collect()
    } else {
        cameras
    };
    let mut solver = Solver::new(settings, &workspace)?;
    let failures = solver.solve_all(cameras.iter().copied(), &mut rng(&settings));
    info!(
        "Solved {} of {} cameras",
        cameras.len() - failures.len(),
        cameras.len()
    );
    summarize(&failures, cameras.len())
}

/// Turns the failures of a batch into an error when there are any.
fn summarize(failures: &[(usize, Error)], total: usize) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::CamerasFailed {
            cameras: failures.iter().map(|&(camera, _)| camera).collect(),
            total,
        })
    }
}

fn export(
    root: &Path,
    camera: usize,
    output: &Path,
    max_cost: f64,
    settings: PatchMatchSettings,
) -> Result<()> {
    let workspace = Workspace::for_settings(root, &settings);
    let field = workspace.load_field(camera, 0)?;
    let view = workspace.camera(camera, 0)?;
    let image = workspace.image(camera, 0)?;
    std::fs::create_dir_all(output)?;

    depth_image(&field, max_cost).save(output.join("depth.png"))?;
    cost_heatmap(&field, max_cost).save(output.join("cost.png"))?;
    normal_image(&field, max_cost).save(output.join("normals.png"))?;

    let mut points = point_cloud(&field, &view, Some(&image), max_cost);
    info!(
        "Camera {} has {} points below cost {}",
        camera,
        points.len(),
        max_cost
    );
    points.extend(camera_marker(&view, 0.1 * median_depth(&field, max_cost)));
    let path = output.join("cloud.ply");
    let written = write_ply(BufWriter::new(File::create(&path)?), &points)?;
    info!("Wrote {} bytes to {}", written, path.display());
    Ok(())
}

/// Median depth of the pixels below `max_cost`, one when there are none.
fn median_depth(field: &DepthField, max_cost: f64) -> f64 {
    let mut depths = field
        .cells()
        .iter()
        .filter(|cell| cell.cost < max_cost)
        .map(|cell| cell.depth)
        .collect::<Vec<_>>();
    depths.sort_by(|a, b| a.total_cmp(b));
    depths.get(depths.len() / 2).copied().unwrap_or(1.0)
}
