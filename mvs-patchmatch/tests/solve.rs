mod common;

use mvs_patchmatch::{
    build_metric, initial_field, AcceleratorBackend, Backend, BackendKind, CandidateKind,
    Channels, Color, ComputeDevice, CpuBackend, DepthField, DescriptorCache, Error,
    MemorySource, MetricKind, PatchMatchSettings, ScaleContext, Solver, ViewSource,
};
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::sync::Arc;

fn source(scales: usize, channels: Channels) -> MemorySource {
    let cameras = common::cameras();
    let images = common::images(&cameras, channels);
    MemorySource::new(cameras, images, scales).unwrap()
}

fn context(source: &MemorySource, settings: &PatchMatchSettings) -> ScaleContext {
    let camera = source.camera(0, 0).unwrap();
    let neighbors = camera
        .neighbors()
        .iter()
        .map(|&n| source.camera(n, 0).unwrap())
        .collect::<Vec<_>>();
    let images = camera
        .neighbors()
        .iter()
        .map(|&n| source.image(n, 0).unwrap())
        .collect::<Vec<_>>();
    let cache = Arc::new(DescriptorCache::new());
    let metric = build_metric(settings, source.image(0, 0).unwrap(), images, &cache).unwrap();
    let depth_range = camera.depth_range().expanded(settings.depth_range_margin);
    ScaleContext::new(settings, 0, camera, &neighbors, metric, depth_range).unwrap()
}

#[test]
fn neighbors_are_selected() {
    let cameras = common::cameras();
    assert_eq!(cameras[0].neighbors(), &[1, 2]);
    assert_eq!(cameras[1].neighbors(), &[0, 2]);
}

#[test]
fn recovers_fronto_parallel_plane() {
    let _ = pretty_env_logger::try_init();
    let source = source(1, Channels::intensity());
    let settings = PatchMatchSettings::default()
        .metric(MetricKind::Ncc)
        .scales(1)
        .iterations(6, 6);
    let mut solver = Solver::new(settings, &source).unwrap();
    let field = solver
        .solve_camera(0, &mut Pcg64::seed_from_u64(7))
        .unwrap();
    assert_eq!(source.field(0, 0).as_ref(), Some(&field));

    let (mut good, mut total) = (0, 0);
    for row in 8..40 {
        for col in 12..52 {
            let cell = field.get(row, col);
            total += 1;
            let close = (cell.depth - common::PLANE_DEPTH).abs() < 0.05 * common::PLANE_DEPTH;
            if close && cell.cost < 0.5 {
                good += 1;
            }
        }
    }
    let ratio = good as f64 / total as f64;
    assert!(ratio >= 0.9, "only {:.1}% of interior pixels recovered", 100.0 * ratio);
}

#[test]
fn phases_never_increase_cost() {
    for candidates in [CandidateKind::Full, CandidateKind::Fast, CandidateKind::Asymmetric] {
        let source = source(1, Channels::intensity());
        let settings = PatchMatchSettings::default()
            .metric(MetricKind::Ncc)
            .candidates(candidates);
        let ctx = context(&source, &settings);
        let mut backend = CpuBackend::new();
        let mut field = initial_field(&ctx, 3);
        backend.compute_costs(&ctx, &mut field);

        let mut before = field.clone();
        for color in Color::BOTH {
            backend.propagate(&ctx, &mut field, color);
            for (row, col) in color.pixels(field.width(), field.height()) {
                assert!(field.get(row, col).cost <= before.get(row, col).cost);
            }
            // The other color is untouched by this half-step.
            let other = if color == Color::Red { Color::Black } else { Color::Red };
            for (row, col) in other.pixels(field.width(), field.height()) {
                assert_eq!(field.get(row, col), before.get(row, col));
            }
            before = field.clone();
        }
        backend.refine(&ctx, &mut field, 11);
        let width = field.width();
        for (index, (after, before)) in field.cells().iter().zip(before.cells()).enumerate() {
            assert!(after.cost <= before.cost);
            if after != before {
                assert!(ctx.depth_range.contains(after.depth));
                assert!(after.plane.faces(&ctx.ray(index / width, index % width)));
            }
        }
    }
}

#[test]
fn backends_agree() {
    let source = source(2, Channels::intensity().with_census());
    let settings = PatchMatchSettings::default()
        .metric(MetricKind::CensusAd)
        .scales(2)
        .iterations(1, 1)
        .candidates(CandidateKind::Asymmetric);

    let cpu = Solver::new(settings.backend(BackendKind::Cpu), &source)
        .unwrap()
        .solve_camera(0, &mut Pcg64::seed_from_u64(5))
        .unwrap();
    let mut accelerated = Solver::new(settings.backend(BackendKind::Accelerator), &source).unwrap();
    assert_eq!(accelerated.backend_name(), "accelerator");
    let accelerated = accelerated
        .solve_camera(0, &mut Pcg64::seed_from_u64(5))
        .unwrap();
    assert_eq!(cpu, accelerated);

    let pooled = Solver::new(settings.threads(2), &source)
        .unwrap()
        .solve_camera(0, &mut Pcg64::seed_from_u64(5))
        .unwrap();
    assert_eq!(cpu, pooled);

    let swapped = Solver::new(settings, &source)
        .unwrap()
        .with_backend(Box::new(AcceleratorBackend::new()))
        .solve_camera(0, &mut Pcg64::seed_from_u64(5))
        .unwrap();
    assert_eq!(cpu, swapped);
}

#[test]
fn accelerator_phases_match_cpu_phases() {
    let source = source(1, Channels::intensity());
    let settings = PatchMatchSettings::default().metric(MetricKind::BilateralNcc);
    let ctx = context(&source, &settings);
    let mut cpu = CpuBackend::new();
    let mut accelerator = AcceleratorBackend::new();
    assert_eq!(accelerator.device().name(), "host");

    let mut expected = initial_field(&ctx, 21);
    let mut field = expected.clone();
    cpu.compute_costs(&ctx, &mut expected);
    accelerator.compute_costs(&ctx, &mut field);
    assert_eq!(field, expected);
    for color in Color::BOTH {
        cpu.propagate(&ctx, &mut expected, color);
        accelerator.propagate(&ctx, &mut field, color);
        assert_eq!(field, expected);
    }
    cpu.refine(&ctx, &mut expected, 4);
    accelerator.refine(&ctx, &mut field, 4);
    assert_eq!(field, expected);
}

/// Delegates to the CPU backend but only accepts one metric.
struct SingleMetric(CpuBackend, MetricKind);

impl Backend for SingleMetric {
    fn name(&self) -> &'static str {
        "single-metric"
    }

    fn supports(&self, metric: MetricKind) -> bool {
        metric == self.1
    }

    fn compute_costs(&mut self, ctx: &ScaleContext, field: &mut DepthField) {
        self.0.compute_costs(ctx, field)
    }

    fn propagate(&mut self, ctx: &ScaleContext, field: &mut DepthField, color: Color) {
        self.0.propagate(ctx, field, color)
    }

    fn refine(&mut self, ctx: &ScaleContext, field: &mut DepthField, seed: u64) {
        self.0.refine(ctx, field, seed)
    }
}

#[test]
fn backend_without_metric_kernel_is_rejected() {
    let source = source(1, Channels::intensity());
    let settings = PatchMatchSettings::default()
        .metric(MetricKind::BilateralNcc)
        .scales(1)
        .iterations(1, 1);
    let mut solver = Solver::new(settings, &source)
        .unwrap()
        .with_backend(Box::new(SingleMetric(CpuBackend::new(), MetricKind::Ncc)));
    assert!(matches!(
        solver.solve_camera(0, &mut Pcg64::seed_from_u64(1)),
        Err(Error::InvalidSettings(_))
    ));
    assert!(source.field(0, 0).is_none());

    let mut solver = Solver::new(settings.metric(MetricKind::Ncc), &source)
        .unwrap()
        .with_backend(Box::new(SingleMetric(CpuBackend::new(), MetricKind::Ncc)));
    assert!(solver.solve_camera(0, &mut Pcg64::seed_from_u64(1)).is_ok());
}

#[test]
fn camera_without_neighbors_fails_alone() {
    let mut cameras = common::cameras();
    cameras[2].set_neighbors(vec![], Default::default());
    let images = common::images(&cameras, Channels::intensity());
    let source = MemorySource::new(cameras, images, 1).unwrap();
    let settings = PatchMatchSettings::default().scales(1).iterations(1, 1);
    let mut solver = Solver::new(settings, &source).unwrap();
    let failures = solver.solve_all(0..4, &mut Pcg64::seed_from_u64(1));
    let failed = failures.iter().map(|(camera, _)| *camera).collect::<Vec<_>>();
    assert_eq!(failed, vec![2, 3]);
    assert!(matches!(failures[0].1, Error::NoNeighbors(2)));
    assert!(matches!(failures[1].1, Error::UnknownView { camera: 3, scale: 0 }));
    assert!(source.field(0, 0).is_some());
    assert!(source.field(1, 0).is_some());
}

#[test]
fn invalid_settings_are_rejected_before_solving() {
    let source = source(1, Channels::intensity());
    let settings = PatchMatchSettings::default().window(0, 1);
    assert!(matches!(
        Solver::new(settings, &source),
        Err(Error::InvalidSettings(_))
    ));
    assert!(matches!(
        "voxel".parse::<MetricKind>(),
        Err(Error::UnknownMetric(_))
    ));
    assert!(matches!(
        "gpu".parse::<BackendKind>(),
        Err(Error::UnknownBackend(_))
    ));
}

#[cfg(feature = "wgpu")]
#[test]
fn gpu_phases_track_host_phases() {
    let device = match mvs_patchmatch::WgpuDevice::new() {
        Some(device) => device,
        None => {
            println!("No GPU adapter found, skipping");
            return;
        }
    };
    assert!(device.supports(MetricKind::Ncc));
    assert!(!device.supports(MetricKind::CensusAd));

    let source = source(1, Channels::intensity());
    let settings = PatchMatchSettings::default().metric(MetricKind::Ncc);
    let ctx = context(&source, &settings);
    let mut expected = initial_field(&ctx, 13);
    let mut field = expected.clone();
    CpuBackend::new().compute_costs(&ctx, &mut expected);
    let mut gpu = AcceleratorBackend::with_device(device);
    gpu.prepare(&ctx).unwrap();
    gpu.compute_costs(&ctx, &mut field);
    let close = field
        .cells()
        .iter()
        .zip(expected.cells())
        .filter(|(gpu, host)| (gpu.cost - host.cost).abs() < 1e-2)
        .count();
    assert!(close as f64 >= 0.98 * field.cells().len() as f64);

    let before = field.clone();
    for color in Color::BOTH {
        gpu.propagate(&ctx, &mut field, color);
    }
    gpu.refine(&ctx, &mut field, 3);
    for (after, before) in field.cells().iter().zip(before.cells()) {
        assert!(after.cost <= before.cost);
    }
}
