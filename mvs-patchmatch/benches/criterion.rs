use criterion::{criterion_group, criterion_main, Criterion};
use mvs_camera::nalgebra::{Point2, Rotation3, Vector3};
use mvs_camera::{configure_views, Camera, CameraIntrinsics, DepthRange, ViewSelection};
use mvs_patchmatch::{
    build_metric, initial_field, AcceleratorBackend, Backend, Channels, Color, CpuBackend,
    DescriptorCache, ImageId, MemorySource, MetricKind, PatchMatchSettings, ScaleContext,
    ViewImage, ViewSource,
};
use ndarray::Array2;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::sync::Arc;

const WIDTH: u32 = 160;
const HEIGHT: u32 = 120;

fn camera_at(x: f64) -> Camera {
    Camera::new(
        CameraIntrinsics::identity()
            .focal(150.0)
            .principal_point(Point2::new(79.5, 59.5)),
        Rotation3::identity(),
        Vector3::new(-x, 0.0, 0.0),
        WIDTH,
        HEIGHT,
    )
    .unwrap()
    .with_depth_range(DepthRange::new(3.0, 8.0).unwrap())
}

fn render(camera: &Camera) -> Array2<f32> {
    Array2::from_shape_fn((HEIGHT as usize, WIDTH as usize), |(row, col)| {
        let point = camera.unproject(&Point2::new(col as f64, row as f64), 5.0);
        let value =
            (point.x * 23.0).sin() * (point.y * 17.0).cos() + (point.x * point.y * 41.0).sin();
        (128.0 + 60.0 * value) as f32
    })
}

fn scene() -> MemorySource {
    let mut cameras = vec![camera_at(0.0), camera_at(-0.3), camera_at(0.3)];
    configure_views(&mut cameras, &ViewSelection::default(), &mut Pcg64::seed_from_u64(0)).unwrap();
    let channels = Channels::intensity().with_gradient().with_census();
    let images = cameras
        .iter()
        .enumerate()
        .map(|(index, camera)| {
            ViewImage::from_intensity(ImageId::new(index, 0), render(camera), 4, channels)
        })
        .collect();
    MemorySource::new(cameras, images, 1).unwrap()
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
        .collect();
    let cache = Arc::new(DescriptorCache::new());
    let metric = build_metric(settings, source.image(0, 0).unwrap(), images, &cache).unwrap();
    let depth_range = camera.depth_range().expanded(settings.depth_range_margin);
    ScaleContext::new(settings, 0, camera, &neighbors, metric, depth_range).unwrap()
}

fn bench_metrics(c: &mut Criterion) {
    let source = scene();
    for kind in MetricKind::ALL {
        let ctx = context(&source, &PatchMatchSettings::default().metric(kind));
        let field = initial_field(&ctx, 1);
        let mut backend = CpuBackend::new();
        c.bench_function(&format!("compute_costs_{}", kind), |b| {
            b.iter(|| {
                let mut field = field.clone();
                backend.compute_costs(&ctx, &mut field);
                field
            })
        });
    }
}

criterion_group!(
    name = metrics;
    config = Criterion::default().sample_size(10);
    targets = bench_metrics
);

fn bench_phases(c: &mut Criterion) {
    let source = scene();
    let ctx = context(&source, &PatchMatchSettings::default());
    let mut field = initial_field(&ctx, 1);
    let mut cpu = CpuBackend::new();
    cpu.compute_costs(&ctx, &mut field);

    c.bench_function("cpu_propagate", |b| {
        b.iter(|| {
            let mut field = field.clone();
            for color in Color::BOTH {
                cpu.propagate(&ctx, &mut field, color);
            }
            field
        })
    });
    c.bench_function("cpu_refine", |b| {
        b.iter(|| {
            let mut field = field.clone();
            cpu.refine(&ctx, &mut field, 2);
            field
        })
    });

    let mut accelerator = AcceleratorBackend::new();
    c.bench_function("accelerator_propagate", |b| {
        b.iter(|| {
            let mut field = field.clone();
            for color in Color::BOTH {
                accelerator.propagate(&ctx, &mut field, color);
            }
            field
        })
    });
    c.bench_function("accelerator_refine", |b| {
        b.iter(|| {
            let mut field = field.clone();
            accelerator.refine(&ctx, &mut field, 2);
            field
        })
    });
}

criterion_group!(
    name = phases;
    config = Criterion::default().sample_size(10);
    targets = bench_phases
);

criterion_main!(metrics, phases);
