use approx::assert_relative_eq;
use mvs_camera::nalgebra::{Point2, Point3, Rotation3, Unit, Vector2, Vector3};
use mvs_camera::{warp, Camera, CameraIntrinsics, DisparityConversion, Plane, StereoRig};
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::identity()
        .focals(Vector2::new(480.0, 470.0))
        .principal_point(Point2::new(319.5, 239.5))
        .skew(0.2)
}

fn reference() -> Camera {
    Camera::new(
        intrinsics(),
        Rotation3::from_euler_angles(0.05, -0.1, 0.02),
        Vector3::new(0.2, -0.1, 0.5),
        640,
        480,
    )
    .unwrap()
}

fn neighbor() -> Camera {
    Camera::new(
        intrinsics(),
        Rotation3::from_euler_angles(-0.02, 0.05, 0.0),
        Vector3::new(-0.35, 0.05, 0.45),
        640,
        480,
    )
    .unwrap()
}

/// Maps an arbitrary integer into `[lo, hi]`.
fn unit(value: u16, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * value as f64 / u16::MAX as f64
}

#[quickcheck]
fn unproject_project_round_trip(u: u16, v: u16, depth: u16) -> bool {
    let camera = reference();
    let pixel = Point2::new(unit(u, 0.0, 639.0), unit(v, 0.0, 479.0));
    let depth = unit(depth, 0.1, 100.0);
    let point = camera.unproject(&pixel, depth);
    let back = camera.project(&point).unwrap();
    (back - pixel).norm() < 1e-6 && (camera.depth(&point) - depth).abs() < 1e-6 * depth
}

#[quickcheck]
fn plane_point_round_trip(u: u16, v: u16, nx: u16, ny: u16, depth: u16) -> TestResult {
    let camera = reference();
    let pixel = Point2::new(unit(u, 0.0, 639.0), unit(v, 0.0, 479.0));
    let ray = camera.local_ray(&pixel);
    let normal = Unit::new_normalize(Vector3::new(unit(nx, -0.5, 0.5), unit(ny, -0.5, 0.5), -1.0));
    let plane = Plane::from_depth(normal, &ray, unit(depth, 0.5, 50.0)).facing(&ray);
    let depth = match plane.depth_along(&ray) {
        Some(depth) => depth,
        None => return TestResult::discard(),
    };
    let point = camera.to_world(&camera.unproject_local(&pixel, depth));
    let back = camera.unproject(&camera.project(&point).unwrap(), camera.depth(&point));
    TestResult::from_bool((back - point).norm() < 1e-6 * depth)
}

#[quickcheck]
fn disparity_round_trip(depth: u16) -> bool {
    let conversion = DisparityConversion::new(480.0, 0.3);
    let depth = unit(depth, 1e-3, 1000.0);
    let back = conversion
        .depth_to_disparity(depth)
        .and_then(|disparity| conversion.disparity_to_depth(disparity))
        .unwrap();
    (back - depth).abs() < 1e-9 * depth
}

#[test]
fn homography_maps_plane_projections() {
    let reference = reference();
    let neighbor = neighbor();
    let rig = StereoRig::new(&reference, &neighbor);
    let plane = Plane::through(
        Unit::new_normalize(Vector3::new(0.2, -0.1, -1.0)),
        &Point3::new(0.0, 0.0, 6.0),
    );
    let homography = rig.homography(&plane).unwrap();
    for &(u, v) in &[(10.0, 20.0), (320.0, 240.0), (600.0, 450.0), (123.4, 321.0)] {
        let pixel = Point2::new(u, v);
        let ray = reference.local_ray(&pixel);
        let depth = plane.depth_along(&ray).unwrap();
        let world = reference.to_world(&reference.unproject_local(&pixel, depth));
        let expected = neighbor.project(&world).unwrap();
        let warped = warp(&homography, &pixel).unwrap();
        assert_relative_eq!(warped, expected, epsilon = 1e-6);
    }
}

#[test]
fn identity_rig_has_identity_homography() {
    let reference = reference();
    let rig = StereoRig::new(&reference, &reference);
    let homography = rig.homography(&Plane::fronto_parallel(3.0)).unwrap();
    assert_relative_eq!(
        homography,
        mvs_camera::nalgebra::Matrix3::identity(),
        epsilon = 1e-9
    );
}

#[test]
fn camera_record_round_trip() {
    let camera = reference().with_image_path("view.png");
    let bytes = bincode::serialize(&camera).unwrap();
    let back: Camera = bincode::deserialize(&bytes).unwrap();
    assert_eq!(back.image_path(), Some("view.png"));
    assert_relative_eq!(back.projection(), camera.projection(), epsilon = 1e-12);
    assert_relative_eq!(back.center(), camera.center(), epsilon = 1e-12);
}

#[test]
fn scaled_camera_projects_to_scaled_pixels() {
    let camera = reference();
    let half = camera.scaled(1);
    assert_eq!((half.width(), half.height()), (320, 240));
    let point = Point3::new(0.5, 0.4, 7.0);
    let full = camera.project(&point).unwrap();
    let coarse = half.project(&point).unwrap();
    assert_relative_eq!((full.x + 0.5) / 2.0 - 0.5, coarse.x, epsilon = 1e-9);
    assert_relative_eq!((full.y + 0.5) / 2.0 - 0.5, coarse.y, epsilon = 1e-9);
}
