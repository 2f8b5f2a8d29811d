#![allow(dead_code)]

use std::sync::OnceLock;

use camcal::core::synthetic::{board_pose, project_corners, render_chessboard, RenderParams};
use camcal::{
    Distortion, GrayImage, Intrinsics, PinholeCamera, PointObservation, Pose, TargetGeometry,
};
use nalgebra::{Translation3, UnitQuaternion, Vector3};

pub const W: usize = 640;
pub const H: usize = 480;
pub const SPACING: f64 = 0.108;

/// Board orientations (roll, pitch, yaw) and centre positions in the left camera frame.
pub const VIEWS: [([f64; 3], [f64; 3]); 8] = [
    ([0.0, 0.0, 0.0], [0.0, 0.0, 2.0]),
    ([0.35, 0.0, 0.03], [-0.15, -0.05, 2.2]),
    ([-0.35, 0.05, -0.02], [0.15, 0.08, 2.1]),
    ([0.05, 0.4, 0.05], [-0.1, 0.1, 2.3]),
    ([-0.05, -0.4, -0.04], [0.12, -0.08, 2.2]),
    ([0.25, 0.3, 0.1], [0.05, 0.0, 2.4]),
    ([-0.3, -0.25, -0.08], [-0.05, 0.05, 2.0]),
    ([0.2, -0.3, 0.15], [0.2, 0.1, 2.5]),
];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn geometry() -> TargetGeometry {
    TargetGeometry::new(8, 6, SPACING).unwrap()
}

pub fn left_camera() -> PinholeCamera {
    PinholeCamera::new(
        Intrinsics::new(540.0, 535.0, 322.0, 238.0),
        Distortion {
            k1: -0.08,
            k2: 0.02,
            p1: 0.0005,
            p2: -0.0003,
            k3: 0.0,
        },
    )
}

pub fn right_camera() -> PinholeCamera {
    PinholeCamera::new(
        Intrinsics::new(545.0, 541.0, 316.0, 243.0),
        Distortion {
            k1: -0.07,
            k2: 0.015,
            ..Distortion::default()
        },
    )
}

/// `X_right = relative * X_left`.
pub fn relative() -> Pose {
    Pose::from_parts(
        Translation3::new(-0.12, 0.002, 0.001),
        UnitQuaternion::from_euler_angles(0.004, -0.01, 0.003),
    )
}

pub struct Frame {
    pub image: GrayImage,
    pub truth: PointObservation,
}

fn render(cam: &PinholeCamera, pose: &Pose) -> Frame {
    let g = geometry();
    Frame {
        image: render_chessboard(cam, pose, &g, W, H, &RenderParams::default()),
        truth: project_corners(cam, pose, &g).unwrap(),
    }
}

fn left_poses() -> Vec<Pose> {
    let g = geometry();
    VIEWS
        .iter()
        .map(|(rpy, pos)| board_pose(&g, *rpy, Vector3::from(*pos)))
        .collect()
}

pub fn left_frames() -> &'static [Frame] {
    static FRAMES: OnceLock<Vec<Frame>> = OnceLock::new();
    FRAMES.get_or_init(|| {
        let cam = left_camera();
        left_poses().iter().map(|pose| render(&cam, pose)).collect()
    })
}

pub fn right_frames() -> &'static [Frame] {
    static FRAMES: OnceLock<Vec<Frame>> = OnceLock::new();
    FRAMES.get_or_init(|| {
        let (cam, rel) = (right_camera(), relative());
        left_poses()
            .iter()
            .map(|pose| render(&cam, &(rel * pose)))
            .collect()
    })
}

/// Left and right frames of one board pose outside [`VIEWS`].
pub fn render_pair(rpy: [f64; 3], pos: [f64; 3]) -> (Frame, Frame) {
    let pose = board_pose(&geometry(), rpy, Vector3::from(pos));
    (
        render(&left_camera(), &pose),
        render(&right_camera(), &(relative() * pose)),
    )
}

pub fn images(frames: &[Frame]) -> Vec<&GrayImage> {
    frames.iter().map(|f| &f.image).collect()
}

pub fn truths(frames: &[Frame]) -> Vec<PointObservation> {
    frames.iter().map(|f| f.truth.clone()).collect()
}
