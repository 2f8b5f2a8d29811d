mod common;

use std::sync::OnceLock;

use camcal::{
    CalibrationError, ChessboardDetector, DiscardReason, GrayImage, PointObservation,
    StereoCalibration, StereoCalibrationMessage, StereoCalibrator, TargetGeometry,
};
use common::*;
use nalgebra::{Point2, Point3, Vector3};

fn calibrate() -> &'static StereoCalibration {
    static CALIBRATION: OnceLock<StereoCalibration> = OnceLock::new();
    init_logger();
    CALIBRATION.get_or_init(|| {
        StereoCalibrator::new(geometry())
            .calibrate(&images(left_frames()), &images(right_frames()))
            .expect("stereo calibration")
    })
}

#[test]
fn recovers_rig_geometry() {
    let cal = calibrate();
    let t = cal.translation();
    let truth = relative();
    assert!((t - truth.translation.vector).norm() < 0.01, "T = {t:?}");
    let angle = cal
        .relative_pose()
        .rotation
        .angle_to(&truth.rotation);
    assert!(angle < 0.01, "rotation off by {angle} rad");

    assert!((cal.right().camera.intrinsics.fx - 545.0).abs() / 545.0 < 0.02);
    assert_eq!(cal.left_poses().len(), VIEWS.len());
    let (l, r) = cal.reprojection();
    assert!(l.unwrap().rms < 0.5 && r.unwrap().rms < 0.5);
    assert_eq!(cal.batch().unwrap().usable(), VIEWS.len());
}

#[test]
fn epipolar_matrices_hold_for_board_points() {
    let cal = calibrate();
    let pose = truth_pose(0);
    let (left, right) = (left_camera(), right_camera());
    let x = pose * Point3::new(0.2, 0.1, 0.0);
    let xr = relative() * x;
    let ul = left.intrinsics.k_matrix() * (x.coords / x.z);
    let ur = right.intrinsics.k_matrix() * (xr.coords / xr.z);
    let residual = ur.transpose() * cal.fundamental() * ul;
    let line = cal.fundamental() * ul;
    let dist = residual[0].abs() / Vector3::new(line.x, line.y, 0.0).norm();
    assert!(dist < 1.0, "epipolar distance {dist}");
    assert!((cal.fundamental()[(2, 2)] - 1.0).abs() < 1e-12);
}

fn truth_pose(view: usize) -> camcal::Pose {
    let (rpy, pos) = VIEWS[view];
    camcal::core::synthetic::board_pose(&geometry(), rpy, Vector3::from(pos))
}

#[test]
fn rectified_rows_line_up() {
    let cal = calibrate();
    let (lf, rf) = (left_frames(), right_frames());
    for view in [0, 3, 6] {
        let err = cal.epipolar_error(&lf[view].image, &rf[view].image).unwrap();
        assert!(err < 0.75, "view {view}: epipolar error {err}");
    }
}

#[test]
fn triangulated_board_has_the_printed_spacing() {
    let cal = calibrate();
    let (lf, rf) = (left_frames(), right_frames());
    let size = cal.chessboard_size(&lf[2].image, &rf[2].image).unwrap();
    assert!((size - SPACING).abs() < 0.005, "board spacing {size}");
}

#[test]
fn wrong_board_geometry_fails() {
    init_logger();
    let cal = StereoCalibrator::new(TargetGeometry::new(8, 7, SPACING).unwrap());
    assert!(matches!(
        cal.calibrate(&images(left_frames()), &images(right_frames())),
        Err(CalibrationError::InsufficientData { usable: 0, .. })
    ));
}

#[test]
fn unequal_input_lists_are_rejected() {
    let cal = StereoCalibrator::new(geometry());
    let left = images(left_frames());
    let mut right = images(right_frames());
    right.truncate(3);
    assert!(matches!(
        cal.calibrate(&left, &right),
        Err(CalibrationError::MismatchedPairs { left: 8, right: 3 })
    ));
}

#[test]
fn pair_with_blank_right_image_is_discarded() {
    init_logger();
    let blank = GrayImage::filled(W, H, 128);
    let mut left = images(left_frames());
    let mut right = images(right_frames());
    left.push(&left_frames()[0].image);
    right.push(&blank);
    let cal = StereoCalibrator::new(geometry())
        .calibrate(&left, &right)
        .unwrap();
    let batch = cal.batch().unwrap();
    assert_eq!(batch.usable(), VIEWS.len());
    assert!(matches!(
        batch.discarded.as_slice(),
        [(8, DiscardReason::RightDetection(_))]
    ));
}

#[test]
fn message_round_trip_keeps_rectification() {
    let cal = calibrate();
    let msg = cal.as_message();
    let json = msg.to_json().unwrap();
    let back = StereoCalibrationMessage::from_json(&json).unwrap();
    assert_eq!(back, msg);

    let restored = StereoCalibrator::new(geometry()).from_message(&back).unwrap();
    assert_eq!(restored.left().projection, cal.left().projection);
    assert_eq!(restored.right().rectification, cal.right().rectification);
    assert!((restored.translation() - cal.translation()).norm() < 1e-12);
    let (lf, rf) = (left_frames(), right_frames());
    let a = cal.epipolar_error(&lf[1].image, &rf[1].image).unwrap();
    let b = restored.epipolar_error(&lf[1].image, &rf[1].image).unwrap();
    assert!((a - b).abs() < 1e-9);

    let mut broken = msg.clone();
    broken.rotation = [2.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    assert!(matches!(
        StereoCalibrator::new(geometry()).from_message(&broken),
        Err(CalibrationError::InvalidMessage(_))
    ));
}

#[test]
fn textual_exports_name_both_cameras() {
    let cal = calibrate();
    let ost = cal.ost();
    assert!(ost.contains("[left]"));
    assert!(ost.contains("[right]"));
    let (left, right) = cal.yaml();
    assert!(left.contains("camera_name: left"));
    assert!(right.contains("camera_name: right"));
    let report = cal.report();
    assert!(report.contains("stereo calibration"));
    assert!(report.contains("translation T = ["));
}

#[test]
fn rectified_images_keep_their_size() {
    let cal = calibrate();
    let (lf, rf) = (left_frames(), right_frames());
    let (l, r) = cal.remap(&lf[0].image, &rf[0].image).unwrap();
    assert_eq!((l.width, l.height), (W, H));
    assert_eq!((r.width, r.height), (W, H));
    let wide = cal.with_alpha(1.0);
    assert_eq!(wide.alpha(), 1.0);
    assert!(wide.left().projection[(0, 0)] <= cal.left().projection[(0, 0)]);
}

/// Board held a quarter turn around the optical axis, a few mrad either side.
fn rolled_pairs() -> &'static [(Frame, Frame)] {
    static PAIRS: OnceLock<Vec<(Frame, Frame)>> = OnceLock::new();
    PAIRS.get_or_init(|| {
        (-3..=3)
            .map(|k| {
                let yaw = std::f64::consts::FRAC_PI_2 + 1e-3 * k as f64;
                render_pair([0.0, 0.0, yaw], [0.02, -0.01, 2.1])
            })
            .collect()
    })
}

fn nearest(truth: &PointObservation, p: Point2<f64>) -> usize {
    (0..truth.len())
        .min_by(|&a, &b| {
            (truth.points[a] - p)
                .norm()
                .total_cmp(&(truth.points[b] - p).norm())
        })
        .unwrap()
}

#[test]
fn quarter_turned_board_keeps_pair_correspondence() {
    init_logger();
    let detector = ChessboardDetector::new(geometry());
    for (k, (l, r)) in rolled_pairs().iter().enumerate() {
        let left = detector.detect(&l.image.view()).expect("left");
        let right = detector
            .detect(&r.image.view())
            .expect("right")
            .aligned_to(&left);
        for idx in [0, 7, 40, 47] {
            assert_eq!(
                nearest(&l.truth, left.points[idx]),
                nearest(&r.truth, right.points[idx]),
                "pair {k}, corner {idx}"
            );
        }
    }
}

#[test]
fn quarter_turned_pairs_calibrate_and_rectify() {
    init_logger();
    let rolled = rolled_pairs();
    let mut left = images(left_frames());
    let mut right = images(right_frames());
    left.extend(rolled.iter().map(|(l, _)| &l.image));
    right.extend(rolled.iter().map(|(_, r)| &r.image));
    let cal = StereoCalibrator::new(geometry())
        .calibrate(&left, &right)
        .unwrap();
    assert_eq!(cal.batch().unwrap().usable(), VIEWS.len() + rolled.len());
    let (l, r) = cal.reprojection();
    assert!(l.unwrap().rms < 0.5 && r.unwrap().rms < 0.5);
    let t = cal.translation() - relative().translation.vector;
    assert!(t.norm() < 0.01, "T off by {t:?}");
    for (k, (l, r)) in rolled.iter().enumerate() {
        let err = cal.epipolar_error(&l.image, &r.image).unwrap();
        assert!(err < 0.75, "pair {k}: epipolar error {err}");
    }
}
