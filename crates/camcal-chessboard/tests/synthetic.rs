use camcal_chessboard::{ChessboardDetector, DetectionFailure};
use camcal_core::synthetic::{board_pose, project_corners, render_chessboard, RenderParams};
use camcal_core::{Distortion, GrayImage, Intrinsics, PinholeCamera, TargetGeometry};
use nalgebra::Vector3;

const W: usize = 320;
const H: usize = 240;

fn camera() -> PinholeCamera {
    PinholeCamera::new(
        Intrinsics::new(300.0, 298.0, 161.0, 119.0),
        Distortion {
            k1: -0.06,
            k2: 0.01,
            ..Distortion::default()
        },
    )
}

fn geometry() -> TargetGeometry {
    TargetGeometry::new(6, 4, 0.05).unwrap()
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn render(rpy: [f64; 3], position: [f64; 3]) -> (GrayImage, camcal_core::PointObservation) {
    let (cam, g) = (camera(), geometry());
    let pose = board_pose(&g, rpy, Vector3::from(position));
    let img = render_chessboard(&cam, &pose, &g, W, H, &RenderParams::default());
    let truth = project_corners(&cam, &pose, &g).unwrap();
    (img, truth)
}

fn max_error(found: &camcal_core::PointObservation, truth: &camcal_core::PointObservation) -> f64 {
    found
        .points
        .iter()
        .zip(&truth.points)
        .map(|(a, b)| (a - b).norm())
        .fold(0.0, f64::max)
}

#[test]
fn detects_fronto_parallel_board_in_canonical_order() {
    init_logger();
    let (img, truth) = render([0.0, 0.0, 0.0], [0.0, 0.0, 0.8]);
    let detector = ChessboardDetector::new(geometry());
    let found = detector.detect(&img.view()).expect("board");
    assert_eq!(found.len(), 24);
    let err = max_error(&found, &truth);
    assert!(err < 0.3, "max corner error {err}");
}

#[test]
fn detects_tilted_board() {
    init_logger();
    let (img, truth) = render([0.35, -0.3, 0.1], [0.02, -0.01, 0.85]);
    let detector = ChessboardDetector::new(geometry());
    let found = detector.detect(&img.view()).expect("board");
    let err = max_error(&found, &truth);
    assert!(err < 0.35, "max corner error {err}");
}

#[test]
fn candidates_are_finite_and_distinct() {
    init_logger();
    let (img, truth) = render([0.2, -0.1, 0.3], [0.0, 0.0, 0.8]);
    let detector = ChessboardDetector::new(geometry());
    let candidates = detector.candidates(&img.view());
    assert!(candidates.len() >= truth.len(), "{} candidates", candidates.len());
    let radius = detector.params().chess.merge_radius_px;
    for (k, a) in candidates.iter().enumerate() {
        assert!(a.position.x.is_finite() && a.position.y.is_finite());
        for b in &candidates[k + 1..] {
            assert!((a.position - b.position).norm() > radius);
            assert!(a.strength >= b.strength);
        }
    }
    // every board corner has a candidate nearby
    for p in &truth.points {
        let d = candidates
            .iter()
            .map(|c| (c.position - p).norm())
            .fold(f64::INFINITY, f64::min);
        assert!(d < 1.0, "no candidate near ({:.1}, {:.1})", p.x, p.y);
    }
}

#[test]
fn wrong_geometry_fails() {
    init_logger();
    let (img, _) = render([0.1, 0.1, 0.0], [0.0, 0.0, 0.8]);
    let detector = ChessboardDetector::new(TargetGeometry::new(6, 5, 0.05).unwrap());
    let err = detector.detect(&img.view()).unwrap_err();
    assert!(matches!(
        err,
        DetectionFailure::TooFewCorners { .. } | DetectionFailure::GridNotFound { .. }
    ));
}

#[test]
fn blank_image_has_too_few_corners() {
    let img = GrayImage::filled(W, H, 128);
    let detector = ChessboardDetector::new(geometry());
    assert!(matches!(
        detector.detect(&img.view()),
        Err(DetectionFailure::TooFewCorners { needed: 24, .. })
    ));
}

#[test]
fn board_touching_the_border_is_rejected() {
    init_logger();
    // shifted so the leftmost corners sit a few pixels from the edge
    let (img, truth) = render([0.0, 0.0, 0.0], [-0.30, 0.0, 0.8]);
    let left = truth.points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    assert!(left > 0.0 && left < 8.0, "test setup: left corner at {left}");
    let detector = ChessboardDetector::new(geometry());
    match detector.detect(&img.view()) {
        Err(DetectionFailure::NearBorder { .. })
        | Err(DetectionFailure::TooFewCorners { .. })
        | Err(DetectionFailure::GridNotFound { .. }) => {}
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn params_round_trip_through_json() {
    let params = camcal_chessboard::ChessboardParams::default().with_border(12.0);
    let json = serde_json::to_string(&params).unwrap();
    let back: camcal_chessboard::ChessboardParams = serde_json::from_str(&json).unwrap();
    assert_eq!(back, params);
    let partial: camcal_chessboard::ChessboardParams =
        serde_json::from_str(r#"{"border_px": 4.0}"#).unwrap();
    assert_eq!(partial.border_px, 4.0);
    assert_eq!(partial.grid, camcal_chessboard::GridParams::default());
    let cfg = partial.chess.to_chess_config();
    assert_eq!(cfg.params.threshold_rel, partial.chess.threshold_rel);
    assert_eq!(cfg.params.nms_radius, partial.chess.nms_radius);
}

#[test]
fn invalid_buffer_is_reported() {
    let data = vec![0u8; 10];
    let view = camcal_core::GrayImageView {
        width: 320,
        height: 240,
        data: &data,
    };
    let detector = ChessboardDetector::new(geometry());
    assert!(matches!(
        detector.detect(&view),
        Err(DetectionFailure::InvalidBuffer { got: 10, .. })
    ));
}
