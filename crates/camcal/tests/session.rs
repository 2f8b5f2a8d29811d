mod common;

use camcal::{
    sample_params, CaptureSession, GrayImage, MonoCalibrator, SampleOutcome, StereoCalibrator,
    StereoCaptureSession,
};
use common::*;

#[test]
fn centred_board_sits_mid_frame() {
    let p = sample_params(&left_frames()[0].truth, (W, H));
    assert!((p[0] - 0.5).abs() < 0.05, "x {}", p[0]);
    assert!((p[1] - 0.5).abs() < 0.05, "y {}", p[1]);
    assert!(p[2] > 0.2 && p[2] < 0.4, "size {}", p[2]);
    assert!(p[3] < 0.05, "skew {}", p[3]);
}

#[test]
fn mono_session_collects_distinct_frames() {
    init_logger();
    let frames = left_frames();
    let mut session = CaptureSession::new(MonoCalibrator::new(geometry()));
    assert_eq!(session.add_frame(&frames[0].image), SampleOutcome::Accepted);
    assert_eq!(session.add_frame(&frames[0].image), SampleOutcome::Duplicate);
    assert!(matches!(
        session.add_frame(&GrayImage::filled(W, H, 90)),
        SampleOutcome::Rejected(_)
    ));
    assert!(matches!(
        session.add_frame(&GrayImage::filled(W / 2, H / 2, 90)),
        SampleOutcome::SizeMismatch { .. }
    ));
    for frame in &frames[1..] {
        session.add_frame(&frame.image);
    }
    assert!(session.len() >= 2, "{} samples", session.len());
    assert_eq!(session.observations().len(), session.len());

    let progress = session.progress();
    assert_eq!(
        progress.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        ["x", "y", "size", "skew"]
    );
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(&p.progress)));
    // horizontal coverage stays well short of the full span
    assert!(!session.good_enough());

    let cal = session.calibrate().unwrap();
    assert_eq!(cal.poses().len(), session.len());
}

#[test]
fn stereo_session_pairs_frames() {
    init_logger();
    let (lf, rf) = (left_frames(), right_frames());
    let mut session = StereoCaptureSession::new(StereoCalibrator::new(geometry()));
    assert_eq!(session.add_pair(&lf[0].image, &rf[0].image), SampleOutcome::Accepted);
    assert_eq!(session.add_pair(&lf[0].image, &rf[0].image), SampleOutcome::Duplicate);
    let blank = GrayImage::filled(W, H, 90);
    assert!(matches!(
        session.add_pair(&lf[1].image, &blank),
        SampleOutcome::Rejected(_)
    ));
    for (l, r) in lf.iter().zip(rf).skip(1) {
        session.add_pair(&l.image, &r.image);
    }
    assert!(session.len() >= 2);
    let cal = session.calibrate().unwrap();
    assert!(cal.translation().x < 0.0);
}
