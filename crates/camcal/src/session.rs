//! Incremental capture: detections are added one frame at a time and kept
//! only when they differ enough from what is already stored.

use std::f64::consts::FRAC_PI_2;

use camcal_chessboard::DetectionFailure;
use camcal_core::PointObservation;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::detect::GrayFrame;
use crate::error::CalibrationError;
use crate::mono::{MonoCalibration, MonoCalibrator};
use crate::stereo::{StereoCalibration, StereoCalibrator};

/// Smallest L1 distance in sample space between two stored samples.
pub const MIN_SAMPLE_DISTANCE: f64 = 0.2;
/// Span of x, y, size and skew that counts as full coverage.
pub const PARAM_RANGES: [f64; 4] = [0.7, 0.7, 0.4, 0.5];
/// Sample count after which the session is good enough regardless of coverage.
pub const ENOUGH_SAMPLES: usize = 40;

const PARAM_NAMES: [&str; 4] = ["x", "y", "size", "skew"];

#[derive(Clone, Debug, PartialEq)]
pub enum SampleOutcome {
    Accepted,
    /// Too close to a stored sample.
    Duplicate,
    Rejected(DetectionFailure),
    /// The frame's size differs from the session's first frame.
    SizeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
}

/// Coverage of one sample parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamProgress {
    pub name: String,
    pub min: f64,
    pub max: f64,
    /// `min(1, (max - min) / range)`.
    pub progress: f64,
}

fn angle_at(a: nalgebra::Point2<f64>, b: nalgebra::Point2<f64>, c: nalgebra::Point2<f64>) -> f64 {
    let (ab, cb) = (a - b, c - b);
    let denom = ab.norm() * cb.norm();
    if denom < 1e-12 {
        return FRAC_PI_2;
    }
    (ab.dot(&cb) / denom).clamp(-1.0, 1.0).acos()
}

/// `[x, y, size, skew]` of one detection, each in `[0, 1]`.
///
/// x and y place the board centroid within the part of the image the board
/// can move in; size is the square root of the board's area fraction; skew
/// grows with the deviation of the top-right corner angle from a right angle.
pub fn sample_params(observation: &PointObservation, size: (usize, usize)) -> [f64; 4] {
    let (w, h) = (size.0 as f64, size.1 as f64);
    let [tl, tr, br, bl] = observation.outside_corners();

    let a = tr - tl;
    let b = br - tr;
    let c = bl - br;
    let p = b + c;
    let q = a + b;
    let area = (p.x * q.y - p.y * q.x).abs() / 2.0;
    let skew = (2.0 * (FRAC_PI_2 - angle_at(tl, tr, br)).abs()).min(1.0);
    let border = area.sqrt();

    let n = observation.len().max(1) as f64;
    let mean_x = observation.points.iter().map(|p| p.x).sum::<f64>() / n;
    let mean_y = observation.points.iter().map(|p| p.y).sum::<f64>() / n;
    let spread = |mean: f64, extent: f64| {
        let room = extent - border;
        if room <= 0.0 {
            0.5
        } else {
            ((mean - border / 2.0) / room).clamp(0.0, 1.0)
        }
    };

    [
        spread(mean_x, w),
        spread(mean_y, h),
        (area / (w * h)).sqrt(),
        skew,
    ]
}

fn param_distance(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// Stored sample parameters and the coverage logic shared by both sessions.
#[derive(Clone, Debug, Default)]
struct SampleDb {
    params: Vec<[f64; 4]>,
    size: Option<(usize, usize)>,
}

impl SampleDb {
    fn check_size(&self, size: (usize, usize)) -> Result<(), SampleOutcome> {
        match self.size {
            Some(expected) if expected != size => Err(SampleOutcome::SizeMismatch {
                expected,
                got: size,
            }),
            _ => Ok(()),
        }
    }

    /// Stores `params` when they are novel; the first stored sample fixes the size.
    fn admit(&mut self, params: [f64; 4], size: (usize, usize)) -> Result<(), SampleOutcome> {
        self.check_size(size)?;
        if !self.is_novel(&params) {
            return Err(SampleOutcome::Duplicate);
        }
        self.size = Some(size);
        self.params.push(params);
        Ok(())
    }

    fn is_novel(&self, params: &[f64; 4]) -> bool {
        self.params
            .iter()
            .all(|p| param_distance(p, params) > MIN_SAMPLE_DISTANCE)
    }

    fn progress(&self) -> Vec<ParamProgress> {
        (0..4)
            .map(|k| {
                let (lo, hi) = self
                    .params
                    .iter()
                    .map(|p| p[k])
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                        (lo.min(v), hi.max(v))
                    });
                let (lo, hi) = if self.params.is_empty() { (0.0, 0.0) } else { (lo, hi) };
                // small boards and square views are not required
                let floor = if k >= 2 { 0.0 } else { lo };
                ParamProgress {
                    name: PARAM_NAMES[k].to_string(),
                    min: lo,
                    max: hi,
                    progress: ((hi - floor) / PARAM_RANGES[k]).clamp(0.0, 1.0),
                }
            })
            .collect()
    }

    fn good_enough(&self) -> bool {
        !self.params.is_empty()
            && (self.params.len() >= ENOUGH_SAMPLES
                || self.progress().iter().all(|p| p.progress >= 1.0))
    }
}

/// Mono capture session.
#[derive(Clone, Debug)]
pub struct CaptureSession {
    calibrator: MonoCalibrator,
    db: SampleDb,
    observations: Vec<PointObservation>,
}

impl CaptureSession {
    pub fn new(calibrator: MonoCalibrator) -> Self {
        Self {
            calibrator,
            db: SampleDb::default(),
            observations: Vec::new(),
        }
    }

    pub fn calibrator(&self) -> &MonoCalibrator {
        &self.calibrator
    }

    /// Detects the board and stores the detection when it is novel. Frames of
    /// another size than the stored ones are refused before detection.
    pub fn add_frame<I: GrayFrame>(&mut self, image: &I) -> SampleOutcome {
        let view = image.gray_view();
        if let Err(outcome) = self.db.check_size(view.size()) {
            return outcome;
        }
        match self.calibrator.detector().detect(&view) {
            Ok(obs) => self.add_observation(obs, view.size()),
            Err(e) => SampleOutcome::Rejected(e),
        }
    }

    pub fn add_observation(
        &mut self,
        observation: PointObservation,
        size: (usize, usize),
    ) -> SampleOutcome {
        let params = sample_params(&observation, size);
        if let Err(outcome) = self.db.admit(params, size) {
            return outcome;
        }
        debug!("sample {} accepted: {params:?}", self.observations.len());
        self.observations.push(observation);
        SampleOutcome::Accepted
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[PointObservation] {
        &self.observations
    }

    pub fn progress(&self) -> Vec<ParamProgress> {
        self.db.progress()
    }

    pub fn good_enough(&self) -> bool {
        self.db.good_enough()
    }

    /// Runs the estimator on every stored detection.
    pub fn calibrate(&self) -> Result<MonoCalibration, CalibrationError> {
        self.calibrator
            .calibrate_observations(&self.observations, self.db.size.unwrap_or((0, 0)))
    }
}

/// Stereo capture session; novelty is judged on the left detection.
#[derive(Clone, Debug)]
pub struct StereoCaptureSession {
    calibrator: StereoCalibrator,
    db: SampleDb,
    left: Vec<PointObservation>,
    right: Vec<PointObservation>,
}

impl StereoCaptureSession {
    pub fn new(calibrator: StereoCalibrator) -> Self {
        Self {
            calibrator,
            db: SampleDb::default(),
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    pub fn calibrator(&self) -> &StereoCalibrator {
        &self.calibrator
    }

    pub fn add_pair<L: GrayFrame, R: GrayFrame>(&mut self, left: &L, right: &R) -> SampleOutcome {
        let (lv, rv) = (left.gray_view(), right.gray_view());
        if lv.size() != rv.size() {
            return SampleOutcome::SizeMismatch {
                expected: lv.size(),
                got: rv.size(),
            };
        }
        if let Err(outcome) = self.db.check_size(lv.size()) {
            return outcome;
        }
        let detector = self.calibrator.detector();
        let pair = detector
            .detect(&lv)
            .and_then(|l| detector.detect(&rv).map(|r| (l, r)));
        match pair {
            Ok((l, r)) => self.add_observations(l, r, lv.size()),
            Err(e) => SampleOutcome::Rejected(e),
        }
    }

    /// Stores a detected pair when it is novel. The right grid is relabelled
    /// to follow the left one, so a board seen near 90 degrees of roll gets
    /// the same corner order in both cameras.
    pub fn add_observations(
        &mut self,
        left: PointObservation,
        right: PointObservation,
        size: (usize, usize),
    ) -> SampleOutcome {
        let params = sample_params(&left, size);
        if let Err(outcome) = self.db.admit(params, size) {
            return outcome;
        }
        self.right.push(right.aligned_to(&left));
        self.left.push(left);
        SampleOutcome::Accepted
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn progress(&self) -> Vec<ParamProgress> {
        self.db.progress()
    }

    pub fn good_enough(&self) -> bool {
        self.db.good_enough()
    }

    pub fn calibrate(&self) -> Result<StereoCalibration, CalibrationError> {
        self.calibrator
            .calibrate_observations(&self.left, &self.right, self.db.size.unwrap_or((0, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camcal_core::TargetGeometry;
    use nalgebra::Point2;

    fn board(x0: f64, y0: f64, step: f64, shear: f64) -> PointObservation {
        let pts = (0..3)
            .flat_map(|j| (0..4).map(move |i| (i, j)))
            .map(|(i, j)| {
                Point2::new(
                    x0 + step * i as f64 + shear * j as f64,
                    y0 + step * j as f64,
                )
            })
            .collect();
        PointObservation::new(4, 3, pts).unwrap()
    }

    fn session() -> CaptureSession {
        CaptureSession::new(MonoCalibrator::new(TargetGeometry::new(4, 3, 0.1).unwrap()))
    }

    #[test]
    fn square_board_has_no_skew() {
        let p = sample_params(&board(100.0, 100.0, 20.0, 0.0), (640, 480));
        assert!(p[3].abs() < 1e-12);
        // 60 x 40 px board
        assert!((p[2] - (2400.0f64 / (640.0 * 480.0)).sqrt()).abs() < 1e-12);
        let sheared = sample_params(&board(100.0, 100.0, 20.0, 10.0), (640, 480));
        assert!(sheared[3] > 0.1);
    }

    #[test]
    fn near_duplicates_are_dropped() {
        let mut s = session();
        let vga = (640, 480);
        assert_eq!(
            s.add_observation(board(50.0, 50.0, 20.0, 0.0), vga),
            SampleOutcome::Accepted
        );
        assert_eq!(
            s.add_observation(board(52.0, 51.0, 20.0, 0.0), vga),
            SampleOutcome::Duplicate
        );
        assert_eq!(
            s.add_observation(board(450.0, 350.0, 20.0, 0.0), vga),
            SampleOutcome::Accepted
        );
        assert_eq!(s.len(), 2);
        assert!(matches!(
            s.add_observation(board(250.0, 250.0, 20.0, 0.0), (320, 240)),
            SampleOutcome::SizeMismatch { .. }
        ));
    }

    #[test]
    fn progress_fills_with_coverage() {
        let mut s = session();
        assert!(!s.good_enough());
        s.add_observation(board(10.0, 10.0, 20.0, 0.0), (640, 480));
        let p = s.progress();
        assert_eq!(p.len(), 4);
        assert_eq!(p[0].progress, 0.0);
        assert!(!s.good_enough());
        s.add_observation(board(570.0, 420.0, 20.0, 0.0), (640, 480));
        let p = s.progress();
        assert_eq!(p[0].progress, 1.0);
        assert_eq!(p[1].progress, 1.0);
        // small boards never reach full size coverage
        assert!(p[2].progress < 1.0);
        assert!(!s.good_enough());
    }

    #[test]
    fn rejected_frames_carry_the_failure() {
        let mut s = session();
        let blank = camcal_core::GrayImage::filled(64, 48, 128);
        assert!(matches!(
            s.add_frame(&blank),
            SampleOutcome::Rejected(DetectionFailure::TooFewCorners { .. })
        ));
        assert!(s.is_empty());
        assert!(matches!(
            s.calibrate(),
            Err(CalibrationError::InsufficientData { usable: 0, .. })
        ));
    }

    #[test]
    fn frames_of_another_size_are_refused_before_detection() {
        let mut s = session();
        let blank = camcal_core::GrayImage::filled(64, 48, 128);
        // a rejected frame does not fix the session size
        assert!(matches!(s.add_frame(&blank), SampleOutcome::Rejected(_)));
        s.add_observation(board(50.0, 50.0, 20.0, 0.0), (640, 480));
        assert_eq!(
            s.add_frame(&blank),
            SampleOutcome::SizeMismatch {
                expected: (640, 480),
                got: (64, 48)
            }
        );
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn stereo_pairs_of_another_size_are_refused_before_detection() {
        let geometry = TargetGeometry::new(4, 3, 0.1).unwrap();
        let mut s = StereoCaptureSession::new(StereoCalibrator::new(geometry));
        let left = board(50.0, 50.0, 20.0, 0.0);
        assert_eq!(
            s.add_observations(left.clone(), left, (640, 480)),
            SampleOutcome::Accepted
        );
        let blank = camcal_core::GrayImage::filled(64, 48, 128);
        assert!(matches!(
            s.add_pair(&blank, &blank),
            SampleOutcome::SizeMismatch { got: (64, 48), .. }
        ));
    }

    #[test]
    fn reversed_right_grid_follows_the_left_one() {
        let geometry = TargetGeometry::new(4, 3, 0.1).unwrap();
        let mut s = StereoCaptureSession::new(StereoCalibrator::new(geometry));
        let left = board(50.0, 50.0, 20.0, 0.0);
        let right = left.rotated(2).unwrap();
        assert_eq!(
            s.add_observations(left.clone(), right, (640, 480)),
            SampleOutcome::Accepted
        );
        assert_eq!(s.right[0], left);
    }
}
