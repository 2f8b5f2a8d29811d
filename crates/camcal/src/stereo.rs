use camcal_chessboard::{ChessboardDetector, ChessboardParams};
use camcal_core::{GrayImage, PinholeCamera, PointObservation, Pose, TargetGeometry};
use log::{debug, info};
use nalgebra::{Matrix3, Quaternion, Rotation3, Translation3, UnitQuaternion, Vector3, Vector4};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::batch::{detect_stereo, BatchSummary};
use crate::bundle::StereoProblem;
use crate::detect::GrayFrame;
use crate::error::CalibrationError;
use crate::export::{ost_section, stereo_report, yaml, StereoReport};
use crate::message::{matrix3_to_array, CalibrationMessage, StereoCalibrationMessage};
use crate::metrics::{chessboard_size, epipolar_error, reprojection_stats, ReprojectionStats};
use crate::mono::MonoCalibrator;
use crate::options::{CalibrationOptions, CalibratorConfig};
use crate::rectify::{stereo_rectify, RectifiedCamera};
use crate::solver::{solve, SolveReport};

pub const LEFT_CAMERA_NAME: &str = "left";
pub const RIGHT_CAMERA_NAME: &str = "right";

/// Calibrator for a rigid two-camera rig viewing one checkerboard.
#[derive(Clone, Debug)]
pub struct StereoCalibrator {
    mono: MonoCalibrator,
}

fn skew(t: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -t.z, t.y, t.z, 0.0, -t.x, -t.y, t.x, 0.0)
}

/// Essential and fundamental matrices of `X_right = R * X_left + T`.
///
/// `F` is scaled so that `F[2][2] = 1` when that entry is not zero.
pub fn epipolar_matrices(
    left: &PinholeCamera,
    right: &PinholeCamera,
    relative: &Pose,
) -> (Matrix3<f64>, Matrix3<f64>) {
    let r = relative.rotation.to_rotation_matrix().into_inner();
    let e = skew(&relative.translation.vector) * r;
    let kl_inv = left.intrinsics.k_matrix().try_inverse().unwrap_or_else(Matrix3::zeros);
    let kr_inv = right.intrinsics.k_matrix().try_inverse().unwrap_or_else(Matrix3::zeros);
    let mut f = kr_inv.transpose() * e * kl_inv;
    if f[(2, 2)].abs() > f64::EPSILON {
        f /= f[(2, 2)];
    }
    (e, f)
}

/// Mean of the per-view relative poses `pose_right * pose_left^-1`.
fn average_relative(left: &[Pose], right: &[Pose]) -> Pose {
    let rels: Vec<Pose> = left.iter().zip(right).map(|(l, r)| r * l.inverse()).collect();
    let reference = rels.first().map(|p| p.rotation.coords).unwrap_or_else(Vector4::zeros);
    let mut q = Vector4::zeros();
    let mut t = Vector3::zeros();
    for rel in &rels {
        let c = rel.rotation.coords;
        if c.dot(&reference) < 0.0 {
            q -= c;
        } else {
            q += c;
        }
        t += rel.translation.vector;
    }
    let n = rels.len().max(1) as f64;
    Pose::from_parts(
        Translation3::from(t / n),
        UnitQuaternion::from_quaternion(Quaternion::from_vector(q)),
    )
}

impl StereoCalibrator {
    pub fn new(geometry: TargetGeometry) -> Self {
        Self::from_config(CalibratorConfig::new(geometry))
    }

    pub fn from_config(config: CalibratorConfig) -> Self {
        Self {
            mono: MonoCalibrator::from_config(config),
        }
    }

    pub fn with_options(self, options: CalibrationOptions) -> Self {
        Self {
            mono: self.mono.with_options(options),
        }
    }

    pub fn with_detector_params(self, params: ChessboardParams) -> Self {
        Self {
            mono: self.mono.with_detector_params(params),
        }
    }

    pub fn geometry(&self) -> &TargetGeometry {
        self.mono.geometry()
    }

    pub fn options(&self) -> &CalibrationOptions {
        self.mono.options()
    }

    pub fn detector(&self) -> &ChessboardDetector {
        self.mono.detector()
    }

    /// Calibrates from simultaneous image pairs; `left[k]` and `right[k]`
    /// must show the board at the same instant.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, left, right), fields(pairs = left.len()))
    )]
    pub fn calibrate<L: GrayFrame, R: GrayFrame>(
        &self,
        left: &[L],
        right: &[R],
    ) -> Result<StereoCalibration, CalibrationError> {
        if left.len() != right.len() {
            return Err(CalibrationError::MismatchedPairs {
                left: left.len(),
                right: right.len(),
            });
        }
        self.geometry().validate()?;
        let batch = detect_stereo(self.detector(), left, right);
        let required = self.options().min_observations.max(1);
        let size = match batch.size {
            Some(size) if batch.summary.usable() >= required => size,
            _ => {
                return Err(CalibrationError::InsufficientData {
                    usable: batch.summary.usable(),
                    total: batch.summary.total,
                    required,
                    first_failure: batch.summary.first_failure(),
                })
            }
        };
        self.finish(batch.left, batch.right, batch.summary, size)
    }

    /// Calibrates from paired detections made elsewhere.
    pub fn calibrate_observations(
        &self,
        left: &[PointObservation],
        right: &[PointObservation],
        size: (usize, usize),
    ) -> Result<StereoCalibration, CalibrationError> {
        if left.len() != right.len() {
            return Err(CalibrationError::MismatchedPairs {
                left: left.len(),
                right: right.len(),
            });
        }
        let geometry = self.geometry();
        geometry.validate()?;
        if let Some((index, obs)) = left
            .iter()
            .chain(right)
            .enumerate()
            .find(|(_, o)| !o.matches(geometry))
        {
            return Err(CalibrationError::ObservationShape {
                index: index % left.len().max(1),
                cols: obs.cols,
                rows: obs.rows,
                expected_cols: geometry.cols,
                expected_rows: geometry.rows,
            });
        }
        let required = self.options().min_observations.max(1);
        if left.len() < required || size.0 == 0 || size.1 == 0 {
            return Err(CalibrationError::InsufficientData {
                usable: left.len(),
                total: left.len(),
                required,
                first_failure: None,
            });
        }
        let mut summary = BatchSummary::new(left.len());
        summary.contributing = (0..left.len()).collect();
        self.finish(left.to_vec(), right.to_vec(), summary, size)
    }

    fn finish(
        &self,
        left_obs: Vec<PointObservation>,
        right_obs: Vec<PointObservation>,
        summary: BatchSummary,
        size: (usize, usize),
    ) -> Result<StereoCalibration, CalibrationError> {
        let lv: Vec<&PointObservation> = left_obs.iter().collect();
        let rv: Vec<&PointObservation> = right_obs.iter().collect();
        let left = self.mono.estimate(&lv, size)?;
        let right = self.mono.estimate(&rv, size)?;
        debug!(
            "per-camera final cost: left {:.3e}, right {:.3e}",
            left.report.final_cost, right.report.final_cost
        );

        let relative0 = average_relative(&left.poses, &right.poses);
        let object = self.geometry().object_points();
        let problem = StereoProblem {
            object: &object,
            left: &lv,
            right: &rv,
            left_camera: left.camera,
            right_camera: right.camera,
        };
        let x0 = problem.pack(&relative0, &left.poses);
        let (x, report) = solve(&problem, x0, &self.options().solver)?;
        let (relative, left_poses) = StereoProblem::unpack(&x);

        let right_poses: Vec<Pose> = left_poses.iter().map(|p| relative * p).collect();
        let used = &summary.contributing;
        let left_stats =
            reprojection_stats(&left.camera, self.geometry(), &left_poses, &lv, used);
        let right_stats =
            reprojection_stats(&right.camera, self.geometry(), &right_poses, &rv, used);
        info!(
            "stereo calibration from {} of {} pairs: baseline {:.4}, rms {:.4} / {:.4} px",
            summary.usable(),
            summary.total,
            relative.translation.vector.norm(),
            left_stats.rms,
            right_stats.rms
        );

        let mut calibration = StereoCalibration::assemble(
            self.detector().clone(),
            left.camera,
            right.camera,
            size,
            relative,
            self.options().alpha,
        );
        calibration.left_poses = left_poses;
        calibration.left_observations = left_obs;
        calibration.right_observations = right_obs;
        calibration.batch = Some(summary);
        calibration.left_reprojection = Some(left_stats);
        calibration.right_reprojection = Some(right_stats);
        calibration.solve = Some(report);
        Ok(calibration)
    }

    /// Rebuilds a calibration from a message. Rectification is taken from the
    /// message as is; poses and batch statistics are absent.
    pub fn from_message(
        &self,
        msg: &StereoCalibrationMessage,
    ) -> Result<StereoCalibration, CalibrationError> {
        let left = msg.left.to_rectified()?;
        let right = msg.right.to_rectified()?;
        if left.size != right.size {
            return Err(CalibrationError::invalid_message(format!(
                "left is {}x{}, right is {}x{}",
                left.size.0, left.size.1, right.size.0, right.size.1
            )));
        }
        let (r, t) = msg.relative()?;
        let relative = Pose::from_parts(
            Translation3::from(t),
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r)),
        );
        let (essential, fundamental) = epipolar_matrices(&left.camera, &right.camera, &relative);
        Ok(StereoCalibration {
            detector: self.detector().clone(),
            left,
            right,
            relative,
            essential,
            fundamental,
            alpha: self.options().alpha,
            left_poses: Vec::new(),
            left_observations: Vec::new(),
            right_observations: Vec::new(),
            batch: None,
            left_reprojection: None,
            right_reprojection: None,
            solve: None,
        })
    }
}

/// Result of a stereo calibration: both rectified cameras and the rig geometry.
#[derive(Clone, Debug)]
pub struct StereoCalibration {
    detector: ChessboardDetector,
    left: RectifiedCamera,
    right: RectifiedCamera,
    relative: Pose,
    essential: Matrix3<f64>,
    fundamental: Matrix3<f64>,
    alpha: f64,
    left_poses: Vec<Pose>,
    left_observations: Vec<PointObservation>,
    right_observations: Vec<PointObservation>,
    batch: Option<BatchSummary>,
    left_reprojection: Option<ReprojectionStats>,
    right_reprojection: Option<ReprojectionStats>,
    solve: Option<SolveReport>,
}

impl StereoCalibration {
    fn assemble(
        detector: ChessboardDetector,
        left: PinholeCamera,
        right: PinholeCamera,
        size: (usize, usize),
        relative: Pose,
        alpha: f64,
    ) -> Self {
        let rect = stereo_rectify(&left, &right, size, &relative, alpha);
        let (essential, fundamental) = epipolar_matrices(&left, &right, &relative);
        Self {
            detector,
            left: RectifiedCamera::new(left, size, rect.r1, rect.p1),
            right: RectifiedCamera::new(right, size, rect.r2, rect.p2),
            relative,
            essential,
            fundamental,
            alpha,
            left_poses: Vec::new(),
            left_observations: Vec::new(),
            right_observations: Vec::new(),
            batch: None,
            left_reprojection: None,
            right_reprojection: None,
            solve: None,
        }
    }

    pub fn left(&self) -> &RectifiedCamera {
        &self.left
    }

    pub fn right(&self) -> &RectifiedCamera {
        &self.right
    }

    /// `R` of `X_right = R * X_left + T`.
    pub fn rotation(&self) -> Matrix3<f64> {
        self.relative.rotation.to_rotation_matrix().into_inner()
    }

    /// `T` of `X_right = R * X_left + T`.
    pub fn translation(&self) -> Vector3<f64> {
        self.relative.translation.vector
    }

    pub fn relative_pose(&self) -> &Pose {
        &self.relative
    }

    pub fn essential(&self) -> &Matrix3<f64> {
        &self.essential
    }

    pub fn fundamental(&self) -> &Matrix3<f64> {
        &self.fundamental
    }

    pub fn geometry(&self) -> &TargetGeometry {
        self.detector.geometry()
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn size(&self) -> (usize, usize) {
        self.left.size
    }

    /// Left-camera board pose of every contributing pair.
    pub fn left_poses(&self) -> &[Pose] {
        &self.left_poses
    }

    pub fn observations(&self) -> (&[PointObservation], &[PointObservation]) {
        (&self.left_observations, &self.right_observations)
    }

    pub fn batch(&self) -> Option<&BatchSummary> {
        self.batch.as_ref()
    }

    pub fn reprojection(&self) -> (Option<&ReprojectionStats>, Option<&ReprojectionStats>) {
        (self.left_reprojection.as_ref(), self.right_reprojection.as_ref())
    }

    pub fn solve_report(&self) -> Option<&SolveReport> {
        self.solve.as_ref()
    }

    /// Same rig with the rectification recomputed for `alpha`.
    pub fn with_alpha(&self, alpha: f64) -> Self {
        let fresh = Self::assemble(
            self.detector.clone(),
            self.left.camera,
            self.right.camera,
            self.left.size,
            self.relative,
            alpha,
        );
        Self {
            left: fresh.left,
            right: fresh.right,
            alpha,
            ..self.clone()
        }
    }

    /// Rectified, undistorted corners of both images of one pair.
    fn rectified_pair<L: GrayFrame, R: GrayFrame>(
        &self,
        left: &L,
        right: &R,
    ) -> Result<(PointObservation, PointObservation), CalibrationError> {
        let l = self.detector.detect(&left.gray_view())?;
        let r = self.detector.detect(&right.gray_view())?.aligned_to(&l);
        Ok((
            self.left.undistort_observation(&l),
            self.right.undistort_observation(&r),
        ))
    }

    /// RMS vertical disparity of the board corners after rectification.
    pub fn epipolar_error<L: GrayFrame, R: GrayFrame>(
        &self,
        left: &L,
        right: &R,
    ) -> Result<f64, CalibrationError> {
        let (l, r) = self.rectified_pair(left, right)?;
        epipolar_error(&l, &r)
    }

    /// Corner spacing re-derived by triangulating the board, in target units.
    pub fn chessboard_size<L: GrayFrame, R: GrayFrame>(
        &self,
        left: &L,
        right: &R,
    ) -> Result<f64, CalibrationError> {
        let (l, r) = self.rectified_pair(left, right)?;
        chessboard_size(
            &l,
            &r,
            &self.left.projection,
            &self.right.projection,
            self.geometry(),
        )
    }

    /// Rectified copies of both images.
    pub fn remap<L: GrayFrame, R: GrayFrame>(
        &self,
        left: &L,
        right: &R,
    ) -> Result<(GrayImage, GrayImage), CalibrationError> {
        Ok((
            self.left.remap(&left.gray_view())?,
            self.right.remap(&right.gray_view())?,
        ))
    }

    pub fn report(&self) -> String {
        stereo_report(&StereoReport {
            left: &self.left,
            right: &self.right,
            rotation: self.rotation(),
            translation: self.translation(),
            batch: self.batch.as_ref(),
            left_stats: self.left_reprojection.as_ref(),
            right_stats: self.right_reprojection.as_ref(),
        })
    }

    pub fn ost(&self) -> String {
        ost_section(LEFT_CAMERA_NAME, &self.left) + &ost_section(RIGHT_CAMERA_NAME, &self.right)
    }

    /// Camera-info YAML of the left and right cameras.
    pub fn yaml(&self) -> (String, String) {
        (
            yaml(LEFT_CAMERA_NAME, &self.left),
            yaml(RIGHT_CAMERA_NAME, &self.right),
        )
    }

    pub fn as_message(&self) -> StereoCalibrationMessage {
        let t = self.translation();
        StereoCalibrationMessage {
            left: CalibrationMessage::from_rectified(&self.left),
            right: CalibrationMessage::from_rectified(&self.right),
            rotation: matrix3_to_array(&self.rotation()),
            translation: [t.x, t.y, t.z],
        }
    }
}
