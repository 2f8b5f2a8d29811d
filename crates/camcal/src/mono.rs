use camcal_chessboard::{ChessboardDetector, ChessboardParams};
use camcal_core::{
    GrayImage, Intrinsics, PinholeCamera, PointObservation, Pose, TargetGeometry,
};
use log::{info, warn};
use nalgebra::{Matrix3, Matrix3x4, Point2};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::batch::{detect_mono, BatchSummary};
use crate::bundle::{IntrinsicMask, MonoProblem};
use crate::detect::GrayFrame;
use crate::error::CalibrationError;
use crate::export::{mono_report, ost_section, yaml, MONO_CAMERA_NAME};
use crate::linear::{initial_intrinsics, planar_pose, view_homography};
use crate::message::CalibrationMessage;
use crate::metrics::{linear_error, reprojection_stats, ReprojectionStats};
use crate::options::{CalibrationOptions, CalibratorConfig};
use crate::rectify::RectifiedCamera;
use crate::solver::{solve, SolveReport};

/// Single-camera calibrator for a fixed checkerboard.
#[derive(Clone, Debug)]
pub struct MonoCalibrator {
    detector: ChessboardDetector,
    options: CalibrationOptions,
}

/// Camera, poses and solver outcome of one estimation run.
pub(crate) struct MonoEstimate {
    pub camera: PinholeCamera,
    pub poses: Vec<Pose>,
    pub report: SolveReport,
}

impl MonoCalibrator {
    pub fn new(geometry: TargetGeometry) -> Self {
        Self::from_config(CalibratorConfig::new(geometry))
    }

    pub fn from_config(config: CalibratorConfig) -> Self {
        Self {
            detector: ChessboardDetector::with_params(config.geometry, config.detector),
            options: config.options,
        }
    }

    pub fn with_options(mut self, options: CalibrationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_detector_params(self, params: ChessboardParams) -> Self {
        Self {
            detector: ChessboardDetector::with_params(*self.detector.geometry(), params),
            ..self
        }
    }

    pub fn geometry(&self) -> &TargetGeometry {
        self.detector.geometry()
    }

    pub fn options(&self) -> &CalibrationOptions {
        &self.options
    }

    pub fn detector(&self) -> &ChessboardDetector {
        &self.detector
    }

    /// Detects the board in every image and calibrates from the usable ones.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, images), fields(images = images.len()))
    )]
    pub fn calibrate<I: GrayFrame>(
        &self,
        images: &[I],
    ) -> Result<MonoCalibration, CalibrationError> {
        self.geometry().validate()?;
        let batch = detect_mono(&self.detector, images);
        let required = self.options.min_observations.max(1);
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
        self.finish(batch.observations, batch.summary, size)
    }

    /// Calibrates from detections made elsewhere, all of image size `size`.
    pub fn calibrate_observations(
        &self,
        observations: &[PointObservation],
        size: (usize, usize),
    ) -> Result<MonoCalibration, CalibrationError> {
        let geometry = self.geometry();
        geometry.validate()?;
        for (index, obs) in observations.iter().enumerate() {
            if !obs.matches(geometry) {
                return Err(CalibrationError::ObservationShape {
                    index,
                    cols: obs.cols,
                    rows: obs.rows,
                    expected_cols: geometry.cols,
                    expected_rows: geometry.rows,
                });
            }
        }
        let required = self.options.min_observations.max(1);
        if observations.len() < required || size.0 == 0 || size.1 == 0 {
            return Err(CalibrationError::InsufficientData {
                usable: observations.len(),
                total: observations.len(),
                required,
                first_failure: None,
            });
        }
        let mut summary = BatchSummary::new(observations.len());
        summary.contributing = (0..observations.len()).collect();
        self.finish(observations.to_vec(), summary, size)
    }

    fn finish(
        &self,
        observations: Vec<PointObservation>,
        summary: BatchSummary,
        size: (usize, usize),
    ) -> Result<MonoCalibration, CalibrationError> {
        let views: Vec<&PointObservation> = observations.iter().collect();
        let estimate = self.estimate(&views, size)?;
        let stats = reprojection_stats(
            &estimate.camera,
            self.geometry(),
            &estimate.poses,
            &views,
            &summary.contributing,
        );
        info!(
            "mono calibration from {} of {} images: fx={:.2} fy={:.2} cx={:.2} cy={:.2} rms {:.4}",
            summary.usable(),
            summary.total,
            estimate.camera.intrinsics.fx,
            estimate.camera.intrinsics.fy,
            estimate.camera.intrinsics.cx,
            estimate.camera.intrinsics.cy,
            stats.rms
        );
        Ok(MonoCalibration {
            detector: self.detector.clone(),
            rectified: RectifiedCamera::mono(estimate.camera, size, self.options.alpha),
            alpha: self.options.alpha,
            poses: estimate.poses,
            observations,
            batch: Some(summary),
            reprojection: Some(stats),
            solve: Some(estimate.report),
        })
    }

    /// Closed-form initialization followed by the joint refinement.
    pub(crate) fn estimate(
        &self,
        views: &[&PointObservation],
        size: (usize, usize),
    ) -> Result<MonoEstimate, CalibrationError> {
        let geometry = self.geometry();
        let homographies = views
            .iter()
            .map(|obs| view_homography(geometry, obs))
            .collect::<Result<Vec<_>, _>>()?;
        let k0 = initial_intrinsics(&homographies, size, self.options.fix_aspect_ratio);
        let base = PinholeCamera::new(k0, Default::default());
        let poses = views
            .iter()
            .map(|obs| planar_pose(&base, geometry, obs))
            .collect::<Result<Vec<_>, _>>()?;

        if views.len() < 3 {
            warn!(
                "{} view(s): principal point and tangential distortion held fixed",
                views.len()
            );
        }
        let object = geometry.object_points();
        let problem = MonoProblem {
            object: &object,
            observations: views,
            mask: IntrinsicMask::new(&self.options, views.len(), &k0),
            base,
        };
        let x0 = problem.pack(&base, &poses);
        let (x, report) = solve(&problem, x0, &self.options.solver)?;
        let (camera, poses) = problem.unpack(&x);
        if !camera.intrinsics.is_valid() {
            return Err(CalibrationError::NotConverged {
                reason: "focal length left the valid range".to_string(),
            });
        }
        Ok(MonoEstimate {
            camera,
            poses,
            report,
        })
    }

    /// Rebuilds a calibration from a message; it has no poses and no batch statistics.
    pub fn from_message(
        &self,
        msg: &CalibrationMessage,
    ) -> Result<MonoCalibration, CalibrationError> {
        let rectified = msg.to_rectified()?;
        Ok(MonoCalibration {
            detector: self.detector.clone(),
            rectified,
            alpha: self.options.alpha,
            poses: Vec::new(),
            observations: Vec::new(),
            batch: None,
            reprojection: None,
            solve: None,
        })
    }
}

/// Result of a single-camera calibration.
#[derive(Clone, Debug)]
pub struct MonoCalibration {
    detector: ChessboardDetector,
    rectified: RectifiedCamera,
    alpha: f64,
    poses: Vec<Pose>,
    observations: Vec<PointObservation>,
    batch: Option<BatchSummary>,
    reprojection: Option<ReprojectionStats>,
    solve: Option<SolveReport>,
}

impl MonoCalibration {
    pub fn camera(&self) -> &PinholeCamera {
        &self.rectified.camera
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.rectified.camera.intrinsics
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        self.rectified.camera.intrinsics.k_matrix()
    }

    /// `[k1, k2, p1, p2, k3]`.
    pub fn distortion(&self) -> [f64; 5] {
        self.rectified.camera.distortion.to_array()
    }

    /// `(width, height)` in pixels.
    pub fn size(&self) -> (usize, usize) {
        self.rectified.size
    }

    pub fn rectification(&self) -> &Matrix3<f64> {
        &self.rectified.rectification
    }

    pub fn projection(&self) -> &Matrix3x4<f64> {
        &self.rectified.projection
    }

    pub fn rectified_camera(&self) -> &RectifiedCamera {
        &self.rectified
    }

    pub fn geometry(&self) -> &TargetGeometry {
        self.detector.geometry()
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Board pose of every contributing image, in input order.
    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn observations(&self) -> &[PointObservation] {
        &self.observations
    }

    pub fn batch(&self) -> Option<&BatchSummary> {
        self.batch.as_ref()
    }

    pub fn reprojection(&self) -> Option<&ReprojectionStats> {
        self.reprojection.as_ref()
    }

    pub fn solve_report(&self) -> Option<&SolveReport> {
        self.solve.as_ref()
    }

    /// Same camera with the projection recomputed for `alpha`.
    pub fn with_alpha(&self, alpha: f64) -> Self {
        Self {
            rectified: RectifiedCamera::mono(self.rectified.camera, self.rectified.size, alpha),
            alpha,
            ..self.clone()
        }
    }

    pub fn undistort_points(&self, points: &[Point2<f64>]) -> Vec<Point2<f64>> {
        self.rectified.undistort_points(points)
    }

    /// Detects the board in `image`, undistorts the corners with this
    /// calibration and returns their linear error.
    pub fn linear_error<I: GrayFrame>(&self, image: &I) -> Result<f64, CalibrationError> {
        let obs = self.detector.detect(&image.gray_view())?;
        let undistorted = self.rectified.undistort_observation(&obs);
        linear_error(&undistorted, self.geometry())
    }

    /// Undistorted copy of `image`.
    pub fn remap<I: GrayFrame>(&self, image: &I) -> Result<GrayImage, CalibrationError> {
        self.rectified.remap(&image.gray_view())
    }

    pub fn report(&self) -> String {
        mono_report(&self.rectified, self.batch.as_ref(), self.reprojection.as_ref())
    }

    pub fn ost(&self) -> String {
        ost_section(MONO_CAMERA_NAME, &self.rectified)
    }

    pub fn yaml(&self) -> String {
        yaml(MONO_CAMERA_NAME, &self.rectified)
    }

    pub fn as_message(&self) -> CalibrationMessage {
        CalibrationMessage::from_rectified(&self.rectified)
    }
}
