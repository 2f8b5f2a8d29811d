//! Mono and stereo camera calibration from checkerboard images.
//!
//! The crate ties the checkerboard detector from `camcal-chessboard` to a
//! Zhang-style estimator: closed-form intrinsics from per-view homographies,
//! then a Levenberg-Marquardt refinement of the plumb_bob camera and every
//! board pose. Stereo rigs additionally get the relative pose, essential and
//! fundamental matrices and rectification.
//!
//! ## Quickstart
//!
//! ```no_run
//! use camcal::{MonoCalibrator, TargetGeometry};
//! use image::ImageReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let geometry = TargetGeometry::new(8, 6, 0.108)?;
//! let mut images = Vec::new();
//! for path in ["a.png", "b.png", "c.png"] {
//!     images.push(ImageReader::open(path)?.decode()?.to_luma8());
//! }
//!
//! let calibration = MonoCalibrator::new(geometry).calibrate(&images)?;
//! println!("{}", calibration.report());
//! std::fs::write("camera.ini", calibration.ost())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - [`MonoCalibrator`] / [`MonoCalibration`]: single camera.
//! - [`StereoCalibrator`] / [`StereoCalibration`]: two synchronized cameras.
//! - [`CaptureSession`] / [`StereoCaptureSession`]: frame-by-frame capture
//!   with coverage tracking.
//! - [`metrics`]: linear error, epipolar error and board size checks.
//! - [`CalibrationMessage`]: camera-info style records, JSON via serde.
//! - `camcal::core` and `camcal::chessboard`: the underlying crates.

pub use camcal_chessboard as chessboard;
pub use camcal_core as core;

mod batch;
mod bundle;
pub mod detect;
mod error;
mod export;
pub mod linear;
mod message;
pub mod metrics;
mod mono;
mod options;
pub mod rectify;
mod session;
pub mod solver;
mod stereo;

pub use batch::{BatchSummary, DiscardReason};
pub use detect::GrayFrame;
pub use error::CalibrationError;
pub use export::MONO_CAMERA_NAME;
pub use message::{CalibrationMessage, StereoCalibrationMessage};
pub use metrics::{chessboard_size, epipolar_error, linear_error, ReprojectionStats, ViewError};
pub use mono::{MonoCalibration, MonoCalibrator};
pub use options::{CalibrationOptions, CalibratorConfig};
pub use rectify::{
    optimal_new_camera_matrix, stereo_rectify, RectifiedCamera, StereoRectification, UndistortMap,
};
pub use session::{
    sample_params, CaptureSession, ParamProgress, SampleOutcome, StereoCaptureSession,
    ENOUGH_SAMPLES, MIN_SAMPLE_DISTANCE, PARAM_RANGES,
};
pub use solver::{SolveReport, SolverOptions};
pub use stereo::{
    epipolar_matrices, StereoCalibration, StereoCalibrator, LEFT_CAMERA_NAME, RIGHT_CAMERA_NAME,
};

pub use camcal_chessboard::{ChessboardDetector, ChessboardParams, DetectionFailure};
pub use camcal_core::{
    Distortion, GrayImage, GrayImageView, Intrinsics, PinholeCamera, PointObservation, Pose,
    TargetGeometry,
};

#[cfg(feature = "image")]
pub use detect::{gray_image_from_slice, gray_view, to_image};
