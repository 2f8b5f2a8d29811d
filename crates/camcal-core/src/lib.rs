//! Core types for camera calibration.
//!
//! Purely geometric building blocks shared by the detector and the
//! calibration engine: gray image views, planar homographies, the
//! checkerboard target model and the plumb_bob pinhole camera. No detector
//! and no optimizer live here.

mod camera;
mod homography;
mod image;
mod logger;
pub mod synthetic;
mod target;

pub use camera::{Distortion, Intrinsics, PinholeCamera, Pose, PLUMB_BOB};
pub use homography::{estimate_homography, Homography, HomographyError};
pub use image::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView};
pub use target::{PointObservation, TargetError, TargetGeometry};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
