//! Transport-neutral calibration records modeled on a camera-info message.

use camcal_core::{Distortion, Intrinsics, PinholeCamera, PLUMB_BOB};
use nalgebra::{Matrix3, Matrix3x4, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;
use crate::rectify::RectifiedCamera;

/// One camera: image size, plumb_bob distortion, and row-major `K`, `R`, `P`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMessage {
    pub width: u32,
    pub height: u32,
    pub distortion_model: String,
    pub d: Vec<f64>,
    pub k: [f64; 9],
    pub r: [f64; 9],
    pub p: [f64; 12],
}

/// Both cameras of a rig plus `X_right = R * X_left + T`, `R` row-major.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StereoCalibrationMessage {
    pub left: CalibrationMessage,
    pub right: CalibrationMessage,
    pub rotation: [f64; 9],
    pub translation: [f64; 3],
}

fn row_major<const N: usize>(values: impl Iterator<Item = f64>) -> [f64; N] {
    let mut out = [0.0; N];
    for (o, v) in out.iter_mut().zip(values) {
        *o = v;
    }
    out
}

pub(crate) fn matrix3_to_array(m: &Matrix3<f64>) -> [f64; 9] {
    row_major(m.transpose().iter().copied())
}

pub(crate) fn matrix3_from_array(a: &[f64; 9]) -> Matrix3<f64> {
    Matrix3::from_row_slice(a)
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

impl CalibrationMessage {
    pub fn from_rectified(cam: &RectifiedCamera) -> Self {
        Self {
            width: cam.size.0 as u32,
            height: cam.size.1 as u32,
            distortion_model: PLUMB_BOB.to_string(),
            d: cam.camera.distortion.to_array().to_vec(),
            k: matrix3_to_array(&cam.camera.intrinsics.k_matrix()),
            r: matrix3_to_array(&cam.rectification),
            p: row_major(cam.projection.transpose().iter().copied()),
        }
    }

    /// Validates the record and rebuilds the camera model.
    pub fn to_rectified(&self) -> Result<RectifiedCamera, CalibrationError> {
        if self.width == 0 || self.height == 0 {
            return Err(CalibrationError::invalid_message(format!(
                "image size {}x{}",
                self.width, self.height
            )));
        }
        if self.distortion_model != PLUMB_BOB {
            return Err(CalibrationError::invalid_message(format!(
                "unsupported distortion model {:?}",
                self.distortion_model
            )));
        }
        if self.d.len() != 5 {
            return Err(CalibrationError::invalid_message(format!(
                "expected 5 distortion coefficients, got {}",
                self.d.len()
            )));
        }
        if !(all_finite(&self.d)
            && all_finite(&self.k)
            && all_finite(&self.r)
            && all_finite(&self.p))
        {
            return Err(CalibrationError::invalid_message("non-finite entries"));
        }
        let k = matrix3_from_array(&self.k);
        if k.determinant().abs() < 1e-12 {
            return Err(CalibrationError::invalid_message("camera matrix is not invertible"));
        }
        let intrinsics = Intrinsics::from_k_matrix(&k);
        if !intrinsics.is_valid() {
            return Err(CalibrationError::invalid_message("non-positive focal length"));
        }
        Ok(RectifiedCamera::new(
            PinholeCamera::new(intrinsics, Distortion::from_slice(&self.d)),
            (self.width as usize, self.height as usize),
            matrix3_from_array(&self.r),
            Matrix3x4::from_row_slice(&self.p),
        ))
    }

    pub fn to_json(&self) -> Result<String, CalibrationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CalibrationError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl StereoCalibrationMessage {
    pub(crate) fn relative(&self) -> Result<(Matrix3<f64>, Vector3<f64>), CalibrationError> {
        if !(all_finite(&self.rotation) && all_finite(&self.translation)) {
            return Err(CalibrationError::invalid_message("non-finite relative pose"));
        }
        let r = matrix3_from_array(&self.rotation);
        if ((r * r.transpose()) - Matrix3::identity()).amax() > 1e-6 || r.determinant() < 0.0 {
            return Err(CalibrationError::invalid_message("rotation is not orthonormal"));
        }
        Ok((r, Vector3::from(self.translation)))
    }

    pub fn to_json(&self) -> Result<String, CalibrationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CalibrationError> {
        Ok(serde_json::from_str(json)?)
    }
}
