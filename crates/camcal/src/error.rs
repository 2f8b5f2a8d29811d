use camcal_chessboard::DetectionFailure;
use camcal_core::TargetError;

/// Failure of a calibration call.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error(transparent)]
    Target(#[from] TargetError),

    #[error(transparent)]
    Detection(#[from] DetectionFailure),

    /// Not enough images produced a usable detection. `first_failure` holds
    /// the first per-image detection failure when every image failed.
    #[error("{usable} of {total} observations usable, need {required}")]
    InsufficientData {
        usable: usize,
        total: usize,
        required: usize,
        first_failure: Option<DetectionFailure>,
    },

    #[error("left and right image counts differ ({left} vs {right})")]
    MismatchedPairs { left: usize, right: usize },

    #[error(
        "observation {index} has shape {cols}x{rows}, expected {expected_cols}x{expected_rows}"
    )]
    ObservationShape {
        index: usize,
        cols: usize,
        rows: usize,
        expected_cols: usize,
        expected_rows: usize,
    },

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("optimizer did not converge: {reason}")]
    NotConverged { reason: String },

    #[error("invalid calibration message: {0}")]
    InvalidMessage(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CalibrationError {
    pub(crate) fn numerical(msg: impl Into<String>) -> Self {
        Self::Numerical(msg.into())
    }

    pub(crate) fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }
}
