use camcal_chessboard::ChessboardParams;
use camcal_core::TargetGeometry;
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;
use crate::solver::SolverOptions;

/// Estimation switches shared by the mono and stereo calibrators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationOptions {
    /// Keep `k3` at zero.
    pub fix_k3: bool,
    /// Keep `fx / fy` at its initial value.
    pub fix_aspect_ratio: bool,
    /// Keep the principal point at the image centre.
    pub fix_principal_point: bool,
    /// Keep `p1` and `p2` at zero.
    pub zero_tangent_dist: bool,
    /// Free scaling of the rectified projection: 0 keeps only valid pixels,
    /// 1 keeps every source pixel.
    pub alpha: f64,
    /// Fewest usable observations (pairs for stereo) accepted.
    pub min_observations: usize,
    pub solver: SolverOptions,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            fix_k3: true,
            fix_aspect_ratio: false,
            fix_principal_point: false,
            zero_tangent_dist: false,
            alpha: 0.0,
            min_observations: 1,
            solver: SolverOptions::default(),
        }
    }
}

/// Everything needed to build a calibrator, loadable from JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibratorConfig {
    pub geometry: TargetGeometry,
    #[serde(default)]
    pub detector: ChessboardParams,
    #[serde(default)]
    pub options: CalibrationOptions,
}

impl CalibratorConfig {
    pub fn new(geometry: TargetGeometry) -> Self {
        Self {
            geometry,
            detector: ChessboardParams::default(),
            options: CalibrationOptions::default(),
        }
    }

    /// Parses and validates a JSON config.
    pub fn from_json(json: &str) -> Result<Self, CalibrationError> {
        let config: Self = serde_json::from_str(json)?;
        config.geometry.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, CalibrationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fix_k3_only() {
        let o = CalibrationOptions::default();
        assert!(o.fix_k3);
        assert!(!o.fix_aspect_ratio && !o.fix_principal_point && !o.zero_tangent_dist);
        assert_eq!(o.min_observations, 1);
        assert_eq!(o.alpha, 0.0);
    }

    #[test]
    fn config_json_round_trip() {
        let mut config = CalibratorConfig::new(TargetGeometry::new(8, 6, 0.108).unwrap());
        config.options.alpha = 0.5;
        config.detector.border_px = 4.0;
        let back = CalibratorConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let json = r#"{"geometry": {"cols": 7, "rows": 5, "spacing": 0.03},
                       "options": {"fix_aspect_ratio": true}}"#;
        let config = CalibratorConfig::from_json(json).unwrap();
        assert!(config.options.fix_aspect_ratio);
        assert!(config.options.fix_k3);
        assert_eq!(config.detector, ChessboardParams::default());
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let json = r#"{"geometry": {"cols": 1, "rows": 5, "spacing": 0.03}}"#;
        assert!(matches!(
            CalibratorConfig::from_json(json),
            Err(CalibrationError::Target(_))
        ));
    }
}
