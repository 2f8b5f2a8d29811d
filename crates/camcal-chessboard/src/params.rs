use chess_corners::ChessConfig;
use serde::{Deserialize, Serialize};

/// ChESS corner detection settings, forwarded to `chess-corners`.
///
/// Only the knobs the chessboard detector tunes are exposed; everything else
/// keeps the `ChessConfig::single_scale()` defaults.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessParams {
    /// Keep corners with response above `threshold_rel * max_response`.
    pub threshold_rel: f32,
    /// Half-size of the non-maximum suppression window.
    pub nms_radius: u32,
    pub min_cluster_size: u32,
    /// Corners closer than this many pixels to a stronger one are merged into it.
    pub merge_radius_px: f64,
}

impl Default for ChessParams {
    fn default() -> Self {
        let base = ChessConfig::single_scale().params;
        Self {
            threshold_rel: 0.2,
            nms_radius: 2,
            min_cluster_size: base.min_cluster_size,
            merge_radius_px: 1.5,
        }
    }
}

impl ChessParams {
    /// Single-scale `chess-corners` configuration with these settings applied.
    pub fn to_chess_config(&self) -> ChessConfig {
        let mut cfg = ChessConfig::single_scale();
        cfg.params.threshold_rel = self.threshold_rel;
        cfg.params.nms_radius = self.nms_radius;
        cfg.params.min_cluster_size = self.min_cluster_size;
        cfg
    }
}

/// Lattice assembly from corner candidates.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GridParams {
    /// Neighbours inspected when choosing the two lattice directions at a seed.
    pub k_neighbors: usize,
    /// A candidate is accepted when it lies within `match_tolerance * step`
    /// of the predicted lattice position.
    pub match_tolerance: f64,
    /// Number of seed corners tried before giving up.
    pub max_seeds: usize,
    /// Minimal angle between the two lattice directions at a seed, degrees.
    pub min_axis_angle_deg: f64,
}

impl Default for GridParams {
    fn default() -> Self {
        Self {
            k_neighbors: 8,
            match_tolerance: 0.35,
            max_seeds: 12,
            min_axis_angle_deg: 45.0,
        }
    }
}

/// Parameters of the chessboard detector.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChessboardParams {
    pub chess: ChessParams,
    pub grid: GridParams,
    /// Detections with a corner closer than this to the image edge are rejected.
    pub border_px: f64,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            chess: ChessParams::default(),
            grid: GridParams::default(),
            border_px: 8.0,
        }
    }
}

impl ChessboardParams {
    pub fn with_border(mut self, border_px: f64) -> Self {
        self.border_px = border_px;
        self
    }
}
