//! Synthetic checkerboard imagery for tests and demos.
//!
//! The board has `(cols + 1) x (rows + 1)` squares so that its inner corners
//! match a [`TargetGeometry`]. Corner `(0, 0)` sits at the board origin; the
//! top-left square is dark. Edges between squares are drawn as a linear
//! intensity ramp about one pixel wide so corner positions are not quantized
//! to the supersampling grid.

use nalgebra::{Point2, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::{GrayImage, PinholeCamera, PointObservation, Pose, TargetGeometry};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    /// Samples per pixel along each axis.
    pub supersample: usize,
    pub dark: u8,
    pub light: u8,
    pub background: u8,
    /// Width of the light border around the squares, in squares.
    pub margin: f64,
    /// Half-width of the intensity ramp across square edges, in pixels.
    pub edge_ramp_px: f64,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            supersample: 2,
            dark: 30,
            light: 220,
            background: 110,
            margin: 1.0,
            edge_ramp_px: 0.7,
        }
    }
}

/// Pose placing the board centre at `position` (camera frame) after rotating
/// it by roll/pitch/yaw around that centre.
pub fn board_pose(geometry: &TargetGeometry, rpy: [f64; 3], position: Vector3<f64>) -> Pose {
    let centre = Vector3::new(
        (geometry.cols - 1) as f64 * geometry.spacing * 0.5,
        (geometry.rows - 1) as f64 * geometry.spacing * 0.5,
        0.0,
    );
    let rotation = UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]);
    Pose::from_parts(Translation3::from(position), rotation)
        * Pose::translation(-centre.x, -centre.y, -centre.z)
}

/// Exact corner positions of `geometry` seen by `camera` under `pose`.
pub fn project_corners(
    camera: &PinholeCamera,
    pose: &Pose,
    geometry: &TargetGeometry,
) -> Option<PointObservation> {
    let points = geometry
        .object_points()
        .iter()
        .map(|p| camera.project_board(pose, p))
        .collect::<Option<Vec<_>>>()?;
    PointObservation::new(geometry.cols, geometry.rows, points)
}

/// Render a `width x height` image of the board.
pub fn render_chessboard(
    camera: &PinholeCamera,
    pose: &Pose,
    geometry: &TargetGeometry,
    width: usize,
    height: usize,
    params: &RenderParams,
) -> GrayImage {
    let ss = params.supersample.max(1);
    let s = geometry.spacing;
    let margin = params.margin.max(0.0) * s;
    let (x_min, x_max) = (-s - margin, geometry.cols as f64 * s + margin);
    let (y_min, y_max) = (-s - margin, geometry.rows as f64 * s + margin);

    let rotation = pose.rotation.to_rotation_matrix();
    let normal = rotation * Vector3::z();
    let origin = pose.translation.vector;
    let plane_d = normal.dot(&origin);

    let mid = (params.dark as f64 + params.light as f64) * 0.5;
    let half = (params.light as f64 - params.dark as f64) * 0.5;
    let ramp = params.edge_ramp_px.max(1e-3);
    // +-1 on either side of the nearest grid line, ramped across it
    let line_sign = |v: f64, px_per_unit: f64| -> f64 {
        let k = (v / s).round();
        let offset = (v - k * s) * px_per_unit;
        let parity = if (k as i64).rem_euclid(2) == 0 { 1.0 } else { -1.0 };
        parity * (offset / ramp).clamp(-1.0, 1.0)
    };

    let shade = |u: f64, v: f64| -> f64 {
        let n = camera.undistort_pixel(&Point2::new(u, v));
        let ray = Vector3::new(n.x, n.y, 1.0);
        let denom = normal.dot(&ray);
        if denom.abs() < 1e-12 {
            return params.background as f64;
        }
        let lambda = plane_d / denom;
        if lambda <= 0.0 {
            return params.background as f64;
        }
        let local = rotation.transpose() * (ray * lambda - origin);
        let (x, y) = (local.x, local.y);
        if x < x_min || x > x_max || y < y_min || y > y_max {
            return params.background as f64;
        }
        if x < -s || x >= geometry.cols as f64 * s || y < -s || y >= geometry.rows as f64 * s {
            return params.light as f64;
        }
        let px_per_unit = camera.intrinsics.fx / lambda;
        mid - half * line_sign(x, px_per_unit) * line_sign(y, px_per_unit)
    };

    let mut data = Vec::with_capacity(width * height);
    let step = 1.0 / ss as f64;
    let norm = 1.0 / (ss * ss) as f64;
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for sy in 0..ss {
                for sx in 0..ss {
                    let du = (sx as f64 + 0.5) * step - 0.5;
                    let dv = (sy as f64 + 0.5) * step - 0.5;
                    acc += shade(x as f64 + du, y as f64 + dv);
                }
            }
            data.push((acc * norm).round().clamp(0.0, 255.0) as u8);
        }
    }

    GrayImage {
        width,
        height,
        data,
    }
}
