//! Calibration quality measures.

use camcal_core::{PinholeCamera, PointObservation, Pose, TargetGeometry};
use nalgebra::{Matrix3x4, Point2, Point3};
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Reprojection error of one contributing view, in pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewError {
    /// Index of the view in the calibration input.
    pub index: usize,
    pub mean: f64,
    pub rms: f64,
    pub max: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReprojectionStats {
    pub views: Vec<ViewError>,
    pub mean: f64,
    pub rms: f64,
    pub max: f64,
}

/// Distances between observed corners and the corners reprojected through
/// `camera` under each view's pose. `indices` label the views.
pub fn reprojection_stats(
    camera: &PinholeCamera,
    geometry: &TargetGeometry,
    poses: &[Pose],
    observations: &[&PointObservation],
    indices: &[usize],
) -> ReprojectionStats {
    let object = geometry.object_points();
    let mut views = Vec::with_capacity(poses.len());
    let (mut sum, mut sum_sq, mut max, mut n) = (0.0, 0.0, 0.0f64, 0usize);

    for (v, (pose, obs)) in poses.iter().zip(observations).enumerate() {
        let dists: Vec<f64> = object
            .iter()
            .zip(&obs.points)
            .map(|(p, seen)| (camera.project_unchecked(&(pose * p)) - seen).norm())
            .collect();
        let count = dists.len().max(1) as f64;
        let vsum: f64 = dists.iter().sum();
        let vsq: f64 = dists.iter().map(|d| d * d).sum();
        let vmax = dists.iter().copied().fold(0.0, f64::max);
        views.push(ViewError {
            index: indices.get(v).copied().unwrap_or(v),
            mean: vsum / count,
            rms: (vsq / count).sqrt(),
            max: vmax,
        });
        sum += vsum;
        sum_sq += vsq;
        max = max.max(vmax);
        n += dists.len();
    }

    let count = n.max(1) as f64;
    ReprojectionStats {
        views,
        mean: sum / count,
        rms: (sum_sq / count).sqrt(),
        max,
    }
}

fn check_shape(
    observation: &PointObservation,
    geometry: &TargetGeometry,
) -> Result<(), CalibrationError> {
    if observation.matches(geometry) {
        Ok(())
    } else {
        Err(CalibrationError::ObservationShape {
            index: 0,
            cols: observation.cols,
            rows: observation.rows,
            expected_cols: geometry.cols,
            expected_rows: geometry.rows,
        })
    }
}

/// Distance from `p` to the line through `a` and `b`.
fn distance_to_chord(p: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    let ab = b - a;
    let ap = p - a;
    let len = ab.norm();
    if len < 1e-12 {
        return ap.norm();
    }
    (ab.x * ap.y - ab.y * ap.x).abs() / len
}

/// RMS distance, in pixels, of every interior corner of every grid row to the
/// chord through that row's end points.
///
/// Needs no calibration: on raw detections it measures lens distortion plus
/// detection noise, on undistorted points only the residual of both. A board
/// with two columns has no interior points and yields zero.
pub fn linear_error(
    observation: &PointObservation,
    geometry: &TargetGeometry,
) -> Result<f64, CalibrationError> {
    check_shape(observation, geometry)?;
    let (mut sum_sq, mut n) = (0.0, 0usize);
    for j in 0..observation.rows {
        let row = observation.row(j);
        let (Some(a), Some(b)) = (row.first(), row.last()) else {
            continue;
        };
        for p in &row[1..row.len() - 1] {
            let d = distance_to_chord(p, a, b);
            sum_sq += d * d;
            n += 1;
        }
    }
    Ok(if n == 0 { 0.0 } else { (sum_sq / n as f64).sqrt() })
}

/// RMS vertical disparity between corresponding rectified points.
pub fn epipolar_error(
    left: &PointObservation,
    right: &PointObservation,
) -> Result<f64, CalibrationError> {
    if left.len() != right.len() || left.is_empty() {
        return Err(CalibrationError::numerical(format!(
            "cannot compare {} left and {} right points",
            left.len(),
            right.len()
        )));
    }
    let sum_sq: f64 = left
        .points
        .iter()
        .zip(&right.points)
        .map(|(l, r)| (l.y - r.y).powi(2))
        .sum();
    Ok((sum_sq / left.len() as f64).sqrt())
}

/// Left-camera 3-D point from a rectified correspondence.
///
/// The baseline axis is read from the right projection's translation column.
pub fn triangulate_rectified(
    left: &Point2<f64>,
    right: &Point2<f64>,
    p1: &Matrix3x4<f64>,
    p2: &Matrix3x4<f64>,
) -> Option<Point3<f64>> {
    let (f, cx1, cy1) = (p1[(0, 0)], p1[(0, 2)], p1[(1, 2)]);
    let (cx2, cy2) = (p2[(0, 2)], p2[(1, 2)]);
    let (tx, ty) = (p2[(0, 3)], p2[(1, 3)]);
    let z = if tx.abs() >= ty.abs() {
        -tx / ((left.x - right.x) - (cx1 - cx2))
    } else {
        -ty / ((left.y - right.y) - (cy1 - cy2))
    };
    (z.is_finite() && f.abs() > 0.0).then(|| {
        Point3::new((left.x - cx1) * z / f, (left.y - cy1) * z / p1[(1, 1)], z)
    })
}

/// Mean corner spacing from triangulated rectified corners: every row length
/// divided by its gap count and every column length divided by its gap count.
pub fn chessboard_size(
    left: &PointObservation,
    right: &PointObservation,
    p1: &Matrix3x4<f64>,
    p2: &Matrix3x4<f64>,
    geometry: &TargetGeometry,
) -> Result<f64, CalibrationError> {
    check_shape(left, geometry)?;
    check_shape(right, geometry)?;
    let points = left
        .points
        .iter()
        .zip(&right.points)
        .map(|(l, r)| triangulate_rectified(l, r, p1, p2))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| CalibrationError::numerical("zero disparity while triangulating"))?;

    let (cols, rows) = (geometry.cols, geometry.rows);
    let at = |i: usize, j: usize| points[j * cols + i];
    let mut lengths = Vec::with_capacity(cols + rows);
    for j in 0..rows {
        lengths.push((at(cols - 1, j) - at(0, j)).norm() / (cols - 1) as f64);
    }
    for i in 0..cols {
        lengths.push((at(i, rows - 1) - at(i, 0)).norm() / (rows - 1) as f64);
    }
    Ok(lengths.iter().sum::<f64>() / lengths.len() as f64)
}
