//! Text exports: human-readable report, oST v5.0 and camera-info YAML.

use std::fmt::Write as _;

use camcal_core::PLUMB_BOB;
use nalgebra::{Matrix3, Vector3};

use crate::batch::BatchSummary;
use crate::metrics::ReprojectionStats;
use crate::rectify::RectifiedCamera;

/// Camera name used for single-camera exports.
pub const MONO_CAMERA_NAME: &str = "narrow_stereo";

/// `%8f`-style number: six decimals, right-aligned in eight columns.
fn num(v: f64) -> String {
    format!("{v:8.6}")
}

fn join(values: impl IntoIterator<Item = f64>) -> String {
    values.into_iter().map(num).collect::<Vec<_>>().join(" ")
}

fn matrix_rows(out: &mut String, rows: usize, cols: usize, at: impl Fn(usize, usize) -> f64) {
    for r in 0..rows {
        let _ = writeln!(out, "{}", join((0..cols).map(|c| at(r, c))));
    }
}

fn bracketed(values: impl IntoIterator<Item = f64>) -> String {
    format!(
        "[{}]",
        values
            .into_iter()
            .map(|v| format!("{v:.6}"))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

fn row_major(rows: usize, cols: usize, at: impl Fn(usize, usize) -> f64) -> Vec<f64> {
    (0..rows)
        .flat_map(|r| (0..cols).map(move |c| (r, c)))
        .map(|(r, c)| at(r, c))
        .collect()
}

/// One `[name]` section of an oST file, preceded by the `[image]` block.
pub(crate) fn ost_section(name: &str, cam: &RectifiedCamera) -> String {
    let k = cam.camera.intrinsics.k_matrix();
    let mut out = String::new();
    out.push_str("# oST version 5.0 parameters\n\n\n[image]\n\n");
    let _ = writeln!(out, "width\n{}\n", cam.size.0);
    let _ = writeln!(out, "height\n{}\n", cam.size.1);
    let _ = writeln!(out, "[{name}]\n");
    out.push_str("camera matrix\n");
    matrix_rows(&mut out, 3, 3, |r, c| k[(r, c)]);
    out.push_str("\ndistortion\n");
    let _ = writeln!(out, "{}", join(cam.camera.distortion.to_array()));
    out.push_str("\nrectification\n");
    matrix_rows(&mut out, 3, 3, |r, c| cam.rectification[(r, c)]);
    out.push_str("\nprojection\n");
    matrix_rows(&mut out, 3, 4, |r, c| cam.projection[(r, c)]);
    out.push('\n');
    out
}

fn yaml_matrix(out: &mut String, key: &str, rows: usize, cols: usize, data: &[f64]) {
    let _ = writeln!(out, "{key}:");
    let _ = writeln!(out, "  rows: {rows}");
    let _ = writeln!(out, "  cols: {cols}");
    let _ = writeln!(out, "  data: {}", bracketed(data.iter().copied()));
}

/// Camera-info style YAML for one camera.
pub(crate) fn yaml(name: &str, cam: &RectifiedCamera) -> String {
    let k = cam.camera.intrinsics.k_matrix();
    let mut out = String::new();
    let _ = writeln!(out, "image_width: {}", cam.size.0);
    let _ = writeln!(out, "image_height: {}", cam.size.1);
    let _ = writeln!(out, "camera_name: {name}");
    yaml_matrix(&mut out, "camera_matrix", 3, 3, &row_major(3, 3, |r, c| k[(r, c)]));
    let _ = writeln!(out, "distortion_model: {PLUMB_BOB}");
    yaml_matrix(
        &mut out,
        "distortion_coefficients",
        1,
        5,
        &cam.camera.distortion.to_array(),
    );
    yaml_matrix(
        &mut out,
        "rectification_matrix",
        3,
        3,
        &row_major(3, 3, |r, c| cam.rectification[(r, c)]),
    );
    yaml_matrix(
        &mut out,
        "projection_matrix",
        3,
        4,
        &row_major(3, 4, |r, c| cam.projection[(r, c)]),
    );
    out
}

fn report_batch(out: &mut String, batch: Option<&BatchSummary>) {
    let Some(batch) = batch else {
        out.push_str("inputs: not recorded\n");
        return;
    };
    let _ = writeln!(
        out,
        "inputs: {} total, {} contributing, {} discarded",
        batch.total,
        batch.usable(),
        batch.discarded.len()
    );
    for (index, reason) in &batch.discarded {
        let _ = writeln!(out, "  discarded {index}: {reason}");
    }
}

fn report_reprojection(out: &mut String, label: &str, stats: Option<&ReprojectionStats>) {
    let Some(stats) = stats else {
        return;
    };
    let _ = writeln!(
        out,
        "{label}reprojection error: mean {:.4} px, rms {:.4} px, max {:.4} px",
        stats.mean, stats.rms, stats.max
    );
    for v in &stats.views {
        let _ = writeln!(
            out,
            "  view {}: mean {:.4}, rms {:.4}, max {:.4}",
            v.index, v.mean, v.rms, v.max
        );
    }
}

fn report_camera(out: &mut String, cam: &RectifiedCamera) {
    let k = cam.camera.intrinsics.k_matrix();
    let _ = writeln!(out, "D = {}", bracketed(cam.camera.distortion.to_array()));
    let _ = writeln!(out, "K = {}", bracketed(row_major(3, 3, |r, c| k[(r, c)])));
    let _ = writeln!(
        out,
        "R = {}",
        bracketed(row_major(3, 3, |r, c| cam.rectification[(r, c)]))
    );
    let _ = writeln!(
        out,
        "P = {}",
        bracketed(row_major(3, 4, |r, c| cam.projection[(r, c)]))
    );
}

pub(crate) fn mono_report(
    cam: &RectifiedCamera,
    batch: Option<&BatchSummary>,
    stats: Option<&ReprojectionStats>,
) -> String {
    let mut out = String::new();
    out.push_str("mono calibration\n");
    let _ = writeln!(out, "image size: {}x{}", cam.size.0, cam.size.1);
    report_batch(&mut out, batch);
    report_reprojection(&mut out, "", stats);
    report_camera(&mut out, cam);
    out
}

pub(crate) struct StereoReport<'a> {
    pub left: &'a RectifiedCamera,
    pub right: &'a RectifiedCamera,
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub batch: Option<&'a BatchSummary>,
    pub left_stats: Option<&'a ReprojectionStats>,
    pub right_stats: Option<&'a ReprojectionStats>,
}

pub(crate) fn stereo_report(r: &StereoReport<'_>) -> String {
    let mut out = String::new();
    out.push_str("stereo calibration\n");
    let _ = writeln!(out, "image size: {}x{}", r.left.size.0, r.left.size.1);
    report_batch(&mut out, r.batch);
    report_reprojection(&mut out, "left ", r.left_stats);
    report_reprojection(&mut out, "right ", r.right_stats);
    out.push_str("\nLeft:\n");
    report_camera(&mut out, r.left);
    out.push_str("\nRight:\n");
    report_camera(&mut out, r.right);
    let _ = writeln!(
        out,
        "\nrotation R = {}",
        bracketed(row_major(3, 3, |i, j| r.rotation[(i, j)]))
    );
    let _ = writeln!(out, "translation T = {}", bracketed(r.translation.iter().copied()));
    out
}
