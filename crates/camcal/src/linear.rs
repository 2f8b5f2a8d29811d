//! Closed-form initial estimates: per-view homographies, focal lengths with the
//! principal point at the image centre, and planar board poses.

use camcal_core::{
    estimate_homography, Homography, Intrinsics, PinholeCamera, PointObservation, Pose,
    TargetGeometry,
};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Rotation3, Translation3, UnitQuaternion, Vector3};

use crate::error::CalibrationError;

/// Board corners as points of the `z = 0` plane.
pub(crate) fn board_plane(geometry: &TargetGeometry) -> Vec<Point2<f64>> {
    geometry
        .object_points()
        .iter()
        .map(|p| Point2::new(p.x, p.y))
        .collect()
}

/// Homography from the board plane to the observed pixels.
pub fn view_homography(
    geometry: &TargetGeometry,
    observation: &PointObservation,
) -> Result<Homography, CalibrationError> {
    estimate_homography(&board_plane(geometry), &observation.points)
        .map_err(|e| CalibrationError::numerical(format!("view homography: {e}")))
}

/// Image centre in pixel coordinates (pixel centres at integers).
pub(crate) fn image_centre(size: (usize, usize)) -> (f64, f64) {
    (
        (size.0 as f64 - 1.0) * 0.5,
        (size.1 as f64 - 1.0) * 0.5,
    )
}

/// Focal lengths from the orthogonality and equal-norm constraints of the
/// homographies' rotation columns, with the principal point at the image centre.
///
/// Falls back to `max(width, height)` for both focal lengths when the views do
/// not constrain them (for example a single fronto-parallel view).
pub fn initial_intrinsics(
    homographies: &[Homography],
    size: (usize, usize),
    fix_aspect_ratio: bool,
) -> Intrinsics {
    let (cx, cy) = image_centre(size);
    let fallback = size.0.max(size.1) as f64;

    let mut a = DMatrix::<f64>::zeros(2 * homographies.len(), 2);
    let mut b = DVector::<f64>::zeros(2 * homographies.len());
    for (k, hom) in homographies.iter().enumerate() {
        let mut h = hom.h;
        for c in 0..3 {
            h[(0, c)] -= h[(2, c)] * cx;
            h[(1, c)] -= h[(2, c)] * cy;
        }
        // first two columns, their half sum and half difference
        let mut hc = Vector3::zeros();
        let mut vc = Vector3::zeros();
        let mut d1 = Vector3::zeros();
        let mut d2 = Vector3::zeros();
        for r in 0..3 {
            let (t0, t1) = (h[(r, 0)], h[(r, 1)]);
            hc[r] = t0;
            vc[r] = t1;
            d1[r] = (t0 + t1) * 0.5;
            d2[r] = (t0 - t1) * 0.5;
        }
        let norms = [hc.norm(), vc.norm(), d1.norm(), d2.norm()];
        if norms.iter().any(|&n| n < 1e-12) {
            continue;
        }
        hc /= norms[0];
        vc /= norms[1];
        d1 /= norms[2];
        d2 /= norms[3];

        a[(2 * k, 0)] = hc[0] * vc[0];
        a[(2 * k, 1)] = hc[1] * vc[1];
        b[2 * k] = -hc[2] * vc[2];
        a[(2 * k + 1, 0)] = d1[0] * d2[0];
        a[(2 * k + 1, 1)] = d1[1] * d2[1];
        b[2 * k + 1] = -d1[2] * d2[2];
    }

    let solved = a
        .svd(true, true)
        .solve(&b, 1e-12)
        .ok()
        .map(|f| ((1.0 / f[0]).abs().sqrt(), (1.0 / f[1]).abs().sqrt()));
    let plausible = |f: f64| f.is_finite() && f > 0.05 * fallback && f < 50.0 * fallback;
    let (mut fx, mut fy) = match solved {
        Some((fx, fy)) if plausible(fx) && plausible(fy) => (fx, fy),
        other => {
            warn!("closed-form focal length unusable ({other:?}), assuming {fallback}");
            (fallback, fallback)
        }
    };
    if fix_aspect_ratio {
        let f = 0.5 * (fx + fy);
        fx = f;
        fy = f;
    }
    debug!("initial intrinsics fx={fx:.2} fy={fy:.2} cx={cx:.2} cy={cy:.2}");
    Intrinsics::new(fx, fy, cx, cy)
}

/// Board pose from a homography mapping the board plane to normalized image
/// coordinates. The sign is chosen so the board lies in front of the camera.
pub fn pose_from_homography(h: &Matrix3<f64>) -> Result<Pose, CalibrationError> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();
    let (n1, n2) = (h1.norm(), h2.norm());
    if n1 < 1e-12 || n2 < 1e-12 {
        return Err(CalibrationError::numerical("degenerate homography for pose"));
    }
    let mut lambda = 2.0 / (n1 + n2);
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let r = Matrix3::from_columns(&[r1, r2, r3]);

    // nearest rotation
    let svd = r.svd(true, true);
    let (Some(mut u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(CalibrationError::numerical("pose SVD failed"));
    };
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let rotation = Rotation3::from_matrix_unchecked(u * v_t);

    Ok(Pose::from_parts(
        Translation3::from(h3 * lambda),
        UnitQuaternion::from_rotation_matrix(&rotation),
    ))
}

/// Board pose seen by a camera with known intrinsics and distortion.
pub fn planar_pose(
    camera: &PinholeCamera,
    geometry: &TargetGeometry,
    observation: &PointObservation,
) -> Result<Pose, CalibrationError> {
    let normalized: Vec<Point2<f64>> = observation
        .points
        .iter()
        .map(|p| Point2::from(camera.undistort_pixel(p)))
        .collect();
    let h = estimate_homography(&board_plane(geometry), &normalized)
        .map_err(|e| CalibrationError::numerical(format!("pose homography: {e}")))?;
    pose_from_homography(&h.h)
}
