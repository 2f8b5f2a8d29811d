use nalgebra::{DMatrix, Matrix3, Point2, Vector3};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HomographyError {
    #[error("need at least 4 correspondences, got {0}")]
    TooFewPoints(usize),
    #[error("source and destination lengths differ ({src} vs {dst})")]
    LengthMismatch { src: usize, dst: usize },
    #[error("point configuration is degenerate")]
    Degenerate,
}

/// Planar projective transform, `dst ~ H * src`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]],
            [self.h[(1, 0)], self.h[(1, 1)], self.h[(1, 2)]],
            [self.h[(2, 0)], self.h[(2, 1)], self.h[(2, 2)]],
        ]
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn normalize_points(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    // translate to centroid, scale so mean distance = sqrt(2)
    let n = pts.len() as f64;
    let (sx, sy) = pts
        .iter()
        .fold((0.0, 0.0), |(ax, ay), p| (ax + p.x, ay + p.y));
    let (cx, cy) = (sx / n, sy / n);

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let t = hartley_normalization(cx, cy, mean_dist);
    let out = pts
        .iter()
        .map(|p| {
            let v = t * Vector3::new(p.x, p.y, 1.0);
            Point2::new(v[0], v[1])
        })
        .collect();
    (out, t)
}

/// Estimate `H` such that `dst ~ H * src` with the normalized DLT.
///
/// The null vector is taken from the 9x9 normal matrix so that the minimal
/// four-point case is handled by the same path as the overdetermined one.
/// The result is scaled so that `H[2][2] = 1` when possible.
pub fn estimate_homography(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<Homography, HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    if src.len() < 4 {
        return Err(HomographyError::TooFewPoints(src.len()));
    }

    let (s, ts) = normalize_points(src);
    let (d, td) = normalize_points(dst);

    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for k in 0..n {
        let (x, y) = (s[k].x, s[k].y);
        let (u, v) = (d[k].x, d[k].y);

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    let ata = a.transpose() * &a;
    let svd = ata.svd(false, true);
    let vt = svd.v_t.ok_or(HomographyError::Degenerate)?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &sv)| {
            if sv < best.1 {
                (i, sv)
            } else {
                best
            }
        });
    let h = vt.row(min_idx);
    let hn = Matrix3::<f64>::from_row_slice(&[
        h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8],
    ]);

    let td_inv = td.try_inverse().ok_or(HomographyError::Degenerate)?;
    let mut hd = td_inv * hn * ts;
    let scale = hd[(2, 2)];
    if scale.abs() > 1e-12 {
        hd /= scale;
    } else {
        let norm = hd.norm();
        if norm < 1e-12 {
            return Err(HomographyError::Degenerate);
        }
        hd /= norm;
    }
    if !hd.iter().all(|v| v.is_finite()) {
        return Err(HomographyError::Degenerate);
    }

    Ok(Homography::new(hd))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2<f64>, b: Point2<f64>, tol: f64) {
        let d = (a - b).norm();
        assert!(d < tol, "points differ: {a:?} vs {b:?}");
    }

    fn sample_h() -> Homography {
        Homography::new(Matrix3::new(
            1.2, 0.1, 30.0, //
            -0.05, 0.9, 50.0, //
            0.0008, -0.0004, 1.0,
        ))
    }

    #[test]
    fn inverse_round_trips_points() {
        let h = sample_h();
        let hinv = h.inverse().expect("invertible");
        let p = Point2::new(12.5, -3.0);
        assert_close(hinv.apply(h.apply(p)), p, 1e-9);
    }

    #[test]
    fn four_points_recover_h() {
        let h = sample_h();
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let dst: Vec<_> = src.iter().map(|&p| h.apply(p)).collect();
        let est = estimate_homography(&src, &dst).expect("homography");
        for p in [Point2::new(0.5, 0.5), Point2::new(-2.0, 3.0)] {
            assert_close(est.apply(p), h.apply(p), 1e-6);
        }
    }

    #[test]
    fn overdetermined_grid_is_exact() {
        let h = sample_h();
        let src: Vec<_> = (0..6)
            .flat_map(|j| (0..8).map(move |i| Point2::new(i as f64 * 0.1, j as f64 * 0.1)))
            .collect();
        let dst: Vec<_> = src.iter().map(|&p| h.apply(p)).collect();
        let est = estimate_homography(&src, &dst).expect("homography");
        for (s, d) in src.iter().zip(&dst) {
            assert_close(est.apply(*s), *d, 1e-6);
        }
    }

    #[test]
    fn mismatched_input_lengths_fail() {
        let src = [Point2::new(0.0, 0.0); 4];
        let dst = [Point2::new(0.0, 0.0); 5];
        assert_eq!(
            estimate_homography(&src, &dst),
            Err(HomographyError::LengthMismatch { src: 4, dst: 5 })
        );
        assert_eq!(
            estimate_homography(&src[..3], &dst[..3]),
            Err(HomographyError::TooFewPoints(3))
        );
    }
}
