//! Pinhole camera with the five-term plumb_bob lens model.
//!
//! Pixel coordinates place pixel centres at integer positions. Normalized
//! coordinates are `(X/Z, Y/Z)` in the camera frame.

use nalgebra::{Isometry3, Matrix3, Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

/// Board-to-camera rigid transform.
pub type Pose = Isometry3<f64>;

/// Name of the only supported distortion model.
pub const PLUMB_BOB: &str = "plumb_bob";

const UNDISTORT_ITERS: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Reads `fx, fy, cx, cy` from an upper-triangular camera matrix; skew is ignored.
    pub fn from_k_matrix(k: &Matrix3<f64>) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    #[inline]
    pub fn to_pixel(&self, n: &Vector2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }

    #[inline]
    pub fn to_normalized(&self, p: &Point2<f64>) -> Vector2<f64> {
        Vector2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
            && self.fx > 0.0
            && self.fy > 0.0
    }
}

/// Brown-Conrady radial/tangential distortion, stored in `[k1, k2, p1, p2, k3]` order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Missing trailing coefficients are zero; extra ones are ignored.
    pub fn from_slice(d: &[f64]) -> Self {
        let at = |i: usize| d.get(i).copied().unwrap_or(0.0);
        Self {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
        }
    }

    #[inline]
    pub fn distort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vector2::new(x * radial + dx, y * radial + dy)
    }

    /// Fixed-point inverse of [`Distortion::distort`].
    pub fn undistort(&self, nd: &Vector2<f64>) -> Vector2<f64> {
        let (mut x, mut y) = (nd.x, nd.y);
        for _ in 0..UNDISTORT_ITERS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            if radial.abs() < 1e-12 {
                break;
            }
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let (nx, ny) = ((nd.x - dx) / radial, (nd.y - dy) / radial);
            let step = (nx - x).abs() + (ny - y).abs();
            x = nx;
            y = ny;
            if step < 1e-15 {
                break;
            }
        }
        Vector2::new(x, y)
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|&v| v == 0.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
}

impl PinholeCamera {
    pub fn new(intrinsics: Intrinsics, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Projects a camera-frame point. Points at or behind the camera plane give `None`.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= f64::EPSILON {
            return None;
        }
        Some(self.project_unchecked(p))
    }

    /// Projection without the cheirality check, used inside optimizers.
    #[inline]
    pub fn project_unchecked(&self, p: &Point3<f64>) -> Point2<f64> {
        let n = Vector2::new(p.x / p.z, p.y / p.z);
        self.intrinsics.to_pixel(&self.distortion.distort(&n))
    }

    /// Projects a board point seen under `pose`.
    pub fn project_board(&self, pose: &Pose, p: &Point3<f64>) -> Option<Point2<f64>> {
        self.project(&(pose * p))
    }

    /// Pixel to undistorted normalized coordinates.
    pub fn undistort_pixel(&self, p: &Point2<f64>) -> Vector2<f64> {
        self.distortion
            .undistort(&self.intrinsics.to_normalized(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion};

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            Intrinsics::new(520.0, 515.0, 320.0, 240.0),
            Distortion {
                k1: -0.2,
                k2: 0.05,
                p1: 0.001,
                p2: -0.0005,
                k3: 0.0,
            },
        )
    }

    #[test]
    fn undistort_inverts_distort() {
        let d = camera().distortion;
        for n in [
            Vector2::new(0.0, 0.0),
            Vector2::new(0.3, -0.2),
            Vector2::new(-0.45, 0.35),
        ] {
            let back = d.undistort(&d.distort(&n));
            assert_relative_eq!(back, n, epsilon = 1e-9);
        }
    }

    #[test]
    fn undistort_pixel_inverts_projection() {
        let cam = camera();
        let p = Point3::new(0.4, -0.3, 2.0);
        let px = cam.project(&p).unwrap();
        let n = cam.undistort_pixel(&px);
        assert_relative_eq!(n, Vector2::new(0.2, -0.15), epsilon = 1e-9);
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let cam = camera();
        assert!(cam.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
        let pose = Pose::from_parts(Translation3::new(0.0, 0.0, 1.0), UnitQuaternion::identity());
        let px = cam.project_board(&pose, &Point3::origin()).unwrap();
        assert_relative_eq!(px, Point2::new(320.0, 240.0), epsilon = 1e-12);
    }

    #[test]
    fn distortion_slice_round_trip() {
        let d = camera().distortion;
        assert_eq!(Distortion::from_slice(&d.to_array()), d);
        assert_eq!(Distortion::from_slice(&[0.1]).k1, 0.1);
        assert!(Distortion::default().is_zero());
    }
}
