//! Rectified camera models: new camera matrices, Bouguet stereo
//! rectification, point undistortion and pixel remapping.

use camcal_core::{
    sample_bilinear_u8, GrayImage, GrayImageView, PinholeCamera, PointObservation, Pose,
};
use log::debug;
use nalgebra::{Matrix3, Matrix3x4, Point2, Rotation3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Side length of the sample grid used to bound the undistorted image.
const RECT_GRID: usize = 9;

/// Axis-aligned rectangle `[x, x + width] x [y, y + height]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Inscribed and circumscribed rectangles of the image area after
/// undistortion, rotation by `r` and projection by `p` (3x3 part).
///
/// With `p` the identity the rectangles are in normalized coordinates.
fn undistorted_rectangles(
    camera: &PinholeCamera,
    r: &Matrix3<f64>,
    p: &Matrix3<f64>,
    size: (usize, usize),
) -> (Rect, Rect) {
    let (w, h) = (size.0 as f64, size.1 as f64);
    let n = RECT_GRID;
    let (mut ix0, mut ix1, mut iy0, mut iy1) = (f64::MIN, f64::MAX, f64::MIN, f64::MAX);
    let (mut ox0, mut ox1, mut oy0, mut oy1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    let pr = p * r;

    for y in 0..n {
        for x in 0..n {
            let px = Point2::new(
                x as f64 * (w - 1.0) / (n - 1) as f64,
                y as f64 * (h - 1.0) / (n - 1) as f64,
            );
            let q = apply_homogeneous(&pr, &camera.undistort_pixel(&px));
            ox0 = ox0.min(q.x);
            ox1 = ox1.max(q.x);
            oy0 = oy0.min(q.y);
            oy1 = oy1.max(q.y);
            if x == 0 {
                ix0 = ix0.max(q.x);
            }
            if x == n - 1 {
                ix1 = ix1.min(q.x);
            }
            if y == 0 {
                iy0 = iy0.max(q.y);
            }
            if y == n - 1 {
                iy1 = iy1.min(q.y);
            }
        }
    }
    (
        Rect {
            x: ix0,
            y: iy0,
            width: ix1 - ix0,
            height: iy1 - iy0,
        },
        Rect {
            x: ox0,
            y: oy0,
            width: ox1 - ox0,
            height: oy1 - oy0,
        },
    )
}

#[inline]
fn apply_homogeneous(m: &Matrix3<f64>, n: &Vector2<f64>) -> Point2<f64> {
    let v = m * Vector3::new(n.x, n.y, 1.0);
    Point2::new(v.x / v.z, v.y / v.z)
}

/// Camera matrix for undistorted mono images.
///
/// `alpha = 0` maps the largest rectangle of valid pixels onto the image,
/// `alpha = 1` keeps every source pixel; values in between interpolate.
pub fn optimal_new_camera_matrix(
    camera: &PinholeCamera,
    size: (usize, usize),
    alpha: f64,
) -> Matrix3<f64> {
    let alpha = alpha.clamp(0.0, 1.0);
    let identity = Matrix3::identity();
    let (inner, outer) = undistorted_rectangles(camera, &identity, &identity, size);
    let (w1, h1) = (size.0 as f64 - 1.0, size.1 as f64 - 1.0);

    let (fx0, fy0) = (w1 / inner.width, h1 / inner.height);
    let (cx0, cy0) = (-fx0 * inner.x, -fy0 * inner.y);
    let (fx1, fy1) = (w1 / outer.width, h1 / outer.height);
    let (cx1, cy1) = (-fx1 * outer.x, -fy1 * outer.y);
    let mix = |a: f64, b: f64| a * (1.0 - alpha) + b * alpha;

    Matrix3::new(
        mix(fx0, fx1),
        0.0,
        mix(cx0, cx1),
        0.0,
        mix(fy0, fy1),
        mix(cy0, cy1),
        0.0,
        0.0,
        1.0,
    )
}

/// `[K | 0]` as a 3x4 projection.
pub(crate) fn projection_from(k: &Matrix3<f64>) -> Matrix3x4<f64> {
    let mut p = Matrix3x4::zeros();
    p.fixed_view_mut::<3, 3>(0, 0).copy_from(k);
    p
}

/// Output of [`stereo_rectify`].
#[derive(Clone, Debug, PartialEq)]
pub struct StereoRectification {
    pub r1: Matrix3<f64>,
    pub r2: Matrix3<f64>,
    pub p1: Matrix3x4<f64>,
    pub p2: Matrix3x4<f64>,
}

/// Bouguet rectification of a calibrated pair with `X_right = R * X_left + T`.
///
/// Each camera is rotated half-way toward the other, then both are rotated so
/// the baseline lies along the image x axis (y axis when the rig is mostly
/// vertical). Both cameras share one focal length and principal point
/// (zero disparity at infinity). `alpha` in `[0, 1]` scales between valid
/// pixels only and every source pixel; a negative `alpha` skips scaling.
pub fn stereo_rectify(
    left: &PinholeCamera,
    right: &PinholeCamera,
    size: (usize, usize),
    relative: &Pose,
    alpha: f64,
) -> StereoRectification {
    let om = relative.rotation.scaled_axis();
    let r_r = Rotation3::new(om * -0.5).into_inner();
    let t = r_r * relative.translation.vector;

    let idx = if t.x.abs() > t.y.abs() { 0 } else { 1 };
    let c = t[idx];
    let nt = t.norm();
    let mut uu = Vector3::zeros();
    uu[idx] = if c > 0.0 { 1.0 } else { -1.0 };

    let mut ww = t.cross(&uu);
    let nw = ww.norm();
    if nw > 0.0 {
        ww *= (c.abs() / nt).clamp(-1.0, 1.0).acos() / nw;
    }
    let w_r = Rotation3::new(ww).into_inner();

    let r1 = w_r * r_r.transpose();
    let r2 = w_r * r_r;
    let t = r2 * relative.translation.vector;

    let (w, h) = (size.0 as f64, size.1 as f64);
    // focal length along the axis orthogonal to the baseline
    let f_axis = |cam: &PinholeCamera| {
        if idx == 0 {
            cam.intrinsics.fy
        } else {
            cam.intrinsics.fx
        }
    };
    let mut fc = 0.5 * (f_axis(left) + f_axis(right));

    // principal points that centre the undistorted image corners
    let centre = |cam: &PinholeCamera, r: &Matrix3<f64>| {
        let k = Matrix3::new(fc, 0.0, 0.0, 0.0, fc, 0.0, 0.0, 0.0, 1.0);
        let m = k * r;
        let corners = [(0.0, 0.0), (w - 1.0, 0.0), (0.0, h - 1.0), (w - 1.0, h - 1.0)];
        let sum = corners.iter().fold(Vector2::zeros(), |acc, &(x, y)| {
            let n = cam.undistort_pixel(&Point2::new(x, y));
            acc + apply_homogeneous(&m, &n).coords
        });
        Vector2::new((w - 1.0) * 0.5, (h - 1.0) * 0.5) - sum / 4.0
    };
    let cc = 0.5 * (centre(left, &r1) + centre(right, &r2));

    let build = |f: f64, shift: f64| {
        let mut p = Matrix3x4::zeros();
        p[(0, 0)] = f;
        p[(1, 1)] = f;
        p[(0, 2)] = cc.x;
        p[(1, 2)] = cc.y;
        p[(2, 2)] = 1.0;
        p[(idx, 3)] = shift;
        p
    };

    let mut scale = 1.0;
    if alpha >= 0.0 {
        let alpha = alpha.min(1.0);
        let (p1, p2) = (build(fc, 0.0), build(fc, t[idx] * fc));
        let (in1, out1) =
            undistorted_rectangles(left, &r1, &p1.fixed_view::<3, 3>(0, 0).into_owned(), size);
        let (in2, out2) =
            undistorted_rectangles(right, &r2, &p2.fixed_view::<3, 3>(0, 0).into_owned(), size);
        let (cx, cy) = (cc.x, cc.y);
        let ratios = |r: &Rect| {
            [
                cx / (cx - r.x),
                cy / (cy - r.y),
                (w - 1.0 - cx) / (r.x + r.width - cx),
                (h - 1.0 - cy) / (r.y + r.height - cy),
            ]
        };
        let s0 = ratios(&in1)
            .into_iter()
            .chain(ratios(&in2))
            .fold(f64::MIN, f64::max);
        let s1 = ratios(&out1)
            .into_iter()
            .chain(ratios(&out2))
            .fold(f64::MAX, f64::min);
        let s = s0 * (1.0 - alpha) + s1 * alpha;
        if s.is_finite() && s > 0.0 {
            scale = s;
        }
    }
    fc *= scale;
    debug!("rectified focal length {fc:.3}, principal point ({:.2}, {:.2})", cc.x, cc.y);

    StereoRectification {
        r1,
        r2,
        p1: build(fc, 0.0),
        p2: build(fc, t[idx] * fc),
    }
}

/// A camera together with the rectification and projection that define its
/// undistorted (or rectified) image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RectifiedCamera {
    pub camera: PinholeCamera,
    /// `(width, height)` in pixels.
    pub size: (usize, usize),
    pub rectification: Matrix3<f64>,
    pub projection: Matrix3x4<f64>,
}

impl RectifiedCamera {
    pub fn new(
        camera: PinholeCamera,
        size: (usize, usize),
        rectification: Matrix3<f64>,
        projection: Matrix3x4<f64>,
    ) -> Self {
        Self {
            camera,
            size,
            rectification,
            projection,
        }
    }

    /// Mono model: identity rectification and the optimal new camera matrix for `alpha`.
    pub fn mono(camera: PinholeCamera, size: (usize, usize), alpha: f64) -> Self {
        let k = optimal_new_camera_matrix(&camera, size, alpha);
        Self::new(camera, size, Matrix3::identity(), projection_from(&k))
    }

    fn projected_rotation(&self) -> Matrix3<f64> {
        self.projection.fixed_view::<3, 3>(0, 0).into_owned() * self.rectification
    }

    /// Removes distortion, applies the rectification and projects with the
    /// left 3x3 block of the projection.
    pub fn undistort_point(&self, p: &Point2<f64>) -> Point2<f64> {
        apply_homogeneous(&self.projected_rotation(), &self.camera.undistort_pixel(p))
    }

    pub fn undistort_points(&self, points: &[Point2<f64>]) -> Vec<Point2<f64>> {
        let m = self.projected_rotation();
        points
            .iter()
            .map(|p| apply_homogeneous(&m, &self.camera.undistort_pixel(p)))
            .collect()
    }

    pub fn undistort_observation(&self, observation: &PointObservation) -> PointObservation {
        observation.map_points(|p| self.undistort_point(p))
    }

    /// Source pixel for every pixel of the rectified image.
    pub fn undistort_map(&self) -> Result<UndistortMap, CalibrationError> {
        let inv = self
            .projected_rotation()
            .try_inverse()
            .ok_or_else(|| CalibrationError::numerical("projection is singular"))?;
        let (width, height) = self.size;
        let mut map_x = Vec::with_capacity(width * height);
        let mut map_y = Vec::with_capacity(width * height);
        for v in 0..height {
            for u in 0..width {
                let ray = inv * Vector3::new(u as f64, v as f64, 1.0);
                if ray.z <= f64::EPSILON {
                    map_x.push(-1.0);
                    map_y.push(-1.0);
                    continue;
                }
                let src = self
                    .camera
                    .intrinsics
                    .to_pixel(
                        &self
                            .camera
                            .distortion
                            .distort(&Vector2::new(ray.x / ray.z, ray.y / ray.z)),
                    );
                map_x.push(src.x as f32);
                map_y.push(src.y as f32);
            }
        }
        Ok(UndistortMap {
            width,
            height,
            map_x,
            map_y,
        })
    }

    /// Rectified copy of `image`; pixels with no source are black.
    pub fn remap(&self, image: &GrayImageView<'_>) -> Result<GrayImage, CalibrationError> {
        Ok(self.undistort_map()?.remap(image))
    }
}

/// Per-pixel source coordinates of a rectified image.
#[derive(Clone, Debug, PartialEq)]
pub struct UndistortMap {
    pub width: usize,
    pub height: usize,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

impl UndistortMap {
    /// Bilinear resampling of `image` through the map.
    pub fn remap(&self, image: &GrayImageView<'_>) -> GrayImage {
        let mut out = GrayImage::filled(self.width, self.height, 0);
        let (xmax, ymax) = (image.width as f32 - 1.0, image.height as f32 - 1.0);
        for ((dst, &x), &y) in out.data.iter_mut().zip(&self.map_x).zip(&self.map_y) {
            if x >= 0.0 && y >= 0.0 && x <= xmax && y <= ymax {
                *dst = sample_bilinear_u8(image, x, y);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use camcal_core::{Distortion, Intrinsics};
    use nalgebra::{Point3, Translation3, UnitQuaternion};

    fn left() -> PinholeCamera {
        PinholeCamera::new(
            Intrinsics::new(540.0, 535.0, 322.0, 238.0),
            Distortion {
                k1: -0.08,
                k2: 0.02,
                p1: 0.0005,
                p2: -0.0003,
                k3: 0.0,
            },
        )
    }

    fn right() -> PinholeCamera {
        PinholeCamera::new(
            Intrinsics::new(545.0, 541.0, 316.0, 243.0),
            Distortion {
                k1: -0.07,
                k2: 0.015,
                ..Distortion::default()
            },
        )
    }

    fn relative() -> Pose {
        Pose::from_parts(
            Translation3::new(-0.12, 0.002, 0.001),
            UnitQuaternion::from_euler_angles(0.004, -0.01, 0.003),
        )
    }

    #[test]
    fn rectified_rows_agree() {
        let rect = stereo_rectify(&left(), &right(), (640, 480), &relative(), 0.0);
        let lcam = RectifiedCamera::new(left(), (640, 480), rect.r1, rect.p1);
        let rcam = RectifiedCamera::new(right(), (640, 480), rect.r2, rect.p2);
        for p in [
            Point3::new(0.1, -0.2, 2.0),
            Point3::new(-0.3, 0.25, 2.5),
            Point3::new(0.0, 0.1, 1.5),
        ] {
            let pl = left().project(&p).unwrap();
            let pr = right().project(&(relative() * p)).unwrap();
            let (ul, ur) = (lcam.undistort_point(&pl), rcam.undistort_point(&pr));
            assert!((ul.y - ur.y).abs() < 1e-6, "{ul:?} vs {ur:?}");
            assert!(ul.x > ur.x);
        }
    }

    #[test]
    fn rectification_is_rotation_with_shared_intrinsics() {
        let rect = stereo_rectify(&left(), &right(), (640, 480), &relative(), 0.0);
        for r in [rect.r1, rect.r2] {
            assert_relative_eq!(r * r.transpose(), Matrix3::identity(), epsilon = 1e-12);
            assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
        }
        assert_eq!(rect.p1[(0, 0)], rect.p2[(0, 0)]);
        assert_eq!(rect.p1[(1, 2)], rect.p2[(1, 2)]);
        // horizontal rig: baseline shift is negative focal length times baseline
        let b = rect.p2[(0, 3)] / rect.p2[(0, 0)];
        assert!((b + 0.12).abs() < 1e-3, "baseline {b}");
        assert_eq!(rect.p2[(1, 3)], 0.0);
    }

    #[test]
    fn alpha_one_zooms_out() {
        let a0 = stereo_rectify(&left(), &right(), (640, 480), &relative(), 0.0);
        let a1 = stereo_rectify(&left(), &right(), (640, 480), &relative(), 1.0);
        assert!(a1.p1[(0, 0)] < a0.p1[(0, 0)]);

        let k0 = optimal_new_camera_matrix(&left(), (640, 480), 0.0);
        let k1 = optimal_new_camera_matrix(&left(), (640, 480), 1.0);
        assert!(k1[(0, 0)] < k0[(0, 0)]);
    }

    #[test]
    fn distortion_free_mono_keeps_camera_matrix() {
        let cam = PinholeCamera::new(
            Intrinsics::new(500.0, 500.0, 319.5, 239.5),
            Distortion::default(),
        );
        let k = optimal_new_camera_matrix(&cam, (640, 480), 0.0);
        assert_relative_eq!(k, cam.intrinsics.k_matrix(), epsilon = 1e-9);
    }

    #[test]
    fn map_inverts_point_undistortion() {
        let rc = RectifiedCamera::mono(left(), (640, 480), 0.0);
        let map = rc.undistort_map().unwrap();
        let (u, v) = (100usize, 300usize);
        let src = Point2::new(map.map_x[v * 640 + u] as f64, map.map_y[v * 640 + u] as f64);
        let back = rc.undistort_point(&src);
        assert!((back.x - u as f64).abs() < 1e-3 && (back.y - v as f64).abs() < 1e-3);
    }

    #[test]
    fn remap_of_constant_image_is_constant_inside() {
        let rc = RectifiedCamera::mono(left(), (64, 48), 0.0);
        let img = GrayImage::filled(64, 48, 77);
        let out = rc.remap(&img.view()).unwrap();
        assert_eq!(out.data[24 * 64 + 32], 77);
    }
}
