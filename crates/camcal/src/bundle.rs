//! Reprojection residual models for the mono and stereo refinements.
//!
//! Poses are packed as `[rx, ry, rz, tx, ty, tz]` with the rotation as a
//! scaled axis. Jacobians are central differences evaluated block by block,
//! since each pose only touches the residuals of its own view.

use camcal_core::{Intrinsics, PinholeCamera, PointObservation, Pose};
use nalgebra::{DMatrix, DVector, Point3, Translation3, UnitQuaternion, Vector3};

use crate::options::CalibrationOptions;
use crate::solver::{numeric_jacobian, NllsProblem};

pub(crate) const POSE_DOF: usize = 6;

pub(crate) fn encode_pose(pose: &Pose) -> [f64; POSE_DOF] {
    let r = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    [r.x, r.y, r.z, t.x, t.y, t.z]
}

pub(crate) fn decode_pose(p: &[f64]) -> Pose {
    Pose::from_parts(
        Translation3::new(p[3], p[4], p[5]),
        UnitQuaternion::from_scaled_axis(Vector3::new(p[0], p[1], p[2])),
    )
}

/// Pushes `projected - observed` for every corner of one view.
fn push_view_residuals(
    out: &mut Vec<f64>,
    camera: &PinholeCamera,
    pose: &Pose,
    object: &[Point3<f64>],
    observation: &PointObservation,
) {
    for (p, seen) in object.iter().zip(&observation.points) {
        let proj = camera.project_unchecked(&(pose * p));
        out.push(proj.x - seen.x);
        out.push(proj.y - seen.y);
    }
}

fn view_residuals(
    camera: &PinholeCamera,
    pose: &Pose,
    object: &[Point3<f64>],
    observation: &PointObservation,
) -> Vec<f64> {
    let mut out = Vec::with_capacity(2 * object.len());
    push_view_residuals(&mut out, camera, pose, object, observation);
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Fx,
    Fy,
    Cx,
    Cy,
    K1,
    K2,
    P1,
    P2,
    K3,
}

impl Slot {
    fn get(self, cam: &PinholeCamera) -> f64 {
        let (k, d) = (&cam.intrinsics, &cam.distortion);
        match self {
            Slot::Fx => k.fx,
            Slot::Fy => k.fy,
            Slot::Cx => k.cx,
            Slot::Cy => k.cy,
            Slot::K1 => d.k1,
            Slot::K2 => d.k2,
            Slot::P1 => d.p1,
            Slot::P2 => d.p2,
            Slot::K3 => d.k3,
        }
    }

    fn set(self, cam: &mut PinholeCamera, v: f64) {
        let (k, d) = (&mut cam.intrinsics, &mut cam.distortion);
        match self {
            Slot::Fx => k.fx = v,
            Slot::Fy => k.fy = v,
            Slot::Cx => k.cx = v,
            Slot::Cy => k.cy = v,
            Slot::K1 => d.k1 = v,
            Slot::K2 => d.k2 = v,
            Slot::P1 => d.p1 = v,
            Slot::P2 => d.p2 = v,
            Slot::K3 => d.k3 = v,
        }
    }
}

/// Which camera parameters the mono refinement may move.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct IntrinsicMask {
    free: Vec<Slot>,
    /// `fx / fy`, kept constant when the aspect ratio is fixed.
    aspect: Option<f64>,
}

impl IntrinsicMask {
    /// With fewer than three views the principal point and the tangential
    /// terms are held fixed regardless of `options`.
    pub(crate) fn new(options: &CalibrationOptions, views: usize, initial: &Intrinsics) -> Self {
        let few_views = views < 3;
        let mut free = vec![Slot::Fx];
        let aspect = options.fix_aspect_ratio.then(|| initial.fx / initial.fy);
        if aspect.is_none() {
            free.push(Slot::Fy);
        }
        if !(options.fix_principal_point || few_views) {
            free.extend([Slot::Cx, Slot::Cy]);
        }
        free.extend([Slot::K1, Slot::K2]);
        if !(options.zero_tangent_dist || few_views) {
            free.extend([Slot::P1, Slot::P2]);
        }
        if !options.fix_k3 {
            free.push(Slot::K3);
        }
        Self { free, aspect }
    }

    pub(crate) fn len(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn pack(&self, camera: &PinholeCamera) -> Vec<f64> {
        self.free.iter().map(|s| s.get(camera)).collect()
    }

    pub(crate) fn unpack(&self, base: &PinholeCamera, x: &[f64]) -> PinholeCamera {
        let mut cam = *base;
        for (slot, &v) in self.free.iter().zip(x) {
            slot.set(&mut cam, v);
        }
        if let Some(aspect) = self.aspect {
            cam.intrinsics.fy = cam.intrinsics.fx / aspect;
        }
        cam
    }
}

/// Intrinsics, distortion and every board pose against all views.
pub(crate) struct MonoProblem<'a> {
    pub object: &'a [Point3<f64>],
    pub observations: &'a [&'a PointObservation],
    pub mask: IntrinsicMask,
    pub base: PinholeCamera,
}

impl MonoProblem<'_> {
    pub(crate) fn pack(&self, camera: &PinholeCamera, poses: &[Pose]) -> DVector<f64> {
        let mut x = self.mask.pack(camera);
        for pose in poses {
            x.extend(encode_pose(pose));
        }
        DVector::from_vec(x)
    }

    pub(crate) fn unpack(&self, x: &DVector<f64>) -> (PinholeCamera, Vec<Pose>) {
        let n = self.mask.len();
        let camera = self.mask.unpack(&self.base, &x.as_slice()[..n]);
        let poses = x.as_slice()[n..]
            .chunks_exact(POSE_DOF)
            .map(decode_pose)
            .collect();
        (camera, poses)
    }

    fn rows_per_view(&self) -> usize {
        2 * self.object.len()
    }
}

impl NllsProblem for MonoProblem<'_> {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let (camera, poses) = self.unpack(x);
        let mut out = Vec::with_capacity(self.rows_per_view() * poses.len());
        for (pose, obs) in poses.iter().zip(self.observations) {
            push_view_residuals(&mut out, &camera, pose, self.object, obs);
        }
        DVector::from_vec(out)
    }

    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let rows = self.rows_per_view();
        let n_intr = self.mask.len();
        let mut jac = DMatrix::zeros(rows * self.observations.len(), x.len());

        // intrinsic columns touch every view
        numeric_jacobian(
            |p| {
                let mut shifted = x.clone();
                shifted.as_mut_slice()[..n_intr].copy_from_slice(p);
                self.residuals(&shifted).as_slice().to_vec()
            },
            &x.as_slice()[..n_intr],
            &mut jac,
            (0, 0),
        );

        let (camera, _) = self.unpack(x);
        for (v, obs) in self.observations.iter().enumerate() {
            let start = n_intr + v * POSE_DOF;
            numeric_jacobian(
                |p| view_residuals(&camera, &decode_pose(p), self.object, obs),
                &x.as_slice()[start..start + POSE_DOF],
                &mut jac,
                (v * rows, start),
            );
        }
        jac
    }
}

/// Relative pose and left board poses against both cameras, intrinsics fixed.
///
/// Residuals are ordered per view: left corners, then right corners.
pub(crate) struct StereoProblem<'a> {
    pub object: &'a [Point3<f64>],
    pub left: &'a [&'a PointObservation],
    pub right: &'a [&'a PointObservation],
    pub left_camera: PinholeCamera,
    pub right_camera: PinholeCamera,
}

impl StereoProblem<'_> {
    pub(crate) fn pack(&self, relative: &Pose, left_poses: &[Pose]) -> DVector<f64> {
        let mut x = encode_pose(relative).to_vec();
        for pose in left_poses {
            x.extend(encode_pose(pose));
        }
        DVector::from_vec(x)
    }

    pub(crate) fn unpack(x: &DVector<f64>) -> (Pose, Vec<Pose>) {
        let relative = decode_pose(&x.as_slice()[..POSE_DOF]);
        let poses = x.as_slice()[POSE_DOF..]
            .chunks_exact(POSE_DOF)
            .map(decode_pose)
            .collect();
        (relative, poses)
    }

    fn rows_per_side(&self) -> usize {
        2 * self.object.len()
    }

    fn view_block(&self, v: usize, relative: &Pose, pose: &Pose) -> Vec<f64> {
        let mut out = Vec::with_capacity(2 * self.rows_per_side());
        push_view_residuals(&mut out, &self.left_camera, pose, self.object, self.left[v]);
        push_view_residuals(
            &mut out,
            &self.right_camera,
            &(relative * pose),
            self.object,
            self.right[v],
        );
        out
    }
}

impl NllsProblem for StereoProblem<'_> {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let (relative, poses) = Self::unpack(x);
        let mut out = Vec::with_capacity(2 * self.rows_per_side() * poses.len());
        for (v, pose) in poses.iter().enumerate() {
            out.extend(self.view_block(v, &relative, pose));
        }
        DVector::from_vec(out)
    }

    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let block = 2 * self.rows_per_side();
        let (relative, poses) = Self::unpack(x);
        let mut jac = DMatrix::zeros(block * poses.len(), x.len());

        // the relative pose moves the right half of every view block
        numeric_jacobian(
            |p| {
                let relative = decode_pose(p);
                poses
                    .iter()
                    .enumerate()
                    .flat_map(|(v, pose)| self.view_block(v, &relative, pose))
                    .collect()
            },
            &x.as_slice()[..POSE_DOF],
            &mut jac,
            (0, 0),
        );

        for v in 0..poses.len() {
            let start = POSE_DOF * (v + 1);
            numeric_jacobian(
                |p| self.view_block(v, &relative, &decode_pose(p)),
                &x.as_slice()[start..start + POSE_DOF],
                &mut jac,
                (v * block, start),
            );
        }
        jac
    }
}
