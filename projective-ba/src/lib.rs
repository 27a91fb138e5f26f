#![deny(rust_2018_idioms)]
#![allow(non_snake_case)]

//! Bundle adjustment of a projective reconstruction.
//!
//! The problem refines raw 3×4 camera matrices and homogeneous 3D points by
//! minimizing pixel reprojection error. There is no intrinsic/extrinsic
//! parameterization: every entry of every non-fixed camera is a parameter,
//! as is every coordinate of every homogeneous point.

use nalgebra::storage::Owned;
use nalgebra::{self as na, Dyn, Matrix2xX, Vector4};

use projective_geom::{CameraMatrix, SceneObservations, SceneStructure};

type NCamsType = u8;

#[inline]
fn usize(v: NCamsType) -> usize {
    v as usize
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("inconsistent data: {0}")]
    InconsistentData(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

const CAM_PARAMS: usize = 12;
const PT_PARAMS: usize = 4;

/// Perform projective bundle adjustment.
///
/// The most important internal operations are calculation of the residual
/// errors and calculation of the Jacobian of the residuals with respect to
/// the parameters (camera matrix entries and homogeneous point
/// coordinates). Fixed views keep their camera matrix untouched and
/// contribute no parameters; they still constrain the points they observe.
#[derive(Debug, Clone)]
pub struct ProjectiveBundleAdjuster {
    /// The number of residuals; twice the observation count.
    nresid: usize,
    /// The 2D observed points.
    observed: Matrix2xX<f64>,
    /// The index of the camera doing the observation.
    cam_idx: Vec<NCamsType>,
    /// The index of the 3D point being observed.
    pt_idx: Vec<usize>,

    /// All camera matrices, fixed slots included.
    ///
    /// Updated every iteration (free slots only).
    cams: Vec<CameraMatrix>,
    /// Parameter-block rank of each camera; `None` for fixed slots.
    free_rank: Vec<Option<usize>>,
    num_free: usize,

    /// The homogeneous world points.
    ///
    /// Updated every iteration.
    points: Vec<Vector4<f64>>,

    /// A cache of the parameters used to build `cams` and `points`.
    params_cache: na::DVector<f64>,
}

impl ProjectiveBundleAdjuster {
    /// Create a new [ProjectiveBundleAdjuster] from a filled scene and its
    /// per-view observation lists.
    pub fn new(structure: &SceneStructure, observations: &SceneObservations) -> Result<Self> {
        if observations.views.len() != structure.num_views() {
            return Err(Error::InconsistentData("view count mismatch"));
        }
        if structure.num_views() > usize(NCamsType::MAX) + 1 {
            return Err(Error::InconsistentData("too many views"));
        }
        if structure.points.is_empty() {
            return Err(Error::InconsistentData("no points"));
        }

        let mut observed_raw = Vec::new();
        let mut cam_idx = Vec::new();
        let mut pt_idx = Vec::new();
        for (slot, view_obs) in observations.views.iter().enumerate() {
            if view_obs.point.len() != view_obs.pixel.len() {
                return Err(Error::InconsistentData("observation array shape"));
            }
            if !view_obs.is_empty() && !structure.view(slot).known {
                return Err(Error::InconsistentData("observation on unknown camera"));
            }
            for (&point, pixel) in view_obs.point.iter().zip(view_obs.pixel.iter()) {
                if point >= structure.points.len() {
                    return Err(Error::InconsistentData("point index out of range"));
                }
                observed_raw.push(pixel.x);
                observed_raw.push(pixel.y);
                cam_idx.push(slot as NCamsType);
                pt_idx.push(point);
            }
        }
        if cam_idx.is_empty() {
            return Err(Error::InconsistentData("no observations"));
        }
        let nresid = cam_idx.len() * 2;

        {
            // count how many points each non-fixed camera observes
            let mut per_cam = vec![0usize; structure.num_views()];
            for i in cam_idx.iter() {
                per_cam[usize(*i)] += 1;
            }
            for (slot, count) in per_cam.iter().enumerate() {
                if !structure.view(slot).fixed && *count < 6 {
                    tracing::warn!("camera {slot} observes only {count} points");
                }
            }
        }

        let mut free_rank = Vec::with_capacity(structure.num_views());
        let mut num_free = 0usize;
        for view in structure.views() {
            if view.fixed {
                free_rank.push(None);
            } else {
                free_rank.push(Some(num_free));
                num_free += 1;
            }
        }

        let cams: Vec<CameraMatrix> = structure.views().iter().map(|v| v.camera).collect();
        let points: Vec<Vector4<f64>> = structure
            .points
            .iter()
            .map(|x| {
                let n = x.norm();
                if n > 0.0 {
                    x / n
                } else {
                    *x
                }
            })
            .collect();

        let params_cache = pack_params(&cams, &free_rank, num_free, &points);

        Ok(Self {
            nresid,
            observed: Matrix2xX::from_column_slice(&observed_raw),
            cam_idx,
            pt_idx,
            cams,
            free_rank,
            num_free,
            points,
            params_cache,
        })
    }

    pub fn cams(&self) -> &[CameraMatrix] {
        &self.cams
    }

    pub fn points(&self) -> &[Vector4<f64>] {
        &self.points
    }

    /// Root-mean-square reprojection error at the current parameters.
    pub fn rms_error(&self) -> f64 {
        use levenberg_marquardt::LeastSquaresProblem;
        let r = self.residuals().expect("residuals");
        (r.norm_squared() / (self.nresid as f64 / 2.0)).sqrt()
    }
}

fn pack_params(
    cams: &[CameraMatrix],
    free_rank: &[Option<usize>],
    num_free: usize,
    points: &[Vector4<f64>],
) -> na::DVector<f64> {
    let mut params = Vec::with_capacity(num_free * CAM_PARAMS + points.len() * PT_PARAMS);
    for (cam, rank) in cams.iter().zip(free_rank.iter()) {
        if rank.is_some() {
            for r in 0..3 {
                for c in 0..4 {
                    params.push(cam[(r, c)]);
                }
            }
        }
    }
    for x in points.iter() {
        params.extend(x.as_slice());
    }
    params.into()
}

impl levenberg_marquardt::LeastSquaresProblem<f64, Dyn, Dyn> for ProjectiveBundleAdjuster {
    type ParameterStorage = Owned<f64, Dyn>;
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;

    fn set_params(&mut self, x: &na::DVector<f64>) {
        debug_assert_eq!(
            x.nrows(),
            self.num_free * CAM_PARAMS + self.points.len() * PT_PARAMS
        );
        self.params_cache = x.clone();
        let params = x.as_slice();
        let (cam_params, pt_params) = params.split_at(self.num_free * CAM_PARAMS);

        for (slot, rank) in self.free_rank.iter().enumerate() {
            if let Some(rank) = rank {
                let block = &cam_params[rank * CAM_PARAMS..(rank + 1) * CAM_PARAMS];
                self.cams[slot] = CameraMatrix::from_row_slice(block);
            }
        }
        for (i, block) in pt_params.chunks_exact(PT_PARAMS).enumerate() {
            self.points[i] = Vector4::from_column_slice(block);
        }
    }

    fn params(&self) -> na::DVector<f64> {
        self.params_cache.clone()
    }

    fn residuals(&self) -> Option<na::DVector<f64>> {
        let mut residuals = Vec::with_capacity(self.nresid);
        for ((obs, cam_idx), pt_idx) in self
            .observed
            .column_iter()
            .zip(self.cam_idx.iter())
            .zip(self.pt_idx.iter())
        {
            let cam = &self.cams[usize(*cam_idx)];
            let x = &self.points[*pt_idx];
            let h = cam * x;
            let w = h[2];
            residuals.push(obs[0] - h[0] / w);
            residuals.push(obs[1] - h[1] / w);
        }
        debug_assert_eq!(residuals.len(), self.nresid);
        Some(na::DVector::from_column_slice(&residuals))
    }

    fn jacobian(&self) -> Option<na::Matrix<f64, Dyn, Dyn, Self::JacobianStorage>> {
        let ncols = self.num_free * CAM_PARAMS + self.points.len() * PT_PARAMS;
        let mut j = na::OMatrix::<f64, Dyn, Dyn>::zeros(self.nresid, ncols);

        for (obs_idx, (cam_idx, pt_idx)) in self.cam_idx.iter().zip(self.pt_idx.iter()).enumerate()
        {
            let ridx = obs_idx * 2;
            let cam = &self.cams[usize(*cam_idx)];
            let x = &self.points[*pt_idx];
            let h = cam * x;
            let w = h[2];
            let u = h[0] / w;
            let v = h[1] / w;

            // residual is observed - predicted, so every derivative of the
            // prediction enters negated
            if let Some(rank) = self.free_rank[usize(*cam_idx)] {
                let base = rank * CAM_PARAMS;
                for k in 0..4 {
                    let xk_w = x[k] / w;
                    j[(ridx, base + k)] = -xk_w;
                    j[(ridx, base + 8 + k)] = u * xk_w;
                    j[(ridx + 1, base + 4 + k)] = -xk_w;
                    j[(ridx + 1, base + 8 + k)] = v * xk_w;
                }
            }

            let pbase = self.num_free * CAM_PARAMS + pt_idx * PT_PARAMS;
            for k in 0..4 {
                j[(ridx, pbase + k)] = -(cam[(0, k)] - u * cam[(2, k)]) / w;
                j[(ridx + 1, pbase + k)] = -(cam[(1, k)] - v * cam[(2, k)]) / w;
            }
        }
        Some(j)
    }
}
