#![deny(rust_2018_idioms)]
#![allow(non_snake_case)]

//! Shared projective-reconstruction types and the linear kernels built on
//! them: N-view homogeneous triangulation, linear pose from homogeneous 3D
//! points, and the pixel-scale preconditioner used around bundle adjustment.
//!
//! Everything here works on raw 3×4 projective camera matrices; there is no
//! intrinsic/extrinsic split and no distortion model.

use nalgebra::{DMatrix, DVector, OMatrix, Point2, U3, U4, Vector4};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeomError {
    #[error("not enough points")]
    NotEnoughPoints,
    #[error("degenerate geometry")]
    DegenerateGeometry,
    #[error("eigen decomposition failed")]
    EigenFailed,
    #[error("inconsistent data: {0}")]
    InconsistentData(&'static str),
}

pub type Result<T> = std::result::Result<T, GeomError>;

/// A 3×4 projective camera matrix.
pub type CameraMatrix = OMatrix<f64, U3, U4>;

mod structure;
pub use crate::structure::{SceneObservations, SceneStructure, SceneView, ViewObservations};

mod triangulate;
pub use crate::triangulate::triangulate_homogeneous;

mod pose;
pub use crate::pose::linear_pose_homogeneous;

mod scale;
pub use crate::scale::{PixelScaler, PixelScaling};

/// Project a homogeneous point through a camera matrix.
///
/// `None` when the point lies on the camera's principal plane (projective
/// depth numerically zero).
pub fn project(camera: &CameraMatrix, point: &Vector4<f64>) -> Option<Point2<f64>> {
    let x = camera * point;
    if x[2].abs() <= 1.0e-12 * point.norm() * camera.norm() {
        return None;
    }
    Some(Point2::new(x[0] / x[2], x[1] / x[2]))
}

/// Solve `A v ≈ 0` given the normal matrix `AᵀA`.
///
/// Returns the eigenvector of the smallest eigenvalue together with the
/// eigenvalue spectrum sorted ascending, so callers can test how well the
/// null direction is isolated.
pub fn null_space(normal: DMatrix<f64>) -> Result<(DVector<f64>, Vec<f64>)> {
    let eig = nalgebra::linalg::SymmetricEigen::try_new(normal, 1.0e-14, 1000)
        .ok_or(GeomError::EigenFailed)?;
    if eig.eigenvalues.iter().any(|v| !v.is_finite()) {
        return Err(GeomError::EigenFailed);
    }
    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&i, &j| {
        eig.eigenvalues[i]
            .partial_cmp(&eig.eigenvalues[j])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let vector = eig.eigenvectors.column(order[0]).into_owned();
    let spectrum = order.iter().map(|&i| eig.eigenvalues[i]).collect();
    Ok((vector, spectrum))
}

#[cfg(test)]
pub(crate) mod test_support {
    use nalgebra::{Matrix3, Point2, Rotation3, Vector3, Vector4};

    use crate::CameraMatrix;

    /// A pinhole-style projective camera for synthetic scenes.
    pub fn synthetic_camera(axisangle: Vector3<f64>, camcenter: Vector3<f64>) -> CameraMatrix {
        let k = Matrix3::new(800.0, 0.0, 320.0, 0.0, 800.0, 240.0, 0.0, 0.0, 1.0);
        let r = Rotation3::new(axisangle);
        let t = -(r * camcenter);
        let mut p = CameraMatrix::zeros();
        p.fixed_view_mut::<3, 3>(0, 0).copy_from(&(k * r.matrix()));
        p.fixed_view_mut::<3, 1>(0, 3).copy_from(&(k * t));
        p
    }

    pub fn synthetic_points(n: usize) -> Vec<Vector4<f64>> {
        (0..n)
            .map(|i| {
                let f = i as f64;
                Vector4::new(
                    (f * 0.37).sin() * 0.8,
                    (f * 0.73).cos() * 0.6,
                    4.0 + (f * 0.11).sin(),
                    1.0,
                )
            })
            .collect()
    }

    pub fn exact_pixels(camera: &CameraMatrix, points: &[Vector4<f64>]) -> Vec<Point2<f64>> {
        points
            .iter()
            .map(|x| crate::project(camera, x).expect("point in front of synthetic camera"))
            .collect()
    }
}
