#![deny(rust_2018_idioms)]
#![allow(non_snake_case)]

//! Trifocal tensor estimation for three views sharing feature tracks.
//!
//! The tensor is estimated linearly from seven or more point triples and
//! wrapped in a robust (RANSAC) fitter. Camera extraction yields two 3×4
//! projective matrices compatible with the first view's identity camera.

use nalgebra::Point2;

pub use projective_geom::{GeomError, Result};

mod tensor;
pub use crate::tensor::{extract_cameras, TrifocalTensor};

mod estimate;
pub use crate::estimate::{estimate_trifocal, TrifocalSolution, MIN_TRIPLES};

mod ransac;
pub use crate::ransac::{TrifocalRansac, TrifocalRansacConfig};

/// One feature track observed in all three views, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripleObservation {
    pub p1: Point2<f64>,
    pub p2: Point2<f64>,
    pub p3: Point2<f64>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use nalgebra::{Matrix3, Rotation3, Vector3, Vector4};

    use projective_geom::CameraMatrix;

    use crate::TripleObservation;

    pub fn synthetic_camera(
        focal: f64,
        axisangle: Vector3<f64>,
        camcenter: Vector3<f64>,
    ) -> CameraMatrix {
        let k = Matrix3::new(focal, 0.0, 320.0, 0.0, focal, 240.0, 0.0, 0.0, 1.0);
        let r = Rotation3::new(axisangle);
        let t = -(r * camcenter);
        let mut p = CameraMatrix::zeros();
        p.fixed_view_mut::<3, 3>(0, 0).copy_from(&(k * r.matrix()));
        p.fixed_view_mut::<3, 1>(0, 3).copy_from(&(k * t));
        p
    }

    pub fn three_cameras() -> [CameraMatrix; 3] {
        [
            synthetic_camera(700.0, Vector3::new(0.02, -0.01, 0.0), Vector3::new(-0.1, 0.05, 0.0)),
            synthetic_camera(800.0, Vector3::new(0.0, 0.06, 0.01), Vector3::new(0.5, 0.0, 0.1)),
            synthetic_camera(750.0, Vector3::new(-0.03, 0.02, 0.0), Vector3::new(0.2, 0.4, -0.1)),
        ]
    }

    pub fn synthetic_points(n: usize) -> Vec<Vector4<f64>> {
        (0..n)
            .map(|i| {
                let f = i as f64;
                Vector4::new(
                    (f * 0.41).sin() * 1.1,
                    (f * 0.67).cos() * 0.9,
                    5.0 + (f * 0.13).sin() * 1.5,
                    1.0,
                )
            })
            .collect()
    }

    pub fn observe(cams: &[CameraMatrix; 3], points: &[Vector4<f64>]) -> Vec<TripleObservation> {
        points
            .iter()
            .map(|x| TripleObservation {
                p1: projective_geom::project(&cams[0], x).unwrap(),
                p2: projective_geom::project(&cams[1], x).unwrap(),
                p3: projective_geom::project(&cams[2], x).unwrap(),
            })
            .collect()
    }
}
