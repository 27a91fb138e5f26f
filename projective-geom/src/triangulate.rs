use nalgebra::{DMatrix, Matrix3, Point2, Vector4};

use crate::{CameraMatrix, GeomError, Result};

/// Ratio below which the second-smallest eigenvalue of the normal matrix
/// marks the null direction as non-unique (rays parallel or coincident).
const DEGENERACY_RATIO: f64 = 1.0e-12;

/// Triangulate one homogeneous 3D point from its projections in N views.
///
/// Linear method: each view contributes the first two rows of `T·P`, where
/// `T` shifts the observed pixel to the origin and scales by its magnitude,
/// so the rows are well conditioned without knowing image dimensions. The
/// point is the isolated null direction of the stacked system.
pub fn triangulate_homogeneous(
    cameras: &[CameraMatrix],
    pixels: &[Point2<f64>],
) -> Result<Vector4<f64>> {
    if cameras.len() != pixels.len() {
        return Err(GeomError::InconsistentData("camera/pixel count mismatch"));
    }
    if cameras.len() < 2 {
        return Err(GeomError::NotEnoughPoints);
    }

    let mut a = DMatrix::<f64>::zeros(2 * cameras.len(), 4);
    for (i, (camera, pixel)) in cameras.iter().zip(pixels.iter()).enumerate() {
        let s = pixel.coords.norm().max(1.0);
        #[rustfmt::skip]
        let t = Matrix3::new(
            1.0 / s, 0.0, -pixel.x / s,
            0.0, 1.0 / s, -pixel.y / s,
            0.0, 0.0, 1.0,
        );
        let tp = t * camera;
        for r in 0..2 {
            let row = tp.row(r);
            let norm = row.norm();
            if norm <= f64::MIN_POSITIVE {
                return Err(GeomError::DegenerateGeometry);
            }
            a.row_mut(2 * i + r).copy_from(&(row / norm));
        }
    }

    let normal = a.transpose() * &a;
    let (vector, spectrum) = crate::null_space(normal)?;
    if spectrum[1] <= DEGENERACY_RATIO * spectrum[3].max(1.0) {
        return Err(GeomError::DegenerateGeometry);
    }
    Ok(Vector4::new(vector[0], vector[1], vector[2], vector[3]))
}
