use nalgebra::{DMatrix, Matrix3, Point2, Vector4};

use crate::{CameraMatrix, GeomError, Result};

const DEGENERACY_RATIO: f64 = 1.0e-12;

/// Estimate a 3×4 projective camera matrix from known homogeneous 3D points
/// and their 2D observations (camera resection).
///
/// Linear DLT over the 12 matrix entries: pixels are shifted/scaled to zero
/// mean and unit magnitude, each homogeneous point to unit norm, then the
/// camera is the isolated null direction of the 2N×12 incidence system,
/// mapped back to pixel coordinates. Needs at least 6 correspondences.
pub fn linear_pose_homogeneous(
    points: &[Vector4<f64>],
    pixels: &[Point2<f64>],
) -> Result<CameraMatrix> {
    if points.len() != pixels.len() {
        return Err(GeomError::InconsistentData("point/pixel count mismatch"));
    }
    let n = points.len();
    if n < 6 {
        return Err(GeomError::NotEnoughPoints);
    }

    // pixel conditioning transform
    let (cx, cy) = pixels
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (cx / n as f64, cy / n as f64);
    let spread = pixels
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n as f64;
    let s = spread.max(1.0e-9);
    #[rustfmt::skip]
    let t = Matrix3::new(
        1.0 / s, 0.0, -cx / s,
        0.0, 1.0 / s, -cy / s,
        0.0, 0.0, 1.0,
    );

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (x, pixel)) in points.iter().zip(pixels.iter()).enumerate() {
        let xn = x / x.norm();
        let u = (pixel.x - cx) / s;
        let v = (pixel.y - cy) / s;
        for k in 0..4 {
            // rows of x × (P̂ X) = 0 for the conditioned pixel (u, v, 1)
            a[(2 * i, 4 + k)] = -xn[k];
            a[(2 * i, 8 + k)] = v * xn[k];
            a[(2 * i + 1, k)] = xn[k];
            a[(2 * i + 1, 8 + k)] = -u * xn[k];
        }
    }

    let normal = a.transpose() * &a;
    let (vector, spectrum) = crate::null_space(normal)?;
    if spectrum[1] <= DEGENERACY_RATIO * spectrum[11].max(1.0) {
        return Err(GeomError::DegenerateGeometry);
    }

    let p_conditioned = CameraMatrix::from_row_slice(vector.as_slice());
    let t_inv = t.try_inverse().ok_or(GeomError::EigenFailed)?;
    let p = t_inv * p_conditioned;
    Ok(p / p.norm())
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;

    use super::*;
    use crate::test_support::{exact_pixels, synthetic_camera, synthetic_points};

    #[test]
    fn test_resection_reprojects_exactly() {
        let cam = synthetic_camera(Vector3::new(0.1, -0.2, 0.05), Vector3::new(0.5, -0.3, 0.2));
        let points = synthetic_points(40);
        let pixels = exact_pixels(&cam, &points);

        let recovered = linear_pose_homogeneous(&points, &pixels).unwrap();
        for (x, expected) in points.iter().zip(pixels.iter()) {
            let reproj = crate::project(&recovered, x).unwrap();
            approx::assert_relative_eq!(reproj, *expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_resection_needs_six_points() {
        let cam = synthetic_camera(Vector3::zeros(), Vector3::zeros());
        let points = synthetic_points(5);
        let pixels = exact_pixels(&cam, &points);
        assert_eq!(
            linear_pose_homogeneous(&points, &pixels),
            Err(GeomError::NotEnoughPoints)
        );
    }

    #[test]
    fn test_resection_rejects_collinear_points() {
        let points: Vec<_> = (0..12)
            .map(|i| Vector4::new(i as f64 * 0.1, 0.0, 3.0, 1.0))
            .collect();
        let cam = synthetic_camera(Vector3::zeros(), Vector3::new(0.2, 0.1, 0.0));
        let pixels = exact_pixels(&cam, &points);
        assert!(matches!(
            linear_pose_homogeneous(&points, &pixels),
            Err(GeomError::DegenerateGeometry)
        ));
    }
}
