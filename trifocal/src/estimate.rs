use nalgebra::{DMatrix, Matrix3, Matrix4, Point2};

use projective_geom::{CameraMatrix, GeomError, Result};

use crate::tensor::{extract_cameras, TrifocalTensor};
use crate::TripleObservation;

/// Minimum number of triples for the linear solve (26 unknowns up to scale,
/// 4 independent equations per triple).
pub const MIN_TRIPLES: usize = 7;

/// A trifocal model in pixel coordinates together with the camera pair it
/// decomposes into (`P1 = [I | 0]` implied).
#[derive(Debug, Clone)]
pub struct TrifocalSolution {
    pub tensor: TrifocalTensor,
    pub p2: CameraMatrix,
    pub p3: CameraMatrix,
}

struct Conditioner {
    t: Matrix3<f64>,
}

impl Conditioner {
    fn fit(pixels: impl Iterator<Item = Point2<f64>> + Clone) -> Self {
        let mut n = 0usize;
        let (mut cx, mut cy) = (0.0, 0.0);
        for p in pixels.clone() {
            cx += p.x;
            cy += p.y;
            n += 1;
        }
        let nf = n as f64;
        let (cx, cy) = (cx / nf, cy / nf);
        let spread = pixels
            .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
            .sum::<f64>()
            / nf;
        let s = spread.max(1.0e-9);
        #[rustfmt::skip]
        let t = Matrix3::new(
            1.0 / s, 0.0, -cx / s,
            0.0, 1.0 / s, -cy / s,
            0.0, 0.0, 1.0,
        );
        Self { t }
    }

    fn map(&self, p: Point2<f64>) -> nalgebra::Vector3<f64> {
        self.t * nalgebra::Vector3::new(p.x, p.y, 1.0)
    }
}

fn skew(v: &nalgebra::Vector3<f64>) -> Matrix3<f64> {
    #[rustfmt::skip]
    let m = Matrix3::new(
        0.0, -v[2], v[1],
        v[2], 0.0, -v[0],
        -v[1], v[0], 0.0,
    );
    m
}

/// Linearly estimate the trifocal geometry of the given triples.
///
/// Pixels are conditioned per view, the 27-unknown incidence system
/// `[x′]ₓ (Σₖ xₖ Tₖ) [x″]ₓ = 0` is solved for its null direction, cameras
/// are extracted in the conditioned frame and mapped back so the result
/// lives in pixel coordinates with `P1 = [I | 0]`. The returned tensor is
/// rebuilt from the final cameras and is therefore internally consistent.
pub fn estimate_trifocal(observations: &[TripleObservation]) -> Result<TrifocalSolution> {
    if observations.len() < MIN_TRIPLES {
        return Err(GeomError::NotEnoughPoints);
    }

    let c1 = Conditioner::fit(observations.iter().map(|o| o.p1));
    let c2 = Conditioner::fit(observations.iter().map(|o| o.p2));
    let c3 = Conditioner::fit(observations.iter().map(|o| o.p3));

    let mut a = DMatrix::<f64>::zeros(9 * observations.len(), 27);
    for (row_base, o) in observations.iter().enumerate() {
        let x1 = c1.map(o.p1);
        let s2 = skew(&c2.map(o.p2));
        let s3 = skew(&c3.map(o.p3));
        // coefficient of T_k[i][j] in incidence entry (r, c):
        // s2[(r, i)] * x1[k] * s3[(j, c)]
        for r in 0..3 {
            for c in 0..3 {
                let row = 9 * row_base + 3 * r + c;
                for k in 0..3 {
                    for i in 0..3 {
                        for j in 0..3 {
                            a[(row, 9 * k + 3 * i + j)] = s2[(r, i)] * x1[k] * s3[(j, c)];
                        }
                    }
                }
            }
        }
    }

    let normal = a.transpose() * &a;
    let (vector, _spectrum) = projective_geom::null_space(normal)?;
    let conditioned = TrifocalTensor::from_flat(vector.as_slice())?;

    let (p2_c, p3_c) = extract_cameras(&conditioned)?;

    // undo the conditioning: cameras move back to pixel coordinates while
    // re-anchoring the first view at the identity
    let mut k4 = Matrix4::identity();
    k4.fixed_view_mut::<3, 3>(0, 0).copy_from(&c1.t);
    let t2_inv = c2.t.try_inverse().ok_or(GeomError::EigenFailed)?;
    let t3_inv = c3.t.try_inverse().ok_or(GeomError::EigenFailed)?;
    let p2 = t2_inv * p2_c * k4;
    let p3 = t3_inv * p3_c * k4;
    let p2 = p2 / p2.norm();
    let p3 = p3 / p3.norm();

    Ok(TrifocalSolution {
        tensor: TrifocalTensor::from_cameras(&p2, &p3).normalized(),
        p2,
        p3,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{observe, synthetic_points, three_cameras};
    use projective_geom::triangulate_homogeneous;

    #[test]
    fn test_estimate_exact_data() {
        let cams = three_cameras();
        let points = synthetic_points(20);
        let obs = observe(&cams, &points);

        let sol = estimate_trifocal(&obs).unwrap();
        let triple = [CameraMatrix::identity(), sol.p2, sol.p3];
        for o in &obs {
            let pixels = [o.p1, o.p2, o.p3];
            let x = triangulate_homogeneous(&triple, &pixels).unwrap();
            for (cam, expected) in triple.iter().zip(pixels.iter()) {
                let reproj = projective_geom::project(cam, &x).unwrap();
                approx::assert_abs_diff_eq!(reproj, *expected, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_estimate_needs_seven() {
        let cams = three_cameras();
        let points = synthetic_points(6);
        let obs = observe(&cams, &points);
        assert!(matches!(
            estimate_trifocal(&obs),
            Err(GeomError::NotEnoughPoints)
        ));
    }
}
