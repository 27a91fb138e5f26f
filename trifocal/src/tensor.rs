use nalgebra::{DMatrix, Matrix3, Vector3};

use projective_geom::{CameraMatrix, GeomError, Result};

/// The trifocal tensor as its three 3×3 correlation slices.
#[derive(Debug, Clone, PartialEq)]
pub struct TrifocalTensor {
    pub slices: [Matrix3<f64>; 3],
}

impl TrifocalTensor {
    /// Build the tensor of the camera triple `([I | 0], p2, p3)`.
    pub fn from_cameras(p2: &CameraMatrix, p3: &CameraMatrix) -> Self {
        let a4 = p2.column(3).into_owned();
        let b4 = p3.column(3).into_owned();
        let slices = [0, 1, 2].map(|i| {
            let ai = p2.column(i).into_owned();
            let bi = p3.column(i).into_owned();
            ai * b4.transpose() - a4 * bi.transpose()
        });
        Self { slices }
    }

    /// Contract the tensor with a first-view point: `Σₖ xₖ Tₖ`.
    pub fn contract(&self, x: &Vector3<f64>) -> Matrix3<f64> {
        self.slices[0] * x[0] + self.slices[1] * x[1] + self.slices[2] * x[2]
    }

    /// Frobenius-normalize all slices jointly.
    pub fn normalized(&self) -> Self {
        let n = self
            .slices
            .iter()
            .map(|s| s.norm_squared())
            .sum::<f64>()
            .sqrt();
        Self {
            slices: self.slices.map(|s| s / n),
        }
    }

    /// Reconstruct from a flat 27-vector in `slice, row, column` order.
    pub fn from_flat(v: &[f64]) -> Result<Self> {
        if v.len() != 27 {
            return Err(GeomError::InconsistentData("trifocal vector must have 27 entries"));
        }
        let slices = [0, 1, 2].map(|k| Matrix3::from_row_slice(&v[9 * k..9 * k + 9]));
        Ok(Self { slices })
    }
}

fn unit_null_vector_3(normal: Matrix3<f64>) -> Result<Vector3<f64>> {
    let (v, _spectrum) = projective_geom::null_space(DMatrix::from_column_slice(
        3,
        3,
        normal.as_slice(),
    ))?;
    let v = Vector3::new(v[0], v[1], v[2]);
    let n = v.norm();
    if n <= f64::MIN_POSITIVE {
        return Err(GeomError::DegenerateGeometry);
    }
    Ok(v / n)
}

/// Extract projective cameras `(P2, P3)` compatible with the tensor in the
/// frame where the first camera is `[I | 0]`.
///
/// Standard decomposition: the epipoles in views two and three come from
/// the common null directions of the tensor slices, then
/// `P2 = [[T₁e₃ T₂e₃ T₃e₃] | e₂]` and
/// `P3 = [(e₃e₃ᵀ − I)[T₁ᵀe₂ T₂ᵀe₂ T₃ᵀe₂] | e₃]`.
pub fn extract_cameras(tensor: &TrifocalTensor) -> Result<(CameraMatrix, CameraMatrix)> {
    let t = tensor.normalized();

    // right/left null vectors of each slice
    let mut right = Matrix3::zeros();
    let mut left = Matrix3::zeros();
    for (i, slice) in t.slices.iter().enumerate() {
        let vi = unit_null_vector_3(slice.transpose() * slice)?;
        let ui = unit_null_vector_3(slice * slice.transpose())?;
        right.row_mut(i).copy_from(&vi.transpose());
        left.row_mut(i).copy_from(&ui.transpose());
    }
    let e3 = unit_null_vector_3(right.transpose() * right)?;
    let e2 = unit_null_vector_3(left.transpose() * left)?;

    let mut p2 = CameraMatrix::zeros();
    let mut p3 = CameraMatrix::zeros();
    let outer = e3 * e3.transpose() - Matrix3::identity();
    for i in 0..3 {
        p2.column_mut(i).copy_from(&(t.slices[i] * e3));
        p3.column_mut(i).copy_from(&(outer * (t.slices[i].transpose() * e2)));
    }
    p2.column_mut(3).copy_from(&e2);
    p3.column_mut(3).copy_from(&e3);

    if p2.norm() <= f64::MIN_POSITIVE || p3.norm() <= f64::MIN_POSITIVE {
        return Err(GeomError::DegenerateGeometry);
    }
    Ok((p2, p3))
}

#[cfg(test)]
mod tests {
    use nalgebra::{Matrix3, Point2, Vector3};

    use super::*;
    use crate::test_support::{observe, synthetic_points, three_cameras};
    use projective_geom::triangulate_homogeneous;

    fn skew(p: Point2<f64>) -> Matrix3<f64> {
        #[rustfmt::skip]
        let m = Matrix3::new(
            0.0, -1.0, p.y,
            1.0, 0.0, -p.x,
            -p.y, p.x, 0.0,
        );
        m
    }

    // tensor of a camera triple anchored at [I | 0]
    fn canonical_tensor() -> (TrifocalTensor, [projective_geom::CameraMatrix; 3]) {
        let cams = three_cameras();
        // re-anchor so the first camera is the identity: right-multiply by
        // the inverse of [P1; 0 0 0 1]
        let mut h = nalgebra::Matrix4::identity();
        h.fixed_view_mut::<3, 4>(0, 0).copy_from(&cams[0]);
        let h_inv = h.try_inverse().unwrap();
        let p2 = cams[1] * h_inv;
        let p3 = cams[2] * h_inv;
        let anchored = [projective_geom::CameraMatrix::identity(), p2, p3];
        (TrifocalTensor::from_cameras(&p2, &p3), anchored)
    }

    #[test]
    fn test_point_incidence_is_zero() {
        let (tensor, cams) = canonical_tensor();
        for x in synthetic_points(15) {
            let o = observe(&[cams[0], cams[1], cams[2]], &[x])[0];
            let m = tensor.contract(&Vector3::new(o.p1.x, o.p1.y, 1.0));
            let incidence = skew(o.p2) * m * skew(o.p3);
            let scale = m.norm().max(1.0);
            approx::assert_relative_eq!(incidence / scale, Matrix3::zeros(), epsilon = 1e-7);
        }
    }

    #[test]
    fn test_extracted_cameras_reproject() {
        let (tensor, cams) = canonical_tensor();
        let (p2, p3) = extract_cameras(&tensor).unwrap();
        let extracted = [projective_geom::CameraMatrix::identity(), p2, p3];
        for x in synthetic_points(12) {
            let o = observe(&[cams[0], cams[1], cams[2]], &[x])[0];
            let pixels = [o.p1, o.p2, o.p3];
            let rec = triangulate_homogeneous(&extracted, &pixels).unwrap();
            for (cam, expected) in extracted.iter().zip(pixels.iter()) {
                let reproj = projective_geom::project(cam, &rec).unwrap();
                approx::assert_relative_eq!(reproj, *expected, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_from_flat_round_trip() {
        let (tensor, _) = canonical_tensor();
        let flat: Vec<f64> = tensor
            .slices
            .iter()
            .flat_map(|s| s.transpose().as_slice().to_vec())
            .collect();
        let rebuilt = TrifocalTensor::from_flat(&flat).unwrap();
        approx::assert_relative_eq!(rebuilt.slices[1], tensor.slices[1], epsilon = 1e-14);
        assert!(TrifocalTensor::from_flat(&flat[..20]).is_err());
    }
}
