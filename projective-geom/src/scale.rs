use nalgebra::{Matrix3, Point2};

use crate::{CameraMatrix, GeomError, Result, SceneObservations, SceneStructure};

/// Per-view pixel normalization derived from image dimensions.
#[derive(Debug, Clone, Copy)]
pub struct PixelScaling {
    pub scale: f64,
    pub cx: f64,
    pub cy: f64,
}

impl PixelScaling {
    pub fn from_shape(width: u32, height: u32) -> Self {
        Self {
            scale: f64::from(width + height) / 2.0,
            cx: f64::from(width) / 2.0,
            cy: f64::from(height) / 2.0,
        }
    }

    /// The 3×3 pixel transform `T`.
    pub fn matrix(&self) -> Matrix3<f64> {
        #[rustfmt::skip]
        let t = Matrix3::new(
            1.0 / self.scale, 0.0, -self.cx / self.scale,
            0.0, 1.0 / self.scale, -self.cy / self.scale,
            0.0, 0.0, 1.0,
        );
        t
    }

    pub fn apply_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.scale, (p.y - self.cy) / self.scale)
    }

    pub fn undo_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(p.x * self.scale + self.cx, p.y * self.scale + self.cy)
    }

    /// Fold the pixel transform into a camera matrix: `T·P`.
    pub fn apply(&self, p: &CameraMatrix) -> CameraMatrix {
        self.matrix() * p
    }

    /// Take the pixel transform back out of a camera matrix: `T⁻¹·P`.
    pub fn remove(&self, p: &CameraMatrix) -> CameraMatrix {
        #[rustfmt::skip]
        let t_inv = Matrix3::new(
            self.scale, 0.0, self.cx,
            0.0, self.scale, self.cy,
            0.0, 0.0, 1.0,
        );
        t_inv * p
    }
}

/// Scales a scene's pixel observations and camera matrices into a
/// normalized frame for bundle adjustment, and back out again.
///
/// The scaler keeps per-view state between [PixelScaler::apply_scale] and
/// [PixelScaler::undo_scale]. `undo_scale` restores the observations only;
/// camera matrices are restored by the caller through
/// [PixelScaling::remove], which lets the caller undo cameras in place on
/// the optimized result.
#[derive(Debug, Clone, Default)]
pub struct PixelScaler {
    scalings: Vec<PixelScaling>,
    applied: bool,
}

impl PixelScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pixel_scaling(&self, view: usize) -> &PixelScaling {
        &self.scalings[view]
    }

    pub fn apply_scale(
        &mut self,
        structure: &mut SceneStructure,
        observations: &mut SceneObservations,
    ) -> Result<()> {
        if self.applied {
            return Err(GeomError::InconsistentData("scale already applied"));
        }
        if structure.num_views() != observations.views.len() {
            return Err(GeomError::InconsistentData("view count mismatch"));
        }
        self.scalings = structure
            .views()
            .iter()
            .map(|v| PixelScaling::from_shape(v.width.max(1), v.height.max(1)))
            .collect();
        for (slot, scaling) in self.scalings.iter().enumerate() {
            let view = structure.view_mut(slot);
            view.camera = scaling.apply(&view.camera);
            for pixel in observations.views[slot].pixel.iter_mut() {
                *pixel = scaling.apply_pixel(*pixel);
            }
        }
        self.applied = true;
        Ok(())
    }

    pub fn undo_scale(
        &mut self,
        _structure: &mut SceneStructure,
        observations: &mut SceneObservations,
    ) -> Result<()> {
        if !self.applied {
            return Err(GeomError::InconsistentData("scale not applied"));
        }
        for (scaling, view_obs) in self.scalings.iter().zip(observations.views.iter_mut()) {
            for pixel in view_obs.pixel.iter_mut() {
                *pixel = scaling.undo_pixel(*pixel);
            }
        }
        self.applied = false;
        Ok(())
    }
}
