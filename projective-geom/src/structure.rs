use nalgebra::{Point2, Vector4};

use crate::CameraMatrix;

/// One camera slot of a [SceneStructure].
#[derive(Debug, Clone)]
pub struct SceneView {
    pub camera: CameraMatrix,
    pub width: u32,
    pub height: u32,
    /// Whether the camera matrix for this slot has been filled in.
    pub known: bool,
    /// Fixed views are excluded from bundle-adjustment parameters.
    pub fixed: bool,
}

impl Default for SceneView {
    fn default() -> Self {
        Self {
            camera: CameraMatrix::identity(),
            width: 0,
            height: 0,
            known: false,
            fixed: false,
        }
    }
}

/// Bundle-adjustment-ready container: one camera matrix per view slot plus
/// the homogeneous 3D points, all in one common projective frame.
#[derive(Debug, Clone, Default)]
pub struct SceneStructure {
    views: Vec<SceneView>,
    pub points: Vec<Vector4<f64>>,
}

impl SceneStructure {
    pub fn new(num_views: usize) -> Self {
        Self {
            views: vec![SceneView::default(); num_views],
            points: Vec::new(),
        }
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn view(&self, slot: usize) -> &SceneView {
        &self.views[slot]
    }

    pub fn view_mut(&mut self, slot: usize) -> &mut SceneView {
        &mut self.views[slot]
    }

    pub fn views(&self) -> &[SceneView] {
        &self.views
    }

    pub fn set_view(&mut self, slot: usize, camera: CameraMatrix, width: u32, height: u32) {
        let view = &mut self.views[slot];
        view.camera = camera;
        view.width = width;
        view.height = height;
        view.known = true;
    }

    pub fn mark_fixed(&mut self, slot: usize) {
        self.views[slot].fixed = true;
    }
}

/// Observations of one view slot as parallel `point index` / `pixel` arrays.
#[derive(Debug, Clone, Default)]
pub struct ViewObservations {
    pub point: Vec<usize>,
    pub pixel: Vec<Point2<f64>>,
}

impl ViewObservations {
    pub fn add(&mut self, point: usize, pixel: Point2<f64>) {
        self.point.push(point);
        self.pixel.push(pixel);
    }

    pub fn len(&self) -> usize {
        self.point.len()
    }

    pub fn is_empty(&self) -> bool {
        self.point.is_empty()
    }
}

/// Per-view observation lists feeding bundle adjustment. View order matches
/// the slots of the corresponding [SceneStructure].
#[derive(Debug, Clone, Default)]
pub struct SceneObservations {
    pub views: Vec<ViewObservations>,
}

impl SceneObservations {
    pub fn new(num_views: usize) -> Self {
        Self {
            views: vec![ViewObservations::default(); num_views],
        }
    }

    /// Total observation count across all views.
    pub fn total(&self) -> usize {
        self.views.iter().map(|v| v.len()).sum()
    }
}
