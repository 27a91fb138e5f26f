#![deny(rust_2018_idioms)]

//! Pairwise image-match graph.
//!
//! Views are image nodes; motions are undirected pairwise relations carrying
//! the feature correspondences that survived robust matching. Both live in
//! arenas and refer to each other by index, so the cyclic view ↔ motion
//! relationship needs no reference counting.

use std::collections::BTreeMap;

use nalgebra::Point2;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("view index {0} out of range")]
    UnknownView(usize),
    #[error("motion endpoints must differ")]
    SelfLoop,
    #[error("feature index out of range in inlier list")]
    FeatureOutOfRange,
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// Opaque identifier of an image in the external feature database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewId(pub u32);

/// One inlier correspondence of a motion, as feature indices in the motion's
/// designated source and destination views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlierPair {
    pub src: u32,
    pub dst: u32,
}

/// An image node. `total_features` bounds the dense feature index range
/// `[0, total_features)` used by every motion touching this view.
#[derive(Debug, Clone)]
pub struct PairwiseView {
    pub id: ViewId,
    pub total_features: usize,
    /// Indices into [PairwiseGraph::motions] of every motion touching this view.
    pub motions: Vec<usize>,
}

/// An undirected relation between two views.
///
/// The source/destination designation is intrinsic to the motion (it records
/// which way the pairwise matcher ran), not a choice of the caller. Readers
/// that care about a particular view use [PairwiseMotion::oriented].
#[derive(Debug, Clone)]
pub struct PairwiseMotion {
    /// Arena index of the designated source view.
    pub src: usize,
    /// Arena index of the designated destination view.
    pub dst: usize,
    /// Correspondences accepted by pairwise robust matching.
    pub inliers: Vec<InlierPair>,
    /// Scalar quality used by triplet selection.
    pub score: f64,
}

impl PairwiseMotion {
    /// The endpoint that is not `view`.
    pub fn other(&self, view: usize) -> usize {
        if view == self.src {
            self.dst
        } else {
            self.src
        }
    }

    pub fn is_connected(&self, view: usize) -> bool {
        view == self.src || view == self.dst
    }

    /// Iterate inliers as `(feat_near, feat_far)` with `near` the given view.
    ///
    /// This is the single place direction flags are evaluated; every reader
    /// of inlier lists goes through here.
    pub fn oriented(&self, near: usize) -> Option<impl Iterator<Item = (u32, u32)> + '_> {
        let near_is_src = if near == self.src {
            true
        } else if near == self.dst {
            false
        } else {
            return None;
        };
        Some(self.inliers.iter().map(move |p| {
            if near_is_src {
                (p.src, p.dst)
            } else {
                (p.dst, p.src)
            }
        }))
    }
}

/// Arena of views and motions.
#[derive(Debug, Clone, Default)]
pub struct PairwiseGraph {
    views: Vec<PairwiseView>,
    motions: Vec<PairwiseMotion>,
}

impl PairwiseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a view node, returning its arena index.
    pub fn add_view(&mut self, id: ViewId, total_features: usize) -> usize {
        let idx = self.views.len();
        self.views.push(PairwiseView {
            id,
            total_features,
            motions: Vec::new(),
        });
        idx
    }

    /// Add a motion from designated source `src` to destination `dst` and
    /// wire it into both views' motion lists.
    pub fn add_motion(
        &mut self,
        src: usize,
        dst: usize,
        score: f64,
        inliers: Vec<InlierPair>,
    ) -> Result<usize> {
        if src == dst {
            return Err(GraphError::SelfLoop);
        }
        let nsrc = self
            .views
            .get(src)
            .ok_or(GraphError::UnknownView(src))?
            .total_features;
        let ndst = self
            .views
            .get(dst)
            .ok_or(GraphError::UnknownView(dst))?
            .total_features;
        if inliers
            .iter()
            .any(|p| p.src as usize >= nsrc || p.dst as usize >= ndst)
        {
            return Err(GraphError::FeatureOutOfRange);
        }
        let idx = self.motions.len();
        self.motions.push(PairwiseMotion {
            src,
            dst,
            inliers,
            score,
        });
        self.views[src].motions.push(idx);
        self.views[dst].motions.push(idx);
        Ok(idx)
    }

    /// Find the motion connecting `a` and `b`, if any.
    ///
    /// Linear scan over the motion list of `a`; per-view degree is small in
    /// the graphs this is used on.
    pub fn find_motion(&self, a: usize, b: usize) -> Option<usize> {
        self.views
            .get(a)?
            .motions
            .iter()
            .copied()
            .find(|&m| self.motions[m].other(a) == b)
    }

    pub fn view(&self, idx: usize) -> &PairwiseView {
        &self.views[idx]
    }

    pub fn motion(&self, idx: usize) -> &PairwiseMotion {
        &self.motions[idx]
    }

    pub fn views(&self) -> &[PairwiseView] {
        &self.views
    }

    pub fn motions(&self) -> &[PairwiseMotion] {
        &self.motions
    }
}

/// Read-only access to the similar-images database: per-view pixel
/// coordinates of detected features and per-view image dimensions.
///
/// Feature order matches the dense feature indices used by
/// [PairwiseMotion::inliers].
pub trait FeatureDatabase {
    fn pixel_features(&self, view: ViewId) -> Option<&[Point2<f64>]>;
    fn image_shape(&self, view: ViewId) -> Option<(u32, u32)>;
}

/// In-memory [FeatureDatabase].
#[derive(Debug, Clone, Default)]
pub struct MemoryFeatureDb {
    features: BTreeMap<ViewId, Vec<Point2<f64>>>,
    shapes: BTreeMap<ViewId, (u32, u32)>,
}

impl MemoryFeatureDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_view(&mut self, id: ViewId, shape: (u32, u32), features: Vec<Point2<f64>>) {
        self.features.insert(id, features);
        self.shapes.insert(id, shape);
    }
}

impl FeatureDatabase for MemoryFeatureDb {
    fn pixel_features(&self, view: ViewId) -> Option<&[Point2<f64>]> {
        self.features.get(&view).map(|v| v.as_slice())
    }

    fn image_shape(&self, view: ViewId) -> Option<(u32, u32)> {
        self.shapes.get(&view).copied()
    }
}
