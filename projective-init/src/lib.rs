#![deny(rust_2018_idioms)]

//! Projective structure-from-motion initializer.
//!
//! Given a pairwise image-match graph and a seed view, this crate selects a
//! strong three-view triplet, intersects the pairwise inlier lists into
//! three-way feature tracks, robustly fits a trifocal tensor, triangulates
//! the consensus tracks as homogeneous points, resects every remaining view
//! connected to the seed, and refines the whole projective reconstruction
//! by bundle adjustment. The output lives in the projective frame anchored
//! at the seed view, whose camera is the 3×4 identity.
//!
//! The numerical work happens in the `trifocal`, `projective-geom` and
//! `projective-ba` crates; this crate owns the orchestration and, above
//! all, the index bookkeeping between four index spaces: raw per-view
//! feature indices, trifocal inlier indices, seed-view feature indices and
//! scene point indices.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use pairwise_graph::{
    FeatureDatabase, InlierPair, MemoryFeatureDb, PairwiseGraph, PairwiseMotion, PairwiseView,
    ViewId,
};
pub use projective_geom::{CameraMatrix, SceneObservations, SceneStructure};
pub use trifocal::TrifocalRansacConfig;

mod selector;
pub use crate::selector::select_triplet;

mod tracks;
pub use crate::tracks::{find_triple_matches, seed_feature_lookup, TripleMatch};

mod initializer;
pub use crate::initializer::ProjectiveInitializer;

#[derive(Error, Debug)]
pub enum InitError {
    #[error("two-view initialization is not implemented")]
    StereoNotSupported,
    #[error("view {0:?} not present in the feature database")]
    UnknownView(ViewId),
    #[error("inconsistent graph: {0}")]
    InconsistentGraph(&'static str),
    #[error(transparent)]
    Geom(#[from] projective_geom::GeomError),
    #[error(transparent)]
    BundleAdjust(#[from] projective_ba::Error),
}

pub type Result<T> = std::result::Result<T, InitError>;

fn default_ftol() -> f64 {
    1.0e-8
}

fn default_gtol() -> f64 {
    1.0e-8
}

fn default_converge_iterations() -> usize {
    200
}

fn default_true() -> bool {
    true
}

/// Convergence thresholds of the bundle-adjustment stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvergeConfig {
    #[serde(default = "default_ftol")]
    pub ftol: f64,
    #[serde(default = "default_gtol")]
    pub gtol: f64,
    #[serde(default = "default_converge_iterations")]
    pub max_iterations: usize,
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            ftol: default_ftol(),
            gtol: default_gtol(),
            max_iterations: default_converge_iterations(),
        }
    }
}

/// Configuration of the whole initializer.
///
/// After changing the configuration of an existing
/// [ProjectiveInitializer], call [ProjectiveInitializer::fixate] to
/// re-materialize the robust fitter from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializerConfig {
    /// Robust trifocal fitter.
    #[serde(default)]
    pub ransac: TrifocalRansacConfig,
    /// Bundle-adjustment convergence.
    #[serde(default)]
    pub converge: ConvergeConfig,
    /// Normalize pixel coordinates around bundle adjustment. Improves
    /// conditioning; disable only for debugging.
    #[serde(default = "default_true")]
    pub scale_sba: bool,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            ransac: TrifocalRansacConfig::default(),
            converge: ConvergeConfig::default(),
            scale_sba: true,
        }
    }
}
