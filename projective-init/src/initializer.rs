use nalgebra::Point2;
use tracing::{debug, warn};

use pairwise_graph::{FeatureDatabase, PairwiseGraph};
use projective_ba::ProjectiveBundleAdjuster;
use projective_geom::{
    linear_pose_homogeneous, triangulate_homogeneous, CameraMatrix, PixelScaler,
    SceneObservations, SceneStructure,
};
use trifocal::{extract_cameras, TrifocalRansac, TripleObservation};

use crate::selector::select_triplet;
use crate::tracks::{find_triple_matches, TripleMatch};
use crate::{ConvergeConfig, InitError, InitializerConfig, Result};

/// Builds an initial projective reconstruction around a seed view.
///
/// One instance can be reused across reconstruction attempts; all
/// per-invocation state is reset at the start of
/// [ProjectiveInitializer::process]. The configuration is materialized into
/// the robust fitter and optimizer settings by
/// [ProjectiveInitializer::fixate], which must be called again after any
/// configuration change.
pub struct ProjectiveInitializer {
    config: InitializerConfig,

    // materialized by fixate()
    ransac: TrifocalRansac,
    converge: ConvergeConfig,
    scale_sba: bool,

    // per-invocation results
    selected: Option<(usize, usize)>,
    triples: Vec<TripleMatch>,
    inlier_to_seed: Vec<u32>,
    seed_to_structure: Vec<i32>,
    structure: SceneStructure,
    observations: SceneObservations,
}

impl ProjectiveInitializer {
    pub fn new(config: InitializerConfig) -> Self {
        let ransac = TrifocalRansac::new(config.ransac.clone());
        let converge = config.converge.clone();
        let scale_sba = config.scale_sba;
        Self {
            config,
            ransac,
            converge,
            scale_sba,
            selected: None,
            triples: Vec::new(),
            inlier_to_seed: Vec::new(),
            seed_to_structure: Vec::new(),
            structure: SceneStructure::default(),
            observations: SceneObservations::default(),
        }
    }

    pub fn config(&self) -> &InitializerConfig {
        &self.config
    }

    /// Change the configuration. Takes effect at the next
    /// [ProjectiveInitializer::fixate].
    pub fn config_mut(&mut self) -> &mut InitializerConfig {
        &mut self.config
    }

    /// Materialize the robust fitter and optimizer settings from the
    /// current configuration.
    pub fn fixate(&mut self) {
        self.ransac = TrifocalRansac::new(self.config.ransac.clone());
        self.converge = self.config.converge.clone();
        self.scale_sba = self.config.scale_sba;
    }

    fn reset(&mut self) {
        self.selected = None;
        self.triples.clear();
        self.inlier_to_seed.clear();
        self.seed_to_structure.clear();
        self.structure = SceneStructure::default();
        self.observations = SceneObservations::default();
    }

    /// Attempt a projective reconstruction around `seed`.
    ///
    /// `seed_conn_idx` lists, as indices into the seed view's motion list,
    /// the connected views to reconstruct. On success the scene is
    /// available from [ProjectiveInitializer::structure] with view slot 0
    /// the seed (camera exactly identity) and view slot `m + 1` the far
    /// view of `seed_conn_idx[m]`.
    ///
    /// `Ok(false)` marks a recoverable failure (weak topology, no
    /// three-way tracks, robust fit, triangulation or resection failure,
    /// bundle non-convergence); the caller may retry with another seed or
    /// neighborhood. Errors are contract violations: unknown views,
    /// inconsistent graphs and the unimplemented two-view case.
    pub fn process<D: FeatureDatabase>(
        &mut self,
        db: &D,
        graph: &PairwiseGraph,
        seed: usize,
        seed_conn_idx: &[usize],
    ) -> Result<bool> {
        self.reset();

        if seed_conn_idx.len() == 1 {
            return Err(InitError::StereoNotSupported);
        }
        if seed >= graph.views().len() {
            return Err(InitError::InconsistentGraph("seed view out of range"));
        }
        let seed_motions = &graph.view(seed).motions;
        if seed_conn_idx.iter().any(|&e| e >= seed_motions.len()) {
            return Err(InitError::InconsistentGraph("candidate motion out of range"));
        }
        if seed_conn_idx.is_empty() {
            debug!("seed {seed} has no candidate neighbors");
            return Ok(false);
        }

        // choose the triplet
        let Some((sel_i, sel_j)) = select_triplet(graph, seed, seed_conn_idx) else {
            debug!("seed {seed}: no scoring triplet among the candidate pairs");
            return Ok(false);
        };
        self.selected = Some((sel_i, sel_j));
        let motion_ab = seed_motions[seed_conn_idx[sel_i]];
        let motion_ac = seed_motions[seed_conn_idx[sel_j]];
        let view_b = graph.motion(motion_ab).other(seed);
        let view_c = graph.motion(motion_ac).other(seed);

        // three-way track intersection
        self.triples = find_triple_matches(graph, seed, motion_ab, motion_ac)?;
        if self.triples.is_empty() {
            debug!("triplet ({sel_i}, {sel_j}) has no three-way tracks");
            return Ok(false);
        }

        let pixels_a = load_pixel_table(db, graph, seed)?;
        let pixels_b = load_pixel_table(db, graph, view_b)?;
        let pixels_c = load_pixel_table(db, graph, view_c)?;
        let triple_obs: Vec<TripleObservation> = self
            .triples
            .iter()
            .map(|t| TripleObservation {
                p1: pixels_a[t.a as usize],
                p2: pixels_b[t.b as usize],
                p3: pixels_c[t.c as usize],
            })
            .collect();

        // robust three-view fit
        if !self.ransac.process(&triple_obs) {
            debug!("robust trifocal fit failed on {} tracks", triple_obs.len());
            return Ok(false);
        }
        let tensor = self.ransac.tensor().expect("model after successful fit");
        let (p2, p3) = match extract_cameras(tensor) {
            Ok(cams) => cams,
            Err(err) => {
                debug!("camera extraction failed: {err}");
                return Ok(false);
            }
        };

        // triangulate the consensus tracks and build the index tables
        let num_views = 1 + seed_conn_idx.len();
        self.structure = SceneStructure::new(num_views);
        let shape_a = load_shape(db, graph, seed)?;
        let shape_b = load_shape(db, graph, view_b)?;
        let shape_c = load_shape(db, graph, view_c)?;
        self.structure
            .set_view(0, CameraMatrix::identity(), shape_a.0, shape_a.1);
        self.structure.mark_fixed(0);
        self.structure.set_view(sel_i + 1, p2, shape_b.0, shape_b.1);
        self.structure.set_view(sel_j + 1, p3, shape_c.0, shape_c.1);

        let cameras = [CameraMatrix::identity(), p2, p3];
        self.seed_to_structure = vec![-1; graph.view(seed).total_features];
        let inlier_indices: Vec<usize> = self.ransac.inlier_indices().to_vec();
        for (i, &input_idx) in inlier_indices.iter().enumerate() {
            let o = &triple_obs[input_idx];
            match triangulate_homogeneous(&cameras, &[o.p1, o.p2, o.p3]) {
                Ok(x) => self.structure.points.push(x),
                Err(err) => {
                    debug!("triangulation of inlier {i} failed: {err}");
                    return Ok(false);
                }
            }
            let feat_a = self.triples[input_idx].a;
            self.inlier_to_seed.push(feat_a);
            self.seed_to_structure[feat_a as usize] = i as i32;
        }

        // resect the remaining connected views
        for (m, &edge_pos) in seed_conn_idx.iter().enumerate() {
            if m == sel_i || m == sel_j {
                continue;
            }
            let motion_idx = seed_motions[edge_pos];
            let motion = graph.motion(motion_idx);
            let far = motion.other(seed);
            let pixels_far = load_pixel_table(db, graph, far)?;
            let shape_far = load_shape(db, graph, far)?;

            let mut assoc: Vec<Option<Point2<f64>>> = vec![None; self.structure.points.len()];
            let oriented = motion
                .oriented(seed)
                .ok_or(InitError::InconsistentGraph("candidate motion does not touch seed"))?;
            for (feat_seed, feat_far) in oriented {
                let pt = self.seed_to_structure[feat_seed as usize];
                if pt < 0 {
                    continue;
                }
                assoc[pt as usize] = Some(pixels_far[feat_far as usize]);
            }
            let filled: Vec<Point2<f64>> = assoc.iter().filter_map(|p| *p).collect();
            if filled.len() != assoc.len() {
                // the graph promised every trifocal inlier is visible in
                // this view
                warn!(
                    "motion {m}: only {} of {} reconstructed points observed",
                    filled.len(),
                    assoc.len()
                );
                return Err(InitError::InconsistentGraph(
                    "resection view is missing reconstructed points",
                ));
            }

            match linear_pose_homogeneous(&self.structure.points, &filled) {
                Ok(camera) => {
                    self.structure
                        .set_view(m + 1, camera, shape_far.0, shape_far.1);
                }
                Err(err) => {
                    debug!("resection of motion {m} failed: {err}");
                    return Ok(false);
                }
            }
        }

        // pack per-view observation lists for bundle adjustment
        self.observations = SceneObservations::new(num_views);
        for (i, &input_idx) in inlier_indices.iter().enumerate() {
            self.observations.views[0].add(i, triple_obs[input_idx].p1);
        }
        for (m, &edge_pos) in seed_conn_idx.iter().enumerate() {
            let motion = graph.motion(seed_motions[edge_pos]);
            let far = motion.other(seed);
            let pixels_far = load_pixel_table(db, graph, far)?;
            let oriented = motion
                .oriented(seed)
                .ok_or(InitError::InconsistentGraph("candidate motion does not touch seed"))?;
            for (feat_seed, feat_far) in oriented {
                let pt = self.seed_to_structure[feat_seed as usize];
                if pt < 0 {
                    continue;
                }
                self.observations.views[m + 1].add(pt as usize, pixels_far[feat_far as usize]);
            }
        }

        // refine everything
        let mut scaler = PixelScaler::new();
        if self.scale_sba {
            scaler.apply_scale(&mut self.structure, &mut self.observations)?;
        }

        let adjuster = ProjectiveBundleAdjuster::new(&self.structure, &self.observations)?;
        let (adjuster, report) = levenberg_marquardt::LevenbergMarquardt::new()
            .with_ftol(self.converge.ftol)
            .with_gtol(self.converge.gtol)
            .with_patience(self.converge.max_iterations)
            .minimize(adjuster);
        if !report.termination.was_successful() {
            debug!("bundle adjustment did not converge: {:?}", report.termination);
            return Ok(false);
        }

        for slot in 0..num_views {
            if !self.structure.view(slot).fixed {
                self.structure.view_mut(slot).camera = adjuster.cams()[slot];
            }
        }
        self.structure.points = adjuster.points().to_vec();

        if self.scale_sba {
            for slot in 0..num_views {
                let camera = scaler.pixel_scaling(slot).remove(&self.structure.view(slot).camera);
                self.structure.view_mut(slot).camera = camera;
            }
            // the seed camera is identity by convention; the scale round
            // trip must not leave rounding on it
            self.structure.view_mut(0).camera = CameraMatrix::identity();
            scaler.undo_scale(&mut self.structure, &mut self.observations)?;
        }

        Ok(true)
    }

    /// The reconstructed scene of the last successful
    /// [ProjectiveInitializer::process] call.
    pub fn structure(&self) -> &SceneStructure {
        &self.structure
    }

    /// The per-view observation lists fed to bundle adjustment, in pixel
    /// coordinates.
    pub fn observations(&self) -> &SceneObservations {
        &self.observations
    }

    /// Positions within `seed_conn_idx` of the chosen triplet.
    pub fn selected_triple(&self) -> Option<(usize, usize)> {
        self.selected
    }

    /// All three-way tracks of the chosen triplet, before robust fitting.
    pub fn triple_matches(&self) -> &[TripleMatch] {
        &self.triples
    }

    /// For trifocal inlier `i`, the seed-view feature it tracks.
    pub fn inlier_to_seed(&self) -> &[u32] {
        &self.inlier_to_seed
    }

    /// For every seed-view feature, the scene point index it became, `-1`
    /// if it is not part of the reconstruction.
    pub fn seed_to_structure(&self) -> &[i32] {
        &self.seed_to_structure
    }
}

fn load_pixel_table<'a, D: FeatureDatabase>(
    db: &'a D,
    graph: &PairwiseGraph,
    view: usize,
) -> Result<&'a [Point2<f64>]> {
    let v = graph.view(view);
    let feats = db
        .pixel_features(v.id)
        .ok_or(InitError::UnknownView(v.id))?;
    if feats.len() < v.total_features {
        return Err(InitError::InconsistentGraph(
            "pixel table shorter than the view's feature count",
        ));
    }
    Ok(feats)
}

fn load_shape<D: FeatureDatabase>(
    db: &D,
    graph: &PairwiseGraph,
    view: usize,
) -> Result<(u32, u32)> {
    let v = graph.view(view);
    db.image_shape(v.id).ok_or(InitError::UnknownView(v.id))
}
