use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use projective_geom::{triangulate_homogeneous, CameraMatrix};

use crate::estimate::{estimate_trifocal, TrifocalSolution, MIN_TRIPLES};
use crate::{TrifocalTensor, TripleObservation};

fn default_max_iterations() -> usize {
    500
}

fn default_inlier_threshold() -> f64 {
    1.0
}

fn default_seed() -> u64 {
    0x7f0c_a15e
}

/// Configuration of the robust trifocal fitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrifocalRansacConfig {
    /// Maximum number of random samples drawn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Worst-view reprojection distance, in pixels, below which a triple is
    /// counted as an inlier.
    #[serde(default = "default_inlier_threshold")]
    pub inlier_threshold: f64,
    /// RNG seed. Fixed by default so reruns on identical input reproduce
    /// identical inlier sets.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for TrifocalRansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            inlier_threshold: default_inlier_threshold(),
            seed: default_seed(),
        }
    }
}

/// Robust trifocal fitter: repeated minimal-sample linear fits scored by
/// triangulate-and-reproject consensus, refit on the final inlier set.
#[derive(Debug, Clone)]
pub struct TrifocalRansac {
    config: TrifocalRansacConfig,
    solution: Option<TrifocalSolution>,
    inliers: Vec<usize>,
}

impl TrifocalRansac {
    pub fn new(config: TrifocalRansacConfig) -> Self {
        Self {
            config,
            solution: None,
            inliers: Vec::new(),
        }
    }

    /// Fit a model to the observations.
    ///
    /// `false` when there are fewer than [MIN_TRIPLES] observations or no
    /// sample reaches a consensus of that size. On success the model is
    /// available from [TrifocalRansac::tensor] and the consensus from
    /// [TrifocalRansac::inlier_indices].
    pub fn process(&mut self, observations: &[TripleObservation]) -> bool {
        self.solution = None;
        self.inliers.clear();

        if observations.len() < MIN_TRIPLES {
            tracing::debug!(
                "trifocal fit needs {} triples, got {}",
                MIN_TRIPLES,
                observations.len()
            );
            return false;
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut best: Option<(TrifocalSolution, Vec<usize>)> = None;

        for _ in 0..self.config.max_iterations.max(1) {
            let sample = rand::seq::index::sample(&mut rng, observations.len(), MIN_TRIPLES);
            let subset: Vec<TripleObservation> =
                sample.iter().map(|i| observations[i]).collect();
            let Ok(candidate) = estimate_trifocal(&subset) else {
                continue;
            };
            let consensus = self.consensus(observations, &candidate);
            let best_len = best.as_ref().map(|(_, c)| c.len()).unwrap_or(0);
            if consensus.len() > best_len {
                let full = consensus.len() == observations.len();
                best = Some((candidate, consensus));
                if full {
                    break;
                }
            }
        }

        let Some((sample_solution, sample_consensus)) = best else {
            return false;
        };
        if sample_consensus.len() < MIN_TRIPLES {
            tracing::debug!(
                "trifocal consensus too small: {} of {}",
                sample_consensus.len(),
                observations.len()
            );
            return false;
        }

        // refit on the consensus; keep the sample model if the refit loses
        // support
        let subset: Vec<TripleObservation> = sample_consensus
            .iter()
            .map(|&i| observations[i])
            .collect();
        let (solution, inliers) = match estimate_trifocal(&subset) {
            Ok(refit) => {
                let consensus = self.consensus(observations, &refit);
                if consensus.len() >= sample_consensus.len() {
                    (refit, consensus)
                } else {
                    (sample_solution, sample_consensus)
                }
            }
            Err(_) => (sample_solution, sample_consensus),
        };

        self.solution = Some(solution);
        self.inliers = inliers;
        true
    }

    fn consensus(
        &self,
        observations: &[TripleObservation],
        solution: &TrifocalSolution,
    ) -> Vec<usize> {
        let cameras = [CameraMatrix::identity(), solution.p2, solution.p3];
        let mut inliers = Vec::new();
        for (idx, o) in observations.iter().enumerate() {
            let pixels = [o.p1, o.p2, o.p3];
            let Ok(x) = triangulate_homogeneous(&cameras, &pixels) else {
                continue;
            };
            let mut worst: f64 = 0.0;
            let mut ok = true;
            for (camera, expected) in cameras.iter().zip(pixels.iter()) {
                match projective_geom::project(camera, &x) {
                    Some(reproj) => {
                        worst = worst.max((reproj - *expected).norm());
                    }
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok && worst <= self.config.inlier_threshold {
                inliers.push(idx);
            }
        }
        inliers
    }

    /// The fitted tensor, in pixel coordinates.
    pub fn tensor(&self) -> Option<&TrifocalTensor> {
        self.solution.as_ref().map(|s| &s.tensor)
    }

    /// The fitted camera pair (`P1 = [I | 0]` implied).
    pub fn cameras(&self) -> Option<(&CameraMatrix, &CameraMatrix)> {
        self.solution.as_ref().map(|s| (&s.p2, &s.p3))
    }

    /// Indices of the consensus set into the observation array passed to
    /// [TrifocalRansac::process], in ascending order; position `i` in this
    /// slice is inlier `i` everywhere downstream.
    pub fn inlier_indices(&self) -> &[usize] {
        &self.inliers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{observe, synthetic_points, three_cameras};

    #[test]
    fn test_ransac_rejects_outliers() {
        let cams = three_cameras();
        let points = synthetic_points(40);
        let mut obs = observe(&cams, &points);
        // corrupt the last ten matches in the second view
        let n = obs.len();
        for o in obs[n - 10..].iter_mut() {
            o.p2.x += 45.0;
            o.p2.y -= 30.0;
        }

        let mut fitter = TrifocalRansac::new(TrifocalRansacConfig::default());
        assert!(fitter.process(&obs));
        let inliers = fitter.inlier_indices();
        assert_eq!(inliers.len(), 30);
        assert!(inliers.iter().all(|&i| i < 30));
        assert!(fitter.tensor().is_some());
    }

    #[test]
    fn test_ransac_is_deterministic() {
        let cams = three_cameras();
        let obs = observe(&cams, &synthetic_points(25));

        let mut a = TrifocalRansac::new(TrifocalRansacConfig::default());
        let mut b = TrifocalRansac::new(TrifocalRansacConfig::default());
        assert!(a.process(&obs));
        assert!(b.process(&obs));
        assert_eq!(a.inlier_indices(), b.inlier_indices());
        assert_eq!(a.tensor(), b.tensor());
    }

    #[test]
    fn test_ransac_too_few_observations() {
        let cams = three_cameras();
        let obs = observe(&cams, &synthetic_points(5));
        let mut fitter = TrifocalRansac::new(TrifocalRansacConfig::default());
        assert!(!fitter.process(&obs));
        assert!(fitter.tensor().is_none());
        assert!(fitter.inlier_indices().is_empty());
    }
}
