use pairwise_graph::PairwiseGraph;

use crate::{InitError, Result};

/// A feature track visible in all three views of a triplet, as raw feature
/// indices in each view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripleMatch {
    /// Feature index in the seed view.
    pub a: u32,
    /// Feature index in the second view.
    pub b: u32,
    /// Feature index in the third view.
    pub c: u32,
}

/// Invert one seed motion into a dense lookup from far-view feature index
/// to seed feature index, `-1` where the far feature has no seed match.
pub fn seed_feature_lookup(
    graph: &PairwiseGraph,
    seed: usize,
    motion_idx: usize,
) -> Result<Vec<i32>> {
    let motion = graph.motion(motion_idx);
    let far = motion.other(seed);
    let mut table = vec![-1i32; graph.view(far).total_features];
    let oriented = motion
        .oriented(seed)
        .ok_or(InitError::InconsistentGraph("motion does not touch seed"))?;
    for (feat_seed, feat_far) in oriented {
        table[feat_far as usize] = feat_seed as i32;
    }
    Ok(table)
}

/// Intersect the inlier lists of the two seed motions and the far motion
/// into three-way tracks.
///
/// A track is emitted when a far-motion inlier `(b, c)` maps through both
/// seed lookups onto the same seed feature. The far motion's own
/// source/destination designation is irrelevant to the result; both
/// orientations are handled. The result may be empty.
pub fn find_triple_matches(
    graph: &PairwiseGraph,
    seed: usize,
    motion_ab: usize,
    motion_ac: usize,
) -> Result<Vec<TripleMatch>> {
    let b = graph.motion(motion_ab).other(seed);
    let c = graph.motion(motion_ac).other(seed);
    let Some(motion_bc) = graph.find_motion(b, c) else {
        return Ok(Vec::new());
    };

    let b_to_a = seed_feature_lookup(graph, seed, motion_ab)?;
    let c_to_a = seed_feature_lookup(graph, seed, motion_ac)?;

    let oriented = graph
        .motion(motion_bc)
        .oriented(b)
        .ok_or(InitError::InconsistentGraph("far motion does not touch triplet"))?;

    let mut matches = Vec::new();
    for (feat_b, feat_c) in oriented {
        let feat_a = b_to_a[feat_b as usize];
        if feat_a < 0 {
            continue;
        }
        if c_to_a[feat_c as usize] == feat_a {
            matches.push(TripleMatch {
                a: feat_a as u32,
                b: feat_b,
                c: feat_c,
            });
        }
    }
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use pairwise_graph::{InlierPair, ViewId};

    use super::*;

    fn pair(src: u32, dst: u32) -> InlierPair {
        InlierPair { src, dst }
    }

    /// Three views, three tracks, with per-view feature permutations:
    /// track t is feature t in A, t+1 (mod 5) in B, t+2 (mod 5) in C.
    fn build(flip_ab: bool, flip_bc: bool) -> (PairwiseGraph, usize, usize, usize) {
        let mut g = PairwiseGraph::new();
        let a = g.add_view(ViewId(0), 5);
        let b = g.add_view(ViewId(1), 5);
        let c = g.add_view(ViewId(2), 5);

        let fa = |t: u32| t;
        let fb = |t: u32| (t + 1) % 5;
        let fc = |t: u32| (t + 2) % 5;

        let ab: Vec<InlierPair> = (0..3)
            .map(|t| {
                if flip_ab {
                    pair(fb(t), fa(t))
                } else {
                    pair(fa(t), fb(t))
                }
            })
            .collect();
        let ac: Vec<InlierPair> = (0..3).map(|t| pair(fa(t), fc(t))).collect();
        let bc: Vec<InlierPair> = (0..3)
            .map(|t| {
                if flip_bc {
                    pair(fc(t), fb(t))
                } else {
                    pair(fb(t), fc(t))
                }
            })
            .collect();

        let m_ab = if flip_ab {
            g.add_motion(b, a, 1.0, ab).unwrap()
        } else {
            g.add_motion(a, b, 1.0, ab).unwrap()
        };
        let m_ac = g.add_motion(a, c, 1.0, ac).unwrap();
        if flip_bc {
            g.add_motion(c, b, 1.0, bc).unwrap();
        } else {
            g.add_motion(b, c, 1.0, bc).unwrap();
        }
        (g, a, m_ab, m_ac)
    }

    fn expected() -> Vec<TripleMatch> {
        (0..3)
            .map(|t| TripleMatch {
                a: t,
                b: (t + 1) % 5,
                c: (t + 2) % 5,
            })
            .collect()
    }

    #[test]
    fn test_matches_with_seed_as_source() {
        let (g, a, m_ab, m_ac) = build(false, false);
        let matches = find_triple_matches(&g, a, m_ab, m_ac).unwrap();
        assert_eq!(matches, expected());
    }

    #[test]
    fn test_matches_with_flipped_seed_motion() {
        let (g, a, m_ab, m_ac) = build(true, false);
        let matches = find_triple_matches(&g, a, m_ab, m_ac).unwrap();
        assert_eq!(matches, expected());
    }

    #[test]
    fn test_matches_with_flipped_far_motion() {
        // the far motion authored c -> b must yield the same tracks
        let (g, a, m_ab, m_ac) = build(false, true);
        let matches = find_triple_matches(&g, a, m_ab, m_ac).unwrap();
        assert_eq!(matches, expected());
    }

    #[test]
    fn test_missing_far_edge_is_empty() {
        let mut g = PairwiseGraph::new();
        let a = g.add_view(ViewId(0), 3);
        let b = g.add_view(ViewId(1), 3);
        let c = g.add_view(ViewId(2), 3);
        let m_ab = g.add_motion(a, b, 1.0, vec![pair(0, 0)]).unwrap();
        let m_ac = g.add_motion(a, c, 1.0, vec![pair(0, 0)]).unwrap();
        assert!(find_triple_matches(&g, a, m_ab, m_ac).unwrap().is_empty());
    }

    #[test]
    fn test_inconsistent_pair_mapping_is_dropped() {
        let mut g = PairwiseGraph::new();
        let a = g.add_view(ViewId(0), 3);
        let b = g.add_view(ViewId(1), 3);
        let c = g.add_view(ViewId(2), 3);
        // A0-B0 and A1-C1, but BC claims B0-C1: inconsistent with the seed
        let m_ab = g.add_motion(a, b, 1.0, vec![pair(0, 0)]).unwrap();
        let m_ac = g.add_motion(a, c, 1.0, vec![pair(1, 1)]).unwrap();
        g.add_motion(b, c, 1.0, vec![pair(0, 1)]).unwrap();
        assert!(find_triple_matches(&g, a, m_ab, m_ac).unwrap().is_empty());
    }

    #[test]
    fn test_seed_feature_lookup_sentinels() {
        let (g, a, m_ab, _) = build(false, false);
        let table = seed_feature_lookup(&g, a, m_ab).unwrap();
        assert_eq!(table.len(), 5);
        // tracks 0..3 map B features 1..4 back to A features 0..3
        assert_eq!(table[1], 0);
        assert_eq!(table[2], 1);
        assert_eq!(table[3], 2);
        assert_eq!(table[0], -1);
        assert_eq!(table[4], -1);
    }
}
