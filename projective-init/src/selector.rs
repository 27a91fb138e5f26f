use pairwise_graph::PairwiseGraph;

/// Choose the strongest triplet among the seed's candidate neighbors.
///
/// `candidates` are indices into the seed view's motion list. Every pair
/// `(i, j)` with `i < j` whose far views share a motion of their own is
/// scored as the sum of the three motion scores; the best pair is returned
/// as positions within `candidates`. Ties keep the first pair encountered.
/// `None` when no candidate pair is connected, or when no connected pair
/// scores above zero.
pub fn select_triplet(
    graph: &PairwiseGraph,
    seed: usize,
    candidates: &[usize],
) -> Option<(usize, usize)> {
    let seed_motions = &graph.view(seed).motions;
    let mut best: Option<(usize, usize)> = None;
    let mut best_score = 0.0;

    for i in 0..candidates.len() {
        let mi = graph.motion(seed_motions[candidates[i]]);
        let b = mi.other(seed);
        for j in (i + 1)..candidates.len() {
            let mj = graph.motion(seed_motions[candidates[j]]);
            let c = mj.other(seed);
            let Some(bc) = graph.find_motion(b, c) else {
                continue;
            };
            let score = mi.score + mj.score + graph.motion(bc).score;
            if score > best_score {
                best = Some((i, j));
                best_score = score;
            }
        }
    }
    best
}
