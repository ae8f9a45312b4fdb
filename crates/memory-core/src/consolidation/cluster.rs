//! DBSCAN-like density clustering over memory embeddings (Phase 2, §4.8.2).
//!
//! A minimal DBSCAN: distance is `1 - cosine_similarity`, `eps` and
//! `min_samples` are the two published parameters. Noise points (density
//! below `min_samples` within `eps`) are simply omitted from every cluster,
//! matching the spec's "sets of content hashes per cluster, plus noise
//! points" — the noise set is the complement of the union of clusters, so
//! callers that want it can compute it from the input list instead of a
//! second return value.

use crate::embeddings::cosine_similarity;
use crate::model::Memory;

/// Runs DBSCAN over `memories` (all assumed to carry an embedding — callers
/// filter beforehand) and returns clusters as lists of `content_hash`.
pub fn dbscan(memories: &[&Memory], eps: f32, min_samples: usize) -> Vec<Vec<String>> {
    let n = memories.len();
    if n == 0 {
        return vec![];
    }

    let mut visited = vec![false; n];
    let mut assigned = vec![false; n];
    let mut clusters: Vec<Vec<String>> = Vec::new();

    let neighbors = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| j != i)
            .filter(|&j| distance(memories[i], memories[j]) <= eps)
            .collect()
    };

    for i in 0..n {
        if visited[i] {
            continue;
        }
        visited[i] = true;

        let mut neighborhood = neighbors(i);
        if neighborhood.len() + 1 < min_samples {
            continue; // noise, revisitable by a later point's neighborhood
        }

        let mut cluster = vec![i];
        assigned[i] = true;

        let mut queue = neighborhood.clone();
        while let Some(j) = queue.pop() {
            if !visited[j] {
                visited[j] = true;
                let j_neighbors = neighbors(j);
                if j_neighbors.len() + 1 >= min_samples {
                    for &k in &j_neighbors {
                        if !queue.contains(&k) {
                            queue.push(k);
                        }
                    }
                }
            }
            if !assigned[j] {
                assigned[j] = true;
                cluster.push(j);
            }
        }
        neighborhood.clear();

        clusters.push(cluster.into_iter().map(|idx| memories[idx].content_hash.clone()).collect());
    }

    clusters
}

fn distance(a: &Memory, b: &Memory) -> f32 {
    match (&a.embedding, &b.embedding) {
        (Some(va), Some(vb)) => 1.0 - cosine_similarity(va, vb),
        _ => f32::INFINITY,
    }
}
