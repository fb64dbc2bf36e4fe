use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{DistanceFn, Hnsw, HnswConfig};

/// Uniform vectors in `[-1, 1)^dimension`. The same seed always yields the same data.
pub fn random_vectors(count: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

/// Items keyed by position, starting at `first_id`
pub fn keyed(vectors: &[Vec<f32>], first_id: u64) -> Vec<(u64, Vec<f32>)> {
    vectors
        .iter()
        .cloned()
        .enumerate()
        .map(|(position, vector)| (first_id + position as u64, vector))
        .collect()
}

/// Exact k nearest ids by linear scan
pub fn brute_force_knn<D: DistanceFn>(
    items: &[(u64, Vec<f32>)],
    query: &[f32],
    k: usize,
    distance: &D,
) -> Vec<u64> {
    let mut scored: Vec<(f32, u64)> = items
        .iter()
        .map(|(id, vector)| (distance.distance(query, vector), *id))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, id)| id).collect()
}

pub fn build_index<D: DistanceFn>(
    config: HnswConfig,
    distance: D,
    items: &[(u64, Vec<f32>)],
) -> Hnsw<u64, D> {
    let hnsw = Hnsw::new(config, distance).unwrap();
    for (id, vector) in items {
        hnsw.insert(*id, vector.clone()).unwrap();
    }
    hnsw
}
