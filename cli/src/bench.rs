use std::num::NonZeroUsize;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use vicinity::{Distance, DistanceFn, Hnsw};

use crate::config::cli::BenchConfig;
use crate::dataset::{random_vectors, read_fvecs};
use crate::errors::CliError;

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub vectors: usize,
    pub dimension: usize,
    pub queries: usize,
    pub k: usize,
    pub threads: usize,
    pub distance: Distance,
    pub top_level: Option<u8>,
    pub build_millis: u128,
    pub inserts_per_second: f64,
    pub search_millis: u128,
    pub queries_per_second: f64,
    pub recall: f32,
}

/// Builds an index over the configured data with `insert_batch`, searches it with every query
/// and compares the results with an exact linear scan.
#[tracing::instrument(skip_all)]
pub fn run(config: &BenchConfig) -> Result<BenchReport, CliError> {
    let threads = NonZeroUsize::new(config.threads)
        .ok_or_else(|| CliError::InvalidArgument("threads must be > 0".to_string()))?;
    if config.k == 0 {
        return Err(CliError::InvalidArgument("k must be > 0".to_string()));
    }

    let base = match &config.input {
        Some(path) => read_fvecs(path)?,
        None => random_vectors(config.count, config.dimension, config.seed),
    };
    let dimension = base.first().map(Vec::len).ok_or(CliError::EmptyDataset)?;
    let queries = match &config.query_input {
        Some(path) => read_fvecs(path)?,
        None => random_vectors(config.queries, dimension, config.seed.wrapping_add(1)),
    };
    if let Some(query) = queries.iter().find(|query| query.len() != dimension) {
        return Err(CliError::QueryDimension {
            expected: dimension,
            found: query.len(),
        });
    }

    let distance = Distance::from(config.distance);
    let hnsw: Hnsw<u64, Distance> =
        Hnsw::new(config.index_config(dimension, base.len()), distance)?;
    tracing::info!(
        vectors = base.len(),
        dimension,
        threads = threads.get(),
        "Building index"
    );

    let items = base
        .iter()
        .cloned()
        .enumerate()
        .map(|(id, vector)| (id as u64, vector));
    let started = Instant::now();
    hnsw.insert_batch(items, threads)?;
    let build = started.elapsed();
    tracing::info!(
        millis = build.as_millis(),
        top_level = ?hnsw.entry_point_level(),
        "Index built"
    );

    let started = Instant::now();
    let found = queries
        .iter()
        .map(|query| {
            hnsw.search(query, config.k)
                .map(|results| results.into_iter().map(|result| result.id).collect())
        })
        .collect::<Result<Vec<Vec<u64>>, _>>()?;
    let search = started.elapsed();

    let truth = exact_neighbours(&base, &queries, config.k, &distance);
    let recall = recall(&truth, &found, config.k);
    tracing::info!(recall, "Queries done");

    Ok(BenchReport {
        vectors: base.len(),
        dimension,
        queries: queries.len(),
        k: config.k,
        threads: threads.get(),
        distance,
        top_level: hnsw.entry_point_level(),
        build_millis: build.as_millis(),
        inserts_per_second: per_second(base.len(), build.as_secs_f64()),
        search_millis: search.as_millis(),
        queries_per_second: per_second(queries.len(), search.as_secs_f64()),
        recall,
    })
}

fn per_second(count: usize, seconds: f64) -> f64 {
    if seconds > 0.0 {
        count as f64 / seconds
    } else {
        0.0
    }
}

/// Exact k nearest base positions for every query, one query per rayon task
pub fn exact_neighbours<D: DistanceFn>(
    base: &[Vec<f32>],
    queries: &[Vec<f32>],
    k: usize,
    distance: &D,
) -> Vec<Vec<u64>> {
    queries
        .par_iter()
        .map(|query| {
            let mut scored: Vec<(f32, u64)> = base
                .iter()
                .enumerate()
                .map(|(id, vector)| (distance.distance(query, vector), id as u64))
                .collect();
            scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            scored.into_iter().take(k).map(|(_, id)| id).collect()
        })
        .collect()
}

/// Fraction of the true neighbours that were found, averaged over queries
pub fn recall(truth: &[Vec<u64>], found: &[Vec<u64>], k: usize) -> f32 {
    if truth.is_empty() || k == 0 {
        return 0.0;
    }
    let hits: usize = truth
        .iter()
        .zip(found)
        .map(|(expected, actual)| expected.iter().filter(|id| actual.contains(id)).count())
        .sum();
    hits as f32 / (truth.len() * k) as f32
}
