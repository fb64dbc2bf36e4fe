pub mod distance;
pub mod embedding_key;
pub mod error;
pub mod heap;
pub mod hnsw;

#[cfg(test)]
mod tests;

pub use distance::Distance;
pub use embedding_key::EmbeddingKey;
pub use hnsw::index::Hnsw;
pub use hnsw::{ExternalId, HnswConfig, Item, SearchResult};

/// Measures how far apart two embeddings of the same dimension are.
///
/// Smaller values mean closer. The index treats a NaN distance as infinitely far, whatever its
/// sign bit.
pub trait DistanceFn: Send + Sync {
    fn distance(&self, first: &[f32], second: &[f32]) -> f32;
}

impl<F> DistanceFn for F
where
    F: Fn(&[f32], &[f32]) -> f32 + Send + Sync,
{
    fn distance(&self, first: &[f32], second: &[f32]) -> f32 {
        self(first, second)
    }
}
