use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Shared-ownership, immutable embedding. Cloning is a pointer bump, so search results and
/// snapshots hand out the stored vector without copying it.
///
/// Equality and hashing are bitwise: two keys are equal only if every component has the same
/// bit pattern. That is what decides whether a re-insert is a no-op.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmbeddingKey(Arc<[f32]>);

impl EmbeddingKey {
    pub fn new(v: Vec<f32>) -> Self {
        Self(Arc::from(v))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn bit_eq(&self, other: &[f32]) -> bool {
        self.0.len() == other.len()
            && self
                .0
                .iter()
                .zip(other)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Deref for EmbeddingKey {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl PartialEq for EmbeddingKey {
    fn eq(&self, other: &Self) -> bool {
        self.bit_eq(other.as_slice())
    }
}

impl Eq for EmbeddingKey {}

impl Hash for EmbeddingKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for v in self.0.iter() {
            v.to_bits().hash(state);
        }
    }
}

impl From<Vec<f32>> for EmbeddingKey {
    fn from(v: Vec<f32>) -> Self {
        Self::new(v)
    }
}
