//! Heirarchical Navigable Small Worlds keeps a stack of proximity graphs. Upper layers are sparse
//! and let a search take long hops towards the query, layer 0 holds every node and is where the
//! final best-first search runs.

pub mod index;
mod visited;

use std::fmt::Debug;
use std::hash::Hash;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::EmbeddingKey;
use crate::error::Error;

/// Dense arena position of a node. Stable for the node's lifetime and never reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// LayerIndex is just a wrapper around u8 to represent a layer in HNSW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerIndex(pub u8);

impl LayerIndex {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier supplied by the caller for every item (a row id, a key...).
///
/// The level of a node is derived from `level_bytes`, so the same identifier always lands on the
/// same layer no matter when or by which thread it is inserted.
pub trait ExternalId: Clone + Eq + Hash + Debug + Send + Sync {
    fn level_bytes(&self) -> Vec<u8>;
}

macro_rules! external_id_for_integers {
    ($($int:ty),*) => {
        $(
            impl ExternalId for $int {
                fn level_bytes(&self) -> Vec<u8> {
                    self.to_be_bytes().to_vec()
                }
            }
        )*
    };
}

external_id_for_integers!(u16, u32, u64, u128, usize, i32, i64);

impl ExternalId for String {
    fn level_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

/// An item as stored in the index
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Item<K> {
    pub id: K,
    pub vector: EmbeddingKey,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SearchResult<K> {
    pub id: K,
    pub vector: EmbeddingKey,
    pub distance: f32,
}

/// Tunables of a [`index::Hnsw`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct HnswConfig {
    /// Length every vector must have
    pub dimension: usize,
    /// Number of nodes the arena can hold before a resize is needed
    pub max_item_count: usize,
    /// Maximum number of connections per node above layer 0 (M). Layer 0 allows 2 * M.
    pub maximum_connections: usize,
    /// Breadth of search during insertion (efConstruction)
    pub ef_construction: usize,
    /// Breadth of search during queries (ef)
    pub ef: usize,
    /// Enables `remove` and replacing an item with a different vector
    pub allow_remove: bool,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 1,
            max_item_count: 1024,
            maximum_connections: 10,
            ef_construction: 200,
            ef: 10,
            allow_remove: false,
        }
    }
}

impl HnswConfig {
    pub fn new(dimension: usize, max_item_count: usize) -> Self {
        Self {
            dimension,
            max_item_count,
            ..Default::default()
        }
    }

    pub fn maximum_connections(mut self, m: usize) -> Self {
        self.maximum_connections = m;
        self
    }

    pub fn ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn ef(mut self, ef: usize) -> Self {
        self.ef = ef;
        self
    }

    pub fn allow_remove(mut self, allow_remove: bool) -> Self {
        self.allow_remove = allow_remove;
        self
    }

    /// Mmax0
    pub fn maximum_connections_zero(&self) -> usize {
        self.maximum_connections * 2
    }

    pub(crate) fn layer_capacity(&self, layer: LayerIndex) -> usize {
        if layer.0 == 0 {
            self.maximum_connections_zero()
        } else {
            self.maximum_connections
        }
    }

    /// 1 / ln(M)
    pub fn level_lambda(&self) -> f64 {
        1.0 / (self.maximum_connections as f64).ln()
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.dimension == 0 {
            return Err(Error::InvalidConfig("dimension must be > 0".to_string()));
        }
        if self.maximum_connections < 2 {
            return Err(Error::InvalidConfig("M must be > 1".to_string()));
        }
        if self.ef == 0 || self.ef_construction == 0 {
            return Err(Error::InvalidConfig("ef and efConstruction must be > 0".to_string()));
        }
        validate_capacity(self.max_item_count)
    }
}

pub(crate) fn validate_capacity(max_item_count: usize) -> Result<(), Error> {
    if max_item_count > u32::MAX as usize {
        return Err(Error::InvalidConfig(format!(
            "max_item_count {max_item_count} exceeds {}",
            u32::MAX
        )));
    }
    Ok(())
}

// Floor for the uniform sample so a zero hash does not produce an unbounded level
const MIN_UNIFORM: f64 = 1e-10;

/// Level of a node: `floor(-ln(U) * lambda)` where U is taken from the 32 bit murmur3 hash of the
/// identifier. P(level >= l) ≈ (1/M)^l.
pub(crate) fn assign_level<K: ExternalId>(id: &K, level_lambda: f64) -> u8 {
    // reads from an in-memory cursor cannot fail
    let hash = murmur3::murmur3_32(&mut Cursor::new(id.level_bytes()), 0).unwrap_or_default();
    let unif = f64::from((hash as i32).unsigned_abs()) / f64::from(i32::MAX);
    let unif = unif.clamp(MIN_UNIFORM, 1.0);
    let level = (-unif.ln() * level_lambda).floor();
    level.min(f64::from(u8::MAX)) as u8
}

/// Node represents a single element in the HNSW graph.
///
/// `connections` holds one adjacency list per layer `0..=level`. The lists are the only mutable
/// part of a node and sit behind the node's own lock, so inserts touching disjoint neighbourhoods
/// never contend.
#[derive(Debug)]
pub(crate) struct Node<K> {
    pub(crate) id: NodeId,
    pub(crate) item: Item<K>,
    pub(crate) level: u8,
    connections: Mutex<Vec<Vec<NodeId>>>,
    deleted: AtomicBool,
}

pub(crate) type Neighbours = SmallVec<[NodeId; 32]>;

impl<K> Node<K> {
    pub(crate) fn new(id: NodeId, item: Item<K>, level: u8, m: usize) -> Self {
        let connections = (0..=level)
            .map(|layer| {
                if layer == 0 {
                    Vec::with_capacity(m * 2)
                } else {
                    Vec::with_capacity(m)
                }
            })
            .collect();
        Self {
            id,
            item,
            level,
            connections: Mutex::new(connections),
            deleted: AtomicBool::new(false),
        }
    }

    pub(crate) fn vector(&self) -> &[f32] {
        self.item.vector.as_slice()
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release)
    }

    /// Snapshot of the neighbours at `layer`, taken under the node lock
    pub(crate) fn neighbours_at(&self, layer: LayerIndex) -> Neighbours {
        self.connections
            .lock()
            .get(layer.index())
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Runs `f` on the adjacency list at `layer` while holding the node lock.
    pub(crate) fn with_neighbours_mut<R>(
        &self,
        layer: LayerIndex,
        f: impl FnOnce(&mut Vec<NodeId>) -> R,
    ) -> Option<R> {
        self.connections.lock().get_mut(layer.index()).map(f)
    }
}

/// A node paired with its distance to whatever the current reference point is. Ordered by
/// distance under `f32::total_cmp`, ties broken by node id so the order is total.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OrderedNode {
    pub(crate) id: NodeId,
    pub(crate) distance: f32,
}

impl OrderedNode {
    pub(crate) fn new(id: NodeId, distance: f32) -> Self {
        Self { id, distance }
    }
}

impl PartialEq for OrderedNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for OrderedNode {}

impl PartialOrd for OrderedNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}
