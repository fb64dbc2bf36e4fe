use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use ahash::AHashMap;
use crossbeam::queue::SegQueue;
use papaya::HashMap as ConcurrentHashMap;
use parking_lot::{Mutex, RwLock};

use super::visited::{ArrayBitSet, VisitedPool};
use super::{
    ExternalId, HnswConfig, Item, LayerIndex, Node, NodeId, OrderedNode, SearchResult,
    assign_level, validate_capacity,
};
use crate::DistanceFn;
use crate::EmbeddingKey;
use crate::error::Error;
use crate::heap::BoundedMinHeap;

/// HNSW represents a Hierarchical Navigable Small World graph over caller-identified vectors.
///
/// Nodes live in an arena and refer to each other by [`NodeId`], so the cyclic graph needs no
/// shared pointers. Locks are always taken in this order and never the other way round:
///
/// 1. the per-item lock of the external id being inserted or removed
/// 2. the arena lock (read for every operation, write only for [`Hnsw::resize`])
/// 3. the structural lock guarding the lookup table and the entry point
/// 4. the excluded set, or the lock of a single node
///
/// No thread ever holds two node locks at once.
///
/// Removal is a soft delete: the node keeps its edges and is still walked through by searches,
/// it is only filtered out of results.
pub struct Hnsw<K: ExternalId, D: DistanceFn> {
    config: HnswConfig,
    ef: AtomicUsize,
    level_lambda: f64,
    distance_algorithm: D,
    arena: RwLock<Arena<K>>,
    graph: Mutex<GraphState<K>>,
    item_locks: ConcurrentHashMap<K, Arc<Mutex<()>>>,
}

/// Backing storage, swapped wholesale by a resize.
struct Arena<K> {
    slots: Vec<OnceLock<Node<K>>>,
    visited: VisitedPool,
    /// nodes whose insert is still in progress
    excluded: Mutex<ArrayBitSet>,
}

impl<K> Arena<K> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            visited: VisitedPool::new(VisitedPool::default_size(), capacity),
            excluded: Mutex::new(ArrayBitSet::new(capacity)),
        }
    }

    fn node(&self, id: NodeId) -> Option<&Node<K>> {
        self.slots.get(id.index()).and_then(OnceLock::get)
    }
}

struct GraphState<K> {
    lookup: AHashMap<K, NodeId>,
    entry_point: Option<NodeId>,
    node_count: usize,
    max_item_count: usize,
}

impl<K: ExternalId, D: DistanceFn> Hnsw<K, D> {
    pub fn new(config: HnswConfig, distance_algorithm: D) -> Result<Self, Error> {
        config.validate()?;
        let config = HnswConfig {
            ef_construction: config.ef_construction.max(config.maximum_connections),
            ..config
        };
        Ok(Self {
            ef: AtomicUsize::new(config.ef),
            level_lambda: config.level_lambda(),
            distance_algorithm,
            arena: RwLock::new(Arena::new(config.max_item_count)),
            graph: Mutex::new(GraphState {
                lookup: AHashMap::new(),
                entry_point: None,
                node_count: 0,
                max_item_count: config.max_item_count,
            }),
            item_locks: ConcurrentHashMap::new(),
            config,
        })
    }

    /// Configuration as constructed. `max_item_count` and `ef` may since have been changed by
    /// [`Hnsw::resize`] and [`Hnsw::set_ef`].
    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn ef(&self) -> usize {
        self.ef.load(Ordering::Relaxed)
    }

    /// Changes the query-time beam width. Values below 1 are raised to 1.
    pub fn set_ef(&self, ef: usize) {
        self.ef.store(ef.max(1), Ordering::Relaxed)
    }

    pub fn max_item_count(&self) -> usize {
        self.graph.lock().max_item_count
    }

    /// Number of live items
    pub fn size(&self) -> usize {
        self.graph.lock().lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn contains(&self, id: &K) -> bool {
        self.graph.lock().lookup.contains_key(id)
    }

    pub fn get(&self, id: &K) -> Option<Item<K>> {
        let arena = self.arena.read();
        let graph = self.graph.lock();
        graph
            .lookup
            .get(id)
            .and_then(|node_id| arena.node(*node_id))
            .map(|node| node.item.clone())
    }

    /// Top layer of the current entry point, `None` while nothing was ever inserted.
    pub fn entry_point_level(&self) -> Option<u8> {
        let arena = self.arena.read();
        let entry_point = self.graph.lock().entry_point;
        entry_point.and_then(|id| arena.node(id)).map(|node| node.level)
    }

    /// Number of nodes whose insert has not completed yet
    pub fn in_flight(&self) -> usize {
        self.arena.read().excluded.lock().count()
    }

    /// Snapshot of every live item, in allocation order
    #[tracing::instrument(skip_all)]
    pub fn items(&self) -> Vec<Item<K>> {
        let arena = self.arena.read();
        let graph = self.graph.lock();
        arena.slots[..graph.node_count]
            .iter()
            .filter_map(OnceLock::get)
            .filter(|node| !node.is_deleted())
            .map(|node| node.item.clone())
            .collect()
    }

    /// Insert `vector` under `id`.
    ///
    /// Returns `false` without touching the graph when `id` is already stored with a bitwise
    /// identical vector. A different vector replaces the old item if removal is enabled and is
    /// rejected with [`Error::UpdateDisabled`] otherwise.
    #[tracing::instrument(skip_all)]
    pub fn insert(&self, id: K, vector: Vec<f32>) -> Result<bool, Error> {
        self.check_dimension(vector.len())?;
        let level = assign_level(&id, self.level_lambda);

        let item_lock = self.item_lock(&id);
        let _item_guard = item_lock.lock();

        let arena = self.arena.read();
        let mut graph = self.graph.lock();

        if let Some(existing) = graph.lookup.get(&id).and_then(|n| arena.node(*n)) {
            if existing.item.vector.bit_eq(&vector) {
                return Ok(false);
            }
            if !self.config.allow_remove {
                return Err(Error::UpdateDisabled);
            }
            // a failed update must leave the old item in place
            if graph.node_count >= graph.max_item_count {
                return Err(Error::CapacityExceeded {
                    max_item_count: graph.max_item_count,
                });
            }
            tracing::debug!(?id, "Replacing vector of existing item");
            existing.mark_deleted();
            graph.lookup.remove(&id);
        }

        if graph.node_count >= graph.max_item_count {
            tracing::debug!(max_item_count = graph.max_item_count, "Index is full");
            return Err(Error::CapacityExceeded {
                max_item_count: graph.max_item_count,
            });
        }

        let node_id = NodeId(graph.node_count as u32);
        graph.node_count += 1;
        arena.excluded.lock().insert(node_id.index());
        let node = arena.slots[node_id.index()].get_or_init(|| {
            let item = Item {
                id: id.clone(),
                vector: EmbeddingKey::new(vector),
            };
            Node::new(node_id, item, level, self.config.maximum_connections)
        });
        graph.lookup.insert(id, node_id);

        let entry_point = graph.entry_point.and_then(|ep| arena.node(ep));
        let node_count = graph.node_count;
        // Only a node that may become the new entry point keeps the structural lock; everybody
        // else links without serialising on it.
        let graph = match entry_point {
            Some(entry) if level <= entry.level => {
                drop(graph);
                None
            }
            _ => Some(graph),
        };

        if let Some(entry) = entry_point {
            self.link(&arena, node, entry, node_count);
        }

        if let Some(mut graph) = graph {
            tracing::debug!(level, "New entry point");
            graph.entry_point = Some(node_id);
        }
        arena.excluded.lock().remove(node_id.index());
        Ok(true)
    }

    /// Parallel bulk insert. `parallelism` worker threads drain a shared queue; the first failing
    /// insert stops every worker and is returned. Items inserted before the failure stay.
    #[tracing::instrument(skip_all, fields(parallelism = parallelism.get()))]
    pub fn insert_batch<I>(&self, items: I, parallelism: NonZeroUsize) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, Vec<f32>)>,
    {
        let queue = SegQueue::new();
        for item in items {
            queue.push(item);
        }
        let failed = AtomicBool::new(false);
        let failure: Mutex<Option<Error>> = Mutex::new(None);

        let fail = |err: Error| {
            failed.store(true, Ordering::Release);
            failure.lock().get_or_insert(err);
        };

        thread::scope(|scope| {
            let mut workers = Vec::with_capacity(parallelism.get());
            for worker in 0..parallelism.get() {
                let spawned = thread::Builder::new()
                    .name(format!("indexer-{worker}"))
                    .spawn_scoped(scope, || {
                        while !failed.load(Ordering::Acquire) {
                            let Some((id, vector)) = queue.pop() else {
                                break;
                            };
                            if let Err(err) = self.insert(id, vector) {
                                fail(err);
                            }
                        }
                    });
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(err) => {
                        fail(Error::ThreadSpawn(err.to_string()));
                        break;
                    }
                }
            }
            for handle in workers {
                if handle.join().is_err() {
                    fail(Error::WorkerPanicked);
                }
            }
        });

        match failure.into_inner() {
            Some(err) => {
                tracing::error!("Batch insert failed: {err}");
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Sequentially inserts everything `source` yields, the way an index rebuild replays a
    /// column scan. Returns how many new nodes were created.
    #[tracing::instrument(skip_all)]
    pub fn extend<I>(&self, source: I) -> Result<usize, Error>
    where
        I: IntoIterator<Item = (K, Vec<f32>)>,
    {
        let mut created = 0;
        for (id, vector) in source {
            if self.insert(id, vector)? {
                created += 1;
            }
        }
        Ok(created)
    }

    /// K-Nearest neighbour Search
    ///
    /// At most `k` live items ordered by ascending distance to `vector`.
    #[tracing::instrument(skip_all, fields(k = k))]
    pub fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult<K>>, Error> {
        self.check_dimension(vector.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let arena = self.arena.read();
        let (entry_point, node_count) = {
            let graph = self.graph.lock();
            (graph.entry_point, graph.node_count)
        };
        let Some(entry) = entry_point.and_then(|ep| arena.node(ep)) else {
            return Ok(Vec::new());
        };

        let mut nearest = OrderedNode::new(entry.id, self.distance(vector, entry.vector()));
        for layer in (1..=entry.level).rev() {
            nearest = self.greedy_closest(&arena, vector, nearest, LayerIndex(layer));
        }
        let found = self.search_layer(
            &arena,
            vector,
            &[nearest.id],
            self.ef().max(k).min(node_count),
            LayerIndex(0),
        );

        Ok(found
            .into_sorted_vec()
            .into_iter()
            .take(k)
            .filter_map(|candidate| {
                arena.node(candidate.id).map(|node| SearchResult {
                    id: node.item.id.clone(),
                    vector: node.item.vector.clone(),
                    distance: candidate.distance,
                })
            })
            .collect())
    }

    /// The `k` nearest items to the one stored under `id`, excluding itself. Empty when `id` is
    /// not stored.
    #[tracing::instrument(skip_all, fields(k = k))]
    pub fn neighbors_of(&self, id: &K, k: usize) -> Result<Vec<SearchResult<K>>, Error> {
        let Some(item) = self.get(id) else {
            return Ok(Vec::new());
        };
        Ok(self
            .search(item.vector.as_slice(), k.saturating_add(1))?
            .into_iter()
            .filter(|result| &result.id != id)
            .take(k)
            .collect())
    }

    /// Soft delete. Returns `false` if removal is disabled or `id` is not stored.
    ///
    /// The node keeps its edges so the graph stays navigable through it.
    #[tracing::instrument(skip_all)]
    pub fn remove(&self, id: &K) -> bool {
        if !self.config.allow_remove {
            return false;
        }
        let item_lock = self.item_lock(id);
        let _item_guard = item_lock.lock();

        let arena = self.arena.read();
        let mut graph = self.graph.lock();
        let Some(node_id) = graph.lookup.remove(id) else {
            return false;
        };
        if let Some(node) = arena.node(node_id) {
            node.mark_deleted();
        }
        tracing::debug!(?id, "Removed item");
        true
    }

    /// Changes the maximum capacity of the index. Existing nodes keep their position; the
    /// visited pool is rebuilt for the new capacity. Waits for in-flight operations.
    #[tracing::instrument(skip(self))]
    pub fn resize(&self, new_max_item_count: usize) -> Result<(), Error> {
        validate_capacity(new_max_item_count)?;
        let mut arena = self.arena.write();
        let mut graph = self.graph.lock();
        if new_max_item_count < graph.node_count {
            return Err(Error::InvalidCapacity {
                requested: new_max_item_count,
                node_count: graph.node_count,
            });
        }

        arena
            .slots
            .resize_with(new_max_item_count, OnceLock::new);
        arena.visited = VisitedPool::new(arena.visited.size(), new_max_item_count);
        arena.excluded.get_mut().resize(new_max_item_count);
        tracing::info!(
            from = graph.max_item_count,
            to = new_max_item_count,
            "Resized index"
        );
        graph.max_item_count = new_max_item_count;
        Ok(())
    }

    fn check_dimension(&self, found: usize) -> Result<(), Error> {
        if found != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                found,
            });
        }
        Ok(())
    }

    fn item_lock(&self, id: &K) -> Arc<Mutex<()>> {
        Arc::clone(self.item_locks.pin().get_or_insert_with(id.clone(), Default::default))
    }

    /// NaN counts as infinitely far so it can never rank as the nearest hit.
    fn distance(&self, first: &[f32], second: &[f32]) -> f32 {
        let distance = self.distance_algorithm.distance(first, second);
        if distance.is_nan() {
            f32::INFINITY
        } else {
            distance
        }
    }

    /// Connects a freshly allocated `node` into every layer it lives on, starting the descent at
    /// `entry`. The beam never exceeds `node_count`, the number of allocated nodes.
    fn link(&self, arena: &Arena<K>, node: &Node<K>, entry: &Node<K>, node_count: usize) {
        let query = node.vector();
        let mut nearest = OrderedNode::new(entry.id, self.distance(query, entry.vector()));

        for layer in (node.level.saturating_add(1)..=entry.level).rev() {
            nearest = self.greedy_closest(arena, query, nearest, LayerIndex(layer));
        }

        let mut entry_points = vec![nearest.id];
        for layer in (0..=node.level.min(entry.level)).rev() {
            let layer = LayerIndex(layer);
            let mut candidates = self.search_layer(
                arena,
                query,
                &entry_points,
                self.config.ef_construction.min(node_count),
                layer,
            );
            // deleted nodes never make it into search results, force the entry point back in so
            // it keeps working as a bridge
            if entry.is_deleted() {
                candidates.push(OrderedNode::new(
                    entry.id,
                    self.distance(query, entry.vector()),
                ));
            }
            if candidates.is_empty() {
                continue;
            }

            let candidates = candidates.into_sorted_vec();
            entry_points = candidates.iter().map(|candidate| candidate.id).collect();
            self.mutually_connect(arena, node, candidates, layer);
        }
    }

    /// Links `node` to the heuristically selected `candidates` and each of them back to `node`.
    fn mutually_connect(
        &self,
        arena: &Arena<K>,
        node: &Node<K>,
        candidates: Vec<OrderedNode>,
        layer: LayerIndex,
    ) {
        let best_n = self.config.layer_capacity(layer);
        let selected =
            self.select_neighbours(arena, candidates, self.config.maximum_connections);

        for neighbour in selected {
            if neighbour.id == node.id {
                continue;
            }
            let Some(neighbour_node) = arena.node(neighbour.id) else {
                continue;
            };
            self.connect(arena, node, neighbour, layer, best_n);
            self.connect(
                arena,
                neighbour_node,
                OrderedNode::new(node.id, neighbour.distance),
                layer,
                best_n,
            );
        }
    }

    /// Adds the edge `from -> to` at `layer`. A list already holding `best_n` edges is re-pruned
    /// down to the best `best_n` of its current members plus `to`.
    fn connect(
        &self,
        arena: &Arena<K>,
        from: &Node<K>,
        to: OrderedNode,
        layer: LayerIndex,
        best_n: usize,
    ) {
        let from_vector = from.vector();
        from.with_neighbours_mut(layer, |connections| {
            if connections.contains(&to.id) {
                return;
            }
            if connections.len() < best_n {
                connections.push(to.id);
                return;
            }
            let pool = std::iter::once(to)
                .chain(connections.iter().filter_map(|id| {
                    arena
                        .node(*id)
                        .map(|other| OrderedNode::new(*id, self.distance(from_vector, other.vector())))
                }))
                .collect();
            *connections = self
                .select_neighbours(arena, pool, best_n)
                .into_iter()
                .map(|kept| kept.id)
                .collect();
        });
    }

    /// Select at most `m` neighbours for diversity
    /// Corresponds to Algorithm 4 (SELECT-NEIGHBOURS-HEURISTIC)
    ///
    /// Candidates are visited nearest first and accepted only if no already accepted candidate is
    /// closer to them than the reference point is. Pools smaller than `m` are returned untouched.
    fn select_neighbours(
        &self,
        arena: &Arena<K>,
        mut candidates: Vec<OrderedNode>,
        m: usize,
    ) -> Vec<OrderedNode> {
        if candidates.len() < m {
            return candidates;
        }
        candidates.sort();

        let mut selected: Vec<(OrderedNode, &[f32])> = Vec::with_capacity(m);
        for candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let Some(candidate_node) = arena.node(candidate.id) else {
                continue;
            };
            let candidate_vector = candidate_node.vector();
            let is_diverse = selected.iter().all(|(_, selected_vector)| {
                self.distance(selected_vector, candidate_vector)
                    .total_cmp(&candidate.distance)
                    .is_ge()
            });
            if is_diverse {
                selected.push((candidate, candidate_vector));
            }
        }
        selected.into_iter().map(|(candidate, _)| candidate).collect()
    }

    /// Steepest descent on a single layer: hop to any neighbour strictly closer to `query` until
    /// none is.
    fn greedy_closest(
        &self,
        arena: &Arena<K>,
        query: &[f32],
        mut nearest: OrderedNode,
        layer: LayerIndex,
    ) -> OrderedNode {
        loop {
            let Some(node) = arena.node(nearest.id) else {
                return nearest;
            };
            let mut changed = false;
            for neighbour_id in node.neighbours_at(layer) {
                let Some(neighbour) = arena.node(neighbour_id) else {
                    continue;
                };
                let distance = self.distance(query, neighbour.vector());
                if distance.total_cmp(&nearest.distance).is_lt() {
                    nearest = OrderedNode::new(neighbour_id, distance);
                    changed = true;
                }
            }
            if !changed {
                return nearest;
            }
        }
    }

    /// Search for the `ef` nearest live nodes on one layer
    /// Corresponds to Algorithm 2 (SEARCH-LAYER)
    ///
    /// Deleted nodes are expanded like any other but never enter the result set; while the result
    /// set is empty the stopping bound is infinite.
    fn search_layer(
        &self,
        arena: &Arena<K>,
        query: &[f32],
        entry_points: &[NodeId],
        ef: usize,
        layer: LayerIndex,
    ) -> BoundedMinHeap<OrderedNode> {
        let mut visited = arena.visited.take();
        // C - candidates, nearest pops first
        let mut candidates: BinaryHeap<Reverse<OrderedNode>> = BinaryHeap::new();
        // W - the ef nearest found so far, furthest on top
        let mut nearest_neighbours =
            BoundedMinHeap::new(NonZeroUsize::new(ef).unwrap_or(NonZeroUsize::MIN));

        for entry_id in entry_points {
            let Some(entry) = arena.node(*entry_id) else {
                continue;
            };
            if !visited.insert(entry_id.index()) {
                continue;
            }
            let seed = OrderedNode::new(*entry_id, self.distance(query, entry.vector()));
            candidates.push(Reverse(seed));
            if !entry.is_deleted() {
                nearest_neighbours.push(seed);
            }
        }

        while let Some(Reverse(nearest)) = candidates.pop() {
            if nearest
                .distance
                .total_cmp(&Self::bound(&nearest_neighbours))
                .is_gt()
            {
                break;
            }
            let Some(node) = arena.node(nearest.id) else {
                continue;
            };

            for neighbour_id in node.neighbours_at(layer) {
                if !visited.insert(neighbour_id.index()) {
                    continue;
                }
                let Some(neighbour) = arena.node(neighbour_id) else {
                    continue;
                };
                let distance = self.distance(query, neighbour.vector());
                if !nearest_neighbours.is_full()
                    || distance
                        .total_cmp(&Self::bound(&nearest_neighbours))
                        .is_lt()
                {
                    let candidate = OrderedNode::new(neighbour_id, distance);
                    candidates.push(Reverse(candidate));
                    if !neighbour.is_deleted() {
                        nearest_neighbours.push(candidate);
                    }
                }
            }
        }
        nearest_neighbours
    }

    fn bound(nearest_neighbours: &BoundedMinHeap<OrderedNode>) -> f32 {
        nearest_neighbours
            .worst()
            .map_or(f32::INFINITY, |worst| worst.distance)
    }
}

impl<K: ExternalId, D: DistanceFn> fmt::Debug for Hnsw<K, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.graph.lock();
        f.debug_struct("Hnsw")
            .field("config", &self.config)
            .field("ef", &self.ef())
            .field("size", &graph.lookup.len())
            .field("node_count", &graph.node_count)
            .field("max_item_count", &graph.max_item_count)
            .field("entry_point", &graph.entry_point)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Distance;
    use pretty_assertions::assert_eq;

    fn hnsw(dimension: usize, capacity: usize) -> Hnsw<u64, Distance> {
        Hnsw::new(HnswConfig::new(dimension, capacity), Distance::Euclidean).unwrap()
    }

    fn removable(dimension: usize, capacity: usize) -> Hnsw<u64, Distance> {
        let config = HnswConfig::new(dimension, capacity).allow_remove(true);
        Hnsw::new(config, Distance::Euclidean).unwrap()
    }

    fn node_id_of(hnsw: &Hnsw<u64, Distance>, id: u64) -> NodeId {
        *hnsw.graph.lock().lookup.get(&id).unwrap()
    }

    fn neighbours(hnsw: &Hnsw<u64, Distance>, id: u64, layer: u8) -> Vec<NodeId> {
        let node_id = node_id_of(hnsw, id);
        let arena = hnsw.arena.read();
        arena
            .node(node_id)
            .unwrap()
            .neighbours_at(LayerIndex(layer))
            .to_vec()
    }

    fn assert_hnsw_invariants(hnsw: &Hnsw<u64, Distance>) {
        let arena = hnsw.arena.read();
        let graph = hnsw.graph.lock();
        let config = hnsw.config();
        for slot in &arena.slots[..graph.node_count] {
            let node = slot.get().unwrap();
            for layer in 0..=node.level {
                let layer = LayerIndex(layer);
                let connections = node.neighbours_at(layer);
                assert!(connections.len() <= config.layer_capacity(layer));
                for neighbour in connections {
                    assert!(neighbour.index() < graph.node_count);
                    assert_ne!(neighbour, node.id, "self loop");
                    // an edge at a layer only points to nodes living on that layer
                    assert!(arena.node(neighbour).unwrap().level >= layer.0);
                }
            }
        }
        if graph.node_count > 0 {
            let entry = arena.node(graph.entry_point.unwrap()).unwrap();
            let top = arena.slots[..graph.node_count]
                .iter()
                .filter_map(OnceLock::get)
                .map(|node| node.level)
                .max()
                .unwrap();
            assert_eq!(entry.level, top);
        }
    }

    #[test]
    fn test_simple_hnsw_state() {
        let hnsw = hnsw(1, 10);
        assert!(hnsw.is_empty());
        assert_eq!(hnsw.entry_point_level(), None);

        assert!(hnsw.insert(1, vec![3.2]).unwrap());
        assert_eq!(hnsw.size(), 1);
        assert!(hnsw.entry_point_level().is_some());
        assert!(neighbours(&hnsw, 1, 0).is_empty());
        assert_eq!(hnsw.in_flight(), 0);
    }

    #[test]
    fn test_two_nodes_bidirectional() {
        let hnsw = hnsw(1, 10);
        hnsw.insert(1, vec![0.0]).unwrap();
        hnsw.insert(2, vec![1.0]).unwrap();

        assert_eq!(neighbours(&hnsw, 1, 0), vec![node_id_of(&hnsw, 2)]);
        assert_eq!(neighbours(&hnsw, 2, 0), vec![node_id_of(&hnsw, 1)]);
    }

    #[test]
    fn test_search_single_nearest() {
        let hnsw = hnsw(1, 10);
        hnsw.insert(10, vec![0.0]).unwrap();
        hnsw.insert(20, vec![10.0]).unwrap();

        let res = hnsw.search(&[1.0], 1).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].id, 10);
        assert_eq!(res[0].distance, 1.0);
    }

    #[test]
    fn test_search_on_empty_index() {
        let hnsw = hnsw(2, 10);
        assert!(hnsw.search(&[0.0, 0.0], 5).unwrap().is_empty());
        assert!(hnsw.neighbors_of(&1, 5).unwrap().is_empty());
    }

    #[test]
    fn test_reinsert_identical_is_noop() {
        let hnsw = hnsw(2, 10);
        assert!(hnsw.insert(1, vec![0.5, 0.5]).unwrap());
        assert!(!hnsw.insert(1, vec![0.5, 0.5]).unwrap());
        assert_eq!(hnsw.size(), 1);
        assert_eq!(hnsw.graph.lock().node_count, 1);
    }

    #[test]
    fn test_update_rejected_when_disabled() {
        let hnsw = hnsw(2, 10);
        hnsw.insert(1, vec![0.5, 0.5]).unwrap();
        assert_eq!(hnsw.insert(1, vec![1.0, 0.5]), Err(Error::UpdateDisabled));
        assert_eq!(hnsw.get(&1).unwrap().vector.as_slice(), &[0.5, 0.5]);
    }

    #[test]
    fn test_update_replaces_vector() {
        let hnsw = removable(2, 10);
        hnsw.insert(1, vec![0.0, 0.0]).unwrap();
        hnsw.insert(2, vec![10.0, 10.0]).unwrap();
        hnsw.insert(3, vec![-1.0, -1.0]).unwrap();
        assert_eq!(hnsw.neighbors_of(&1, 1).unwrap()[0].id, 3);
        assert!(hnsw.insert(1, vec![9.0, 9.0]).unwrap());

        assert_eq!(hnsw.size(), 3);
        assert_eq!(hnsw.get(&1).unwrap().vector.as_slice(), &[9.0, 9.0]);
        let nearest = hnsw.search(&[9.0, 9.0], 2).unwrap();
        assert_eq!(nearest[0].id, 1);
        assert_eq!(nearest[0].distance, 0.0);
        // the replaced node is still in the arena but never surfaces
        assert!(
            hnsw.search(&[0.0, 0.0], 2)
                .unwrap()
                .iter()
                .all(|r| !r.vector.bit_eq(&[0.0, 0.0]))
        );
        let moved = hnsw.neighbors_of(&1, 1).unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].id, 2);
    }

    #[test]
    fn test_huge_k_is_capped_by_index_size() {
        let hnsw = hnsw(2, 16);
        for id in 0..10u64 {
            hnsw.insert(id, vec![id as f32, 0.0]).unwrap();
        }
        assert_eq!(hnsw.search(&[0.0, 0.0], 1 << 50).unwrap().len(), hnsw.size());
        assert_eq!(hnsw.search(&[0.0, 0.0], usize::MAX).unwrap().len(), hnsw.size());
        assert_eq!(
            hnsw.neighbors_of(&0, usize::MAX).unwrap().len(),
            hnsw.size() - 1
        );
    }

    #[test]
    fn test_huge_ef_is_capped_by_index_size() {
        let config = HnswConfig::new(1, 16).ef_construction(usize::MAX);
        let hnsw: Hnsw<u64, _> = Hnsw::new(config, Distance::Euclidean).unwrap();
        hnsw.set_ef(usize::MAX);
        for id in 0..10u64 {
            hnsw.insert(id, vec![id as f32]).unwrap();
        }
        let found = hnsw.search(&[4.0], 3).unwrap();
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].id, 4);
    }

    #[test]
    fn test_nan_distance_never_ranks_first() {
        let hnsw = hnsw(1, 4);
        hnsw.insert(1, vec![0.0]).unwrap();
        hnsw.insert(2, vec![f32::INFINITY]).unwrap();

        // inf - inf is a NaN, possibly with the sign bit set
        let found = hnsw.search(&[f32::INFINITY], 2).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|r| r.distance == f32::INFINITY));

        let nan_kernel = |_: &[f32], _: &[f32]| -> f32 { -f32::NAN };
        let hnsw: Hnsw<u64, _> = Hnsw::new(HnswConfig::new(1, 4), nan_kernel).unwrap();
        hnsw.insert(1, vec![0.0]).unwrap();
        hnsw.insert(2, vec![1.0]).unwrap();
        assert!(
            hnsw.search(&[0.5], 2)
                .unwrap()
                .iter()
                .all(|r| !r.distance.is_nan())
        );
    }

    #[test]
    fn test_failed_update_keeps_old_item() {
        let hnsw = removable(1, 1);
        hnsw.insert(1, vec![1.0]).unwrap();
        assert_eq!(
            hnsw.insert(1, vec![2.0]),
            Err(Error::CapacityExceeded { max_item_count: 1 })
        );
        assert!(hnsw.contains(&1));
        assert_eq!(hnsw.get(&1).unwrap().vector.as_slice(), &[1.0]);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected_before_mutation() {
        let hnsw = hnsw(3, 10);
        assert_eq!(
            hnsw.insert(1, vec![1.0, 2.0]),
            Err(Error::DimensionMismatch {
                expected: 3,
                found: 2
            })
        );
        assert_eq!(hnsw.size(), 0);
        assert_eq!(hnsw.graph.lock().node_count, 0);
        assert!(matches!(
            hnsw.search(&[1.0], 1),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_capacity_exceeded_then_resize() {
        let hnsw = hnsw(1, 2);
        hnsw.insert(1, vec![1.0]).unwrap();
        hnsw.insert(2, vec![2.0]).unwrap();
        assert_eq!(
            hnsw.insert(3, vec![3.0]),
            Err(Error::CapacityExceeded { max_item_count: 2 })
        );
        assert!(!hnsw.contains(&3));

        hnsw.resize(4).unwrap();
        assert_eq!(hnsw.max_item_count(), 4);
        assert!(hnsw.insert(3, vec![3.0]).unwrap());
        assert_eq!(hnsw.get(&1).unwrap().vector.as_slice(), &[1.0]);
        assert_eq!(hnsw.search(&[3.1], 1).unwrap()[0].id, 3);
    }

    #[test]
    fn test_resize_cannot_drop_allocated_nodes() {
        let hnsw = hnsw(1, 4);
        for id in 0..3 {
            hnsw.insert(id, vec![id as f32]).unwrap();
        }
        assert_eq!(
            hnsw.resize(2),
            Err(Error::InvalidCapacity {
                requested: 2,
                node_count: 3
            })
        );
        assert!(hnsw.resize(3).is_ok());
        assert_eq!(hnsw.size(), 3);
    }

    #[test]
    fn test_remove_disabled() {
        let hnsw = hnsw(1, 4);
        hnsw.insert(1, vec![1.0]).unwrap();
        assert!(!hnsw.remove(&1));
        assert!(hnsw.contains(&1));
    }

    #[test]
    fn test_remove_keeps_edges() {
        let hnsw = removable(1, 10);
        for id in 0..5 {
            hnsw.insert(id, vec![id as f32]).unwrap();
        }
        let before = neighbours(&hnsw, 2, 0);
        let removed_node = node_id_of(&hnsw, 2);

        assert!(hnsw.remove(&2));
        assert!(!hnsw.remove(&2));
        assert!(!hnsw.contains(&2));
        assert_eq!(hnsw.get(&2), None);
        assert_eq!(hnsw.size(), 4);

        let arena = hnsw.arena.read();
        let node = arena.node(removed_node).unwrap();
        assert!(node.is_deleted());
        assert_eq!(node.neighbours_at(LayerIndex(0)).to_vec(), before);
    }

    #[test]
    fn test_removed_item_can_be_added_again() {
        let hnsw = removable(1, 10);
        hnsw.insert(7, vec![7.0]).unwrap();
        assert!(hnsw.remove(&7));
        assert!(hnsw.insert(7, vec![7.0]).unwrap());
        assert_eq!(hnsw.size(), 1);
        assert_eq!(hnsw.search(&[7.0], 1).unwrap()[0].id, 7);
        assert_eq!(hnsw.items().len(), 1);
    }

    #[test]
    fn test_search_walks_through_deleted_bridge() {
        // removed nodes are still expanded, they only never show up in results
        let hnsw = removable(1, 10);
        hnsw.insert(0, vec![0.0]).unwrap();
        hnsw.insert(1, vec![1.0]).unwrap();
        hnsw.insert(2, vec![2.0]).unwrap();
        assert!(hnsw.remove(&1));

        let found: Vec<u64> = hnsw
            .search(&[1.0], 3)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&0) && found.contains(&2));
    }

    #[test]
    fn test_insert_after_entry_point_removed() {
        let hnsw = removable(1, 64);
        for id in 0..20u64 {
            hnsw.insert(id, vec![id as f32]).unwrap();
        }
        let entry = {
            let arena = hnsw.arena.read();
            let entry_point = hnsw.graph.lock().entry_point.unwrap();
            arena.node(entry_point).unwrap().item.id
        };
        assert!(hnsw.remove(&entry));

        for id in 20..40u64 {
            hnsw.insert(id, vec![id as f32]).unwrap();
        }
        assert_eq!(hnsw.size(), 39);
        assert_hnsw_invariants(&hnsw);
        for id in 20..40u64 {
            assert_eq!(hnsw.search(&[id as f32], 1).unwrap()[0].id, id);
        }
        assert!(
            hnsw.search(&[entry as f32], 5)
                .unwrap()
                .iter()
                .all(|r| r.id != entry)
        );
    }

    #[test]
    fn test_connection_limits_and_invariants() {
        let config = HnswConfig::new(2, 500).maximum_connections(4);
        let hnsw = Hnsw::new(config, Distance::Euclidean).unwrap();
        for id in 0..400u64 {
            let angle = id as f32 * 0.37;
            hnsw.insert(id, vec![angle.cos() * id as f32, angle.sin() * id as f32])
                .unwrap();
        }
        assert_hnsw_invariants(&hnsw);
    }

    #[test]
    fn test_ef_construction_raised_to_m() {
        let config = HnswConfig::new(2, 10)
            .maximum_connections(16)
            .ef_construction(4);
        let hnsw: Hnsw<u64, _> = Hnsw::new(config, Distance::Euclidean).unwrap();
        assert_eq!(hnsw.config().ef_construction, 16);

        hnsw.set_ef(0);
        assert_eq!(hnsw.ef(), 1);
    }

    #[test]
    fn test_select_neighbours_prefers_outlier_over_cluster() {
        let hnsw = hnsw(2, 10);
        let points: [(u64, [f32; 2]); 5] = [
            (1, [1.0, 0.0]),
            (2, [1.0, 0.1]),
            (3, [1.0, -0.1]),
            (4, [1.0, 0.2]),
            (5, [-2.0, 0.0]),
        ];
        for (id, point) in points {
            hnsw.insert(id, point.to_vec()).unwrap();
        }
        let reference = [0.0, 0.0];
        let candidates: Vec<OrderedNode> = points
            .iter()
            .map(|(id, point)| {
                OrderedNode::new(node_id_of(&hnsw, *id), euclid(&reference, point))
            })
            .collect();

        let arena = hnsw.arena.read();
        let selected: Vec<NodeId> = hnsw
            .select_neighbours(&arena, candidates, 2)
            .into_iter()
            .map(|c| c.id)
            .collect();
        drop(arena);

        // naive top-2 would return the two closest cluster members
        assert_eq!(selected, vec![node_id_of(&hnsw, 1), node_id_of(&hnsw, 5)]);
    }

    #[test]
    fn test_select_neighbours_small_pool_untouched() {
        let hnsw = hnsw(2, 10);
        hnsw.insert(1, vec![1.0, 0.0]).unwrap();
        hnsw.insert(2, vec![1.0, 0.1]).unwrap();
        let candidates = vec![
            OrderedNode::new(node_id_of(&hnsw, 2), 1.005),
            OrderedNode::new(node_id_of(&hnsw, 1), 1.0),
        ];
        let arena = hnsw.arena.read();
        let selected = hnsw.select_neighbours(&arena, candidates.clone(), 3);
        assert_eq!(selected, candidates);
    }

    fn euclid(a: &[f32], b: &[f32]) -> f32 {
        Distance::Euclidean.distance(a, b)
    }

    #[test]
    fn test_string_ids() {
        let hnsw: Hnsw<String, _> =
            Hnsw::new(HnswConfig::new(2, 10), Distance::Cosine).unwrap();
        hnsw.insert("north".to_string(), vec![0.0, 1.0]).unwrap();
        hnsw.insert("east".to_string(), vec![1.0, 0.0]).unwrap();
        hnsw.insert("north-east".to_string(), vec![1.0, 1.0]).unwrap();

        let found = hnsw.neighbors_of(&"north".to_string(), 1).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "north-east");
    }

    #[test]
    fn test_custom_distance_closure() {
        let manhattan = |a: &[f32], b: &[f32]| -> f32 {
            a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
        };
        let hnsw: Hnsw<u32, _> = Hnsw::new(HnswConfig::new(2, 10), manhattan).unwrap();
        hnsw.insert(1, vec![0.0, 0.0]).unwrap();
        hnsw.insert(2, vec![3.0, 3.0]).unwrap();
        let found = hnsw.search(&[1.0, 1.0], 2).unwrap();
        assert_eq!(found[0].id, 1);
        assert_eq!(found[0].distance, 2.0);
        assert_eq!(found[1].distance, 4.0);
    }
}
