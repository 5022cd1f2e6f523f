// HNSW graph
// Hierarchical navigable small world graph over unit vectors, cosine distance


use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::debug;

/// Upper bound on node levels; with m >= 2 levels above this are practically unreachable
const MAX_LEVEL: usize = 16;

/// Graph construction and query parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    /// Neighbours kept per node on upper layers; layer 0 keeps twice as many
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    #[inline]
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

impl HnswParams {
    #[inline]
    pub fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 { self.m * 2 } else { self.m }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub(crate) id: i64,
    pub(crate) vector: Vec<f32>,
    pub(crate) level: usize,
    /// `neighbors[layer]` for every layer `0..=level`
    pub(crate) neighbors: Vec<Vec<u32>>,
    pub(crate) deleted: bool,
}

/// Distance usable as a heap key
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedDistance(f32);

impl Eq for OrderedDistance {}

impl PartialOrd for OrderedDistance {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedDistance {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Cosine distance between unit vectors
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    1.0 - dot
}

#[derive(Debug, Clone, PartialEq)]
pub struct HnswGraph {
    pub(crate) dimension: usize,
    pub(crate) params: HnswParams,
    pub(crate) capacity: usize,
    pub(crate) nodes: Vec<Node>,
    /// Live ids only
    pub(crate) id_to_node: HashMap<i64, u32>,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_level: usize,
    pub(crate) rng_state: u64,
}

impl HnswGraph {
    #[inline]
    pub fn new(dimension: usize, capacity: usize, params: HnswParams) -> Self {
        let capacity = capacity.max(1);
        Self {
            dimension,
            params,
            capacity,
            nodes: Vec::with_capacity(capacity),
            id_to_node: HashMap::with_capacity(capacity),
            entry_point: None,
            max_level: 0,
            rng_state: 0x2545_F491_4F6C_DD1D,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn params(&self) -> HnswParams {
        self.params
    }

    #[inline]
    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.params.ef_search = ef_search.max(1);
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live points
    #[inline]
    pub fn len(&self) -> usize {
        self.id_to_node.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.id_to_node.is_empty()
    }

    #[inline]
    pub fn tombstones(&self) -> usize {
        self.nodes.len() - self.id_to_node.len()
    }

    #[inline]
    pub fn contains(&self, id: i64) -> bool {
        self.id_to_node.contains_key(&id)
    }

    /// Stored vector of a live point
    #[inline]
    pub fn vector(&self, id: i64) -> Option<&[f32]> {
        self.id_to_node
            .get(&id)
            .map(|&index| self.nodes[index as usize].vector.as_slice())
    }

    /// Live ids in ascending order
    #[inline]
    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.id_to_node.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Insert a unit vector. An existing point with the same id is replaced.
    #[inline]
    pub fn insert(&mut self, id: i64, vector: Vec<f32>) {
        self.remove(id);
        self.ensure_capacity();

        let level = self.random_level();
        let Ok(node_index) = u32::try_from(self.nodes.len()) else {
            return;
        };
        self.nodes.push(Node {
            id,
            vector,
            level,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });
        self.id_to_node.insert(id, node_index);

        let Some(mut entry) = self.entry_point else {
            self.entry_point = Some(node_index);
            self.max_level = level;
            return;
        };

        let query = self.nodes[node_index as usize].vector.clone();

        for layer in (level + 1..=self.max_level).rev() {
            entry = self.greedy_closest(&query, entry, layer);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates =
                self.search_layer(&query, &[entry], self.params.ef_construction, layer);
            let max_conn = self.params.max_connections(layer);
            let selected: Vec<u32> = candidates
                .iter()
                .map(|&(_, idx)| idx)
                .filter(|&idx| idx != node_index)
                .take(max_conn)
                .collect();

            for &neighbor in &selected {
                self.connect(neighbor, node_index, layer);
            }
            self.nodes[node_index as usize].neighbors[layer] = selected;

            if let Some(&(_, closest)) = candidates.first() {
                entry = closest;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(node_index);
            self.max_level = level;
        }
    }

    /// Tombstone a point. The node stays in the graph for navigation until
    /// tombstones outnumber live points, then the graph is rebuilt without them.
    #[inline]
    pub fn remove(&mut self, id: i64) -> bool {
        let Some(index) = self.id_to_node.remove(&id) else {
            return false;
        };
        self.nodes[index as usize].deleted = true;
        if self.tombstones() > self.len() {
            self.compact();
        }
        true
    }

    /// Rebuild the graph from its live points, dropping every tombstone
    #[inline]
    pub fn compact(&mut self) {
        let dropped = self.tombstones();
        if dropped == 0 {
            return;
        }

        let live: Vec<(i64, Vec<f32>)> = std::mem::take(&mut self.nodes)
            .into_iter()
            .filter(|node| !node.deleted)
            .map(|node| (node.id, node.vector))
            .collect();
        self.nodes.reserve(self.capacity);
        self.id_to_node.clear();
        self.entry_point = None;
        self.max_level = 0;
        for (id, vector) in live {
            self.insert(id, vector);
        }
        debug!(
            "Compacted similarity graph: dropped {} tombstones, {} live points",
            dropped,
            self.len()
        );
    }

    /// Up to `k` live neighbours of `query` by ascending distance
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(i64, f32)> {
        let Some(mut entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 || self.is_empty() {
            return Vec::new();
        }

        for layer in (1..=self.max_level).rev() {
            entry = self.greedy_closest(query, entry, layer);
        }

        let ef = self.params.ef_search.max(k) + self.tombstones();
        self.search_layer(query, &[entry], ef, 0)
            .into_iter()
            .map(|(distance, idx)| (&self.nodes[idx as usize], distance))
            .filter(|(node, _)| !node.deleted)
            .take(k)
            .map(|(node, distance)| (node.id, distance))
            .collect()
    }

    fn ensure_capacity(&mut self) {
        if self.nodes.len() >= self.capacity {
            let new_capacity = self.capacity.saturating_mul(2);
            debug!(
                "Growing similarity index capacity from {} to {}",
                self.capacity, new_capacity
            );
            self.nodes.reserve(new_capacity - self.nodes.len());
            self.capacity = new_capacity;
        }
    }

    fn distance_to(&self, query: &[f32], index: u32) -> f32 {
        cosine_distance(query, &self.nodes[index as usize].vector)
    }

    /// Walk to the closest node on one layer
    fn greedy_closest(&self, query: &[f32], entry: u32, layer: usize) -> u32 {
        let mut current = entry;
        let mut current_distance = self.distance_to(query, current);

        loop {
            let mut improved = false;
            for &neighbor in self.layer_neighbors(current, layer) {
                let distance = self.distance_to(query, neighbor);
                if distance < current_distance {
                    current = neighbor;
                    current_distance = distance;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Best-first search of one layer, returns up to `ef` nodes by ascending distance
    fn search_layer(&self, query: &[f32], entries: &[u32], ef: usize, layer: usize) -> Vec<(f32, u32)> {
        let ef = ef.max(1);
        let mut visited: HashSet<u32> = HashSet::new();
        let mut candidates: BinaryHeap<Reverse<(OrderedDistance, u32)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedDistance, u32)> = BinaryHeap::new();

        for &entry in entries {
            if visited.insert(entry) {
                let distance = OrderedDistance(self.distance_to(query, entry));
                candidates.push(Reverse((distance, entry)));
                results.push((distance, entry));
            }
        }

        while let Some(Reverse((distance, current))) = candidates.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |(d, _)| d.0);
            if distance.0 > worst && results.len() >= ef {
                break;
            }

            for &neighbor in self.layer_neighbors(current, layer) {
                if !visited.insert(neighbor) {
                    continue;
                }
                let neighbor_distance = OrderedDistance(self.distance_to(query, neighbor));
                let worst = results.peek().map_or(f32::INFINITY, |(d, _)| d.0);
                if results.len() < ef || neighbor_distance.0 < worst {
                    candidates.push(Reverse((neighbor_distance, neighbor)));
                    results.push((neighbor_distance, neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results
            .into_sorted_vec()
            .into_iter()
            .map(|(d, idx)| (d.0, idx))
            .collect()
    }

    fn layer_neighbors(&self, index: u32, layer: usize) -> &[u32] {
        self.nodes[index as usize]
            .neighbors
            .get(layer)
            .map_or(&[], Vec::as_slice)
    }

    /// Add `target` to `from`'s neighbour list, pruning to the closest when full
    fn connect(&mut self, from: u32, target: u32, layer: usize) {
        let max_conn = self.params.max_connections(layer);
        let Some(list) = self.nodes[from as usize].neighbors.get(layer) else {
            return;
        };
        if list.contains(&target) {
            return;
        }

        let mut list = list.clone();
        list.push(target);
        if list.len() > max_conn {
            let base = self.nodes[from as usize].vector.clone();
            list.sort_by_cached_key(|&idx| OrderedDistance(self.distance_to(&base, idx)));
            list.truncate(max_conn);
        }
        self.nodes[from as usize].neighbors[layer] = list;
    }

    /// Exponentially distributed level from an xorshift64* stream
    fn random_level(&mut self) -> usize {
        let mut x = self.rng_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng_state = x;
        let sample = x.wrapping_mul(0x2545_F491_4F6C_DD1D);

        // Uniform in (0, 1]
        let uniform = ((sample >> 11) as f64 + 1.0) / (1u64 << 53) as f64;
        let multiplier = 1.0 / (self.params.m.max(2) as f64).ln();
        let level = (-uniform.ln() * multiplier).floor() as usize;
        level.min(MAX_LEVEL)
    }
}
