//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] defines tuning parameters (M, ef_construction, ef_search,
//! distance metric, level multiplier, seed). [`HnswIndex`] stores the graph
//! in flat parallel arrays for cache efficiency: one contiguous f32 arena
//! for vectors and, per layer, one contiguous `u32` adjacency buffer of
//! `capacity × max_neighbors` entries where empty slots hold [`SENTINEL`].
//!
//! Nodes reference each other by dense 32-bit internal ids; there are no
//! per-node heap objects, which also makes encoding a shard close to a
//! straight memory copy.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro128StarStar;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::hnsw::distance::{compute_norm, dot, euclidean_sq, DistanceMetric};
use crate::hnsw::search::SearchScratch;
use crate::hnsw::visited::Bitset;

/// Reserved internal id marking an empty adjacency slot.
///
/// `0xFFFFFFFF` can never be a valid internal id.
pub const SENTINEL: u32 = u32::MAX;

/// Configuration parameters for an HNSW index.
///
/// Controls the trade-off between build speed, search speed, recall, and
/// memory usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Number of bidirectional links per node above layer 0 (the `M`
    /// parameter).
    pub m: usize,
    /// Maximum links per node at layer 0. Defaults to `2 * m`.
    pub m_max0: Option<usize>,
    /// Candidate list size during index construction.
    pub ef_construction: usize,
    /// Default candidate list size during search (higher = better recall,
    /// slower).
    pub ef_search: usize,
    /// Distance function for similarity computation.
    pub metric: DistanceMetric,
    /// Level-generation multiplier. Defaults to `1 / ln(m)`.
    pub m_l: Option<f64>,
    /// Enable diversity-aware neighbor selection.
    pub use_heuristic: bool,
    /// When heuristic selection leaves slots, fill them from the discarded
    /// candidates.
    pub keep_pruned_connections: bool,
    /// PRNG seed for layer assignment. With a fixed seed, a fixed insert
    /// order produces a byte-identical graph.
    pub seed: Option<u32>,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            m_max0: None,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::HNSW_DEFAULT_EF_SEARCH,
            metric: DistanceMetric::Euclidean,
            m_l: None,
            use_heuristic: true,
            keep_pruned_connections: true,
            seed: None,
        }
    }
}

impl HnswConfig {
    /// Creates a configuration with the given metric and defaults for
    /// everything else.
    #[must_use]
    pub fn with_metric(metric: DistanceMetric) -> Self {
        Self {
            metric,
            ..Self::default()
        }
    }
}

/// One layer of adjacency: a flat `capacity × max_neighbors` buffer of
/// internal ids plus a per-node count of the live prefix.
#[derive(Debug, Clone)]
pub(crate) struct LayerAdjacency {
    pub(crate) max_neighbors: usize,
    /// `capacity * max_neighbors` entries; unused slots hold [`SENTINEL`].
    pub(crate) links: Vec<u32>,
    /// Number of live neighbors per node.
    pub(crate) counts: Vec<u8>,
}

impl LayerAdjacency {
    pub(crate) fn new(max_neighbors: usize, capacity: usize) -> Self {
        Self {
            max_neighbors,
            links: vec![SENTINEL; capacity * max_neighbors],
            counts: vec![0u8; capacity],
        }
    }

    fn grow(&mut self, capacity: usize) {
        self.links.resize(capacity * self.max_neighbors, SENTINEL);
        self.counts.resize(capacity, 0);
    }

    fn shrink(&mut self, capacity: usize) {
        self.links.truncate(capacity * self.max_neighbors);
        self.links.shrink_to_fit();
        self.counts.truncate(capacity);
        self.counts.shrink_to_fit();
    }

    /// The full adjacency row of a node, SENTINEL padding included.
    #[inline]
    pub(crate) fn row(&self, node: u32) -> &[u32] {
        let base = node as usize * self.max_neighbors;
        &self.links[base..base + self.max_neighbors]
    }

    /// The live neighbors of a node (non-SENTINEL prefix).
    #[inline]
    pub(crate) fn neighbors(&self, node: u32) -> &[u32] {
        let base = node as usize * self.max_neighbors;
        &self.links[base..base + self.counts[node as usize] as usize]
    }

    /// Overwrites a node's row with `ids`, padding the rest with SENTINEL.
    pub(crate) fn set_neighbors(&mut self, node: u32, ids: &[u32]) {
        debug_assert!(ids.len() <= self.max_neighbors);
        let base = node as usize * self.max_neighbors;
        let row = &mut self.links[base..base + self.max_neighbors];
        row[..ids.len()].copy_from_slice(ids);
        row[ids.len()..].fill(SENTINEL);
        self.counts[node as usize] = ids.len() as u8;
    }

    /// Appends one neighbor to a node's row. The caller must have checked
    /// that the row has room.
    pub(crate) fn push_neighbor(&mut self, node: u32, neighbor: u32) {
        let len = self.counts[node as usize] as usize;
        debug_assert!(len < self.max_neighbors);
        self.links[node as usize * self.max_neighbors + len] = neighbor;
        self.counts[node as usize] = (len + 1) as u8;
    }
}

/// Point-in-time statistics for an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of live (non-tombstoned) vectors.
    pub len: usize,
    /// Number of slots ever allocated, tombstoned included.
    pub count: usize,
    /// Number of tombstoned slots.
    pub deleted: usize,
    /// Allocated slot capacity.
    pub capacity: usize,
    /// Layer index of the entry point, or -1 when empty.
    pub max_level: i32,
    /// Bytes held by the vector, norm, level, and adjacency arrays.
    pub memory_bytes: usize,
}

/// A single-shard HNSW index over fixed-dimensional f32 vectors.
///
/// Synchronous and single-threaded by design: search scratch (the visited
/// set and both candidate heaps) is pooled inside the index, so methods
/// that traverse the graph take `&mut self` and the borrow checker rules
/// out concurrent searches on one index.
///
/// Deletion is tombstone-only; edges into tombstoned nodes are kept so the
/// graph stays traversable, and search filters tombstones when emitting
/// results. [`HnswIndex::compact`] rebuilds without tombstones.
#[derive(Debug)]
pub struct HnswIndex {
    pub(crate) config: HnswConfig,
    pub(crate) dim: usize,
    /// Slots ever allocated, tombstoned included.
    pub(crate) count: usize,
    pub(crate) deleted_count: usize,
    pub(crate) capacity: usize,
    /// Flat `capacity × dim` vector arena.
    pub(crate) vectors: Vec<f32>,
    /// Per-slot L2 norms; populated only for the cosine metric.
    pub(crate) norms: Vec<f32>,
    /// Top layer of each slot.
    pub(crate) levels: Vec<u8>,
    /// Per-layer adjacency; `layers[0]` uses `m_max0`, the rest use `m`.
    pub(crate) layers: Vec<LayerAdjacency>,
    /// Tombstone flags.
    pub(crate) deleted: Bitset,
    pub(crate) ext_to_int: HashMap<String, u32>,
    /// Slot → external id, tombstoned slots included until compaction.
    pub(crate) int_to_ext: Vec<String>,
    pub(crate) entry_point: Option<u32>,
    /// Layer of the entry point; meaningful only when `entry_point` is set.
    pub(crate) max_level: usize,
    pub(crate) m_max0: usize,
    pub(crate) level_mult: f64,
    rng: Xoshiro128StarStar,
    pub(crate) scratch: SearchScratch,
}

impl HnswIndex {
    /// Creates a new empty index with the given dimension and configuration.
    #[must_use]
    pub fn new(dim: usize, config: HnswConfig) -> Self {
        let m_max0 = config.m_max0.unwrap_or(config.m * 2);
        let level_mult = config
            .m_l
            .unwrap_or_else(|| 1.0 / (config.m as f64).ln());
        let seed = config
            .seed
            .map_or_else(rand::random::<u64>, u64::from);

        Self {
            config,
            dim,
            count: 0,
            deleted_count: 0,
            capacity: 0,
            vectors: Vec::new(),
            norms: Vec::new(),
            levels: Vec::new(),
            layers: vec![LayerAdjacency::new(m_max0, 0)],
            deleted: Bitset::new(0),
            ext_to_int: HashMap::new(),
            int_to_ext: Vec::new(),
            entry_point: None,
            max_level: 0,
            m_max0,
            level_mult,
            rng: Xoshiro128StarStar::seed_from_u64(seed),
            scratch: SearchScratch::default(),
        }
    }

    /// Creates a new empty index with default configuration.
    #[must_use]
    pub fn with_default_config(dim: usize) -> Self {
        Self::new(dim, HnswConfig::default())
    }

    /// Number of live (non-tombstoned) vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count - self.deleted_count
    }

    /// Returns `true` if the index holds no live vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured dimension.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The configured distance metric.
    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    /// The index configuration.
    #[must_use]
    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Number of slots ever allocated, tombstoned included.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.count
    }

    /// Number of tombstoned slots.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.deleted_count
    }

    /// Allocated slot capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` if a live vector with this external id exists.
    #[must_use]
    pub fn contains(&self, ext_id: &str) -> bool {
        self.ext_to_int
            .get(ext_id)
            .is_some_and(|&id| !self.deleted.contains(id as usize))
    }

    /// Returns the stored vector for a live external id.
    #[must_use]
    pub fn get_vector(&self, ext_id: &str) -> Option<&[f32]> {
        let &id = self.ext_to_int.get(ext_id)?;
        if self.deleted.contains(id as usize) {
            return None;
        }
        Some(self.vector(id))
    }

    /// Iterates the external ids of all live vectors.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.int_to_ext
            .iter()
            .enumerate()
            .filter(|(slot, _)| !self.deleted.contains(*slot))
            .map(|(_, ext)| ext.as_str())
    }

    /// Tombstones a vector. Returns `false` if the id is unknown or already
    /// tombstoned. Graph edges are untouched; reclaim storage with
    /// [`HnswIndex::compact`].
    pub fn delete(&mut self, ext_id: &str) -> bool {
        let Some(&id) = self.ext_to_int.get(ext_id) else {
            return false;
        };
        if self.deleted.contains(id as usize) {
            return false;
        }
        self.deleted.set(id as usize);
        self.deleted_count += 1;
        true
    }

    /// Bytes held by the vector, norm, level, and adjacency arrays.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let mut total = self.vectors.len() * 4 + self.norms.len() * 4 + self.levels.len();
        for layer in &self.layers {
            total += layer.links.len() * 4 + layer.counts.len();
        }
        total
    }

    /// Point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            len: self.len(),
            count: self.count,
            deleted: self.deleted_count,
            capacity: self.capacity,
            max_level: self.entry_point.map_or(-1, |_| self.max_level as i32),
            memory_bytes: self.memory_usage(),
        }
    }

    /// Rebuilds a fresh index containing only the live vectors, reinserted
    /// in internal-id order. The rebuild is deterministic under a fixed
    /// configured seed. The caller replaces the old index with the result.
    #[must_use]
    pub fn compact(&self) -> HnswIndex {
        let mut fresh = HnswIndex::new(self.dim, self.config.clone());
        for slot in 0..self.count {
            if self.deleted.contains(slot) {
                continue;
            }
            let ext = self.int_to_ext[slot].clone();
            fresh.insert_unchecked(&ext, self.vector(slot as u32));
        }
        fresh
    }

    /// Reallocates every backing buffer so `capacity == count` (or 1 when
    /// empty). The tombstone bitset and pooled search scratch are resized
    /// with everything else so a later grow sees a consistent capacity.
    pub fn shrink_to_fit(&mut self) {
        let target = self.count.max(1);
        self.vectors.truncate(target * self.dim);
        self.vectors.resize(target * self.dim, 0.0);
        self.vectors.shrink_to_fit();
        if self.config.metric.requires_norms() {
            self.norms.truncate(target);
            self.norms.resize(target, 0.0);
            self.norms.shrink_to_fit();
        }
        self.levels.truncate(target);
        self.levels.resize(target, 0);
        self.levels.shrink_to_fit();
        for layer in &mut self.layers {
            layer.shrink(target);
            layer.grow(target);
        }
        self.deleted.resize(target);
        self.scratch.shrink_to(target);
        self.capacity = target;
    }

    /// Grows every backing buffer by 1.5x (minimum one extra slot).
    pub(crate) fn grow(&mut self) {
        let new_cap = (self.capacity * 3).div_ceil(2).max(self.capacity + 1);
        self.vectors.resize(new_cap * self.dim, 0.0);
        if self.config.metric.requires_norms() {
            self.norms.resize(new_cap, 0.0);
        }
        self.levels.resize(new_cap, 0);
        for layer in &mut self.layers {
            layer.grow(new_cap);
        }
        self.deleted.resize(new_cap);
        self.scratch.ensure_visited_capacity(new_cap);
        self.capacity = new_cap;
    }

    /// Makes sure adjacency layers exist up to `level`, each sized to the
    /// current capacity.
    pub(crate) fn ensure_layers(&mut self, level: usize) {
        while self.layers.len() <= level {
            self.layers
                .push(LayerAdjacency::new(self.config.m, self.capacity));
        }
    }

    /// Samples the top layer for a new node: `floor(-ln(u) · mL)` for
    /// uniform `u` in (0, 1].
    pub(crate) fn sample_level(&mut self) -> usize {
        let u: f64 = 1.0 - self.rng.random::<f64>();
        let level = (-u.ln() * self.level_mult) as usize;
        level.min(config::HNSW_MAX_LAYERS - 1)
    }

    /// Maximum neighbors per node at the given layer.
    #[inline]
    pub(crate) fn max_neighbors(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.config.m
        }
    }

    /// The stored vector at an internal slot.
    #[inline]
    pub(crate) fn vector(&self, id: u32) -> &[f32] {
        let base = id as usize * self.dim;
        &self.vectors[base..base + self.dim]
    }

    /// Precomputed norm of a query, for metrics that need one.
    #[inline]
    pub(crate) fn query_norm(&self, query: &[f32]) -> f32 {
        if self.config.metric.requires_norms() {
            compute_norm(query)
        } else {
            0.0
        }
    }

    /// Distance from a query vector to a stored slot. For cosine, the
    /// caller supplies the query norm and the slot norm comes from the
    /// cache.
    #[inline]
    pub(crate) fn distance_to_slot(&self, query: &[f32], query_norm: f32, slot: u32) -> f32 {
        let stored = self.vector(slot);
        match self.config.metric {
            DistanceMetric::Euclidean => euclidean_sq(query, stored),
            DistanceMetric::InnerProduct => -dot(query, stored),
            DistanceMetric::Cosine => {
                let denom = query_norm * self.norms[slot as usize];
                if denom == 0.0 {
                    1.0
                } else {
                    1.0 - dot(query, stored) / denom
                }
            }
        }
    }

    /// Distance between two stored slots.
    #[inline]
    pub(crate) fn distance_between(&self, a: u32, b: u32) -> f32 {
        match self.config.metric {
            DistanceMetric::Euclidean => euclidean_sq(self.vector(a), self.vector(b)),
            DistanceMetric::InnerProduct => -dot(self.vector(a), self.vector(b)),
            DistanceMetric::Cosine => {
                let denom = self.norms[a as usize] * self.norms[b as usize];
                if denom == 0.0 {
                    1.0
                } else {
                    1.0 - dot(self.vector(a), self.vector(b)) / denom
                }
            }
        }
    }

    /// Validates structural invariants: parallel array lengths, symmetric
    /// id mappings, entry point and neighbor ids in bounds, neighbor-count
    /// prefixes followed only by SENTINEL, no duplicate edges.
    ///
    /// Run after deserialization and in tests; the mutation paths maintain
    /// these invariants by construction.
    pub fn validate(&self) -> Result<(), String> {
        if self.vectors.len() != self.capacity * self.dim {
            return Err(format!(
                "vectors length {} != capacity({}) * dim({})",
                self.vectors.len(),
                self.capacity,
                self.dim
            ));
        }
        if self.config.metric.requires_norms() && self.norms.len() != self.capacity {
            return Err(format!(
                "norms length {} != capacity {}",
                self.norms.len(),
                self.capacity
            ));
        }
        if self.levels.len() != self.capacity {
            return Err(format!(
                "levels length {} != capacity {}",
                self.levels.len(),
                self.capacity
            ));
        }
        if self.count > self.capacity {
            return Err(format!("count {} > capacity {}", self.count, self.capacity));
        }
        if self.deleted_count > self.count {
            return Err(format!(
                "deleted_count {} > count {}",
                self.deleted_count, self.count
            ));
        }
        if self.int_to_ext.len() != self.count {
            return Err(format!(
                "int_to_ext length {} != count {}",
                self.int_to_ext.len(),
                self.count
            ));
        }
        if self.ext_to_int.len() != self.count {
            return Err(format!(
                "ext_to_int length {} != count {}",
                self.ext_to_int.len(),
                self.count
            ));
        }
        for (slot, ext) in self.int_to_ext.iter().enumerate() {
            if self.ext_to_int.get(ext) != Some(&(slot as u32)) {
                return Err(format!("id mapping asymmetric for slot {slot}"));
            }
        }

        match self.entry_point {
            None => {
                if self.count != 0 {
                    return Err("entry_point unset with count > 0".to_string());
                }
            }
            Some(ep) => {
                if ep as usize >= self.count {
                    return Err(format!("entry_point {ep} >= count {}", self.count));
                }
                if usize::from(self.levels[ep as usize]) != self.max_level {
                    return Err(format!(
                        "entry_point level {} != max_level {}",
                        self.levels[ep as usize], self.max_level
                    ));
                }
                let highest = self.levels[..self.count].iter().copied().max().unwrap_or(0);
                if usize::from(highest) != self.max_level {
                    return Err(format!(
                        "max_level {} != highest assigned level {highest}",
                        self.max_level
                    ));
                }
            }
        }

        for (l, layer) in self.layers.iter().enumerate() {
            if layer.counts.len() != self.capacity
                || layer.links.len() != self.capacity * layer.max_neighbors
            {
                return Err(format!("layer {l} arrays inconsistent with capacity"));
            }
            for slot in 0..self.count {
                let row = layer.row(slot as u32);
                let live = layer.counts[slot] as usize;
                if live > layer.max_neighbors {
                    return Err(format!("layer {l} slot {slot} count over max_neighbors"));
                }
                let mut seen = std::collections::HashSet::with_capacity(live);
                for (i, &nb) in row.iter().enumerate() {
                    if i < live {
                        if nb == SENTINEL || nb as usize >= self.count {
                            return Err(format!(
                                "layer {l} slot {slot} neighbor {nb} out of bounds"
                            ));
                        }
                        if !seen.insert(nb) {
                            return Err(format!("layer {l} slot {slot} duplicate neighbor {nb}"));
                        }
                    } else if nb != SENTINEL {
                        return Err(format!(
                            "layer {l} slot {slot} non-SENTINEL entry past count"
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_empty_index() {
        let idx = HnswIndex::with_default_config(128);
        assert_eq!(idx.dim(), 128);
        assert_eq!(idx.len(), 0);
        assert!(idx.is_empty());
        assert_eq!(idx.capacity(), 0);
        assert!(idx.entry_point.is_none());
        assert!(idx.validate().is_ok());
    }

    #[test]
    fn test_capacity_growth_sequence() {
        let mut idx = HnswIndex::with_default_config(4);
        let mut caps = Vec::new();
        for _ in 0..6 {
            idx.grow();
            caps.push(idx.capacity());
        }
        // max(cap + 1, ceil(cap * 1.5)) from zero
        assert_eq!(caps, vec![1, 2, 3, 5, 8, 12]);
        assert_eq!(idx.vectors.len(), 12 * 4);
        assert_eq!(idx.levels.len(), 12);
    }

    #[test]
    fn test_layer_row_sentinel_padding() {
        let mut layer = LayerAdjacency::new(4, 2);
        assert!(layer.row(0).iter().all(|&n| n == SENTINEL));
        layer.set_neighbors(1, &[3, 7]);
        assert_eq!(layer.neighbors(1), &[3, 7]);
        assert_eq!(layer.row(1), &[3, 7, SENTINEL, SENTINEL]);
        layer.push_neighbor(1, 9);
        assert_eq!(layer.neighbors(1), &[3, 7, 9]);
    }

    #[test]
    fn test_delete_is_tombstone_only() {
        let mut idx = HnswIndex::with_default_config(2);
        idx.insert("a", &[0.0, 0.0]).unwrap();
        idx.insert("b", &[1.0, 1.0]).unwrap();
        assert_eq!(idx.len(), 2);

        assert!(idx.delete("a"));
        assert!(!idx.delete("a"), "double delete returns false");
        assert!(!idx.delete("nope"), "unknown id returns false");

        assert_eq!(idx.len(), 1);
        assert_eq!(idx.slot_count(), 2, "slot remains allocated");
        assert!(!idx.contains("a"));
        assert!(idx.get_vector("a").is_none());
        assert!(idx.contains("b"));
        assert!(idx.validate().is_ok());
    }

    #[test]
    fn test_sample_level_distribution() {
        let mut idx = HnswIndex::new(
            4,
            HnswConfig {
                seed: Some(7),
                ..HnswConfig::default()
            },
        );
        let mut zero_levels = 0usize;
        for _ in 0..1000 {
            let level = idx.sample_level();
            assert!(level < config::HNSW_MAX_LAYERS);
            if level == 0 {
                zero_levels += 1;
            }
        }
        // With mL = 1/ln(16), P(level = 0) ≈ 1 - e^{-ln 16} ≈ 0.94
        assert!(zero_levels > 850, "geometric level skew: {zero_levels}");
    }

    #[test]
    fn test_seeded_levels_are_reproducible() {
        let cfg = HnswConfig {
            seed: Some(42),
            ..HnswConfig::default()
        };
        let mut a = HnswIndex::new(4, cfg.clone());
        let mut b = HnswIndex::new(4, cfg);
        let la: Vec<usize> = (0..64).map(|_| a.sample_level()).collect();
        let lb: Vec<usize> = (0..64).map(|_| b.sample_level()).collect();
        assert_eq!(la, lb);
    }

    #[test]
    fn test_compact_drops_tombstones() {
        let mut idx = HnswIndex::new(
            3,
            HnswConfig {
                seed: Some(11),
                ..HnswConfig::default()
            },
        );
        for i in 0..20 {
            idx.insert(&format!("v{i}"), &[i as f32, 0.0, 1.0]).unwrap();
        }
        for i in (0..20).step_by(3) {
            assert!(idx.delete(&format!("v{i}")));
        }
        let before_live = idx.len();

        let fresh = idx.compact();
        assert_eq!(fresh.len(), before_live);
        assert_eq!(fresh.slot_count(), before_live);
        assert_eq!(fresh.deleted_count(), 0);
        assert!(!fresh.contains("v0"));
        assert!(fresh.contains("v1"));
        assert_eq!(fresh.get_vector("v4"), Some(&[4.0, 0.0, 1.0][..]));
        assert!(fresh.validate().is_ok());
    }

    #[test]
    fn test_shrink_to_fit_tightens_capacity() {
        let mut idx = HnswIndex::with_default_config(2);
        for i in 0..7 {
            idx.insert(&format!("v{i}"), &[i as f32, 1.0]).unwrap();
        }
        assert!(idx.capacity() > 7);
        idx.shrink_to_fit();
        assert_eq!(idx.capacity(), 7);
        assert!(idx.validate().is_ok());

        // Still usable after the reallocation
        idx.insert("v7", &[7.0, 1.0]).unwrap();
        assert_eq!(idx.len(), 8);
        assert!(idx.validate().is_ok());
    }

    #[test]
    fn test_shrink_to_fit_empty_index() {
        let mut idx = HnswIndex::with_default_config(2);
        idx.shrink_to_fit();
        assert_eq!(idx.capacity(), 1);
        assert!(idx.validate().is_ok());
    }

    #[test]
    fn test_memory_usage_accounts_all_regions() {
        let mut idx = HnswIndex::with_default_config(8);
        for i in 0..10 {
            idx.insert(&format!("v{i}"), &[i as f32; 8]).unwrap();
        }
        let cap = idx.capacity();
        let mut expected = cap * 8 * 4 + cap; // vectors + levels (euclidean: no norms)
        for layer in &idx.layers {
            expected += cap * layer.max_neighbors * 4 + cap;
        }
        assert_eq!(idx.memory_usage(), expected);
    }

    #[test]
    fn test_cosine_index_tracks_norms() {
        let mut idx = HnswIndex::new(3, HnswConfig::with_metric(DistanceMetric::Cosine));
        idx.insert("a", &[3.0, 4.0, 0.0]).unwrap();
        assert_eq!(idx.norms[0], 5.0);
        assert!(idx.validate().is_ok());
    }

    #[test]
    fn test_ids_skips_tombstones() {
        let mut idx = HnswIndex::with_default_config(1);
        idx.insert("a", &[1.0]).unwrap();
        idx.insert("b", &[2.0]).unwrap();
        idx.insert("c", &[3.0]).unwrap();
        idx.delete("b");
        let ids: Vec<&str> = idx.ids().collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_stats() {
        let mut idx = HnswIndex::with_default_config(2);
        assert_eq!(idx.stats().max_level, -1);
        idx.insert("a", &[0.0, 0.0]).unwrap();
        idx.delete("a");
        let stats = idx.stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.len, 0);
        assert!(stats.max_level >= 0);
        assert_eq!(stats.memory_bytes, idx.memory_usage());
    }
}
