//! HNSW search: greedy upper descent and bounded best-first beam search.
//!
//! The beam search keeps two priority queues — a min-queue of frontier
//! candidates and a max-queue of the `ef` best results seen — plus a
//! generation-based visited set. All three live in [`SearchScratch`],
//! pooled inside the index so a query allocates nothing. Pooling is why
//! search takes `&mut self`: two concurrent searches would alias the same
//! scratch.
//!
//! Tombstoned nodes are traversed like any other (their edges keep the
//! graph connected) and are filtered only when results are emitted.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hnsw::graph::HnswIndex;
use crate::hnsw::visited::VisitedSet;

/// A single search result: external id and distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// External id of the matched vector.
    pub id: String,
    /// Distance to the query under the index metric (lower = more similar).
    pub distance: f32,
}

/// Pooled per-index search scratch: the visited set and both beam queues.
#[derive(Debug, Default)]
pub struct SearchScratch {
    visited: VisitedSet,
    /// Min-queue of frontier candidates by distance.
    frontier: BinaryHeap<Reverse<(OrderedFloat<f32>, u32)>>,
    /// Max-queue of the current `ef` best results by distance.
    nearest: BinaryHeap<(OrderedFloat<f32>, u32)>,
}

impl SearchScratch {
    pub(crate) fn ensure_visited_capacity(&mut self, cap: usize) {
        self.visited.ensure_capacity(cap);
    }

    pub(crate) fn shrink_to(&mut self, cap: usize) {
        self.visited.shrink_to(cap);
        self.frontier = BinaryHeap::new();
        self.nearest = BinaryHeap::new();
    }
}

impl HnswIndex {
    /// Searches for the `k` nearest live vectors to `query`.
    ///
    /// Returns fewer than `k` results when the index holds fewer live
    /// vectors reachable within the configured beam. An empty index yields
    /// an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the query length differs
    /// from the index dimension.
    pub fn search(&mut self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.search_filtered(query, k, None, &|_: &str| true)
    }

    /// Searches with an optional beam-width override and an external-id
    /// predicate.
    ///
    /// The effective beam width is `max(ef_override or ef_search, k)`: an
    /// override smaller than `k` is silently raised to `k`. Candidates that
    /// are tombstoned or fail `filter` are skipped at emission; they still
    /// participate in graph navigation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the query length differs
    /// from the index dimension.
    pub fn search_filtered<F>(
        &mut self,
        query: &[f32],
        k: usize,
        ef_override: Option<usize>,
        filter: &F,
    ) -> Result<Vec<Neighbor>>
    where
        F: Fn(&str) -> bool,
    {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let Some(mut ep) = self.entry_point else {
            return Ok(Vec::new());
        };
        let query_norm = self.query_norm(query);

        for layer in (1..=self.max_level).rev() {
            ep = self.greedy_descend(query, query_norm, ep, layer);
        }

        let ef = ef_override.unwrap_or(self.config.ef_search).max(k);
        let mut scratch = std::mem::take(&mut self.scratch);
        let candidates = self.search_layer(query, query_norm, ep, ef, 0, &mut scratch);
        self.scratch = scratch;

        let mut out = Vec::with_capacity(k.min(candidates.len()));
        for (distance, id) in candidates {
            if out.len() == k {
                break;
            }
            if self.deleted.contains(id as usize) {
                continue;
            }
            let ext = &self.int_to_ext[id as usize];
            if !filter(ext) {
                continue;
            }
            out.push(Neighbor {
                id: ext.clone(),
                distance,
            });
        }
        Ok(out)
    }

    /// Greedy hill descent within one layer: repeatedly moves to any
    /// neighbor closer to the query until no neighbor improves.
    pub(crate) fn greedy_descend(
        &self,
        query: &[f32],
        query_norm: f32,
        entry: u32,
        layer: usize,
    ) -> u32 {
        let mut best = entry;
        let mut best_dist = self.distance_to_slot(query, query_norm, best);
        loop {
            let mut improved = false;
            for &nb in self.layers[layer].neighbors(best) {
                let d = self.distance_to_slot(query, query_norm, nb);
                if d < best_dist {
                    best = nb;
                    best_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return best;
            }
        }
    }

    /// Beam search within one layer. Returns up to `ef` candidates sorted
    /// by ascending distance, tombstoned nodes included.
    pub(crate) fn search_layer(
        &self,
        query: &[f32],
        query_norm: f32,
        entry: u32,
        ef: usize,
        layer: usize,
        scratch: &mut SearchScratch,
    ) -> Vec<(f32, u32)> {
        scratch.visited.ensure_capacity(self.count);
        scratch.visited.clear();
        scratch.frontier.clear();
        scratch.nearest.clear();

        let entry_dist = self.distance_to_slot(query, query_norm, entry);
        scratch
            .frontier
            .push(Reverse((OrderedFloat(entry_dist), entry)));
        scratch.nearest.push((OrderedFloat(entry_dist), entry));
        scratch.visited.insert(entry);

        while let Some(Reverse((OrderedFloat(dist), node))) = scratch.frontier.pop() {
            let mut worst = scratch.nearest.peek().map_or(f32::MAX, |w| w.0 .0);
            if dist > worst {
                break;
            }
            for &nb in self.layers[layer].neighbors(node) {
                if !scratch.visited.insert(nb) {
                    continue;
                }
                let d = self.distance_to_slot(query, query_norm, nb);
                if scratch.nearest.len() < ef || d < worst {
                    scratch.frontier.push(Reverse((OrderedFloat(d), nb)));
                    scratch.nearest.push((OrderedFloat(d), nb));
                    if scratch.nearest.len() > ef {
                        scratch.nearest.pop();
                    }
                    worst = scratch.nearest.peek().map_or(f32::MAX, |w| w.0 .0);
                }
            }
        }

        let mut results: Vec<(f32, u32)> = scratch
            .nearest
            .drain()
            .map(|(d, id)| (d.0, id))
            .collect();
        results.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));
        results
    }
}
