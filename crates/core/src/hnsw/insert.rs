//! HNSW insertion: layer sampling, descent, linking, and neighbor
//! selection.
//!
//! A new node is connected layer by layer with a beam search of width
//! `ef_construction`, and every chosen neighbor gets a back-edge to the new
//! node. When a back-edge overflows a neighbor's row, selection is rerun
//! over the union and the row rewritten — the neighbor may drop the very
//! node that linked it, which is fine because the inserter keeps its
//! forward edge.
//!
//! Neighbor selection implements the diversity heuristic (Algorithm 4 of
//! the HNSW paper): a candidate is kept only if no already-selected
//! neighbor is closer to it than the query is.

use crate::error::{Error, Result};
use crate::hnsw::graph::HnswIndex;

impl HnswIndex {
    /// Inserts a vector under a new external id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] if the vector length differs
    /// from the index dimension, and [`Error::DuplicateId`] if the external
    /// id is already present (tombstoned ids stay present until
    /// [`HnswIndex::compact`]).
    ///
    /// Both checks run before any state changes, so a failed insert leaves
    /// the index untouched.
    pub fn insert(&mut self, ext_id: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if self.ext_to_int.contains_key(ext_id) {
            return Err(Error::DuplicateId(ext_id.to_string()));
        }
        self.insert_unchecked(ext_id, vector);
        Ok(())
    }

    /// Insertion body; the caller has already validated dimension and id
    /// uniqueness.
    pub(crate) fn insert_unchecked(&mut self, ext_id: &str, vector: &[f32]) {
        if self.count == self.capacity {
            self.grow();
        }
        let id = self.count as u32;
        let base = self.count * self.dim;
        self.vectors[base..base + self.dim].copy_from_slice(vector);
        if self.config.metric.requires_norms() {
            self.norms[self.count] = crate::hnsw::distance::compute_norm(vector);
        }
        let level = self.sample_level();
        self.levels[self.count] = level as u8;
        self.ext_to_int.insert(ext_id.to_string(), id);
        self.int_to_ext.push(ext_id.to_string());
        self.count += 1;
        self.ensure_layers(level);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            return;
        };

        let query_norm = self.query_norm(vector);

        // Phase 1: greedy descent through the layers above the new node's.
        let mut ep = entry;
        for layer in (level + 1..=self.max_level).rev() {
            ep = self.greedy_descend(vector, query_norm, ep, layer);
        }

        // Phase 2: link the new node from its top layer down to 0.
        let mut scratch = std::mem::take(&mut self.scratch);
        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(
                vector,
                query_norm,
                ep,
                self.config.ef_construction,
                layer,
                &mut scratch,
            );
            let max_n = self.max_neighbors(layer);
            let selected = self.select_neighbors(&candidates, max_n);

            let ids: Vec<u32> = selected.iter().map(|&(_, nb)| nb).collect();
            self.layers[layer].set_neighbors(id, &ids);
            for &nb in &ids {
                self.link_back(nb, id, layer);
            }

            // Nearest candidate of this layer seeds the next one down.
            if let Some(&(_, best)) = candidates.first() {
                ep = best;
            }
        }
        self.scratch = scratch;

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }
    }

    /// Selects at most `max_n` neighbors from a distance-ascending
    /// candidate list.
    ///
    /// With `use_heuristic` off this is a plain prefix take. Otherwise a
    /// candidate is kept only when every already-selected neighbor is at
    /// least as far from it as the query is; rejected candidates backfill
    /// remaining slots when `keep_pruned_connections` is on.
    pub(crate) fn select_neighbors(
        &self,
        candidates: &[(f32, u32)],
        max_n: usize,
    ) -> Vec<(f32, u32)> {
        if !self.config.use_heuristic {
            return candidates.iter().take(max_n).copied().collect();
        }

        let mut selected: Vec<(f32, u32)> = Vec::with_capacity(max_n);
        let mut discarded: Vec<(f32, u32)> = Vec::new();
        for &(dist_to_query, cand) in candidates {
            if selected.len() >= max_n {
                break;
            }
            let diverse = selected
                .iter()
                .all(|&(_, sel)| self.distance_between(cand, sel) >= dist_to_query);
            if diverse {
                selected.push((dist_to_query, cand));
            } else {
                discarded.push((dist_to_query, cand));
            }
        }

        if self.config.keep_pruned_connections && selected.len() < max_n {
            for &(dist, cand) in &discarded {
                if selected.len() >= max_n {
                    break;
                }
                if !selected.iter().any(|&(_, sel)| sel == cand) {
                    selected.push((dist, cand));
                }
            }
        }
        selected
    }

    /// Adds the back-edge `node → new_node` at a layer. Re-adding an
    /// existing edge is a no-op. A full row reruns selection over the
    /// union and rewrites the row.
    fn link_back(&mut self, node: u32, new_node: u32, layer: usize) {
        let max_n = self.max_neighbors(layer);
        {
            let current = self.layers[layer].neighbors(node);
            if current.contains(&new_node) {
                return;
            }
            if current.len() < max_n {
                self.layers[layer].push_neighbor(node, new_node);
                return;
            }
        }

        let mut union: Vec<(f32, u32)> = self.layers[layer]
            .neighbors(node)
            .iter()
            .map(|&nb| (self.distance_between(node, nb), nb))
            .collect();
        union.push((self.distance_between(node, new_node), new_node));
        union.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

        let selected = self.select_neighbors(&union, max_n);
        let ids: Vec<u32> = selected.iter().map(|&(_, nb)| nb).collect();
        self.layers[layer].set_neighbors(node, &ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::HnswConfig;

    fn seeded(dim: usize, m: usize) -> HnswIndex {
        HnswIndex::new(
            dim,
            HnswConfig {
                m,
                seed: Some(9),
                ..HnswConfig::default()
            },
        )
    }

    #[test]
    fn test_insert_rejects_wrong_dimension() {
        let mut idx = seeded(3, 16);
        let err = idx.insert("a", &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(idx.len(), 0, "failed insert leaves no state behind");
        assert!(idx.validate().is_ok());
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let mut idx = seeded(2, 16);
        idx.insert("a", &[1.0, 2.0]).unwrap();
        let err = idx.insert("a", &[3.0, 4.0]).unwrap_err();
        assert!(matches!(err, Error::DuplicateId(id) if id == "a"));
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.get_vector("a"), Some(&[1.0, 2.0][..]));
    }

    #[test]
    fn test_tombstoned_id_stays_reserved_until_compact() {
        let mut idx = seeded(2, 16);
        idx.insert("a", &[1.0, 2.0]).unwrap();
        idx.delete("a");
        assert!(matches!(
            idx.insert("a", &[9.0, 9.0]),
            Err(Error::DuplicateId(_))
        ));
        let mut fresh = idx.compact();
        fresh.insert("a", &[9.0, 9.0]).unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_first_insert_becomes_entry_point() {
        let mut idx = seeded(2, 16);
        idx.insert("a", &[1.0, 2.0]).unwrap();
        assert_eq!(idx.entry_point, Some(0));
        assert_eq!(idx.len(), 1);
        assert!(idx.validate().is_ok());
    }

    #[test]
    fn test_links_are_bidirectional_at_insert() {
        let mut idx = seeded(2, 8);
        idx.insert("a", &[0.0, 0.0]).unwrap();
        idx.insert("b", &[1.0, 0.0]).unwrap();
        assert_eq!(idx.layers[0].neighbors(0), &[1]);
        assert_eq!(idx.layers[0].neighbors(1), &[0]);
    }

    #[test]
    fn test_layer0_rows_respect_m_max0() {
        let mut idx = seeded(2, 4);
        for i in 0..100 {
            let angle = i as f32 * 0.063;
            idx.insert(&format!("v{i}"), &[angle.cos(), angle.sin()])
                .unwrap();
        }
        for slot in 0..100u32 {
            assert!(idx.layers[0].neighbors(slot).len() <= 8, "m_max0 = 2*m");
            for layer in &idx.layers[1..] {
                assert!(layer.neighbors(slot).len() <= 4);
            }
        }
        assert!(idx.validate().is_ok());
    }

    #[test]
    fn test_invariants_hold_under_random_inserts() {
        let mut idx = seeded(8, 6);
        for i in 0..250 {
            let v: Vec<f32> = (0..8)
                .map(|j| (((i * 31 + j * 17) % 97) as f32) / 97.0 - 0.5)
                .collect();
            idx.insert(&format!("v{i}"), &v).unwrap();
            if i % 7 == 0 {
                idx.delete(&format!("v{}", i / 2));
            }
        }
        assert!(idx.validate().is_ok(), "{:?}", idx.validate());
        assert_eq!(idx.len(), idx.slot_count() - idx.deleted_count());
    }

    #[test]
    fn test_heuristic_keeps_diverse_neighbors() {
        let idx = {
            let mut idx = seeded(2, 4);
            // Cluster near the origin plus one far point
            idx.insert("c0", &[0.0, 0.0]).unwrap();
            idx.insert("c1", &[0.1, 0.0]).unwrap();
            idx.insert("c2", &[0.0, 0.1]).unwrap();
            idx.insert("far", &[10.0, 10.0]).unwrap();
            idx
        };
        // Candidates sorted by distance to slot 0: the cluster first, the
        // far point last. The heuristic must not fill every slot with
        // near-duplicates of each other when diversity fails.
        let candidates: Vec<(f32, u32)> = [1u32, 2, 3]
            .iter()
            .map(|&nb| (idx.distance_between(0, nb), nb))
            .collect();
        let selected = idx.select_neighbors(&candidates, 2);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].1, 1, "closest candidate always selected");
    }

    #[test]
    fn test_simple_selection_takes_prefix() {
        let mut idx = HnswIndex::new(
            2,
            HnswConfig {
                use_heuristic: false,
                seed: Some(9),
                ..HnswConfig::default()
            },
        );
        idx.insert("a", &[0.0, 0.0]).unwrap();
        let candidates = vec![(0.5, 0u32), (1.0, 0u32), (2.0, 0u32)];
        let selected = idx.select_neighbors(&candidates, 2);
        assert_eq!(selected, vec![(0.5, 0), (1.0, 0)]);
    }

    #[test]
    fn test_back_edge_is_idempotent() {
        let mut idx = seeded(2, 8);
        idx.insert("a", &[0.0, 0.0]).unwrap();
        idx.insert("b", &[1.0, 0.0]).unwrap();
        idx.link_back(0, 1, 0);
        idx.link_back(0, 1, 0);
        assert_eq!(idx.layers[0].neighbors(0), &[1], "no duplicate edge");
        assert!(idx.validate().is_ok());
    }
}
