//! Shard orchestration: routing, fan-out search, residency, persistence.
//!
//! A [`ShardManager`] fronts many single-shard [`HnswIndex`]es. Inserts go
//! to the active shard, which splits once it reaches
//! `max_vectors_per_shard`; searches fan out across every shard and merge
//! the per-shard top-k with a stable min-heap. Shards are pulled from a
//! pluggable [`ShardStore`] on demand and held resident under an LRU bound,
//! with dirty shards written back before eviction.
//!
//! The manager is a single logical writer: methods take `&mut self` and
//! suspend only at store calls and the joins used to parallelize loads and
//! flushes.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::sync::Arc;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::config;
use crate::error::{Error, Result};
use crate::hnsw::graph::{HnswConfig, HnswIndex};
use crate::storage::codec;
use crate::storage::store::ShardStore;

/// Configuration for a [`ShardManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Vector dimension. May be omitted when opening against a store that
    /// already holds shards (the dimension is then read from them), or
    /// when it should be adopted from the first inserted vector.
    pub dim: Option<usize>,
    /// Configuration applied to every shard index.
    pub hnsw: HnswConfig,
    /// Vectors routed into one shard before a new one is opened.
    pub max_vectors_per_shard: usize,
    /// Bound on concurrently resident shards.
    pub max_loaded_shards: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            dim: None,
            hnsw: HnswConfig::default(),
            max_vectors_per_shard: config::DEFAULT_MAX_VECTORS_PER_SHARD,
            max_loaded_shards: config::DEFAULT_MAX_LOADED_SHARDS,
        }
    }
}

impl ManagerConfig {
    /// Creates a config with a known dimension and defaults elsewhere.
    #[must_use]
    pub fn with_dim(dim: usize) -> Self {
        Self {
            dim: Some(dim),
            ..Self::default()
        }
    }
}

/// Per-search options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Beam width override; values below `k` are raised to `k`.
    pub ef_search: Option<usize>,
    /// Attach the stored vector to each hit.
    pub include_vectors: bool,
}

/// One merged search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// External id of the matched vector.
    pub id: String,
    /// Distance to the query (lower = more similar).
    pub distance: f32,
    /// The stored vector, when [`SearchOptions::include_vectors`] was set.
    pub vector: Option<Vec<f32>>,
}

/// A shard held in memory.
#[derive(Debug)]
struct Resident {
    index: HnswIndex,
    dirty: bool,
    last_access: u64,
}

fn shard_key(n: usize) -> String {
    format!("shard-{n:06}")
}

fn is_shard_key(key: &str) -> bool {
    key.len() == 12
        && key.starts_with("shard-")
        && key.as_bytes()[6..].iter().all(u8::is_ascii_digit)
}

/// Orchestrator over many shard indexes with bounded residency.
#[derive(Debug)]
pub struct ShardManager {
    cfg: ManagerConfig,
    store: Option<Arc<dyn ShardStore>>,
    /// Every shard key ever created, in creation order.
    shard_keys: Vec<String>,
    resident: HashMap<String, Resident>,
    /// Global external id → owning shard key.
    ext_to_shard: HashMap<String, String>,
    active: Option<String>,
    /// Vectors counted against the active shard's split threshold.
    active_count: usize,
    live_count: usize,
    tick: u64,
}

impl ShardManager {
    /// Creates a manager with no backing store. Every shard stays resident
    /// and nothing persists; `max_loaded_shards` is not enforced because
    /// eviction would lose data.
    #[must_use]
    pub fn new(cfg: ManagerConfig) -> Self {
        Self {
            cfg,
            store: None,
            shard_keys: Vec::new(),
            resident: HashMap::new(),
            ext_to_shard: HashMap::new(),
            active: None,
            active_count: 0,
            live_count: 0,
            tick: 0,
        }
    }

    /// Creates a manager over a store without loading anything yet.
    #[must_use]
    pub fn with_store(cfg: ManagerConfig, store: Arc<dyn ShardStore>) -> Self {
        let mut mgr = Self::new(cfg);
        mgr.store = Some(store);
        mgr
    }

    /// Opens a manager: with a store, existing shards are enumerated and
    /// loaded; without one, a fresh in-memory collection is created.
    ///
    /// # Errors
    ///
    /// [`Error::NotOpenable`] when neither a store nor a dimension is
    /// configured; otherwise any store or decode failure from
    /// [`ShardManager::load_from_storage`].
    pub async fn open(cfg: ManagerConfig, store: Option<Arc<dyn ShardStore>>) -> Result<Self> {
        if store.is_none() && cfg.dim.is_none() {
            return Err(Error::NotOpenable);
        }
        let mut mgr = Self::new(cfg);
        mgr.store = store;
        if mgr.store.is_some() {
            mgr.load_from_storage().await?;
        }
        Ok(mgr)
    }

    /// Number of live vectors across all shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Returns `true` when no live vectors exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// The collection dimension, once known.
    #[must_use]
    pub fn dim(&self) -> Option<usize> {
        self.cfg.dim
    }

    /// Total number of shards, resident or not.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shard_keys.len()
    }

    /// Number of shards currently resident in memory.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// Bytes held by the resident shard indexes.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.resident.values().map(|r| r.index.memory_usage()).sum()
    }

    /// Inserts a vector under a globally unique external id.
    ///
    /// Routes to the active shard, opening a new shard when the active one
    /// has absorbed `max_vectors_per_shard` inserts.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateId`] if the id is mapped to any shard,
    /// [`Error::DimensionMismatch`] on a wrong-length vector, plus any
    /// store failure triggered by loads or eviction write-backs.
    pub async fn insert(&mut self, ext_id: &str, vector: &[f32]) -> Result<()> {
        if self.ext_to_shard.contains_key(ext_id) {
            return Err(Error::DuplicateId(ext_id.to_string()));
        }
        match self.cfg.dim {
            Some(dim) if dim != vector.len() => {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                })
            }
            None => self.cfg.dim = Some(vector.len()),
            _ => {}
        }

        let key = match self.active.clone() {
            Some(key) if self.active_count < self.cfg.max_vectors_per_shard => key,
            _ => self.create_shard(vector.len()),
        };

        self.ensure_resident(&key).await?;
        let resident = self
            .resident
            .get_mut(&key)
            .ok_or_else(|| Error::ShardNotLoaded(key.clone()))?;
        resident.index.insert(ext_id, vector)?;
        resident.dirty = true;
        self.ext_to_shard.insert(ext_id.to_string(), key);
        self.active_count += 1;
        self.live_count += 1;
        self.evict().await
    }

    /// Searches all shards and merges the per-shard top-k.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] on a wrong-length query, and any store
    /// or decode failure from loading non-resident shards.
    pub async fn search(
        &mut self,
        query: &[f32],
        k: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        self.search_filtered(query, k, options, &|_: &str| true)
            .await
    }

    /// Fan-out search with an external-id predicate.
    ///
    /// Non-resident shards are read from the store in parallel and decoded
    /// before searching; per-shard searches then run over a consistent
    /// snapshot of the shard list. Results merge through a min-heap keyed
    /// by distance with ties broken by heap insertion order, which makes
    /// cross-shard ordering deterministic.
    ///
    /// # Errors
    ///
    /// See [`ShardManager::search`].
    pub async fn search_filtered<F>(
        &mut self,
        query: &[f32],
        k: usize,
        options: &SearchOptions,
        filter: &F,
    ) -> Result<Vec<SearchHit>>
    where
        F: Fn(&str) -> bool,
    {
        if let Some(dim) = self.cfg.dim {
            if query.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: query.len(),
                });
            }
        }
        if k == 0 || self.shard_keys.is_empty() {
            return Ok(Vec::new());
        }

        let keys = self.shard_keys.clone();
        self.load_missing(&keys).await?;

        // Per-shard top-k, merged via (distance, arrival sequence).
        let mut pool: Vec<(crate::hnsw::Neighbor, String)> = Vec::new();
        let mut merge: BinaryHeap<Reverse<(OrderedFloat<f32>, usize)>> = BinaryHeap::new();
        for key in &keys {
            self.tick += 1;
            let resident = self
                .resident
                .get_mut(key)
                .ok_or_else(|| Error::ShardNotLoaded(key.clone()))?;
            resident.last_access = self.tick;
            let hits = resident
                .index
                .search_filtered(query, k, options.ef_search, filter)?;
            for hit in hits {
                let seq = pool.len();
                merge.push(Reverse((OrderedFloat(hit.distance), seq)));
                pool.push((hit, key.clone()));
            }
        }

        let mut out = Vec::with_capacity(k);
        while out.len() < k {
            let Some(Reverse((_, seq))) = merge.pop() else {
                break;
            };
            let (neighbor, owner) = &pool[seq];
            let vector = if options.include_vectors {
                self.resident
                    .get(owner)
                    .and_then(|r| r.index.get_vector(&neighbor.id))
                    .map(<[f32]>::to_vec)
            } else {
                None
            };
            out.push(SearchHit {
                id: neighbor.id.clone(),
                distance: neighbor.distance,
                vector,
            });
        }

        self.evict().await?;
        Ok(out)
    }

    /// Tombstones a vector wherever it lives. Returns `false` for unknown
    /// ids.
    ///
    /// # Errors
    ///
    /// Store or decode failures when the owning shard must be loaded.
    pub async fn delete(&mut self, ext_id: &str) -> Result<bool> {
        let Some(key) = self.ext_to_shard.get(ext_id).cloned() else {
            return Ok(false);
        };
        self.ensure_resident(&key).await?;
        let resident = self
            .resident
            .get_mut(&key)
            .ok_or_else(|| Error::ShardNotLoaded(key.clone()))?;
        self.tick += 1;
        resident.last_access = self.tick;
        let removed = resident.index.delete(ext_id);
        if removed {
            resident.dirty = true;
            self.ext_to_shard.remove(ext_id);
            self.live_count -= 1;
        }
        self.evict().await?;
        Ok(removed)
    }

    /// Encodes and writes every dirty resident shard, clearing its dirty
    /// flag on acknowledged writes. Writes for distinct shards proceed in
    /// parallel. Without a store this is a no-op.
    ///
    /// Note: the shard image carries no tombstones, so flushing a shard
    /// with deletions resurrects them on the next load. Run
    /// [`ShardManager::compact`] first when deletions must persist.
    ///
    /// # Errors
    ///
    /// The first write failure is surfaced; shards whose write did not
    /// acknowledge keep their dirty flag, so a retry is safe.
    pub async fn flush(&mut self) -> Result<()> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        let images: Vec<(String, Vec<u8>)> = self
            .resident
            .iter()
            .filter(|(_, r)| r.dirty)
            .map(|(key, r)| (key.clone(), codec::encode(&r.index)))
            .collect();
        if images.is_empty() {
            return Ok(());
        }

        let mut writes: JoinSet<(String, io::Result<()>)> = JoinSet::new();
        for (key, bytes) in images {
            let store = Arc::clone(&store);
            writes.spawn(async move {
                let result = store.write(&key, &bytes).await;
                (key, result)
            });
        }

        let mut first_err: Option<Error> = None;
        while let Some(joined) = writes.join_next().await {
            let (key, result) = joined.map_err(|e| Error::Storage(io::Error::other(e)))?;
            match result {
                Ok(()) => {
                    if let Some(resident) = self.resident.get_mut(&key) {
                        resident.dirty = false;
                    }
                    tracing::debug!(shard = %key, "flushed shard");
                }
                Err(e) => {
                    tracing::warn!(shard = %key, error = %e, "shard flush failed");
                    if first_err.is_none() {
                        first_err = Some(e.into());
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rebuilds every shard without tombstones, loading shards as needed.
    /// Shards are marked dirty but not flushed.
    ///
    /// # Errors
    ///
    /// Store or decode failures from loading, or write failures from
    /// eviction write-backs.
    pub async fn compact(&mut self) -> Result<()> {
        let keys = self.shard_keys.clone();
        for key in keys {
            self.ensure_resident(&key).await?;
            if let Some(resident) = self.resident.get_mut(&key) {
                self.tick += 1;
                resident.last_access = self.tick;
                resident.index = resident.index.compact();
                resident.dirty = true;
                if self.active.as_deref() == Some(key.as_str()) {
                    self.active_count = resident.index.len();
                }
            }
            self.evict().await?;
        }
        Ok(())
    }

    /// Flushes dirty shards and drops all resident state.
    ///
    /// # Errors
    ///
    /// Any [`ShardManager::flush`] failure; resident state is kept in that
    /// case so a retry can still write it.
    pub async fn close(&mut self) -> Result<()> {
        self.flush().await?;
        self.resident.clear();
        Ok(())
    }

    /// Rebuilds manager state from the store: enumerates shard keys (the
    /// store's listing order is not trusted; keys sort lexicographically,
    /// which the zero-padded format preserves), decodes every shard to
    /// rebuild the global id map and live count, keeps up to
    /// `max_loaded_shards` resident, and makes the last shard active.
    ///
    /// # Errors
    ///
    /// [`Error::NotOpenable`] without a store; otherwise store read,
    /// decode, or validation failures.
    pub async fn load_from_storage(&mut self) -> Result<()> {
        let Some(store) = self.store.clone() else {
            return Err(Error::NotOpenable);
        };
        let mut keys: Vec<String> = store
            .list()
            .await?
            .into_iter()
            .filter(|k| is_shard_key(k))
            .collect();
        keys.sort();

        self.shard_keys.clear();
        self.resident.clear();
        self.ext_to_shard.clear();
        self.live_count = 0;

        for key in keys {
            let bytes = store
                .read(&key)
                .await?
                .ok_or_else(|| Error::ShardMissing(key.clone()))?;
            let index = codec::decode(&bytes)?;
            if self.cfg.dim.is_none() {
                self.cfg.dim = Some(index.dim());
            }
            for ext in index.ids() {
                self.ext_to_shard.insert(ext.to_string(), key.clone());
            }
            self.live_count += index.len();
            self.tick += 1;
            self.resident.insert(
                key.clone(),
                Resident {
                    index,
                    dirty: false,
                    last_access: self.tick,
                },
            );
            self.shard_keys.push(key);
        }

        self.active = self.shard_keys.last().cloned();
        self.active_count = self
            .active
            .as_ref()
            .and_then(|key| self.resident.get(key))
            .map_or(0, |r| r.index.len());
        self.evict().await?;

        tracing::info!(
            shards = self.shard_keys.len(),
            vectors = self.live_count,
            "loaded collection from store"
        );
        Ok(())
    }

    /// Opens a fresh empty shard and makes it the active write target.
    fn create_shard(&mut self, dim: usize) -> String {
        let key = shard_key(self.shard_keys.len());
        self.shard_keys.push(key.clone());
        self.tick += 1;
        self.resident.insert(
            key.clone(),
            Resident {
                index: HnswIndex::new(dim, self.cfg.hnsw.clone()),
                dirty: true,
                last_access: self.tick,
            },
        );
        self.active = Some(key.clone());
        self.active_count = 0;
        tracing::debug!(shard = %key, "opened new active shard");
        key
    }

    /// Makes one shard resident, reading it from the store if needed.
    async fn ensure_resident(&mut self, key: &str) -> Result<()> {
        if let Some(resident) = self.resident.get_mut(key) {
            self.tick += 1;
            resident.last_access = self.tick;
            return Ok(());
        }
        let Some(store) = self.store.clone() else {
            return Err(Error::ShardNotLoaded(key.to_string()));
        };
        let bytes = store
            .read(key)
            .await?
            .ok_or_else(|| Error::ShardMissing(key.to_string()))?;
        let index = codec::decode(&bytes)?;
        self.tick += 1;
        self.resident.insert(
            key.to_string(),
            Resident {
                index,
                dirty: false,
                last_access: self.tick,
            },
        );
        Ok(())
    }

    /// Reads all non-resident shards from `keys` in parallel and decodes
    /// them into residency.
    async fn load_missing(&mut self, keys: &[String]) -> Result<()> {
        let missing: Vec<String> = keys
            .iter()
            .filter(|key| !self.resident.contains_key(*key))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let Some(store) = self.store.clone() else {
            return Err(Error::ShardNotLoaded(missing[0].clone()));
        };

        let mut reads: JoinSet<(String, io::Result<Option<Vec<u8>>>)> = JoinSet::new();
        for key in missing {
            let store = Arc::clone(&store);
            reads.spawn(async move {
                let result = store.read(&key).await;
                (key, result)
            });
        }
        while let Some(joined) = reads.join_next().await {
            let (key, result) = joined.map_err(|e| Error::Storage(io::Error::other(e)))?;
            let bytes = result?.ok_or_else(|| Error::ShardMissing(key.clone()))?;
            let index = codec::decode(&bytes)?;
            self.tick += 1;
            self.resident.insert(
                key,
                Resident {
                    index,
                    dirty: false,
                    last_access: self.tick,
                },
            );
        }
        Ok(())
    }

    /// Evicts least-recently-used shards until the residency bound holds.
    /// The active write shard is never evicted; dirty victims are written
    /// back first when a store is configured.
    async fn evict(&mut self) -> Result<()> {
        if self.store.is_none() {
            // Nothing to reload evicted shards from; keep everything.
            return Ok(());
        }
        while self.resident.len() > self.cfg.max_loaded_shards {
            let victim = self
                .resident
                .iter()
                .filter(|(key, _)| self.active.as_deref() != Some(key.as_str()))
                .min_by_key(|(_, r)| r.last_access)
                .map(|(key, _)| key.clone());
            let Some(key) = victim else {
                break;
            };
            if let Some(resident) = self.resident.get(&key) {
                if resident.dirty {
                    if let Some(store) = self.store.clone() {
                        let bytes = codec::encode(&resident.index);
                        store.write(&key, &bytes).await?;
                    }
                }
            }
            self.resident.remove(&key);
            tracing::debug!(shard = %key, "evicted shard");
        }
        Ok(())
    }
}
