//! # proxima-core
//!
//! Embeddable sharded approximate nearest-neighbor index over
//! fixed-dimensional f32 vectors, built on the Hierarchical Navigable
//! Small World (HNSW) graph.
//!
//! A single-shard [`HnswIndex`] is synchronous, allocation-free on the
//! query path, and stores the graph in flat parallel arrays. The
//! [`ShardManager`] fronts many shards: it routes inserts to the active
//! shard, fans searches out across all shards and merges the top-k, and
//! keeps a bounded set of shards resident against a pluggable key–value
//! [`ShardStore`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use proxima_core::{ManagerConfig, SearchOptions, ShardManager};
//!
//! let mut manager = ShardManager::new(ManagerConfig::with_dim(128));
//! manager.insert("doc-1", &embedding).await?;
//! let hits = manager.search(&query, 10, &SearchOptions::default()).await?;
//! ```

/// Default tuning constants for graph and manager configuration.
pub mod config;
/// Unified error type and result alias.
pub mod error;
/// HNSW approximate nearest neighbor index: graph, search, insertion, and
/// distance metrics.
pub mod hnsw;
/// Storage layer: shard image codec, store contract, and shard manager.
pub mod storage;

pub use error::{Error, Result};
pub use hnsw::{compute_norm, DistanceMetric, HnswConfig, HnswIndex, IndexStats, Neighbor};
pub use storage::{
    FsStore, ManagerConfig, MemoryStore, SearchHit, SearchOptions, ShardManager, ShardStore,
};
