//! Global configuration constants for proxima.
//!
//! Default tuning parameters for the HNSW graph and the shard manager are
//! defined here. Runtime configuration is carried by [`crate::HnswConfig`]
//! and [`crate::ManagerConfig`]; these constants supply their defaults.

/// Default number of bidirectional links per HNSW node (the `M` parameter).
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
/// Higher values produce a better graph but slow down build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// Controls the size of the dynamic candidate list during query.
/// Higher values improve recall at the cost of latency.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Maximum number of layers in the HNSW graph.
///
/// Layer assignments above this are clamped. With the default `M` the
/// probability of sampling a level this high is negligible.
pub const HNSW_MAX_LAYERS: usize = 16;

/// Default maximum number of vectors routed into one shard before the
/// manager opens a new active shard.
pub const DEFAULT_MAX_VECTORS_PER_SHARD: usize = 100_000;

/// Default bound on the number of shards held resident in memory at once.
pub const DEFAULT_MAX_LOADED_SHARDS: usize = 4;
