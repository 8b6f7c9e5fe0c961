//! Storage layer: shard image codec, key–value store contract, and the
//! shard manager that orchestrates routing, residency, and persistence.

/// Versioned little-endian shard image: encode, decode, read_header.
pub mod codec;
/// Shard orchestration: routing, fan-out search, LRU residency, flush.
pub mod manager;
/// Key–value store contract plus in-memory and filesystem stores.
pub mod store;

pub use codec::{ShardHeader, FORMAT_VERSION, SHARD_MAGIC};
pub use manager::{ManagerConfig, SearchHit, SearchOptions, ShardManager};
pub use store::{FsStore, MemoryStore, ShardStore};
