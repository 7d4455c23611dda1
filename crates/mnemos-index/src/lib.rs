//! `mnemos-index` – the index layer under the episode store.
//!
//! # Modules
//!
//! - [`cache`] – [`LruCache`][cache::LruCache]: O(1) recency cache backed by
//!   a slot arena, with proactive eviction under memory pressure.
//! - [`time_index`] – [`TimeIndex`][time_index::TimeIndex]: a B+ tree from
//!   millisecond timestamps to episode-ID lists, with sibling-linked leaves
//!   for range scans and JSON persistence.
//! - [`vector`] – the [`VectorIndex`][vector::VectorIndex] k-NN contract, the
//!   similarity [`Metric`][vector::Metric]s, the portable flat backend, the
//!   optional HNSW backend and startup backend selection.
//! - [`persist`] – atomic file writes and reads with bounded exponential
//!   backoff retries.

pub mod cache;
pub mod persist;
pub mod time_index;
pub mod vector;

pub use cache::{CacheStats, LruCache, MemoryGauge, SystemMemoryGauge};
pub use persist::{PersistError, RetryPolicy};
pub use time_index::{TimeIndex, TimeIndexError, TreeStats};
pub use vector::{
    BackendInfo, BackendKind, BackendPreference, Metric, SearchHit, SharedVectorIndex, VectorError,
    VectorIndex, select_backend,
};
