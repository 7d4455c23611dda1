//! `mnemos-memory` – the episode store and its service surface.
//!
//! Assembles the index, graph and transaction layers into durable,
//! transactional episode memory.
//!
//! # Modules
//!
//! - [`config`] – [`MemoryConfig`][config::MemoryConfig]: TOML configuration
//!   with `MNEMOS_*` environment overrides.
//! - [`records`] – [`EpisodeRecords`][records::EpisodeRecords]: the SQLite
//!   table holding the authoritative copy of every episode.
//! - [`episode_store`] – [`EpisodeStore`][episode_store::EpisodeStore]:
//!   create / get / query / link / update / delete across the vector index,
//!   the time index and the graph, with compensating rollback.
//! - [`services`] – the episode, graph, hyperedge and vector service groups
//!   with serde request / response types and JSON dispatch.

pub mod config;
pub mod episode_store;
pub mod records;
pub mod services;

pub use config::{ConfigError, MemoryConfig};
pub use episode_store::{
    EpisodeError, EpisodePatch, EpisodeQuery, EpisodeStats, EpisodeStore, NewEpisode, QueryResult,
    SimilarityQuery, TimeRangeQuery,
};
pub use services::{Lookup, ServiceResult, Services};
