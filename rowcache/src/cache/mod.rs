//! Cache Module
//!
//! Provides the caching layers for one database signature:
//! - Memory: concurrent map with TTL and stale-but-remembered entries
//! - SQLite: persistent payload store with streaming reads
//! - Facade: per-signature entry point over a fixed tier stack

pub mod facade;
pub mod fetch;
pub mod memory;
pub mod registry;
pub mod serializer;
pub mod sqlite;

pub use facade::{QueryCache, TierStack};
pub use fetch::{FetchRequest, QueryExecutor};
pub use memory::{DEFAULT_TTL, MemoryTier, MemoryTierStats, ReplacementPolicy};
pub use registry::CacheRegistry;
pub use serializer::{PayloadSerializer, SerdeFormat};
pub use sqlite::{JournalMode, SqliteTier, SqliteTierConfig, SyncMode};
