pub mod cache;
pub mod compression;
pub mod config;
pub mod core;

// Re-export commonly used types
pub use cache::{
    CacheRegistry, FetchRequest, MemoryTier, MemoryTierStats, PayloadSerializer, QueryCache,
    QueryExecutor, ReplacementPolicy, SerdeFormat, SqliteTier, SqliteTierConfig, TierStack,
};
pub use compression::{CompressionAlgorithm, CompressionConfig, Compressor};
pub use config::{CacheConfig, LoggingConfig, PersistentConfig, SignatureConfig};
pub use core::{
    CacheError, CachePayload, CachedPayload, Expression, ExpressionHandle, FingerprintKey,
    KeyDeriver, PersistentRecord, Result, ResultEnvelope, ResultShapeKind, StoredContent,
};
