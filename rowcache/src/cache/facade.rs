//! Cache Facade
//!
//! One entry point per logical database signature. The tier stack is chosen
//! at construction and never changes; every operation is a delegation.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::memory::{MemoryTier, MemoryTierStats, ReplacementPolicy};
use super::serializer::{PayloadSerializer, SerdeFormat};
use super::sqlite::SqliteTier;
use crate::core::{
    CacheError, CachePayload, CachedPayload, FingerprintKey, KeyDeriver, Result, ResultEnvelope,
};

/// Tier combination backing a signature
pub enum TierStack<S: PayloadSerializer = SerdeFormat> {
    /// Payloads and metadata held in memory
    Memory(Arc<MemoryTier>),
    /// Payloads in SQLite, metadata in the tier's companion memory map
    Persistent(Arc<SqliteTier<S>>),
}

impl<S: PayloadSerializer> Clone for TierStack<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Memory(tier) => Self::Memory(Arc::clone(tier)),
            Self::Persistent(tier) => Self::Persistent(Arc::clone(tier)),
        }
    }
}

/// Cache for one logical database signature
pub struct QueryCache<S: PayloadSerializer = SerdeFormat> {
    signature: String,
    stack: TierStack<S>,
    keys: KeyDeriver,
}

impl<S: PayloadSerializer> QueryCache<S> {
    pub fn new(signature: impl Into<String>, stack: TierStack<S>, keys: KeyDeriver) -> Self {
        Self {
            signature: signature.into(),
            stack,
            keys,
        }
    }

    /// Memory-only cache
    pub fn in_memory(signature: impl Into<String>, ttl: Duration, policy: ReplacementPolicy) -> Self {
        Self::new(
            signature,
            TierStack::Memory(Arc::new(MemoryTier::new(ttl, policy))),
            KeyDeriver::default(),
        )
    }

    /// Memory + persistent cache
    pub fn persistent(signature: impl Into<String>, tier: SqliteTier<S>) -> Self {
        Self::new(
            signature,
            TierStack::Persistent(Arc::new(tier)),
            KeyDeriver::default(),
        )
    }

    pub fn with_key_deriver(mut self, keys: KeyDeriver) -> Self {
        self.keys = keys;
        self
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Key deriver configured for this signature
    pub fn keys(&self) -> &KeyDeriver {
        &self.keys
    }

    pub fn stack(&self) -> &TierStack<S> {
        &self.stack
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self.stack, TierStack::Persistent(_))
    }

    pub fn put<T: CachePayload>(&self, key: FingerprintKey, envelope: ResultEnvelope<T>) -> Result<()> {
        debug!("[{}] PUT key={}", self.signature, key);
        match &self.stack {
            TierStack::Memory(tier) => {
                tier.put(key, envelope);
                Ok(())
            }
            TierStack::Persistent(tier) => tier.put(key, envelope),
        }
    }

    pub fn get_envelope<T: CachePayload>(&self, key: FingerprintKey) -> Result<Option<ResultEnvelope<T>>> {
        match &self.stack {
            TierStack::Memory(tier) => Ok(tier.get_envelope(key)),
            TierStack::Persistent(tier) => tier.get_envelope(key),
        }
    }

    pub fn get_typed<T: CachePayload>(&self, key: FingerprintKey) -> Result<Option<T>> {
        Ok(self.get_envelope::<T>(key)?.and_then(|envelope| envelope.payload))
    }

    pub fn get_for_refresh(&self, key: FingerprintKey) -> Result<Option<ResultEnvelope<CachedPayload>>> {
        match &self.stack {
            TierStack::Memory(tier) => Ok(tier.get_for_refresh(key)),
            TierStack::Persistent(tier) => tier.get_for_refresh(key),
        }
    }

    /// Memory stacks drop the entry; persistent stacks expire its metadata
    pub fn invalidate(&self, key: FingerprintKey) -> bool {
        debug!("[{}] INVALIDATE key={}", self.signature, key);
        match &self.stack {
            TierStack::Memory(tier) => tier.invalidate(key),
            TierStack::Persistent(tier) => tier.invalidate(key),
        }
    }

    /// Clear every tier in the stack, including the persistent tier's metadata
    pub fn clear(&self) -> Result<()> {
        debug!("[{}] CLEAR", self.signature);
        match &self.stack {
            TierStack::Memory(tier) => {
                tier.clear();
                Ok(())
            }
            TierStack::Persistent(tier) => {
                tier.clear()?;
                tier.metadata().clear();
                Ok(())
            }
        }
    }

    pub fn can_stream(&self, key: FingerprintKey) -> bool {
        match &self.stack {
            TierStack::Memory(_) => false,
            TierStack::Persistent(tier) => tier.can_stream(key),
        }
    }

    pub fn stream_into<W: Write + ?Sized>(&self, key: FingerprintKey, sink: &mut W) -> Result<u64> {
        match &self.stack {
            TierStack::Memory(_) => Err(memory_stream_error()),
            TierStack::Persistent(tier) => tier.stream_into(key, sink),
        }
    }

    pub async fn stream_into_async<W>(
        &self,
        key: FingerprintKey,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match &self.stack {
            TierStack::Memory(_) => Err(memory_stream_error()),
            TierStack::Persistent(tier) => tier.stream_into_async(key, sink, cancel).await,
        }
    }

    /// Counters of the memory map backing this signature
    pub fn stats(&self) -> MemoryTierStats {
        match &self.stack {
            TierStack::Memory(tier) => tier.stats(),
            TierStack::Persistent(tier) => tier.metadata().stats(),
        }
    }
}

fn memory_stream_error() -> CacheError {
    CacheError::InvalidOperation("memory-only caches do not support streaming".to_string())
}
