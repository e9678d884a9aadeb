//! Signature registry
//!
//! Maps logical database signatures to their [`QueryCache`]. Registration is
//! rare and lookups are hot, so the map sits behind a read-mostly lock.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::{debug, info};

use super::facade::QueryCache;
use super::serializer::{PayloadSerializer, SerdeFormat};
use super::sqlite::SqliteTier;
use crate::config::{CacheConfig, SignatureConfig};
use crate::core::{CacheError, KeyDeriver, Result};

/// Registry of caches keyed by database signature
pub struct CacheRegistry<S: PayloadSerializer = SerdeFormat> {
    caches: RwLock<HashMap<String, Arc<QueryCache<S>>>>,
}

impl<S: PayloadSerializer> CacheRegistry<S> {
    pub fn new() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Register `cache` under its signature
    pub fn register(&self, cache: QueryCache<S>) -> Result<Arc<QueryCache<S>>> {
        let mut caches = self.caches.write();
        match caches.entry(cache.signature().to_string()) {
            Entry::Occupied(occupied) => Err(CacheError::DuplicateSignature(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                info!(
                    "Registered cache signature '{}' (persistent: {})",
                    vacant.key(),
                    cache.is_persistent()
                );
                let cache = Arc::new(cache);
                vacant.insert(Arc::clone(&cache));
                Ok(cache)
            }
        }
    }

    /// Cache for `signature`; unknown signatures are an error
    pub fn get(&self, signature: &str) -> Result<Arc<QueryCache<S>>> {
        self.try_get(signature)
            .ok_or_else(|| CacheError::UnknownSignature(signature.to_string()))
    }

    pub fn try_get(&self, signature: &str) -> Option<Arc<QueryCache<S>>> {
        self.caches.read().get(signature).cloned()
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.caches.read().contains_key(signature)
    }

    /// Registered signatures, sorted
    pub fn signatures(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    /// Clear every registered cache
    pub fn clear_all(&self) -> Result<()> {
        // Snapshot so the registry lock is not held across SQLite work
        let caches: Vec<Arc<QueryCache<S>>> = self.caches.read().values().cloned().collect();
        debug!("Clearing {} registered caches", caches.len());
        for cache in caches {
            cache.clear()?;
        }
        Ok(())
    }
}

impl<S: PayloadSerializer> Default for CacheRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheRegistry<SerdeFormat> {
    /// Build a registry with one cache per configured signature
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        let registry = Self::new();
        for signature in &config.signatures {
            registry.register(build_cache(signature)?)?;
        }
        Ok(registry)
    }
}

fn build_cache(signature: &SignatureConfig) -> Result<QueryCache<SerdeFormat>> {
    let keys = KeyDeriver::new(signature.include_literal_values);
    let cache = match &signature.persistent {
        Some(persistent) => {
            let tier = SqliteTier::new(
                persistent.to_tier_config()?,
                persistent.format,
                signature.ttl(),
            )?;
            QueryCache::persistent(signature.name.clone(), tier)
        }
        None => QueryCache::in_memory(
            signature.name.clone(),
            signature.ttl(),
            signature.standalone_replacement,
        ),
    };
    Ok(cache.with_key_deriver(keys))
}
