//! Memory Tier
//!
//! Concurrent `FingerprintKey -> ResultEnvelope` map with a per-instance TTL.
//! Payloads are stored type-erased and recovered with a checked downcast, so
//! asking for the wrong type is a miss, never a panic.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::core::{CachedPayload, FingerprintKey, ResultEnvelope};

/// Default time-to-live when none is configured
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// What a `put` does to a key that is already present.
///
/// `StripPayload` keeps only the provenance of the new envelope. A persistent
/// tier relies on this: it owns the payload bytes and uses the memory tier
/// purely for metadata. A standalone memory cache can opt into `KeepPayload`
/// so overwrites stay readable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementPolicy {
    #[default]
    StripPayload,
    KeepPayload,
}

/// Snapshot of memory tier counters
#[derive(Debug, Default, Clone, Serialize)]
pub struct MemoryTierStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Misses caused by an expired or metadata-only entry
    pub stale_misses: u64,
    /// Misses caused by requesting a different payload type
    pub type_mismatches: u64,
    pub puts: u64,
    pub replacements: u64,
    pub invalidations: u64,
}

impl MemoryTierStats {
    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_misses: AtomicU64,
    type_mismatches: AtomicU64,
    puts: AtomicU64,
    replacements: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// In-memory cache tier
pub struct MemoryTier {
    entries: DashMap<FingerprintKey, ResultEnvelope<CachedPayload>>,
    ttl: TimeDelta,
    policy: ReplacementPolicy,
    counters: Counters,
}

impl MemoryTier {
    /// Create a memory tier with the given TTL and replacement policy
    pub fn new(ttl: Duration, policy: ReplacementPolicy) -> Self {
        info!(
            "Initializing memory tier with ttl={}s, replacement={:?}",
            ttl.as_secs(),
            policy
        );

        Self {
            entries: DashMap::new(),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            policy,
            counters: Counters::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or(Duration::MAX)
    }

    pub fn policy(&self) -> ReplacementPolicy {
        self.policy
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Insert or replace the entry for `key`.
    ///
    /// Absent keys store the full envelope. Present keys are swapped for a
    /// metadata-only copy of `envelope` under [`ReplacementPolicy::StripPayload`].
    /// Either way `expires_at` is restamped to now + TTL.
    pub fn put<T: Any + Send + Sync>(&self, key: FingerprintKey, envelope: ResultEnvelope<T>) {
        let mut stored = envelope.map_payload(CachedPayload::new);
        stored.expires_at = Some(self.expiry_from(Utc::now()));
        Counters::bump(&self.counters.puts);

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                Counters::bump(&self.counters.replacements);
                let replacement = match self.policy {
                    ReplacementPolicy::StripPayload => stored.metadata_only(),
                    ReplacementPolicy::KeepPayload => stored,
                };
                debug!(
                    "Memory tier REPLACE key={} (payload kept: {})",
                    key,
                    replacement.has_payload()
                );
                occupied.insert(replacement);
            }
            Entry::Vacant(vacant) => {
                debug!("Memory tier PUT key={} kind={:?}", key, stored.shape_kind);
                vacant.insert(stored);
            }
        }
    }

    /// Typed fresh envelope for `key`, or `None` on any kind of miss
    pub fn get_envelope<T: Any + Send + Sync + Clone>(
        &self,
        key: FingerprintKey,
    ) -> Option<ResultEnvelope<T>> {
        // Clone out so the shard lock is not held while cloning the payload
        let Some(envelope) = self.entries.get(&key).map(|entry| entry.value().clone()) else {
            Counters::bump(&self.counters.misses);
            debug!("Memory tier MISS key={}", key);
            return None;
        };

        let Some(erased) = envelope.payload.as_ref().filter(|_| envelope.is_fresh()) else {
            Counters::bump(&self.counters.misses);
            Counters::bump(&self.counters.stale_misses);
            debug!("Memory tier STALE key={}", key);
            return None;
        };

        if !erased.is::<T>() {
            Counters::bump(&self.counters.misses);
            Counters::bump(&self.counters.type_mismatches);
            debug!(
                "Memory tier TYPE MISMATCH key={} stored={} requested={}",
                key,
                erased.type_name(),
                std::any::type_name::<T>()
            );
            return None;
        }

        Counters::bump(&self.counters.hits);
        debug!("Memory tier HIT key={}", key);
        envelope.downcast::<T>()
    }

    /// Count a typed read that a companion tier rejected for its payload type
    pub(crate) fn record_type_mismatch(&self) {
        Counters::bump(&self.counters.misses);
        Counters::bump(&self.counters.type_mismatches);
    }

    /// Typed fresh payload for `key`
    pub fn get_typed<T: Any + Send + Sync + Clone>(&self, key: FingerprintKey) -> Option<T> {
        self.get_envelope::<T>(key).and_then(|envelope| envelope.payload)
    }

    /// Envelope for `key` regardless of expiration or payload presence
    pub fn get_for_refresh(&self, key: FingerprintKey) -> Option<ResultEnvelope<CachedPayload>> {
        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    /// Mark `key` expired while keeping its provenance for refresh
    pub fn expire(&self, key: FingerprintKey) -> bool {
        match self.entries.get_mut(&key) {
            Some(mut entry) => {
                entry.expires_at = Some(Utc::now());
                debug!("Memory tier EXPIRE key={}", key);
                true
            }
            None => false,
        }
    }

    /// Remove one entry
    pub fn invalidate(&self, key: FingerprintKey) -> bool {
        let removed = self.entries.remove(&key).is_some();
        if removed {
            Counters::bump(&self.counters.invalidations);
            debug!("Memory tier INVALIDATE key={}", key);
        }
        removed
    }

    /// Remove every entry
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        debug!("Memory tier CLEAR ({} entries)", count);
    }

    /// Drop entries that expired more than `grace` ago; returns how many were removed
    pub fn purge_expired(&self, grace: Duration) -> usize {
        let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(grace)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.entries.len();
        self.entries
            .retain(|_, envelope| envelope.expires_at.is_some_and(|at| at > cutoff));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Memory tier PURGE removed {} expired entries", removed);
        }
        removed
    }

    /// Start background cleanup of long-expired entries
    pub fn start_ttl_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        grace: Duration,
    ) -> tokio::task::JoinHandle<()> {
        info!(
            "Starting memory tier cleanup task (interval={}ms, grace={}s)",
            interval.as_millis(),
            grace.as_secs()
        );

        let tier = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                tier.purge_expired(grace);
            }
        })
    }

    pub fn contains(&self, key: FingerprintKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> MemoryTierStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MemoryTierStats {
            entries: self.entries.len(),
            hits: load(&self.counters.hits),
            misses: load(&self.counters.misses),
            stale_misses: load(&self.counters.stale_misses),
            type_mismatches: load(&self.counters.type_mismatches),
            puts: load(&self.counters.puts),
            replacements: load(&self.counters.replacements),
            invalidations: load(&self.counters.invalidations),
        }
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, ReplacementPolicy::default())
    }
}
