//! Read-through and refresh on top of [`QueryCache`]
//!
//! The cache never talks to a database itself. On a miss the caller's
//! fetch (or a [`QueryExecutor`]) runs and the result is written back with
//! an ordinary `put`. Concurrent misses on the same key are not coalesced:
//! both callers fetch and the last `put` wins.

use std::future::Future;
use tracing::debug;

use super::facade::QueryCache;
use super::serializer::PayloadSerializer;
use crate::core::{
    CachePayload, ExpressionHandle, FingerprintKey, Result, ResultEnvelope, ResultShapeKind,
};

/// Provenance needed to re-issue a cached fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub shape_kind: ResultShapeKind,
    pub query_text: Option<String>,
    pub parameters: Option<serde_json::Value>,
    pub filter: Option<ExpressionHandle>,
    pub selector: Option<ExpressionHandle>,
}

impl FetchRequest {
    pub fn from_envelope<T>(envelope: &ResultEnvelope<T>) -> Self {
        Self {
            shape_kind: envelope.shape_kind,
            query_text: envelope.query_text.clone(),
            parameters: envelope.parameters.clone(),
            filter: envelope.filter.clone(),
            selector: envelope.selector.clone(),
        }
    }

    /// Envelope carrying this provenance and `payload`
    pub fn into_envelope<T>(self, payload: T) -> ResultEnvelope<T> {
        ResultEnvelope {
            payload: Some(payload),
            query_text: self.query_text,
            parameters: self.parameters,
            shape_kind: self.shape_kind,
            filter: self.filter,
            selector: self.selector,
            expires_at: None,
        }
    }
}

/// Query-execution collaborator used to re-issue fetches
pub trait QueryExecutor: Send + Sync {
    fn execute<T: CachePayload>(&self, request: &FetchRequest) -> Result<T>;
}

impl<S: PayloadSerializer> QueryCache<S> {
    /// Return the cached payload, or run `fetch` and cache its result.
    ///
    /// `template` supplies the provenance stored alongside a fresh payload.
    pub fn get_or_fetch<T, F>(
        &self,
        key: FingerprintKey,
        template: ResultEnvelope<T>,
        fetch: F,
    ) -> Result<T>
    where
        T: CachePayload,
        F: FnOnce() -> Result<T>,
    {
        if let Some(hit) = self.get_typed::<T>(key)? {
            return Ok(hit);
        }

        debug!("[{}] FETCH on miss key={}", self.signature(), key);
        let value = fetch()?;
        self.put(key, template.with_payload(value.clone()))?;
        Ok(value)
    }

    /// Async variant of [`QueryCache::get_or_fetch`]
    pub async fn get_or_fetch_async<T, F, Fut>(
        &self,
        key: FingerprintKey,
        template: ResultEnvelope<T>,
        fetch: F,
    ) -> Result<T>
    where
        T: CachePayload,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.get_typed::<T>(key)? {
            return Ok(hit);
        }

        debug!("[{}] FETCH (async) on miss key={}", self.signature(), key);
        let value = fetch().await?;
        self.put(key, template.with_payload(value.clone()))?;
        Ok(value)
    }

    /// Re-issue the remembered fetch for `key` and cache the result.
    ///
    /// Returns `Ok(None)` when nothing is remembered for the key.
    pub fn refresh<T, E>(&self, key: FingerprintKey, executor: &E) -> Result<Option<T>>
    where
        T: CachePayload,
        E: QueryExecutor,
    {
        let Some(remembered) = self.get_for_refresh(key)? else {
            debug!("[{}] REFRESH key={} has no provenance", self.signature(), key);
            return Ok(None);
        };

        let request = FetchRequest::from_envelope(&remembered);
        debug!(
            "[{}] REFRESH key={} kind={:?}",
            self.signature(),
            key,
            request.shape_kind
        );
        let value: T = executor.execute(&request)?;
        self.put(key, request.into_envelope(value.clone()))?;
        Ok(Some(value))
    }
}
