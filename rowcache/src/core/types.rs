use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::expression::ExpressionHandle;

/// Fingerprint identifying a (shape, query-or-expression, parameters) triple.
///
/// Signed so it maps directly onto the SQLite `INTEGER PRIMARY KEY`.
/// Stable within one process only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FingerprintKey(i64);

impl FingerprintKey {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for FingerprintKey {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result-shape discriminator for a cached fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResultShapeKind {
    /// Command with no result set
    Execute = 0,
    FetchOneByQuery = 1,
    FetchOneByExpression = 2,
    FetchListByQuery = 3,
    FetchListByExpression = 4,
    /// Parallel result sets returned as a tuple
    FetchTuple2ByQuery = 5,
    FetchTuple3ByQuery = 6,
    FetchTuple4ByQuery = 7,
    FetchTuple5ByQuery = 8,
    FetchTuple6ByQuery = 9,
    FetchTuple7ByQuery = 10,
}

impl ResultShapeKind {
    /// Stable numeric code folded into fingerprints
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Entries created from filter/selector expressions rather than query text
    pub const fn is_expression_based(self) -> bool {
        matches!(self, Self::FetchOneByExpression | Self::FetchListByExpression)
    }

    /// Whether the payload is a sequence (lists and tuples of result sets)
    pub const fn is_list_shaped(self) -> bool {
        !matches!(
            self,
            Self::Execute | Self::FetchOneByQuery | Self::FetchOneByExpression
        )
    }

    /// Number of parallel result sets for tuple kinds
    pub const fn tuple_arity(self) -> Option<u8> {
        match self {
            Self::FetchTuple2ByQuery => Some(2),
            Self::FetchTuple3ByQuery => Some(3),
            Self::FetchTuple4ByQuery => Some(4),
            Self::FetchTuple5ByQuery => Some(5),
            Self::FetchTuple6ByQuery => Some(6),
            Self::FetchTuple7ByQuery => Some(7),
            _ => None,
        }
    }

    /// Tuple kind for the given arity (2..=7)
    pub const fn tuple(arity: u8) -> Option<Self> {
        match arity {
            2 => Some(Self::FetchTuple2ByQuery),
            3 => Some(Self::FetchTuple3ByQuery),
            4 => Some(Self::FetchTuple4ByQuery),
            5 => Some(Self::FetchTuple5ByQuery),
            6 => Some(Self::FetchTuple6ByQuery),
            7 => Some(Self::FetchTuple7ByQuery),
            _ => None,
        }
    }
}

/// Bound shared by every type that can be cached in any tier
pub trait CachePayload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CachePayload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Type-erased payload held by the memory tier.
///
/// Typed reads go through [`CachedPayload::downcast`]; a type mismatch
/// yields `None` and is reported as a miss.
#[derive(Clone)]
pub struct CachedPayload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl CachedPayload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.as_ref().is::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for CachedPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedPayload")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Cached payload plus the provenance needed to re-issue the original fetch
#[derive(Debug, Clone)]
pub struct ResultEnvelope<T> {
    /// Present when data is cached in this tier; `None` for metadata-only entries
    pub payload: Option<T>,
    /// Original SQL or stored-procedure text
    pub query_text: Option<String>,
    /// Original call parameters, opaque to the cache
    pub parameters: Option<serde_json::Value>,
    pub shape_kind: ResultShapeKind,
    pub filter: Option<ExpressionHandle>,
    pub selector: Option<ExpressionHandle>,
    /// Absolute expiration; `None` or a past instant means refresh-only
    pub expires_at: Option<DateTime<Utc>>,
}

impl<T> ResultEnvelope<T> {
    /// Empty envelope of the given shape
    pub fn new(shape_kind: ResultShapeKind) -> Self {
        Self {
            payload: None,
            query_text: None,
            parameters: None,
            shape_kind,
            filter: None,
            selector: None,
            expires_at: None,
        }
    }

    /// Envelope for a fetch issued from SQL or procedure text
    pub fn for_query(shape_kind: ResultShapeKind, query_text: impl Into<String>) -> Self {
        Self {
            query_text: Some(query_text.into()),
            ..Self::new(shape_kind)
        }
    }

    /// Envelope for a fetch issued from a filter and optional selector
    pub fn for_expression(
        shape_kind: ResultShapeKind,
        filter: ExpressionHandle,
        selector: Option<ExpressionHandle>,
    ) -> Self {
        Self {
            filter: Some(filter),
            selector,
            ..Self::new(shape_kind)
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_payload(mut self, payload: T) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Whether the entry may be served as fresh data at `now`
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at > now)
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }

    /// Copy of the provenance with the payload dropped
    pub fn metadata_only<U>(&self) -> ResultEnvelope<U> {
        ResultEnvelope {
            payload: None,
            query_text: self.query_text.clone(),
            parameters: self.parameters.clone(),
            shape_kind: self.shape_kind,
            filter: self.filter.clone(),
            selector: self.selector.clone(),
            expires_at: self.expires_at,
        }
    }

    pub fn map_payload<U>(self, f: impl FnOnce(T) -> U) -> ResultEnvelope<U> {
        ResultEnvelope {
            payload: self.payload.map(f),
            query_text: self.query_text,
            parameters: self.parameters,
            shape_kind: self.shape_kind,
            filter: self.filter,
            selector: self.selector,
            expires_at: self.expires_at,
        }
    }
}

impl ResultEnvelope<CachedPayload> {
    /// Typed view of an erased envelope.
    ///
    /// Returns `None` when a payload is present under a different type.
    pub fn downcast<T: Any + Send + Sync + Clone>(&self) -> Option<ResultEnvelope<T>> {
        let payload = match &self.payload {
            Some(erased) => Some(T::clone(&*erased.downcast::<T>()?)),
            None => None,
        };
        let mut typed = self.metadata_only();
        typed.payload = payload;
        Some(typed)
    }
}

/// Serialized payload as stored in the persistent tier's `Content` column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredContent {
    Text(String),
    Binary(Vec<u8>),
}

impl StoredContent {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// Row of the persistent tier's backing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentRecord {
    pub id: FingerprintKey,
    pub query_text: Option<String>,
    pub content: StoredContent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_shape_kind_classification() {
        assert!(!ResultShapeKind::Execute.is_list_shaped());
        assert!(!ResultShapeKind::FetchOneByQuery.is_list_shaped());
        assert!(ResultShapeKind::FetchListByExpression.is_list_shaped());
        assert!(ResultShapeKind::FetchTuple4ByQuery.is_list_shaped());

        assert!(ResultShapeKind::FetchOneByExpression.is_expression_based());
        assert!(!ResultShapeKind::FetchTuple2ByQuery.is_expression_based());

        for arity in 2..=7 {
            let kind = ResultShapeKind::tuple(arity).unwrap();
            assert_eq!(kind.tuple_arity(), Some(arity));
        }
        assert_eq!(ResultShapeKind::tuple(8), None);
    }

    #[test]
    fn test_envelope_freshness() {
        let now = Utc::now();
        let envelope: ResultEnvelope<u32> = ResultEnvelope::new(ResultShapeKind::FetchOneByQuery);
        assert!(!envelope.is_fresh_at(now));

        let fresh = envelope.clone().with_expires_at(now + Duration::seconds(5));
        assert!(fresh.is_fresh_at(now));

        let stale = envelope.with_expires_at(now - Duration::seconds(5));
        assert!(!stale.is_fresh_at(now));
    }

    #[test]
    fn test_erased_downcast() {
        let envelope = ResultEnvelope::for_query(ResultShapeKind::FetchListByQuery, "SELECT 1")
            .with_payload(CachedPayload::new(vec![1u32, 2, 3]));

        let typed = envelope.downcast::<Vec<u32>>().unwrap();
        assert_eq!(typed.payload, Some(vec![1, 2, 3]));
        assert_eq!(typed.query_text.as_deref(), Some("SELECT 1"));

        assert!(envelope.downcast::<String>().is_none());
    }

    #[test]
    fn test_metadata_only_keeps_provenance() {
        let envelope = ResultEnvelope::for_query(ResultShapeKind::FetchOneByQuery, "SELECT 2")
            .with_parameters(serde_json::json!({"id": 7}))
            .with_payload(5u8);
        let meta: ResultEnvelope<u8> = envelope.metadata_only();
        assert!(!meta.has_payload());
        assert_eq!(meta.query_text.as_deref(), Some("SELECT 2"));
        assert_eq!(meta.parameters, Some(serde_json::json!({"id": 7})));
    }
}
