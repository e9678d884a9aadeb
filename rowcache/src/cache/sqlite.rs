//! Persistent Tier
//!
//! SQLite-backed overflow store. Payload bytes live in one table keyed by the
//! fingerprint; a companion [`MemoryTier`] keeps only the metadata (query,
//! parameters, expressions, expiration) for the same keys. Rows are never
//! deleted on expiry or invalidation, only ignored until the next `put` or
//! `clear`.

use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{Connection, DatabaseName, OpenFlags, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::memory::{MemoryTier, ReplacementPolicy};
use super::serializer::{PayloadSerializer, SerdeFormat};
use crate::compression::{CompressionConfig, Compressor};
use crate::core::{
    CacheError, CachePayload, CachedPayload, FingerprintKey, PersistentRecord, Result,
    ResultEnvelope, StoredContent,
};

const TABLE_NAME: &str = "QueryCache";
const CONTENT_COLUMN: &str = "Content";
/// Chunk size for async streaming reads
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// SQLite journal mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
    Truncate,
    Memory,
    Off,
}

impl JournalMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
            Self::Truncate => "truncate",
            Self::Memory => "memory",
            Self::Off => "off",
        }
    }
}

/// SQLite synchronous mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Off,
    #[default]
    Normal,
    Full,
}

impl SyncMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Normal => "normal",
            Self::Full => "full",
        }
    }
}

/// Persistent tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteTierConfig {
    /// Database file; `None` opens a private in-memory database
    pub path: Option<PathBuf>,
    /// Fixes the `Content` column affinity: TEXT when true, BLOB otherwise
    pub text_format: bool,
    pub journal_mode: JournalMode,
    pub synchronous: SyncMode,
    pub page_size: u32,
    /// Negative values are KiB, positive values are pages
    pub cache_size: i64,
    pub exclusive_locking: bool,
    /// Codec stage for binary content
    pub compression: CompressionConfig,
}

impl Default for SqliteTierConfig {
    fn default() -> Self {
        Self {
            path: None,
            text_format: true,
            journal_mode: JournalMode::Wal,
            synchronous: SyncMode::Normal,
            page_size: 4096,
            cache_size: -2000, // 2MB
            exclusive_locking: true,
            compression: CompressionConfig::default(),
        }
    }
}

/// SQLite-backed persistent tier
/// Concrete payload type recorded for a persisted key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PayloadType {
    id: TypeId,
    name: &'static str,
}

impl PayloadType {
    fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

pub struct SqliteTier<S: PayloadSerializer = SerdeFormat> {
    config: SqliteTierConfig,
    connection: Arc<Mutex<Connection>>,
    /// Written under the connection lock together with the row
    payload_types: DashMap<FingerprintKey, PayloadType>,
    serializer: S,
    compressor: Compressor,
    metadata: Arc<MemoryTier>,
}

impl<S: PayloadSerializer> SqliteTier<S> {
    /// Open the backing database, apply tuning and recreate the cache table.
    ///
    /// `ttl` is forwarded to the companion metadata tier.
    pub fn new(config: SqliteTierConfig, serializer: S, ttl: Duration) -> Result<Self> {
        if config.text_format && !serializer.supports_text() {
            return Err(CacheError::Configuration(
                "text format requires a serializer that produces text".to_string(),
            ));
        }
        let compressor = Compressor::new(config.compression.clone());
        if config.text_format && compressor.is_enabled() {
            return Err(CacheError::Configuration(
                "compression is only supported with binary format".to_string(),
            ));
        }

        let connection = open_connection(&config)?;
        apply_pragmas(&connection, &config)?;
        recreate_table(&connection, config.text_format)?;

        info!(
            "Initialized SQLite tier at {} (text_format={}, compression={:?})",
            config
                .path
                .as_deref()
                .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string()),
            config.text_format,
            compressor.algorithm()
        );

        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
            payload_types: DashMap::new(),
            serializer,
            compressor,
            metadata: Arc::new(MemoryTier::new(ttl, ReplacementPolicy::StripPayload)),
        })
    }

    pub fn config(&self) -> &SqliteTierConfig {
        &self.config
    }

    pub fn is_text_format(&self) -> bool {
        self.config.text_format
    }

    /// Companion tier holding metadata for persisted keys
    pub fn metadata(&self) -> &Arc<MemoryTier> {
        &self.metadata
    }

    /// Upsert the payload row, then record metadata in the companion tier
    pub fn put<T: CachePayload>(&self, key: FingerprintKey, envelope: ResultEnvelope<T>) -> Result<()> {
        let Some(payload) = envelope.payload.as_ref() else {
            return Err(CacheError::InvalidOperation(format!(
                "persistent put for key {} has no payload",
                key
            )));
        };
        let content = self.encode(payload)?;
        let size = content.len();

        {
            let connection = self.connection.lock();
            let sql = format!(
                "INSERT INTO {TABLE_NAME} (Id, QueryText, Content) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(Id) DO UPDATE SET QueryText = excluded.QueryText, \
                 Content = excluded.Content"
            );
            match &content {
                StoredContent::Text(text) => {
                    connection.execute(&sql, params![key.as_i64(), envelope.query_text, text])?
                }
                StoredContent::Binary(bytes) => {
                    connection.execute(&sql, params![key.as_i64(), envelope.query_text, bytes])?
                }
            };
            self.payload_types.insert(key, PayloadType::of::<T>());
        }

        self.metadata.put::<()>(key, envelope.metadata_only());
        debug!("SQLite tier PUT key={} ({} bytes)", key, size);
        Ok(())
    }

    /// Fresh envelope rebuilt from the stored row.
    ///
    /// The returned `query_text` is the persisted one, not the caller's.
    /// A row written for another payload type is a miss, even when its
    /// bytes would decode as `T`.
    pub fn get_envelope<T: CachePayload>(&self, key: FingerprintKey) -> Result<Option<ResultEnvelope<T>>> {
        let Some(meta) = self.metadata.get_for_refresh(key) else {
            debug!("SQLite tier MISS key={} (no metadata)", key);
            return Ok(None);
        };
        if !meta.is_fresh() {
            debug!("SQLite tier STALE key={}", key);
            return Ok(None);
        }

        let record = {
            let connection = self.connection.lock();
            let stored_type = self.payload_types.get(&key).map(|entry| *entry.value());
            match stored_type {
                Some(stored) if stored.id != TypeId::of::<T>() => {
                    self.metadata.record_type_mismatch();
                    debug!(
                        "SQLite tier TYPE MISMATCH key={} stored={} requested={}",
                        key,
                        stored.name,
                        std::any::type_name::<T>()
                    );
                    return Ok(None);
                }
                Some(_) => read_record(&connection, key, self.config.text_format)?,
                None => None,
            }
        };
        let Some(record) = record else {
            debug!("SQLite tier MISS key={} (no row)", key);
            return Ok(None);
        };

        let payload = match self.decode::<T>(&record.content, meta.shape_kind.is_list_shaped()) {
            Ok(payload) => payload,
            Err(CacheError::Serialization(reason) | CacheError::Compression(reason)) => {
                warn!(
                    "SQLite tier key={} does not decode as {}: {}",
                    key,
                    std::any::type_name::<T>(),
                    reason
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        debug!("SQLite tier HIT key={}", key);
        let mut envelope: ResultEnvelope<T> = meta.metadata_only();
        envelope.payload = Some(payload);
        envelope.query_text = record.query_text;
        Ok(Some(envelope))
    }

    pub fn get_typed<T: CachePayload>(&self, key: FingerprintKey) -> Result<Option<T>> {
        Ok(self.get_envelope::<T>(key)?.and_then(|envelope| envelope.payload))
    }

    /// Metadata for `key` regardless of expiry, with the persisted query
    /// text filled in for query-based entries that lack one
    pub fn get_for_refresh(&self, key: FingerprintKey) -> Result<Option<ResultEnvelope<CachedPayload>>> {
        let Some(mut envelope) = self.metadata.get_for_refresh(key) else {
            return Ok(None);
        };
        if envelope.shape_kind.is_expression_based() || envelope.query_text.is_some() {
            return Ok(Some(envelope));
        }

        let connection = self.connection.lock();
        let query_text: Option<Option<String>> = connection
            .query_row(
                &format!("SELECT QueryText FROM {TABLE_NAME} WHERE Id = ?1"),
                params![key.as_i64()],
                |row| row.get(0),
            )
            .optional()?;
        envelope.query_text = query_text.flatten();
        Ok(Some(envelope))
    }

    /// Raw row for `key`, ignoring expiry
    pub fn record(&self, key: FingerprintKey) -> Result<Option<PersistentRecord>> {
        let connection = self.connection.lock();
        read_record(&connection, key, self.config.text_format)
    }

    /// Number of physical rows, including logically expired ones
    pub fn row_count(&self) -> Result<usize> {
        let connection = self.connection.lock();
        let count: i64 = connection.query_row(
            &format!("SELECT COUNT(*) FROM {TABLE_NAME}"),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Whether `key` can be streamed: fresh metadata and text format
    pub fn can_stream(&self, key: FingerprintKey) -> bool {
        self.config.text_format
            && self
                .metadata
                .get_for_refresh(key)
                .is_some_and(|envelope| envelope.is_fresh())
    }

    /// Copy the stored `Content` into `sink` without materializing it
    pub fn stream_into<W: Write + ?Sized>(&self, key: FingerprintKey, sink: &mut W) -> Result<u64> {
        self.ensure_streamable(key)?;

        let connection = self.connection.lock();
        ensure_row_exists(&connection, key)?;
        let mut blob = connection.blob_open(
            DatabaseName::Main,
            TABLE_NAME,
            CONTENT_COLUMN,
            key.as_i64(),
            true,
        )?;
        let written = std::io::copy(&mut blob, sink)?;
        sink.flush()?;

        debug!("SQLite tier STREAM key={} ({} bytes)", key, written);
        Ok(written)
    }

    /// Async variant of [`SqliteTier::stream_into`].
    ///
    /// Content is copied in chunks. Each chunk is read on the blocking pool,
    /// so the connection lock is never taken on a runtime worker. Both the
    /// chunk read and every sink write race `cancel`: on cancel the sink
    /// holds exactly `bytes_written` bytes, a prefix of the content, and the
    /// caller truncates. A concurrent `put` to the same key between chunks
    /// is not detected.
    pub async fn stream_into_async<W>(
        &self,
        key: FingerprintKey,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.ensure_streamable(key)?;

        let mut buffer = vec![0u8; STREAM_CHUNK_SIZE];
        let mut offset = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(key, offset));
            }

            let connection = Arc::clone(&self.connection);
            let chunk_start = offset;
            let read_task = tokio::task::spawn_blocking(move || {
                read_chunk(&connection, key, chunk_start, buffer)
            });
            let (chunk, read, total) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(key, offset)),
                joined = read_task => joined.map_err(|err| {
                    CacheError::Io(io::Error::other(format!("chunk read join failed: {err}")))
                })??,
            };
            buffer = chunk;
            if read == 0 {
                break;
            }

            // A pending write has not consumed any bytes, so dropping it
            // on cancel keeps `offset` exact
            let mut position = 0usize;
            while position < read {
                let written = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled(key, offset)),
                    written = sink.write(&buffer[position..read]) => written?,
                };
                if written == 0 {
                    return Err(CacheError::Io(io::Error::from(io::ErrorKind::WriteZero)));
                }
                position += written;
                offset += written;
            }
            if offset >= total {
                break;
            }
        }
        sink.flush().await?;

        debug!("SQLite tier STREAM (async) key={} ({} bytes)", key, offset);
        Ok(offset as u64)
    }

    /// Expire the companion metadata; the row stays until overwritten or cleared
    pub fn invalidate(&self, key: FingerprintKey) -> bool {
        let expired = self.metadata.expire(key);
        debug!("SQLite tier INVALIDATE key={} (had metadata: {})", key, expired);
        expired
    }

    /// Drop and recreate the backing table.
    ///
    /// The companion metadata tier is left untouched.
    pub fn clear(&self) -> Result<()> {
        let connection = self.connection.lock();
        recreate_table(&connection, self.config.text_format)?;
        self.payload_types.clear();
        debug!("SQLite tier CLEAR");
        Ok(())
    }

    fn ensure_streamable(&self, key: FingerprintKey) -> Result<()> {
        if !self.config.text_format {
            return Err(CacheError::InvalidOperation(
                "binary content cannot be streamed".to_string(),
            ));
        }
        match self.metadata.get_for_refresh(key) {
            Some(envelope) if envelope.is_fresh() => Ok(()),
            Some(_) => {
                warn!("Refusing to stream expired key={}", key);
                Err(CacheError::InvalidOperation(format!(
                    "cache entry {} has expired",
                    key
                )))
            }
            None => Err(CacheError::InvalidOperation(format!(
                "cache entry {} does not exist",
                key
            ))),
        }
    }


    fn encode<T: CachePayload>(&self, payload: &T) -> Result<StoredContent> {
        match self.serializer.serialize(payload, self.config.text_format)? {
            StoredContent::Binary(bytes) => Ok(StoredContent::Binary(self.compressor.encode(bytes)?)),
            StoredContent::Text(text) if self.config.text_format => Ok(StoredContent::Text(text)),
            // Binary affinity: keep the column's storage class uniform
            StoredContent::Text(text) => Ok(StoredContent::Binary(
                self.compressor.encode(text.into_bytes())?,
            )),
        }
    }

    fn decode<T: CachePayload>(&self, content: &StoredContent, is_list: bool) -> Result<T> {
        match content {
            StoredContent::Binary(bytes) if self.compressor.is_enabled() => {
                let raw = StoredContent::Binary(self.compressor.decode(bytes.clone())?);
                self.serializer.deserialize(&raw, is_list)
            }
            _ => self.serializer.deserialize(content, is_list),
        }
    }
}

/// Read one chunk at `offset` into `buffer`.
///
/// Returns the buffer, bytes read and total content length. Blocking.
fn read_chunk(
    connection: &Mutex<Connection>,
    key: FingerprintKey,
    offset: usize,
    mut buffer: Vec<u8>,
) -> Result<(Vec<u8>, usize, usize)> {
    let connection = connection.lock();
    ensure_row_exists(&connection, key)?;
    let blob = connection.blob_open(
        DatabaseName::Main,
        TABLE_NAME,
        CONTENT_COLUMN,
        key.as_i64(),
        true,
    )?;
    let total = blob.len();
    if offset >= total {
        return Ok((buffer, 0, total));
    }
    let read = blob.read_at(&mut buffer, offset)?;
    Ok((buffer, read, total))
}

fn cancelled(key: FingerprintKey, bytes_written: usize) -> CacheError {
    debug!("SQLite tier STREAM key={} cancelled at {} bytes", key, bytes_written);
    CacheError::Cancelled {
        bytes_written: bytes_written as u64,
    }
}

fn read_record(
    connection: &Connection,
    key: FingerprintKey,
    text_format: bool,
) -> Result<Option<PersistentRecord>> {
    let record = connection
        .query_row(
            &format!("SELECT QueryText, Content FROM {TABLE_NAME} WHERE Id = ?1"),
            params![key.as_i64()],
            |row| {
                let query_text: Option<String> = row.get(0)?;
                let content = if text_format {
                    StoredContent::Text(row.get(1)?)
                } else {
                    StoredContent::Binary(row.get(1)?)
                };
                Ok(PersistentRecord {
                    id: key,
                    query_text,
                    content,
                })
            },
        )
        .optional()?;
    Ok(record)
}

fn ensure_row_exists(connection: &Connection, key: FingerprintKey) -> Result<()> {
    let exists: bool = connection.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {TABLE_NAME} WHERE Id = ?1)"),
        params![key.as_i64()],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(CacheError::InvalidOperation(format!(
            "no persisted content for cache entry {}",
            key
        )))
    }
}

/// Ensures the parent directory for the database file exists
fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

fn open_connection(config: &SqliteTierConfig) -> Result<Connection> {
    let connection = match &config.path {
        Some(path) => {
            if path.is_dir() {
                return Err(CacheError::Configuration(format!(
                    "cache path {} is a directory",
                    path.display()
                )));
            }
            ensure_parent_dir(path)?;
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(path, flags)?
        }
        None => Connection::open_in_memory()?,
    };
    Ok(connection)
}

/// Applies storage tuning; page size must precede WAL and table creation
fn apply_pragmas(connection: &Connection, config: &SqliteTierConfig) -> Result<()> {
    connection.execute_batch(&format!("PRAGMA page_size = {};", config.page_size))?;
    if config.exclusive_locking {
        connection.execute_batch("PRAGMA locking_mode = EXCLUSIVE;")?;
    }
    connection.execute_batch(&format!(
        "PRAGMA journal_mode = {};",
        config.journal_mode.pragma_value()
    ))?;
    connection.execute_batch(&format!(
        "PRAGMA synchronous = {};",
        config.synchronous.pragma_value()
    ))?;
    connection.execute_batch(&format!("PRAGMA cache_size = {};", config.cache_size))?;
    Ok(())
}

fn recreate_table(connection: &Connection, text_format: bool) -> Result<()> {
    let affinity = if text_format { "TEXT" } else { "BLOB" };
    connection.execute_batch(&format!(
        "DROP TABLE IF EXISTS {TABLE_NAME};
         CREATE TABLE {TABLE_NAME} (
             Id INTEGER PRIMARY KEY,
             QueryText TEXT NULL,
             {CONTENT_COLUMN} {affinity} NOT NULL
         );"
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionAlgorithm;
    use crate::core::{Expression, ResultShapeKind};
    use tempfile::tempdir;

    fn rows() -> Vec<String> {
        vec!["rowA".to_string(), "rowB".to_string()]
    }

    fn text_tier() -> SqliteTier {
        SqliteTier::new(
            SqliteTierConfig::default(),
            SerdeFormat::Json,
            Duration::from_secs(100),
        )
        .unwrap()
    }

    fn list_envelope() -> ResultEnvelope<Vec<String>> {
        ResultEnvelope::for_query(ResultShapeKind::FetchListByQuery, "SELECT * FROM T")
            .with_payload(rows())
    }

    #[test]
    fn test_put_get_text() {
        let tier = text_tier();
        let key = FingerprintKey::new(42);
        tier.put(key, list_envelope()).unwrap();

        assert_eq!(tier.get_typed::<Vec<String>>(key).unwrap(), Some(rows()));

        let record = tier.record(key).unwrap().unwrap();
        assert_eq!(record.query_text.as_deref(), Some("SELECT * FROM T"));
        assert_eq!(
            record.content,
            StoredContent::Text(r#"["rowA","rowB"]"#.to_string())
        );
        assert!(!tier.metadata().get_for_refresh(key).unwrap().has_payload());
    }

    #[test]
    fn test_repeated_put_overwrites_row() {
        let tier = text_tier();
        let key = FingerprintKey::new(1);
        tier.put(key, list_envelope()).unwrap();
        tier.put(
            key,
            ResultEnvelope::for_query(ResultShapeKind::FetchListByQuery, "SELECT * FROM T")
                .with_payload(vec!["rowC".to_string()]),
        )
        .unwrap();

        assert_eq!(
            tier.get_typed::<Vec<String>>(key).unwrap(),
            Some(vec!["rowC".to_string()])
        );
        assert_eq!(tier.row_count().unwrap(), 1);
    }

    #[test]
    fn test_invalidate_keeps_row() {
        let tier = text_tier();
        let key = FingerprintKey::new(42);
        tier.put(key, list_envelope()).unwrap();

        assert!(tier.invalidate(key));
        assert!(tier.get_typed::<Vec<String>>(key).unwrap().is_none());
        assert!(tier.record(key).unwrap().is_some());
        assert!(!tier.can_stream(key));

        let refresh = tier.get_for_refresh(key).unwrap().unwrap();
        assert!(!refresh.is_fresh());
    }

    #[test]
    fn test_refresh_fills_missing_query_text() {
        let tier = text_tier();
        let key = FingerprintKey::new(11);
        tier.put(key, list_envelope()).unwrap();

        // Metadata recorded without query text, row still carries it
        tier.metadata()
            .put::<()>(key, ResultEnvelope::new(ResultShapeKind::FetchListByQuery));
        assert!(tier.metadata().get_for_refresh(key).unwrap().query_text.is_none());

        let refreshed = tier.get_for_refresh(key).unwrap().unwrap();
        assert_eq!(refreshed.query_text.as_deref(), Some("SELECT * FROM T"));

        // A put without query text stores NULL, so nothing can be filled in
        tier.put(
            key,
            ResultEnvelope::new(ResultShapeKind::FetchListByQuery).with_payload(rows()),
        )
        .unwrap();
        let refreshed = tier.get_for_refresh(key).unwrap().unwrap();
        assert!(refreshed.query_text.is_none());
    }

    #[test]
    fn test_expression_entry_refresh_skips_row_lookup() {
        let tier = text_tier();
        let key = FingerprintKey::new(12);
        let filter = Expression::parameter("p").into_handle();
        tier.put(
            key,
            ResultEnvelope::for_expression(ResultShapeKind::FetchOneByExpression, filter.clone(), None)
                .with_payload("one".to_string()),
        )
        .unwrap();

        let refreshed = tier.get_for_refresh(key).unwrap().unwrap();
        assert_eq!(refreshed.filter, Some(filter));
        assert!(refreshed.query_text.is_none());
        assert_eq!(tier.get_typed::<String>(key).unwrap(), Some("one".to_string()));
    }

    #[test]
    fn test_wrong_type_is_miss() {
        let tier = text_tier();
        let key = FingerprintKey::new(13);
        tier.put(key, list_envelope()).unwrap();

        assert!(tier.get_typed::<Vec<u64>>(key).unwrap().is_none());
        assert!(tier.get_typed::<Vec<String>>(key).unwrap().is_some());
    }

    #[test]
    fn test_decodable_wrong_type_is_miss() {
        let tier = text_tier();
        let key = FingerprintKey::new(14);
        tier.put(
            key,
            ResultEnvelope::for_query(ResultShapeKind::FetchListByQuery, "SELECT n FROM T")
                .with_payload(vec![1u32, 2]),
        )
        .unwrap();

        // `[1,2]` decodes as Vec<i64> too
        assert!(tier.get_typed::<Vec<i64>>(key).unwrap().is_none());
        assert_eq!(tier.metadata().stats().type_mismatches, 1);
        assert_eq!(tier.get_typed::<Vec<u32>>(key).unwrap(), Some(vec![1, 2]));

        tier.put(
            key,
            ResultEnvelope::for_query(ResultShapeKind::FetchListByQuery, "SELECT n FROM T")
                .with_payload(vec![3i64]),
        )
        .unwrap();
        assert!(tier.get_typed::<Vec<u32>>(key).unwrap().is_none());
        assert_eq!(tier.get_typed::<Vec<i64>>(key).unwrap(), Some(vec![3]));
    }

    #[test]
    fn test_corrupt_frame_is_miss() {
        let config = SqliteTierConfig {
            text_format: false,
            compression: CompressionConfig::with_algorithm(CompressionAlgorithm::Zstd),
            ..Default::default()
        };
        let tier = SqliteTier::new(config, SerdeFormat::Bincode, Duration::from_secs(100)).unwrap();
        let key = FingerprintKey::new(15);
        tier.put(key, list_envelope()).unwrap();

        for garbage in [vec![9u8, 1, 2, 3], vec![2u8, 0xde, 0xad, 0xbe, 0xef]] {
            tier.connection
                .lock()
                .execute(
                    &format!("UPDATE {TABLE_NAME} SET Content = ?1 WHERE Id = ?2"),
                    params![garbage, key.as_i64()],
                )
                .unwrap();
            assert!(tier.get_typed::<Vec<String>>(key).unwrap().is_none());
        }
    }

    #[test]
    fn test_binary_compressed_round_trip() {
        let config = SqliteTierConfig {
            text_format: false,
            compression: CompressionConfig {
                algorithm: CompressionAlgorithm::Zstd,
                min_payload_size: 16,
                ..Default::default()
            },
            ..Default::default()
        };
        let tier = SqliteTier::new(config, SerdeFormat::Bincode, Duration::from_secs(100)).unwrap();
        let key = FingerprintKey::new(21);
        let payload: Vec<String> = (0..200).map(|i| format!("row-{}", i % 7)).collect();

        tier.put(
            key,
            ResultEnvelope::for_query(ResultShapeKind::FetchListByQuery, "SELECT name FROM big")
                .with_payload(payload.clone()),
        )
        .unwrap();

        assert_eq!(tier.get_typed::<Vec<String>>(key).unwrap(), Some(payload));
        assert!(matches!(
            tier.record(key).unwrap().unwrap().content,
            StoredContent::Binary(_)
        ));
        assert!(!tier.can_stream(key));
        let mut sink: Vec<u8> = Vec::new();
        assert!(matches!(
            tier.stream_into(key, &mut sink),
            Err(CacheError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_invalid_configurations() {
        let err = SqliteTier::new(
            SqliteTierConfig::default(),
            SerdeFormat::Msgpack,
            Duration::from_secs(1),
        )
        .err()
        .unwrap();
        assert!(err.is_configuration());

        let config = SqliteTierConfig {
            compression: CompressionConfig::with_algorithm(CompressionAlgorithm::Lz4),
            ..Default::default()
        };
        let err = SqliteTier::new(config, SerdeFormat::Json, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_stream_matches_stored_text() {
        let tier = text_tier();
        let key = FingerprintKey::new(42);
        tier.put(key, list_envelope()).unwrap();
        assert!(tier.can_stream(key));

        let mut sink: Vec<u8> = Vec::new();
        let written = tier.stream_into(key, &mut sink).unwrap();
        assert_eq!(written as usize, sink.len());
        let streamed: Vec<String> = serde_json::from_slice(&sink).unwrap();
        assert_eq!(streamed, rows());
    }

    #[test]
    fn test_clear_drops_rows_only() {
        let tier = text_tier();
        let key = FingerprintKey::new(42);
        tier.put(key, list_envelope()).unwrap();

        tier.clear().unwrap();
        assert_eq!(tier.row_count().unwrap(), 0);
        assert!(tier.get_typed::<Vec<String>>(key).unwrap().is_none());
        // Metadata survives a tier-level clear
        assert!(tier.metadata().contains(key));
        let mut sink: Vec<u8> = Vec::new();
        assert!(matches!(
            tier.stream_into(key, &mut sink),
            Err(CacheError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_file_backed_tier_recreates_table() {
        let dir = tempdir().unwrap();
        let config = SqliteTierConfig {
            path: Some(dir.path().join("nested").join("cache.db")),
            ..Default::default()
        };

        {
            let tier = SqliteTier::new(config.clone(), SerdeFormat::Json, Duration::from_secs(100)).unwrap();
            tier.put(FingerprintKey::new(1), list_envelope()).unwrap();
            assert_eq!(tier.row_count().unwrap(), 1);
        }

        let reopened = SqliteTier::new(config, SerdeFormat::Json, Duration::from_secs(100)).unwrap();
        assert_eq!(reopened.row_count().unwrap(), 0);
    }

    #[test]
    fn test_put_without_payload_is_rejected() {
        let tier = text_tier();
        let envelope: ResultEnvelope<Vec<String>> =
            ResultEnvelope::for_query(ResultShapeKind::FetchListByQuery, "SELECT 1");
        assert!(matches!(
            tier.put(FingerprintKey::new(3), envelope),
            Err(CacheError::InvalidOperation(_))
        ));
    }
}
