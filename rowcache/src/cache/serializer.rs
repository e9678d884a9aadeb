use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{CacheError, Result, StoredContent};

/// Serialize/deserialize pair used by the persistent tier.
///
/// `is_list` is derived from the entry's shape kind and lets formats check
/// the stored document against the expected shape before decoding.
pub trait PayloadSerializer: Send + Sync + 'static {
    /// Whether this serializer can produce `StoredContent::Text`
    fn supports_text(&self) -> bool;

    fn serialize<T: Serialize>(&self, value: &T, as_text: bool) -> Result<StoredContent>;

    fn deserialize<T: DeserializeOwned>(&self, content: &StoredContent, is_list: bool) -> Result<T>;
}

/// Built-in serde formats
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SerdeFormat {
    /// JSON text (the only format usable with text affinity)
    #[default]
    Json,
    /// MessagePack with named fields
    #[serde(alias = "messagepack")]
    Msgpack,
    /// bincode standard configuration
    Bincode,
}

impl PayloadSerializer for SerdeFormat {
    fn supports_text(&self) -> bool {
        matches!(self, Self::Json)
    }

    fn serialize<T: Serialize>(&self, value: &T, as_text: bool) -> Result<StoredContent> {
        if as_text && !self.supports_text() {
            return Err(CacheError::Configuration(format!(
                "{:?} cannot produce text content",
                self
            )));
        }

        let content = match self {
            Self::Json if as_text => serde_json::to_string(value)
                .map(StoredContent::Text)
                .map_err(|e| CacheError::UnsupportedType(e.to_string()))?,
            Self::Json => serde_json::to_vec(value)
                .map(StoredContent::Binary)
                .map_err(|e| CacheError::UnsupportedType(e.to_string()))?,
            Self::Msgpack => rmp_serde::to_vec_named(value)
                .map(StoredContent::Binary)
                .map_err(|e| CacheError::UnsupportedType(e.to_string()))?,
            Self::Bincode => bincode::serde::encode_to_vec(value, bincode::config::standard())
                .map(StoredContent::Binary)
                .map_err(|e| CacheError::UnsupportedType(e.to_string()))?,
        };

        debug!("{:?} serialized payload: {} bytes", self, content.len());
        Ok(content)
    }

    fn deserialize<T: DeserializeOwned>(&self, content: &StoredContent, is_list: bool) -> Result<T> {
        let bytes = content.as_bytes();
        match self {
            Self::Json => {
                if is_list && !looks_like_json_array(bytes) {
                    return Err(CacheError::Serialization(
                        "expected a JSON array for a list-shaped entry".to_string(),
                    ));
                }
                serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
            }
            Self::Msgpack => {
                rmp_serde::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
            }
            Self::Bincode => {
                bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                    .map(|(value, _)| value)
                    .map_err(|e| CacheError::Serialization(e.to_string()))
            }
        }
    }
}

fn looks_like_json_array(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'[')
}
