use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tracing::debug;

use crate::core::{CacheError, Result};

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    #[default]
    None,
    /// LZ4 - Fast compression/decompression
    Lz4,
    /// Zstandard - Better compression ratio
    Zstd,
}

impl CompressionAlgorithm {
    /// Frame tag written ahead of framed payloads
    const fn tag(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lz4 => 1,
            Self::Zstd => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Lz4),
            2 => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// Compression configuration for the persistent tier's codec stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Algorithm applied to payloads at or above `min_payload_size`
    pub algorithm: CompressionAlgorithm,
    /// Minimum payload size to compress (bytes)
    pub min_payload_size: usize,
    /// Zstd compression level (1-22)
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            min_payload_size: 1024, // Don't compress < 1KB
            zstd_level: 3,          // Balanced compression
        }
    }
}

impl CompressionConfig {
    pub fn with_algorithm(algorithm: CompressionAlgorithm) -> Self {
        Self {
            algorithm,
            ..Default::default()
        }
    }
}

/// Optional codec stage between serialization and storage.
///
/// When enabled every payload is framed with a one-byte algorithm tag so
/// payloads skipped for being small still decode. When disabled payloads
/// pass through unframed.
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    /// Create new compressor with configuration
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.algorithm != CompressionAlgorithm::None
    }

    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.config.algorithm
    }

    /// Encode a serialized payload for storage
    pub fn encode(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        if !self.is_enabled() {
            return Ok(data);
        }

        let algorithm = if data.len() < self.config.min_payload_size {
            debug!("Skipping compression: size={} bytes", data.len());
            CompressionAlgorithm::None
        } else {
            self.config.algorithm
        };

        let body = match algorithm {
            CompressionAlgorithm::None => data,
            CompressionAlgorithm::Lz4 => self.compress_lz4(&data)?,
            CompressionAlgorithm::Zstd => self.compress_zstd(&data)?,
        };

        let mut framed = Vec::with_capacity(body.len() + 1);
        framed.push(algorithm.tag());
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    /// Decode a stored payload back to serialized bytes
    pub fn decode(&self, stored: Vec<u8>) -> Result<Vec<u8>> {
        if !self.is_enabled() {
            return Ok(stored);
        }

        let Some((&tag, body)) = stored.split_first() else {
            return Err(CacheError::Compression("empty framed payload".to_string()));
        };
        let algorithm = CompressionAlgorithm::from_tag(tag)
            .ok_or_else(|| CacheError::Compression(format!("unknown frame tag {}", tag)))?;

        match algorithm {
            CompressionAlgorithm::None => Ok(body.to_vec()),
            CompressionAlgorithm::Lz4 => self.decompress_lz4(body),
            CompressionAlgorithm::Zstd => self.decompress_zstd(body),
        }
    }

    /// Compress using LZ4
    fn compress_lz4(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = lz4::EncoderBuilder::new()
            .level(4) // Fast compression
            .build(Vec::new())
            .map_err(compression_error)?;

        encoder.write_all(data).map_err(compression_error)?;
        let (compressed, result) = encoder.finish();
        result.map_err(compression_error)?;

        debug!(
            "LZ4 compressed: {} → {} bytes (ratio: {:.2}x)",
            data.len(),
            compressed.len(),
            compression_ratio(data.len(), compressed.len())
        );

        Ok(compressed)
    }

    /// Decompress using LZ4
    fn decompress_lz4(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = lz4::Decoder::new(data).map_err(compression_error)?;
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(compression_error)?;

        debug!(
            "LZ4 decompressed: {} → {} bytes",
            data.len(),
            decompressed.len()
        );
        Ok(decompressed)
    }

    /// Compress using Zstd
    fn compress_zstd(&self, data: &[u8]) -> Result<Vec<u8>> {
        let compressed =
            zstd::encode_all(data, self.config.zstd_level).map_err(compression_error)?;

        debug!(
            "Zstd compressed: {} → {} bytes (ratio: {:.2}x)",
            data.len(),
            compressed.len(),
            compression_ratio(data.len(), compressed.len())
        );

        Ok(compressed)
    }

    /// Decompress using Zstd
    fn decompress_zstd(&self, data: &[u8]) -> Result<Vec<u8>> {
        let decompressed = zstd::decode_all(data).map_err(compression_error)?;

        debug!(
            "Zstd decompressed: {} → {} bytes",
            data.len(),
            decompressed.len()
        );
        Ok(decompressed)
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

fn compression_error(err: std::io::Error) -> CacheError {
    CacheError::Compression(err.to_string())
}

/// Calculate compression ratio
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if compressed == 0 {
        return 1.0;
    }
    original as f64 / compressed as f64
}
