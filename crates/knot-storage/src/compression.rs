//! Loose-object record encoding.
//!
//! Objects are stored the way git stores loose objects: zlib over
//! `"<type> <size>\0<content>"`.

use crate::{GitObject, ObjectType, Result, StorageError};
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

/// Compression level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// No compression
    None,
    /// Fast compression (lower ratio)
    Fast,
    /// Default compression (balanced)
    #[default]
    Default,
    /// Best compression (slower, higher ratio)
    Best,
}

impl CompressionLevel {
    /// Converts to flate2 compression level.
    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::None => flate2::Compression::none(),
            CompressionLevel::Fast => flate2::Compression::fast(),
            CompressionLevel::Default => flate2::Compression::default(),
            CompressionLevel::Best => flate2::Compression::best(),
        }
    }
}

/// Compresses an object into a loose-object record.
pub fn encode_record(object: &GitObject, level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level.to_flate2());
    encoder
        .write_all(object.object_type.header(object.data.len()).as_bytes())
        .map_err(|e| StorageError::Compression(e.to_string()))?;
    encoder
        .write_all(&object.data)
        .map_err(|e| StorageError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| StorageError::Compression(e.to_string()))
}

/// Inflates a loose-object record and checks its header.
///
/// The returned object's id is recomputed from the content; callers compare
/// it against the id the record was filed under.
pub fn decode_record(record: &[u8]) -> Result<GitObject> {
    let mut decoder = ZlibDecoder::new(record);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| StorageError::Compression(e.to_string()))?;

    let nul = inflated
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| StorageError::Integrity("record header missing NUL".to_string()))?;
    let header = std::str::from_utf8(&inflated[..nul])
        .map_err(|_| StorageError::Integrity("record header is not ascii".to_string()))?;
    let (kind, size) = header
        .split_once(' ')
        .ok_or_else(|| StorageError::Integrity(format!("invalid record header: {}", header)))?;

    let object_type = ObjectType::parse(kind)?;
    let size: usize = size
        .parse()
        .map_err(|_| StorageError::Integrity(format!("invalid record size: {}", size)))?;

    let data = Bytes::from(inflated.split_off(nul + 1));
    if data.len() != size {
        return Err(StorageError::Integrity(format!(
            "record declares {} bytes but holds {}",
            size,
            data.len()
        )));
    }
    Ok(GitObject::new(object_type, data))
}

/// Compression statistics for monitoring.
#[derive(Debug, Default)]
pub struct CompressionStats {
    /// Total bytes before compression.
    pub input_bytes: AtomicU64,
    /// Total bytes after compression.
    pub output_bytes: AtomicU64,
    /// Number of compression operations.
    pub compress_count: AtomicU64,
    /// Number of decompression operations.
    pub decompress_count: AtomicU64,
}

impl CompressionStats {
    /// Creates new compression stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a compression operation.
    pub fn record_compress(&self, input_size: u64, output_size: u64) {
        self.input_bytes.fetch_add(input_size, Ordering::Relaxed);
        self.output_bytes.fetch_add(output_size, Ordering::Relaxed);
        self.compress_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a decompression operation.
    pub fn record_decompress(&self) {
        self.decompress_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the stats.
    pub fn snapshot(&self) -> CompressionStatsSnapshot {
        CompressionStatsSnapshot {
            input_bytes: self.input_bytes.load(Ordering::Relaxed),
            output_bytes: self.output_bytes.load(Ordering::Relaxed),
            compress_count: self.compress_count.load(Ordering::Relaxed),
            decompress_count: self.decompress_count.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of compression statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionStatsSnapshot {
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub compress_count: u64,
    pub decompress_count: u64,
}

impl CompressionStatsSnapshot {
    /// Returns the compression ratio (output/input).
    pub fn compression_ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            1.0
        } else {
            self.output_bytes as f64 / self.input_bytes as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip_all_levels() {
        let original = GitObject::blob(b"Hello, World!".repeat(50));
        for level in [
            CompressionLevel::None,
            CompressionLevel::Fast,
            CompressionLevel::Default,
            CompressionLevel::Best,
        ] {
            let record = encode_record(&original, level).unwrap();
            let decoded = decode_record(&record).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_record_size_mismatch() {
        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"blob 10\0short").unwrap();
        let record = encoder.finish().unwrap();
        assert!(matches!(decode_record(&record), Err(StorageError::Integrity(_))));
    }

    #[test]
    fn test_record_garbage() {
        assert!(matches!(decode_record(b"not zlib"), Err(StorageError::Compression(_))));
    }

    #[test]
    fn test_compression_level_serde() {
        let level: CompressionLevel = serde_json::from_str("\"best\"").unwrap();
        assert_eq!(level, CompressionLevel::Best);
        assert_eq!(CompressionLevel::default(), CompressionLevel::Default);
    }

    #[test]
    fn test_compression_stats() {
        let stats = CompressionStats::new();

        stats.record_compress(1000, 500);
        stats.record_compress(1000, 500);
        stats.record_decompress();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.input_bytes, 2000);
        assert_eq!(snapshot.output_bytes, 1000);
        assert_eq!(snapshot.compress_count, 2);
        assert_eq!(snapshot.decompress_count, 1);
        assert!((snapshot.compression_ratio() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_compression_ratio_zero_input() {
        assert_eq!(CompressionStats::new().snapshot().compression_ratio(), 1.0);
    }
}
