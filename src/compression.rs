// gzip wrapper around the SQL dump, applied before encryption

use crate::{BackupError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Default gzip level (0-9, 6 is a good balance)
pub const DEFAULT_LEVEL: u32 = 6;

/// Compress data using gzip at the default level
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    compress_with_level(data, DEFAULT_LEVEL)
}

/// Compress data using gzip; levels above 9 are clamped
pub fn compress_with_level(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder
        .write_all(data)
        .map_err(|e| BackupError::Compression(format!("Failed to compress data: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| BackupError::Compression(format!("Failed to finalize compression: {}", e)))
}

/// Decompress a gzip stream
pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| BackupError::Compression(format!("Failed to decompress data: {}", e)))?;
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        let compressed = compress(&[]).unwrap();
        // gzip header and trailer are always present
        assert!(!compressed.is_empty());
        assert!(decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn test_sql_dump_shrinks() {
        let dump = "INSERT INTO campaign_budget VALUES (1, 'search', 1200.00);\n".repeat(500);
        let compressed = compress_with_level(dump.as_bytes(), 9).unwrap();

        assert!(compressed.len() < dump.len() / 10);
        assert_eq!(decompress(&compressed).unwrap(), dump.as_bytes());
    }

    #[test]
    fn test_gzip_magic() {
        let compressed = compress(b"SELECT 1;").unwrap();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_corrupt_input() {
        let err = decompress(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, BackupError::Compression(_)));
    }
}
