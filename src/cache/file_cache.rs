use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::constants::PAYLOAD_EXTENSION;
use crate::utils::{write_atomic, ScanError};

/// Payload file operations, one file per cache key
#[derive(Debug)]
pub struct FileCache {
    payload_dir: PathBuf,
}

impl FileCache {
    /// Create a payload store, ensuring the directory exists
    pub fn new(payload_dir: PathBuf) -> Result<Self, ScanError> {
        fs::create_dir_all(&payload_dir)?;
        Ok(Self { payload_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.payload_dir
    }

    /// Generate payload file path for a key
    pub fn payload_path(&self, key: &str) -> PathBuf {
        self.payload_dir.join(format!("{}.{}", key, PAYLOAD_EXTENSION))
    }

    /// Serialize and compress a payload
    pub fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, ScanError> {
        let serialized =
            bincode::serialize(data).map_err(|e| ScanError::SerializationError(e.to_string()))?;
        let compressed = lz4::block::compress(&serialized, None, true)?;
        Ok(compressed)
    }

    /// Decompress and deserialize a payload
    pub fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, ScanError> {
        let decompressed =
            lz4::block::decompress(bytes, None).map_err(|e| ScanError::CacheCorruption {
                key: key.to_string(),
                reason: format!("decompression failed: {}", e),
            })?;
        bincode::deserialize(&decompressed).map_err(|e| ScanError::CacheCorruption {
            key: key.to_string(),
            reason: format!("payload does not match its entry type: {}", e),
        })
    }

    /// Write encoded bytes for a key
    pub fn save(&self, key: &str, bytes: &[u8]) -> Result<(), ScanError> {
        write_atomic(&self.payload_path(key), bytes)
    }

    /// Load and decode the payload for a key
    ///
    /// A missing file is reported as corruption: callers only ask for keys
    /// whose metadata says the payload exists.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<T, ScanError> {
        let bytes = match fs::read(self.payload_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ScanError::CacheCorruption {
                    key: key.to_string(),
                    reason: "payload file missing".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Self::decode(key, &bytes)
    }

    /// Remove payload file for a key
    pub fn remove(&self, key: &str) -> Result<(), ScanError> {
        match fs::remove_file(self.payload_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Keys that have a payload file on disk, with their sizes
    pub fn stored_keys(&self) -> Result<Vec<(String, u64)>, ScanError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.payload_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PAYLOAD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                keys.push((stem.to_string(), size));
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Remove every payload file
    pub fn clear(&self) -> Result<(), ScanError> {
        if self.payload_dir.exists() {
            fs::remove_dir_all(&self.payload_dir)?;
        }
        fs::create_dir_all(&self.payload_dir)?;
        Ok(())
    }
}
