//! Run metadata, content hashes and fingerprints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

/// Metadata about a data file used in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFileMetadata {
    pub path: String,
    pub size: u64,
    /// SHA256 checksum of the file contents.
    pub checksum: String,
}

/// Reproducibility record attached to every pipeline result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub version: String,
    /// Hash of the serialized run options.
    pub config_hash: String,
    pub data_files: Vec<DataFileMetadata>,
}

impl RunMetadata {
    pub fn new<T: Serialize>(options: &T) -> Self {
        Self {
            run_id: generate_run_id(),
            created_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: compute_config_hash(options),
            data_files: Vec::new(),
        }
    }

    /// Record a data file; unreadable files are logged and skipped.
    pub fn track_file(&mut self, path: impl AsRef<Path>) {
        match track_data_file(path.as_ref()) {
            Ok(meta) => self.data_files.push(meta),
            Err(e) => warn!("Could not checksum {}: {}", path.as_ref().display(), e),
        }
    }
}

/// Compute SHA256 checksum of a file.
pub fn compute_file_checksum(path: impl AsRef<Path>) -> std::io::Result<String> {
    let data = std::fs::read(path.as_ref())?;
    Ok(compute_hash(&data))
}

/// Compute SHA256 hash of arbitrary bytes.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// Compute configuration hash from JSON serialization.
pub fn compute_config_hash<T: Serialize>(config: &T) -> String {
    match serde_json::to_vec(config) {
        Ok(bytes) => compute_hash(&bytes),
        Err(e) => {
            warn!("Failed to serialize config for hashing: {}", e);
            String::new()
        }
    }
}

/// Content fingerprint of a feature matrix: SHA256 over its shape and the
/// little-endian bytes of its last `tail_rows` rows.
pub fn feature_fingerprint(features: &[Vec<f64>], tail_rows: usize) -> String {
    let rows = features.len();
    let cols = features.first().map(|r| r.len()).unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update((rows as u64).to_le_bytes());
    hasher.update((cols as u64).to_le_bytes());
    for row in &features[rows.saturating_sub(tail_rows)..] {
        for v in row {
            hasher.update(v.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Generate a unique run ID.
pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}

/// Track data file metadata.
pub fn track_data_file(path: impl AsRef<Path>) -> std::io::Result<DataFileMetadata> {
    let path = path.as_ref();
    let size = std::fs::metadata(path)?.len();
    let checksum = compute_file_checksum(path)?;
    Ok(DataFileMetadata {
        path: path.display().to_string(),
        size,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");
        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_fingerprint_uses_tail_and_shape() {
        let mut a: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64, 1.0]).collect();
        let base = feature_fingerprint(&a, 64);

        // Changing a row outside the tail keeps the fingerprint.
        a[0][0] = 999.0;
        assert_eq!(feature_fingerprint(&a, 64), base);

        // Changing the tail changes it.
        a[99][1] = 2.0;
        assert_ne!(feature_fingerprint(&a, 64), base);

        // So does the shape.
        let b: Vec<Vec<f64>> = (1..100).map(|i| vec![i as f64, 1.0]).collect();
        let c: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64, 1.0]).collect();
        assert_ne!(feature_fingerprint(&b, 64), feature_fingerprint(&c, 64));
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(generate_run_id(), generate_run_id());
    }

    #[test]
    fn test_track_data_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "date,SPY\n2024-01-02,100").unwrap();
        temp_file.flush().unwrap();

        let mut meta = RunMetadata::new(&"options");
        meta.track_file(temp_file.path());
        meta.track_file("/definitely/not/here.csv");
        assert_eq!(meta.data_files.len(), 1);
        assert_eq!(meta.data_files[0].checksum.len(), 64);
        assert!(meta.data_files[0].size > 0);
        assert_eq!(meta.config_hash, compute_config_hash(&"options"));
    }
}
