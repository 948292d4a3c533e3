//! Persistence of fitted regime models.
//!
//! A cache entry holds the model and the fingerprint of the features it was
//! fit on, stored together so a reader never sees one without the other.

use crate::error::{PipelineError, Result};
use crate::regime::RegimeModel;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Model plus the fingerprint of its training features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRegimeModel {
    pub fingerprint: String,
    pub model: RegimeModel,
}

/// Storage for fitted regime models.
///
/// Implementations must make `write` atomic: a concurrent `read` observes
/// either the previous entry or the new one in full.
pub trait RegimeCacheStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<CachedRegimeModel>>;
    fn write(&self, key: &str, entry: &CachedRegimeModel) -> Result<()>;
}

/// Cache key for a model with `n_regimes` states.
pub fn cache_key(n_regimes: usize) -> String {
    format!("regime_hmm_{}", n_regimes)
}

fn lock_error<T>(_: T) -> PipelineError {
    PipelineError::CacheError("Cache lock poisoned".to_string())
}

/// Process-local store, mostly for tests.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<String, CachedRegimeModel>>,
    writes: Mutex<usize>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed writes.
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }
}

impl RegimeCacheStore for InMemoryCacheStore {
    fn read(&self, key: &str) -> Result<Option<CachedRegimeModel>> {
        let entries = self.entries.lock().map_err(lock_error)?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, entry: &CachedRegimeModel) -> Result<()> {
        let mut entries = self.entries.lock().map_err(lock_error)?;
        entries.insert(key.to_string(), entry.clone());
        *self.writes.lock().map_err(lock_error)? += 1;
        Ok(())
    }
}

/// One JSON document per key in a directory.
///
/// Writes go to a uniquely named temporary file in the same directory and
/// are renamed over the target; a mutex serializes writers in this process.
pub struct FileCacheStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl RegimeCacheStore for FileCacheStore {
    fn read(&self, key: &str) -> Result<Option<CachedRegimeModel>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let entry: CachedRegimeModel = serde_json::from_str(&content).map_err(|e| {
            PipelineError::CacheError(format!("Corrupt cache entry {}: {}", path.display(), e))
        })?;
        Ok(Some(entry))
    }

    fn write(&self, key: &str, entry: &CachedRegimeModel) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(lock_error)?;
        let target = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));

        let json = serde_json::to_string(entry)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!("Wrote regime model cache {}", target.display());
        Ok(())
    }
}
