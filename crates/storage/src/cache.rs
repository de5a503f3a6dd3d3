use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

/// Errors from the Compressed Cache (C7). `Miss` and `Expired` are expected
/// control flow, not taxonomy failures — callers treat them as "not found"
/// rather than mapping them into [`jobharvest_core::IngestError`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache miss for {0}")]
    Miss(String),
    #[error("cache entry expired for {0}")]
    Expired(String),
    #[error("corrupt blob for {0}: {1}")]
    Corrupt(String, String),
    #[error("cache io error: {0}")]
    Io(String),
}

impl CacheError {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss(_) | CacheError::Expired(_))
    }
}

/// Stat returned from a successful [`CompressedCache::put`] — feeds the
/// Cache Index's per-entry size and ratio fields (§4.8).
pub struct CacheBlobStat {
    pub path: PathBuf,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
}

impl CacheBlobStat {
    pub fn compression_ratio(&self) -> f64 {
        if self.uncompressed_size == 0 {
            0.0
        } else {
            self.compressed_size as f64 / self.uncompressed_size as f64
        }
    }
}

/// Content-addressed, gzip-compressed blob store (§4.7). Writes go through
/// a temp file + fsync + atomic rename so a crash mid-write never leaves a
/// half-written blob visible under its final name.
pub struct CompressedCache {
    dir: PathBuf,
    compression_level: u32,
    max_age_hours: u64,
}

impl CompressedCache {
    pub fn new(dir: impl Into<PathBuf>, compression_level: u32, max_age_hours: u64) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            compression_level: compression_level.clamp(1, 9),
            max_age_hours,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, cache_key: &str) -> PathBuf {
        self.dir.join(format!("{cache_key}.json.gz"))
    }

    /// Serializes, gzip-compresses, and atomically persists `value` under
    /// `cache_key`. Idempotent: re-putting the same key overwrites via the
    /// same temp-then-rename sequence.
    pub fn put<T: Serialize>(&self, cache_key: &str, value: &T) -> Result<CacheBlobStat, CacheError> {
        let json = serde_json::to_vec(value).map_err(|e| CacheError::Io(e.to_string()))?;
        let uncompressed_size = json.len() as u64;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.compression_level));
        encoder
            .write_all(&json)
            .map_err(|e| CacheError::Io(e.to_string()))?;
        let compressed = encoder.finish().map_err(|e| CacheError::Io(e.to_string()))?;
        let compressed_size = compressed.len() as u64;

        let final_path = self.blob_path(cache_key);
        let tmp_path = self.dir.join(format!("{cache_key}.json.gz.tmp"));
        {
            let mut f = fs::File::create(&tmp_path).map_err(|e| CacheError::Io(e.to_string()))?;
            f.write_all(&compressed).map_err(|e| CacheError::Io(e.to_string()))?;
            f.sync_all().map_err(|e| CacheError::Io(e.to_string()))?;
        }
        fs::rename(&tmp_path, &final_path).map_err(|e| CacheError::Io(e.to_string()))?;

        Ok(CacheBlobStat {
            path: final_path,
            uncompressed_size,
            compressed_size,
        })
    }

    pub fn age_seconds(&self, cache_key: &str) -> Result<u64, CacheError> {
        let path = self.blob_path(cache_key);
        let meta = fs::metadata(&path).map_err(|_| CacheError::Miss(cache_key.to_string()))?;
        let modified = meta.modified().map_err(|e| CacheError::Io(e.to_string()))?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        Ok(age.as_secs())
    }

    /// Reads, decompresses, and deserializes a blob. Fails with `expired`
    /// once `age` exceeds `max_age_hours`, and quarantines (renames with a
    /// `.corrupt` suffix) any blob that fails to decompress or parse — the
    /// cache never hands back a partial object (§4.7).
    pub fn get<T: DeserializeOwned>(&self, cache_key: &str) -> Result<T, CacheError> {
        let age_secs = self.age_seconds(cache_key)?;
        if self.max_age_hours > 0 && age_secs > self.max_age_hours * 3600 {
            return Err(CacheError::Expired(cache_key.to_string()));
        }

        let path = self.blob_path(cache_key);
        let compressed = fs::read(&path).map_err(|e| CacheError::Io(e.to_string()))?;

        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut json = Vec::new();
        if decoder.read_to_end(&mut json).is_err() {
            self.quarantine(cache_key);
            return Err(CacheError::Corrupt(cache_key.to_string(), "gzip decode failed".into()));
        }

        serde_json::from_slice(&json).map_err(|e| {
            self.quarantine(cache_key);
            CacheError::Corrupt(cache_key.to_string(), e.to_string())
        })
    }

    pub fn delete(&self, cache_key: &str) -> Result<(), CacheError> {
        let path = self.blob_path(cache_key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e.to_string())),
        }
    }

    fn quarantine(&self, cache_key: &str) {
        let path = self.blob_path(cache_key);
        let quarantined = self.dir.join(format!("{cache_key}.json.gz.corrupt"));
        if let Err(e) = fs::rename(&path, &quarantined) {
            warn!(cache_key, error = %e, "failed to quarantine corrupt blob");
        } else {
            warn!(cache_key, "quarantined corrupt blob");
        }
    }

    /// Lists all live (non-quarantined) cache keys by scanning blob files,
    /// used by [`crate::index::CacheIndex`] to rebuild from disk.
    pub fn list_keys(&self) -> std::io::Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(key) = name.strip_suffix(".json.gz") {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    /// Deletes every blob older than `max_age_hours`, for the `prune-cache`
    /// operation (§6). Callers should rebuild the [`crate::index::CacheIndex`]
    /// afterward so it no longer references pruned keys.
    pub fn prune_expired(&self, max_age_hours: u64) -> std::io::Result<PruneOutcome> {
        let mut outcome = PruneOutcome::default();
        for key in self.list_keys()? {
            outcome.scanned += 1;
            let age_secs = match self.age_seconds(&key) {
                Ok(secs) => secs,
                Err(_) => continue,
            };
            if max_age_hours > 0 && age_secs > max_age_hours * 3600 {
                let path = self.blob_path(&key);
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if self.delete(&key).is_ok() {
                    outcome.pruned += 1;
                    outcome.reclaimed_bytes += size;
                }
            }
        }
        Ok(outcome)
    }
}

/// Result of [`CompressedCache::prune_expired`], folded into the CLI's
/// [`jobharvest_core::PruneReport`] by the caller.
#[derive(Debug, Default)]
pub struct PruneOutcome {
    pub scanned: usize,
    pub pruned: usize,
    pub reclaimed_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompressedCache::new(dir.path(), 6, 0).unwrap();
        let value = Sample { a: 1, b: "hi".into() };
        cache.put("key1", &value).unwrap();
        let got: Sample = cache.get("key1").unwrap();
        assert_eq!(got, value);
    }

    #[test]
    fn corrupt_blob_is_quarantined_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompressedCache::new(dir.path(), 6, 0).unwrap();
        let path = dir.path().join("bad.json.gz");
        fs::write(&path, b"not gzip").unwrap();

        let err = cache.get::<Sample>("bad").unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_, _)));
        assert!(!path.exists());
        assert!(dir.path().join("bad.json.gz.corrupt").exists());
    }

    #[test]
    fn expired_entry_is_reported_distinctly_from_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompressedCache::new(dir.path(), 6, 1).unwrap();
        cache.put("key1", &Sample { a: 1, b: "x".into() }).unwrap();

        let ancient = SystemTime::now() - std::time::Duration::from_secs(3600 * 5);
        let path = dir.path().join("key1.json.gz");
        let file = fs::File::open(&path).unwrap();
        file.set_modified(ancient).unwrap();

        let err = cache.get::<Sample>("key1").unwrap_err();
        assert!(matches!(err, CacheError::Expired(_)));

        let err2 = cache.get::<Sample>("missing").unwrap_err();
        assert!(matches!(err2, CacheError::Miss(_)));
    }
}
