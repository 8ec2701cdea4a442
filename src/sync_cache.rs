//! Durable sync-state record.
//!
//! A single JSON object `{lastSyncTime, fileCount}` at a configured path,
//! written atomically (temp file + rename) at the end of every pipeline
//! run. An absent, unreadable, or partially-written file is treated as
//! "no prior sync"; the pipeline reconciles against the store contents,
//! so losing the record is never destructive.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::models::SyncCacheRecord;

/// Handle to the on-disk sync cache.
pub struct SyncCache {
    path: PathBuf,
}

impl SyncCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the last record; `None` for absent or malformed files.
    pub fn load(&self) -> Option<SyncCacheRecord> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Atomically replace the record (write temp file, then rename).
    pub fn store(&self, record: &SyncCacheRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("cannot create {}", parent.display()))?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("cannot write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("cannot replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_file_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = SyncCache::new(dir.path().join("cache.json"));
        assert!(cache.load().is_none());
    }

    #[test]
    fn roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = SyncCache::new(dir.path().join("cache.json"));
        let record = SyncCacheRecord {
            last_sync_time: "2024-06-01T12:00:00Z".to_string(),
            file_count: 17,
        };
        cache.store(&record).unwrap();
        assert_eq!(cache.load(), Some(record));
    }

    #[test]
    fn partial_write_treated_as_absent() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{\"lastSyncTime\": \"2024-").unwrap();
        let cache = SyncCache::new(&path);
        assert!(cache.load().is_none());
    }

    #[test]
    fn store_overwrites_prior_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = SyncCache::new(dir.path().join("cache.json"));
        for count in [1u64, 2, 3] {
            cache
                .store(&SyncCacheRecord {
                    last_sync_time: format!("2024-06-0{}T00:00:00Z", count),
                    file_count: count,
                })
                .unwrap();
        }
        assert_eq!(cache.load().unwrap().file_count, 3);
    }
}
