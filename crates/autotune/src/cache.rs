//! Per-kernel result caching.

use crate::error::{Result, TuneError};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Layout signature -> aggregated cost for one kernel.
pub type LayoutReport = BTreeMap<String, f64>;

/// Keyed store of completed kernel reports.
pub trait ReportStore: Send + Sync {
    /// A complete report for `key`, or `None` on a miss.
    fn get(&self, key: &str) -> Option<LayoutReport>;

    fn put(&self, key: &str, report: &LayoutReport) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, LayoutReport>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LayoutReport>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ReportStore for MemoryStore {
    fn get(&self, key: &str) -> Option<LayoutReport> {
        self.lock().get(key).cloned()
    }

    fn put(&self, key: &str, report: &LayoutReport) -> Result<()> {
        self.lock().insert(key.to_string(), report.clone());
        Ok(())
    }
}

/// One `<label>.tuning` JSON file per kernel under `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub const EXTENSION: &'static str = "tuning";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", file_stem(key), Self::EXTENSION))
    }

    /// Read the entry for `key`, distinguishing a miss from a corrupt file.
    pub fn load(&self, key: &str) -> Result<Option<LayoutReport>> {
        let path = self.path_for(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(TuneError::CacheCorruption {
                    key: key.to_string(),
                    reason: err.to_string(),
                })
            }
        };

        let corrupt = |reason: String| TuneError::CacheCorruption {
            key: key.to_string(),
            reason,
        };
        let report: LayoutReport = serde_json::from_slice(&data).map_err(|err| corrupt(err.to_string()))?;
        if report.is_empty() {
            return Err(corrupt("entry has no measurements".into()));
        }
        if let Some((signature, cost)) = report.iter().find(|(_, cost)| !cost.is_finite()) {
            return Err(corrupt(format!("non-finite cost {cost} for layout {signature:?}")));
        }
        Ok(Some(report))
    }

    /// Delete every cached entry; returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let io_error = |source| TuneError::Io {
            key: self.dir.display().to_string(),
            source,
        };
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(io_error(err)),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(io_error)?.path();
            if path.extension().is_some_and(|ext| ext == Self::EXTENSION) {
                fs::remove_file(&path).map_err(io_error)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl ReportStore for FileStore {
    fn get(&self, key: &str) -> Option<LayoutReport> {
        match self.load(key) {
            Ok(report) => report,
            Err(err) => {
                warn!(kernel = key, error = %err, "ignoring unusable cache entry");
                None
            }
        }
    }

    /// Write to a temporary sibling and rename, so readers never see a partial entry.
    fn put(&self, key: &str, report: &LayoutReport) -> Result<()> {
        let io_error = |source| TuneError::Io {
            key: key.to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_error)?;

        let path = self.path_for(key);
        let staging = path.with_extension(format!("{}.tmp", Self::EXTENSION));
        let blob = serde_json::to_vec_pretty(report).map_err(|err| io_error(err.into()))?;
        fs::write(&staging, blob).map_err(io_error)?;
        fs::rename(&staging, &path).map_err(io_error)?;
        Ok(())
    }
}

/// Percent-encode every byte outside `[A-Za-z0-9._-]`, `%` included, so
/// distinct labels always get distinct file names.
fn file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> LayoutReport {
        LayoutReport::from([("  A: (8, 1)".to_string(), 2.0), ("  A: (1, 4)".to_string(), 1.5)])
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("cache"));
        assert!(store.get("gemm").is_none());

        store.put("gemm", &sample_report()).unwrap();
        assert!(store.path_for("gemm").exists());
        assert_eq!(store.get("gemm"), Some(sample_report()));
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        fs::write(store.path_for("gemm"), b"{ not json").unwrap();

        assert!(matches!(
            store.load("gemm"),
            Err(TuneError::CacheCorruption { .. })
        ));
        assert!(store.get("gemm").is_none());

        fs::write(store.path_for("empty"), b"{}").unwrap();
        assert!(store.get("empty").is_none());
    }

    #[test]
    fn test_labels_are_encoded() {
        let store = FileStore::new("/tmp/cache");
        let path = store.path_for("map@state 0/1");
        assert_eq!(path.file_name().unwrap(), "map%40state%200%2F1.tuning");
        assert_eq!(store.path_for("scan").file_name().unwrap(), "scan.tuning");
    }

    #[test]
    fn test_similar_labels_get_distinct_files() {
        let store = FileStore::new("/tmp/cache");
        let labels = ["a b", "a_b", "a/b", "a%20b", "a%b"];
        let paths: std::collections::HashSet<PathBuf> = labels.iter().map(|l| store.path_for(l)).collect();
        assert_eq!(paths.len(), labels.len());
    }

    #[test]
    fn test_similar_labels_keep_separate_reports() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let other = LayoutReport::from([("  B: (1)".to_string(), 7.0)]);
        store.put("a b", &sample_report()).unwrap();
        assert!(store.get("a_b").is_none());

        store.put("a_b", &other).unwrap();
        assert_eq!(store.get("a b"), Some(sample_report()));
        assert_eq!(store.get("a_b"), Some(other));
    }

    #[test]
    fn test_clear_removes_only_tuning_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put("a", &sample_report()).unwrap();
        store.put("b", &sample_report()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(dir.path().join("notes.txt").exists());
        assert!(store.get("a").is_none());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.put("k", &sample_report()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k"), Some(sample_report()));
    }
}
