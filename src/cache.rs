//! On-disk snapshots of a normalized dataset.
//!
//! A snapshot is keyed by the source file stem plus a short digest of the
//! sorted sheet names that produced it, and is trusted only while it is at
//! least as new as the source file. Every failure here is a soft miss: the
//! caller simply reloads from the workbook.

use crate::dataset::SalesDataset;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotOut<'a> {
    format_version: u32,
    signature: &'a str,
    dataset: &'a SalesDataset,
}

#[derive(Deserialize)]
struct SnapshotIn {
    format_version: u32,
    signature: String,
    dataset: SalesDataset,
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The sorted, comma-joined sheet names a snapshot was built from.
    pub fn signature(sheet_names: &[String]) -> String {
        let mut sorted = sheet_names.to_vec();
        sorted.sort();
        sorted.join(",")
    }

    pub fn snapshot_path(&self, source: &Path, sheet_names: &[String]) -> PathBuf {
        let digest = format!("{:x}", md5::compute(Self::signature(sheet_names).as_bytes()));
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "dataset".to_string());
        self.dir.join(format!("{}_{}.json", stem, &digest[..10]))
    }

    /// Returns the cached dataset when a fresh, readable snapshot exists.
    pub fn load(&self, source: &Path, sheet_names: &[String]) -> Option<SalesDataset> {
        let path = self.snapshot_path(source, sheet_names);
        if !path.exists() {
            debug!("No snapshot at {}", path.display());
            return None;
        }

        let (cached_at, source_at) = match (modified(&path), modified(source)) {
            (Some(c), Some(s)) => (c, s),
            _ => {
                warn!("Could not read timestamps for snapshot {}", path.display());
                return None;
            }
        };
        if cached_at < source_at {
            debug!("Snapshot {} is older than its source", path.display());
            return None;
        }

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read snapshot {}: {}", path.display(), e);
                return None;
            }
        };
        let snapshot: SnapshotIn = match serde_json::from_str(&text) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Discarding unreadable snapshot {}: {}", path.display(), e);
                return None;
            }
        };

        let signature = Self::signature(sheet_names);
        if snapshot.format_version != FORMAT_VERSION || snapshot.signature != signature {
            warn!("Discarding stale snapshot {}", path.display());
            return None;
        }
        Some(snapshot.dataset)
    }

    /// Writes a snapshot through a temporary file so readers never observe a
    /// partial document. Concurrent writers race and the last rename wins.
    pub fn store(&self, source: &Path, sheet_names: &[String], dataset: &SalesDataset) {
        let path = self.snapshot_path(source, sheet_names);
        let signature = Self::signature(sheet_names);
        let snapshot = SnapshotOut {
            format_version: FORMAT_VERSION,
            signature: &signature,
            dataset,
        };

        let result = fs::create_dir_all(&self.dir)
            .map_err(|e| e.to_string())
            .and_then(|_| serde_json::to_string(&snapshot).map_err(|e| e.to_string()))
            .and_then(|json| {
                let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
                fs::write(&tmp, json)
                    .and_then(|_| fs::rename(&tmp, &path))
                    .map_err(|e| {
                        let _ = fs::remove_file(&tmp);
                        e.to_string()
                    })
            });

        match result {
            Ok(()) => debug!("Stored snapshot {}", path.display()),
            Err(e) => warn!("Failed to store snapshot {}: {}", path.display(), e),
        }
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ReturnsSource;
    use crate::schema::SalesRecord;
    use std::time::Duration;

    fn sample_dataset() -> SalesDataset {
        SalesDataset::new(
            vec![SalesRecord {
                product_code: "42".into(),
                units_sold: Some(3.0),
                gross_revenue: 29.97,
                ..Default::default()
            }],
            Vec::new(),
            ReturnsSource::Embedded,
        )
    }

    #[test]
    fn test_signature_ignores_order() {
        let a = SnapshotCache::signature(&["VENDA2".into(), "VENDA1".into()]);
        let b = SnapshotCache::signature(&["VENDA1".into(), "VENDA2".into()]);
        assert_eq!(a, b);
        assert_eq!(a, "VENDA1,VENDA2");
    }

    #[test]
    fn test_snapshot_path_uses_stem_and_short_digest() {
        let cache = SnapshotCache::new("/tmp/cache");
        let path = cache.snapshot_path(Path::new("/data/BASE.xlsx"), &["VENDA".into()]);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("BASE_"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "BASE_".len() + 10 + ".json".len());
    }

    #[test]
    fn test_store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("BASE.xlsx");
        fs::write(&source, b"workbook").unwrap();
        let cache = SnapshotCache::new(dir.path().join("cache"));
        let sheets = vec!["VENDA".to_string()];

        assert!(cache.load(&source, &sheets).is_none());
        cache.store(&source, &sheets, &sample_dataset());
        assert_eq!(cache.load(&source, &sheets), Some(sample_dataset()));
    }

    #[test]
    fn test_snapshot_older_than_source_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("BASE.xlsx");
        fs::write(&source, b"workbook").unwrap();
        let cache = SnapshotCache::new(dir.path().join("cache"));
        let sheets = vec!["VENDA".to_string()];

        cache.store(&source, &sheets, &sample_dataset());
        assert!(cache.load(&source, &sheets).is_some());

        fs::write(&source, b"workbook, edited").unwrap();
        let snapshot_at = modified(&cache.snapshot_path(&source, &sheets)).unwrap();
        fs::File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(snapshot_at + Duration::from_secs(60))
            .unwrap();

        assert!(cache.load(&source, &sheets).is_none());
    }

    #[test]
    fn test_corrupt_snapshot_is_a_soft_miss() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("BASE.xlsx");
        fs::write(&source, b"workbook").unwrap();
        let cache = SnapshotCache::new(dir.path());
        let sheets = vec!["VENDA".to_string()];

        fs::write(cache.snapshot_path(&source, &sheets), b"{not json").unwrap();
        assert!(cache.load(&source, &sheets).is_none());
    }
}
