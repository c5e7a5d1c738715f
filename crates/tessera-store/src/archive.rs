use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{validate_key, ArchiveStore};

/// In-memory archive for tests and embedding.
#[derive(Default)]
pub struct InMemoryArchive {
    partitions: RwLock<BTreeMap<NaiveDate, BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across every partition.
    pub fn len(&self) -> usize {
        self.partitions
            .read()
            .map(|p| p.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArchiveStore for InMemoryArchive {
    fn put(&self, partition: NaiveDate, id: &str, data: &[u8]) -> StoreResult<()> {
        validate_key(id)?;
        let mut parts = self.partitions.write().map_err(|_| StoreError::LockPoisoned)?;
        let entries = parts.entry(partition).or_default();
        if entries.contains_key(id) {
            return Err(StoreError::AlreadyExists(format!("{partition}/{id}")));
        }
        entries.insert(id.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, partition: NaiveDate, id: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(id)?;
        let parts = self.partitions.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(parts.get(&partition).and_then(|p| p.get(id)).cloned())
    }

    fn list(&self, partition: NaiveDate) -> StoreResult<Vec<String>> {
        let parts = self.partitions.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(parts
            .get(&partition)
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn partitions(&self) -> StoreResult<Vec<NaiveDate>> {
        let parts = self.partitions.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(parts
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(date, _)| *date)
            .collect())
    }
}

/// Filesystem archive laid out as `root/YYYY/MM/DD/<id>.json`.
///
/// Files are created with `create_new`, synced, then marked read-only, so an
/// existing entry can be neither overwritten through this type nor silently
/// replaced by a racing writer.
#[derive(Debug, Clone)]
pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
    }

    fn entry_path(&self, date: NaiveDate, id: &str) -> PathBuf {
        self.partition_dir(date).join(format!("{id}.json"))
    }
}

impl ArchiveStore for FsArchive {
    fn put(&self, partition: NaiveDate, id: &str, data: &[u8]) -> StoreResult<()> {
        validate_key(id)?;
        let dir = self.partition_dir(partition);
        fs::create_dir_all(&dir)?;
        let path = self.entry_path(partition, id);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(format!("{partition}/{id}")));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(data)?;
        file.sync_all()?;

        let mut perms = file.metadata()?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms)?;

        debug!(partition = %partition, id, bytes = data.len(), "archive entry written");
        Ok(())
    }

    fn get(&self, partition: NaiveDate, id: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(id)?;
        match fs::read(self.entry_path(partition, id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, partition: NaiveDate) -> StoreResult<Vec<String>> {
        let dir = self.partition_dir(partition);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn partitions(&self) -> StoreResult<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        for year in numeric_children(&self.root)? {
            let year_dir = self.root.join(format!("{year:04}"));
            for month in numeric_children(&year_dir)? {
                let month_dir = year_dir.join(format!("{month:02}"));
                for day in numeric_children(&month_dir)? {
                    let Some(date) = NaiveDate::from_ymd_opt(year as i32, month, day) else {
                        continue;
                    };
                    if !self.list(date)?.is_empty() {
                        dates.push(date);
                    }
                }
            }
        }
        dates.sort();
        Ok(dates)
    }
}

/// Names of subdirectories of `dir` that parse as numbers.
fn numeric_children(dir: &Path) -> StoreResult<Vec<u32>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            out.push(n);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn exercise_write_once(store: &dyn ArchiveStore) {
        store.put(day(1), "evt-1", b"first").unwrap();
        let err = store.put(day(1), "evt-1", b"second").unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.get(day(1), "evt-1").unwrap(), Some(b"first".to_vec()));

        // Same id in another partition is a different entry.
        store.put(day(2), "evt-1", b"other-day").unwrap();
        assert_eq!(store.partitions().unwrap(), vec![day(1), day(2)]);
        assert_eq!(store.list(day(1)).unwrap(), vec!["evt-1"]);
        assert!(store.list(day(9)).unwrap().is_empty());
        assert_eq!(store.get(day(9), "evt-1").unwrap(), None);
    }

    #[test]
    fn in_memory_archive_is_write_once() {
        let store = InMemoryArchive::new();
        exercise_write_once(&store);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn fs_archive_is_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArchive::open(dir.path()).unwrap();
        exercise_write_once(&store);
    }

    #[test]
    fn fs_archive_uses_date_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArchive::open(dir.path()).unwrap();
        store.put(day(7), "abc", b"{}").unwrap();
        let path = dir.path().join("2024").join("03").join("07").join("abc.json");
        assert!(path.exists());
        assert!(fs::metadata(&path).unwrap().permissions().readonly());
    }

    #[test]
    fn fs_archive_reopens_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        FsArchive::open(dir.path())
            .unwrap()
            .put(day(3), "x", b"kept")
            .unwrap();
        let reopened = FsArchive::open(dir.path()).unwrap();
        assert_eq!(reopened.get(day(3), "x").unwrap(), Some(b"kept".to_vec()));
        assert_eq!(reopened.partitions().unwrap(), vec![day(3)]);
    }
}
