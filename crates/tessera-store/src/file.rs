use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::StoreResult;
use crate::traits::{validate_key, StateStore};

const VALUE_EXT: &str = "json";
const LOCK_EXT: &str = "lock";

/// State store backed by a directory, one file per key.
///
/// Every process pointing at the same directory (a shared volume, or several
/// workers on one host) sees the same state. `update` holds an exclusive
/// advisory lock on `<key>.lock` for the whole read-modify-write and replaces
/// the value file with an atomic rename, so readers never observe a partial
/// write.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{VALUE_EXT}"))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{LOCK_EXT}"))
    }

    fn lock(&self, key: &str) -> StoreResult<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path(key))?;
        file.lock_exclusive()?;
        Ok(file)
    }

    fn read_value(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.value_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(key)?;
        self.read_value(key)
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&[u8]>) -> StoreResult<Option<Vec<u8>>>,
    ) -> StoreResult<()> {
        validate_key(key)?;
        let lock = self.lock(key)?;

        let current = self.read_value(key)?;
        let result = match apply(current.as_deref()) {
            Ok(Some(next)) => {
                let tmp = self.dir.join(format!(".{key}.{}.tmp", std::process::id()));
                let mut file = File::create(&tmp)?;
                file.write_all(&next)?;
                file.sync_all()?;
                fs::rename(&tmp, self.value_path(key))?;
                debug!(key, bytes = next.len(), "state entry written");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        FileExt::unlock(&lock)?;
        result
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        let lock = self.lock(key)?;
        let existed = match fs::remove_file(self.value_path(key)) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        FileExt::unlock(&lock)?;
        Ok(existed)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VALUE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
