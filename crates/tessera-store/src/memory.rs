use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{StoreError, StoreResult};
use crate::traits::{validate_key, StateStore};

/// In-memory state store for single-instance deployments and tests.
///
/// A single mutex serializes updates, which makes `update` atomic across all
/// clones of the `Arc` holding it.
#[derive(Default)]
pub struct InMemoryStateStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStore for InMemoryStateStore {
    fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let map = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.get(key).cloned())
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&[u8]>) -> StoreResult<Option<Vec<u8>>>,
    ) -> StoreResult<()> {
        validate_key(key)?;
        let mut map = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        let next = apply(map.get(key).map(Vec::as_slice))?;
        if let Some(value) = next {
            map.insert(key.to_string(), value);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        let mut map = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.remove(key).is_some())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let map = self.entries.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.keys().cloned().collect())
    }
}

impl std::fmt::Debug for InMemoryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStateStore")
            .field("entries", &self.len())
            .finish()
    }
}
