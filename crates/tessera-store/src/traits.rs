use chrono::NaiveDate;

use crate::error::{StoreError, StoreResult};

/// Key-value store for state shared across process instances.
///
/// All implementations must satisfy these invariants:
/// - `update` is atomic per key: no other `update` on the same key (from any
///   handle or process sharing the backend) interleaves with it.
/// - Keys are validated with [`validate_key`].
/// - The store never interprets values.
pub trait StateStore: Send + Sync {
    /// Read the current value of `key`.
    fn load(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Atomically read-modify-write `key`.
    ///
    /// `apply` receives the current value and returns the value to store, or
    /// `None` to leave the entry untouched. An error from `apply` aborts the
    /// update and is returned as-is.
    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&[u8]>) -> StoreResult<Option<Vec<u8>>>,
    ) -> StoreResult<()>;

    /// Delete `key`. Returns `true` if it existed.
    fn remove(&self, key: &str) -> StoreResult<bool>;

    /// All keys currently stored, sorted.
    fn keys(&self) -> StoreResult<Vec<String>>;
}

/// Append-only store partitioned by calendar day.
///
/// Entries are write-once: `put` on an existing `(partition, id)` fails with
/// [`StoreError::AlreadyExists`] and leaves the original intact.
pub trait ArchiveStore: Send + Sync {
    fn put(&self, partition: NaiveDate, id: &str, data: &[u8]) -> StoreResult<()>;

    fn get(&self, partition: NaiveDate, id: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Ids stored in one partition, sorted.
    fn list(&self, partition: NaiveDate) -> StoreResult<Vec<String>>;

    /// All non-empty partitions, sorted ascending.
    fn partitions(&self) -> StoreResult<Vec<NaiveDate>>;
}

/// Check that `key` is safe to use as a file name on every backend.
pub fn validate_key(key: &str) -> StoreResult<()> {
    let valid = !key.is_empty()
        && key.len() <= 128
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dependency_names() {
        for key in ["s3", "bedrock.invoke", "secrets_manager", "idp-google"] {
            assert!(validate_key(key).is_ok(), "{key}");
        }
    }

    #[test]
    fn rejects_path_like_keys() {
        for key in ["", "../etc", "a/b", ".hidden", "with space", "é"] {
            assert!(
                matches!(validate_key(key), Err(StoreError::InvalidKey(_))),
                "{key}"
            );
        }
        assert!(validate_key(&"k".repeat(129)).is_err());
    }
}
