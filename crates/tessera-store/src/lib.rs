//! Storage backends for Tessera.
//!
//! Two kinds of state outlive a single request and therefore live here rather
//! than in process memory:
//!
//! - **Breaker state**: the health of each dependency, shared by every
//!   process instance that calls it. Stored through the [`StateStore`] trait,
//!   a key-value store with atomic read-modify-write.
//! - **Audit archive**: frozen copies of high-sensitivity audit events,
//!   stored through the [`ArchiveStore`] trait, write-once and partitioned by
//!   calendar day.
//!
//! # Backends
//!
//! - [`InMemoryStateStore`] / [`InMemoryArchive`]: single-instance deployments and tests
//! - [`FileStateStore`]: one JSON document per key with cross-process file locks
//! - [`FsArchive`]: `YYYY/MM/DD/<id>.json`, files created exclusively and made read-only
//!
//! # Design Rules
//!
//! 1. `StateStore::update` is atomic per key across every handle to the same backend.
//! 2. Archive entries are never overwritten; a second write of an id is an error.
//! 3. Stores never interpret the bytes they hold.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod archive;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use archive::{FsArchive, InMemoryArchive};
pub use error::{StoreError, StoreResult};
pub use file::FileStateStore;
pub use memory::InMemoryStateStore;
pub use traits::{validate_key, ArchiveStore, StateStore};
