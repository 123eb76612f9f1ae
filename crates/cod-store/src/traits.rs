use cod_types::Generation;

use crate::error::StoreResult;

/// Object store contract required by the COD core.
///
/// All implementations must satisfy these invariants:
/// - `create_if_absent` is atomic: of any number of concurrent callers for
///   the same path, at most one succeeds; the rest fail with
///   [`StoreError::AlreadyExists`](crate::StoreError::AlreadyExists).
/// - Every successful create or overwrite assigns a fresh [`Generation`] for
///   that path, never reused across the object's lifetime.
/// - `delete_if_generation_matches` is atomic with respect to concurrent
///   overwrites of the same path.
/// - All I/O errors are propagated, never silently ignored.
pub trait BlobStore: Send + Sync {
    /// Atomically create an object iff no object exists at `path`.
    ///
    /// Returns the new generation on success.
    fn create_if_absent(&self, path: &str, data: &[u8]) -> StoreResult<Generation>;

    /// Delete the object at `path` iff its current generation equals
    /// `generation`.
    ///
    /// Returns `Ok(true)` if the object was deleted, `Ok(false)` if the
    /// object is missing or its generation no longer matches.
    fn delete_if_generation_matches(&self, path: &str, generation: Generation)
        -> StoreResult<bool>;

    /// Check whether an object exists at `path`.
    fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Read the full contents of the object at `path`.
    ///
    /// Returns `Ok(None)` if the object does not exist.
    fn read(&self, path: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write (create or overwrite) the object at `path`, returning the new
    /// generation.
    fn write(&self, path: &str, data: &[u8]) -> StoreResult<Generation>;

    /// The current generation of the object at `path`, if it exists.
    fn generation(&self, path: &str) -> StoreResult<Option<Generation>>;

    /// Delete the object at `path` unconditionally.
    ///
    /// Returns `Ok(true)` if the object existed. Intended for dependency
    /// cleanup and operator intervention, never for lock release.
    fn delete(&self, path: &str) -> StoreResult<bool>;
}
