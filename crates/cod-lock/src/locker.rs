use std::sync::Arc;

use tracing::{info, warn};

use cod_store::{BlobStore, StoreError};
use cod_types::Generation;

use crate::error::{LockError, LockResult};

/// Well-known name of the lock object within a series prefix.
pub const LOCK_FILE_NAME: &str = ".cod.lock";

/// Manages the lock object for a single archive.
///
/// A `Locker` owns at most one generation at a time. Dropping a `Locker`
/// never releases the lock: release is an explicit API call, so that a
/// serialized archive handle can resume ownership in another process, and so
/// that a crashed worker leaves the lock behind as a diagnostic signal.
pub struct Locker {
    store: Arc<dyn BlobStore>,
    lock_uri: String,
    generation: Option<Generation>,
}

impl Locker {
    /// Create a locker for the lock object at `lock_uri`. No store traffic
    /// happens until [`acquire`](Self::acquire) or
    /// [`reacquire`](Self::reacquire).
    pub fn new(store: Arc<dyn BlobStore>, lock_uri: impl Into<String>) -> Self {
        Self {
            store,
            lock_uri: lock_uri.into(),
            generation: None,
        }
    }

    /// The URI of the lock object.
    pub fn lock_uri(&self) -> &str {
        &self.lock_uri
    }

    /// The generation this locker currently owns, if any.
    pub fn generation(&self) -> Option<Generation> {
        self.generation
    }

    /// Attempt a single atomic create of the lock object.
    ///
    /// Succeeds and records the new generation iff no lock object existed.
    /// Contention fails immediately with [`LockError::AlreadyHeld`]; callers
    /// wanting retry or backoff implement it themselves.
    pub fn acquire(&mut self) -> LockResult<Generation> {
        let generation = match self.store.create_if_absent(&self.lock_uri, &[]) {
            Ok(generation) => generation,
            Err(StoreError::AlreadyExists(_)) => {
                warn!(lock_uri = %self.lock_uri, "lock acquisition failed: already exists");
                return Err(LockError::AlreadyHeld {
                    lock_uri: self.lock_uri.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        self.generation = Some(generation);
        info!(lock_uri = %self.lock_uri, %generation, "lock acquired");
        Ok(generation)
    }

    /// Adopt ownership of an existing lock without issuing a new create.
    ///
    /// Used by the serialization bridge when a handle resumes in another
    /// process. Fails with [`LockError::ReacquireFailed`] if the lock object
    /// is gone or its live generation no longer matches `generation`.
    pub fn reacquire(&mut self, generation: Generation) -> LockResult<Generation> {
        match self.store.generation(&self.lock_uri)? {
            Some(live) if live == generation => {
                self.generation = Some(generation);
                info!(lock_uri = %self.lock_uri, %generation, "lock reacquired");
                Ok(generation)
            }
            found => {
                warn!(
                    lock_uri = %self.lock_uri,
                    expected = %generation,
                    ?found,
                    "lock reacquisition failed"
                );
                Err(LockError::ReacquireFailed {
                    lock_uri: self.lock_uri.clone(),
                    expected: generation,
                    found,
                })
            }
        }
    }

    /// Verify the lock object still exists with the owned generation.
    pub fn verify(&self) -> LockResult<Generation> {
        let expected = self.generation.ok_or_else(|| LockError::NotHeld {
            lock_uri: self.lock_uri.clone(),
        })?;
        match self.store.generation(&self.lock_uri)? {
            None => Err(LockError::MissingOnVerify {
                lock_uri: self.lock_uri.clone(),
            }),
            Some(found) if found != expected => Err(LockError::GenerationMismatch {
                lock_uri: self.lock_uri.clone(),
                expected,
                found,
            }),
            Some(_) => Ok(expected),
        }
    }

    /// Release the lock by deleting the lock object, conditioned on the
    /// owned generation still matching.
    ///
    /// A locker that never held a generation (disabled-lock handles) returns
    /// `Ok(())` without store traffic.
    pub fn release(&mut self) -> LockResult<()> {
        let Some(generation) = self.generation else {
            return Ok(());
        };
        self.verify()?;
        if !self
            .store
            .delete_if_generation_matches(&self.lock_uri, generation)?
        {
            // Lost a race between verify and delete: someone replaced the
            // lock, so it is no longer ours to remove.
            let found = self.store.generation(&self.lock_uri)?;
            return Err(match found {
                Some(found) => LockError::GenerationMismatch {
                    lock_uri: self.lock_uri.clone(),
                    expected: generation,
                    found,
                },
                None => LockError::MissingOnVerify {
                    lock_uri: self.lock_uri.clone(),
                },
            });
        }
        self.generation = None;
        info!(lock_uri = %self.lock_uri, "lock released");
        Ok(())
    }

    /// Whether a lock object currently exists, regardless of owner.
    ///
    /// Diagnostics only: a positive result does not imply this locker owns
    /// it.
    pub fn is_held(&self) -> LockResult<bool> {
        Ok(self.store.exists(&self.lock_uri)?)
    }
}

impl std::fmt::Debug for Locker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locker")
            .field("lock_uri", &self.lock_uri)
            .field("generation", &self.generation)
            .finish()
    }
}
