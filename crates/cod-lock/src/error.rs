use cod_store::StoreError;
use cod_types::Generation;

/// Errors from lock operations.
///
/// Acquisition-class errors (`AlreadyHeld`, `ReacquireFailed`) mean the
/// caller never owned the lock; verification-class errors (`MissingOnVerify`,
/// `GenerationMismatch`) mean a lock the caller believed it owned is gone or
/// was overwritten. Neither class is ever retried internally.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// `acquire` found the lock object already present, regardless of owner.
    #[error("lock acquisition failed: {lock_uri} already exists")]
    AlreadyHeld { lock_uri: String },

    /// `reacquire` found the lock missing or owned by a different generation.
    #[error(
        "lock reacquisition failed: {lock_uri} expected generation {expected}, found {found:?}"
    )]
    ReacquireFailed {
        lock_uri: String,
        expected: Generation,
        found: Option<Generation>,
    },

    /// The lock object disappeared while this locker believed it held it.
    #[error("lock missing on verify: {lock_uri}")]
    MissingOnVerify { lock_uri: String },

    /// The lock object was overwritten while this locker believed it held it.
    #[error("lock generation mismatch on verify: {lock_uri} found {found} != expected {expected}")]
    GenerationMismatch {
        lock_uri: String,
        expected: Generation,
        found: Generation,
    },

    /// A verify was attempted on a locker that never acquired.
    #[error("lock not held: {lock_uri}")]
    NotHeld { lock_uri: String },

    /// Failure from the underlying blob store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LockError {
    /// True for errors raised while trying to obtain ownership.
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            LockError::AlreadyHeld { .. } | LockError::ReacquireFailed { .. }
        )
    }

    /// True for errors raised when an owned lock turned out to be gone or
    /// stolen.
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            LockError::MissingOnVerify { .. } | LockError::GenerationMismatch { .. }
        )
    }
}

/// Result alias for lock operations.
pub type LockResult<T> = Result<T, LockError>;
