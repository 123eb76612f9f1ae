use cod_instance::InstanceError;
use cod_lock::LockError;
use cod_store::StoreError;

/// Errors from archive handle operations.
#[derive(Debug, thiserror::Error)]
pub enum CODError {
    /// The handle was built without a correctness-relevant choice being made
    /// explicitly (most commonly: no lock mode).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A clean state-change operation was attempted without holding a lock.
    #[error("clean operation '{operation}' requires a lock; pass dirty=true to work locally")]
    PolicyViolation { operation: &'static str },

    /// The archive does not exist and `create_if_missing` was disabled.
    #[error("COD object not found: {0}")]
    NotFound(String),

    /// A single candidate instance exceeds the per-instance ceiling.
    #[error("instance too large: {uri} is {size} bytes, maximum is {max}")]
    InstanceTooLarge { uri: String, size: u64, max: u64 },

    /// The combined series size would exceed the configured ceiling.
    #[error("series too large: {size} bytes exceeds maximum {max} bytes")]
    SeriesTooLarge { size: u64, max: u64 },

    /// A removal would leave the series with no members at all.
    #[error("refusing to remove every instance from series {series_uid}")]
    RemoveAll { series_uid: String },

    /// An instance does not belong to this archive's study/series.
    #[error("foreign instance {uri}: {field} {found} does not match archive {expected}")]
    ForeignInstance {
        uri: String,
        field: &'static str,
        expected: String,
        found: String,
    },

    /// The stored metadata document could not be decoded.
    #[error("malformed metadata document at {uri}: {reason}")]
    MalformedMetadata { uri: String, reason: String },

    /// Lock protocol failure.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Instance fetch/validation failure.
    #[error(transparent)]
    Instance(#[from] InstanceError),

    /// Blob store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CODError {
    /// True if this error is a hint-vs-truth mismatch.
    pub fn is_hint_validation(&self) -> bool {
        matches!(
            self,
            CODError::Instance(InstanceError::HintValidation { .. })
        )
    }
}

/// Result alias for archive handle operations.
pub type CODResult<T> = Result<T, CODError>;
