use cod_store::StoreError;

/// Errors from instance operations.
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    /// The object at `dicom_uri` does not exist in the store.
    #[error("instance source missing: {0}")]
    SourceMissing(String),

    /// Fetched truth disagrees with a caller-supplied hint.
    ///
    /// Fatal to this instance's admission; never overridden.
    #[error("hint validation failed: {field} mismatch: claimed {claimed}, actual {actual}")]
    HintValidation {
        field: &'static str,
        claimed: String,
        actual: String,
    },

    /// The fetched bytes could not be parsed as a DICOM file.
    #[error("DICOM parse error: {0}")]
    Parse(String),

    /// Truth was requested before the instance was fetched.
    #[error("instance not fetched: {0}")]
    NotFetched(String),

    /// Failure from the underlying blob store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for instance operations.
pub type InstanceResult<T> = Result<T, InstanceError>;
