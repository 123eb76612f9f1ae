/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `create_if_absent` found the object already present.
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure that does not fit the other variants.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
