//! Blob store adapter for cloud-optimized DICOM archives.
//!
//! COD coordinates concurrent workers purely through the atomicity guarantees
//! of the backing object store: "create this object only if it does not
//! exist" and "delete this object only if its generation still matches". This
//! crate defines that contract as the [`BlobStore`] trait and provides an
//! in-memory backend for tests and embedding.
//!
//! # Design Rules
//!
//! 1. `create_if_absent` is the only mutual-exclusion primitive; it must be
//!    atomic with respect to all other writers of the same path.
//! 2. Every successful create or overwrite issues a fresh [`Generation`],
//!    unique for that path.
//! 3. The store never interprets object contents.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryBlobStore;
pub use traits::BlobStore;
