//! Foundation types for cloud-optimized DICOM (COD) archives.
//!
//! This crate provides the identity and versioning primitives used throughout
//! the COD system. Every other COD crate depends on `cod-types`.
//!
//! # Key Types
//!
//! - [`DicomUid`]: validated DICOM UID (study, series, or instance identity)
//! - [`Crc32c`]: Castagnoli CRC32C content hash, the archive's dedup key
//! - [`Generation`]: opaque store-assigned version token used for optimistic
//!   concurrency checks

pub mod error;
pub mod generation;
pub mod hash;
pub mod uid;

pub use error::TypeError;
pub use generation::Generation;
pub use hash::Crc32c;
pub use uid::DicomUid;
