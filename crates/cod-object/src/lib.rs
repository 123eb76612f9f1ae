//! Archive handles for cloud-optimized DICOM series.
//!
//! A [`CODObject`] represents one series stored in a blob datastore as a
//! container file plus a metadata document, guarded by a generation-fenced
//! advisory lock. The handle enforces a clean/dirty policy on every
//! state-change operation, admits instances through hash-based deduplication
//! ([`append`](CODObject::append)), and carries its lock across process
//! boundaries via [`serialize`](CODObject::serialize) /
//! [`deserialize`](CODObject::deserialize).
//!
//! Backing stores implement [`BlobStore`]; file parsing is pluggable via
//! [`DicomParser`].

pub mod append;
pub mod error;
pub mod metadata;
pub mod object;

#[cfg(test)]
pub(crate) mod testutil;

pub use append::{AppendOptions, AppendResult};
pub use error::{CODError, CODResult};
pub use metadata::{ByteRange, InstanceRecord, SeriesMetadata, RECORD_VERSION};
pub use object::{CODObject, CODObjectBuilder, CODObjectRecord, LockMode, SyncReport};

pub use cod_instance::{DicomParser, Hints, Instance, InstanceError, InstanceHeader};
pub use cod_lock::{LockError, Locker, LOCK_FILE_NAME};
pub use cod_store::{BlobStore, InMemoryBlobStore, StoreError};
pub use cod_types::{Crc32c, DicomUid, Generation};
