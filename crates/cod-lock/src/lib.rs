//! Distributed lock manager for cloud-optimized DICOM archives.
//!
//! One lock object per series, at a well-known path suffix
//! ([`LOCK_FILE_NAME`]) under the archive's storage prefix. Presence means
//! locked; absence means unlocked. Ownership is proven by the store-assigned
//! [`Generation`](cod_types::Generation) recorded at creation time.
//!
//! Contention is a hard stop, not a wait: a failed [`Locker::acquire`] means
//! another worker is active on the series, and the caller decides what to do
//! about it. There is no retry, no backoff, no queueing, and no automatic
//! expiry. A lock left behind by a crashed worker is the signal that the
//! series needs operator attention.

pub mod error;
pub mod locker;

pub use error::{LockError, LockResult};
pub use locker::{Locker, LOCK_FILE_NAME};
