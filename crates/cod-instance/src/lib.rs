//! Candidate instance model for cloud-optimized DICOM archives.
//!
//! An [`Instance`] is one DICOM file on its way into an archive. It carries
//! the file's current location, an immutable snapshot of where it originally
//! came from, optional auxiliary [`dependencies`](Instance::dependencies),
//! and optional caller-supplied [`Hints`].
//!
//! Hints are claims, not facts: they let admission skip a fetch when a
//! decision can already be made (for example, the claimed hash matches a
//! recorded archive member), but the moment the file is actually fetched the
//! hints are reconciled against the fetched truth and any mismatch is a hard
//! error. A bad hint can cost a wasted fetch; it can never corrupt the
//! archive.
//!
//! DICOM parsing itself is an external concern, injected through the
//! [`DicomParser`] trait.

pub mod error;
pub mod hints;
pub mod instance;
pub mod parser;

pub use error::{InstanceError, InstanceResult};
pub use hints::Hints;
pub use instance::{Instance, InstanceTruth};
pub use parser::{DicomParser, InstanceHeader};
