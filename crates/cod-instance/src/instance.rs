use tracing::{debug, warn};

use cod_store::BlobStore;
use cod_types::{Crc32c, DicomUid};

use crate::error::{InstanceError, InstanceResult};
use crate::hints::Hints;
use crate::parser::{DicomParser, InstanceHeader};

/// Ground truth established by fetching and parsing the instance bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceTruth {
    pub header: InstanceHeader,
    pub crc32c: Crc32c,
    pub size: u64,
}

/// A single DICOM instance on its way into an archive.
///
/// `dicom_uri` always reflects the current true location of the bytes and is
/// reassigned at each storage-tier transition (source, local series
/// container, remote archive). `original_path` is snapshotted at construction
/// and never changes; it is what the archive records as provenance and what
/// duplicate red-flags point at.
#[derive(Debug, Clone)]
pub struct Instance {
    dicom_uri: String,
    original_path: String,
    dependencies: Vec<String>,
    hints: Option<Hints>,
    truth: Option<InstanceTruth>,
    bytes: Option<Vec<u8>>,
    byte_range: Option<(u64, u64)>,
}

impl Instance {
    /// Create an instance for the file at `dicom_uri`.
    ///
    /// `original_path` is fixed to this URI, permanently.
    pub fn new(dicom_uri: impl Into<String>) -> Self {
        let dicom_uri = dicom_uri.into();
        Self {
            original_path: dicom_uri.clone(),
            dicom_uri,
            dependencies: Vec::new(),
            hints: None,
            truth: None,
            bytes: None,
            byte_range: None,
        }
    }

    /// Attach caller-supplied hints.
    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = if hints.is_empty() { None } else { Some(hints) };
        self
    }

    /// Attach auxiliary source files consumed to produce this instance.
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Current true location of the bytes.
    pub fn dicom_uri(&self) -> &str {
        &self.dicom_uri
    }

    /// Where the bytes lived when this instance was constructed. Immutable.
    pub fn original_path(&self) -> &str {
        &self.original_path
    }

    /// Auxiliary source URIs, in declaration order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// The caller-supplied hints, if any.
    pub fn hints(&self) -> Option<&Hints> {
        self.hints.as_ref()
    }

    /// Fetched truth, if a fetch has happened.
    pub fn truth(&self) -> Option<&InstanceTruth> {
        self.truth.as_ref()
    }

    /// The fetched bytes. Errors if no fetch has happened.
    pub fn bytes(&self) -> InstanceResult<&[u8]> {
        self.bytes
            .as_deref()
            .ok_or_else(|| InstanceError::NotFetched(self.dicom_uri.clone()))
    }

    /// Byte range of this instance within its series container, once staged.
    pub fn byte_range(&self) -> Option<(u64, u64)> {
        self.byte_range
    }

    /// Record the container byte range after staging.
    pub fn assign_byte_range(&mut self, start: u64, end: u64) {
        self.byte_range = Some((start, end));
    }

    /// The claimed instance UID: the hint if present, otherwise fetched
    /// truth, otherwise `None`. Never triggers a fetch.
    pub fn claimed_instance_uid(&self) -> Option<&DicomUid> {
        self.hints
            .as_ref()
            .and_then(|h| h.instance_uid.as_ref())
            .or_else(|| self.truth.as_ref().map(|t| &t.header.instance_uid))
    }

    /// The claimed CRC32C, same resolution order as
    /// [`claimed_instance_uid`](Self::claimed_instance_uid).
    pub fn claimed_crc32c(&self) -> Option<Crc32c> {
        self.hints
            .as_ref()
            .and_then(|h| h.crc32c)
            .or_else(|| self.truth.as_ref().map(|t| t.crc32c))
    }

    /// The claimed size, same resolution order as
    /// [`claimed_instance_uid`](Self::claimed_instance_uid).
    pub fn claimed_size(&self) -> Option<u64> {
        self.hints
            .as_ref()
            .and_then(|h| h.size)
            .or_else(|| self.truth.as_ref().map(|t| t.size))
    }

    /// Fetch the bytes at `dicom_uri`, establish truth, and reconcile hints.
    ///
    /// Idempotent: a second call returns the cached truth without store
    /// traffic. Hint reconciliation is mandatory on the first fetch: a
    /// mismatch fails here and the truth cache is still populated, so the
    /// caller can observe what was actually found.
    pub fn fetch(
        &mut self,
        store: &dyn BlobStore,
        parser: &dyn DicomParser,
    ) -> InstanceResult<&InstanceTruth> {
        if self.truth.is_some() {
            return Ok(self.truth.as_ref().unwrap());
        }

        let bytes = store
            .read(&self.dicom_uri)?
            .ok_or_else(|| InstanceError::SourceMissing(self.dicom_uri.clone()))?;
        let header = parser.parse(&bytes)?;
        let truth = InstanceTruth {
            header,
            crc32c: Crc32c::of(&bytes),
            size: bytes.len() as u64,
        };
        debug!(
            uri = %self.dicom_uri,
            instance_uid = %truth.header.instance_uid,
            crc32c = %truth.crc32c,
            size = truth.size,
            "instance fetched"
        );
        self.bytes = Some(bytes);
        self.truth = Some(truth);

        if let Some(hints) = &self.hints {
            hints.validate(self.truth.as_ref().unwrap())?;
        }
        Ok(self.truth.as_ref().unwrap())
    }

    /// Reassign `dicom_uri` after a storage-tier transition.
    pub fn relocate(&mut self, new_uri: impl Into<String>) {
        let new_uri = new_uri.into();
        debug!(from = %self.dicom_uri, to = %new_uri, "instance relocated");
        self.dicom_uri = new_uri;
    }

    /// Drop the cached bytes once the instance has been staged.
    pub fn release_bytes(&mut self) {
        self.bytes = None;
    }

    /// Delete the declared dependency files from the store.
    ///
    /// Strictly opt-in, never bundled into admission. Returns how many
    /// objects were actually deleted; missing dependencies are logged and
    /// skipped.
    pub fn delete_dependencies(&self, store: &dyn BlobStore) -> InstanceResult<usize> {
        let mut deleted = 0;
        for dep in &self.dependencies {
            if store.delete(dep)? {
                deleted += 1;
            } else {
                warn!(dependency = %dep, "dependency already gone, skipping delete");
            }
        }
        Ok(deleted)
    }
}
