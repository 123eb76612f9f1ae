use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use cod_types::{Crc32c, DicomUid};

use crate::error::{CODError, CODResult};

/// Current version stamped into freshly written instance records.
pub const RECORD_VERSION: u32 = 1;

/// Byte range of an instance within its series container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start_byte: u64,
    pub end_byte: u64,
}

/// One archive member as recorded in the series metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Parsed file header fields, carried opaquely.
    #[serde(default)]
    pub metadata: Value,
    /// Current true location of the member bytes (remote container form).
    pub uri: String,
    pub headers: ByteRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_tables: Option<Value>,
    pub crc32c: Crc32c,
    pub size: u64,
    pub original_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// URIs carrying the same instance UID with a different hash. Recorded
    /// as a red flag, never deleted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diff_hash_dupe_paths: Vec<String>,
    pub version: u32,
    pub modified_datetime: DateTime<Utc>,
}

impl InstanceRecord {
    /// Record a same-UID-different-hash duplicate path.
    ///
    /// Returns `true` if the path was new (the document changed).
    pub fn append_diff_hash_dupe(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        if self.diff_hash_dupe_paths.contains(&path) {
            return false;
        }
        self.diff_hash_dupe_paths.push(path);
        true
    }
}

/// Members of the archive, keyed by instance UID.
///
/// Nested under a `cod` key in the persisted document, matching the on-disk
/// format consumers already read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct CodSection {
    #[serde(default)]
    instances: BTreeMap<DicomUid, InstanceRecord>,
}

/// The metadata document of an entire series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    study_uid: DicomUid,
    series_uid: DicomUid,
    cod: CodSection,
}

impl SeriesMetadata {
    /// Create an empty document for a series.
    pub fn new(study_uid: DicomUid, series_uid: DicomUid) -> Self {
        Self {
            study_uid,
            series_uid,
            cod: CodSection::default(),
        }
    }

    pub fn study_uid(&self) -> &DicomUid {
        &self.study_uid
    }

    pub fn series_uid(&self) -> &DicomUid {
        &self.series_uid
    }

    /// Recorded members, keyed by instance UID.
    pub fn instances(&self) -> &BTreeMap<DicomUid, InstanceRecord> {
        &self.cod.instances
    }

    /// Mutable access to the recorded members.
    pub fn instances_mut(&mut self) -> &mut BTreeMap<DicomUid, InstanceRecord> {
        &mut self.cod.instances
    }

    /// Total bytes across all recorded members.
    pub fn total_bytes(&self) -> u64 {
        self.cod.instances.values().map(|r| r.size).sum()
    }

    /// Serialize to the persisted JSON form.
    pub fn to_json_bytes(&self, uri: &str) -> CODResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CODError::MalformedMetadata {
            uri: uri.to_string(),
            reason: e.to_string(),
        })
    }

    /// Decode a persisted document.
    pub fn from_json_bytes(bytes: &[u8], uri: &str) -> CODResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CODError::MalformedMetadata {
            uri: uri.to_string(),
            reason: e.to_string(),
        })
    }
}
