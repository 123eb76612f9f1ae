use serde::{Deserialize, Serialize};
use serde_json::Value;

use cod_types::DicomUid;

use crate::error::InstanceResult;

/// Header fields extracted from a DICOM file.
///
/// `metadata` carries the parsed header tags opaquely; the core never
/// interprets them beyond the three identity UIDs. `offset_tables` holds
/// frame-offset arrays for multi-frame instances, when the parser produces
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHeader {
    pub instance_uid: DicomUid,
    pub series_uid: DicomUid,
    pub study_uid: DicomUid,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_tables: Option<Value>,
}

/// External DICOM parser seam.
///
/// The COD core treats parsing as a deterministic black box: given the full
/// bytes of a file, produce its header fields or fail. Implementations wrap
/// whatever DICOM toolkit the embedding application uses.
pub trait DicomParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> InstanceResult<InstanceHeader>;
}
