use serde::{Deserialize, Serialize};

use cod_types::{Crc32c, DicomUid};

use crate::error::{InstanceError, InstanceResult};
use crate::instance::InstanceTruth;

/// Caller-supplied claims about an instance, taken at face value when
/// optimizing but verified before any state change.
///
/// Say you have an inventory report of a DICOM bucket with `(uri, size,
/// crc32c)` per file. Populating `Hints` from it lets admission throw out a
/// duplicate without fetching the file. If the instance turns out to be new,
/// the hints are checked against the fetched truth and any mismatch is fatal
/// to that instance's admission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crc32c: Option<Crc32c>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_uid: Option<DicomUid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_uid: Option<DicomUid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub study_uid: Option<DicomUid>,
}

impl Hints {
    /// Hints with no claims at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// True if no field carries a claim.
    pub fn is_empty(&self) -> bool {
        self.size.is_none()
            && self.crc32c.is_none()
            && self.instance_uid.is_none()
            && self.series_uid.is_none()
            && self.study_uid.is_none()
    }

    /// Verify every populated hint against fetched truth.
    ///
    /// Returns the first mismatch as [`InstanceError::HintValidation`].
    /// Absent fields are not checked; hints only ever narrow, never assert
    /// completeness.
    pub fn validate(&self, truth: &InstanceTruth) -> InstanceResult<()> {
        if let Some(claimed) = self.size {
            if claimed != truth.size {
                return Err(mismatch("size", claimed, truth.size));
            }
        }
        if let Some(claimed) = self.crc32c {
            if claimed != truth.crc32c {
                return Err(mismatch("crc32c", claimed, truth.crc32c));
            }
        }
        if let Some(claimed) = &self.instance_uid {
            if *claimed != truth.header.instance_uid {
                return Err(mismatch("instance_uid", claimed, &truth.header.instance_uid));
            }
        }
        if let Some(claimed) = &self.series_uid {
            if *claimed != truth.header.series_uid {
                return Err(mismatch("series_uid", claimed, &truth.header.series_uid));
            }
        }
        if let Some(claimed) = &self.study_uid {
            if *claimed != truth.header.study_uid {
                return Err(mismatch("study_uid", claimed, &truth.header.study_uid));
            }
        }
        Ok(())
    }
}

fn mismatch(
    field: &'static str,
    claimed: impl std::fmt::Display,
    actual: impl std::fmt::Display,
) -> InstanceError {
    InstanceError::HintValidation {
        field,
        claimed: claimed.to_string(),
        actual: actual.to_string(),
    }
}
