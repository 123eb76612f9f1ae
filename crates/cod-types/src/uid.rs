use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Minimum accepted UID length. Real-world DICOM UIDs are org-rooted dotted
/// numerics well past this; anything shorter is almost certainly a test
/// artifact or truncation.
const MIN_UID_LEN: usize = 10;

/// Maximum UID length per the DICOM standard (PS3.5 §9.1).
const MAX_UID_LEN: usize = 64;

/// A validated DICOM UID.
///
/// Used for study, series, and instance identity. UIDs appear verbatim in
/// archive URIs (`<datastore>/<study>/<series>.tar`), so if they are supposed
/// to be de-identified, the caller must de-identify them before construction.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DicomUid(String);

impl DicomUid {
    /// Validate and wrap a UID string.
    ///
    /// Accepts dotted-numeric UIDs between [`MIN_UID_LEN`] and
    /// [`MAX_UID_LEN`] characters.
    pub fn new(uid: impl Into<String>) -> Result<Self, TypeError> {
        let uid = uid.into();
        if uid.len() < MIN_UID_LEN {
            return Err(TypeError::InvalidUid {
                uid,
                reason: format!("shorter than {MIN_UID_LEN} characters"),
            });
        }
        if uid.len() > MAX_UID_LEN {
            return Err(TypeError::InvalidUid {
                uid,
                reason: format!("longer than {MAX_UID_LEN} characters"),
            });
        }
        if !uid.chars().all(|c| c.is_ascii_digit() || c == '.') {
            return Err(TypeError::InvalidUid {
                uid,
                reason: "contains characters outside [0-9.]".into(),
            });
        }
        if uid.starts_with('.') || uid.ends_with('.') || uid.contains("..") {
            return Err(TypeError::InvalidUid {
                uid,
                reason: "malformed dotted-numeric component".into(),
            });
        }
        Ok(Self(uid))
    }

    /// The UID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DicomUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DicomUid({})", self.0)
    }
}

impl fmt::Display for DicomUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DicomUid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
