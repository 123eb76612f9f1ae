//! Shared fixtures for the crate's test modules.

use std::sync::Arc;

use serde_json::json;

use cod_instance::{DicomParser, InstanceError, InstanceHeader, InstanceResult};
use cod_store::{BlobStore, InMemoryBlobStore};
use cod_types::DicomUid;

use crate::object::{CODObject, LockMode};

pub const INSTANCE_UID: &str = "1.2.3.4.5.6.7.8.9.1";
pub const SERIES_UID: &str = "1.2.3.4.5.6.7.8.9.2";
pub const STUDY_UID: &str = "1.2.3.4.5.6.7.8.9.3";
pub const DATASTORE: &str = "gs://archive";

/// Parser for a trivial line-based header format:
/// `instance_uid\nseries_uid\nstudy_uid\n<payload...>`.
pub struct LineParser;

impl DicomParser for LineParser {
    fn parse(&self, bytes: &[u8]) -> InstanceResult<InstanceHeader> {
        let text = std::str::from_utf8(bytes).map_err(|e| InstanceError::Parse(e.to_string()))?;
        let mut lines = text.lines();
        let mut next_uid = |what: &str| {
            lines
                .next()
                .ok_or_else(|| InstanceError::Parse(format!("missing {what}")))
                .and_then(|s| DicomUid::new(s).map_err(|e| InstanceError::Parse(e.to_string())))
        };
        Ok(InstanceHeader {
            instance_uid: next_uid("instance uid")?,
            series_uid: next_uid("series uid")?,
            study_uid: next_uid("study uid")?,
            metadata: json!({}),
            offset_tables: None,
        })
    }
}

pub fn uid(s: &str) -> DicomUid {
    DicomUid::new(s).unwrap()
}

pub fn dicom_bytes(instance_uid: &str) -> Vec<u8> {
    format!("{instance_uid}\n{SERIES_UID}\n{STUDY_UID}\npixels-of-{instance_uid}").into_bytes()
}

pub fn shared_store() -> Arc<InMemoryBlobStore> {
    Arc::new(InMemoryBlobStore::new())
}

pub fn build_archive(store: &Arc<InMemoryBlobStore>, mode: LockMode) -> CODObject {
    CODObject::builder()
        .datastore_path(DATASTORE)
        .study_uid(uid(STUDY_UID))
        .series_uid(uid(SERIES_UID))
        .lock(mode)
        .build(
            Arc::clone(store) as Arc<dyn BlobStore>,
            Arc::new(LineParser),
        )
        .unwrap()
}
