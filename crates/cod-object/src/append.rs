//! Instance admission.
//!
//! A batch of candidate instances is screened, deduplicated, and classified
//! against the archive's recorded members. New instances are staged into the
//! local container; duplicates and conflicts are reported per instance. The
//! remote store is never written here.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use cod_instance::{DicomParser, Instance, InstanceError};
use cod_store::BlobStore;
use cod_types::{Crc32c, DicomUid};

use crate::error::{CODError, CODResult};
use crate::metadata::{ByteRange, InstanceRecord, RECORD_VERSION};
use crate::object::CODObject;

/// Size ceilings applied during admission.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    /// Reject any single candidate larger than this many bytes.
    pub max_instance_size: Option<u64>,
    /// Fail the whole batch if the series would grow past this many bytes.
    pub max_series_size: Option<u64>,
}

/// Per-instance outcome of an admission batch. No candidate is ever silently
/// dropped: every input lands in exactly one partition.
#[derive(Debug, Default)]
pub struct AppendResult {
    /// UIDs admitted and staged, in admission order. The staged `Instance`
    /// values stay with the archive handle ([`CODObject::staged`]) until a
    /// clean sync relocates them and hands them back in the sync report.
    pub new: Vec<DicomUid>,
    /// Exact duplicates of existing members or of earlier batch entries.
    pub same: Vec<Instance>,
    /// Same UID as a member but different bytes. Red-flagged, not admitted.
    pub conflict: Vec<Instance>,
    /// Candidates that could not be classified, with the error for each.
    pub errors: Vec<(Instance, CODError)>,
}

impl AppendResult {
    /// True when the batch changed nothing and raised no red flags.
    pub fn is_noop(&self) -> bool {
        self.new.is_empty() && self.conflict.is_empty()
    }
}

enum Class {
    New,
    Same,
    Conflict,
}

pub(crate) fn append(
    cod: &mut CODObject,
    instances: Vec<Instance>,
    options: &AppendOptions,
) -> CODResult<AppendResult> {
    let store = Arc::clone(&cod.store);
    let parser = Arc::clone(&cod.parser);
    cod.ensure_metadata()?;

    let mut result = AppendResult::default();

    // Resolve each candidate's claimed UID and apply the per-instance size
    // ceiling. Hints answer without touching the store; hintless candidates
    // are fetched and parsed here.
    let mut candidates: Vec<(DicomUid, Instance)> = Vec::new();
    for mut instance in instances {
        let uid = match claimed_or_fetched_uid(&mut instance, &store, &parser) {
            Ok(uid) => uid,
            Err(e) => {
                result.errors.push((instance, e));
                continue;
            }
        };
        if options.max_instance_size.is_some() || options.max_series_size.is_some() {
            let size = match claimed_or_fetched_size(&mut instance, &store, &parser) {
                Ok(size) => size,
                Err(e) => {
                    result.errors.push((instance, e));
                    continue;
                }
            };
            if let Some(max) = options.max_instance_size {
                if size > max {
                    let uri = instance.dicom_uri().to_string();
                    result
                        .errors
                        .push((instance, CODError::InstanceTooLarge { uri, size, max }));
                    continue;
                }
            }
        }
        candidates.push((uid, instance));
    }

    // The series ceiling is all-or-nothing: a batch that would overflow the
    // series fails before any candidate is staged.
    if let Some(max) = options.max_series_size {
        let incoming: u64 = candidates
            .iter()
            .filter_map(|(_, i)| i.claimed_size())
            .sum();
        let size = incoming + cod.ensure_metadata()?.total_bytes();
        if size > max {
            return Err(CODError::SeriesTooLarge { size, max });
        }
    }

    // Intra-batch dedupe: a UID seen earlier in the same batch is resolved
    // by hash before the archive is consulted at all.
    let mut unique: Vec<(DicomUid, Instance)> = Vec::new();
    let mut batch_flags: Vec<(DicomUid, String)> = Vec::new();
    for (uid, mut instance) in candidates {
        let Some(idx) = unique.iter().position(|(kept, _)| *kept == uid) else {
            unique.push((uid, instance));
            continue;
        };
        let newcomer_crc = match claimed_or_fetched_crc(&mut instance, &store, &parser) {
            Ok(crc) => crc,
            Err(e) => {
                result.errors.push((instance, e));
                continue;
            }
        };
        let kept_crc = match claimed_or_fetched_crc(&mut unique[idx].1, &store, &parser) {
            Ok(crc) => crc,
            Err(e) => {
                // The earlier entry is the broken one; the newcomer takes
                // its slot.
                let (_, kept) = std::mem::replace(&mut unique[idx], (uid, instance));
                result.errors.push((kept, e));
                continue;
            }
        };
        if newcomer_crc == kept_crc {
            debug!(uid = %uid, path = %instance.original_path(), "batch duplicate");
            result.same.push(instance);
        } else {
            warn!(uid = %uid, path = %instance.original_path(), "same UID with different bytes within one batch");
            batch_flags.push((uid, instance.original_path().to_string()));
            result.conflict.push(instance);
        }
    }

    // Classify each surviving candidate against the recorded members and
    // stage the new ones.
    for (uid, mut instance) in unique {
        match classify(cod, &uid, &mut instance, &store, &parser) {
            Ok(Class::New) => match stage(cod, &uid, instance) {
                Ok(()) => result.new.push(uid),
                Err((instance, e)) => result.errors.push((instance, e)),
            },
            Ok(Class::Same) => result.same.push(instance),
            Ok(Class::Conflict) => {
                let path = instance.original_path().to_string();
                warn!(uid = %uid, path = %path, "same UID as recorded member with different bytes; red-flagged");
                match cod.ensure_metadata() {
                    Ok(meta) => {
                        if let Some(member) = meta.instances_mut().get_mut(&uid) {
                            if member.append_diff_hash_dupe(path) {
                                cod.metadata_synced = false;
                            }
                        }
                        result.conflict.push(instance);
                    }
                    Err(e) => result.errors.push((instance, e)),
                }
            }
            Err(e) => result.errors.push((instance, e)),
        }
    }

    // Intra-batch conflicts are flagged on whichever member the UID resolved
    // to, including one staged moments ago.
    for (uid, path) in batch_flags {
        if let Some(member) = cod.ensure_metadata()?.instances_mut().get_mut(&uid) {
            if member.append_diff_hash_dupe(path) {
                cod.metadata_synced = false;
            }
        }
    }

    if result.is_noop() {
        info!(
            series = %cod.series_uid,
            same = result.same.len(),
            errors = result.errors.len(),
            "append admitted nothing new"
        );
    } else {
        info!(
            series = %cod.series_uid,
            new = result.new.len(),
            same = result.same.len(),
            conflict = result.conflict.len(),
            errors = result.errors.len(),
            "append complete"
        );
    }
    Ok(result)
}

/// Decide whether a candidate is new to the archive, an exact duplicate of a
/// member, or a same-UID conflict.
///
/// When the claimed UID and hash both match a recorded member, the hints are
/// corroborated by the archive itself and the candidate is accepted as a
/// duplicate without a fetch. Every other path fetches, which reconciles any
/// remaining hints against the bytes.
fn classify(
    cod: &mut CODObject,
    uid: &DicomUid,
    instance: &mut Instance,
    store: &Arc<dyn BlobStore>,
    parser: &Arc<dyn DicomParser>,
) -> CODResult<Class> {
    if let Some(hints) = instance.hints() {
        if let Some(series) = &hints.series_uid {
            if *series != cod.series_uid {
                return Err(foreign(instance, "series_uid", &cod.series_uid, series));
            }
        }
        if let Some(study) = &hints.study_uid {
            if *study != cod.study_uid {
                return Err(foreign(instance, "study_uid", &cod.study_uid, study));
            }
        }
    }

    let member_crc = cod
        .ensure_metadata()?
        .instances()
        .get(uid)
        .map(|m| m.crc32c);

    let Some(member_crc) = member_crc else {
        let (series, study) = {
            let truth = instance.fetch(store.as_ref(), parser.as_ref())?;
            (truth.header.series_uid.clone(), truth.header.study_uid.clone())
        };
        if series != cod.series_uid {
            return Err(foreign(instance, "series_uid", &cod.series_uid, &series));
        }
        if study != cod.study_uid {
            return Err(foreign(instance, "study_uid", &cod.study_uid, &study));
        }
        return Ok(Class::New);
    };

    if instance.claimed_crc32c() == Some(member_crc) {
        debug!(uid = %uid, "claimed hash matches recorded member, skipping fetch");
        return Ok(Class::Same);
    }
    let truth_crc = instance.fetch(store.as_ref(), parser.as_ref())?.crc32c;
    Ok(if truth_crc == member_crc {
        Class::Same
    } else {
        Class::Conflict
    })
}

fn foreign(
    instance: &Instance,
    field: &'static str,
    expected: &DicomUid,
    found: &DicomUid,
) -> CODError {
    CODError::ForeignInstance {
        uri: instance.dicom_uri().to_string(),
        field,
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

/// Copy a classified-new instance into the local container and record it as
/// a member. On failure the instance is handed back untouched so the caller
/// can report it.
fn stage(
    cod: &mut CODObject,
    uid: &DicomUid,
    mut instance: Instance,
) -> Result<(), (Instance, CODError)> {
    if let Err(e) = cod.ensure_container() {
        return Err((instance, e));
    }
    let truth = match instance.truth() {
        Some(truth) => truth.clone(),
        None => {
            let uri = instance.dicom_uri().to_string();
            return Err((instance, InstanceError::NotFetched(uri).into()));
        }
    };

    let start = cod.container.len() as u64;
    match instance.bytes() {
        Ok(bytes) => cod.container.extend_from_slice(bytes),
        Err(e) => return Err((instance, e.into())),
    }
    let end = cod.container.len() as u64;
    instance.assign_byte_range(start, end);

    let record = InstanceRecord {
        metadata: truth.header.metadata.clone(),
        uri: cod.remote_member_uri(uid),
        headers: ByteRange {
            start_byte: start,
            end_byte: end,
        },
        offset_tables: truth.header.offset_tables.clone(),
        crc32c: truth.crc32c,
        size: truth.size,
        original_path: instance.original_path().to_string(),
        dependencies: instance.dependencies().to_vec(),
        diff_hash_dupe_paths: Vec::new(),
        version: RECORD_VERSION,
        modified_datetime: Utc::now(),
    };
    match cod.ensure_metadata() {
        Ok(meta) => {
            meta.instances_mut().insert(uid.clone(), record);
        }
        Err(e) => return Err((instance, e)),
    }
    cod.metadata_synced = false;
    cod.container_synced = false;

    instance.relocate(cod.local_member_uri(uid));
    instance.release_bytes();
    debug!(uid = %uid, "instance staged into local container");
    cod.staged.push(instance);
    Ok(())
}

fn claimed_or_fetched_uid(
    instance: &mut Instance,
    store: &Arc<dyn BlobStore>,
    parser: &Arc<dyn DicomParser>,
) -> CODResult<DicomUid> {
    if let Some(uid) = instance.claimed_instance_uid() {
        return Ok(uid.clone());
    }
    Ok(instance
        .fetch(store.as_ref(), parser.as_ref())?
        .header
        .instance_uid
        .clone())
}

fn claimed_or_fetched_size(
    instance: &mut Instance,
    store: &Arc<dyn BlobStore>,
    parser: &Arc<dyn DicomParser>,
) -> CODResult<u64> {
    if let Some(size) = instance.claimed_size() {
        return Ok(size);
    }
    Ok(instance.fetch(store.as_ref(), parser.as_ref())?.size)
}

fn claimed_or_fetched_crc(
    instance: &mut Instance,
    store: &Arc<dyn BlobStore>,
    parser: &Arc<dyn DicomParser>,
) -> CODResult<Crc32c> {
    if let Some(crc) = instance.claimed_crc32c() {
        return Ok(crc);
    }
    Ok(instance.fetch(store.as_ref(), parser.as_ref())?.crc32c)
}
