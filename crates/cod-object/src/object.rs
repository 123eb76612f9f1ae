use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cod_instance::{DicomParser, Instance};
use cod_lock::{Locker, LOCK_FILE_NAME};
use cod_store::BlobStore;
use cod_types::{DicomUid, Generation};

use crate::append::{self, AppendOptions, AppendResult};
use crate::error::{CODError, CODResult};
use crate::metadata::{ByteRange, SeriesMetadata};

/// How an archive handle coordinates with other workers.
///
/// There is no default: the choice is correctness-relevant, so the caller
/// must make it explicitly at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Acquire the series lock at construction; clean operations allowed.
    Required,
    /// Never touch the lock; only dirty (local-only) operations allowed.
    Disabled,
}

/// Transferable identity of an archive handle.
///
/// Produced by [`CODObject::serialize`] and consumed by
/// [`CODObject::deserialize`] so distributed pipeline stages can hand a
/// locked handle from one worker to the next without releasing the lock in
/// between. Carries no live store binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CODObjectRecord {
    pub datastore_path: String,
    pub study_uid: DicomUid,
    pub series_uid: DicomUid,
    pub lock_mode: LockMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_generation: Option<Generation>,
}

/// Outcome of a [`CODObject::sync`].
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Whether anything was written to the remote store.
    pub remote_written: bool,
    pub tar_generation: Option<Generation>,
    pub metadata_generation: Option<Generation>,
    /// The instances this sync dealt with: relocated to their final remote
    /// member URIs after a clean upload, or the still-staged (un-relocated)
    /// instances after a dirty sync.
    pub instances: Vec<Instance>,
}

/// Builder for [`CODObject`]. The lock mode has no default and must be set.
#[derive(Default)]
pub struct CODObjectBuilder {
    datastore_path: Option<String>,
    study_uid: Option<DicomUid>,
    series_uid: Option<DicomUid>,
    lock: Option<LockMode>,
    create_if_missing: bool,
}

impl CODObjectBuilder {
    pub fn datastore_path(mut self, path: impl Into<String>) -> Self {
        self.datastore_path = Some(path.into());
        self
    }

    pub fn study_uid(mut self, uid: DicomUid) -> Self {
        self.study_uid = Some(uid);
        self
    }

    pub fn series_uid(mut self, uid: DicomUid) -> Self {
        self.series_uid = Some(uid);
        self
    }

    /// Choose the lock mode. Mandatory; there is no silent default.
    pub fn lock(mut self, mode: LockMode) -> Self {
        self.lock = Some(mode);
        self
    }

    /// When false, building a handle for a series with no metadata document
    /// fails with [`CODError::NotFound`]. Defaults to true.
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// Build the handle, acquiring the lock if the mode requires it.
    ///
    /// Acquisition failure aborts construction: no handle is ever returned
    /// in a half-locked state.
    pub fn build(
        self,
        store: Arc<dyn BlobStore>,
        parser: Arc<dyn DicomParser>,
    ) -> CODResult<CODObject> {
        let datastore_path = self
            .datastore_path
            .ok_or_else(|| CODError::Configuration("datastore_path is required".into()))?;
        let study_uid = self
            .study_uid
            .ok_or_else(|| CODError::Configuration("study_uid is required".into()))?;
        let series_uid = self
            .series_uid
            .ok_or_else(|| CODError::Configuration("series_uid is required".into()))?;
        let lock_mode = self.lock.ok_or_else(|| {
            CODError::Configuration(
                "lock mode unresolved: choose LockMode::Required or LockMode::Disabled".into(),
            )
        })?;

        let prefix = format!("{datastore_path}/{study_uid}/{series_uid}");
        let mut locker = Locker::new(Arc::clone(&store), format!("{prefix}/{LOCK_FILE_NAME}"));

        if !self.create_if_missing {
            let metadata_uri = format!("{prefix}/metadata.json");
            if !store.exists(&metadata_uri)? {
                return Err(CODError::NotFound(prefix));
            }
        }

        if lock_mode == LockMode::Required {
            locker.acquire()?;
        }

        Ok(CODObject {
            datastore_path,
            study_uid,
            series_uid,
            lock_mode,
            store,
            parser,
            locker,
            metadata: None,
            metadata_synced: true,
            container: Vec::new(),
            container_loaded: false,
            container_synced: true,
            staged: Vec::new(),
        })
    }
}

/// A logical DICOM series stored in the cloud: the unit of mutual exclusion
/// and mutation.
///
/// The UIDs given at construction appear verbatim in archive URIs
/// (`<datastore_path>/<study_uid>/<series_uid>.tar`); de-identification, if
/// required, is the caller's responsibility.
///
/// Dropping a handle never releases its lock. Use [`scope`](Self::scope) for
/// deterministic release on success, or [`release`](Self::release)
/// explicitly.
pub struct CODObject {
    pub(crate) datastore_path: String,
    pub(crate) study_uid: DicomUid,
    pub(crate) series_uid: DicomUid,
    pub(crate) lock_mode: LockMode,
    pub(crate) store: Arc<dyn BlobStore>,
    pub(crate) parser: Arc<dyn DicomParser>,
    pub(crate) locker: Locker,
    pub(crate) metadata: Option<SeriesMetadata>,
    pub(crate) metadata_synced: bool,
    /// Local copy of the series container (remote tar plus staged bytes).
    pub(crate) container: Vec<u8>,
    pub(crate) container_loaded: bool,
    pub(crate) container_synced: bool,
    /// Instances admitted as new, awaiting sync.
    pub(crate) staged: Vec<Instance>,
}

impl CODObject {
    pub fn builder() -> CODObjectBuilder {
        CODObjectBuilder {
            create_if_missing: true,
            ..CODObjectBuilder::default()
        }
    }

    // ---- Identity ----

    pub fn datastore_path(&self) -> &str {
        &self.datastore_path
    }

    pub fn study_uid(&self) -> &DicomUid {
        &self.study_uid
    }

    pub fn series_uid(&self) -> &DicomUid {
        &self.series_uid
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    /// The lock generation this handle currently owns, if any.
    pub fn lock_generation(&self) -> Option<Generation> {
        self.locker.generation()
    }

    /// The URI of the series container in the datastore.
    pub fn tar_uri(&self) -> String {
        format!(
            "{}/{}/{}.tar",
            self.datastore_path, self.study_uid, self.series_uid
        )
    }

    /// The URI of the series metadata document in the datastore.
    pub fn metadata_uri(&self) -> String {
        format!(
            "{}/{}/{}/metadata.json",
            self.datastore_path, self.study_uid, self.series_uid
        )
    }

    /// Final remote URI of a member within the series container.
    pub fn remote_member_uri(&self, instance_uid: &DicomUid) -> String {
        format!("{}://instances/{instance_uid}.dcm", self.tar_uri())
    }

    pub(crate) fn local_member_uri(&self, instance_uid: &DicomUid) -> String {
        format!("{}.tar://instances/{instance_uid}.dcm", self.series_uid)
    }

    /// Instances admitted as new and not yet synced.
    pub fn staged(&self) -> &[Instance] {
        &self.staged
    }

    // ---- Clean/dirty policy ----

    /// Gate a state-change operation on the lock policy.
    ///
    /// | lock mode | dirty | outcome |
    /// |---|---|---|
    /// | required | false | proceeds |
    /// | required | true  | proceeds, with a warning |
    /// | disabled | false | [`CODError::PolicyViolation`] |
    /// | disabled | true  | proceeds, local-only |
    pub(crate) fn check_policy(&self, operation: &'static str, dirty: bool) -> CODResult<()> {
        match (self.lock_mode, dirty) {
            (LockMode::Required, false) => Ok(()),
            (LockMode::Required, true) => {
                warn!(
                    operation,
                    series = %self.series_uid,
                    "performing dirty operation on locked CODObject"
                );
                Ok(())
            }
            (LockMode::Disabled, true) => Ok(()),
            (LockMode::Disabled, false) => Err(CODError::PolicyViolation { operation }),
        }
    }

    // ---- Metadata ----

    /// Read the series metadata document, loading it from the store on first
    /// access.
    pub fn get_metadata(&mut self, dirty: bool) -> CODResult<&SeriesMetadata> {
        self.check_policy("get_metadata", dirty)?;
        Ok(self.ensure_metadata()?)
    }

    pub(crate) fn ensure_metadata(&mut self) -> CODResult<&mut SeriesMetadata> {
        if self.metadata.is_none() {
            let uri = self.metadata_uri();
            let doc = match self.store.read(&uri)? {
                Some(bytes) => SeriesMetadata::from_json_bytes(&bytes, &uri)?,
                None => {
                    SeriesMetadata::new(self.study_uid.clone(), self.series_uid.clone())
                }
            };
            self.metadata = Some(doc);
        }
        Ok(self.metadata.as_mut().expect("metadata just ensured"))
    }

    // ---- Container ----

    /// Pull the remote series container into the local staging buffer.
    pub fn pull_tar(&mut self, dirty: bool) -> CODResult<&[u8]> {
        self.check_policy("pull_tar", dirty)?;
        self.ensure_container()?;
        Ok(&self.container)
    }

    pub(crate) fn ensure_container(&mut self) -> CODResult<()> {
        if !self.container_loaded {
            if let Some(bytes) = self.store.read(&self.tar_uri())? {
                self.container = bytes;
            }
            self.container_loaded = true;
        }
        Ok(())
    }

    // ---- Admission ----

    /// Admit a batch of candidate instances.
    ///
    /// New instances are staged locally (nothing touches the remote store
    /// until [`sync`](Self::sync)); duplicates and conflicts are classified
    /// per instance and returned, never silently dropped.
    pub fn append(
        &mut self,
        instances: Vec<Instance>,
        options: &AppendOptions,
        dirty: bool,
    ) -> CODResult<AppendResult> {
        self.check_policy("append", dirty)?;
        append::append(self, instances, options)
    }

    // ---- Removal ----

    /// Remove recorded members from the series.
    ///
    /// UIDs not recorded in the series are skipped with a warning. Tar
    /// containers do not support in-place deletion, so the local container
    /// is rebuilt from the kept members and their byte ranges are rewritten;
    /// nothing touches the remote store until [`sync`](Self::sync). Removing
    /// every member is refused.
    ///
    /// Returns how many members were actually removed.
    pub fn remove(&mut self, uids: &[DicomUid], dirty: bool) -> CODResult<usize> {
        self.check_policy("remove", dirty)?;

        let mut to_remove: Vec<DicomUid> = Vec::new();
        {
            let series_uid = self.series_uid.clone();
            let meta = self.ensure_metadata()?;
            for uid in uids {
                if !meta.instances().contains_key(uid) {
                    warn!(
                        series = %series_uid,
                        uid = %uid,
                        "instance not recorded in series, skipping removal"
                    );
                    continue;
                }
                if !to_remove.contains(uid) {
                    to_remove.push(uid.clone());
                }
            }
            if to_remove.is_empty() {
                return Ok(0);
            }
            if to_remove.len() == meta.instances().len() {
                return Err(CODError::RemoveAll {
                    series_uid: series_uid.to_string(),
                });
            }
        }

        self.ensure_container()?;

        // Validate every kept byte range before mutating anything, so a
        // malformed document cannot leave the handle half-rebuilt.
        let container_len = self.container.len() as u64;
        let tar_uri = self.tar_uri();
        {
            let meta = self.ensure_metadata()?;
            for (uid, record) in meta.instances() {
                if to_remove.contains(uid) {
                    continue;
                }
                let range = record.headers;
                if range.start_byte > range.end_byte || range.end_byte > container_len {
                    return Err(CODError::MalformedMetadata {
                        uri: tar_uri,
                        reason: format!(
                            "byte range {}..{} for {uid} exceeds container of {container_len} bytes",
                            range.start_byte, range.end_byte
                        ),
                    });
                }
            }
        }

        let old = std::mem::take(&mut self.container);
        let mut rebuilt = Vec::new();
        {
            let meta = self.ensure_metadata()?;
            for uid in &to_remove {
                meta.instances_mut().remove(uid);
            }
            for record in meta.instances_mut().values_mut() {
                let start = record.headers.start_byte as usize;
                let end = record.headers.end_byte as usize;
                let new_start = rebuilt.len() as u64;
                rebuilt.extend_from_slice(&old[start..end]);
                record.headers = ByteRange {
                    start_byte: new_start,
                    end_byte: rebuilt.len() as u64,
                };
            }
        }
        self.container = rebuilt;
        self.container_loaded = true;
        self.container_synced = false;
        self.metadata_synced = false;

        // Staged copies of removed members must not resurface at sync time.
        self.staged.retain(|instance| {
            instance
                .truth()
                .map_or(true, |t| !to_remove.contains(&t.header.instance_uid))
        });

        info!(
            series = %self.series_uid,
            removed = to_remove.len(),
            "instances removed from series"
        );
        Ok(to_remove.len())
    }

    // ---- Sync ----

    /// Upload the staged container and metadata document to the remote
    /// store.
    ///
    /// On the clean path the lock is verified immediately before writing.
    /// Dirty syncs never write remotely: the staged state stays local, and
    /// the report carries the still-staged instances (un-relocated) so the
    /// caller can see what a later clean handle has left to upload.
    pub fn sync(&mut self, dirty: bool) -> CODResult<SyncReport> {
        self.check_policy("sync", dirty)?;

        if dirty || self.lock_mode == LockMode::Disabled {
            info!(
                series = %self.series_uid,
                staged = self.staged.len(),
                "dirty sync: skipping remote writes"
            );
            return Ok(SyncReport {
                instances: self.staged.clone(),
                ..SyncReport::default()
            });
        }

        let mut report = SyncReport::default();
        if self.container_synced && self.metadata_synced {
            return Ok(report);
        }

        // The lock must still be ours at the moment we overwrite shared
        // state.
        self.locker.verify()?;

        if !self.container_synced {
            let tar_uri = self.tar_uri();
            report.tar_generation = Some(self.store.write(&tar_uri, &self.container)?);
            self.container_synced = true;
        }
        if !self.metadata_synced {
            let uri = self.metadata_uri();
            let doc = self.ensure_metadata()?;
            let bytes = doc.to_json_bytes(&uri)?;
            report.metadata_generation = Some(self.store.write(&uri, &bytes)?);
            self.metadata_synced = true;
        }
        report.remote_written = true;

        // Staged instances now live at their remote member URIs.
        let mut synced = std::mem::take(&mut self.staged);
        for instance in &mut synced {
            if let Some(uid) = instance.truth().map(|t| t.header.instance_uid.clone()) {
                instance.relocate(self.remote_member_uri(&uid));
            }
        }
        info!(
            series = %self.series_uid,
            instances = synced.len(),
            "series synced to datastore"
        );
        report.instances = synced;
        Ok(report)
    }

    // ---- Lock lifetime ----

    /// Run `f` against this handle with deterministic lock release.
    ///
    /// The lock is released only if `f` succeeds and release itself
    /// succeeds. If `f` fails, the lock is deliberately left held as the
    /// signal that the series may be partially mutated, and the original
    /// error is returned unmasked.
    pub fn scope<T, F>(mut self, f: F) -> CODResult<T>
    where
        F: FnOnce(&mut CODObject) -> CODResult<T>,
    {
        match f(&mut self) {
            Ok(value) => {
                self.locker.release()?;
                Ok(value)
            }
            Err(e) => {
                warn!(
                    series = %self.series_uid,
                    error = %e,
                    "scope failed; leaving lock held for operator review"
                );
                Err(e)
            }
        }
    }

    /// Explicitly release the lock.
    pub fn release(&mut self) -> CODResult<()> {
        Ok(self.locker.release()?)
    }

    /// Whether a lock object currently exists for this series, regardless of
    /// owner. Diagnostics only.
    pub fn is_locked(&self) -> CODResult<bool> {
        Ok(self.locker.is_held()?)
    }

    // ---- Serialization bridge ----

    /// Capture this handle's identity and lock generation as a transferable
    /// record.
    pub fn serialize(&self) -> CODObjectRecord {
        CODObjectRecord {
            datastore_path: self.datastore_path.clone(),
            study_uid: self.study_uid.clone(),
            series_uid: self.series_uid.clone(),
            lock_mode: self.lock_mode,
            lock_generation: self.locker.generation(),
        }
    }

    /// Reconstruct a handle from a serialized record.
    ///
    /// If the record carries a lock generation, ownership is resumed with a
    /// reacquire (no new lock object is created); a stale generation fails
    /// with a lock acquisition error.
    pub fn deserialize(
        record: CODObjectRecord,
        store: Arc<dyn BlobStore>,
        parser: Arc<dyn DicomParser>,
    ) -> CODResult<Self> {
        let prefix = format!(
            "{}/{}/{}",
            record.datastore_path, record.study_uid, record.series_uid
        );
        let mut locker = Locker::new(Arc::clone(&store), format!("{prefix}/{LOCK_FILE_NAME}"));
        match (record.lock_mode, record.lock_generation) {
            (LockMode::Required, Some(generation)) => {
                locker.reacquire(generation)?;
            }
            (LockMode::Required, None) => {
                locker.acquire()?;
            }
            (LockMode::Disabled, _) => {}
        }

        Ok(CODObject {
            datastore_path: record.datastore_path,
            study_uid: record.study_uid,
            series_uid: record.series_uid,
            lock_mode: record.lock_mode,
            store,
            parser,
            locker,
            metadata: None,
            metadata_synced: true,
            container: Vec::new(),
            container_loaded: false,
            container_synced: true,
            staged: Vec::new(),
        })
    }
}

impl std::fmt::Debug for CODObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CODObject")
            .field("datastore_path", &self.datastore_path)
            .field("study_uid", &self.study_uid)
            .field("series_uid", &self.series_uid)
            .field("lock_mode", &self.lock_mode)
            .field("lock_generation", &self.locker.generation())
            .finish()
    }
}

impl std::fmt::Display for CODObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CODObject({}/{}/{})",
            self.datastore_path, self.study_uid, self.series_uid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::append::AppendOptions;
    use crate::testutil::{
        build_archive, dicom_bytes, shared_store, uid, LineParser, DATASTORE, INSTANCE_UID,
        SERIES_UID, STUDY_UID,
    };
    use cod_lock::LockError;
    use cod_store::InMemoryBlobStore;

    fn lock_uri() -> String {
        format!("{DATASTORE}/{STUDY_UID}/{SERIES_UID}/{LOCK_FILE_NAME}")
    }

    fn seeded_instance(store: &InMemoryBlobStore, uri: &str) -> Instance {
        store.write(uri, &dicom_bytes(INSTANCE_UID)).unwrap();
        Instance::new(uri)
    }

    fn try_build(store: &Arc<InMemoryBlobStore>, mode: LockMode) -> CODResult<CODObject> {
        CODObject::builder()
            .datastore_path(DATASTORE)
            .study_uid(uid(STUDY_UID))
            .series_uid(uid(SERIES_UID))
            .lock(mode)
            .build(
                Arc::clone(store) as Arc<dyn BlobStore>,
                Arc::new(LineParser),
            )
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn builder_requires_an_explicit_lock_mode() {
        let store = shared_store();
        let err = CODObject::builder()
            .datastore_path(DATASTORE)
            .study_uid(uid(STUDY_UID))
            .series_uid(uid(SERIES_UID))
            .build(
                Arc::clone(&store) as Arc<dyn BlobStore>,
                Arc::new(LineParser),
            )
            .unwrap_err();
        assert!(matches!(err, CODError::Configuration(_)));
    }

    #[test]
    fn builder_requires_identity() {
        let store = shared_store();
        let err = CODObject::builder()
            .datastore_path(DATASTORE)
            .lock(LockMode::Disabled)
            .build(
                Arc::clone(&store) as Arc<dyn BlobStore>,
                Arc::new(LineParser),
            )
            .unwrap_err();
        assert!(matches!(err, CODError::Configuration(_)));
    }

    #[test]
    fn required_mode_takes_the_lock_at_build() {
        let store = shared_store();
        let cod = build_archive(&store, LockMode::Required);
        assert!(store.exists(&lock_uri()).unwrap());
        assert!(cod.lock_generation().is_some());
    }

    #[test]
    fn build_fails_when_lock_already_held() {
        let store = shared_store();
        let _holder = build_archive(&store, LockMode::Required);
        let err = try_build(&store, LockMode::Required).unwrap_err();
        assert!(matches!(
            err,
            CODError::Lock(LockError::AlreadyHeld { .. })
        ));
    }

    #[test]
    fn disabled_mode_never_touches_the_lock() {
        let store = shared_store();
        let cod = build_archive(&store, LockMode::Disabled);
        assert!(!store.exists(&lock_uri()).unwrap());
        assert!(cod.lock_generation().is_none());
    }

    #[test]
    fn create_if_missing_false_rejects_absent_series() {
        let store = shared_store();
        let err = CODObject::builder()
            .datastore_path(DATASTORE)
            .study_uid(uid(STUDY_UID))
            .series_uid(uid(SERIES_UID))
            .lock(LockMode::Disabled)
            .create_if_missing(false)
            .build(
                Arc::clone(&store) as Arc<dyn BlobStore>,
                Arc::new(LineParser),
            )
            .unwrap_err();
        assert!(matches!(err, CODError::NotFound(_)));
    }

    #[test]
    fn uris_are_derived_from_identity() {
        let store = shared_store();
        let cod = build_archive(&store, LockMode::Disabled);
        assert_eq!(
            cod.tar_uri(),
            format!("{DATASTORE}/{STUDY_UID}/{SERIES_UID}.tar")
        );
        assert_eq!(
            cod.metadata_uri(),
            format!("{DATASTORE}/{STUDY_UID}/{SERIES_UID}/metadata.json")
        );
        assert_eq!(
            cod.remote_member_uri(&uid(INSTANCE_UID)),
            format!("{DATASTORE}/{STUDY_UID}/{SERIES_UID}.tar://instances/{INSTANCE_UID}.dcm")
        );
    }

    // -----------------------------------------------------------------------
    // Clean/dirty policy
    // -----------------------------------------------------------------------

    #[test]
    fn clean_operation_without_lock_is_a_policy_violation() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Disabled);
        let err = cod.get_metadata(false).unwrap_err();
        assert!(matches!(err, CODError::PolicyViolation { .. }));
    }

    #[test]
    fn dirty_operation_without_lock_proceeds() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Disabled);
        assert!(cod.get_metadata(true).unwrap().instances().is_empty());
    }

    #[test]
    fn dirty_operation_on_locked_handle_proceeds() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Required);
        // Warns, but is not refused.
        assert!(cod.get_metadata(true).unwrap().instances().is_empty());
    }

    // -----------------------------------------------------------------------
    // Lock lifetime
    // -----------------------------------------------------------------------

    #[test]
    fn dropping_a_handle_does_not_release_the_lock() {
        let store = shared_store();
        {
            let _cod = build_archive(&store, LockMode::Required);
        }
        assert!(store.exists(&lock_uri()).unwrap());
    }

    #[test]
    fn scope_releases_the_lock_on_success() {
        let store = shared_store();
        let cod = build_archive(&store, LockMode::Required);
        cod.scope(|cod| cod.get_metadata(false).map(|m| m.total_bytes()))
            .unwrap();
        assert!(!store.exists(&lock_uri()).unwrap());
    }

    #[test]
    fn scope_leaves_the_lock_held_on_error() {
        let store = shared_store();
        let cod = build_archive(&store, LockMode::Required);
        let err = cod
            .scope(|_| -> CODResult<()> {
                Err(CODError::Configuration("simulated failure".into()))
            })
            .unwrap_err();
        // The original error comes back unmasked and the lock survives.
        assert!(matches!(err, CODError::Configuration(_)));
        assert!(store.exists(&lock_uri()).unwrap());
    }

    #[test]
    fn scope_surfaces_release_failure_when_lock_is_stolen() {
        let store = shared_store();
        let cod = build_archive(&store, LockMode::Required);
        let err = cod
            .scope(|cod| {
                // Another process deletes our lock and takes its own.
                cod.store.delete(&lock_uri())?;
                let mut thief =
                    Locker::new(Arc::clone(&cod.store), lock_uri());
                thief.acquire()?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            err,
            CODError::Lock(LockError::GenerationMismatch { .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    #[test]
    fn sync_uploads_container_and_metadata() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Required);
        let instance = seeded_instance(&store, "gs://inbox/a.dcm");
        cod.append(vec![instance], &AppendOptions::default(), false)
            .unwrap();

        let report = cod.sync(false).unwrap();
        assert!(report.remote_written);
        assert!(report.tar_generation.is_some());
        assert!(report.metadata_generation.is_some());

        let tar = store.read(&cod.tar_uri()).unwrap().unwrap();
        assert_eq!(tar, dicom_bytes(INSTANCE_UID));

        let doc = store.read(&cod.metadata_uri()).unwrap().unwrap();
        let meta = SeriesMetadata::from_json_bytes(&doc, &cod.metadata_uri()).unwrap();
        assert!(meta.instances().contains_key(&uid(INSTANCE_UID)));
    }

    #[test]
    fn sync_relocates_staged_instances_to_remote_uris() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Required);
        let instance = seeded_instance(&store, "gs://inbox/a.dcm");
        cod.append(vec![instance], &AppendOptions::default(), false)
            .unwrap();

        let report = cod.sync(false).unwrap();
        assert_eq!(report.instances.len(), 1);
        assert_eq!(
            report.instances[0].dicom_uri(),
            cod.remote_member_uri(&uid(INSTANCE_UID))
        );
        assert_eq!(report.instances[0].original_path(), "gs://inbox/a.dcm");
        assert!(cod.staged().is_empty());
    }

    #[test]
    fn sync_with_nothing_staged_is_a_noop() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Required);
        let report = cod.sync(false).unwrap();
        assert!(!report.remote_written);
        assert!(!store.exists(&cod.tar_uri()).unwrap());
    }

    #[test]
    fn dirty_sync_never_writes_remotely() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Disabled);
        let instance = seeded_instance(&store, "gs://inbox/a.dcm");
        cod.append(vec![instance], &AppendOptions::default(), true)
            .unwrap();

        let report = cod.sync(true).unwrap();
        assert!(!report.remote_written);
        assert!(!store.exists(&cod.tar_uri()).unwrap());
        assert!(!store.exists(&cod.metadata_uri()).unwrap());
        // The staged work stays local, ready for a later clean handle, and
        // the report shows it without relocating anything.
        assert_eq!(cod.staged().len(), 1);
        assert_eq!(report.instances.len(), 1);
        assert_eq!(
            report.instances[0].dicom_uri(),
            format!("{SERIES_UID}.tar://instances/{INSTANCE_UID}.dcm")
        );
    }

    #[test]
    fn sync_fails_when_lock_is_stolen() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Required);
        let instance = seeded_instance(&store, "gs://inbox/a.dcm");
        cod.append(vec![instance], &AppendOptions::default(), false)
            .unwrap();

        store.delete(&lock_uri()).unwrap();
        let mut thief = Locker::new(
            Arc::clone(&store) as Arc<dyn BlobStore>,
            lock_uri(),
        );
        thief.acquire().unwrap();

        let err = cod.sync(false).unwrap_err();
        assert!(matches!(err, CODError::Lock(_)));
        assert!(!store.exists(&cod.tar_uri()).unwrap());
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    const OTHER_UID: &str = "1.2.3.4.5.6.7.8.9.4";

    fn seeded_with_uid(store: &InMemoryBlobStore, uri: &str, iuid: &str) -> Instance {
        store.write(uri, &dicom_bytes(iuid)).unwrap();
        Instance::new(uri)
    }

    #[test]
    fn remove_drops_member_and_rebuilds_container() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Required);
        let a = seeded_with_uid(&store, "gs://inbox/a.dcm", INSTANCE_UID);
        let b = seeded_with_uid(&store, "gs://inbox/b.dcm", OTHER_UID);
        cod.append(vec![a, b], &AppendOptions::default(), false)
            .unwrap();

        assert_eq!(cod.remove(&[uid(INSTANCE_UID)], false).unwrap(), 1);

        let kept = dicom_bytes(OTHER_UID);
        {
            let meta = cod.get_metadata(false).unwrap();
            assert!(!meta.instances().contains_key(&uid(INSTANCE_UID)));
            let survivor = &meta.instances()[&uid(OTHER_UID)];
            assert_eq!(survivor.headers.start_byte, 0);
            assert_eq!(survivor.headers.end_byte, kept.len() as u64);
        }
        // The container holds only the kept member's bytes.
        assert_eq!(cod.pull_tar(false).unwrap(), kept);
        // The removed member's staged copy is gone too.
        assert_eq!(cod.staged().len(), 1);
    }

    #[test]
    fn remove_unknown_uid_is_skipped() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Required);
        let a = seeded_with_uid(&store, "gs://inbox/a.dcm", INSTANCE_UID);
        cod.append(vec![a], &AppendOptions::default(), false)
            .unwrap();

        assert_eq!(cod.remove(&[uid(OTHER_UID)], false).unwrap(), 0);
        let meta = cod.get_metadata(false).unwrap();
        assert!(meta.instances().contains_key(&uid(INSTANCE_UID)));
    }

    #[test]
    fn remove_every_member_is_refused() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Required);
        let a = seeded_with_uid(&store, "gs://inbox/a.dcm", INSTANCE_UID);
        cod.append(vec![a], &AppendOptions::default(), false)
            .unwrap();

        let err = cod.remove(&[uid(INSTANCE_UID)], false).unwrap_err();
        assert!(matches!(err, CODError::RemoveAll { .. }));
        // The member survives the refused removal.
        let meta = cod.get_metadata(false).unwrap();
        assert!(meta.instances().contains_key(&uid(INSTANCE_UID)));
    }

    #[test]
    fn remove_is_policy_gated() {
        let store = shared_store();
        let mut cod = build_archive(&store, LockMode::Disabled);
        let err = cod.remove(&[uid(INSTANCE_UID)], false).unwrap_err();
        assert!(matches!(err, CODError::PolicyViolation { .. }));
    }

    #[test]
    fn remove_pulls_remote_container_when_needed() {
        let store = shared_store();
        let mut writer = build_archive(&store, LockMode::Required);
        let a = seeded_with_uid(&store, "gs://inbox/a.dcm", INSTANCE_UID);
        let b = seeded_with_uid(&store, "gs://inbox/b.dcm", OTHER_UID);
        writer
            .append(vec![a, b], &AppendOptions::default(), false)
            .unwrap();
        writer.sync(false).unwrap();
        writer.release().unwrap();

        // A fresh handle sees the members only through the remote documents.
        let mut cod = build_archive(&store, LockMode::Required);
        assert_eq!(cod.remove(&[uid(INSTANCE_UID)], false).unwrap(), 1);
        assert_eq!(cod.pull_tar(false).unwrap(), dicom_bytes(OTHER_UID));

        // The rebuilt container and document reach the store on sync.
        cod.sync(false).unwrap();
        assert_eq!(
            store.read(&cod.tar_uri()).unwrap().unwrap(),
            dicom_bytes(OTHER_UID)
        );
        let doc = store.read(&cod.metadata_uri()).unwrap().unwrap();
        let meta = SeriesMetadata::from_json_bytes(&doc, &cod.metadata_uri()).unwrap();
        assert!(!meta.instances().contains_key(&uid(INSTANCE_UID)));
        assert!(meta.instances().contains_key(&uid(OTHER_UID)));
    }

    // -----------------------------------------------------------------------
    // Serialization bridge
    // -----------------------------------------------------------------------

    #[test]
    fn serialized_handle_resumes_lock_ownership() {
        let store = shared_store();
        let cod = build_archive(&store, LockMode::Required);
        let generation = cod.lock_generation();
        let record = cod.serialize();
        drop(cod);

        let mut resumed = CODObject::deserialize(
            record,
            Arc::clone(&store) as Arc<dyn BlobStore>,
            Arc::new(LineParser),
        )
        .unwrap();
        assert_eq!(resumed.lock_generation(), generation);

        // Clean operations work on the resumed handle.
        let instance = seeded_instance(&store, "gs://inbox/a.dcm");
        let result = resumed
            .append(vec![instance], &AppendOptions::default(), false)
            .unwrap();
        assert_eq!(result.new, vec![uid(INSTANCE_UID)]);
        resumed.sync(false).unwrap();
    }

    #[test]
    fn deserialize_with_stale_generation_fails() {
        let store = shared_store();
        let cod = build_archive(&store, LockMode::Required);
        let record = cod.serialize();
        drop(cod);

        // The lock changes hands while the record is in flight.
        store.delete(&lock_uri()).unwrap();
        let mut thief = Locker::new(
            Arc::clone(&store) as Arc<dyn BlobStore>,
            lock_uri(),
        );
        thief.acquire().unwrap();

        let err = CODObject::deserialize(
            record,
            Arc::clone(&store) as Arc<dyn BlobStore>,
            Arc::new(LineParser),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CODError::Lock(LockError::ReacquireFailed { .. })
        ));
    }

    #[test]
    fn deserialize_without_generation_acquires_fresh() {
        let store = shared_store();
        let record = CODObjectRecord {
            datastore_path: DATASTORE.into(),
            study_uid: uid(STUDY_UID),
            series_uid: uid(SERIES_UID),
            lock_mode: LockMode::Required,
            lock_generation: None,
        };
        let cod = CODObject::deserialize(
            record,
            Arc::clone(&store) as Arc<dyn BlobStore>,
            Arc::new(LineParser),
        )
        .unwrap();
        assert!(cod.lock_generation().is_some());
        assert!(store.exists(&lock_uri()).unwrap());
    }

    #[test]
    fn record_serializes_with_snake_case_lock_mode() {
        let store = shared_store();
        let cod = build_archive(&store, LockMode::Required);
        let json = serde_json::to_value(cod.serialize()).unwrap();
        assert_eq!(json["lock_mode"], "required");
        assert_eq!(json["series_uid"], SERIES_UID);
        assert!(json["lock_generation"].is_number());
    }

    // -----------------------------------------------------------------------
    // Container pull
    // -----------------------------------------------------------------------

    #[test]
    fn pull_tar_reads_back_a_synced_container() {
        let store = shared_store();
        let mut writer = build_archive(&store, LockMode::Required);
        let instance = seeded_instance(&store, "gs://inbox/a.dcm");
        writer
            .append(vec![instance], &AppendOptions::default(), false)
            .unwrap();
        writer.sync(false).unwrap();
        writer.release().unwrap();

        let mut reader = build_archive(&store, LockMode::Disabled);
        let tar = reader.pull_tar(true).unwrap();
        assert_eq!(tar, dicom_bytes(INSTANCE_UID));
    }
}
