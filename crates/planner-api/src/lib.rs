use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use planner_core::{
    build_patch, validate_draft, CompletionStatus, DateTarget, OwnerId, PlannerError, Record,
    RecordId, RecordKind,
};
use planner_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore, DEFAULT_BUSY_TIMEOUT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod auth;
mod blob;
mod view;

pub use auth::{
    extract_token_from_cookie, extract_token_from_header, Claims, JwtAuthenticator,
    DEFAULT_TOKEN_TTL_SECS, MIN_SECRET_LEN,
};
pub use blob::{BlobStore, LocalBlobStore, Upload, PHOTO_PREFIX};
pub use view::{EventView, GoalView, RecordView, TodoView};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedRecord {
    pub event_id: RecordId,
    pub record: RecordView,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletedRecord {
    pub event_id: RecordId,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionChange {
    #[serde(rename = "event_id")]
    pub event_id: RecordId,
    pub completion_status: CompletionStatus,
    pub is_completed: bool,
}

impl CompletionChange {
    fn new(event_id: RecordId, status: CompletionStatus) -> Self {
        Self { event_id, completion_status: status, is_completed: status.is_complete() }
    }
}

/// Owner-scoped record operations over a `SQLite` database file.
///
/// Each call opens its own connection, so the facade is cheap to clone and
/// safe to share across request handlers.
#[derive(Clone)]
pub struct PlannerApi {
    db_path: PathBuf,
    busy_timeout: Duration,
    blobs: Option<Arc<dyn BlobStore>>,
}

impl std::fmt::Debug for PlannerApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannerApi")
            .field("db_path", &self.db_path)
            .field("busy_timeout", &self.busy_timeout)
            .field("blobs", &self.blobs.is_some())
            .finish()
    }
}

impl PlannerApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path, busy_timeout: DEFAULT_BUSY_TIMEOUT, blobs: None }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open_with_busy_timeout(&self.db_path, self.busy_timeout)
    }

    fn migrated_store(&self) -> Result<SqliteStore, PlannerError> {
        let mut store = self.open_store().map_err(store_error)?;
        store.migrate().map_err(store_error)?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Run `SQLite` integrity checks.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or checked.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = self.open_store()?;
        store.integrity_check()
    }

    /// Validate `payload` against the schema of `kind`, store an optional goal
    /// photo, then persist the record. A failed upload leaves no record behind.
    ///
    /// # Errors
    /// Returns [`PlannerError::Validation`] for a bad payload or photo,
    /// [`PlannerError::Collaborator`] when the photo cannot be stored, and
    /// [`PlannerError::StoreUnavailable`] when persistence fails.
    pub fn create(
        &self,
        owner_id: &OwnerId,
        kind: RecordKind,
        payload: &Map<String, Value>,
        image: Option<&Upload>,
    ) -> Result<CreatedRecord, PlannerError> {
        let mut draft = validate_draft(kind, payload)?;
        if let Some(image) = image {
            draft.attach_photo(self.store_photo(kind, image)?)?;
        }

        let mut store = self.migrated_store()?;
        let record = store.create_record(owner_id, draft).map_err(store_error)?;
        Ok(CreatedRecord { event_id: record.id, record: RecordView::from(record) })
    }

    /// # Errors
    /// Returns [`PlannerError::NotFound`] when no record of `kind` with `id` is
    /// owned by `owner_id`.
    pub fn get(
        &self,
        owner_id: &OwnerId,
        kind: RecordKind,
        id: &str,
    ) -> Result<RecordView, PlannerError> {
        let id = RecordId::from_str(id)?;
        let store = self.migrated_store()?;
        store
            .get_record(owner_id, kind, id)
            .map_err(store_error)?
            .map(RecordView::from)
            .ok_or(PlannerError::NotFound)
    }

    /// # Errors
    /// Returns [`PlannerError::StoreUnavailable`] when the store cannot be read.
    pub fn list(&self, owner_id: &OwnerId, kind: RecordKind) -> Result<Vec<RecordView>, PlannerError> {
        let store = self.migrated_store()?;
        let records = store.list_records(owner_id, kind).map_err(store_error)?;
        Ok(into_views(records))
    }

    /// Records of `kind` whose schedule contains `date` (`YYYY-MM-DD` or a timestamp).
    ///
    /// # Errors
    /// Returns [`PlannerError::Validation`] on `date` when it cannot be parsed.
    pub fn list_on(
        &self,
        owner_id: &OwnerId,
        kind: RecordKind,
        date: &str,
    ) -> Result<Vec<RecordView>, PlannerError> {
        let target = DateTarget::parse(date)?;
        let store = self.migrated_store()?;
        let records = store.list_records_on(owner_id, kind, target).map_err(store_error)?;
        Ok(into_views(records))
    }

    /// Apply the supplied fields of `payload` to one owned record. An attached
    /// image replaces the goal photo.
    ///
    /// # Errors
    /// Returns [`PlannerError::Validation`] for an empty or malformed patch and
    /// [`PlannerError::NotFound`] when the record is missing or foreign.
    pub fn update(
        &self,
        owner_id: &OwnerId,
        kind: RecordKind,
        id: &str,
        payload: &Map<String, Value>,
        image: Option<&Upload>,
    ) -> Result<RecordView, PlannerError> {
        let id = RecordId::from_str(id)?;
        let mut patch = build_patch(kind, payload)?;
        let mut store = self.migrated_store()?;
        if let Some(image) = image {
            // Only upload once the target is known to exist and be owned.
            if store.get_record(owner_id, kind, id).map_err(store_error)?.is_none() {
                return Err(PlannerError::NotFound);
            }
            patch.photo_url = Some(Some(self.store_photo(kind, image)?));
        }
        patch.validate()?;

        store
            .update_record(owner_id, id, &patch)
            .map_err(store_error)?
            .map(RecordView::from)
            .ok_or(PlannerError::NotFound)
    }

    /// # Errors
    /// Returns [`PlannerError::NotFound`] when there is nothing owned to delete.
    pub fn delete(
        &self,
        owner_id: &OwnerId,
        kind: RecordKind,
        id: &str,
    ) -> Result<DeletedRecord, PlannerError> {
        let id = RecordId::from_str(id)?;
        let mut store = self.migrated_store()?;
        if store.delete_record(owner_id, kind, id).map_err(store_error)? {
            Ok(DeletedRecord { event_id: id, deleted: true })
        } else {
            Err(PlannerError::NotFound)
        }
    }

    /// Flip the completion state of one owned record.
    ///
    /// This is a read followed by a separate write; concurrent toggles of the
    /// same record resolve last-write-wins.
    ///
    /// # Errors
    /// Returns [`PlannerError::Validation`] for kinds without completion state and
    /// [`PlannerError::NotFound`] when the record is missing or foreign.
    pub fn toggle_completion(
        &self,
        owner_id: &OwnerId,
        kind: RecordKind,
        id: &str,
    ) -> Result<CompletionChange, PlannerError> {
        let id = parse_completion_target(kind, id)?;
        let current = {
            let store = self.migrated_store()?;
            store
                .completion_status(owner_id, kind, id)
                .map_err(store_error)?
                .ok_or(PlannerError::NotFound)?
        };
        self.write_completion(owner_id, kind, id, current.toggled())
    }

    /// Mark one owned record complete. Idempotent.
    ///
    /// # Errors
    /// Returns [`PlannerError::Validation`] for kinds without completion state and
    /// [`PlannerError::NotFound`] when the record is missing or foreign.
    pub fn set_complete(
        &self,
        owner_id: &OwnerId,
        kind: RecordKind,
        id: &str,
    ) -> Result<CompletionChange, PlannerError> {
        let id = parse_completion_target(kind, id)?;
        self.write_completion(owner_id, kind, id, CompletionStatus::Complete)
    }

    fn store_photo(&self, kind: RecordKind, image: &Upload) -> Result<String, PlannerError> {
        if kind != RecordKind::Goal {
            return Err(PlannerError::validation(
                "image",
                format!("photos are not supported for {} records", kind.as_str()),
            ));
        }
        let blobs = self.blobs.as_ref().ok_or_else(|| {
            PlannerError::Collaborator("blob storage is not configured".to_string())
        })?;
        blobs.put(image).inspect_err(|err| {
            tracing::error!(error = %err, "photo upload failed");
        })
    }

    fn write_completion(
        &self,
        owner_id: &OwnerId,
        kind: RecordKind,
        id: RecordId,
        status: CompletionStatus,
    ) -> Result<CompletionChange, PlannerError> {
        let mut store = self.migrated_store()?;
        if store.set_completion(owner_id, kind, id, status).map_err(store_error)? {
            Ok(CompletionChange::new(id, status))
        } else {
            Err(PlannerError::NotFound)
        }
    }
}

fn parse_completion_target(kind: RecordKind, id: &str) -> Result<RecordId, PlannerError> {
    if !kind.tracks_completion() {
        return Err(PlannerError::validation(
            "completionStatus",
            format!("completion is not tracked for {} records", kind.as_str()),
        ));
    }
    RecordId::from_str(id)
}

fn into_views(records: Vec<Record>) -> Vec<RecordView> {
    records.into_iter().map(RecordView::from).collect()
}

/// Typed store rejections pass through; anything else means the store could
/// not do its job.
fn store_error(err: anyhow::Error) -> PlannerError {
    match err.downcast::<PlannerError>() {
        Ok(planner_error) => planner_error,
        Err(other) => {
            tracing::error!(error = %format!("{other:#}"), "record store failure");
            PlannerError::StoreUnavailable(format!("{other:#}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use serde_json::json;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("planner-api-{}.sqlite3", ulid::Ulid::new()))
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture payload should be an object: {other}"),
        }
    }

    fn goal_payload() -> Map<String, Value> {
        object(json!({
            "title": "Run 5k",
            "startDatetime": "2024-05-01T00:00",
            "endDatetime": "2024-05-01T23:59",
            "content": "morning loop"
        }))
    }

    fn expect_ok<T, E: std::fmt::Display>(result: Result<T, E>, what: &str) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("{what} failed: {err}"),
        }
    }

    #[derive(Default)]
    struct RecordingBlobStore {
        fail: bool,
        uploads: Mutex<Vec<Upload>>,
    }

    impl BlobStore for RecordingBlobStore {
        fn put(&self, upload: &Upload) -> Result<String, PlannerError> {
            if self.fail {
                return Err(PlannerError::Collaborator("bucket unavailable".to_string()));
            }
            if let Ok(mut uploads) = self.uploads.lock() {
                uploads.push(upload.clone());
            }
            Ok("https://blobs.test/photos/abc.jpg".to_string())
        }
    }

    fn jpeg() -> Upload {
        Upload { content_type: "image/jpeg".to_string(), bytes: b"jpeg".to_vec() }
    }

    #[test]
    fn create_get_list_and_delete_round_trip() {
        let db_path = unique_temp_db_path();
        let api = PlannerApi::new(db_path.clone());
        let owner = OwnerId::new("u1");

        let created = expect_ok(api.create(&owner, RecordKind::Goal, &goal_payload(), None), "create");
        let loaded = expect_ok(api.get(&owner, RecordKind::Goal, &created.event_id.to_string()), "get");
        assert_eq!(loaded, created.record);

        let listed = expect_ok(api.list(&owner, RecordKind::Goal), "list");
        assert_eq!(listed, vec![created.record.clone()]);

        let id = created.event_id.to_string();
        let deleted = expect_ok(api.delete(&owner, RecordKind::Goal, &id), "delete");
        assert!(deleted.deleted);
        assert_eq!(api.delete(&owner, RecordKind::Goal, &id), Err(PlannerError::NotFound));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn foreign_owner_sees_not_found_everywhere() {
        let db_path = unique_temp_db_path();
        let api = PlannerApi::new(db_path.clone());
        let created = expect_ok(
            api.create(&OwnerId::new("u1"), RecordKind::Goal, &goal_payload(), None),
            "create",
        );
        let id = created.event_id.to_string();
        let intruder = OwnerId::new("u2");

        assert_eq!(api.get(&intruder, RecordKind::Goal, &id), Err(PlannerError::NotFound));
        assert_eq!(
            api.update(&intruder, RecordKind::Goal, &id, &object(json!({ "title": "mine" })), None),
            Err(PlannerError::NotFound)
        );
        assert_eq!(api.delete(&intruder, RecordKind::Goal, &id), Err(PlannerError::NotFound));
        assert_eq!(
            api.toggle_completion(&intruder, RecordKind::Goal, &id),
            Err(PlannerError::NotFound)
        );
        assert_eq!(api.get(&intruder, RecordKind::Goal, "garbage"), Err(PlannerError::NotFound));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn goal_photo_is_uploaded_before_the_record_is_written() {
        let db_path = unique_temp_db_path();
        let blobs = Arc::new(RecordingBlobStore::default());
        let api = PlannerApi::new(db_path.clone()).with_blob_store(blobs.clone());
        let owner = OwnerId::new("u1");

        let created =
            expect_ok(api.create(&owner, RecordKind::Goal, &goal_payload(), Some(&jpeg())), "create");
        let RecordView::Goal(goal) = created.record else {
            panic!("expected goal view");
        };
        assert_eq!(goal.photo_url.as_deref(), Some("https://blobs.test/photos/abc.jpg"));
        assert_eq!(blobs.uploads.lock().map(|uploads| uploads.len()).unwrap_or_default(), 1);

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn failed_upload_leaves_no_record_behind() {
        let db_path = unique_temp_db_path();
        let blobs = Arc::new(RecordingBlobStore { fail: true, ..RecordingBlobStore::default() });
        let api = PlannerApi::new(db_path.clone()).with_blob_store(blobs);
        let owner = OwnerId::new("u1");

        let result = api.create(&owner, RecordKind::Goal, &goal_payload(), Some(&jpeg()));
        assert!(matches!(result, Err(PlannerError::Collaborator(_))));
        assert_eq!(api.list(&owner, RecordKind::Goal), Ok(Vec::new()));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn photo_update_to_missing_or_foreign_goal_uploads_nothing() {
        let db_path = unique_temp_db_path();
        let blobs = Arc::new(RecordingBlobStore::default());
        let api = PlannerApi::new(db_path.clone()).with_blob_store(blobs.clone());
        let created = expect_ok(
            api.create(&OwnerId::new("u1"), RecordKind::Goal, &goal_payload(), None),
            "create",
        );
        let intruder = OwnerId::new("u2");

        let foreign = api.update(
            &intruder,
            RecordKind::Goal,
            &created.event_id.to_string(),
            &Map::new(),
            Some(&jpeg()),
        );
        assert_eq!(foreign, Err(PlannerError::NotFound));

        let missing_id = RecordId::new().to_string();
        let missing = api.update(&intruder, RecordKind::Goal, &missing_id, &Map::new(), Some(&jpeg()));
        assert_eq!(missing, Err(PlannerError::NotFound));
        assert_eq!(blobs.uploads.lock().map(|uploads| uploads.len()).unwrap_or_default(), 0);

        let owned = expect_ok(
            api.update(
                &OwnerId::new("u1"),
                RecordKind::Goal,
                &created.event_id.to_string(),
                &Map::new(),
                Some(&jpeg()),
            ),
            "owner photo update",
        );
        let RecordView::Goal(goal) = owned else {
            panic!("expected goal view");
        };
        assert_eq!(goal.photo_url.as_deref(), Some("https://blobs.test/photos/abc.jpg"));
        assert_eq!(blobs.uploads.lock().map(|uploads| uploads.len()).unwrap_or_default(), 1);

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn photos_are_only_accepted_for_goals() {
        let api = PlannerApi::new(unique_temp_db_path())
            .with_blob_store(Arc::new(RecordingBlobStore::default()));
        let result = api.create(
            &OwnerId::new("u1"),
            RecordKind::Todo,
            &object(json!({ "title": "t" })),
            Some(&jpeg()),
        );
        assert_eq!(result.map_err(|err| err.field().map(str::to_string)), Err(Some("image".to_string())));
    }

    #[test]
    fn partial_update_keeps_untouched_fields_and_rejects_empty_patch() {
        let db_path = unique_temp_db_path();
        let api = PlannerApi::new(db_path.clone());
        let owner = OwnerId::new("u1");
        let created = expect_ok(api.create(&owner, RecordKind::Goal, &goal_payload(), None), "create");
        let id = created.event_id.to_string();

        let updated = expect_ok(
            api.update(&owner, RecordKind::Goal, &id, &object(json!({ "photoUrl": "https://x/y.jpg" })), None),
            "update",
        );
        let (RecordView::Goal(before), RecordView::Goal(after)) = (created.record, updated) else {
            panic!("expected goal views");
        };
        assert_eq!(after.photo_url.as_deref(), Some("https://x/y.jpg"));
        assert_eq!(after.title, before.title);
        assert_eq!(after.start_datetime, before.start_datetime);
        assert_eq!(after.end_datetime, before.end_datetime);
        assert_eq!(after.content, before.content);

        let empty = api.update(&owner, RecordKind::Goal, &id, &object(json!({ "unknown": 1 })), None);
        assert!(matches!(empty, Err(PlannerError::Validation { .. })));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn toggle_flips_and_set_complete_is_idempotent() {
        let db_path = unique_temp_db_path();
        let api = PlannerApi::new(db_path.clone());
        let owner = OwnerId::new("u1");
        let goal = expect_ok(api.create(&owner, RecordKind::Goal, &goal_payload(), None), "create");
        let goal_id = goal.event_id.to_string();

        let first = expect_ok(api.toggle_completion(&owner, RecordKind::Goal, &goal_id), "toggle");
        assert_eq!(first.completion_status, CompletionStatus::Complete);
        let second = expect_ok(api.toggle_completion(&owner, RecordKind::Goal, &goal_id), "toggle");
        assert_eq!(second.completion_status, CompletionStatus::Incomplete);

        let todo = expect_ok(
            api.create(&owner, RecordKind::Todo, &object(json!({ "title": "t" })), None),
            "create todo",
        );
        let todo_id = todo.event_id.to_string();
        for _ in 0..2 {
            let change = expect_ok(api.set_complete(&owner, RecordKind::Todo, &todo_id), "set");
            assert!(change.is_completed);
        }

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn completion_on_events_is_a_validation_error() {
        let api = PlannerApi::new(unique_temp_db_path());
        let result = api.toggle_completion(&OwnerId::new("u1"), RecordKind::Event, "whatever");
        assert!(matches!(result, Err(PlannerError::Validation { .. })));
    }

    #[test]
    fn list_on_date_and_bad_date() {
        let db_path = unique_temp_db_path();
        let api = PlannerApi::new(db_path.clone());
        let owner = OwnerId::new("u1");
        let created = expect_ok(api.create(&owner, RecordKind::Goal, &goal_payload(), None), "create");

        let on_day = expect_ok(api.list_on(&owner, RecordKind::Goal, "2024-05-01"), "list_on");
        assert_eq!(on_day, vec![created.record]);
        assert_eq!(api.list_on(&owner, RecordKind::Goal, "2024-05-02"), Ok(Vec::new()));

        let bad = api.list_on(&owner, RecordKind::Goal, "someday");
        assert_eq!(bad.map_err(|err| err.field().map(str::to_string)), Err(Some("date".to_string())));

        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn unusable_database_path_is_store_unavailable() {
        let dir = std::env::temp_dir().join(format!("planner-api-dir-{}", ulid::Ulid::new()));
        let missing_parent = dir.join("nested").join("db.sqlite3");
        let api = PlannerApi::new(missing_parent);
        let result = api.list(&OwnerId::new("u1"), RecordKind::Todo);
        assert!(matches!(result, Err(PlannerError::StoreUnavailable(_))));
    }
}
