use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use planner_core::{
    CompletionStatus, DateTarget, OwnerId, PatchValue, PlannerError, Record, RecordDetails,
    RecordDraft, RecordField, RecordId, RecordKind, RecordPatch, Schedule,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

/// Default `busy_timeout` applied by [`SqliteStore::open`].
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS records (
  record_id TEXT PRIMARY KEY,
  owner_id TEXT NOT NULL,
  kind TEXT NOT NULL CHECK (kind IN ('goal','event','todo')),
  created_at TEXT NOT NULL,
  title TEXT NOT NULL,
  start_time TEXT,
  end_time TEXT,
  related_goal_id TEXT,
  location TEXT,
  content TEXT,
  photo_url TEXT,
  completion_status TEXT CHECK (completion_status IN ('incomplete','complete')),
  CHECK (
    (kind = 'todo' AND start_time IS NULL AND end_time IS NULL)
    OR (kind <> 'todo' AND start_time IS NOT NULL AND end_time IS NOT NULL)
  ),
  CHECK ((kind = 'event') = (completion_status IS NULL)),
  CHECK (kind = 'goal' OR photo_url IS NULL),
  CHECK (kind <> 'goal' OR related_goal_id IS NULL)
);

CREATE INDEX IF NOT EXISTS idx_records_owner_kind ON records(owner_id, kind, created_at);
";

const RECORD_COLUMNS: &str = "record_id, owner_id, kind, created_at, title, start_time, end_time,
    related_goal_id, location, content, photo_url, completion_status";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed record store with the default busy timeout.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open a SQLite-backed record store. Lock contention longer than
    /// `busy_timeout` fails the call instead of blocking.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open_with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to configure sqlite pragmas")?;
        conn.busy_timeout(busy_timeout).context("failed to configure sqlite busy timeout")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            version = self.apply_migration_1()?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<i64> {
        if table_exists(&self.conn, "records")? {
            // Table created before migration bookkeeping existed.
            record_schema_version(&self.conn, 1)?;
            return Ok(1);
        }

        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
        record_schema_version(&tx, 1)?;
        tx.commit().context("failed to commit migration v1")?;
        tracing::info!(version = 1, "applied schema migration");
        Ok(1)
    }

    /// Persist a new record built from a validated draft. The store assigns the
    /// identifier, creation time, and completion default.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn create_record(&mut self, owner_id: &OwnerId, draft: RecordDraft) -> Result<Record> {
        let record = Record::from_draft(owner_id.clone(), draft, OffsetDateTime::now_utc());
        self.insert_record(&record)?;
        tracing::info!(
            record_id = %record.id,
            kind = record.kind().as_str(),
            "created record"
        );
        Ok(record)
    }

    /// Insert a fully materialized record as one row.
    ///
    /// # Errors
    /// Returns an error when the row violates a table constraint or the write fails.
    pub fn insert_record(&mut self, record: &Record) -> Result<()> {
        let schedule = record.schedule();
        let start_time = schedule.map(|schedule| rfc3339(schedule.start)).transpose()?;
        let end_time = schedule.map(|schedule| rfc3339(schedule.end)).transpose()?;

        self.conn
            .execute(
                "INSERT INTO records(
                    record_id, owner_id, kind, created_at, title, start_time, end_time,
                    related_goal_id, location, content, photo_url, completion_status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id.to_string(),
                    record.owner_id.as_str(),
                    record.kind().as_str(),
                    rfc3339(record.created_at)?,
                    record.title,
                    start_time,
                    end_time,
                    record.related_goal_id(),
                    record.location,
                    record.content,
                    record.photo_url(),
                    record.completion().map(CompletionStatus::as_str),
                ],
            )
            .context("failed to insert record")?;
        Ok(())
    }

    /// Point lookup scoped to `owner_id` and `kind`. A record owned by someone
    /// else, or of another kind, reads as absent.
    ///
    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_record(
        &self,
        owner_id: &OwnerId,
        kind: RecordKind,
        id: RecordId,
    ) -> Result<Option<Record>> {
        fetch_record(&self.conn, owner_id, kind, id)
    }

    /// All records of one kind owned by `owner_id`, oldest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_records(&self, owner_id: &OwnerId, kind: RecordKind) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS}
             FROM records
             WHERE owner_id = ?1 AND kind = ?2
             ORDER BY record_id ASC"
        ))?;

        let mut rows = stmt.query(params![owner_id.as_str(), kind.as_str()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(decode_record(row)?);
        }

        records.retain(|record| record.owner_id == *owner_id && record.kind() == kind);
        // Stored timestamps carry a variable number of fractional digits, so
        // their text does not sort chronologically.
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Records of one kind owned by `owner_id` whose schedule contains `target`.
    /// Kinds without a schedule always yield an empty list.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_records_on(
        &self,
        owner_id: &OwnerId,
        kind: RecordKind,
        target: DateTarget,
    ) -> Result<Vec<Record>> {
        if !kind.has_schedule() {
            return Ok(Vec::new());
        }

        let mut records = self.list_records(owner_id, kind)?;
        records.retain(|record| record.falls_on(target));
        Ok(records)
    }

    /// Apply the touched fields of `patch` to one owned record of the patch's
    /// kind and return the updated record.
    ///
    /// # Errors
    /// Returns [`PlannerError::Validation`] (wrapped) for an empty or
    /// out-of-schema patch, or an error when the write fails.
    pub fn update_record(
        &mut self,
        owner_id: &OwnerId,
        id: RecordId,
        patch: &RecordPatch,
    ) -> Result<Option<Record>> {
        patch.validate().map_err(anyhow::Error::new)?;
        let kind = patch.kind();

        let mut assignments = Vec::new();
        let mut values = Vec::new();
        for field in RecordField::ALL {
            let Some(value) = patch.value(field) else {
                continue;
            };
            values.push(match value {
                PatchValue::Text(text) => text.map_or(SqlValue::Null, |text| SqlValue::Text(text.to_string())),
                PatchValue::Timestamp(value) => SqlValue::Text(rfc3339(value)?),
            });
            assignments.push(format!("{} = ?{}", field.column(), values.len()));
        }

        let scope_index = values.len();
        let sql = format!(
            "UPDATE records SET {}
             WHERE record_id = ?{} AND owner_id = ?{} AND kind = ?{}",
            assignments.join(", "),
            scope_index + 1,
            scope_index + 2,
            scope_index + 3,
        );
        values.push(SqlValue::Text(id.to_string()));
        values.push(SqlValue::Text(owner_id.as_str().to_string()));
        values.push(SqlValue::Text(kind.as_str().to_string()));

        let tx = self.conn.transaction().context("failed to start update transaction")?;
        let changed =
            tx.execute(&sql, params_from_iter(values.iter())).context("failed to update record")?;
        if changed == 0 {
            return Ok(None);
        }

        let updated = fetch_record(&tx, owner_id, kind, id)?;
        tx.commit().context("failed to commit update transaction")?;
        tracing::info!(record_id = %id, kind = kind.as_str(), "updated record");
        Ok(updated)
    }

    /// Delete one owned record of `kind`. Returns whether a row was removed.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_record(
        &mut self,
        owner_id: &OwnerId,
        kind: RecordKind,
        id: RecordId,
    ) -> Result<bool> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM records WHERE record_id = ?1 AND owner_id = ?2 AND kind = ?3",
                params![id.to_string(), owner_id.as_str(), kind.as_str()],
            )
            .context("failed to delete record")?;
        if deleted > 0 {
            tracing::info!(record_id = %id, kind = kind.as_str(), "deleted record");
        }
        Ok(deleted > 0)
    }

    /// Current completion state of one owned record.
    ///
    /// # Errors
    /// Returns [`PlannerError::Validation`] (wrapped) when `kind` does not track
    /// completion, or an error when the read fails.
    pub fn completion_status(
        &self,
        owner_id: &OwnerId,
        kind: RecordKind,
        id: RecordId,
    ) -> Result<Option<CompletionStatus>> {
        ensure_tracks_completion(kind)?;
        let raw = self
            .conn
            .query_row(
                "SELECT completion_status FROM records
                 WHERE record_id = ?1 AND owner_id = ?2 AND kind = ?3",
                params![id.to_string(), owner_id.as_str(), kind.as_str()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .context("failed to read completion status")?;

        raw.map(|raw| decode_completion(raw.as_deref())).transpose()
    }

    /// Unconditionally write `status` on one owned record. Returns whether a
    /// row matched.
    ///
    /// # Errors
    /// Returns [`PlannerError::Validation`] (wrapped) when `kind` does not track
    /// completion, or an error when the write fails.
    pub fn set_completion(
        &mut self,
        owner_id: &OwnerId,
        kind: RecordKind,
        id: RecordId,
        status: CompletionStatus,
    ) -> Result<bool> {
        ensure_tracks_completion(kind)?;
        let changed = self
            .conn
            .execute(
                "UPDATE records SET completion_status = ?1
                 WHERE record_id = ?2 AND owner_id = ?3 AND kind = ?4",
                params![status.as_str(), id.to_string(), owner_id.as_str(), kind.as_str()],
            )
            .context("failed to write completion status")?;
        if changed > 0 {
            tracing::info!(
                record_id = %id,
                kind = kind.as_str(),
                status = status.as_str(),
                "wrote completion status"
            );
        }
        Ok(changed > 0)
    }

    /// Run `PRAGMA quick_check` and report schema status alongside it.
    ///
    /// # Errors
    /// Returns an error when the check or schema metadata cannot be read.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            schema_status: self.schema_status()?,
        })
    }
}

fn ensure_tracks_completion(kind: RecordKind) -> Result<()> {
    if kind.tracks_completion() {
        return Ok(());
    }
    Err(anyhow::Error::new(PlannerError::validation(
        "completionStatus",
        format!("completion is not tracked for {} records", kind.as_str()),
    )))
}

fn fetch_record(
    conn: &Connection,
    owner_id: &OwnerId,
    kind: RecordKind,
    id: RecordId,
) -> Result<Option<Record>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS}
         FROM records
         WHERE record_id = ?1 AND owner_id = ?2 AND kind = ?3"
    ))?;
    let mut rows = stmt.query(params![id.to_string(), owner_id.as_str(), kind.as_str()])?;
    rows.next()?.map(decode_record).transpose()
}

fn decode_record(row: &Row<'_>) -> Result<Record> {
    let id_raw: String = row.get(0)?;
    let kind_raw: String = row.get(2)?;
    let kind = RecordKind::parse(&kind_raw)
        .ok_or_else(|| anyhow!("unknown record kind: {kind_raw}"))?;
    let start_raw: Option<String> = row.get(5)?;
    let end_raw: Option<String> = row.get(6)?;
    let related_goal_id: Option<String> = row.get(7)?;
    let photo_url: Option<String> = row.get(10)?;
    let completion_raw: Option<String> = row.get(11)?;

    let details = match kind {
        RecordKind::Goal => RecordDetails::Goal {
            schedule: decode_schedule(start_raw.as_deref(), end_raw.as_deref())?,
            photo_url,
            completion: decode_completion(completion_raw.as_deref())?,
        },
        RecordKind::Event => RecordDetails::Event {
            schedule: decode_schedule(start_raw.as_deref(), end_raw.as_deref())?,
            related_goal_id,
        },
        RecordKind::Todo => RecordDetails::Todo {
            related_goal_id,
            completion: decode_completion(completion_raw.as_deref())?,
        },
    };

    Ok(Record {
        id: RecordId::from_str(&id_raw).map_err(|_| anyhow!("invalid record id: {id_raw}"))?,
        owner_id: OwnerId::new(row.get::<_, String>(1)?),
        created_at: parse_rfc3339(&row.get::<_, String>(3)?)?,
        title: row.get(4)?,
        location: row.get(8)?,
        content: row.get(9)?,
        details,
    })
}

fn decode_schedule(start: Option<&str>, end: Option<&str>) -> Result<Schedule> {
    let (Some(start), Some(end)) = (start, end) else {
        return Err(anyhow!("scheduled record is missing start_time or end_time"));
    };
    Ok(Schedule { start: parse_rfc3339(start)?, end: parse_rfc3339(end)? })
}

fn decode_completion(raw: Option<&str>) -> Result<CompletionStatus> {
    let raw = raw.ok_or_else(|| anyhow!("completion_status is missing"))?;
    CompletionStatus::parse(raw).ok_or_else(|| anyhow!("unknown completion_status: {raw}"))
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if table_exists(conn, "records")? {
        return Ok((1, true));
    }

    Ok((0, false))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
