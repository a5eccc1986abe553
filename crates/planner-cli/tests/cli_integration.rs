use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

const SECRET: &str = "cli-test-secret-with-at-least-32-bytes!";

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_pl<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_pl"))
        .env_remove("PLANNER_DB")
        .env_remove("PLANNER_JWT_SECRET")
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute pl binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_pl(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "pl command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn record_args<'a>(db: &'a str, action: &'a str, owner: &'a str, kind: &'a str) -> Vec<&'a str> {
    vec!["--db", db, "record", action, "--owner", owner, "--kind", kind]
}

#[test]
fn db_commands_report_schema_and_migrate() {
    let dir = unique_temp_dir("pl-db");
    let db = dir.join("planner.sqlite3");
    let db = path_str(&db);

    let before = run_json(["--db", db, "db", "schema-version"]);
    assert_eq!(as_str(&before, "contract_version"), "cli.v1");
    assert_eq!(as_i64(&before, "current_version"), 0);
    assert_eq!(before.get("up_to_date"), Some(&Value::Bool(false)));

    let dry_run = run_json(["--db", db, "db", "migrate", "--dry-run"]);
    assert_eq!(dry_run.get("would_apply_versions"), Some(&serde_json::json!([1])));
    assert_eq!(dry_run.get("after_version"), Some(&Value::Null));
    let still_unmigrated = run_json(["--db", db, "db", "schema-version"]);
    assert_eq!(as_i64(&still_unmigrated, "current_version"), 0);

    let migrated = run_json(["--db", db, "db", "migrate"]);
    assert_eq!(as_i64(&migrated, "current_version"), 0);
    assert_eq!(as_i64(&migrated, "after_version"), 1);
    assert_eq!(migrated.get("up_to_date"), Some(&Value::Bool(true)));

    let integrity = run_json(["--db", db, "db", "integrity-check"]);
    assert_eq!(integrity.get("quick_check_ok"), Some(&Value::Bool(true)));
    assert_eq!(
        integrity.get("schema_status").and_then(|status| status.get("current_version")),
        Some(&serde_json::json!(1))
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn token_issue_emits_a_jwt() {
    let issued = run_json([
        "token",
        "issue",
        "--user-id",
        "u1",
        "--user-name",
        "Ada",
        "--jwt-secret",
        SECRET,
        "--ttl-secs",
        "60",
    ]);
    assert_eq!(as_str(&issued, "user_id"), "u1");
    assert_eq!(as_str(&issued, "token").split('.').count(), 3);
}

#[test]
fn token_issue_rejects_short_secret() {
    let output = run_pl(["token", "issue", "--user-id", "u1", "--jwt-secret", "short"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("jwt_secret"), "unexpected stderr: {stderr}");
}

#[test]
fn record_lifecycle_is_owner_scoped() {
    let dir = unique_temp_dir("pl-record");
    let db = dir.join("planner.sqlite3");
    let db = path_str(&db);

    let mut create = record_args(db, "create", "u1", "goal");
    create.extend([
        "--json",
        r#"{"title":"Run 5k","startDatetime":"2024-05-01T00:00","endDatetime":"2024-05-01T23:59"}"#,
    ]);
    let created = run_json(create);
    let id = as_str(&created, "event_id").to_string();

    let listed = run_json(record_args(db, "list", "u1", "goal"));
    assert_eq!(as_i64(&listed, "count"), 1);
    let other_owner = run_json(record_args(db, "list", "u2", "goal"));
    assert_eq!(as_i64(&other_owner, "count"), 0);

    let mut on_day = record_args(db, "list", "u1", "goal");
    on_day.extend(["--date", "2024-05-01"]);
    assert_eq!(as_i64(&run_json(on_day), "count"), 1);
    let mut off_day = record_args(db, "list", "u1", "goal");
    off_day.extend(["--date", "2024-06-01"]);
    assert_eq!(as_i64(&run_json(off_day), "count"), 0);

    let mut update = record_args(db, "update", "u1", "goal");
    update.extend(["--id", id.as_str(), "--json", r#"{"location":"river park"}"#]);
    let updated = run_json(update);
    assert_eq!(as_str(&updated, "location"), "river park");
    assert_eq!(as_str(&updated, "title"), "Run 5k");

    let mut complete = record_args(db, "complete", "u1", "goal");
    complete.extend(["--id", id.as_str()]);
    let toggled = run_json(complete);
    assert_eq!(as_str(&toggled, "completionStatus"), "complete");

    let mut foreign_get = record_args(db, "get", "u2", "goal");
    foreign_get.extend(["--id", id.as_str()]);
    assert!(!run_pl(foreign_get).status.success());

    let mut delete = record_args(db, "delete", "u1", "goal");
    delete.extend(["--id", id.as_str()]);
    let deleted = run_json(delete);
    assert_eq!(deleted.get("deleted"), Some(&Value::Bool(true)));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn record_create_reports_validation_failures() {
    let dir = unique_temp_dir("pl-invalid");
    let db = dir.join("planner.sqlite3");
    let db = path_str(&db);

    let mut create = record_args(db, "create", "u1", "event");
    create.extend(["--json", r#"{"title":"standup"}"#]);
    let output = run_pl(create);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("startDatetime"), "unexpected stderr: {stderr}");

    let mut not_object = record_args(db, "create", "u1", "todo");
    not_object.extend(["--json", "[1,2]"]);
    assert!(!run_pl(not_object).status.success());

    let _ = fs::remove_dir_all(&dir);
}
