use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_nanos(),
        Err(err) => panic!("system clock before unix epoch: {err}"),
    };
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    if let Err(err) = fs::create_dir_all(&dir) {
        panic!("failed to create temp dir {}: {err}", dir.display());
    }
    dir
}

fn path_str(path: &Path) -> &str {
    match path.to_str() {
        Some(value) => value,
        None => panic!("non-utf8 path: {}", path.display()),
    }
}

fn run_wo(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_wo"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to run wo {args:?}: {err}"))
}

fn run_json(args: &[&str]) -> Value {
    let output = run_wo(args);
    if !output.status.success() {
        panic!(
            "wo {args:?} failed\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim())
        .unwrap_or_else(|err| panic!("wo {args:?} printed invalid json: {err}\n{stdout}"))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    match value.get(key).and_then(Value::as_i64) {
        Some(number) => number,
        None => panic!("missing integer field {key} in {value}"),
    }
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    match value.get(key).and_then(Value::as_str) {
        Some(text) => text,
        None => panic!("missing string field {key} in {value}"),
    }
}

fn write_json(path: &Path, value: &Value) {
    let body = match serde_json::to_string_pretty(value) {
        Ok(body) => body,
        Err(err) => panic!("failed to encode {}: {err}", path.display()),
    };
    if let Err(err) = fs::write(path, body) {
        panic!("failed to write {}: {err}", path.display());
    }
}

fn seed_document() -> Value {
    let history = |vendor: &str| {
        json!([{
            "recordedAt": "2026-02-10T12:00:00Z",
            "actor": "navigator",
            "configuration": {
                "serviceType": "Food",
                "vendorSelections": [
                    {"vendorId": vendor, "items": {"I1": 2}, "selectedDeliveryDays": ["Monday"]}
                ]
            }
        }])
    };
    json!({
        "vendors": [{"id": "V1", "name": "Green Kitchen", "deliveryDays": ["Monday", "Thursday"], "isActive": true}],
        "items": [{"id": "I1", "kind": "menu", "vendorId": "V1", "name": "Soup", "unitValue": 5.0, "isActive": true}],
        "clients": [
            {"id": "C", "fullName": "Client C", "history": history("V1")},
            {"id": "D", "fullName": "Dora", "history": history("V1")}
        ]
    })
}

fn seeded_db(prefix: &str) -> (PathBuf, PathBuf) {
    let dir = unique_temp_dir(prefix);
    let db = dir.join("weekly_orders.sqlite3");
    let seed = dir.join("seed.json");
    write_json(&seed, &seed_document());
    let result = run_json(&["--db", path_str(&db), "seed", "--file", path_str(&seed)]);
    assert_eq!(as_i64(&result, "clients"), 2);
    assert_eq!(as_i64(&result, "historyEntries"), 2);
    (dir, db)
}

#[test]
fn db_commands_report_and_apply_migrations() {
    let dir = unique_temp_dir("wo-db");
    let db = dir.join("weekly_orders.sqlite3");
    let db = path_str(&db);

    let status = run_json(&["--db", db, "db", "schema-version"]);
    assert_eq!(as_str(&status, "contract_version"), "cli.v1");
    assert_eq!(as_i64(&status, "current_version"), 0);
    assert_eq!(status["up_to_date"], json!(false));

    let plan = run_json(&["--db", db, "db", "migrate", "--dry-run"]);
    assert_eq!(plan["would_apply_versions"], json!([1]));

    let applied = run_json(&["--db", db, "db", "migrate"]);
    assert_eq!(as_i64(&applied, "after_version"), 1);
    assert_eq!(applied["up_to_date"], json!(true));

    let integrity = run_json(&["--db", db, "db", "integrity-check"]);
    assert_eq!(integrity["quick_check_ok"], json!(true));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn check_create_recheck_closes_the_gap() {
    let (dir, db) = seeded_db("wo-cycle");
    let db = path_str(&db);

    let report = run_json(&["--db", db, "check", "--week-start", "2026-02-25"]);
    assert_eq!(as_str(&report, "weekStart"), "2026-02-22");
    assert_eq!(as_i64(&report, "missingCount"), 2);
    assert_eq!(as_i64(&report, "expectedCount"), 2);

    let created = run_json(&["--db", db, "create", "--week-start", "2026-02-22", "--client", "D"]);
    assert_eq!(as_i64(&created, "created"), 1);
    assert_eq!(created["orderNumbers"], json!([100000]));
    assert_eq!(as_i64(&created, "creationId"), 1);

    let report_path = dir.join("report.json");
    let narrowed = run_json(&["--db", db, "check", "--week-start", "2026-02-22", "--client", "C"]);
    write_json(&report_path, &narrowed);
    let from_file = run_json(&["--db", db, "create", "--missing-file", path_str(&report_path)]);
    assert_eq!(from_file["orderNumbers"], json!([100001]));
    assert_eq!(as_i64(&from_file, "creationId"), 2);

    let replay = run_json(&["--db", db, "create", "--missing-file", path_str(&report_path)]);
    assert_eq!(as_i64(&replay, "created"), 0);
    assert_eq!(as_i64(&replay, "alreadyCovered"), 1);

    let recheck = run_json(&["--db", db, "check", "--week-start", "2026-02-22"]);
    assert_eq!(as_i64(&recheck, "missingCount"), 0);
    assert_eq!(as_i64(&recheck, "expectedCount"), 2);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn settings_cutoff_shows_and_persists() {
    let (dir, db) = seeded_db("wo-cutoff");
    let db = path_str(&db);

    let initial = run_json(&["--db", db, "settings", "cutoff"]);
    assert_eq!(as_str(&initial, "source"), "default");
    assert_eq!(as_str(&initial, "day"), "Tuesday");

    let stored = run_json(&["--db", db, "settings", "cutoff", "--day", "wednesday", "--time", "18:30"]);
    assert_eq!(as_str(&stored, "source"), "stored");
    assert_eq!(as_str(&stored, "time"), "18:30");

    let report = run_json(&["--db", db, "check", "--week-start", "2026-02-22"]);
    assert_eq!(as_str(&report, "cutoffDayName"), "Wednesday");

    let flagged = run_json(&[
        "--db", db, "--cutoff-day", "Monday", "--cutoff-time", "09:00", "check", "--week-start",
        "2026-02-22",
    ]);
    assert_eq!(as_str(&flagged, "cutoffDayName"), "Monday");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn malformed_week_start_fails_without_output() {
    let (dir, db) = seeded_db("wo-invalid");

    let output = run_wo(&["--db", path_str(&db), "check", "--week-start", "next week"]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("weekStart"));

    let output = run_wo(&["--db", path_str(&db), "create"]);
    assert!(!output.status.success());

    let _ = fs::remove_dir_all(&dir);
}
