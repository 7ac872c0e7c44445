use geist::db;
use tempfile::TempDir;

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("new.db");
    assert!(!db_path.exists());

    let conn = db::open_database(&db_path).unwrap();
    assert!(db_path.exists());

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn busy_timeout_is_set() {
    let tmp = TempDir::new().unwrap();
    let conn = db::open_database(tmp.path().join("test.db")).unwrap();

    let timeout: i64 = conn
        .pragma_query_value(None, "busy_timeout", |row| row.get(0))
        .unwrap();
    assert_eq!(timeout, db::BUSY_TIMEOUT_MS as i64);
}

#[test]
fn wal_mode_is_enabled_on_disk() {
    let tmp = TempDir::new().unwrap();
    let conn = db::open_database(tmp.path().join("wal.db")).unwrap();

    let mode: String = conn
        .pragma_query_value(None, "journal_mode", |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn reopening_keeps_data_and_schema_version() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("keep.db");

    {
        let conn = db::open_database(&path).unwrap();
        conn.execute(
            "INSERT INTO sessions (session_date, created_at) VALUES ('2026-01-01', 'now')",
            [],
        )
        .unwrap();
    }

    let conn = db::open_database(&path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(
        db::migrations::get_schema_version(&conn).unwrap(),
        db::migrations::CURRENT_SCHEMA_VERSION
    );
}

#[test]
fn health_check_passes_on_fresh_db() {
    let conn = db::open_in_memory().unwrap();
    let report = db::check_database_health(&conn).unwrap();

    assert!(report.integrity_ok);
    assert_eq!(report.schema_version, db::migrations::CURRENT_SCHEMA_VERSION);
    assert!(!report.sqlite_vec_version.is_empty());
    assert_eq!(report.session_count, 0);
    assert_eq!(report.snapshot_count, 0);
    assert_eq!(report.suggestion_count, 0);
}

#[test]
fn two_connections_share_one_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("shared.db");
    let a = db::open_database(&path).unwrap();
    let b = db::open_database(&path).unwrap();

    let date = chrono::NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
    let from_a = geist::vault::Session::open(&a, date).unwrap();
    let from_b = geist::vault::Session::open(&b, date).unwrap();
    assert_eq!(from_a, from_b);
}
