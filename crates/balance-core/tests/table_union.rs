//! Integration tests for diagnostic file loading and schema-drift union.

use std::fs;
use std::path::PathBuf;

use balance_core::{AnalysisError, DiagnosticTable, Value};

fn write_csv(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("write fixture");
    path
}

/// Three files with column sets {a,b}, {a,c}, {a,b,c} union into {a,b,c};
/// rows from file 1 have c = null, rows from file 2 have b = null.
#[test]
fn test_union_of_drifting_schemas() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        write_csv(&dir, "game_1.csv", "a,b\n1,2\n3,4\n"),
        write_csv(&dir, "game_2.csv", "a,c\n5,6\n"),
        write_csv(&dir, "game_3.csv", "a,b,c\n7,8,9\n"),
    ];

    let table = DiagnosticTable::load(&paths).expect("load");
    assert_eq!(table.len(), 4);
    for col in ["a", "b", "c"] {
        assert!(table.has_column(col), "missing column {col}");
    }

    let b = table.column("b").unwrap();
    let c = table.column("c").unwrap();

    // file 1 rows: b present, c null
    assert_eq!(b[0], Some(Value::Int(2)));
    assert_eq!(c[0], None);
    assert_eq!(c[1], None);

    // file 2 row: c present, b null
    assert_eq!(b[2], None);
    assert_eq!(c[2], Some(Value::Int(6)));

    // file 3 row: everything present
    assert_eq!(b[3], Some(Value::Int(8)));
    assert_eq!(c[3], Some(Value::Int(9)));
}

#[test]
fn test_run_id_derived_from_file_names() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![
        write_csv(&dir, "game_2041.csv", "house,turn\nordos,1\n"),
        write_csv(&dir, "game_2042.csv", "house,turn\natreides,1\n"),
    ];

    let table = DiagnosticTable::load(&paths).expect("load");
    let run_ids = table.column("run_id").unwrap();
    assert_eq!(run_ids[0], Some(Value::Str("2041".to_string())));
    assert_eq!(run_ids[1], Some(Value::Str("2042".to_string())));

    let meta = table.metadata();
    assert_eq!(meta.run_count, 2);
    assert_eq!(meta.entity_count, 2);
    assert_eq!(meta.total_records, 2);
}

#[test]
fn test_unreadable_file_is_skipped_with_warning() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_csv(&dir, "game_1.csv", "a\n1\n");
    let missing = dir.path().join("game_404.csv");

    let table = DiagnosticTable::load(&[good, missing]).expect("load");
    assert_eq!(table.len(), 1);
    assert_eq!(table.warnings().len(), 1);
    assert!(table.warnings()[0].contains("game_404.csv"));
}

#[test]
fn test_all_files_failing_is_hard_error() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![dir.path().join("nope_1.csv"), dir.path().join("nope_2.csv")];

    match DiagnosticTable::load(&paths) {
        Err(AnalysisError::NoFilesLoaded { attempted }) => assert_eq!(attempted, 2),
        other => panic!("expected NoFilesLoaded, got {other:?}"),
    }
}

#[test]
fn test_provenance_from_git_hash_column() {
    let dir = tempfile::tempdir().unwrap();
    let paths = vec![write_csv(
        &dir,
        "game_1.csv",
        "house,_git_hash\nordos,abc123def\n",
    )];

    let table = DiagnosticTable::load(&paths).expect("load");
    assert_eq!(table.metadata().provenance_hash, "abc123def");
    // source digest is a full sha-256 hex string
    assert_eq!(table.metadata().source_digest.len(), 64);
}

/// End-to-end: loaded tables feed outlier detection directly.
#[test]
fn test_loaded_table_outlier_detection() {
    let dir = tempfile::tempdir().unwrap();
    let mut rows = String::from("house,turn,prestige\n");
    for turn in 1..=20 {
        rows.push_str(&format!("ordos,{turn},{}\n", 100 + turn));
    }
    rows.push_str("ordos,21,9000\n");
    let paths = vec![write_csv(&dir, "game_7.csv", &rows)];

    let table = DiagnosticTable::load(&paths).expect("load");
    let report = balance_core::zscore(&table, "prestige", 3.0, None).expect("zscore");
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].tag.turn, Some(21));
    assert_eq!(report.rows[0].tag.run_id.as_deref(), Some("7"));
}
