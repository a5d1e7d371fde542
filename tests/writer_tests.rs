// tests/writer_tests.rs
// Write-path tests: idempotency, atomicity, mandatory fields, parent edges.
//
// Each test opens its own file-backed store under a tempdir and asserts
// relational state directly through a second SQLite connection.

use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tempfile::TempDir;

use lineage_core::{
    Bookkeeper, BucketRecord, EnvironmentRecord, FileRecord, OsInfoRecord, PackageRecord,
    ProvenanceRecord, ScriptRecord, ServiceConfig, StoreError,
};

fn open_bookkeeper(dir: &TempDir) -> (Bookkeeper, PathBuf) {
    let db_path = dir.path().join("lineage.db");
    let cfg = ServiceConfig {
        database: db_path.clone(),
        ..Default::default()
    };
    (Bookkeeper::open(cfg).expect("open bookkeeper"), db_path)
}

fn count(db_path: &PathBuf, table: &str) -> i64 {
    let conn = Connection::open(db_path).expect("open assertion connection");
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .expect("count rows")
}

fn sample_record(did: &str) -> ProvenanceRecord {
    ProvenanceRecord {
        did: did.to_string(),
        site: "CHESS".to_string(),
        processing: "reconstruction".to_string(),
        osinfo: OsInfoRecord {
            name: "Linux".to_string(),
            version: "5.4".to_string(),
            kernel: "x86_64".to_string(),
        },
        environments: vec![
            EnvironmentRecord {
                name: "conda-py311".to_string(),
                version: "23.1".to_string(),
                details: "analysis env".to_string(),
                packages: vec![
                    PackageRecord {
                        name: "numpy".to_string(),
                        version: "1.26".to_string(),
                    },
                    PackageRecord {
                        name: "pandas".to_string(),
                        version: "2.1".to_string(),
                    },
                ],
                ..Default::default()
            },
            EnvironmentRecord {
                name: "base".to_string(),
                version: "1.0".to_string(),
                packages: vec![PackageRecord {
                    name: "numpy".to_string(),
                    version: "1.26".to_string(),
                }],
                ..Default::default()
            },
        ],
        scripts: vec![
            ScriptRecord {
                name: "calibrate.py".to_string(),
                options: "--fast".to_string(),
                order_idx: 1,
                ..Default::default()
            },
            ScriptRecord {
                name: "reduce.py".to_string(),
                order_idx: 2,
                ..Default::default()
            },
        ],
        buckets: vec![BucketRecord {
            name: "raw-2024".to_string(),
            ..Default::default()
        }],
        input_files: vec![FileRecord {
            name: "/data/raw/scan-001.h5".to_string(),
            size: 1024,
            ..Default::default()
        }],
        output_files: vec![FileRecord {
            name: "/data/reduced/scan-001.nxs".to_string(),
            ..Default::default()
        }],
        config: json!({"threshold": 0.5, "mode": "fast"}),
        ..Default::default()
    }
}

#[test]
fn writing_the_same_record_twice_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (mut bk, db) = open_bookkeeper(&dir);
    let rec = sample_record("/chess/run-17/raw:v1");

    bk.insert_provenance(&rec, Some("alice")).expect("first write");
    let snapshot: Vec<(&str, i64)> = vec![
        ("datasets", count(&db, "datasets")),
        ("sites", count(&db, "sites")),
        ("processing", count(&db, "processing")),
        ("osinfo", count(&db, "osinfo")),
        ("environments", count(&db, "environments")),
        ("packages", count(&db, "packages")),
        ("scripts", count(&db, "scripts")),
        ("buckets", count(&db, "buckets")),
        ("files", count(&db, "files")),
        ("configs", count(&db, "configs")),
        ("dataset_environments", count(&db, "dataset_environments")),
        ("dataset_scripts", count(&db, "dataset_scripts")),
        ("environment_packages", count(&db, "environment_packages")),
        ("dataset_files", count(&db, "dataset_files")),
    ];

    bk.insert_provenance(&rec, Some("alice")).expect("second write");
    for (table, before) in snapshot {
        assert_eq!(
            count(&db, table),
            before,
            "table {table} changed on re-submission"
        );
    }

    // sanity: the overlapping numpy/1.26 package exists exactly once
    assert_eq!(count(&db, "packages"), 2);
    assert_eq!(count(&db, "environment_packages"), 3);
    assert_eq!(count(&db, "datasets"), 1);
}

#[test]
fn missing_osinfo_is_rejected_before_any_commit() {
    let dir = TempDir::new().unwrap();
    let (mut bk, db) = open_bookkeeper(&dir);
    let mut rec = sample_record("/chess/run-17/raw:v1");
    rec.osinfo = OsInfoRecord::default();

    let err = bk.insert_provenance(&rec, None).unwrap_err();
    assert!(matches!(err, StoreError::Validation { ref field, .. } if field == "osinfo"));

    // the site was resolved inside the transaction; rollback must erase it
    assert_eq!(count(&db, "sites"), 0);
    assert_eq!(count(&db, "datasets"), 0);
}

#[test]
fn failed_file_resolution_rolls_back_the_whole_graph() {
    let dir = TempDir::new().unwrap();
    let (mut bk, db) = open_bookkeeper(&dir);
    let mut rec = sample_record("/chess/run-17/raw:v1");
    // a file descriptor without a name can neither be found nor created
    rec.output_files.push(FileRecord::default());

    let err = bk.insert_provenance(&rec, None).unwrap_err();
    assert!(matches!(err, StoreError::Lookup { entity, .. } if entity == "file"));

    for table in [
        "datasets",
        "sites",
        "processing",
        "osinfo",
        "environments",
        "packages",
        "scripts",
        "files",
        "dataset_files",
    ] {
        assert_eq!(count(&db, table), 0, "table {table} leaked rows past rollback");
    }
}

#[test]
fn script_without_a_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (mut bk, db) = open_bookkeeper(&dir);
    let mut rec = sample_record("/chess/run-17/raw:v1");
    rec.scripts.push(ScriptRecord {
        options: "--orphan".to_string(),
        ..Default::default()
    });

    let err = bk.insert_provenance(&rec, None).unwrap_err();
    assert!(matches!(err, StoreError::Validation { ref field, .. } if field == "script_name"));
    assert_eq!(count(&db, "datasets"), 0);
}

#[test]
fn empty_processing_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (mut bk, db) = open_bookkeeper(&dir);
    let mut rec = sample_record("/chess/run-17/raw:v1");
    rec.processing = String::new();

    let err = bk.insert_provenance(&rec, None).unwrap_err();
    assert!(matches!(err, StoreError::Validation { ref field, .. } if field == "processing"));
    assert_eq!(count(&db, "processing"), 0);
}

#[test]
fn parent_edge_requires_an_existing_parent_dataset() {
    let dir = TempDir::new().unwrap();
    let (mut bk, db) = open_bookkeeper(&dir);

    let mut child = sample_record("/chess/run-17/reduced:v1");
    child.parent = "/chess/run-17/raw:v1".to_string();

    // parent has never been written: whole record rejected, nothing persists
    let err = bk.insert_provenance(&child, None).unwrap_err();
    assert!(matches!(err, StoreError::Lookup { entity, .. } if entity == "parent dataset"));
    assert_eq!(count(&db, "datasets"), 0);
    assert_eq!(count(&db, "parents"), 0);

    // after the parent exists the same child write succeeds
    bk.insert_provenance(&sample_record("/chess/run-17/raw:v1"), None)
        .expect("parent write");
    bk.insert_provenance(&child, None).expect("child write");
    assert_eq!(count(&db, "parents"), 1);
    assert_eq!(
        bk.parent_did("/chess/run-17/reduced:v1").unwrap(),
        Some("/chess/run-17/raw:v1".to_string())
    );
    assert_eq!(
        bk.children("/chess/run-17/raw:v1").unwrap(),
        vec!["/chess/run-17/reduced:v1".to_string()]
    );

    // re-linking the same edge is an idempotent no-op
    bk.insert_provenance(&child, None).expect("child re-write");
    assert_eq!(count(&db, "parents"), 1);
}

#[test]
fn unresolvable_parent_environment_is_fatal() {
    let dir = TempDir::new().unwrap();
    let (mut bk, db) = open_bookkeeper(&dir);
    let mut rec = sample_record("/chess/run-17/raw:v1");
    rec.environments[0].parent = "no-such-env".to_string();

    let err = bk.insert_provenance(&rec, None).unwrap_err();
    assert!(matches!(err, StoreError::Lookup { entity, .. } if entity == "parent environment"));
    assert_eq!(count(&db, "environments"), 0);
}

#[test]
fn environment_parent_chain_resolves_within_one_record() {
    let dir = TempDir::new().unwrap();
    let (mut bk, db) = open_bookkeeper(&dir);
    let mut rec = sample_record("/chess/run-17/raw:v1");
    // "base" is created first in record order, so the second env may chain to it
    rec.environments.swap(0, 1);
    rec.environments[1].parent = "base".to_string();

    bk.insert_provenance(&rec, None).expect("write with parent chain");
    let conn = Connection::open(&db).unwrap();
    let parent_id: Option<i64> = conn
        .query_row(
            "SELECT parent_environment_id FROM environments WHERE name = 'conda-py311'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert!(parent_id.is_some());
}

#[test]
fn missing_actor_falls_back_to_configured_identity() {
    let dir = TempDir::new().unwrap();
    let (mut bk, db) = open_bookkeeper(&dir);
    bk.insert_provenance(&sample_record("/chess/run-17/raw:v1"), None)
        .expect("write");

    let conn = Connection::open(&db).unwrap();
    let create_by: String = conn
        .query_row("SELECT create_by FROM datasets", [], |r| r.get(0))
        .unwrap();
    assert_eq!(create_by, "server");
}

#[test]
fn duplicate_bucket_names_are_non_fatal() {
    let dir = TempDir::new().unwrap();
    let (mut bk, db) = open_bookkeeper(&dir);
    let mut rec = sample_record("/chess/run-17/raw:v1");
    rec.buckets.push(BucketRecord {
        name: "raw-2024".to_string(),
        ..Default::default()
    });

    bk.insert_provenance(&rec, None).expect("write with duplicate buckets");
    assert_eq!(count(&db, "buckets"), 1);
    assert_eq!(count(&db, "datasets"), 1);
}

#[test]
fn user_record_without_user_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (mut bk, _db) = open_bookkeeper(&dir);
    let map = json!({"did": "/a/b:v1"});
    let err = bk.insert_user_record(map.as_object().unwrap()).unwrap_err();
    assert!(matches!(err, StoreError::Validation { ref field, .. } if field == "user"));
}

#[test]
fn user_record_fills_placeholders_and_persists() {
    let dir = TempDir::new().unwrap();
    let (mut bk, db) = open_bookkeeper(&dir);
    let map = json!({
        "user": "alice",
        "did": "/user/alice/run-1:v1",
        "input_files": "a.dat b.dat",
        "application": "tomography"
    });
    let did = bk.insert_user_record(map.as_object().unwrap()).expect("user write");
    assert_eq!(did, "/user/alice/run-1:v1");
    assert_eq!(count(&db, "files"), 2);

    let mut filters = BTreeMap::new();
    filters.insert("did".to_string(), did);
    let trees = bk.query_provenance(&filters).expect("read back");
    assert_eq!(trees.len(), 1);
    assert_eq!(trees[0].processing, "tomography");
    assert_eq!(trees[0].input_files.len(), 2);
}
