// src/store/mod.rs
//! Single-writer relational store for the provenance graph.
//!
//! - Owns one SQLite connection (WAL) to avoid multi-writer contention.
//! - Bootstraps the full relational schema on open: one table per entity,
//!   join tables for every many-to-many edge, and the parent-edge table.
//! - Every entity row carries audit columns (create_at/by, modify_at/by);
//!   timestamps are Unix epoch seconds.
//!
//! Write and read orchestration live in [`writer`] and [`reader`]; natural-key
//! resolution and association linking in [`resolve`]; per-entity upsert units
//! in [`entities`].

pub mod entities;
pub mod reader;
pub mod resolve;
pub mod writer;

use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;

use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sites (
  site_id    INTEGER PRIMARY KEY,
  site       TEXT NOT NULL UNIQUE,
  create_at  INTEGER NOT NULL,
  create_by  TEXT NOT NULL,
  modify_at  INTEGER NOT NULL,
  modify_by  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS processing (
  processing_id INTEGER PRIMARY KEY,
  processing    TEXT NOT NULL UNIQUE,
  create_at     INTEGER NOT NULL,
  create_by     TEXT NOT NULL,
  modify_at     INTEGER NOT NULL,
  modify_by     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS osinfo (
  os_id      INTEGER PRIMARY KEY,
  name       TEXT NOT NULL UNIQUE,
  version    TEXT NOT NULL DEFAULT '',
  kernel     TEXT NOT NULL DEFAULT '',
  create_at  INTEGER NOT NULL,
  create_by  TEXT NOT NULL,
  modify_at  INTEGER NOT NULL,
  modify_by  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS environments (
  environment_id        INTEGER PRIMARY KEY,
  name                  TEXT NOT NULL UNIQUE,
  version               TEXT NOT NULL DEFAULT '',
  details               TEXT NOT NULL DEFAULT '',
  parent_environment_id INTEGER REFERENCES environments(environment_id),
  create_at             INTEGER NOT NULL,
  create_by             TEXT NOT NULL,
  modify_at             INTEGER NOT NULL,
  modify_by             TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS packages (
  package_id INTEGER PRIMARY KEY,
  name       TEXT NOT NULL,
  version    TEXT NOT NULL,
  create_at  INTEGER NOT NULL,
  create_by  TEXT NOT NULL,
  modify_at  INTEGER NOT NULL,
  modify_by  TEXT NOT NULL,
  UNIQUE(name, version)
);

CREATE TABLE IF NOT EXISTS scripts (
  script_id        INTEGER PRIMARY KEY,
  name             TEXT NOT NULL UNIQUE,
  options          TEXT NOT NULL DEFAULT '',
  order_idx        INTEGER NOT NULL DEFAULT 0,
  parent_script_id INTEGER REFERENCES scripts(script_id),
  create_at        INTEGER NOT NULL,
  create_by        TEXT NOT NULL,
  modify_at        INTEGER NOT NULL,
  modify_by        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS configs (
  config_id    INTEGER PRIMARY KEY,
  content      TEXT NOT NULL,
  content_hash TEXT NOT NULL UNIQUE,
  create_at    INTEGER NOT NULL,
  create_by    TEXT NOT NULL,
  modify_at    INTEGER NOT NULL,
  modify_by    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS datasets (
  dataset_id    INTEGER PRIMARY KEY,
  did           TEXT NOT NULL UNIQUE,
  site_id       INTEGER REFERENCES sites(site_id),
  processing_id INTEGER NOT NULL REFERENCES processing(processing_id),
  os_id         INTEGER NOT NULL REFERENCES osinfo(os_id),
  config_id     INTEGER REFERENCES configs(config_id),
  create_at     INTEGER NOT NULL,
  create_by     TEXT NOT NULL,
  modify_at     INTEGER NOT NULL,
  modify_by     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS buckets (
  bucket_id  INTEGER PRIMARY KEY,
  bucket     TEXT NOT NULL UNIQUE,
  uuid       TEXT NOT NULL DEFAULT '',
  meta_data  TEXT NOT NULL DEFAULT '',
  dataset_id INTEGER NOT NULL REFERENCES datasets(dataset_id),
  create_at  INTEGER NOT NULL,
  create_by  TEXT NOT NULL,
  modify_at  INTEGER NOT NULL,
  modify_by  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
  file_id       INTEGER PRIMARY KEY,
  file          TEXT NOT NULL UNIQUE,
  checksum      TEXT NOT NULL DEFAULT '',
  size          INTEGER NOT NULL DEFAULT 0,
  is_file_valid INTEGER NOT NULL DEFAULT 1,
  create_at     INTEGER NOT NULL,
  create_by     TEXT NOT NULL,
  modify_at     INTEGER NOT NULL,
  modify_by     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS parents (
  parent_id  INTEGER NOT NULL REFERENCES datasets(dataset_id),
  dataset_id INTEGER NOT NULL REFERENCES datasets(dataset_id),
  create_at  INTEGER NOT NULL,
  create_by  TEXT NOT NULL,
  modify_at  INTEGER NOT NULL,
  modify_by  TEXT NOT NULL,
  PRIMARY KEY(parent_id, dataset_id)
);

CREATE TABLE IF NOT EXISTS dataset_environments (
  dataset_id     INTEGER NOT NULL REFERENCES datasets(dataset_id),
  environment_id INTEGER NOT NULL REFERENCES environments(environment_id),
  PRIMARY KEY(dataset_id, environment_id)
);

CREATE TABLE IF NOT EXISTS dataset_scripts (
  dataset_id INTEGER NOT NULL REFERENCES datasets(dataset_id),
  script_id  INTEGER NOT NULL REFERENCES scripts(script_id),
  PRIMARY KEY(dataset_id, script_id)
);

CREATE TABLE IF NOT EXISTS environment_packages (
  environment_id INTEGER NOT NULL REFERENCES environments(environment_id),
  package_id     INTEGER NOT NULL REFERENCES packages(package_id),
  PRIMARY KEY(environment_id, package_id)
);

CREATE TABLE IF NOT EXISTS dataset_files (
  dataset_id INTEGER NOT NULL REFERENCES datasets(dataset_id),
  file_id    INTEGER NOT NULL REFERENCES files(file_id),
  direction  TEXT NOT NULL CHECK (direction IN ('input', 'output')),
  PRIMARY KEY(dataset_id, file_id, direction)
);

CREATE INDEX IF NOT EXISTS idx_buckets_dataset ON buckets(dataset_id);
CREATE INDEX IF NOT EXISTS idx_parents_dataset ON parents(dataset_id);
"#;

/// Store is the single authority for the provenance database.
pub struct Store {
    pub(crate) db: Connection,
}

impl Store {
    /// Open/create the SQLite DB and ensure schema.
    ///
    /// Creates the parent directory if missing, enables WAL (one writer,
    /// many readers) and foreign keys, and creates all tables idempotently.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(db_path)?;
        db.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        db.execute_batch(SCHEMA)?;
        Ok(Self { db })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        db.execute_batch("PRAGMA foreign_keys = ON;")?;
        db.execute_batch(SCHEMA)?;
        Ok(Self { db })
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.db
    }
}

/// Current Unix epoch seconds, the timestamp stored in every audit column.
pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}
