// src/store/resolve.rs
//! Natural-key resolution and association linking.
//!
//! Both run on the caller's active transaction so that a lookup and any
//! subsequent creation observe a consistent snapshot. Not finding a row is
//! never an error here: `Ok(None)` means "create it".

use rusqlite::{OptionalExtension, Transaction, params};

use crate::error::Result;

/// Look up the surrogate id for a natural key.
///
/// Table and column names come from a fixed set of call sites, never from
/// user input.
pub fn resolve_id(
    tx: &Transaction,
    table: &str,
    id_col: &str,
    key_col: &str,
    value: &str,
) -> Result<Option<i64>> {
    let sql = format!("SELECT {id_col} FROM {table} WHERE {key_col} = ?1");
    let id = tx
        .query_row(&sql, params![value], |row| row.get::<_, i64>(0))
        .optional()?;
    Ok(id)
}

/// True when an insert failed because a UNIQUE or PRIMARY KEY constraint
/// already holds the row. Callers treat that as "someone got there first".
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
        }
        _ => false,
    }
}

/// Insert one association row; an already-linked pair is a no-op.
pub fn link<P: rusqlite::Params>(tx: &Transaction, sql: &str, args: P) -> Result<()> {
    match tx.execute(sql, args) {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!("association already present, skipping");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub const LINK_DATASET_ENVIRONMENT: &str =
    "INSERT INTO dataset_environments(dataset_id, environment_id) VALUES (?1, ?2)";
pub const LINK_DATASET_SCRIPT: &str =
    "INSERT INTO dataset_scripts(dataset_id, script_id) VALUES (?1, ?2)";
pub const LINK_ENVIRONMENT_PACKAGE: &str =
    "INSERT INTO environment_packages(environment_id, package_id) VALUES (?1, ?2)";
pub const LINK_DATASET_FILE: &str =
    "INSERT INTO dataset_files(dataset_id, file_id, direction) VALUES (?1, ?2, ?3)";
