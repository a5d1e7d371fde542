// src/error.rs
//! Error taxonomy for the provenance store.
//!
//! - `Validation`: a record field failed a lexicon or required-field check.
//! - `Lookup`: a referenced entity (parent dataset, parent environment,
//!   parent script, file) could not be resolved by natural key.
//! - `Sql`: anything the database driver reports.
//!
//! Duplicate buckets and duplicate association rows are *not* errors; the
//! store detects the uniqueness violation, logs it, and moves on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {entity} found for '{key}'")]
    Lookup { entity: &'static str, key: String },

    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid query parameter '{0}'")]
    InvalidParameter(String),
}

impl StoreError {
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn lookup(entity: &'static str, key: impl Into<String>) -> Self {
        Self::Lookup {
            entity,
            key: key.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
