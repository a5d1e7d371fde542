// src/lib.rs
//! Lineage-Core: a provenance bookkeeping engine.
//!
//! Clients write one denormalized [`ProvenanceRecord`] per dataset (site,
//! processing step, operating-system info, environments with their packages,
//! scripts, storage buckets, input/output files, an opaque config payload and
//! an optional parent dataset) and later retrieve the full lineage tree for
//! a dataset identifier ("did").
//!
//! The write path normalizes each record into a relational graph inside a
//! single transaction, resolving every referenced entity by natural key and
//! creating it only when absent. The read path runs one wide join and folds
//! the flat row stream back into the nested, deduplicated tree. Both live in
//! [`store`]; [`Bookkeeper`] is the facade an HTTP layer drives.

pub mod api;
pub mod config;
pub mod error;
pub mod lexicon;
pub mod records;
pub mod store;

pub use api::Bookkeeper;
pub use config::ServiceConfig;
pub use error::StoreError;
pub use records::{
    BucketRecord, EnvironmentRecord, FileRecord, OsInfoRecord, PackageRecord, ProvenanceRecord,
    ScriptRecord,
};
pub use store::Store;
