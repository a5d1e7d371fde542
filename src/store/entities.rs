// src/store/entities.rs
//! Entity upsert units: one get-or-create function per relational table.
//!
//! Shared algorithm: resolver lookup by natural key; on a hit return the
//! existing id with no write; on a miss validate, apply audit defaults and
//! insert. The lookup+insert pair is not atomic against a concurrent writer,
//! so a uniqueness violation on the insert falls back to a second lookup and
//! returns whatever id the winner created.
//!
//! Environments and scripts resolve their declared parent name before the
//! insert; an unresolvable parent aborts the write.

use rusqlite::{OptionalExtension, Transaction, params};

use crate::error::{Result, StoreError};
use crate::lexicon;
use crate::records::{
    BucketRecord, EnvironmentRecord, FileRecord, OsInfoRecord, PackageRecord, ScriptRecord,
};
use crate::store::now;
use crate::store::resolve::{is_unique_violation, resolve_id};

/// Audit columns stamped onto every entity row.
pub(crate) struct Audit {
    pub create_at: i64,
    pub create_by: String,
    pub modify_at: i64,
    pub modify_by: String,
}

impl Audit {
    pub fn new(actor: &str) -> Self {
        let at = now();
        let by = if actor.is_empty() { "server" } else { actor };
        Self {
            create_at: at,
            create_by: by.to_string(),
            modify_at: at,
            modify_by: by.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        lexicon::check_unix_time("create_at", self.create_at)?;
        lexicon::check_unix_time("modify_at", self.modify_at)?;
        if self.create_by.is_empty() {
            return Err(StoreError::validation("create_by", "missing actor"));
        }
        if self.modify_by.is_empty() {
            return Err(StoreError::validation("modify_by", "missing actor"));
        }
        Ok(())
    }
}

// Run an insert, and on a uniqueness violation re-resolve the natural key:
// a concurrent writer creating the same entity is an idempotent no-op.
fn insert_or_refetch(
    tx: &Transaction,
    insert: impl FnOnce() -> rusqlite::Result<usize>,
    refetch: impl FnOnce() -> Result<Option<i64>>,
    entity: &'static str,
    key: &str,
) -> Result<i64> {
    match insert() {
        Ok(_) => Ok(tx.last_insert_rowid()),
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!(entity, key, "lost insert race, refetching id");
            refetch()?.ok_or_else(|| StoreError::lookup(entity, key))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get_or_create_site(tx: &Transaction, site: &str, actor: &str) -> Result<i64> {
    if let Some(id) = resolve_id(tx, "sites", "site_id", "site", site)? {
        return Ok(id);
    }
    lexicon::check("site", site)?;
    let audit = Audit::new(actor);
    audit.validate()?;
    insert_or_refetch(
        tx,
        || {
            tx.execute(
                "INSERT INTO sites(site, create_at, create_by, modify_at, modify_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![site, audit.create_at, audit.create_by, audit.modify_at, audit.modify_by],
            )
        },
        || resolve_id(tx, "sites", "site_id", "site", site),
        "site",
        site,
    )
}

pub fn get_or_create_processing(tx: &Transaction, processing: &str, actor: &str) -> Result<i64> {
    if let Some(id) = resolve_id(tx, "processing", "processing_id", "processing", processing)? {
        return Ok(id);
    }
    lexicon::check("processing", processing)?;
    let audit = Audit::new(actor);
    audit.validate()?;
    insert_or_refetch(
        tx,
        || {
            tx.execute(
                "INSERT INTO processing(processing, create_at, create_by, modify_at, modify_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    processing,
                    audit.create_at,
                    audit.create_by,
                    audit.modify_at,
                    audit.modify_by
                ],
            )
        },
        || resolve_id(tx, "processing", "processing_id", "processing", processing),
        "processing",
        processing,
    )
}

pub fn get_or_create_osinfo(tx: &Transaction, rec: &OsInfoRecord, actor: &str) -> Result<i64> {
    if let Some(id) = resolve_id(tx, "osinfo", "os_id", "name", &rec.name)? {
        return Ok(id);
    }
    rec.validate()?;
    let audit = Audit::new(actor);
    audit.validate()?;
    insert_or_refetch(
        tx,
        || {
            tx.execute(
                "INSERT INTO osinfo(name, version, kernel, create_at, create_by, modify_at, modify_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    rec.name,
                    rec.version,
                    rec.kernel,
                    audit.create_at,
                    audit.create_by,
                    audit.modify_at,
                    audit.modify_by
                ],
            )
        },
        || resolve_id(tx, "osinfo", "os_id", "name", &rec.name),
        "osinfo",
        &rec.name,
    )
}

pub fn get_or_create_environment(
    tx: &Transaction,
    rec: &EnvironmentRecord,
    actor: &str,
) -> Result<i64> {
    if let Some(id) = resolve_id(tx, "environments", "environment_id", "name", &rec.name)? {
        return Ok(id);
    }
    rec.validate()?;
    // Parent chains are stored as a plain self-referential foreign key; the
    // declared parent must already exist.
    let parent_id = if rec.parent.is_empty() {
        None
    } else {
        Some(
            resolve_id(tx, "environments", "environment_id", "name", &rec.parent)?
                .ok_or_else(|| StoreError::lookup("parent environment", &rec.parent))?,
        )
    };
    let audit = Audit::new(actor);
    audit.validate()?;
    insert_or_refetch(
        tx,
        || {
            tx.execute(
                "INSERT INTO environments(name, version, details, parent_environment_id,
                                          create_at, create_by, modify_at, modify_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    rec.name,
                    rec.version,
                    rec.details,
                    parent_id,
                    audit.create_at,
                    audit.create_by,
                    audit.modify_at,
                    audit.modify_by
                ],
            )
        },
        || resolve_id(tx, "environments", "environment_id", "name", &rec.name),
        "environment",
        &rec.name,
    )
}

pub fn get_or_create_package(tx: &Transaction, rec: &PackageRecord, actor: &str) -> Result<i64> {
    // Packages key on (name, version); the generic single-column resolver
    // does not apply.
    let existing: Option<i64> = tx
        .query_row(
            "SELECT package_id FROM packages WHERE name = ?1 AND version = ?2",
            params![rec.name, rec.version],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    rec.validate()?;
    let audit = Audit::new(actor);
    audit.validate()?;
    insert_or_refetch(
        tx,
        || {
            tx.execute(
                "INSERT INTO packages(name, version, create_at, create_by, modify_at, modify_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    rec.name,
                    rec.version,
                    audit.create_at,
                    audit.create_by,
                    audit.modify_at,
                    audit.modify_by
                ],
            )
        },
        || {
            tx.query_row(
                "SELECT package_id FROM packages WHERE name = ?1 AND version = ?2",
                params![rec.name, rec.version],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
        },
        "package",
        &rec.name,
    )
}

pub fn get_or_create_script(tx: &Transaction, rec: &ScriptRecord, actor: &str) -> Result<i64> {
    if let Some(id) = resolve_id(tx, "scripts", "script_id", "name", &rec.name)? {
        return Ok(id);
    }
    rec.validate()?;
    let parent_id = if rec.parent.is_empty() {
        None
    } else {
        Some(
            resolve_id(tx, "scripts", "script_id", "name", &rec.parent)?
                .ok_or_else(|| StoreError::lookup("parent script", &rec.parent))?,
        )
    };
    let audit = Audit::new(actor);
    audit.validate()?;
    insert_or_refetch(
        tx,
        || {
            tx.execute(
                "INSERT INTO scripts(name, options, order_idx, parent_script_id,
                                     create_at, create_by, modify_at, modify_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    rec.name,
                    rec.options,
                    rec.order_idx,
                    parent_id,
                    audit.create_at,
                    audit.create_by,
                    audit.modify_at,
                    audit.modify_by
                ],
            )
        },
        || resolve_id(tx, "scripts", "script_id", "name", &rec.name),
        "script",
        &rec.name,
    )
}

pub fn get_or_create_file(tx: &Transaction, rec: &FileRecord, actor: &str) -> Result<i64> {
    if let Some(id) = resolve_id(tx, "files", "file_id", "file", &rec.name)? {
        return Ok(id);
    }
    rec.validate()?;
    let audit = Audit::new(actor);
    audit.validate()?;
    insert_or_refetch(
        tx,
        || {
            tx.execute(
                // a freshly registered file is always marked valid
                "INSERT INTO files(file, checksum, size, is_file_valid,
                                   create_at, create_by, modify_at, modify_by)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7)",
                params![
                    rec.name,
                    rec.checksum,
                    rec.size,
                    audit.create_at,
                    audit.create_by,
                    audit.modify_at,
                    audit.modify_by
                ],
            )
        },
        || resolve_id(tx, "files", "file_id", "file", &rec.name),
        "file",
        &rec.name,
    )
}

/// Buckets are dataset-owned: the row records which dataset registered the
/// bucket first. The bucket name itself stays globally unique.
pub fn get_or_create_bucket(
    tx: &Transaction,
    rec: &BucketRecord,
    dataset_id: i64,
    actor: &str,
) -> Result<i64> {
    if let Some(id) = resolve_id(tx, "buckets", "bucket_id", "bucket", &rec.name)? {
        return Ok(id);
    }
    rec.validate()?;
    let uuid = if rec.uuid.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        rec.uuid.clone()
    };
    let audit = Audit::new(actor);
    audit.validate()?;
    insert_or_refetch(
        tx,
        || {
            tx.execute(
                "INSERT INTO buckets(bucket, uuid, meta_data, dataset_id,
                                     create_at, create_by, modify_at, modify_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    rec.name,
                    uuid,
                    rec.meta_data,
                    dataset_id,
                    audit.create_at,
                    audit.create_by,
                    audit.modify_at,
                    audit.modify_by
                ],
            )
        },
        || resolve_id(tx, "buckets", "bucket_id", "bucket", &rec.name),
        "bucket",
        &rec.name,
    )
}

/// Configs have no natural key, so they are content-addressed: the payload is
/// serialized to canonical JSON and keyed by its blake3 hash. Re-submitting
/// the same payload resolves to the existing row.
pub fn get_or_create_config(
    tx: &Transaction,
    content: &serde_json::Value,
    actor: &str,
) -> Result<i64> {
    let text = serde_json::to_string(content)
        .map_err(|e| StoreError::validation("config", e.to_string()))?;
    let hash = blake3::hash(text.as_bytes()).to_hex().to_string();
    if let Some(id) = resolve_id(tx, "configs", "config_id", "content_hash", &hash)? {
        return Ok(id);
    }
    let audit = Audit::new(actor);
    audit.validate()?;
    insert_or_refetch(
        tx,
        || {
            tx.execute(
                "INSERT INTO configs(content, content_hash, create_at, create_by, modify_at, modify_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    text,
                    hash,
                    audit.create_at,
                    audit.create_by,
                    audit.modify_at,
                    audit.modify_by
                ],
            )
        },
        || resolve_id(tx, "configs", "config_id", "content_hash", &hash),
        "config",
        &hash,
    )
}

/// Resolve-or-create the dataset row itself. Re-submission of a known did
/// returns the existing row untouched; the first write establishes the
/// site/processing/osinfo references.
pub fn get_or_create_dataset(
    tx: &Transaction,
    did: &str,
    site_id: Option<i64>,
    processing_id: i64,
    os_id: i64,
    actor: &str,
) -> Result<i64> {
    if let Some(id) = resolve_id(tx, "datasets", "dataset_id", "did", did)? {
        return Ok(id);
    }
    lexicon::check("did", did)?;
    let audit = Audit::new(actor);
    audit.validate()?;
    insert_or_refetch(
        tx,
        || {
            tx.execute(
                "INSERT INTO datasets(did, site_id, processing_id, os_id,
                                      create_at, create_by, modify_at, modify_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    did,
                    site_id,
                    processing_id,
                    os_id,
                    audit.create_at,
                    audit.create_by,
                    audit.modify_at,
                    audit.modify_by
                ],
            )
        },
        || resolve_id(tx, "datasets", "dataset_id", "did", did),
        "dataset",
        did,
    )
}

/// Insert the parent→dataset edge; an existing edge is an idempotent no-op.
pub fn insert_parent_edge(
    tx: &Transaction,
    parent_id: i64,
    dataset_id: i64,
    actor: &str,
) -> Result<()> {
    let audit = Audit::new(actor);
    audit.validate()?;
    match tx.execute(
        "INSERT INTO parents(parent_id, dataset_id, create_at, create_by, modify_at, modify_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            parent_id,
            dataset_id,
            audit.create_at,
            audit.create_by,
            audit.modify_at,
            audit.modify_by
        ],
    ) {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => {
            tracing::debug!(parent_id, dataset_id, "parent edge already present");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
