// src/store/writer.rs
//! Provenance graph writer: one denormalized record in, one committed
//! relational graph out.
//!
//! Every step runs inside a single transaction; the first fatal error rolls
//! the whole write back, so no partial graph is ever visible. Bucket
//! collisions are the one deliberate exception: a duplicate bucket is logged
//! and the write continues. Calling this twice with an identical record
//! leaves the relational state unchanged.

use rusqlite::{Connection, params};

use crate::error::{Result, StoreError};
use crate::records::ProvenanceRecord;
use crate::store::entities::{
    get_or_create_bucket, get_or_create_config, get_or_create_dataset, get_or_create_environment,
    get_or_create_file, get_or_create_osinfo, get_or_create_package, get_or_create_processing,
    get_or_create_script, get_or_create_site, insert_parent_edge,
};
use crate::store::now;
use crate::store::resolve::{
    LINK_DATASET_ENVIRONMENT, LINK_DATASET_FILE, LINK_DATASET_SCRIPT, LINK_ENVIRONMENT_PACKAGE,
    link, resolve_id,
};

/// Persist one provenance record, resolving or creating every referenced
/// entity in dependency order and linking all associations.
pub fn insert_provenance(db: &mut Connection, rec: &ProvenanceRecord, actor: &str) -> Result<()> {
    if rec.did.trim().is_empty() {
        return Err(StoreError::validation("did", "missing dataset identifier"));
    }
    rec.validate()?;

    let tx = db.transaction()?;

    // site is optional
    let site_id = if rec.site.is_empty() {
        None
    } else {
        Some(get_or_create_site(&tx, &rec.site, actor)?)
    };

    // osinfo is mandatory
    if rec.osinfo.name.is_empty() {
        return Err(StoreError::validation("osinfo", "osinfo is mandatory"));
    }
    let os_id = get_or_create_osinfo(&tx, &rec.osinfo, actor)?;

    // environments and their nested packages
    let mut env_ids = Vec::new();
    for env in &rec.environments {
        if env.name.is_empty() {
            continue;
        }
        let env_id = get_or_create_environment(&tx, env, actor)?;
        for pkg in &env.packages {
            let pkg_id = get_or_create_package(&tx, pkg, actor)?;
            link(&tx, LINK_ENVIRONMENT_PACKAGE, params![env_id, pkg_id])?;
        }
        env_ids.push(env_id);
    }

    // scripts; a script descriptor without a name is malformed
    let mut script_ids = Vec::new();
    for script in &rec.scripts {
        if script.name.is_empty() {
            return Err(StoreError::validation("script_name", "script has no name"));
        }
        script_ids.push(get_or_create_script(&tx, script, actor)?);
    }

    // processing is mandatory
    if rec.processing.is_empty() {
        return Err(StoreError::validation("processing", "processing is mandatory"));
    }
    let processing_id = get_or_create_processing(&tx, &rec.processing, actor)?;

    // the dataset row itself; re-submission of a known did resolves
    let dataset_id = get_or_create_dataset(&tx, &rec.did, site_id, processing_id, os_id, actor)?;

    // optional opaque config payload, attached to the dataset row
    if !rec.config.is_null() {
        let config_id = get_or_create_config(&tx, &rec.config, actor)?;
        tx.execute(
            "UPDATE datasets SET config_id = ?1, modify_at = ?2, modify_by = ?3
             WHERE dataset_id = ?4",
            params![config_id, now(), actor, dataset_id],
        )?;
    }

    // dataset-level associations
    for env_id in &env_ids {
        link(&tx, LINK_DATASET_ENVIRONMENT, params![dataset_id, env_id])?;
    }
    for script_id in &script_ids {
        link(&tx, LINK_DATASET_SCRIPT, params![dataset_id, script_id])?;
    }

    // parent edge: the parent dataset must already exist
    if !rec.parent.is_empty() {
        let parent_id = resolve_id(&tx, "datasets", "dataset_id", "did", &rec.parent)?
            .ok_or_else(|| StoreError::lookup("parent dataset", &rec.parent))?;
        insert_parent_edge(&tx, parent_id, dataset_id, actor)?;
    }

    // buckets: a collision here is logged and skipped, never fatal
    for bucket in &rec.buckets {
        if bucket.name.is_empty() {
            continue;
        }
        if let Err(err) = get_or_create_bucket(&tx, bucket, dataset_id, actor) {
            tracing::warn!(bucket = %bucket.name, error = %err, "bucket insert failed, continuing");
        }
    }

    // input and output files, linked with a direction tag
    for (direction, files) in [("input", &rec.input_files), ("output", &rec.output_files)] {
        for file in files {
            if file.name.is_empty() {
                return Err(StoreError::lookup("file", format!("{direction} file without a name")));
            }
            let file_id = get_or_create_file(&tx, file, actor)?;
            link(&tx, LINK_DATASET_FILE, params![dataset_id, file_id, direction])?;
        }
    }

    tx.commit()?;
    tracing::info!(did = %rec.did, "provenance record committed");
    Ok(())
}
