// src/store/reader.rs
//! Provenance graph reader: one wide join, folded back into a nested tree.
//!
//! The join spans dataset, site, processing, osinfo, environments (with a
//! self-join for the parent environment name), packages, scripts (with a
//! self-join for the parent script name), buckets, files and config, ordered
//! by (dataset_id, environment_id, package_id) so rows belonging to one
//! environment/package group arrive contiguously. Folding accumulates nodes
//! by identity in a single pass and flattens to ordered, deduplicated lists
//! at the end.

use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::Result;
use crate::records::{
    BucketRecord, EnvironmentRecord, FileRecord, OsInfoRecord, PackageRecord, ProvenanceRecord,
    ScriptRecord,
};

const SELECT_PROVENANCE: &str = "
SELECT D.did, PR.processing, O.name, O.kernel, O.version,
       E.environment_id, E.name, E.version, E.details, PE.name,
       PK.name, PK.version,
       SC.script_id, SC.name, SC.order_idx, SC.options, PSC.name,
       S.site, C.content,
       B.bucket, B.uuid, B.meta_data,
       F.file, DF.direction
FROM datasets D
JOIN processing PR ON PR.processing_id = D.processing_id
JOIN osinfo O ON O.os_id = D.os_id
LEFT JOIN sites S ON S.site_id = D.site_id
LEFT JOIN configs C ON C.config_id = D.config_id
LEFT JOIN dataset_environments DE ON DE.dataset_id = D.dataset_id
LEFT JOIN environments E ON E.environment_id = DE.environment_id
LEFT JOIN environments PE ON PE.environment_id = E.parent_environment_id
LEFT JOIN environment_packages EP ON EP.environment_id = E.environment_id
LEFT JOIN packages PK ON PK.package_id = EP.package_id
LEFT JOIN dataset_scripts DS ON DS.dataset_id = D.dataset_id
LEFT JOIN scripts SC ON SC.script_id = DS.script_id
LEFT JOIN scripts PSC ON PSC.script_id = SC.parent_script_id
LEFT JOIN buckets B ON B.dataset_id = D.dataset_id
LEFT JOIN dataset_files DF ON DF.dataset_id = D.dataset_id
LEFT JOIN files F ON F.file_id = DF.file_id
WHERE D.did = ?1
ORDER BY D.dataset_id, E.environment_id, PK.package_id";

const SELECT_PARENT: &str = "
SELECT PD.did
FROM parents P
JOIN datasets D ON D.dataset_id = P.dataset_id
JOIN datasets PD ON PD.dataset_id = P.parent_id
WHERE D.did = ?1";

const SELECT_CHILDREN: &str = "
SELECT CD.did
FROM parents P
JOIN datasets D ON D.dataset_id = P.parent_id
JOIN datasets CD ON CD.dataset_id = P.dataset_id
WHERE D.did = ?1
ORDER BY CD.dataset_id";

// One scanned join row, nullable wherever a LEFT JOIN may come up empty.
struct JoinRow {
    did: String,
    processing: String,
    os_name: String,
    os_kernel: String,
    os_version: String,
    env_id: Option<i64>,
    env_name: Option<String>,
    env_version: Option<String>,
    env_details: Option<String>,
    env_parent: Option<String>,
    pkg_name: Option<String>,
    pkg_version: Option<String>,
    script_id: Option<i64>,
    script_name: Option<String>,
    script_order: Option<i64>,
    script_options: Option<String>,
    script_parent: Option<String>,
    site: Option<String>,
    config: Option<String>,
    bucket: Option<String>,
    bucket_uuid: Option<String>,
    bucket_meta: Option<String>,
    file: Option<String>,
    direction: Option<String>,
}

/// Look up the parent did of a dataset. `Ok(None)` when the dataset has no
/// recorded parent.
pub fn parent_did(db: &Connection, did: &str) -> Result<Option<String>> {
    let parent = db
        .query_row(SELECT_PARENT, params![did], |row| row.get::<_, String>(0))
        .optional()?;
    Ok(parent)
}

/// List the dids of all datasets derived from the given one.
pub fn children(db: &Connection, did: &str) -> Result<Vec<String>> {
    let mut stmt = db.prepare(SELECT_CHILDREN)?;
    let rows = stmt.query_map(params![did], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for did in rows {
        out.push(did?);
    }
    Ok(out)
}

/// Reconstruct the full provenance tree for one dataset identifier.
///
/// Returns a one-element list wrapping the tree (a compatibility artifact of
/// the output format), or an empty list when no lineage rows match.
pub fn provenance(db: &mut Connection, did: &str) -> Result<Vec<ProvenanceRecord>> {
    // parent lookup is separate from the main join; its absence or failure
    // never aborts the reconstruction
    let parent = match parent_did(db, did) {
        Ok(Some(p)) => p,
        Ok(None) => String::new(),
        Err(err) => {
            tracing::warn!(did, error = %err, "parent lookup failed");
            String::new()
        }
    };

    let tx = db.transaction()?;
    let mut record = ProvenanceRecord::default();

    // index-by-identity accumulators; rows are ordered, so BTreeMap keys
    // match encounter order for environments
    let mut env_map: BTreeMap<i64, EnvironmentRecord> = BTreeMap::new();
    let mut pkg_seen: HashMap<i64, HashSet<String>> = HashMap::new();
    let mut scripts: Vec<(i64, ScriptRecord)> = Vec::new();
    let mut script_ids: HashSet<i64> = HashSet::new();
    let mut buckets: Vec<BucketRecord> = Vec::new();
    let mut input_files: Vec<FileRecord> = Vec::new();
    let mut output_files: Vec<FileRecord> = Vec::new();

    {
        let mut stmt = tx.prepare(SELECT_PROVENANCE)?;
        let rows = stmt.query_map(params![did], |row| {
            Ok(JoinRow {
                did: row.get(0)?,
                processing: row.get(1)?,
                os_name: row.get(2)?,
                os_kernel: row.get(3)?,
                os_version: row.get(4)?,
                env_id: row.get(5)?,
                env_name: row.get(6)?,
                env_version: row.get(7)?,
                env_details: row.get(8)?,
                env_parent: row.get(9)?,
                pkg_name: row.get(10)?,
                pkg_version: row.get(11)?,
                script_id: row.get(12)?,
                script_name: row.get(13)?,
                script_order: row.get(14)?,
                script_options: row.get(15)?,
                script_parent: row.get(16)?,
                site: row.get(17)?,
                config: row.get(18)?,
                bucket: row.get(19)?,
                bucket_uuid: row.get(20)?,
                bucket_meta: row.get(21)?,
                file: row.get(22)?,
                direction: row.get(23)?,
            })
        })?;

        for row in rows {
            let row = row?;

            // dataset-level columns initialize the tree on the first row
            if record.did.is_empty() {
                record = ProvenanceRecord {
                    did: row.did.clone(),
                    parent: parent.clone(),
                    processing: row.processing.clone(),
                    site: row.site.clone().unwrap_or_default(),
                    osinfo: OsInfoRecord {
                        name: row.os_name.clone(),
                        kernel: row.os_kernel.clone(),
                        version: row.os_version.clone(),
                    },
                    ..Default::default()
                };
            }

            if let Some(raw) = &row.config {
                record.config = serde_json::from_str(raw)
                    .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
            }

            if let Some(name) = &row.bucket {
                buckets.push(BucketRecord {
                    name: name.clone(),
                    uuid: row.bucket_uuid.clone().unwrap_or_default(),
                    meta_data: row.bucket_meta.clone().unwrap_or_default(),
                });
            }

            if let Some(sid) = row.script_id {
                if script_ids.insert(sid) {
                    scripts.push((
                        sid,
                        ScriptRecord {
                            name: row.script_name.clone().unwrap_or_default(),
                            order_idx: row.script_order.unwrap_or_default(),
                            options: row.script_options.clone().unwrap_or_default(),
                            parent: row.script_parent.clone().unwrap_or_default(),
                        },
                    ));
                }
            }

            if let Some(env_id) = row.env_id {
                let env = env_map.entry(env_id).or_insert_with(|| EnvironmentRecord {
                    name: row.env_name.clone().unwrap_or_default(),
                    version: row.env_version.clone().unwrap_or_default(),
                    details: row.env_details.clone().unwrap_or_default(),
                    parent: row.env_parent.clone().unwrap_or_default(),
                    packages: Vec::new(),
                });
                // dedup packages within this environment by name|version
                if let (Some(name), Some(version)) = (&row.pkg_name, &row.pkg_version) {
                    let key = format!("{name}|{version}");
                    if pkg_seen.entry(env_id).or_default().insert(key) {
                        env.packages.push(PackageRecord {
                            name: name.clone(),
                            version: version.clone(),
                        });
                    }
                }
            }

            if let (Some(file), Some(direction)) = (&row.file, &row.direction) {
                let target = match direction.as_str() {
                    "input" => &mut input_files,
                    _ => &mut output_files,
                };
                target.push(FileRecord {
                    name: file.clone(),
                    ..Default::default()
                });
            }
        }
    }
    tx.commit()?;

    if record.did.is_empty() {
        return Ok(Vec::new());
    }

    // flatten accumulators into ordered, deduplicated lists
    record.environments = env_map.into_values().collect();
    let mut script_names = HashSet::new();
    record.scripts = scripts
        .into_iter()
        .filter_map(|(_, s)| script_names.insert(s.name.clone()).then_some(s))
        .collect();
    record.buckets = dedup_by_name(buckets, |b| b.name.clone());
    record.input_files = dedup_by_name(input_files, |f| f.name.clone());
    record.output_files = dedup_by_name(output_files, |f| f.name.clone());

    Ok(vec![record])
}

// Remove duplicates keyed by name, preserving first-seen order.
fn dedup_by_name<T>(items: Vec<T>, key: impl Fn(&T) -> String) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(key(i))).collect()
}
