// src/records.rs
//! Wire-level provenance records.
//!
//! These are the denormalized structures clients POST and GET: one
//! `ProvenanceRecord` per dataset, with nested environment/package, script,
//! bucket and file descriptors. The store normalizes them on write and folds
//! the relational rows back into this shape on read.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::lexicon;

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// One input or output file attached to a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size: i64,
    #[serde(default, rename = "isvalid", skip_serializing_if = "is_zero")]
    pub is_valid: i64,
}

impl FileRecord {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.checksum.is_empty() && self.size == 0 && self.is_valid == 0
    }

    pub fn validate(&self) -> Result<()> {
        lexicon::check("file", &self.name)
    }
}

/// A software package pinned by (name, version).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
}

impl PackageRecord {
    pub fn validate(&self) -> Result<()> {
        lexicon::check("package_name", &self.name)?;
        lexicon::check("package_version", &self.version)
    }
}

/// A software environment, optionally chained to a parent environment and
/// carrying the packages installed in it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub details: String,
    #[serde(default, rename = "parent_environment")]
    pub parent: String,
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
}

impl EnvironmentRecord {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.version.is_empty()
            && self.details.is_empty()
            && self.parent.is_empty()
            && self.packages.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        lexicon::check("env_name", &self.name)?;
        lexicon::check("env_version", &self.version)?;
        lexicon::check("env_details", &self.details)?;
        lexicon::check("env_parent", &self.parent)?;
        for pkg in &self.packages {
            pkg.validate()?;
        }
        Ok(())
    }
}

/// A processing script, optionally chained to a parent script.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub name: String,
    #[serde(default)]
    pub options: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub order_idx: i64,
    #[serde(default, rename = "parent_script")]
    pub parent: String,
}

impl ScriptRecord {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.options.is_empty() && self.parent.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        lexicon::check("script_name", &self.name)?;
        lexicon::check("script_options", &self.options)?;
        lexicon::check("script_parent", &self.parent)
    }
}

/// Operating-system environment a dataset was produced under.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsInfoRecord {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kernel: String,
}

impl OsInfoRecord {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.version.is_empty() && self.kernel.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        lexicon::check("osinfo_name", &self.name)?;
        lexicon::check("osinfo_version", &self.version)?;
        lexicon::check("osinfo_kernel", &self.kernel)
    }
}

/// A storage bucket owned by a dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketRecord {
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub meta_data: String,
}

impl BucketRecord {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.uuid.is_empty() && self.meta_data.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        lexicon::check("bucket", &self.name)?;
        lexicon::check("meta_data", &self.meta_data)
    }
}

/// The full denormalized provenance record for one dataset.
///
/// `config` is an opaque payload (arbitrary JSON or a scalar); the store
/// persists it verbatim and content-addresses it for deduplication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub did: String,
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub processing: String,
    #[serde(default, rename = "parent_did")]
    pub parent: String,
    #[serde(default)]
    pub input_files: Vec<FileRecord>,
    #[serde(default)]
    pub output_files: Vec<FileRecord>,
    #[serde(default)]
    pub environments: Vec<EnvironmentRecord>,
    #[serde(default)]
    pub scripts: Vec<ScriptRecord>,
    #[serde(default)]
    pub osinfo: OsInfoRecord,
    #[serde(default)]
    pub buckets: Vec<BucketRecord>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

impl ProvenanceRecord {
    /// True when nothing beyond the did itself is populated.
    pub fn is_empty(&self) -> bool {
        self.site.trim().is_empty()
            && self.processing.trim().is_empty()
            && self.parent.trim().is_empty()
            && self.input_files.is_empty()
            && self.output_files.is_empty()
            && self.environments.iter().all(|e| e.is_empty())
            && self.scripts.iter().all(|s| s.is_empty())
            && self.osinfo.is_empty()
            && self.buckets.iter().all(|b| b.is_empty())
            && self.config.is_null()
    }

    /// Lexicon validation over the whole record, field by field.
    pub fn validate(&self) -> Result<()> {
        lexicon::check("did", &self.did)?;
        lexicon::check("site", &self.site)?;
        lexicon::check("processing", &self.processing)?;
        lexicon::check("parent_did", &self.parent)?;
        self.osinfo.validate()?;
        for b in &self.buckets {
            b.validate()?;
        }
        for f in self.input_files.iter().chain(self.output_files.iter()) {
            f.validate()?;
        }
        for env in &self.environments {
            env.validate()?;
        }
        for script in &self.scripts {
            script.validate()?;
        }
        Ok(())
    }

    /// Build a provenance record from a loosely-typed user metadata map.
    ///
    /// Covers clients that only know their files and a parent did: the did is
    /// derived from `parent_did`, the user and a timestamp when absent, site
    /// and processing fall back to configured defaults, and placeholder
    /// bucket/environment/script/osinfo entries keep the graph complete. When
    /// the map carries a `user_metadata.metadata` provenance block, its
    /// contents overlay the placeholders.
    pub fn from_user_metadata(
        map: &serde_json::Map<String, Value>,
        user: &str,
        cfg: &ServiceConfig,
    ) -> Self {
        let str_of = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let parent = str_of("parent_did");
        let mut did = str_of("did");
        if did.is_empty() && !parent.is_empty() {
            let tstamp = Utc::now().format("%Y%m%d_%H%M%S");
            did = format!("{parent}/{user}:{tstamp}");
        }
        let mut site = str_of("site");
        if site.is_empty() {
            site = cfg.default_site.clone();
        }
        let mut processing = str_of("application");
        if processing.is_empty() {
            processing = cfg.default_processing.clone();
        }

        let mut rec = ProvenanceRecord {
            did,
            site,
            processing,
            parent,
            input_files: user_files(map.get("input_files")),
            output_files: user_files(map.get("output_files")),
            environments: vec![EnvironmentRecord {
                name: "UserEnvironment".to_string(),
                version: "N/A".to_string(),
                details: "N/A".to_string(),
                ..Default::default()
            }],
            scripts: vec![ScriptRecord {
                name: "UserScript".to_string(),
                ..Default::default()
            }],
            osinfo: OsInfoRecord {
                name: "UserInfo".to_string(),
                version: "N/A".to_string(),
                kernel: "N/A".to_string(),
            },
            buckets: vec![BucketRecord {
                name: "UserBucket".to_string(),
                ..Default::default()
            }],
            config: map.get("config").cloned().unwrap_or(Value::Null),
        };
        rec.overlay_user_metadata(map);
        rec
    }

    // Pull an embedded provenance block out of user_metadata.metadata, if any,
    // and let it override the placeholder entries.
    fn overlay_user_metadata(&mut self, map: &serde_json::Map<String, Value>) {
        let Some(meta) = map.get("user_metadata").and_then(Value::as_object) else {
            return;
        };
        let Some(block) = meta.get("metadata") else {
            return;
        };
        let parsed: Option<ProvenanceRecord> = match block {
            Value::Object(_) => serde_json::from_value(block.clone()).ok(),
            Value::String(s) => serde_json::from_str(s).ok(),
            _ => None,
        };
        let Some(prov) = parsed else {
            tracing::warn!("unable to map user_metadata.metadata to a provenance record");
            return;
        };
        if !prov.processing.is_empty() {
            self.processing = prov.processing;
        }
        if !prov.osinfo.is_empty() {
            self.osinfo = prov.osinfo;
        }
        if !prov.environments.is_empty() {
            self.environments = prov.environments;
        }
        if !prov.scripts.is_empty() {
            self.scripts = prov.scripts;
        }
        self.input_files.extend(prov.input_files);
        self.output_files.extend(prov.output_files);
    }
}

// Accept input/output files as a space-separated string, a list of strings,
// or a list of file records.
fn user_files(val: Option<&Value>) -> Vec<FileRecord> {
    let mut files = Vec::new();
    match val {
        Some(Value::String(s)) => {
            for name in s.split_whitespace() {
                files.push(FileRecord {
                    name: name.to_string(),
                    ..Default::default()
                });
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(name) => files.push(FileRecord {
                        name: name.clone(),
                        ..Default::default()
                    }),
                    Value::Object(_) => {
                        if let Ok(f) = serde_json::from_value::<FileRecord>(item.clone()) {
                            files.push(f);
                        }
                    }
                    other => files.push(FileRecord {
                        name: other.to_string(),
                        ..Default::default()
                    }),
                }
            }
        }
        _ => {}
    }
    files
}
