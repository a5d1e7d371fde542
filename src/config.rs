// src/config.rs
//! Service configuration, loaded from a TOML file with per-field defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Path to the SQLite database file.
    #[serde(default = "ServiceConfig::default_database")]
    pub database: PathBuf,

    /// Actor recorded in create_by/modify_by when the caller supplies none.
    #[serde(default = "ServiceConfig::default_actor")]
    pub default_actor: String,

    /// Site used for user records that name no site.
    #[serde(default = "ServiceConfig::default_site")]
    pub default_site: String,

    /// Processing step used for user records that name no application.
    #[serde(default = "ServiceConfig::default_processing")]
    pub default_processing: String,
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<ServiceConfig>(&text)
                .with_context(|| format!("parsing config file {}", path.display()))
        } else {
            tracing::info!(
                "no config file found at {}, using ServiceConfig::default()",
                path.display()
            );
            Ok(ServiceConfig::default())
        }
    }

    fn default_database() -> PathBuf {
        PathBuf::from("lineage.db")
    }

    fn default_actor() -> String {
        "server".to_string()
    }

    fn default_site() -> String {
        "Unknown".to_string()
    }

    fn default_processing() -> String {
        "N/A".to_string()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database: Self::default_database(),
            default_actor: Self::default_actor(),
            default_site: Self::default_site(),
            default_processing: Self::default_processing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = ServiceConfig::load(Path::new("/nonexistent/lineage.toml")).unwrap();
        assert_eq!(cfg.default_actor, "server");
    }

    #[test]
    fn partial_toml_keeps_field_defaults() {
        let cfg: ServiceConfig = toml::from_str("default_site = \"CHESS\"").unwrap();
        assert_eq!(cfg.default_site, "CHESS");
        assert_eq!(cfg.database, PathBuf::from("lineage.db"));
    }
}
