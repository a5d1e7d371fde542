// src/api.rs
//! Bookkeeper: the typed facade an HTTP layer (or test) drives directly.
//!
//! Owns the store and the service configuration; write calls run one
//! transaction per record, read calls validate their filter set before
//! touching the database.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::ServiceConfig;
use crate::error::{Result, StoreError};
use crate::records::ProvenanceRecord;
use crate::store::{Store, reader, writer};

pub struct Bookkeeper {
    store: Store,
    config: ServiceConfig,
}

impl Bookkeeper {
    /// Open the store named by the configuration.
    pub fn open(config: ServiceConfig) -> Result<Self> {
        let store = Store::open(&config.database)?;
        Ok(Self { store, config })
    }

    /// Wrap an already-open store (tests use this with in-memory databases).
    pub fn with_store(store: Store, config: ServiceConfig) -> Self {
        Self { store, config }
    }

    /// Persist one provenance record. The actor defaults to the configured
    /// system identity when the caller supplies none.
    pub fn insert_provenance(
        &mut self,
        rec: &ProvenanceRecord,
        actor: Option<&str>,
    ) -> Result<()> {
        let actor = match actor {
            Some(a) if !a.is_empty() => a,
            _ => &self.config.default_actor,
        };
        writer::insert_provenance(self.store.conn_mut(), rec, actor)
    }

    /// Persist a loosely-typed user record (see
    /// [`ProvenanceRecord::from_user_metadata`]). Returns the did the record
    /// was filed under, which may have been derived from the parent did.
    pub fn insert_user_record(&mut self, map: &serde_json::Map<String, Value>) -> Result<String> {
        let user = map
            .get("user")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::validation("user", "no user value found in record"))?;
        let rec = ProvenanceRecord::from_user_metadata(map, user, &self.config);
        writer::insert_provenance(self.store.conn_mut(), &rec, user)?;
        Ok(rec.did)
    }

    /// Reconstruct provenance from a filter map. Exactly one filter is
    /// accepted: `did`; any other key is rejected.
    pub fn query_provenance(
        &mut self,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<ProvenanceRecord>> {
        for key in filters.keys() {
            if key != "did" {
                return Err(StoreError::InvalidParameter(key.clone()));
            }
        }
        let did = filters
            .get("did")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StoreError::validation("did", "provenance query requires a did"))?;
        reader::provenance(self.store.conn_mut(), did)
    }

    /// Reconstruct provenance for one dataset identifier.
    pub fn provenance(&mut self, did: &str) -> Result<Vec<ProvenanceRecord>> {
        reader::provenance(self.store.conn_mut(), did)
    }

    /// Parent did of a dataset, if one was recorded.
    pub fn parent_did(&self, did: &str) -> Result<Option<String>> {
        reader::parent_did(&self.store.db, did)
    }

    /// Dids of all datasets derived from the given one.
    pub fn children(&self, did: &str) -> Result<Vec<String>> {
        reader::children(&self.store.db, did)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookkeeper() -> Bookkeeper {
        Bookkeeper::with_store(Store::open_in_memory().unwrap(), ServiceConfig::default())
    }

    #[test]
    fn rejects_unknown_filter_keys() {
        let mut bk = bookkeeper();
        let mut filters = BTreeMap::new();
        filters.insert("did".to_string(), "/a/b:v1".to_string());
        filters.insert("site".to_string(), "S1".to_string());
        let err = bk.query_provenance(&filters).unwrap_err();
        assert!(matches!(err, StoreError::InvalidParameter(k) if k == "site"));
    }

    #[test]
    fn requires_a_did_filter() {
        let mut bk = bookkeeper();
        let err = bk.query_provenance(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, StoreError::Validation { field, .. } if field == "did"));
    }

    #[test]
    fn unknown_did_yields_empty_result() {
        let mut bk = bookkeeper();
        let mut filters = BTreeMap::new();
        filters.insert("did".to_string(), "/never/written:v0".to_string());
        assert!(bk.query_provenance(&filters).unwrap().is_empty());
    }
}
