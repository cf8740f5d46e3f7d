//! Persisted stack state.
//!
//! State is a JSON document keyed by resource URN. It records the inputs
//! a resource was last converged with and the outputs the provider
//! returned, which is what makes re-runs idempotent: identical inputs
//! mean no provider call.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// One converged resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Physical identifier assigned by the provider
    pub id: String,
    /// Provider type token, e.g. `aws:organizations:Account`
    pub type_token: String,
    /// Resolved inputs at convergence time
    pub inputs: Value,
    /// Provider-reported outputs, including `id`
    pub outputs: serde_json::Map<String, Value>,
    /// Account the resource lives in, when not the ambient one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// When the resource was first created
    pub created_at: DateTime<Utc>,
}

/// Full state of one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// Stack name the state belongs to
    pub name: String,
    /// Records keyed by URN
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// URNs in convergence order, used for reverse-order destroys
    #[serde(default)]
    pub order: Vec<String>,
    /// Exported stack outputs
    #[serde(default)]
    pub exports: BTreeMap<String, Value>,
    /// Last successful write
    pub last_updated: DateTime<Utc>,
}

impl StackState {
    /// Fresh, empty state for a stack.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: BTreeMap::new(),
            order: Vec::new(),
            exports: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Load state from `path`, or start fresh when the file does not exist.
    pub fn load(path: &Path, name: &str) -> Result<Self> {
        if !path.exists() {
            log::debug!("no state at {}, starting fresh", path.display());
            return Ok(Self::new(name));
        }
        let contents = std::fs::read_to_string(path).map_err(|source| Error::State {
            path: path.display().to_string(),
            source,
        })?;
        let state: Self =
            serde_json::from_str(&contents).map_err(|source| Error::StateFormat {
                path: path.display().to_string(),
                source,
            })?;
        log::debug!(
            "loaded state for '{}' with {} resources",
            state.name,
            state.resources.len()
        );
        Ok(state)
    }

    /// Write state to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        let as_io = |source: std::io::Error| Error::State {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(as_io)?;
        }
        let contents = serde_json::to_string_pretty(self).map_err(|source| Error::StateFormat {
            path: path.display().to_string(),
            source,
        })?;
        std::fs::write(path, contents).map_err(as_io)?;
        log::debug!("saved state to {}", path.display());
        Ok(())
    }

    /// Insert or replace a record, keeping `order` consistent.
    pub fn record(&mut self, urn: impl Into<String>, record: ResourceRecord) {
        let urn = urn.into();
        if !self.order.contains(&urn) {
            self.order.push(urn.clone());
        }
        self.resources.insert(urn, record);
        self.last_updated = Utc::now();
    }

    /// Remove a record, if present.
    pub fn remove(&mut self, urn: &str) -> Option<ResourceRecord> {
        self.order.retain(|u| u != urn);
        let removed = self.resources.remove(urn);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Look up an output value recorded for a resource.
    pub fn output(&self, urn: &str, field: &str) -> Option<&Value> {
        self.resources.get(urn).and_then(|r| r.outputs.get(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> ResourceRecord {
        let mut outputs = serde_json::Map::new();
        outputs.insert("id".into(), json!("123456789012"));
        ResourceRecord {
            id: "123456789012".into(),
            type_token: "aws:organizations:Account".into(),
            inputs: json!({"name": "prod", "email": "x+prod@example.com"}),
            outputs,
            account: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let state = StackState::load(&dir.path().join("absent.json"), "infra").unwrap();
        assert_eq!(state.name, "infra");
        assert!(state.resources.is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stack.json");

        let mut state = StackState::new("infra");
        state.record("urn:aws:organizations:Account::prod", sample_record());
        state
            .exports
            .insert("prod-account-id".into(), json!("123456789012"));
        state.save(&path).unwrap();

        let loaded = StackState::load(&path, "infra").unwrap();
        assert_eq!(loaded.name, "infra");
        assert_eq!(loaded.order, state.order);
        assert_eq!(
            loaded.output("urn:aws:organizations:Account::prod", "id"),
            Some(&json!("123456789012"))
        );
        assert_eq!(loaded.exports, state.exports);
    }

    #[test]
    fn test_record_keeps_order_stable_on_replace() {
        let mut state = StackState::new("infra");
        state.record("urn:t::a", sample_record());
        state.record("urn:t::b", sample_record());
        state.record("urn:t::a", sample_record());
        assert_eq!(state.order, vec!["urn:t::a", "urn:t::b"]);

        state.remove("urn:t::a");
        assert_eq!(state.order, vec!["urn:t::b"]);
        assert!(state.output("urn:t::a", "id").is_none());
    }

    #[test]
    fn test_corrupt_state_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = StackState::load(&path, "infra").unwrap_err();
        assert!(matches!(err, Error::StateFormat { .. }));
    }
}
