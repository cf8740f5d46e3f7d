//! Workload descriptor types
//!
//! These are the documents published to the parameter store for
//! downstream consumers. Field order is declaration order, so the
//! serialized form is byte-stable for identical inputs.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Version stamped into every published document
pub const MODEL_VERSION: &str = "0.0.1";

/// One account inside a logical workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Document model version
    pub version: String,
    /// 12-digit account identifier
    pub id: String,
    /// Account name, e.g. `billing-delegate-prod`
    pub name: String,
}

impl AccountRecord {
    /// Record for a resolved account at the current model version.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            version: MODEL_VERSION.to_string(),
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A logical workload: a named group of accounts across environment tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalWorkload {
    /// Document model version
    pub version: String,
    /// Workload name, e.g. `billing-delegate`
    pub name: String,
    /// Production-tier accounts
    pub prod_accounts: Vec<AccountRecord>,
    /// Staging-tier accounts
    pub staging_accounts: Vec<AccountRecord>,
    /// Development-tier accounts
    pub dev_accounts: Vec<AccountRecord>,
}

impl LogicalWorkload {
    /// An empty workload at the current model version.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: MODEL_VERSION.to_string(),
            name: name.into(),
            prod_accounts: Vec::new(),
            staging_accounts: Vec::new(),
            dev_accounts: Vec::new(),
        }
    }

    /// Accounts across all tiers.
    pub fn account_count(&self) -> usize {
        self.prod_accounts.len() + self.staging_accounts.len() + self.dev_accounts.len()
    }

    /// Serialize to the published compact JSON form.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Serialize)
    }

    /// Parse a published descriptor.
    pub fn from_json(document: &str) -> Result<Self> {
        serde_json::from_str(document).map_err(Error::Parse)
    }
}
