//! # Orgmodel
//!
//! Shared data model for the organization topology.
//!
//! This crate provides:
//! - The [`LogicalWorkload`] descriptor published for each workload
//! - The parameter-store paths where org-level values live
//! - Account identifier formatting
//!
//! ## Example
//!
//! ```
//! use orgmodel::{AccountRecord, LogicalWorkload, workload_param_path};
//!
//! let mut workload = LogicalWorkload::new("billing-delegate");
//! workload
//!     .prod_accounts
//!     .push(AccountRecord::new("123456789012", "billing-delegate-prod"));
//!
//! assert_eq!(
//!     workload_param_path("billing-delegate"),
//!     "/org-managed/logical-workloads/billing-delegate"
//! );
//! let document = workload.to_json()?;
//! assert!(document.contains("\"name\":\"billing-delegate\""));
//! # Ok::<(), orgmodel::Error>(())
//! ```

mod error;
mod types;

pub use error::{Error, Result};
pub use types::{AccountRecord, LogicalWorkload, MODEL_VERSION};

/// Root of every org-managed parameter
pub const ORG_MANAGED_PREFIX: &str = "/org-managed";

/// Parent path of all published workload descriptors
pub const WORKLOADS_PREFIX: &str = "/org-managed/logical-workloads";

/// Name of the central state bucket
pub const STATE_BUCKET_PARAM: &str = "/org-managed/infra-state-bucket-name";

/// ARN of the key that encrypts central state
pub const STATE_KMS_KEY_PARAM: &str = "/org-managed/infra-state-kms-key-arn";

/// Identifier of the management account
pub const MANAGEMENT_ACCOUNT_PARAM: &str = "/org-managed/management-account-id";

// ============================================================================
// Utility functions
// ============================================================================

/// Parameter path where a workload's descriptor is published.
pub fn workload_param_path(workload_name: &str) -> String {
    format!("{WORKLOADS_PREFIX}/{workload_name}")
}

/// Zero-pad an account identifier to the canonical 12 digits.
///
/// Identifiers can lose leading zeros on the way through numeric APIs;
/// everything that compares or publishes them goes through here first.
pub fn format_account_id(raw: &str) -> String {
    format!("{raw:0>12}")
}

// ============================================================================
// Tests
// ============================================================================
