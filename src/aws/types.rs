//! Type tokens and input shapes shared between resource declarations and
//! the provider.
//!
//! Declarations set inputs by name; the provider deserializes the
//! resolved input map back into these structs before calling the SDK.
//! Keeping both sides on one schema is what makes the diffing in state
//! meaningful.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::policy::PolicyDocument;

// ============================================================================
// Type tokens
// ============================================================================

pub const ORGANIZATIONAL_UNIT: &str = "aws:organizations:OrganizationalUnit";
pub const ACCOUNT: &str = "aws:organizations:Account";
pub const SERVICE_ACCESS: &str = "aws:organizations:ServiceAccess";
pub const DELEGATED_ADMINISTRATOR: &str = "aws:organizations:DelegatedAdministrator";
pub const BUCKET: &str = "aws:s3:Bucket";
pub const PARAMETER: &str = "aws:ssm:Parameter";
pub const OIDC_PROVIDER: &str = "aws:iam:OidcProvider";
pub const ROLE: &str = "aws:iam:Role";
pub const PERMISSION_SET: &str = "aws:ssoadmin:PermissionSet";
pub const MANAGED_POLICY_ATTACHMENT: &str = "aws:ssoadmin:ManagedPolicyAttachment";
pub const PERMISSION_SET_INLINE_POLICY: &str = "aws:ssoadmin:PermissionSetInlinePolicy";
pub const ACCOUNT_ASSIGNMENT: &str = "aws:ssoadmin:AccountAssignment";

/// Role the organization provisions into every member account, assumable
/// from the management account.
pub const ORGANIZATION_ACCESS_ROLE: &str = "OrganizationAccountAccessRole";

// ============================================================================
// Input shapes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OrganizationalUnitInputs {
    pub name: String,
    pub parent_id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct AccountInputs {
    pub name: String,
    pub email: String,
    pub parent_id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceAccessInputs {
    pub service_principal: String,
}

#[derive(Debug, Deserialize)]
pub struct DelegatedAdministratorInputs {
    pub account_id: String,
    pub service_principal: String,
}

#[derive(Debug, Deserialize)]
pub struct BucketInputs {
    pub bucket_name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ParameterInputs {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct OidcProviderInputs {
    pub url: String,
    pub client_id_list: Vec<String>,
    pub thumbprint_list: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// One inline policy attached directly to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlinePolicy {
    pub name: String,
    pub document: PolicyDocument,
}

#[derive(Debug, Deserialize)]
pub struct RoleInputs {
    pub name: String,
    pub assume_role_policy_document: PolicyDocument,
    #[serde(default)]
    pub managed_policy_arns: Vec<String>,
    #[serde(default)]
    pub inline_policies: Vec<InlinePolicy>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct PermissionSetInputs {
    pub name: String,
    pub description: String,
    pub session_duration: String,
}

#[derive(Debug, Deserialize)]
pub struct ManagedPolicyAttachmentInputs {
    pub permission_set_arn: String,
    pub managed_policy_arn: String,
}

#[derive(Debug, Deserialize)]
pub struct PermissionSetInlinePolicyInputs {
    pub permission_set_arn: String,
    pub inline_policy: PolicyDocument,
}

#[derive(Debug, Deserialize)]
pub struct AccountAssignmentInputs {
    pub permission_set_arn: String,
    pub principal_name: String,
    pub target_account_id: String,
}

/// Prefix for AWS managed-policy names, e.g. `AdministratorAccess` or
/// `job-function/ViewOnlyAccess`.
pub fn managed_policy_arn(name: &str) -> String {
    format!("arn:aws:iam::aws:policy/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inputs_roundtrip_from_declaration_map() {
        let resolved = json!({
            "name": "Prod",
            "parent_id": "ou-2rsw-abcd1234",
            "tags": {"managed-by": "orgctl"},
        });
        let inputs: OrganizationalUnitInputs = serde_json::from_value(resolved).unwrap();
        assert_eq!(inputs.name, "Prod");
        assert_eq!(inputs.parent_id, "ou-2rsw-abcd1234");
        assert_eq!(inputs.tags["managed-by"], "orgctl");
    }

    #[test]
    fn test_optional_fields_default() {
        let inputs: RoleInputs = serde_json::from_value(json!({
            "name": "InfraDeploy--aws-organization",
            "assume_role_policy_document": {"Version": "2012-10-17", "Statement": []},
        }))
        .unwrap();
        assert!(inputs.managed_policy_arns.is_empty());
        assert!(inputs.inline_policies.is_empty());
        assert!(inputs.description.is_none());
    }

    #[test]
    fn test_managed_policy_arn() {
        assert_eq!(
            managed_policy_arn("job-function/ViewOnlyAccess"),
            "arn:aws:iam::aws:policy/job-function/ViewOnlyAccess"
        );
    }
}
