//! IAM policy documents as typed data.
//!
//! Policies are built as structs and serialized when a provider call
//! needs the JSON string. Deferred values (a bucket name, an OIDC
//! provider ARN) flow in through `Output::map`, so a builder here never
//! blocks on resolution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const POLICY_VERSION: &str = "2012-10-17";

/// Where GitHub Actions OIDC tokens present their claims.
pub const GITHUB_OIDC_HOST: &str = "token.actions.githubusercontent.com";

/// A full IAM policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

/// One policy statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<BTreeMap<String, Vec<String>>>,
    pub action: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub resource: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<BTreeMap<String, BTreeMap<String, Vec<String>>>>,
}

impl Statement {
    fn allow(actions: &[&str]) -> Self {
        Self {
            sid: None,
            effect: "Allow".to_string(),
            principal: None,
            action: actions.iter().map(|a| (*a).to_string()).collect(),
            resource: Vec::new(),
            condition: None,
        }
    }

    fn sid(mut self, sid: &str) -> Self {
        self.sid = Some(sid.to_string());
        self
    }

    fn resources(mut self, resources: &[String]) -> Self {
        self.resource = resources.to_vec();
        self
    }

    fn principal(mut self, kind: &str, identifiers: &[String]) -> Self {
        let mut principal = BTreeMap::new();
        principal.insert(kind.to_string(), identifiers.to_vec());
        self.principal = Some(principal);
        self
    }

    fn condition(mut self, test: &str, variable: &str, values: &[String]) -> Self {
        let mut conditions = self.condition.unwrap_or_default();
        conditions
            .entry(test.to_string())
            .or_default()
            .insert(variable.to_string(), values.to_vec());
        self.condition = Some(conditions);
        self
    }
}

impl PolicyDocument {
    fn new(statements: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: statements,
        }
    }
}

// ============================================================================
// Trust policies
// ============================================================================

/// Trust policy letting one role ARN assume the attached role.
pub fn assume_role_trust(principal_arn: &str) -> PolicyDocument {
    PolicyDocument::new(vec![
        Statement::allow(&["sts:AssumeRole"])
            .principal("AWS", &[principal_arn.to_string()]),
    ])
}

/// How the `sub` claim of an OIDC token is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectMatch {
    /// Exact branch pinning for deploy roles
    Equals,
    /// Any ref in the repository for preview roles
    Like,
}

/// Trust policy for a GitHub Actions OIDC federation.
///
/// The audience is always pinned to `sts.amazonaws.com`; only the
/// subject match varies between deploy and preview.
pub fn github_oidc_trust(
    oidc_provider_arn: &str,
    subject_match: SubjectMatch,
    subject: &str,
) -> PolicyDocument {
    let sub_test = match subject_match {
        SubjectMatch::Equals => "StringEquals",
        SubjectMatch::Like => "StringLike",
    };
    PolicyDocument::new(vec![
        Statement::allow(&["sts:AssumeRoleWithWebIdentity"])
            .principal("Federated", &[oidc_provider_arn.to_string()])
            .condition(
                sub_test,
                &format!("{GITHUB_OIDC_HOST}:sub"),
                &[subject.to_string()],
            )
            .condition(
                "StringEquals",
                &format!("{GITHUB_OIDC_HOST}:aud"),
                &["sts.amazonaws.com".to_string()],
            ),
    ])
}

/// Deploy subject: only the main branch of the infrastructure repo.
pub fn deploy_subject(github_org: &str, repo: &str) -> String {
    format!("repo:{github_org}/{repo}:ref:refs/heads/main")
}

/// Preview subject: any ref of the infrastructure repo.
pub fn preview_subject(github_org: &str, repo: &str) -> String {
    format!("repo:{github_org}/{repo}:*")
}

// ============================================================================
// Inline policies
// ============================================================================

/// Decrypt access to the single state-encryption key.
///
/// Encrypt is required as well even for read-only previews; the engine
/// errors without it when touching secret values.
pub fn state_key_policy(kms_key_arn: &str) -> PolicyDocument {
    PolicyDocument::new(vec![
        Statement::allow(&["kms:Decrypt", "kms:Encrypt"])
            .resources(&[kms_key_arn.to_string()]),
    ])
}

/// Write access a preview needs against the state bucket: metadata and
/// lock files under the caller's own account prefix, and nothing else.
pub fn state_bucket_write(bucket_name: &str) -> PolicyDocument {
    PolicyDocument::new(vec![
        Statement::allow(&["s3:PutObject"])
            .sid("CreateMetadataAndLocks")
            .resources(&[format!(
                "arn:aws:s3:::{bucket_name}/${{aws:PrincipalAccount}}/*"
            )]),
        Statement::allow(&["s3:DeleteObject", "s3:DeleteObjectVersion"])
            .sid("RemoveLock")
            .resources(&[format!(
                "arn:aws:s3:::{bucket_name}/${{aws:PrincipalAccount}}/*/locks/*.json"
            )]),
    ])
}

/// Read access to a caller's own slice of the state bucket.
pub fn read_state_policy(bucket_name: &str) -> PolicyDocument {
    PolicyDocument::new(vec![
        Statement::allow(&["s3:GetObject", "s3:GetObjectVersion"]).resources(&[format!(
            "arn:aws:s3:::{bucket_name}/${{aws:PrincipalAccount}}/*"
        )]),
        Statement::allow(&["s3:ListBucket"])
            .resources(&[format!("arn:aws:s3:::{bucket_name}")])
            .condition(
                "StringLike",
                "s3:prefix",
                &["${aws:PrincipalAccount}/*".to_string()],
            ),
    ])
}

/// Manual entry of secrets under the dedicated prefix.
///
/// Listing cannot be restricted by name; the console shows nothing at
/// all when `secretsmanager:ListSecrets` is scoped down.
pub fn manual_secrets_entry_policy() -> PolicyDocument {
    PolicyDocument::new(vec![
        Statement::allow(&["secretsmanager:ListSecrets"])
            .sid("AllResources")
            .resources(&["*".to_string()]),
        Statement::allow(&[
            "secretsmanager:DescribeSecret",
            "secretsmanager:GetSecretValue",
            "secretsmanager:ListSecretVersionIds",
            "secretsmanager:PutSecretValue",
        ])
        .sid("SpecificSecrets")
        .resources(&[
            "arn:aws:secretsmanager:*:*:secret:/manually-entered-secrets/*".to_string(),
        ]),
    ])
}
