use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Environment tiers that must never be destroyed from the CLI.
pub const PROTECTED_ENVS: [&str; 4] = ["stag", "staging", "prod", "production"];

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("orgctl"))
}

/// Directory for locally persisted stack state
pub fn state_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".local").join("state").join("orgctl"))
}

/// Local state file for one stack
pub fn local_state_path(stack_name: &str) -> Result<PathBuf> {
    Ok(state_dir()?.join(format!("{stack_name}.json")))
}

// ============================================================================
// Settings
// ============================================================================

/// A user known to the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub username: String,
    #[serde(default)]
    pub exclude_from_manual_artifacts: bool,
    #[serde(default)]
    pub exclude_from_cloud_courier: bool,
}

/// Project settings, loaded from `orgctl.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Project name used in state paths
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// GitHub organization owning the infrastructure repository
    pub github_org: String,

    /// Infrastructure repository name; also used in state paths and
    /// stamped into the per-account role names
    #[serde(default = "default_project_name")]
    pub github_repo: String,

    /// Region everything is managed in
    #[serde(default = "default_region")]
    pub region: String,

    /// Organization root to hang top-level OUs off of. Discovered from
    /// the organization when absent.
    #[serde(default)]
    pub org_root_id: Option<String>,

    /// ARN of the state-encryption key. Read from the parameter store
    /// when absent; must be set here for the very first bootstrap.
    #[serde(default)]
    pub kms_key_arn: Option<String>,

    /// Bucket holding remote stack state. State stays on local disk when
    /// unset.
    #[serde(default)]
    pub state_bucket: Option<String>,

    /// Mailbox that owns every account address
    pub account_email_prefix: String,

    /// Domain for account addresses
    pub account_email_domain: String,

    /// Whether to declare the cloud-courier workload
    #[serde(default)]
    pub configure_cloud_courier: bool,

    /// Usernames granted management-account access
    #[serde(default)]
    pub org_admins: Vec<String>,

    /// The identity-store users this organization knows about
    #[serde(default)]
    pub users: Vec<UserSpec>,

    /// Usernames granted default access per workload
    #[serde(default)]
    pub workload_users: BTreeMap<String, Vec<String>>,

    /// Repository URL override for tagging
    #[serde(default)]
    git_repository_url: Option<String>,
}

fn default_project_name() -> String {
    "aws-organization".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Settings {
    /// Load settings from an explicit path, `./orgctl.toml`, or the
    /// config directory, in that order.
    pub fn load(explicit: Option<&std::path::Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let local = PathBuf::from("orgctl.toml");
                if local.exists() {
                    local
                } else {
                    config_dir()?.join("orgctl.toml")
                }
            }
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    /// Repository URL for tagging, derived from the GitHub coordinates
    /// unless overridden.
    pub fn git_repository_url(&self) -> String {
        self.git_repository_url.clone().unwrap_or_else(|| {
            format!("https://github.com/{}/{}", self.github_org, self.github_repo)
        })
    }

    /// Email address owning an account.
    pub fn account_email(&self, account_name: &str) -> String {
        format!(
            "{}+{}@{}",
            self.account_email_prefix, account_name, self.account_email_domain
        )
    }

    /// Users granted default access for one workload.
    pub fn users_for_workload(&self, workload_name: &str) -> Vec<String> {
        self.workload_users
            .get(workload_name)
            .cloned()
            .unwrap_or_default()
    }
}

// ============================================================================
// Environment tiers
// ============================================================================

/// Coarse environment classification derived from the stack name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvTier {
    Test,
    Prod,
    Modl,
    Dev,
}

impl EnvTier {
    /// Classify a stack name into its tier.
    pub fn classify(stack_name: &str) -> Self {
        let name = stack_name.to_lowercase();
        if name.starts_with("test") {
            return Self::Test;
        }
        if name.starts_with("prod") || name == "pngp" {
            return Self::Prod;
        }
        if name.starts_with("mod") || name == "mngp" {
            return Self::Modl;
        }
        Self::Dev
    }

    /// Tier name as exported and compared against the protected list.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Prod => "prod",
            Self::Modl => "modl",
            Self::Dev => "dev",
        }
    }

    /// Whether stacks in this tier refuse destroys.
    pub fn is_protected(&self) -> bool {
        PROTECTED_ENVS.contains(&self.as_str())
    }
}

/// Replace characters from git branch names that AWS resource names and
/// state paths reject.
pub fn normalize_stack_name(raw: &str) -> String {
    raw.replace('/', "-")
}

/// Object-storage URL where a stack's state lives.
pub fn backend_url(
    backend_bucket: &str,
    aws_account_id: &str,
    github_repo_name: &str,
    project_name: &str,
    bucket_region: &str,
) -> String {
    format!(
        "s3://{backend_bucket}/{aws_account_id}/{github_repo_name}/{project_name}?region={bucket_region}"
    )
}

/// Key prefix within the backend bucket for one account and project.
pub fn backend_prefix(aws_account_id: &str, github_repo_name: &str, project_name: &str) -> String {
    format!("{aws_account_id}/{github_repo_name}/{project_name}")
}
