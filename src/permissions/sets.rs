use anyhow::Result;
use stackkit::{InputValue, Output, ResourceDecl, Stack};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{PermissionSet, SESSION_DURATION};
use crate::aws::types;
use crate::policy;

/// Managed policies attached to `ViewOnlyAccess`. Under the AWS limit of
/// ten attachments per permission set, with no room to spare.
pub const VIEW_ONLY_MANAGED_POLICIES: [&str; 9] = [
    "AWSSupportAccess",
    "job-function/ViewOnlyAccess",
    "CloudWatchReadOnlyAccess",
    "AmazonSSMReadOnlyAccess",
    "AWSLambda_ReadOnlyAccess",
    "AmazonEventBridgeReadOnlyAccess",
    "AmazonEC2ContainerRegistryReadOnly",
    "AWSBillingReadOnlyAccess",
    "CostOptimizationHubReadOnlyAccess",
];

/// Registry of permission sets declared on a stack.
///
/// Requesting a name twice hands back the first declaration unchanged, so
/// callers can ask for a set wherever they need it without coordinating
/// who declares it.
#[derive(Default)]
pub struct PermissionSets {
    sets: BTreeMap<String, Arc<PermissionSet>>,
}

impl PermissionSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a permission set, or return the existing one by name.
    pub fn get_or_create(
        &mut self,
        stack: &mut Stack,
        name: &str,
        description: &str,
        managed_policies: &[&str],
        inline_policy: Option<InputValue>,
    ) -> Result<Arc<PermissionSet>> {
        if let Some(existing) = self.sets.get(name) {
            return Ok(Arc::clone(existing));
        }

        let handle = stack.register(
            ResourceDecl::new(name, types::PERMISSION_SET)
                .input("name", name)
                .input("description", description)
                .input("session_duration", SESSION_DURATION),
        )?;
        let set = Arc::new(PermissionSet {
            name: name.to_string(),
            handle,
        });

        for policy_name in managed_policies {
            stack.register(
                ResourceDecl::new(
                    format!("{name}-{policy_name}"),
                    types::MANAGED_POLICY_ATTACHMENT,
                )
                .input("permission_set_arn", set.arn())
                .input("managed_policy_arn", types::managed_policy_arn(policy_name)),
            )?;
        }
        if let Some(inline_policy) = inline_policy {
            stack.register(
                ResourceDecl::new(
                    format!("{name}-inline-policy"),
                    types::PERMISSION_SET_INLINE_POLICY,
                )
                .input("permission_set_arn", set.arn())
                .input("inline_policy", inline_policy),
            )?;
        }

        self.sets.insert(name.to_string(), Arc::clone(&set));
        Ok(set)
    }
}

/// Read access broad enough to troubleshoot protected environments,
/// including the infrastructure state written to the central bucket.
pub fn view_only(
    sets: &mut PermissionSets,
    stack: &mut Stack,
    state_bucket_name: &Output<String>,
) -> Result<Arc<PermissionSet>> {
    let read_state = state_bucket_name.map(|bucket| policy::read_state_policy(&bucket));
    sets.get_or_create(
        stack,
        "ViewOnlyAccess",
        "The ability to view logs and other resource details in protected environments for troubleshooting.",
        &VIEW_ONLY_MANAGED_POLICIES,
        Some(read_state.into()),
    )
}

pub fn low_risk_admin(sets: &mut PermissionSets, stack: &mut Stack) -> Result<Arc<PermissionSet>> {
    sets.get_or_create(
        stack,
        "LowRiskAccountAdminAccess",
        "Low Risk Account Admin Access",
        &["AdministratorAccess"],
        None,
    )
}

pub fn manual_secrets_entry(
    sets: &mut PermissionSets,
    stack: &mut Stack,
) -> Result<Arc<PermissionSet>> {
    let policy = Output::literal(&policy::manual_secrets_entry_policy())?;
    sets.get_or_create(
        stack,
        "ManualSecretsEntry",
        "The ability to manually update secrets into the secrets manager.",
        &[],
        Some(policy.into()),
    )
}

pub fn management_admin(
    sets: &mut PermissionSets,
    stack: &mut Stack,
) -> Result<Arc<PermissionSet>> {
    sets.get_or_create(
        stack,
        "ManagementAccountAdminAccess",
        "Admin access within the Organization Management Account",
        &["AdministratorAccess"],
        None,
    )
}

pub fn management_view(
    sets: &mut PermissionSets,
    stack: &mut Stack,
) -> Result<Arc<PermissionSet>> {
    sets.get_or_create(
        stack,
        "ManagementAccountViewAccess",
        "View access within the Organization Management Account",
        &["ReadOnlyAccess"],
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent_by_name() {
        let mut stack = Stack::new("test");
        let mut sets = PermissionSets::new();

        let first = low_risk_admin(&mut sets, &mut stack).unwrap();
        // set plus its AdministratorAccess attachment
        assert_eq!(stack.len(), 2);

        let second = low_risk_admin(&mut sets, &mut stack).unwrap();
        assert_eq!(stack.len(), 2);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_view_only_attaches_every_managed_policy() {
        let mut stack = Stack::new("test");
        let mut sets = PermissionSets::new();
        let bucket = Output::from("central-infra-state-000000000042");

        view_only(&mut sets, &mut stack, &bucket).unwrap();
        // set + nine attachments + inline policy
        assert_eq!(stack.len(), 1 + VIEW_ONLY_MANAGED_POLICIES.len() + 1);
    }

    #[test]
    fn test_inline_policy_waits_on_nothing_when_literal() {
        let mut stack = Stack::new("test");
        let mut sets = PermissionSets::new();
        let set = manual_secrets_entry(&mut sets, &mut stack).unwrap();
        assert_eq!(set.name(), "ManualSecretsEntry");
        assert_eq!(stack.len(), 2);
    }
}
