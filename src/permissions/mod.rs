//! IAM Identity Center permission sets and account assignments.
//!
//! Permission sets are created once per name and referenced by many
//! assignments; assignments bind one user to one permission set on one
//! account. The provider resolves the SSO instance and user ids at apply
//! time, so declarations carry usernames only.

mod sets;

pub use sets::{
    PermissionSets, VIEW_ONLY_MANAGED_POLICIES, low_risk_admin, management_admin,
    management_view, manual_secrets_entry, view_only,
};

use anyhow::Result;
use stackkit::{InputValue, Output, ResourceDecl, ResourceHandle, ResourceId, Stack};

use crate::account::AwsAccount;
use crate::aws::types;
use crate::directory::{UserInfo, unique_users};
use crate::workload::AwsWorkload;

/// Session length for every permission set.
pub const SESSION_DURATION: &str = "PT12H";

/// A declared permission set.
#[derive(Debug)]
pub struct PermissionSet {
    name: String,
    handle: ResourceHandle,
}

impl PermissionSet {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The permission set ARN, known once created.
    pub fn arn(&self) -> Output<String> {
        self.handle.output("arn")
    }
}

/// The account an assignment binds to: a name for resource naming, an
/// id (literal or deferred), and what must settle first.
pub struct AssignmentTarget {
    pub name: String,
    pub id: InputValue,
    pub depends: Vec<ResourceId>,
}

impl AssignmentTarget {
    pub fn new(name: impl Into<String>, id: impl Into<InputValue>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            depends: Vec::new(),
        }
    }

    /// Target an account declared on this stack, waiting out its
    /// propagation barrier.
    pub fn for_account(account: &AwsAccount) -> Self {
        Self {
            name: account.name().to_string(),
            id: account.id().into(),
            depends: vec![account.settled()],
        }
    }
}

/// Bind each user to one permission set on one account.
///
/// The user list is collapsed to one entry per username first; an empty
/// list declares nothing.
pub fn declare_account_assignments(
    stack: &mut Stack,
    permission_set: &PermissionSet,
    target: &AssignmentTarget,
    users: &[UserInfo],
) -> Result<()> {
    for user in unique_users(users)? {
        stack.register(
            ResourceDecl::new(
                format!("{}-{}-{}", permission_set.name(), target.name, user.username),
                types::ACCOUNT_ASSIGNMENT,
            )
            .input("permission_set_arn", permission_set.arn())
            .input("principal_name", user.username.clone())
            .input("target_account_id", target.id.clone())
            .depends_on(target.depends.iter().copied()),
        )?;
    }
    Ok(())
}

/// The fixed access tiers of a workload: view-only in protected
/// environments, low-risk admin in dev.
pub fn declare_default_workload_assignments(
    stack: &mut Stack,
    view_only: &PermissionSet,
    low_risk_admin: &PermissionSet,
    workload: &AwsWorkload,
    users: &[UserInfo],
) -> Result<()> {
    for protected_env_account in workload
        .prod_accounts
        .iter()
        .chain(&workload.staging_accounts)
    {
        declare_account_assignments(
            stack,
            view_only,
            &AssignmentTarget::for_account(protected_env_account),
            users,
        )?;
    }
    for dev_account in &workload.dev_accounts {
        declare_account_assignments(
            stack,
            low_risk_admin,
            &AssignmentTarget::for_account(dev_account),
            users,
        )?;
    }
    Ok(())
}

/// Access the organization admins get to the shared service accounts.
pub fn declare_org_admin_assignments(
    stack: &mut Stack,
    view_only: &PermissionSet,
    manual_secrets: &PermissionSet,
    central_infra_prod: &AwsAccount,
    identity_center_prod: &AwsAccount,
    billing_delegate_prod: &AwsAccount,
    org_admins: &[UserInfo],
) -> Result<()> {
    let central = AssignmentTarget::for_account(central_infra_prod);
    declare_account_assignments(stack, view_only, &central, org_admins)?;
    declare_account_assignments(stack, manual_secrets, &central, org_admins)?;
    declare_account_assignments(
        stack,
        view_only,
        &AssignmentTarget::for_account(identity_center_prod),
        org_admins,
    )?;
    declare_account_assignments(
        stack,
        view_only,
        &AssignmentTarget::for_account(billing_delegate_prod),
        org_admins,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::UserInfo;
    use stackkit::{StackState, plan};

    fn plan_urns(stack: &Stack) -> Vec<String> {
        plan(stack, &StackState::new(stack.name()))
            .unwrap()
            .steps
            .into_iter()
            .map(|step| step.urn)
            .collect()
    }

    #[test]
    fn test_assignments_deduplicate_users() {
        let mut stack = Stack::new("test");
        let mut sets = PermissionSets::new();
        let view_only = sets
            .get_or_create(&mut stack, "ViewOnlyAccess", "view", &[], None)
            .unwrap();

        let users = vec![
            UserInfo::new("a.b"),
            UserInfo::new("a.b"),
            UserInfo::new("c.d"),
        ];
        let target = AssignmentTarget::new("management-account", "000000000042");
        declare_account_assignments(&mut stack, &view_only, &target, &users).unwrap();

        let urns = plan_urns(&stack);
        assert!(urns.contains(
            &"urn:aws:ssoadmin:AccountAssignment::ViewOnlyAccess-management-account-a.b"
                .to_string()
        ));
        // permission set + two unique assignments
        assert_eq!(stack.len(), 3);
    }

    #[test]
    fn test_empty_user_list_declares_nothing() {
        let mut stack = Stack::new("test");
        let mut sets = PermissionSets::new();
        let view_only = sets
            .get_or_create(&mut stack, "ViewOnlyAccess", "view", &[], None)
            .unwrap();
        let before = stack.len();

        let target = AssignmentTarget::new("management-account", "000000000042");
        declare_account_assignments(&mut stack, &view_only, &target, &[]).unwrap();
        assert_eq!(stack.len(), before);
    }
}
