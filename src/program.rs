//! The whole organization, declared in order.
//!
//! One call to [`build_program`] registers everything a run manages:
//! organizational units, the central infrastructure account, the shared
//! service workloads, the application workloads, and the Identity Center
//! permissions over all of them.

use anyhow::{Context, Result};
use stackkit::{ResourceDecl, Stack};

use crate::aws::types;
use crate::bootstrap::declare_central_infra;
use crate::config::{EnvTier, Settings};
use crate::directory::UserDirectory;
use crate::org_units::declare_organizational_units;
use crate::permissions::{self, AssignmentTarget, PermissionSets};
use crate::tags::tags_value;
use crate::workload::{AwsWorkload, TierAccounts};
use crate::workloads::declare_workloads;

/// Declare the full organization onto `stack`.
pub fn build_program(
    stack: &mut Stack,
    settings: &Settings,
    env: EnvTier,
    management_account_id: &str,
    organization_root_id: &str,
    kms_key_arn: &str,
) -> Result<()> {
    let tags = tags_value(stack.name(), &settings.git_repository_url(), None);
    let directory = UserDirectory::from_settings(settings);
    let org_admins = directory.resolve(&settings.org_admins)?;

    stack.export("aws-account-id", management_account_id);
    stack.export("env", env.as_str());

    let org_units = declare_organizational_units(stack, organization_root_id, &tags)?;

    let mut permission_sets = PermissionSets::new();
    let management_admin = permissions::management_admin(&mut permission_sets, stack)?;
    let management_view = permissions::management_view(&mut permission_sets, stack)?;
    let management_account = AssignmentTarget::new("management-account", management_account_id);
    permissions::declare_account_assignments(
        stack,
        &management_admin,
        &management_account,
        &org_admins,
    )?;
    permissions::declare_account_assignments(
        stack,
        &management_view,
        &management_account,
        &org_admins,
    )?;

    let central = declare_central_infra(
        stack,
        settings,
        management_account_id,
        kms_key_arn,
        &org_units,
        &tags,
    )?;

    let identity_center = AwsWorkload::declare(
        stack,
        settings,
        &central,
        "identity-center",
        Some(TierAccounts::new(&org_units.central_infra_prod, &["prod"])),
        None,
        None,
        &tags,
    )?;
    let identity_center_prod = identity_center
        .prod_accounts
        .first()
        .context("identity-center declares one prod account")?;
    stack.register(
        ResourceDecl::new(
            "delegate-admin-to-identity-center-prod",
            types::DELEGATED_ADMINISTRATOR,
        )
        .input("account_id", identity_center_prod.id())
        .input("service_principal", "sso.amazonaws.com")
        .depends_on([identity_center_prod.settled(), central.service_access]),
    )?;

    let billing_delegate = AwsWorkload::declare(
        stack,
        settings,
        &central,
        "billing-delegate",
        Some(TierAccounts::new(&org_units.central_infra_prod, &["prod"])),
        None,
        None,
        &tags,
    )?;
    let billing_prod = billing_delegate
        .prod_accounts
        .first()
        .context("billing-delegate declares one prod account")?;
    let enable_billing = stack.register(
        ResourceDecl::new(
            "enable-aws-service-access-for-billing",
            types::SERVICE_ACCESS,
        )
        .input("service_principal", "cost-optimization-hub.bcm.amazonaws.com")
        .depends_on([billing_prod.settled()]),
    )?;
    stack.register(
        ResourceDecl::new("delegate-billing-admin", types::DELEGATED_ADMINISTRATOR)
            .input("account_id", billing_prod.id())
            .input("service_principal", "cost-optimization-hub.bcm.amazonaws.com")
            .depends_on([billing_prod.settled(), enable_billing.id()]),
    )?;

    let workloads = declare_workloads(stack, settings, &central, &org_units, &tags)?;

    let view_only =
        permissions::view_only(&mut permission_sets, stack, &central.state_bucket_name)?;
    let manual_secrets = permissions::manual_secrets_entry(&mut permission_sets, stack)?;
    permissions::declare_org_admin_assignments(
        stack,
        &view_only,
        &manual_secrets,
        &central.account,
        identity_center_prod,
        billing_prod,
        &org_admins,
    )?;

    let low_risk_admin = permissions::low_risk_admin(&mut permission_sets, stack)?;
    for workload in &workloads {
        let users = directory.resolve(&settings.users_for_workload(workload.name()))?;
        permissions::declare_default_workload_assignments(
            stack,
            &view_only,
            &low_risk_admin,
            workload,
            &users,
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::mock::{InstantWaiter, MockOrgProvider};
    use serde_json::json;
    use stackkit::{NullSink, StackState, apply, plan};

    fn settings() -> Settings {
        toml::from_str(
            r#"
            github_org = "ejfine"
            account_email_prefix = "eli"
            account_email_domain = "example.com"
            org_admins = ["eli.fine"]

            [[users]]
            username = "eli.fine"

            [[users]]
            username = "the.dev"

            [workload_users]
            biotasker = ["the.dev"]
            "#,
        )
        .unwrap()
    }

    fn built_stack() -> Stack {
        let mut stack = Stack::new("test");
        build_program(
            &mut stack,
            &settings(),
            EnvTier::Test,
            "000000000042",
            "r-2rsw",
            "arn:aws:kms:us-east-1:000000000042:key/shared",
        )
        .unwrap();
        stack
    }

    #[test]
    fn test_program_declares_the_expected_graph() {
        let stack = built_stack();
        let urns: Vec<String> = plan(&stack, &StackState::new("test"))
            .unwrap()
            .steps
            .into_iter()
            .map(|step| step.urn)
            .collect();

        for expected in [
            "urn:aws:organizations:OrganizationalUnit::CentralInfraProd",
            "urn:aws:organizations:Account::central-infra-prod",
            "urn:aws:ssoadmin:AccountAssignment::ManagementAccountAdminAccess-management-account-eli.fine",
            "urn:aws:ssoadmin:AccountAssignment::ManagementAccountViewAccess-management-account-eli.fine",
            "urn:aws:organizations:DelegatedAdministrator::delegate-admin-to-identity-center-prod",
            "urn:aws:organizations:ServiceAccess::enable-aws-service-access-for-billing",
            "urn:aws:organizations:DelegatedAdministrator::delegate-billing-admin",
            "urn:aws:ssm:Parameter::billing-delegate-workload-info-for-central-infra",
            "urn:aws:ssoadmin:AccountAssignment::ViewOnlyAccess-billing-delegate-prod-eli.fine",
            "urn:aws:ssoadmin:AccountAssignment::ManualSecretsEntry-central-infra-prod-eli.fine",
            "urn:aws:ssoadmin:AccountAssignment::LowRiskAccountAdminAccess-biotasker-dev-the.dev",
        ] {
            assert!(urns.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_apply_publishes_the_descriptor_once_accounts_exist() {
        let stack = built_stack();
        let mut state = StackState::new("test");
        let provider = MockOrgProvider::new();

        let summary = apply(&stack, &mut state, &provider, &InstantWaiter, &NullSink)
            .await
            .unwrap();
        assert!(summary.changed());

        // accounts are created in declaration order, so billing-delegate-prod
        // is the third account the provider hands out
        let record = &state.resources
            ["urn:aws:ssm:Parameter::billing-delegate-workload-info-for-central-infra"];
        assert_eq!(
            record.inputs["value"],
            json!(
                "{\"version\":\"0.0.1\",\"name\":\"billing-delegate\",\
                 \"prod_accounts\":[{\"version\":\"0.0.1\",\"id\":\"100000000003\",\
                 \"name\":\"billing-delegate-prod\"}],\"staging_accounts\":[],\
                 \"dev_accounts\":[]}"
            )
        );
        // published into the central infra account
        assert_eq!(record.account.as_deref(), Some("100000000001"));

        assert_eq!(state.exports["aws-account-id"], json!("000000000042"));
        assert_eq!(state.exports["env"], json!("test"));
        assert_eq!(
            state.exports["billing-delegate-prod-account-id"],
            json!("100000000003")
        );
        assert_eq!(
            state.exports["central-infra-prod-role-name"],
            json!("OrganizationAccountAccessRole")
        );
    }

    #[tokio::test]
    async fn test_second_apply_changes_nothing() {
        let stack = built_stack();
        let mut state = StackState::new("test");
        let provider = MockOrgProvider::new();

        apply(&stack, &mut state, &provider, &InstantWaiter, &NullSink)
            .await
            .unwrap();
        let second = apply(&stack, &mut state, &provider, &InstantWaiter, &NullSink)
            .await
            .unwrap();

        assert!(!second.changed());
        assert_eq!(second.waited, 0);
        assert!(second.skipped_waits > 0);
    }
}
