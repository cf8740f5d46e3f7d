//! Central infrastructure bootstrap.
//!
//! Declares the `central-infra-prod` account and everything inside it
//! that the rest of the organization builds on: the shared state bucket,
//! the published SSM parameters, the GitHub OIDC provider, and the
//! deploy/preview roles that workload accounts federate to.

use anyhow::Result;
use orgmodel::{
    LogicalWorkload, MANAGEMENT_ACCOUNT_PARAM, STATE_BUCKET_PARAM, STATE_KMS_KEY_PARAM,
    workload_param_path,
};
use serde_json::Value;
use stackkit::{Output, ResourceDecl, ResourceId, Stack};

use crate::account::AwsAccount;
use crate::aws::types::{self, InlinePolicy};
use crate::config::Settings;
use crate::org_units::OrganizationalUnits;
use crate::policy::{self, PolicyDocument, SubjectMatch};
use crate::workload::DESCRIPTOR_DESCRIPTION;

/// Not truly a workload, but naming it like one lets it publish the same
/// descriptor every real workload publishes.
pub const CENTRAL_INFRA_WORKLOAD_NAME: &str = "central-infra";

/// GitHub's root CA thumbprint.
const GITHUB_OIDC_THUMBPRINT: &str = "6938fd4d98bab03faadb97b34396831e3780aea1";

/// Handles the rest of the program needs from the bootstrap.
pub struct CentralInfra {
    pub account: AwsAccount,
    /// Service-access enablement for account management
    pub service_access: ResourceId,
    /// Trust policy workload deploy roles grant to the central deploy role
    pub deploy_role_trust: Output<PolicyDocument>,
    /// Trust policy workload preview roles grant to the central preview role
    pub preview_role_trust: Output<PolicyDocument>,
    pub state_bucket_name: Output<String>,
    pub kms_key_arn: String,
}

pub fn declare_central_infra(
    stack: &mut Stack,
    settings: &Settings,
    management_account_id: &str,
    kms_key_arn: &str,
    org_units: &OrganizationalUnits,
    tags: &Value,
) -> Result<CentralInfra> {
    let account_name = format!("{CENTRAL_INFRA_WORKLOAD_NAME}-prod");
    let account = AwsAccount::declare(
        stack,
        settings,
        &account_name,
        &org_units.central_infra_prod,
        tags,
        [],
    )?;

    let service_access = stack
        .register(
            ResourceDecl::new("enable-aws-service-access", types::SERVICE_ACCESS)
                .input("service_principal", "account.amazonaws.com")
                .depends_on([account.settled()]),
        )?
        .id();

    let descriptor = account
        .record()
        .try_map("central-infra workload descriptor", |record| {
            let mut workload = LogicalWorkload::new(CENTRAL_INFRA_WORKLOAD_NAME);
            workload.prod_accounts.push(record);
            workload.to_json()
        });
    stack.register(
        ResourceDecl::new(
            format!("{CENTRAL_INFRA_WORKLOAD_NAME}-workload-info-for-central-infra"),
            types::PARAMETER,
        )
        .input("name", workload_param_path(CENTRAL_INFRA_WORKLOAD_NAME))
        .input("description", DESCRIPTOR_DESCRIPTION)
        .input("value", descriptor)
        .input("tags", tags.clone())
        .in_account(account.id())
        .depends_on([account.settled()]),
    )?;

    stack.register(
        ResourceDecl::new(
            format!("{CENTRAL_INFRA_WORKLOAD_NAME}-management-account-id"),
            types::PARAMETER,
        )
        .input("name", MANAGEMENT_ACCOUNT_PARAM)
        .input("description", "The AWS Account ID of the management account")
        .input("value", management_account_id)
        .input("tags", tags.clone())
        .in_account(account.id())
        .depends_on([account.settled()]),
    )?;

    // bucket names are global, qualify with the owning account id
    let bucket = stack.register(
        ResourceDecl::new("central-infra-state", types::BUCKET)
            .input(
                "bucket_name",
                account.id().map(|id| format!("central-infra-state-{id}")),
            )
            .input("tags", tags.clone())
            .in_account(account.id())
            .depends_on([account.settled()]),
    )?;
    let state_bucket_name = bucket.output::<String>("id");

    stack.register(
        ResourceDecl::new("central-infra-state-bucket-name", types::PARAMETER)
            .input("name", STATE_BUCKET_PARAM)
            .input("value", bucket.id_output())
            .input("tags", tags.clone())
            .in_account(account.id())
            .depends_on([account.settled()]),
    )?;
    stack.register(
        ResourceDecl::new("central-infra-shared-kms-key-arn", types::PARAMETER)
            .input("name", STATE_KMS_KEY_PARAM)
            .input("value", kms_key_arn)
            .input("tags", tags.clone())
            .in_account(account.id())
            .depends_on([account.settled()]),
    )?;

    let oidc = stack.register(
        ResourceDecl::new("central-infra-repo-github-oidc-provider", types::OIDC_PROVIDER)
            .input("url", format!("https://{}", policy::GITHUB_OIDC_HOST))
            .input("client_id_list", vec!["sts.amazonaws.com".to_string()])
            .input("thumbprint_list", vec![GITHUB_OIDC_THUMBPRINT.to_string()])
            .input("tags", tags.clone())
            .in_account(account.id())
            .depends_on([account.settled()]),
    )?;

    let preview_trust = {
        let subject = policy::preview_subject(&settings.github_org, &settings.github_repo);
        oidc.output::<String>("arn")
            .map(move |arn| policy::github_oidc_trust(&arn, SubjectMatch::Like, &subject))
    };
    let deploy_trust = {
        let subject = policy::deploy_subject(&settings.github_org, &settings.github_repo);
        oidc.output::<String>("arn")
            .map(move |arn| policy::github_oidc_trust(&arn, SubjectMatch::Equals, &subject))
    };

    let deploy_role = stack.register(
        ResourceDecl::new("central-infra-repo-deploy", types::ROLE)
            .input("name", format!("InfraDeploy--{}", settings.github_repo))
            .input("assume_role_policy_document", deploy_trust)
            .input(
                "managed_policy_arns",
                vec![types::managed_policy_arn("AdministratorAccess")],
            )
            .input("tags", tags.clone())
            .in_account(account.id())
            .depends_on([account.settled()]),
    )?;
    let deploy_role_trust = deploy_role
        .output::<String>("arn")
        .map(|arn| policy::assume_role_trust(&arn));

    let inline_policies = {
        let kms_key_arn = kms_key_arn.to_string();
        bucket.id_output().map(move |bucket_name| {
            vec![
                InlinePolicy {
                    name: "InfraKmsDecrypt".to_string(),
                    document: policy::state_key_policy(&kms_key_arn),
                },
                InlinePolicy {
                    name: "StateBucketWrite".to_string(),
                    document: policy::state_bucket_write(&bucket_name),
                },
            ]
        })
    };
    let preview_role = stack.register(
        ResourceDecl::new("central-infra-repo-preview", types::ROLE)
            .input("name", format!("InfraPreview--{}", settings.github_repo))
            .input("assume_role_policy_document", preview_trust)
            .input(
                "managed_policy_arns",
                vec![types::managed_policy_arn("ReadOnlyAccess")],
            )
            .input("inline_policies", inline_policies)
            .input("tags", tags.clone())
            .in_account(account.id())
            .depends_on([account.settled()]),
    )?;
    let preview_role_trust = preview_role
        .output::<String>("arn")
        .map(|arn| policy::assume_role_trust(&arn));

    Ok(CentralInfra {
        account,
        service_access,
        deploy_role_trust,
        preview_role_trust,
        state_bucket_name,
        kms_key_arn: kms_key_arn.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::org_units::declare_organizational_units;
    use crate::tags::tags_value;

    fn settings() -> Settings {
        toml::from_str(
            r#"
            github_org = "ejfine"
            account_email_prefix = "aws"
            account_email_domain = "example.com"
            "#,
        )
        .unwrap()
    }

    fn bootstrap(stack: &mut Stack) -> CentralInfra {
        let tags = tags_value("prod", "https://github.com/ejfine/aws-organization", None);
        let org_units = declare_organizational_units(stack, "r-2rsw", &tags).unwrap();
        declare_central_infra(
            stack,
            &settings(),
            "000000000042",
            "arn:aws:kms:us-east-1:000000000042:key/11111111",
            &org_units,
            &tags,
        )
        .unwrap()
    }

    #[test]
    fn test_declares_expected_resources() {
        let mut stack = Stack::new("prod");
        let central = bootstrap(&mut stack);

        // 6 OUs, account + barrier, service access, 4 parameters,
        // bucket, oidc provider, 2 roles
        assert_eq!(stack.len(), 17);
        assert_eq!(central.account.name(), "central-infra-prod");
    }

    #[test]
    fn test_workload_role_trust_derives_from_central_roles() {
        let mut stack = Stack::new("prod");
        let central = bootstrap(&mut stack);

        // each trust document depends on exactly the central role that
        // anchors it
        assert_eq!(central.deploy_role_trust.dependencies().len(), 1);
        assert_eq!(central.preview_role_trust.dependencies().len(), 1);
        assert_ne!(
            central.deploy_role_trust.dependencies(),
            central.preview_role_trust.dependencies()
        );
    }
}
