//! Logical workloads.
//!
//! A workload is a named group of accounts across environment tiers. For
//! every account this declares the pair of roles the central
//! infrastructure repository assumes, and once all accounts have settled
//! it publishes the workload descriptor into the central account.

use anyhow::{Result, ensure};
use orgmodel::{AccountRecord, LogicalWorkload, workload_param_path};
use serde_json::Value;
use stackkit::{Output, ResourceDecl, ResourceHandle, Stack};

use crate::account::AwsAccount;
use crate::aws::types::{self, InlinePolicy};
use crate::bootstrap::CentralInfra;
use crate::config::Settings;
use crate::policy;

pub const DESCRIPTOR_DESCRIPTION: &str =
    "Hold the logical workload information so that Central Infra account can deploy various resources within them.";

/// One environment tier of a workload: the organizational unit its
/// accounts live in and the account name suffixes to create there.
#[derive(Debug, Clone, Copy)]
pub struct TierAccounts<'a> {
    pub ou: &'a ResourceHandle,
    pub name_suffixes: &'a [&'a str],
}

impl<'a> TierAccounts<'a> {
    pub fn new(ou: &'a ResourceHandle, name_suffixes: &'a [&'a str]) -> Self {
        Self { ou, name_suffixes }
    }
}

/// A declared workload and its accounts, by tier.
pub struct AwsWorkload {
    name: String,
    pub prod_accounts: Vec<AwsAccount>,
    pub staging_accounts: Vec<AwsAccount>,
    pub dev_accounts: Vec<AwsAccount>,
    /// The published descriptor JSON, resolved at apply time
    pub descriptor: Output<String>,
}

impl AwsWorkload {
    /// Declare the accounts, per-account roles, and descriptor parameter
    /// for one workload.
    pub fn declare(
        stack: &mut Stack,
        settings: &Settings,
        central: &CentralInfra,
        workload_name: &str,
        prod: Option<TierAccounts<'_>>,
        staging: Option<TierAccounts<'_>>,
        dev: Option<TierAccounts<'_>>,
        tags: &Value,
    ) -> Result<Self> {
        let prod_accounts = declare_tier(stack, settings, central, workload_name, prod, tags)?;
        let staging_accounts =
            declare_tier(stack, settings, central, workload_name, staging, tags)?;
        let dev_accounts = declare_tier(stack, settings, central, workload_name, dev, tags)?;

        let descriptor = {
            let name = workload_name.to_string();
            let records = Output::zip(
                &Output::zip(&tier_records(&prod_accounts), &tier_records(&staging_accounts)),
                &tier_records(&dev_accounts),
            );
            records.try_map(
                format!("{workload_name} workload descriptor"),
                move |((prod, staging), dev)| {
                    let mut workload = LogicalWorkload::new(name.clone());
                    workload.prod_accounts = prod;
                    workload.staging_accounts = staging;
                    workload.dev_accounts = dev;
                    workload.to_json()
                },
            )
        };

        // the descriptor only goes out once every account has settled
        let waits: Vec<_> = prod_accounts
            .iter()
            .chain(&staging_accounts)
            .chain(&dev_accounts)
            .map(AwsAccount::settled)
            .chain([central.account.settled()])
            .collect();
        stack.register(
            ResourceDecl::new(
                format!("{workload_name}-workload-info-for-central-infra"),
                types::PARAMETER,
            )
            .input("name", workload_param_path(workload_name))
            .input("description", DESCRIPTOR_DESCRIPTION)
            .input("value", descriptor.clone())
            .input("tags", tags.clone())
            .in_account(central.account.id())
            .delete_before_replace(true)
            .depends_on(waits),
        )?;

        Ok(Self {
            name: workload_name.to_string(),
            prod_accounts,
            staging_accounts,
            dev_accounts,
            descriptor,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accounts across all tiers.
    pub fn all_accounts(&self) -> impl Iterator<Item = &AwsAccount> {
        self.prod_accounts
            .iter()
            .chain(&self.staging_accounts)
            .chain(&self.dev_accounts)
    }
}

fn declare_tier(
    stack: &mut Stack,
    settings: &Settings,
    central: &CentralInfra,
    workload_name: &str,
    tier: Option<TierAccounts<'_>>,
    tags: &Value,
) -> Result<Vec<AwsAccount>> {
    let Some(tier) = tier else {
        return Ok(Vec::new());
    };
    ensure!(
        tier.name_suffixes.len() == 1,
        "Only a single account name suffix in each environment tier is supported currently, not {:?}",
        tier.name_suffixes
    );

    let mut accounts = Vec::with_capacity(tier.name_suffixes.len());
    for suffix in tier.name_suffixes {
        let account_name = format!("{workload_name}-{suffix}");
        let account = AwsAccount::declare(stack, settings, &account_name, tier.ou, tags, [])?;
        declare_central_access_roles(stack, settings, central, &account, tags)?;
        accounts.push(account);
    }
    Ok(accounts)
}

/// The deploy/preview role pair the central infrastructure repository
/// assumes inside a workload account.
fn declare_central_access_roles(
    stack: &mut Stack,
    settings: &Settings,
    central: &CentralInfra,
    account: &AwsAccount,
    tags: &Value,
) -> Result<()> {
    stack.register(
        ResourceDecl::new(
            format!("central-infra-repo-deploy-in-{}", account.name()),
            types::ROLE,
        )
        .input("name", format!("InfraDeploy--{}", settings.github_repo))
        .input("assume_role_policy_document", &central.deploy_role_trust)
        .input(
            "managed_policy_arns",
            vec![types::managed_policy_arn("AdministratorAccess")],
        )
        .input("tags", tags.clone())
        .in_account(account.id())
        .depends_on([account.settled()]),
    )?;

    let kms_policy = vec![InlinePolicy {
        name: "InfraKmsDecrypt".to_string(),
        document: policy::state_key_policy(&central.kms_key_arn),
    }];
    stack.register(
        ResourceDecl::new(
            format!("central-infra-repo-preview-in-{}", account.name()),
            types::ROLE,
        )
        .input("name", format!("InfraPreview--{}", settings.github_repo))
        .input("assume_role_policy_document", &central.preview_role_trust)
        .input(
            "managed_policy_arns",
            vec![types::managed_policy_arn("ReadOnlyAccess")],
        )
        .input("inline_policies", Output::literal(&kms_policy)?)
        .input("tags", tags.clone())
        .in_account(account.id())
        .depends_on([account.settled()]),
    )?;
    Ok(())
}

fn tier_records(accounts: &[AwsAccount]) -> Output<Vec<AccountRecord>> {
    Output::all(accounts.iter().map(AwsAccount::record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::declare_central_infra;
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

    #[test]
    fn test_one_account_and_two_roles_per_tier_suffix() {
        let mut stack = Stack::new("prod");
        let tags = tags_value("prod", "https://github.com/ejfine/aws-organization", None);
        let org_units = declare_organizational_units(&mut stack, "r-2rsw", &tags).unwrap();
        let central = declare_central_infra(
            &mut stack,
            &settings(),
            "000000000042",
            "arn:aws:kms:us-east-1:000000000042:key/1",
            &org_units,
            &tags,
        )
        .unwrap();
        let before = stack.len();

        let workload = AwsWorkload::declare(
            &mut stack,
            &settings(),
            &central,
            "biotasker",
            None,
            None,
            Some(TierAccounts::new(
                &org_units.non_qualified_workload_dev,
                &["dev"],
            )),
            &tags,
        )
        .unwrap();

        // account, barrier, two roles, descriptor parameter
        assert_eq!(stack.len() - before, 5);
        assert_eq!(workload.dev_accounts.len(), 1);
        assert!(workload.prod_accounts.is_empty());
        assert_eq!(workload.dev_accounts[0].name(), "biotasker-dev");
    }

    #[test]
    fn test_multiple_suffixes_per_tier_rejected() {
        let mut stack = Stack::new("prod");
        let tags = tags_value("prod", "https://github.com/ejfine/aws-organization", None);
        let org_units = declare_organizational_units(&mut stack, "r-2rsw", &tags).unwrap();
        let central = declare_central_infra(
            &mut stack,
            &settings(),
            "000000000042",
            "arn:aws:kms:us-east-1:000000000042:key/1",
            &org_units,
            &tags,
        )
        .unwrap();

        let result = AwsWorkload::declare(
            &mut stack,
            &settings(),
            &central,
            "elifine-com",
            Some(TierAccounts::new(
                &org_units.non_qualified_workload_prod,
                &["production", "production2"],
            )),
            None,
            None,
            &tags,
        );
        assert!(result.is_err());
    }
}
