use anyhow::Result;
use orgmodel::AccountRecord;
use serde_json::Value;
use stackkit::{Output, ResourceDecl, ResourceHandle, ResourceId, Stack};
use std::time::Duration;

use crate::aws::types;
use crate::config::Settings;

/// How long to wait after creating an account before touching it.
/// Waiting only one minute sometimes caused problems.
pub const ACCOUNT_PROPAGATION_DELAY: Duration = Duration::from_secs(60 * 3);

/// A member account plus the propagation barrier everything that runs
/// inside it must depend on.
#[derive(Debug)]
pub struct AwsAccount {
    name: String,
    handle: ResourceHandle,
    settled: ResourceId,
}

impl AwsAccount {
    /// Declare an account under an organizational unit.
    ///
    /// Also exports `<name>-account-id` and `<name>-role-name` on the
    /// stack. The account role name is deliberately left to the provider
    /// default; setting it explicitly caused spurious replacements on
    /// subsequent updates.
    pub fn declare(
        stack: &mut Stack,
        settings: &Settings,
        account_name: &str,
        parent_ou: &ResourceHandle,
        tags: &Value,
        account_depends_on: impl IntoIterator<Item = ResourceId>,
    ) -> Result<Self> {
        let handle = stack.register(
            ResourceDecl::new(account_name, types::ACCOUNT)
                .input("name", account_name)
                .input("email", settings.account_email(account_name))
                .input("parent_id", parent_ou.id_output())
                .input("tags", tags.clone())
                .depends_on(account_depends_on),
        )?;
        let settled = stack.barrier(
            format!("wait-after-account-create-{account_name}"),
            ACCOUNT_PROPAGATION_DELAY,
            [handle.id()],
        )?;

        stack.export(format!("{account_name}-account-id"), handle.id_output());
        stack.export(
            format!("{account_name}-role-name"),
            handle.output::<String>("role_name"),
        );

        Ok(Self {
            name: account_name.to_string(),
            handle,
            settled,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The account id, known once the provider has created the account.
    pub fn id(&self) -> Output<String> {
        self.handle.id_output()
    }

    /// The account entry as published in workload descriptors.
    pub fn record(&self) -> Output<AccountRecord> {
        let name = self.name.clone();
        self.id().map(move |id| AccountRecord::new(id, name.clone()))
    }

    /// Barrier id for everything that must wait out propagation.
    pub fn settled(&self) -> ResourceId {
        self.settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn test_declares_account_and_barrier() {
        let mut stack = Stack::new("prod");
        let tags = tags_value("prod", "https://github.com/ejfine/aws-organization", None);
        let ou = stack
            .register(ResourceDecl::new("NonQualifiedWorkloadProd", types::ORGANIZATIONAL_UNIT))
            .unwrap();
        let account = AwsAccount::declare(
            &mut stack,
            &settings(),
            "billing-delegate-prod",
            &ou,
            &tags,
            [],
        )
        .unwrap();

        // account + barrier on top of the OU
        assert_eq!(stack.len(), 3);
        assert_eq!(
            account.handle.urn(),
            "urn:aws:organizations:Account::billing-delegate-prod"
        );
        assert_ne!(account.settled(), account.handle.id());
    }

    #[test]
    fn test_record_resolves_with_account_name() {
        let mut stack = Stack::new("prod");
        let tags = tags_value("prod", "https://github.com/ejfine/aws-organization", None);
        let ou = stack
            .register(ResourceDecl::new("ou", types::ORGANIZATIONAL_UNIT))
            .unwrap();
        let account =
            AwsAccount::declare(&mut stack, &settings(), "central-infra-prod", &ou, &tags, [])
                .unwrap();

        // the record depends on the account resource itself
        assert_eq!(account.record().dependencies(), vec![account.handle.id()]);
    }
}
