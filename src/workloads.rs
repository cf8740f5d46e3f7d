//! The workloads this organization runs.
//!
//! Each entry here turns into accounts, access roles, and a published
//! descriptor. Adding a workload is adding one declaration to
//! [`declare_workloads`] and rerunning the stack.

use anyhow::Result;
use serde_json::Value;
use stackkit::Stack;

use crate::bootstrap::CentralInfra;
use crate::config::Settings;
use crate::org_units::OrganizationalUnits;
use crate::workload::{AwsWorkload, TierAccounts};

/// Declare every application workload.
///
/// The shared service workloads (identity-center, billing-delegate) are
/// declared by the program itself, not here.
pub fn declare_workloads(
    stack: &mut Stack,
    settings: &Settings,
    central: &CentralInfra,
    org_units: &OrganizationalUnits,
    tags: &Value,
) -> Result<Vec<AwsWorkload>> {
    let mut workloads = Vec::new();

    workloads.push(AwsWorkload::declare(
        stack,
        settings,
        central,
        "biotasker",
        None,
        None,
        Some(TierAccounts::new(&org_units.non_qualified_workload_dev, &["dev"])),
        tags,
    )?);

    workloads.push(AwsWorkload::declare(
        stack,
        settings,
        central,
        "elifine-com",
        Some(TierAccounts::new(
            &org_units.non_qualified_workload_prod,
            &["production"],
        )),
        None,
        None,
        tags,
    )?);

    if settings.configure_cloud_courier {
        workloads.push(AwsWorkload::declare(
            stack,
            settings,
            central,
            "cloud-courier",
            Some(TierAccounts::new(
                &org_units.non_qualified_workload_prod,
                &["production"],
            )),
            Some(TierAccounts::new(
                &org_units.non_qualified_workload_staging,
                &["staging"],
            )),
            Some(TierAccounts::new(
                &org_units.non_qualified_workload_dev,
                &["development"],
            )),
            tags,
        )?);
    }

    Ok(workloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::declare_central_infra;
    use crate::org_units::declare_organizational_units;
    use crate::tags::tags_value;

    fn settings(configure_cloud_courier: bool) -> Settings {
        toml::from_str(&format!(
            r#"
            github_org = "ejfine"
            account_email_prefix = "eli"
            account_email_domain = "example.com"
            configure_cloud_courier = {configure_cloud_courier}
            "#
        ))
        .unwrap()
    }

    fn declared_workload_names(configure_cloud_courier: bool) -> Vec<String> {
        let settings = settings(configure_cloud_courier);
        let mut stack = Stack::new("test");
        let tags = tags_value("test", &settings.git_repository_url(), None);
        let org_units = declare_organizational_units(&mut stack, "r-2rsw", &tags).unwrap();
        let central = declare_central_infra(
            &mut stack,
            &settings,
            "000000000042",
            "arn:aws:kms:us-east-1:000000000042:key/shared",
            &org_units,
            &tags,
        )
        .unwrap();

        declare_workloads(&mut stack, &settings, &central, &org_units, &tags)
            .unwrap()
            .iter()
            .map(|workload| workload.name().to_string())
            .collect()
    }

    #[test]
    fn test_declares_the_standing_workloads() {
        assert_eq!(declared_workload_names(false), ["biotasker", "elifine-com"]);
    }

    #[test]
    fn test_cloud_courier_is_opt_in() {
        assert_eq!(
            declared_workload_names(true),
            ["biotasker", "elifine-com", "cloud-courier"]
        );
    }
}
