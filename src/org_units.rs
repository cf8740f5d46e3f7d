use anyhow::Result;
use serde_json::Value;
use stackkit::{ResourceDecl, ResourceHandle, Stack};

use crate::aws::types;

/// Handles to every organizational unit the program manages.
#[derive(Debug)]
pub struct OrganizationalUnits {
    pub central_infra: ResourceHandle,
    pub central_infra_prod: ResourceHandle,
    pub non_qualified_workload: ResourceHandle,
    pub non_qualified_workload_prod: ResourceHandle,
    pub non_qualified_workload_staging: ResourceHandle,
    pub non_qualified_workload_dev: ResourceHandle,
}

/// Declare the organizational-unit tree under the organization root.
///
/// OU names are unique within a parent, so the child units replace by
/// deleting the old unit first.
pub fn declare_organizational_units(
    stack: &mut Stack,
    organization_root_id: &str,
    tags: &Value,
) -> Result<OrganizationalUnits> {
    let central_infra = stack.register(
        ResourceDecl::new("CentralizedInfrastructure", types::ORGANIZATIONAL_UNIT)
            .input("name", "CentralizedInfrastructure")
            .input("parent_id", organization_root_id)
            .input("tags", tags.clone()),
    )?;
    let central_infra_prod = stack.register(
        ResourceDecl::new("CentralInfraProd", types::ORGANIZATIONAL_UNIT)
            .input("name", "Prod")
            .input("parent_id", central_infra.id_output())
            .input("tags", tags.clone())
            .delete_before_replace(true),
    )?;

    let non_qualified_workload = stack.register(
        ResourceDecl::new("NonQualifiedWorkloads", types::ORGANIZATIONAL_UNIT)
            .input("name", "NonQualifiedWorkloads")
            .input("parent_id", organization_root_id)
            .input("tags", tags.clone()),
    )?;
    let non_qualified_workload_prod = stack.register(
        ResourceDecl::new("NonQualifiedWorkloadProd", types::ORGANIZATIONAL_UNIT)
            .input("name", "Prod")
            .input("parent_id", non_qualified_workload.id_output())
            .input("tags", tags.clone())
            .delete_before_replace(true),
    )?;
    let non_qualified_workload_dev = stack.register(
        ResourceDecl::new("NonQualifiedWorkloadDev", types::ORGANIZATIONAL_UNIT)
            .input("name", "Dev")
            .input("parent_id", non_qualified_workload.id_output())
            .input("tags", tags.clone())
            .delete_before_replace(true),
    )?;
    let non_qualified_workload_staging = stack.register(
        ResourceDecl::new("NonQualifiedWorkloadStaging", types::ORGANIZATIONAL_UNIT)
            .input("name", "Staging")
            .input("parent_id", non_qualified_workload.id_output())
            .input("tags", tags.clone())
            .delete_before_replace(true),
    )?;

    Ok(OrganizationalUnits {
        central_infra,
        central_infra_prod,
        non_qualified_workload,
        non_qualified_workload_prod,
        non_qualified_workload_staging,
        non_qualified_workload_dev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::tags_value;

    #[test]
    fn test_declares_six_units() {
        let mut stack = Stack::new("test");
        let tags = tags_value("test", "https://github.com/ejfine/aws-organization", None);
        let units = declare_organizational_units(&mut stack, "r-2rsw", &tags).unwrap();

        assert_eq!(stack.len(), 6);
        assert_eq!(
            units.central_infra_prod.urn(),
            "urn:aws:organizations:OrganizationalUnit::CentralInfraProd"
        );
        assert_eq!(
            units.non_qualified_workload_staging.urn(),
            "urn:aws:organizations:OrganizationalUnit::NonQualifiedWorkloadStaging"
        );
    }
}
