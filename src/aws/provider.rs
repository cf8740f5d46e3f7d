//! The real provider: SDK calls per resource type.
//!
//! Runs with management-account credentials. Resources declared
//! `in_account` get a client built from short-lived credentials for the
//! organization access role in that account; everything else uses the
//! ambient configuration.
//!
//! Identity Center operations discover the SSO instance on first use and
//! cache it, along with the identity-store id user lookups go through.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_organizations::error::DisplayErrorContext;
use serde::de::DeserializeOwned;
use serde_json::Value;
use stackkit::{
    CreateRequest, CreatedResource, DeleteRequest, Error, ResourceProvider, Result, UpdateRequest,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::aws::types::{
    self, AccountAssignmentInputs, AccountInputs, BucketInputs, DelegatedAdministratorInputs,
    ManagedPolicyAttachmentInputs, OidcProviderInputs, OrganizationalUnitInputs, ParameterInputs,
    PermissionSetInlinePolicyInputs, PermissionSetInputs, RoleInputs, ServiceAccessInputs,
};

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The Identity Center instance everything SSO-related runs against.
#[derive(Debug, Clone)]
struct SsoInstance {
    instance_arn: String,
    identity_store_id: String,
}

pub struct AwsOrgProvider {
    config: SdkConfig,
    region: String,
    management_account_id: String,
    assumed: Mutex<BTreeMap<String, SdkConfig>>,
    sso: Mutex<Option<SsoInstance>>,
}

impl AwsOrgProvider {
    pub fn new(config: SdkConfig, region: impl Into<String>, management_account_id: impl Into<String>) -> Self {
        Self {
            config,
            region: region.into(),
            management_account_id: management_account_id.into(),
            assumed: Mutex::new(BTreeMap::new()),
            sso: Mutex::new(None),
        }
    }

    /// Configuration for `account`, assuming the organization access role
    /// when it is not the management account.
    async fn config_for(&self, urn: &str, account: Option<&str>) -> Result<SdkConfig> {
        let Some(account) = account else {
            return Ok(self.config.clone());
        };
        if account == self.management_account_id {
            return Ok(self.config.clone());
        }
        if let Some(cached) = self
            .assumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(account)
        {
            return Ok(cached.clone());
        }

        let role_arn = format!(
            "arn:aws:iam::{account}:role/{}",
            types::ORGANIZATION_ACCESS_ROLE
        );
        log::debug!("assuming {role_arn}");
        let sts = aws_sdk_sts::Client::new(&self.config);
        let assumed = sts
            .assume_role()
            .role_arn(&role_arn)
            .role_session_name("orgctl")
            .send()
            .await
            .map_err(|err| sdk_error(urn, err))?;
        let credentials = assumed
            .credentials()
            .ok_or_else(|| Error::lookup(role_arn.clone(), "no credentials in assume-role response"))?;

        let provider = aws_sdk_sts::config::Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            Some(credentials.session_token().to_string()),
            None,
            "orgctl-assume-role",
        );
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(provider)
            .load()
            .await;
        self.assumed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(account.to_string(), config.clone());
        Ok(config)
    }

    async fn sso_instance(&self) -> Result<SsoInstance> {
        if let Some(found) = self.sso.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Ok(found);
        }

        let client = aws_sdk_ssoadmin::Client::new(&self.config);
        let instances = client
            .list_instances()
            .send()
            .await
            .map_err(|err| {
                Error::lookup(
                    "IAM Identity Center instance",
                    format!("{}", DisplayErrorContext(err)),
                )
            })?;
        let instance = instances
            .instances()
            .first()
            .ok_or_else(|| Error::lookup("IAM Identity Center instance", "none configured"))?;
        let found = SsoInstance {
            instance_arn: instance
                .instance_arn()
                .ok_or_else(|| Error::lookup("IAM Identity Center instance", "instance has no ARN"))?
                .to_string(),
            identity_store_id: instance
                .identity_store_id()
                .ok_or_else(|| {
                    Error::lookup("IAM Identity Center instance", "instance has no identity store")
                })?
                .to_string(),
        };
        *self.sso.lock().unwrap_or_else(PoisonError::into_inner) = Some(found.clone());
        Ok(found)
    }

    /// Resolve a username to its identity-store user id. A missing user is
    /// fatal: every assignment names a user that must already exist.
    async fn lookup_user_id(&self, username: &str) -> Result<String> {
        let what = format!("identity-store user '{username}'");
        let sso = self.sso_instance().await?;
        let client = aws_sdk_identitystore::Client::new(&self.config);
        let filter = aws_sdk_identitystore::types::Filter::builder()
            .attribute_path("UserName")
            .attribute_value(username)
            .build()
            .map_err(|err| Error::lookup(what.clone(), format!("{}", DisplayErrorContext(err))))?;
        let users = client
            .list_users()
            .identity_store_id(&sso.identity_store_id)
            .filters(filter)
            .send()
            .await
            .map_err(|err| Error::lookup(what.clone(), format!("{}", DisplayErrorContext(err))))?;
        let user = users
            .users()
            .first()
            .ok_or_else(|| Error::lookup(what.clone(), "no such user"))?;
        Ok(user.user_id().to_string())
    }

    // ========================================================================
    // Organizations
    // ========================================================================

    async fn create_organizational_unit(
        &self,
        request: &CreateRequest,
    ) -> Result<CreatedResource> {
        let inputs: OrganizationalUnitInputs = parse_inputs(request)?;
        let client = aws_sdk_organizations::Client::new(&self.config);
        let created = client
            .create_organizational_unit()
            .parent_id(&inputs.parent_id)
            .name(&inputs.name)
            .set_tags(Some(org_tags(&request.urn, &inputs.tags)?))
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        let id = created
            .organizational_unit()
            .and_then(|unit| unit.id())
            .ok_or_else(|| Error::provider(&request.urn, "response carried no unit id"))?;
        Ok(CreatedResource::with_id(id))
    }

    /// Create an account and wait for the request to finish, then move it
    /// under its parent. New accounts always land under the root.
    async fn create_account(&self, request: &CreateRequest) -> Result<CreatedResource> {
        let inputs: AccountInputs = parse_inputs(request)?;
        let client = aws_sdk_organizations::Client::new(&self.config);
        let started = client
            .create_account()
            .email(&inputs.email)
            .account_name(&inputs.name)
            .set_tags(Some(org_tags(&request.urn, &inputs.tags)?))
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        let status_id = started
            .create_account_status()
            .and_then(|status| status.id())
            .ok_or_else(|| Error::provider(&request.urn, "create-account request has no id"))?
            .to_string();

        let account_id = loop {
            let polled = client
                .describe_create_account_status()
                .create_account_request_id(&status_id)
                .send()
                .await
                .map_err(|err| sdk_error(&request.urn, err))?;
            let status = polled
                .create_account_status()
                .ok_or_else(|| Error::provider(&request.urn, "create-account status vanished"))?;
            match status.state().map(|state| state.as_str()) {
                Some("SUCCEEDED") => {
                    break status
                        .account_id()
                        .ok_or_else(|| {
                            Error::provider(&request.urn, "succeeded without an account id")
                        })?
                        .to_string();
                }
                Some("FAILED") => {
                    let reason = status
                        .failure_reason()
                        .map(|reason| reason.as_str().to_string())
                        .unwrap_or_else(|| "unknown failure".to_string());
                    return Err(Error::provider(
                        &request.urn,
                        format!("account creation failed: {reason}"),
                    ));
                }
                _ => tokio::time::sleep(POLL_INTERVAL).await,
            }
        };

        self.move_account(&request.urn, &client, &account_id, &inputs.parent_id)
            .await?;

        let mut created = CreatedResource::with_id(account_id);
        created.outputs.insert(
            "role_name".to_string(),
            Value::String(types::ORGANIZATION_ACCESS_ROLE.to_string()),
        );
        Ok(created)
    }

    async fn move_account(
        &self,
        urn: &str,
        client: &aws_sdk_organizations::Client,
        account_id: &str,
        parent_id: &str,
    ) -> Result<()> {
        let parents = client
            .list_parents()
            .child_id(account_id)
            .send()
            .await
            .map_err(|err| sdk_error(urn, err))?;
        let current = parents
            .parents()
            .first()
            .and_then(|parent| parent.id())
            .ok_or_else(|| Error::provider(urn, "account has no parent"))?;
        if current == parent_id {
            return Ok(());
        }
        client
            .move_account()
            .account_id(account_id)
            .source_parent_id(current)
            .destination_parent_id(parent_id)
            .send()
            .await
            .map_err(|err| sdk_error(urn, err))?;
        Ok(())
    }

    // ========================================================================
    // S3, SSM, IAM
    // ========================================================================

    async fn create_bucket(&self, request: &CreateRequest) -> Result<CreatedResource> {
        let inputs: BucketInputs = parse_inputs(request)?;
        let config = self
            .config_for(&request.urn, request.target_account.as_deref())
            .await?;
        let client = aws_sdk_s3::Client::new(&config);

        let mut create = client.create_bucket().bucket(&inputs.bucket_name);
        if self.region != "us-east-1" {
            let constraint =
                aws_sdk_s3::types::BucketLocationConstraint::from(self.region.as_str());
            create = create.create_bucket_configuration(
                aws_sdk_s3::types::CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build(),
            );
        }
        create
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        self.put_bucket_tags(&request.urn, &client, &inputs).await?;
        Ok(CreatedResource::with_id(inputs.bucket_name))
    }

    async fn put_bucket_tags(
        &self,
        urn: &str,
        client: &aws_sdk_s3::Client,
        inputs: &BucketInputs,
    ) -> Result<()> {
        if inputs.tags.is_empty() {
            return Ok(());
        }
        let tag_set: Vec<aws_sdk_s3::types::Tag> = inputs
            .tags
            .iter()
            .map(|(key, value)| {
                aws_sdk_s3::types::Tag::builder()
                    .key(key)
                    .value(value)
                    .build()
                    .map_err(|err| sdk_error(urn, err))
            })
            .collect::<Result<_>>()?;
        let tagging = aws_sdk_s3::types::Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|err| sdk_error(urn, err))?;
        client
            .put_bucket_tagging()
            .bucket(&inputs.bucket_name)
            .tagging(tagging)
            .send()
            .await
            .map_err(|err| sdk_error(urn, err))?;
        Ok(())
    }

    async fn put_parameter(
        &self,
        request: &CreateRequest,
        overwrite: bool,
    ) -> Result<CreatedResource> {
        let inputs: ParameterInputs = parse_inputs(request)?;
        let config = self
            .config_for(&request.urn, request.target_account.as_deref())
            .await?;
        let client = aws_sdk_ssm::Client::new(&config);

        let mut put = client
            .put_parameter()
            .name(&inputs.name)
            .value(&inputs.value)
            .r#type(aws_sdk_ssm::types::ParameterType::String)
            .set_description(inputs.description.clone());
        if overwrite {
            // the API rejects tags combined with overwrite
            put = put.overwrite(true);
        } else {
            put = put.set_tags(Some(ssm_tags(&request.urn, &inputs.tags)?));
        }
        put.send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        Ok(CreatedResource::with_id(inputs.name))
    }

    async fn create_oidc_provider(&self, request: &CreateRequest) -> Result<CreatedResource> {
        let inputs: OidcProviderInputs = parse_inputs(request)?;
        let config = self
            .config_for(&request.urn, request.target_account.as_deref())
            .await?;
        let client = aws_sdk_iam::Client::new(&config);

        let mut create = client.create_open_id_connect_provider().url(&inputs.url);
        for client_id in &inputs.client_id_list {
            create = create.client_id_list(client_id);
        }
        for thumbprint in &inputs.thumbprint_list {
            create = create.thumbprint_list(thumbprint);
        }
        let created = create
            .set_tags(Some(iam_tags(&request.urn, &inputs.tags)?))
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        let arn = created
            .open_id_connect_provider_arn()
            .ok_or_else(|| Error::provider(&request.urn, "response carried no provider ARN"))?
            .to_string();

        let mut created = CreatedResource::with_id(arn.clone());
        created.outputs.insert("arn".to_string(), Value::String(arn));
        Ok(created)
    }

    async fn create_role(&self, request: &CreateRequest) -> Result<CreatedResource> {
        let inputs: RoleInputs = parse_inputs(request)?;
        let config = self
            .config_for(&request.urn, request.target_account.as_deref())
            .await?;
        let client = aws_sdk_iam::Client::new(&config);

        let trust = policy_json(&request.urn, &inputs.assume_role_policy_document)?;
        let created = client
            .create_role()
            .role_name(&inputs.name)
            .assume_role_policy_document(trust)
            .set_description(inputs.description.clone())
            .set_tags(Some(iam_tags(&request.urn, &inputs.tags)?))
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        let arn = created
            .role()
            .map(|role| role.arn().to_string())
            .ok_or_else(|| Error::provider(&request.urn, "response carried no role"))?;

        for policy_arn in &inputs.managed_policy_arns {
            client
                .attach_role_policy()
                .role_name(&inputs.name)
                .policy_arn(policy_arn)
                .send()
                .await
                .map_err(|err| sdk_error(&request.urn, err))?;
        }
        for inline in &inputs.inline_policies {
            client
                .put_role_policy()
                .role_name(&inputs.name)
                .policy_name(&inline.name)
                .policy_document(policy_json(&request.urn, &inline.document)?)
                .send()
                .await
                .map_err(|err| sdk_error(&request.urn, err))?;
        }

        let mut created = CreatedResource::with_id(inputs.name);
        created.outputs.insert("arn".to_string(), Value::String(arn));
        Ok(created)
    }

    /// Reconcile an existing role: trust policy and inline policies are
    /// rewritten, managed attachments are diffed.
    async fn update_role(&self, request: &UpdateRequest) -> Result<CreatedResource> {
        let inputs: RoleInputs = parse_update_inputs(request)?;
        let config = self
            .config_for(&request.urn, request.target_account.as_deref())
            .await?;
        let client = aws_sdk_iam::Client::new(&config);

        client
            .update_assume_role_policy()
            .role_name(&inputs.name)
            .policy_document(policy_json(&request.urn, &inputs.assume_role_policy_document)?)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;

        let attached = client
            .list_attached_role_policies()
            .role_name(&inputs.name)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        let current: Vec<String> = attached
            .attached_policies()
            .iter()
            .filter_map(|policy| policy.policy_arn().map(str::to_string))
            .collect();
        for policy_arn in &inputs.managed_policy_arns {
            if !current.contains(policy_arn) {
                client
                    .attach_role_policy()
                    .role_name(&inputs.name)
                    .policy_arn(policy_arn)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
            }
        }
        for policy_arn in &current {
            if !inputs.managed_policy_arns.contains(policy_arn) {
                client
                    .detach_role_policy()
                    .role_name(&inputs.name)
                    .policy_arn(policy_arn)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
            }
        }

        let inline_names: Vec<&str> = inputs
            .inline_policies
            .iter()
            .map(|inline| inline.name.as_str())
            .collect();
        let existing = client
            .list_role_policies()
            .role_name(&inputs.name)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        for stale in existing
            .policy_names()
            .iter()
            .filter(|name| !inline_names.contains(&name.as_str()))
        {
            client
                .delete_role_policy()
                .role_name(&inputs.name)
                .policy_name(stale)
                .send()
                .await
                .map_err(|err| sdk_error(&request.urn, err))?;
        }
        for inline in &inputs.inline_policies {
            client
                .put_role_policy()
                .role_name(&inputs.name)
                .policy_name(&inline.name)
                .policy_document(policy_json(&request.urn, &inline.document)?)
                .send()
                .await
                .map_err(|err| sdk_error(&request.urn, err))?;
        }

        let role = client
            .get_role()
            .role_name(&inputs.name)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        let arn = role
            .role()
            .map(|role| role.arn().to_string())
            .ok_or_else(|| Error::provider(&request.urn, "role vanished during update"))?;

        let mut created = CreatedResource::with_id(inputs.name);
        created.outputs.insert("arn".to_string(), Value::String(arn));
        Ok(created)
    }

    async fn delete_role(&self, request: &DeleteRequest) -> Result<()> {
        let config = self
            .config_for(&request.urn, request.target_account.as_deref())
            .await?;
        let client = aws_sdk_iam::Client::new(&config);
        let role_name = &request.id;

        let attached = client
            .list_attached_role_policies()
            .role_name(role_name)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        for policy in attached.attached_policies() {
            if let Some(policy_arn) = policy.policy_arn() {
                client
                    .detach_role_policy()
                    .role_name(role_name)
                    .policy_arn(policy_arn)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
            }
        }
        let inline = client
            .list_role_policies()
            .role_name(role_name)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        for policy_name in inline.policy_names() {
            client
                .delete_role_policy()
                .role_name(role_name)
                .policy_name(policy_name)
                .send()
                .await
                .map_err(|err| sdk_error(&request.urn, err))?;
        }
        client
            .delete_role()
            .role_name(role_name)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        Ok(())
    }

    // ========================================================================
    // Identity Center
    // ========================================================================

    async fn create_permission_set(&self, request: &CreateRequest) -> Result<CreatedResource> {
        let inputs: PermissionSetInputs = parse_inputs(request)?;
        let sso = self.sso_instance().await?;
        let client = aws_sdk_ssoadmin::Client::new(&self.config);
        let created = client
            .create_permission_set()
            .instance_arn(&sso.instance_arn)
            .name(&inputs.name)
            .description(&inputs.description)
            .session_duration(&inputs.session_duration)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        let arn = created
            .permission_set()
            .and_then(|set| set.permission_set_arn())
            .ok_or_else(|| Error::provider(&request.urn, "response carried no permission set ARN"))?
            .to_string();

        let mut created = CreatedResource::with_id(arn.clone());
        created.outputs.insert("arn".to_string(), Value::String(arn));
        Ok(created)
    }

    async fn update_permission_set(&self, request: &UpdateRequest) -> Result<CreatedResource> {
        let inputs: PermissionSetInputs = parse_update_inputs(request)?;
        let sso = self.sso_instance().await?;
        let client = aws_sdk_ssoadmin::Client::new(&self.config);
        client
            .update_permission_set()
            .instance_arn(&sso.instance_arn)
            .permission_set_arn(&request.previous.id)
            .description(&inputs.description)
            .session_duration(&inputs.session_duration)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        self.provision_permission_set(&request.urn, &sso, &request.previous.id)
            .await?;

        let mut created = CreatedResource::with_id(request.previous.id.clone());
        created.outputs.insert(
            "arn".to_string(),
            Value::String(request.previous.id.clone()),
        );
        Ok(created)
    }

    async fn attach_managed_policy(&self, request: &CreateRequest) -> Result<CreatedResource> {
        let inputs: ManagedPolicyAttachmentInputs = parse_inputs(request)?;
        let sso = self.sso_instance().await?;
        let client = aws_sdk_ssoadmin::Client::new(&self.config);
        client
            .attach_managed_policy_to_permission_set()
            .instance_arn(&sso.instance_arn)
            .permission_set_arn(&inputs.permission_set_arn)
            .managed_policy_arn(&inputs.managed_policy_arn)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        self.provision_permission_set(&request.urn, &sso, &inputs.permission_set_arn)
            .await?;
        Ok(CreatedResource::with_id(format!(
            "{}/{}",
            inputs.permission_set_arn, inputs.managed_policy_arn
        )))
    }

    async fn put_inline_policy(&self, request: &CreateRequest) -> Result<CreatedResource> {
        let inputs: PermissionSetInlinePolicyInputs = parse_inputs(request)?;
        let sso = self.sso_instance().await?;
        let client = aws_sdk_ssoadmin::Client::new(&self.config);
        client
            .put_inline_policy_to_permission_set()
            .instance_arn(&sso.instance_arn)
            .permission_set_arn(&inputs.permission_set_arn)
            .inline_policy(policy_json(&request.urn, &inputs.inline_policy)?)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;
        self.provision_permission_set(&request.urn, &sso, &inputs.permission_set_arn)
            .await?;
        Ok(CreatedResource::with_id(format!(
            "{}/inline",
            inputs.permission_set_arn
        )))
    }

    /// Push permission set changes out to every account it is already
    /// assigned in.
    async fn provision_permission_set(
        &self,
        urn: &str,
        sso: &SsoInstance,
        permission_set_arn: &str,
    ) -> Result<()> {
        let client = aws_sdk_ssoadmin::Client::new(&self.config);
        let started = client
            .provision_permission_set()
            .instance_arn(&sso.instance_arn)
            .permission_set_arn(permission_set_arn)
            .target_type(aws_sdk_ssoadmin::types::ProvisionTargetType::AllProvisionedAccounts)
            .send()
            .await
            .map_err(|err| sdk_error(urn, err))?;
        let Some(request_id) = started
            .permission_set_provisioning_status()
            .and_then(|status| status.request_id())
            .map(str::to_string)
        else {
            return Ok(());
        };

        loop {
            let polled = client
                .describe_permission_set_provisioning_status()
                .instance_arn(&sso.instance_arn)
                .provision_permission_set_request_id(&request_id)
                .send()
                .await
                .map_err(|err| sdk_error(urn, err))?;
            match provisioning_state(polled.permission_set_provisioning_status().and_then(|s| s.status())) {
                PollState::Done => return Ok(()),
                PollState::Failed(reason) => {
                    return Err(Error::provider(urn, format!("provisioning failed: {reason}")));
                }
                PollState::InProgress => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    async fn create_account_assignment(&self, request: &CreateRequest) -> Result<CreatedResource> {
        let inputs: AccountAssignmentInputs = parse_inputs(request)?;
        let sso = self.sso_instance().await?;
        let principal_id = self.lookup_user_id(&inputs.principal_name).await?;
        let client = aws_sdk_ssoadmin::Client::new(&self.config);
        let started = client
            .create_account_assignment()
            .instance_arn(&sso.instance_arn)
            .permission_set_arn(&inputs.permission_set_arn)
            .principal_type(aws_sdk_ssoadmin::types::PrincipalType::User)
            .principal_id(&principal_id)
            .target_type(aws_sdk_ssoadmin::types::TargetType::AwsAccount)
            .target_id(&inputs.target_account_id)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;

        if let Some(request_id) = started
            .account_assignment_creation_status()
            .and_then(|status| status.request_id())
            .map(str::to_string)
        {
            loop {
                let polled = client
                    .describe_account_assignment_creation_status()
                    .instance_arn(&sso.instance_arn)
                    .account_assignment_creation_request_id(&request_id)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                match assignment_state(polled.account_assignment_creation_status()) {
                    PollState::Done => break,
                    PollState::Failed(reason) => {
                        return Err(Error::provider(
                            &request.urn,
                            format!("assignment failed: {reason}"),
                        ));
                    }
                    PollState::InProgress => tokio::time::sleep(POLL_INTERVAL).await,
                }
            }
        }

        Ok(CreatedResource::with_id(format!(
            "{}/{}/{}",
            inputs.permission_set_arn, inputs.target_account_id, inputs.principal_name
        )))
    }

    async fn delete_account_assignment(&self, request: &DeleteRequest) -> Result<()> {
        let inputs: AccountAssignmentInputs = parse_value(&request.urn, request.inputs.clone())?;
        let sso = self.sso_instance().await?;
        let principal_id = self.lookup_user_id(&inputs.principal_name).await?;
        let client = aws_sdk_ssoadmin::Client::new(&self.config);
        let started = client
            .delete_account_assignment()
            .instance_arn(&sso.instance_arn)
            .permission_set_arn(&inputs.permission_set_arn)
            .principal_type(aws_sdk_ssoadmin::types::PrincipalType::User)
            .principal_id(&principal_id)
            .target_type(aws_sdk_ssoadmin::types::TargetType::AwsAccount)
            .target_id(&inputs.target_account_id)
            .send()
            .await
            .map_err(|err| sdk_error(&request.urn, err))?;

        if let Some(request_id) = started
            .account_assignment_deletion_status()
            .and_then(|status| status.request_id())
            .map(str::to_string)
        {
            loop {
                let polled = client
                    .describe_account_assignment_deletion_status()
                    .instance_arn(&sso.instance_arn)
                    .account_assignment_deletion_request_id(&request_id)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                match assignment_state(polled.account_assignment_deletion_status()) {
                    PollState::Done => break,
                    PollState::Failed(reason) => {
                        return Err(Error::provider(
                            &request.urn,
                            format!("assignment deletion failed: {reason}"),
                        ));
                    }
                    PollState::InProgress => tokio::time::sleep(POLL_INTERVAL).await,
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceProvider for AwsOrgProvider {
    async fn create(&self, request: CreateRequest) -> Result<CreatedResource> {
        match request.type_token.as_str() {
            types::ORGANIZATIONAL_UNIT => self.create_organizational_unit(&request).await,
            types::ACCOUNT => self.create_account(&request).await,
            types::SERVICE_ACCESS => {
                let inputs: ServiceAccessInputs = parse_inputs(&request)?;
                let client = aws_sdk_organizations::Client::new(&self.config);
                client
                    .enable_aws_service_access()
                    .service_principal(&inputs.service_principal)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                Ok(CreatedResource::with_id(inputs.service_principal))
            }
            types::DELEGATED_ADMINISTRATOR => {
                let inputs: DelegatedAdministratorInputs = parse_inputs(&request)?;
                let client = aws_sdk_organizations::Client::new(&self.config);
                client
                    .register_delegated_administrator()
                    .account_id(&inputs.account_id)
                    .service_principal(&inputs.service_principal)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                Ok(CreatedResource::with_id(format!(
                    "{}/{}",
                    inputs.account_id, inputs.service_principal
                )))
            }
            types::BUCKET => self.create_bucket(&request).await,
            types::PARAMETER => self.put_parameter(&request, false).await,
            types::OIDC_PROVIDER => self.create_oidc_provider(&request).await,
            types::ROLE => self.create_role(&request).await,
            types::PERMISSION_SET => self.create_permission_set(&request).await,
            types::MANAGED_POLICY_ATTACHMENT => self.attach_managed_policy(&request).await,
            types::PERMISSION_SET_INLINE_POLICY => self.put_inline_policy(&request).await,
            types::ACCOUNT_ASSIGNMENT => self.create_account_assignment(&request).await,
            other => Err(Error::provider(
                &request.urn,
                format!("unknown resource type '{other}'"),
            )),
        }
    }

    async fn update(&self, request: UpdateRequest) -> Result<CreatedResource> {
        match request.type_token.as_str() {
            types::ORGANIZATIONAL_UNIT => {
                let inputs: OrganizationalUnitInputs = parse_update_inputs(&request)?;
                let client = aws_sdk_organizations::Client::new(&self.config);
                client
                    .update_organizational_unit()
                    .organizational_unit_id(&request.previous.id)
                    .name(&inputs.name)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                Ok(CreatedResource::with_id(request.previous.id))
            }
            types::ACCOUNT => {
                let inputs: AccountInputs = parse_update_inputs(&request)?;
                let previous: AccountInputs =
                    parse_value(&request.urn, request.previous.inputs.clone())?;
                if inputs.name != previous.name || inputs.email != previous.email {
                    return Err(Error::provider(
                        &request.urn,
                        "account name and email cannot change after creation",
                    ));
                }
                let client = aws_sdk_organizations::Client::new(&self.config);
                self.move_account(&request.urn, &client, &request.previous.id, &inputs.parent_id)
                    .await?;
                let mut created = CreatedResource::with_id(request.previous.id);
                created.outputs.insert(
                    "role_name".to_string(),
                    Value::String(types::ORGANIZATION_ACCESS_ROLE.to_string()),
                );
                Ok(created)
            }
            types::BUCKET => {
                let inputs: BucketInputs = parse_update_inputs(&request)?;
                if inputs.bucket_name != request.previous.id {
                    return Err(Error::provider(
                        &request.urn,
                        "buckets cannot be renamed in place",
                    ));
                }
                let config = self
                    .config_for(&request.urn, request.target_account.as_deref())
                    .await?;
                let client = aws_sdk_s3::Client::new(&config);
                self.put_bucket_tags(&request.urn, &client, &inputs).await?;
                Ok(CreatedResource::with_id(request.previous.id))
            }
            types::PARAMETER => {
                let create = CreateRequest {
                    urn: request.urn.clone(),
                    name: request.name.clone(),
                    type_token: request.type_token.clone(),
                    inputs: request.inputs.clone(),
                    target_account: request.target_account.clone(),
                };
                self.put_parameter(&create, true).await
            }
            types::ROLE => self.update_role(&request).await,
            types::PERMISSION_SET => self.update_permission_set(&request).await,
            types::PERMISSION_SET_INLINE_POLICY => {
                let create = CreateRequest {
                    urn: request.urn.clone(),
                    name: request.name.clone(),
                    type_token: request.type_token.clone(),
                    inputs: request.inputs.clone(),
                    target_account: request.target_account.clone(),
                };
                self.put_inline_policy(&create).await
            }
            // the rest are attach/detach pairs with nothing to edit in
            // place: replace them
            _ => {
                self.delete(DeleteRequest {
                    urn: request.urn.clone(),
                    name: request.name.clone(),
                    type_token: request.type_token.clone(),
                    id: request.previous.id.clone(),
                    inputs: request.previous.inputs.clone(),
                    target_account: request.previous.account.clone(),
                })
                .await?;
                let create = CreateRequest {
                    urn: request.urn,
                    name: request.name,
                    type_token: request.type_token,
                    inputs: request.inputs,
                    target_account: request.target_account,
                };
                self.create(create).await
            }
        }
    }

    async fn delete(&self, request: DeleteRequest) -> Result<()> {
        match request.type_token.as_str() {
            types::ORGANIZATIONAL_UNIT => {
                let client = aws_sdk_organizations::Client::new(&self.config);
                client
                    .delete_organizational_unit()
                    .organizational_unit_id(&request.id)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                Ok(())
            }
            types::ACCOUNT => {
                // closing accounts is deliberate and manual
                log::warn!(
                    "{}: member account {} must be closed by hand; leaving it in place",
                    request.urn,
                    request.id
                );
                Ok(())
            }
            types::SERVICE_ACCESS => {
                let inputs: ServiceAccessInputs = parse_value(&request.urn, request.inputs)?;
                let client = aws_sdk_organizations::Client::new(&self.config);
                client
                    .disable_aws_service_access()
                    .service_principal(&inputs.service_principal)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                Ok(())
            }
            types::DELEGATED_ADMINISTRATOR => {
                let inputs: DelegatedAdministratorInputs =
                    parse_value(&request.urn, request.inputs)?;
                let client = aws_sdk_organizations::Client::new(&self.config);
                client
                    .deregister_delegated_administrator()
                    .account_id(&inputs.account_id)
                    .service_principal(&inputs.service_principal)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                Ok(())
            }
            types::BUCKET => {
                let config = self
                    .config_for(&request.urn, request.target_account.as_deref())
                    .await?;
                let client = aws_sdk_s3::Client::new(&config);
                client
                    .delete_bucket()
                    .bucket(&request.id)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                Ok(())
            }
            types::PARAMETER => {
                let config = self
                    .config_for(&request.urn, request.target_account.as_deref())
                    .await?;
                let client = aws_sdk_ssm::Client::new(&config);
                client
                    .delete_parameter()
                    .name(&request.id)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                Ok(())
            }
            types::OIDC_PROVIDER => {
                let config = self
                    .config_for(&request.urn, request.target_account.as_deref())
                    .await?;
                let client = aws_sdk_iam::Client::new(&config);
                client
                    .delete_open_id_connect_provider()
                    .open_id_connect_provider_arn(&request.id)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                Ok(())
            }
            types::ROLE => self.delete_role(&request).await,
            types::PERMISSION_SET => {
                let sso = self.sso_instance().await?;
                let client = aws_sdk_ssoadmin::Client::new(&self.config);
                client
                    .delete_permission_set()
                    .instance_arn(&sso.instance_arn)
                    .permission_set_arn(&request.id)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                Ok(())
            }
            types::MANAGED_POLICY_ATTACHMENT => {
                let inputs: ManagedPolicyAttachmentInputs =
                    parse_value(&request.urn, request.inputs)?;
                let sso = self.sso_instance().await?;
                let client = aws_sdk_ssoadmin::Client::new(&self.config);
                client
                    .detach_managed_policy_from_permission_set()
                    .instance_arn(&sso.instance_arn)
                    .permission_set_arn(&inputs.permission_set_arn)
                    .managed_policy_arn(&inputs.managed_policy_arn)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                self.provision_permission_set(&request.urn, &sso, &inputs.permission_set_arn)
                    .await?;
                Ok(())
            }
            types::PERMISSION_SET_INLINE_POLICY => {
                let inputs: PermissionSetInlinePolicyInputs =
                    parse_value(&request.urn, request.inputs)?;
                let sso = self.sso_instance().await?;
                let client = aws_sdk_ssoadmin::Client::new(&self.config);
                client
                    .delete_inline_policy_from_permission_set()
                    .instance_arn(&sso.instance_arn)
                    .permission_set_arn(&inputs.permission_set_arn)
                    .send()
                    .await
                    .map_err(|err| sdk_error(&request.urn, err))?;
                Ok(())
            }
            types::ACCOUNT_ASSIGNMENT => self.delete_account_assignment(&request).await,
            other => Err(Error::provider(
                &request.urn,
                format!("unknown resource type '{other}'"),
            )),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

enum PollState {
    Done,
    InProgress,
    Failed(String),
}

fn assignment_state(status: Option<&aws_sdk_ssoadmin::types::AccountAssignmentOperationStatus>) -> PollState {
    match status {
        None => PollState::Done,
        Some(status) => match status.status().map(|value| value.as_str()) {
            Some("SUCCEEDED") | None => PollState::Done,
            Some("FAILED") => PollState::Failed(
                status
                    .failure_reason()
                    .unwrap_or("unknown failure")
                    .to_string(),
            ),
            Some(_) => PollState::InProgress,
        },
    }
}

fn provisioning_state(
    status: Option<&aws_sdk_ssoadmin::types::StatusValues>,
) -> PollState {
    match status.map(|value| value.as_str()) {
        Some("SUCCEEDED") | None => PollState::Done,
        Some("FAILED") => PollState::Failed("see the provisioning status in the console".to_string()),
        Some(_) => PollState::InProgress,
    }
}

fn sdk_error(urn: &str, err: impl std::error::Error) -> Error {
    Error::provider(urn, format!("{}", DisplayErrorContext(err)))
}

fn parse_inputs<T: DeserializeOwned>(request: &CreateRequest) -> Result<T> {
    parse_value(&request.urn, Value::Object(request.inputs.clone()))
}

fn parse_update_inputs<T: DeserializeOwned>(request: &UpdateRequest) -> Result<T> {
    parse_value(&request.urn, Value::Object(request.inputs.clone()))
}

fn parse_value<T: DeserializeOwned>(urn: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|source| Error::Value {
        context: format!("inputs for {urn}"),
        source,
    })
}

fn policy_json(urn: &str, document: &crate::policy::PolicyDocument) -> Result<String> {
    serde_json::to_string(document).map_err(|source| Error::Value {
        context: format!("policy document for {urn}"),
        source,
    })
}

fn org_tags(
    urn: &str,
    tags: &BTreeMap<String, String>,
) -> Result<Vec<aws_sdk_organizations::types::Tag>> {
    tags.iter()
        .map(|(key, value)| {
            aws_sdk_organizations::types::Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(|err| sdk_error(urn, err))
        })
        .collect()
}

fn iam_tags(urn: &str, tags: &BTreeMap<String, String>) -> Result<Vec<aws_sdk_iam::types::Tag>> {
    tags.iter()
        .map(|(key, value)| {
            aws_sdk_iam::types::Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(|err| sdk_error(urn, err))
        })
        .collect()
}

fn ssm_tags(urn: &str, tags: &BTreeMap<String, String>) -> Result<Vec<aws_sdk_ssm::types::Tag>> {
    tags.iter()
        .map(|(key, value)| {
            aws_sdk_ssm::types::Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(|err| sdk_error(urn, err))
        })
        .collect()
}
