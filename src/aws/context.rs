//! Discovery of the ambient AWS environment a run operates in.

use anyhow::{Context, Result, bail};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use orgmodel::{STATE_BUCKET_PARAM, STATE_KMS_KEY_PARAM, format_account_id};

use crate::config::Settings;

/// Everything the program needs to know about where it is running.
pub struct OrgContext {
    pub config: SdkConfig,
    pub region: String,
    /// Account the credentials belong to; must be the management account
    pub management_account_id: String,
    pub organization_root_id: String,
    pub kms_key_arn: String,
    /// Remote state bucket, once one has been provisioned and published
    pub state_bucket: Option<String>,
}

impl OrgContext {
    /// Load credentials and fill in whatever `settings` leaves to
    /// discovery: the caller account, the organization root, and the
    /// state-encryption key.
    pub async fn discover(settings: &Settings) -> Result<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .load()
            .await;

        let identity = aws_sdk_sts::Client::new(&config)
            .get_caller_identity()
            .send()
            .await
            .context("Could not resolve the caller identity; are credentials configured?")?;
        let management_account_id = format_account_id(
            identity
                .account()
                .context("Caller identity carried no account id")?,
        );

        let organization_root_id = match &settings.org_root_id {
            Some(root_id) => root_id.clone(),
            None => discover_root_id(&config).await?,
        };
        let kms_key_arn = match &settings.kms_key_arn {
            Some(arn) => arn.clone(),
            None => discover_kms_key_arn(&config).await?,
        };
        let state_bucket = match &settings.state_bucket {
            Some(bucket) => Some(bucket.clone()),
            None => discover_state_bucket(&config).await,
        };

        log::info!(
            "running against account {management_account_id}, organization root {organization_root_id}"
        );
        Ok(Self {
            config,
            region: settings.region.clone(),
            management_account_id,
            organization_root_id,
            kms_key_arn,
            state_bucket,
        })
    }
}

async fn discover_root_id(config: &SdkConfig) -> Result<String> {
    let roots = aws_sdk_organizations::Client::new(config)
        .list_roots()
        .send()
        .await
        .context("Could not list organization roots; set org_root_id in orgctl.toml to skip discovery")?;
    let root = roots
        .roots()
        .first()
        .context("The organization has no root")?;
    root.id()
        .context("The organization root carried no id")
        .map(str::to_string)
}

/// The shared key ARN is published to the parameter store once the
/// central infra account exists. Before that, it has to come from
/// settings.
async fn discover_kms_key_arn(config: &SdkConfig) -> Result<String> {
    let parameter = aws_sdk_ssm::Client::new(config)
        .get_parameter()
        .name(STATE_KMS_KEY_PARAM)
        .send()
        .await;
    let Ok(parameter) = parameter else {
        bail!(
            "Could not read {STATE_KMS_KEY_PARAM} from the parameter store; \
             set kms_key_arn in orgctl.toml"
        );
    };
    parameter
        .parameter()
        .and_then(|parameter| parameter.value())
        .map(str::to_string)
        .with_context(|| format!("{STATE_KMS_KEY_PARAM} exists but has no value"))
}

/// The central state bucket publishes its own name to the parameter
/// store. Until that parameter exists, state stays on local disk.
async fn discover_state_bucket(config: &SdkConfig) -> Option<String> {
    let parameter = aws_sdk_ssm::Client::new(config)
        .get_parameter()
        .name(STATE_BUCKET_PARAM)
        .send()
        .await
        .ok()?;
    parameter
        .parameter()
        .and_then(|parameter| parameter.value())
        .map(str::to_string)
}
