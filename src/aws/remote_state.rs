//! Stack state persistence: the shared S3 backend, or a local file.
//!
//! Remote state lives under `{account}/{repo}/{project}` in the central
//! state bucket, one JSON document per stack plus a lock object that
//! guards against concurrent runs. The layout matches what the state
//! bucket policies grant: each account writes only under its own prefix.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::types::ServerSideEncryption;
use chrono::Utc;
use serde_json::json;
use stackkit::{StackState, StateSink};
use std::path::PathBuf;

#[derive(Clone)]
pub struct RemoteState {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    kms_key_arn: String,
}

impl RemoteState {
    pub fn new(
        config: &SdkConfig,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        kms_key_arn: impl Into<String>,
    ) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
            bucket: bucket.into(),
            prefix: prefix.into(),
            kms_key_arn: kms_key_arn.into(),
        }
    }

    fn state_key(&self, stack_name: &str) -> String {
        format!("{}/stacks/{stack_name}.json", self.prefix)
    }

    fn lock_key(&self, stack_name: &str) -> String {
        format!("{}/locks/{stack_name}.json", self.prefix)
    }

    /// Fetch the stack's state, or start fresh when none is stored yet.
    pub async fn load(&self, stack_name: &str) -> Result<StackState> {
        let key = self.state_key(stack_name);
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    log::debug!("no remote state at s3://{}/{key}, starting fresh", self.bucket);
                    return Ok(StackState::new(stack_name));
                }
                return Err(anyhow!("{}", DisplayErrorContext(service)))
                    .with_context(|| format!("Could not read s3://{}/{key}", self.bucket));
            }
        };
        let bytes = response
            .body
            .collect()
            .await
            .with_context(|| format!("Could not read s3://{}/{key}", self.bucket))?
            .into_bytes();
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Could not parse state at s3://{}/{key}", self.bucket))
    }

    /// Take the stack's lock. Fails when another run holds it.
    pub async fn lock(&self, stack_name: &str) -> Result<StateLock> {
        let key = self.lock_key(stack_name);
        let holder = json!({
            "stack": stack_name,
            "user": std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            "acquired_at": Utc::now().to_rfc3339(),
        });
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .if_none_match("*")
            .body(holder.to_string().into_bytes().into())
            .send()
            .await;
        match result {
            Ok(_) => Ok(StateLock {
                client: self.client.clone(),
                bucket: self.bucket.clone(),
                key,
            }),
            Err(err) => {
                let service = err.into_service_error();
                if service.meta().code() == Some("PreconditionFailed") {
                    bail!(
                        "Stack {stack_name} is locked by another run; \
                         remove s3://{}/{key} if that run is dead",
                        self.bucket
                    );
                }
                Err(anyhow!("{}", DisplayErrorContext(service)))
                    .with_context(|| format!("Could not lock s3://{}/{key}", self.bucket))
            }
        }
    }

    /// Drop the persisted state object once a stack has been destroyed.
    pub async fn remove(&self, stack_name: &str) -> Result<()> {
        let key = self.state_key(stack_name);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| anyhow!("{}", DisplayErrorContext(err)))
            .with_context(|| format!("Could not remove s3://{}/{key}", self.bucket))?;
        Ok(())
    }
}

#[async_trait]
impl StateSink for RemoteState {
    async fn persist(&self, state: &StackState) -> stackkit::Result<()> {
        let key = self.state_key(&state.name);
        let path = format!("s3://{}/{key}", self.bucket);
        let as_state_error = |message: String| stackkit::Error::State {
            path: path.clone(),
            source: std::io::Error::other(message),
        };

        let body = serde_json::to_vec_pretty(state)
            .map_err(|err| as_state_error(err.to_string()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .server_side_encryption(ServerSideEncryption::AwsKms)
            .ssekms_key_id(&self.kms_key_arn)
            .body(body.into())
            .send()
            .await
            .map_err(|err| as_state_error(format!("{}", DisplayErrorContext(err))))?;
        Ok(())
    }
}

/// A held stack lock. Released explicitly; a crashed run leaves the lock
/// object behind for the next run to report.
pub struct StateLock {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
}

impl StateLock {
    pub async fn release(self) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|err| anyhow!("{}", DisplayErrorContext(err)))
            .with_context(|| format!("Could not release s3://{}/{}", self.bucket, self.key))?;
        Ok(())
    }
}

/// Local fallback used before the state bucket exists.
pub struct FileStateSink {
    path: PathBuf,
}

impl FileStateSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl StateSink for FileStateSink {
    async fn persist(&self, state: &StackState) -> stackkit::Result<()> {
        state.save(&self.path)
    }
}
