//! In-memory provider double for program-level tests.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use stackkit::{
    CreateRequest, CreatedResource, DeleteRequest, ResourceProvider, Result, UpdateRequest, Waiter,
};
use std::sync::Mutex;
use std::time::Duration;

use crate::aws::types;

/// Hands out deterministic physical ids without touching AWS.
///
/// Accounts get twelve-digit ids in creation order starting at
/// `100000000001`; buckets and parameters are identified by their
/// configured names. Resources that feed deferred values downstream
/// (roles, the OIDC provider, permission sets) report a plausible `arn`
/// output.
pub struct MockOrgProvider {
    next_account_number: Mutex<u64>,
    pub created: Mutex<Vec<CreateRequest>>,
}

impl Default for MockOrgProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOrgProvider {
    pub fn new() -> Self {
        Self {
            next_account_number: Mutex::new(100_000_000_001),
            created: Mutex::new(Vec::new()),
        }
    }

    fn resource(&self, request: &CreateRequest) -> CreatedResource {
        let str_input = |field: &str| {
            request
                .inputs
                .get(field)
                .and_then(Value::as_str)
                .unwrap_or(request.name.as_str())
                .to_string()
        };
        let account = request
            .target_account
            .clone()
            .unwrap_or_else(|| "000000000000".to_string());

        match request.type_token.as_str() {
            types::ACCOUNT => {
                let mut next = self.next_account_number.lock().unwrap();
                let id = format!("{next:012}");
                *next += 1;
                let mut outputs = Map::new();
                outputs.insert(
                    "role_name".to_string(),
                    json!(types::ORGANIZATION_ACCESS_ROLE),
                );
                CreatedResource { id, outputs }
            }
            types::BUCKET => CreatedResource::with_id(str_input("bucket_name")),
            types::PARAMETER => CreatedResource::with_id(str_input("name")),
            types::ROLE => {
                let mut created =
                    CreatedResource::with_id(format!("{account}/{}", str_input("name")));
                created.outputs.insert(
                    "arn".to_string(),
                    json!(format!("arn:aws:iam::{account}:role/{}", str_input("name"))),
                );
                created
            }
            types::OIDC_PROVIDER => {
                let host = str_input("url");
                let host = host.strip_prefix("https://").unwrap_or(&host);
                let arn = format!("arn:aws:iam::{account}:oidc-provider/{host}");
                let mut created = CreatedResource::with_id(arn.clone());
                created.outputs.insert("arn".to_string(), json!(arn));
                created
            }
            types::PERMISSION_SET => {
                let arn = format!("arn:aws:sso:::permissionSet/ssoins-mock/ps-{}", request.name);
                let mut created = CreatedResource::with_id(arn.clone());
                created.outputs.insert("arn".to_string(), json!(arn));
                created
            }
            _ => CreatedResource::with_id(format!("{}-id", request.name)),
        }
    }
}

#[async_trait]
impl ResourceProvider for MockOrgProvider {
    async fn create(&self, request: CreateRequest) -> Result<CreatedResource> {
        let created = self.resource(&request);
        self.created.lock().unwrap().push(request);
        Ok(created)
    }

    async fn update(&self, request: UpdateRequest) -> Result<CreatedResource> {
        let create = CreateRequest {
            urn: request.urn,
            name: request.name,
            type_token: request.type_token,
            inputs: request.inputs,
            target_account: request.target_account,
        };
        Ok(self.resource(&create))
    }

    async fn delete(&self, _request: DeleteRequest) -> Result<()> {
        Ok(())
    }
}

/// A waiter that never sleeps.
pub struct InstantWaiter;

#[async_trait]
impl Waiter for InstantWaiter {
    async fn wait(&self, _name: &str, _duration: Duration) {}
}
