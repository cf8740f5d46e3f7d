//! Executes a plan against a provider.
//!
//! Apply walks the graph in declaration order, resolves deferred inputs
//! from the outputs of already-converged resources, and only calls the
//! provider when inputs differ from what state recorded. State is
//! persisted through the sink after every step, so an aborted run loses
//! at most the step that was in flight.

use crate::error::{Error, Result};
use crate::planner::plan;
use crate::provider::{
    CreateRequest, DeleteRequest, ResourceProvider, StateSink, UpdateRequest, Waiter,
};
use crate::resource::{BARRIER_TYPE, ResourceDecl, ResourceId};
use crate::stack::Stack;
use crate::state::{ResourceRecord, StackState};
use serde_json::{Map, Value};
use std::time::Duration;

/// Counts of what a run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub waited: usize,
    pub skipped_waits: usize,
}

impl ExecuteSummary {
    /// Whether the run touched anything.
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// Converge every resource in `stack`, updating `state` as it goes.
pub async fn apply(
    stack: &Stack,
    state: &mut StackState,
    provider: &dyn ResourceProvider,
    waiter: &dyn Waiter,
    sink: &dyn StateSink,
) -> Result<ExecuteSummary> {
    let plan = plan(stack, state)?;
    let mut summary = ExecuteSummary::default();
    // Outputs of every resource converged so far this run, indexed by
    // ResourceId. Deferred inputs resolve against this.
    let mut outputs: Vec<Option<Map<String, Value>>> = vec![None; stack.resources.len()];

    for step in &plan.steps {
        let decl = &stack.resources[step.resource.0];
        let urn = &step.urn;

        let resolved = resolve_inputs(decl, urn, &outputs)?;
        let account = resolve_account(decl, urn, &outputs)?;

        if decl.type_token == BARRIER_TYPE {
            let step_outputs = converge_barrier(
                decl, urn, &resolved, state, waiter, sink, &mut summary,
            )
            .await?;
            outputs[step.resource.0] = Some(step_outputs);
            continue;
        }

        let canonical = Value::Object(resolved.clone());
        let step_outputs = match state.resources.get(urn) {
            Some(record) if record.inputs == canonical && record.account == account => {
                log::debug!("{urn}: unchanged");
                summary.unchanged += 1;
                record.outputs.clone()
            }
            Some(record) => {
                let record = record.clone();
                let created = if decl.delete_before_replace {
                    log::info!("{urn}: replacing (delete before replace)");
                    provider
                        .delete(delete_request(urn, decl, &record))
                        .await?;
                    state.remove(urn);
                    sink.persist(state).await?;
                    provider
                        .create(CreateRequest {
                            urn: urn.clone(),
                            name: decl.name.clone(),
                            type_token: decl.type_token.clone(),
                            inputs: resolved.clone(),
                            target_account: account.clone(),
                        })
                        .await?
                } else {
                    log::info!("{urn}: updating");
                    provider
                        .update(UpdateRequest {
                            urn: urn.clone(),
                            name: decl.name.clone(),
                            type_token: decl.type_token.clone(),
                            inputs: resolved.clone(),
                            previous: record,
                            target_account: account.clone(),
                        })
                        .await?
                };
                summary.updated += 1;
                record_created(state, urn, decl, canonical, account, created);
                sink.persist(state).await?;
                state.resources[urn].outputs.clone()
            }
            None => {
                log::info!("{urn}: creating");
                let created = provider
                    .create(CreateRequest {
                        urn: urn.clone(),
                        name: decl.name.clone(),
                        type_token: decl.type_token.clone(),
                        inputs: resolved.clone(),
                        target_account: account.clone(),
                    })
                    .await?;
                summary.created += 1;
                record_created(state, urn, decl, canonical, account, created);
                sink.persist(state).await?;
                state.resources[urn].outputs.clone()
            }
        };
        outputs[step.resource.0] = Some(step_outputs);
    }

    // Exports resolve against this run's outputs, then land in state.
    for (name, input) in &stack.exports {
        let value = input.resolve(&|resource, field| {
            lookup_output(&outputs, resource, field, &format!("export '{name}'"))
        })?;
        state.exports.insert(name.clone(), value);
    }
    sink.persist(state).await?;

    Ok(summary)
}

/// Delete every recorded resource in reverse convergence order.
///
/// Barriers wait on the way down too. Deleting an account and then
/// immediately touching the organization can hit the same propagation
/// lag as creating one.
pub async fn destroy(
    state: &mut StackState,
    provider: &dyn ResourceProvider,
    waiter: &dyn Waiter,
    sink: &dyn StateSink,
) -> Result<ExecuteSummary> {
    let mut summary = ExecuteSummary::default();

    let order: Vec<String> = state.order.iter().rev().cloned().collect();
    for urn in order {
        let Some(record) = state.resources.get(&urn).cloned() else {
            state.order.retain(|u| u != &urn);
            continue;
        };

        if record.type_token == BARRIER_TYPE {
            let seconds = record
                .inputs
                .get("seconds")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            waiter
                .wait(resource_name(&urn), Duration::from_secs(seconds))
                .await;
            summary.waited += 1;
        } else {
            log::info!("{urn}: deleting");
            provider
                .delete(DeleteRequest {
                    urn: urn.clone(),
                    name: resource_name(&urn).to_string(),
                    type_token: record.type_token.clone(),
                    id: record.id.clone(),
                    inputs: record.inputs.clone(),
                    target_account: record.account.clone(),
                })
                .await?;
            summary.deleted += 1;
        }

        state.remove(&urn);
        sink.persist(state).await?;
    }

    state.exports.clear();
    sink.persist(state).await?;

    Ok(summary)
}

// ============================================================================
// Helpers
// ============================================================================

fn lookup_output(
    outputs: &[Option<Map<String, Value>>],
    resource: ResourceId,
    field: &str,
    wanted_for: &str,
) -> Result<Value> {
    let converged = outputs
        .get(resource.0)
        .and_then(Option::as_ref)
        .ok_or_else(|| {
            Error::lookup(
                wanted_for.to_string(),
                "depends on a resource that has not converged",
            )
        })?;
    converged.get(field).cloned().ok_or_else(|| {
        Error::lookup(
            wanted_for.to_string(),
            format!("upstream resource has no output '{field}'"),
        )
    })
}

fn resolve_inputs(
    decl: &ResourceDecl,
    urn: &str,
    outputs: &[Option<Map<String, Value>>],
) -> Result<Map<String, Value>> {
    let mut resolved = Map::new();
    for (key, input) in &decl.inputs {
        let wanted_for = format!("{urn} input '{key}'");
        let value = input.resolve(&|resource, field| {
            lookup_output(outputs, resource, field, &wanted_for)
        })?;
        resolved.insert(key.clone(), value);
    }
    Ok(resolved)
}

fn resolve_account(
    decl: &ResourceDecl,
    urn: &str,
    outputs: &[Option<Map<String, Value>>],
) -> Result<Option<String>> {
    let Some(input) = &decl.target_account else {
        return Ok(None);
    };
    let wanted_for = format!("{urn} target account");
    let value = input.resolve(&|resource, field| {
        lookup_output(outputs, resource, field, &wanted_for)
    })?;
    let account = serde_json::from_value(value).map_err(|source| Error::Value {
        context: wanted_for,
        source,
    })?;
    Ok(Some(account))
}

async fn converge_barrier(
    decl: &ResourceDecl,
    urn: &str,
    resolved: &Map<String, Value>,
    state: &mut StackState,
    waiter: &dyn Waiter,
    sink: &dyn StateSink,
    summary: &mut ExecuteSummary,
) -> Result<Map<String, Value>> {
    if let Some(record) = state.resources.get(urn) {
        log::debug!("{urn}: already elapsed, skipping wait");
        summary.skipped_waits += 1;
        return Ok(record.outputs.clone());
    }

    let seconds = resolved
        .get("seconds")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::lookup(urn.to_string(), "barrier has no 'seconds' input"))?;
    waiter.wait(&decl.name, Duration::from_secs(seconds)).await;
    summary.waited += 1;

    let mut outputs = Map::new();
    outputs.insert("id".into(), Value::String(decl.name.clone()));
    state.record(
        urn,
        ResourceRecord {
            id: decl.name.clone(),
            type_token: BARRIER_TYPE.to_string(),
            inputs: Value::Object(resolved.clone()),
            outputs: outputs.clone(),
            account: None,
            created_at: chrono::Utc::now(),
        },
    );
    sink.persist(state).await?;
    Ok(outputs)
}

fn delete_request(urn: &str, decl: &ResourceDecl, record: &ResourceRecord) -> DeleteRequest {
    DeleteRequest {
        urn: urn.to_string(),
        name: decl.name.clone(),
        type_token: record.type_token.clone(),
        id: record.id.clone(),
        inputs: record.inputs.clone(),
        target_account: record.account.clone(),
    }
}

fn record_created(
    state: &mut StackState,
    urn: &str,
    decl: &ResourceDecl,
    inputs: Value,
    account: Option<String>,
    created: crate::provider::CreatedResource,
) {
    let mut outputs = created.outputs;
    outputs.insert("id".into(), Value::String(created.id.clone()));
    state.record(
        urn,
        ResourceRecord {
            id: created.id,
            type_token: decl.type_token.clone(),
            inputs,
            outputs,
            account,
            created_at: chrono::Utc::now(),
        },
    );
}

/// Name component of a URN.
fn resource_name(urn: &str) -> &str {
    urn.rsplit_once("::").map_or(urn, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CreatedResource, NullSink};
    use crate::resource::ResourceDecl;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestProvider {
        calls: Mutex<Vec<String>>,
        creates: Mutex<Vec<CreateRequest>>,
        fail_on: Option<String>,
    }

    impl TestProvider {
        fn failing_on(urn: &str) -> Self {
            Self {
                fail_on: Some(urn.to_string()),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResourceProvider for TestProvider {
        async fn create(&self, request: CreateRequest) -> crate::Result<CreatedResource> {
            if self.fail_on.as_deref() == Some(request.urn.as_str()) {
                return Err(Error::provider(&request.urn, "simulated failure"));
            }
            self.calls.lock().unwrap().push(format!("create {}", request.urn));
            let id = format!("id-{}", request.name);
            self.creates.lock().unwrap().push(request);
            Ok(CreatedResource::with_id(id))
        }

        async fn update(&self, request: UpdateRequest) -> crate::Result<CreatedResource> {
            self.calls.lock().unwrap().push(format!("update {}", request.urn));
            Ok(CreatedResource::with_id(request.previous.id))
        }

        async fn delete(&self, request: DeleteRequest) -> crate::Result<()> {
            self.calls.lock().unwrap().push(format!("delete {}", request.urn));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingWaiter {
        waits: Mutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl Waiter for RecordingWaiter {
        async fn wait(&self, name: &str, duration: Duration) {
            self.waits
                .lock()
                .unwrap()
                .push((name.to_string(), duration.as_secs()));
        }
    }

    fn build_stack(value: &str) -> Stack {
        let mut stack = Stack::new("test");
        let account = stack
            .register(ResourceDecl::new("prod", "org:Account").input("email", value))
            .unwrap();
        let settled = stack
            .barrier("prod-settled", Duration::from_secs(180), [account.id()])
            .unwrap();
        let role = stack
            .register(
                ResourceDecl::new("deploy", "iam:Role")
                    .input("account", account.id_output())
                    .depends_on([settled]),
            )
            .unwrap();
        stack.export("prod-account-id", account.id_output());
        stack.export("prod-role-name", role.output::<String>("id"));
        stack
    }

    #[tokio::test]
    async fn test_apply_creates_in_order_and_resolves_deferred_inputs() {
        let provider = TestProvider::default();
        let waiter = RecordingWaiter::default();
        let mut state = StackState::new("test");

        let summary = apply(&build_stack("a@b.c"), &mut state, &provider, &waiter, &NullSink)
            .await
            .unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.waited, 1);
        assert_eq!(
            provider.calls(),
            vec!["create urn:org:Account::prod", "create urn:iam:Role::deploy"]
        );
        assert_eq!(
            *waiter.waits.lock().unwrap(),
            vec![("prod-settled".to_string(), 180)]
        );

        // The role saw the account's physical id, not a placeholder.
        let creates = provider.creates.lock().unwrap();
        assert_eq!(creates[1].inputs["account"], json!("id-prod"));

        assert_eq!(state.exports["prod-account-id"], json!("id-prod"));
        assert_eq!(state.exports["prod-role-name"], json!("id-deploy"));
    }

    #[tokio::test]
    async fn test_reapply_with_same_inputs_makes_no_provider_calls() {
        let provider = TestProvider::default();
        let waiter = RecordingWaiter::default();
        let mut state = StackState::new("test");

        apply(&build_stack("a@b.c"), &mut state, &provider, &waiter, &NullSink)
            .await
            .unwrap();

        let second = TestProvider::default();
        let second_waiter = RecordingWaiter::default();
        let summary = apply(&build_stack("a@b.c"), &mut state, &second, &second_waiter, &NullSink)
            .await
            .unwrap();

        assert!(second.calls().is_empty());
        assert!(second_waiter.waits.lock().unwrap().is_empty());
        assert_eq!(summary.unchanged, 2);
        assert_eq!(summary.skipped_waits, 1);
        assert!(!summary.changed());
    }

    #[tokio::test]
    async fn test_changed_input_updates_only_that_resource() {
        let provider = TestProvider::default();
        let waiter = RecordingWaiter::default();
        let mut state = StackState::new("test");

        apply(&build_stack("a@b.c"), &mut state, &provider, &waiter, &NullSink)
            .await
            .unwrap();

        let second = TestProvider::default();
        let summary = apply(
            &build_stack("changed@b.c"),
            &mut state,
            &second,
            &RecordingWaiter::default(),
            &NullSink,
        )
        .await
        .unwrap();

        assert_eq!(second.calls(), vec!["update urn:org:Account::prod"]);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.unchanged, 1);
    }

    #[tokio::test]
    async fn test_delete_before_replace_deletes_then_creates() {
        fn stack_with(value: &str) -> Stack {
            let mut stack = Stack::new("test");
            stack
                .register(
                    ResourceDecl::new("param", "ssm:Parameter")
                        .input("value", value)
                        .delete_before_replace(true),
                )
                .unwrap();
            stack
        }

        let provider = TestProvider::default();
        let mut state = StackState::new("test");
        apply(&stack_with("v1"), &mut state, &provider, &RecordingWaiter::default(), &NullSink)
            .await
            .unwrap();

        let second = TestProvider::default();
        apply(&stack_with("v2"), &mut state, &second, &RecordingWaiter::default(), &NullSink)
            .await
            .unwrap();

        assert_eq!(
            second.calls(),
            vec!["delete urn:ssm:Parameter::param", "create urn:ssm:Parameter::param"]
        );
        assert_eq!(state.resources["urn:ssm:Parameter::param"].inputs, json!({"value": "v2"}));
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_but_keeps_converged_state() {
        let provider = TestProvider::failing_on("urn:iam:Role::deploy");
        let mut state = StackState::new("test");

        let err = apply(
            &build_stack("a@b.c"),
            &mut state,
            &provider,
            &RecordingWaiter::default(),
            &NullSink,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Provider { .. }));
        assert!(state.resources.contains_key("urn:org:Account::prod"));
        assert!(!state.resources.contains_key("urn:iam:Role::deploy"));
        // The barrier elapsed before the failure, so a retry skips it.
        assert!(state.resources.contains_key("urn:stackkit:Barrier::prod-settled"));
    }

    #[tokio::test]
    async fn test_destroy_walks_reverse_order_and_waits_at_barriers() {
        let provider = TestProvider::default();
        let mut state = StackState::new("test");
        apply(&build_stack("a@b.c"), &mut state, &provider, &RecordingWaiter::default(), &NullSink)
            .await
            .unwrap();

        let destroyer = TestProvider::default();
        let waiter = RecordingWaiter::default();
        let summary = destroy(&mut state, &destroyer, &waiter, &NullSink)
            .await
            .unwrap();

        assert_eq!(
            destroyer.calls(),
            vec!["delete urn:iam:Role::deploy", "delete urn:org:Account::prod"]
        );
        assert_eq!(
            *waiter.waits.lock().unwrap(),
            vec![("prod-settled".to_string(), 180)]
        );
        assert_eq!(summary.deleted, 2);
        assert!(state.resources.is_empty());
        assert!(state.order.is_empty());
        assert!(state.exports.is_empty());
    }
}
