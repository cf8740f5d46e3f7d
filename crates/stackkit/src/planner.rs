//! Execution planner - validates the graph and decides per-resource actions.
//!
//! Because resource handles only exist after registration, declaration
//! order is already a valid topological order; the planner verifies that
//! invariant and annotates each resource with the action an apply would
//! take, by diffing declared inputs against persisted state.

use crate::error::{Error, Result};
use crate::resource::{BARRIER_TYPE, InputKind, ResourceId};
use crate::stack::Stack;
use crate::state::StackState;
use serde_json::Value;

/// What the executor will do for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Not in state; the provider will create it
    Create,
    /// In state with changed inputs; the provider will update or replace it
    Update,
    /// In state with identical inputs; no provider call
    Unchanged,
    /// In state, but some inputs are deferred; decided after resolution
    Converge,
    /// A barrier that has not elapsed yet
    Wait,
    /// A barrier already recorded in state
    SkipWait,
}

impl StepAction {
    /// Whether this step can touch the provider.
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Converge | Self::Wait)
    }
}

/// One planned step.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub resource: ResourceId,
    pub urn: String,
    pub action: StepAction,
}

/// An ordered, validated plan for a single run.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub steps: Vec<PlannedStep>,
}

impl ExecutionPlan {
    /// Number of steps that may result in provider calls or waits.
    pub fn pending_changes(&self) -> usize {
        self.steps.iter().filter(|s| s.action.is_change()).count()
    }

    /// Whether the plan has no steps at all.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Build the plan for `stack` against persisted `state`.
pub fn plan(stack: &Stack, state: &StackState) -> Result<ExecutionPlan> {
    let mut steps = Vec::with_capacity(stack.resources.len());

    for (index, decl) in stack.resources.iter().enumerate() {
        let urn = decl.urn();
        for dep in decl.all_dependencies() {
            if dep.0 >= stack.resources.len() {
                return Err(Error::UnknownDependency {
                    urn,
                    index: dep.0,
                });
            }
            // A dependency on self or on a later resource cannot be
            // satisfied by any ordering.
            if dep.0 >= index {
                return Err(Error::Cycle { urn });
            }
        }

        let record = state.resources.get(&urn);
        let action = if decl.type_token == BARRIER_TYPE {
            if record.is_some() {
                StepAction::SkipWait
            } else {
                StepAction::Wait
            }
        } else {
            match record {
                None => StepAction::Create,
                Some(record) => match literal_inputs(decl) {
                    Some(inputs) if inputs == record.inputs => StepAction::Unchanged,
                    Some(_) => StepAction::Update,
                    None => StepAction::Converge,
                },
            }
        };

        steps.push(PlannedStep {
            resource: ResourceId(index),
            urn,
            action,
        });
    }

    Ok(ExecutionPlan { steps })
}

/// Resolve the declared inputs if none of them are deferred.
fn literal_inputs(decl: &crate::resource::ResourceDecl) -> Option<Value> {
    let mut map = serde_json::Map::new();
    for (key, input) in &decl.inputs {
        match &input.0 {
            InputKind::Value(value) => {
                map.insert(key.clone(), value.clone());
            }
            InputKind::Deferred(_) => return None,
        }
    }
    Some(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceDecl;
    use crate::state::ResourceRecord;
    use serde_json::json;
    use std::time::Duration;

    fn record(inputs: Value) -> ResourceRecord {
        ResourceRecord {
            id: "physical-id".into(),
            type_token: "t".into(),
            inputs,
            outputs: serde_json::Map::new(),
            account: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_plan_follows_registration_order() {
        let mut stack = Stack::new("test");
        let a = stack.register(ResourceDecl::new("a", "t")).unwrap();
        let wait = stack
            .barrier("wait-a", Duration::from_secs(180), [a.id()])
            .unwrap();
        stack
            .register(ResourceDecl::new("b", "t").depends_on([wait]))
            .unwrap();

        let plan = plan(&stack, &StackState::new("test")).unwrap();
        let urns: Vec<&str> = plan.steps.iter().map(|s| s.urn.as_str()).collect();
        assert_eq!(
            urns,
            vec!["urn:t::a", "urn:stackkit:Barrier::wait-a", "urn:t::b"]
        );
        assert_eq!(plan.steps[1].action, StepAction::Wait);
        assert_eq!(plan.pending_changes(), 3);
    }

    #[test]
    fn test_unchanged_and_update_against_state() {
        let mut stack = Stack::new("test");
        stack
            .register(ResourceDecl::new("same", "t").input("value", "v1"))
            .unwrap();
        stack
            .register(ResourceDecl::new("changed", "t").input("value", "v2"))
            .unwrap();

        let mut state = StackState::new("test");
        state
            .resources
            .insert("urn:t::same".into(), record(json!({"value": "v1"})));
        state
            .resources
            .insert("urn:t::changed".into(), record(json!({"value": "old"})));

        let plan = plan(&stack, &state).unwrap();
        assert_eq!(plan.steps[0].action, StepAction::Unchanged);
        assert_eq!(plan.steps[1].action, StepAction::Update);
        assert_eq!(plan.pending_changes(), 1);
    }

    #[test]
    fn test_deferred_inputs_plan_as_converge() {
        let mut stack = Stack::new("test");
        let a = stack.register(ResourceDecl::new("a", "t")).unwrap();
        stack
            .register(ResourceDecl::new("b", "t").input("value", a.id_output()))
            .unwrap();

        let mut state = StackState::new("test");
        state
            .resources
            .insert("urn:t::b".into(), record(json!({"value": "resolved"})));

        let plan = plan(&stack, &state).unwrap();
        assert_eq!(plan.steps[1].action, StepAction::Converge);
    }

    #[test]
    fn test_recorded_barrier_is_skipped() {
        let mut stack = Stack::new("test");
        let a = stack.register(ResourceDecl::new("a", "t")).unwrap();
        stack
            .barrier("wait-a", Duration::from_secs(180), [a.id()])
            .unwrap();

        let mut state = StackState::new("test");
        state.resources.insert(
            "urn:stackkit:Barrier::wait-a".into(),
            record(json!({"seconds": 180})),
        );

        let plan = plan(&stack, &state).unwrap();
        assert_eq!(plan.steps[1].action, StepAction::SkipWait);
    }
}
