//! Resource declarations.
//!
//! A resource is plain data: a logical name, a provider type token, named
//! inputs, and an explicit dependency list. There is no base class to
//! inherit from and no hidden parent tracking; everything the engine
//! needs to order and diff the graph is visible on the declaration.

use crate::output::{Node, Output};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Type token for propagation barriers, handled by the executor itself
/// rather than by a provider.
pub const BARRIER_TYPE: &str = "stackkit:Barrier";

/// Opaque handle to a resource registered on a [`crate::Stack`].
///
/// Handles are only meaningful for the stack that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub(crate) usize);

impl ResourceId {
    #[cfg(test)]
    pub(crate) fn for_tests(index: usize) -> Self {
        Self(index)
    }
}

/// A single named input to a resource.
///
/// Inputs are either values known at declaration time or deferred values
/// read off other resources. Deferred inputs double as implicit
/// dependency edges.
#[derive(Debug, Clone)]
pub struct InputValue(pub(crate) InputKind);

#[derive(Debug, Clone)]
pub(crate) enum InputKind {
    Value(Value),
    Deferred(Arc<Node>),
}

impl InputValue {
    /// Whether this input is only known at apply time.
    pub fn is_deferred(&self) -> bool {
        matches!(self.0, InputKind::Deferred(_))
    }

    pub(crate) fn dependencies_into(&self, out: &mut Vec<ResourceId>) {
        if let InputKind::Deferred(node) = &self.0 {
            node.dependencies_into(out);
        }
    }

    pub(crate) fn resolve(
        &self,
        lookup: &dyn Fn(ResourceId, &str) -> crate::Result<Value>,
    ) -> crate::Result<Value> {
        match &self.0 {
            InputKind::Value(value) => Ok(value.clone()),
            InputKind::Deferred(node) => node.resolve(lookup),
        }
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        Self(InputKind::Value(value))
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self(InputKind::Value(Value::String(value.to_string())))
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self(InputKind::Value(Value::String(value)))
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        Self(InputKind::Value(Value::Bool(value)))
    }
}

impl From<u64> for InputValue {
    fn from(value: u64) -> Self {
        Self(InputKind::Value(value.into()))
    }
}

impl From<Vec<String>> for InputValue {
    fn from(values: Vec<String>) -> Self {
        Self(InputKind::Value(Value::Array(
            values.into_iter().map(Value::String).collect(),
        )))
    }
}

impl<T> From<Output<T>> for InputValue {
    fn from(output: Output<T>) -> Self {
        Self(InputKind::Deferred(output.node()))
    }
}

impl<T> From<&Output<T>> for InputValue {
    fn from(output: &Output<T>) -> Self {
        Self(InputKind::Deferred(output.node()))
    }
}

/// A declared resource, not yet registered on a stack.
#[derive(Debug, Clone)]
pub struct ResourceDecl {
    /// Logical name, unique per type token within a stack
    pub name: String,
    /// Provider type token, e.g. `aws:organizations:Account`
    pub type_token: String,
    /// Named inputs; ordering is stable for diffing
    pub inputs: BTreeMap<String, InputValue>,
    /// Explicit dependencies beyond those implied by deferred inputs
    pub depends_on: Vec<ResourceId>,
    /// Replace by deleting the old resource first (for resources with
    /// uniqueness constraints, e.g. named parameters)
    pub delete_before_replace: bool,
    /// Account to create the resource in; management account when unset
    pub target_account: Option<InputValue>,
}

impl ResourceDecl {
    /// Start a declaration with the given logical name and type token.
    pub fn new(name: impl Into<String>, type_token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_token: type_token.into(),
            inputs: BTreeMap::new(),
            depends_on: Vec::new(),
            delete_before_replace: false,
            target_account: None,
        }
    }

    /// Set a named input.
    pub fn input(mut self, key: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Add explicit dependencies.
    pub fn depends_on(mut self, deps: impl IntoIterator<Item = ResourceId>) -> Self {
        self.depends_on.extend(deps);
        self
    }

    /// Mark the resource for delete-before-replace on changed inputs.
    pub fn delete_before_replace(mut self, yes: bool) -> Self {
        self.delete_before_replace = yes;
        self
    }

    /// Create the resource inside another account instead of the
    /// management account. Accepts a known id or a deferred one.
    pub fn in_account(mut self, account_id: impl Into<InputValue>) -> Self {
        self.target_account = Some(account_id.into());
        self
    }

    /// Stable identifier used for state bookkeeping.
    pub fn urn(&self) -> String {
        format!("urn:{}::{}", self.type_token, self.name)
    }

    /// All dependencies: the explicit list plus everything referenced by
    /// deferred inputs.
    pub fn all_dependencies(&self) -> Vec<ResourceId> {
        let mut deps = self.depends_on.clone();
        for input in self.inputs.values() {
            input.dependencies_into(&mut deps);
        }
        if let Some(account) = &self.target_account {
            account.dependencies_into(&mut deps);
        }
        deps.sort_by_key(|id| id.0);
        deps.dedup();
        deps
    }
}

/// Handle to a registered resource, used to read its deferred outputs.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    pub(crate) id: ResourceId,
    pub(crate) urn: String,
}

impl ResourceHandle {
    /// The engine-internal id of this resource.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Stable state identifier.
    pub fn urn(&self) -> &str {
        &self.urn
    }

    /// A deferred view of one named output of this resource.
    pub fn output<T>(&self, field: impl Into<String>) -> Output<T> {
        Output::from_node(Arc::new(Node::Property {
            resource: self.id,
            field: field.into(),
        }))
    }

    /// The provider-assigned id, the output every resource has.
    pub fn id_output(&self) -> Output<String> {
        self.output("id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_urn_format() {
        let decl = ResourceDecl::new("central-infra-prod", "aws:organizations:Account");
        assert_eq!(decl.urn(), "urn:aws:organizations:Account::central-infra-prod");
    }

    #[test]
    fn test_builder_collects_inputs_and_deps() {
        let dep = ResourceId::for_tests(4);
        let decl = ResourceDecl::new("p", "aws:ssm:Parameter")
            .input("name", "/org-managed/example")
            .input("tags", json!({"managed-by": "orgctl"}))
            .depends_on([dep])
            .delete_before_replace(true);

        assert_eq!(decl.inputs.len(), 2);
        assert!(decl.delete_before_replace);
        assert_eq!(decl.all_dependencies(), vec![dep]);
    }

    #[test]
    fn test_deferred_inputs_become_dependencies() {
        let handle = ResourceHandle {
            id: ResourceId::for_tests(2),
            urn: "urn:aws:organizations:Account::a".into(),
        };
        let decl = ResourceDecl::new("r", "aws:iam:Role")
            .input("assume_role_policy_document", handle.id_output())
            .in_account(handle.output::<String>("id"));

        assert_eq!(decl.all_dependencies(), vec![handle.id()]);
    }

    #[test]
    fn test_explicit_and_implicit_deps_deduplicate() {
        let handle = ResourceHandle {
            id: ResourceId::for_tests(1),
            urn: "urn:t::a".into(),
        };
        let decl = ResourceDecl::new("r", "t")
            .input("value", handle.id_output())
            .depends_on([handle.id()]);
        assert_eq!(decl.all_dependencies(), vec![handle.id()]);
    }
}
