//! Deferred output values.
//!
//! An [`Output`] is a promise for a value that only exists once the
//! provider has created the resource that produces it (an account id, a
//! role ARN, a bucket name). Programs compose transformations onto
//! outputs with [`Output::map`], [`Output::all`], and [`Output::zip`];
//! nothing ever blocks waiting for resolution. The executor resolves the
//! underlying node graph when it reaches each consumer.
//!
//! Outputs also carry provenance: every resource whose property feeds
//! into an output becomes an implicit dependency of whatever the output
//! is plugged into.

use crate::error::{Error, Result};
use crate::resource::ResourceId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::de::Error as _;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

type ApplyFn = Arc<dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync>;

/// Untyped node in the deferred-value graph.
pub(crate) enum Node {
    /// A value known at declaration time
    Literal(Value),
    /// A named output property of a declared resource
    Property { resource: ResourceId, field: String },
    /// A transformation over one or more upstream nodes
    Apply { upstream: Vec<Arc<Node>>, func: ApplyFn },
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Self::Property { resource, field } => f
                .debug_struct("Property")
                .field("resource", resource)
                .field("field", field)
                .finish(),
            Self::Apply { upstream, .. } => f
                .debug_struct("Apply")
                .field("upstream", &upstream.len())
                .finish_non_exhaustive(),
        }
    }
}

impl Node {
    /// Resolve this node to a concrete value.
    ///
    /// `lookup` maps a resource property to its resolved value; the
    /// executor backs it with the outputs recorded so far. Planning
    /// guarantees producers run before consumers, so a failed lookup is
    /// a program error, not a timing issue.
    pub(crate) fn resolve(
        &self,
        lookup: &dyn Fn(ResourceId, &str) -> Result<Value>,
    ) -> Result<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Property { resource, field } => lookup(*resource, field),
            Self::Apply { upstream, func } => {
                let mut values = Vec::with_capacity(upstream.len());
                for node in upstream {
                    values.push(node.resolve(lookup)?);
                }
                func(values)
            }
        }
    }

    /// Collect every resource this node (transitively) reads from.
    pub(crate) fn dependencies_into(&self, out: &mut Vec<ResourceId>) {
        match self {
            Self::Literal(_) => {}
            Self::Property { resource, .. } => {
                if !out.contains(resource) {
                    out.push(*resource);
                }
            }
            Self::Apply { upstream, .. } => {
                for node in upstream {
                    node.dependencies_into(out);
                }
            }
        }
    }
}

/// A typed deferred value.
///
/// `Output<T>` is cheap to clone; clones share the same underlying node.
/// The type parameter is a compile-time claim about the JSON shape the
/// node resolves to, checked when the value is actually consumed.
pub struct Output<T> {
    node: Arc<Node>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Output").field(&self.node).finish()
    }
}

impl<T> Output<T> {
    pub(crate) fn from_node(node: Arc<Node>) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub(crate) fn node(&self) -> Arc<Node> {
        Arc::clone(&self.node)
    }

    /// Resources whose outputs feed into this value.
    pub fn dependencies(&self) -> Vec<ResourceId> {
        let mut deps = Vec::new();
        self.node.dependencies_into(&mut deps);
        deps
    }
}

impl<T: Serialize> Output<T> {
    /// Wrap an already-known value.
    pub fn literal(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(|source| Error::Value {
            context: "literal output".into(),
            source,
        })?;
        Ok(Self::from_node(Arc::new(Node::Literal(value))))
    }
}

impl<T: DeserializeOwned + 'static> Output<T> {
    /// Register a transformation to run once the value is known.
    pub fn map<U, F>(&self, func: F) -> Output<U>
    where
        U: Serialize,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let apply: ApplyFn = Arc::new(move |mut values: Vec<Value>| {
            let value = if values.len() == 1 { values.pop() } else { None };
            let Some(value) = value else {
                return Err(Error::Value {
                    context: "map input".into(),
                    source: serde_json::Error::custom("expected exactly one upstream value"),
                });
            };
            let input: T = serde_json::from_value(value).map_err(|source| Error::Value {
                context: "map input".into(),
                source,
            })?;
            serde_json::to_value(func(input)).map_err(|source| Error::Value {
                context: "map result".into(),
                source,
            })
        });
        Output::from_node(Arc::new(Node::Apply {
            upstream: vec![self.node()],
            func: apply,
        }))
    }

    /// Like [`Output::map`] for transformations that can fail. The error
    /// carries `context` and aborts the apply that resolves this value.
    pub fn try_map<U, E, F>(&self, context: impl Into<String>, func: F) -> Output<U>
    where
        U: Serialize,
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(T) -> std::result::Result<U, E> + Send + Sync + 'static,
    {
        let context = context.into();
        let apply: ApplyFn = Arc::new(move |mut values: Vec<Value>| {
            let value = if values.len() == 1 { values.pop() } else { None };
            let Some(value) = value else {
                return Err(Error::Value {
                    context: context.clone(),
                    source: serde_json::Error::custom("expected exactly one upstream value"),
                });
            };
            let input: T = serde_json::from_value(value).map_err(|source| Error::Value {
                context: context.clone(),
                source,
            })?;
            let output = func(input).map_err(|source| Error::Apply {
                context: context.clone(),
                source: Box::new(source),
            })?;
            serde_json::to_value(output).map_err(|source| Error::Value {
                context: context.clone(),
                source,
            })
        });
        Output::from_node(Arc::new(Node::Apply {
            upstream: vec![self.node()],
            func: apply,
        }))
    }
}

impl<T> Output<T> {
    /// Combine many outputs into one that resolves to all of their values.
    pub fn all(outputs: impl IntoIterator<Item = Output<T>>) -> Output<Vec<T>> {
        let upstream: Vec<Arc<Node>> = outputs.into_iter().map(|o| o.node()).collect();
        let apply: ApplyFn = Arc::new(|values: Vec<Value>| Ok(Value::Array(values)));
        Output::from_node(Arc::new(Node::Apply {
            upstream,
            func: apply,
        }))
    }
}

impl<A, B> Output<(A, B)> {
    /// Combine two differently-typed outputs into a pair.
    pub fn zip(first: &Output<A>, second: &Output<B>) -> Self {
        let apply: ApplyFn = Arc::new(|values: Vec<Value>| Ok(Value::Array(values)));
        Self::from_node(Arc::new(Node::Apply {
            upstream: vec![first.node(), second.node()],
            func: apply,
        }))
    }
}

impl From<&str> for Output<String> {
    fn from(value: &str) -> Self {
        Self::from_node(Arc::new(Node::Literal(Value::String(value.to_string()))))
    }
}

impl From<String> for Output<String> {
    fn from(value: String) -> Self {
        Self::from_node(Arc::new(Node::Literal(Value::String(value))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceId;
    use serde_json::json;

    fn no_lookup(_id: ResourceId, _field: &str) -> Result<Value> {
        Err(Error::lookup("test", "no properties available"))
    }

    #[test]
    fn test_literal_resolves_without_lookup() {
        let out: Output<String> = Output::from("hello");
        let value = out.node().resolve(&no_lookup).unwrap();
        assert_eq!(value, json!("hello"));
        assert!(out.dependencies().is_empty());
    }

    #[test]
    fn test_map_transforms_value() {
        let out: Output<String> = Output::from("123456789012");
        let arn = out.map(|id| format!("arn:aws:iam::{id}:role/OrganizationAccountAccessRole"));
        let value = arn.node().resolve(&no_lookup).unwrap();
        assert_eq!(
            value,
            json!("arn:aws:iam::123456789012:role/OrganizationAccountAccessRole")
        );
    }

    #[test]
    fn test_map_chain() {
        let out: Output<String> = Output::from("a");
        let chained = out.map(|v| format!("{v}b")).map(|v| format!("{v}c"));
        let value = chained.node().resolve(&no_lookup).unwrap();
        assert_eq!(value, json!("abc"));
    }

    #[test]
    fn test_all_gathers_values() {
        let outputs = vec![
            Output::<String>::from("one"),
            Output::<String>::from("two"),
        ];
        let all = Output::all(outputs);
        let value = all.node().resolve(&no_lookup).unwrap();
        assert_eq!(value, json!(["one", "two"]));
    }

    #[test]
    fn test_zip_pairs_values() {
        let a: Output<String> = Output::from("id-1");
        let b = Output::literal(&7_u64).unwrap();
        let pair = Output::zip(&a, &b);
        let value = pair.node().resolve(&no_lookup).unwrap();
        assert_eq!(value, json!(["id-1", 7]));

        let resolved: (String, u64) = serde_json::from_value(value).unwrap();
        assert_eq!(resolved, ("id-1".to_string(), 7));
    }

    #[test]
    fn test_map_rejects_wrong_shape() {
        let out = Output::literal(&json!({"not": "a string"})).unwrap();
        let mapped: Output<String> = Output::<String>::from_node(out.node()).map(|v| v);
        let err = mapped.node().resolve(&no_lookup).unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Value);
    }

    #[test]
    fn test_try_map_surfaces_the_error() {
        let ok: Output<String> = Output::from("42");
        let parsed = ok.try_map("count", |v| v.parse::<u64>());
        assert_eq!(parsed.node().resolve(&no_lookup).unwrap(), json!(42));

        let bad: Output<String> = Output::from("not a number");
        let parsed = bad.try_map("count", |v| v.parse::<u64>());
        let err = parsed.node().resolve(&no_lookup).unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Value);
        assert!(err.to_string().contains("count"));
    }

    #[test]
    fn test_property_dependencies_deduplicate() {
        let id = ResourceId::for_tests(3);
        let a = Output::<String>::from_node(Arc::new(Node::Property {
            resource: id,
            field: "id".into(),
        }));
        let b = a.map(|v| v.to_uppercase());
        let all = Output::all(vec![a, b]);
        assert_eq!(all.dependencies(), vec![id]);
    }
}
