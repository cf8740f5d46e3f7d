//! Stack - the registration surface for one deployment.
//!
//! Components declare resources against a `Stack`; nothing talks to a
//! provider until the stack is planned and executed. Registration order
//! is preserved and, because handles only exist after registration, is
//! always a valid evaluation order.

use crate::error::{Error, Result};
use crate::resource::{BARRIER_TYPE, InputValue, ResourceDecl, ResourceHandle, ResourceId};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// An in-memory resource graph plus the exports of one stack.
#[derive(Debug)]
pub struct Stack {
    name: String,
    pub(crate) resources: Vec<ResourceDecl>,
    urns: HashSet<String>,
    pub(crate) exports: BTreeMap<String, InputValue>,
}

impl Stack {
    /// Create an empty stack with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
            urns: HashSet::new(),
            exports: BTreeMap::new(),
        }
    }

    /// Stack name, used to key persisted state.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a resource declaration.
    ///
    /// Fails fast on duplicate URNs and on dependency handles that do not
    /// belong to this stack; both are program errors the planner must
    /// never see.
    pub fn register(&mut self, decl: ResourceDecl) -> Result<ResourceHandle> {
        let urn = decl.urn();
        if !self.urns.insert(urn.clone()) {
            return Err(Error::DuplicateResource { urn });
        }
        for dep in decl.all_dependencies() {
            if dep.0 >= self.resources.len() {
                return Err(Error::UnknownDependency {
                    urn,
                    index: dep.0,
                });
            }
        }
        let id = ResourceId(self.resources.len());
        self.resources.push(decl);
        Ok(ResourceHandle { id, urn })
    }

    /// Register a propagation barrier.
    ///
    /// A barrier is a graph node with a declared duration, a workaround
    /// for eventual consistency in the provider: dependents of the
    /// barrier do not run until the wait has elapsed once. The executor
    /// records completed barriers in state, so re-runs skip them instead
    /// of sleeping again.
    pub fn barrier(
        &mut self,
        name: impl Into<String>,
        duration: Duration,
        deps: impl IntoIterator<Item = ResourceId>,
    ) -> Result<ResourceId> {
        let decl = ResourceDecl::new(name, BARRIER_TYPE)
            .input("seconds", duration.as_secs())
            .depends_on(deps);
        Ok(self.register(decl)?.id())
    }

    /// Publish a named stack output, resolved at the end of an apply.
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<InputValue>) {
        self.exports.insert(name.into(), value.into());
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether anything has been registered.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub(crate) fn decl(&self, id: ResourceId) -> &ResourceDecl {
        &self.resources[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_sequential_ids() {
        let mut stack = Stack::new("test");
        let a = stack.register(ResourceDecl::new("a", "t")).unwrap();
        let b = stack.register(ResourceDecl::new("b", "t")).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_duplicate_urn_rejected() {
        let mut stack = Stack::new("test");
        stack.register(ResourceDecl::new("a", "t")).unwrap();
        let err = stack.register(ResourceDecl::new("a", "t")).unwrap_err();
        assert!(matches!(err, Error::DuplicateResource { .. }));
    }

    #[test]
    fn test_same_name_different_type_allowed() {
        let mut stack = Stack::new("test");
        stack.register(ResourceDecl::new("a", "t1")).unwrap();
        assert!(stack.register(ResourceDecl::new("a", "t2")).is_ok());
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut other = Stack::new("other");
        let foreign = other.register(ResourceDecl::new("a", "t")).unwrap();

        let mut stack = Stack::new("test");
        let err = stack
            .register(ResourceDecl::new("b", "t").depends_on([foreign.id()]))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { .. }));
    }

    #[test]
    fn test_barrier_registers_duration() {
        let mut stack = Stack::new("test");
        let a = stack.register(ResourceDecl::new("a", "t")).unwrap();
        let barrier = stack
            .barrier("wait-after-a", Duration::from_secs(180), [a.id()])
            .unwrap();
        let decl = stack.decl(barrier);
        assert_eq!(decl.type_token, BARRIER_TYPE);
        assert_eq!(decl.depends_on, vec![a.id()]);
    }
}
