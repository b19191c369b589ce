//! Scope Nodes
//!
//! This module defines the nodes that live in the scope arena and the
//! per-module registration records they own.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::module::ModuleClass;

/// Unique identifier for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for ScopeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a registered module is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructor known, no instance yet.
    Registered,

    /// Constructor is running. Resolving the module again from inside its
    /// own constructor is a dependency cycle.
    Initializing,

    /// Instance available for resolution.
    Ready,

    /// Instance and state removed.
    Destroyed,
}

/// A module class registered in a scope under a name.
#[derive(Clone)]
pub struct Registration {
    name: String,
    class: Arc<ModuleClass>,
    lifecycle: Lifecycle,
}

impl Registration {
    fn new(name: String, class: Arc<ModuleClass>) -> Self {
        Self {
            name,
            class,
            lifecycle: Lifecycle::Registered,
        }
    }

    /// Name the module is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registered class.
    pub fn class(&self) -> &Arc<ModuleClass> {
        &self.class
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("class", &self.class.name())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

/// A node in the scope tree.
///
/// The parent link is a plain id; the arena owns every node.
#[derive(Debug)]
pub struct ScopeNode {
    /// Unique identifier for this scope.
    id: ScopeId,

    /// Owning scope, `None` for the root.
    parent: Option<ScopeId>,

    /// Child scopes in creation order.
    children: Vec<ScopeId>,

    /// Registered modules in registration order.
    registry: IndexMap<String, Registration>,
}

impl ScopeNode {
    /// Create a root scope.
    pub fn root() -> Self {
        Self {
            id: ScopeId::new(),
            parent: None,
            children: Vec::new(),
            registry: IndexMap::new(),
        }
    }

    /// Create a scope under `parent`.
    pub fn child_of(parent: ScopeId) -> Self {
        Self {
            parent: Some(parent),
            ..Self::root()
        }
    }

    /// Get the scope's ID.
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Get the parent scope, if any.
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Get the child scopes.
    pub fn children(&self) -> &[ScopeId] {
        &self.children
    }

    /// Add a child scope.
    pub fn add_child(&mut self, child: ScopeId) {
        self.children.push(child);
    }

    /// Remove a child scope.
    pub fn remove_child(&mut self, child: ScopeId) {
        self.children.retain(|c| *c != child);
    }

    /// Register a class under `name`.
    ///
    /// Re-registering a name that has not been instantiated yet swaps the
    /// class. A name whose instance is alive keeps it; returns false then.
    pub fn register(&mut self, name: &str, class: Arc<ModuleClass>) -> bool {
        match self.registry.get_mut(name) {
            Some(existing) if existing.lifecycle != Lifecycle::Registered => false,
            Some(existing) => {
                existing.class = class;
                true
            }
            None => {
                self.registry
                    .insert(name.to_owned(), Registration::new(name.to_owned(), class));
                true
            }
        }
    }

    /// Look up a local registration.
    pub fn registration(&self, name: &str) -> Option<&Registration> {
        self.registry.get(name)
    }

    /// Mutable access to a local registration.
    pub fn registration_mut(&mut self, name: &str) -> Option<&mut Registration> {
        self.registry.get_mut(name)
    }

    /// Registered names in registration order.
    pub fn registered_names(&self) -> impl Iterator<Item = &str> {
        self.registry.keys().map(String::as_str)
    }

    /// Names of live instances, most recently registered first.
    pub fn ready_in_teardown_order(&self) -> Vec<String> {
        self.registry
            .values()
            .rev()
            .filter(|r| r.lifecycle == Lifecycle::Ready)
            .map(|r| r.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str) -> Arc<ModuleClass> {
        ModuleClass::builder(name).stateless().build()
    }

    #[test]
    fn scope_ids_are_unique() {
        let id1 = ScopeId::new();
        let id2 = ScopeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn child_remembers_parent() {
        let root = ScopeNode::root();
        let child = ScopeNode::child_of(root.id());
        assert_eq!(child.parent(), Some(root.id()));
        assert_ne!(child.id(), root.id());
    }

    #[test]
    fn registration_starts_registered() {
        let mut node = ScopeNode::root();
        assert!(node.register("api", class("api")));
        assert_eq!(
            node.registration("api").map(Registration::lifecycle),
            Some(Lifecycle::Registered)
        );
    }

    #[test]
    fn ready_instances_are_not_replaced() {
        let mut node = ScopeNode::root();
        node.register("api", class("api"));
        node.registration_mut("api")
            .unwrap()
            .set_lifecycle(Lifecycle::Ready);
        assert!(!node.register("api", class("other")));
        assert_eq!(node.registration("api").unwrap().class().name(), "api");
    }

    #[test]
    fn teardown_order_is_reverse_registration() {
        let mut node = ScopeNode::root();
        for name in ["a", "b", "c"] {
            node.register(name, class(name));
        }
        for name in ["a", "c"] {
            node.registration_mut(name)
                .unwrap()
                .set_lifecycle(Lifecycle::Ready);
        }
        assert_eq!(node.ready_in_teardown_order(), vec!["c", "a"]);
    }
}
