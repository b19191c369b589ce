//! Scope Arena
//!
//! The arena owns every scope node, indexed by id. Parent/child links are
//! ids, so the tree has no reference cycles and tearing a subtree down is a
//! walk over the arena's child index rather than over a live object graph.
//!
//! # Resolution
//!
//! Looking a module up from a scope walks the parent chain until some scope
//! has a registration for the name. The first hit wins, so a child that
//! registers a name its ancestor also registers shadows the ancestor for
//! itself and its descendants.
//!
//! # Teardown
//!
//! Destroying a scope walks its subtree children-first. Within one scope the
//! live modules go in reverse registration order. The caller receives the
//! full ordered list so it can clear its own bookkeeping in the same order.

use std::collections::HashMap;
use std::sync::Arc;

use super::node::{Lifecycle, ScopeId, ScopeNode};
use crate::error::{StoreError, StoreResult};
use crate::module::ModuleClass;
use crate::state::ModuleKey;

/// Outcome of asking to initialize a module.
#[derive(Debug)]
pub enum InitStep {
    /// The instance already exists.
    Ready(Arc<ModuleClass>),
    /// The caller must now run the constructor, then call
    /// [`ScopeArena::finish_init`] or [`ScopeArena::abort_init`].
    Begin(Arc<ModuleClass>),
}

/// Everything a scope teardown removed, in removal order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Teardown {
    /// Module instances, children's before parents'.
    pub modules: Vec<ModuleKey>,
    /// Scopes, descendants before the scope itself.
    pub scopes: Vec<ScopeId>,
}

/// Owns all scopes of a store.
#[derive(Debug)]
pub struct ScopeArena {
    /// All nodes, indexed by ID.
    nodes: HashMap<ScopeId, ScopeNode>,

    /// The root scope.
    root: ScopeId,
}

impl ScopeArena {
    /// Create an arena holding a single root scope.
    pub fn new() -> Self {
        let root = ScopeNode::root();
        let root_id = root.id();
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            nodes,
            root: root_id,
        }
    }

    /// The root scope.
    pub fn root(&self) -> ScopeId {
        self.root
    }

    /// Whether the scope is alive.
    pub fn contains(&self, scope: ScopeId) -> bool {
        self.nodes.contains_key(&scope)
    }

    /// Get a reference to a node.
    pub fn get(&self, scope: ScopeId) -> Option<&ScopeNode> {
        self.nodes.get(&scope)
    }

    /// Get the total number of live scopes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether every scope, root included, has been destroyed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a child scope under `parent`.
    pub fn create_child(&mut self, parent: ScopeId) -> StoreResult<ScopeId> {
        let node = ScopeNode::child_of(parent);
        let id = node.id();
        self.nodes
            .get_mut(&parent)
            .ok_or(StoreError::UnknownScope(parent))?
            .add_child(id);
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Register `class` in `scope` under `name`.
    ///
    /// Returns false when the name already has a live instance in that
    /// scope, in which case nothing changes.
    pub fn register(
        &mut self,
        scope: ScopeId,
        name: &str,
        class: Arc<ModuleClass>,
    ) -> StoreResult<bool> {
        let node = self
            .nodes
            .get_mut(&scope)
            .ok_or(StoreError::UnknownScope(scope))?;
        Ok(node.register(name, class))
    }

    /// Find the scope whose registration `name` resolves to from `scope`.
    pub fn locate(&self, scope: ScopeId, name: &str) -> StoreResult<ScopeId> {
        if !self.contains(scope) {
            return Err(StoreError::resolution(name, scope, "scope is destroyed"));
        }

        let mut current = Some(scope);
        while let Some(id) = current {
            let Some(node) = self.nodes.get(&id) else {
                break;
            };
            if node.registration(name).is_some() {
                return Ok(id);
            }
            current = node.parent();
        }

        Err(StoreError::resolution(
            name,
            scope,
            "not registered in this scope or any ancestor",
        ))
    }

    /// Lifecycle of a registration owned by `owner`.
    pub fn lifecycle(&self, owner: ScopeId, name: &str) -> Option<Lifecycle> {
        self.nodes
            .get(&owner)
            .and_then(|node| node.registration(name))
            .map(|r| r.lifecycle())
    }

    /// Move a registration towards `Ready`.
    ///
    /// `Registered` becomes `Initializing` and the class is handed back for
    /// construction. Finding the registration already `Initializing` means
    /// the constructor is (transitively) resolving itself.
    pub fn begin_init(&mut self, owner: ScopeId, name: &str) -> StoreResult<InitStep> {
        let registration = self
            .nodes
            .get_mut(&owner)
            .and_then(|node| node.registration_mut(name))
            .ok_or_else(|| StoreError::resolution(name, owner, "not registered"))?;

        match registration.lifecycle() {
            Lifecycle::Ready => Ok(InitStep::Ready(registration.class().clone())),
            Lifecycle::Registered => {
                registration.set_lifecycle(Lifecycle::Initializing);
                Ok(InitStep::Begin(registration.class().clone()))
            }
            Lifecycle::Initializing => Err(StoreError::resolution(
                name,
                owner,
                "circular dependency: module is still initializing",
            )),
            Lifecycle::Destroyed => Err(StoreError::resolution(name, owner, "module is destroyed")),
        }
    }

    /// Mark a constructed module `Ready`.
    pub fn finish_init(&mut self, owner: ScopeId, name: &str) {
        self.set_lifecycle(owner, name, Lifecycle::Ready);
    }

    /// Return a module whose constructor failed to `Registered`.
    pub fn abort_init(&mut self, owner: ScopeId, name: &str) {
        self.set_lifecycle(owner, name, Lifecycle::Registered);
    }

    fn set_lifecycle(&mut self, owner: ScopeId, name: &str, lifecycle: Lifecycle) {
        if let Some(registration) = self
            .nodes
            .get_mut(&owner)
            .and_then(|node| node.registration_mut(name))
        {
            registration.set_lifecycle(lifecycle);
        }
    }

    /// Ancestors of `scope`, nearest first.
    pub fn ancestors(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut out = Vec::new();
        let mut current = self.nodes.get(&scope).and_then(ScopeNode::parent);
        while let Some(id) = current {
            out.push(id);
            current = self.nodes.get(&id).and_then(ScopeNode::parent);
        }
        out
    }

    /// Destroy `scope` and everything below it.
    pub fn destroy(&mut self, scope: ScopeId) -> StoreResult<Teardown> {
        if !self.contains(scope) {
            return Err(StoreError::UnknownScope(scope));
        }

        let mut order = Vec::new();
        self.collect_post_order(scope, &mut order);

        let mut teardown = Teardown::default();
        for id in order {
            if let Some(mut node) = self.nodes.remove(&id) {
                for name in node.ready_in_teardown_order() {
                    if let Some(registration) = node.registration_mut(&name) {
                        registration.set_lifecycle(Lifecycle::Destroyed);
                    }
                    teardown.modules.push(ModuleKey::new(&name, id));
                }
                if id == scope {
                    if let Some(parent) = node.parent().and_then(|p| self.nodes.get_mut(&p)) {
                        parent.remove_child(id);
                    }
                }
                teardown.scopes.push(id);
            }
        }

        Ok(teardown)
    }

    /// Children (latest first, recursively) before the node itself.
    fn collect_post_order(&self, scope: ScopeId, out: &mut Vec<ScopeId>) {
        if let Some(node) = self.nodes.get(&scope) {
            for child in node.children().iter().rev() {
                self.collect_post_order(*child, out);
            }
        }
        out.push(scope);
    }
}

impl Default for ScopeArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str) -> Arc<ModuleClass> {
        ModuleClass::builder(name).stateless().build()
    }

    #[test]
    fn child_resolves_through_parent_chain() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        let child = arena.create_child(root).unwrap();
        let grandchild = arena.create_child(child).unwrap();

        arena.register(root, "api", class("api")).unwrap();

        assert_eq!(arena.locate(grandchild, "api").unwrap(), root);
        assert_eq!(arena.ancestors(grandchild), vec![child, root]);
    }

    #[test]
    fn child_registration_shadows_ancestor() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        let child = arena.create_child(root).unwrap();
        let grandchild = arena.create_child(child).unwrap();

        arena.register(root, "editor", class("editor")).unwrap();
        arena.register(child, "editor", class("editor")).unwrap();

        assert_eq!(arena.locate(root, "editor").unwrap(), root);
        assert_eq!(arena.locate(child, "editor").unwrap(), child);
        assert_eq!(arena.locate(grandchild, "editor").unwrap(), child);
    }

    #[test]
    fn unregistered_name_fails_resolution() {
        let arena = ScopeArena::new();
        assert!(matches!(
            arena.locate(arena.root(), "nope"),
            Err(StoreError::ResolutionFailure { .. })
        ));
    }

    #[test]
    fn init_transitions_happen_once() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.register(root, "api", class("api")).unwrap();

        assert!(matches!(arena.begin_init(root, "api"), Ok(InitStep::Begin(_))));
        assert_eq!(arena.lifecycle(root, "api"), Some(Lifecycle::Initializing));

        // Re-entering while the constructor runs is a cycle
        assert!(matches!(
            arena.begin_init(root, "api"),
            Err(StoreError::ResolutionFailure { .. })
        ));

        arena.finish_init(root, "api");
        assert!(matches!(arena.begin_init(root, "api"), Ok(InitStep::Ready(_))));
    }

    #[test]
    fn aborted_init_can_be_retried() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.register(root, "api", class("api")).unwrap();

        arena.begin_init(root, "api").unwrap();
        arena.abort_init(root, "api");
        assert_eq!(arena.lifecycle(root, "api"), Some(Lifecycle::Registered));
        assert!(matches!(arena.begin_init(root, "api"), Ok(InitStep::Begin(_))));
    }

    #[test]
    fn destroy_walks_children_first() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        let a = arena.create_child(root).unwrap();
        let a1 = arena.create_child(a).unwrap();
        let a2 = arena.create_child(a).unwrap();

        for (scope, name) in [(a, "first"), (a, "second"), (a1, "leaf1"), (a2, "leaf2")] {
            arena.register(scope, name, class(name)).unwrap();
            arena.begin_init(scope, name).unwrap();
            arena.finish_init(scope, name);
        }

        let teardown = arena.destroy(a).unwrap();

        assert_eq!(teardown.scopes, vec![a2, a1, a]);
        assert_eq!(
            teardown.modules,
            vec![
                ModuleKey::new("leaf2", a2),
                ModuleKey::new("leaf1", a1),
                ModuleKey::new("second", a),
                ModuleKey::new("first", a),
            ]
        );

        assert!(!arena.contains(a));
        assert!(!arena.contains(a1));
        assert!(arena.get(root).unwrap().children().is_empty());
        assert!(matches!(
            arena.locate(a1, "leaf1"),
            Err(StoreError::ResolutionFailure { .. })
        ));
    }
}
