//! State Views
//!
//! A [`StateView`] is the read-facing object a consumer renders from. It
//! merges the plain state of one or more modules with their getters,
//! actions and mutations behind a single name lookup.
//!
//! # Lookup Order
//!
//! 1. Explicit descriptors (getters, actions, mutations and anything added
//!    with [`StateView::define_prop`]).
//! 2. Top-level keys of each source module's state, in source order.
//! 3. The wildcard resolver, if one is set.
//!
//! A name none of these produce reads as undefined (`None`).
//!
//! Views hold module handles, not state: every read goes to the current
//! committed snapshot (or the calling thread's draft during a mutation).

mod prop;

pub use prop::{CallFn, PropDescriptor, PropKind, ReadFn, WildcardFn};

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::error::{StoreError, StoreResult};
use crate::module::ModuleHandle;
use crate::state::{Map, Value};

/// Merged read-facing object over module state and behaviour.
#[derive(Clone, Default)]
pub struct StateView {
    props: IndexMap<String, PropDescriptor>,
    sources: Vec<ModuleHandle>,
    wildcard: Option<WildcardFn>,
}

impl StateView {
    /// An empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// The view of one module: its state keys, getters, actions and
    /// mutations.
    pub fn for_module(handle: &ModuleHandle) -> Self {
        let mut view = Self::new();
        let class = Arc::clone(handle.class());

        for name in class.getter_names() {
            let handle = handle.clone();
            let getter = name.to_owned();
            view.define_prop(
                PropDescriptor::value(name, move || handle.getter(&getter).map(Some))
                    .with_kind(PropKind::Getter),
            );
        }

        for name in class.action_names() {
            let handle = handle.clone();
            let action = name.to_owned();
            view.define_prop(
                PropDescriptor::callable(name, move |args| handle.call(&action, args))
                    .with_kind(PropKind::Action),
            );
        }

        for name in class.mutation_names() {
            let handle = handle.clone();
            let method = name.to_owned();
            view.define_prop(
                PropDescriptor::callable(name, move |args| {
                    handle.commit(&method, args.to_vec())?;
                    Ok(Value::Null)
                })
                .with_kind(PropKind::Mutation),
            );
        }

        view.sources.push(handle.clone());
        view
    }

    /// Add or replace a property.
    pub fn define_prop(&mut self, descriptor: PropDescriptor) -> &mut Self {
        self.props.insert(descriptor.name().to_owned(), descriptor);
        self
    }

    /// Set the catch-all resolver for names nothing else matches.
    pub fn define_wildcard_prop<F>(&mut self, resolve: F) -> &mut Self
    where
        F: Fn(&str) -> StoreResult<Option<Value>> + Send + Sync + 'static,
    {
        self.wildcard = Some(Arc::new(resolve));
        self
    }

    /// Fold `other` into this view. Its properties win over ours, its state
    /// sources are consulted after ours, and its wildcard (if any) replaces
    /// ours.
    pub fn merge_view(&mut self, other: StateView) -> &mut Self {
        for (name, descriptor) in other.props {
            self.props.insert(name, descriptor);
        }
        self.sources.extend(other.sources);
        if other.wildcard.is_some() {
            self.wildcard = other.wildcard;
        }
        self
    }

    /// The explicit descriptor for `name`.
    pub fn descriptor(&self, name: &str) -> Option<&PropDescriptor> {
        self.props.get(name)
    }

    /// Modules whose state backs this view.
    pub fn sources(&self) -> &[ModuleHandle] {
        &self.sources
    }

    /// Whether reads of `name` should be tracked.
    pub fn is_reactive(&self, name: &str) -> bool {
        self.props.get(name).map_or(true, PropDescriptor::is_reactive)
    }

    /// Resolve `name`.
    pub fn read(&self, name: &str) -> StoreResult<Option<Value>> {
        if let Some(descriptor) = self.props.get(name) {
            return descriptor.read();
        }

        for source in &self.sources {
            let state = source.state()?;
            if let Some(value) = state.as_map().and_then(|m| m.get(name)) {
                return Ok(Some(value.clone()));
            }
        }

        match &self.wildcard {
            Some(resolve) => resolve(name),
            None => Ok(None),
        }
    }

    /// Call an action or mutation property.
    pub fn call(&self, name: &str, args: &[Value]) -> StoreResult<Value> {
        let call = self
            .props
            .get(name)
            .and_then(PropDescriptor::call_fn)
            .ok_or_else(|| StoreError::unknown_member("view", "callable property", name))?;
        call(args)
    }

    /// Every known property name: descriptors first, then state keys.
    ///
    /// Wildcard names are open-ended and not listed.
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys: IndexSet<String> = self.props.keys().cloned().collect();
        for source in &self.sources {
            if let Some(map) = source.state()?.as_map() {
                keys.extend(map.keys().cloned());
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Plain map of every reactive property's current value.
    pub fn get_snapshot(&self) -> StoreResult<Map> {
        let mut snapshot = Map::new();
        for name in self.keys()? {
            if !self.is_reactive(&name) {
                continue;
            }
            if let Some(value) = self.read(&name)? {
                snapshot.insert(name, value);
            }
        }
        Ok(snapshot)
    }
}

impl std::fmt::Debug for StateView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateView")
            .field("props", &self.props.keys().collect::<Vec<_>>())
            .field(
                "sources",
                &self.sources.iter().map(ModuleHandle::key).collect::<Vec<_>>(),
            )
            .field("wildcard", &self.wildcard.is_some())
            .finish()
    }
}
