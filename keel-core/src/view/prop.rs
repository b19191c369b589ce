//! Property descriptors.

use std::fmt;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::state::Value;

/// Reads a property's current value. `None` means undefined.
pub type ReadFn = Arc<dyn Fn() -> StoreResult<Option<Value>> + Send + Sync>;

/// Invokes a callable property.
pub type CallFn = Arc<dyn Fn(&[Value]) -> StoreResult<Value> + Send + Sync>;

/// Resolves properties no descriptor matches.
pub type WildcardFn = Arc<dyn Fn(&str) -> StoreResult<Option<Value>> + Send + Sync>;

/// What a property exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropKind {
    /// A key of a module's state.
    State,
    /// A module getter.
    Getter,
    /// A module action.
    Action,
    /// A module mutation, committed when called.
    Mutation,
    /// Anything defined by hand.
    Custom,
}

/// One named property of a [`StateView`](super::StateView).
#[derive(Clone)]
pub struct PropDescriptor {
    name: String,
    kind: PropKind,
    reactive: bool,
    read: Option<ReadFn>,
    call: Option<CallFn>,
}

impl PropDescriptor {
    /// A readable, reactive property.
    pub fn value<F>(name: impl Into<String>, read: F) -> Self
    where
        F: Fn() -> StoreResult<Option<Value>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: PropKind::Custom,
            reactive: true,
            read: Some(Arc::new(read)),
            call: None,
        }
    }

    /// A callable, non-reactive property.
    pub fn callable<F>(name: impl Into<String>, call: F) -> Self
    where
        F: Fn(&[Value]) -> StoreResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: PropKind::Custom,
            reactive: false,
            read: None,
            call: Some(Arc::new(call)),
        }
    }

    /// Change the kind.
    pub fn with_kind(mut self, kind: PropKind) -> Self {
        self.kind = kind;
        self
    }

    /// Exclude the property from tracking and snapshots.
    pub fn non_reactive(mut self) -> Self {
        self.reactive = false;
        self
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Property kind.
    pub fn kind(&self) -> PropKind {
        self.kind
    }

    /// Whether reads of this property are tracked.
    pub fn is_reactive(&self) -> bool {
        self.reactive
    }

    /// Whether the property can be called.
    pub fn is_callable(&self) -> bool {
        self.call.is_some()
    }

    /// Current value. Callable-only properties read as undefined.
    pub fn read(&self) -> StoreResult<Option<Value>> {
        match &self.read {
            Some(read) => read(),
            None => Ok(None),
        }
    }

    pub(crate) fn call_fn(&self) -> Option<&CallFn> {
        self.call.as_ref()
    }
}

impl fmt::Debug for PropDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("reactive", &self.reactive)
            .finish()
    }
}
