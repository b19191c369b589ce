//! Module Classes
//!
//! A module is a named unit of state and behaviour. Its behaviour is declared
//! once, up front, in a [`ModuleClass`]: a static table mapping method names
//! to closures. Nothing is discovered at runtime; the table is complete when
//! [`ModuleClassBuilder::build`] returns.
//!
//! # Members
//!
//! - **state**: the initial state value. Classes without one are stateless
//!   services; they may still have getters and actions but cannot be
//!   mutated.
//! - **init**: optional constructor. It can resolve other modules from the
//!   constructing scope and may return the initial state.
//! - **mutations**: synchronous functions that write the module's draft.
//! - **getters**: values computed from the committed state.
//! - **actions**: arbitrary operations that may commit mutations and call
//!   other modules.
//!
//! # Example
//!
//! ```rust
//! use keel_core::module::{Args, ModuleClass};
//! use keel_core::state::Value;
//! use serde_json::json;
//!
//! let counter = ModuleClass::builder("counter")
//!     .state(Value::from(json!({"value": 0})))
//!     .mutation("increment", |ctx, args| {
//!         let n = args.int(0)?;
//!         ctx.update("value", |v| {
//!             Ok(Value::Int(v.and_then(|v| v.as_i64()).unwrap_or(0) + n))
//!         })
//!     })
//!     .getter("isZero", |state| {
//!         Value::Bool(state.get_path(&"value".into()) == Some(&Value::Int(0)))
//!     })
//!     .build();
//!
//! assert!(counter.has_mutation("increment"));
//! ```

mod args;
mod handle;

pub use args::Args;
pub use handle::{InitContext, ModuleHandle};

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::StoreResult;
use crate::mutation::MutationContext;
use crate::state::Value;

/// Body of a mutation method.
pub type MutationFn =
    Arc<dyn Fn(&mut MutationContext<'_>, &[Value]) -> StoreResult<()> + Send + Sync>;

/// A value derived from the module state.
pub type GetterFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// An action; free to commit mutations and call other modules.
pub type ActionFn = Arc<dyn Fn(&ModuleHandle, &[Value]) -> StoreResult<Value> + Send + Sync>;

/// A constructor. `Some` replaces the class's initial state.
pub type InitFn =
    Arc<dyn Fn(&InitContext<'_>, &[Value]) -> StoreResult<Option<Value>> + Send + Sync>;

/// Static registration table of a module type.
pub struct ModuleClass {
    name: String,
    state: Option<Value>,
    init: Option<InitFn>,
    mutations: IndexMap<String, MutationFn>,
    getters: IndexMap<String, GetterFn>,
    actions: IndexMap<String, ActionFn>,
}

impl ModuleClass {
    /// Start declaring a class. `name` is the name it registers under by
    /// default.
    pub fn builder(name: impl Into<String>) -> ModuleClassBuilder {
        ModuleClassBuilder {
            class: ModuleClass {
                name: name.into(),
                state: None,
                init: None,
                mutations: IndexMap::new(),
                getters: IndexMap::new(),
                actions: IndexMap::new(),
            },
        }
    }

    /// Default registration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the class declares an initial state.
    pub fn is_stateful(&self) -> bool {
        self.state.is_some()
    }

    /// A copy of the declared initial state.
    pub fn construct_default(&self) -> Option<Value> {
        self.state.clone()
    }

    /// The constructor, if any.
    pub fn init_fn(&self) -> Option<&InitFn> {
        self.init.as_ref()
    }

    /// Look up a mutation body.
    pub fn mutation(&self, name: &str) -> Option<&MutationFn> {
        self.mutations.get(name)
    }

    /// Look up a getter.
    pub fn getter(&self, name: &str) -> Option<&GetterFn> {
        self.getters.get(name)
    }

    /// Look up an action.
    pub fn action(&self, name: &str) -> Option<&ActionFn> {
        self.actions.get(name)
    }

    /// Whether `name` is a mutation method.
    pub fn has_mutation(&self, name: &str) -> bool {
        self.mutations.contains_key(name)
    }

    /// Mutation names in declaration order.
    pub fn mutation_names(&self) -> impl Iterator<Item = &str> {
        self.mutations.keys().map(String::as_str)
    }

    /// Getter names in declaration order.
    pub fn getter_names(&self) -> impl Iterator<Item = &str> {
        self.getters.keys().map(String::as_str)
    }

    /// Action names in declaration order.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

impl fmt::Debug for ModuleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleClass")
            .field("name", &self.name)
            .field("stateful", &self.is_stateful())
            .field("mutations", &self.mutations.keys().collect::<Vec<_>>())
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`ModuleClass`].
pub struct ModuleClassBuilder {
    class: ModuleClass,
}

impl ModuleClassBuilder {
    /// Declare the initial state.
    pub fn state(mut self, state: impl Into<Value>) -> Self {
        self.class.state = Some(state.into());
        self
    }

    /// Declare the class stateless (the default).
    pub fn stateless(mut self) -> Self {
        self.class.state = None;
        self
    }

    /// Set the constructor.
    pub fn init<F>(mut self, f: F) -> Self
    where
        F: Fn(&InitContext<'_>, &[Value]) -> StoreResult<Option<Value>> + Send + Sync + 'static,
    {
        self.class.init = Some(Arc::new(f));
        self
    }

    /// Add a mutation method.
    pub fn mutation<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut MutationContext<'_>, &[Value]) -> StoreResult<()> + Send + Sync + 'static,
    {
        self.class.mutations.insert(name.into(), Arc::new(f));
        self
    }

    /// Add a getter.
    pub fn getter<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.class.getters.insert(name.into(), Arc::new(f));
        self
    }

    /// Add an action.
    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ModuleHandle, &[Value]) -> StoreResult<Value> + Send + Sync + 'static,
    {
        self.class.actions.insert(name.into(), Arc::new(f));
        self
    }

    /// Finish the table.
    pub fn build(self) -> Arc<ModuleClass> {
        Arc::new(self.class)
    }
}
