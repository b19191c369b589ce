//! Keel Core
//!
//! This crate provides the core of the Keel state store: a process-local,
//! hierarchical store of named modules whose state changes only through
//! recorded mutations, with observers notified precisely when the data they
//! read has changed.
//!
//! It implements:
//!
//! - Copy-on-write transactional mutations with per-module revisions
//! - Fine-grained read tracking and change detection
//! - Hierarchical scopes with lifecycle-scoped module resolution
//! - Read-facing state views over module state, getters and actions
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `state`: immutable values, paths, drafts and the state tree
//! - `mutation`: mutation envelopes and the transactional engine
//! - `scope`: the scope arena and module lifecycle
//! - `module`: module class tables and handles
//! - `reactive`: read tracking, watchers and subscriptions
//! - `view`: merged state views
//! - `store`: the store facade, settings, registry and transport boundary
//!
//! # Example
//!
//! ```rust
//! use keel_core::prelude::*;
//! use serde_json::json;
//!
//! let store = Store::new("app", StoreSettings::default()).unwrap();
//!
//! // Declare a module
//! let counter = ModuleClass::builder("counter")
//!     .state(Value::from(json!({"value": 0})))
//!     .mutation("increment", |ctx, args| {
//!         let n = args.int(0)?;
//!         ctx.update("value", |v| Ok(Value::from(v.and_then(|v| v.as_i64()).unwrap_or(0) + n)))
//!     })
//!     .build();
//!
//! store.register(store.root(), counter).unwrap();
//! let handle = store.resolve(store.root(), "counter").unwrap();
//!
//! // Dispatch envelopes
//! store.dispatch(&Mutation::new("counter", "increment", vec![Value::Int(5)])).unwrap();
//! store.dispatch(&Mutation::new("counter", "increment", vec![Value::Int(-2)])).unwrap();
//!
//! assert_eq!(handle.state().unwrap(), Value::from(json!({"value": 3})));
//! assert_eq!(handle.revision().unwrap().get(), 3);
//! ```

pub mod error;
pub mod module;
pub mod mutation;
pub mod reactive;
pub mod scope;
pub mod state;
pub mod store;
pub mod view;

pub use error::{StoreError, StoreResult};
pub use store::{Store, StoreSettings};

/// The types most users need.
pub mod prelude {
    pub use crate::error::{StoreError, StoreResult};
    pub use crate::module::{Args, InitContext, ModuleClass, ModuleHandle};
    pub use crate::mutation::{Applied, Mutation, MutationContext};
    pub use crate::reactive::{DependencyWatcher, OwnerId, Subscription, WatcherId};
    pub use crate::scope::{ScopeEvent, ScopeId};
    pub use crate::state::{ModuleKey, Path, Revision, Value};
    pub use crate::store::{ScopeHandle, Store, StoreRegistry, StoreSettings};
    pub use crate::view::{PropDescriptor, PropKind, StateView};
}
