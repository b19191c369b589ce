//! Module handles.

use std::fmt;
use std::sync::Arc;

use super::ModuleClass;
use crate::error::{StoreError, StoreResult};
use crate::mutation::Mutation;
use crate::reactive::AccessRecorder;
use crate::scope::ScopeId;
use crate::state::{ModuleKey, Path, Revision, Value};
use crate::store::{Store, StoreSettings};
use crate::view::StateView;

/// A resolved module instance.
///
/// The handle does not own state. Reads go to the engine: the calling
/// thread's draft while it is inside a mutation of this module, the
/// committed snapshot otherwise. Committed reads are recorded for the watcher
/// fast path.
#[derive(Clone)]
pub struct ModuleHandle {
    store: Store,
    key: ModuleKey,
    class: Arc<ModuleClass>,
}

impl ModuleHandle {
    pub(crate) fn new(store: Store, key: ModuleKey, class: Arc<ModuleClass>) -> Self {
        Self { store, key, class }
    }

    /// Instance key.
    pub fn key(&self) -> &ModuleKey {
        &self.key
    }

    /// Registered name.
    pub fn name(&self) -> &str {
        self.key.module()
    }

    /// Scope the instance lives in.
    pub fn scope(&self) -> ScopeId {
        self.key.scope()
    }

    /// The module's class.
    pub fn class(&self) -> &Arc<ModuleClass> {
        &self.class
    }

    /// The owning store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Current state. Stateless modules read as null.
    pub fn state(&self) -> StoreResult<Value> {
        let engine = self.store.engine();
        if let Some(draft) = engine.draft_value(&self.key) {
            return Ok(draft);
        }

        match engine.read(&self.key) {
            Ok((value, revision)) => {
                AccessRecorder::record(&self.key, revision);
                Ok(value)
            }
            Err(StoreError::ModuleDestroyed { .. }) if engine.is_live(&self.key) => Ok(Value::Null),
            Err(err) => Err(err),
        }
    }

    /// Read one path of the current state.
    pub fn get(&self, path: impl Into<Path>) -> StoreResult<Option<Value>> {
        let path = path.into();
        Ok(self.state()?.get_path(&path).cloned())
    }

    /// Current revision.
    pub fn revision(&self) -> StoreResult<Revision> {
        self.store.engine().revision(&self.key)
    }

    /// Submit `method` with `args` as a mutation of this instance.
    pub fn commit(&self, method: &str, args: Vec<Value>) -> StoreResult<()> {
        self.store
            .submit(Mutation::new(self.name(), method, args).in_scope(self.scope()))
    }

    /// Evaluate a getter against the current state.
    pub fn getter(&self, name: &str) -> StoreResult<Value> {
        let getter = self
            .class
            .getter(name)
            .ok_or_else(|| StoreError::unknown_member(self.key.to_string(), "getter", name))?;
        let state = self.state()?;
        Ok(getter(&state))
    }

    /// Run an action.
    pub fn call(&self, action: &str, args: &[Value]) -> StoreResult<Value> {
        let action_fn = self
            .class
            .action(action)
            .cloned()
            .ok_or_else(|| StoreError::unknown_member(self.key.to_string(), "action", action))?;
        action_fn(self, args)
    }

    /// Write straight into the state.
    ///
    /// Only legal from the thread running a mutation of this module; any
    /// other write fails with `MutationOutsideTransaction` and changes
    /// nothing.
    pub fn write(&self, path: impl Into<Path>, value: impl Into<Value>) -> StoreResult<()> {
        let path = path.into();
        let value = value.into();
        self.store
            .engine()
            .with_draft(&self.key, |draft| draft.set(&path, value).map(drop))
    }

    /// Whether the instance has been torn down.
    pub fn is_destroyed(&self) -> bool {
        !self.store.engine().is_live(&self.key)
    }

    /// Resolve another module from this instance's scope.
    pub fn resolve(&self, name: &str) -> StoreResult<ModuleHandle> {
        self.store.resolve(self.scope(), name)
    }

    /// The merged read-facing view of this instance.
    pub fn view(&self) -> StateView {
        StateView::for_module(self)
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("key", &self.key)
            .field("class", &self.class.name())
            .finish()
    }
}

/// What a constructor can reach while its module is being created.
pub struct InitContext<'a> {
    store: &'a Store,
    key: &'a ModuleKey,
}

impl<'a> InitContext<'a> {
    pub(crate) fn new(store: &'a Store, key: &'a ModuleKey) -> Self {
        Self { store, key }
    }

    /// Key the new instance will have.
    pub fn key(&self) -> &ModuleKey {
        self.key
    }

    /// Scope the new instance lives in.
    pub fn scope(&self) -> ScopeId {
        self.key.scope()
    }

    /// Store settings.
    pub fn settings(&self) -> &StoreSettings {
        self.store.settings()
    }

    /// Resolve a dependency from the constructing scope.
    ///
    /// Resolving the module under construction (directly or through other
    /// constructors) fails with `ResolutionFailure`.
    pub fn resolve(&self, name: &str) -> StoreResult<ModuleHandle> {
        self.store.resolve(self.scope(), name)
    }

    /// Resolve a dependency, passing constructor arguments.
    pub fn init(&self, name: &str, args: &[Value]) -> StoreResult<ModuleHandle> {
        self.store.init(self.scope(), name, args)
    }
}

impl fmt::Debug for InitContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitContext").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Args;
    use serde_json::json;

    fn store_with_counter() -> (Store, ModuleHandle) {
        let store = Store::new("handle-tests", StoreSettings::default()).unwrap();
        let class = ModuleClass::builder("counter")
            .state(Value::from(json!({"value": 0})))
            .mutation("set", |ctx, args| ctx.set("value", args.int(0)?))
            .getter("double", |state| {
                let v = state.get_path(&Path::parse("value")).and_then(Value::as_i64);
                Value::from(v.unwrap_or(0) * 2)
            })
            .action("bump", |handle, _| {
                let current = handle.get("value")?.and_then(|v| v.as_i64()).unwrap_or(0);
                handle.commit("set", vec![Value::Int(current + 1)])?;
                handle.get("value").map(Value::from)
            })
            .build();
        store.register(store.root(), class).unwrap();
        let handle = store.resolve(store.root(), "counter").unwrap();
        (store, handle)
    }

    #[test]
    fn actions_commit_and_getters_derive() {
        let (_store, counter) = store_with_counter();

        assert_eq!(counter.call("bump", &[]).unwrap(), Value::Int(1));
        assert_eq!(counter.getter("double").unwrap(), Value::Int(2));
        assert_eq!(counter.revision().unwrap().get(), 2);
    }

    #[test]
    fn unknown_members_are_reported() {
        let (_store, counter) = store_with_counter();
        assert!(matches!(
            counter.getter("triple"),
            Err(StoreError::UnknownMember { kind: "getter", .. })
        ));
        assert!(matches!(
            counter.call("reset", &[]),
            Err(StoreError::UnknownMember { kind: "action", .. })
        ));
    }

    #[test]
    fn direct_writes_are_rejected() {
        let (_store, counter) = store_with_counter();
        assert!(matches!(
            counter.write("value", 10),
            Err(StoreError::MutationOutsideTransaction { .. })
        ));
        assert_eq!(counter.get("value").unwrap(), Some(Value::Int(0)));
    }

    #[test]
    fn repeated_resolution_returns_the_same_instance() {
        let (store, counter) = store_with_counter();
        let again = store.resolve(store.root(), "counter").unwrap();
        assert_eq!(again.key(), counter.key());
        assert_eq!(again.revision().unwrap(), counter.revision().unwrap());
    }

    #[test]
    fn stateless_modules_read_as_null() {
        let store = Store::new("stateless", StoreSettings::default()).unwrap();
        store
            .register(store.root(), ModuleClass::builder("api").build())
            .unwrap();
        let api = store.resolve(store.root(), "api").unwrap();
        assert_eq!(api.state().unwrap(), Value::Null);
        assert!(!api.is_destroyed());
    }
}
