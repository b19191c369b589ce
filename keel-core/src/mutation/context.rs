//! The handle a mutation body writes through.

use super::engine::MutationEngine;
use crate::error::StoreResult;
use crate::state::{ModuleKey, Path, Value};

/// Read/write access to the draft of one module during a mutation.
///
/// Every call locks the transaction briefly; nothing is held while the body
/// runs between calls, so a body may freely dispatch nested mutations.
pub struct MutationContext<'e> {
    engine: &'e MutationEngine,
    key: ModuleKey,
}

impl<'e> MutationContext<'e> {
    pub(crate) fn new(engine: &'e MutationEngine, key: ModuleKey) -> Self {
        Self { engine, key }
    }

    /// The module instance being mutated.
    pub fn key(&self) -> &ModuleKey {
        &self.key
    }

    /// The whole draft value as it stands now.
    pub fn state(&self) -> StoreResult<Value> {
        self.engine
            .with_draft(&self.key, |draft| Ok(draft.current().clone()))
    }

    /// Read one path of the draft. `None` when nothing is there.
    pub fn get(&self, path: impl Into<Path>) -> StoreResult<Option<Value>> {
        let path = path.into();
        self.engine
            .with_draft(&self.key, |draft| Ok(draft.get(&path).cloned()))
    }

    /// Write a value at `path`.
    pub fn set(&mut self, path: impl Into<Path>, value: impl Into<Value>) -> StoreResult<()> {
        let path = path.into();
        let value = value.into();
        self.engine
            .with_draft(&self.key, |draft| draft.set(&path, value).map(drop))
    }

    /// Compute a new value for `path` from the current one.
    pub fn update<F>(&mut self, path: impl Into<Path>, f: F) -> StoreResult<()>
    where
        F: FnOnce(Option<Value>) -> StoreResult<Value>,
    {
        let path = path.into();
        let current = self
            .engine
            .with_draft(&self.key, |draft| Ok(draft.get(&path).cloned()))?;
        let next = f(current)?;
        self.engine
            .with_draft(&self.key, |draft| draft.set(&path, next).map(drop))
    }

    /// Replace the whole state.
    pub fn replace(&mut self, value: impl Into<Value>) -> StoreResult<Value> {
        let value = value.into();
        self.engine
            .with_draft(&self.key, |draft| Ok(draft.replace(value)))
    }

    /// Append to the list at `path`.
    pub fn push(&mut self, path: impl Into<Path>, value: impl Into<Value>) -> StoreResult<()> {
        let path = path.into();
        let value = value.into();
        self.engine
            .with_draft(&self.key, |draft| draft.push(&path, value))
    }

    /// Remove the value at `path`, returning it.
    pub fn remove(&mut self, path: impl Into<Path>) -> StoreResult<Option<Value>> {
        let path = path.into();
        self.engine.with_draft(&self.key, |draft| draft.remove(&path))
    }

    /// Run another mutation of the same module inside this transaction.
    pub fn call(&mut self, method: &str, args: &[Value]) -> StoreResult<()> {
        let key = self.key.clone();
        self.call_module(&key, method, args)
    }

    /// Run a mutation of another module inside this transaction. Its state
    /// commits together with this one.
    pub fn call_module(&mut self, key: &ModuleKey, method: &str, args: &[Value]) -> StoreResult<()> {
        let mutation_type = format!("{}.{}", key.module(), method);
        self.engine.apply_nested(key, method, &mutation_type, args)
    }
}

impl std::fmt::Debug for MutationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationContext")
            .field("key", &self.key)
            .finish()
    }
}
