//! The state tree and its revision table.
//!
//! The tree maps module name to scope id to the current snapshot. The
//! revision table counts committed mutations per (module, scope) pair. Both
//! are owned by the mutation engine; nothing outside it writes to them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::value::Value;
use crate::error::{StoreError, StoreResult};
use crate::scope::ScopeId;

/// Identifies one module instance: a module name within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey {
    module: Arc<str>,
    scope: ScopeId,
}

impl ModuleKey {
    /// Create a key.
    pub fn new(module: impl AsRef<str>, scope: ScopeId) -> Self {
        Self {
            module: Arc::from(module.as_ref()),
            scope,
        }
    }

    /// Module name.
    #[inline]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Owning scope.
    #[inline]
    pub fn scope(&self) -> ScopeId {
        self.scope
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.module, self.scope)
    }
}

/// Change counter of one (module, scope) pair.
///
/// Starts at [`Revision::INITIAL`] when the module is created and grows by
/// exactly one per committed mutation. Seeding the module's state starts
/// the count over at 1 in a new epoch, so revisions compare as
/// `(epoch, count)` and a seeded revision never equals one read before the
/// seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision {
    epoch: u64,
    count: u64,
}

impl Revision {
    /// The revision of a freshly created module.
    pub const INITIAL: Revision = Revision { epoch: 0, count: 1 };

    /// The raw counter.
    #[inline]
    pub fn get(self) -> u64 {
        self.count
    }

    /// How many times the module's state has been seeded.
    #[inline]
    pub fn epoch(self) -> u64 {
        self.epoch
    }

    /// The following revision.
    #[inline]
    pub fn next(self) -> Revision {
        Revision {
            epoch: self.epoch,
            count: self.count + 1,
        }
    }

    /// Count 1 of the next epoch.
    #[inline]
    pub fn reseeded(self) -> Revision {
        Revision {
            epoch: self.epoch + 1,
            count: 1,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch == 0 {
            write!(f, "{}", self.count)
        } else {
            write!(f, "{}#{}", self.count, self.epoch)
        }
    }
}

/// `moduleName -> scopeId -> snapshot`.
#[derive(Debug, Default, Clone)]
pub struct StateTree {
    modules: IndexMap<String, IndexMap<ScopeId, Value>>,
}

impl StateTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// The snapshot for a key.
    pub fn get(&self, key: &ModuleKey) -> Option<&Value> {
        self.modules
            .get(key.module())
            .and_then(|scopes| scopes.get(&key.scope()))
    }

    /// Whether the key has a live entry.
    pub fn contains(&self, key: &ModuleKey) -> bool {
        self.get(key).is_some()
    }

    /// Whether any scope holds state for this module name.
    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Create or overwrite an entry.
    pub fn insert(&mut self, key: &ModuleKey, value: Value) -> Option<Value> {
        self.modules
            .entry(key.module().to_owned())
            .or_default()
            .insert(key.scope(), value)
    }

    /// Swap in a new snapshot for an existing entry.
    pub fn replace(&mut self, key: &ModuleKey, value: Value) -> StoreResult<Value> {
        self.modules
            .get_mut(key.module())
            .and_then(|scopes| scopes.get_mut(&key.scope()))
            .map(|slot| std::mem::replace(slot, value))
            .ok_or_else(|| StoreError::module_destroyed(key.module(), key.scope()))
    }

    /// Remove an entry, dropping the module's map once its last scope is gone.
    pub fn remove(&mut self, key: &ModuleKey) -> Option<Value> {
        let scopes = self.modules.get_mut(key.module())?;
        let removed = scopes.shift_remove(&key.scope());
        if scopes.is_empty() {
            self.modules.shift_remove(key.module());
        }
        removed
    }

    /// Every module state held by one scope, keyed by module name.
    pub fn scope_states(&self, scope: ScopeId) -> IndexMap<String, Value> {
        self.modules
            .iter()
            .filter_map(|(name, scopes)| scopes.get(&scope).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.modules.values().map(IndexMap::len).sum()
    }

    /// Whether the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Revision counters keyed by module instance.
#[derive(Debug, Default, Clone)]
pub struct RevisionTable {
    revisions: HashMap<ModuleKey, Revision>,
}

impl RevisionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset a key to [`Revision::INITIAL`].
    pub fn init(&mut self, key: &ModuleKey) {
        self.revisions.insert(key.clone(), Revision::INITIAL);
    }

    /// Current revision of a key.
    pub fn get(&self, key: &ModuleKey) -> Option<Revision> {
        self.revisions.get(key).copied()
    }

    /// Restart a key's count at 1 in a new epoch. An unknown key starts
    /// from [`Revision::INITIAL`].
    pub fn reseed(&mut self, key: &ModuleKey) -> Revision {
        let revision = self
            .revisions
            .get(key)
            .copied()
            .unwrap_or(Revision::INITIAL)
            .reseeded();
        self.revisions.insert(key.clone(), revision);
        revision
    }

    /// Increment a key's revision, returning the new value.
    pub fn bump(&mut self, key: &ModuleKey) -> Option<Revision> {
        let revision = self.revisions.get_mut(key)?;
        *revision = revision.next();
        Some(*revision)
    }

    /// Forget a key.
    pub fn remove(&mut self, key: &ModuleKey) -> Option<Revision> {
        self.revisions.remove(key)
    }

    /// Whether any revision in `seen` differs from the current table.
    ///
    /// A key that has disappeared counts as changed. Only keys present in
    /// `seen` are compared.
    pub fn changed_since(&self, seen: &HashMap<ModuleKey, Revision>) -> bool {
        seen.iter()
            .any(|(key, revision)| self.revisions.get(key) != Some(revision))
    }
}
