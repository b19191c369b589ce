//! Mutation Engine
//!
//! The engine owns the authoritative state tree and revision table and is
//! the only code that replaces snapshots.
//!
//! # How Dispatch Works
//!
//! 1. The target (module, scope) pair is looked up. A pair that was torn
//!    down is destroyed; a pair never attached, or an unknown method, is an
//!    unknown mutation type.
//!
//! 2. A transaction opens: a [`Draft`] over the current snapshot is created
//!    and the calling thread is recorded as the transaction owner. While it
//!    is open, "a mutation is in progress" for that thread.
//!
//! 3. The registered method body runs against the draft.
//!
//! 4. The transaction closes no matter how the body ended. On error the
//!    drafts are dropped and the error propagates; nothing was committed.
//!
//! 5. On success every drafted snapshot is swapped into the tree and its
//!    revision bumped, under a single write lock, so no reader ever sees a
//!    revision without the matching state.
//!
//! # Nesting
//!
//! A dispatch that arrives while the calling thread already owns an open
//! transaction does not open another one. The method body runs directly
//! against the draft of the open transaction (a draft for a different module
//! is opened lazily inside the same transaction) and nothing is bumped until
//! the outer transaction commits.
//!
//! # Threads
//!
//! Dispatch is serialized by a reentrant gate: other threads wait until the
//! current dispatch (including the store's notification pass) finishes,
//! while the dispatching thread may re-enter for nested mutations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use indexmap::IndexMap;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use tracing::{debug, trace};

use super::context::MutationContext;
use super::Mutation;
use crate::error::{StoreError, StoreResult};
use crate::module::{ModuleClass, MutationFn};
use crate::scope::ScopeId;
use crate::state::{Draft, ModuleKey, Revision, RevisionTable, StateTree, Value};

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A new transaction committed.
    Committed(Commit),
    /// The method ran inside an already open transaction.
    Nested,
}

/// What a committed transaction changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Every module replaced by the commit with its new revision, origin
    /// module first.
    pub revisions: Vec<(ModuleKey, Revision)>,
}

/// A module instance the engine can dispatch to.
struct LiveModule {
    class: Arc<ModuleClass>,
    stateful: bool,
}

/// Everything behind the engine's state lock.
#[derive(Default)]
struct EngineState {
    tree: StateTree,
    revisions: RevisionTable,
    live: HashMap<ModuleKey, LiveModule>,
    /// Instances that were attached and later detached.
    destroyed: HashSet<ModuleKey>,
}

/// The open transaction.
struct Transaction {
    owner: ThreadId,
    drafts: IndexMap<ModuleKey, Draft>,
}

/// Owns the state tree and applies mutations to it.
pub struct MutationEngine {
    state: RwLock<EngineState>,
    transaction: Mutex<Option<Transaction>>,
    gate: ReentrantMutex<()>,
}

impl MutationEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState::default()),
            transaction: Mutex::new(None),
            gate: ReentrantMutex::new(()),
        }
    }

    /// Serialize a dispatch-and-notify sequence against other threads.
    pub(crate) fn lock_gate(&self) -> ReentrantMutexGuard<'_, ()> {
        self.gate.lock()
    }

    // ------------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------------

    /// Make a module instance dispatchable. Stateful modules get a tree
    /// entry at revision 1.
    pub fn attach(&self, key: &ModuleKey, class: Arc<ModuleClass>, state: Option<Value>) {
        let mut guard = self.state.write();
        let stateful = state.is_some();
        if let Some(value) = state {
            guard.tree.insert(key, value);
            guard.revisions.init(key);
        }
        guard.destroyed.remove(key);
        guard.live.insert(key.clone(), LiveModule { class, stateful });
        trace!(module = %key, stateful, "module attached");
    }

    /// Forget a module instance: its state entry, revision and methods.
    pub fn detach(&self, key: &ModuleKey) -> bool {
        let mut guard = self.state.write();
        let had_state = guard.tree.remove(key).is_some();
        guard.revisions.remove(key);
        let was_live = guard.live.remove(key).is_some();
        if was_live {
            guard.destroyed.insert(key.clone());
        }
        trace!(module = %key, "module detached");
        had_state || was_live
    }

    /// Seed a live module's state. Its revision count restarts at 1 in a
    /// new epoch, so readers that saw the old state see a changed revision.
    pub fn hydrate(&self, key: &ModuleKey, value: Value) -> StoreResult<Revision> {
        let mut guard = self.state.write();
        let live = guard
            .live
            .get_mut(key)
            .ok_or_else(|| StoreError::module_destroyed(key.module(), key.scope()))?;
        live.stateful = true;
        guard.tree.insert(key, value);
        Ok(guard.revisions.reseed(key))
    }

    /// Whether the instance is live.
    pub fn is_live(&self, key: &ModuleKey) -> bool {
        self.state.read().live.contains_key(key)
    }

    /// Committed snapshot of a module.
    pub fn snapshot(&self, key: &ModuleKey) -> StoreResult<Value> {
        self.state
            .read()
            .tree
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::module_destroyed(key.module(), key.scope()))
    }

    /// Committed snapshot and its revision, read atomically.
    pub fn read(&self, key: &ModuleKey) -> StoreResult<(Value, Revision)> {
        let guard = self.state.read();
        match (guard.tree.get(key), guard.revisions.get(key)) {
            (Some(value), Some(revision)) => Ok((value.clone(), revision)),
            _ => Err(StoreError::module_destroyed(key.module(), key.scope())),
        }
    }

    /// Current revision of a module.
    pub fn revision(&self, key: &ModuleKey) -> StoreResult<Revision> {
        self.state
            .read()
            .revisions
            .get(key)
            .ok_or_else(|| StoreError::module_destroyed(key.module(), key.scope()))
    }

    /// Whether any revision in `seen` moved.
    pub fn revisions_changed(&self, seen: &HashMap<ModuleKey, Revision>) -> bool {
        self.state.read().revisions.changed_since(seen)
    }

    /// All module states held by one scope.
    pub fn scope_states(&self, scope: ScopeId) -> IndexMap<String, Value> {
        self.state.read().tree.scope_states(scope)
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Whether the calling thread is inside a mutation.
    pub fn is_mutating(&self) -> bool {
        self.transaction
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.owner == thread::current().id())
    }

    /// The draft value of `key` if the calling thread has one open.
    pub(crate) fn draft_value(&self, key: &ModuleKey) -> Option<Value> {
        let current = thread::current().id();
        self.transaction
            .lock()
            .as_ref()
            .filter(|tx| tx.owner == current)
            .and_then(|tx| tx.drafts.get(key))
            .map(|draft| draft.current().clone())
    }

    /// Run `f` against the calling thread's draft of `key`.
    ///
    /// Fails with [`StoreError::MutationOutsideTransaction`] when there is
    /// no such draft: that state is a committed snapshot and cannot be
    /// written.
    pub(crate) fn with_draft<R>(
        &self,
        key: &ModuleKey,
        f: impl FnOnce(&mut Draft) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let current = thread::current().id();
        let mut guard = self.transaction.lock();
        let draft = guard
            .as_mut()
            .filter(|tx| tx.owner == current)
            .and_then(|tx| tx.drafts.get_mut(key))
            .ok_or_else(|| StoreError::outside_transaction(key.module()))?;
        f(draft)
    }

    /// Look up the body of `method` for a live instance.
    fn method(&self, key: &ModuleKey, mutation_type: &str, method: &str) -> StoreResult<MutationFn> {
        let guard = self.state.read();
        match guard.live.get(key) {
            Some(live) if live.stateful => live
                .class
                .mutation(method)
                .cloned()
                .ok_or_else(|| StoreError::unknown_mutation(mutation_type)),
            Some(_) => Err(StoreError::unknown_mutation(mutation_type)),
            None if guard.destroyed.contains(key) => {
                Err(StoreError::module_destroyed(key.module(), key.scope()))
            }
            None => Err(StoreError::unknown_mutation(mutation_type)),
        }
    }

    /// Apply `mutation` to `key`.
    pub fn dispatch(&self, key: &ModuleKey, mutation: &Mutation) -> StoreResult<Applied> {
        let _gate = self.gate.lock();
        let (_, method) = mutation.target()?;

        if self.is_mutating() {
            trace!(mutation = %mutation.mutation_type, module = %key, "nested mutation");
            self.apply_nested(key, method, &mutation.mutation_type, &mutation.payload)?;
            return Ok(Applied::Nested);
        }

        let body = self.method(key, &mutation.mutation_type, method)?;
        let base = self.snapshot(key)?;

        debug!(
            mutation = %mutation.mutation_type,
            id = mutation.id,
            module = %key,
            "run mutation"
        );

        let guard = TransactionGuard::open(self, key.clone(), base);
        let result = body(&mut MutationContext::new(self, key.clone()), &mutation.payload);
        let transaction = guard.close();
        result?;

        let transaction =
            transaction.ok_or_else(|| StoreError::failed("transaction closed before commit"))?;
        self.commit(transaction)
    }

    /// Run a method body inside the calling thread's open transaction.
    pub(crate) fn apply_nested(
        &self,
        key: &ModuleKey,
        method: &str,
        mutation_type: &str,
        args: &[Value],
    ) -> StoreResult<()> {
        let body = self.method(key, mutation_type, method)?;
        self.ensure_draft(key)?;
        body(&mut MutationContext::new(self, key.clone()), args)
    }

    /// Open a draft for `key` inside the current transaction if needed.
    fn ensure_draft(&self, key: &ModuleKey) -> StoreResult<()> {
        let current = thread::current().id();
        let mut guard = self.transaction.lock();
        let tx = guard
            .as_mut()
            .filter(|tx| tx.owner == current)
            .ok_or_else(|| StoreError::outside_transaction(key.module()))?;
        if !tx.drafts.contains_key(key) {
            let base = self.snapshot(key)?;
            tx.drafts.insert(key.clone(), Draft::new(base));
        }
        Ok(())
    }

    /// Swap every draft into the tree and bump its revision.
    fn commit(&self, transaction: Transaction) -> StoreResult<Applied> {
        let mut guard = self.state.write();

        // All or nothing: a module torn down mid-transaction aborts the commit
        if let Some(gone) = transaction
            .drafts
            .keys()
            .find(|key| !guard.tree.contains(key))
        {
            return Err(StoreError::module_destroyed(gone.module(), gone.scope()));
        }

        let mut revisions = Vec::with_capacity(transaction.drafts.len());
        for (key, draft) in transaction.drafts {
            guard.tree.replace(&key, draft.finish())?;
            if let Some(revision) = guard.revisions.bump(&key) {
                trace!(module = %key, revision = revision.get(), "snapshot committed");
                revisions.push((key, revision));
            }
        }

        Ok(Applied::Committed(Commit { revisions }))
    }
}

impl Default for MutationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MutationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.state.read();
        f.debug_struct("MutationEngine")
            .field("modules", &guard.live.len())
            .field("states", &guard.tree.len())
            .finish()
    }
}

/// Clears the open transaction when dropped.
///
/// The in-progress marker is released even if the method body panics.
struct TransactionGuard<'e> {
    engine: &'e MutationEngine,
    closed: bool,
}

impl<'e> TransactionGuard<'e> {
    fn open(engine: &'e MutationEngine, key: ModuleKey, base: Value) -> Self {
        let mut drafts = IndexMap::new();
        drafts.insert(key, Draft::new(base));
        *engine.transaction.lock() = Some(Transaction {
            owner: thread::current().id(),
            drafts,
        });
        Self {
            engine,
            closed: false,
        }
    }

    fn close(mut self) -> Option<Transaction> {
        self.closed = true;
        self.engine.transaction.lock().take()
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.engine.transaction.lock().take();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
