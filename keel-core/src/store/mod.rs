//! Store
//!
//! The [`Store`] ties the pieces together: the scope arena decides which
//! module instances exist, the mutation engine owns their state, and the
//! watcher registry hears about every commit.
//!
//! # Data Flow
//!
//! ```text
//! resolve ──► ScopeArena ──ModuleInitialized──► MutationEngine::attach
//!
//! dispatch ──► MutationEngine ──commit──► broadcast record ──► watchers.run()
//!                                                               │
//!                 Subscription: revisions moved? ──► paths changed? ──► on_change
//! ```
//!
//! `dispatch` returns only after every watcher has run, so notification for
//! one mutation is complete before the next one from the same caller is
//! applied.

mod registry;
mod settings;
mod status;
mod transport;

pub use registry::StoreRegistry;
pub use settings::{StoreSettings, DEFAULT_MUTATION_BUFFER};
pub use status::STATUS_MODULE;
pub use transport::{pump, ChannelSink, MutationSink};

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::StoreResult;
use crate::module::{InitContext, ModuleClass, ModuleHandle};
use crate::mutation::{Applied, Commit, Mutation, MutationEngine};
use crate::reactive::{self, Capture, DependencyWatcher, OwnerId, Subscription, WatcherId, WatcherRegistry};
use crate::scope::{InitStep, ScopeArena, ScopeEvent, ScopeId, Teardown};
use crate::state::{ModuleKey, Revision, Value};
use crate::view::StateView;

type EventListener = Arc<dyn Fn(&ScopeEvent) + Send + Sync>;

struct StoreInner {
    id: String,
    settings: StoreSettings,
    root: ScopeId,
    engine: MutationEngine,
    scopes: Mutex<ScopeArena>,
    watchers: WatcherRegistry,
    listeners: RwLock<Vec<EventListener>>,
    mutations: broadcast::Sender<Mutation>,
    sink: RwLock<Option<Arc<dyn MutationSink>>>,
}

/// A hierarchical, reactive module store.
///
/// Cloning is cheap; clones share everything.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Create a store with a root scope holding the status module.
    pub fn new(id: impl Into<String>, settings: StoreSettings) -> StoreResult<Self> {
        let arena = ScopeArena::new();
        let root = arena.root();
        let (mutations, _) = broadcast::channel(settings.mutation_buffer.max(1));

        let store = Self {
            inner: Arc::new(StoreInner {
                id: id.into(),
                root,
                engine: MutationEngine::new(),
                scopes: Mutex::new(arena),
                watchers: WatcherRegistry::new(),
                listeners: RwLock::new(Vec::new()),
                mutations,
                sink: RwLock::new(None),
                settings,
            }),
        };

        store.register(root, status::status_class(store.inner.settings.is_remote))?;
        store.resolve(root, STATUS_MODULE)?;
        debug!(store = %store.inner.id, remote = store.inner.settings.is_remote, "store created");
        Ok(store)
    }

    /// Store id.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Settings the store was created with.
    pub fn settings(&self) -> &StoreSettings {
        &self.inner.settings
    }

    /// Whether both handles point at the same store.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn engine(&self) -> &MutationEngine {
        &self.inner.engine
    }

    // ------------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------------

    /// The root scope.
    pub fn root(&self) -> ScopeId {
        self.inner.root
    }

    /// Handle to the root scope.
    pub fn root_scope(&self) -> ScopeHandle {
        self.scope(self.inner.root)
    }

    /// Handle to any scope. Operations fail if it does not exist.
    pub fn scope(&self, id: ScopeId) -> ScopeHandle {
        ScopeHandle {
            store: self.clone(),
            id,
        }
    }

    /// Create a scope under `parent`.
    pub fn create_scope(&self, parent: ScopeId) -> StoreResult<ScopeId> {
        let scope = self.inner.scopes.lock().create_child(parent)?;
        trace!(scope = %scope, parent = %parent, "scope created");
        self.emit(&ScopeEvent::ScopeCreated { scope, parent });
        Ok(scope)
    }

    /// Register `class` in `scope` under its own name.
    pub fn register(&self, scope: ScopeId, class: Arc<ModuleClass>) -> StoreResult<()> {
        let name = class.name().to_owned();
        self.register_as(scope, &name, class)
    }

    /// Register `class` in `scope` under `name`.
    ///
    /// A name whose instance already exists in that scope keeps the
    /// existing instance.
    pub fn register_as(&self, scope: ScopeId, name: &str, class: Arc<ModuleClass>) -> StoreResult<()> {
        let registered = self.inner.scopes.lock().register(scope, name, class)?;
        if registered {
            trace!(scope = %scope, module = name, "module registered");
            self.emit(&ScopeEvent::ModuleRegistered {
                scope,
                name: name.to_owned(),
            });
        } else {
            debug!(scope = %scope, module = name, "module already instantiated, registration ignored");
        }
        Ok(())
    }

    /// Resolve `name` from `scope`, instantiating it on first use.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> StoreResult<ModuleHandle> {
        self.init(scope, name, &[])
    }

    /// Resolve `name` from `scope`, passing `args` to its constructor if it
    /// has not been instantiated yet.
    ///
    /// The instance lives in the scope holding the registration, which may
    /// be an ancestor of `scope`.
    pub fn init(&self, scope: ScopeId, name: &str, args: &[Value]) -> StoreResult<ModuleHandle> {
        let _gate = self.inner.engine.lock_gate();

        let (owner, step) = {
            let mut scopes = self.inner.scopes.lock();
            let owner = scopes.locate(scope, name)?;
            (owner, scopes.begin_init(owner, name)?)
        };
        let key = ModuleKey::new(name, owner);

        let class = match step {
            InitStep::Ready(class) => return Ok(ModuleHandle::new(self.clone(), key, class)),
            InitStep::Begin(class) => class,
        };

        match self.construct(&key, &class, args) {
            Ok(state) => {
                self.inner.engine.attach(&key, Arc::clone(&class), state);
                self.inner.scopes.lock().finish_init(owner, name);
                debug!(module = %key, "module initialized");
                self.emit(&ScopeEvent::ModuleInitialized { key: key.clone() });
                Ok(ModuleHandle::new(self.clone(), key, class))
            }
            Err(err) => {
                self.inner.scopes.lock().abort_init(owner, name);
                debug!(module = %key, error = %err, "module constructor failed");
                Err(err)
            }
        }
    }

    fn construct(&self, key: &ModuleKey, class: &ModuleClass, args: &[Value]) -> StoreResult<Option<Value>> {
        let initial = class.construct_default();
        match class.init_fn() {
            Some(init) => {
                let ctx = InitContext::new(self, key);
                Ok(init(&ctx, args)?.or(initial))
            }
            None => Ok(initial),
        }
    }

    /// Destroy `scope`, its descendants and every module instantiated in
    /// them. Children go first; within a scope, modules go in reverse
    /// registration order.
    pub fn destroy_scope(&self, scope: ScopeId) -> StoreResult<Teardown> {
        let _gate = self.inner.engine.lock_gate();
        let teardown = self.inner.scopes.lock().destroy(scope)?;

        let mut modules = teardown.modules.iter().peekable();
        for scope in &teardown.scopes {
            while let Some(key) = modules.next_if(|key| key.scope() == *scope) {
                self.inner.engine.detach(key);
                debug!(module = %key, "module destroyed");
                self.emit(&ScopeEvent::ModuleDestroyed { key: key.clone() });
            }
            debug!(scope = %scope, "scope destroyed");
            self.emit(&ScopeEvent::ScopeDestroyed { scope: *scope });
        }

        Ok(teardown)
    }

    /// Listen to scope lifecycle transitions.
    pub fn on_scope_event<F>(&self, listener: F)
    where
        F: Fn(&ScopeEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    fn emit(&self, event: &ScopeEvent) {
        let listeners = self.inner.listeners.read().clone();
        for listener in listeners {
            listener(event);
        }
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Apply a mutation envelope. A missing scope means the root scope.
    ///
    /// Returns after the commit has been broadcast and every watcher has
    /// run. Inside another mutation the envelope joins the open transaction
    /// and nothing is published until it commits.
    pub fn dispatch(&self, mutation: &Mutation) -> StoreResult<Applied> {
        let _gate = self.inner.engine.lock_gate();
        let (module, _) = mutation.target()?;
        let key = ModuleKey::new(module, mutation.scope.unwrap_or(self.inner.root));

        let applied = self.inner.engine.dispatch(&key, mutation)?;
        if let Applied::Committed(commit) = &applied {
            self.publish(mutation, commit);
        }
        Ok(applied)
    }

    fn publish(&self, mutation: &Mutation, commit: &Commit) {
        for (key, revision) in &commit.revisions {
            debug!(
                mutation = %mutation.mutation_type,
                module = %key,
                revision = revision.get(),
                "mutation committed"
            );
        }
        // No receivers is fine
        let _ = self.inner.mutations.send(mutation.clone());
        self.inner.watchers.run();
    }

    /// Route a locally originated mutation: to the transport for a remote
    /// store with a sink installed, to [`Store::dispatch`] otherwise.
    pub fn submit(&self, mutation: Mutation) -> StoreResult<()> {
        if self.inner.settings.is_remote && !self.inner.engine.is_mutating() {
            let sink = self.inner.sink.read().clone();
            if let Some(sink) = sink {
                trace!(store = %self.inner.id, mutation = %mutation.mutation_type, "forwarding mutation");
                return sink.send(&mutation);
            }
        }
        self.dispatch(&mutation).map(drop)
    }

    /// Install the transport remote stores forward mutations to.
    pub fn set_transport(&self, sink: Arc<dyn MutationSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    /// Remove the transport.
    pub fn clear_transport(&self) {
        self.inner.sink.write().take();
    }

    /// Receive a copy of every committed mutation envelope.
    pub fn subscribe_mutations(&self) -> broadcast::Receiver<Mutation> {
        self.inner.mutations.subscribe()
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// Committed state of a module instance.
    pub fn state(&self, key: &ModuleKey) -> StoreResult<Value> {
        self.inner.engine.snapshot(key)
    }

    /// Revision of a module instance.
    pub fn revision(&self, key: &ModuleKey) -> StoreResult<Revision> {
        self.inner.engine.revision(key)
    }

    /// Whether any of the recorded revisions moved.
    pub fn revisions_changed(&self, seen: &HashMap<ModuleKey, Revision>) -> bool {
        self.inner.engine.revisions_changed(seen)
    }

    /// Seed root-scope modules with state, resetting their revisions to 1,
    /// then mark the store connected.
    ///
    /// Every name must be registered in the root scope; unregistered names
    /// fail with `ResolutionFailure`.
    pub fn set_bulk_state<I, K>(&self, states: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let _gate = self.inner.engine.lock_gate();
        let root = self.inner.root;

        for (name, state) in states {
            let handle = self.resolve(root, name.as_ref())?;
            let revision = self.inner.engine.hydrate(handle.key(), state)?;
            debug!(module = %handle.key(), revision = %revision, "module state seeded");
        }

        self.dispatch(&Mutation::new(STATUS_MODULE, "setConnected", vec![Value::Bool(true)]))?;
        Ok(())
    }

    /// `moduleName → state` for every stateful module of `scope`, the
    /// status module excluded. This is what a remote mirror is seeded with.
    pub fn bulk_state(&self, scope: ScopeId) -> IndexMap<String, Value> {
        let mut states = self.inner.engine.scope_states(scope);
        states.shift_remove(STATUS_MODULE);
        states
    }

    /// Whether the store can be used: always for local stores, after
    /// seeding for remote ones.
    pub fn is_ready(&self) -> StoreResult<bool> {
        let status = self.resolve(self.inner.root, STATUS_MODULE)?;
        Ok(status.getter("isReady")?.as_bool().unwrap_or(false))
    }

    // ------------------------------------------------------------------------
    // Reactivity
    // ------------------------------------------------------------------------

    /// The merged view of a module.
    pub fn create_view(&self, handle: &ModuleHandle) -> StateView {
        StateView::for_module(handle)
    }

    /// Run `f` over a read-tracking wrapper of `view`.
    pub fn track<T, F>(&self, view: &StateView, f: F) -> StoreResult<Capture<T>>
    where
        F: FnOnce(&DependencyWatcher<'_>) -> StoreResult<T>,
    {
        reactive::track(view, f)
    }

    /// Subscribe `on_change` to whatever `capture` reads from `view`.
    pub fn subscribe<C, N>(&self, view: StateView, capture: C, on_change: N) -> StoreResult<Subscription>
    where
        C: Fn(&DependencyWatcher<'_>) -> StoreResult<Value> + Send + Sync + 'static,
        N: Fn(&Value) + Send + Sync + 'static,
    {
        Subscription::new(self, view, capture, on_change)
    }

    /// Run `callback` after every commit.
    pub fn create_watcher<F>(&self, owner: OwnerId, callback: F) -> WatcherId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.watchers.create(owner, callback)
    }

    /// Stop running a watcher. Safe to call from inside a watcher.
    pub fn remove_watcher(&self, id: WatcherId) -> bool {
        self.inner.watchers.remove(id)
    }

    /// The watcher registry.
    pub fn watchers(&self) -> &WatcherRegistry {
        &self.inner.watchers
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("settings", &self.inner.settings)
            .field("engine", &self.inner.engine)
            .field("watchers", &self.inner.watchers)
            .finish()
    }
}

/// A scope of a store.
#[derive(Debug, Clone)]
pub struct ScopeHandle {
    store: Store,
    id: ScopeId,
}

impl ScopeHandle {
    /// Scope id.
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Owning store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create a child scope.
    pub fn create_child(&self) -> StoreResult<ScopeHandle> {
        let id = self.store.create_scope(self.id)?;
        Ok(self.store.scope(id))
    }

    /// Register a class under its own name.
    pub fn register(&self, class: Arc<ModuleClass>) -> StoreResult<&Self> {
        self.store.register(self.id, class)?;
        Ok(self)
    }

    /// Register a class under `name`.
    pub fn register_as(&self, name: &str, class: Arc<ModuleClass>) -> StoreResult<&Self> {
        self.store.register_as(self.id, name, class)?;
        Ok(self)
    }

    /// Resolve a module from this scope.
    pub fn resolve(&self, name: &str) -> StoreResult<ModuleHandle> {
        self.store.resolve(self.id, name)
    }

    /// Resolve a module from this scope with constructor arguments.
    pub fn init(&self, name: &str, args: &[Value]) -> StoreResult<ModuleHandle> {
        self.store.init(self.id, name, args)
    }

    /// Destroy this scope and everything below it.
    pub fn destroy(&self) -> StoreResult<Teardown> {
        self.store.destroy_scope(self.id)
    }

    /// States of this scope's stateful modules.
    pub fn bulk_state(&self) -> IndexMap<String, Value> {
        self.store.bulk_state(self.id)
    }
}
