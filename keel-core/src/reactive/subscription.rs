//! Subscription Implementation
//!
//! A Subscription is a selector bound to a view: it runs a capture function
//! over a tracked wrapper of the view and calls `on_change` whenever what the
//! capture read has changed.
//!
//! # How Subscriptions Work
//!
//! 1. When created, the capture runs immediately to establish the initial
//!    output, the paths it read and the module revisions behind them.
//!
//! 2. A watcher is registered with the store. It runs after every commit.
//!
//! 3. Each run performs the two-tier check:
//!    a. If none of the recorded revisions moved, stop. Nothing read can
//!       have changed.
//!    b. Otherwise re-resolve every recorded path against the view and
//!       compare it, deeply, with the recorded value.
//!
//! 4. On a difference the capture runs again (refreshing output, paths and
//!    revisions) and `on_change` receives the new output. Without one, only
//!    the revision snapshot is refreshed.
//!
//! # Limitations
//!
//! Only previously read paths are compared. A capture that would read a new
//! path after a change elsewhere only picks it up the next time it actually
//! re-runs.
//!
//! # Cleanup
//!
//! Dropping the subscription removes its watcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::context::AccessRecorder;
use super::tracker::{track, AccessLog, DependencyWatcher};
use super::watcher::{OwnerId, WatcherId};
use crate::error::StoreResult;
use crate::state::{ModuleKey, Revision, Value};
use crate::store::Store;
use crate::view::StateView;

type CaptureFn = Box<dyn Fn(&DependencyWatcher<'_>) -> StoreResult<Value> + Send + Sync>;
type ChangeFn = Box<dyn Fn(&Value) + Send + Sync>;

/// What the last successful capture saw.
struct Captured {
    output: Value,
    log: AccessLog,
    revisions: HashMap<ModuleKey, Revision>,
}

struct SubscriptionInner {
    store: Store,
    view: StateView,
    capture: CaptureFn,
    on_change: ChangeFn,
    captured: Mutex<Captured>,
    last_error: Mutex<Option<String>>,
    disposed: AtomicBool,
    checks: AtomicU64,
    skips: AtomicU64,
    notifications: AtomicU64,
}

impl SubscriptionInner {
    fn capture(&self) -> StoreResult<Captured> {
        let capture = track(&self.view, |watcher| (self.capture)(watcher))?;
        Ok(Captured {
            output: capture.output,
            log: capture.log,
            revisions: capture.revisions,
        })
    }

    /// One watcher run.
    fn check(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.checks.fetch_add(1, Ordering::Relaxed);

        let (log, moved) = {
            let captured = self.captured.lock();
            (
                captured.log.clone(),
                self.store.revisions_changed(&captured.revisions),
            )
        };

        if !moved {
            self.skips.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let recorder = AccessRecorder::enter();
        let change = log.first_change(&self.view);
        let observed = recorder.finish();

        match change {
            Ok(None) => {
                self.captured.lock().revisions = observed;
            }
            Ok(Some(path)) => {
                trace!(path = %path, "subscription input changed");
                self.refresh();
            }
            Err(err) => self.fail(err.to_string()),
        }
    }

    /// Re-run the capture and notify.
    fn refresh(&self) {
        match self.capture() {
            Ok(captured) => {
                let output = captured.output.clone();
                *self.captured.lock() = captured;
                self.last_error.lock().take();
                self.notifications.fetch_add(1, Ordering::Relaxed);
                (self.on_change)(&output);
            }
            Err(err) => self.fail(err.to_string()),
        }
    }

    fn fail(&self, message: String) {
        warn!(error = %message, "subscription capture failed");
        *self.last_error.lock() = Some(message);
    }
}

/// A selector re-evaluated after commits that change what it read.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use keel_core::prelude::*;
/// use serde_json::json;
///
/// let store = Store::new("docs", StoreSettings::default()).unwrap();
/// store.register(store.root(), ModuleClass::builder("counter")
///     .state(Value::from(json!({"value": 0, "other": 0})))
///     .mutation("set", |ctx, args| ctx.set(args.str(0)?, args.value(1)?))
///     .build()).unwrap();
/// let counter = store.resolve(store.root(), "counter").unwrap();
///
/// let seen = Arc::new(AtomicUsize::new(0));
/// let seen_in = seen.clone();
/// let sub = store.subscribe(
///     counter.view(),
///     |w| Ok(w.get("value")?.unwrap_or(Value::Null)),
///     move |_| { seen_in.fetch_add(1, Ordering::SeqCst); },
/// ).unwrap();
///
/// counter.commit("set", vec!["other".into(), 1.into()]).unwrap();
/// assert_eq!(seen.load(Ordering::SeqCst), 0);
///
/// counter.commit("set", vec!["value".into(), 1.into()]).unwrap();
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// assert_eq!(sub.output(), Value::Int(1));
/// ```
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
    owner: OwnerId,
    watcher: WatcherId,
}

impl Subscription {
    /// Capture once and start watching.
    pub fn new<C, N>(store: &Store, view: StateView, capture: C, on_change: N) -> StoreResult<Self>
    where
        C: Fn(&DependencyWatcher<'_>) -> StoreResult<Value> + Send + Sync + 'static,
        N: Fn(&Value) + Send + Sync + 'static,
    {
        let inner = Arc::new(SubscriptionInner {
            store: store.clone(),
            view,
            capture: Box::new(capture),
            on_change: Box::new(on_change),
            captured: Mutex::new(Captured {
                output: Value::Null,
                log: AccessLog::new(),
                revisions: HashMap::new(),
            }),
            last_error: Mutex::new(None),
            disposed: AtomicBool::new(false),
            checks: AtomicU64::new(0),
            skips: AtomicU64::new(0),
            notifications: AtomicU64::new(0),
        });

        *inner.captured.lock() = inner.capture()?;

        let owner = OwnerId::new();
        let weak: Weak<SubscriptionInner> = Arc::downgrade(&inner);
        let watcher = store.create_watcher(owner, move || {
            if let Some(inner) = weak.upgrade() {
                inner.check();
            }
        });

        Ok(Self {
            inner,
            owner,
            watcher,
        })
    }

    /// Owner id the watcher is registered under.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// The registered watcher.
    pub fn watcher_id(&self) -> WatcherId {
        self.watcher
    }

    /// Output of the last successful capture.
    pub fn output(&self) -> Value {
        self.inner.captured.lock().output.clone()
    }

    /// Paths and values the last successful capture read.
    pub fn accessed(&self) -> AccessLog {
        self.inner.captured.lock().log.clone()
    }

    /// Error of the last failed check, cleared by the next successful
    /// capture.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().clone()
    }

    /// Number of watcher runs.
    pub fn check_count(&self) -> u64 {
        self.inner.checks.load(Ordering::Relaxed)
    }

    /// Number of runs settled by the revision comparison alone.
    pub fn skip_count(&self) -> u64 {
        self.inner.skips.load(Ordering::Relaxed)
    }

    /// Number of times `on_change` was called.
    pub fn notify_count(&self) -> u64 {
        self.inner.notifications.load(Ordering::Relaxed)
    }

    /// Re-run the capture now and notify, regardless of changes.
    pub fn refresh(&self) {
        self.inner.refresh();
    }

    /// Stop watching.
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::SeqCst) {
            self.inner.store.remove_watcher(self.watcher);
        }
    }

    /// Whether the subscription has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("watcher", &self.watcher)
            .field("checks", &self.check_count())
            .field("notifications", &self.notify_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
