//! Dependency Watcher
//!
//! [`DependencyWatcher`] wraps a [`StateView`] and records every value read
//! through it, keyed by its full access path, into an [`AccessLog`].
//!
//! # Reading
//!
//! The wrapper implements the same read contract as the view
//! ([`DependencyWatcher::read`]) plus a cursor API for nested data:
//! [`DependencyWatcher::prop`] resolves a top-level property and hands back a
//! [`Tracked`] cursor; [`Tracked::at`] steps into nested values lazily.
//! Nothing is recorded while navigating. A read is recorded when a value is
//! materialized with [`Tracked::value`] (or one of its typed shortcuts), so
//! walking through `cart` to read `cart.items` depends on `cart.items` only,
//! not on the whole `cart`.
//!
//! Paths that resolve to nothing are recorded as `None` (undefined) rather
//! than skipped, so a key appearing later is seen as a change.
//!
//! # Comparing
//!
//! Two logs are compared per path with deep equality, never by identity:
//! snapshots may be rebuilt with new allocations and equal content.

use std::cell::RefCell;
use std::collections::HashMap;

use indexmap::IndexMap;

use super::context::AccessRecorder;
use crate::error::StoreResult;
use crate::state::{ModuleKey, Path, Revision, Seg, Value};
use crate::view::StateView;

/// Every `(path, value)` pair observed during one capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessLog {
    reads: IndexMap<Path, Option<Value>>,
}

impl AccessLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read. A later read of the same path overwrites the value.
    pub fn record(&mut self, path: Path, value: Option<Value>) {
        self.reads.insert(path, value);
    }

    /// Value recorded for `path`: `None` if never read, `Some(None)` if read
    /// as undefined.
    pub fn get(&self, path: &Path) -> Option<&Option<Value>> {
        self.reads.get(path)
    }

    /// Paths read, in first-read order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.reads.keys()
    }

    /// Number of distinct paths read.
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    /// Whether nothing was read.
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.reads.clear();
    }

    /// Paths whose value differs between the two logs, including paths only
    /// one of them read.
    pub fn diff(&self, other: &AccessLog) -> Vec<Path> {
        let mut changed: Vec<Path> = self
            .reads
            .iter()
            .filter(|(path, value)| other.reads.get(*path) != Some(*value))
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(
            other
                .reads
                .keys()
                .filter(|path| !self.reads.contains_key(*path))
                .cloned(),
        );
        changed
    }

    /// Whether both logs read the same paths with deeply equal values.
    pub fn same_as(&self, other: &AccessLog) -> bool {
        self.reads.len() == other.reads.len() && self.diff(other).is_empty()
    }

    /// Re-resolve every recorded path against `view` and return the first
    /// one whose value changed.
    ///
    /// Only paths read before are checked; this is the cheap form of
    /// "would the capture see something different now".
    pub fn first_change(&self, view: &StateView) -> StoreResult<Option<Path>> {
        for (path, seen) in &self.reads {
            let current = resolve(view, path)?;
            if current != *seen {
                return Ok(Some(path.clone()));
            }
        }
        Ok(None)
    }
}

/// Resolve a full path against a view: the first segment is a property, the
/// rest walk into its value.
fn resolve(view: &StateView, path: &Path) -> StoreResult<Option<Value>> {
    let Some(first) = path.first() else {
        return Ok(None);
    };
    let root = view.read(&first.to_key())?;
    Ok(root.and_then(|value| value.get_path(&path.tail()).cloned()))
}

/// Read-tracking wrapper around a [`StateView`].
pub struct DependencyWatcher<'v> {
    view: &'v StateView,
    log: RefCell<AccessLog>,
}

impl<'v> DependencyWatcher<'v> {
    /// Wrap `view`.
    pub fn new(view: &'v StateView) -> Self {
        Self {
            view,
            log: RefCell::new(AccessLog::new()),
        }
    }

    /// The wrapped view.
    pub fn view(&self) -> &'v StateView {
        self.view
    }

    /// Resolve a top-level property into a cursor.
    pub fn prop(&self, name: &str) -> StoreResult<Tracked<'_, 'v>> {
        let value = self.view.read(name)?;
        Ok(Tracked {
            watcher: self,
            path: Path::root().key(name),
            value,
            record: self.view.is_reactive(name),
        })
    }

    /// Read a top-level property and record it.
    pub fn read(&self, name: &str) -> StoreResult<Option<Value>> {
        Ok(self.prop(name)?.value())
    }

    /// Read a dotted path and record it.
    pub fn get(&self, path: impl Into<Path>) -> StoreResult<Option<Value>> {
        let path = path.into();
        let Some(first) = path.first() else {
            return Ok(None);
        };
        let mut cursor = self.prop(&first.to_key())?;
        for seg in path.tail().segments() {
            cursor = cursor.at(seg.clone());
        }
        Ok(cursor.value())
    }

    /// Call an action or mutation property. Calls are not recorded.
    pub fn call(&self, name: &str, args: &[Value]) -> StoreResult<Value> {
        self.view.call(name, args)
    }

    /// Everything read since creation or the last reset.
    pub fn accessed(&self) -> AccessLog {
        self.log.borrow().clone()
    }

    /// Forget every recorded read.
    pub fn reset(&self) {
        self.log.borrow_mut().clear();
    }

    /// Consume the wrapper, returning its log.
    pub fn into_accessed(self) -> AccessLog {
        self.log.into_inner()
    }

    fn record(&self, path: Path, value: Option<Value>) {
        self.log.borrow_mut().record(path, value);
    }
}

impl std::fmt::Debug for DependencyWatcher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyWatcher")
            .field("view", self.view)
            .field("reads", &self.log.borrow().len())
            .finish()
    }
}

/// A cursor at one path of a tracked view.
pub struct Tracked<'w, 'v> {
    watcher: &'w DependencyWatcher<'v>,
    path: Path,
    value: Option<Value>,
    record: bool,
}

impl<'w, 'v> Tracked<'w, 'v> {
    /// Step into a child. Missing children give an undefined cursor.
    pub fn at(&self, seg: impl Into<Seg>) -> Tracked<'w, 'v> {
        let seg = seg.into();
        let value = self.value.as_ref().and_then(|v| v.get(&seg)).cloned();
        Tracked {
            watcher: self.watcher,
            path: self.path.child(seg),
            value,
            record: self.record,
        }
    }

    /// Full path of this cursor.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Materialize the value, recording the read.
    pub fn value(&self) -> Option<Value> {
        if self.record {
            self.watcher.record(self.path.clone(), self.value.clone());
        }
        self.value.clone()
    }

    /// Recorded read as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        self.value().and_then(|v| v.as_i64())
    }

    /// Recorded read as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        self.value().and_then(|v| v.as_bool())
    }

    /// Recorded read as a string.
    pub fn as_string(&self) -> Option<String> {
        self.value().and_then(|v| v.as_str().map(str::to_owned))
    }
}

impl std::fmt::Debug for Tracked<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracked")
            .field("path", &self.path)
            .field("value", &self.value)
            .finish()
    }
}

/// Result of one tracked execution.
#[derive(Debug, Clone)]
pub struct Capture<T> {
    /// What the capture function returned.
    pub output: T,
    /// Paths and values it read.
    pub log: AccessLog,
    /// Module revisions it observed.
    pub revisions: HashMap<ModuleKey, Revision>,
}

/// Run `f` over a tracked wrapper of `view`, recording both the values it
/// reads and the module revisions behind them.
pub fn track<T, F>(view: &StateView, f: F) -> StoreResult<Capture<T>>
where
    F: FnOnce(&DependencyWatcher<'_>) -> StoreResult<T>,
{
    let recorder = AccessRecorder::enter();
    let watcher = DependencyWatcher::new(view);
    let output = f(&watcher);
    let revisions = recorder.finish();
    Ok(Capture {
        output: output?,
        log: watcher.into_accessed(),
        revisions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::PropDescriptor;
    use serde_json::json;

    fn fixed(name: &str, value: serde_json::Value) -> PropDescriptor {
        let value = Value::from(value);
        PropDescriptor::value(name, move || Ok(Some(value.clone())))
    }

    fn cart_view(total: i64) -> StateView {
        let mut view = StateView::new();
        view.define_prop(fixed(
            "cart",
            json!({"items": [{"id": "x"}], "total": total}),
        ));
        view
    }

    #[test]
    fn records_leaf_paths_only() {
        let view = cart_view(10);
        let watcher = DependencyWatcher::new(&view);

        let cart = watcher.prop("cart").unwrap();
        let id = cart.at("items").at(0usize).at("id").as_string();
        assert_eq!(id.as_deref(), Some("x"));

        let log = watcher.accessed();
        assert_eq!(log.len(), 1);
        assert_eq!(
            log.get(&Path::parse("cart.items.0.id")),
            Some(&Some(Value::from("x")))
        );
    }

    #[test]
    fn missing_paths_are_recorded_as_undefined() {
        let view = cart_view(10);
        let watcher = DependencyWatcher::new(&view);

        assert_eq!(watcher.get("cart.discount").unwrap(), None);
        assert_eq!(watcher.read("nothing").unwrap(), None);

        let log = watcher.accessed();
        assert_eq!(log.get(&Path::parse("cart.discount")), Some(&None));
        assert_eq!(log.get(&Path::parse("nothing")), Some(&None));
    }

    #[test]
    fn logs_compare_by_value() {
        let before = track(&cart_view(10), |w| w.get("cart.items")).unwrap();
        let after = track(&cart_view(20), |w| w.get("cart.items")).unwrap();

        // Different allocations, same content at the read path
        assert!(before.log.same_as(&after.log));
        assert!(before.log.diff(&after.log).is_empty());

        let total_before = track(&cart_view(10), |w| w.get("cart.total")).unwrap();
        let total_after = track(&cart_view(20), |w| w.get("cart.total")).unwrap();
        assert_eq!(
            total_before.log.diff(&total_after.log),
            vec![Path::parse("cart.total")]
        );
    }

    #[test]
    fn first_change_rechecks_old_paths() {
        let capture = track(&cart_view(10), |w| w.get("cart.total")).unwrap();

        assert_eq!(capture.log.first_change(&cart_view(10)).unwrap(), None);
        assert_eq!(
            capture.log.first_change(&cart_view(11)).unwrap(),
            Some(Path::parse("cart.total"))
        );
    }

    #[test]
    fn wildcard_reads_are_tracked() {
        let mut view = StateView::new();
        view.define_wildcard_prop(|name| Ok(name.strip_prefix("item_").map(Value::from)));

        let capture = track(&view, |w| w.read("item_42")).unwrap();
        assert_eq!(capture.output, Some(Value::from("42")));
        assert_eq!(
            capture.log.get(&Path::parse("item_42")),
            Some(&Some(Value::from("42")))
        );
    }

    #[test]
    fn non_reactive_props_are_not_recorded() {
        let mut view = StateView::new();
        view.define_prop(fixed("config", json!({"a": 1})).non_reactive());

        let capture = track(&view, |w| w.get("config.a")).unwrap();
        assert_eq!(capture.output, Some(Value::Int(1)));
        assert!(capture.log.is_empty());
    }

    #[test]
    fn reset_forgets_reads() {
        let view = cart_view(1);
        let watcher = DependencyWatcher::new(&view);
        watcher.get("cart.total").unwrap();
        watcher.reset();
        assert!(watcher.accessed().is_empty());
    }
}
