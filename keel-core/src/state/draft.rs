//! Copy-on-write drafts.
//!
//! A [`Draft`] is the mutable working copy a mutation body sees. It starts
//! out sharing every node with the committed snapshot; the first write to a
//! node clones it (see [`Value::set_path`]) and later writes reuse the clone.
//! Finishing the draft yields the new snapshot. Dropping it instead discards
//! every write, which is how a failing mutation leaves the committed tree
//! untouched.

use super::path::Path;
use super::value::Value;
use crate::error::StoreResult;

/// Mutable working copy of one module's state.
#[derive(Debug, Clone)]
pub struct Draft {
    /// The snapshot the draft started from.
    base: Value,
    /// The working copy.
    working: Value,
    /// Paths written so far, in write order.
    writes: Vec<Path>,
}

impl Draft {
    /// Open a draft over `base`.
    pub fn new(base: Value) -> Self {
        Self {
            working: base.clone(),
            base,
            writes: Vec::new(),
        }
    }

    /// The snapshot this draft started from.
    pub fn base(&self) -> &Value {
        &self.base
    }

    /// The current working value.
    pub fn current(&self) -> &Value {
        &self.working
    }

    /// Read a path from the working value.
    pub fn get(&self, path: &Path) -> Option<&Value> {
        self.working.get_path(path)
    }

    /// Write a value.
    pub fn set(&mut self, path: &Path, value: Value) -> StoreResult<Option<Value>> {
        let previous = self.working.set_path(path, value)?;
        self.writes.push(path.clone());
        Ok(previous)
    }

    /// Replace the whole working value.
    pub fn replace(&mut self, value: Value) -> Value {
        self.writes.push(Path::root());
        std::mem::replace(&mut self.working, value)
    }

    /// Remove a value.
    pub fn remove(&mut self, path: &Path) -> StoreResult<Option<Value>> {
        let removed = self.working.remove_path(path)?;
        self.writes.push(path.clone());
        Ok(removed)
    }

    /// Append to a list.
    pub fn push(&mut self, path: &Path, value: Value) -> StoreResult<()> {
        self.working.push_path(path, value)?;
        self.writes.push(path.clone());
        Ok(())
    }

    /// Mutable access for in-place edits. The path counts as written.
    pub fn get_mut(&mut self, path: &Path) -> StoreResult<&mut Value> {
        let target = self.working.get_path_mut(path)?;
        self.writes.push(path.clone());
        Ok(target)
    }

    /// Whether anything was written.
    pub fn is_modified(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Paths written, in order.
    pub fn written_paths(&self) -> &[Path] {
        &self.writes
    }

    /// Produce the new snapshot.
    ///
    /// An untouched draft hands back its base, so the snapshot keeps its
    /// identity.
    pub fn finish(self) -> Value {
        if self.writes.is_empty() {
            self.base
        } else {
            self.working
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn untouched_draft_keeps_identity() {
        let base = Value::from(json!({"value": 0}));
        let draft = Draft::new(base.clone());
        assert!(!draft.is_modified());
        assert!(draft.finish().ptr_eq(&base));
    }

    #[test]
    fn writes_do_not_leak_into_base() {
        let base = Value::from(json!({"items": [], "meta": {"count": 0}}));
        let mut draft = Draft::new(base.clone());

        draft
            .push(&Path::parse("items"), Value::from(json!({"id": "x"})))
            .unwrap();
        draft
            .set(&Path::parse("meta.count"), Value::Int(1))
            .unwrap();

        assert_eq!(draft.get(&Path::parse("meta.count")), Some(&Value::Int(1)));
        assert_eq!(base.get_path(&Path::parse("meta.count")), Some(&Value::Int(0)));
        assert_eq!(draft.written_paths().len(), 2);

        let next = draft.finish();
        assert_eq!(next, Value::from(json!({"items": [{"id": "x"}], "meta": {"count": 1}})));
    }

    #[test]
    fn get_mut_edits_in_place() {
        let mut draft = Draft::new(Value::from(json!({"value": 1})));
        *draft.get_mut(&Path::parse("value")).unwrap() = Value::Int(2);
        assert_eq!(draft.finish(), Value::from(json!({"value": 2})));
    }

    #[test]
    fn failed_write_is_not_recorded() {
        let mut draft = Draft::new(Value::from(json!({"value": 1})));
        assert!(draft.set(&Path::parse("a.b"), Value::Null).is_err());
        assert!(!draft.is_modified());
    }
}
