//! Immutable State Values
//!
//! A [`Value`] is a plain, serializable tree of scalars, lists and maps. The
//! compound variants hold their children behind an [`Arc`], so cloning a
//! value is cheap and two snapshots can share every subtree they have in
//! common.
//!
//! # Structural Sharing
//!
//! Values are never mutated in place once published. Writes go through the
//! `*_path` methods, which walk the path with [`Arc::make_mut`]: a node that
//! is shared with another snapshot is cloned the first time it is written
//! (a shallow clone, its own children stay shared) and written in place from
//! then on. Untouched siblings keep pointing at the same allocation as the
//! snapshot the write started from.
//!
//! # Equality
//!
//! `PartialEq` is deep equality. Compound values short-circuit on pointer
//! identity first, so comparing two snapshots that share most of their
//! structure only walks the parts that were rebuilt. Integers and floats
//! compare numerically, and maps compare without regard to key order.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::path::{Path, Seg};
use crate::error::{StoreError, StoreResult};

/// Ordered map used for map values.
pub type Map = IndexMap<String, Value>;

/// A state value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// Explicit null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// String.
    String(Arc<str>),
    /// Sequence of values.
    List(Arc<Vec<Value>>),
    /// Insertion-ordered map of values.
    Map(Arc<Map>),
}

impl Value {
    /// An empty map.
    pub fn map() -> Self {
        Value::Map(Arc::new(Map::new()))
    }

    /// An empty list.
    pub fn list() -> Self {
        Value::List(Arc::new(Vec::new()))
    }

    /// Build a map from key/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(Arc::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Convert any serializable value.
    pub fn from_serde<T: Serialize + ?Sized>(value: &T) -> StoreResult<Self> {
        Ok(serde_json::to_value(value)?.into())
    }

    /// Convert into any deserializable type.
    pub fn to_serde<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(serde_json::Value::from(self))?)
    }

    /// Human readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Returns true for [`Value::Null`].
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean view of the value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view of the value. Floats without a fractional part qualify.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Float view of the value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// List view of the value.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Map view of the value.
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Number of children for lists and maps.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::List(l) => Some(l.len()),
            Value::Map(m) => Some(m.len()),
            _ => None,
        }
    }

    /// Whether two values are the same allocation (or equal scalars).
    ///
    /// This is how tests observe structural sharing between snapshots.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::String(a), Value::String(b)) => Arc::ptr_eq(a, b),
            (Value::List(_) | Value::Map(_) | Value::String(_), _) => false,
            (a, b) => a == b,
        }
    }

    /// Look up one segment. Index segments address numeric map keys and key
    /// segments that parse as numbers address list elements.
    pub fn get(&self, seg: &Seg) -> Option<&Value> {
        match (self, seg) {
            (Value::Map(m), Seg::Key(k)) => m.get(k.as_str()),
            (Value::Map(m), Seg::Index(i)) => m.get(i.to_string().as_str()),
            (Value::List(l), seg) => seg.to_index().and_then(|i| l.get(i)),
            _ => None,
        }
    }

    /// Look up a path.
    pub fn get_path(&self, path: &Path) -> Option<&Value> {
        path.segments()
            .iter()
            .try_fold(self, |current, seg| current.get(seg))
    }

    /// Mutable access to a direct child, cloning shared nodes on the way.
    fn child_mut(&mut self, seg: &Seg, at: &Path) -> StoreResult<&mut Value> {
        match self {
            Value::Map(m) => Arc::make_mut(m)
                .get_mut(seg.to_key().as_str())
                .ok_or_else(|| StoreError::path_not_found(at.clone())),
            Value::List(l) => {
                let list = Arc::make_mut(l);
                let len = list.len();
                let index = seg
                    .to_index()
                    .ok_or_else(|| StoreError::type_mismatch(at.clone(), "index", "key"))?;
                list.get_mut(index)
                    .ok_or_else(|| StoreError::index_out_of_bounds(at.clone(), index, len))
            }
            other => Err(StoreError::type_mismatch(
                at.clone(),
                "map or list",
                other.type_name(),
            )),
        }
    }

    /// Mutable access to the value at `path`.
    ///
    /// Every node along the path that is shared with another value is
    /// cloned before being handed out.
    pub fn get_path_mut(&mut self, path: &Path) -> StoreResult<&mut Value> {
        let mut current = self;
        let mut at = Path::root();
        for seg in path.segments() {
            at.push(seg.clone());
            current = current.child_mut(seg, &at)?;
        }
        Ok(current)
    }

    /// Write `value` at `path`, returning the previous value if there was one.
    ///
    /// The parent of `path` must exist. Writing index `len` of a list
    /// appends.
    pub fn set_path(&mut self, path: &Path, value: Value) -> StoreResult<Option<Value>> {
        let Some(last) = path.last() else {
            return Ok(Some(std::mem::replace(self, value)));
        };
        let parent_path = Path::from_segments(path.segments()[..path.len() - 1].iter().cloned());

        match self.get_path_mut(&parent_path)? {
            Value::Map(m) => Ok(Arc::make_mut(m).insert(last.to_key(), value)),
            Value::List(l) => {
                let index = last
                    .to_index()
                    .ok_or_else(|| StoreError::type_mismatch(path.clone(), "index", "key"))?;
                let list = Arc::make_mut(l);
                if index < list.len() {
                    Ok(Some(std::mem::replace(&mut list[index], value)))
                } else if index == list.len() {
                    list.push(value);
                    Ok(None)
                } else {
                    Err(StoreError::index_out_of_bounds(parent_path, index, list.len()))
                }
            }
            other => Err(StoreError::type_mismatch(
                parent_path,
                "map or list",
                other.type_name(),
            )),
        }
    }

    /// Remove the value at `path`. Removing the root resets it to null.
    pub fn remove_path(&mut self, path: &Path) -> StoreResult<Option<Value>> {
        let Some(last) = path.last() else {
            return Ok(Some(std::mem::take(self)));
        };
        let parent_path = Path::from_segments(path.segments()[..path.len() - 1].iter().cloned());

        match self.get_path_mut(&parent_path)? {
            Value::Map(m) => Ok(Arc::make_mut(m).shift_remove(last.to_key().as_str())),
            Value::List(l) => {
                let list = Arc::make_mut(l);
                Ok(match last.to_index() {
                    Some(i) if i < list.len() => Some(list.remove(i)),
                    _ => None,
                })
            }
            other => Err(StoreError::type_mismatch(
                parent_path,
                "map or list",
                other.type_name(),
            )),
        }
    }

    /// Append to the list at `path`.
    pub fn push_path(&mut self, path: &Path, value: Value) -> StoreResult<()> {
        match self.get_path_mut(path)? {
            Value::List(l) => {
                Arc::make_mut(l).push(value);
                Ok(())
            }
            other => Err(StoreError::type_mismatch(path.clone(), "list", other.type_name())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::Value::from(self))
    }
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Map(Arc::new(map))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::List(Arc::new(items.into_iter().map(Value::from).collect()))
            }
            serde_json::Value::Object(map) => Value::Map(Arc::new(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            )),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        serde_json::Value::from(&value)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
