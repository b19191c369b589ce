//! Typed access to argument lists.

use crate::error::{StoreError, StoreResult};
use crate::state::Value;

/// Positional argument accessors for `&[Value]`.
///
/// Missing or mistyped arguments become [`StoreError::InvalidPayload`].
pub trait Args {
    /// Argument `i` as-is.
    fn value(&self, i: usize) -> StoreResult<Value>;

    /// Argument `i` as an integer.
    fn int(&self, i: usize) -> StoreResult<i64>;

    /// Argument `i` as a float. Integers widen.
    fn float(&self, i: usize) -> StoreResult<f64>;

    /// Argument `i` as a boolean.
    fn bool(&self, i: usize) -> StoreResult<bool>;

    /// Argument `i` as a string.
    fn str(&self, i: usize) -> StoreResult<&str>;
}

fn missing(i: usize) -> StoreError {
    StoreError::invalid_payload(format!("argument {}", i), "missing")
}

fn mistyped(i: usize, expected: &str, found: &Value) -> StoreError {
    StoreError::invalid_payload(
        format!("argument {}", i),
        format!("expected {}, found {}", expected, found.type_name()),
    )
}

impl Args for [Value] {
    fn value(&self, i: usize) -> StoreResult<Value> {
        self.get(i).cloned().ok_or_else(|| missing(i))
    }

    fn int(&self, i: usize) -> StoreResult<i64> {
        let v = self.get(i).ok_or_else(|| missing(i))?;
        v.as_i64().ok_or_else(|| mistyped(i, "int", v))
    }

    fn float(&self, i: usize) -> StoreResult<f64> {
        let v = self.get(i).ok_or_else(|| missing(i))?;
        v.as_f64().ok_or_else(|| mistyped(i, "float", v))
    }

    fn bool(&self, i: usize) -> StoreResult<bool> {
        let v = self.get(i).ok_or_else(|| missing(i))?;
        v.as_bool().ok_or_else(|| mistyped(i, "bool", v))
    }

    fn str(&self, i: usize) -> StoreResult<&str> {
        let v = self.get(i).ok_or_else(|| missing(i))?;
        v.as_str().ok_or_else(|| mistyped(i, "string", v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let args = vec![Value::Int(5), Value::from("x"), Value::Bool(true)];
        assert_eq!(args.int(0).unwrap(), 5);
        assert_eq!(args.float(0).unwrap(), 5.0);
        assert_eq!(args.str(1).unwrap(), "x");
        assert!(args.bool(2).unwrap());
    }

    #[test]
    fn bad_arguments_are_invalid_payload() {
        let args = vec![Value::from("x")];
        assert!(matches!(args.int(0), Err(StoreError::InvalidPayload { .. })));
        assert!(matches!(args.value(3), Err(StoreError::InvalidPayload { .. })));
    }
}
