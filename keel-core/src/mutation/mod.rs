//! Mutations
//!
//! A mutation is the only way module state changes. It is recorded as an
//! immutable envelope naming a `"<module>.<method>"` pair and carrying the
//! argument list; the [`MutationEngine`] applies it inside a transaction.
//!
//! Envelopes are plain serde types so a transport can carry them verbatim:
//! the side that originates a mutation sends the envelope, the receiving side
//! feeds the decoded envelope back into `dispatch`.

mod context;
mod engine;

pub use context::MutationContext;
pub use engine::{Applied, Commit, MutationEngine};

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::scope::ScopeId;
use crate::state::Value;

/// Counter for generating unique mutation IDs.
static MUTATION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique mutation ID.
fn next_mutation_id() -> u64 {
    MUTATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A recorded mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Envelope id.
    pub id: u64,

    /// `"<module>.<method>"`.
    #[serde(rename = "type")]
    pub mutation_type: String,

    /// Argument list for the method.
    #[serde(default)]
    pub payload: Vec<Value>,

    /// Scope of the target instance. Absent means the store's root scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<ScopeId>,
}

impl Mutation {
    /// Create an envelope for `module.method` with a fresh id.
    pub fn new(module: &str, method: &str, payload: Vec<Value>) -> Self {
        Self {
            id: next_mutation_id(),
            mutation_type: format!("{}.{}", module, method),
            payload,
            scope: None,
        }
    }

    /// Target a specific scope.
    pub fn in_scope(mut self, scope: ScopeId) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Split the type into `(module, method)`.
    pub fn target(&self) -> StoreResult<(&str, &str)> {
        match self.mutation_type.split_once('.') {
            Some((module, method)) if !module.is_empty() && !method.is_empty() => {
                Ok((module, method))
            }
            _ => Err(StoreError::unknown_mutation(&self.mutation_type)),
        }
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode as MessagePack (named fields).
    pub fn to_msgpack(&self) -> StoreResult<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decode from MessagePack.
    pub fn from_msgpack(bytes: &[u8]) -> StoreResult<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
