//! Error types for store operations.
//!
//! Every failure the core can produce is a variant of [`StoreError`]. None of
//! them are recovered internally: they propagate synchronously to the
//! `dispatch`/`resolve` call site after the engine has restored its own
//! invariants.

use thiserror::Error;

use crate::scope::ScopeId;
use crate::state::Path;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while resolving modules, dispatching mutations or
/// reading state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The (module, scope) pair has no live entry in the state tree.
    #[error("module {module} in scope {scope} is destroyed")]
    ModuleDestroyed {
        /// Module name.
        module: String,
        /// Scope the module was expected in.
        scope: ScopeId,
    },

    /// A write was attempted against state that is not an open draft.
    #[error("cannot change the state of {module} outside of a mutation")]
    MutationOutsideTransaction {
        /// Module whose state was written.
        module: String,
    },

    /// The mutation type does not name an existing module/method pair.
    #[error("unknown mutation type: {mutation_type}")]
    UnknownMutationType {
        /// The offending `"<module>.<method>"` string.
        mutation_type: String,
    },

    /// A scope could not resolve the requested module.
    #[error("cannot resolve {module} from scope {scope}: {reason}")]
    ResolutionFailure {
        /// Module name that was requested.
        module: String,
        /// Scope the lookup started from.
        scope: ScopeId,
        /// Why resolution failed.
        reason: String,
    },

    /// The scope id is not (or no longer) part of the arena.
    #[error("scope {0} does not exist")]
    UnknownScope(ScopeId),

    /// Path does not exist in the value.
    #[error("path not found: {path}")]
    PathNotFound {
        /// The path that was not found.
        path: Path,
    },

    /// List index is out of bounds.
    #[error("index {index} out of bounds (len: {len}) at path {path}")]
    IndexOutOfBounds {
        /// The path to the list.
        path: Path,
        /// The index that was accessed.
        index: usize,
        /// The actual length of the list.
        len: usize,
    },

    /// Type mismatch when navigating or converting a value.
    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Where the mismatch occurred.
        path: Path,
        /// The expected type.
        expected: &'static str,
        /// The actual type found.
        found: &'static str,
    },

    /// A mutation or action received arguments it cannot use.
    #[error("invalid payload for {target}: {message}")]
    InvalidPayload {
        /// Mutation type or action name.
        target: String,
        /// What was wrong with the arguments.
        message: String,
    },

    /// A getter, action or view property that does not exist.
    #[error("{owner} has no {kind} named {name}")]
    UnknownMember {
        /// Module or view being accessed.
        owner: String,
        /// "getter", "action" or "property".
        kind: &'static str,
        /// The requested name.
        name: String,
    },

    /// Failure raised by a mutation, action or constructor body.
    #[error("{0}")]
    Failed(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("msgpack encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("msgpack decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl StoreError {
    /// Create a module destroyed error.
    #[inline]
    pub fn module_destroyed(module: impl Into<String>, scope: ScopeId) -> Self {
        StoreError::ModuleDestroyed {
            module: module.into(),
            scope,
        }
    }

    /// Create a mutation-outside-transaction error.
    #[inline]
    pub fn outside_transaction(module: impl Into<String>) -> Self {
        StoreError::MutationOutsideTransaction {
            module: module.into(),
        }
    }

    /// Create an unknown mutation type error.
    #[inline]
    pub fn unknown_mutation(mutation_type: impl Into<String>) -> Self {
        StoreError::UnknownMutationType {
            mutation_type: mutation_type.into(),
        }
    }

    /// Create a resolution failure.
    #[inline]
    pub fn resolution(module: impl Into<String>, scope: ScopeId, reason: impl Into<String>) -> Self {
        StoreError::ResolutionFailure {
            module: module.into(),
            scope,
            reason: reason.into(),
        }
    }

    /// Create a path not found error.
    #[inline]
    pub fn path_not_found(path: Path) -> Self {
        StoreError::PathNotFound { path }
    }

    /// Create an index out of bounds error.
    #[inline]
    pub fn index_out_of_bounds(path: Path, index: usize, len: usize) -> Self {
        StoreError::IndexOutOfBounds { path, index, len }
    }

    /// Create a type mismatch error.
    #[inline]
    pub fn type_mismatch(path: Path, expected: &'static str, found: &'static str) -> Self {
        StoreError::TypeMismatch {
            path,
            expected,
            found,
        }
    }

    /// Create an invalid payload error.
    #[inline]
    pub fn invalid_payload(target: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::InvalidPayload {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create an unknown member error.
    #[inline]
    pub fn unknown_member(owner: impl Into<String>, kind: &'static str, name: impl Into<String>) -> Self {
        StoreError::UnknownMember {
            owner: owner.into(),
            kind,
            name: name.into(),
        }
    }

    /// Create a failure raised by user code.
    #[inline]
    pub fn failed(message: impl Into<String>) -> Self {
        StoreError::Failed(message.into())
    }
}
