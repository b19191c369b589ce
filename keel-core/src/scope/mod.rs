//! Scopes
//!
//! A scope is a node in a tree of dependency-injection containers. Each
//! scope owns a registry of module classes; resolving a name from a scope
//! finds the nearest registration up the parent chain and instantiates it
//! there at most once.
//!
//! # Lifecycle
//!
//! ```text
//! register ──► Registered ──resolve/init──► Initializing ──► Ready
//!                   ▲                             │             │
//!                   └──── constructor failed ─────┘      destroyScope
//!                                                               ▼
//!                                                           Destroyed
//! ```
//!
//! The arena only tracks these transitions. Running constructors and
//! clearing state on teardown is the store's job; it learns about every
//! transition through [`ScopeEvent`]s.

mod arena;
mod node;

pub use arena::{InitStep, ScopeArena, Teardown};
pub use node::{Lifecycle, Registration, ScopeId, ScopeNode};

use crate::state::ModuleKey;

/// A lifecycle transition, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeEvent {
    /// A child scope was created.
    ScopeCreated {
        /// The new scope.
        scope: ScopeId,
        /// Its parent.
        parent: ScopeId,
    },

    /// A class was registered under `name`.
    ModuleRegistered {
        /// Scope holding the registration.
        scope: ScopeId,
        /// Registered name.
        name: String,
    },

    /// A module finished construction and is ready.
    ModuleInitialized {
        /// The new instance.
        key: ModuleKey,
    },

    /// A module instance was torn down.
    ModuleDestroyed {
        /// The removed instance.
        key: ModuleKey,
    },

    /// A scope was removed from the arena.
    ScopeDestroyed {
        /// The removed scope.
        scope: ScopeId,
    },
}
