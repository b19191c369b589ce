//! State Values and Snapshots
//!
//! This module holds the data side of the store: the immutable [`Value`]
//! tree every module state is made of, [`Path`]s into it, the copy-on-write
//! [`Draft`] a mutation writes through, and the [`StateTree`] /
//! [`RevisionTable`] pair the mutation engine owns.
//!
//! # Snapshots
//!
//! A snapshot is never written after it has been committed. A mutation opens
//! a draft over the current snapshot, writes into the draft, and on success
//! the finished draft replaces the snapshot wholesale. Subtrees the mutation
//! did not touch are the same allocations in both snapshots, so committing is
//! proportional to the size of the change rather than the size of the state.

mod draft;
mod path;
mod tree;
mod value;

pub use draft::Draft;
pub use path::{Path, Seg};
pub use tree::{ModuleKey, Revision, RevisionTable, StateTree};
pub use value::{Map, Value};
