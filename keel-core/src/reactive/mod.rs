//! Reactivity
//!
//! This module decides who hears about a commit. It has three layers:
//!
//! ## Access recording
//!
//! [`AccessRecorder`] is a thread-local stack of frames. Every committed
//! module state read through a handle while a frame is open records the
//! module's revision. Comparing those revisions with the current table is
//! the cheap first tier of every check.
//!
//! ## Dependency watcher
//!
//! [`DependencyWatcher`] wraps a [`StateView`](crate::view::StateView) and
//! records every `(path, value)` pair read through it. Two such logs are
//! compared per path with deep equality; this is the expensive second tier.
//!
//! ## Watcher registry
//!
//! [`WatcherRegistry`] is a plain ordered list of callbacks the store runs
//! after every commit. It does no diffing of its own. [`Subscription`]
//! puts the three together: a watcher that runs both tiers and notifies
//! only on an observed change.
//!
//! # Implementation Notes
//!
//! Recording is thread-local and frames nest, so a capture running inside
//! another capture (a subscription created by a watcher, say) records only
//! into its own frame.

mod context;
mod subscription;
mod tracker;
mod watcher;

pub use context::AccessRecorder;
pub use subscription::Subscription;
pub use tracker::{track, AccessLog, Capture, DependencyWatcher, Tracked};
pub use watcher::{OwnerId, WatcherFn, WatcherId, WatcherRegistry};
