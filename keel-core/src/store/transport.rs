//! Transport Boundary
//!
//! A remote store does not apply the mutations its modules submit. It hands
//! the envelope to a [`MutationSink`] which carries it to the owning store;
//! the owning store applies it with an ordinary `dispatch`, and the result
//! reaches the mirror as another envelope that is itself dispatched.
//!
//! The core never waits on the wire: sending is fire-and-forget and arrivals
//! are plain dispatches. [`ChannelSink`] and [`pump`] connect two stores in
//! one process over a tokio channel, which is what the tests and local
//! bridges use.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::Store;
use crate::error::{StoreError, StoreResult};
use crate::mutation::Mutation;

/// Where a remote store sends the mutations it does not apply itself.
pub trait MutationSink: Send + Sync {
    /// Hand an envelope to the transport.
    fn send(&self, mutation: &Mutation) -> StoreResult<()>;
}

impl<F> MutationSink for F
where
    F: Fn(&Mutation) -> StoreResult<()> + Send + Sync,
{
    fn send(&self, mutation: &Mutation) -> StoreResult<()> {
        self(mutation)
    }
}

/// Sink that pushes envelopes into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Mutation>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Mutation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MutationSink for ChannelSink {
    fn send(&self, mutation: &Mutation) -> StoreResult<()> {
        self.tx
            .send(mutation.clone())
            .map_err(|_| StoreError::failed("transport channel closed"))
    }
}

/// Dispatch every envelope arriving on `rx` into `store` until the channel
/// closes. Returns how many were applied.
///
/// A failing envelope is logged and skipped; the receiving store stays
/// usable.
pub async fn pump(mut rx: mpsc::UnboundedReceiver<Mutation>, store: Store) -> usize {
    let mut applied = 0;
    while let Some(mutation) = rx.recv().await {
        match store.dispatch(&mutation) {
            Ok(_) => applied += 1,
            Err(err) => warn!(
                store = store.id(),
                mutation = %mutation.mutation_type,
                error = %err,
                "received mutation failed"
            ),
        }
    }
    debug!(store = store.id(), applied, "transport closed");
    applied
}
