//! Process-wide store registry.
//!
//! Stores are normally passed around by handle. The registry exists for
//! boundaries that can only name a store by id (a transport endpoint, a
//! binding layer); it is initialised on first use and stores leave it only
//! through [`StoreRegistry::teardown`].

use std::sync::OnceLock;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::{Store, StoreSettings};
use crate::error::StoreResult;

static STORES: OnceLock<DashMap<String, Store>> = OnceLock::new();

fn stores() -> &'static DashMap<String, Store> {
    STORES.get_or_init(DashMap::new)
}

/// Registry of live stores keyed by id.
pub struct StoreRegistry;

impl StoreRegistry {
    /// The store named `id`, created with `settings` if it does not exist.
    /// Settings are ignored for an existing store.
    pub fn get_or_init(id: &str, settings: StoreSettings) -> StoreResult<Store> {
        match stores().entry(id.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let store = Store::new(id, settings)?;
                entry.insert(store.clone());
                debug!(store = id, "store registered");
                Ok(store)
            }
        }
    }

    /// The store named `id`, if registered.
    pub fn get(id: &str) -> Option<Store> {
        stores().get(id).map(|entry| entry.value().clone())
    }

    /// Destroy the store's root scope and forget it.
    ///
    /// Returns false if no such store was registered.
    pub fn teardown(id: &str) -> StoreResult<bool> {
        let Some((_, store)) = stores().remove(id) else {
            return Ok(false);
        };
        store.destroy_scope(store.root())?;
        debug!(store = id, "store torn down");
        Ok(true)
    }

    /// Ids of every registered store.
    pub fn ids() -> Vec<String> {
        stores().iter().map(|entry| entry.key().clone()).collect()
    }
}
