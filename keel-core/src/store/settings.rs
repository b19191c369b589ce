//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Default capacity of the mutation broadcast channel.
pub const DEFAULT_MUTATION_BUFFER: usize = 256;

/// Settings a store is created with.
///
/// Every field has a default, so partial JSON such as `{"isRemote": true}`
/// is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreSettings {
    /// Whether this store mirrors a store living elsewhere. Remote stores
    /// forward submitted mutations to their transport and are not ready
    /// until seeded.
    pub is_remote: bool,

    /// Capacity of the mutation broadcast channel. Slow receivers that fall
    /// further behind than this lose the oldest records.
    pub mutation_buffer: usize,
}

impl StoreSettings {
    /// Settings for a remote mirror.
    pub fn remote() -> Self {
        Self {
            is_remote: true,
            ..Self::default()
        }
    }

    /// Parse settings from JSON.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            is_remote: false,
            mutation_buffer: DEFAULT_MUTATION_BUFFER,
        }
    }
}
