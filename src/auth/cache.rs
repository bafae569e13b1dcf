//! In-memory snapshot of valid API keys.
//!
//! The chat path authenticates against this cache only; the store is
//! consulted by `refresh`, which the background scheduler calls on every
//! tick. A key deleted from the store therefore stays usable for at most
//! one refresh interval.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::auth::AuthorizationKey;
use crate::auth::keys::hash_key;
use crate::store::{KeyStore, PersistenceError};

#[derive(Debug, Default)]
pub struct KeyCache {
    // Keyed by SHA-256 hex digest of the secret.
    keys: RwLock<Arc<HashMap<String, AuthorizationKey>>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a plaintext secret. Expired entries are treated as absent
    /// even if the last refresh still returned them.
    pub fn lookup(&self, secret: &str) -> Option<AuthorizationKey> {
        let digest = hash_key(secret);
        let snapshot = Arc::clone(&self.keys.read().expect("lock poisoned"));
        snapshot
            .get(&digest)
            .filter(|key| !key.is_expired_at(Utc::now()))
            .cloned()
    }

    /// Reload every valid key from `store` and swap the snapshot in one
    /// step. On error the previous snapshot is kept.
    pub fn refresh(&self, store: &dyn KeyStore) -> Result<usize, PersistenceError> {
        let keys = store.get_all_valid_keys()?;
        let map: HashMap<String, AuthorizationKey> = keys
            .into_iter()
            .map(|key| (key.key_hash.clone(), key))
            .collect();
        let count = map.len();

        *self.keys.write().expect("lock poisoned") = Arc::new(map);
        tracing::debug!(keys = count, "Key cache refreshed");
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.keys.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
