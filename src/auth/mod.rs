pub mod cache;
pub mod keys;
pub mod middleware;
pub mod users;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use self::cache::KeyCache;

/// A stored API key as mirrored by the key cache. Attached to request
/// extensions by the auth middleware.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizationKey {
    pub id: String,
    /// SHA-256 hex digest of the secret.
    #[serde(skip)]
    pub key_hash: String,
    pub key_prefix: String,
    pub name: String,
    pub user_id: String,
    pub organization_id: String,
    /// Model groups this key may call. `["*"]` permits every group.
    pub models: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthorizationKey {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    pub fn permits(&self, model: &str) -> bool {
        is_model_permitted(&self.models, model)
    }
}

/// Whether `model` is allowed by a key's allow-list.
///
/// The wildcard only counts in first position; an empty list allows nothing.
pub fn is_model_permitted(allow_list: &[String], model: &str) -> bool {
    match allow_list.first() {
        None => false,
        Some(first) if first == "*" => true,
        Some(_) => allow_list.iter().any(|m| m == model),
    }
}

/// Split the stored comma-separated model list.
pub(crate) fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
