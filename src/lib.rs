pub mod api;
pub mod auth;
pub mod balancer;
pub mod config;
pub mod db;
pub mod error;
pub mod proxy;
pub mod spend;
pub mod store;
pub mod tasks;

use crate::auth::KeyCache;
use crate::balancer::ModelGroupRegistry;
use crate::config::Config;
use crate::db::Database;
use crate::proxy::{RequestForwarder, build_http_client};
use crate::spend::{PriceTable, SpendFlusher, SpendQueue, spend_channel};

use std::sync::Arc;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub registry: Arc<ModelGroupRegistry>,
    pub forwarder: Arc<RequestForwarder>,
    pub key_cache: Arc<KeyCache>,
    pub prices: Arc<PriceTable>,
    pub spend_queue: SpendQueue,
}

impl AppState {
    /// Wire the dispatch path from configuration. The key cache starts
    /// empty; the returned flusher is the consumer side of `spend_queue`.
    pub fn new(config: Config, db: Database) -> anyhow::Result<(Self, SpendFlusher)> {
        let registry = Arc::new(ModelGroupRegistry::from_groups(&config.model_groups));
        let prices = Arc::new(PriceTable::from_groups(&config.model_groups));
        let client = build_http_client(config.upstream.timeout())?;
        let forwarder = Arc::new(RequestForwarder::new(Arc::clone(&registry), client));
        let (spend_queue, flusher) = spend_channel(config.background.spend_queue_capacity);

        let state = Self {
            config: Arc::new(config),
            db,
            registry,
            forwarder,
            key_cache: Arc::new(KeyCache::new()),
            prices,
            spend_queue,
        };
        Ok((state, flusher))
    }
}
