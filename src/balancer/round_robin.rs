use std::sync::Arc;

use super::{BackendConfig, BackendPool, Balancer, StrategyKind};

/// Cycles through the group's backends in insertion order.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    pool: BackendPool,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for RoundRobinBalancer {
    fn next(&self) -> Option<Arc<BackendConfig>> {
        let backends = self.pool.read();
        if backends.is_empty() {
            return None;
        }
        let idx = self.pool.tick() % backends.len() as u64;
        Some(Arc::clone(&backends[idx as usize]))
    }

    fn add(&self, backend: BackendConfig) {
        self.pool.add(backend);
    }

    fn remove(&self, name: &str) -> bool {
        self.pool.remove(name)
    }

    fn backends(&self) -> Vec<Arc<BackendConfig>> {
        self.pool.snapshot()
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }
}
