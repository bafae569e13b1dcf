use std::sync::Arc;

use super::{BackendConfig, BackendPool, Balancer, StrategyKind};

/// Weighted round-robin without smoothing.
///
/// Over every `W = sum(weights)` consecutive selections each backend is
/// returned exactly `weight` times, in contiguous runs following list order.
#[derive(Debug, Default)]
pub struct WeightedBalancer {
    pool: BackendPool,
}

impl WeightedBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for WeightedBalancer {
    fn next(&self) -> Option<Arc<BackendConfig>> {
        let backends = self.pool.read();
        let total: u64 = backends.iter().map(|b| u64::from(b.weight)).sum();
        if total == 0 {
            return None;
        }

        let target = self.pool.tick() % total;
        let mut cumulative = 0u64;
        for backend in backends.iter() {
            cumulative += u64::from(backend.weight);
            if target < cumulative {
                return Some(Arc::clone(backend));
            }
        }
        None
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
        StrategyKind::Weighted
    }
}
