//! Backend selection for model groups.
//!
//! Each model group owns one [`Balancer`] holding its member backends. The
//! two strategies share the same state (a backend list behind a
//! reader/writer lock plus a monotonically increasing counter) and differ
//! only in how the counter value is mapped onto the list.

pub mod registry;
pub mod round_robin;
pub mod types;
pub mod weighted;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

pub use self::registry::ModelGroupRegistry;
pub use self::round_robin::RoundRobinBalancer;
pub use self::types::{BackendConfig, ModelGroup, StrategyKind};
pub use self::weighted::WeightedBalancer;

/// Selection strategy over the backends of one model group.
///
/// `next` only takes the shared lock, so concurrent selections never block
/// each other; `add` and `remove` take the exclusive lock.
pub trait Balancer: Send + Sync {
    /// Pick the backend for the next request, or `None` when nothing is
    /// selectable (empty group, or zero total weight).
    fn next(&self) -> Option<Arc<BackendConfig>>;

    /// Append a backend to the group.
    fn add(&self, backend: BackendConfig);

    /// Remove the first backend named `name`. Returns `false` when no
    /// backend matched, which is not an error.
    fn remove(&self, name: &str) -> bool;

    /// Snapshot of the current member list, in selection order.
    fn backends(&self) -> Vec<Arc<BackendConfig>>;

    fn strategy(&self) -> StrategyKind;
}

/// Build an empty balancer of the requested kind.
pub fn build_balancer(kind: StrategyKind) -> Arc<dyn Balancer> {
    match kind {
        StrategyKind::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        StrategyKind::Weighted => Arc::new(WeightedBalancer::new()),
    }
}

/// Backend list plus selection counter, shared by both strategies.
#[derive(Debug, Default)]
struct BackendPool {
    backends: RwLock<Vec<Arc<BackendConfig>>>,
    counter: AtomicU64,
}

impl BackendPool {
    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<BackendConfig>>> {
        self.backends.read().expect("lock poisoned")
    }

    /// Take the next counter value. Never resets; callers reduce it modulo
    /// whatever length they observed under the read lock.
    fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    fn add(&self, backend: BackendConfig) {
        self.backends
            .write()
            .expect("lock poisoned")
            .push(Arc::new(backend));
    }

    fn remove(&self, name: &str) -> bool {
        let mut guard = self.backends.write().expect("lock poisoned");
        match guard.iter().position(|b| b.name == name) {
            Some(idx) => {
                guard.remove(idx);
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> Vec<Arc<BackendConfig>> {
        self.read().clone()
    }
}
