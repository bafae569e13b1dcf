//! Periodic key-cache refresh and spend flush.
//!
//! A single interval drives both jobs. Each tick launches them as separate
//! tasks so a slow store write never delays the next key refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::auth::KeyCache;
use crate::spend::SpendFlusher;
use crate::store::{KeyStore, SpendStore};

/// Spawn the scheduler loop. The first tick fires one `period` from now;
/// the initial cache population is the caller's job.
///
/// Abort the returned handle to stop scheduling; in-flight jobs finish on
/// their own.
pub fn spawn_background_tasks<S>(
    store: S,
    key_cache: Arc<KeyCache>,
    flusher: SpendFlusher,
    period: Duration,
) -> JoinHandle<()>
where
    S: KeyStore + SpendStore + Clone + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let refresh_store = store.clone();
            let cache = Arc::clone(&key_cache);
            tokio::task::spawn_blocking(move || {
                if let Err(e) = cache.refresh(&refresh_store) {
                    tracing::warn!(error = %e, "Key cache refresh failed; keeping previous snapshot");
                }
            });

            let flush_store = store.clone();
            let flusher = flusher.clone();
            tokio::spawn(async move {
                flusher.flush(&flush_store).await;
            });
        }
    })
}
