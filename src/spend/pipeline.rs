//! Bounded spend queue and its batch flusher.
//!
//! Request handlers hold a [`SpendQueue`] and submit one record per billed
//! completion. The background scheduler holds the [`SpendFlusher`] and, on
//! every tick, drains whatever is queued and writes it in one batch.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use super::SpendRecord;
use crate::store::SpendStore;

/// Create a connected queue/flusher pair with room for `capacity` records.
pub fn spend_channel(capacity: usize) -> (SpendQueue, SpendFlusher) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        SpendQueue { tx },
        SpendFlusher {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer half, cloned into every request handler.
#[derive(Debug, Clone)]
pub struct SpendQueue {
    tx: mpsc::Sender<SpendRecord>,
}

impl SpendQueue {
    /// Enqueue a record, waiting for space when the queue is full.
    ///
    /// Returns `false` only when the flusher has been dropped.
    pub async fn submit(&self, record: SpendRecord) -> bool {
        let request_id = record.request_id.clone();
        match self.tx.send(record).await {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(request_id = %request_id, "Spend pipeline closed; record lost");
                false
            }
        }
    }
}

/// Consumer half. Cheap to clone; the receiver sits behind an async mutex
/// so concurrent flushes never read the same record twice.
#[derive(Debug, Clone)]
pub struct SpendFlusher {
    rx: Arc<Mutex<mpsc::Receiver<SpendRecord>>>,
}

impl SpendFlusher {
    /// Take every record queued right now without waiting for more.
    pub async fn drain(&self) -> Vec<SpendRecord> {
        let mut rx = self.rx.lock().await;
        let mut batch = Vec::new();
        while let Ok(record) = rx.try_recv() {
            batch.push(record);
        }
        batch
    }

    /// Drain the queue and persist the batch. Returns the number of records
    /// written; a failed write is logged and the batch is discarded.
    pub async fn flush(&self, store: &dyn SpendStore) -> usize {
        let batch = self.drain().await;
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        match store.batch_insert_spend(&batch) {
            Ok(written) => {
                tracing::debug!(count = written, "Flushed spend batch");
                written
            }
            Err(e) => {
                tracing::error!(count, error = %e, "Failed to persist spend batch; dropping it");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::store::PersistenceError;

    #[derive(Default)]
    struct RecordingStore {
        batches: StdMutex<Vec<Vec<SpendRecord>>>,
        fail: bool,
    }

    impl RecordingStore {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn total(&self) -> usize {
            self.batches.lock().unwrap().iter().map(Vec::len).sum()
        }
    }

    impl SpendStore for RecordingStore {
        fn batch_insert_spend(&self, records: &[SpendRecord]) -> Result<usize, PersistenceError> {
            if self.fail {
                return Err(PersistenceError::Unavailable("disk full".into()));
            }
            self.batches.lock().unwrap().push(records.to_vec());
            Ok(records.len())
        }
    }

    fn record(id: usize) -> SpendRecord {
        SpendRecord {
            request_id: format!("req-{id}"),
            key_hash: "digest".into(),
            user_id: "u1".into(),
            organization_id: "o1".into(),
            model_group: "g".into(),
            spend: 1.0,
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let (_queue, flusher) = spend_channel(10);
        let store = RecordingStore::default();
        assert_eq!(flusher.flush(&store).await, 0);
        assert!(store.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_writes_one_batch() {
        let (queue, flusher) = spend_channel(10);
        let store = RecordingStore::default();
        for i in 0..3 {
            assert!(queue.submit(record(i)).await);
        }

        assert_eq!(flusher.flush(&store).await, 3);
        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let ids: Vec<_> = batches[0].iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["req-0", "req-1", "req-2"]);
    }

    #[tokio::test]
    async fn test_failed_flush_drops_batch() {
        let (queue, flusher) = spend_channel(10);
        queue.submit(record(1)).await;

        assert_eq!(flusher.flush(&RecordingStore::failing()).await, 0);

        // Nothing is requeued.
        let store = RecordingStore::default();
        assert_eq!(flusher.flush(&store).await, 0);
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let (queue, flusher) = spend_channel(1);
        queue.submit(record(1)).await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), queue.submit(record(2))).await;
        assert!(blocked.is_err(), "submit should wait while the queue is full");

        let store = RecordingStore::default();
        assert_eq!(flusher.flush(&store).await, 1);
        assert!(queue.submit(record(3)).await);
    }

    #[tokio::test]
    async fn test_submit_after_flusher_dropped() {
        let (queue, flusher) = spend_channel(1);
        drop(flusher);
        assert!(!queue.submit(record(1)).await);
    }

    #[tokio::test]
    async fn test_concurrent_submits_are_not_lost() {
        let (queue, flusher) = spend_channel(8);
        let store = Arc::new(RecordingStore::default());

        let producers: Vec<_> = (0..200)
            .map(|i| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.submit(record(i)).await })
            })
            .collect();

        // Keep flushing while producers are blocked on a full queue.
        let consumer = {
            let store = Arc::clone(&store);
            let flusher = flusher.clone();
            tokio::spawn(async move {
                while store.total() < 200 {
                    flusher.flush(store.as_ref()).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        for producer in producers {
            assert!(producer.await.unwrap());
        }
        tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .unwrap()
            .unwrap();

        let mut ids: Vec<String> = store
            .batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|r| r.request_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 200);
    }
}
