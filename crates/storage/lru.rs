use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tabrex_common::{Entry, KeyCondition, TableSchema};
use tracing::{debug, trace, warn};

use crate::error::StoreError;
use crate::state::StateStorage;

const MRU_QUEUE_DEPTH: usize = 4096;

enum MruEvent {
    Touch(String, String),
    Stop,
}

/// A [`StateStorage`] that evicts cold cached rows under a byte budget.
///
/// Every successful read or write enqueues the touched `(table, key)`
/// onto a bounded queue; a dedicated worker keeps a most-recently-used
/// index and, while the layer's capacity exceeds the budget, purges the
/// coldest clean rows. Eviction is best-effort: a purged row is simply
/// re-fetched from the parent on the next read.
pub struct LruStorage {
    inner: Arc<StateStorage>,
    // the queue endpoint is single-producer-per-caller; a mutex keeps
    // the wrapper shareable across threads
    sender: Mutex<SyncSender<MruEvent>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LruStorage {
    pub fn new(inner: Arc<StateStorage>, max_capacity: usize, poll_interval: Duration) -> Self {
        let (sender, receiver) = std::sync::mpsc::sync_channel(MRU_QUEUE_DEPTH);
        let worker_storage = inner.clone();
        let worker = std::thread::spawn(move || {
            run_worker(worker_storage, receiver, max_capacity, poll_interval)
        });
        Self {
            inner,
            sender: Mutex::new(sender),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn storage(&self) -> &Arc<StateStorage> {
        &self.inner
    }

    pub async fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>, StoreError> {
        let result = self.inner.get_row(table, key).await?;
        if result.is_some() {
            self.touch(table, key);
        }
        Ok(result)
    }

    pub async fn get_rows(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Entry>>, StoreError> {
        let results = self.inner.get_rows(table, keys).await?;
        for (key, entry) in keys.iter().zip(&results) {
            if entry.is_some() {
                self.touch(table, key);
            }
        }
        Ok(results)
    }

    pub async fn get_primary_keys(
        &self,
        table: &str,
        condition: Option<&KeyCondition>,
    ) -> Result<Vec<String>, StoreError> {
        self.inner.get_primary_keys(table, condition).await
    }

    pub async fn set_row(&self, table: &str, key: &str, entry: Entry) -> Result<(), StoreError> {
        self.touch(table, key);
        self.inner.set_row(table, key, entry).await
    }

    pub async fn open_table(&self, name: &str) -> Result<Option<TableSchema>, StoreError> {
        self.inner.open_table(name).await
    }

    pub async fn create_table(&self, name: &str, schema: TableSchema) -> Result<(), StoreError> {
        self.inner.create_table(name, schema).await
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    // Best-effort: a full queue drops the touch instead of blocking the
    // caller; the key simply stays colder than it is.
    fn touch(&self, table: &str, key: &str) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        match sender.try_send(MruEvent::Touch(table.to_string(), key.to_string())) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                warn!("LRU worker gone, touch dropped");
            }
        }
    }

    /// Stops the worker and joins it. Further touches are dropped.
    pub fn stop(&self) {
        let worker = {
            let mut slot = self.worker.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(worker) = worker {
            {
                let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
                let _ = sender.try_send(MruEvent::Stop);
            }
            if worker.join().is_err() {
                warn!("LRU worker panicked");
            }
        }
    }
}

impl Drop for LruStorage {
    fn drop(&mut self) {
        self.stop();
    }
}

// layers can stack directly on the cache so reads keep feeding the MRU
#[async_trait::async_trait]
impl crate::state::StorageReader for LruStorage {
    async fn read_row(&self, table: &str, key: &str) -> Result<Option<Entry>, StoreError> {
        self.get_row(table, key).await
    }

    async fn read_rows(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Entry>>, StoreError> {
        self.get_rows(table, keys).await
    }

    async fn read_primary_keys(
        &self,
        table: &str,
        condition: Option<&KeyCondition>,
    ) -> Result<Vec<String>, StoreError> {
        self.get_primary_keys(table, condition).await
    }

    async fn read_schema(&self, name: &str) -> Result<Option<TableSchema>, StoreError> {
        self.open_table(name).await
    }
}

fn run_worker(
    storage: Arc<StateStorage>,
    receiver: Receiver<MruEvent>,
    max_capacity: usize,
    poll_interval: Duration,
) {
    // VecDeque with lazy invalidation stands in for a linked list: each
    // touch bumps the key's generation; stale queue nodes are skipped
    // when they surface at the head.
    let mut queue: VecDeque<(String, String, u64)> = VecDeque::new();
    let mut generations: HashMap<(String, String), u64> = HashMap::new();
    let mut next_generation: u64 = 0;

    loop {
        match receiver.recv_timeout(poll_interval) {
            Ok(MruEvent::Touch(table, key)) => {
                next_generation += 1;
                generations.insert((table.clone(), key.clone()), next_generation);
                queue.push_back((table, key, next_generation));
            }
            Ok(MruEvent::Stop) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if storage.capacity() <= max_capacity {
            continue;
        }

        let mut cleared_count = 0usize;
        let mut cleared_bytes = 0usize;
        while storage.capacity() > max_capacity {
            let Some((table, key, generation)) = queue.pop_front() else {
                break;
            };
            let current = generations.get(&(table.clone(), key.clone()));
            if current != Some(&generation) {
                // relocated since; a fresher node is further back
                continue;
            }
            generations.remove(&(table.clone(), key.clone()));

            let freed = storage.purge_row(&table, &key);
            if freed > 0 {
                cleared_count += 1;
                cleared_bytes += freed;
                trace!(%table, %key, freed, "evicted cold row");
            }
        }
        if cleared_count > 0 {
            debug!(cleared_count, cleared_bytes, "LRU sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use bytes::Bytes;

    fn schema() -> TableSchema {
        TableSchema::new("key", &["value"])
    }

    fn big_entry() -> Entry {
        let mut entry = Entry::default();
        entry.set_field("value", Bytes::from(vec![0u8; 1024]));
        entry
    }

    #[tokio::test]
    async fn delegates_reads_and_writes() {
        let backend = MemoryBackend::new();
        let layer = StateStorage::with_backend(backend);
        layer.create_table("t", schema()).await.expect("created");

        let cache = LruStorage::new(layer, usize::MAX, Duration::from_millis(10));
        cache
            .set_row("t", "a", big_entry())
            .await
            .expect("written");
        assert!(cache.get_row("t", "a").await.expect("read").is_some());
        cache.stop();
    }

    #[tokio::test]
    async fn evicts_clean_rows_under_pressure() {
        let backend = MemoryBackend::new();
        let base = StateStorage::with_backend(backend.clone());
        base.create_table("t", schema()).await.expect("created");
        for key in ["a", "b", "c", "d"] {
            base.set_row("t", key, big_entry()).await.expect("written");
        }

        // the cache layer sits above the block layer and fills itself by
        // read-through
        let cache_layer = StateStorage::with_parent(base);
        let cache = LruStorage::new(
            cache_layer.clone(),
            // budget below what four cached rows retain
            2 * 1024,
            Duration::from_millis(5),
        );
        for key in ["a", "b", "c", "d"] {
            cache.get_row("t", key).await.expect("read");
        }

        // the worker needs a few poll cycles to drain the queue
        let mut waited = 0;
        while cache_layer.capacity() > 2 * 1024 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert!(
            cache_layer.capacity() <= 2 * 1024,
            "eviction brings capacity under budget"
        );

        // evicted rows are still readable through the parent
        for key in ["a", "b", "c", "d"] {
            assert!(cache.get_row("t", key).await.expect("read").is_some());
        }
        cache.stop();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let backend = MemoryBackend::new();
        let layer = StateStorage::with_backend(backend);
        let cache = LruStorage::new(layer, usize::MAX, Duration::from_millis(5));
        cache.stop();
        cache.stop();
    }
}
