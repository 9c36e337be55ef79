use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tabrex_common::{Entry, EntryStatus, KeyCondition, TableSchema};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::error::StoreError;

/// One dirty row forwarded to the backend at block commit.
#[derive(Debug, Clone)]
pub struct DirtyRow {
    pub table: String,
    pub key: String,
    pub entry: Entry,
}

/// Everything a block changed, serialized for two-phase commit:
/// tables created during the block plus the dirty rows in ascending
/// `(table, key)` order.
#[derive(Debug, Clone, Default)]
pub struct DirtySet {
    pub created_tables: Vec<(String, TableSchema)>,
    pub rows: Vec<DirtyRow>,
}

/// Durable, transactional KV over tables. Accessed only asynchronously;
/// block mutations arrive exclusively through the prepare/commit pair.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>, StoreError>;

    async fn get_rows(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Entry>>, StoreError>;

    async fn get_primary_keys(
        &self,
        table: &str,
        condition: Option<&KeyCondition>,
    ) -> Result<Vec<String>, StoreError>;

    async fn open_table(&self, name: &str) -> Result<Option<TableSchema>, StoreError>;

    async fn create_table(&self, name: &str, schema: TableSchema) -> Result<(), StoreError>;

    /// Stage a block's dirty set. Must precede `async_commit(number)`.
    async fn async_prepare(&self, number: u64, dirty: DirtySet) -> Result<(), StoreError>;

    /// Finalize a staged block. Idempotent on replay.
    async fn async_commit(&self, number: u64) -> Result<(), StoreError>;

    /// Discard a staged block. A no-op for unknown numbers.
    async fn async_rollback(&self, number: u64) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct BackendTable {
    schema: TableSchema,
    rows: BTreeMap<String, Entry>,
}

/// In-memory [`Backend`] used by tests and as the reference semantics
/// for real backends.
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, BackendTable>>,
    staged: Mutex<HashMap<u64, DirtySet>>,
    committed: Mutex<HashSet<u64>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>, StoreError> {
        let tables = self.tables.read().await;
        let table = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(table.rows.get(key).cloned())
    }

    async fn get_rows(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Entry>>, StoreError> {
        let tables = self.tables.read().await;
        let table = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(keys.iter().map(|key| table.rows.get(key).cloned()).collect())
    }

    async fn get_primary_keys(
        &self,
        table: &str,
        condition: Option<&KeyCondition>,
    ) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().await;
        let table = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        Ok(table
            .rows
            .keys()
            .filter(|key| condition.map(|c| c.matches(key)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn open_table(&self, name: &str) -> Result<Option<TableSchema>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.get(name).map(|t| t.schema.clone()))
    }

    async fn create_table(&self, name: &str, schema: TableSchema) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.contains_key(name) {
            return Err(StoreError::TableExists(name.to_string()));
        }
        tables.insert(
            name.to_string(),
            BackendTable {
                schema,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn async_prepare(&self, number: u64, dirty: DirtySet) -> Result<(), StoreError> {
        debug!(number, rows = dirty.rows.len(), "backend prepare");
        self.staged.lock().await.insert(number, dirty);
        Ok(())
    }

    async fn async_commit(&self, number: u64) -> Result<(), StoreError> {
        let staged = self.staged.lock().await.remove(&number);
        let Some(dirty) = staged else {
            // Replayed commit is fine, missing prepare is not.
            if self.committed.lock().await.contains(&number) {
                return Ok(());
            }
            return Err(StoreError::PrepareMissing(number));
        };

        let mut tables = self.tables.write().await;
        for (name, schema) in dirty.created_tables {
            tables.entry(name).or_insert_with(|| BackendTable {
                schema,
                rows: BTreeMap::new(),
            });
        }
        for row in dirty.rows {
            let Some(table) = tables.get_mut(&row.table) else {
                // a staged row pointing at a table the dirty set never
                // created means the prepare payload itself is corrupt
                return Err(StoreError::BackendIo(format!(
                    "commit references unknown table {}",
                    row.table
                )));
            };
            match row.entry.status() {
                EntryStatus::Deleted => {
                    table.rows.remove(&row.key);
                }
                EntryStatus::Purged => {}
                _ => {
                    let mut entry = row.entry;
                    entry.set_status(EntryStatus::Normal);
                    table.rows.insert(row.key, entry);
                }
            }
        }
        drop(tables);

        self.committed.lock().await.insert(number);
        debug!(number, "backend commit");
        Ok(())
    }

    async fn async_rollback(&self, number: u64) -> Result<(), StoreError> {
        self.staged.lock().await.remove(&number);
        debug!(number, "backend rollback");
        Ok(())
    }
}
