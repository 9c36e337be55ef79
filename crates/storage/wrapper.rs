use std::sync::Arc;

use tabrex_common::{Entry, KeyCondition, TableSchema};

use crate::error::StoreError;
use crate::keylock::{KeyLockLedger, LockMode};
use crate::state::StateStorage;

/// How the wrapper interacts with the key-lock ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Note every access without excluding anyone. DAG child layers use
    /// this; the scheduler compares recorded sets after the fact.
    Record,
    /// Acquire exclusively. A key held by another context surfaces as
    /// [`StoreError::KeyLockConflict`] so the frame can suspend until
    /// the holder releases.
    Acquire,
}

/// Storage façade handed to frames and precompiled services: forwards
/// to the block (or child) layer and runs every touched `(table, key)`
/// through the key-lock ledger under the owning transaction's context
/// id.
///
/// The async storage API is itself the suspension point; callers just
/// await, errors propagate to the frame boundary.
pub struct StorageWrapper {
    storage: Arc<StateStorage>,
    ledger: Arc<KeyLockLedger>,
    context_id: u64,
    policy: LockPolicy,
}

impl StorageWrapper {
    pub fn new(
        storage: Arc<StateStorage>,
        ledger: Arc<KeyLockLedger>,
        context_id: u64,
        policy: LockPolicy,
    ) -> Self {
        Self {
            storage,
            ledger,
            context_id,
            policy,
        }
    }

    pub fn storage(&self) -> &Arc<StateStorage> {
        &self.storage
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    fn lock(&self, table: &str, key: &str, mode: LockMode) -> Result<(), StoreError> {
        match self.policy {
            LockPolicy::Record => {
                self.ledger.record(self.context_id, table, key, mode);
                Ok(())
            }
            LockPolicy::Acquire => self
                .ledger
                .try_acquire(self.context_id, table, key, mode)
                .map_err(|_| StoreError::KeyLockConflict {
                    table: table.to_string(),
                    key: key.to_string(),
                }),
        }
    }

    pub async fn get_row(&self, table: &str, key: &str) -> Result<Option<Entry>, StoreError> {
        self.lock(table, key, LockMode::Read)?;
        self.storage.get_row(table, key).await
    }

    pub async fn get_rows(
        &self,
        table: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Entry>>, StoreError> {
        for key in keys {
            self.lock(table, key, LockMode::Read)?;
        }
        self.storage.get_rows(table, keys).await
    }

    pub async fn get_primary_keys(
        &self,
        table: &str,
        condition: Option<&KeyCondition>,
    ) -> Result<Vec<String>, StoreError> {
        self.storage.get_primary_keys(table, condition).await
    }

    pub async fn set_row(&self, table: &str, key: &str, entry: Entry) -> Result<(), StoreError> {
        self.lock(table, key, LockMode::Write)?;
        self.storage.set_row(table, key, entry).await
    }

    pub async fn open_table(&self, name: &str) -> Result<Option<TableSchema>, StoreError> {
        self.storage.open_table(name).await
    }

    pub async fn create_table(&self, name: &str, schema: TableSchema) -> Result<(), StoreError> {
        self.storage.create_table(name, schema).await
    }
}
