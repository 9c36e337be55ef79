use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ethereum_types::H256;
use tabrex_common::constants::{
    FS_APPS, FS_ROOT, FS_USER_TABLE, STORAGE_KEY, STORAGE_VALUE, SYS_CONFIG, SYS_TABLES,
    SYS_TABLE_KEY, SYS_TABLE_KEY_FIELD, SYS_TABLE_VALUE_FIELDS,
};
use tabrex_common::{BlockHeaderView, TableSchema, VmKind};
use tabrex_precompiled::{fs, PrecompiledContext, PrecompiledRegistry, RegistryBuilder};
use tabrex_state::State;
use tabrex_storage::{
    KeyLockLedger, LockPolicy, StateStorage, StorageWrapper, StoreError,
};
use tracing::debug;

use crate::error::ExecutorError;
use crate::vm::Vm;

pub type NumberToHash = dyn Fn(u64) -> H256 + Send + Sync;

/// Per-block execution environment: the header view, the VM-kind flag,
/// the state handles, the precompiled registry and the key-lock ledger.
/// Created at block start, discarded at block end.
pub struct BlockContext {
    pub header: BlockHeaderView,
    pub vm_kind: VmKind,
    pub storage: Arc<StateStorage>,
    pub state: Arc<State>,
    pub registry: Arc<PrecompiledRegistry>,
    pub ledger: Arc<KeyLockLedger>,
    /// Exclusive acquisition on the block layer; record-only on DAG
    /// child layers, which run on private state anyway.
    pub lock_policy: LockPolicy,
    number_to_hash: Arc<NumberToHash>,
    vm: Arc<dyn Vm>,
    context_counter: Arc<AtomicU64>,
}

impl BlockContext {
    pub async fn new(
        header: BlockHeaderView,
        vm_kind: VmKind,
        storage: Arc<StateStorage>,
        vm: Arc<dyn Vm>,
        number_to_hash: Arc<NumberToHash>,
    ) -> Result<Arc<Self>, ExecutorError> {
        Self::seed_system_tables(&storage).await?;

        let registry = RegistryBuilder::new(vm_kind)
            .with_builtin_contracts()
            .build();
        let state = Arc::new(State::new(storage.clone(), vm_kind));

        debug!(number = header.number, ?vm_kind, "block context created");
        Ok(Arc::new(Self {
            header,
            vm_kind,
            storage,
            state,
            registry,
            ledger: Arc::new(KeyLockLedger::new()),
            lock_policy: LockPolicy::Acquire,
            number_to_hash,
            vm,
            context_counter: Arc::new(AtomicU64::new(0)),
        }))
    }

    /// Directory roots and system catalogs every block expects.
    async fn seed_system_tables(storage: &StateStorage) -> Result<(), StoreError> {
        for table in [FS_ROOT, FS_APPS, FS_USER_TABLE] {
            match storage.create_table(table, fs::fs_schema()).await {
                Ok(()) | Err(StoreError::TableExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        match storage
            .create_table(SYS_CONFIG, TableSchema::new(STORAGE_KEY, &[STORAGE_VALUE]))
            .await
        {
            Ok(()) | Err(StoreError::TableExists(_)) => {}
            Err(e) => return Err(e),
        }
        match storage
            .create_table(
                SYS_TABLES,
                TableSchema::new(
                    SYS_TABLE_KEY,
                    &[SYS_TABLE_KEY_FIELD, SYS_TABLE_VALUE_FIELDS],
                ),
            )
            .await
        {
            Ok(()) | Err(StoreError::TableExists(_)) => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// A view of this context executing over `storage` (a DAG child
    /// layer). The registry, ledger, header and counters stay shared.
    pub fn fork(&self, storage: Arc<StateStorage>) -> Arc<Self> {
        Arc::new(Self {
            header: self.header.clone(),
            vm_kind: self.vm_kind,
            state: Arc::new(State::new(storage.clone(), self.vm_kind)),
            storage,
            registry: self.registry.clone(),
            ledger: self.ledger.clone(),
            lock_policy: LockPolicy::Record,
            number_to_hash: self.number_to_hash.clone(),
            vm: self.vm.clone(),
            context_counter: self.context_counter.clone(),
        })
    }

    pub fn vm(&self) -> &Arc<dyn Vm> {
        &self.vm
    }

    pub fn block_hash_of(&self, number: u64) -> H256 {
        (self.number_to_hash)(number)
    }

    /// Fresh context id for a root transaction frame.
    pub fn next_context_id(&self) -> u64 {
        self.context_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// A storage wrapper bound to one transaction's context id, so the
    /// frame's accesses land in the key-lock ledger.
    pub fn storage_wrapper(&self, context_id: u64) -> StorageWrapper {
        StorageWrapper::new(
            self.storage.clone(),
            self.ledger.clone(),
            context_id,
            self.lock_policy,
        )
    }

    pub fn precompiled_context(&self, context_id: u64) -> PrecompiledContext {
        PrecompiledContext {
            storage: Arc::new(self.storage_wrapper(context_id)),
            state: self.state.clone(),
            registry: self.registry.clone(),
            vm_kind: self.vm_kind,
        }
    }

    pub fn hash(&self) -> H256 {
        self.storage.hash()
    }
}
