use std::collections::VecDeque;
use std::sync::Arc;

use ethereum_types::H256;
use tabrex_common::{
    BlockHeaderView, ExecutionMessage, ExecutorConfig, MessageType, Receipt, VmKind,
};
use tabrex_precompiled::Codec;
use tabrex_storage::{Backend, KeyLockLedger, LockMode, LruStorage, StateStorage};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::conflict::{build_dependency_edges, ConflictCatalog, ConflictSet};
use crate::context::{BlockContext, NumberToHash};
use crate::error::ExecutorError;
use crate::executive::Executive;
use crate::vm::Vm;

struct OpenBlock {
    context: Arc<BlockContext>,
    number: u64,
    receipts: Vec<Receipt>,
}

/// Orchestrates per-block execution: serial order, DAG-parallel
/// scheduling keyed on declared conflict fields, and the two-phase
/// commit of the block's dirty rows to the backend.
pub struct TransactionExecutor {
    backend: Arc<dyn Backend>,
    vm: Arc<dyn Vm>,
    config: ExecutorConfig,
    catalog: std::sync::RwLock<ConflictCatalog>,
    number_to_hash: Arc<NumberToHash>,
    /// Long-lived read cache between the block layers and the backend.
    cache: Option<Arc<LruStorage>>,
    block: Mutex<Option<OpenBlock>>,
}

impl TransactionExecutor {
    pub fn new(
        backend: Arc<dyn Backend>,
        vm: Arc<dyn Vm>,
        config: ExecutorConfig,
        number_to_hash: Arc<NumberToHash>,
    ) -> Self {
        let cache = (config.lru_max_capacity > 0).then(|| {
            Arc::new(LruStorage::new(
                StateStorage::with_backend(backend.clone()),
                config.lru_max_capacity,
                std::time::Duration::from_millis(config.lru_poll_interval_ms),
            ))
        });
        Self {
            backend,
            vm,
            config,
            catalog: std::sync::RwLock::new(ConflictCatalog::new()),
            number_to_hash,
            cache,
            block: Mutex::new(None),
        }
    }

    pub fn vm_kind(&self) -> VmKind {
        self.config.vm_kind
    }

    /// Registers a parallelizable function; see [`ConflictCatalog`].
    pub fn register_conflict_fields(
        &self,
        contract: impl Into<String>,
        selector: u32,
        param_types: Vec<tabrex_precompiled::ParamType>,
        fields: Vec<crate::conflict::ConflictField>,
    ) {
        if let Ok(mut catalog) = self.catalog.write() {
            catalog.register(contract, selector, param_types, fields);
        }
    }

    /// Opens the execution environment for one block. All transactions
    /// until `commit`/`rollback` run over the same storage layer.
    pub async fn begin_block(&self, header: BlockHeaderView) -> Result<(), ExecutorError> {
        let mut slot = self.block.lock().await;
        if let Some(open) = slot.as_ref() {
            return Err(ExecutorError::InvalidTransaction(format!(
                "block {} still open",
                open.number
            )));
        }
        let storage = match &self.cache {
            Some(cache) => StateStorage::with_reader(cache.clone()),
            None => StateStorage::with_backend(self.backend.clone()),
        };
        let number = header.number;
        let context = BlockContext::new(
            header,
            self.config.vm_kind,
            storage,
            self.vm.clone(),
            self.number_to_hash.clone(),
        )
        .await?;
        *slot = Some(OpenBlock {
            context,
            number,
            receipts: Vec::new(),
        });
        debug!(number, "block opened");
        Ok(())
    }

    async fn context(&self) -> Result<Arc<BlockContext>, ExecutorError> {
        let slot = self.block.lock().await;
        slot.as_ref()
            .map(|open| open.context.clone())
            .ok_or(ExecutorError::BlockNotOpen(0))
    }

    /// Serial mode: drives one root frame to its terminal state.
    pub async fn execute_transaction(
        &self,
        message: ExecutionMessage,
    ) -> Result<ExecutionMessage, ExecutorError> {
        let context = self.context().await?;
        let reply = Self::run_root(&context, message).await;
        self.push_receipt(&reply).await;
        Ok(reply)
    }

    async fn run_root(context: &Arc<BlockContext>, message: ExecutionMessage) -> ExecutionMessage {
        let context_id = context.next_context_id();
        let gas_budget = message.gas_available;
        let executive = Executive::new(context.clone(), context_id);

        let mut reply = loop {
            let reply = executive.execute(message.clone()).await;
            if reply.ty != MessageType::WaitKey {
                break reply;
            }
            // the transaction is parked on the named key until the
            // holder releases, then retried from its entry state
            let (table, key) = crate::executive::split_lock(&reply.message);
            debug!(context_id, %table, %key, "transaction waiting on key lock");
            match context
                .ledger
                .acquire(context_id, &table, &key, LockMode::Write)
                .await
            {
                Ok(()) => continue,
                Err(cycle) => {
                    let error = ExecutorError::KeyLockCycle(cycle.0);
                    let mut reply = reply;
                    reply.ty = MessageType::Revert;
                    reply.status = error.status();
                    reply.message = error.to_string();
                    break reply;
                }
            }
        };

        // receipts report gas consumed, not gas left
        reply.gas_available = gas_budget - reply.gas_available.min(gas_budget);
        context.ledger.release_all(context_id);
        reply
    }

    /// DAG mode: conflict sets → dependency edges → topological
    /// parallel execution on child layers, merged back in input order.
    /// Transactions whose runtime accesses escape their declared
    /// conflict set are re-executed serially at the end.
    pub async fn dag_execute_transactions(
        &self,
        messages: Vec<ExecutionMessage>,
    ) -> Result<Vec<ExecutionMessage>, ExecutorError> {
        let context = self.context().await?;
        let total = messages.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let codec = Codec::new(self.config.vm_kind);
        let sets: Vec<ConflictSet> = {
            let catalog = self
                .catalog
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            messages
                .iter()
                .map(|message| catalog.evaluate(message, &codec))
                .collect()
        };
        let dependents = build_dependency_edges(&sets);
        let mut indegree = vec![0usize; total];
        for targets in &dependents {
            for &target in targets {
                indegree[target] += 1;
            }
        }

        let context_ids: Vec<u64> = (0..total).map(|_| context.next_context_id()).collect();
        let semaphore = Arc::new(Semaphore::new(self.config.dag_workers.max(1)));
        let (done_tx, mut done_rx) =
            mpsc::unbounded_channel::<(usize, Arc<StateStorage>, ExecutionMessage)>();

        let gas_budgets: Vec<i64> = messages.iter().map(|m| m.gas_available).collect();
        let mut spawned = vec![false; total];

        let launch = |index: usize, spawned: &mut Vec<bool>| {
            if spawned[index] {
                return;
            }
            spawned[index] = true;
            let message = messages[index].clone();
            let child = StateStorage::without_read_cache(context.storage.clone());
            let forked = context.fork(child.clone());
            let context_id = context_ids[index];
            let done = done_tx.clone();
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let executive = Executive::new(forked, context_id);
                let reply = executive.execute(message).await;
                let _ = done.send((index, child, reply));
            });
        };

        let ready: VecDeque<usize> = (0..total).filter(|&i| indegree[i] == 0).collect();
        for index in ready {
            launch(index, &mut spawned);
        }

        let mut completed: Vec<Option<(Arc<StateStorage>, ExecutionMessage)>> =
            (0..total).map(|_| None).collect();
        let mut results: Vec<Option<ExecutionMessage>> = (0..total).map(|_| None).collect();
        let mut merged_ids: Vec<(usize, u64)> = Vec::new();
        let mut escaped: Vec<usize> = Vec::new();
        let mut next_merge = 0usize;
        let mut received = 0usize;

        while received < total {
            let Some((index, child, reply)) = done_rx.recv().await else {
                break;
            };
            received += 1;
            completed[index] = Some((child, reply));

            // merge completions in input order; dependents are released
            // only after their dependencies' writes reached the block
            // layer
            while next_merge < total {
                let Some((child, reply)) = completed[next_merge].take() else {
                    break;
                };
                let index = next_merge;
                next_merge += 1;

                // escape check: a conflict with an already-merged
                // transaction it ran in parallel with means the declared
                // conflict fields were incomplete
                let escapes = merged_ids.iter().any(|&(other, other_ctx)| {
                    !dependents[other].contains(&index)
                        && context.ledger.conflicts(other_ctx, context_ids[index])
                });

                if escapes {
                    warn!(index, "conflict fields escaped, serial re-execution");
                    context.ledger.release_all(context_ids[index]);
                    escaped.push(index);
                } else {
                    child.merge_into(&context.storage).await?;
                    let mut reply = reply;
                    reply.gas_available =
                        gas_budgets[index] - reply.gas_available.min(gas_budgets[index]);
                    results[index] = Some(reply);
                    merged_ids.push((index, context_ids[index]));
                }

                for &dependent in &dependents[index] {
                    indegree[dependent] -= 1;
                    if indegree[dependent] == 0 {
                        launch(dependent, &mut spawned);
                    }
                }
            }
        }

        for (_, context_id) in &merged_ids {
            context.ledger.release_all(*context_id);
        }

        // serial tail for escaped transactions, in input order
        escaped.sort_unstable();
        for index in escaped {
            let reply = Self::run_root(&context, messages[index].clone()).await;
            results[index] = Some(reply);
        }

        info!(total, merged = merged_ids.len(), "DAG batch executed");

        let mut replies = Vec::with_capacity(total);
        for (index, result) in results.into_iter().enumerate() {
            let reply = result.ok_or(ExecutorError::ConflictFieldEscape { index })?;
            self.push_receipt(&reply).await;
            replies.push(reply);
        }
        Ok(replies)
    }

    /// The open block's key-lock ledger; parallel transactions park on
    /// it through the WAIT_KEY protocol.
    pub async fn key_lock_ledger(&self) -> Result<Arc<KeyLockLedger>, ExecutorError> {
        Ok(self.context().await?.ledger.clone())
    }

    async fn push_receipt(&self, reply: &ExecutionMessage) {
        let mut slot = self.block.lock().await;
        if let Some(open) = slot.as_mut() {
            open.receipts.push(Receipt {
                transaction_hash: reply.transaction_hash,
                status: reply.status,
                gas_used: reply.gas_available,
                output: reply.data.clone(),
                logs: reply.log_entries.clone(),
                message: reply.message.clone(),
                contract_address: reply.new_contract_address.clone(),
            });
        }
    }

    pub async fn receipts(&self) -> Vec<Receipt> {
        let slot = self.block.lock().await;
        slot.as_ref()
            .map(|open| open.receipts.clone())
            .unwrap_or_default()
    }

    /// Deterministic digest over the open block's dirty rows.
    pub async fn state_hash(&self) -> Result<H256, ExecutorError> {
        Ok(self.context().await?.hash())
    }

    /// First phase: serialize the block's dirty rows to the backend.
    pub async fn prepare(&self, number: u64) -> Result<(), ExecutorError> {
        let slot = self.block.lock().await;
        let open = slot.as_ref().ok_or(ExecutorError::BlockNotOpen(number))?;
        if open.number != number {
            return Err(ExecutorError::BlockNotOpen(number));
        }
        let dirty = open.context.storage.export_dirty();
        debug!(number, rows = dirty.rows.len(), "prepare");
        self.backend.async_prepare(number, dirty).await?;
        Ok(())
    }

    /// Second phase: finalize and close the block. Idempotent on the
    /// backend side.
    pub async fn commit(&self, number: u64) -> Result<(), ExecutorError> {
        let mut slot = self.block.lock().await;
        match slot.as_ref() {
            Some(open) if open.number == number => {}
            _ => return Err(ExecutorError::BlockNotOpen(number)),
        }
        self.backend.async_commit(number).await?;
        if let Some(open) = slot.take() {
            // keep the long-lived cache coherent with the committed rows
            if let Some(cache) = &self.cache {
                cache
                    .storage()
                    .absorb_committed(&open.context.storage.export_dirty());
            }
        }
        info!(number, "block committed");
        Ok(())
    }

    /// Discards the staged block.
    pub async fn rollback(&self, number: u64) -> Result<(), ExecutorError> {
        let mut slot = self.block.lock().await;
        let is_open = matches!(slot.as_ref(), Some(open) if open.number == number);
        if is_open {
            self.backend.async_rollback(number).await?;
            *slot = None;
            info!(number, "block rolled back");
        }
        Ok(())
    }
}
