use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::H256;
use tabrex_common::constants::{FS_FIELD_TYPE, FS_ROOT, STORAGE_KEY, STORAGE_VALUE};
use tabrex_common::{Entry, ExecutionMessage, LogEntry, MessageType, TableSchema, VmKind};
use tabrex_precompiled::{contracts, fs, PrecompiledError};
use tabrex_state::{ContractStatus, StateError};
use tabrex_storage::{StorageWrapper, StoreError};
use tracing::{debug, trace};

use crate::context::BlockContext;
use crate::error::ExecutorError;
use crate::status;
use crate::vm::{CallRequest, CallResponse, HostContext, VmInput, VmOutcome};

/// Drives the frames of one transaction. A frame is one activation of a
/// contract call with its own gas budget, savepoint and key-lock set;
/// `(context_id, seq)` identifies exactly one frame within the block.
///
/// Frames run as cooperative async tasks: storage I/O and nested calls
/// are awaits, a revert unwinds to the frame's entry savepoint and
/// discards its logs, gas exhaustion reverts with `OUT_OF_GAS` while
/// enclosing frames keep their own unconsumed gas.
pub struct Executive {
    context: Arc<BlockContext>,
    context_id: u64,
    seq: Arc<AtomicU64>,
}

struct FrameOutput {
    output: Bytes,
    status: i32,
    gas_left: i64,
    logs: Vec<LogEntry>,
    new_contract_address: String,
}

impl Executive {
    pub fn new(context: Arc<BlockContext>, context_id: u64) -> Self {
        Self {
            context,
            context_id,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Drives `message` to a terminal `Finished`/`Revert` message.
    pub async fn execute(&self, message: ExecutionMessage) -> ExecutionMessage {
        let seq = self.next_seq();
        let savepoint = self.context.storage.savepoint();
        trace!(
            context_id = self.context_id,
            seq,
            to = %message.to,
            create = message.create,
            "frame enter"
        );

        let mut reply = ExecutionMessage::new(MessageType::Finished, self.context_id, seq);
        reply.depth = message.depth;
        reply.from = message.to.clone();
        reply.to = message.from.clone();
        reply.origin = message.origin.clone();
        reply.transaction_hash = message.transaction_hash;

        match self.run_frame(&message).await {
            Ok(frame) => {
                reply.ty = MessageType::Finished;
                reply.status = frame.status;
                reply.data = frame.output;
                reply.gas_available = frame.gas_left;
                reply.log_entries = frame.logs;
                reply.new_contract_address = frame.new_contract_address;
            }
            Err(error) => {
                debug!(
                    context_id = self.context_id,
                    seq,
                    %error,
                    "frame reverted"
                );
                // unwind this frame's writes; its logs are discarded
                if self.context.storage.rollback(savepoint).is_err() {
                    trace!(savepoint, "savepoint already consumed by inner rollback");
                }
                if let Some((table, key)) = wait_key_of(&error) {
                    // a parallel transaction still holds the key: hand
                    // the conflict to the scheduler, naming the key, so
                    // it can suspend this transaction until release
                    reply.ty = MessageType::WaitKey;
                    reply.status = status::WAIT_KEY;
                    reply.message = format!("{table}:{key}");
                    reply.key_locks = vec![format!("{table}:{key}")];
                    reply.gas_available = message.gas_available;
                    return reply;
                }
                reply.ty = MessageType::Revert;
                reply.status = error.status();
                reply.message = error.to_string();
                reply.gas_available = if matches!(error, ExecutorError::OutOfGas) {
                    0
                } else {
                    message.gas_available
                };
            }
        }

        reply.key_locks = self
            .context
            .ledger
            .held_locks(self.context_id)
            .into_iter()
            .map(|(table, key, _)| format!("{table}:{key}"))
            .collect();
        reply
    }

    async fn run_frame(&self, message: &ExecutionMessage) -> Result<FrameOutput, ExecutorError> {
        if message.create {
            return self.run_create(message).await;
        }

        // reserved-address crypto contract
        if let Some(contract) = self.context.registry.builtin(&message.to) {
            let cost = contract.cost(&message.data);
            if cost > message.gas_available {
                return Err(ExecutorError::OutOfGas);
            }
            let (ok, output) = contract.execute(&message.data);
            if !ok {
                return Err(ExecutorError::Revert(format!(
                    "precompiled {} failed",
                    contract.name
                )));
            }
            return Ok(FrameOutput {
                output: output.into(),
                status: status::SUCCESS,
                gas_left: message.gas_available - cost,
                logs: Vec::new(),
                new_contract_address: String::new(),
            });
        }

        // frozen and killed accounts no longer accept calls
        match self.context.state.contract_status(&message.to).await? {
            ContractStatus::Frozen => {
                return Err(ExecutorError::ContractFrozen(message.to.clone()))
            }
            ContractStatus::Killed => {
                return Err(ExecutorError::NoCode(message.to.clone()))
            }
            ContractStatus::NonExistent | ContractStatus::Available => {}
        }

        // registered service object
        if let Some(object) = self.context.registry.get(&message.to) {
            let pctx = self.context.precompiled_context(self.context_id);
            let result = object
                .as_precompiled()
                .call(
                    &pctx,
                    &message.data,
                    &message.origin,
                    &message.from,
                    message.gas_available,
                )
                .await?;
            if result.gas_used > message.gas_available {
                return Err(ExecutorError::OutOfGas);
            }
            return Ok(FrameOutput {
                output: result.output,
                status: result.status,
                gas_left: message.gas_available - result.gas_used,
                logs: Vec::new(),
                new_contract_address: String::new(),
            });
        }

        // plain contract: load code and drive the interpreter
        let code = self
            .context
            .state
            .code(&message.to)
            .await?
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ExecutorError::NoCode(message.to.clone()))?;

        let mut host = FrameHost::new(self, message);
        let input = VmInput {
            address: message.to.clone(),
            sender: message.from.clone(),
            origin: message.origin.clone(),
            code,
            data: message.data.clone(),
            gas: message.gas_available,
            static_call: message.static_call,
            create: false,
        };
        let outcome = self.context.vm().execute(&mut host, input).await?;
        let logs = host.into_logs();

        match outcome {
            VmOutcome::Finished { output, gas_left } => Ok(FrameOutput {
                output,
                status: status::SUCCESS,
                gas_left,
                logs,
                new_contract_address: String::new(),
            }),
            VmOutcome::Revert { message, .. } => Err(ExecutorError::Revert(message)),
        }
    }

    async fn run_create(&self, message: &ExecutionMessage) -> Result<FrameOutput, ExecutorError> {
        let state = &self.context.state;

        let address = match self.context.vm_kind {
            VmKind::Native => {
                let sender_raw = hex::decode(message.from.trim_start_matches("0x"))
                    .map_err(|_| {
                        ExecutorError::InvalidTransaction(format!(
                            "malformed sender {}",
                            message.from
                        ))
                    })?;
                let nonce = state.get_nonce(&message.from).await?;
                let derived = contracts::derive_contract_address(
                    &sender_raw,
                    nonce,
                    message.create_salt,
                );
                hex::encode(derived.as_bytes())
            }
            VmKind::Linear => {
                let path = message.to.clone();
                if !fs::check_path_valid(&path) {
                    return Err(ExecutorError::InvalidTransaction(format!(
                        "invalid contract path {path}"
                    )));
                }
                let parent = fs::parent_dir(&path);
                if parent != FS_ROOT {
                    fs::recursive_build_dir(&self.context.storage, &parent).await?;
                }
                // register the leaf in its parent directory
                let mut dir_row = Entry::from_schema(&fs::fs_schema());
                dir_row.set_field(FS_FIELD_TYPE, b"contract".to_vec());
                self.context
                    .storage
                    .set_row(&parent, &fs::base_name(&path), dir_row)
                    .await?;
                path
            }
        };

        if state.address_in_use(&address).await? && state.has_code(&address).await? {
            return Err(ExecutorError::InvalidTransaction(format!(
                "contract already exists at {address}"
            )));
        }

        state
            .create_account(&address, ethereum_types::U256::zero(), ethereum_types::U256::zero())
            .await?;
        state.set_code(&address, message.data.clone()).await?;
        if self.context.vm_kind == VmKind::Native {
            state.inc_nonce(&message.from).await?;
        }

        // drive the constructor frame
        let mut constructor = message.clone();
        constructor.to = address.clone();
        let mut host = FrameHost::new(self, &constructor);
        let input = VmInput {
            address: address.clone(),
            sender: message.from.clone(),
            origin: message.origin.clone(),
            code: message.data.clone(),
            data: Bytes::new(),
            gas: message.gas_available,
            static_call: false,
            create: true,
        };
        let outcome = self.context.vm().execute(&mut host, input).await?;
        let logs = host.into_logs();

        match outcome {
            VmOutcome::Finished { output, gas_left } => {
                debug!(%address, "contract deployed");
                Ok(FrameOutput {
                    output,
                    status: status::SUCCESS,
                    gas_left,
                    logs,
                    new_contract_address: address,
                })
            }
            VmOutcome::Revert { message, .. } => Err(ExecutorError::Revert(message)),
        }
    }
}

/// Host-interface implementation handed to the interpreter for one
/// frame.
struct FrameHost<'a> {
    executive: &'a Executive,
    context: Arc<BlockContext>,
    address: String,
    origin: String,
    transaction_hash: H256,
    depth: u32,
    static_call: bool,
    logs: Vec<LogEntry>,
    wrapper: StorageWrapper,
}

impl<'a> FrameHost<'a> {
    fn new(executive: &'a Executive, message: &ExecutionMessage) -> Self {
        let context = executive.context.clone();
        let wrapper = context.storage_wrapper(executive.context_id);
        Self {
            executive,
            context,
            address: message.to.clone(),
            origin: message.origin.clone(),
            transaction_hash: message.transaction_hash,
            depth: message.depth,
            static_call: message.static_call,
            logs: Vec::new(),
            wrapper,
        }
    }

    fn into_logs(self) -> Vec<LogEntry> {
        self.logs
    }
}

#[async_trait]
impl HostContext for FrameHost<'_> {
    async fn get_storage(&mut self, key: &str) -> Result<Bytes, ExecutorError> {
        let table = self.context.state.table_name(&self.address);
        match self.wrapper.get_row(&table, key).await {
            Ok(row) => Ok(row
                .and_then(|entry| entry.get_field(STORAGE_VALUE).map(Bytes::copy_from_slice))
                .unwrap_or_default()),
            Err(StoreError::TableNotFound(_)) => Ok(Bytes::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_storage(&mut self, key: &str, value: Bytes) -> Result<(), ExecutorError> {
        if self.static_call {
            return Err(ExecutorError::StaticViolation);
        }
        let table = self.context.state.table_name(&self.address);
        let mut entry = Entry::from_schema(&TableSchema::new(STORAGE_KEY, &[STORAGE_VALUE]));
        entry.set_field(STORAGE_VALUE, value);
        self.wrapper.set_row(&table, key, entry).await?;
        Ok(())
    }

    async fn call(&mut self, request: CallRequest) -> Result<CallResponse, ExecutorError> {
        let mut child = ExecutionMessage::new(
            MessageType::Message,
            self.executive.context_id,
            // the child frame allocates its own seq on entry
            0,
        );
        child.depth = self.depth + 1;
        child.from = self.address.clone();
        child.to = request.to;
        child.origin = self.origin.clone();
        child.transaction_hash = self.transaction_hash;
        child.gas_available = request.gas;
        child.data = request.data;
        child.static_call = request.static_call || self.static_call;
        child.create = request.create;
        child.create_salt = request.create_salt;
        // the caller's held lock set travels with the outbound call
        child.key_locks = self
            .context
            .ledger
            .held_locks(self.executive.context_id)
            .into_iter()
            .map(|(table, key, _)| format!("{table}:{key}"))
            .collect();

        let reply = Box::pin(self.executive.execute(child)).await;
        if reply.ty == MessageType::WaitKey {
            // unwind the whole transaction; the scheduler parks it on
            // the named key and retries once the holder releases
            let (table, key) = split_lock(&reply.message);
            return Err(ExecutorError::Store(StoreError::KeyLockConflict {
                table,
                key,
            }));
        }
        let response = CallResponse {
            status: reply.status,
            output: reply.data.clone(),
            gas_left: reply.gas_available,
            new_contract_address: reply.new_contract_address.clone(),
        };
        // a finished callee surfaces its logs into the caller's frame
        if reply.ty == MessageType::Finished {
            self.logs.extend(reply.log_entries);
        }
        Ok(response)
    }

    fn log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    fn block_number(&self) -> u64 {
        self.context.header.number
    }

    fn block_hash(&self, number: u64) -> H256 {
        self.context.block_hash_of(number)
    }

    fn logs(&self) -> &[LogEntry] {
        &self.logs
    }
}

/// The `(table, key)` a frame failed to acquire, wherever the conflict
/// surfaced in the error chain.
fn wait_key_of(error: &ExecutorError) -> Option<(String, String)> {
    let store = match error {
        ExecutorError::Store(e) => e,
        ExecutorError::State(StateError::Store(e)) => e,
        ExecutorError::Precompiled(PrecompiledError::Store(e)) => e,
        ExecutorError::Precompiled(PrecompiledError::State(StateError::Store(e))) => e,
        _ => return None,
    };
    match store {
        StoreError::KeyLockConflict { table, key } => Some((table.clone(), key.clone())),
        _ => None,
    }
}

/// Inverse of the `table:key` form used in `key_locks`; table names
/// never contain a colon.
pub(crate) fn split_lock(lock: &str) -> (String, String) {
    match lock.split_once(':') {
        Some((table, key)) => (table.to_string(), key.to_string()),
        None => (lock.to_string(), String::new()),
    }
}
