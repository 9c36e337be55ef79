use bytes::Bytes;
use ethereum_types::{H256, U256};

/// Transport between the transaction executor and the VM host. One
/// message travels per frame transition; the `(context_id, seq)` pair
/// identifies exactly one execution frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMessage {
    pub ty: MessageType,
    pub context_id: u64,
    pub seq: u64,
    pub depth: u32,

    /// Sender identity (hex address or path, per VM kind).
    pub from: String,
    /// Callee identity.
    pub to: String,
    /// Identity that signed the outermost transaction.
    pub origin: String,
    pub transaction_hash: H256,

    pub gas_available: i64,
    pub data: Bytes,
    pub static_call: bool,
    pub create: bool,
    pub create_salt: Option<U256>,

    /// Response fields.
    pub status: i32,
    pub message: String,
    pub new_contract_address: String,
    pub log_entries: Vec<LogEntry>,
    /// Keys this frame still holds; attached when the frame suspends on
    /// an external call so the scheduler can detect cross-transaction
    /// conflicts.
    pub key_locks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    TxHash,
    Message,
    Finished,
    Revert,
    SendBack,
    KeyLock,
    WaitKey,
}

impl ExecutionMessage {
    pub fn new(ty: MessageType, context_id: u64, seq: u64) -> Self {
        Self {
            ty,
            context_id,
            seq,
            depth: 0,
            from: String::new(),
            to: String::new(),
            origin: String::new(),
            transaction_hash: H256::zero(),
            gas_available: 0,
            data: Bytes::new(),
            static_call: false,
            create: false,
            create_salt: None,
            status: 0,
            message: String::new(),
            new_contract_address: String::new(),
            log_entries: Vec::new(),
            key_locks: Vec::new(),
        }
    }
}

/// Event emitted by a frame; discarded when the frame reverts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: String,
    pub topics: Vec<H256>,
    pub data: Bytes,
}

/// Output of one precompiled call: payload, numeric status and the gas
/// the call consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallResult {
    pub output: Bytes,
    pub status: i32,
    pub gas_used: i64,
}

impl CallResult {
    pub fn ok(output: impl Into<Bytes>, gas_used: i64) -> Self {
        Self {
            output: output.into(),
            status: 0,
            gas_used,
        }
    }
}

/// Per-transaction outcome; transaction failures never fail the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub status: i32,
    pub gas_used: i64,
    pub output: Bytes,
    pub logs: Vec<LogEntry>,
    /// UTF-8 revert reason, empty on success.
    pub message: String,
    pub contract_address: String,
}
