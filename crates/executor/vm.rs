//! The opaque interpreter boundary.
//!
//! The bytecode machines themselves are external collaborators; the
//! executor only needs a poll-style surface: drive the code with a host
//! handle, get back either output or a revert. Host calls either return
//! a ready value or suspend the frame's task until the response arrives.

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::{H256, U256};
use tabrex_common::LogEntry;

use crate::error::ExecutorError;

/// Everything a frame hands the interpreter.
#[derive(Debug, Clone)]
pub struct VmInput {
    /// Contract identity the frame runs as.
    pub address: String,
    pub sender: String,
    pub origin: String,
    pub code: Bytes,
    pub data: Bytes,
    pub gas: i64,
    pub static_call: bool,
    /// True for the constructor frame of a deployment.
    pub create: bool,
}

#[derive(Debug, Clone)]
pub enum VmOutcome {
    Finished { output: Bytes, gas_left: i64 },
    Revert { message: String, gas_left: i64 },
}

/// Outbound external call issued by a running frame.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub to: String,
    pub data: Bytes,
    pub gas: i64,
    pub create: bool,
    pub create_salt: Option<U256>,
    pub static_call: bool,
}

#[derive(Debug, Clone)]
pub struct CallResponse {
    pub status: i32,
    pub output: Bytes,
    pub gas_left: i64,
    pub new_contract_address: String,
}

/// Host-interface surface the executor exposes to an interpreter. The
/// async methods are the frame's suspension points.
#[async_trait]
pub trait HostContext: Send {
    /// A storage slot of the frame's own account.
    async fn get_storage(&mut self, key: &str) -> Result<Bytes, ExecutorError>;

    async fn set_storage(&mut self, key: &str, value: Bytes) -> Result<(), ExecutorError>;

    /// External call or create; suspends until the callee terminates.
    async fn call(&mut self, request: CallRequest) -> Result<CallResponse, ExecutorError>;

    fn log(&mut self, entry: LogEntry);

    fn block_number(&self) -> u64;

    fn block_hash(&self, number: u64) -> H256;

    fn logs(&self) -> &[LogEntry];
}

/// One opaque bytecode machine. Implementations live outside this
/// repository; tests ship scripted stand-ins.
#[async_trait]
pub trait Vm: Send + Sync {
    async fn execute(
        &self,
        host: &mut dyn HostContext,
        input: VmInput,
    ) -> Result<VmOutcome, ExecutorError>;
}
