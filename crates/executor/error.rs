use tabrex_precompiled::PrecompiledError;
use tabrex_state::StateError;
use tabrex_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("out of gas")]
    OutOfGas,
    #[error("execution reverted: {0}")]
    Revert(String),
    #[error("write attempted inside a static call")]
    StaticViolation,
    #[error("no code at {0}")]
    NoCode(String),
    #[error("contract {0} is frozen")]
    ContractFrozen(String),
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("transaction {index} neither merged nor re-executed")]
    ConflictFieldEscape { index: usize },
    #[error("key lock cycle involving context {0}")]
    KeyLockCycle(u64),
    #[error("block {0} is not open")]
    BlockNotOpen(u64),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("precompiled error: {0}")]
    Precompiled(#[from] PrecompiledError),
}

impl ExecutorError {
    /// Numeric status surfaced in receipts and revert messages.
    pub fn status(&self) -> i32 {
        match self {
            ExecutorError::OutOfGas => crate::status::OUT_OF_GAS,
            ExecutorError::Revert(_) => crate::status::REVERTED,
            ExecutorError::StaticViolation => crate::status::REVERTED,
            ExecutorError::NoCode(_) => crate::status::NO_CODE,
            ExecutorError::ContractFrozen(_) => crate::status::PERMISSION_DENIED,
            ExecutorError::Precompiled(PrecompiledError::PermissionDenied { .. }) => {
                crate::status::PERMISSION_DENIED
            }
            _ => crate::status::INTERNAL_ERROR,
        }
    }
}
