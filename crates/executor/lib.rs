//! Transaction execution pipeline: per-block serial execution plus a
//! DAG-parallel mode keyed on declared conflict fields, with a
//! cross-transaction key-lock ledger and two-phase commit to the
//! durable backend.

pub mod conflict;
pub mod context;
pub mod error;
pub mod executive;
pub mod executor;
pub mod status;
pub mod vm;

pub use conflict::{ConflictCatalog, ConflictField, ConflictFieldKind, EnvKind};
pub use context::BlockContext;
pub use error::ExecutorError;
pub use executive::Executive;
pub use executor::TransactionExecutor;
pub use tabrex_storage::{KeyLockLedger, LockMode, LockPolicy, StorageWrapper};
pub use vm::{CallRequest, CallResponse, HostContext, Vm, VmInput, VmOutcome};
