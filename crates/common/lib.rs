// Keep H256, H160, Address from ethereum_types
pub use ethereum_types::{Address, H160, H256, U256};

pub mod condition;
pub mod config;
pub mod constants;
pub mod entry;
pub mod message;
pub mod types;

pub use bytes::Bytes;

pub use condition::{Comparator, CompareTriple, Condition, KeyCondition};
pub use config::ExecutorConfig;
pub use entry::{Entry, EntryStatus, TableSchema};
pub use message::{CallResult, ExecutionMessage, LogEntry, MessageType, Receipt};
pub use types::{BlockHeaderView, BlockNumber, VmKind};
