use ethereum_types::H256;
use serde::{Deserialize, Serialize};

pub type BlockNumber = u64;

/// Which bytecode machine a block targets. Selects the address space
/// (20-byte hex vs. filesystem path) and the argument codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmKind {
    #[default]
    Native,
    Linear,
}

impl VmKind {
    pub fn is_linear(&self) -> bool {
        matches!(self, VmKind::Linear)
    }
}

/// The slice of a block header the execution pipeline needs. Header
/// construction itself is an external concern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeaderView {
    pub number: u64,
    pub hash: H256,
    pub timestamp: u64,
    pub version: u32,
}
