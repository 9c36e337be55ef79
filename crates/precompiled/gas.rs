//! Gas accounting for precompiled calls: a fixed cost per interface
//! opcode plus a component proportional to the bytes read or written.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceOpcode {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Limit,
    GetInt,
    GetAddr,
    Set,
    GetBytes32,
    GetBytes64,
    GetString,
    CreateTable,
    OpenTable,
    Select,
    Insert,
    Update,
    Remove,
}

impl InterfaceOpcode {
    fn base_cost(self) -> i64 {
        match self {
            InterfaceOpcode::Eq
            | InterfaceOpcode::Ne
            | InterfaceOpcode::Gt
            | InterfaceOpcode::Ge
            | InterfaceOpcode::Lt
            | InterfaceOpcode::Le
            | InterfaceOpcode::Limit => 3,
            InterfaceOpcode::GetInt
            | InterfaceOpcode::GetAddr
            | InterfaceOpcode::Set
            | InterfaceOpcode::GetBytes32
            | InterfaceOpcode::GetBytes64
            | InterfaceOpcode::GetString => 32,
            InterfaceOpcode::OpenTable => 200,
            InterfaceOpcode::Select => 32,
            InterfaceOpcode::CreateTable | InterfaceOpcode::Insert | InterfaceOpcode::Update => {
                10000
            }
            InterfaceOpcode::Remove => 2500,
        }
    }
}

const GAS_PER_MEM_WORD: i64 = 3;

/// Accumulates the cost of one precompiled call.
#[derive(Debug, Default)]
pub struct GasPricer {
    operations: Vec<(InterfaceOpcode, u64)>,
    mem_used: u64,
}

impl GasPricer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mem_used(&mut self, bytes: usize) {
        self.mem_used = bytes as u64;
    }

    /// Grows the memory charge; never shrinks it.
    pub fn update_mem_used(&mut self, bytes: usize) {
        self.mem_used = self.mem_used.max(bytes as u64);
    }

    pub fn append_operation(&mut self, opcode: InterfaceOpcode, count: u64) {
        self.operations.push((opcode, count));
    }

    pub fn total_gas(&self) -> i64 {
        let op_gas: i64 = self
            .operations
            .iter()
            .map(|(op, count)| op.base_cost().saturating_mul(*count as i64))
            .sum();
        let mem_words = (self.mem_used as i64 + 31) / 32;
        op_gas.saturating_add(mem_words.saturating_mul(GAS_PER_MEM_WORD))
    }
}
