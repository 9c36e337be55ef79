//! Declarative conflict fields and the dependency DAG they induce.
//!
//! A catalog entry, keyed by `(contract, selector)`, tells the executor
//! which parts of a call participate in the cross-transaction conflict
//! relation. Evaluating the fields against a concrete call yields a set
//! of conflict keys; two transactions conflict iff their key sets
//! intersect (or either declares `All`).

use std::collections::{HashMap, HashSet};

use tabrex_common::ExecutionMessage;
use tabrex_precompiled::{Codec, ParamType, Value};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKind {
    Caller,
    Origin,
    Now,
    BlockNumber,
    Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictFieldKind {
    /// Serialize against every other transaction.
    All,
    /// Scope the conflict to the whole contract.
    Len,
    /// An execution-environment value.
    Env(EnvKind),
    /// A decoded call argument, addressed by index.
    Var,
}

#[derive(Debug, Clone)]
pub struct ConflictField {
    pub kind: ConflictFieldKind,
    /// Argument index path for `Var`; the leading index selects the
    /// argument.
    pub path: Vec<usize>,
}

/// One registered parallelizable function.
#[derive(Debug, Clone)]
struct CatalogEntry {
    param_types: Vec<ParamType>,
    fields: Vec<ConflictField>,
}

/// Catalog keyed by `(contract, selector)`; transactions whose target
/// is not listed are scheduled serially (treated as `All`).
#[derive(Default)]
pub struct ConflictCatalog {
    entries: HashMap<(String, u32), CatalogEntry>,
}

/// Evaluated conflict keys of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictSet {
    /// Conflicts with every other transaction.
    All,
    Keys(HashSet<String>),
}

impl ConflictSet {
    pub fn conflicts_with(&self, other: &ConflictSet) -> bool {
        match (self, other) {
            (ConflictSet::All, _) | (_, ConflictSet::All) => true,
            (ConflictSet::Keys(a), ConflictSet::Keys(b)) => !a.is_disjoint(b),
        }
    }
}

impl ConflictCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        contract: impl Into<String>,
        selector: u32,
        param_types: Vec<ParamType>,
        fields: Vec<ConflictField>,
    ) {
        self.entries.insert(
            (contract.into(), selector),
            CatalogEntry {
                param_types,
                fields,
            },
        );
    }

    /// Evaluates the declared fields of `message` to concrete keys.
    /// Unknown `(contract, selector)` pairs and undecodable arguments
    /// fall back to `All`, which serializes the transaction.
    pub fn evaluate(&self, message: &ExecutionMessage, codec: &Codec) -> ConflictSet {
        if message.data.len() < 4 || message.create {
            return ConflictSet::All;
        }
        let selector = u32::from_be_bytes([
            message.data[0],
            message.data[1],
            message.data[2],
            message.data[3],
        ]);
        let Some(entry) = self.entries.get(&(message.to.clone(), selector)) else {
            debug!(to = %message.to, selector, "no conflict entry, serial fallback");
            return ConflictSet::All;
        };

        let args = match codec.decode(&message.data[4..], &entry.param_types) {
            Ok(args) => args,
            Err(_) => {
                debug!(to = %message.to, selector, "argument decode failed, serial fallback");
                return ConflictSet::All;
            }
        };

        let mut keys = HashSet::new();
        for field in &entry.fields {
            match field.kind {
                ConflictFieldKind::All => return ConflictSet::All,
                ConflictFieldKind::Len => {
                    keys.insert(format!("len:{}", message.to));
                }
                ConflictFieldKind::Env(env) => {
                    let key = match env {
                        EnvKind::Caller => format!("env:caller:{}", message.from),
                        EnvKind::Origin => format!("env:origin:{}", message.origin),
                        EnvKind::Now => "env:now".to_string(),
                        EnvKind::BlockNumber => "env:number".to_string(),
                        EnvKind::Address => format!("env:address:{}", message.to),
                    };
                    keys.insert(key);
                }
                ConflictFieldKind::Var => {
                    let Some(&index) = field.path.first() else {
                        return ConflictSet::All;
                    };
                    let Some(value) = args.get(index) else {
                        return ConflictSet::All;
                    };
                    keys.insert(format!("var:{}:{}", index_key(value), message.to));
                }
            }
        }
        ConflictSet::Keys(keys)
    }
}

fn index_key(value: &Value) -> String {
    match value {
        Value::Address(addr) => hex::encode(addr.as_bytes()),
        Value::Uint(v) | Value::Int(v) => v.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Bytes(b) | Value::FixedBytes(b) => hex::encode(b),
        Value::String(s) => s.clone(),
    }
}

/// Dependency edges over a batch: earlier transaction → later, iff the
/// two conflict.
pub fn build_dependency_edges(sets: &[ConflictSet]) -> Vec<Vec<usize>> {
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); sets.len()];
    for later in 1..sets.len() {
        for earlier in 0..later {
            if sets[earlier].conflicts_with(&sets[later]) {
                edges[earlier].push(later);
            }
        }
    }
    edges
}
