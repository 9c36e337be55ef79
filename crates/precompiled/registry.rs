use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tabrex_common::constants::TRANSIENT_ADDRESS_START;
use tabrex_common::{CallResult, VmKind};
use tabrex_state::State;
use tabrex_storage::StorageWrapper;
use tracing::trace;

use crate::codec::Codec;
use crate::condition::ConditionPrecompiled;
use crate::contracts::PrecompiledContract;
use crate::entries::EntriesPrecompiled;
use crate::entry::EntryPrecompiled;
use crate::error::PrecompiledError;
use crate::table::TablePrecompiled;

/// What a precompiled call may touch: the block's storage layer (behind
/// the key-lock recording wrapper of the owning transaction), the
/// account facade and the registry itself (for transient objects).
pub struct PrecompiledContext {
    pub storage: Arc<StorageWrapper>,
    pub state: Arc<State>,
    pub registry: Arc<PrecompiledRegistry>,
    pub vm_kind: VmKind,
}

impl PrecompiledContext {
    pub fn codec(&self) -> Codec {
        Codec::new(self.vm_kind)
    }
}

/// Uniform call contract every service object implements.
#[async_trait]
pub trait Precompiled: Send + Sync {
    async fn call(
        &self,
        ctx: &PrecompiledContext,
        param: &[u8],
        origin: &str,
        sender: &str,
        gas_left: i64,
    ) -> Result<CallResult, PrecompiledError>;
}

/// Registry slot. The tag replaces the original's downcasts: CRUD code
/// matches on the variant it expects and a mismatch is a typed error.
#[derive(Clone)]
pub enum PrecompiledObject {
    Table(Arc<TablePrecompiled>),
    Entry(Arc<EntryPrecompiled>),
    Entries(Arc<EntriesPrecompiled>),
    Condition(Arc<ConditionPrecompiled>),
    UserDefined(Arc<dyn Precompiled>),
}

impl PrecompiledObject {
    pub fn as_precompiled(&self) -> &dyn Precompiled {
        match self {
            PrecompiledObject::Table(p) => p.as_ref(),
            PrecompiledObject::Entry(p) => p.as_ref(),
            PrecompiledObject::Entries(p) => p.as_ref(),
            PrecompiledObject::Condition(p) => p.as_ref(),
            PrecompiledObject::UserDefined(p) => p.as_ref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PrecompiledObject::Table(_) => "table",
            PrecompiledObject::Entry(_) => "entry",
            PrecompiledObject::Entries(_) => "entries",
            PrecompiledObject::Condition(_) => "condition",
            PrecompiledObject::UserDefined(_) => "user-defined",
        }
    }

    pub fn expect_entry(&self, id: &str) -> Result<&Arc<EntryPrecompiled>, PrecompiledError> {
        match self {
            PrecompiledObject::Entry(entry) => Ok(entry),
            _ => Err(PrecompiledError::ObjectKindMismatch {
                id: id.to_string(),
                expected: "entry",
            }),
        }
    }

    pub fn expect_condition(
        &self,
        id: &str,
    ) -> Result<&Arc<ConditionPrecompiled>, PrecompiledError> {
        match self {
            PrecompiledObject::Condition(condition) => Ok(condition),
            _ => Err(PrecompiledError::ObjectKindMismatch {
                id: id.to_string(),
                expected: "condition",
            }),
        }
    }

    pub fn expect_entries(
        &self,
        id: &str,
    ) -> Result<&Arc<EntriesPrecompiled>, PrecompiledError> {
        match self {
            PrecompiledObject::Entries(entries) => Ok(entries),
            _ => Err(PrecompiledError::ObjectKindMismatch {
                id: id.to_string(),
                expected: "entries",
            }),
        }
    }
}

/// Per-block map from identity strings to service objects.
///
/// Append-only within a block: a registered id is never reassigned for
/// the lifetime of the block context. Transient ids come from a counter
/// starting at 0x10000, formatted per VM kind (20-byte big-endian hex
/// for native, decimal ASCII for linear).
pub struct PrecompiledRegistry {
    vm_kind: VmKind,
    objects: RwLock<HashMap<String, PrecompiledObject>>,
    contracts: HashMap<String, PrecompiledContract>,
    next_id: AtomicU64,
}

impl PrecompiledRegistry {
    pub fn vm_kind(&self) -> VmKind {
        self.vm_kind
    }

    fn format_id(&self, counter: u64) -> String {
        match self.vm_kind {
            VmKind::Native => {
                let mut raw = [0u8; 20];
                raw[12..].copy_from_slice(&counter.to_be_bytes());
                hex::encode(raw)
            }
            VmKind::Linear => counter.to_string(),
        }
    }

    /// Registers a transient object under a fresh id.
    pub fn register(&self, object: PrecompiledObject) -> String {
        let counter = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = self.format_id(counter);
        trace!(%id, kind = object.kind(), "registered precompiled object");
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(id.clone(), object);
        }
        id
    }

    pub fn get(&self, id: &str) -> Option<PrecompiledObject> {
        self.objects.read().ok().and_then(|o| o.get(id).cloned())
    }

    pub fn require(&self, id: &str) -> Result<PrecompiledObject, PrecompiledError> {
        self.get(id)
            .ok_or_else(|| PrecompiledError::NotFound(id.to_string()))
    }

    pub fn is_precompiled(&self, id: &str) -> bool {
        self.objects
            .read()
            .map(|o| o.contains_key(id))
            .unwrap_or(false)
    }

    /// A built-in crypto contract at a reserved address, if any.
    pub fn builtin(&self, id: &str) -> Option<&PrecompiledContract> {
        self.contracts.get(id)
    }

    pub fn is_builtin(&self, id: &str) -> bool {
        self.contracts.contains_key(id)
    }
}

/// Explicit construction in place of process-start static registration:
/// the executor builds a registry per block context.
pub struct RegistryBuilder {
    vm_kind: VmKind,
    objects: HashMap<String, PrecompiledObject>,
    contracts: HashMap<String, PrecompiledContract>,
}

impl RegistryBuilder {
    pub fn new(vm_kind: VmKind) -> Self {
        Self {
            vm_kind,
            objects: HashMap::new(),
            contracts: HashMap::new(),
        }
    }

    /// Installs the crypto contracts at the reserved native addresses.
    pub fn with_builtin_contracts(mut self) -> Self {
        for (address, contract) in crate::contracts::builtin_contracts() {
            self.contracts
                .insert(hex::encode(address.as_bytes()), contract);
        }
        self
    }

    /// Registers a service object at a fixed identity.
    pub fn register_at(mut self, identity: impl Into<String>, object: PrecompiledObject) -> Self {
        self.objects.insert(identity.into(), object);
        self
    }

    pub fn build(self) -> Arc<PrecompiledRegistry> {
        Arc::new(PrecompiledRegistry {
            vm_kind: self.vm_kind,
            objects: RwLock::new(self.objects),
            contracts: self.contracts,
            next_id: AtomicU64::new(TRANSIENT_ADDRESS_START),
        })
    }
}
