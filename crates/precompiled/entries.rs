use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethereum_types::U256;
use tabrex_common::{CallResult, Entry, TableSchema};

use crate::codec::{ParamType, Value};
use crate::entry::EntryPrecompiled;
use crate::error::PrecompiledError;
use crate::gas::{GasPricer, InterfaceOpcode};
use crate::registry::{Precompiled, PrecompiledContext, PrecompiledObject};
use crate::utils::{func_selector, split_param};

/// Transient result set returned by `select`: an ordered list of rows
/// addressable by index from contract code.
pub struct EntriesPrecompiled {
    schema: TableSchema,
    entries: Mutex<Vec<Entry>>,
}

impl EntriesPrecompiled {
    pub fn new(schema: TableSchema, entries: Vec<Entry>) -> Self {
        Self {
            schema,
            entries: Mutex::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Entry> {
        self.entries
            .lock()
            .map(|e| e.get(index).cloned())
            .unwrap_or_else(|poisoned| poisoned.into_inner().get(index).cloned())
    }
}

#[async_trait]
impl Precompiled for EntriesPrecompiled {
    async fn call(
        &self,
        ctx: &PrecompiledContext,
        param: &[u8],
        _origin: &str,
        _sender: &str,
        _gas_left: i64,
    ) -> Result<CallResult, PrecompiledError> {
        let (selector, data) = split_param(param)?;
        let codec = ctx.codec();
        let mut pricer = GasPricer::new();
        pricer.set_mem_used(param.len());

        let output = if selector == func_selector("get(int256)") {
            let args = codec.decode(data, &[ParamType::Int])?;
            let Value::Int(index) = &args[0] else {
                return Err(PrecompiledError::InvalidArgument("index".into()));
            };
            let index = usize::try_from(index.low_u64()).unwrap_or(usize::MAX);
            let entry = self.get(index).ok_or_else(|| {
                PrecompiledError::InvalidArgument(format!("entries index {index} out of range"))
            })?;
            pricer.append_operation(InterfaceOpcode::GetInt, 1);
            let id = ctx
                .registry
                .register(PrecompiledObject::Entry(Arc::new(
                    EntryPrecompiled::wrapping(self.schema.clone(), entry),
                )));
            codec.encode_identity(&id)?
        } else if selector == func_selector("size()") {
            pricer.append_operation(InterfaceOpcode::GetInt, 1);
            codec.encode(&[Value::Uint(U256::from(self.len()))])
        } else {
            return Err(PrecompiledError::UnknownFunction {
                target: "Entries".to_string(),
                selector,
            });
        };

        pricer.update_mem_used(output.len());
        Ok(CallResult::ok(output, pricer.total_gas()))
    }
}
