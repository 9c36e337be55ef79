use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use ethereum_types::{Address, U256};
use tabrex_common::{CallResult, Entry, TableSchema};

use crate::codec::{ParamType, Value};
use crate::error::{codes, PrecompiledError};
use crate::gas::{GasPricer, InterfaceOpcode};
use crate::registry::{Precompiled, PrecompiledContext};
use crate::utils::{field_length_ok, func_selector, split_param};

/// Transient wrapper around one [`Entry`], exposing typed getters and
/// setters to contract code. Fields are stored as strings: decimal for
/// integers, lowercase hex for addresses.
pub struct EntryPrecompiled {
    schema: TableSchema,
    entry: Mutex<Entry>,
}

impl EntryPrecompiled {
    /// A fresh entry with no fields bound yet; `insert` fills the gaps
    /// from the schema, `update` applies only the bound fields.
    pub fn empty(schema: TableSchema) -> Self {
        Self {
            schema,
            entry: Mutex::new(Entry::default()),
        }
    }

    pub fn wrapping(schema: TableSchema, entry: Entry) -> Self {
        Self {
            schema,
            entry: Mutex::new(entry),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn snapshot(&self) -> Entry {
        self.entry
            .lock()
            .map(|e| e.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn set_field(&self, name: &str, value: impl Into<Bytes>) {
        let mut entry = self
            .entry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entry.set_field(name.to_string(), value.into());
    }

    fn get_string(&self, field: &str) -> String {
        self.entry
            .lock()
            .map(|e| e.field_str(field).to_string())
            .unwrap_or_default()
    }
}

/// Two's-complement decode of a decimal string into a 256-bit word.
fn int_word(text: &str) -> U256 {
    match text.strip_prefix('-') {
        Some(magnitude) => {
            let value = U256::from_dec_str(magnitude).unwrap_or_default();
            (!value).overflowing_add(U256::one()).0
        }
        None => U256::from_dec_str(text).unwrap_or_default(),
    }
}

/// Two's-complement encode of a 256-bit word into a decimal string.
fn int_text(word: U256) -> String {
    let negative = word.bit(255);
    if negative {
        let magnitude = (!word).overflowing_add(U256::one()).0;
        format!("-{magnitude}")
    } else {
        word.to_string()
    }
}

#[async_trait]
impl Precompiled for EntryPrecompiled {
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

        let output = if selector == func_selector("getInt(string)") {
            let args = codec.decode(data, &[ParamType::String])?;
            let Value::String(field) = &args[0] else {
                return Err(PrecompiledError::InvalidArgument("field name".into()));
            };
            pricer.append_operation(InterfaceOpcode::GetInt, 1);
            codec.encode(&[Value::Int(int_word(&self.get_string(field)))])
        } else if selector == func_selector("getUInt(string)") {
            let args = codec.decode(data, &[ParamType::String])?;
            let Value::String(field) = &args[0] else {
                return Err(PrecompiledError::InvalidArgument("field name".into()));
            };
            pricer.append_operation(InterfaceOpcode::GetInt, 1);
            let value = U256::from_dec_str(&self.get_string(field)).unwrap_or_default();
            codec.encode(&[Value::Uint(value)])
        } else if selector == func_selector("getAddress(string)") {
            let args = codec.decode(data, &[ParamType::String])?;
            let Value::String(field) = &args[0] else {
                return Err(PrecompiledError::InvalidArgument("field name".into()));
            };
            pricer.append_operation(InterfaceOpcode::GetAddr, 1);
            let raw = self.get_string(field);
            let stripped = raw.strip_prefix("0x").unwrap_or(&raw);
            let address = stripped.parse::<Address>().unwrap_or_default();
            codec.encode(&[Value::Address(address)])
        } else if selector == func_selector("getBytes32(string)") {
            let args = codec.decode(data, &[ParamType::String])?;
            let Value::String(field) = &args[0] else {
                return Err(PrecompiledError::InvalidArgument("field name".into()));
            };
            pricer.append_operation(InterfaceOpcode::GetBytes32, 1);
            let raw = self.get_string(field).into_bytes();
            let mut word = [0u8; 32];
            let len = raw.len().min(32);
            word[..len].copy_from_slice(&raw[..len]);
            codec.encode(&[Value::FixedBytes(Bytes::copy_from_slice(&word))])
        } else if selector == func_selector("getBytes64(string)") {
            let args = codec.decode(data, &[ParamType::String])?;
            let Value::String(field) = &args[0] else {
                return Err(PrecompiledError::InvalidArgument("field name".into()));
            };
            pricer.append_operation(InterfaceOpcode::GetBytes64, 1);
            let raw = self.get_string(field).into_bytes();
            let mut words = [0u8; 64];
            let len = raw.len().min(64);
            words[..len].copy_from_slice(&raw[..len]);
            let mut out = codec.encode(&[Value::FixedBytes(Bytes::copy_from_slice(
                &words[..32],
            ))]);
            out.extend_from_slice(&codec.encode(&[Value::FixedBytes(
                Bytes::copy_from_slice(&words[32..]),
            )]));
            out
        } else if selector == func_selector("getString(string)") {
            let args = codec.decode(data, &[ParamType::String])?;
            let Value::String(field) = &args[0] else {
                return Err(PrecompiledError::InvalidArgument("field name".into()));
            };
            pricer.append_operation(InterfaceOpcode::GetString, 1);
            codec.encode(&[Value::String(self.get_string(field))])
        } else if selector == func_selector("set(string,int256)") {
            let args = codec.decode(data, &[ParamType::String, ParamType::Int])?;
            let (Value::String(field), Value::Int(word)) = (&args[0], &args[1]) else {
                return Err(PrecompiledError::InvalidArgument("set arguments".into()));
            };
            pricer.append_operation(InterfaceOpcode::Set, 1);
            self.set_field(field, int_text(*word).into_bytes());
            Vec::new()
        } else if selector == func_selector("set(string,uint256)") {
            let args = codec.decode(data, &[ParamType::String, ParamType::Uint])?;
            let (Value::String(field), Value::Uint(word)) = (&args[0], &args[1]) else {
                return Err(PrecompiledError::InvalidArgument("set arguments".into()));
            };
            pricer.append_operation(InterfaceOpcode::Set, 1);
            self.set_field(field, word.to_string().into_bytes());
            Vec::new()
        } else if selector == func_selector("set(string,address)") {
            let args = codec.decode(data, &[ParamType::String, ParamType::Address])?;
            let (Value::String(field), Value::Address(address)) = (&args[0], &args[1]) else {
                return Err(PrecompiledError::InvalidArgument("set arguments".into()));
            };
            pricer.append_operation(InterfaceOpcode::Set, 1);
            self.set_field(field, hex::encode(address.as_bytes()).into_bytes());
            Vec::new()
        } else if selector == func_selector("set(string,string)") {
            let args = codec.decode(data, &[ParamType::String, ParamType::String])?;
            let (Value::String(field), Value::String(value)) = (&args[0], &args[1]) else {
                return Err(PrecompiledError::InvalidArgument("set arguments".into()));
            };
            if !field_length_ok(value.as_bytes()) {
                let code = codes::TABLE_KEY_VALUE_LENGTH_OVERFLOW;
                return Ok(CallResult {
                    output: codec
                        .encode(&[Value::Int(int_word(&code.to_string()))])
                        .into(),
                    status: code,
                    gas_used: pricer.total_gas(),
                });
            }
            pricer.append_operation(InterfaceOpcode::Set, 1);
            self.set_field(field, value.clone().into_bytes());
            Vec::new()
        } else {
            return Err(PrecompiledError::UnknownFunction {
                target: "Entry".to_string(),
                selector,
            });
        };

        pricer.update_mem_used(output.len());
        Ok(CallResult::ok(output, pricer.total_gas()))
    }
}
