//! Argument codec for the uniform call contract.
//!
//! Native blocks use the contract ABI: 32-byte static slots with
//! offset-addressed tails for dynamic values. Linear blocks use a
//! deterministic length-prefixed stream: a big-endian `u32` length
//! followed by the raw payload per parameter (integers travel as
//! 32-byte big-endian words, booleans as one byte).

use bytes::Bytes;
use ethereum_types::{Address, U256};
use tabrex_common::VmKind;

use crate::error::PrecompiledError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Address(Address),
    Uint(U256),
    Int(U256),
    Bool(bool),
    Bytes(Bytes),
    FixedBytes(Bytes),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint,
    Int,
    Bool,
    Bytes,
    FixedBytes(usize),
    String,
}

#[derive(Debug, Clone, Copy)]
pub struct Codec {
    vm_kind: VmKind,
}

impl Codec {
    pub fn new(vm_kind: VmKind) -> Self {
        Self { vm_kind }
    }

    pub fn encode(&self, values: &[Value]) -> Vec<u8> {
        match self.vm_kind {
            VmKind::Native => encode_abi(values),
            VmKind::Linear => encode_stream(values),
        }
    }

    pub fn decode(&self, data: &[u8], types: &[ParamType]) -> Result<Vec<Value>, PrecompiledError> {
        match self.vm_kind {
            VmKind::Native => decode_abi(data, types),
            VmKind::Linear => decode_stream(data, types),
        }
    }

    /// Identity argument: an address word under the native ABI, a string
    /// under the linear stream. Returns the registry lookup key.
    pub fn decode_identity(&self, value: &Value) -> Result<String, PrecompiledError> {
        match (self.vm_kind, value) {
            (VmKind::Native, Value::Address(addr)) => Ok(hex::encode(addr.as_bytes())),
            (VmKind::Linear, Value::String(s)) => Ok(s.clone()),
            _ => Err(PrecompiledError::InvalidArgument(
                "expected an identity argument".to_string(),
            )),
        }
    }

    /// The parameter type carrying identities under this VM kind.
    pub fn identity_type(&self) -> ParamType {
        match self.vm_kind {
            VmKind::Native => ParamType::Address,
            VmKind::Linear => ParamType::String,
        }
    }

    /// Encodes a registry id for returning to the caller.
    pub fn encode_identity(&self, id: &str) -> Result<Vec<u8>, PrecompiledError> {
        match self.vm_kind {
            VmKind::Native => {
                let raw = hex::decode(id).map_err(|_| {
                    PrecompiledError::InvalidArgument(format!("bad identity {id}"))
                })?;
                if raw.len() != 20 {
                    return Err(PrecompiledError::InvalidArgument(format!(
                        "bad identity length {}",
                        raw.len()
                    )));
                }
                Ok(encode_abi(&[Value::Address(Address::from_slice(&raw))]))
            }
            VmKind::Linear => Ok(encode_stream(&[Value::String(id.to_string())])),
        }
    }
}

// ── Native ABI ─────────────────────────────────────────────────────────

fn is_dynamic(value: &Value) -> bool {
    matches!(value, Value::Bytes(_) | Value::String(_))
}

fn word_of(value: &Value) -> [u8; 32] {
    let mut word = [0u8; 32];
    match value {
        Value::Address(addr) => word[12..].copy_from_slice(addr.as_bytes()),
        Value::Uint(v) | Value::Int(v) => word = v.to_big_endian(),
        Value::Bool(b) => word[31] = u8::from(*b),
        Value::FixedBytes(bytes) => {
            let len = bytes.len().min(32);
            word[..len].copy_from_slice(&bytes[..len]);
        }
        Value::Bytes(_) | Value::String(_) => {}
    }
    word
}

fn encode_abi(values: &[Value]) -> Vec<u8> {
    let head_len = 32 * values.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for value in values {
        if is_dynamic(value) {
            let offset = U256::from(head_len + tail.len()).to_big_endian();
            head.extend_from_slice(&offset);

            let payload: &[u8] = match value {
                Value::Bytes(b) => b,
                Value::String(s) => s.as_bytes(),
                _ => unreachable!(),
            };
            let len_word = U256::from(payload.len()).to_big_endian();
            tail.extend_from_slice(&len_word);
            tail.extend_from_slice(payload);
            let padding = (32 - payload.len() % 32) % 32;
            tail.extend(std::iter::repeat(0u8).take(padding));
        } else {
            head.extend_from_slice(&word_of(value));
        }
    }

    head.extend_from_slice(&tail);
    head
}

fn read_word(data: &[u8], offset: usize) -> Result<[u8; 32], PrecompiledError> {
    let end = offset
        .checked_add(32)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| PrecompiledError::InvalidArgument("calldata truncated".to_string()))?;
    let mut word = [0u8; 32];
    word.copy_from_slice(&data[offset..end]);
    Ok(word)
}

fn decode_abi(data: &[u8], types: &[ParamType]) -> Result<Vec<Value>, PrecompiledError> {
    let mut values = Vec::with_capacity(types.len());
    for (i, ty) in types.iter().enumerate() {
        let word = read_word(data, 32 * i)?;
        let value = match ty {
            ParamType::Address => Value::Address(Address::from_slice(&word[12..])),
            ParamType::Uint => Value::Uint(U256::from_big_endian(&word)),
            ParamType::Int => Value::Int(U256::from_big_endian(&word)),
            ParamType::Bool => Value::Bool(word[31] != 0),
            ParamType::FixedBytes(len) => {
                Value::FixedBytes(Bytes::copy_from_slice(&word[..(*len).min(32)]))
            }
            ParamType::Bytes | ParamType::String => {
                let offset = to_usize(U256::from_big_endian(&word))?;
                let len_word = read_word(data, offset)?;
                let len = to_usize(U256::from_big_endian(&len_word))?;
                let start = offset + 32;
                let end = start.checked_add(len).filter(|&end| end <= data.len()).ok_or_else(
                    || PrecompiledError::InvalidArgument("calldata truncated".to_string()),
                )?;
                let payload = &data[start..end];
                match ty {
                    ParamType::Bytes => Value::Bytes(Bytes::copy_from_slice(payload)),
                    _ => Value::String(
                        String::from_utf8(payload.to_vec()).map_err(|_| {
                            PrecompiledError::InvalidArgument("non-utf8 string".to_string())
                        })?,
                    ),
                }
            }
        };
        values.push(value);
    }
    Ok(values)
}

// ── Linear stream ──────────────────────────────────────────────────────

fn encode_stream(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        let payload: Vec<u8> = match value {
            Value::Address(addr) => addr.as_bytes().to_vec(),
            Value::Uint(v) | Value::Int(v) => v.to_big_endian().to_vec(),
            Value::Bool(b) => vec![u8::from(*b)],
            Value::Bytes(b) | Value::FixedBytes(b) => b.to_vec(),
            Value::String(s) => s.as_bytes().to_vec(),
        };
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
    }
    out
}

fn decode_stream(data: &[u8], types: &[ParamType]) -> Result<Vec<Value>, PrecompiledError> {
    let mut values = Vec::with_capacity(types.len());
    let mut cursor = 0usize;
    for ty in types {
        let len_end = cursor
            .checked_add(4)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                PrecompiledError::InvalidArgument("parameter stream truncated".to_string())
            })?;
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[cursor..len_end]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        let end = len_end.checked_add(len).filter(|&end| end <= data.len()).ok_or_else(
            || PrecompiledError::InvalidArgument("parameter stream truncated".to_string()),
        )?;
        let payload = &data[len_end..end];
        cursor = end;

        let value = match ty {
            ParamType::Address => {
                if payload.len() != 20 {
                    return Err(PrecompiledError::InvalidArgument(
                        "address parameter must be 20 bytes".to_string(),
                    ));
                }
                Value::Address(Address::from_slice(payload))
            }
            ParamType::Uint => Value::Uint(u256_from_payload(payload)?),
            ParamType::Int => Value::Int(u256_from_payload(payload)?),
            ParamType::Bool => Value::Bool(payload.first().copied().unwrap_or(0) != 0),
            ParamType::Bytes => Value::Bytes(Bytes::copy_from_slice(payload)),
            ParamType::FixedBytes(_) => Value::FixedBytes(Bytes::copy_from_slice(payload)),
            ParamType::String => Value::String(String::from_utf8(payload.to_vec()).map_err(
                |_| PrecompiledError::InvalidArgument("non-utf8 string".to_string()),
            )?),
        };
        values.push(value);
    }
    Ok(values)
}

fn to_usize(value: U256) -> Result<usize, PrecompiledError> {
    if value > U256::from(u64::MAX) {
        return Err(PrecompiledError::InvalidArgument(
            "offset or length overflow".to_string(),
        ));
    }
    Ok(value.as_u64() as usize)
}

fn u256_from_payload(payload: &[u8]) -> Result<U256, PrecompiledError> {
    if payload.len() > 32 {
        return Err(PrecompiledError::InvalidArgument(
            "integer parameter wider than 32 bytes".to_string(),
        ));
    }
    Ok(U256::from_big_endian(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_static_round_trip() {
        let codec = Codec::new(VmKind::Native);
        let values = vec![
            Value::Address(Address::repeat_byte(0xaa)),
            Value::Uint(U256::from(902)),
            Value::Bool(true),
        ];
        let encoded = codec.encode(&values);
        assert_eq!(encoded.len(), 96);

        let decoded = codec
            .decode(
                &encoded,
                &[ParamType::Address, ParamType::Uint, ParamType::Bool],
            )
            .expect("decodes");
        assert_eq!(decoded, values);
    }

    #[test]
    fn abi_dynamic_round_trip() {
        let codec = Codec::new(VmKind::Native);
        let values = vec![
            Value::String("Hello, World!".to_string()),
            Value::Uint(U256::from(7)),
            Value::Bytes(Bytes::from_static(b"\x01\x02\x03")),
        ];
        let encoded = codec.encode(&values);
        let decoded = codec
            .decode(
                &encoded,
                &[ParamType::String, ParamType::Uint, ParamType::Bytes],
            )
            .expect("decodes");
        assert_eq!(decoded, values);
    }

    #[test]
    fn abi_string_layout_matches_reference() {
        // "abc" at offset 32: len word then right-padded payload
        let codec = Codec::new(VmKind::Native);
        let encoded = codec.encode(&[Value::String("abc".to_string())]);
        assert_eq!(encoded.len(), 96);
        assert_eq!(encoded[31], 32);
        assert_eq!(encoded[63], 3);
        assert_eq!(&encoded[64..67], b"abc");
        assert!(encoded[67..].iter().all(|&b| b == 0));
    }

    #[test]
    fn stream_round_trip() {
        let codec = Codec::new(VmKind::Linear);
        let values = vec![
            Value::String("alice".to_string()),
            Value::String("bob".to_string()),
            Value::Uint(U256::from(1000)),
        ];
        let encoded = codec.encode(&values);
        let decoded = codec
            .decode(
                &encoded,
                &[ParamType::String, ParamType::String, ParamType::Uint],
            )
            .expect("decodes");
        assert_eq!(decoded, values);
    }

    #[test]
    fn truncated_input_rejected() {
        let codec = Codec::new(VmKind::Native);
        assert!(codec.decode(&[0u8; 16], &[ParamType::Uint]).is_err());

        let codec = Codec::new(VmKind::Linear);
        assert!(codec.decode(&[0, 0, 0, 9, 1], &[ParamType::Bytes]).is_err());
    }

    #[test]
    fn identity_round_trip_native() {
        let codec = Codec::new(VmKind::Native);
        let id = "0000000000000000000000000000000000010001";
        let encoded = codec.encode_identity(id).expect("encodes");
        let decoded = codec
            .decode(&encoded, &[ParamType::Address])
            .expect("decodes");
        assert_eq!(codec.decode_identity(&decoded[0]).expect("identity"), id);
    }

    #[test]
    fn identity_round_trip_linear() {
        let codec = Codec::new(VmKind::Linear);
        let encoded = codec.encode_identity("65537").expect("encodes");
        let decoded = codec
            .decode(&encoded, &[ParamType::String])
            .expect("decodes");
        assert_eq!(
            codec.decode_identity(&decoded[0]).expect("identity"),
            "65537"
        );
    }
}
