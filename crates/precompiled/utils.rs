use std::collections::HashMap;
use std::sync::RwLock;

use lazy_static::lazy_static;
use tabrex_common::constants::{
    USER_TABLE_FIELD_VALUE_MAX_LENGTH, USER_TABLE_KEY_VALUE_MAX_LENGTH,
    USER_TABLE_NAME_MAX_LENGTH,
};
use tabrex_crypto::keccak256;

use crate::error::PrecompiledError;

lazy_static! {
    // process-wide selector cache: signatures are pure inputs, so a
    // global map is safe
    static ref SELECTOR_CACHE: RwLock<HashMap<String, u32>> = RwLock::new(HashMap::new());
}

/// First 4 bytes of keccak256 of the ASCII signature, big-endian.
pub fn func_selector(signature: &str) -> u32 {
    if let Ok(cache) = SELECTOR_CACHE.read() {
        if let Some(selector) = cache.get(signature) {
            return *selector;
        }
    }
    let digest = keccak256(signature.as_bytes());
    let selector = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    if let Ok(mut cache) = SELECTOR_CACHE.write() {
        cache.insert(signature.to_string(), selector);
    }
    selector
}

/// Splits a call payload into `(selector, argument bytes)`.
pub fn split_param(param: &[u8]) -> Result<(u32, &[u8]), PrecompiledError> {
    if param.len() < 4 {
        return Err(PrecompiledError::InvalidArgument(
            "call payload shorter than a selector".to_string(),
        ));
    }
    let selector = u32::from_be_bytes([param[0], param[1], param[2], param[3]]);
    Ok((selector, &param[4..]))
}

fn valid_name_char(c: char, extra: &[char]) -> bool {
    c.is_ascii_alphanumeric() || extra.contains(&c)
}

/// Table names are alphanumeric plus `$ _ @ /`; field names drop `/`
/// and must not start with `_`.
pub fn check_table_name(name: &str) -> Result<(), PrecompiledError> {
    if name.is_empty() || name.len() > USER_TABLE_NAME_MAX_LENGTH {
        return Err(PrecompiledError::InvalidArgument(format!(
            "invalid table name length: {name}"
        )));
    }
    if !name.chars().all(|c| valid_name_char(c, &['$', '_', '@', '/'])) {
        return Err(PrecompiledError::InvalidArgument(format!(
            "invalid table name: {name}"
        )));
    }
    Ok(())
}

pub fn check_field_name(name: &str) -> Result<(), PrecompiledError> {
    if name.is_empty() || name.starts_with('_') {
        return Err(PrecompiledError::InvalidArgument(format!(
            "invalid field name: {name}"
        )));
    }
    if !name.chars().all(|c| valid_name_char(c, &['$', '_', '@'])) {
        return Err(PrecompiledError::InvalidArgument(format!(
            "invalid field name: {name}"
        )));
    }
    Ok(())
}

/// Validates a full schema: name rules plus duplicate-field rejection.
pub fn check_create_table(
    table: &str,
    key_field: &str,
    value_fields: &[String],
) -> Result<(), PrecompiledError> {
    check_table_name(table)?;
    check_field_name(key_field)?;
    let mut seen = std::collections::HashSet::new();
    seen.insert(key_field);
    for field in value_fields {
        check_field_name(field)?;
        if !seen.insert(field.as_str()) {
            return Err(PrecompiledError::InvalidArgument(format!(
                "duplicated field: {field}"
            )));
        }
    }
    Ok(())
}

/// True when `value` fits the byte-length budget of a table key.
pub fn key_length_ok(value: &[u8]) -> bool {
    value.len() <= USER_TABLE_KEY_VALUE_MAX_LENGTH
}

/// True when `value` fits the byte-length budget of a field value.
pub fn field_length_ok(value: &[u8]) -> bool {
    value.len() <= USER_TABLE_FIELD_VALUE_MAX_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_keccak_prefix() {
        // keccak256("select(address)")[..4]
        let digest = keccak256(b"select(address)");
        let expected = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        assert_eq!(func_selector("select(address)"), expected);
        // cached second call returns the same value
        assert_eq!(func_selector("select(address)"), expected);
    }

    #[test]
    fn split_rejects_short_payloads() {
        assert!(split_param(&[1, 2, 3]).is_err());
        let (selector, rest) = split_param(&[0xde, 0xad, 0xbe, 0xef, 0x01]).expect("splits");
        assert_eq!(selector, 0xdeadbeef);
        assert_eq!(rest, &[0x01]);
    }

    #[test]
    fn table_name_rules() {
        assert!(check_table_name("t_test").is_ok());
        assert!(check_table_name("/apps/token").is_ok());
        assert!(check_table_name("bad name").is_err());
        assert!(check_table_name("").is_err());
    }

    #[test]
    fn field_name_rules() {
        assert!(check_field_name("item_id").is_ok());
        assert!(check_field_name("_hidden").is_err());
        assert!(check_field_name("with/slash").is_err());
    }

    #[test]
    fn duplicate_fields_rejected() {
        let fields = vec!["a".to_string(), "a".to_string()];
        assert!(check_create_table("t", "id", &fields).is_err());
    }
}
