//! Field names, system table names and size limits shared across the stack.
//!
//! These values are part of the persisted layout and must be bit-exact
//! across nodes; do not change them without a state migration.

/// Key column used by single-value account rows.
pub const STORAGE_KEY: &str = "key";
/// Value column used by single-value account rows.
pub const STORAGE_VALUE: &str = "value";

pub const ACCOUNT_BALANCE: &str = "balance";
pub const ACCOUNT_CODE_HASH: &str = "codeHash";
pub const ACCOUNT_CODE: &str = "code";
pub const ACCOUNT_NONCE: &str = "nonce";
pub const ACCOUNT_ALIVE: &str = "alive";
pub const ACCOUNT_FROZEN: &str = "frozen";
pub const ACCOUNT_AUTHORITY: &str = "authority";

/// Fixed rows initialized for every account table, in creation order.
pub const ACCOUNT_FIELDS: [&str; 6] = [
    ACCOUNT_BALANCE,
    ACCOUNT_CODE_HASH,
    ACCOUNT_CODE,
    ACCOUNT_NONCE,
    ACCOUNT_ALIVE,
    ACCOUNT_FROZEN,
];

/// Root directory table.
pub const FS_ROOT: &str = "/";
/// Directory table holding user application paths.
pub const FS_APPS: &str = "/apps";
/// Directory table holding user tables.
pub const FS_USER_TABLE: &str = "/tables";

pub const FS_KEY_NAME: &str = "name";
pub const FS_FIELD_TYPE: &str = "type";
pub const FS_FIELD_ACCESS: &str = "access";
pub const FS_FIELD_OWNER: &str = "owner";
pub const FS_FIELD_GID: &str = "gid";
pub const FS_FIELD_EXTRA: &str = "extra";
pub const FS_TYPE_DIR: &str = "directory";

/// Ordered value-field layout of directory tables.
pub const FS_FIELDS: [&str; 5] = [
    FS_FIELD_TYPE,
    FS_FIELD_ACCESS,
    FS_FIELD_OWNER,
    FS_FIELD_GID,
    FS_FIELD_EXTRA,
];

/// Chain-parameter table.
pub const SYS_CONFIG: &str = "sys_config";
/// Catalog of user-created tables.
pub const SYS_TABLES: &str = "sys_tables";
pub const SYS_TABLE_KEY: &str = "table_name";
pub const SYS_TABLE_KEY_FIELD: &str = "key_field";
pub const SYS_TABLE_VALUE_FIELDS: &str = "value_fields";

/// Prefix of account tables in the 20-byte address space.
pub const CONTRACT_TABLE_PREFIX: &str = "c_";

pub const USER_TABLE_KEY_VALUE_MAX_LENGTH: usize = 255;
pub const USER_TABLE_FIELD_VALUE_MAX_LENGTH: usize = 16 * 1024 * 1024 - 1;
pub const USER_TABLE_NAME_MAX_LENGTH: usize = 50;

pub const FS_PATH_MAX_LENGTH: usize = 56;
pub const FS_PATH_MAX_DEPTH: usize = 6;

/// Transient precompiled ids are assigned from this counter upwards.
pub const TRANSIENT_ADDRESS_START: u64 = 0x10000;

/// Table name of an account in the native (20-byte address) space:
/// `c_<lowercase hex, no 0x>`.
pub fn contract_table_name(address: &ethereum_types::Address) -> String {
    format!("{}{}", CONTRACT_TABLE_PREFIX, hex::encode(address.as_bytes()))
}

/// Table name of an account in the path-addressed space.
pub fn path_table_name(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", FS_APPS, path)
    }
}
