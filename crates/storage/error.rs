#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("table already exists: {0}")]
    TableExists(String),
    #[error("value of field {field} too long: {len} > {max}")]
    FieldTooLong {
        field: String,
        len: usize,
        max: usize,
    },
    #[error("backend io error: {0}")]
    BackendIo(String),
    #[error("key {table}:{key} is locked by another transaction")]
    KeyLockConflict { table: String, key: String },
    #[error("savepoint {0} already rolled back or never taken")]
    SavepointReplay(u64),
    #[error("prepare for block {0} missing before commit")]
    PrepareMissing(u64),
}
