use tabrex_state::StateError;
use tabrex_storage::StoreError;

/// Frame-terminating precompiled failures. CRUD-level rejections that
/// leave the frame running travel as numeric status codes in the call
/// output instead (see [`codes`]).
#[derive(Debug, thiserror::Error)]
pub enum PrecompiledError {
    #[error("unknown function selector {selector:#010x} on {target}")]
    UnknownFunction { target: String, selector: u32 },
    #[error("permission denied for {origin} on {target}")]
    PermissionDenied { origin: String, target: String },
    #[error("argument decode failed: {0}")]
    InvalidArgument(String),
    #[error("precompiled object {id} is not a {expected}")]
    ObjectKindMismatch { id: String, expected: &'static str },
    #[error("no precompiled registered at {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    PathInvalid(String),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("state error: {0}")]
    State(#[from] StateError),
}

/// Numeric status codes surfaced to contracts through call outputs.
pub mod codes {
    pub const SUCCESS: i32 = 0;
    pub const UNKNOWN_FUNCTION: i32 = -50100;
    pub const TABLE_EXISTS: i32 = -50101;
    pub const KEY_NOT_IN_ENTRY: i32 = -50102;
    pub const INSERT_KEY_EXISTS: i32 = -50103;
    pub const UPDATE_KEY_NOT_EXIST: i32 = -50104;
    pub const KEY_NOT_IN_COND: i32 = -50105;
    pub const PARSE_ENTRY: i32 = -50106;
    pub const PARSE_CONDITION: i32 = -50107;
    pub const CONDITION_OP_UNDEFINED: i32 = -50108;
    pub const TABLE_KEY_VALUE_LENGTH_OVERFLOW: i32 = -50109;
    pub const PERMISSION_DENIED: i32 = -50110;
}
