//! Numeric frame statuses carried in [`tabrex_common::ExecutionMessage`]
//! and receipts.

pub const SUCCESS: i32 = 0;
pub const REVERTED: i32 = 1;
pub const OUT_OF_GAS: i32 = 2;
pub const NO_CODE: i32 = 3;
pub const PERMISSION_DENIED: i32 = 4;
pub const INTERNAL_ERROR: i32 = 5;
/// The frame could not take a key held by a parallel transaction; the
/// scheduler suspends and retries.
pub const WAIT_KEY: i32 = 6;
