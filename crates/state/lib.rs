//! Account-level view over the layered table store.
//!
//! Presents balance, nonce, code and storage-slot operations on top of a
//! [`tabrex_storage::StateStorage`] using the fixed account schema: one
//! table per account (`c_<hex>` in the native address space,
//! `/apps/<path>` in the path space) with single-value rows keyed by
//! `balance`, `nonce`, `code`, `codeHash`, `alive` and `frozen`.

mod error;
mod state;

pub use error::StateError;
pub use state::{ContractStatus, State};
