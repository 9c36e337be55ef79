//! Table-oriented in-VM service layer.
//!
//! Precompiled objects are in-process services addressable by contract
//! bytecode through a uniform call contract: a 4-byte function selector
//! followed by arguments encoded per the block's VM kind. The registry
//! maps identities (20-byte hex addresses or paths) to service objects;
//! transient objects (entries, conditions, result sets) get fresh ids
//! from a per-block counter.

pub mod codec;
pub mod condition;
pub mod contracts;
pub mod entries;
pub mod entry;
pub mod error;
pub mod fs;
pub mod gas;
pub mod registry;
pub mod table;
pub mod utils;

pub use codec::{Codec, ParamType, Value};
pub use condition::ConditionPrecompiled;
pub use contracts::{builtin_contracts, PrecompiledContract};
pub use entries::EntriesPrecompiled;
pub use entry::EntryPrecompiled;
pub use error::{codes, PrecompiledError};
pub use gas::{GasPricer, InterfaceOpcode};
pub use registry::{
    Precompiled, PrecompiledContext, PrecompiledObject, PrecompiledRegistry, RegistryBuilder,
};
pub use table::TablePrecompiled;
pub use utils::func_selector;
