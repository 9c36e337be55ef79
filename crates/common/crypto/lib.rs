//! # tabrex-crypto
//!
//! Cryptographic primitives consumed by the execution pipeline as pure
//! functions: hashing, signature recovery, BN254 curve operations,
//! modular exponentiation and the BLAKE2b compression function.
//!
//! Nothing here suspends; callers treat every function as CPU-bound.

pub mod blake2f;
pub mod bn254;
pub mod hash;
pub mod modexp;
pub mod signature;

pub use hash::{keccak256, ripemd160, sha256};

/// Errors from crypto operations. Opaque — does not leak library-specific
/// types.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid recovery id")]
    InvalidRecoveryId,
    #[error("recovery failed")]
    RecoveryFailed,
    #[error("invalid point: {0}")]
    InvalidPoint(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}
