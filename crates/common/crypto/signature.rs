use crate::{hash::keccak256, CryptoError};

/// Recover the keccak hash of the signer's public key from a 64-byte
/// compact signature, a recovery id and a 32-byte message hash. The
/// signer address is the last 20 bytes of the returned hash.
pub fn ecrecover(sig: &[u8; 64], recid: u8, msg: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let recovery_id = secp256k1::ecdsa::RecoveryId::from_i32(recid as i32)
        .map_err(|_| CryptoError::InvalidRecoveryId)?;

    let recoverable_sig = secp256k1::ecdsa::RecoverableSignature::from_compact(sig, recovery_id)
        .map_err(|_| CryptoError::InvalidSignature)?;

    let message = secp256k1::Message::from_digest(*msg);

    let public_key = secp256k1::SECP256K1
        .recover_ecdsa(&message, &recoverable_sig)
        .map_err(|_| CryptoError::RecoveryFailed)?;

    Ok(keccak256(&public_key.serialize_uncompressed()[1..]))
}
