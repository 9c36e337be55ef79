use num_bigint::BigUint;

/// Modular exponentiation over arbitrary-precision operands.
///
/// The output is left-padded with zeros to the modulus length, matching
/// the EIP-198 precompile contract. A zero modulus yields all zeros.
pub fn modexp(base: &[u8], exp: &[u8], modulus: &[u8]) -> Vec<u8> {
    let modulus_len = modulus.len();

    let base = BigUint::from_bytes_be(base);
    let exp = BigUint::from_bytes_be(exp);
    let modulus = BigUint::from_bytes_be(modulus);

    let result = if modulus.bits() == 0 {
        BigUint::default()
    } else {
        base.modpow(&exp, &modulus)
    };

    let res_bytes = result.to_bytes_be();
    let mut out = vec![0u8; modulus_len];
    if res_bytes.len() <= modulus_len {
        let offset = modulus_len - res_bytes.len();
        out[offset..].copy_from_slice(&res_bytes);
    }
    out
}
