use sha2::Digest as _;

/// Keccak-256 of `input`. The configured hash primitive for state
/// digests and function selectors.
pub fn keccak256(input: &[u8]) -> [u8; 32] {
    keccak_hash::keccak(input).0
}

pub fn sha256(input: &[u8]) -> [u8; 32] {
    sha2::Sha256::digest(input).into()
}

/// RIPEMD-160, right-aligned in 32 bytes as the precompile returns it.
pub fn ripemd160(input: &[u8]) -> [u8; 32] {
    let mut hasher = ripemd::Ripemd160::new();
    hasher.update(input);
    let result = hasher.finalize();

    let mut output = [0u8; 32];
    output[12..].copy_from_slice(&result);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn keccak256_empty() {
        assert_eq!(
            keccak256(b""),
            hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );
    }

    #[test]
    fn sha256_abc() {
        assert_eq!(
            sha256(b"abc"),
            hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn ripemd160_is_right_aligned() {
        let digest = ripemd160(b"abc");
        assert_eq!(digest[..12], [0u8; 12]);
        assert_eq!(
            digest[12..],
            hex!("8eb208f7e05d987a9b044a8e98c6b087f15a0bfc")
        );
    }
}
