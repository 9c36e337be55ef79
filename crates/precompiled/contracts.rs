//! Built-in cryptographic contracts at the reserved native addresses
//! 0x01..0x09: ecRecover, sha256, ripemd160, identity, modexp, the
//! bn128 trio and the blake2 compression function.

use ethereum_types::{Address, U256};
use tabrex_crypto::{blake2f, bn254, keccak256, modexp, ripemd160, sha256, signature};

type ExecFn = fn(&[u8]) -> (bool, Vec<u8>);
type CostFn = fn(&[u8]) -> i64;

/// One fixed-address contract: an execute function returning
/// `(success, output)` and a gas-cost function over the input.
#[derive(Clone, Copy)]
pub struct PrecompiledContract {
    pub name: &'static str,
    exec: ExecFn,
    cost: CostFn,
}

impl PrecompiledContract {
    pub fn execute(&self, input: &[u8]) -> (bool, Vec<u8>) {
        (self.exec)(input)
    }

    pub fn cost(&self, input: &[u8]) -> i64 {
        (self.cost)(input)
    }
}

impl std::fmt::Debug for PrecompiledContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecompiledContract")
            .field("name", &self.name)
            .finish()
    }
}

fn address_of(low_byte: u8) -> Address {
    let mut raw = [0u8; 20];
    raw[19] = low_byte;
    Address::from(raw)
}

/// The reserved-address contract table consumed by the registry builder.
pub fn builtin_contracts() -> Vec<(Address, PrecompiledContract)> {
    vec![
        (
            address_of(0x01),
            PrecompiledContract {
                name: "ecrecover",
                exec: exec_ecrecover,
                cost: |_| 3000,
            },
        ),
        (
            address_of(0x02),
            PrecompiledContract {
                name: "sha256",
                exec: |input| (true, sha256(input).to_vec()),
                cost: |input| 60 + 12 * words(input.len()),
            },
        ),
        (
            address_of(0x03),
            PrecompiledContract {
                name: "ripemd160",
                exec: |input| (true, ripemd160(input).to_vec()),
                cost: |input| 600 + 120 * words(input.len()),
            },
        ),
        (
            address_of(0x04),
            PrecompiledContract {
                name: "identity",
                exec: |input| (true, input.to_vec()),
                cost: |input| 15 + 3 * words(input.len()),
            },
        ),
        (
            address_of(0x05),
            PrecompiledContract {
                name: "modexp",
                exec: exec_modexp,
                cost: cost_modexp,
            },
        ),
        (
            address_of(0x06),
            PrecompiledContract {
                name: "alt_bn128_G1_add",
                exec: exec_bn128_add,
                cost: |_| 150,
            },
        ),
        (
            address_of(0x07),
            PrecompiledContract {
                name: "alt_bn128_G1_mul",
                exec: exec_bn128_mul,
                cost: |_| 6000,
            },
        ),
        (
            address_of(0x08),
            PrecompiledContract {
                name: "alt_bn128_pairing_product",
                exec: exec_bn128_pairing,
                cost: |input| 45000 + 34000 * (input.len() / 192) as i64,
            },
        ),
        (
            address_of(0x09),
            PrecompiledContract {
                name: "blake2_compression",
                exec: exec_blake2,
                cost: |input| {
                    if input.len() < 4 {
                        return 0;
                    }
                    u32::from_be_bytes([input[0], input[1], input[2], input[3]]) as i64
                },
            },
        ),
    ]
}

fn words(len: usize) -> i64 {
    ((len + 31) / 32) as i64
}

/// Reads 32 bytes at `offset`, treating the input as infinitely
/// right-padded with zeros.
fn padded_word(input: &[u8], offset: usize) -> [u8; 32] {
    let mut word = [0u8; 32];
    if offset < input.len() {
        let available = (input.len() - offset).min(32);
        word[..available].copy_from_slice(&input[offset..offset + available]);
    }
    word
}

fn padded_slice(input: &[u8], offset: usize, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if offset < input.len() {
        let available = (input.len() - offset).min(len);
        out[..available].copy_from_slice(&input[offset..offset + available]);
    }
    out
}

// input: {msgHash(32), v(32), r(32), s(32)}; output: recovered address
// left-padded to 32 bytes. Malformed input yields empty output, not
// failure, per the original contract.
fn exec_ecrecover(input: &[u8]) -> (bool, Vec<u8>) {
    let msg: [u8; 32] = padded_word(input, 0);
    let v_word = padded_word(input, 32);
    if v_word[..31] != [0u8; 31] || !(27..=28).contains(&v_word[31]) {
        return (true, Vec::new());
    }
    let mut sig = [0u8; 64];
    sig[..32].copy_from_slice(&padded_word(input, 64));
    sig[32..].copy_from_slice(&padded_word(input, 96));

    match signature::ecrecover(&sig, v_word[31] - 27, &msg) {
        Ok(hash) => {
            let mut out = vec![0u8; 32];
            out[12..].copy_from_slice(&hash[12..]);
            (true, out)
        }
        Err(_) => (true, Vec::new()),
    }
}

// EIP-198 layout: (baseLen, expLen, modLen, base, exp, mod), all
// big-endian and right-padded.
fn exec_modexp(input: &[u8]) -> (bool, Vec<u8>) {
    let base_len = U256::from_big_endian(&padded_word(input, 0));
    let exp_len = U256::from_big_endian(&padded_word(input, 32));
    let mod_len = U256::from_big_endian(&padded_word(input, 64));

    if base_len.is_zero() && mod_len.is_zero() {
        return (true, Vec::new());
    }
    let limit = U256::from(u32::MAX);
    if base_len > limit || exp_len > limit || mod_len > limit {
        return (false, Vec::new());
    }
    let base_len = base_len.as_usize();
    let exp_len = exp_len.as_usize();
    let mod_len = mod_len.as_usize();

    let base = padded_slice(input, 96, base_len);
    let exp = padded_slice(input, 96 + base_len, exp_len);
    let modulus = padded_slice(input, 96 + base_len + exp_len, mod_len);

    (true, modexp::modexp(&base, &exp, &modulus))
}

fn cost_modexp(input: &[u8]) -> i64 {
    let base_len = U256::from_big_endian(&padded_word(input, 0));
    let exp_len = U256::from_big_endian(&padded_word(input, 32));
    let mod_len = U256::from_big_endian(&padded_word(input, 64));
    let limit = U256::from(u32::MAX);
    if base_len > limit || exp_len > limit || mod_len > limit {
        return i64::MAX;
    }

    let base_len = base_len.as_u64() as i64;
    let exp_len = exp_len.as_u64() as i64;
    let mod_len = mod_len.as_u64() as i64;

    let max_len = base_len.max(mod_len);
    let mult = mult_complexity(max_len);

    // adjusted exponent length: bit length of the leading exponent word
    let exp_head = U256::from_big_endian(&padded_word(input, 96 + base_len as usize));
    let head_bits = if exp_head.is_zero() {
        0
    } else {
        exp_head.bits() as i64 - 1
    };
    let adjusted = if exp_len <= 32 {
        head_bits
    } else {
        8 * (exp_len - 32) + head_bits
    };

    mult.saturating_mul(adjusted.max(1)) / 20
}

fn mult_complexity(x: i64) -> i64 {
    if x <= 64 {
        x * x
    } else if x <= 1024 {
        x * x / 4 + 96 * x - 3072
    } else {
        let x = x as i128;
        ((x * x / 16 + 480 * x - 199_680).min(i64::MAX as i128)) as i64
    }
}

// 128-byte input (right-padded): two G1 points; 64-byte output.
fn exec_bn128_add(input: &[u8]) -> (bool, Vec<u8>) {
    let p1 = padded_slice(input, 0, 64);
    let p2 = padded_slice(input, 64, 64);
    match bn254::g1_add(&p1, &p2) {
        Ok(out) => (true, out.to_vec()),
        Err(_) => (false, vec![0u8; 64]),
    }
}

// 96-byte input (right-padded): G1 point plus scalar; 64-byte output.
fn exec_bn128_mul(input: &[u8]) -> (bool, Vec<u8>) {
    let point = padded_slice(input, 0, 64);
    let scalar = padded_slice(input, 64, 32);
    match bn254::g1_mul(&point, &scalar) {
        Ok(out) => (true, out.to_vec()),
        Err(_) => (false, vec![0u8; 64]),
    }
}

// input: k pairs of (G1, G2), 192 bytes each; 32-byte 0/1 output.
fn exec_bn128_pairing(input: &[u8]) -> (bool, Vec<u8>) {
    const PAIR_SIZE: usize = 192;
    if input.len() % PAIR_SIZE != 0 {
        return (false, vec![0u8; 32]);
    }
    let pairs: Vec<(&[u8], &[u8])> = input
        .chunks_exact(PAIR_SIZE)
        .map(|chunk| (&chunk[..64], &chunk[64..]))
        .collect();
    match bn254::pairing_check(&pairs) {
        Ok(matched) => {
            let mut out = vec![0u8; 32];
            out[31] = u8::from(matched);
            (true, out)
        }
        Err(_) => (false, vec![0u8; 32]),
    }
}

// EIP-152: 213-byte input {rounds(4), h(64), m(128), t(16), f(1)};
// 64-byte output.
fn exec_blake2(input: &[u8]) -> (bool, Vec<u8>) {
    if input.len() != 213 {
        return (false, Vec::new());
    }
    let final_flag = input[212];
    if final_flag > 1 {
        return (false, Vec::new());
    }

    let rounds = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
    let mut h = [0u64; 8];
    for (i, chunk) in input[4..68].chunks_exact(8).enumerate() {
        h[i] = u64::from_le_bytes(chunk.try_into().unwrap_or_default());
    }
    let mut m = [0u64; 16];
    for (i, chunk) in input[68..196].chunks_exact(8).enumerate() {
        m[i] = u64::from_le_bytes(chunk.try_into().unwrap_or_default());
    }
    let t = [
        u64::from_le_bytes(input[196..204].try_into().unwrap_or_default()),
        u64::from_le_bytes(input[204..212].try_into().unwrap_or_default()),
    ];

    blake2f::blake2b_f(rounds, &mut h, &m, &t, final_flag == 1);

    let mut out = Vec::with_capacity(64);
    for word in h {
        out.extend_from_slice(&word.to_le_bytes());
    }
    (true, out)
}

/// Deterministic contract address for a native-space creation:
/// the leading 20 bytes of `keccak256(sender || nonce || salt?)`.
pub fn derive_contract_address(sender: &[u8], nonce: U256, salt: Option<U256>) -> Address {
    let mut preimage = Vec::with_capacity(sender.len() + 64);
    preimage.extend_from_slice(sender);
    preimage.extend_from_slice(&nonce.to_big_endian());
    if let Some(salt) = salt {
        preimage.extend_from_slice(&salt.to_big_endian());
    }
    Address::from_slice(&keccak256(&preimage)[..20])
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn contract(low_byte: u8) -> PrecompiledContract {
        builtin_contracts()
            .into_iter()
            .find(|(addr, _)| addr.as_bytes()[19] == low_byte)
            .map(|(_, c)| c)
            .expect("reserved address populated")
    }

    #[test]
    fn ecrecover_fixture() {
        let mut input = Vec::new();
        input.extend_from_slice(&hex!(
            "18c547e4f7b0f325ad1e56f57e26c745b09a3e503d86e00e5255ff7f715d3d1c"
        ));
        input.extend_from_slice(&{
            let mut v = [0u8; 32];
            v[31] = 28;
            v
        });
        input.extend_from_slice(&hex!(
            "73b1693892219d736caba55bdb67216e485557ea6b6af75f37096c9aa6a5a75f"
        ));
        input.extend_from_slice(&hex!(
            "eeb940b1d03b21e36b0e47e79769f095fe2ab855bd91e3a38756b7d75a9c4549"
        ));

        let (ok, output) = contract(0x01).execute(&input);
        assert!(ok);
        let mut expected = vec![0u8; 32];
        expected[12..].copy_from_slice(&hex!("ceaccac640adf55b2028469bd36ba501f28b699d"));
        assert_eq!(output, expected);
    }

    #[test]
    fn ecrecover_bad_v_returns_empty() {
        let mut input = vec![0u8; 128];
        input[63] = 26;
        let (ok, output) = contract(0x01).execute(&input);
        assert!(ok);
        assert!(output.is_empty());
    }

    #[test]
    fn identity_echoes_input() {
        let (ok, output) = contract(0x04).execute(b"echo");
        assert!(ok);
        assert_eq!(output, b"echo");
        assert_eq!(contract(0x04).cost(&[0u8; 64]), 15 + 6);
    }

    #[test]
    fn sha256_and_ripemd_wrap_crypto() {
        let (_, sha_out) = contract(0x02).execute(b"abc");
        assert_eq!(sha_out, sha256(b"abc").to_vec());

        let (_, ripemd_out) = contract(0x03).execute(b"abc");
        assert_eq!(ripemd_out[..12], [0u8; 12]);
    }

    #[test]
    fn modexp_eip198_layout() {
        // 3 ^ 0xffff mod 65537 with 1-byte base, 2-byte exp, 32-byte mod
        let mut input = Vec::new();
        input.extend_from_slice(&{
            let mut w = [0u8; 32];
            w[31] = 1;
            w
        });
        input.extend_from_slice(&{
            let mut w = [0u8; 32];
            w[31] = 2;
            w
        });
        input.extend_from_slice(&{
            let mut w = [0u8; 32];
            w[31] = 32;
            w
        });
        input.push(3);
        input.extend_from_slice(&[0xff, 0xff]);
        input.extend_from_slice(&{
            let mut w = [0u8; 32];
            w[29] = 1;
            w[31] = 1;
            w
        });

        let (ok, output) = contract(0x05).execute(&input);
        assert!(ok);
        assert_eq!(output.len(), 32);
        // independent check: 3^65535 mod 65537
        let expected = modexp::modexp(&[3], &[0xff, 0xff], &{
            let mut w = [0u8; 32];
            w[29] = 1;
            w[31] = 1;
            w
        });
        assert_eq!(output, expected);
    }

    #[test]
    fn modexp_zero_lengths_short_circuit() {
        let (ok, output) = contract(0x05).execute(&[0u8; 96]);
        assert!(ok);
        assert!(output.is_empty());
    }

    #[test]
    fn bn128_add_identity() {
        let mut input = vec![0u8; 128];
        input[31] = 1;
        input[63] = 2;
        let (ok, output) = contract(0x06).execute(&input);
        assert!(ok);
        assert_eq!(&output[..64], &input[..64]);
    }

    #[test]
    fn bn128_pairing_rejects_ragged_input() {
        let (ok, _) = contract(0x08).execute(&[0u8; 191]);
        assert!(!ok);
    }

    #[test]
    fn bn128_pairing_empty_input_is_one() {
        let (ok, output) = contract(0x08).execute(&[]);
        assert!(ok);
        assert_eq!(output[31], 1);
    }

    #[test]
    fn blake2_requires_exact_length() {
        let (ok, _) = contract(0x09).execute(&[0u8; 212]);
        assert!(!ok);
    }

    #[test]
    fn blake2_eip152_vector() {
        let mut input = Vec::with_capacity(213);
        input.extend_from_slice(&12u32.to_be_bytes());
        let h: [u64; 8] = [
            0x6a09e667f2bdc948,
            0xbb67ae8584caa73b,
            0x3c6ef372fe94f82b,
            0xa54ff53a5f1d36f1,
            0x510e527fade682d1,
            0x9b05688c2b3e6c1f,
            0x1f83d9abfb41bd6b,
            0x5be0cd19137e2179,
        ];
        for word in h {
            input.extend_from_slice(&word.to_le_bytes());
        }
        let mut m = [0u8; 128];
        m[..3].copy_from_slice(b"abc");
        input.extend_from_slice(&m);
        input.extend_from_slice(&3u64.to_le_bytes());
        input.extend_from_slice(&0u64.to_le_bytes());
        input.push(1);

        let (ok, output) = contract(0x09).execute(&input);
        assert!(ok);
        assert_eq!(
            output,
            hex!(
                "ba80a53f981c4d0d6a2797b69f12f6e94c212f14685ac4b74b12bb6fdbffa2d1"
                "7d87c5392aab792dc252d5de4533cc9518d38aa8dbf1925ab92386edd4009923"
            )
            .to_vec()
        );
        assert_eq!(contract(0x09).cost(&input), 12);
    }

    #[test]
    fn derived_addresses_differ_by_nonce() {
        let sender = hex!("1234567890123456789012345678901234567890");
        let a = derive_contract_address(&sender, U256::zero(), None);
        let b = derive_contract_address(&sender, U256::one(), None);
        assert_ne!(a, b);
    }
}
