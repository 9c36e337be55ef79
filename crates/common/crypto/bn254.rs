//! BN254 (alt_bn128) group operations behind the 0x06..0x08 precompiles.

use ark_bn254::{Bn254, Fq, Fr, G1Affine, G2Affine};
use ark_ec::{pairing::Pairing, AffineRepr, CurveGroup};
use ark_ff::{BigInteger, One, PrimeField, QuadExtField, Zero};

use crate::CryptoError;

fn parse_g1(bytes: &[u8]) -> Result<G1Affine, CryptoError> {
    if bytes.len() < 64 {
        return Err(CryptoError::InvalidInput("G1 point must be 64 bytes"));
    }
    let x = Fq::from_be_bytes_mod_order(&bytes[..32]);
    let y = Fq::from_be_bytes_mod_order(&bytes[32..64]);

    if x.is_zero() && y.is_zero() {
        return Ok(G1Affine::identity());
    }

    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() {
        return Err(CryptoError::InvalidPoint("G1 point not on curve"));
    }
    Ok(point)
}

fn serialize_g1(point: &G1Affine) -> [u8; 64] {
    let mut out = [0u8; 64];
    if point.is_zero() {
        return out;
    }
    out[..32].copy_from_slice(&point.x.into_bigint().to_bytes_be());
    out[32..].copy_from_slice(&point.y.into_bigint().to_bytes_be());
    out
}

/// G1 addition. Input: two 64-byte uncompressed points (big-endian x||y).
pub fn g1_add(p1: &[u8], p2: &[u8]) -> Result<[u8; 64], CryptoError> {
    let pt1 = parse_g1(p1)?;
    let pt2 = parse_g1(p2)?;
    let sum = (pt1 + pt2).into_affine();
    Ok(serialize_g1(&sum))
}

/// G1 scalar multiplication. Input: 64-byte point + 32-byte scalar.
pub fn g1_mul(point: &[u8], scalar: &[u8]) -> Result<[u8; 64], CryptoError> {
    if point.len() < 64 || scalar.len() < 32 {
        return Err(CryptoError::InvalidInput("invalid input length"));
    }

    let pt = parse_g1(point)?;
    let s = Fr::from_be_bytes_mod_order(&scalar[..32]);
    if pt.is_zero() || s.is_zero() {
        return Ok([0u8; 64]);
    }

    let result = (pt * s).into_affine();
    Ok(serialize_g1(&result))
}

/// Pairing check over (G1, G2) pairs. G2 is encoded as
/// (x_im, x_re, y_im, y_re), 32 bytes each, per the EVM convention.
pub fn pairing_check(pairs: &[(&[u8], &[u8])]) -> Result<bool, CryptoError> {
    let mut g1_points = Vec::with_capacity(pairs.len());
    let mut g2_points = Vec::with_capacity(pairs.len());

    for (g1_bytes, g2_bytes) in pairs {
        if g1_bytes.len() < 64 {
            return Err(CryptoError::InvalidInput("G1 must be 64 bytes"));
        }
        if g2_bytes.len() < 128 {
            return Err(CryptoError::InvalidInput("G2 must be 128 bytes"));
        }

        let g1 = parse_g1(g1_bytes)?;
        if !g1.is_zero() && !g1.is_in_correct_subgroup_assuming_on_curve() {
            return Err(CryptoError::InvalidPoint("G1 not in subgroup"));
        }
        g1_points.push(g1);

        let x_im = Fq::from_be_bytes_mod_order(&g2_bytes[..32]);
        let x_re = Fq::from_be_bytes_mod_order(&g2_bytes[32..64]);
        let y_im = Fq::from_be_bytes_mod_order(&g2_bytes[64..96]);
        let y_re = Fq::from_be_bytes_mod_order(&g2_bytes[96..128]);

        let g2 = if x_im.is_zero() && x_re.is_zero() && y_im.is_zero() && y_re.is_zero() {
            G2Affine::identity()
        } else {
            let p = G2Affine::new_unchecked(
                QuadExtField::new(x_re, x_im),
                QuadExtField::new(y_re, y_im),
            );
            if !p.is_on_curve() || !p.is_in_correct_subgroup_assuming_on_curve() {
                return Err(CryptoError::InvalidPoint("G2 not on BN254 curve"));
            }
            p
        };
        g2_points.push(g2);
    }

    Ok(Bn254::multi_pairing(g1_points, g2_points).0 == QuadExtField::one())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_additive_neutral() {
        // generator (1, 2) plus the point at infinity
        let mut generator = [0u8; 64];
        generator[31] = 1;
        generator[63] = 2;
        let zero = [0u8; 64];

        let sum = g1_add(&generator, &zero).expect("valid points");
        assert_eq!(sum, generator);
    }

    #[test]
    fn scalar_one_is_multiplicative_neutral() {
        let mut generator = [0u8; 64];
        generator[31] = 1;
        generator[63] = 2;
        let mut one = [0u8; 32];
        one[31] = 1;

        let product = g1_mul(&generator, &one).expect("valid input");
        assert_eq!(product, generator);
    }

    #[test]
    fn doubling_matches_addition() {
        let mut generator = [0u8; 64];
        generator[31] = 1;
        generator[63] = 2;
        let mut two = [0u8; 32];
        two[31] = 2;

        let doubled = g1_mul(&generator, &two).expect("valid input");
        let added = g1_add(&generator, &generator).expect("valid points");
        assert_eq!(doubled, added);
    }

    #[test]
    fn off_curve_point_rejected() {
        let mut bogus = [0u8; 64];
        bogus[31] = 1;
        bogus[63] = 3;
        assert!(matches!(
            g1_add(&bogus, &bogus),
            Err(CryptoError::InvalidPoint(_))
        ));
    }

    #[test]
    fn empty_pairing_is_one() {
        assert!(pairing_check(&[]).expect("empty input valid"));
    }
}
