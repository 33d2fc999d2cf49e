//! P-256 Point Decompression
//!
//! Recovers the affine `(x, y)` of a SEC1-compressed NIST P-256 key.
//! p ≡ 3 (mod 4), so a square root of `rhs` is `rhs^((p+1)/4)`.

use num_bigint::BigUint;

use crate::error::SigningError;

/// Field prime p = 2^256 − 2^224 + 2^192 + 2^96 − 1.
const P: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

/// Curve constant b.
const B: [u8; 32] = [
    0x5a, 0xc6, 0x35, 0xd8, 0xaa, 0x3a, 0x93, 0xe7, 0xb3, 0xeb, 0xbd, 0x55, 0x76, 0x98, 0x86, 0xbc,
    0x65, 0x1d, 0x06, 0xb0, 0xcc, 0x53, 0xb0, 0xf6, 0x3b, 0xce, 0x3c, 0x3e, 0x27, 0xd2, 0x60, 0x4b,
];

/// Decompress a 33-byte compressed public key given as hex.
///
/// # Errors
/// [`SigningError::InvalidKey`] when the input is not 33 bytes with a
/// 0x02/0x03 prefix, `x` is not a field element, or no point exists.
pub fn decompress_public_key(compressed_hex: &str) -> Result<([u8; 32], [u8; 32]), SigningError> {
    let trimmed = compressed_hex.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits).map_err(|e| SigningError::InvalidKey(format!("not hex: {e}")))?;

    if bytes.len() != 33 {
        return Err(SigningError::InvalidKey(format!("expected 33 bytes, got {}", bytes.len())));
    }
    let want_odd = match bytes[0] {
        0x02 => false,
        0x03 => true,
        other => return Err(SigningError::InvalidKey(format!("bad prefix 0x{other:02x}"))),
    };

    let p = BigUint::from_bytes_be(&P);
    let b = BigUint::from_bytes_be(&B);
    let x = BigUint::from_bytes_be(&bytes[1..]);
    if x >= p {
        return Err(SigningError::InvalidKey("x not below field prime".into()));
    }

    // a = p − 3
    let a = &p - BigUint::from(3u8);
    let rhs = (x.modpow(&BigUint::from(3u8), &p) + (&a * &x) % &p + &b) % &p;
    let exp = (&p + BigUint::from(1u8)) >> 2;
    let mut y = rhs.modpow(&exp, &p);

    if (&y * &y) % &p != rhs {
        return Err(SigningError::InvalidKey("point not on curve".into()));
    }
    if y.bit(0) != want_odd {
        y = (&p - &y) % &p;
    }

    Ok((to_32(&x), to_32(&y)))
}

/// SEC1 uncompressed encoding `0x04 ‖ x ‖ y`.
pub fn uncompressed(x: &[u8; 32], y: &[u8; 32]) -> [u8; 65] {
    let mut out = [0u8; 65];
    out[0] = 0x04;
    out[1..33].copy_from_slice(x);
    out[33..].copy_from_slice(y);
    out
}

/// Big-endian, left-padded to 32 bytes. Inputs are already reduced mod p.
fn to_32(n: &BigUint) -> [u8; 32] {
    let raw = n.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - raw.len()..].copy_from_slice(&raw);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;

    const GX: &str = "6b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296";
    const GY: &str = "4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5";
    const NEG_GY: &str = "b01cbd1c01e58065711814b583f061e9d431cca994cea1313449bf97c840ae0a";

    #[test]
    fn test_generator_odd_prefix() {
        let (x, y) = decompress_public_key(&format!("03{GX}")).unwrap();
        assert_eq!(hex::encode(x), GX);
        assert_eq!(hex::encode(y), GY);
    }

    #[test]
    fn test_negated_generator_even_prefix() {
        let (x, y) = decompress_public_key(&format!("0x02{GX}")).unwrap();
        assert_eq!(hex::encode(x), GX);
        assert_eq!(hex::encode(y), NEG_GY);
    }

    #[test]
    fn test_double_generator() {
        let x2 = "7cf27b188d034f7e8a52380304b51ac3c08969e277f21b35a60b48fc47669978";
        let (_, y) = decompress_public_key(&format!("03{x2}")).unwrap();
        assert_eq!(
            hex::encode(y),
            "07775510db8ed040293d9ac69f7430dbba7dade63ce982299e04b79d227873d1"
        );
    }

    #[test]
    fn test_matches_reference_encoding() {
        for scalar in [7u8, 42, 200] {
            let mut secret = [0u8; 32];
            secret[31] = scalar;
            let key = SigningKey::from_slice(&secret).unwrap();
            let vk = key.verifying_key();
            let compressed = hex::encode(vk.to_encoded_point(true).as_bytes());
            let full = vk.to_encoded_point(false);

            let (x, y) = decompress_public_key(&compressed).unwrap();
            assert_eq!(uncompressed(&x, &y).as_slice(), full.as_bytes());
        }
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(matches!(
            decompress_public_key(&format!("04{GX}")),
            Err(SigningError::InvalidKey(_))
        ));
        assert!(decompress_public_key(GX).is_err());
        assert!(decompress_public_key("zz").is_err());
        // x = 1 has no square root on P-256.
        assert!(decompress_public_key(&format!("02{:0>64}", "1")).is_err());
        assert!(decompress_public_key(&format!("02{}", "ff".repeat(32))).is_err());
    }
}
