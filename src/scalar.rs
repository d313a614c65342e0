use std::cmp::Ordering;

use curve25519_dalek::Scalar;
use num::BigUint;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiteralError {
    #[error("`{0}` is not a decimal field element")]
    NotDecimal(String),
    #[error("`{0}` is outside the scalar field")]
    OutOfRange(String),
}

pub fn from_i64(x: i64) -> Scalar {
    let x_abs = x.unsigned_abs();
    if x < 0 {
        -Scalar::from(x_abs)
    } else {
        Scalar::from(x_abs)
    }
}

/// Parses an unsigned decimal literal without reducing it modulo the field order.
pub fn parse_decimal(literal: &str) -> Result<Scalar, LiteralError> {
    let digits = literal.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LiteralError::NotDecimal(literal.to_string()));
    }
    let value = BigUint::parse_bytes(digits.as_bytes(), 10)
        .ok_or_else(|| LiteralError::NotDecimal(literal.to_string()))?;
    if value.bits() > 256 {
        return Err(LiteralError::OutOfRange(literal.to_string()));
    }
    let mut bytes = [0u8; 32];
    let le = value.to_bytes_le();
    bytes[..le.len()].copy_from_slice(&le);
    Option::from(Scalar::from_canonical_bytes(bytes))
        .ok_or_else(|| LiteralError::OutOfRange(literal.to_string()))
}

pub fn to_decimal(x: &Scalar) -> String {
    BigUint::from_bytes_le(x.as_bytes()).to_string()
}

pub fn bit(x: &Scalar, i: u32) -> bool {
    let byte = x.as_bytes()[(i / 8) as usize];
    (byte >> (i % 8)) & 1 == 1
}

pub fn pow2(k: u32) -> Scalar {
    let mut bytes = [0u8; 32];
    bytes[(k / 8) as usize] = 1 << (k % 8);
    Scalar::from_bytes_mod_order(bytes)
}

/// True when the canonical integer representative of `x` is below `2^bits`.
pub fn fits_bits(x: &Scalar, bits: u32) -> bool {
    (bits..256).all(|i| !bit(x, i))
}

/// The canonical representative as a `u64`, when it fits.
pub fn to_u64(x: &Scalar) -> Option<u64> {
    if !fits_bits(x, 64) {
        return None;
    }
    let mut le = [0u8; 8];
    le.copy_from_slice(&x.as_bytes()[..8]);
    Some(u64::from_le_bytes(le))
}

/// Orders two field elements by their canonical integer representatives.
pub fn cmp(a: &Scalar, b: &Scalar) -> Ordering {
    a.as_bytes().iter().rev().cmp(b.as_bytes().iter().rev())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_i64() {
        assert_eq!(from_i64(1234), Scalar::from(1234u32));
        assert_eq!(from_i64(-1234), -Scalar::from(1234u32));
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("0"), Ok(Scalar::ZERO));
        assert_eq!(parse_decimal(" 42 "), Ok(Scalar::from(42u32)));
        assert_eq!(
            parse_decimal("18446744073709551616"),
            Ok(Scalar::from(u64::MAX) + Scalar::ONE)
        );
    }

    #[test]
    fn test_parse_decimal_rejects_non_decimal() {
        assert!(matches!(parse_decimal(""), Err(LiteralError::NotDecimal(_))));
        assert!(matches!(parse_decimal("-1"), Err(LiteralError::NotDecimal(_))));
        assert!(matches!(parse_decimal("0x10"), Err(LiteralError::NotDecimal(_))));
        assert!(matches!(parse_decimal("1.5"), Err(LiteralError::NotDecimal(_))));
    }

    #[test]
    fn test_parse_decimal_rejects_field_overflow() {
        // l = 2^252 + 27742317777372353535851937790883648493
        let modulus =
            "7237005577332262213973186563042994240857116359379907606001950938285454250989";
        let below =
            "7237005577332262213973186563042994240857116359379907606001950938285454250988";
        assert!(matches!(
            parse_decimal(modulus),
            Err(LiteralError::OutOfRange(_))
        ));
        assert_eq!(parse_decimal(below), Ok(-Scalar::ONE));
        assert!(matches!(
            parse_decimal(&"9".repeat(90)),
            Err(LiteralError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_to_decimal() {
        assert_eq!(to_decimal(&Scalar::from(4u32)), "4");
        assert_eq!(to_decimal(&Scalar::ZERO), "0");
        assert_eq!(
            to_decimal(&-Scalar::ONE),
            "7237005577332262213973186563042994240857116359379907606001950938285454250988"
        );
    }

    #[test]
    fn test_bits() {
        let x = Scalar::from(0b1010u32);
        assert!(!bit(&x, 0));
        assert!(bit(&x, 1));
        assert!(bit(&x, 3));
        assert_eq!(pow2(0), Scalar::ONE);
        assert_eq!(pow2(10), Scalar::from(1024u32));
        assert!(fits_bits(&Scalar::from(255u32), 8));
        assert!(!fits_bits(&Scalar::from(256u32), 8));
        assert!(!fits_bits(&-Scalar::ONE, 64));
    }

    #[test]
    fn test_to_u64() {
        assert_eq!(to_u64(&Scalar::from(u64::MAX)), Some(u64::MAX));
        assert_eq!(to_u64(&(Scalar::from(u64::MAX) + Scalar::ONE)), None);
        assert_eq!(to_u64(&-Scalar::ONE), None);
    }

    #[test]
    fn test_cmp() {
        assert_eq!(cmp(&Scalar::from(300u32), &Scalar::from(20u32)), Ordering::Greater);
        assert_eq!(cmp(&Scalar::from(20u32), &Scalar::from(300u32)), Ordering::Less);
        assert_eq!(cmp(&Scalar::ONE, &Scalar::ONE), Ordering::Equal);
    }
}
