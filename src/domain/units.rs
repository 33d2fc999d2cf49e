//! Currency unit conversions.
//!
//! Ledger and member amounts are integers in the settlement currency's
//! smallest unit (USDC, 6 decimals). The exchange quotes notionals and
//! share quantities as decimals. Conversions here are exact and truncate
//! toward zero when leaving the decimal domain.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Decimal places of the settlement currency.
pub const USDC_DECIMALS: u32 = 6;

/// Convert a smallest-unit amount to an exchange notional.
pub fn to_notional(amount: u64) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(amount), USDC_DECIMALS)
}

/// Convert a notional back to smallest units, truncating sub-unit dust.
///
/// Returns `None` for negative or out-of-range values.
pub fn to_units(notional: Decimal) -> Option<u64> {
    if notional.is_sign_negative() {
        return None;
    }
    let scaled = notional.checked_mul(Decimal::from(10u64.pow(USDC_DECIMALS)))?;
    scaled.trunc().to_u64()
}

/// Parse a loosely formatted decimal string from an exchange response.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_notional_is_exact() {
        assert_eq!(to_notional(1_500_000), dec!(1.5));
        assert_eq!(to_notional(1), dec!(0.000001));
        assert_eq!(to_notional(0), Decimal::ZERO);
    }

    #[test]
    fn test_to_units_truncates_dust() {
        assert_eq!(to_units(dec!(1.5)), Some(1_500_000));
        assert_eq!(to_units(dec!(0.0000019)), Some(1));
        assert_eq!(to_units(dec!(-1)), None);
    }

    #[test]
    fn test_parse_decimal_variants() {
        assert_eq!(parse_decimal("12.50"), Some(dec!(12.50)));
        assert_eq!(parse_decimal(" 3 "), Some(dec!(3)));
        assert_eq!(parse_decimal("1e2"), Some(dec!(100)));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("abc"), None);
    }
}
