//! Conversions between human-readable decimals and on-chain integer units.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;

/// `rust_decimal` supports at most 28 fractional digits.
const MAX_DECIMALS: u8 = 28;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("negative amount: {0}")]
    Negative(Decimal),

    #[error("token precision {0} exceeds the supported maximum")]
    Precision(u8),

    #[error("amount out of range")]
    Overflow,
}

fn ten_pow(decimals: u8) -> Result<Decimal, UnitError> {
    if decimals > MAX_DECIMALS {
        return Err(UnitError::Precision(decimals));
    }
    Ok(Decimal::from_i128_with_scale(10i128.pow(u32::from(decimals)), 0))
}

/// `1.5` at 6 decimals becomes `1_500_000`. Digits beyond the precision are truncated.
pub fn to_smallest_unit(amount: Decimal, decimals: u8) -> Result<U256, UnitError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(UnitError::Negative(amount));
    }
    let scaled = amount
        .checked_mul(ten_pow(decimals)?)
        .ok_or(UnitError::Overflow)?
        .trunc();
    let units = scaled.to_u128().ok_or(UnitError::Overflow)?;
    Ok(U256::from(units))
}

/// Inverse of [`to_smallest_unit`], normalised (no trailing zeros).
pub fn from_smallest_unit(value: U256, decimals: u8) -> Result<Decimal, UnitError> {
    if decimals > MAX_DECIMALS {
        return Err(UnitError::Precision(decimals));
    }
    let units = u128::try_from(value).map_err(|_| UnitError::Overflow)?;
    let mantissa = i128::try_from(units).map_err(|_| UnitError::Overflow)?;
    let decimal = Decimal::try_from_i128_with_scale(mantissa, u32::from(decimals))
        .map_err(|_| UnitError::Overflow)?;
    Ok(decimal.normalize())
}

/// Multiply an integer amount by a decimal factor, rounding down.
pub fn scale_by(value: U256, factor: Decimal) -> Result<U256, UnitError> {
    if factor.is_sign_negative() && !factor.is_zero() {
        return Err(UnitError::Negative(factor));
    }
    let scale = factor.scale();
    let numerator = U256::from(factor.mantissa().unsigned_abs());
    let denominator = U256::from(10u8).pow(U256::from(scale));
    value
        .checked_mul(numerator)
        .map(|product| product / denominator)
        .ok_or(UnitError::Overflow)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_to_smallest_unit() {
        assert_eq!(
            to_smallest_unit(dec("49.5"), 6).unwrap(),
            U256::from(49_500_000u64)
        );
        assert_eq!(
            to_smallest_unit(dec("1"), 18).unwrap(),
            U256::from(10u128.pow(18))
        );
        assert_eq!(
            to_smallest_unit(dec("0.1234567"), 6).unwrap(),
            U256::from(123_456u64)
        );
        assert_eq!(to_smallest_unit(Decimal::ZERO, 6).unwrap(), U256::ZERO);
        assert!(matches!(
            to_smallest_unit(dec("-1"), 6),
            Err(UnitError::Negative(_))
        ));
        assert!(matches!(
            to_smallest_unit(dec("1"), 30),
            Err(UnitError::Precision(30))
        ));
    }

    #[test]
    fn test_from_smallest_unit() {
        assert_eq!(
            from_smallest_unit(U256::from(49_500_000u64), 6).unwrap(),
            dec("49.5")
        );
        assert_eq!(
            from_smallest_unit(U256::from(10u128.pow(18)), 18).unwrap(),
            dec("1")
        );
        assert!(from_smallest_unit(U256::MAX, 6).is_err());
    }

    #[test]
    fn test_scale_by() {
        assert_eq!(
            scale_by(U256::from(100u64), dec("2")).unwrap(),
            U256::from(200u64)
        );
        assert_eq!(
            scale_by(U256::from(100u64), dec("1.15")).unwrap(),
            U256::from(115u64)
        );
        assert_eq!(
            scale_by(U256::from(3u64), dec("0.5")).unwrap(),
            U256::from(1u64)
        );
    }
}
