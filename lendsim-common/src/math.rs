//! Fixed-point helpers mirroring the lending protocol's on-chain libraries.
//!
//! All amounts are `U256` integers. Ratios are WAD scaled (`1e18`). Share conversions use the
//! protocol's virtual shares and virtual assets so that results match the contracts to the wei.

use alloy_primitives::U256;
use thiserror::Error;

/// `1e18`, the fixed-point unit for rates, fees and LLTVs.
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Virtual shares added to every market's total supply/borrow shares (`1e6`).
pub const VIRTUAL_SHARES: U256 = U256::from_limbs([1_000_000, 0, 0, 0]);

/// Virtual assets added to every market's total supply/borrow assets.
pub const VIRTUAL_ASSETS: U256 = U256::from_limbs([1, 0, 0, 0]);

/// Oracle prices are scaled by `1e36`.
pub const ORACLE_PRICE_SCALE: U256 =
    U256::from_limbs([0xb34b9f1000000000, 0x00c097ce7bc90715, 0, 0]);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MathError {
    #[error("Multiplication overflow: {0} * {1}")]
    Overflow(U256, U256),
    #[error("Division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingDirection {
    Up,
    Down,
}

/// Computes `x * y / d`, rounding in the given direction.
pub fn mul_div(x: U256, y: U256, d: U256, rounding: RoundingDirection) -> Result<U256, MathError> {
    if d.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let product = x
        .checked_mul(y)
        .ok_or(MathError::Overflow(x, y))?;
    match rounding {
        RoundingDirection::Down => Ok(product / d),
        RoundingDirection::Up => {
            let quotient = product / d;
            if (product % d).is_zero() {
                Ok(quotient)
            } else {
                Ok(quotient + U256::from(1))
            }
        }
    }
}

pub fn mul_div_down(x: U256, y: U256, d: U256) -> Result<U256, MathError> {
    mul_div(x, y, d, RoundingDirection::Down)
}

pub fn mul_div_up(x: U256, y: U256, d: U256) -> Result<U256, MathError> {
    mul_div(x, y, d, RoundingDirection::Up)
}

pub fn w_mul_down(x: U256, y: U256) -> Result<U256, MathError> {
    mul_div_down(x, y, WAD)
}

/// Returns `max(x - y, 0)`.
pub fn zero_floor_sub(x: U256, y: U256) -> U256 {
    x.saturating_sub(y)
}

/// Third order Taylor expansion of `e^(x * n) - 1`, used to continuously compound a per-second
/// rate `x` over `n` seconds.
pub fn w_taylor_compounded(x: U256, n: u64) -> Result<U256, MathError> {
    let n = U256::from(n);
    let first_term = x
        .checked_mul(n)
        .ok_or(MathError::Overflow(x, n))?;
    let second_term = mul_div_down(first_term, first_term, WAD * U256::from(2))?;
    let third_term = mul_div_down(second_term, first_term, WAD * U256::from(3))?;

    Ok(first_term + second_term + third_term)
}

pub fn to_shares(
    assets: U256,
    total_assets: U256,
    total_shares: U256,
    rounding: RoundingDirection,
) -> Result<U256, MathError> {
    mul_div(assets, total_shares + VIRTUAL_SHARES, total_assets + VIRTUAL_ASSETS, rounding)
}

pub fn to_assets(
    shares: U256,
    total_assets: U256,
    total_shares: U256,
    rounding: RoundingDirection,
) -> Result<U256, MathError> {
    mul_div(shares, total_assets + VIRTUAL_ASSETS, total_shares + VIRTUAL_SHARES, rounding)
}

/// Converts an unsigned integer amount to `f64`.
///
/// Precision is lost above 2^53, which is fine for the real-valued slippage math this feeds.
pub fn u256_to_f64(value: U256) -> f64 {
    value
        .as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64)
}

/// Converts an integer amount in base units to a real amount, dividing by `10^decimals`.
pub fn descale(value: U256, decimals: u8) -> f64 {
    u256_to_f64(value) / 10f64.powi(decimals as i32)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::exact(10, 4, 2, 20, 20)]
    #[case::remainder(10, 3, 4, 7, 8)]
    #[case::zero_numerator(0, 3, 4, 0, 0)]
    fn test_mul_div_rounding(
        #[case] x: u64,
        #[case] y: u64,
        #[case] d: u64,
        #[case] down: u64,
        #[case] up: u64,
    ) {
        let (x, y, d) = (U256::from(x), U256::from(y), U256::from(d));
        assert_eq!(mul_div_down(x, y, d).unwrap(), U256::from(down));
        assert_eq!(mul_div_up(x, y, d).unwrap(), U256::from(up));
    }

    #[test]
    fn test_mul_div_by_zero() {
        assert_eq!(
            mul_div_down(U256::from(1), U256::from(1), U256::ZERO),
            Err(MathError::DivisionByZero)
        );
    }

    #[test]
    fn test_mul_div_overflow() {
        let res = mul_div_down(U256::MAX, U256::from(2), U256::from(1));
        assert!(matches!(res, Err(MathError::Overflow(_, _))));
    }

    #[test]
    fn test_oracle_price_scale() {
        assert_eq!(ORACLE_PRICE_SCALE, U256::from(10).pow(U256::from(36)));
    }

    #[test]
    fn test_w_taylor_compounded() {
        assert_eq!(w_taylor_compounded(U256::ZERO, 1_000).unwrap(), U256::ZERO);

        // Too small for the higher order terms to register.
        let rate = U256::from(1_000_000_000u64);
        assert_eq!(w_taylor_compounded(rate, 1).unwrap(), rate);

        // x * n = 1 WAD: 1 + 1/2 + 1/6
        let compounded = w_taylor_compounded(WAD, 1).unwrap();
        let expected = WAD + WAD / U256::from(2) + WAD / U256::from(6);
        assert_eq!(compounded, expected);
    }

    #[test]
    fn test_share_conversion_on_empty_market() {
        let shares =
            to_shares(WAD, U256::ZERO, U256::ZERO, RoundingDirection::Down).unwrap();
        assert_eq!(shares, WAD * VIRTUAL_SHARES);

        let assets = to_assets(shares, WAD, shares, RoundingDirection::Down).unwrap();
        assert_eq!(assets, WAD);
    }

    #[test]
    fn test_share_conversion_rounding() {
        let total_assets = U256::from(1_000);
        let total_shares = U256::from(1_000_000_000u64);
        let down = to_assets(U256::from(1_500), total_assets, total_shares, RoundingDirection::Down)
            .unwrap();
        let up =
            to_assets(U256::from(1_500), total_assets, total_shares, RoundingDirection::Up)
                .unwrap();
        assert_eq!(down, U256::ZERO);
        assert_eq!(up, U256::from(1));
    }

    #[test]
    fn test_descale() {
        assert_eq!(descale(U256::from(1_500_000u64), 6), 1.5);
        assert_eq!(descale(U256::from(42u64), 0), 42.0);
        let big = U256::from(1u64) << 64;
        assert_eq!(u256_to_f64(big), 18_446_744_073_709_551_616.0);
    }
}
