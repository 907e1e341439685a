//! Per-swap slippage bounds for multi-leg position migrations.
//!
//! Migrating a leveraged position sells collateral, repays debt with the proceeds and may
//! convert what is left into the output asset. Every swap is quoted independently, so a single
//! portfolio-level tolerance `S_T` has to be turned into a per-swap tolerance `S` such that even
//! when every leg slips by the full `S`, the migrated value is no worse than applying `S_T` once
//! to the net portfolio value:
//!
//! ```text
//! maxF_L = F_LS·(1 + S) + L_D
//! minF_C = F_CS / (1 + S) + C_D
//! minO   = (minF_C − maxF_L) [/ (1 + S) with an output swap]
//! minO  ≥ (F_CS + C_D − F_LS − L_D) / (1 + S_T)
//! ```
//!
//! With `x = 1 + S` the constraint is a quadratic `a·x² − b·x − c ≤ 0` with `a ≥ 0` and
//! `c = F_CS > 0`, so the largest admissible `x` is its positive root. No search is involved.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::math::{descale, mul_div, RoundingDirection, WAD};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SlippageError {
    #[error("Overall slippage tolerance must be in (0, 1), got {0}")]
    InvalidTolerance(f64),
    #[error("Implied portfolio value must be positive")]
    NonPositivePortfolio,
    #[error("Slippage must be a finite, non-negative fraction, got {0}")]
    InvalidSlippage(f64),
}

/// Inputs of a 1- or 2-swap migration, amounts in base units of a common `decimals` scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlippageInputs {
    /// `S_T`, the overall tolerance as a fraction.
    pub overall_tolerance: f64,
    /// `C_D`, collateral added on top of the swapped collateral.
    pub collateral_delta: U256,
    /// `L_D`, debt added on top of the repaid debt.
    pub debt_delta: U256,
    /// `F_CS`, collateral sold in the first swap.
    pub collateral_flow: U256,
    /// `F_LS`, debt bought back in the repay swap.
    pub debt_flow: U256,
    pub decimals: u8,
    /// Whether a final swap converts the remainder into the output asset.
    pub performing_output_swap: bool,
}

/// The integer amounts of [`SlippageInputs`] as reals.
#[derive(Debug, Clone, Copy)]
struct RealAmounts {
    collateral_delta: f64,
    debt_delta: f64,
    collateral_flow: f64,
    debt_flow: f64,
}

impl RealAmounts {
    fn portfolio_value(&self) -> f64 {
        self.collateral_flow + self.collateral_delta - self.debt_flow - self.debt_delta
    }
}

impl SlippageInputs {
    fn real_amounts(&self) -> RealAmounts {
        RealAmounts {
            collateral_delta: descale(self.collateral_delta, self.decimals),
            debt_delta: descale(self.debt_delta, self.decimals),
            collateral_flow: descale(self.collateral_flow, self.decimals),
            debt_flow: descale(self.debt_flow, self.decimals),
        }
    }

    /// Checks `0 < S_T < 1` and `F_CS + C_D − F_LS − L_D > 0`.
    pub fn validate(&self) -> Result<(), SlippageError> {
        if !(self.overall_tolerance > 0.0 && self.overall_tolerance < 1.0) {
            return Err(SlippageError::InvalidTolerance(self.overall_tolerance));
        }
        let assets = self
            .collateral_flow
            .saturating_add(self.collateral_delta);
        let liabilities = self.debt_flow.saturating_add(self.debt_delta);
        if assets <= liabilities {
            return Err(SlippageError::NonPositivePortfolio);
        }
        Ok(())
    }

    /// Validates the inputs and returns the per-swap tolerance.
    pub fn per_swap_tolerance(&self) -> Result<Slippage, SlippageError> {
        self.validate()?;
        Slippage::new(compute_per_swap_max_slippage_tolerance(self))
    }
}

/// Largest per-swap tolerance `S` whose worst-case chain still yields the ideal output.
///
/// Only meaningful for inputs that pass [`SlippageInputs::validate`]; outside that domain the
/// result is unspecified. When the chain does not constrain `S` at all (no debt flow and the
/// deltas alone cover the ideal output) the overall tolerance is returned.
pub fn compute_per_swap_max_slippage_tolerance(inputs: &SlippageInputs) -> f64 {
    let amounts = inputs.real_amounts();
    let ideal = amounts.portfolio_value() / (1.0 + inputs.overall_tolerance);
    let net_delta = amounts.collateral_delta - amounts.debt_delta;

    let (a, b) = if inputs.performing_output_swap {
        (amounts.debt_flow + ideal, net_delta)
    } else {
        (amounts.debt_flow, net_delta - ideal)
    };

    match max_growth_factor(a, b, amounts.collateral_flow) {
        Some(factor) => (factor - 1.0).max(0.0),
        None => inputs.overall_tolerance,
    }
}

/// Positive root of `a·x² − b·x − c` for `a ≥ 0, c ≥ 0`, or `None` if every `x` satisfies
/// `a·x² − b·x − c ≤ 0`.
///
/// Uses the cancellation-free form of the root for `b < 0`, which also covers `a = 0`.
fn max_growth_factor(a: f64, b: f64, c: f64) -> Option<f64> {
    if b < 0.0 {
        let discriminant = b * b + 4.0 * a * c;
        Some(2.0 * c / (discriminant.sqrt() - b))
    } else if a > 0.0 {
        let discriminant = b * b + 4.0 * a * c;
        Some((b + discriminant.sqrt()) / (2.0 * a))
    } else {
        None
    }
}

/// Output of the migration if every swap slips by exactly `slippage`.
pub fn worst_case_output(inputs: &SlippageInputs, slippage: f64) -> f64 {
    let amounts = inputs.real_amounts();
    let factor = 1.0 + slippage;
    let max_debt = amounts.debt_flow * factor + amounts.debt_delta;
    let min_collateral = amounts.collateral_flow / factor + amounts.collateral_delta;
    let min_remaining = min_collateral - max_debt;
    if inputs.performing_output_swap {
        min_remaining / factor
    } else {
        min_remaining
    }
}

/// The output the overall tolerance promises: the net portfolio value slipped once by `S_T`.
pub fn ideal_output(inputs: &SlippageInputs) -> f64 {
    inputs.real_amounts().portfolio_value() / (1.0 + inputs.overall_tolerance)
}

/// A relative slippage tolerance, as a fraction of the quoted amount.
///
/// Converting to amounts goes through a WAD scaled tolerance rounded down, so the derived
/// limits are never looser than the fraction itself.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Slippage(f64);

impl Slippage {
    pub fn new(fraction: f64) -> Result<Self, SlippageError> {
        if fraction.is_finite() && fraction >= 0.0 {
            Ok(Self(fraction))
        } else {
            Err(SlippageError::InvalidSlippage(fraction))
        }
    }

    pub fn as_fraction(&self) -> f64 {
        self.0
    }

    fn wad(&self) -> U256 {
        U256::from((self.0 * 1e18).floor() as u128)
    }

    /// Minimum acceptable output for a quoted output amount: `quoted / (1 + S)`, rounded down.
    pub fn min_amount_out(&self, quoted: U256) -> U256 {
        let denominator = WAD + self.wad();
        mul_div(quoted, WAD, denominator, RoundingDirection::Down)
            .unwrap_or_else(|_| quoted / denominator * WAD)
    }

    /// Maximum acceptable input for a quoted input amount: `amount · (1 + S)`, rounded up.
    ///
    /// Saturates at `U256::MAX`.
    pub fn max_amount_in(&self, amount: U256) -> U256 {
        mul_div(amount, WAD + self.wad(), WAD, RoundingDirection::Up).unwrap_or(U256::MAX)
    }
}
