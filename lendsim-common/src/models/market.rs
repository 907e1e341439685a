use alloy_primitives::{keccak256, Address, U256};
use serde::{Deserialize, Serialize};

use crate::{
    math::{
        mul_div_down, to_assets, to_shares, w_mul_down, w_taylor_compounded, zero_floor_sub,
        MathError, RoundingDirection, ORACLE_PRICE_SCALE, WAD,
    },
    models::MarketId,
};

/// The immutable parameters a market was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketParams {
    pub loan_token: Address,
    pub collateral_token: Address,
    pub oracle: Address,
    pub irm: Address,
    /// Liquidation loan-to-value, WAD scaled.
    pub lltv: U256,
}

impl MarketParams {
    /// The market id, `keccak256(abi.encode(params))`.
    pub fn id(&self) -> MarketId {
        let mut encoded = [0u8; 160];
        encoded[12..32].copy_from_slice(self.loan_token.as_slice());
        encoded[44..64].copy_from_slice(self.collateral_token.as_slice());
        encoded[76..96].copy_from_slice(self.oracle.as_slice());
        encoded[108..128].copy_from_slice(self.irm.as_slice());
        encoded[128..160].copy_from_slice(&self.lltv.to_be_bytes::<32>());
        keccak256(encoded)
    }
}

/// State of a lending market.
///
/// As read from chain the totals are "as of `last_update`". Call [`Market::accrue_interest`]
/// to bring them to a later timestamp before simulating against them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub params: MarketParams,
    pub total_supply_assets: U256,
    pub total_supply_shares: U256,
    pub total_borrow_assets: U256,
    pub total_borrow_shares: U256,
    pub last_update: u64,
    /// Protocol fee on accrued interest, WAD scaled.
    pub fee: U256,
    /// Per-second borrow rate reported by the market's IRM, WAD scaled.
    pub borrow_rate: U256,
    /// Collateral price quoted by the oracle, scaled by `1e36`. `None` if the oracle reverted.
    pub price: Option<U256>,
}

impl Market {
    /// Returns a copy of the market with interest accrued up to `timestamp`.
    ///
    /// Borrow interest is compounded with the per-second `borrow_rate` and added to both the
    /// supply and borrow totals; the protocol fee is minted as supply shares. A `timestamp`
    /// at or before `last_update` leaves the market untouched.
    pub fn accrue_interest(&self, timestamp: u64) -> Result<Market, MathError> {
        let mut accrued = self.clone();
        if timestamp <= self.last_update {
            return Ok(accrued);
        }
        let elapsed = timestamp - self.last_update;

        let interest = w_mul_down(
            self.total_borrow_assets,
            w_taylor_compounded(self.borrow_rate, elapsed)?,
        )?;
        accrued.total_borrow_assets += interest;
        accrued.total_supply_assets += interest;

        if !self.fee.is_zero() {
            let fee_amount = w_mul_down(interest, self.fee)?;
            let fee_shares = to_shares(
                fee_amount,
                accrued.total_supply_assets - fee_amount,
                accrued.total_supply_shares,
                RoundingDirection::Down,
            )?;
            accrued.total_supply_shares += fee_shares;
        }

        accrued.last_update = timestamp;
        Ok(accrued)
    }

    pub fn to_supply_assets(
        &self,
        shares: U256,
        rounding: RoundingDirection,
    ) -> Result<U256, MathError> {
        to_assets(shares, self.total_supply_assets, self.total_supply_shares, rounding)
    }

    pub fn to_supply_shares(
        &self,
        assets: U256,
        rounding: RoundingDirection,
    ) -> Result<U256, MathError> {
        to_shares(assets, self.total_supply_assets, self.total_supply_shares, rounding)
    }

    pub fn to_borrow_assets(
        &self,
        shares: U256,
        rounding: RoundingDirection,
    ) -> Result<U256, MathError> {
        to_assets(shares, self.total_borrow_assets, self.total_borrow_shares, rounding)
    }

    pub fn to_borrow_shares(
        &self,
        assets: U256,
        rounding: RoundingDirection,
    ) -> Result<U256, MathError> {
        to_shares(assets, self.total_borrow_assets, self.total_borrow_shares, rounding)
    }

    /// Borrowed share of supplied assets, WAD scaled. Zero for an empty market.
    pub fn utilization(&self) -> Result<U256, MathError> {
        if self.total_supply_assets.is_zero() {
            return Ok(U256::ZERO);
        }
        mul_div_down(self.total_borrow_assets, WAD, self.total_supply_assets)
    }

    /// Assets available to borrow or withdraw.
    pub fn liquidity(&self) -> U256 {
        zero_floor_sub(self.total_supply_assets, self.total_borrow_assets)
    }

    /// Value of `collateral` in loan assets, or `None` without an oracle price.
    pub fn collateral_value(&self, collateral: U256) -> Result<Option<U256>, MathError> {
        self.price
            .map(|price| mul_div_down(collateral, price, ORACLE_PRICE_SCALE))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy_primitives::{address, B256};

    use super::*;
    use crate::test_fixtures::market;

    #[test]
    fn test_market_id_matches_onchain_id() {
        // wstETH/WETH 94.5% market on Ethereum mainnet.
        let params = MarketParams {
            loan_token: address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
            collateral_token: address!("7f39c581f595b53c5cb19bd0b3f8da6c935e2ca0"),
            oracle: address!("bd60a6770b27e084e8617335dde769241b0e71d8"),
            irm: address!("870ac11d48b15db9a138cf899d20f13f79ba00bc"),
            lltv: U256::from(945_000_000_000_000_000u64),
        };
        let expected =
            B256::from_str("0xd0e50cdac92fe2172043f5e0c36532c6369d24947e40968f34a5e8819ca9ec5d")
                .unwrap();
        assert_eq!(params.id(), expected);
    }

    #[test]
    fn test_accrue_interest_without_elapsed_time() {
        let market = market(1, 1_000, 800);
        assert_eq!(market.accrue_interest(1_000).unwrap(), market);
        assert_eq!(market.accrue_interest(10).unwrap(), market);
    }

    #[test]
    fn test_accrue_interest_without_fee() {
        let market = market(1, 1_000, 800);
        let one_year = 365 * 24 * 3600;
        let accrued = market
            .accrue_interest(market.last_update + one_year)
            .unwrap();

        let interest = accrued.total_borrow_assets - market.total_borrow_assets;
        assert_eq!(accrued.total_supply_assets - market.total_supply_assets, interest);
        assert_eq!(accrued.total_supply_shares, market.total_supply_shares);
        assert_eq!(accrued.last_update, market.last_update + one_year);

        // e^0.04 - 1 on 800 borrowed, within the precision of the Taylor expansion
        let interest_f = crate::math::descale(interest, 18);
        assert!((interest_f - 32.649).abs() < 0.01, "unexpected interest {interest_f}");
    }

    #[test]
    fn test_accrue_interest_mints_fee_shares() {
        let mut market = market(1, 1_000, 800);
        market.fee = WAD / U256::from(10);
        let accrued = market
            .accrue_interest(market.last_update + 86_400)
            .unwrap();

        assert!(accrued.total_supply_shares > market.total_supply_shares);
        let fee_shares = accrued.total_supply_shares - market.total_supply_shares;
        let fee_assets = accrued
            .to_supply_assets(fee_shares, RoundingDirection::Down)
            .unwrap();
        let interest = accrued.total_borrow_assets - market.total_borrow_assets;
        let expected_fee = w_mul_down(interest, market.fee).unwrap();
        assert!(expected_fee - fee_assets <= U256::from(1));
    }

    #[test]
    fn test_utilization_and_liquidity() {
        let market = market(1, 1_000, 800);
        assert_eq!(market.utilization().unwrap(), U256::from(800_000_000_000_000_000u64));
        assert_eq!(market.liquidity(), U256::from(200) * WAD);

        let mut empty = market.clone();
        empty.total_supply_assets = U256::ZERO;
        empty.total_borrow_assets = U256::ZERO;
        assert_eq!(empty.utilization().unwrap(), U256::ZERO);
        assert_eq!(empty.liquidity(), U256::ZERO);
    }

    #[test]
    fn test_collateral_value() {
        let mut market = market(1, 1_000, 800);
        market.price = Some(ORACLE_PRICE_SCALE * U256::from(2));
        assert_eq!(market.collateral_value(U256::from(5)).unwrap(), Some(U256::from(10)));

        market.price = None;
        assert_eq!(market.collateral_value(U256::from(5)).unwrap(), None);
    }
}
