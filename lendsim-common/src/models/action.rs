use alloy_primitives::Address;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, IntoStaticStr};

use crate::models::MarketId;

/// An action a user prepares against the lending protocol.
///
/// The variant decides which on-chain entities must be loaded to simulate it; see
/// [`EntitySets::for_action`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionRequest {
    VaultSupply { vault: Address },
    VaultWithdraw { vault: Address },
    MarketRepayWithdraw { market_id: MarketId },
    MarketSupplyBorrow { market_id: MarketId, requires_reallocation: bool },
}

impl ActionRequest {
    /// Short name of the action, for logs.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// The vault targeted by a vault action.
    pub fn target_vault(&self) -> Option<Address> {
        match self {
            ActionRequest::VaultSupply { vault } | ActionRequest::VaultWithdraw { vault } => {
                Some(*vault)
            }
            ActionRequest::MarketRepayWithdraw { .. } |
            ActionRequest::MarketSupplyBorrow { .. } => None,
        }
    }

    /// The market targeted by a market action.
    pub fn target_market(&self) -> Option<MarketId> {
        match self {
            ActionRequest::MarketRepayWithdraw { market_id } |
            ActionRequest::MarketSupplyBorrow { market_id, .. } => Some(*market_id),
            ActionRequest::VaultSupply { .. } | ActionRequest::VaultWithdraw { .. } => None,
        }
    }
}

/// An action together with the account performing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionContext {
    pub account: Address,
    pub action: ActionRequest,
}

impl ActionContext {
    pub fn new(account: Address, action: ActionRequest) -> Self {
        Self { account, action }
    }
}

/// The whitelisted markets and vaults, used when an action may publicly reallocate liquidity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub markets: Vec<MarketId>,
    #[serde(default)]
    pub vaults: Vec<Address>,
}

/// The markets and vaults an action needs before vault queues are expanded.
///
/// Both are sets: duplicates are dropped on insertion and the target entity comes first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySets {
    pub markets: IndexSet<MarketId>,
    pub vaults: IndexSet<Address>,
}

impl EntitySets {
    pub fn for_action(action: &ActionRequest, registry: &Registry) -> Self {
        let mut sets = EntitySets::default();
        match *action {
            ActionRequest::VaultSupply { vault } | ActionRequest::VaultWithdraw { vault } => {
                sets.vaults.insert(vault);
            }
            ActionRequest::MarketRepayWithdraw { market_id } => {
                sets.markets.insert(market_id);
            }
            ActionRequest::MarketSupplyBorrow { market_id, requires_reallocation } => {
                sets.markets.insert(market_id);
                if requires_reallocation {
                    sets.markets
                        .extend(registry.markets.iter().copied());
                    sets.vaults
                        .extend(registry.vaults.iter().copied());
                }
            }
        }
        sets
    }

    /// Adds the markets from a vault's supply and withdraw queues.
    pub fn extend_markets(&mut self, markets: impl IntoIterator<Item = MarketId>) {
        self.markets.extend(markets);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn registry() -> Registry {
        Registry {
            markets: vec![
                MarketId::repeat_byte(2),
                MarketId::repeat_byte(1),
                MarketId::repeat_byte(3),
                MarketId::repeat_byte(2),
            ],
            vaults: vec![Address::repeat_byte(0xa0), Address::repeat_byte(0xb0)],
        }
    }

    #[rstest]
    #[case::vault_supply(ActionRequest::VaultSupply { vault: Address::repeat_byte(0xa0) })]
    #[case::vault_withdraw(ActionRequest::VaultWithdraw { vault: Address::repeat_byte(0xa0) })]
    fn test_vault_action_sets(#[case] action: ActionRequest) {
        let sets = EntitySets::for_action(&action, &registry());
        assert!(sets.markets.is_empty());
        assert_eq!(sets.vaults.into_iter().collect::<Vec<_>>(), vec![Address::repeat_byte(0xa0)]);
    }

    #[rstest]
    #[case::repay_withdraw(
        ActionRequest::MarketRepayWithdraw { market_id: MarketId::repeat_byte(1) }
    )]
    #[case::supply_borrow(ActionRequest::MarketSupplyBorrow {
        market_id: MarketId::repeat_byte(1),
        requires_reallocation: false,
    })]
    fn test_market_action_sets(#[case] action: ActionRequest) {
        let sets = EntitySets::for_action(&action, &registry());
        assert!(sets.vaults.is_empty());
        assert_eq!(sets.markets.into_iter().collect::<Vec<_>>(), vec![MarketId::repeat_byte(1)]);
    }

    #[test]
    fn test_reallocation_fetches_whole_registry_target_first() {
        let action = ActionRequest::MarketSupplyBorrow {
            market_id: MarketId::repeat_byte(1),
            requires_reallocation: true,
        };
        let sets = EntitySets::for_action(&action, &registry());

        assert_eq!(
            sets.markets.into_iter().collect::<Vec<_>>(),
            vec![MarketId::repeat_byte(1), MarketId::repeat_byte(2), MarketId::repeat_byte(3)]
        );
        assert_eq!(
            sets.vaults.into_iter().collect::<Vec<_>>(),
            vec![Address::repeat_byte(0xa0), Address::repeat_byte(0xb0)]
        );
    }

    #[test]
    fn test_action_serde() {
        let action = ActionRequest::MarketSupplyBorrow {
            market_id: MarketId::repeat_byte(1),
            requires_reallocation: true,
        };
        let json = serde_json::to_value(action).unwrap();
        assert_eq!(json["type"], "market_supply_borrow");
        assert_eq!(json["requires_reallocation"], true);

        let decoded: ActionRequest = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, action);
        assert_eq!(action.to_string(), "market_supply_borrow");
        assert_eq!(action.kind(), "market_supply_borrow");
    }

    #[test]
    fn test_targets() {
        let vault = ActionRequest::VaultWithdraw { vault: Address::repeat_byte(0xa0) };
        assert_eq!(vault.target_vault(), Some(Address::repeat_byte(0xa0)));
        assert_eq!(vault.target_market(), None);

        let market = ActionRequest::MarketRepayWithdraw { market_id: MarketId::repeat_byte(1) };
        assert_eq!(market.target_vault(), None);
        assert_eq!(market.target_market(), Some(MarketId::repeat_byte(1)));
    }
}
