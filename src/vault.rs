// 6.0 vault.rs: collateral token stand-in. just balance changes, no real token
// transfers. tracks per-account balances plus the balance held by the market
// itself; the invariant guard reconciles the held balance against the ledger.

use crate::errors::ValidationError;
use crate::types::{AccountId, Collateral};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollateralVault {
    balances: HashMap<AccountId, Decimal>,
    market_held: Decimal,
}

impl CollateralVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: AccountId) -> Collateral {
        Collateral::new(self.balances.get(&account).copied().unwrap_or(Decimal::ZERO))
    }

    pub fn market_held(&self) -> Collateral {
        Collateral::new(self.market_held)
    }

    /// Credit external funds to an account. Stand-in for an inbound token transfer.
    pub fn fund_account(&mut self, account: AccountId, amount: Collateral) {
        *self.balances.entry(account).or_insert(Decimal::ZERO) += amount.value().abs();
    }

    /// Move collateral from an account into the market's custody.
    pub fn transfer_to_market(
        &mut self,
        account: AccountId,
        amount: Collateral,
    ) -> Result<(), ValidationError> {
        let needed = amount.value();
        if needed < Decimal::ZERO {
            return Err(ValidationError::ZeroAmount);
        }
        let balance = self.balances.entry(account).or_insert(Decimal::ZERO);
        if *balance < needed {
            return Err(ValidationError::InsufficientBalance {
                needed,
                available: *balance,
            });
        }
        *balance -= needed;
        self.market_held += needed;
        Ok(())
    }

    /// Pay collateral out of the market's custody to an account.
    pub fn transfer_from_market(
        &mut self,
        account: AccountId,
        amount: Collateral,
    ) -> Result<(), ValidationError> {
        let needed = amount.value();
        if needed < Decimal::ZERO {
            return Err(ValidationError::ZeroAmount);
        }
        if self.market_held < needed {
            return Err(ValidationError::InsufficientBalance {
                needed,
                available: self.market_held,
            });
        }
        self.market_held -= needed;
        *self.balances.entry(account).or_insert(Decimal::ZERO) += needed;
        Ok(())
    }

    /// Burn from an account, e.g. a fee consumed outside the market.
    pub fn consume(&mut self, account: AccountId, amount: Collateral) -> Result<(), ValidationError> {
        let needed = amount.value();
        let balance = self.balances.entry(account).or_insert(Decimal::ZERO);
        if *balance < needed {
            return Err(ValidationError::InsufficientBalance {
                needed,
                available: *balance,
            });
        }
        *balance -= needed;
        Ok(())
    }
}
