// 11.0 pool.rs: stable-side share accounting. LPs deposit collateral and hold
// fungible shares priced by stable_collateral_total / total_shares. the
// withdraw fee stays in the pool, so per-share value never drops from an LP
// exit. shares back every open long, hence the skew check on the way out.

use crate::config::MarketConfig;
use crate::errors::{CoreError, EconomicLimitError, ValidationError};
use crate::fixed;
use crate::ledger::GlobalLedger;
use crate::registry::ModuleRegistry;
use crate::types::{AccountId, Collateral, ModuleKey, Price};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const KEY: ModuleKey = ModuleKey::StablePool;

#[derive(Debug, Clone)]
pub struct DepositOutcome {
    pub shares_minted: Decimal,
}

#[derive(Debug, Clone)]
pub struct WithdrawOutcome {
    pub shares_burned: Decimal,
    pub amount_redeemed: Collateral,
    pub withdraw_fee: Collateral,
    pub payout: Collateral,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StablePool {
    shares: BTreeMap<AccountId, Decimal>,
    // shares reserved by a pending withdraw announcement
    locked: BTreeMap<AccountId, Decimal>,
    total_shares: Decimal,
}

impl StablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_shares(&self) -> Decimal {
        self.total_shares
    }

    pub fn shares_of(&self, account: AccountId) -> Decimal {
        self.shares.get(&account).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn locked_shares_of(&self, account: AccountId) -> Decimal {
        self.locked.get(&account).copied().unwrap_or(Decimal::ZERO)
    }

    /// Collateral value of one share. Defined as one when no shares exist.
    pub fn stable_collateral_per_share(&self, ledger: &GlobalLedger) -> Decimal {
        if self.total_shares.is_zero() {
            Decimal::ONE
        } else {
            fixed::div(ledger.stable_collateral_total.value(), self.total_shares)
        }
    }

    // 11.1: share holds. a pending withdraw reserves the announced shares so
    // they cannot be transferred away before execution.

    pub fn lock_shares(&mut self, account: AccountId, amount: Decimal) -> Result<(), CoreError> {
        let free = self.shares_of(account) - self.locked_shares_of(account);
        if free < amount {
            return Err(ValidationError::InsufficientBalance {
                needed: amount,
                available: free,
            }
            .into());
        }
        *self.locked.entry(account).or_insert(Decimal::ZERO) += amount;
        Ok(())
    }

    pub fn unlock_shares(&mut self, account: AccountId, amount: Decimal) {
        if let Some(locked) = self.locked.get_mut(&account) {
            *locked = (*locked - amount).max(Decimal::ZERO);
            if locked.is_zero() {
                self.locked.remove(&account);
            }
        }
    }

    pub fn transfer_shares(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    ) -> Result<(), CoreError> {
        let free = self.shares_of(from) - self.locked_shares_of(from);
        if free < amount {
            return Err(ValidationError::InsufficientBalance {
                needed: amount,
                available: free,
            }
            .into());
        }
        *self.shares.entry(from).or_insert(Decimal::ZERO) -= amount;
        *self.shares.entry(to).or_insert(Decimal::ZERO) += amount;
        Ok(())
    }

    // 11.2: execution paths. funding has been settled for this timestamp.

    pub fn execute_deposit(
        &mut self,
        ledger: &mut GlobalLedger,
        registry: &ModuleRegistry,
        config: &MarketConfig,
        account: AccountId,
        amount: Collateral,
        min_shares_out: Decimal,
    ) -> Result<DepositOutcome, CoreError> {
        if !amount.is_positive() {
            return Err(ValidationError::ZeroAmount.into());
        }
        if amount.value() < config.min_deposit {
            return Err(EconomicLimitError::DepositBelowMinimum {
                amount: amount.value(),
                minimum: config.min_deposit,
            }
            .into());
        }
        let cap = config.funding.stable_collateral_cap;
        if ledger.stable_collateral_total.value() + amount.value() > cap {
            return Err(EconomicLimitError::CapExceeded { cap }.into());
        }

        let per_share = self.stable_collateral_per_share(ledger);
        let shares_minted = fixed::div(amount.value(), per_share);
        if shares_minted < min_shares_out {
            return Err(EconomicLimitError::MinimumOutNotMet {
                amount: shares_minted,
                minimum: min_shares_out,
            }
            .into());
        }

        ledger.update_stable_collateral_total(registry, KEY, amount)?;
        *self.shares.entry(account).or_insert(Decimal::ZERO) += shares_minted;
        self.total_shares += shares_minted;

        Ok(DepositOutcome { shares_minted })
    }

    pub fn execute_withdraw(
        &mut self,
        ledger: &mut GlobalLedger,
        registry: &ModuleRegistry,
        config: &MarketConfig,
        account: AccountId,
        shares: Decimal,
        min_amount_out: Collateral,
        price: Price,
    ) -> Result<WithdrawOutcome, CoreError> {
        if shares <= Decimal::ZERO {
            return Err(ValidationError::ZeroAmount.into());
        }
        let balance = self.shares_of(account);
        if balance < shares {
            return Err(ValidationError::InsufficientBalance {
                needed: shares,
                available: balance,
            }
            .into());
        }

        let per_share = self.stable_collateral_per_share(ledger);
        let amount_redeemed = Collateral::new(fixed::mul(shares, per_share));
        let withdraw_fee = Collateral::new(fixed::mul(
            amount_redeemed.value(),
            config.withdraw_fee_rate,
        ));
        let payout = amount_redeemed.sub(withdraw_fee);
        if !payout.is_positive() {
            return Err(ValidationError::ValueNotPositive.into());
        }
        if payout.value() < min_amount_out.value() {
            return Err(EconomicLimitError::MinimumOutNotMet {
                amount: payout.value(),
                minimum: min_amount_out.value(),
            }
            .into());
        }

        // draining stable collateral must not leave longs over-skewed
        ledger.check_skew_max_with(price, &config.funding, Collateral::zero(), payout.negate())?;

        ledger.update_stable_collateral_total(registry, KEY, payout.negate())?;
        let balance = self.shares.entry(account).or_insert(Decimal::ZERO);
        *balance -= shares;
        if balance.is_zero() {
            self.shares.remove(&account);
        }
        self.unlock_shares(account, shares);
        self.total_shares -= shares;

        Ok(WithdrawOutcome {
            shares_burned: shares,
            amount_redeemed,
            withdraw_fee,
            payout,
        })
    }
}
