// 10.0 book.rs: the leveraged-position book. owns the position token registry
// (ownership, enumeration, transfer) and the per-position lock counts, and runs
// the open/adjust/close execution paths against the ledger under its own
// capability key. callers settle global funding before invoking any of these.

use crate::config::MarketConfig;
use crate::errors::{CoreError, EconomicLimitError, StateError, ValidationError};
use crate::fixed;
use crate::ledger::GlobalLedger;
use crate::position::{weighted_entry_price, Position};
use crate::registry::ModuleRegistry;
use crate::types::{AccountId, Collateral, ModuleKey, Price, Timestamp, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const KEY: ModuleKey = ModuleKey::PositionBook;

#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub token_id: TokenId,
    pub margin_deposited: Collateral,
    pub trade_fee: Collateral,
}

#[derive(Debug, Clone)]
pub struct AdjustOutcome {
    pub trade_fee: Collateral,
    // realized pnl of the reduced portion, zero on pure increases
    pub realized_pnl: Collateral,
    // margin paid back to the owner when the margin delta is negative
    pub payout: Collateral,
}

#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub settled_margin: Collateral,
    pub trade_fee: Collateral,
    pub payout: Collateral,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionBook {
    owners: BTreeMap<TokenId, AccountId>,
    locks: HashMap<TokenId, HashMap<ModuleKey, u32>>,
    next_token_id: u64,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            owners: BTreeMap::new(),
            locks: HashMap::new(),
            next_token_id: 1,
        }
    }

    // 10.1: token registry.

    pub fn owner_of(&self, token_id: TokenId) -> Option<AccountId> {
        self.owners.get(&token_id).copied()
    }

    pub fn tokens_of(&self, account: AccountId) -> Vec<TokenId> {
        self.owners
            .iter()
            .filter(|(_, owner)| **owner == account)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn ensure_owner(&self, token_id: TokenId, account: AccountId) -> Result<(), CoreError> {
        match self.owners.get(&token_id) {
            None => Err(StateError::PositionNotFound(token_id).into()),
            Some(owner) if *owner != account => Err(StateError::NotPositionOwner(account).into()),
            Some(_) => Ok(()),
        }
    }

    /// Transfer of the position token. Forbidden while any hold is outstanding.
    pub fn transfer(
        &mut self,
        token_id: TokenId,
        from: AccountId,
        to: AccountId,
    ) -> Result<(), CoreError> {
        self.ensure_owner(token_id, from)?;
        if self.is_locked(token_id) {
            return Err(StateError::PositionLocked { token_id }.into());
        }
        self.owners.insert(token_id, to);
        Ok(())
    }

    fn mint(&mut self, account: AccountId) -> TokenId {
        let token_id = TokenId(self.next_token_id);
        self.next_token_id += 1;
        self.owners.insert(token_id, account);
        token_id
    }

    fn burn(&mut self, token_id: TokenId) {
        self.owners.remove(&token_id);
        // lock counts die with the position; holders need not release them
        self.locks.remove(&token_id);
    }

    // 10.2: per-position holds. a module announcing a pending action against a
    // position takes a hold so the token cannot change owner underneath it.

    pub fn lock(&mut self, token_id: TokenId, key: ModuleKey) -> Result<(), CoreError> {
        if !self.owners.contains_key(&token_id) {
            return Err(StateError::PositionNotFound(token_id).into());
        }
        *self.locks.entry(token_id).or_default().entry(key).or_insert(0) += 1;
        Ok(())
    }

    /// Release one hold. Releasing against a deleted position is a no-op:
    /// deletion already cleared every hold.
    pub fn unlock(&mut self, token_id: TokenId, key: ModuleKey) -> Result<(), CoreError> {
        if !self.owners.contains_key(&token_id) {
            return Ok(());
        }
        let holds = self.locks.entry(token_id).or_default();
        match holds.get_mut(&key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                Ok(())
            }
            _ => Err(StateError::NotLocked { token_id, key }.into()),
        }
    }

    pub fn is_locked(&self, token_id: TokenId) -> bool {
        self.locks
            .get(&token_id)
            .map(|holds| holds.values().any(|count| *count > 0))
            .unwrap_or(false)
    }

    /// Whether `key` currently holds a lock. Reports false once the position
    /// no longer exists, regardless of what the hold table still contains.
    pub fn is_locked_by(&self, token_id: TokenId, key: ModuleKey) -> bool {
        self.owners.contains_key(&token_id)
            && self
                .locks
                .get(&token_id)
                .and_then(|holds| holds.get(&key))
                .map(|count| *count > 0)
                .unwrap_or(false)
    }

    // 10.3: execution paths. fill price comes from the oracle via the caller;
    // funding has already been settled for this timestamp.

    pub fn execute_open(
        &mut self,
        ledger: &mut GlobalLedger,
        registry: &ModuleRegistry,
        config: &MarketConfig,
        account: AccountId,
        margin: Collateral,
        size: Collateral,
        max_fill_price: Price,
        fill_price: Price,
        now: Timestamp,
    ) -> Result<OpenOutcome, CoreError> {
        if !margin.is_positive() || !size.is_positive() {
            return Err(ValidationError::ZeroAmount.into());
        }
        if fill_price.value() > max_fill_price.value() {
            return Err(EconomicLimitError::SlippageExceeded {
                fill: fill_price.value(),
                limit: max_fill_price.value(),
            }
            .into());
        }
        check_leverage(size, margin, config)?;
        if margin.value() < config.margin_min {
            return Err(EconomicLimitError::MarginBelowMinimum {
                margin: margin.value(),
                minimum: config.margin_min,
            }
            .into());
        }

        let trade_fee = Collateral::new(fixed::mul(size.value(), config.trade_fee_rate));
        let margin_deposited = margin.sub(trade_fee);
        if !margin_deposited.is_positive() {
            return Err(ValidationError::ValueNotPositive.into());
        }

        // post-open skew: exposure up by size, stable side up by the fee
        ledger.check_skew_max_with(fill_price, &config.funding, size, trade_fee)?;

        let position = Position::new(
            fill_price,
            margin_deposited,
            size,
            ledger.global_positions.cumulative_funding_rate,
            now,
        );
        let token_id = self.mint(account);
        ledger.set_position(registry, KEY, token_id, position)?;
        ledger.update_global_position_data(registry, KEY, fill_price, margin_deposited, size)?;
        ledger.update_stable_collateral_total(registry, KEY, trade_fee)?;

        Ok(OpenOutcome {
            token_id,
            margin_deposited,
            trade_fee,
        })
    }

    pub fn execute_adjust(
        &mut self,
        ledger: &mut GlobalLedger,
        registry: &ModuleRegistry,
        config: &MarketConfig,
        token_id: TokenId,
        margin_delta: Collateral,
        size_delta: Collateral,
        fill_price_limit: Price,
        fill_price: Price,
        now: Timestamp,
    ) -> Result<AdjustOutcome, CoreError> {
        let mut position = ledger
            .position(token_id)
            .cloned()
            .ok_or(StateError::PositionNotFound(token_id))?;

        if margin_delta.is_zero() && size_delta.is_zero() {
            return Err(ValidationError::ZeroAmount.into());
        }

        // size increases cap the fill price, decreases floor it
        if size_delta.is_positive() && fill_price.value() > fill_price_limit.value()
            || size_delta.is_negative() && fill_price.value() < fill_price_limit.value()
        {
            return Err(EconomicLimitError::SlippageExceeded {
                fill: fill_price.value(),
                limit: fill_price_limit.value(),
            }
            .into());
        }

        let new_size = position.additional_size.add(size_delta);
        if !new_size.is_positive() {
            return Err(ValidationError::ValueNotPositive.into());
        }

        let index = ledger.global_positions.cumulative_funding_rate;
        position.settle_funding_into_margin(index);

        let trade_fee = Collateral::new(fixed::mul(size_delta.abs().value(), config.trade_fee_rate));

        // realize pnl on the portion being closed; size increases re-average
        // the entry price instead
        let mut realized_pnl = Collateral::zero();
        if size_delta.is_positive() {
            position.entry_price = weighted_entry_price(
                position.additional_size,
                position.entry_price,
                size_delta,
                fill_price,
            );
        } else if size_delta.is_negative() {
            let fraction_pnl = fixed::div(
                fixed::mul(
                    size_delta.abs().value(),
                    fill_price.value() - position.entry_price.value(),
                ),
                position.entry_price.value(),
            );
            realized_pnl = Collateral::new(fraction_pnl);
            position.margin_deposited = position.margin_deposited.add(realized_pnl);
        }

        let new_margin = position.margin_deposited.add(margin_delta).sub(trade_fee);
        if !new_margin.is_positive() {
            return Err(ValidationError::ValueNotPositive.into());
        }
        if new_margin.value() < config.margin_min {
            return Err(EconomicLimitError::MarginBelowMinimum {
                margin: new_margin.value(),
                minimum: config.margin_min,
            }
            .into());
        }
        check_leverage(new_size, new_margin, config)?;

        let stable_delta = trade_fee.sub(realized_pnl);
        if size_delta.is_positive() {
            ledger.check_skew_max_with(fill_price, &config.funding, size_delta, stable_delta)?;
        }

        position.margin_deposited = new_margin;
        position.additional_size = new_size;
        position.updated_at = now;

        let payout = if margin_delta.is_negative() {
            margin_delta.abs()
        } else {
            Collateral::zero()
        };

        // funding already sits in the aggregate; only the fresh flows move it
        let aggregate_margin_delta = margin_delta.sub(trade_fee).add(realized_pnl);
        ledger.set_position(registry, KEY, token_id, position)?;
        ledger.update_global_position_data(
            registry,
            KEY,
            fill_price,
            aggregate_margin_delta,
            size_delta,
        )?;
        ledger.update_stable_collateral_total(registry, KEY, stable_delta)?;

        Ok(AdjustOutcome {
            trade_fee,
            realized_pnl,
            payout,
        })
    }

    pub fn execute_close(
        &mut self,
        ledger: &mut GlobalLedger,
        registry: &ModuleRegistry,
        config: &MarketConfig,
        token_id: TokenId,
        min_fill_price: Price,
        fill_price: Price,
    ) -> Result<CloseOutcome, CoreError> {
        let position = ledger
            .position(token_id)
            .cloned()
            .ok_or(StateError::PositionNotFound(token_id))?;

        if fill_price.value() < min_fill_price.value() {
            return Err(EconomicLimitError::SlippageExceeded {
                fill: fill_price.value(),
                limit: min_fill_price.value(),
            }
            .into());
        }

        let index = ledger.global_positions.cumulative_funding_rate;
        let margin_with_funding = position
            .margin_deposited
            .add(position.accrued_funding(index));
        let pnl = position.profit_loss(fill_price);
        let settled_margin = margin_with_funding.add(pnl);
        let trade_fee = Collateral::new(fixed::mul(
            position.additional_size.value(),
            config.trade_fee_rate,
        ));
        let payout = settled_margin.sub(trade_fee);
        if !payout.is_positive() {
            return Err(ValidationError::ValueNotPositive.into());
        }

        ledger.delete_position(registry, KEY, token_id)?;
        ledger.update_global_position_data(
            registry,
            KEY,
            fill_price,
            margin_with_funding.negate(),
            position.additional_size.negate(),
        )?;
        // the pool realizes the trader's pnl and keeps the fee
        ledger.update_stable_collateral_total(registry, KEY, trade_fee.sub(pnl))?;
        self.burn(token_id);

        Ok(CloseOutcome {
            settled_margin,
            trade_fee,
            payout,
        })
    }

    /// Forced removal during liquidation. The liquidation engine does its own
    /// accounting; the book only retires the token and its holds.
    pub fn remove_liquidated(&mut self, token_id: TokenId) {
        self.burn(token_id);
    }
}

fn check_leverage(size: Collateral, margin: Collateral, config: &MarketConfig) -> Result<(), CoreError> {
    let leverage = fixed::div(size.value(), margin.value());
    if leverage < config.leverage_min || leverage > config.leverage_max {
        return Err(EconomicLimitError::LeverageOutOfBounds {
            leverage,
            min: config.leverage_min,
            max: config.leverage_max,
        }
        .into());
    }
    Ok(())
}
