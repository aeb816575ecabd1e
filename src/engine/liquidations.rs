// 15.3 engine/liquidations.rs: forced closure of under-margined positions.
// anyone may call; the fee comes out of the position's remaining margin and the
// rest stays with the stable pool.

use super::core::Market;
use super::results::LiquidationReceipt;
use crate::errors::{CoreError, EconomicLimitError, StateError};
use crate::events::{EventPayload, LimitOrderCancelledEvent, PositionLiquidatedEvent};
use crate::guard::GuardScope;
use crate::liquidation::{can_liquidate, split_liquidation};
use crate::types::{AccountId, ModuleKey, Timestamp, TokenId};

const KEY: ModuleKey = ModuleKey::LiquidationEngine;

impl Market {
    /// Whether the position can be liquidated right now. Mirrors `liquidate`
    /// exactly: same price bounds, same margin math, accruals included.
    pub fn can_liquidate(&self, token_id: TokenId, now: Timestamp) -> Result<bool, CoreError> {
        let position = match self.state.ledger.position(token_id) {
            Some(position) => position,
            None => return Ok(false),
        };
        let (price, _) =
            self.state
                .oracle
                .get_price(now, self.config.liquidation.max_price_age_ms, true)?;
        let index = self
            .state
            .ledger
            .cumulative_funding_rate_at(now, price, &self.config.funding);
        Ok(can_liquidate(position, &self.config.liquidation, price, index))
    }

    pub fn liquidate(
        &mut self,
        keeper: AccountId,
        token_id: TokenId,
        now: Timestamp,
    ) -> Result<LiquidationReceipt, CoreError> {
        self.mutate(now, GuardScope::Other, move |config, registry, state, events, _snapshot| {
            registry.ensure_active(KEY)?;
            if state.ledger.position(token_id).is_none() {
                return Err(StateError::PositionNotFound(token_id).into());
            }

            let (price, _) = state
                .oracle
                .get_price(now, config.liquidation.max_price_age_ms, true)?;
            Market::settle_funding_in(config, state, events, now, price);

            let position = state
                .ledger
                .position(token_id)
                .cloned()
                .ok_or(StateError::PositionNotFound(token_id))?;
            let index = state.ledger.global_positions.cumulative_funding_rate;

            if !can_liquidate(&position, &config.liquidation, price, index) {
                return Err(EconomicLimitError::NotLiquidatable.into());
            }

            let split = split_liquidation(&position, &config.liquidation, price, index);
            let margin_with_funding = position
                .margin_deposited
                .add(position.accrued_funding(index));
            let pnl = position.profit_loss(price);

            state.ledger.delete_position(registry, KEY, token_id)?;
            state.ledger.update_global_position_data(
                registry,
                KEY,
                price,
                margin_with_funding.negate(),
                position.additional_size.negate(),
            )?;
            // pool realizes the pnl and keeps whatever margin the fee left over
            state
                .ledger
                .update_stable_collateral_total(registry, KEY, split.remainder.sub(pnl))?;
            state.book.remove_liquidated(token_id);

            if let Some(limit) = state.orders.limit_remove(token_id) {
                state
                    .vault
                    .transfer_from_market(limit.account, limit.keeper_fee)?;
                events.push(EventPayload::LimitOrderCancelled(LimitOrderCancelledEvent {
                    token_id,
                    refunded: limit.keeper_fee,
                }));
            }

            if split.fee.is_positive() {
                state.vault.transfer_from_market(keeper, split.fee)?;
            }

            events.push(EventPayload::PositionLiquidated(PositionLiquidatedEvent {
                token_id,
                keeper,
                price,
                settled_margin: split.settled_margin,
                fee: split.fee,
                remainder: split.remainder,
            }));

            Ok(LiquidationReceipt {
                token_id,
                price,
                settled_margin: split.settled_margin,
                fee: split.fee,
                remainder: split.remainder,
            })
        })
    }
}
