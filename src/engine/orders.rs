// 15.2 engine/orders.rs: the announce -> execute/cancel state machine.
// delayed orders occupy a single slot per account; limit close orders are keyed
// by position id and persist until triggered or cancelled. announcing escrows
// the keeper fee plus any positive principal; execution pays the keeper from
// escrow atomically with the order's effect.

use super::core::{CoreState, Market};
use super::results::{AnnounceReceipt, ExecutionReceipt, OrderOutcome};
use crate::config::MarketConfig;
use crate::errors::{CoreError, EconomicLimitError, StateError, ValidationError};
use crate::events::{
    EventPayload, LimitOrderAnnouncedEvent, LimitOrderCancelledEvent, OrderAnnouncedEvent,
    OrderCancelledEvent, OrderExecutedEvent, PositionAdjustedEvent, PositionClosedEvent,
    PositionOpenedEvent, StableDepositedEvent, StableWithdrawnEvent,
};
use crate::guard::GuardScope;
use crate::registry::ModuleRegistry;
use crate::types::{AccountId, Collateral, ModuleKey, Price, Timestamp, TokenId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const KEY: ModuleKey = ModuleKey::OrderExecution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    StableDeposit,
    StableWithdraw,
    LeverageOpen,
    LeverageAdjust,
    LeverageClose,
    LimitClose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderPayload {
    StableDeposit {
        amount: Collateral,
        min_shares_out: Decimal,
    },
    StableWithdraw {
        shares: Decimal,
        min_amount_out: Collateral,
    },
    LeverageOpen {
        margin: Collateral,
        size: Collateral,
        max_fill_price: Price,
    },
    LeverageAdjust {
        token_id: TokenId,
        margin_delta: Collateral,
        size_delta: Collateral,
        fill_price_limit: Price,
    },
    LeverageClose {
        token_id: TokenId,
        min_fill_price: Price,
    },
}

impl OrderPayload {
    pub fn kind(&self) -> OrderKind {
        match self {
            OrderPayload::StableDeposit { .. } => OrderKind::StableDeposit,
            OrderPayload::StableWithdraw { .. } => OrderKind::StableWithdraw,
            OrderPayload::LeverageOpen { .. } => OrderKind::LeverageOpen,
            OrderPayload::LeverageAdjust { .. } => OrderKind::LeverageAdjust,
            OrderPayload::LeverageClose { .. } => OrderKind::LeverageClose,
        }
    }
}

/// One announced intent in the per-account slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedOrder {
    pub payload: OrderPayload,
    pub keeper_fee: Collateral,
    // keeper fee plus any positive principal, refunded in full on cancel
    pub escrow: Collateral,
    pub announced_at: Timestamp,
    pub executable_at: Timestamp,
}

impl DelayedOrder {
    pub fn expired_at(&self, config: &MarketConfig) -> Timestamp {
        self.executable_at.add_millis(config.execution_window_ms())
    }
}

/// A conditional close keyed by position id, independent of the delayed slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitCloseOrder {
    pub account: AccountId,
    pub token_id: TokenId,
    pub price_lower_threshold: Price,
    pub price_upper_threshold: Price,
    pub keeper_fee: Collateral,
    pub announced_at: Timestamp,
    pub executable_at: Timestamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderStore {
    delayed: HashMap<AccountId, DelayedOrder>,
    limit: HashMap<TokenId, LimitCloseOrder>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self, account: AccountId) -> Option<&DelayedOrder> {
        self.delayed.get(&account)
    }

    pub fn limit(&self, token_id: TokenId) -> Option<&LimitCloseOrder> {
        self.limit.get(&token_id)
    }

    pub(super) fn limit_remove(&mut self, token_id: TokenId) -> Option<LimitCloseOrder> {
        self.limit.remove(&token_id)
    }

    /// Collateral escrowed across every open slot. Counted by the invariant
    /// guard as part of the tracked totals.
    pub fn escrow_total(&self) -> Collateral {
        let delayed: Collateral = self.delayed.values().map(|o| o.escrow).sum();
        let limit: Collateral = self.limit.values().map(|o| o.keeper_fee).sum();
        delayed.add(limit)
    }
}

impl Market {
    // 15.2.1: announcements.

    pub fn announce_stable_deposit(
        &mut self,
        account: AccountId,
        amount: Collateral,
        min_shares_out: Decimal,
        keeper_fee: Collateral,
        now: Timestamp,
    ) -> Result<AnnounceReceipt, CoreError> {
        if !amount.is_positive() {
            return Err(ValidationError::ZeroAmount.into());
        }
        self.announce_delayed(
            account,
            OrderPayload::StableDeposit {
                amount,
                min_shares_out,
            },
            keeper_fee,
            amount,
            now,
        )
    }

    pub fn announce_stable_withdraw(
        &mut self,
        account: AccountId,
        shares: Decimal,
        min_amount_out: Collateral,
        keeper_fee: Collateral,
        now: Timestamp,
    ) -> Result<AnnounceReceipt, CoreError> {
        if shares <= Decimal::ZERO {
            return Err(ValidationError::ZeroAmount.into());
        }
        self.announce_delayed(
            account,
            OrderPayload::StableWithdraw {
                shares,
                min_amount_out,
            },
            keeper_fee,
            Collateral::zero(),
            now,
        )
    }

    pub fn announce_leverage_open(
        &mut self,
        account: AccountId,
        margin: Collateral,
        size: Collateral,
        max_fill_price: Price,
        keeper_fee: Collateral,
        now: Timestamp,
    ) -> Result<AnnounceReceipt, CoreError> {
        if !margin.is_positive() || !size.is_positive() {
            return Err(ValidationError::ZeroAmount.into());
        }
        self.announce_delayed(
            account,
            OrderPayload::LeverageOpen {
                margin,
                size,
                max_fill_price,
            },
            keeper_fee,
            margin,
            now,
        )
    }

    pub fn announce_leverage_adjust(
        &mut self,
        account: AccountId,
        token_id: TokenId,
        margin_delta: Collateral,
        size_delta: Collateral,
        fill_price_limit: Price,
        keeper_fee: Collateral,
        now: Timestamp,
    ) -> Result<AnnounceReceipt, CoreError> {
        if margin_delta.is_zero() && size_delta.is_zero() {
            return Err(ValidationError::ZeroAmount.into());
        }
        let principal = if margin_delta.is_positive() {
            margin_delta
        } else {
            Collateral::zero()
        };
        self.announce_delayed(
            account,
            OrderPayload::LeverageAdjust {
                token_id,
                margin_delta,
                size_delta,
                fill_price_limit,
            },
            keeper_fee,
            principal,
            now,
        )
    }

    pub fn announce_leverage_close(
        &mut self,
        account: AccountId,
        token_id: TokenId,
        min_fill_price: Price,
        keeper_fee: Collateral,
        now: Timestamp,
    ) -> Result<AnnounceReceipt, CoreError> {
        self.announce_delayed(
            account,
            OrderPayload::LeverageClose {
                token_id,
                min_fill_price,
            },
            keeper_fee,
            Collateral::zero(),
            now,
        )
    }

    fn announce_delayed(
        &mut self,
        account: AccountId,
        payload: OrderPayload,
        keeper_fee: Collateral,
        principal: Collateral,
        now: Timestamp,
    ) -> Result<AnnounceReceipt, CoreError> {
        self.mutate(now, GuardScope::Other, move |config, registry, state, events, _snapshot| {
            registry.ensure_active(KEY)?;
            if keeper_fee.value() < config.min_keeper_fee {
                return Err(ValidationError::KeeperFeeTooSmall {
                    offered: keeper_fee.value(),
                    minimum: config.min_keeper_fee,
                }
                .into());
            }
            if state.orders.delayed.contains_key(&account) {
                return Err(StateError::OrderPending(account).into());
            }

            // per-type announce effects: reserve what execution will consume
            match &payload {
                OrderPayload::StableWithdraw { shares, .. } => {
                    state.pool.lock_shares(account, *shares)?;
                }
                OrderPayload::LeverageAdjust { token_id, .. }
                | OrderPayload::LeverageClose { token_id, .. } => {
                    state.book.ensure_owner(*token_id, account)?;
                    state.book.lock(*token_id, KEY)?;
                }
                OrderPayload::StableDeposit { .. } | OrderPayload::LeverageOpen { .. } => {}
            }

            let escrow = keeper_fee.add(principal);
            state.vault.transfer_to_market(account, escrow)?;

            let executable_at = now.add_millis(config.min_executability_age_ms);
            let kind = payload.kind();
            state.orders.delayed.insert(
                account,
                DelayedOrder {
                    payload,
                    keeper_fee,
                    escrow,
                    announced_at: now,
                    executable_at,
                },
            );

            events.push(EventPayload::OrderAnnounced(OrderAnnouncedEvent {
                account,
                kind,
                keeper_fee,
                executable_at,
            }));
            Ok(AnnounceReceipt {
                executable_at,
                escrowed: escrow,
            })
        })
    }

    // 15.2.2: execution. any account may execute any other account's order
    // once the window opens; the loser of a keeper race gets a StateError.

    pub fn execute_order(
        &mut self,
        keeper: AccountId,
        account: AccountId,
        now: Timestamp,
    ) -> Result<ExecutionReceipt, CoreError> {
        let scope = match self.state.orders.pending(account).map(|o| o.payload.kind()) {
            Some(OrderKind::StableDeposit) | Some(OrderKind::StableWithdraw) => {
                GuardScope::StablePoolOp
            }
            _ => GuardScope::Other,
        };

        self.mutate(now, scope, move |config, registry, state, events, snapshot| {
            registry.ensure_active(KEY)?;
            let order = state
                .orders
                .delayed
                .remove(&account)
                .ok_or(StateError::NoPendingOrder(account))?;

            if now < order.executable_at {
                return Err(StateError::NotYetExecutable {
                    executable_at: order.executable_at,
                }
                .into());
            }
            let expired_at = order.expired_at(config);
            if now > expired_at {
                return Err(StateError::OrderExpired { expired_at }.into());
            }

            // the execution price must postdate the announcement
            let max_age = order.announced_at.age_millis(now);
            let (price, _) = state.oracle.get_price(now, max_age, true)?;

            Market::settle_funding_in(config, state, events, now, price);
            snapshot.rebaseline(&state.ledger, &state.pool);

            let outcome = dispatch(config, registry, state, events, account, &order, price, now)?;

            state.vault.transfer_from_market(keeper, order.keeper_fee)?;
            let kind = order.payload.kind();
            events.push(EventPayload::OrderExecuted(OrderExecutedEvent {
                account,
                keeper,
                kind,
                keeper_fee: order.keeper_fee,
                fill_price: price,
            }));

            Ok(ExecutionReceipt {
                kind,
                fill_price: price,
                keeper_fee: order.keeper_fee,
                outcome,
            })
        })
    }

    /// Cancel the pending delayed order. The owner may cancel at any time;
    /// once expired, anyone may clean the slot up. Escrow is refunded in full
    /// and announce-time holds are released.
    pub fn cancel_order(
        &mut self,
        caller: AccountId,
        account: AccountId,
        now: Timestamp,
    ) -> Result<Collateral, CoreError> {
        self.mutate(now, GuardScope::Other, move |config, _registry, state, events, _snapshot| {
            let order = state
                .orders
                .delayed
                .get(&account)
                .ok_or(StateError::NoPendingOrder(account))?;

            if caller != account && now <= order.expired_at(config) {
                return Err(StateError::OrderNotExpired.into());
            }
            let order = state
                .orders
                .delayed
                .remove(&account)
                .ok_or(StateError::NoPendingOrder(account))?;

            match &order.payload {
                OrderPayload::StableWithdraw { shares, .. } => {
                    state.pool.unlock_shares(account, *shares);
                }
                OrderPayload::LeverageAdjust { token_id, .. }
                | OrderPayload::LeverageClose { token_id, .. } => {
                    state.book.unlock(*token_id, KEY)?;
                }
                OrderPayload::StableDeposit { .. } | OrderPayload::LeverageOpen { .. } => {}
            }

            state.vault.transfer_from_market(account, order.escrow)?;
            events.push(EventPayload::OrderCancelled(OrderCancelledEvent {
                account,
                kind: order.payload.kind(),
                refunded: order.escrow,
            }));
            Ok(order.escrow)
        })
    }

    // 15.2.3: limit close orders, keyed by position id.

    pub fn announce_limit_close(
        &mut self,
        account: AccountId,
        token_id: TokenId,
        price_lower_threshold: Price,
        price_upper_threshold: Price,
        keeper_fee: Collateral,
        now: Timestamp,
    ) -> Result<AnnounceReceipt, CoreError> {
        self.mutate(now, GuardScope::Other, move |config, registry, state, events, _snapshot| {
            registry.ensure_active(KEY)?;
            if keeper_fee.value() < config.min_keeper_fee {
                return Err(ValidationError::KeeperFeeTooSmall {
                    offered: keeper_fee.value(),
                    minimum: config.min_keeper_fee,
                }
                .into());
            }
            if price_lower_threshold.value() >= price_upper_threshold.value() {
                return Err(ValidationError::InvalidThresholds {
                    lower: price_lower_threshold.value(),
                    upper: price_upper_threshold.value(),
                }
                .into());
            }
            state.book.ensure_owner(token_id, account)?;

            // re-announcing updates in place; the hold from the first announce
            // is still ours
            match state.orders.limit.remove(&token_id) {
                Some(existing) => {
                    state.vault.transfer_from_market(account, existing.keeper_fee)?;
                }
                None => {
                    state.book.lock(token_id, KEY)?;
                }
            }
            state.vault.transfer_to_market(account, keeper_fee)?;

            let executable_at = now.add_millis(config.min_executability_age_ms);
            state.orders.limit.insert(
                token_id,
                LimitCloseOrder {
                    account,
                    token_id,
                    price_lower_threshold,
                    price_upper_threshold,
                    keeper_fee,
                    announced_at: now,
                    executable_at,
                },
            );

            events.push(EventPayload::LimitOrderAnnounced(LimitOrderAnnouncedEvent {
                token_id,
                account,
                price_lower_threshold,
                price_upper_threshold,
            }));
            Ok(AnnounceReceipt {
                executable_at,
                escrowed: keeper_fee,
            })
        })
    }

    pub fn execute_limit_order(
        &mut self,
        keeper: AccountId,
        token_id: TokenId,
        now: Timestamp,
    ) -> Result<ExecutionReceipt, CoreError> {
        self.mutate(now, GuardScope::Other, move |config, registry, state, events, _snapshot| {
            registry.ensure_active(KEY)?;
            let order = state
                .orders
                .limit
                .remove(&token_id)
                .ok_or(StateError::NoLimitOrder(token_id))?;

            if now < order.executable_at {
                return Err(StateError::NotYetExecutable {
                    executable_at: order.executable_at,
                }
                .into());
            }

            let (price, _) =
                state
                    .oracle
                    .get_price(now, config.max_executability_age_ms, true)?;

            Market::settle_funding_in(config, state, events, now, price);

            let triggered = price.value() <= order.price_lower_threshold.value()
                || price.value() >= order.price_upper_threshold.value();
            if !triggered {
                return Err(EconomicLimitError::LimitPriceNotReached {
                    price: price.value(),
                }
                .into());
            }

            let owner = state
                .book
                .owner_of(token_id)
                .ok_or(StateError::PositionNotFound(token_id))?;
            let outcome =
                state
                    .book
                    .execute_close(&mut state.ledger, registry, config, token_id, price, price)?;
            state.vault.transfer_from_market(owner, outcome.payout)?;
            state.vault.transfer_from_market(keeper, order.keeper_fee)?;

            events.push(EventPayload::PositionClosed(PositionClosedEvent {
                token_id,
                account: owner,
                fill_price: price,
                settled_margin: outcome.settled_margin,
                payout: outcome.payout,
                trade_fee: outcome.trade_fee,
            }));
            events.push(EventPayload::OrderExecuted(OrderExecutedEvent {
                account: owner,
                keeper,
                kind: OrderKind::LimitClose,
                keeper_fee: order.keeper_fee,
                fill_price: price,
            }));

            Ok(ExecutionReceipt {
                kind: OrderKind::LimitClose,
                fill_price: price,
                keeper_fee: order.keeper_fee,
                outcome: OrderOutcome::Closed(outcome),
            })
        })
    }

    /// Cancel a limit close. The position owner may cancel while the position
    /// lives; once the position is gone, anyone may clean the slot up.
    pub fn cancel_limit_order(
        &mut self,
        caller: AccountId,
        token_id: TokenId,
        now: Timestamp,
    ) -> Result<Collateral, CoreError> {
        self.mutate(now, GuardScope::Other, move |_config, _registry, state, events, _snapshot| {
            let order = state
                .orders
                .limit
                .remove(&token_id)
                .ok_or(StateError::NoLimitOrder(token_id))?;

            if state.book.owner_of(token_id).is_some() {
                if caller != order.account {
                    return Err(StateError::NotPositionOwner(caller).into());
                }
                state.book.unlock(token_id, KEY)?;
            }

            state.vault.transfer_from_market(order.account, order.keeper_fee)?;
            events.push(EventPayload::LimitOrderCancelled(LimitOrderCancelledEvent {
                token_id,
                refunded: order.keeper_fee,
            }));
            Ok(order.keeper_fee)
        })
    }
}

// 15.2.4: per-type execute routines. funding is already settled and the price
// validated by the caller.
fn dispatch(
    config: &MarketConfig,
    registry: &ModuleRegistry,
    state: &mut CoreState,
    events: &mut Vec<EventPayload>,
    account: AccountId,
    order: &DelayedOrder,
    price: Price,
    now: Timestamp,
) -> Result<OrderOutcome, CoreError> {
    match &order.payload {
        OrderPayload::StableDeposit {
            amount,
            min_shares_out,
        } => {
            let outcome = state.pool.execute_deposit(
                &mut state.ledger,
                registry,
                config,
                account,
                *amount,
                *min_shares_out,
            )?;
            events.push(EventPayload::StableDeposited(StableDepositedEvent {
                account,
                amount: *amount,
                shares_minted: outcome.shares_minted,
            }));
            Ok(OrderOutcome::Deposited(outcome))
        }

        OrderPayload::StableWithdraw {
            shares,
            min_amount_out,
        } => {
            let outcome = state.pool.execute_withdraw(
                &mut state.ledger,
                registry,
                config,
                account,
                *shares,
                *min_amount_out,
                price,
            )?;
            state.vault.transfer_from_market(account, outcome.payout)?;
            events.push(EventPayload::StableWithdrawn(StableWithdrawnEvent {
                account,
                shares_burned: outcome.shares_burned,
                payout: outcome.payout,
                withdraw_fee: outcome.withdraw_fee,
            }));
            Ok(OrderOutcome::Withdrawn(outcome))
        }

        OrderPayload::LeverageOpen {
            margin,
            size,
            max_fill_price,
        } => {
            let outcome = state.book.execute_open(
                &mut state.ledger,
                registry,
                config,
                account,
                *margin,
                *size,
                *max_fill_price,
                price,
                now,
            )?;
            events.push(EventPayload::PositionOpened(PositionOpenedEvent {
                token_id: outcome.token_id,
                account,
                margin_deposited: outcome.margin_deposited,
                additional_size: *size,
                entry_price: price,
                trade_fee: outcome.trade_fee,
            }));
            Ok(OrderOutcome::Opened(outcome))
        }

        OrderPayload::LeverageAdjust {
            token_id,
            margin_delta,
            size_delta,
            fill_price_limit,
        } => {
            let outcome = state.book.execute_adjust(
                &mut state.ledger,
                registry,
                config,
                *token_id,
                *margin_delta,
                *size_delta,
                *fill_price_limit,
                price,
                now,
            )?;
            state.book.unlock(*token_id, KEY)?;
            if outcome.payout.is_positive() {
                state.vault.transfer_from_market(account, outcome.payout)?;
            }
            events.push(EventPayload::PositionAdjusted(PositionAdjustedEvent {
                token_id: *token_id,
                margin_delta: *margin_delta,
                size_delta: *size_delta,
                realized_pnl: outcome.realized_pnl,
                fill_price: price,
                trade_fee: outcome.trade_fee,
            }));
            Ok(OrderOutcome::Adjusted(outcome))
        }

        OrderPayload::LeverageClose {
            token_id,
            min_fill_price,
        } => {
            let outcome = state.book.execute_close(
                &mut state.ledger,
                registry,
                config,
                *token_id,
                *min_fill_price,
                price,
            )?;
            state.vault.transfer_from_market(account, outcome.payout)?;

            // a standing limit order dies with the position
            if let Some(limit) = state.orders.limit.remove(token_id) {
                state.vault.transfer_from_market(limit.account, limit.keeper_fee)?;
                events.push(EventPayload::LimitOrderCancelled(LimitOrderCancelledEvent {
                    token_id: *token_id,
                    refunded: limit.keeper_fee,
                }));
            }

            events.push(EventPayload::PositionClosed(PositionClosedEvent {
                token_id: *token_id,
                account,
                fill_price: price,
                settled_margin: outcome.settled_margin,
                payout: outcome.payout,
                trade_fee: outcome.trade_fee,
            }));
            Ok(OrderOutcome::Closed(outcome))
        }
    }
}
