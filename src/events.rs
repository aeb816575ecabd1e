// 14.0: every state change produces an event. used for audit trails, state
// reconstruction, and notifying external systems. the EventPayload enum lists
// all event types.

use crate::engine::OrderKind;
use crate::types::{AccountId, Collateral, Price, Timestamp, TokenId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // order lifecycle
    OrderAnnounced(OrderAnnouncedEvent),
    OrderExecuted(OrderExecutedEvent),
    OrderCancelled(OrderCancelledEvent),
    LimitOrderAnnounced(LimitOrderAnnouncedEvent),
    LimitOrderCancelled(LimitOrderCancelledEvent),

    // position lifecycle
    PositionOpened(PositionOpenedEvent),
    PositionAdjusted(PositionAdjustedEvent),
    PositionClosed(PositionClosedEvent),
    PositionLiquidated(PositionLiquidatedEvent),

    // stable side
    StableDeposited(StableDepositedEvent),
    StableWithdrawn(StableWithdrawnEvent),

    // ledger
    FundingSettled(FundingSettledEvent),

    // oracle
    OffchainPriceUpdated(OffchainPriceUpdatedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAnnouncedEvent {
    pub account: AccountId,
    pub kind: OrderKind,
    pub keeper_fee: Collateral,
    pub executable_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderExecutedEvent {
    pub account: AccountId,
    pub keeper: AccountId,
    pub kind: OrderKind,
    pub keeper_fee: Collateral,
    pub fill_price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub account: AccountId,
    pub kind: OrderKind,
    pub refunded: Collateral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrderAnnouncedEvent {
    pub token_id: TokenId,
    pub account: AccountId,
    pub price_lower_threshold: Price,
    pub price_upper_threshold: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrderCancelledEvent {
    pub token_id: TokenId,
    pub refunded: Collateral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub token_id: TokenId,
    pub account: AccountId,
    pub margin_deposited: Collateral,
    pub additional_size: Collateral,
    pub entry_price: Price,
    pub trade_fee: Collateral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionAdjustedEvent {
    pub token_id: TokenId,
    pub margin_delta: Collateral,
    pub size_delta: Collateral,
    pub realized_pnl: Collateral,
    pub fill_price: Price,
    pub trade_fee: Collateral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub token_id: TokenId,
    pub account: AccountId,
    pub fill_price: Price,
    pub settled_margin: Collateral,
    pub payout: Collateral,
    pub trade_fee: Collateral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub token_id: TokenId,
    pub keeper: AccountId,
    pub price: Price,
    pub settled_margin: Collateral,
    pub fee: Collateral,
    pub remainder: Collateral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StableDepositedEvent {
    pub account: AccountId,
    pub amount: Collateral,
    pub shares_minted: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StableWithdrawnEvent {
    pub account: AccountId,
    pub shares_burned: Decimal,
    pub payout: Collateral,
    pub withdraw_fee: Collateral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSettledEvent {
    pub unrecorded: Decimal,
    pub transferred: Collateral,
    pub current_rate: Decimal,
    pub cumulative_funding_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffchainPriceUpdatedEvent {
    pub submitter: AccountId,
    pub publish_time: Timestamp,
    pub refund: Collateral,
}
