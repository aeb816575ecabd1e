// 15.0.2: result types for engine operations.

use super::orders::OrderKind;
use crate::book::{AdjustOutcome, CloseOutcome, OpenOutcome};
use crate::pool::{DepositOutcome, WithdrawOutcome};
use crate::types::{Collateral, Price, Timestamp, TokenId};

/// Returned by every announce. The escrow is what cancellation refunds.
#[derive(Debug, Clone)]
pub struct AnnounceReceipt {
    pub executable_at: Timestamp,
    pub escrowed: Collateral,
}

/// What an executed order did, by order type.
#[derive(Debug, Clone)]
pub enum OrderOutcome {
    Deposited(DepositOutcome),
    Withdrawn(WithdrawOutcome),
    Opened(OpenOutcome),
    Adjusted(AdjustOutcome),
    Closed(CloseOutcome),
}

#[derive(Debug, Clone)]
pub struct ExecutionReceipt {
    pub kind: OrderKind,
    pub fill_price: Price,
    pub keeper_fee: Collateral,
    pub outcome: OrderOutcome,
}

#[derive(Debug, Clone)]
pub struct LiquidationReceipt {
    pub token_id: TokenId,
    pub price: Price,
    pub settled_margin: Collateral,
    pub fee: Collateral,
    pub remainder: Collateral,
}
