// 3.0: error taxonomy. five categories, each its own enum, aggregated into CoreError.
// every failure aborts the whole operation; nothing is swallowed. InvariantError
// signals a defect and is never recovered.

use crate::types::{AccountId, ModuleKey, Timestamp, TokenId};
use rust_decimal::Decimal;

/// Bad parameter: zero amounts, out-of-range ratios, insufficient balances.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("amount must be positive")]
    ZeroAmount,

    #[error("resulting value must be positive")]
    ValueNotPositive,

    #[error("ratio {value} outside [{min}, {max}]")]
    RatioOutOfRange {
        value: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("executability ages invalid: min {min_ms}ms, max {max_ms}ms")]
    InvalidExecutabilityAges { min_ms: i64, max_ms: i64 },

    #[error("keeper fee {offered} below minimum {minimum}")]
    KeeperFeeTooSmall { offered: Decimal, minimum: Decimal },

    #[error("limit thresholds invalid: lower {lower} must stay below upper {upper}")]
    InvalidThresholds { lower: Decimal, upper: Decimal },

    #[error("insufficient balance: needed {needed}, available {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    #[error("module {key} is not authorized for this operation")]
    UnauthorizedModule { key: ModuleKey },
}

/// Wrong lifecycle state: missing orders, timing windows, deleted positions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("account {0:?} has no pending order")]
    NoPendingOrder(AccountId),

    #[error("account {0:?} already has a pending order")]
    OrderPending(AccountId),

    #[error("order not yet executable until {executable_at:?}")]
    NotYetExecutable { executable_at: Timestamp },

    #[error("order expired at {expired_at:?}; cancel it instead")]
    OrderExpired { expired_at: Timestamp },

    #[error("only the order owner may cancel before expiry")]
    OrderNotExpired,

    #[error("position {0:?} not found")]
    PositionNotFound(TokenId),

    #[error("position {0:?} has no limit order")]
    NoLimitOrder(TokenId),

    #[error("position {token_id:?} is locked")]
    PositionLocked { token_id: TokenId },

    #[error("position {token_id:?} holds no lock for module {key}")]
    NotLocked { token_id: TokenId, key: ModuleKey },

    #[error("account {0:?} does not own this position")]
    NotPositionOwner(AccountId),

    #[error("module {key} is paused")]
    ModulePaused { key: ModuleKey },

    #[error("reentrant call into a mutating operation")]
    Reentrant,
}

/// Economic bound violated: slippage, skew, caps, leverage, minimums.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EconomicLimitError {
    #[error("fill price {fill} breaches limit {limit}")]
    SlippageExceeded { fill: Decimal, limit: Decimal },

    #[error("limit order thresholds not reached at price {price}")]
    LimitPriceNotReached { price: Decimal },

    #[error("skew fraction {fraction} exceeds maximum {max}")]
    SkewFractionExceeded { fraction: Decimal, max: Decimal },

    #[error("stable collateral cap {cap} exceeded")]
    CapExceeded { cap: Decimal },

    #[error("leverage {leverage} outside [{min}, {max}]")]
    LeverageOutOfBounds {
        leverage: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("margin {margin} below minimum {minimum}")]
    MarginBelowMinimum { margin: Decimal, minimum: Decimal },

    #[error("deposit {amount} below minimum {minimum}")]
    DepositBelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("received {amount} below requested minimum {minimum}")]
    MinimumOutNotMet { amount: Decimal, minimum: Decimal },

    #[error("position not liquidatable")]
    NotLiquidatable,
}

/// Price feed failure: staleness, invalid data, cross-source disagreement.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("price stale: timestamp {timestamp:?}, max age {max_age_ms}ms")]
    Stale {
        timestamp: Timestamp,
        max_age_ms: i64,
    },

    #[error("on-chain price invalid")]
    Invalid,

    #[error("source prices diverge by {diff_percent}, max {max_percent}")]
    Mismatch {
        diff_percent: Decimal,
        max_percent: Decimal,
    },

    #[error("update fee {paid} below required {required}")]
    UpdateFeeTooLow { paid: Decimal, required: Decimal },

    #[error("excess payment refund could not be delivered")]
    RefundFailed,
}

/// Post-operation bookkeeping mismatch. Always fatal, signals a defect.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantError {
    #[error("collateral net-off broken: tracked {tracked}, held {held}")]
    CollateralNet { tracked: Decimal, held: Decimal },

    #[error("stable per-share value decreased: {before} -> {after}")]
    StableSharesValue { before: Decimal, after: Decimal },

    #[error("margin mismatch: aggregate {aggregate}, position sum {sum}")]
    MarginMismatch { aggregate: Decimal, sum: Decimal },
}

/// Top-level error for every fallible core operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("state: {0}")]
    State(#[from] StateError),

    #[error("economic limit: {0}")]
    EconomicLimit(#[from] EconomicLimitError),

    #[error("oracle: {0}")]
    Oracle(#[from] OracleError),

    #[error("invariant: {0}")]
    Invariant(#[from] InvariantError),
}

impl CoreError {
    /// Invariant violations are defects; everything else is a rejected request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Invariant(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn categories_convert_into_core_error() {
        let err: CoreError = ValidationError::ZeroAmount.into();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(!err.is_fatal());

        let err: CoreError = InvariantError::CollateralNet {
            tracked: dec!(1),
            held: dec!(2),
        }
        .into();
        assert!(err.is_fatal());
    }

    #[test]
    fn error_messages_name_the_breach() {
        let err = EconomicLimitError::SkewFractionExceeded {
            fraction: dec!(1.4),
            max: dec!(1.2),
        };
        assert!(err.to_string().contains("1.4"));
        assert!(err.to_string().contains("1.2"));
    }
}
