// 12.0 liquidation.rs: when a position's settled margin falls to the maintenance
// requirement, anyone may force-close it for a fee. the fee is clamped in price
// units, converted to collateral at the liquidation price, and capped at the
// remaining margin so the closure itself never goes insolvent on the fee.

use crate::config::LiquidationParams;
use crate::fixed;
use crate::position::Position;
use crate::types::{Collateral, Price};
use rust_decimal::Decimal;

/// Maintenance requirement in collateral units. Comparing it against the
/// settled margin at the current price is equivalent to comparing the two
/// notional values.
pub fn maintenance_margin(position: &Position, params: &LiquidationParams) -> Collateral {
    Collateral::new(fixed::mul(
        position.additional_size.value(),
        params.buffer_ratio,
    ))
}

/// Liquidation fee in collateral units: clamp(notional * fee_ratio, lower,
/// upper) at the current price, never more than the remaining settled margin.
pub fn liquidation_fee(
    position: &Position,
    params: &LiquidationParams,
    price: Price,
    settled_margin: Collateral,
) -> Collateral {
    let notional = fixed::mul(position.additional_size.value(), price.value());
    let fee_usd = fixed::mul(notional, params.fee_ratio)
        .max(params.fee_lower_bound)
        .min(params.fee_upper_bound);
    let fee = fixed::div(fee_usd, price.value());
    Collateral::new(fee.min(settled_margin.value().max(Decimal::ZERO)))
}

/// Liquidatable iff the settled margin sits at or below the maintenance
/// requirement.
pub fn can_liquidate(
    position: &Position,
    params: &LiquidationParams,
    price: Price,
    cumulative_funding: Decimal,
) -> bool {
    let settled = position.settled_margin(price, cumulative_funding);
    settled <= maintenance_margin(position, params)
}

/// Split of a forced closure: fee to the keeper, remainder to the stable pool.
/// A negative remainder is the shortfall the pool absorbs.
#[derive(Debug, Clone, Copy)]
pub struct LiquidationSplit {
    pub settled_margin: Collateral,
    pub fee: Collateral,
    pub remainder: Collateral,
}

pub fn split_liquidation(
    position: &Position,
    params: &LiquidationParams,
    price: Price,
    cumulative_funding: Decimal,
) -> LiquidationSplit {
    let settled_margin = position.settled_margin(price, cumulative_funding);
    let fee = liquidation_fee(position, params, price, settled_margin);
    LiquidationSplit {
        settled_margin,
        fee,
        remainder: settled_margin.sub(fee),
    }
}
