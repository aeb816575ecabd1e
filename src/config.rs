// 4.0 config.rs: all settings in one place. leverage bounds, fees, executability
// windows, funding bounds, liquidation ratios, oracle limits.
// owner-level setters validate before touching anything.

use crate::errors::ValidationError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// Funding and skew bounds. velocity is a rate-of-change per day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingParams {
    // Maximum funding-rate velocity per day
    pub max_funding_velocity: Decimal,
    // Proportional skew at which velocity saturates
    pub max_velocity_skew: Decimal,
    // Maximum skew fraction after exposure-increasing operations
    pub skew_fraction_max: Decimal,
    // Global cap on stable collateral
    pub stable_collateral_cap: Decimal,
}

impl Default for FundingParams {
    fn default() -> Self {
        Self {
            max_funding_velocity: dec!(0.03),
            max_velocity_skew: dec!(0.1),
            skew_fraction_max: dec!(1.2),
            stable_collateral_cap: dec!(1_000_000),
        }
    }
}

/** 4.1: liquidation thresholds. fee bounds are USD-denominated, converted at
the liquidation price. */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationParams {
    // Maintenance buffer as a fraction of position size
    pub buffer_ratio: Decimal,
    // Fee as a fraction of notional
    pub fee_ratio: Decimal,
    // Fee clamp bounds in price units
    pub fee_lower_bound: Decimal,
    pub fee_upper_bound: Decimal,
    // Maximum price staleness for liquidation, in milliseconds
    pub max_price_age_ms: i64,
}

impl Default for LiquidationParams {
    fn default() -> Self {
        Self {
            buffer_ratio: dec!(0.005),
            fee_ratio: dec!(0.002),
            fee_lower_bound: dec!(1),
            fee_upper_bound: dec!(100),
            max_price_age_ms: 60_000,
        }
    }
}

// Complete configuration for one market deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    // Human readable market name
    pub name: String,
    // Collateral asset symbol (the synthetic side tracks its price)
    pub collateral_asset: String,
    // Leverage bounds for positions, size / margin
    pub leverage_min: Decimal,
    pub leverage_max: Decimal,
    // Minimum margin per position
    pub margin_min: Decimal,
    // Trade fee as a fraction of size, credited to the stable side
    pub trade_fee_rate: Decimal,
    // Withdraw fee as a fraction of redeemed value, retained by the pool
    pub withdraw_fee_rate: Decimal,
    // Minimum stable deposit
    pub min_deposit: Decimal,
    // Floor on the keeper fee escrowed at announce
    pub min_keeper_fee: Decimal,
    // Announce/execute window bounds in milliseconds
    pub min_executability_age_ms: i64,
    pub max_executability_age_ms: i64,
    pub funding: FundingParams,
    pub liquidation: LiquidationParams,
    // Tolerance for the collateral net-off and margin-sum invariants
    pub invariant_tolerance: Decimal,
    // Maximum number of events retained in memory
    pub max_events: usize,
    // Echo events as they are emitted
    pub verbose: bool,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            name: "Synthetic Market".to_string(),
            collateral_asset: "rETH".to_string(),
            leverage_min: dec!(1.5),
            leverage_max: dec!(25),
            margin_min: dec!(0.05),
            trade_fee_rate: dec!(0.001),
            withdraw_fee_rate: dec!(0.0025),
            min_deposit: dec!(0.01),
            min_keeper_fee: dec!(0.0001),
            min_executability_age_ms: 5_000,
            max_executability_age_ms: 60_000,
            funding: FundingParams::default(),
            liquidation: LiquidationParams::default(),
            invariant_tolerance: dec!(0.000001),
            max_events: 100_000,
            verbose: false,
        }
    }
}

fn check_ratio(value: Decimal, min: Decimal, max: Decimal) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::RatioOutOfRange { value, min, max });
    }
    Ok(())
}

impl MarketConfig {
    pub fn set_leverage_bounds(&mut self, min: Decimal, max: Decimal) -> Result<(), ValidationError> {
        if min < Decimal::ONE || max <= min {
            return Err(ValidationError::RatioOutOfRange {
                value: min,
                min: Decimal::ONE,
                max,
            });
        }
        self.leverage_min = min;
        self.leverage_max = max;
        Ok(())
    }

    pub fn set_trade_fee_rate(&mut self, rate: Decimal) -> Result<(), ValidationError> {
        check_ratio(rate, Decimal::ZERO, dec!(0.1))?;
        self.trade_fee_rate = rate;
        Ok(())
    }

    pub fn set_withdraw_fee_rate(&mut self, rate: Decimal) -> Result<(), ValidationError> {
        check_ratio(rate, Decimal::ZERO, dec!(0.1))?;
        self.withdraw_fee_rate = rate;
        Ok(())
    }

    pub fn set_executability_ages(&mut self, min_ms: i64, max_ms: i64) -> Result<(), ValidationError> {
        if min_ms <= 0 || max_ms <= min_ms {
            return Err(ValidationError::InvalidExecutabilityAges { min_ms, max_ms });
        }
        self.min_executability_age_ms = min_ms;
        self.max_executability_age_ms = max_ms;
        Ok(())
    }

    pub fn set_funding_bounds(
        &mut self,
        max_velocity: Decimal,
        max_velocity_skew: Decimal,
    ) -> Result<(), ValidationError> {
        check_ratio(max_velocity, Decimal::ZERO, dec!(1))?;
        if max_velocity_skew <= Decimal::ZERO {
            return Err(ValidationError::ZeroAmount);
        }
        self.funding.max_funding_velocity = max_velocity;
        self.funding.max_velocity_skew = max_velocity_skew;
        Ok(())
    }

    pub fn set_skew_fraction_max(&mut self, max: Decimal) -> Result<(), ValidationError> {
        if max <= Decimal::ZERO {
            return Err(ValidationError::ZeroAmount);
        }
        self.funding.skew_fraction_max = max;
        Ok(())
    }

    pub fn set_stable_collateral_cap(&mut self, cap: Decimal) -> Result<(), ValidationError> {
        if cap <= Decimal::ZERO {
            return Err(ValidationError::ZeroAmount);
        }
        self.funding.stable_collateral_cap = cap;
        Ok(())
    }

    pub fn set_liquidation_ratios(
        &mut self,
        buffer_ratio: Decimal,
        fee_ratio: Decimal,
    ) -> Result<(), ValidationError> {
        check_ratio(buffer_ratio, Decimal::ZERO, dec!(0.5))?;
        check_ratio(fee_ratio, Decimal::ZERO, dec!(0.1))?;
        self.liquidation.buffer_ratio = buffer_ratio;
        self.liquidation.fee_ratio = fee_ratio;
        Ok(())
    }

    // Window length available to keepers once an order becomes executable.
    pub fn execution_window_ms(&self) -> i64 {
        self.max_executability_age_ms - self.min_executability_age_ms
    }
}
