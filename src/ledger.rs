// 9.0 ledger.rs: the single authoritative state object. stable collateral total,
// aggregate long exposure, the funding-rate integral, and the position records.
// mutators are capability-gated through the module registry; the funding settle
// must run before any skew-sensitive check or position mutation.

use crate::config::FundingParams;
use crate::errors::{CoreError, EconomicLimitError, StateError};
use crate::fixed;
use crate::position::Position;
use crate::registry::ModuleRegistry;
use crate::types::{Collateral, ModuleKey, Price, Timestamp, TokenId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Aggregate of every open leveraged position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalPositions {
    pub size_opened_total: Collateral,
    pub margin_deposited_total: Collateral,
    pub last_price: Decimal,
    // cumulative funding per unit of size since genesis
    pub cumulative_funding_rate: Decimal,
    pub last_recomputed_funding_rate: Decimal,
    pub last_recomputed_time: Timestamp,
}

impl GlobalPositions {
    fn new(genesis: Timestamp) -> Self {
        Self {
            size_opened_total: Collateral::zero(),
            margin_deposited_total: Collateral::zero(),
            last_price: Decimal::ZERO,
            cumulative_funding_rate: Decimal::ZERO,
            last_recomputed_funding_rate: Decimal::ZERO,
            last_recomputed_time: genesis,
        }
    }
}

/// Outcome of one funding settlement.
#[derive(Debug, Clone, Copy)]
pub struct FundingSettlement {
    // index delta integrated over the elapsed interval
    pub unrecorded: Decimal,
    // collateral moved from the long side to the stable side (signed)
    pub transferred: Collateral,
    pub current_rate: Decimal,
    pub cumulative_funding_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalLedger {
    pub stable_collateral_total: Collateral,
    pub global_positions: GlobalPositions,
    positions: BTreeMap<TokenId, Position>,
}

fn clamp(value: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    value.max(lo).min(hi)
}

impl GlobalLedger {
    pub fn new(genesis: Timestamp) -> Self {
        Self {
            stable_collateral_total: Collateral::zero(),
            global_positions: GlobalPositions::new(genesis),
            positions: BTreeMap::new(),
        }
    }

    // 9.1: position record access. mutation goes through the gated setters.

    pub fn position(&self, token_id: TokenId) -> Option<&Position> {
        self.positions.get(&token_id)
    }

    pub fn positions_iter(&self) -> impl Iterator<Item = (&TokenId, &Position)> {
        self.positions.iter()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn set_position(
        &mut self,
        registry: &ModuleRegistry,
        key: ModuleKey,
        token_id: TokenId,
        position: Position,
    ) -> Result<(), CoreError> {
        registry.ensure_active(key)?;
        self.positions.insert(token_id, position);
        Ok(())
    }

    pub fn delete_position(
        &mut self,
        registry: &ModuleRegistry,
        key: ModuleKey,
        token_id: TokenId,
    ) -> Result<Position, CoreError> {
        registry.ensure_active(key)?;
        self.positions
            .remove(&token_id)
            .ok_or_else(|| StateError::PositionNotFound(token_id).into())
    }

    pub fn update_stable_collateral_total(
        &mut self,
        registry: &ModuleRegistry,
        key: ModuleKey,
        delta: Collateral,
    ) -> Result<(), CoreError> {
        registry.ensure_active(key)?;
        self.stable_collateral_total = self.stable_collateral_total.add(delta);
        Ok(())
    }

    pub fn update_global_position_data(
        &mut self,
        registry: &ModuleRegistry,
        key: ModuleKey,
        price: Price,
        margin_delta: Collateral,
        size_delta: Collateral,
    ) -> Result<(), CoreError> {
        registry.ensure_active(key)?;
        let aggregate = &mut self.global_positions;
        aggregate.margin_deposited_total = aggregate.margin_deposited_total.add(margin_delta);
        aggregate.size_opened_total = aggregate.size_opened_total.add(size_delta);
        aggregate.last_price = price.value();
        Ok(())
    }

    // 9.2: skew. imbalance between long notional and stable collateral as a
    // fraction of stable collateral.

    pub fn skew(&self, price: Price) -> Decimal {
        fixed::mul(self.global_positions.size_opened_total.value(), price.value())
            - self.stable_collateral_total.value()
    }

    pub fn skew_fraction(&self, price: Price) -> Decimal {
        self.skew_fraction_with(price, Collateral::zero(), Collateral::zero())
    }

    fn proportional_skew(&self, price: Price) -> Decimal {
        clamp(self.skew_fraction(price), dec!(-1), dec!(1))
    }

    /// Skew fraction as it would stand after applying the given deltas. Used
    /// to reject an operation before any state is touched.
    pub fn skew_fraction_with(
        &self,
        price: Price,
        size_delta: Collateral,
        stable_delta: Collateral,
    ) -> Decimal {
        let stable = self.stable_collateral_total.value() + stable_delta.value();
        let size = self.global_positions.size_opened_total.value() + size_delta.value();
        if stable <= Decimal::ZERO {
            return if size > Decimal::ZERO {
                Decimal::MAX
            } else {
                Decimal::ZERO
            };
        }
        fixed::div(fixed::mul(size, price.value()) - stable, stable)
    }

    pub fn check_skew_max(&self, price: Price, params: &FundingParams) -> Result<(), CoreError> {
        self.check_skew_max_with(price, params, Collateral::zero(), Collateral::zero())
    }

    pub fn check_skew_max_with(
        &self,
        price: Price,
        params: &FundingParams,
        size_delta: Collateral,
        stable_delta: Collateral,
    ) -> Result<(), CoreError> {
        let fraction = self.skew_fraction_with(price, size_delta, stable_delta);
        if fraction > params.skew_fraction_max {
            return Err(EconomicLimitError::SkewFractionExceeded {
                fraction,
                max: params.skew_fraction_max,
            }
            .into());
        }
        Ok(())
    }

    // 9.3: funding. the rate's velocity is proportional to skew, saturating at
    // max_velocity_skew, and bounded by max_funding_velocity per day.

    pub fn funding_velocity(&self, price: Price, params: &FundingParams) -> Decimal {
        let target = clamp(
            self.proportional_skew(price) / params.max_velocity_skew,
            dec!(-1),
            dec!(1),
        );
        fixed::mul(target, params.max_funding_velocity)
    }

    /// Rate after integrating the current velocity over the time since the
    /// last recompute. Read-only companion of `settle_funding_fees`.
    pub fn current_funding_rate(&self, now: Timestamp, price: Price, params: &FundingParams) -> Decimal {
        let elapsed = self.global_positions.last_recomputed_time.elapsed_days(&now);
        self.global_positions.last_recomputed_funding_rate
            + fixed::mul(self.funding_velocity(price, params), elapsed)
    }

    /// Cumulative index as it would stand if funding settled at `now`. Views
    /// use this so margin checks see accruals the ledger has not recorded yet.
    pub fn cumulative_funding_rate_at(
        &self,
        now: Timestamp,
        price: Price,
        params: &FundingParams,
    ) -> Decimal {
        let elapsed = self.global_positions.last_recomputed_time.elapsed_days(&now);
        let previous = self.global_positions.last_recomputed_funding_rate;
        let current = self.current_funding_rate(now, price, params);
        self.global_positions.cumulative_funding_rate
            + fixed::mul((previous + current) / dec!(2), elapsed)
    }

    /// Integrate unrecorded funding since the last recompute into the
    /// cumulative index and move the owed collateral between the long side
    /// and the stable side.
    ///
    /// Trapezoidal rule: the rate moves linearly across the interval, so the
    /// index picks up the average of the entry and exit rates times elapsed
    /// time. The transfer carries a one-unit bias toward the stable side.
    pub fn settle_funding_fees(
        &mut self,
        now: Timestamp,
        price: Price,
        params: &FundingParams,
    ) -> FundingSettlement {
        let aggregate = &self.global_positions;
        let elapsed = aggregate.last_recomputed_time.elapsed_days(&now);
        let previous_rate = aggregate.last_recomputed_funding_rate;

        let current_rate = previous_rate + fixed::mul(self.funding_velocity(price, params), elapsed);
        let unrecorded = fixed::mul((previous_rate + current_rate) / dec!(2), elapsed);
        let transferred = Collateral::new(fixed::bias_toward_stable(fixed::mul(
            unrecorded,
            self.global_positions.size_opened_total.value(),
        )));

        let aggregate = &mut self.global_positions;
        aggregate.cumulative_funding_rate += unrecorded;
        aggregate.last_recomputed_funding_rate = current_rate;
        aggregate.last_recomputed_time = now;
        aggregate.margin_deposited_total = aggregate.margin_deposited_total.sub(transferred);
        self.stable_collateral_total = self.stable_collateral_total.add(transferred);

        FundingSettlement {
            unrecorded,
            transferred,
            current_rate,
            cumulative_funding_rate: self.global_positions.cumulative_funding_rate,
        }
    }

    /// Sum of per-position margins with pending funding applied. Reconciled
    /// against `margin_deposited_total` by the invariant guard; the funding
    /// bias leaves bounded dust between the two.
    pub fn position_margin_sum(&self) -> Collateral {
        let index = self.global_positions.cumulative_funding_rate;
        self.positions
            .values()
            .map(|p| p.margin_deposited.add(p.accrued_funding(index)))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> FundingParams {
        FundingParams::default()
    }

    fn day_ms(days: i64) -> Timestamp {
        Timestamp::from_millis(days * 86_400_000)
    }

    fn seeded_ledger(stable: Decimal, size: Decimal) -> GlobalLedger {
        let mut ledger = GlobalLedger::new(Timestamp::from_millis(0));
        ledger.stable_collateral_total = Collateral::new(stable);
        ledger.global_positions.size_opened_total = Collateral::new(size);
        ledger
    }

    #[test]
    fn skew_fraction_matches_definition() {
        let ledger = seeded_ledger(dec!(100), dec!(50));
        let price = Price::new_unchecked(dec!(1));
        // (50 * 1 - 100) / 100
        assert_eq!(ledger.skew_fraction(price), dec!(-0.5));
    }

    #[test]
    fn skew_with_no_stable_collateral_is_saturated() {
        let ledger = seeded_ledger(dec!(0), dec!(10));
        let price = Price::new_unchecked(dec!(1));
        assert!(ledger.check_skew_max(price, &params()).is_err());

        let empty = seeded_ledger(dec!(0), dec!(0));
        assert_eq!(empty.skew_fraction(price), Decimal::ZERO);
        assert!(empty.check_skew_max(price, &params()).is_ok());
    }

    #[test]
    fn velocity_saturates_at_max_velocity_skew() {
        // skew fraction 0.5 with max_velocity_skew 0.1: saturated
        let ledger = seeded_ledger(dec!(100), dec!(150));
        let price = Price::new_unchecked(dec!(1));
        assert_eq!(ledger.funding_velocity(price, &params()), dec!(0.03));

        // short side skew saturates to the negative bound
        let ledger = seeded_ledger(dec!(100), dec!(50));
        assert_eq!(ledger.funding_velocity(price, &params()), dec!(-0.03));
    }

    #[test]
    fn zero_skew_zero_rate_means_zero_drift() {
        let mut ledger = seeded_ledger(dec!(100), dec!(100));
        let price = Price::new_unchecked(dec!(1));

        let settlement = ledger.settle_funding_fees(day_ms(3), price, &params());
        assert_eq!(settlement.unrecorded, Decimal::ZERO);
        assert_eq!(settlement.transferred.value(), Decimal::ZERO);
        assert_eq!(ledger.stable_collateral_total.value(), dec!(100));
        assert_eq!(ledger.global_positions.margin_deposited_total.value(), dec!(0));
    }

    #[test]
    fn trapezoidal_accrual_over_one_day() {
        // skew fraction +0.5 saturates velocity at +0.03/day
        let mut ledger = seeded_ledger(dec!(100), dec!(150));
        ledger.global_positions.margin_deposited_total = Collateral::new(dec!(20));
        let price = Price::new_unchecked(dec!(1));

        let settlement = ledger.settle_funding_fees(day_ms(1), price, &params());

        // rate 0 -> 0.03, average 0.015 over one day
        assert_eq!(settlement.current_rate, dec!(0.03));
        assert_eq!(settlement.unrecorded, dec!(0.015));

        // longs pay 150 * 0.015 plus the one-unit bias
        let expected = dec!(2.25) + fixed::unit();
        assert_eq!(settlement.transferred.value(), expected);
        assert_eq!(ledger.stable_collateral_total.value(), dec!(100) + expected);
        assert_eq!(
            ledger.global_positions.margin_deposited_total.value(),
            dec!(20) - expected
        );
    }

    #[test]
    fn funding_transfer_is_conservative() {
        let mut ledger = seeded_ledger(dec!(100), dec!(150));
        ledger.global_positions.margin_deposited_total = Collateral::new(dec!(20));
        let price = Price::new_unchecked(dec!(1));
        let sum_before = ledger.stable_collateral_total.value()
            + ledger.global_positions.margin_deposited_total.value();

        ledger.settle_funding_fees(day_ms(2), price, &params());
        ledger.settle_funding_fees(day_ms(5), price, &params());

        let sum_after = ledger.stable_collateral_total.value()
            + ledger.global_positions.margin_deposited_total.value();
        assert_eq!(sum_before, sum_after);
    }

    #[test]
    fn rate_persists_once_skew_returns_to_zero() {
        let mut ledger = seeded_ledger(dec!(100), dec!(150));
        let price = Price::new_unchecked(dec!(1));
        ledger.settle_funding_fees(day_ms(1), price, &params());
        let rate = ledger.global_positions.last_recomputed_funding_rate;
        assert_eq!(rate, dec!(0.03));

        // bring skew to zero; rate should hold steady, not reset
        ledger.global_positions.size_opened_total = Collateral::new(dec!(100));
        ledger.stable_collateral_total = Collateral::new(dec!(100));
        let settlement = ledger.settle_funding_fees(day_ms(2), price, &params());
        assert_eq!(settlement.current_rate, rate);
        // a full day at rate 0.03 accrues 0.03 onto the index
        assert_eq!(settlement.unrecorded, dec!(0.03));
    }

    #[test]
    fn gated_mutators_require_registered_key() {
        let mut ledger = GlobalLedger::new(Timestamp::from_millis(0));
        let registry = ModuleRegistry::new();

        let err = ledger
            .update_stable_collateral_total(&registry, ModuleKey::StablePool, Collateral::new(dec!(1)))
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let mut registry = ModuleRegistry::with_core_modules();
        assert!(ledger
            .update_stable_collateral_total(&registry, ModuleKey::StablePool, Collateral::new(dec!(1)))
            .is_ok());

        registry.pause(ModuleKey::StablePool).unwrap();
        let err = ledger
            .update_stable_collateral_total(&registry, ModuleKey::StablePool, Collateral::new(dec!(1)))
            .unwrap_err();
        assert!(matches!(err, CoreError::State(StateError::ModulePaused { .. })));
    }

    #[test]
    fn delete_missing_position_is_a_state_error() {
        let mut ledger = GlobalLedger::new(Timestamp::from_millis(0));
        let registry = ModuleRegistry::with_core_modules();
        let err = ledger
            .delete_position(&registry, ModuleKey::LiquidationEngine, TokenId(7))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::State(StateError::PositionNotFound(TokenId(7)))
        ));
    }
}
