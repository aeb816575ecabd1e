// 7.0 oracle.rs: validated collateral price from two independent sources.
// the on-chain push source must always answer; the off-chain pull source is
// optional and only used when its data passes validity checks. when both are
// valid the fresher timestamp wins.

use crate::errors::{CoreError, OracleError};
use crate::types::{AccountId, Collateral, Price, Timestamp};
use crate::vault::CollateralVault;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    // Staleness bound of the push source itself
    pub onchain_max_age_ms: i64,
    // Staleness bound of the pull source itself
    pub offchain_max_age_ms: i64,
    // price / confidence must be at least this for the pull source to count
    pub min_confidence_ratio: Decimal,
    // Maximum relative divergence between valid sources
    pub max_diff_percent: Decimal,
    // Identifier the pull payload must carry
    pub price_id: u64,
    // Fee required per pull-source update
    pub update_fee: Decimal,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            onchain_max_age_ms: 90_000,
            offchain_max_age_ms: 30_000,
            min_confidence_ratio: dec!(1000),
            max_diff_percent: dec!(0.01),
            price_id: 1,
            update_fee: dec!(0.0001),
        }
    }
}

// Push source state: latest (answer, updated_at) pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnchainFeed {
    pub answer: Decimal,
    pub updated_at: Timestamp,
}

/// Signed pull-source payload: integer mantissa with exponent, plus a
/// confidence interval in the same scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OffchainPriceUpdate {
    pub price_id: u64,
    pub price: i64,
    pub conf: i64,
    pub expo: i32,
    pub publish_time: Timestamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OffchainFeed {
    latest: Option<OffchainPriceUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Oracle {
    pub config: OracleConfig,
    onchain: OnchainFeed,
    offchain: OffchainFeed,
}

impl Oracle {
    pub fn new(config: OracleConfig) -> Self {
        Self {
            config,
            onchain: OnchainFeed::default(),
            offchain: OffchainFeed::default(),
        }
    }

    /// Record a push-source round. Stand-in for the always-on feed.
    pub fn push_onchain_price(&mut self, answer: Decimal, updated_at: Timestamp) {
        self.onchain = OnchainFeed { answer, updated_at };
    }

    /// Apply a pull-source payload, charging the update fee from `payment` and
    /// refunding the excess to the submitter. The refund is credited before
    /// returning; an undeliverable refund would surface as an error here, never
    /// silently dropped.
    pub fn update_offchain_price(
        &mut self,
        vault: &mut CollateralVault,
        submitter: AccountId,
        payload: OffchainPriceUpdate,
        payment: Collateral,
    ) -> Result<Collateral, CoreError> {
        if payload.price_id != self.config.price_id {
            return Err(OracleError::Invalid.into());
        }
        if payment.value() < self.config.update_fee {
            return Err(OracleError::UpdateFeeTooLow {
                paid: payment.value(),
                required: self.config.update_fee,
            }
            .into());
        }

        // take the full payment up front, as the payable call would
        vault.consume(submitter, payment)?;

        let newer = match &self.offchain.latest {
            Some(current) => payload.publish_time > current.publish_time,
            None => true,
        };
        if newer {
            self.offchain.latest = Some(payload);
        }

        let refund = Collateral::new(payment.value() - self.config.update_fee);
        if refund.is_positive() {
            vault.fund_account(submitter, refund);
        }
        Ok(refund)
    }

    fn offchain_valid(&self, now: Timestamp) -> Option<(Price, Timestamp)> {
        let data = self.offchain.latest.as_ref()?;
        if data.price <= 0 || data.expo >= 0 {
            return None;
        }
        let scale = (-data.expo) as u32;
        if scale > 28 {
            return None;
        }
        let price = Decimal::new(data.price, scale);
        if data.conf > 0 {
            let conf = Decimal::new(data.conf, scale);
            if price / conf < self.config.min_confidence_ratio {
                return None;
            }
        }
        if data.publish_time.age_millis(now) > self.config.offchain_max_age_ms {
            return None;
        }
        Some((Price::new_unchecked(price), data.publish_time))
    }

    /// Validated price, no older than `max_age_ms` relative to `now`.
    ///
    /// The push source is mandatory: its own staleness or invalidity is a hard
    /// failure regardless of the pull source. With both sources valid and
    /// `price_diff_check` set, a divergence beyond `max_diff_percent` fails.
    pub fn get_price(
        &self,
        now: Timestamp,
        max_age_ms: i64,
        price_diff_check: bool,
    ) -> Result<(Price, Timestamp), OracleError> {
        if self.onchain.answer <= Decimal::ZERO {
            return Err(OracleError::Invalid);
        }
        if self.onchain.updated_at.age_millis(now) > self.config.onchain_max_age_ms {
            return Err(OracleError::Stale {
                timestamp: self.onchain.updated_at,
                max_age_ms: self.config.onchain_max_age_ms,
            });
        }
        let onchain = (Price::new_unchecked(self.onchain.answer), self.onchain.updated_at);

        let (price, timestamp) = match self.offchain_valid(now) {
            Some(offchain) => {
                if price_diff_check {
                    let a = onchain.0.value();
                    let b = offchain.0.value();
                    let diff = (a - b).abs() / a.min(b);
                    if diff > self.config.max_diff_percent {
                        return Err(OracleError::Mismatch {
                            diff_percent: diff,
                            max_percent: self.config.max_diff_percent,
                        });
                    }
                }
                // fresher source wins, pull source on ties
                if offchain.1 >= onchain.1 {
                    offchain
                } else {
                    onchain
                }
            }
            None => onchain,
        };

        if timestamp.age_millis(now) > max_age_ms {
            return Err(OracleError::Stale {
                timestamp,
                max_age_ms,
            });
        }
        Ok((price, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn oracle_at(answer: Decimal, updated_ms: i64) -> Oracle {
        let mut oracle = Oracle::new(OracleConfig::default());
        oracle.push_onchain_price(answer, Timestamp::from_millis(updated_ms));
        oracle
    }

    fn payload(price: i64, publish_ms: i64) -> OffchainPriceUpdate {
        OffchainPriceUpdate {
            price_id: 1,
            price,
            conf: 1, // price/conf far above the minimum ratio
            expo: -8,
            publish_time: Timestamp::from_millis(publish_ms),
        }
    }

    fn apply(oracle: &mut Oracle, update: OffchainPriceUpdate) {
        let mut vault = CollateralVault::new();
        let submitter = AccountId(9);
        vault.fund_account(submitter, Collateral::new(dec!(1)));
        oracle
            .update_offchain_price(&mut vault, submitter, update, Collateral::new(dec!(0.0001)))
            .unwrap();
    }

    #[test]
    fn onchain_only_returns_onchain() {
        let oracle = oracle_at(dec!(2000), 1_000);
        let (price, timestamp) = oracle
            .get_price(Timestamp::from_millis(5_000), 60_000, true)
            .unwrap();
        assert_eq!(price.value(), dec!(2000));
        assert_eq!(timestamp.as_millis(), 1_000);
    }

    #[test]
    fn stale_onchain_fails_even_with_fresh_offchain() {
        let mut oracle = oracle_at(dec!(2000), 0);
        apply(&mut oracle, payload(200_000_000_000, 100_000));

        let result = oracle.get_price(Timestamp::from_millis(100_000), 600_000, false);
        assert!(matches!(result, Err(OracleError::Stale { .. })));
    }

    #[test]
    fn non_positive_onchain_is_invalid() {
        let oracle = oracle_at(dec!(0), 1_000);
        let result = oracle.get_price(Timestamp::from_millis(1_000), 60_000, false);
        assert!(matches!(result, Err(OracleError::Invalid)));
    }

    #[test]
    fn newer_valid_source_wins() {
        let mut oracle = oracle_at(dec!(2000), 10_000);
        // 2000.5 at t=12s, within 1% of on-chain
        apply(&mut oracle, payload(200_050_000_000, 12_000));

        let (price, timestamp) = oracle
            .get_price(Timestamp::from_millis(15_000), 60_000, true)
            .unwrap();
        assert_eq!(price.value(), dec!(2000.5));
        assert_eq!(timestamp.as_millis(), 12_000);

        // push a fresher on-chain round; it should win now
        oracle.push_onchain_price(dec!(2001), Timestamp::from_millis(14_000));
        let (price, _) = oracle
            .get_price(Timestamp::from_millis(15_000), 60_000, true)
            .unwrap();
        assert_eq!(price.value(), dec!(2001));
    }

    #[test]
    fn divergent_sources_fail_when_diff_check_on() {
        let mut oracle = oracle_at(dec!(2000), 10_000);
        // 2100 is 5% away from 2000
        apply(&mut oracle, payload(210_000_000_000, 12_000));

        let result = oracle.get_price(Timestamp::from_millis(15_000), 60_000, true);
        assert!(matches!(result, Err(OracleError::Mismatch { .. })));

        // without the check the fresher (off-chain) price is used
        let (price, _) = oracle
            .get_price(Timestamp::from_millis(15_000), 60_000, false)
            .unwrap();
        assert_eq!(price.value(), dec!(2100));
    }

    #[test]
    fn wide_confidence_invalidates_offchain() {
        let mut oracle = oracle_at(dec!(2000), 10_000);
        let mut update = payload(200_000_000_000, 12_000);
        update.conf = 10_000_000_000; // ratio 20, below the 1000 minimum
        apply(&mut oracle, update);

        let (price, timestamp) = oracle
            .get_price(Timestamp::from_millis(15_000), 60_000, true)
            .unwrap();
        assert_eq!(price.value(), dec!(2000));
        assert_eq!(timestamp.as_millis(), 10_000);
    }

    #[test]
    fn caller_age_bound_applies_to_selected_price() {
        let oracle = oracle_at(dec!(2000), 10_000);
        let result = oracle.get_price(Timestamp::from_millis(40_000), 20_000, false);
        assert!(matches!(result, Err(OracleError::Stale { .. })));
    }

    #[test]
    fn update_charges_fee_and_refunds_excess() {
        let mut oracle = oracle_at(dec!(2000), 0);
        let mut vault = CollateralVault::new();
        let submitter = AccountId(3);
        vault.fund_account(submitter, Collateral::new(dec!(1)));

        let refund = oracle
            .update_offchain_price(
                &mut vault,
                submitter,
                payload(200_000_000_000, 5_000),
                Collateral::new(dec!(0.001)),
            )
            .unwrap();

        assert_eq!(refund.value(), dec!(0.0009));
        assert_eq!(vault.balance_of(submitter).value(), dec!(0.9999));
    }

    #[test]
    fn update_with_insufficient_fee_fails() {
        let mut oracle = oracle_at(dec!(2000), 0);
        let mut vault = CollateralVault::new();
        let submitter = AccountId(3);
        vault.fund_account(submitter, Collateral::new(dec!(1)));

        let result = oracle.update_offchain_price(
            &mut vault,
            submitter,
            payload(200_000_000_000, 5_000),
            Collateral::new(dec!(0.00001)),
        );
        assert!(matches!(
            result,
            Err(CoreError::Oracle(OracleError::UpdateFeeTooLow { .. }))
        ));
    }

    #[test]
    fn older_payload_does_not_overwrite_newer() {
        let mut oracle = oracle_at(dec!(2000), 10_000);
        apply(&mut oracle, payload(200_050_000_000, 12_000));
        apply(&mut oracle, payload(199_000_000_000, 11_000)); // older, ignored

        let (price, _) = oracle
            .get_price(Timestamp::from_millis(15_000), 60_000, true)
            .unwrap();
        assert_eq!(price.value(), dec!(2000.5));
    }
}
