//! End-to-end lifecycle tests through the announce/execute machinery.
//!
//! Each scenario drives the market the way keepers and traders would: fund,
//! announce, wait out the executability delay, execute with a fresh price.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use synth_core::*;

const LP: AccountId = AccountId(1);
const TRADER: AccountId = AccountId(2);
const KEEPER: AccountId = AccountId(9);

fn keeper_fee() -> Collateral {
    Collateral::new(dec!(0.001))
}

fn ms(t: i64) -> Timestamp {
    Timestamp::from_millis(t)
}

/// Market with funding velocity zeroed so margin numbers are exact.
fn setup_static() -> Market {
    let mut config = MarketConfig::default();
    config.set_funding_bounds(dec!(0), dec!(0.1)).unwrap();
    let mut market = Market::new(config, OracleConfig::default(), ms(0));
    market.fund_account(LP, Collateral::new(dec!(200)));
    market.fund_account(TRADER, Collateral::new(dec!(20)));
    market.push_onchain_price(dec!(1), ms(0));
    market
}

fn deposit(market: &mut Market, account: AccountId, amount: Decimal, at: i64) {
    market
        .announce_stable_deposit(account, Collateral::new(amount), Decimal::ZERO, keeper_fee(), ms(at))
        .unwrap();
    let exec_at = at + 5_000;
    market.push_onchain_price(dec!(1), ms(exec_at - 1_000));
    market.execute_order(KEEPER, account, ms(exec_at)).unwrap();
}

fn open(
    market: &mut Market,
    margin: Decimal,
    size: Decimal,
    price: Decimal,
    at: i64,
) -> TokenId {
    market
        .announce_leverage_open(
            TRADER,
            Collateral::new(margin),
            Collateral::new(size),
            Price::new_unchecked(price),
            keeper_fee(),
            ms(at),
        )
        .unwrap();
    let exec_at = at + 5_000;
    market.push_onchain_price(price, ms(exec_at - 1_000));
    let receipt = market.execute_order(KEEPER, TRADER, ms(exec_at)).unwrap();
    match receipt.outcome {
        OrderOutcome::Opened(open) => open.token_id,
        other => panic!("expected open outcome, got {other:?}"),
    }
}

#[test]
fn deposit_open_close_scenario() {
    let mut market = setup_static();

    // empty pool, deposit 100 -> 100 shares at par
    deposit(&mut market, LP, dec!(100), 0);
    assert_eq!(market.total_shares(), dec!(100));
    assert_eq!(market.stable_collateral_per_share(), dec!(1));
    assert_eq!(market.stable_collateral_total().value(), dec!(100));

    // open long, margin 10, size 50 at price 1.0; skew fraction about -0.5
    let token = open(&mut market, dec!(10), dec!(50), dec!(1), 10_000);
    let position = market.position(token).unwrap().clone();
    assert_eq!(position.margin_deposited.value(), dec!(9.95)); // announced margin minus trade fee
    assert_eq!(position.entry_price.value(), dec!(1));
    assert_eq!(position.accrued_funding(market.cumulative_funding_rate()).value(), dec!(0));
    let fraction = market.skew_fraction(Price::new_unchecked(dec!(1)));
    assert!(fraction < dec!(-0.49) && fraction > dec!(-0.51));

    // immediately close at the same price: margin minus trade fees, no pnl
    market
        .announce_leverage_close(TRADER, token, Price::new_unchecked(dec!(1)), keeper_fee(), ms(20_000))
        .unwrap();
    market.push_onchain_price(dec!(1), ms(24_000));
    let receipt = market.execute_order(KEEPER, TRADER, ms(25_000)).unwrap();
    let closed = match receipt.outcome {
        OrderOutcome::Closed(closed) => closed,
        other => panic!("expected close outcome, got {other:?}"),
    };
    assert_eq!(closed.settled_margin.value(), dec!(9.95));
    assert_eq!(closed.payout.value(), dec!(9.9)); // close fee 0.05

    // price never moved: pool total changed only by the two trade fees
    assert_eq!(market.stable_collateral_total().value(), dec!(100.1));
    assert_eq!(market.position_count(), 0);
    assert!(market.position(token).is_none());

    // trader net: -0.05 -0.05 trade fees, -0.002 keeper fees
    assert_eq!(market.balance_of(TRADER).value(), dec!(19.898));
    // keeper collected three fees so far (deposit, open, close)
    assert_eq!(market.balance_of(KEEPER).value(), dec!(0.003));
}

#[test]
fn withdraw_returns_value_minus_fee_and_fee_stays_in_pool() {
    let mut market = setup_static();
    deposit(&mut market, LP, dec!(100), 0);

    market
        .announce_stable_withdraw(LP, dec!(40), Collateral::zero(), keeper_fee(), ms(10_000))
        .unwrap();
    market.push_onchain_price(dec!(1), ms(14_000));
    let receipt = market.execute_order(KEEPER, LP, ms(15_000)).unwrap();
    let outcome = match receipt.outcome {
        OrderOutcome::Withdrawn(w) => w,
        other => panic!("expected withdraw outcome, got {other:?}"),
    };

    assert_eq!(outcome.amount_redeemed.value(), dec!(40));
    assert_eq!(outcome.withdraw_fee.value(), dec!(0.1)); // 0.25% of 40
    assert_eq!(outcome.payout.value(), dec!(39.9));
    assert_eq!(market.total_shares(), dec!(60));
    // fee retained: per-share rises for remaining LPs
    assert_eq!(market.stable_collateral_total().value(), dec!(60.1));
    assert!(market.stable_collateral_per_share() > dec!(1));
}

#[test]
fn order_timing_windows_are_enforced() {
    let mut market = setup_static();
    market
        .announce_stable_deposit(LP, Collateral::new(dec!(50)), Decimal::ZERO, keeper_fee(), ms(0))
        .unwrap();

    // too early
    market.push_onchain_price(dec!(1), ms(2_000));
    let err = market.execute_order(KEEPER, LP, ms(3_000)).unwrap_err();
    assert!(matches!(err, CoreError::State(StateError::NotYetExecutable { .. })));

    // expired: window is [5s, 60s] after announce
    market.push_onchain_price(dec!(1), ms(61_000));
    let err = market.execute_order(KEEPER, LP, ms(61_001)).unwrap_err();
    assert!(matches!(err, CoreError::State(StateError::OrderExpired { .. })));

    // the slot is still occupied; a new announce is refused
    let err = market
        .announce_stable_deposit(LP, Collateral::new(dec!(10)), Decimal::ZERO, keeper_fee(), ms(62_000))
        .unwrap_err();
    assert!(matches!(err, CoreError::State(StateError::OrderPending(_))));

    // anyone may cancel an expired order; escrow goes back to the owner
    let balance_before = market.balance_of(LP);
    let refunded = market.cancel_order(KEEPER, LP, ms(62_000)).unwrap();
    assert_eq!(refunded.value(), dec!(50.001));
    assert_eq!(market.balance_of(LP).value(), balance_before.value() + dec!(50.001));
    assert!(market.pending_order(LP).is_none());
}

#[test]
fn only_owner_cancels_before_expiry() {
    let mut market = setup_static();
    market
        .announce_stable_deposit(LP, Collateral::new(dec!(50)), Decimal::ZERO, keeper_fee(), ms(0))
        .unwrap();

    let err = market.cancel_order(KEEPER, LP, ms(10_000)).unwrap_err();
    assert!(matches!(err, CoreError::State(StateError::OrderNotExpired)));

    market.cancel_order(LP, LP, ms(10_000)).unwrap();
    assert!(market.pending_order(LP).is_none());
}

#[test]
fn execution_price_must_postdate_announcement() {
    let mut market = setup_static();
    // last push at t=0, announce at t=1000
    market
        .announce_stable_deposit(LP, Collateral::new(dec!(50)), Decimal::ZERO, keeper_fee(), ms(1_000))
        .unwrap();

    // at t=6000 the only price round predates the announcement
    let err = market.execute_order(KEEPER, LP, ms(6_000)).unwrap_err();
    assert!(matches!(err, CoreError::Oracle(OracleError::Stale { .. })));

    // push a fresh round and the same execute goes through
    market.push_onchain_price(dec!(1), ms(5_500));
    market.execute_order(KEEPER, LP, ms(6_000)).unwrap();
}

#[test]
fn over_skew_open_fails_and_leaves_state_unchanged() {
    let mut market = setup_static();
    deposit(&mut market, LP, dec!(100), 0);

    market
        .announce_leverage_open(
            TRADER,
            Collateral::new(dec!(15)),
            Collateral::new(dec!(250)),
            Price::new_unchecked(dec!(1)),
            keeper_fee(),
            ms(10_000),
        )
        .unwrap();
    market.push_onchain_price(dec!(1), ms(14_000));

    let stable_before = market.stable_collateral_total();
    let err = market.execute_order(KEEPER, TRADER, ms(15_000)).unwrap_err();
    assert!(matches!(
        err,
        CoreError::EconomicLimit(EconomicLimitError::SkewFractionExceeded { .. })
    ));

    // nothing committed: no position, totals untouched, order still pending
    assert_eq!(market.position_count(), 0);
    assert_eq!(market.stable_collateral_total(), stable_before);
    assert!(market.pending_order(TRADER).is_some());

    // the trader walks away whole after cancelling
    market.cancel_order(TRADER, TRADER, ms(16_000)).unwrap();
    assert_eq!(market.balance_of(TRADER).value(), dec!(20));
}

#[test]
fn adjust_grows_position_and_pays_margin_back_out() {
    let mut market = setup_static();
    deposit(&mut market, LP, dec!(100), 0);
    let token = open(&mut market, dec!(10), dec!(50), dec!(1), 10_000);

    // grow by 25 at a higher price; add 5 margin
    market
        .announce_leverage_adjust(
            TRADER,
            token,
            Collateral::new(dec!(5)),
            Collateral::new(dec!(25)),
            Price::new_unchecked(dec!(1.2)),
            keeper_fee(),
            ms(20_000),
        )
        .unwrap();
    market.push_onchain_price(dec!(1.2), ms(24_000));
    market.execute_order(KEEPER, TRADER, ms(25_000)).unwrap();

    let position = market.position(token).unwrap().clone();
    assert_eq!(position.additional_size.value(), dec!(75));
    // weighted entry (50*1 + 25*1.2) / 75, floored at 18 digits
    assert_eq!(position.entry_price.value(), dec!(1.066666666666666666));
    // 9.95 + 5 - 0.025 adjust fee
    assert_eq!(position.margin_deposited.value(), dec!(14.925));

    // now pull 3 margin back out, no size change
    let balance_before = market.balance_of(TRADER);
    market
        .announce_leverage_adjust(
            TRADER,
            token,
            Collateral::new(dec!(-3)),
            Collateral::zero(),
            Price::new_unchecked(dec!(1.2)),
            keeper_fee(),
            ms(30_000),
        )
        .unwrap();
    market.push_onchain_price(dec!(1.2), ms(34_000));
    market.execute_order(KEEPER, TRADER, ms(35_000)).unwrap();

    let position = market.position(token).unwrap().clone();
    assert_eq!(position.margin_deposited.value(), dec!(11.925));
    assert_eq!(
        market.balance_of(TRADER).value(),
        balance_before.value() - keeper_fee().value() + dec!(3)
    );
}

#[test]
fn funding_moves_value_from_longs_to_stable_when_skew_positive() {
    let mut market = Market::new(MarketConfig::default(), OracleConfig::default(), ms(0));
    market.fund_account(LP, Collateral::new(dec!(200)));
    market.fund_account(TRADER, Collateral::new(dec!(20)));
    market.push_onchain_price(dec!(1), ms(0));

    deposit(&mut market, LP, dec!(100), 0);
    let _token = open(&mut market, dec!(12), dec!(150), dec!(1), 10_000);

    // skew fraction about +0.5 saturates velocity at +0.03/day
    let margin_before = market.margin_deposited_total().value();
    let stable_before = market.stable_collateral_total().value();

    // one full day later
    let later = 15_000 + 86_400_000;
    market.push_onchain_price(dec!(1), ms(later));
    let settlement = market.settle_funding(ms(later)).unwrap();

    assert!(settlement.unrecorded > Decimal::ZERO);
    let paid = settlement.transferred.value();
    assert!(paid > Decimal::ZERO);
    // conservation: longs pay exactly what the stable side receives
    assert_eq!(market.margin_deposited_total().value(), margin_before - paid);
    assert_eq!(market.stable_collateral_total().value(), stable_before + paid);

    // velocity-bounded: the rate moved at most 0.03 in one day, so the
    // trapezoidal accrual stays under the half-rate envelope
    assert!(settlement.current_rate <= dec!(0.03));
    assert!(settlement.unrecorded <= dec!(0.015));
}

#[test]
fn liquidation_flow_and_repeat_fails() {
    let mut market = setup_static();
    deposit(&mut market, LP, dec!(100), 0);
    // 25x long: margin 2, size 50 at price 1.0 -> margin after fee 1.95
    let token = open(&mut market, dec!(2), dec!(50), dec!(1), 10_000);

    // healthy at entry
    assert!(!market.can_liquidate(token, ms(15_000)).unwrap());
    let err = market.liquidate(KEEPER, token, ms(15_000)).unwrap_err();
    assert!(matches!(
        err,
        CoreError::EconomicLimit(EconomicLimitError::NotLiquidatable)
    ));

    // drop to 0.966: pnl = 50 * -0.034 = -1.7, settled = 0.25 = maintenance
    market.push_onchain_price(dec!(0.966), ms(20_000));
    assert!(market.can_liquidate(token, ms(20_000)).unwrap());

    let keeper_before = market.balance_of(KEEPER);
    let receipt = market.liquidate(KEEPER, token, ms(20_000)).unwrap();
    assert_eq!(receipt.settled_margin.value(), dec!(0.25));
    // fee clamp floor is 1 USD > remaining margin, so the fee takes it all
    assert_eq!(receipt.fee.value(), dec!(0.25));
    assert_eq!(receipt.remainder.value(), dec!(0));
    assert_eq!(
        market.balance_of(KEEPER).value(),
        keeper_before.value() + dec!(0.25)
    );

    assert!(market.position(token).is_none());
    assert_eq!(market.position_count(), 0);

    // a second liquidation on the same id is a state error
    let err = market.liquidate(KEEPER, token, ms(20_001)).unwrap_err();
    assert!(matches!(
        err,
        CoreError::State(StateError::PositionNotFound(_))
    ));
    assert!(!market.can_liquidate(token, ms(20_001)).unwrap());
}

#[test]
fn limit_close_triggers_only_beyond_thresholds() {
    let mut market = setup_static();
    deposit(&mut market, LP, dec!(100), 0);
    let token = open(&mut market, dec!(10), dec!(50), dec!(1), 10_000);

    market
        .announce_limit_close(
            TRADER,
            token,
            Price::new_unchecked(dec!(0.9)),
            Price::new_unchecked(dec!(1.1)),
            keeper_fee(),
            ms(20_000),
        )
        .unwrap();
    assert!(market.is_locked_by(token, ModuleKey::OrderExecution));

    // transfer is blocked while the limit order holds the position
    let err = market
        .transfer_position(TRADER, AccountId(5), token, ms(21_000))
        .unwrap_err();
    assert!(matches!(err, CoreError::State(StateError::PositionLocked { .. })));

    // inside the band: not triggered
    market.push_onchain_price(dec!(1.05), ms(26_000));
    let err = market.execute_limit_order(KEEPER, token, ms(26_500)).unwrap_err();
    assert!(matches!(
        err,
        CoreError::EconomicLimit(EconomicLimitError::LimitPriceNotReached { .. })
    ));
    assert!(market.limit_order(token).is_some());

    // take-profit side triggers
    market.push_onchain_price(dec!(1.12), ms(27_000));
    let receipt = market.execute_limit_order(KEEPER, token, ms(27_500)).unwrap();
    assert_eq!(receipt.kind, OrderKind::LimitClose);
    assert!(market.position(token).is_none());
    assert!(market.limit_order(token).is_none());
}

#[test]
fn reannouncing_a_limit_close_updates_in_place() {
    let mut market = setup_static();
    deposit(&mut market, LP, dec!(100), 0);
    let token = open(&mut market, dec!(10), dec!(50), dec!(1), 10_000);

    market
        .announce_limit_close(
            TRADER,
            token,
            Price::new_unchecked(dec!(0.9)),
            Price::new_unchecked(dec!(1.1)),
            keeper_fee(),
            ms(20_000),
        )
        .unwrap();
    market
        .announce_limit_close(
            TRADER,
            token,
            Price::new_unchecked(dec!(0.8)),
            Price::new_unchecked(dec!(1.3)),
            keeper_fee(),
            ms(21_000),
        )
        .unwrap();

    let order = market.limit_order(token).unwrap();
    assert_eq!(order.price_lower_threshold.value(), dec!(0.8));
    assert_eq!(order.price_upper_threshold.value(), dec!(1.3));
    // only one keeper fee remains escrowed for this slot
    assert_eq!(market.escrow_total().value(), keeper_fee().value());

    // cancelling releases the hold and refunds the fee
    let balance_before = market.balance_of(TRADER);
    market.cancel_limit_order(TRADER, token, ms(22_000)).unwrap();
    assert!(!market.is_locked(token));
    assert_eq!(
        market.balance_of(TRADER).value(),
        balance_before.value() + keeper_fee().value()
    );
}

#[test]
fn keeper_race_has_exactly_one_winner() {
    let mut market = setup_static();
    market
        .announce_stable_deposit(LP, Collateral::new(dec!(50)), Decimal::ZERO, keeper_fee(), ms(0))
        .unwrap();
    market.push_onchain_price(dec!(1), ms(4_000));

    market.execute_order(KEEPER, LP, ms(5_000)).unwrap();
    // the second keeper finds the slot already resolved
    let err = market.execute_order(AccountId(8), LP, ms(5_000)).unwrap_err();
    assert!(matches!(err, CoreError::State(StateError::NoPendingOrder(_))));
}
