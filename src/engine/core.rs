// 15.1 engine/core.rs: the Market struct. owns the ledger, book, pool, order
// store, vault and oracle as one state object, and funnels every mutation
// through a guard bracket: reentrancy flag, staged commit, invariant verify,
// event flush. a failed operation leaves no trace.

use super::orders::OrderStore;
use crate::config::MarketConfig;
use crate::errors::{CoreError, StateError};
use crate::events::{Event, EventId, EventPayload, FundingSettledEvent, OffchainPriceUpdatedEvent};
use crate::guard::{GuardScope, InvariantSnapshot};
use crate::ledger::{FundingSettlement, GlobalLedger};
use crate::oracle::{Oracle, OracleConfig, OffchainPriceUpdate};
use crate::pool::StablePool;
use crate::book::PositionBook;
use crate::registry::ModuleRegistry;
use crate::types::{AccountId, Collateral, ModuleKey, Price, Timestamp, TokenId};
use crate::vault::CollateralVault;
use rust_decimal::Decimal;

/// Everything an operation may mutate, cloned per operation so a failure
/// discards the staged copy and commits nothing.
#[derive(Debug, Clone)]
pub(super) struct CoreState {
    pub(super) ledger: GlobalLedger,
    pub(super) book: PositionBook,
    pub(super) pool: StablePool,
    pub(super) orders: OrderStore,
    pub(super) vault: CollateralVault,
    pub(super) oracle: Oracle,
}

#[derive(Debug)]
pub struct Market {
    pub(super) config: MarketConfig,
    pub(super) registry: ModuleRegistry,
    pub(super) state: CoreState,
    events: Vec<Event>,
    next_event_id: u64,
    entered: bool,
}

impl Market {
    pub fn new(config: MarketConfig, oracle_config: OracleConfig, genesis: Timestamp) -> Self {
        Self {
            config,
            registry: ModuleRegistry::with_core_modules(),
            state: CoreState {
                ledger: GlobalLedger::new(genesis),
                book: PositionBook::new(),
                pool: StablePool::new(),
                orders: OrderStore::new(),
                vault: CollateralVault::new(),
                oracle: Oracle::new(oracle_config),
            },
            events: Vec::new(),
            next_event_id: 1,
            entered: false,
        }
    }

    // 15.1.1: the guard bracket. every mutating entrypoint runs through here.
    pub(super) fn mutate<T>(
        &mut self,
        now: Timestamp,
        scope: GuardScope,
        f: impl FnOnce(
            &MarketConfig,
            &ModuleRegistry,
            &mut CoreState,
            &mut Vec<EventPayload>,
            &mut InvariantSnapshot,
        ) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        if self.entered {
            return Err(StateError::Reentrant.into());
        }
        self.entered = true;

        let mut snapshot = InvariantSnapshot::capture(scope, &self.state.ledger, &self.state.pool);
        let mut staged = self.state.clone();
        let mut pending = Vec::new();
        let result = f(
            &self.config,
            &self.registry,
            &mut staged,
            &mut pending,
            &mut snapshot,
        );
        self.entered = false;

        let value = result?;
        snapshot.verify(
            &staged.ledger,
            &staged.pool,
            staged.vault.market_held(),
            staged.orders.escrow_total(),
            self.config.invariant_tolerance,
        )?;

        self.state = staged;
        for payload in pending {
            self.emit(now, payload);
        }
        Ok(value)
    }

    fn emit(&mut self, timestamp: Timestamp, payload: EventPayload) {
        let event = Event {
            id: EventId(self.next_event_id),
            timestamp,
            payload,
        };
        self.next_event_id += 1;

        if self.config.verbose {
            println!("[Event {}] {:?}", event.id.0, event.payload);
        }

        self.events.push(event);
        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }

    // 15.1.2: funding. settled before every skew-sensitive operation; also
    // exposed as a standalone keeper-callable poke.

    pub(super) fn settle_funding_in(
        config: &MarketConfig,
        state: &mut CoreState,
        events: &mut Vec<EventPayload>,
        now: Timestamp,
        price: Price,
    ) -> FundingSettlement {
        let settlement = state.ledger.settle_funding_fees(now, price, &config.funding);
        if !settlement.unrecorded.is_zero() || !settlement.transferred.is_zero() {
            events.push(EventPayload::FundingSettled(FundingSettledEvent {
                unrecorded: settlement.unrecorded,
                transferred: settlement.transferred,
                current_rate: settlement.current_rate,
                cumulative_funding_rate: settlement.cumulative_funding_rate,
            }));
        }
        settlement
    }

    pub fn settle_funding(&mut self, now: Timestamp) -> Result<FundingSettlement, CoreError> {
        self.mutate(now, GuardScope::Other, |config, _registry, state, events, _snapshot| {
            let max_age = state.oracle.config.onchain_max_age_ms;
            let (price, _) = state.oracle.get_price(now, max_age, false)?;
            Ok(Self::settle_funding_in(config, state, events, now, price))
        })
    }

    // 15.1.3: oracle surface.

    /// Record an on-chain feed round. External push source, not a core mutator.
    pub fn push_onchain_price(&mut self, answer: Decimal, updated_at: Timestamp) {
        self.state.oracle.push_onchain_price(answer, updated_at);
    }

    pub fn get_price(
        &self,
        now: Timestamp,
        max_age_ms: i64,
        price_diff_check: bool,
    ) -> Result<(Price, Timestamp), CoreError> {
        Ok(self.state.oracle.get_price(now, max_age_ms, price_diff_check)?)
    }

    pub fn update_offchain_price(
        &mut self,
        submitter: AccountId,
        payload: OffchainPriceUpdate,
        payment: Collateral,
        now: Timestamp,
    ) -> Result<Collateral, CoreError> {
        self.mutate(now, GuardScope::Other, |_config, _registry, state, events, _snapshot| {
            let publish_time = payload.publish_time;
            let refund = state
                .oracle
                .update_offchain_price(&mut state.vault, submitter, payload, payment)?;
            events.push(EventPayload::OffchainPriceUpdated(OffchainPriceUpdatedEvent {
                submitter,
                publish_time,
                refund,
            }));
            Ok(refund)
        })
    }

    // 15.1.4: collateral and token surface.

    /// Inbound collateral from outside the system.
    pub fn fund_account(&mut self, account: AccountId, amount: Collateral) {
        self.state.vault.fund_account(account, amount);
    }

    pub fn balance_of(&self, account: AccountId) -> Collateral {
        self.state.vault.balance_of(account)
    }

    pub fn market_held(&self) -> Collateral {
        self.state.vault.market_held()
    }

    pub fn transfer_position(
        &mut self,
        from: AccountId,
        to: AccountId,
        token_id: TokenId,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        self.mutate(now, GuardScope::Other, |_config, _registry, state, _events, _snapshot| {
            state.book.transfer(token_id, from, to)
        })
    }

    pub fn transfer_shares(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        self.mutate(now, GuardScope::Other, |_config, _registry, state, _events, _snapshot| {
            state.pool.transfer_shares(from, to, amount)
        })
    }

    // 15.1.5: read surface.

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Owner-level parameter access. Validation lives on the setters.
    pub fn config_mut(&mut self) -> &mut MarketConfig {
        &mut self.config
    }

    pub fn pause_module(&mut self, key: ModuleKey) -> Result<(), CoreError> {
        Ok(self.registry.pause(key)?)
    }

    pub fn unpause_module(&mut self, key: ModuleKey) -> Result<(), CoreError> {
        Ok(self.registry.unpause(key)?)
    }

    pub fn stable_collateral_total(&self) -> Collateral {
        self.state.ledger.stable_collateral_total
    }

    pub fn margin_deposited_total(&self) -> Collateral {
        self.state.ledger.global_positions.margin_deposited_total
    }

    pub fn size_opened_total(&self) -> Collateral {
        self.state.ledger.global_positions.size_opened_total
    }

    pub fn cumulative_funding_rate(&self) -> Decimal {
        self.state.ledger.global_positions.cumulative_funding_rate
    }

    pub fn skew_fraction(&self, price: Price) -> Decimal {
        self.state.ledger.skew_fraction(price)
    }

    pub fn position(&self, token_id: TokenId) -> Option<&crate::position::Position> {
        self.state.ledger.position(token_id)
    }

    pub fn position_count(&self) -> usize {
        self.state.ledger.position_count()
    }

    pub fn positions(&self) -> impl Iterator<Item = (&TokenId, &crate::position::Position)> {
        self.state.ledger.positions_iter()
    }

    pub fn owner_of(&self, token_id: TokenId) -> Option<AccountId> {
        self.state.book.owner_of(token_id)
    }

    pub fn tokens_of(&self, account: AccountId) -> Vec<TokenId> {
        self.state.book.tokens_of(account)
    }

    pub fn is_locked(&self, token_id: TokenId) -> bool {
        self.state.book.is_locked(token_id)
    }

    pub fn is_locked_by(&self, token_id: TokenId, key: ModuleKey) -> bool {
        self.state.book.is_locked_by(token_id, key)
    }

    pub fn shares_of(&self, account: AccountId) -> Decimal {
        self.state.pool.shares_of(account)
    }

    pub fn total_shares(&self) -> Decimal {
        self.state.pool.total_shares()
    }

    pub fn stable_collateral_per_share(&self) -> Decimal {
        self.state.pool.stable_collateral_per_share(&self.state.ledger)
    }

    pub fn pending_order(&self, account: AccountId) -> Option<&super::orders::DelayedOrder> {
        self.state.orders.pending(account)
    }

    pub fn escrow_total(&self) -> Collateral {
        self.state.orders.escrow_total()
    }

    pub fn limit_order(&self, token_id: TokenId) -> Option<&super::orders::LimitCloseOrder> {
        self.state.orders.limit(token_id)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }
}
