// synth-core: accounting and risk core of a two-sided synthetic-asset market.
// stable LPs supply collateral; leverage traders take margined long exposure
// against the same collateral's price. all computation is deterministic with
// no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: AccountId, TokenId, Price, Collateral, Timestamp
//   2.x  fixed.rs: 18-digit fixed point, floor rounding, funding bias
//   3.x  errors.rs: the five-category error taxonomy
//   4.x  config.rs: leverage/fee/window/funding/liquidation parameters
//   5.x  registry.rs: capability-key module authorization
//   6.x  vault.rs: collateral token stand-in (balances, market custody)
//   7.x  oracle.rs: dual-source validated price, update-with-refund
//   8.x  position.rs: position record, pnl and funding accrual math
//   9.x  ledger.rs: global totals, funding-rate integral, gated mutators
//   10.x book.rs: position tokens, locks, open/adjust/close execution
//   11.x pool.rs: stable share accounting, deposit/withdraw execution
//   12.x liquidation.rs: maintenance margin, fee clamp, closure split
//   13.x guard.rs: pre/post invariant bracket for every mutation
//   14.x events.rs: state transition events for audit
//   15.x engine/: Market facade: announce/execute orders, liquidations

// core accounting modules
pub mod book;
pub mod engine;
pub mod fixed;
pub mod ledger;
pub mod pool;
pub mod position;
pub mod types;

// risk and safety modules
pub mod guard;
pub mod liquidation;
pub mod registry;

// integration modules
pub mod config;
pub mod errors;
pub mod events;
pub mod oracle;
pub mod vault;

// re exports for convenience
pub use book::{AdjustOutcome, CloseOutcome, OpenOutcome, PositionBook};
pub use config::{FundingParams, LiquidationParams, MarketConfig};
pub use engine::{
    AnnounceReceipt, DelayedOrder, ExecutionReceipt, LimitCloseOrder, LiquidationReceipt, Market,
    OrderKind, OrderOutcome, OrderPayload, OrderStore,
};
pub use errors::{
    CoreError, EconomicLimitError, InvariantError, OracleError, StateError, ValidationError,
};
pub use events::{Event, EventId, EventPayload};
pub use guard::{GuardScope, InvariantSnapshot};
pub use ledger::{FundingSettlement, GlobalLedger, GlobalPositions};
pub use liquidation::{can_liquidate, liquidation_fee, maintenance_margin, LiquidationSplit};
pub use oracle::{OffchainPriceUpdate, Oracle, OracleConfig};
pub use pool::{DepositOutcome, StablePool, WithdrawOutcome};
pub use position::{weighted_entry_price, Position};
pub use registry::ModuleRegistry;
pub use types::{AccountId, Collateral, ModuleKey, Price, Timestamp, TokenId};
pub use vault::CollateralVault;
