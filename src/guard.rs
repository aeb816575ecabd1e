// 13.0 guard.rs: pre/post assertions bracketing every mutating operation.
// a violation means the books no longer reconcile; the operation is aborted
// wholesale and the error is terminal.

use crate::errors::InvariantError;
use crate::ledger::GlobalLedger;
use crate::pool::StablePool;
use crate::types::Collateral;
use rust_decimal::Decimal;

/// Which checks apply to the operation being bracketed. The per-share check
/// only binds inside stable deposit/withdraw; everywhere else pool value may
/// legitimately move (e.g. the pool pays out a trader's profit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardScope {
    StablePoolOp,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct InvariantSnapshot {
    scope: GuardScope,
    stable_per_share: Decimal,
}

impl InvariantSnapshot {
    pub fn capture(scope: GuardScope, ledger: &GlobalLedger, pool: &StablePool) -> Self {
        Self {
            scope,
            stable_per_share: pool.stable_collateral_per_share(ledger),
        }
    }

    /// Reset the per-share baseline mid-operation. A pool operation settles
    /// global funding before touching shares; value moved by that settlement
    /// belongs to funding, not to the deposit/withdraw under scrutiny.
    pub fn rebaseline(&mut self, ledger: &GlobalLedger, pool: &StablePool) {
        self.stable_per_share = pool.stable_collateral_per_share(ledger);
    }

    /// Post-operation verification:
    /// (a) tracked totals vs collateral actually held, within tolerance;
    /// (b) stable per-share value did not decrease across a pool operation;
    /// (c) aggregate margin matches the per-position margin sum.
    pub fn verify(
        &self,
        ledger: &GlobalLedger,
        pool: &StablePool,
        held: Collateral,
        escrow_total: Collateral,
        tolerance: Decimal,
    ) -> Result<(), InvariantError> {
        let tracked = ledger.stable_collateral_total.value()
            + ledger.global_positions.margin_deposited_total.value()
            + escrow_total.value();
        if (tracked - held.value()).abs() > tolerance {
            return Err(InvariantError::CollateralNet {
                tracked,
                held: held.value(),
            });
        }

        if self.scope == GuardScope::StablePoolOp {
            let per_share = pool.stable_collateral_per_share(ledger);
            if per_share + tolerance < self.stable_per_share {
                return Err(InvariantError::StableSharesValue {
                    before: self.stable_per_share,
                    after: per_share,
                });
            }
        }

        let aggregate = ledger.global_positions.margin_deposited_total.value();
        let sum = ledger.position_margin_sum().value();
        if (aggregate - sum).abs() > tolerance {
            return Err(InvariantError::MarginMismatch { aggregate, sum });
        }

        Ok(())
    }
}
